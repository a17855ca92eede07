// Copyright © 2024 The JBoss Remote Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! HTTP Digest access authentication (RFC 2617, MD5).
//!
//! The management interface answers unauthenticated requests with a 401
//! carrying a `WWW-Authenticate: Digest` challenge. This module parses the
//! challenge and computes the `Authorization` header for the retried
//! request. Only the MD5 algorithm with optional qop="auth" is supported,
//! which is what WildFly negotiates.

use md5::{Digest, Md5};
use rand::distributions::Alphanumeric;
use rand::Rng;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChallengeError {
    #[error("challenge is not a Digest challenge: {0}")]
    NotDigest(String),
    #[error("malformed challenge parameter: {0}")]
    MalformedParameter(String),
    #[error("challenge is missing its {0} parameter")]
    MissingParameter(&'static str),
    #[error("unsupported digest algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("unsupported quality of protection: {0}")]
    UnsupportedQop(String),
}

/// A parsed `WWW-Authenticate: Digest` challenge.
#[derive(Debug, Eq, PartialEq)]
pub struct Challenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    /// `Some("auth")` when the server negotiated a quality of protection.
    pub qop: Option<String>,
}

pub fn parse_challenge(header: &str) -> Result<Challenge, ChallengeError> {
    let params = header
        .trim()
        .strip_prefix("Digest ")
        .ok_or_else(|| ChallengeError::NotDigest(header.to_owned()))?;

    let mut realm = None;
    let mut nonce = None;
    let mut opaque = None;
    let mut qop = None;

    for param in split_challenge_params(params) {
        let (key, value) = param
            .split_once('=')
            .ok_or_else(|| ChallengeError::MalformedParameter(param.clone()))?;
        let value = value.trim().trim_matches('"');
        match key.trim() {
            "realm" => realm = Some(value.to_owned()),
            "nonce" => nonce = Some(value.to_owned()),
            "opaque" => opaque = Some(value.to_owned()),
            "qop" => {
                // The directive lists the options the server accepts,
                // e.g. "auth,auth-int". Integrity protection of the body
                // is not implemented.
                if value.split(',').any(|option| option.trim() == "auth") {
                    qop = Some("auth".to_owned());
                } else {
                    return Err(ChallengeError::UnsupportedQop(value.to_owned()));
                }
            }
            "algorithm" => {
                if !value.eq_ignore_ascii_case("MD5") {
                    return Err(ChallengeError::UnsupportedAlgorithm(value.to_owned()));
                }
            }
            // domain, stale, charset and unknown extensions are ignored
            _ => {}
        }
    }

    Ok(Challenge {
        realm: realm.ok_or(ChallengeError::MissingParameter("realm"))?,
        nonce: nonce.ok_or(ChallengeError::MissingParameter("nonce"))?,
        opaque,
        qop,
    })
}

// Splits the parameter list on commas outside of quoted values, so that
// qop="auth,auth-int" stays a single parameter.
fn split_challenge_params(params: &str) -> Vec<String> {
    let mut list = Vec::new();
    let mut in_quotes = false;
    let mut current = String::new();

    for c in params.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                if !current.trim().is_empty() {
                    list.push(current.trim().to_owned());
                }
                current = String::new();
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    if !current.trim().is_empty() {
        list.push(current.trim().to_owned());
    }

    list
}

/// Computes the `Authorization` header value answering `challenge`.
///
/// `uri` is the request target exactly as it appears on the request line,
/// including any query string. One request is sent per connection so the
/// nonce count never advances past 00000001.
pub fn authorization(
    challenge: &Challenge,
    username: &str,
    password: &str,
    method: &str,
    uri: &str,
    cnonce: &str,
) -> String {
    const NONCE_COUNT: &str = "00000001";

    let ha1 = md5_hex(&format!("{username}:{}:{password}", challenge.realm));
    let ha2 = md5_hex(&format!("{method}:{uri}"));
    let response = match challenge.qop.as_deref() {
        Some(qop) => md5_hex(&format!(
            "{ha1}:{}:{NONCE_COUNT}:{cnonce}:{qop}:{ha2}",
            challenge.nonce
        )),
        None => md5_hex(&format!("{ha1}:{}:{ha2}", challenge.nonce)),
    };

    let mut header = format!(
        "Digest username=\"{username}\", realm=\"{}\", nonce=\"{}\", \
         uri=\"{uri}\", response=\"{response}\", algorithm=MD5",
        challenge.realm, challenge.nonce
    );
    if let Some(qop) = &challenge.qop {
        header.push_str(&format!(", qop={qop}, nc={NONCE_COUNT}, cnonce=\"{cnonce}\""));
    }
    if let Some(opaque) = &challenge.opaque {
        header.push_str(&format!(", opaque=\"{opaque}\""));
    }

    header
}

/// Fresh random client nonce for one authentication exchange.
pub fn client_nonce() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}

fn md5_hex(input: &str) -> String {
    Md5::digest(input.as_bytes())
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_challenge() {
        let challenge = parse_challenge(
            "Digest realm=\"ManagementRealm\", nonce=\"AAAA\", \
             opaque=\"00000000000000000000000000000000\", qop=\"auth,auth-int\", \
             algorithm=MD5, charset=UTF-8",
        )
        .unwrap();
        assert_eq!(
            challenge,
            Challenge {
                realm: "ManagementRealm".to_owned(),
                nonce: "AAAA".to_owned(),
                opaque: Some("00000000000000000000000000000000".to_owned()),
                qop: Some("auth".to_owned()),
            }
        );
    }

    #[test]
    fn test_parse_challenge_without_qop() {
        let challenge =
            parse_challenge("Digest realm=\"ManagementRealm\", nonce=\"AAAA\"").unwrap();
        assert_eq!(challenge.qop, None);
        assert_eq!(challenge.opaque, None);
    }

    #[test]
    fn test_reject_non_digest_challenge() {
        assert!(matches!(
            parse_challenge("Basic realm=\"ManagementRealm\""),
            Err(ChallengeError::NotDigest(_))
        ));
    }

    #[test]
    fn test_reject_missing_nonce() {
        assert!(matches!(
            parse_challenge("Digest realm=\"ManagementRealm\""),
            Err(ChallengeError::MissingParameter("nonce"))
        ));
    }

    #[test]
    fn test_reject_unsupported_algorithm() {
        assert!(matches!(
            parse_challenge(
                "Digest realm=\"ManagementRealm\", nonce=\"AAAA\", algorithm=SHA-256"
            ),
            Err(ChallengeError::UnsupportedAlgorithm(_))
        ));
    }

    // Worked example from RFC 2617 section 3.5.
    #[test]
    fn test_rfc2617_response() {
        let challenge = parse_challenge(
            "Digest realm=\"testrealm@host.com\", qop=\"auth,auth-int\", \
             nonce=\"dcd98b7102dd2f0e8b11d0f600bfb0c093\", \
             opaque=\"5ccc069c403ebaf9f0171e9517f40e41\"",
        )
        .unwrap();

        let header = authorization(
            &challenge,
            "Mufasa",
            "Circle Of Life",
            "GET",
            "/dir/index.html",
            "0a4f113b",
        );

        assert!(header.contains("response=\"6629fae49393a05397450978507c4ef1\""));
        assert!(header.contains("username=\"Mufasa\""));
        assert!(header.contains("qop=auth, nc=00000001, cnonce=\"0a4f113b\""));
        assert!(header.contains("opaque=\"5ccc069c403ebaf9f0171e9517f40e41\""));
    }

    #[test]
    fn test_client_nonce_shape() {
        let nonce = client_nonce();
        assert_eq!(nonce.len(), 16);
        assert!(nonce.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(nonce, client_nonce());
    }
}
