// Copyright © 2024 The JBoss Remote Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! Minimal HTTP client for the JBoss/WildFly management API.
//!
//! A translated [`Descriptor`] is shaped into an [`ApiRequest`] and written
//! as plain HTTP/1.1 over a `Read + Write` stream, one request per
//! connection. The client drives the digest authentication handshake and
//! normalizes the two success-response shapes the management interface
//! produces (bare result body on GET 200, `{outcome, result}` envelope
//! everywhere else) into the envelope shape.

use std::io::{Read, Write};
use std::net::TcpStream;

use command_parser::{Address, Descriptor, Mode};
use log::debug;
use serde_json::{json, Value};
use thiserror::Error;

pub mod digest;

/// Root of the management interface on the server.
pub const MANAGEMENT_ROOT: &str = "/management";

#[derive(Error, Debug)]
pub enum Error {
    #[error("error writing to or reading from the management HTTP stream: {0}")]
    Socket(#[source] std::io::Error),
    #[error("error parsing HTTP status code: {0}")]
    StatusCodeParsing(#[source] std::num::ParseIntError),
    #[error("HTTP response is missing its protocol statement")]
    MissingProtocol,
    #[error("error parsing HTTP Content-Length field: {0}")]
    ContentLengthParsing(#[source] std::num::ParseIntError),
    #[error("HTTP response is not valid UTF-8")]
    NonUtf8,
    #[error("error parsing the response body as JSON: {0}")]
    ResponseBody(#[source] serde_json::Error),
    #[error("server responded with an error: {0:?}: {1:?}")]
    ServerResponse(StatusCode, Option<String>),
    #[error("unauthorized connection, check the configured username and password")]
    Unauthorized,
    #[error("server requires authentication but no credentials were configured")]
    MissingCredentials,
    #[error("server sent a 401 without a WWW-Authenticate challenge")]
    MissingChallenge,
    #[error("bad authentication challenge: {0}")]
    BadChallenge(#[source] digest::ChallengeError),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StatusCode {
    Continue,
    Ok,
    NoContent,
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    InternalServerError,
    ServiceUnavailable,
    Unknown,
}

impl StatusCode {
    fn from_raw(code: usize) -> StatusCode {
        match code {
            100 => StatusCode::Continue,
            200 => StatusCode::Ok,
            204 => StatusCode::NoContent,
            400 => StatusCode::BadRequest,
            401 => StatusCode::Unauthorized,
            403 => StatusCode::Forbidden,
            404 => StatusCode::NotFound,
            500 => StatusCode::InternalServerError,
            503 => StatusCode::ServiceUnavailable,
            _ => StatusCode::Unknown,
        }
    }

    fn parse(code: &str) -> Result<StatusCode, Error> {
        Ok(StatusCode::from_raw(
            code.trim().parse().map_err(Error::StatusCodeParsing)?,
        ))
    }

    /// True for every status outside the success range the management
    /// interface uses.
    pub fn is_server_error(self) -> bool {
        !matches!(
            self,
            StatusCode::Ok | StatusCode::Continue | StatusCode::NoContent
        )
    }
}

/// Username and password for the management realm.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// One HTTP request against the management interface, ready to be written
/// to a stream.
#[derive(Debug, Eq, PartialEq)]
pub struct ApiRequest {
    method: &'static str,
    path: String,
    body: Option<String>,
}

impl ApiRequest {
    pub fn method(&self) -> &'static str {
        self.method
    }

    /// Request target as it appears on the request line, including the
    /// query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }
}

/// Shapes a descriptor into the HTTP request the management interface
/// expects for the given verb.
///
/// GET places the address on the URL and the operation and arguments in the
/// query string. POST sends everything as a JSON body with the address as
/// an ordered segment list.
pub fn api_request(mut descriptor: Descriptor, mode: Mode) -> ApiRequest {
    match mode {
        Mode::Get => {
            let mut path = String::from(MANAGEMENT_ROOT);
            match descriptor.take_address() {
                Some(Address::Path(address)) => path.push_str(&address),
                Some(Address::Segments(segments)) => {
                    for segment in segments {
                        path.push('/');
                        path.push_str(&segment);
                    }
                }
                None => {}
            }

            let mut query = format!("operation={}", escape_query(descriptor.operation()));
            for (key, value) in descriptor.arguments() {
                query.push('&');
                query.push_str(&escape_query(key));
                query.push('=');
                query.push_str(&escape_query(value));
            }

            ApiRequest {
                method: "GET",
                path: format!("{path}?{query}"),
                body: None,
            }
        }
        Mode::Post => {
            let mut body = serde_json::Map::new();
            body.insert(
                "operation".to_owned(),
                Value::String(descriptor.operation().to_owned()),
            );
            for (key, value) in descriptor.arguments() {
                body.insert(key.clone(), Value::String(value.clone()));
            }
            match descriptor.take_address() {
                Some(Address::Segments(segments)) => {
                    body.insert(
                        "address".to_owned(),
                        Value::Array(segments.into_iter().map(Value::String).collect()),
                    );
                }
                Some(Address::Path(address)) => {
                    body.insert(
                        "address".to_owned(),
                        Value::Array(
                            address
                                .split('/')
                                .filter(|segment| !segment.is_empty())
                                .map(|segment| Value::String(segment.to_owned()))
                                .collect(),
                        ),
                    );
                }
                None => {}
            }

            ApiRequest {
                method: "POST",
                path: MANAGEMENT_ROOT.to_owned(),
                body: Some(Value::Object(body).to_string()),
            }
        }
    }
}

// Percent-encodes a query string component, leaving the characters the
// management interface uses in operation names and values untouched.
fn escape_query(component: &str) -> String {
    let mut escaped = String::with_capacity(component.len());
    for byte in component.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                escaped.push(byte as char)
            }
            _ => escaped.push_str(&format!("%{byte:02X}")),
        }
    }
    escaped
}

/// A parsed HTTP response: status line, raw header block and optional body.
#[derive(Debug)]
pub struct HttpResponse {
    status: StatusCode,
    head: String,
    body: Option<String>,
}

impl HttpResponse {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        get_header(&self.head, name)
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }
}

fn get_header<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    let needle = format!("{name}: ");
    let start = head.find(&needle)? + needle.len();
    let end = head[start..].find('\r')?;
    Some(&head[start..start + end])
}

fn get_status_code(head: &str) -> Result<StatusCode, Error> {
    match head.find("HTTP/1.1 ") {
        Some(offset) => {
            let line = &head[offset + "HTTP/1.1 ".len()..];
            let end = line.find('\r').ok_or(Error::MissingProtocol)?;
            let code = line[..end].split(' ').next().unwrap_or("");
            StatusCode::parse(code)
        }
        None => Err(Error::MissingProtocol),
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn parse_http_response(stream: &mut dyn Read) -> Result<HttpResponse, Error> {
    let mut raw = Vec::new();
    let mut chunk = [0u8; 256];
    let mut head_end = None;
    let mut content_length: Option<usize> = None;

    loop {
        let count = stream.read(&mut chunk).map_err(Error::Socket)?;
        if count == 0 {
            // Connection closed; with no Content-Length the body runs to EOF
            break;
        }
        raw.extend_from_slice(&chunk[..count]);

        if head_end.is_none() {
            if let Some(offset) = find_subsequence(&raw, b"\r\n\r\n") {
                let end = offset + b"\r\n\r\n".len();
                head_end = Some(end);

                let head = std::str::from_utf8(&raw[..end]).map_err(|_| Error::NonUtf8)?;
                content_length = match get_header(head, "Content-Length") {
                    Some(length) => {
                        Some(length.trim().parse().map_err(Error::ContentLengthParsing)?)
                    }
                    None => None,
                };
            }
        }

        if let (Some(end), Some(length)) = (head_end, content_length) {
            if raw.len() >= end + length {
                break;
            }
        }
    }

    let head_end = head_end.ok_or(Error::MissingProtocol)?;
    let head = String::from_utf8(raw[..head_end].to_vec()).map_err(|_| Error::NonUtf8)?;
    let status = get_status_code(&head)?;

    let available = &raw[head_end..];
    let body_bytes = match content_length {
        Some(length) => Some(&available[..length.min(available.len())]),
        None if !available.is_empty() => Some(available),
        None => None,
    };
    let body = match body_bytes {
        Some(bytes) => Some(String::from_utf8(bytes.to_vec()).map_err(|_| Error::NonUtf8)?),
        None => None,
    };

    Ok(HttpResponse { status, head, body })
}

fn write_request<T: Write>(
    stream: &mut T,
    host: &str,
    request: &ApiRequest,
    authorization: Option<&str>,
) -> Result<(), Error> {
    stream
        .write_all(
            format!(
                "{} {} HTTP/1.1\r\nHost: {}\r\nAccept: */*\r\nConnection: close\r\n",
                request.method, request.path, host
            )
            .as_bytes(),
        )
        .map_err(Error::Socket)?;

    if let Some(authorization) = authorization {
        stream
            .write_all(format!("Authorization: {authorization}\r\n").as_bytes())
            .map_err(Error::Socket)?;
    }

    if let Some(body) = &request.body {
        stream
            .write_all(
                format!(
                    "Content-Type: application/json\r\nContent-Length: {}\r\n",
                    body.len()
                )
                .as_bytes(),
            )
            .map_err(Error::Socket)?;
    }

    stream.write_all(b"\r\n").map_err(Error::Socket)?;

    if let Some(body) = &request.body {
        stream.write_all(body.as_bytes()).map_err(Error::Socket)?;
    }

    stream.flush().map_err(Error::Socket)
}

/// Writes `request` to `stream` and parses the response from the same
/// stream. `host` is sent verbatim in the Host header and must carry the
/// port when the endpoint is not on port 80. Chunked transfer encoding is
/// not handled; the management interface sends Content-Length framed
/// responses.
pub fn round_trip<T: Read + Write>(
    stream: &mut T,
    host: &str,
    request: &ApiRequest,
    authorization: Option<&str>,
) -> Result<HttpResponse, Error> {
    write_request(stream, host, request, authorization)?;
    parse_http_response(stream)
}

/// Folds the two success-response shapes into the `{outcome, result}`
/// envelope.
///
/// GET 200 strips the envelope server-side and returns the bare result, so
/// it is wrapped back here. POST 200 and any 500 already carry the
/// envelope and pass through, which keeps failed operations scriptable
/// alongside successful ones.
pub fn normalize_response(method: &str, response: &HttpResponse) -> Result<Value, Error> {
    let parse_body = |response: &HttpResponse| -> Result<Value, Error> {
        match response.body() {
            Some(body) => serde_json::from_str(body).map_err(Error::ResponseBody),
            None => Ok(Value::Null),
        }
    };

    match response.status() {
        StatusCode::Ok if method == "GET" => Ok(json!({
            "outcome": "success",
            "result": parse_body(response)?,
        })),
        StatusCode::Ok => parse_body(response),
        StatusCode::NoContent => Ok(json!({ "outcome": "success" })),
        StatusCode::Unauthorized => Err(Error::Unauthorized),
        StatusCode::InternalServerError => match response
            .body()
            .and_then(|body| serde_json::from_str(body).ok())
        {
            Some(envelope) => Ok(envelope),
            None => Err(Error::ServerResponse(
                response.status(),
                response.body().map(str::to_owned),
            )),
        },
        status => Err(Error::ServerResponse(
            status,
            response.body().map(str::to_owned),
        )),
    }
}

/// Blocking client for one management endpoint.
///
/// Each request opens a fresh TCP connection (`Connection: close`); the
/// digest handshake therefore spans two connections, which RFC 2617
/// permits as long as the server nonce is replayed.
pub struct ApiClient {
    host: String,
    port: u16,
    credentials: Option<Credentials>,
}

impl ApiClient {
    pub fn new(host: &str, port: u16, credentials: Option<Credentials>) -> Self {
        ApiClient {
            host: host.to_owned(),
            port,
            credentials,
        }
    }

    /// Executes one request, answering a digest challenge if the server
    /// issues one, and returns the normalized result envelope.
    pub fn execute(&self, request: &ApiRequest) -> Result<Value, Error> {
        let mut response = self.round_trip_tcp(request, None)?;

        if response.status() == StatusCode::Unauthorized {
            let credentials = self
                .credentials
                .as_ref()
                .ok_or(Error::MissingCredentials)?;
            let challenge_header = response
                .header("WWW-Authenticate")
                .ok_or(Error::MissingChallenge)?;
            let challenge =
                digest::parse_challenge(challenge_header).map_err(Error::BadChallenge)?;
            debug!("answering digest challenge for realm {}", challenge.realm);

            let authorization = digest::authorization(
                &challenge,
                &credentials.username,
                &credentials.password,
                request.method(),
                request.path(),
                &digest::client_nonce(),
            );
            response = self.round_trip_tcp(request, Some(&authorization))?;
        }

        normalize_response(request.method(), &response)
    }

    fn round_trip_tcp(
        &self,
        request: &ApiRequest,
        authorization: Option<&str>,
    ) -> Result<HttpResponse, Error> {
        debug!(
            "{} {} on {}:{}",
            request.method, request.path, self.host, self.port
        );
        let mut stream =
            TcpStream::connect((self.host.as_str(), self.port)).map_err(Error::Socket)?;
        round_trip(
            &mut stream,
            &format!("{}:{}", self.host, self.port),
            request,
            authorization,
        )
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use command_parser::translate;

    use super::*;

    struct FakeStream {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl FakeStream {
        fn new(response: &str) -> Self {
            FakeStream {
                input: Cursor::new(response.as_bytes().to_vec()),
                output: Vec::new(),
            }
        }

        fn written(&self) -> &str {
            std::str::from_utf8(&self.output).unwrap()
        }
    }

    impl Read for FakeStream {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for FakeStream {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn response(status_line: &str, headers: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status_line}\r\nContent-Length: {}\r\n{headers}\r\n{body}",
            body.len()
        )
    }

    #[test]
    fn test_get_request_shape() {
        let descriptor = translate(
            "/subsystem=undertow:read-attribute(include-defaults=true,name=uuid)",
            Mode::Get,
        )
        .unwrap();
        let request = api_request(descriptor, Mode::Get);

        assert_eq!(request.method(), "GET");
        assert_eq!(
            request.path(),
            "/management/subsystem/undertow?operation=attribute&include-defaults=true&name=uuid"
        );
        assert_eq!(request.body(), None);
    }

    #[test]
    fn test_get_request_without_address() {
        let request = api_request(translate(":read-resource", Mode::Get).unwrap(), Mode::Get);
        assert_eq!(request.path(), "/management?operation=resource");
    }

    #[test]
    fn test_post_request_shape() {
        let descriptor = translate("/core-service=management:whoami", Mode::Post).unwrap();
        let request = api_request(descriptor, Mode::Post);

        assert_eq!(request.method(), "POST");
        assert_eq!(request.path(), "/management");
        let body: Value = serde_json::from_str(request.body().unwrap()).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "operation": "whoami",
                "address": ["core-service", "management"],
            })
        );
    }

    #[test]
    fn test_post_request_arguments_merged_into_body() {
        let descriptor = translate(
            "/subsystem=undertow:write-attribute(name=statistics-enabled,value=true)",
            Mode::Post,
        )
        .unwrap();
        let request = api_request(descriptor, Mode::Post);

        let body: Value = serde_json::from_str(request.body().unwrap()).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "operation": "write-attribute",
                "name": "statistics-enabled",
                "value": "true",
                "address": ["subsystem", "undertow"],
            })
        );
    }

    #[test]
    fn test_status_code_classification() {
        assert!(!StatusCode::Ok.is_server_error());
        assert!(!StatusCode::NoContent.is_server_error());
        assert!(!StatusCode::Continue.is_server_error());
        assert!(StatusCode::Unauthorized.is_server_error());
        assert!(StatusCode::InternalServerError.is_server_error());
        assert!(StatusCode::from_raw(418).is_server_error());
    }

    #[test]
    fn test_escape_query() {
        assert_eq!(escape_query("max-pool-size"), "max-pool-size");
        assert_eq!(escape_query("a=b c"), "a%3Db%20c");
    }

    #[test]
    fn test_round_trip_writes_request_and_parses_response() {
        let body = "{\"launch-type\":\"STANDALONE\"}";
        let mut stream = FakeStream::new(&response("200 OK", "", body));
        let request = api_request(translate(":read-resource", Mode::Get).unwrap(), Mode::Get);

        let parsed = round_trip(&mut stream, "localhost:9990", &request, None).unwrap();

        let written = stream.written();
        assert!(written.starts_with("GET /management?operation=resource HTTP/1.1\r\n"));
        assert!(written.contains("Host: localhost:9990\r\n"));
        assert!(written.contains("Connection: close\r\n"));
        assert_eq!(parsed.status(), StatusCode::Ok);
        assert_eq!(parsed.body(), Some(body));
    }

    #[test]
    fn test_round_trip_writes_post_body() {
        let mut stream = FakeStream::new(&response("200 OK", "", "{\"outcome\":\"success\"}"));
        let request = api_request(translate(":whoami", Mode::Post).unwrap(), Mode::Post);

        round_trip(&mut stream, "localhost", &request, None).unwrap();

        let written = stream.written();
        assert!(written.starts_with("POST /management HTTP/1.1\r\n"));
        assert!(written.contains("Content-Type: application/json\r\n"));
        assert!(written.contains("Content-Length: 22\r\n"));
        assert!(written.ends_with("{\"operation\":\"whoami\"}"));
    }

    #[test]
    fn test_authorization_header_is_written() {
        let mut stream = FakeStream::new(&response("200 OK", "", "{}"));
        let request = api_request(translate(":whoami", Mode::Post).unwrap(), Mode::Post);

        round_trip(
            &mut stream,
            "localhost",
            &request,
            Some("Digest username=\"admin\""),
        )
        .unwrap();

        assert!(stream
            .written()
            .contains("Authorization: Digest username=\"admin\"\r\n"));
    }

    #[test]
    fn test_parse_response_challenge_header() {
        let mut stream = FakeStream::new(&response(
            "401 Unauthorized",
            "WWW-Authenticate: Digest realm=\"ManagementRealm\", nonce=\"AAAA\"\r\n",
            "",
        ));
        let request = api_request(translate(":whoami", Mode::Post).unwrap(), Mode::Post);

        let parsed = round_trip(&mut stream, "localhost", &request, None).unwrap();
        assert_eq!(parsed.status(), StatusCode::Unauthorized);
        assert_eq!(
            parsed.header("WWW-Authenticate"),
            Some("Digest realm=\"ManagementRealm\", nonce=\"AAAA\"")
        );
    }

    #[test]
    fn test_parse_response_body_runs_to_eof_without_content_length() {
        let mut stream = FakeStream::new("HTTP/1.1 200 OK\r\n\r\n{\"x\":1}");
        let request = api_request(translate(":whoami", Mode::Post).unwrap(), Mode::Post);

        let parsed = round_trip(&mut stream, "localhost", &request, None).unwrap();
        assert_eq!(parsed.body(), Some("{\"x\":1}"));
    }

    #[test]
    fn test_truncated_response_is_rejected() {
        let mut stream = FakeStream::new("HTTP/1.1 200");
        let request = api_request(translate(":whoami", Mode::Post).unwrap(), Mode::Post);

        assert!(matches!(
            round_trip(&mut stream, "localhost", &request, None),
            Err(Error::MissingProtocol)
        ));
    }

    #[test]
    fn test_normalize_wraps_bare_get_result() {
        let parsed = HttpResponse {
            status: StatusCode::Ok,
            head: String::new(),
            body: Some("{\"launch-type\":\"STANDALONE\"}".to_owned()),
        };
        assert_eq!(
            normalize_response("GET", &parsed).unwrap(),
            serde_json::json!({
                "outcome": "success",
                "result": { "launch-type": "STANDALONE" },
            })
        );
    }

    #[test]
    fn test_normalize_passes_post_envelope_through() {
        let parsed = HttpResponse {
            status: StatusCode::Ok,
            head: String::new(),
            body: Some("{\"outcome\":\"success\",\"result\":null}".to_owned()),
        };
        assert_eq!(
            normalize_response("POST", &parsed).unwrap(),
            serde_json::json!({ "outcome": "success", "result": null })
        );
    }

    #[test]
    fn test_normalize_passes_failure_envelope_through() {
        let envelope = "{\"outcome\":\"failed\",\"failure-description\":\"no such resource\"}";
        let parsed = HttpResponse {
            status: StatusCode::InternalServerError,
            head: String::new(),
            body: Some(envelope.to_owned()),
        };
        assert_eq!(
            normalize_response("POST", &parsed).unwrap(),
            serde_json::from_str::<Value>(envelope).unwrap()
        );
    }

    #[test]
    fn test_normalize_rejects_unauthorized() {
        let parsed = HttpResponse {
            status: StatusCode::Unauthorized,
            head: String::new(),
            body: None,
        };
        assert!(matches!(
            normalize_response("POST", &parsed),
            Err(Error::Unauthorized)
        ));
    }

    #[test]
    fn test_normalize_rejects_other_server_errors() {
        let parsed = HttpResponse {
            status: StatusCode::NotFound,
            head: String::new(),
            body: Some("not found".to_owned()),
        };
        assert!(matches!(
            normalize_response("GET", &parsed),
            Err(Error::ServerResponse(StatusCode::NotFound, Some(_)))
        ));
    }
}
