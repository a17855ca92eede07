// Copyright © 2024 The JBoss Remote Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! Translation of JBoss/WildFly management CLI expressions into request
//! descriptors.
//!
//! An expression is either an operation on the server root
//! (`:read-resource`) or a resource path followed by an operation
//! (`/subsystem=undertow:read-attribute(name=statistics-enabled)`). The
//! single colon separates the two clauses. Translation is a pure function:
//! it never touches the network and leaves transport concerns (base URL,
//! authentication, verb selection) to the caller.

use std::collections::BTreeMap;

use log::debug;
use thiserror::Error;

/// HTTP verb hint supplied by the caller.
///
/// The mode governs two independent choices: how a resource path is shaped
/// (flattened URL string for GET, segment list for POST) and whether the
/// leading word of a hyphenated operation name is stripped (the management
/// interface exposes `read-resource` as `resource` under GET).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Mode {
    Get,
    Post,
}

/// Resource path portion of a translated command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Address {
    /// Slash-delimited path suitable for appending to a URL (GET).
    Path(String),
    /// Ordered path segments suitable for a JSON request body (POST).
    Segments(Vec<String>),
}

/// Structured output of [`translate`], consumed by the request executor.
///
/// Insertion follows a fixed order: operation, then arguments, then
/// address. A later insert of the same argument key wins.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Descriptor {
    operation: String,
    arguments: BTreeMap<String, String>,
    address: Option<Address>,
}

impl Descriptor {
    fn new(operation: String) -> Self {
        Descriptor {
            operation,
            arguments: BTreeMap::new(),
            address: None,
        }
    }

    fn insert_argument(&mut self, key: String, value: String) {
        // Mapping semantics, the last occurrence of a key wins
        self.arguments.insert(key, value);
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn arguments(&self) -> &BTreeMap<String, String> {
        &self.arguments
    }

    pub fn address(&self) -> Option<&Address> {
        self.address.as_ref()
    }

    /// Removes and returns the address, leaving the descriptor without one.
    /// The executor pops the address when it becomes part of the URL rather
    /// than the request parameters.
    pub fn take_address(&mut self) -> Option<Address> {
        self.address.take()
    }
}

#[derive(Error, Debug)]
pub enum TranslateError {
    #[error(
        "unable to find operation in command ({0}) - operations are prefixed \
         with a single colon, e.g. (:reload)"
    )]
    NoOperationFound(String),
    #[error(
        "too many operations found in ({0}) - only a single operation may be \
         defined, e.g. (:read-resource)"
    )]
    TooManyOperations(String),
    #[error("malformed argument ({0}) - arguments take the form key=value")]
    MalformedArgumentSyntax(String),
    #[error(
        "unrecognized command ({0}) - commands start with a resource path \
         (/subsystem=undertow) or an operation (:whoami)"
    )]
    UnrecognizedCommandForm(String),
}

type TranslateResult<T> = std::result::Result<T, TranslateError>;

/// Translates a management CLI expression into a [`Descriptor`].
///
/// Exactly one colon must appear in the expression; it separates the
/// resource path from the operation clause. All failures are terminal for
/// the command being processed, there are no partial results.
pub fn translate(expression: &str, mode: Mode) -> TranslateResult<Descriptor> {
    debug!("translating ({expression}) as {mode:?}");

    let (path_clause, operation_clause) = match expression.split_once(':') {
        None => {
            return Err(TranslateError::NoOperationFound(expression.to_owned()));
        }
        Some((_, operation)) if operation.contains(':') => {
            return Err(TranslateError::TooManyOperations(expression.to_owned()));
        }
        Some((path, operation)) => (path, operation),
    };

    let address = if path_clause.is_empty() {
        // Standalone operation, e.g. :reload
        None
    } else if path_clause.starts_with('/') {
        Some(parse_path(path_clause, mode))
    } else {
        return Err(TranslateError::UnrecognizedCommandForm(
            expression.to_owned(),
        ));
    };

    let (name, arguments) = parse_operation(operation_clause)?;

    let name = match mode {
        // The URL naming scheme drops the leading word of the operation,
        // e.g. read-resource is exposed as resource. The caller routes only
        // hyphenated read operations to GET mode; a name without a hyphen
        // passes through unchanged.
        Mode::Get => match name.split_once('-') {
            Some((_, suffix)) => suffix.to_owned(),
            None => name,
        },
        Mode::Post => name,
    };

    let mut descriptor = Descriptor::new(name);
    for (key, value) in arguments {
        descriptor.insert_argument(key, value);
    }
    descriptor.address = address;

    debug!("translated descriptor: {descriptor:?}");

    Ok(descriptor)
}

/// Splits an operation clause into its name and argument pairs.
///
/// Accepted shapes are `name`, `name()` and `name(k1=v1,k2=v2)`. Argument
/// values are everything after the first `=` of a pair, so values may
/// themselves contain `=`.
fn parse_operation(clause: &str) -> TranslateResult<(String, Vec<(String, String)>)> {
    let mut arguments = Vec::new();

    let Some((name, rest)) = clause.split_once('(') else {
        return Ok((clause.to_owned(), arguments));
    };

    // Argument list is the text strictly between the first opening
    // parenthesis and the last closing one.
    let arglist = match rest.rfind(')') {
        Some(offset) => &rest[..offset],
        None => rest,
    };

    if !arglist.is_empty() {
        for pair in arglist.split(',') {
            match pair.split_once('=') {
                Some((key, value)) => {
                    arguments.push((key.to_owned(), value.to_owned()));
                }
                None => {
                    return Err(TranslateError::MalformedArgumentSyntax(pair.to_owned()));
                }
            }
        }
    }

    Ok((name.to_owned(), arguments))
}

/// Reshapes a resource path clause for the HTTP verb in use.
///
/// `/subsystem=undertow/server=default-server` becomes the URL path
/// `/subsystem/undertow/server/default-server` under GET and the segment
/// list `["subsystem", "undertow", "server", "default-server"]` under POST.
fn parse_path(clause: &str, mode: Mode) -> Address {
    match mode {
        Mode::Get => Address::Path(clause.replace('=', "/")),
        Mode::Post => Address::Segments(
            clause
                .split(['/', '='])
                .filter(|segment| !segment.is_empty())
                .map(str::to_owned)
                .collect(),
        ),
    }
}
