// Copyright © 2024 The JBoss Remote Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! Run a JBoss/WildFly management CLI command against a remote server over
//! its HTTP management API.
//!
//! The expression is translated into a request descriptor, shaped into an
//! HTTP GET or POST depending on the operation, executed with digest
//! authentication, and the normalized JSON result is printed on stdout.

use std::fmt;
use std::process;

use api_client::{ApiClient, Credentials};
use clap::{Arg, ArgAction, ArgMatches, Command};
use command_parser::Mode;
use log::debug;

/// Operations the management interface also exposes as HTTP GET requests.
/// Everything else only supports POST.
///
/// read-operation-description is deliberately absent: the GET naming scheme
/// strips the leading word of the operation, which would map it onto
/// operation-description, a name the interface does not serve.
const GET_OPERATIONS: [&str; 5] = [
    "read-attribute",
    "read-resource",
    "read-resource-description",
    "list-snapshots",
    "read-operation-names",
];

#[derive(Debug)]
enum Error {
    Translate(command_parser::TranslateError),
    ApiClient(api_client::Error),
    UnsupportedScheme(String),
    IncompleteCredentials,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Error::*;
        match self {
            Translate(e) => e.fmt(f),
            ApiClient(e) => e.fmt(f),
            UnsupportedScheme(url) => write!(
                f,
                "unsupported URL scheme in {url}, only plain http:// is supported"
            ),
            IncompleteCredentials => write!(
                f,
                "both a username and a password are required when either is given"
            ),
        }
    }
}

/// Picks the HTTP verb for an expression by allowlist membership. All
/// operations support POST; the read-only ones in [`GET_OPERATIONS`] are
/// promoted to GET.
fn request_mode(expression: &str) -> Mode {
    if GET_OPERATIONS
        .iter()
        .any(|operation| expression.contains(operation))
    {
        Mode::Get
    } else {
        Mode::Post
    }
}

/// Extracts the host from the configured management URL. The client speaks
/// plain HTTP over TCP, so only the http scheme (or a bare host) is
/// accepted.
fn host_from_url(url: &str) -> Result<String, Error> {
    if let Some(host) = url.strip_prefix("http://") {
        Ok(host.trim_end_matches('/').to_owned())
    } else if url.contains("://") {
        Err(Error::UnsupportedScheme(url.to_owned()))
    } else {
        Ok(url.trim_end_matches('/').to_owned())
    }
}

fn credentials(matches: &ArgMatches) -> Result<Option<Credentials>, Error> {
    let username = matches
        .get_one::<String>("user")
        .cloned()
        .or_else(|| std::env::var("JBOSS_API_USER").ok());
    let password = matches
        .get_one::<String>("password")
        .cloned()
        .or_else(|| std::env::var("JBOSS_API_PASSWORD").ok());

    match (username, password) {
        (Some(username), Some(password)) => Ok(Some(Credentials { username, password })),
        (None, None) => Ok(None),
        _ => Err(Error::IncompleteCredentials),
    }
}

fn run(cmd_arguments: &ArgMatches) -> Result<(), Error> {
    // These .unwrap()s cannot fail as the arguments are required or have a
    // default value defined
    let expression = cmd_arguments.get_one::<String>("command").unwrap();
    let url = cmd_arguments.get_one::<String>("url").unwrap();
    let port = *cmd_arguments.get_one::<u16>("port").unwrap();

    let host = host_from_url(url)?;
    let credentials = credentials(cmd_arguments)?;

    let mode = request_mode(expression);
    debug!("running ({expression}) as HTTP {mode:?}");

    let descriptor = command_parser::translate(expression, mode).map_err(Error::Translate)?;
    let request = api_client::api_request(descriptor, mode);

    let client = ApiClient::new(&host, port, credentials);
    let result = client.execute(&request).map_err(Error::ApiClient)?;

    if cmd_arguments.get_flag("pretty") {
        println!("{result:#}");
    } else {
        println!("{result}");
    }

    Ok(())
}

fn main() {
    env_logger::init();

    let cmd_arguments = Command::new("jboss-remote")
        .version(env!("CARGO_PKG_VERSION"))
        .author(env!("CARGO_PKG_AUTHORS"))
        .about("Run a JBoss/WildFly management CLI command over the HTTP management API.")
        .arg_required_else_help(true)
        .arg(
            Arg::new("command")
                .help("Management CLI command, e.g. \"/subsystem=undertow:read-resource\"")
                .num_args(1)
                .required(true),
        )
        .arg(
            Arg::new("url")
                .long("url")
                .help("Management server URL")
                .num_args(1)
                .default_value("http://localhost"),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .help("Management server port")
                .num_args(1)
                .value_parser(clap::value_parser!(u16))
                .default_value("9990"),
        )
        .arg(
            Arg::new("user")
                .long("user")
                .help("Management user, falls back to $JBOSS_API_USER")
                .num_args(1),
        )
        .arg(
            Arg::new("password")
                .long("password")
                .help("Management user password, falls back to $JBOSS_API_PASSWORD")
                .num_args(1),
        )
        .arg(
            Arg::new("pretty")
                .long("pretty")
                .help("Pretty-print the JSON result")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    if let Err(e) = run(&cmd_arguments) {
        eprintln!("Error running command: {e}");
        process::exit(1);
    }
}
