// dkimsend – DKIM signing and submission of email messages
// Copyright © 2022–2023 David Bürgin <dbuergin@gluet.ch>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later
// version.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.

//! Command-line configuration.
//!
//! [`Args`] is the raw command line as parsed by clap, every flag with an
//! environment variable fallback. Converting it into [`Config`] checks that
//! all mandatory flags are present and parses each value into its type.

use crate::{
    header::FieldName,
    signature::{Canonicalization, DomainName, Selector, SignatureAlgorithm},
    signer::HeaderSelection,
    transport::ServerAddress,
};
use clap::Parser;
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

/// Signs an email message with DKIM and sends it over SMTP.
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Args {
    /// DKIM selector
    #[arg(long, env = "DKIM_SELECTOR", default_value = "default")]
    pub signselect: String,

    /// DKIM signing domain
    #[arg(long, env = "DKIM_DOMAIN")]
    pub signdomain: Option<String>,

    /// Private key file to use for DKIM signing (PKCS#8 PEM)
    #[arg(long, env = "DKIM_KEY")]
    pub signkey: Option<PathBuf>,

    /// SMTP server to send the message to, as host:port
    #[arg(long, env = "SMTP_HOST")]
    pub host: Option<String>,

    /// Recipient address
    #[arg(long, env = "SMTP_TO")]
    pub to: Option<String>,

    /// Sender address
    #[arg(long, env = "SMTP_FROM")]
    pub from: Option<String>,

    /// Subject of the message
    #[arg(long, env = "SMTP_SUBJECT", default_value = "Ping, now please pong")]
    pub subject: String,

    /// Message text to send
    #[arg(long, env = "SMTP_MSG", default_value = "こんにちは、世界！")]
    pub msg: String,

    /// Signature algorithm, rsa-sha256 or ed25519-sha256
    #[arg(long, env = "DKIM_ALGORITHM", default_value = "rsa-sha256")]
    pub algorithm: String,

    /// Header and body canonicalization, as in the c= tag
    #[arg(long, env = "DKIM_CANONICALIZATION", default_value = "relaxed/relaxed")]
    pub canonicalization: String,

    /// Comma-separated header names to sign; a default set if not given
    #[arg(long, env = "DKIM_SIGN_HEADERS", value_delimiter = ',')]
    pub sign_headers: Vec<String>,

    /// Record the signing time in the t= tag
    #[arg(long, env = "DKIM_TIMESTAMP")]
    pub timestamp: bool,

    /// Seconds after signing when the signature expires (x= tag)
    #[arg(long, env = "DKIM_EXPIRATION_SECS")]
    pub expiration_secs: Option<u64>,

    /// SMTP connection timeout in seconds
    #[arg(long, env = "SMTP_TIMEOUT_SECS", default_value_t = 30)]
    pub timeout_secs: u64,
}

/// An error that occurs when validating the command line.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    MissingFlag(&'static str),
    InvalidValue { flag: &'static str, value: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingFlag(flag) => write!(f, "--{flag} not set"),
            Self::InvalidValue { flag, value } => {
                write!(f, "--{flag}: invalid value \"{value}\"")
            }
        }
    }
}

impl Error for ConfigError {}

/// The validated configuration of a send operation.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub selector: Selector,
    pub domain: DomainName,
    pub key_path: PathBuf,
    pub server: ServerAddress,
    pub to: String,
    pub from: String,
    pub subject: String,
    pub body: String,
    pub algorithm: SignatureAlgorithm,
    pub canonicalization: Canonicalization,
    pub header_selection: HeaderSelection,
    pub timestamp: bool,
    pub expiration: Option<Duration>,
    pub timeout: Duration,
}

impl TryFrom<Args> for Config {
    type Error = ConfigError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        // checked in the order of the flags on the command line
        let selector = required("signselect", Some(args.signselect))?;
        let domain = required("signdomain", args.signdomain)?;
        let host = required("host", args.host)?;
        let to = required("to", args.to)?;
        let from = required("from", args.from)?;
        let key_path = args
            .signkey
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or(ConfigError::MissingFlag("signkey"))?;

        let header_selection = if args.sign_headers.is_empty() {
            HeaderSelection::Auto
        } else {
            let names = args
                .sign_headers
                .iter()
                .map(|name| parse_value("sign-headers", name.trim()))
                .collect::<Result<Vec<FieldName>, _>>()?;
            HeaderSelection::Manual(names)
        };

        let expiration = match args.expiration_secs {
            Some(0) => {
                return Err(ConfigError::InvalidValue {
                    flag: "expiration-secs",
                    value: "0".into(),
                });
            }
            secs => secs.map(Duration::from_secs),
        };

        Ok(Self {
            selector: parse_value("signselect", &selector)?,
            domain: parse_value("signdomain", &domain)?,
            key_path,
            server: parse_value("host", &host)?,
            to,
            from,
            subject: args.subject,
            body: args.msg,
            algorithm: parse_value("algorithm", &args.algorithm)?,
            canonicalization: parse_value("canonicalization", &args.canonicalization)?,
            header_selection,
            timestamp: args.timestamp,
            expiration,
            timeout: Duration::from_secs(args.timeout_secs),
        })
    }
}

fn required(flag: &'static str, value: Option<String>) -> Result<String, ConfigError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::MissingFlag(flag))
}

fn parse_value<T: FromStr>(flag: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        flag,
        value: value.into(),
    })
}
