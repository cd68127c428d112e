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

//! Delivery of signed messages.
//!
//! The [`Transport`] trait abstracts over the mail submission step, so that
//! the sending pipeline can be exercised without a network. [`SmtpTransport`]
//! submits messages to an SMTP server in plain text (no STARTTLS, no
//! authentication), one connection per message.

use lettre::{
    address::Envelope, message::Mailbox, AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    future::Future,
    pin::Pin,
    str::FromStr,
    time::Duration,
};
use tracing::{debug, trace};

/// Submitter of a message to a mail server.
pub trait Transport: Send + Sync {
    /// The future resolving to the outcome of a delivery.
    type Delivery<'a>: Future<Output = Result<(), TransportError>> + Send + 'a
    where
        Self: 'a;

    /// Delivers the message in wire format from the sender to the
    /// recipients.
    ///
    /// Addresses may be plain (`me@example.com`) or include a display name
    /// (`Me <me@example.com>`).
    fn deliver<'a>(
        &'a self,
        sender: &'a str,
        recipients: &'a [String],
        message: &'a [u8],
    ) -> Self::Delivery<'a>;
}

/// An error that occurs during delivery.
#[derive(Debug)]
pub enum TransportError {
    InvalidAddress(String),
    NoRecipients,
    Smtp(lettre::transport::smtp::Error),
    Other(Box<dyn Error + Send + Sync>),
}

impl Display for TransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAddress(addr) => write!(f, "invalid address \"{addr}\""),
            Self::NoRecipients => write!(f, "no recipients"),
            Self::Smtp(_) => write!(f, "SMTP submission failed"),
            Self::Other(_) => write!(f, "delivery failed"),
        }
    }
}

impl Error for TransportError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidAddress(_) | Self::NoRecipients => None,
            Self::Smtp(e) => Some(e),
            Self::Other(e) => Some(e.as_ref()),
        }
    }
}

impl From<lettre::transport::smtp::Error> for TransportError {
    fn from(error: lettre::transport::smtp::Error) -> Self {
        Self::Smtp(error)
    }
}

/// An error that occurs when parsing a [`ServerAddress`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ParseServerAddressError;

impl Display for ParseServerAddressError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "expected server address of the form host:port")
    }
}

impl Error for ParseServerAddressError {}

/// The host and port of a mail server.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ServerAddress {
    host: String,
    port: u16,
}

impl ServerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for ServerAddress {
    type Err = ParseServerAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s.rsplit_once(':').ok_or(ParseServerAddressError)?;

        // IPv6 literals are written in brackets, as in `[::1]:25`
        let host = match host.strip_prefix('[') {
            Some(h) => h.strip_suffix(']').ok_or(ParseServerAddressError)?,
            None if host.contains(':') => return Err(ParseServerAddressError),
            None => host,
        };

        if host.is_empty() {
            return Err(ParseServerAddressError);
        }

        let port = port.parse().map_err(|_| ParseServerAddressError)?;

        Ok(Self::new(host, port))
    }
}

impl Display for ServerAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// A transport submitting messages over plain-text SMTP.
pub struct SmtpTransport {
    server: ServerAddress,
    inner: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpTransport {
    pub fn new(server: ServerAddress, timeout: Option<Duration>) -> Self {
        let inner = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(server.host())
            .port(server.port())
            .timeout(timeout)
            .build();

        Self { server, inner }
    }

    pub fn server(&self) -> &ServerAddress {
        &self.server
    }
}

impl Transport for SmtpTransport {
    type Delivery<'a> = Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>>;

    fn deliver<'a>(
        &'a self,
        sender: &'a str,
        recipients: &'a [String],
        message: &'a [u8],
    ) -> Self::Delivery<'a> {
        Box::pin(async move {
            let envelope = make_envelope(sender, recipients)?;

            trace!(server = %self.server, "submitting message");

            let response = self.inner.send_raw(&envelope, message).await?;

            debug!(server = %self.server, code = %response.code(), "message accepted");

            Ok(())
        })
    }
}

fn make_envelope(sender: &str, recipients: &[String]) -> Result<Envelope, TransportError> {
    let from = parse_address(sender)?;
    let to = recipients
        .iter()
        .map(|r| parse_address(r))
        .collect::<Result<Vec<_>, _>>()?;

    Envelope::new(Some(from), to).map_err(|_| TransportError::NoRecipients)
}

fn parse_address(s: &str) -> Result<lettre::Address, TransportError> {
    s.parse::<Mailbox>()
        .map(|mailbox| mailbox.email)
        .map_err(|_| TransportError::InvalidAddress(s.into()))
}
