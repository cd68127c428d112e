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

//! The sending pipeline: load key, build message, sign, deliver.

use crate::{
    config::Config,
    key_store::{self, KeyStoreError},
    message::{self, MessageError, SignedMessage},
    signer::{self, SignRequest, SignerError, Timestamp},
    transport::{Transport, TransportError},
};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    slice,
};
use tracing::{debug, info};

/// An error that occurs when sending a message.
///
/// Nothing has been delivered when this error is returned.
#[derive(Debug)]
pub enum SendError {
    KeyStore(KeyStoreError),
    Message(MessageError),
    Signing(SignerError),
    Transport(TransportError),
}

impl Display for SendError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyStore(_) => write!(f, "--signkey"),
            Self::Message(_) => write!(f, "building message"),
            Self::Signing(_) => write!(f, "signing message"),
            Self::Transport(_) => write!(f, "sending mail"),
        }
    }
}

impl Error for SendError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::KeyStore(e) => Some(e),
            Self::Message(e) => Some(e),
            Self::Signing(e) => Some(e),
            Self::Transport(e) => Some(e),
        }
    }
}

impl From<KeyStoreError> for SendError {
    fn from(error: KeyStoreError) -> Self {
        Self::KeyStore(error)
    }
}

impl From<MessageError> for SendError {
    fn from(error: MessageError) -> Self {
        Self::Message(error)
    }
}

impl From<SignerError> for SendError {
    fn from(error: SignerError) -> Self {
        Self::Signing(error)
    }
}

impl From<TransportError> for SendError {
    fn from(error: TransportError) -> Self {
        Self::Transport(error)
    }
}

/// Loads the signing key, then builds, signs and delivers the configured
/// message.
///
/// Returns the signed message as it was handed to the transport.
pub async fn send<T: Transport>(config: &Config, transport: &T) -> Result<SignedMessage, SendError> {
    let key_type = config.algorithm.key_type();
    let signing_key = key_store::load_accepting(&config.key_path, &[key_type]).await?;

    let message = message::build(&config.from, &config.to, &config.subject, &config.body)?;

    let mut request = SignRequest::new(
        config.domain.clone(),
        config.selector.clone(),
        config.algorithm,
        signing_key,
    );
    request.canonicalization = config.canonicalization;
    request.header_selection = config.header_selection.clone();
    if config.timestamp {
        request.timestamp = Some(Timestamp::Now);
    }
    request.valid_duration = config.expiration;

    let signed = signer::sign(message, request)?;

    debug!(signed_headers = ?signed.signature().signed_headers, "signed message");

    transport
        .deliver(&config.from, slice::from_ref(&config.to), &signed.to_bytes())
        .await?;

    info!(to = %config.to, server = %config.server, "message delivered");

    Ok(signed)
}

/// Formats an error and its chain of sources on one line.
pub fn format_error_chain(error: &dyn Error) -> String {
    let mut result = error.to_string();
    let mut source = error.source();
    while let Some(e) = source {
        result.push_str(": ");
        result.push_str(&e.to_string());
        // lettre's SMTP errors print their own cause
        if e.is::<lettre::transport::smtp::Error>() {
            break;
        }
        source = e.source();
    }
    result
}
