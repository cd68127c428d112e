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

//! Signer and supporting types.
//!
//! Signing is a pure computation: given header fields, body and a
//! [`SignRequest`], the same *DKIM-Signature* header is produced every time
//! (unless a timestamp is requested or a randomised algorithm is used). The
//! signing key is only borrowed, so one key can serve many signers
//! concurrently.

mod format;
mod request;
mod sign;

pub use crate::signer::{
    format::LINE_WIDTH,
    request::{
        default_signed_headers, select_headers, BodyLength, HeaderSelection, OutputFormat,
        SignRequest, Timestamp,
    },
};

use crate::{
    crypto::SigningKey,
    header::{FieldName, HeaderFields},
    message::{SignedMessage, UnsignedMessage},
    message_hash::{BodyHasher, BodyHasherStance},
    signature::DkimSignature,
};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
};
use tracing::trace;

/// The broad category of a [`SignerError`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SignerErrorKind {
    /// The message or request cannot be signed as asked.
    Signing,
    /// The key cannot produce the requested signature.
    Crypto,
}

/// An error that occurs when using a [`Signer`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SignerError {
    /// A header listed for signing has no (remaining) occurrence in the
    /// message.
    MissingSignedHeader(FieldName),
    /// The *From* header is not among the signed headers.
    FromHeaderNotSigned,
    /// A header name to sign contains a semicolon.
    InvalidSignedFieldName,
    /// The domain of the *i=* identity is not the signing domain or one of
    /// its subdomains.
    DomainMismatch,
    /// The canonicalized body is shorter than the requested body length.
    InsufficientBodyLength,
    /// Conversion from or to a requested integer data type cannot be supported
    /// on the current platform.
    Overflow,
    ZeroExpirationDuration,
    InvalidOutputFormat,
    /// The signing key does not match the requested signature algorithm.
    KeyTypeMismatch,
    /// The signing key is too small.
    InsufficientKeySize,
    SigningFailure,
}

impl SignerError {
    pub fn kind(&self) -> SignerErrorKind {
        match self {
            Self::MissingSignedHeader(_)
            | Self::FromHeaderNotSigned
            | Self::InvalidSignedFieldName
            | Self::DomainMismatch
            | Self::InsufficientBodyLength
            | Self::Overflow
            | Self::ZeroExpirationDuration
            | Self::InvalidOutputFormat => SignerErrorKind::Signing,
            Self::KeyTypeMismatch | Self::InsufficientKeySize | Self::SigningFailure => {
                SignerErrorKind::Crypto
            }
        }
    }
}

impl Display for SignerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingSignedHeader(name) => {
                write!(f, "header {name} selected for signing is missing from message")
            }
            Self::FromHeaderNotSigned => write!(f, "From header not signed"),
            Self::InvalidSignedFieldName => write!(f, "invalid header name selected for signing"),
            Self::DomainMismatch => write!(f, "identity domain does not match signing domain"),
            Self::InsufficientBodyLength => write!(f, "message body shorter than body length"),
            Self::Overflow => write!(f, "integer too large"),
            Self::ZeroExpirationDuration => write!(f, "zero expiration duration"),
            Self::InvalidOutputFormat => write!(f, "invalid output format"),
            Self::KeyTypeMismatch => write!(f, "signing key does not match signature algorithm"),
            Self::InsufficientKeySize => write!(f, "signing key too small"),
            Self::SigningFailure => write!(f, "failed to compute signature"),
        }
    }
}

impl Error for SignerError {}

/// The result of a successful signing process.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SigningResult {
    pub signature: DkimSignature,
    /// The header name, to be concatenated with the header value with only an
    /// intervening colon. No whitespace may be added, *simple* header
    /// canonicalization depends on it.
    pub header_name: String,
    /// The formatted header value, beginning with a space and folded with
    /// CRLF line breaks.
    pub header_value: String,
}

impl SigningResult {
    /// Returns the complete header field, without trailing CRLF.
    pub fn format_header(&self) -> String {
        format!("{}:{}", self.header_name, self.header_value)
    }
}

/// A signer for an email message.
///
/// The signer is prepared with the message header, then fed the body in
/// chunks, and finally produces the signature.
pub struct Signer<T> {
    request: SignRequest<T>,
    headers: HeaderFields,
    body_hasher: BodyHasher,
}

impl<T> Signer<T>
where
    T: AsRef<SigningKey>,
{
    /// Prepares a message signing process.
    pub fn prepare_signing(
        request: SignRequest<T>,
        headers: HeaderFields,
    ) -> Result<Self, SignerError> {
        request::validate_request(&request)?;

        let body_length = request.body_length.to_usize().map_err(|_| SignerError::Overflow)?;
        let hash_alg = request.algorithm.hash_algorithm();
        let canon_alg = request.canonicalization.body;

        trace!(
            canonicalization = %request.canonicalization,
            ?body_length,
            "prepared signer"
        );

        Ok(Self {
            request,
            headers,
            body_hasher: BodyHasher::new(body_length, hash_alg, canon_alg),
        })
    }

    /// Processes a chunk of the message body.
    ///
    /// The chunk is canonicalized and hashed, but not otherwise retained in
    /// memory. Once `Done` is returned, remaining body content may be
    /// skipped.
    pub fn body_chunk(&mut self, chunk: &[u8]) -> BodyHasherStance {
        self.body_hasher.hash_chunk(chunk)
    }

    /// Finishes the signing process, producing the signature.
    pub fn finish(self) -> Result<SigningResult, SignerError> {
        let body_hash_result = self.body_hasher.finish();

        sign::perform_signing(&self.request, &self.headers, body_hash_result)
    }
}

/// Signs a message in one go, prepending the *DKIM-Signature* header.
pub fn sign<T>(
    message: UnsignedMessage,
    request: SignRequest<T>,
) -> Result<SignedMessage, SignerError>
where
    T: AsRef<SigningKey>,
{
    let mut signer = Signer::prepare_signing(request, message.headers().clone())?;

    let _ = signer.body_chunk(message.body());

    let result = signer.finish()?;

    Ok(SignedMessage::new(result, message))
}
