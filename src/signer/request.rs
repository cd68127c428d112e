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

use crate::{
    crypto::{SigningKey, MIN_RSA_KEY_BITS},
    header::{FieldName, HeaderFields},
    signature::{
        Canonicalization, DomainName, Identity, Selector, SignatureAlgorithm, DKIM_SIGNATURE_NAME,
    },
    signer::{format::LINE_WIDTH, SignerError},
};
use std::{num::TryFromIntError, time::Duration};

/// A generator for the body length limit tag.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum BodyLength {
    /// Do not limit the body length: no *l=* tag.
    #[default]
    NoLimit,
    /// Sign only the body as presented: set *l=* to the actual body length.
    MessageContent,
    /// Sign exactly the specified number of bytes of canonicalized body
    /// content: set *l=* to the given value.
    Exact(u64),
}

impl BodyLength {
    /// Returns the length limit to apply when hashing the body.
    pub fn to_usize(self) -> Result<Option<usize>, TryFromIntError> {
        match self {
            Self::NoLimit | Self::MessageContent => Ok(None),
            Self::Exact(n) => n.try_into().map(Some),
        }
    }
}

/// A generator for the timestamp tag.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum Timestamp {
    #[default]
    Now,
    Exact(u64),
}

/// Selects all headers matching the predicate, in reverse (evaluation order).
pub fn select_headers<'a, 'b: 'a>(
    headers: &'a HeaderFields,
    mut pred: impl FnMut(&FieldName) -> bool + 'b,
) -> impl DoubleEndedIterator<Item = &'a FieldName> + 'a {
    headers
        .as_ref()
        .iter()
        .rev()
        .filter_map(move |(name, _)| if pred(name) { Some(name) } else { None })
}

/// Selection of headers to include in the *h=* tag.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum HeaderSelection {
    /// Select all occurrences of the headers in the default set present in the
    /// message, bottom-up.
    #[default]
    Auto,
    /// Use exactly the headers given here as contents of the *h=* tag. Every
    /// entry must be matched by a distinct occurrence in the message.
    Manual(Vec<FieldName>),
}

/// Returns a collection of headers that should be signed.
///
/// RFC 6376 does not actually recommend a specific set of headers to be signed.
/// Instead, the collection returned here contains the so-called ‘examples’ from
/// section 5.4.1.
pub fn default_signed_headers() -> Vec<FieldName> {
    // This set is the same as in OpenDKIM (minus *Resent-Sender*).
    let names = [
        "From",
        "Reply-To",
        "Subject",
        "Date",
        "To",
        "Cc",
        "Resent-Date",
        "Resent-From",
        "Resent-To",
        "Resent-Cc",
        "In-Reply-To",
        "References",
        "List-Id",
        "List-Help",
        "List-Unsubscribe",
        "List-Subscribe",
        "List-Post",
        "List-Owner",
        "List-Archive",
    ];

    names
        .into_iter()
        .filter_map(|n| FieldName::new(n).ok())
        .collect()
}

/// Formatting options.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OutputFormat {
    /// The header name, must be equal to `DKIM-Signature` ignoring case.
    pub header_name: String,
    /// The maximum line width in characters to use when breaking lines. The
    /// default is 78.
    pub line_width: usize,
    /// The indentation whitespace to use for continuation lines. Must be a
    /// non-empty sequence of space and tab characters. The default is `"\t"`.
    pub indentation: String,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self {
            header_name: DKIM_SIGNATURE_NAME.into(),
            line_width: LINE_WIDTH,
            indentation: "\t".into(),
        }
    }
}

/// A request for creation of a DKIM signature.
#[derive(Clone, Debug)]
pub struct SignRequest<T> {
    /// The key to use for producing the cryptographic signature.
    pub signing_key: T,

    /// The signature algorithm to use in the *a=* tag. Must be compatible with
    /// the signing key.
    pub algorithm: SignatureAlgorithm,
    /// The canonicalization to use in the *c=* tag.
    pub canonicalization: Canonicalization,
    /// The selection of headers to include in the *h=* tag.
    pub header_selection: HeaderSelection,
    /// The signing domain to use in the *d=* tag.
    pub domain: DomainName,
    /// The agent or user identifier to use in the *i=* tag.
    pub identity: Option<Identity>,
    /// The selector to use in the *s=* tag.
    pub selector: Selector,
    /// The strategy to use for generating the *l=* tag.
    pub body_length: BodyLength,
    /// The timestamp value to record in the *t=* tag. Without a timestamp,
    /// signing the same message twice gives the same signature for
    /// deterministic algorithms.
    pub timestamp: Option<Timestamp>,
    /// The duration for which the signature will remain valid (*x=* tag).
    pub valid_duration: Option<Duration>,

    /// The formatting options to use for producing the formatted
    /// *DKIM-Signature* header.
    pub format: OutputFormat,
}

impl<T> SignRequest<T> {
    pub fn new(
        domain: DomainName,
        selector: Selector,
        algorithm: SignatureAlgorithm,
        signing_key: T,
    ) -> Self {
        Self {
            signing_key,

            algorithm,
            canonicalization: Default::default(),
            header_selection: HeaderSelection::Auto,
            domain,
            identity: None,
            selector,
            body_length: BodyLength::NoLimit,
            timestamp: None,
            valid_duration: None,

            format: Default::default(),
        }
    }
}

/// Checks a request for problems that can be detected before looking at the
/// message.
pub fn validate_request<T: AsRef<SigningKey>>(request: &SignRequest<T>) -> Result<(), SignerError> {
    let signing_key = request.signing_key.as_ref();

    if signing_key.key_type() != request.algorithm.key_type() {
        return Err(SignerError::KeyTypeMismatch);
    }

    if let Some(bits) = signing_key.key_size() {
        if bits < MIN_RSA_KEY_BITS {
            return Err(SignerError::InsufficientKeySize);
        }
    }

    if let HeaderSelection::Manual(names) = &request.header_selection {
        if !names.iter().any(|name| *name == "From") {
            return Err(SignerError::FromHeaderNotSigned);
        }
        if names.iter().any(|name| name.as_ref().contains(';')) {
            return Err(SignerError::InvalidSignedFieldName);
        }
    }

    if let Some(identity) = &request.identity {
        if !identity.domain_part.eq_or_subdomain_of(&request.domain) {
            return Err(SignerError::DomainMismatch);
        }
    }

    if let Some(duration) = request.valid_duration {
        if duration.as_secs() == 0 {
            return Err(SignerError::ZeroExpirationDuration);
        }
    }

    if request.body_length.to_usize().is_err() {
        return Err(SignerError::Overflow);
    }

    let format = &request.format;
    if !format.header_name.eq_ignore_ascii_case(DKIM_SIGNATURE_NAME)
        || format.line_width == 0
        || format.indentation.is_empty()
        || !format.indentation.chars().all(|c| matches!(c, ' ' | '\t'))
    {
        return Err(SignerError::InvalidOutputFormat);
    }

    Ok(())
}
