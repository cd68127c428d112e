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

//! Computation of the message hashes.

use crate::{
    canonicalize::{self, BodyCanonicalizer},
    crypto::{self, CountingHasher, HashAlgorithm, HashStatus, InsufficientInput},
    header::{FieldName, HeaderFields},
    signature::{CanonicalizationAlgorithm, DKIM_SIGNATURE_NAME},
};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
};

/// Computes the hash of the signing input: the canonicalized selected header
/// fields followed by the canonicalized DKIM-Signature header field with
/// empty *b=* tag, without trailing CRLF.
pub fn compute_data_hash(
    hash_alg: HashAlgorithm,
    canon_alg: CanonicalizationAlgorithm,
    headers: &HeaderFields,
    selected_headers: &[FieldName],
    dkim_sig_header_name: &str,
    formatted_dkim_sig_header_value: &str,
) -> Box<[u8]> {
    debug_assert!(dkim_sig_header_name.eq_ignore_ascii_case(DKIM_SIGNATURE_NAME));

    let signing_input = compute_signing_input(
        canon_alg,
        headers,
        selected_headers,
        dkim_sig_header_name,
        formatted_dkim_sig_header_value,
    );

    crypto::digest(hash_alg, &signing_input)
}

/// Produces the exact byte sequence whose hash is signed.
pub fn compute_signing_input(
    canon_alg: CanonicalizationAlgorithm,
    headers: &HeaderFields,
    selected_headers: &[FieldName],
    dkim_sig_header_name: &str,
    formatted_dkim_sig_header_value: &str,
) -> Vec<u8> {
    let mut cheaders = canonicalize::canonicalize_headers(canon_alg, headers, selected_headers);

    canonicalize::canonicalize_header_into(
        &mut cheaders,
        canon_alg,
        dkim_sig_header_name,
        formatted_dkim_sig_header_value,
    );

    cheaders
}

/// The stance of a body hasher regarding additional body content.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[must_use]
pub enum BodyHasherStance {
    /// The client should feed more input to the body hasher, if there is any.
    Interested,

    /// The body hasher requires no further input, and the client need not
    /// feed any remaining body content.
    Done,
}

/// A producer of a *body hash*.
///
/// The body hasher canonicalizes and hashes chunks of the message body, up to
/// an optional limit on the number of canonicalized bytes.
pub struct BodyHasher {
    canonicalizer: BodyCanonicalizer,
    hasher: CountingHasher,
}

impl BodyHasher {
    pub fn new(
        length: Option<usize>,
        hash_alg: HashAlgorithm,
        canon_alg: CanonicalizationAlgorithm,
    ) -> Self {
        Self {
            canonicalizer: BodyCanonicalizer::new(canon_alg),
            hasher: CountingHasher::new(hash_alg, length),
        }
    }

    pub fn hash_chunk(&mut self, chunk: &[u8]) -> BodyHasherStance {
        if self.hasher.is_done() {
            return BodyHasherStance::Done;
        }

        let canonicalized_chunk = self.canonicalizer.canonicalize_chunk(chunk);

        match self.hasher.update(&canonicalized_chunk) {
            HashStatus::AllConsumed if !self.hasher.is_done() => BodyHasherStance::Interested,
            HashStatus::AllConsumed | HashStatus::Truncated => BodyHasherStance::Done,
        }
    }

    /// Finishes hashing, returning the body hash and the number of
    /// canonicalized bytes hashed.
    pub fn finish(mut self) -> Result<(Box<[u8]>, usize), BodyHashError> {
        if !self.hasher.is_done() {
            let canonicalized_chunk = self.canonicalizer.finish();
            let _ = self.hasher.update(&canonicalized_chunk);
        }

        self.hasher
            .finish()
            .map_err(|InsufficientInput| BodyHashError::InsufficientInput)
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BodyHashError {
    InsufficientInput,
}

impl Display for BodyHashError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientInput => write!(f, "insufficient input data"),
        }
    }
}

impl Error for BodyHashError {}
