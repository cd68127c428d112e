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

use crate::crypto::HashAlgorithm;
use digest::{Digest, DynDigest};
use sha2::Sha256;

/// Computes the digest of the given input in one go.
pub fn digest(hash_alg: HashAlgorithm, bytes: &[u8]) -> Box<[u8]> {
    match hash_alg {
        HashAlgorithm::Sha256 => Box::from(&Sha256::digest(bytes)[..]),
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct InsufficientInput;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HashStatus {
    AllConsumed,  // input was digested entirely
    Truncated,  // input was only partially digested, part of it was ignored
}

/// A hasher that stops digesting input once an optional length limit has
/// been reached.
pub struct CountingHasher {
    digest: Box<dyn DynDigest + Send>,
    length: Option<usize>,
    bytes_written: usize,
}

impl CountingHasher {
    pub fn new(hash_alg: HashAlgorithm, length: Option<usize>) -> Self {
        let digest: Box<dyn DynDigest + Send> = match hash_alg {
            HashAlgorithm::Sha256 => Box::new(Sha256::default()),
        };

        Self {
            length,
            digest,
            bytes_written: 0,
        }
    }

    pub fn update(&mut self, bytes: &[u8]) -> HashStatus {
        match self.length {
            Some(len) => {
                let bytes_left_to_write = len - self.bytes_written;

                if bytes_left_to_write >= bytes.len() {
                    self.digest.update(bytes);
                    self.bytes_written += bytes.len();
                    HashStatus::AllConsumed
                } else {
                    let partial_bytes = &bytes[..bytes_left_to_write];
                    self.digest.update(partial_bytes);
                    self.bytes_written += partial_bytes.len();
                    HashStatus::Truncated
                }
            }
            None => {
                self.digest.update(bytes);
                self.bytes_written += bytes.len();
                HashStatus::AllConsumed
            }
        }
    }

    /// Finalises the digest, returning it together with the number of bytes
    /// that went into it.
    pub fn finish(self) -> Result<(Box<[u8]>, usize), InsufficientInput> {
        if self.length.is_some() && !self.is_done() {
            return Err(InsufficientInput);
        }

        let bytes = self.digest.finalize();

        Ok((bytes, self.bytes_written))
    }

    pub fn is_done(&self) -> bool {
        matches!(self.length, Some(len) if len == self.bytes_written)
    }
}
