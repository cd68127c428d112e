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

//! Miscellaneous utilities.

use base64ct::{Base64, Encoding};
use std::str;

/// A trait for entities that have a canonical string representation in DKIM.
pub trait CanonicalStr {
    /// Returns the canonical representation as a static string slice.
    fn canonical_str(&self) -> &'static str;
}

/// Encodes binary data as a Base64 string.
pub fn encode_base64(input: impl AsRef<[u8]>) -> String {
    Base64::encode_string(input.as_ref())
}

/// Returns the longest prefix of `bytes` that is well-formed UTF-8, or `None`
/// if `bytes` starts with an ill-formed sequence.
pub fn next_utf8_chunk(bytes: &[u8]) -> Option<&str> {
    match str::from_utf8(bytes) {
        Ok(s) => Some(s),
        Err(e) => {
            let valid_up_to = e.valid_up_to();
            if valid_up_to == 0 {
                None
            } else {
                str::from_utf8(&bytes[..valid_up_to]).ok()
            }
        }
    }
}
