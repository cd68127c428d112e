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

//! DKIM-Quoted-Printable encoding.
//!
//! See RFC 6376, section 2.11. Only encoding is needed for signing.

use crate::util;
use std::fmt::Write;

/// Encodes bytes as a DKIM-Quoted-Printable string.
///
/// Non-ASCII UTF-8 is left as-is (RFC 8616); ill-formed UTF-8 bytes are
/// encoded.
pub fn encode(mut bytes: &[u8]) -> String {
    fn encode_byte(s: &mut String, b: u8) {
        let _ = write!(s, "={b:02X}");
    }

    let mut result = String::with_capacity(bytes.len());

    while !bytes.is_empty() {
        if let Some(chunk) = util::next_utf8_chunk(bytes) {
            for c in chunk.chars() {
                if is_dkim_safe_char(c) {
                    result.push(c);
                } else {
                    // only ASCII characters can fail `is_dkim_safe_char`
                    encode_byte(&mut result, c as u8);
                }
            }
            bytes = &bytes[chunk.len()..];
        } else {
            encode_byte(&mut result, bytes[0]);
            bytes = &bytes[1..];
        }
    }

    result
}

// dkim-safe-char = %x21-3A / %x3C / %x3E-7E, and any non-ASCII UTF-8
fn is_dkim_safe_char(c: char) -> bool {
    matches!(c, '!'..=':' | '<' | '>'..='~') || !c.is_ascii()
}
