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

//! Canonicalization of header fields and message bodies (RFC 6376, section
//! 3.4).
//!
//! Body canonicalization is performed by a streaming state machine,
//! [`BodyCanonicalizer`], which can be fed the body in chunks split at
//! arbitrary positions. [`canonicalize_body`] and [`canonicalize_header`] are
//! convenience functions for the whole input at once.

use crate::{
    header::{FieldName, HeaderFields},
    signature::CanonicalizationAlgorithm,
};
use bstr::ByteSlice;
use std::collections::HashSet;

const SP: u8 = b' ';
const CR: u8 = b'\r';
const LF: u8 = b'\n';
const CRLF: [u8; 2] = [CR, LF];

// what did we see last?
#[derive(Clone, Copy, Debug)]
enum CanonState {
    Init,
    CrLf,
    Cr,
    Wsp,
    WspCr,
    Byte,
}

/// A canonicalizer using a body canonicalization algorithm.
#[derive(Debug)]
pub struct BodyCanonicalizer {
    kind: CanonicalizationAlgorithm,
    state: CanonState,
    blank_line: bool,  // whether currently on an empty or blank line
    empty_lines: usize,  // number of empty lines seen and held back
    content_seen: bool,  // whether any output has been produced
}

impl BodyCanonicalizer {
    pub fn new(kind: CanonicalizationAlgorithm) -> Self {
        Self {
            kind,
            state: CanonState::Init,
            blank_line: true,
            empty_lines: 0,
            content_seen: false,
        }
    }

    /// Canonicalizes the next chunk of the body, returning the output that is
    /// final at this point. Output for trailing empty lines is held back
    /// until it is known that more content follows.
    // only CRLF is recognised as line terminator, stray CR and LF are treated
    // like other bytes
    pub fn canonicalize_chunk(&mut self, bytes: &[u8]) -> Vec<u8> {
        match self.kind {
            CanonicalizationAlgorithm::Simple => self.canon_chunk_simple(bytes),
            CanonicalizationAlgorithm::Relaxed => self.canon_chunk_relaxed(bytes),
        }
    }

    fn canon_chunk_simple(&mut self, bytes: &[u8]) -> Vec<u8> {
        let mut result = vec![];

        for &b in bytes {
            match self.state {
                CanonState::Init | CanonState::CrLf => {
                    if b == CR {
                        self.state = CanonState::Cr;
                    } else {
                        self.flush_empty_lines(&mut result);
                        result.push(b);
                        self.state = CanonState::Byte;
                    }
                }
                CanonState::Cr => {
                    if b == LF {
                        self.end_line(&mut result);
                        continue;
                    }

                    self.flush_empty_lines(&mut result);
                    result.push(CR);

                    if b != CR {
                        result.push(b);
                        self.state = CanonState::Byte;
                    }
                }
                CanonState::Byte => {
                    if b == CR {
                        self.state = CanonState::Cr;
                    } else {
                        result.push(b);
                    }
                }
                CanonState::Wsp | CanonState::WspCr => {
                    unreachable!("whitespace states are used by relaxed canonicalization only")
                }
            }
        }

        result
    }

    fn canon_chunk_relaxed(&mut self, bytes: &[u8]) -> Vec<u8> {
        let mut result = vec![];

        for &b in bytes {
            match self.state {
                CanonState::Init | CanonState::CrLf => {
                    if is_wsp(b) {
                        self.state = CanonState::Wsp;
                    } else if b == CR {
                        self.state = CanonState::Cr;
                    } else {
                        self.flush_empty_lines(&mut result);
                        result.push(b);
                        self.state = CanonState::Byte;
                    }
                }
                CanonState::Wsp => {
                    if b == CR {
                        self.state = CanonState::WspCr;
                    } else if !is_wsp(b) {
                        self.flush_empty_lines(&mut result);
                        result.push(SP);
                        result.push(b);
                        self.state = CanonState::Byte;
                    }
                }
                CanonState::Cr => {
                    if b == LF {
                        self.end_line(&mut result);
                        continue;
                    }

                    self.flush_empty_lines(&mut result);
                    result.push(CR);

                    if is_wsp(b) {
                        self.state = CanonState::Wsp;
                    } else if b != CR {
                        result.push(b);
                        self.state = CanonState::Byte;
                    }
                }
                CanonState::WspCr => {
                    if b == LF {
                        self.end_line(&mut result);
                        continue;
                    }

                    self.flush_empty_lines(&mut result);
                    result.push(SP);
                    result.push(CR);

                    if b == CR {
                        self.state = CanonState::Cr;
                    } else if is_wsp(b) {
                        self.state = CanonState::Wsp;
                    } else {
                        result.push(b);
                        self.state = CanonState::Byte;
                    }
                }
                CanonState::Byte => {
                    if is_wsp(b) {
                        self.state = CanonState::Wsp;
                    } else if b == CR {
                        self.state = CanonState::Cr;
                    } else {
                        result.push(b);
                    }
                }
            }
        }

        result
    }

    /// Finishes canonicalization, returning the final piece of output.
    pub fn finish(mut self) -> Vec<u8> {
        match self.kind {
            CanonicalizationAlgorithm::Simple => match self.state {
                // an empty body, or a body of empty lines only, is a single CRLF
                CanonState::Init => CRLF.to_vec(),
                CanonState::CrLf if !self.content_seen => CRLF.to_vec(),
                CanonState::CrLf => vec![],
                CanonState::Cr => {
                    let mut result = vec![];
                    self.flush_empty_lines(&mut result);
                    result.push(CR);
                    result.extend(CRLF);
                    result
                }
                CanonState::Byte => CRLF.to_vec(),
                CanonState::Wsp | CanonState::WspCr => {
                    unreachable!("whitespace states are used by relaxed canonicalization only")
                }
            },
            CanonicalizationAlgorithm::Relaxed => match self.state {
                CanonState::Init | CanonState::CrLf => vec![],
                CanonState::Cr => {
                    let mut result = vec![];
                    self.flush_empty_lines(&mut result);
                    result.push(CR);
                    result.extend(CRLF);
                    result
                }
                // final whitespace is dropped; a blank final line counts as empty
                CanonState::Wsp if self.blank_line => vec![],
                CanonState::Wsp => CRLF.to_vec(),
                CanonState::WspCr => {
                    let mut result = vec![];
                    self.flush_empty_lines(&mut result);
                    result.push(SP);
                    result.push(CR);
                    result.extend(CRLF);
                    result
                }
                CanonState::Byte => CRLF.to_vec(),
            },
        }
    }

    fn end_line(&mut self, result: &mut Vec<u8>) {
        if self.blank_line {
            self.empty_lines += 1;
        } else {
            result.extend(CRLF);
            self.blank_line = true;
        }
        self.state = CanonState::CrLf;
    }

    // write out held back empty lines before content that ends a run of
    // empty lines
    fn flush_empty_lines(&mut self, result: &mut Vec<u8>) {
        for _ in 0..self.empty_lines {
            result.extend(CRLF);
        }
        self.empty_lines = 0;
        self.blank_line = false;
        self.content_seen = true;
    }
}

fn is_wsp(b: u8) -> bool {
    matches!(b, b'\t' | b' ')
}

/// Canonicalizes a complete message body.
pub fn canonicalize_body(algorithm: CanonicalizationAlgorithm, body: &[u8]) -> Vec<u8> {
    let mut canonicalizer = BodyCanonicalizer::new(algorithm);
    let mut result = canonicalizer.canonicalize_chunk(body);
    result.extend(canonicalizer.finish());
    result
}

/// Produces the header canonicalization result for the selected header
/// fields.
///
/// Each selected name picks the last occurrence of that name not yet picked,
/// searching from the bottom of the header up. Names with no remaining
/// occurrence contribute nothing.
pub fn canonicalize_headers(
    canon_alg: CanonicalizationAlgorithm,
    headers: &HeaderFields,
    selected_headers: &[FieldName],
) -> Vec<u8> {
    let mut result = vec![];
    let mut processed_indexes = HashSet::with_capacity(selected_headers.len());

    for selected_header in selected_headers {
        let next = headers
            .as_ref()
            .iter()
            .rev()
            .enumerate()
            .filter(|(i, _)| !processed_indexes.contains(i))
            .find(|(_, (name, _))| name == selected_header);

        if let Some((i, (name, value))) = next {
            canonicalize_header_into(&mut result, canon_alg, name, value);
            result.extend(CRLF);
            processed_indexes.insert(i);
        }
    }

    result
}

/// Canonicalizes a single header field, without a trailing CRLF.
pub fn canonicalize_header(
    algorithm: CanonicalizationAlgorithm,
    name: impl AsRef<str>,
    value: impl AsRef<[u8]>,
) -> Vec<u8> {
    let mut result = vec![];
    canonicalize_header_into(&mut result, algorithm, name, value);
    result
}

/// Canonicalizes a header field into some result vector.
pub fn canonicalize_header_into(
    result: &mut Vec<u8>,
    algorithm: CanonicalizationAlgorithm,
    name: impl AsRef<str>,
    value: impl AsRef<[u8]>,
) {
    let name = name.as_ref();
    let value = value.as_ref();

    match algorithm {
        CanonicalizationAlgorithm::Simple => {
            result.extend(name.bytes());
            result.push(b':');
            result.extend(value);
        }
        CanonicalizationAlgorithm::Relaxed => {
            result.extend(name.trim_end_matches([' ', '\t']).to_ascii_lowercase().bytes());
            result.push(b':');
            canonicalize_header_relaxed(result, value);
        }
    }
}

fn canonicalize_header_relaxed(result: &mut Vec<u8>, value: &[u8]) {
    fn is_space(c: char) -> bool {
        matches!(c, ' ' | '\t' | '\r' | '\n')
    }

    let value = value.trim_with(is_space);

    let mut compressing = false;
    for &b in value {
        if is_space(b.into()) {
            if !compressing {
                result.push(SP);
                compressing = true;
            }
        } else {
            result.push(b);
            compressing = false;
        }
    }
}
