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
    header::FieldName,
    quoted_printable,
    signature::{
        Canonicalization, DkimSignature, DomainName, Identity, Selector, SignatureAlgorithm,
    },
    signer::OutputFormat,
    util::{self, CanonicalStr},
};
use std::{fmt::Write, iter};

// Note: Careful with offsets: formatting works with *characters*, not bytes!

/// DKIM signature data that does not yet have a cryptographic signature.
pub struct UnsignedDkimSignature {
    pub algorithm: SignatureAlgorithm,
    pub body_hash: Box<[u8]>,
    pub canonicalization: Canonicalization,
    pub domain: DomainName,
    pub signed_headers: Box<[FieldName]>,
    pub identity: Option<Identity>,
    pub body_length: Option<u64>,
    pub selector: Selector,
    pub timestamp: Option<u64>,
    pub expiration: Option<u64>,
}

impl UnsignedDkimSignature {
    /// Returns the formatted signature without the *b=* tag value, and the
    /// index where the *b=* tag value is to be inserted.
    pub fn format_without_signature(
        &self,
        format: &OutputFormat,
        b_tag_len: usize,
    ) -> (String, usize) {
        format_without_signature(self, format, b_tag_len)
    }

    pub fn into_signature(self, signature_data: Box<[u8]>) -> DkimSignature {
        DkimSignature {
            algorithm: self.algorithm,
            signature_data,
            body_hash: self.body_hash,
            canonicalization: self.canonicalization,
            domain: self.domain,
            signed_headers: self.signed_headers,
            identity: self.identity,
            body_length: self.body_length,
            selector: self.selector,
            timestamp: self.timestamp,
            expiration: self.expiration,
        }
    }
}

pub const LINE_WIDTH: usize = 78;

// The tags of a signature, in output order.
enum Tag<'a> {
    V,
    D(&'a DomainName),
    I(&'a Identity),
    S(&'a Selector),
    A(SignatureAlgorithm),
    C(Canonicalization),
    L(u64),
    T(u64),
    X(u64),
    H(&'a [FieldName]),
    Bh(&'a [u8]),
    B,
}

fn compute_tags(sig: &UnsignedDkimSignature) -> Vec<Tag<'_>> {
    let mut tags = Vec::with_capacity(12);

    tags.push(Tag::V);
    tags.push(Tag::D(&sig.domain));
    if let Some(identity) = &sig.identity {
        tags.push(Tag::I(identity));
    }
    tags.push(Tag::S(&sig.selector));
    tags.push(Tag::A(sig.algorithm));
    // c= is always included, even for the default simple/simple
    tags.push(Tag::C(sig.canonicalization));
    if let Some(n) = sig.body_length {
        tags.push(Tag::L(n));
    }
    if let Some(t) = sig.timestamp {
        tags.push(Tag::T(t));
    }
    if let Some(x) = sig.expiration {
        tags.push(Tag::X(x));
    }
    tags.push(Tag::H(&sig.signed_headers));
    tags.push(Tag::Bh(&sig.body_hash));
    tags.push(Tag::B);

    tags
}

// Ephemeral context holding current formatting options.
#[derive(Clone, Copy)]
struct Fmt<'a> {
    width: usize,
    indent: &'a str,
    last: bool,
}

fn format_without_signature(
    sig: &UnsignedDkimSignature,
    format: &OutputFormat,
    b_tag_len: usize,
) -> (String, usize) {
    let width = format.line_width;
    let indent = &format.indentation;

    let tags = compute_tags(sig);
    let last_index = tags.len() - 1;

    // The starting point of cursor `i` is just past header name + ':'.
    let mut output = String::new();
    let mut i = format.header_name.chars().count() + 1;
    let mut insertion_i = 0;

    let out = &mut output;
    let i = &mut i;

    for (index, tag) in tags.into_iter().enumerate() {
        let fmt = Fmt { width, indent, last: index == last_index };

        match tag {
            Tag::V => format_tag(out, i, fmt, "v", "1"),
            Tag::D(domain) => format_tag(out, i, fmt, "d", domain.as_ref()),
            Tag::I(identity) => format_tag_i(out, i, fmt, identity),
            Tag::S(selector) => format_tag(out, i, fmt, "s", selector.as_ref()),
            Tag::A(algorithm) => format_tag(out, i, fmt, "a", algorithm.canonical_str()),
            Tag::C(canonicalization) => {
                format_tag(out, i, fmt, "c", canonicalization.canonical_str())
            }
            Tag::L(body_length) => format_tag(out, i, fmt, "l", &body_length.to_string()),
            Tag::T(timestamp) => format_tag(out, i, fmt, "t", &timestamp.to_string()),
            Tag::X(expiration) => format_tag(out, i, fmt, "x", &expiration.to_string()),
            Tag::H(names) => format_tag_h(out, i, fmt, names),
            Tag::Bh(body_hash) => format_tag_bh(out, i, fmt, body_hash),
            Tag::B => insertion_i = format_tag_name_b(out, i, fmt, b_tag_len),
        }
    }

    (output, insertion_i)
}

// Note: `out` is the final formatted output. `i` is the ‘cursor’ in the
// current line, based on *characters*, not bytes!

fn format_tag_i(out: &mut String, i: &mut usize, fmt: Fmt<'_>, identity: &Identity) {
    let Identity { local_part, domain_part } = identity;

    let identity = match local_part {
        Some(l) => format!("{}@{domain_part}", quoted_printable::encode(l.as_bytes())),
        None => format!("@{domain_part}"),
    };

    format_tag(out, i, fmt, "i", &identity);
}

fn format_tag(out: &mut String, i: &mut usize, fmt: Fmt<'_>, name: &str, value: &str) {
    debug_assert!(name.is_ascii());

    let Fmt { last, .. } = fmt;

    // name + '=' + val [+ ';']
    let taglen = name.len() + value.chars().count() + if last { 1 } else { 2 };

    advance_i_initial(out, i, taglen, fmt);
    let _ = write!(out, "{name}={value}");

    if !last {
        out.push(';');
    }
}

fn format_tag_h(out: &mut String, i: &mut usize, fmt: Fmt<'_>, value: &[FieldName]) {
    let Fmt { last, .. } = fmt;

    let mut names = value.iter().map(|f| f.as_ref()).peekable();

    let Some(first_name) = names.next() else {
        return;
    };

    // "h=" + name [+ ';'/':']
    let taglen = first_name.chars().count() + if names.peek().is_none() && last { 2 } else { 3 };

    advance_i_initial(out, i, taglen, fmt);
    let _ = write!(out, "h={first_name}");
    // the ; or : accounted for in i is written right away below

    while let Some(name) = names.next() {
        out.push(':');

        // name [+ ';'/':']
        let len = name.chars().count() + if names.peek().is_none() && last { 0 } else { 1 };

        advance_i(out, i, len, fmt);
        out.push_str(name);
    }

    if !last {
        out.push(';');
    }
}

fn format_tag_bh(out: &mut String, i: &mut usize, fmt: Fmt<'_>, value: &[u8]) {
    let Fmt { last, .. } = fmt;

    let value = util::encode_base64(value);

    // "bh=" + 1 char (we prefer at least one additional char behind =)
    let taglen = 4;

    advance_i_initial(out, i, taglen, fmt);
    *i -= 1;  // backwards again before the ghost character
    out.push_str("bh=");

    format_chunks_into_string(out, i, fmt, &value);

    // if the final chunk fills the line, the ; still goes on it
    if !last {
        out.push(';');
        *i += 1;
    }
}

// Returns the insertion index of the b= tag value.
fn format_tag_name_b(out: &mut String, i: &mut usize, fmt: Fmt<'_>, b_tag_len: usize) -> usize {
    let Fmt { width, indent, last } = fmt;

    // "b=" + 1 char (we prefer at least one additional char behind =)
    let taglen = 3;
    advance_i_initial(out, i, taglen, fmt);
    *i -= 1;  // backwards again before the ghost character
    out.push_str("b=");

    let insertion_i = out.len();

    // Where in the line are we now given the estimated b= tag value length?
    let chunk_len = width.saturating_sub(indent.len()).max(1);
    let remaining_len = width.saturating_sub(*i);
    if b_tag_len <= remaining_len {
        *i += b_tag_len;
    } else {
        let mut final_chunk_len = (b_tag_len - remaining_len) % chunk_len;
        if final_chunk_len == 0 {
            final_chunk_len = chunk_len;
        }
        *i = final_chunk_len + indent.len();
    }

    if !last {
        out.push(';');
        *i += 1;
    }

    insertion_i
}

/// Advances the cursor `i`, making space for an item of length `len`, inserting
/// line break and indentation if necessary.
fn advance_i(out: &mut String, i: &mut usize, len: usize, fmt: Fmt<'_>) {
    let Fmt { width, indent, .. } = fmt;

    if *i + len <= width {
        *i += len;
    } else {
        let _ = write!(out, "\r\n{indent}");
        *i = indent.len() + len;
    }
}

fn advance_i_initial(out: &mut String, i: &mut usize, len: usize, fmt: Fmt<'_>) {
    let Fmt { width, indent, .. } = fmt;

    // + 1 for initial SP
    if *i + len < width {
        out.push(' ');
        *i += len + 1;
    } else {
        let _ = write!(out, "\r\n{indent}");
        *i = indent.len() + len;
    }
}

fn format_chunks_into_string(out: &mut String, i: &mut usize, fmt: Fmt<'_>, mut s: &str) {
    let Fmt { width, indent, .. } = fmt;

    let first_chunk_len = width.saturating_sub(*i).min(s.chars().count());

    if first_chunk_len > 0 {
        let c = match s.char_indices().nth(first_chunk_len) {
            Some((c, _)) => c,
            None => s.len(),
        };
        let first_chunk;
        (first_chunk, s) = s.split_at(c);
        out.push_str(first_chunk);
        *i += first_chunk.chars().count();
    }

    let chunk_width = width.saturating_sub(indent.len()).max(1);  // no empty chunks
    let chunks = iter::from_fn(|| {
        if s.is_empty() {
            return None;
        }
        let c = match s.char_indices().nth(chunk_width) {
            Some((c, _)) => c,
            None => s.len(),
        };
        let chunk;
        (chunk, s) = s.split_at(c);
        Some(chunk)
    });

    for chunk in chunks {
        let _ = write!(out, "\r\n{indent}{chunk}");
        *i = chunk.chars().count() + indent.len();
    }
}

/// Inserts the Base64-encoded signature data at the insertion index, folding
/// it like the rest of the header.
pub fn insert_signature_data(
    formatted_header: &mut String,
    insertion_index: usize,
    format: &OutputFormat,
    signature_data: &[u8],
) {
    debug_assert!(insertion_index <= formatted_header.len());

    let fmt = Fmt {
        width: format.line_width,
        indent: &format.indentation,
        last: true,
    };

    let s = util::encode_base64(signature_data);

    let formatted_header_pre = &formatted_header[..insertion_index];

    let mut lines = formatted_header_pre.rsplit("\r\n");
    let last_line = lines.next().unwrap_or_default();
    let mut len = if lines.next().is_some() {
        last_line.chars().count()
    } else {
        format.header_name.chars().count() + last_line.chars().count() + 1
    };

    let mut result = String::with_capacity(s.len());
    format_chunks_into_string(&mut result, &mut len, fmt, &s);

    formatted_header.insert_str(insertion_index, &result);
}
