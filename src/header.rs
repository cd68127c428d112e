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

//! Representation of email header data.
//!
//! A header field is a pair of [`FieldName`] and [`FieldBody`]. The field body
//! holds everything after the colon, including any leading whitespace and
//! folding line breaks, exactly as it appears in the message. This is
//! necessary for the *simple* header canonicalization, which signs header
//! fields byte for byte.

use bstr::ByteSlice;
use std::{
    error::Error,
    fmt::{self, Debug, Display, Formatter},
    hash::{Hash, Hasher},
    str::FromStr,
};

pub type HeaderField = (FieldName, FieldBody);

/// An error that occurs when constructing header data.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HeaderFieldError;

impl Display for HeaderFieldError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "ill-formed header field")
    }
}

impl Error for HeaderFieldError {}

/// A non-empty collection of header fields, in message order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HeaderFields(Box<[HeaderField]>);

impl HeaderFields {
    pub fn new(value: impl Into<Box<[HeaderField]>>) -> Result<Self, HeaderFieldError> {
        let value = value.into();
        if value.is_empty() {
            return Err(HeaderFieldError);
        }
        Ok(Self(value))
    }

    pub fn from_vec(value: Vec<(String, Vec<u8>)>) -> Result<Self, HeaderFieldError> {
        let value: Vec<_> = value
            .into_iter()
            .map(|(name, value)| {
                let name = FieldName::new(name)?;
                let body = FieldBody::new(value)?;
                Ok((name, body))
            })
            .collect::<Result<_, _>>()?;
        Self::new(value)
    }

    /// Parses a header block.
    ///
    /// Lines may be terminated with CRLF or with a bare LF; folded
    /// continuation lines are rejoined with CRLF. An empty line ends the
    /// header block, anything after it is ignored.
    pub fn parse(bytes: &[u8]) -> Result<Self, HeaderFieldError> {
        let mut fields: Vec<(String, Vec<u8>)> = vec![];

        for line in bytes.lines() {
            if line.is_empty() {
                break;
            }

            if line.starts_with(b" ") || line.starts_with(b"\t") {
                let (_, value) = fields.last_mut().ok_or(HeaderFieldError)?;
                value.extend(b"\r\n");
                value.extend(line);
            } else {
                let i = line.find_byte(b':').ok_or(HeaderFieldError)?;
                let name = line[..i].to_str().map_err(|_| HeaderFieldError)?;
                fields.push((name.into(), line[(i + 1)..].into()));
            }
        }

        Self::from_vec(fields)
    }

    /// Returns the number of header fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always `false`, header fields are never empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of fields with the given name.
    pub fn count(&self, name: &FieldName) -> usize {
        self.0.iter().filter(|(n, _)| n == name).count()
    }

    /// Writes the header block in wire format, each field terminated by CRLF.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        for (name, body) in self.0.iter() {
            out.extend(name.as_ref().bytes());
            out.push(b':');
            out.extend(body.as_ref());
            out.extend(b"\r\n");
        }
    }
}

impl AsRef<[HeaderField]> for HeaderFields {
    fn as_ref(&self) -> &[HeaderField] {
        &self.0
    }
}

/// A header field name.
///
/// Field names compare and hash case-insensitively.
#[derive(Clone, Eq)]
pub struct FieldName(Box<str>);

impl FieldName {
    pub fn new(value: impl Into<Box<str>>) -> Result<Self, HeaderFieldError> {
        let value = value.into();
        if value.is_empty() {
            return Err(HeaderFieldError);
        }
        if !value.chars().all(|c| c.is_ascii_graphic() && c != ':') {
            return Err(HeaderFieldError);
        }
        Ok(Self(value))
    }
}

impl AsRef<str> for FieldName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for FieldName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Debug for FieldName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl PartialEq for FieldName {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl PartialEq<&str> for FieldName {
    fn eq(&self, other: &&str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl Hash for FieldName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_ascii_lowercase().hash(state);
    }
}

impl FromStr for FieldName {
    type Err = HeaderFieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// A header field body: the raw bytes following the colon.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct FieldBody(Box<[u8]>);

impl FieldBody {
    pub fn new(value: impl Into<Box<[u8]>>) -> Result<Self, HeaderFieldError> {
        let value = value.into();
        // only folded continuation lines:
        if !(value.split_str("\r\n").skip(1).all(|line| line.starts_with(b" ") || line.starts_with(b"\t"))) {
            return Err(HeaderFieldError);
        }
        // no empty or blank lines past the first one, no trailing CRLF:
        if !(value.split_str("\r\n").skip(1).all(|line| !line.trim_with(|c| matches!(c, ' ' | '\t')).is_empty())) {
            return Err(HeaderFieldError);
        }
        // no stray CR and LF
        if !(value.split_str("\r\n").all(|line| !line.contains(&b'\r') && !line.contains(&b'\n'))) {
            return Err(HeaderFieldError);
        }
        // all other bytes allowed, UTF-8 not required
        Ok(Self(value))
    }
}

impl AsRef<[u8]> for FieldBody {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Debug for FieldBody {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FieldBody")
            .field(&self.0.as_bstr())
            .finish()
    }
}
