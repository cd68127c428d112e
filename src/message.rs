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

//! Composition of plain-text email messages.
//!
//! An [`UnsignedMessage`] is an ordered list of header fields plus a body
//! whose lines are terminated with CRLF. After signing, a [`SignedMessage`]
//! carries the *DKIM-Signature* header in front of the unchanged message.

use crate::{
    header::{FieldBody, FieldName, HeaderFieldError, HeaderFields},
    signature::DkimSignature,
    signer::SigningResult,
    util,
};
use bstr::ByteSlice;
use std::{
    error::Error,
    fmt::{self, Display, Formatter, Write},
    time::SystemTime,
};

/// An error that occurs when composing or parsing a message.
#[derive(Debug)]
pub enum MessageError {
    /// A header value contains a line break.
    LineBreakInHeader(&'static str),
    /// The message data is not a well-formed header block plus body.
    InvalidMessage(HeaderFieldError),
    /// No randomness was available for generating the *Message-ID*.
    MessageId(getrandom::Error),
}

impl Display for MessageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::LineBreakInHeader(name) => write!(f, "{name} header contains a line break"),
            Self::InvalidMessage(_) => write!(f, "ill-formed message"),
            Self::MessageId(_) => write!(f, "failed to generate Message-ID"),
        }
    }
}

impl Error for MessageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::LineBreakInHeader(_) => None,
            Self::InvalidMessage(e) => Some(e),
            Self::MessageId(e) => Some(e),
        }
    }
}

impl From<HeaderFieldError> for MessageError {
    fn from(error: HeaderFieldError) -> Self {
        Self::InvalidMessage(error)
    }
}

/// A message that has not been signed yet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UnsignedMessage {
    headers: HeaderFields,
    body: Vec<u8>,
}

impl UnsignedMessage {
    pub fn new(headers: HeaderFields, body: impl Into<Vec<u8>>) -> Self {
        Self {
            headers,
            body: body.into(),
        }
    }

    /// Parses a raw RFC 5322 message.
    ///
    /// Header and body are separated at the first empty line. Lines ending in
    /// a bare LF are accepted and converted to CRLF.
    pub fn parse(bytes: &[u8]) -> Result<Self, MessageError> {
        let bytes = normalize_line_endings(bytes);

        let (header, body) = match bytes.find(b"\r\n\r\n") {
            Some(i) => (&bytes[..(i + 2)], &bytes[(i + 4)..]),
            None => (&bytes[..], &b""[..]),
        };

        let headers = HeaderFields::parse(header)?;

        Ok(Self::new(headers, body))
    }

    pub fn headers(&self) -> &HeaderFields {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Serializes the message in wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut result = Vec::with_capacity(self.body.len() + 512);
        self.headers.write_to(&mut result);
        result.extend(b"\r\n");
        result.extend(&self.body);
        result
    }
}

/// A message with a *DKIM-Signature* header.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SignedMessage {
    result: SigningResult,
    message: UnsignedMessage,
}

impl SignedMessage {
    pub fn new(result: SigningResult, message: UnsignedMessage) -> Self {
        Self { result, message }
    }

    pub fn signature(&self) -> &DkimSignature {
        &self.result.signature
    }

    /// Returns the complete *DKIM-Signature* header field, without trailing
    /// CRLF.
    pub fn signature_header(&self) -> String {
        self.result.format_header()
    }

    /// Returns the message as it was before signing.
    pub fn message(&self) -> &UnsignedMessage {
        &self.message
    }

    /// Serializes the signed message in wire format, the *DKIM-Signature*
    /// header first.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut result = self.signature_header().into_bytes();
        result.extend(b"\r\n");
        result.extend(self.message.to_bytes());
        result
    }
}

/// A builder for plain-text messages.
///
/// The *Date* and *Message-ID* headers are generated unless set explicitly.
#[derive(Clone, Debug, Default)]
pub struct MessageBuilder {
    date: Option<String>,
    message_id: Option<String>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    /// Sets the value of the *Date* header.
    pub fn date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    /// Sets the value of the *Message-ID* header, including angle brackets.
    pub fn message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    /// Builds a message with the given addresses, subject and plain-text
    /// body.
    pub fn build(
        self,
        from: &str,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<UnsignedMessage, MessageError> {
        check_header_value("From", from)?;
        check_header_value("To", to)?;
        check_header_value("Subject", subject)?;

        let date = match self.date {
            Some(date) => date,
            None => chrono::Local::now().to_rfc2822(),
        };
        check_header_value("Date", &date)?;

        let message_id = match self.message_id {
            Some(id) => id,
            None => generate_message_id(from)?,
        };
        check_header_value("Message-ID", &message_id)?;

        let mut body = normalize_line_endings(body.as_bytes());
        if !body.ends_with(b"\r\n") {
            body.extend(b"\r\n");
        }

        let encoding = if body.is_ascii() {
            "7bit"
        } else {
            body = ::quoted_printable::encode(&body);
            "quoted-printable"
        };

        let fields = [
            ("From", from.to_owned()),
            ("To", to.to_owned()),
            ("Subject", encode_subject(subject)),
            ("Date", date),
            ("Message-ID", message_id),
            ("MIME-Version", "1.0".to_owned()),
            ("Content-Type", "text/plain; charset=utf-8".to_owned()),
            ("Content-Transfer-Encoding", encoding.to_owned()),
        ];

        let fields = fields
            .into_iter()
            .map(|(name, value)| {
                let name = FieldName::new(name)?;
                let value = FieldBody::new(format!(" {value}").into_bytes())?;
                Ok((name, value))
            })
            .collect::<Result<Vec<_>, HeaderFieldError>>()?;

        let headers = HeaderFields::new(fields)?;

        Ok(UnsignedMessage::new(headers, body))
    }
}

/// Builds a plain-text message with generated *Date* and *Message-ID*
/// headers.
pub fn build(
    from: &str,
    to: &str,
    subject: &str,
    body: &str,
) -> Result<UnsignedMessage, MessageError> {
    MessageBuilder::new().build(from, to, subject, body)
}

fn check_header_value(name: &'static str, value: &str) -> Result<(), MessageError> {
    if value.contains(['\r', '\n']) {
        return Err(MessageError::LineBreakInHeader(name));
    }
    Ok(())
}

fn normalize_line_endings(bytes: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(bytes.len() + bytes.len() / 32);
    for line in bytes.lines_with_terminator() {
        match line.strip_suffix(b"\r\n").or_else(|| line.strip_suffix(b"\n")) {
            Some(line) => {
                result.extend(line);
                result.extend(b"\r\n");
            }
            None => result.extend(line),
        }
    }
    result
}

// Encoded words hold at most 75 characters; 45 bytes of UTF-8 make 60
// characters of Base64, plus 12 for the delimiters.
const MAX_ENCODED_WORD_INPUT: usize = 45;

fn encode_subject(subject: &str) -> String {
    if subject.is_ascii() {
        return subject.into();
    }

    let mut words = vec![];
    let mut start = 0;
    let mut end = 0;
    for (i, c) in subject.char_indices() {
        if i + c.len_utf8() - start > MAX_ENCODED_WORD_INPUT {
            words.push(&subject[start..end]);
            start = end;
        }
        end = i + c.len_utf8();
    }
    words.push(&subject[start..]);

    let mut result = String::new();
    for (i, word) in words.into_iter().enumerate() {
        if i > 0 {
            result.push_str("\r\n ");
        }
        let _ = write!(result, "=?utf-8?b?{}?=", util::encode_base64(word));
    }
    result
}

fn generate_message_id(from: &str) -> Result<String, MessageError> {
    let mut random = [0; 12];
    getrandom::getrandom(&mut random).map_err(MessageError::MessageId)?;

    let mut id = String::with_capacity(48);
    for b in random {
        let _ = write!(id, "{b:02x}");
    }

    let secs = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |t| t.as_secs());

    let domain = from
        .rsplit_once('@')
        .map(|(_, domain)| domain.trim_end_matches('>').trim())
        .filter(|domain| !domain.is_empty())
        .unwrap_or("localhost");

    Ok(format!("<{id}.{secs}@{domain}>"))
}
