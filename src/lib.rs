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

//! A library for signing outgoing email messages with *DomainKeys Identified
//! Mail* (DKIM) signatures as described in [RFC 6376], and submitting them
//! over SMTP.
//!
//! The heart of the library is the signer (module `signer`): given a message
//! and a [`SignRequest`], it canonicalizes the selected header fields and the
//! body, hashes and signs them, and produces the *DKIM-Signature* header that
//! a receiving mail server verifies against the public key published in DNS.
//! The signer is a pure computation and does not perform any I/O.
//!
//! Around it, the remaining modules cover the steps of sending a message:
//! loading the private key from a file (`key_store`), composing the message
//! (`message`), and handing the signed message to a mail server
//! (`transport`). The `send` module ties these steps together for the
//! `dkimsend` command-line program, whose flags are defined in `config`.
//!
//! The low-level building blocks used by the signer, for cryptography,
//! canonicalization and hashing, are public as well.
//!
//! # Usage
//!
//! ```
//! use dkimsend::{
//!     message::MessageBuilder, DomainName, Selector, SignRequest, SignatureAlgorithm,
//!     SigningKey,
//! };
//!
//! # let pem = include_str!("../tests/keys/rsa2048.pem");
//! let signing_key = SigningKey::from_pkcs8_pem(pem)?;
//!
//! let message = MessageBuilder::new().build(
//!     "me@example.com",
//!     "you@example.org",
//!     "Hello",
//!     "Hello, world!",
//! )?;
//!
//! let request = SignRequest::new(
//!     DomainName::new("example.com")?,
//!     Selector::new("default")?,
//!     SignatureAlgorithm::RsaSha256,
//!     signing_key,
//! );
//!
//! let signed = dkimsend::sign(message, request)?;
//!
//! assert!(signed.signature_header().starts_with("DKIM-Signature: v=1; d=example.com;"));
//! # Ok::<_, Box<dyn std::error::Error>>(())
//! ```
//!
//! [RFC 6376]: https://www.rfc-editor.org/rfc/rfc6376

pub mod canonicalize;
pub mod config;
pub mod crypto;
pub mod header;
pub mod key_store;
pub mod message;
pub mod message_hash;
pub mod quoted_printable;
pub mod send;
pub mod signature;
pub mod signer;
pub mod transport;
mod util;

pub use crate::{
    crypto::SigningKey,
    header::{FieldBody, FieldName, HeaderField, HeaderFields},
    message::{SignedMessage, UnsignedMessage},
    signature::{DomainName, Selector, SignatureAlgorithm},
    signer::{sign, SignRequest, Signer, SignerError, SigningResult},
    util::{encode_base64, CanonicalStr},
};
