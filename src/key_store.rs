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

//! Loading of signing keys from the file system.

use crate::crypto::{DecodeKeyError, KeyType, SigningKey, MIN_RSA_KEY_BITS};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    io,
    path::Path,
};
use tokio::fs;
use tracing::debug;

/// The broad category of a [`KeyStoreError`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum KeyStoreErrorKind {
    /// The key file cannot be read.
    Io,
    /// The file content is not a usable private key.
    Format,
    /// The key is well-formed, but not one that may be used for signing.
    UnsupportedKey,
}

/// An error that occurs when loading a signing key.
#[derive(Debug)]
pub enum KeyStoreError {
    Io(io::Error),
    IsDirectory,
    Decode(DecodeKeyError),
    UnacceptedKeyType(KeyType),
    InsufficientKeySize(usize),
}

impl KeyStoreError {
    pub fn kind(&self) -> KeyStoreErrorKind {
        match self {
            Self::Io(_) | Self::IsDirectory => KeyStoreErrorKind::Io,
            Self::Decode(DecodeKeyError::UnsupportedAlgorithm(_))
            | Self::UnacceptedKeyType(_)
            | Self::InsufficientKeySize(_) => KeyStoreErrorKind::UnsupportedKey,
            Self::Decode(_) => KeyStoreErrorKind::Format,
        }
    }
}

impl Display for KeyStoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(_) => write!(f, "could not read key file"),
            Self::IsDirectory => write!(f, "is a directory, expected a file"),
            Self::Decode(DecodeKeyError::UnsupportedAlgorithm(_)) => {
                write!(f, "not an RSA private key")
            }
            Self::Decode(_) => write!(f, "could not decode private key"),
            Self::UnacceptedKeyType(KeyType::Rsa) => write!(f, "RSA keys not accepted"),
            Self::UnacceptedKeyType(KeyType::Ed25519) => write!(f, "not an RSA private key"),
            Self::InsufficientKeySize(bits) => {
                write!(f, "RSA key of {bits} bits too small, at least {MIN_RSA_KEY_BITS} required")
            }
        }
    }
}

impl Error for KeyStoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Decode(e) => Some(e),
            Self::IsDirectory | Self::UnacceptedKeyType(_) | Self::InsufficientKeySize(_) => None,
        }
    }
}

impl From<io::Error> for KeyStoreError {
    fn from(error: io::Error) -> Self {
        Self::Io(error)
    }
}

impl From<DecodeKeyError> for KeyStoreError {
    fn from(error: DecodeKeyError) -> Self {
        Self::Decode(error)
    }
}

/// Loads an RSA signing key from a PKCS#8 PEM file.
pub async fn load(path: impl AsRef<Path>) -> Result<SigningKey, KeyStoreError> {
    load_accepting(path, &[KeyType::Rsa]).await
}

/// Loads a signing key from a PKCS#8 PEM file, accepting only the given key
/// types.
pub async fn load_accepting(
    path: impl AsRef<Path>,
    accepted: &[KeyType],
) -> Result<SigningKey, KeyStoreError> {
    let path = path.as_ref();

    let metadata = fs::metadata(path).await?;
    if metadata.is_dir() {
        return Err(KeyStoreError::IsDirectory);
    }

    let pem = fs::read_to_string(path).await?;

    let key = decode(&pem, accepted)?;

    debug!(path = %path.display(), key_type = %key.key_type(), "loaded signing key");

    Ok(key)
}

/// Decodes a signing key from PKCS#8 PEM text, accepting only the given key
/// types.
pub fn decode(pem: &str, accepted: &[KeyType]) -> Result<SigningKey, KeyStoreError> {
    let key = SigningKey::from_pkcs8_pem(pem)?;

    let key_type = key.key_type();
    if !accepted.contains(&key_type) {
        return Err(KeyStoreError::UnacceptedKeyType(key_type));
    }

    if let Some(bits) = key.key_size() {
        if bits < MIN_RSA_KEY_BITS {
            return Err(KeyStoreError::InsufficientKeySize(bits));
        }
    }

    Ok(key)
}
