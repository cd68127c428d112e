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

use crate::crypto::SigningError;
use ed25519_dalek::{Signer, SigningKey};

/// Signs the given digest with Ed25519.
///
/// Per RFC 8463, the input signed is the SHA-256 digest of the signing input,
/// not the signing input itself.
pub fn sign_ed25519(signing_key: &SigningKey, digest: &[u8]) -> Result<Vec<u8>, SigningError> {
    let signature = signing_key
        .try_sign(digest)
        .map_err(|_| SigningError::SigningFailure)?;
    Ok(signature.to_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{
        pkcs8::{DecodePrivateKey, DecodePublicKey},
        Signature, Verifier, VerifyingKey,
    };

    #[test]
    fn sign_ed25519_ok() {
        let signing_key =
            SigningKey::from_pkcs8_pem(include_str!("../../tests/keys/ed25519.pem")).unwrap();
        let verifying_key =
            VerifyingKey::from_public_key_pem(include_str!("../../tests/keys/ed25519pub.pem"))
                .unwrap();

        let digest = [7; 32];
        let signature = sign_ed25519(&signing_key, &digest).unwrap();

        assert_eq!(signature.len(), 64);

        let signature = Signature::from_slice(&signature).unwrap();
        assert!(verifying_key.verify(&digest, &signature).is_ok());
    }
}
