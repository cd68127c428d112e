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

use crate::crypto::{HashAlgorithm, SigningError};
use rsa::{traits::PublicKeyParts, Pkcs1v15Sign, RsaPrivateKey};
use sha2::Sha256;

/// The smallest RSA key size in bits accepted for signing (RFC 8301).
pub const MIN_RSA_KEY_BITS: usize = 1024;

pub fn get_key_size(k: &RsaPrivateKey) -> usize {
    k.size() * 8
}

/// Signs an already computed digest with RSASSA-PKCS1-v1_5.
pub fn sign_rsa(
    hash_alg: HashAlgorithm,
    private_key: &RsaPrivateKey,
    digest: &[u8],
) -> Result<Vec<u8>, SigningError> {
    let result = match hash_alg {
        HashAlgorithm::Sha256 => private_key.sign(Pkcs1v15Sign::new::<Sha256>(), digest),
    };

    result.map_err(|_| SigningError::SigningFailure)
}
