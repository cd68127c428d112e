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
    crypto::{self, HashAlgorithm, SigningKey},
    header::{FieldName, HeaderFields},
    message_hash::{self, BodyHashError},
    signer::{
        format::{self, UnsignedDkimSignature},
        request, BodyLength, HeaderSelection, SignRequest, SignerError, SigningResult, Timestamp,
    },
};
use std::{collections::HashSet, time::SystemTime};
use tracing::{debug, trace};

pub fn perform_signing<T>(
    request: &SignRequest<T>,
    headers: &HeaderFields,
    body_hash_result: Result<(Box<[u8]>, usize), BodyHashError>,
) -> Result<SigningResult, SignerError>
where
    T: AsRef<SigningKey>,
{
    let algorithm = request.algorithm;

    let (body_hash, final_len) = match body_hash_result {
        Ok(r) => r,
        Err(BodyHashError::InsufficientInput) => {
            return Err(SignerError::InsufficientBodyLength);
        }
    };

    let body_length = match request.body_length {
        BodyLength::NoLimit => None,
        BodyLength::MessageContent | BodyLength::Exact(_) => {
            Some(u64::try_from(final_len).map_err(|_| SignerError::Overflow)?)
        }
    };

    let signed_headers = select_signed_headers(&request.header_selection, headers)?;

    trace!(?signed_headers, "selected header fields to sign");

    let timestamp = request.timestamp.map(|timestamp| match timestamp {
        Timestamp::Now => now_unix_secs(),
        Timestamp::Exact(t) => t,
    });

    let expiration = request.valid_duration.map(|duration| {
        timestamp
            .unwrap_or_else(now_unix_secs)
            .saturating_add(duration.as_secs())
    });

    let sig = UnsignedDkimSignature {
        algorithm,
        body_hash,
        canonicalization: request.canonicalization,
        domain: request.domain.clone(),
        signed_headers: signed_headers.into(),
        identity: request.identity.clone(),
        body_length,
        selector: request.selector.clone(),
        timestamp,
        expiration,
    };

    produce_signature(sig, request, headers)
}

// Selected names are in the order in which they are later looked up during
// canonicalization, the last unused occurrence of a name first.
fn select_signed_headers(
    selection: &HeaderSelection,
    headers: &HeaderFields,
) -> Result<Vec<FieldName>, SignerError> {
    let signed_headers = match selection {
        HeaderSelection::Auto => {
            let def: HashSet<_> = request::default_signed_headers().into_iter().collect();
            request::select_headers(headers, move |name| def.contains(name))
                .cloned()
                .collect()
        }
        HeaderSelection::Manual(names) => {
            let mut seen = HashSet::new();
            for name in names {
                if !seen.insert(name) {
                    continue;
                }
                let wanted = names.iter().filter(|n| *n == name).count();
                if headers.count(name) < wanted {
                    return Err(SignerError::MissingSignedHeader(name.clone()));
                }
            }

            names.clone()
        }
    };

    if !signed_headers.iter().any(|name| *name == "From") {
        return Err(SignerError::FromHeaderNotSigned);
    }
    if signed_headers.iter().any(|name| name.as_ref().contains(';')) {
        return Err(SignerError::InvalidSignedFieldName);
    }

    Ok(signed_headers)
}

fn produce_signature<T>(
    sig: UnsignedDkimSignature,
    request: &SignRequest<T>,
    headers: &HeaderFields,
) -> Result<SigningResult, SignerError>
where
    T: AsRef<SigningKey>,
{
    let signing_key = request.signing_key.as_ref();
    let output_format = &request.format;

    let b_len = estimate_b_tag_length(signing_key);

    let (mut formatted_header_value, insertion_index) =
        sig.format_without_signature(output_format, b_len);

    let header_name = &output_format.header_name;

    let hash_alg = sig.algorithm.hash_algorithm();

    let data_hash = message_hash::compute_data_hash(
        hash_alg,
        sig.canonicalization.header,
        headers,
        &sig.signed_headers,
        header_name,
        &formatted_header_value,
    );

    if signing_key.key_type() != sig.algorithm.key_type() {
        return Err(SignerError::KeyTypeMismatch);
    }

    let signature_data = sign_hash(signing_key, hash_alg, &data_hash)?.into_boxed_slice();

    let sig = sig.into_signature(signature_data);

    format::insert_signature_data(
        &mut formatted_header_value,
        insertion_index,
        output_format,
        &sig.signature_data,
    );

    debug!(
        domain = %sig.domain,
        selector = %sig.selector,
        algorithm = %sig.algorithm,
        "produced DKIM signature"
    );

    Ok(SigningResult {
        header_name: header_name.clone(),
        header_value: formatted_header_value,
        signature: sig,
    })
}

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |t| t.as_secs())
}

fn estimate_b_tag_length(signing_key: &SigningKey) -> usize {
    let n = signing_key.signature_length();
    // n is the signature length in bytes, now compute the length of the
    // base64-encoded value:
    (n + 2) / 3 * 4
}

fn sign_hash(
    signing_key: &SigningKey,
    hash_alg: HashAlgorithm,
    data_hash: &[u8],
) -> Result<Vec<u8>, SignerError> {
    match signing_key {
        SigningKey::Rsa(k) => match crypto::sign_rsa(hash_alg, k, data_hash) {
            Ok(s) => {
                trace!("RSA signing successful");
                Ok(s)
            }
            Err(e) => {
                trace!("RSA signing failed: {e}");
                Err(SignerError::SigningFailure)
            }
        },
        SigningKey::Ed25519(k) => match crypto::sign_ed25519(k, data_hash) {
            Ok(s) => {
                trace!("Ed25519 signing successful");
                Ok(s)
            }
            Err(e) => {
                trace!("Ed25519 signing failed: {e}");
                Err(SignerError::SigningFailure)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers() -> HeaderFields {
        HeaderFields::from_vec(vec![
            ("From".to_owned(), b" me@example.com".to_vec()),
            ("To".to_owned(), b" you@example.org".to_vec()),
            ("Received".to_owned(), b" somewhere".to_vec()),
            ("To".to_owned(), b" them@example.org".to_vec()),
        ])
        .unwrap()
    }

    fn names(names: &[&str]) -> Vec<FieldName> {
        names.iter().map(|n| FieldName::new(*n).unwrap()).collect()
    }

    #[test]
    fn select_auto_bottom_up() {
        let selected = select_signed_headers(&HeaderSelection::Auto, &headers()).unwrap();

        assert_eq!(selected, names(&["To", "To", "From"]));
    }

    #[test]
    fn select_manual_strict() {
        let selection = HeaderSelection::Manual(names(&["from", "to", "to"]));
        assert!(select_signed_headers(&selection, &headers()).is_ok());

        let selection = HeaderSelection::Manual(names(&["from", "to", "to", "to"]));
        assert_eq!(
            select_signed_headers(&selection, &headers()),
            Err(SignerError::MissingSignedHeader(FieldName::new("to").unwrap()))
        );

        let selection = HeaderSelection::Manual(names(&["from", "subject"]));
        assert_eq!(
            select_signed_headers(&selection, &headers()),
            Err(SignerError::MissingSignedHeader(FieldName::new("subject").unwrap()))
        );
    }

    #[test]
    fn select_requires_from() {
        let selection = HeaderSelection::Manual(names(&["to"]));

        assert_eq!(
            select_signed_headers(&selection, &headers()),
            Err(SignerError::FromHeaderNotSigned)
        );
    }

    #[test]
    fn estimate_b_tag_length_ok() {
        let key = SigningKey::from_pkcs8_pem(include_str!("../../tests/keys/ed25519.pem")).unwrap();

        assert_eq!(estimate_b_tag_length(&key), 88);
    }
}
