pub mod common;

use common::VerifyError;
use dkimsend::{
    message::{MessageBuilder, UnsignedMessage},
    signature::{CanonicalizationAlgorithm, DomainName, Identity, Selector, SignatureAlgorithm},
    signer::{BodyLength, HeaderSelection, SignRequest, Signer, SignerError, Timestamp},
    FieldName, SigningKey,
};
use std::{sync::Arc, thread, time::Duration};

#[tokio::test]
async fn sign_hello_scenario() {
    use CanonicalizationAlgorithm::*;

    let _ = tracing_subscriber::fmt::try_init();

    let message = UnsignedMessage::parse(
        b"From: me@example.com\r\nTo: you@example.org\r\nSubject: Hello\r\n\r\nhello\r\n",
    )
    .unwrap();

    let signing_key = common::read_signing_key("tests/keys/rsa2048.pem").await.unwrap();
    let mut request = make_request(signing_key);
    request.canonicalization = (Relaxed, Relaxed).into();
    request.header_selection = HeaderSelection::Manual(names(&["from", "to", "subject"]));

    let signed = dkimsend::sign(message, request).unwrap();

    assert_eq!(
        dkimsend::encode_base64(&signed.signature().body_hash),
        "zS7KNTV0HyeorkDDGwxB1AV6enuRKzO5rthkhdHIRnY="
    );

    let bytes = signed.to_bytes();

    assert!(bytes.starts_with(b"DKIM-Signature: v=1; d=example.com; s=default;"));
    assert_eq!(common::signature_tag(&bytes, "a").as_deref(), Some("rsa-sha256"));
    assert_eq!(common::signature_tag(&bytes, "c").as_deref(), Some("relaxed/relaxed"));
    assert_eq!(common::signature_tag(&bytes, "h").as_deref(), Some("from:to:subject"));
    assert_eq!(
        common::signature_tag(&bytes, "bh").as_deref(),
        Some("zS7KNTV0HyeorkDDGwxB1AV6enuRKzO5rthkhdHIRnY=")
    );

    let public_key = common::read_rsa_public_key("tests/keys/rsa2048pub.pem").await.unwrap();

    assert_eq!(common::verify(&bytes, &public_key), Ok(()));
}

#[tokio::test]
async fn sign_all_canonicalizations() {
    use CanonicalizationAlgorithm::*;

    let _ = tracing_subscriber::fmt::try_init();

    let signing_key = Arc::new(common::read_signing_key("tests/keys/rsa2048.pem").await.unwrap());
    let public_key = common::read_rsa_public_key("tests/keys/rsa2048pub.pem").await.unwrap();

    let canonicalizations = [
        (Simple, Simple),
        (Simple, Relaxed),
        (Relaxed, Simple),
        (Relaxed, Relaxed),
    ];

    for canonicalization in canonicalizations {
        let mut request = make_request(signing_key.clone());
        request.canonicalization = canonicalization.into();

        let signed = dkimsend::sign(make_message(), request).unwrap();

        let bytes = signed.to_bytes();

        assert_eq!(
            common::verify(&bytes, &public_key),
            Ok(()),
            "canonicalization {canonicalization:?}"
        );
    }
}

#[tokio::test]
async fn sign_is_deterministic() {
    let signing_key = Arc::new(common::read_signing_key("tests/keys/rsa2048.pem").await.unwrap());

    let signed1 = dkimsend::sign(make_message(), make_request(signing_key.clone())).unwrap();
    let signed2 = dkimsend::sign(make_message(), make_request(signing_key)).unwrap();

    assert_eq!(signed1.signature_header(), signed2.signature_header());
    assert_eq!(signed1.to_bytes(), signed2.to_bytes());
}

#[tokio::test]
async fn tampered_message_fails_verification() {
    let signing_key = common::read_signing_key("tests/keys/rsa2048.pem").await.unwrap();
    let public_key = common::read_rsa_public_key("tests/keys/rsa2048pub.pem").await.unwrap();

    let signed = dkimsend::sign(make_message(), make_request(signing_key)).unwrap();
    let bytes = signed.to_bytes();

    assert_eq!(common::verify(&bytes, &public_key), Ok(()));

    let text = String::from_utf8(bytes).unwrap();

    let tampered_body = text.replacen("Hallo!", "Hallo?", 1);

    assert_ne!(text, tampered_body);
    assert_eq!(
        common::verify(tampered_body.as_bytes(), &public_key),
        Err(VerifyError::BodyHashMismatch)
    );

    let tampered_header = text.replacen("Subject: Greetings", "Subject: Greetinks", 1);

    assert_ne!(text, tampered_header);
    assert_eq!(
        common::verify(tampered_header.as_bytes(), &public_key),
        Err(VerifyError::BadSignature)
    );
}

#[tokio::test]
async fn sign_missing_header_fails() {
    let signing_key = common::read_signing_key("tests/keys/rsa2048.pem").await.unwrap();

    let mut request = make_request(signing_key);
    request.header_selection = HeaderSelection::Manual(names(&["From", "Reply-To"]));

    let result = dkimsend::sign(make_message(), request);

    assert_eq!(
        result.unwrap_err(),
        SignerError::MissingSignedHeader(FieldName::new("Reply-To").unwrap())
    );
}

#[tokio::test]
async fn sign_without_from_fails() {
    let signing_key = common::read_signing_key("tests/keys/rsa2048.pem").await.unwrap();

    let mut request = make_request(signing_key);
    request.header_selection = HeaderSelection::Manual(names(&["To", "Subject"]));

    let result = dkimsend::sign(make_message(), request);

    assert_eq!(result.unwrap_err(), SignerError::FromHeaderNotSigned);
}

#[tokio::test]
async fn sign_with_body_length() {
    let signing_key = Arc::new(common::read_signing_key("tests/keys/rsa2048.pem").await.unwrap());
    let public_key = common::read_rsa_public_key("tests/keys/rsa2048pub.pem").await.unwrap();

    let mut request = make_request(signing_key.clone());
    request.body_length = BodyLength::MessageContent;

    let signed = dkimsend::sign(make_message(), request).unwrap();
    let bytes = signed.to_bytes();

    assert!(common::signature_tag(&bytes, "l").is_some());
    assert_eq!(common::verify(&bytes, &public_key), Ok(()));

    let mut request = make_request(signing_key.clone());
    request.body_length = BodyLength::Exact(10);

    let signed = dkimsend::sign(make_message(), request).unwrap();
    let bytes = signed.to_bytes();

    assert_eq!(common::signature_tag(&bytes, "l").as_deref(), Some("10"));
    assert_eq!(common::verify(&bytes, &public_key), Ok(()));

    let mut request = make_request(signing_key);
    request.body_length = BodyLength::Exact(100_000);

    let result = dkimsend::sign(make_message(), request);

    assert_eq!(result.unwrap_err(), SignerError::InsufficientBodyLength);
}

#[tokio::test]
async fn sign_with_timestamp_and_identity() {
    let signing_key = Arc::new(common::read_signing_key("tests/keys/rsa2048.pem").await.unwrap());
    let public_key = common::read_rsa_public_key("tests/keys/rsa2048pub.pem").await.unwrap();

    let mut request = make_request(signing_key.clone());
    request.timestamp = Some(Timestamp::Exact(1_700_000_000));
    request.valid_duration = Some(Duration::from_secs(3600));
    request.identity = Some(Identity::new("me@mail.example.com").unwrap());

    let signed = dkimsend::sign(make_message(), request).unwrap();
    let bytes = signed.to_bytes();

    assert_eq!(common::signature_tag(&bytes, "t").as_deref(), Some("1700000000"));
    assert_eq!(common::signature_tag(&bytes, "x").as_deref(), Some("1700003600"));
    assert_eq!(
        common::signature_tag(&bytes, "i").as_deref(),
        Some("me@mail.example.com")
    );
    assert_eq!(common::verify(&bytes, &public_key), Ok(()));

    let mut request = make_request(signing_key);
    request.identity = Some(Identity::new("me@example.org").unwrap());

    let result = dkimsend::sign(make_message(), request);

    assert_eq!(result.unwrap_err(), SignerError::DomainMismatch);
}

#[tokio::test]
async fn sign_ed25519() {
    let signing_key = common::read_signing_key("tests/keys/ed25519.pem").await.unwrap();
    let public_key = common::read_ed25519_public_key("tests/keys/ed25519pub.pem").await.unwrap();

    let request = SignRequest::new(
        DomainName::new("example.com").unwrap(),
        Selector::new("ed").unwrap(),
        SignatureAlgorithm::Ed25519Sha256,
        signing_key,
    );

    let signed = dkimsend::sign(make_message(), request).unwrap();
    let bytes = signed.to_bytes();

    assert_eq!(common::signature_tag(&bytes, "a").as_deref(), Some("ed25519-sha256"));
    assert_eq!(common::verify(&bytes, &public_key), Ok(()));
}

#[tokio::test]
async fn sign_key_type_mismatch() {
    let signing_key = common::read_signing_key("tests/keys/ed25519.pem").await.unwrap();

    let request = make_request(signing_key);

    let result = dkimsend::sign(make_message(), request);

    assert_eq!(result.unwrap_err(), SignerError::KeyTypeMismatch);
}

#[tokio::test]
async fn streaming_signer_matches_one_shot() {
    let signing_key = Arc::new(common::read_signing_key("tests/keys/rsa2048.pem").await.unwrap());

    let message = make_message();

    let mut signer =
        Signer::prepare_signing(make_request(signing_key.clone()), message.headers().clone())
            .unwrap();
    for chunk in message.body().chunks(7) {
        let _ = signer.body_chunk(chunk);
    }
    let result = signer.finish().unwrap();

    let signed = dkimsend::sign(message, make_request(signing_key)).unwrap();

    assert_eq!(result.format_header(), signed.signature_header());
}

#[test]
fn sign_concurrently_with_shared_key() {
    let pem = include_str!("keys/rsa2048.pem");
    let signing_key = Arc::new(SigningKey::from_pkcs8_pem(pem).unwrap());

    let headers: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let signing_key = signing_key.clone();
                s.spawn(move || {
                    let message = fixed_builder()
                        .build("me@example.com", "you@example.org", "Hi", &format!("message {i}"))
                        .unwrap();
                    dkimsend::sign(message, make_request(signing_key))
                        .unwrap()
                        .signature_header()
                })
            })
            .collect();

        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(headers.len(), 4);
    for (i, header) in headers.iter().enumerate() {
        for other in &headers[(i + 1)..] {
            assert_ne!(header, other);
        }
    }
}

fn make_request<T>(signing_key: T) -> SignRequest<T> {
    SignRequest::new(
        DomainName::new("example.com").unwrap(),
        Selector::new("default").unwrap(),
        SignatureAlgorithm::RsaSha256,
        signing_key,
    )
}

fn names(names: &[&str]) -> Vec<FieldName> {
    names.iter().map(|n| FieldName::new(*n).unwrap()).collect()
}

fn fixed_builder() -> MessageBuilder {
    MessageBuilder::new()
        .date("Fri, 9 Jun 2023 16:13:12 +0200")
        .message_id("<1511928109048645963@example.com>")
}

fn make_message() -> UnsignedMessage {
    let message = "\
From: Me <me@example.com>
To: you@example.org
Subject: Greetings
Date: Fri, 9 Jun 2023 16:13:12 +0200
Message-ID: <1511928109048645963@example.com>
MIME-Version: 1.0
Content-Type: text/plain; charset=utf-8
Content-Transfer-Encoding: 8bit

Hallo!

Here is some trailing whitespace:  
  <- and some	leading whitespace, and a tab
Include some Unicode: ä 🕊 💜

Tschüss,


";
    UnsignedMessage::parse(message.as_bytes()).unwrap()
}
