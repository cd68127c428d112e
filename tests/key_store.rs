use dkimsend::{
    crypto::{DecodeKeyError, KeyType},
    key_store::{self, KeyStoreError, KeyStoreErrorKind},
};

#[tokio::test]
async fn load_rsa_key() {
    let _ = tracing_subscriber::fmt::try_init();

    let key = key_store::load("tests/keys/rsa2048.pem").await.unwrap();

    assert_eq!(key.key_type(), KeyType::Rsa);
    assert_eq!(key.key_size(), Some(2048));
}

#[tokio::test]
async fn load_directory_fails() {
    let error = key_store::load("tests/keys").await.unwrap_err();

    assert!(matches!(error, KeyStoreError::IsDirectory));
    assert_eq!(error.kind(), KeyStoreErrorKind::Io);
    assert_eq!(error.to_string(), "is a directory, expected a file");
}

#[tokio::test]
async fn load_missing_file_fails() {
    let error = key_store::load("tests/keys/nonexistent.pem").await.unwrap_err();

    assert!(matches!(error, KeyStoreError::Io(_)));
    assert_eq!(error.kind(), KeyStoreErrorKind::Io);
}

#[tokio::test]
async fn load_non_pem_fails() {
    let error = key_store::load("tests/keys/not_a_key.pem").await.unwrap_err();

    assert!(matches!(error, KeyStoreError::Decode(DecodeKeyError::NotPem)));
    assert_eq!(error.kind(), KeyStoreErrorKind::Format);
}

#[tokio::test]
async fn load_pkcs1_key_fails() {
    let error = key_store::load("tests/keys/rsa1024_pkcs1.pem").await.unwrap_err();

    assert!(matches!(
        error,
        KeyStoreError::Decode(DecodeKeyError::UnexpectedPemLabel(_))
    ));
    assert_eq!(error.kind(), KeyStoreErrorKind::Format);
}

#[tokio::test]
async fn load_ec_key_unsupported() {
    let error = key_store::load("tests/keys/ec_p256.pem").await.unwrap_err();

    assert_eq!(error.kind(), KeyStoreErrorKind::UnsupportedKey);
    assert_eq!(error.to_string(), "not an RSA private key");
}

#[tokio::test]
async fn load_small_rsa_key_unsupported() {
    let error = key_store::load("tests/keys/rsa512.pem").await.unwrap_err();

    assert!(matches!(error, KeyStoreError::InsufficientKeySize(512)));
    assert_eq!(error.kind(), KeyStoreErrorKind::UnsupportedKey);
}

#[tokio::test]
async fn load_ed25519_key_on_request() {
    let error = key_store::load("tests/keys/ed25519.pem").await.unwrap_err();

    assert!(matches!(error, KeyStoreError::UnacceptedKeyType(KeyType::Ed25519)));
    assert_eq!(error.kind(), KeyStoreErrorKind::UnsupportedKey);

    let key = key_store::load_accepting("tests/keys/ed25519.pem", &[KeyType::Ed25519])
        .await
        .unwrap();

    assert_eq!(key.key_type(), KeyType::Ed25519);
}
