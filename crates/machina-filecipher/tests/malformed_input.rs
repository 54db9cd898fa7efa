//! Rejection of corrupted, truncated and foreign input.

use std::sync::Arc;

use machina_core::config::FileCipherConfig;
use machina_core::{DecryptAttributes, EncryptAttributes};
use machina_filecipher::{
    CsvFileCipher, ErrorKind, FileCipher, FileCipherError, GenericFileCipher, GenericHeader,
};
use machina_keys::MemoryKeyService;

fn generic(keys: &Arc<MemoryKeyService>, version: &str) -> GenericFileCipher {
    let cfg = FileCipherConfig {
        version: version.into(),
        max_cipher_block_size: 128,
        ..FileCipherConfig::default()
    };
    GenericFileCipher::new(keys.clone(), cfg).unwrap()
}

fn header_len(protected: &[u8]) -> usize {
    GenericHeader::read_from(&mut &protected[..], 4096)
        .unwrap()
        .to_bytes()
        .unwrap()
        .len()
}

fn decrypt(cipher: &dyn FileCipher, protected: &[u8]) -> Result<Vec<u8>, FileCipherError> {
    cipher.decrypt_bytes(protected, &mut DecryptAttributes::new())
}

#[test]
fn v11_corrupted_sentinel() {
    let keys = Arc::new(MemoryKeyService::new());
    let cipher = generic(&keys, "1.1");
    let mut protected = cipher
        .encrypt_bytes(&[9u8; 300], &mut EncryptAttributes::new())
        .unwrap();
    let first_frame = header_len(&protected);
    protected[first_frame] ^= 0xFF;

    let err = decrypt(&cipher, &protected).unwrap_err();
    assert!(matches!(err, FileCipherError::MalformedFrame { frame: 0, .. }), "{err}");
    assert_eq!(err.kind(), ErrorKind::Format);
}

#[test]
fn v12_tampered_ciphertext_is_a_crypto_error() {
    let keys = Arc::new(MemoryKeyService::new());
    let cipher = generic(&keys, "1.2");
    let mut protected = cipher
        .encrypt_bytes(b"integrity matters", &mut EncryptAttributes::new())
        .unwrap();
    let last = protected.len() - 1;
    protected[last] ^= 0x80;

    let err = decrypt(&cipher, &protected).unwrap_err();
    assert!(matches!(err, FileCipherError::Crypto(_)));
    assert_eq!(err.kind(), ErrorKind::Crypto);
}

#[test]
fn v13_truncated_frame() {
    let keys = Arc::new(MemoryKeyService::new());
    let cipher = generic(&keys, "1.3");
    let protected = cipher
        .encrypt_bytes(&[1u8; 50], &mut EncryptAttributes::new())
        .unwrap();

    let err = decrypt(&cipher, &protected[..protected.len() - 10]).unwrap_err();
    assert!(matches!(err, FileCipherError::TruncatedFrame { frame: 0, .. }), "{err}");
    assert_eq!(err.kind(), ErrorKind::Stream);
}

#[test]
fn oversized_header() {
    let keys = Arc::new(MemoryKeyService::new());
    let cipher = generic(&keys, "1.2");
    let mut input = br#"{"version":"1.2","tag":"K","server":""#.to_vec();
    input.resize(input.len() + 20_000, b'a');
    input.extend_from_slice(b"\"}\r\n\r\n");

    let err = decrypt(&cipher, &input).unwrap_err();
    assert!(matches!(err, FileCipherError::NoHeaderFound { limit: 10240 }), "{err}");
}

#[test]
fn header_without_delimiter() {
    let keys = Arc::new(MemoryKeyService::new());
    let cipher = generic(&keys, "1.2");
    let err = decrypt(&cipher, br#"{"version":"1.2","tag":"K"}"#).unwrap_err();
    assert!(matches!(err, FileCipherError::UnexpectedEof { .. }));
}

#[test]
fn unknown_version_and_missing_tag() {
    let keys = Arc::new(MemoryKeyService::new());
    let cipher = generic(&keys, "1.2");

    let err = decrypt(&cipher, b"{\"version\":\"1.4\",\"tag\":\"K\"}\r\n\r\n").unwrap_err();
    assert!(matches!(err, FileCipherError::UnsupportedVersion { .. }));

    let err = decrypt(&cipher, b"{\"version\":\"1.2\"}\r\n\r\n").unwrap_err();
    assert!(matches!(err, FileCipherError::MissingField("tag")));
}

#[test]
fn v13_block_size_beyond_frame_length() {
    let keys = Arc::new(MemoryKeyService::new());
    let cipher = generic(&keys, "1.3");
    let mut input = br#"{"version":"1.3","tag":"K","blockSize":18446744073709551615,"metaSize":3}"#
        .to_vec();
    input.extend_from_slice(b"\r\n\r\n");
    input.extend_from_slice(&48i32.to_be_bytes());
    input.extend_from_slice(&[0u8; 48]);

    let err = decrypt(&cipher, &input).unwrap_err();
    assert!(matches!(err, FileCipherError::MalformedHeader(_)), "{err}");
    assert_eq!(err.kind(), ErrorKind::Format);
    // rejected before any key is requested
    assert!(keys.fetched().is_empty());
}

#[test]
fn unknown_key_is_reported_from_key_service() {
    let keys = Arc::new(MemoryKeyService::new());
    let cipher = generic(&keys, "1.2");
    let err = decrypt(&cipher, b"{\"version\":\"1.2\",\"tag\":\"NOPE\"}\r\n\r\n").unwrap_err();
    assert!(matches!(err, FileCipherError::KeyService(_)));
    assert_eq!(keys.fetched(), vec!["NOPE".to_string()]);
}

#[test]
fn csv_without_banner() {
    let keys = Arc::new(MemoryKeyService::new());
    let cipher = CsvFileCipher::new(keys.clone(), FileCipherConfig::default()).unwrap();

    let err = decrypt(&cipher, b"id,name\r\n1,alice\r\n2,bob\r\n").unwrap_err();
    assert!(matches!(
        err,
        FileCipherError::UnexpectedEof { .. } | FileCipherError::NoHeaderFound { .. }
    ));

    let huge = b"x,y\r\n".repeat(20_000);
    let err = decrypt(&cipher, &huge).unwrap_err();
    assert!(matches!(err, FileCipherError::NoHeaderFound { .. }), "{err}");
}

#[test]
fn generic_stream_is_not_csv() {
    let keys = Arc::new(MemoryKeyService::new());
    let protected = generic(&keys, "1.2")
        .encrypt_bytes(b"generic", &mut EncryptAttributes::new())
        .unwrap();
    let csv = CsvFileCipher::new(keys, FileCipherConfig::default()).unwrap();
    assert!(decrypt(&csv, &protected).is_err());
    assert!(!csv.file_info_stream(&mut &protected[..]).unwrap().is_encrypted);
}
