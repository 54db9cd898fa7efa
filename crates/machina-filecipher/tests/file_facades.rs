//! File-level helpers driven by a TOML configuration.

use std::path::Path;
use std::sync::Arc;

use machina_core::config::MachinaConfig;
use machina_core::{DecryptAttributes, EncryptAttributes, FileInfo};
use machina_filecipher::{CsvFileCipher, FileCipher, GenericFileCipher};
use machina_keys::MemoryKeyService;
use tempfile::TempDir;

fn write_config(dir: &Path, body: &str) -> MachinaConfig {
    let path = dir.join("machina.toml");
    std::fs::write(&path, body).expect("write config");
    MachinaConfig::load(&path).expect("load config")
}

#[test]
fn encrypt_and_decrypt_files() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(
        tmp.path(),
        r#"
[filecipher]
version = "1.3"
max_cipher_block_size = 4096
meta_size = 2
"#,
    );
    let keys = Arc::new(MemoryKeyService::with_server(config.keyservice.server.clone()));
    let cipher = GenericFileCipher::new(keys.clone(), config.filecipher.clone()).unwrap();

    let original: Vec<u8> = (0..50_000u32).map(|i| (i % 253) as u8).collect();
    let src = tmp.path().join("report.bin");
    let enc = tmp.path().join("report.bin.protected");
    let dec = tmp.path().join("report.bin.restored");
    std::fs::write(&src, &original).unwrap();

    let mut attrs = EncryptAttributes::new()
        .with_key_attribute("classification", vec!["internal".into()])
        .with_metadata("app", "file-facade-test");
    cipher.encrypt_file(&src, &enc, &mut attrs).unwrap();
    let key_id = attrs.key().unwrap().id().to_string();
    assert_eq!(
        keys.attributes(&key_id).unwrap()["classification"],
        vec!["internal".to_string()]
    );

    let info = cipher.file_info(&enc).unwrap();
    assert_eq!(
        info,
        FileInfo {
            is_encrypted: true,
            cipher_family: "generic".into(),
            cipher_version: "1.3".into(),
            key_id: key_id.clone(),
            server: config.keyservice.server.clone(),
        }
    );

    let mut dattrs = DecryptAttributes::new();
    let dinfo = cipher.decrypt_file(&enc, &dec, &mut dattrs).unwrap();
    assert_eq!(dinfo, info);
    assert_eq!(dattrs.key().unwrap().id(), key_id);
    assert_eq!(std::fs::read(&dec).unwrap(), original);
}

#[test]
fn csv_files_and_plain_file_info() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path(), "[filecipher]\ncsv_width_raw = 60\n");
    let keys = Arc::new(MemoryKeyService::new());
    let cipher = CsvFileCipher::new(keys, config.filecipher.clone()).unwrap();

    let src = tmp.path().join("people.csv");
    let enc = tmp.path().join("people.protected.csv");
    let dec = tmp.path().join("people.restored.csv");
    std::fs::write(&src, "name,team\nada,core\ngrace,compilers\n").unwrap();

    assert!(!cipher.file_info(&src).unwrap().is_encrypted);

    cipher
        .encrypt_file(&src, &enc, &mut EncryptAttributes::new())
        .unwrap();
    assert!(cipher.file_info(&enc).unwrap().is_encrypted);

    cipher
        .decrypt_file(&enc, &dec, &mut DecryptAttributes::new())
        .unwrap();
    assert_eq!(
        std::fs::read_to_string(&dec).unwrap(),
        "name,team\nada,core\ngrace,compilers\n"
    );
}

#[test]
fn missing_source_is_an_io_error() {
    let tmp = TempDir::new().unwrap();
    let keys = Arc::new(MemoryKeyService::new());
    let cipher = GenericFileCipher::new(keys, Default::default()).unwrap();
    let err = cipher
        .encrypt_file(
            &tmp.path().join("absent"),
            &tmp.path().join("out"),
            &mut EncryptAttributes::new(),
        )
        .unwrap_err();
    assert!(matches!(err, machina_filecipher::FileCipherError::Io(_)));
}
