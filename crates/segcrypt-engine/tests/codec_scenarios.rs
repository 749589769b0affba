//! End-to-end scenarios for the segment codec over a persistent registry.
//!
//! Each test opens a JSON registry in a temp dir, so the password path goes
//! through a real on-disk record.

use secrecy::SecretString;
use segcrypt_core::{Algorithm, SegcryptError};
use segcrypt_crypto::KdfPolicy;
use segcrypt_engine::{Credential, SegmentCodec};
use segcrypt_registry::{JsonRegistry, KeyRegistry};
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn fast_policy() -> KdfPolicy {
    KdfPolicy {
        memory_hard: false,
        pbkdf2_iterations: 1_000,
        ..KdfPolicy::default()
    }
}

fn open_codec(tmp: &TempDir) -> SegmentCodec<JsonRegistry> {
    let registry = JsonRegistry::open(&tmp.path().join("keys.json")).expect("open registry");
    SegmentCodec::new(registry, Algorithm::Aes256Gcm, fast_policy())
}

fn pw(s: &str) -> SecretString {
    SecretString::from(s.to_string())
}

#[test]
fn hello_world_with_master_key() {
    let tmp = TempDir::new().unwrap();
    let codec = open_codec(&tmp);

    let (file_id, key) = codec.setup(&pw("pw1")).unwrap();
    let out = codec.encrypt_segment(&file_id, &key, b"hello world", 0).unwrap();

    let plain = codec
        .decrypt_segment(&out.ciphertext, &out.descriptor, &Credential::from(key))
        .unwrap();
    assert_eq!(plain, b"hello world");
}

#[test]
fn hello_world_with_password_after_reopen() {
    let tmp = TempDir::new().unwrap();

    let (ciphertext, serialized) = {
        let codec = open_codec(&tmp);
        let (file_id, key) = codec.setup(&pw("pw1")).unwrap();
        let out = codec.encrypt_segment(&file_id, &key, b"hello world", 0).unwrap();
        codec.close().unwrap();
        (out.ciphertext, out.serialized)
    };

    let codec = open_codec(&tmp);
    let plain = codec
        .decrypt_segment(&ciphertext, &serialized, &Credential::password("pw1"))
        .unwrap();
    assert_eq!(plain, b"hello world");

    let wrong = codec.decrypt_segment(&ciphertext, &serialized, &Credential::password("wrong"));
    assert!(matches!(wrong, Err(SegcryptError::InvalidPassword)));
}

#[test]
fn rc4_rejected_before_any_write() {
    let tmp = TempDir::new().unwrap();
    let codec = open_codec(&tmp);
    let (file_id, key) = codec.setup(&pw("pw1")).unwrap();

    let result = codec.encrypt_segment_as(&file_id, &key, b"data", 0, "RC4");
    assert!(matches!(result, Err(SegcryptError::UnsupportedAlgorithm(_))));
    assert!(codec.registry().get_segment(&format!("{file_id}_0")).unwrap().is_none());

    // index 0 is still free
    codec.encrypt_segment(&file_id, &key, b"data", 0).unwrap();
}

#[test]
fn hundred_kib_segment() {
    let tmp = TempDir::new().unwrap();
    let codec = open_codec(&tmp);
    let (file_id, key) = codec.setup(&pw("pw1")).unwrap();

    let data: Vec<u8> = (0..100 * 1024).map(|i| (i % 251) as u8).collect();
    for (index, algorithm) in Algorithm::ALL.iter().enumerate() {
        let out = codec
            .encrypt_segment_as(&file_id, &key, &data, index as u64, algorithm.as_str())
            .unwrap();
        assert_eq!(out.descriptor.ciphertext_size, 100 * 1024);

        let plain = codec
            .decrypt_segment(&out.ciphertext, &out.serialized, &Credential::from(key.clone()))
            .unwrap();
        assert_eq!(plain, data);
    }
}

#[test]
fn same_password_different_salts() {
    let tmp = TempDir::new().unwrap();
    let codec = open_codec(&tmp);

    let (a, key_a) = codec.setup(&pw("same")).unwrap();
    let (b, key_b) = codec.setup(&pw("same")).unwrap();
    assert_ne!(a, b);
    assert_ne!(key_a.as_bytes(), key_b.as_bytes());

    let salt_a = codec.file_record(&a).unwrap().unwrap().salt;
    let salt_b = codec.file_record(&b).unwrap().unwrap().salt;
    assert_ne!(salt_a, salt_b);
}

#[test]
fn same_plaintext_different_segments() {
    let tmp = TempDir::new().unwrap();
    let codec = open_codec(&tmp);
    let (file_id, key) = codec.setup(&pw("pw1")).unwrap();

    let a = codec.encrypt_segment(&file_id, &key, b"repeat", 0).unwrap();
    let b = codec.encrypt_segment(&file_id, &key, b"repeat", 1).unwrap();
    assert_ne!(a.ciphertext, b.ciphertext);
    assert_ne!(a.descriptor.nonce, b.descriptor.nonce);
}

#[test]
fn missing_credential() {
    let err = Credential::from_parts(None, None).unwrap_err();
    assert!(matches!(err, SegcryptError::MissingCredential));
}

#[test]
fn tampered_segment_yields_no_plaintext() {
    let tmp = TempDir::new().unwrap();
    let codec = open_codec(&tmp);
    let (file_id, key) = codec.setup(&pw("pw1")).unwrap();

    let mut out = codec.encrypt_segment(&file_id, &key, b"do not touch", 0).unwrap();
    out.ciphertext[0] ^= 0x01;

    let result = codec.decrypt_segment(&out.ciphertext, &out.serialized, &Credential::password("pw1"));
    assert!(matches!(result, Err(SegcryptError::AuthenticationFailure)));
}

#[test]
fn concurrent_same_index_has_one_winner() {
    let tmp = TempDir::new().unwrap();
    let codec = Arc::new(open_codec(&tmp));
    let (file_id, key) = codec.setup(&pw("pw1")).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let codec = Arc::clone(&codec);
            let file_id = file_id.clone();
            let key = key.clone();
            thread::spawn(move || codec.encrypt_segment(&file_id, &key, &[i as u8; 64], 0))
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(SegcryptError::DuplicateSegment(_))))
            .count(),
        7
    );

    // the registered row matches the winner's ciphertext
    let winner = winners[0];
    let plain = codec
        .decrypt_by_segment_id(
            &winner.ciphertext,
            &winner.descriptor.segment_id,
            &Credential::password("pw1"),
        )
        .unwrap();
    assert_eq!(plain.len(), 64);
}

#[test]
fn concurrent_files_are_independent() {
    let tmp = TempDir::new().unwrap();
    let codec = Arc::new(open_codec(&tmp));

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let codec = Arc::clone(&codec);
            thread::spawn(move || {
                let password = format!("pw-{t}");
                let (file_id, key) = codec.setup(&pw(&password)).unwrap();
                for i in 0..5u64 {
                    let data = format!("file {t} segment {i}");
                    let out = codec.encrypt_segment(&file_id, &key, data.as_bytes(), i).unwrap();
                    let plain = codec
                        .decrypt_segment(&out.ciphertext, &out.serialized, &Credential::password(&password))
                        .unwrap();
                    assert_eq!(plain, data.as_bytes());
                }
                file_id
            })
        })
        .collect();

    for h in handles {
        let file_id = h.join().unwrap();
        assert_eq!(codec.segments(&file_id).unwrap().len(), 5);
    }
    assert_eq!(codec.registry().file_count().unwrap(), 4);
}

#[test]
fn forget_file_locks_out_password() {
    let tmp = TempDir::new().unwrap();
    let codec = open_codec(&tmp);
    let (file_id, key) = codec.setup(&pw("pw1")).unwrap();
    let out = codec.encrypt_segment(&file_id, &key, b"bye", 0).unwrap();

    assert_eq!(codec.forget_file(&file_id).unwrap(), 1);
    let result = codec.decrypt_segment(&out.ciphertext, &out.serialized, &Credential::password("pw1"));
    assert!(matches!(result, Err(SegcryptError::UnknownFile(_))));

    // the master key still works: nothing about the segment itself changed
    let plain = codec
        .decrypt_segment(&out.ciphertext, &out.descriptor, &Credential::from(key))
        .unwrap();
    assert_eq!(plain, b"bye");
}

#[test]
fn read_only_codec_keeps_rows_written_by_another() {
    let tmp = TempDir::new().unwrap();
    let reader = open_codec(&tmp);
    let writer = open_codec(&tmp);

    let (file_id, key) = writer.setup(&pw("pw1")).unwrap();
    let out = writer.encrypt_segment(&file_id, &key, b"shared", 0).unwrap();

    let plain = reader
        .decrypt_segment(&out.ciphertext, &out.serialized, &Credential::password("pw1"))
        .unwrap();
    assert_eq!(plain, b"shared");
    drop(reader);

    let second = writer.encrypt_segment(&file_id, &key, b"more", 1).unwrap();
    drop(writer);

    let codec = open_codec(&tmp);
    assert_eq!(codec.segments(&file_id).unwrap().len(), 2);
    let plain = codec
        .decrypt_segment(&second.ciphertext, &second.serialized, &Credential::password("pw1"))
        .unwrap();
    assert_eq!(plain, b"more");
}
