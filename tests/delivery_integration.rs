//! End-to-end delivery through a directory bucket
//!
//! Tests for:
//! - 10 MB compressible round trip, stored-size accounting and the kept
//!   sealed ephemeral key
//! - Directory uploads keeping their sub-paths
//! - Tamper detection on stored objects
//! - Overwrite policy and manifest name reuse
//! - Missing inputs with and without break-on-fail
//! - Key and checksum-key mismatches on download
//! - Manifests whose object keys point outside the bucket

use ferry_core::{Delivery, DeliveryConfig, LocalDirTransport, Transport, TransferError};
use ferry_crypto::EncryptionHeader;
use ferry_crypto::RecipientKey;
use ferry_crypto::aead::sealed_len;
use ferry_crypto::keystore::open_private_key;
use ferry_files::{ChecksumKey, Manifest, TransferStatus, WorkList};
use ferry_integration_tests::{
    Fixture, PASSPHRASE, checksum_key, compressible_bytes, random_bytes, upload_keys,
};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

fn bucket(path: PathBuf) -> Arc<dyn Transport> {
    Arc::new(LocalDirTransport::open(path).unwrap())
}

fn plain_config(fx: &Fixture) -> DeliveryConfig {
    DeliveryConfig {
        sensitive: false,
        ..fx.config()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_compressible_10mb_roundtrip() {
    let fx = Fixture::new();
    let data = compressible_bytes(10 * 1024 * 1024);
    let source = fx.write("survey.log", &data);

    // A compress-only delivery of the same file yields the compressed size
    let plain_bucket = fx.path().join("plain-bucket");
    let plain = Delivery::new(plain_config(&fx), bucket(plain_bucket.clone()), checksum_key())
        .unwrap();
    let work = WorkList::assemble(std::slice::from_ref(&source), None).unwrap();
    let plain_report = plain.upload(work, None).await.unwrap();
    assert!(plain_report.is_success());

    let plain_record = plain_report.manifest.get("survey.log").unwrap().clone();
    assert!(plain_record.is_compressed());
    assert!(!plain_record.is_encrypted());
    assert!(plain_record.encrypted_checksum().is_none());
    let compressed_len = plain_record.size_stored();
    assert!(compressed_len < data.len() as u64 / 10);
    assert_eq!(
        fs::metadata(plain_bucket.join(plain_record.remote_name()))
            .unwrap()
            .len(),
        compressed_len
    );

    let recipient = RecipientKey::generate().unwrap();
    let delivery = Delivery::new(fx.config(), bucket(fx.bucket()), checksum_key()).unwrap();
    let work = WorkList::assemble(std::slice::from_ref(&source), None).unwrap();
    let report = delivery
        .upload(work, Some(upload_keys(&recipient)))
        .await
        .unwrap();
    assert!(report.is_success());
    assert!(report.failures_file.is_none());

    let record = report.manifest.get("survey.log").unwrap().clone();
    assert!(record.is_compressed());
    assert!(record.is_encrypted());
    assert_eq!(record.original_checksum(), plain_record.original_checksum());
    assert_eq!(record.compressed_checksum(), plain_record.compressed_checksum());
    assert_eq!(
        record.size_stored(),
        EncryptionHeader::SIZE as u64 + sealed_len(compressed_len)
    );
    let object = fx.bucket().join(record.remote_name());
    assert_eq!(fs::metadata(&object).unwrap().len(), record.size_stored());

    // Staged artifacts are gone once uploaded
    let staged: Vec<_> = fs::read_dir(report.staging.files_dir()).unwrap().collect();
    assert!(staged.is_empty());

    // The sealed ephemeral key stays behind and opens with the passphrase
    let key_file = report
        .staging
        .keys_dir()
        .join(format!("{}.key", record.remote_name()));
    let secret = open_private_key(&fs::read(&key_file).unwrap(), PASSPHRASE).unwrap();
    let stored = fs::read(&object).unwrap();
    let header = EncryptionHeader::from_bytes(&stored[..EncryptionHeader::SIZE]).unwrap();
    assert_eq!(
        RecipientKey::from_bytes(*secret).public_key(),
        header.sender_public
    );

    let report = delivery
        .download(&fx.restored(), &[], Some(Arc::new(recipient)))
        .await
        .unwrap();
    assert!(report.is_success());
    let (name, restored) = report.summary.records().next().unwrap();
    assert_eq!(name, "survey.log");
    assert_eq!(restored.status(), &TransferStatus::Downloaded);
    assert_eq!(restored.final_path(), fx.restored().join("survey.log"));
    assert_eq!(fs::read(fx.restored().join("survey.log")).unwrap(), data);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_directory_keeps_sub_paths() {
    let fx = Fixture::new();
    fx.write("batch/a.txt", b"alpha");
    fx.write("batch/sub/b.txt", &compressible_bytes(50_000));
    fx.write("batch/sub/deeper/c.bin", &random_bytes(70_000, 3));

    let delivery = Delivery::new(plain_config(&fx), bucket(fx.bucket()), checksum_key()).unwrap();
    let work = WorkList::assemble(&[fx.source().join("batch")], None).unwrap();
    let report = delivery.upload(work, None).await.unwrap();
    assert!(report.is_success());

    let names: Vec<&String> = report.manifest.files.keys().collect();
    assert_eq!(
        names,
        vec!["batch/a.txt", "batch/sub/b.txt", "batch/sub/deeper/c.bin"]
    );
    let b = report.manifest.get("batch/sub/b.txt").unwrap();
    assert!(b.remote_name().starts_with("batch/sub/"));
    assert!(b.remote_name().ends_with("_b.txt"));
    assert!(fx.bucket().join(Manifest::REMOTE_KEY).exists());

    let report = delivery.download(&fx.restored(), &[], None).await.unwrap();
    assert!(report.is_success());
    assert_eq!(
        fs::read(fx.restored().join("batch/sub/b.txt")).unwrap(),
        compressible_bytes(50_000)
    );
    assert_eq!(
        fs::read(fx.restored().join("batch/sub/deeper/c.bin")).unwrap(),
        random_bytes(70_000, 3)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tampered_object_releases_no_plaintext() {
    let fx = Fixture::new();
    let source = fx.write("data.bin", &random_bytes(300_000, 11));
    let recipient = RecipientKey::generate().unwrap();

    let delivery = Delivery::new(fx.config(), bucket(fx.bucket()), checksum_key()).unwrap();
    let work = WorkList::assemble(&[source], None).unwrap();
    let report = delivery
        .upload(work, Some(upload_keys(&recipient)))
        .await
        .unwrap();
    let record = report.manifest.get("data.bin").unwrap().clone();

    let object = fx.bucket().join(record.remote_name());
    let mut stored = fs::read(&object).unwrap();
    stored[EncryptionHeader::SIZE + 100] ^= 0x01;
    fs::write(&object, stored).unwrap();

    let report = delivery
        .download(&fx.restored(), &[], Some(Arc::new(recipient)))
        .await
        .unwrap();
    assert!(!report.is_success());
    let (name, error) = report.summary.failures().next().unwrap();
    assert_eq!(name, "data.bin");
    assert!(matches!(error, TransferError::AuthenticationTag(_)));

    assert!(!fx.restored().join("data.bin").exists());
    assert!(!fx.restored().join("data.bin.part").exists());

    let failures = fs::read_to_string(report.failures_file.unwrap()).unwrap();
    assert!(failures.contains("authentication_tag"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_existing_object_requires_overwrite() {
    let fx = Fixture::new();
    let source = fx.write("report.csv", &compressible_bytes(20_000));

    let delivery = Delivery::new(plain_config(&fx), bucket(fx.bucket()), checksum_key()).unwrap();
    let first = delivery
        .upload(WorkList::assemble(std::slice::from_ref(&source), None).unwrap(), None)
        .await
        .unwrap();
    assert!(first.is_success());
    let remote = first.manifest.get("report.csv").unwrap().remote_name().to_string();

    // The second run reuses the recorded remote name and collides with it
    let second = delivery
        .upload(WorkList::assemble(std::slice::from_ref(&source), None).unwrap(), None)
        .await
        .unwrap();
    assert!(!second.is_success());
    let (_, error) = second.summary.failures().next().unwrap();
    assert!(matches!(error, TransferError::AlreadyExists(key) if *key == remote));

    let overwriting = Delivery::new(
        DeliveryConfig {
            overwrite: true,
            ..plain_config(&fx)
        },
        bucket(fx.bucket()),
        checksum_key(),
    )
    .unwrap();
    let third = overwriting
        .upload(WorkList::assemble(&[source], None).unwrap(), None)
        .await
        .unwrap();
    assert!(third.is_success());
    assert_eq!(third.manifest.len(), 1);
    assert_eq!(third.manifest.get("report.csv").unwrap().remote_name(), remote);

    // Restoring onto an existing local file needs overwrite too
    fs::write(fx.restored().join("report.csv"), b"local edits").unwrap();
    let report = delivery.download(&fx.restored(), &[], None).await.unwrap();
    let (_, error) = report.summary.failures().next().unwrap();
    assert!(matches!(error, TransferError::AlreadyExists(_)));
    assert_eq!(
        fs::read(fx.restored().join("report.csv")).unwrap(),
        b"local edits"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_missing_inputs() {
    let fx = Fixture::new();
    let present = fx.write("present.txt", b"here");
    let absent = fx.source().join("absent.txt");

    let strict = Delivery::new(
        DeliveryConfig {
            break_on_fail: true,
            ..plain_config(&fx)
        },
        bucket(fx.bucket()),
        checksum_key(),
    )
    .unwrap();
    let work = WorkList::assemble(&[present.clone(), absent.clone()], None).unwrap();
    let err = strict.upload(work, None).await.unwrap_err();
    assert!(matches!(err, TransferError::NotFound(_)));
    assert!(!fx.bucket().join(Manifest::REMOTE_KEY).exists());

    let lenient = Delivery::new(plain_config(&fx), bucket(fx.bucket()), checksum_key()).unwrap();
    let work = WorkList::assemble(&[present, absent.clone()], None).unwrap();
    let report = lenient.upload(work, None).await.unwrap();
    assert!(!report.is_success());
    assert!(report.summary.is_success());
    assert_eq!(report.missing, vec![absent]);
    assert!(report.manifest.get("present.txt").is_some());

    let failures = fs::read_to_string(report.failures_file.unwrap()).unwrap();
    assert!(failures.contains("not_found"));
    assert!(failures.contains("absent.txt"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_encrypted_download_needs_private_key() {
    let fx = Fixture::new();
    let source = fx.write("secret.txt", b"classified");
    let recipient = RecipientKey::generate().unwrap();

    let delivery = Delivery::new(fx.config(), bucket(fx.bucket()), checksum_key()).unwrap();
    let err = delivery
        .upload(WorkList::assemble(std::slice::from_ref(&source), None).unwrap(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::Configuration(_)));

    delivery
        .upload(
            WorkList::assemble(&[source], None).unwrap(),
            Some(upload_keys(&recipient)),
        )
        .await
        .unwrap();

    let err = delivery.download(&fx.restored(), &[], None).await.unwrap_err();
    assert!(matches!(err, TransferError::Configuration(_)));

    let stranger = RecipientKey::generate().unwrap();
    let report = delivery
        .download(&fx.restored(), &[], Some(Arc::new(stranger)))
        .await
        .unwrap();
    let (_, error) = report.summary.failures().next().unwrap();
    assert!(matches!(error, TransferError::KeyExchange(_)));
    assert!(!fx.restored().join("secret.txt").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_checksum_key_mismatch() {
    let fx = Fixture::new();
    let source = fx.write("notes.md", &compressible_bytes(8_000));

    let uploader = Delivery::new(plain_config(&fx), bucket(fx.bucket()), checksum_key()).unwrap();
    uploader
        .upload(WorkList::assemble(&[source], None).unwrap(), None)
        .await
        .unwrap();

    let other_key = ChecksumKey::derive("some-other-project");
    let verifying = Delivery::new(plain_config(&fx), bucket(fx.bucket()), other_key.clone()).unwrap();
    let report = verifying.download(&fx.restored(), &[], None).await.unwrap();
    let (_, error) = report.summary.failures().next().unwrap();
    assert!(matches!(error, TransferError::ChecksumMismatch { .. }));
    assert!(!fx.restored().join("notes.md").exists());

    let lenient = Delivery::new(
        DeliveryConfig {
            verify: false,
            ..plain_config(&fx)
        },
        bucket(fx.bucket()),
        other_key,
    )
    .unwrap();
    let report = lenient.download(&fx.restored(), &[], None).await.unwrap();
    assert!(report.is_success());
    assert_eq!(
        fs::read(fx.restored().join("notes.md")).unwrap(),
        compressible_bytes(8_000)
    );
}

#[tokio::test]
async fn test_download_without_manifest_or_unknown_name() {
    let fx = Fixture::new();
    let delivery = Delivery::new(plain_config(&fx), bucket(fx.bucket()), checksum_key()).unwrap();

    let err = delivery.download(&fx.restored(), &[], None).await.unwrap_err();
    assert!(matches!(err, TransferError::NotFound(key) if key == Manifest::REMOTE_KEY));

    let source = fx.write("one.txt", b"1");
    delivery
        .upload(WorkList::assemble(&[source], None).unwrap(), None)
        .await
        .unwrap();
    let err = delivery
        .download(&fx.restored(), &["two.txt".to_string()], None)
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::NotFound(name) if name == "two.txt"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_escaping_object_key_in_manifest_is_rejected() {
    let fx = Fixture::new();
    let source = fx.write("a.txt", b"alpha");
    let delivery = Delivery::new(
        DeliveryConfig {
            overwrite: true,
            ..plain_config(&fx)
        },
        bucket(fx.bucket()),
        checksum_key(),
    )
    .unwrap();
    let report = delivery
        .upload(WorkList::assemble(std::slice::from_ref(&source), None).unwrap(), None)
        .await
        .unwrap();
    let remote = report.manifest.get("a.txt").unwrap().remote_name().to_string();

    // Point the recorded key three levels above the staging files directory
    let manifest_path = fx.bucket().join(Manifest::REMOTE_KEY);
    let json = fs::read_to_string(&manifest_path).unwrap();
    let tampered = json.replace(&format!("\"{remote}\""), "\"../../../victim.txt\"");
    assert_ne!(json, tampered);
    fs::write(&manifest_path, tampered).unwrap();

    let victim = fx.path().join("victim.txt");
    fs::write(&victim, b"keep me").unwrap();

    let err = delivery.download(&fx.restored(), &[], None).await.unwrap_err();
    assert!(matches!(err, TransferError::Configuration(_)));
    assert_eq!(fs::read(&victim).unwrap(), b"keep me");
    assert!(!fx.restored().join("a.txt").exists());

    let err = delivery
        .upload(WorkList::assemble(&[source], None).unwrap(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::Configuration(_)));
    assert_eq!(fs::read(&victim).unwrap(), b"keep me");
}
