//! Property-based tests for the protect/restore pipelines

use ferry_crypto::{RecipientKey, SealParams, StaticPassphrase};
use ferry_files::{
    FileUnit, PipelineConfig, PipelineError, ProtectPipeline, RestorePipeline, StageToggles,
    TransferRecord,
};
use ferry_integration_tests::{PASSPHRASE, checksum_key};
use proptest::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tempfile::TempDir;

fn config(chunk_size: usize) -> PipelineConfig {
    PipelineConfig {
        chunk_size,
        compression_level: 3,
        seal_params: SealParams::testing(),
    }
}

fn protect(
    dir: &Path,
    data: &[u8],
    toggles: StageToggles,
    chunk_size: usize,
    recipient: &RecipientKey,
) -> (PathBuf, TransferRecord) {
    let source = dir.join("input.dat");
    std::fs::write(&source, data).unwrap();
    let unit = FileUnit::new(source, "input.dat", "abc123_input.dat", data.len() as u64, false);

    let pipeline = ProtectPipeline::new(config(chunk_size), toggles, checksum_key())
        .with_recipient(recipient.public_key(), Arc::new(StaticPassphrase::new(PASSPHRASE)));
    let artifact = dir.join("artifact");
    let record = pipeline
        .protect(&unit, &artifact, &AtomicBool::new(false))
        .unwrap();
    (artifact, record)
}

fn output(dir: &TempDir) -> PathBuf {
    dir.path().join("restored").join("input.dat")
}

fn toggles() -> impl Strategy<Value = StageToggles> {
    (any::<bool>(), any::<bool>()).prop_map(|(compress, encrypt)| StageToggles { compress, encrypt })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// restore(protect(F)) == F for every stage combination and chunking.
    #[test]
    fn prop_roundtrip(
        data in prop::collection::vec(any::<u8>(), 0..200_000),
        toggles in toggles(),
        chunk_size in prop::sample::select(vec![1024usize, 4096, 65536, 100_000]),
    ) {
        let dir = TempDir::new().unwrap();
        let recipient = Arc::new(RecipientKey::generate().unwrap());
        let (artifact, record) = protect(dir.path(), &data, toggles, chunk_size, &recipient);

        prop_assert_eq!(record.is_encrypted(), toggles.encrypt);
        prop_assert_eq!(record.size_original(), data.len() as u64);

        let restore = RestorePipeline::new(config(chunk_size), checksum_key(), true)
            .with_recipient(recipient);
        let destination = output(&dir);
        let outcome = restore
            .restore(&artifact, &destination, &record, &AtomicBool::new(false))
            .unwrap();

        prop_assert!(outcome.verified);
        prop_assert_eq!(&outcome.original_checksum, record.original_checksum());
        prop_assert_eq!(std::fs::read(&destination).unwrap(), data);
    }

    /// Flipping any stored byte of an encrypted artifact yields an error and
    /// no destination file.
    #[test]
    fn prop_tamper_detected(
        data in prop::collection::vec(any::<u8>(), 1..150_000),
        compress in any::<bool>(),
        position in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let dir = TempDir::new().unwrap();
        let recipient = Arc::new(RecipientKey::generate().unwrap());
        let toggles = StageToggles { compress, encrypt: true };
        let (artifact, record) = protect(dir.path(), &data, toggles, 65536, &recipient);

        let mut stored = std::fs::read(&artifact).unwrap();
        let offset = position.index(stored.len());
        stored[offset] ^= 1 << bit;
        std::fs::write(&artifact, &stored).unwrap();

        let restore = RestorePipeline::new(config(65536), checksum_key(), true)
            .with_recipient(recipient);
        let destination = output(&dir);
        let result = restore.restore(&artifact, &destination, &record, &AtomicBool::new(false));

        prop_assert!(matches!(
            result,
            Err(PipelineError::KeyExchange(_)) | Err(PipelineError::AuthenticationTag(_))
        ));
        prop_assert!(!destination.exists());
    }
}
