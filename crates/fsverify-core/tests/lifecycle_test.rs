//! End-to-end lifecycle tests: create, write, check, tamper, delete.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

use fsverify_config::testing::TestEnvironment;
use fsverify_config::FileConfig;
use fsverify_core::{
    CheckOutcome, Deletion, Directory, ErrorKind, OsRandom, Sequence, VerifyError,
};

fn tamper(path: &Path, pos: u64) {
    let file = OpenOptions::new().read(true).write(true).open(path).unwrap();
    let mut byte = [0u8; 1];
    file.read_exact_at(&mut byte, pos).unwrap();
    byte[0] = byte[0].wrapping_add(1);
    file.write_all_at(&byte, pos).unwrap();
}

#[test]
fn test_deadbeef_scenario() {
    let env = TestEnvironment::new().unwrap().with_immediate_check();
    let dir = Directory::create(env.create_dir("scenario").unwrap()).unwrap();

    let file = dir
        .create_file(&env.files, &mut || 0xDEADBEEFu32)
        .unwrap();
    assert_eq!(file.name(), "deadbeef");
    assert!((1024..=5119).contains(&file.target_size()));

    let mut guard = file.lock().unwrap();
    let report = guard.write(&env.files).unwrap();
    assert_eq!(report.bytes_written, file.target_size());
    assert!(matches!(report.immediate, Some(CheckOutcome::Clean { .. })));
    assert_eq!(guard.state().check_count, 1);

    let outcome = guard.check().unwrap();
    assert_eq!(outcome, CheckOutcome::Clean { bytes: file.target_size() });
    assert_eq!(guard.state().check_count, 2);
    assert!(!guard.state().has_error);
}

#[test]
fn test_write_then_check_round_trip() {
    let env = TestEnvironment::new().unwrap();
    let config = FileConfig::new(10, 14, false);
    let dir = Directory::create(env.create_dir("roundtrip").unwrap()).unwrap();

    for _ in 0..20 {
        let file = dir.create_file(&config, &mut OsRandom).unwrap();
        let mut guard = file.lock().unwrap();
        guard.write(&config).unwrap();

        assert_eq!(fs::metadata(file.path()).unwrap().len(), file.target_size());
        assert!(matches!(guard.check().unwrap(), CheckOutcome::Clean { .. }));
        assert!(!guard.state().has_error);
    }
}

#[test]
fn test_tampered_byte_is_detected_and_file_is_kept() {
    let env = TestEnvironment::new().unwrap();
    let dir = Directory::create(env.create_dir("tamper").unwrap()).unwrap();
    let file = dir
        .create_file(&env.files, &mut Sequence::new([0, 512, 0x0BADF00D]))
        .unwrap();

    let mut guard = file.lock().unwrap();
    guard.write(&env.files).unwrap();
    tamper(file.path(), 700);

    let err = guard.check().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Corruption);
    match err {
        VerifyError::Corruption {
            offset, mismatches, ..
        } => {
            assert_eq!(offset, 0);
            assert_eq!(mismatches, 1);
        }
        other => panic!("unexpected error {other}"),
    }
    assert!(guard.state().has_error);
    assert_eq!(guard.state().check_count, 1);

    // Quarantined: further checks are free and do not count
    assert_eq!(guard.check().unwrap(), CheckOutcome::Skipped);
    assert_eq!(guard.check().unwrap(), CheckOutcome::Skipped);
    assert_eq!(guard.state().check_count, 1);

    // Refused: the evidence stays on disk and in the chain
    assert_eq!(guard.delete().unwrap(), Deletion::Refused);
    assert!(file.path().exists());
    assert_eq!(dir.len().unwrap(), 1);

    let summary = dir.delete_all().unwrap();
    assert_eq!(summary.refused, 1);
    assert_eq!(summary.removed, 0);
    assert!(file.path().exists());
    assert!(dir.is_empty().unwrap());
}

#[test]
fn test_names_never_collide() {
    let env = TestEnvironment::new().unwrap();
    let dir = Directory::create(env.create_dir("names").unwrap()).unwrap();

    // A narrow id space forces the exclusive-create retry path.
    let mut counter = 0u32;
    let mut narrow = move || {
        counter = counter.wrapping_add(0x9E37_79B9);
        counter % 300
    };

    let mut names = HashSet::new();
    for _ in 0..200 {
        let file = dir.create_file(&FileConfig::new(10, 10, false), &mut narrow).unwrap();
        assert!(names.insert(file.name().to_string()), "duplicate {}", file.name());
    }
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 200);
    assert_eq!(dir.len().unwrap(), 200);
}

#[test]
fn test_size_bound_for_fixed_exponent() {
    let env = TestEnvironment::new().unwrap();
    let config = FileConfig::new(10, 10, false);
    let dir = Directory::create(env.create_dir("sizes").unwrap()).unwrap();

    for _ in 0..100 {
        let file = dir.create_file(&config, &mut OsRandom).unwrap();
        assert!(
            (1024..=1024 + 4095).contains(&file.target_size()),
            "size {} out of range",
            file.target_size()
        );
    }
}

#[test]
fn test_delete_removes_from_storage_and_chain() {
    let env = TestEnvironment::new().unwrap();
    let dir = Directory::create(env.create_dir("delete").unwrap()).unwrap();
    let file = dir.create_file(&env.files, &mut OsRandom).unwrap();
    file.lock().unwrap().write(&env.files).unwrap();

    assert_eq!(file.lock().unwrap().delete().unwrap(), Deletion::Removed);
    assert!(!file.path().exists());
    assert!(dir.get(file.id()).unwrap().is_none());
}
