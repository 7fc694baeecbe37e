use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::io::Write;
use std::process::Command;

fn export() -> tempfile::NamedTempFile {
    let mut csv = tempfile::NamedTempFile::new().unwrap();
    writeln!(csv, "provider, reference, outcome, amount").unwrap();
    writeln!(csv, "paystack, ps_ref_1, success, 100.0").unwrap();
    csv
}

#[cfg(not(feature = "storage-rocksdb"))]
#[test]
fn test_rocksdb_fallback_warning() {
    let csv = export();

    let mut cmd = Command::new(cargo_bin!("orderdesk"));
    cmd.arg("--db-path").arg("some_db").arg("reconcile").arg(csv.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("paystack,ps_ref_1,,unmatched"))
        .stderr(predicate::str::contains("WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."));
}

#[cfg(feature = "storage-rocksdb")]
#[test]
fn test_rocksdb_no_fallback_warning() {
    let csv = export();
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    let mut cmd = Command::new(cargo_bin!("orderdesk"));
    cmd.arg("--db-path").arg(&db_path).arg("reconcile").arg(csv.path());

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("WARNING").not());
}
