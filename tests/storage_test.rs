// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Persistent store integration tests: accounts, lines, and detections
//! against an on-disk sqlite file rather than the in-memory connection
//! used by the unit tests colocated with each module.
//!
//! Run with: `cargo test`

use chrono::Utc;

use coordinator::storage::accounts::Account;
use coordinator::storage::lines::{BaseLine, CrossLine, CrossLineMode, VerticalLineEquation};
use coordinator::storage::Store;

fn open_tmp_store() -> (Store, tempfile::TempPath) {
    let file = tempfile::NamedTempFile::new().expect("create tempfile");
    let path = file.into_temp_path();
    std::fs::remove_file(&path).ok();
    let store = Store::open(&path).expect("open store");
    (store, path)
}

#[test]
fn account_and_recovery_code_lifecycle_survives_reopen() {
    let (store, path) = open_tmp_store();

    store
        .create_account(&Account {
            id: "alice".into(),
            password_hash: "hash".into(),
            otp_secret: "SECRET".into(),
            use_otp: true,
        })
        .unwrap();
    store.store_hashed_recovery_codes("alice", &["hashedcode".into()]).unwrap();
    drop(store);

    let reopened = Store::open(&path).unwrap();
    let account = reopened.get_account_by_id("alice").unwrap();
    assert_eq!(account.otp_secret, "SECRET");
    assert_eq!(reopened.list_unused_recovery_hashes("alice").unwrap().len(), 1);
}

#[test]
fn line_reconciliation_round_trip() {
    let (store, _path) = open_tmp_store();

    let kept = CrossLine { index: 1, x1: 0, y1: 0, x2: 10, y2: 10, name: "keep".into(), mode: CrossLineMode::Right };
    let dropped = CrossLine { index: 2, x1: 0, y1: 0, x2: 5, y2: 5, name: "drop".into(), mode: CrossLineMode::Left };
    store.insert_line(&kept).unwrap();
    store.insert_line(&dropped).unwrap();

    store.replace_all_lines(&[kept.clone()]).unwrap();

    let remaining = store.select_all_lines().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].index, 1);
}

#[test]
fn full_teardown_clears_lines_baselines_and_equations() {
    let (store, _path) = open_tmp_store();

    store
        .insert_line(&CrossLine { index: 1, x1: 0, y1: 0, x2: 1, y2: 1, name: "l".into(), mode: CrossLineMode::Right })
        .unwrap();
    store.insert_baseline(&BaseLine { index: 1, matrix_num1: 1, matrix_num2: 2, x1: 0, y1: 0, x2: 1, y2: 1 }).unwrap();
    store.insert_vertical_equation(&VerticalLineEquation { index: 1, a: 1.0, b: 0.0 }).unwrap();

    store.delete_all_lines().unwrap();
    store.delete_all_baselines().unwrap();
    store.delete_all_vertical_equations().unwrap();

    assert!(store.select_all_lines().unwrap().is_empty());
    assert!(store.select_all_baselines().unwrap().is_empty());
    assert!(matches!(store.select_vertical_equation(1), Err(_)));
}

#[test]
fn detections_persist_across_reopen_and_filter_by_range() {
    let (store, path) = open_tmp_store();

    let t0 = Utc::now();
    store.insert_detection(b"frame-a", t0).unwrap();
    store.insert_detection(b"frame-b", t0 + chrono::Duration::hours(1)).unwrap();
    drop(store);

    let reopened = Store::open(&path).unwrap();
    let in_range = reopened
        .select_detections_between(t0 - chrono::Duration::minutes(1), t0 + chrono::Duration::minutes(1))
        .unwrap();
    assert_eq!(in_range.len(), 1);
    assert_eq!(in_range[0].image, b"frame-a");
}
