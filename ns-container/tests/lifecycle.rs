//! End-to-end namespace lifecycle tests.
//!
//! These exercise real `mount`/`unshare`/`setns` syscalls and require
//! `CAP_SYS_ADMIN` (typically: run as root, or under `unshare --user --map-root-user`).
//! They're marked `#[ignore]` so the default test run stays sandbox-friendly;
//! run explicitly with:
//!
//!   cargo test -p ns-container --test lifecycle -- --ignored --test-threads=1

use std::collections::HashMap;

use ns_container::config::NamespaceConfig;
use ns_container::engine;
use ns_container::error::NsError;

fn config_for(basepath: &std::path::Path) -> NamespaceConfig {
    let mut map = HashMap::new();
    map.insert("namespace.basepath".to_string(), basepath.display().to_string());
    map.insert("namespace.auto_basepath".to_string(), "true".to_string());
    NamespaceConfig::from_map(&map).unwrap()
}

#[test]
#[ignore]
fn create_join_delete_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config_for(tmp.path());

    engine::prepare_base(&config).expect("prepare_base");

    engine::create(&config, 42).expect("first create");
    engine::join(&config, 42, 1000).expect("join");
    assert!(config.job_mount(42).join(".active").exists());

    engine::delete(&config, 42).expect("delete");
    assert!(!config.job_mount(42).exists());

    let err = engine::join(&config, 42, 1000).unwrap_err();
    assert!(matches!(err, NsError::Io { .. }));

    engine::teardown_base(&config).expect("teardown_base");
}

#[test]
#[ignore]
fn second_create_is_idempotent_iff_active() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config_for(tmp.path());
    engine::prepare_base(&config).expect("prepare_base");

    engine::create(&config, 7).expect("first create");
    engine::join(&config, 7, 1000).expect("join marks .active");

    engine::create(&config, 7).expect("second create observes .active and succeeds");

    engine::delete(&config, 7).expect("cleanup");
    engine::teardown_base(&config).expect("teardown_base");
}

#[test]
#[ignore]
fn repeat_delete_reports_namespace_broken() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config_for(tmp.path());
    engine::prepare_base(&config).expect("prepare_base");

    engine::create(&config, 99).expect("create");
    engine::delete(&config, 99).expect("first delete");

    let err = engine::delete(&config, 99).unwrap_err();
    assert!(matches!(err, NsError::NamespaceBroken(99)));

    engine::teardown_base(&config).expect("teardown_base");
}
