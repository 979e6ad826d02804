use std::path::{Path, PathBuf};
use std::time::Duration;

use shelf::config::{ENV_FILENAME, ENV_LOCKFILE, ENV_POLL_MS, ENV_PROTOCOL, ENV_WRITEBACK};
use shelf::{Protocol, ShelfConfig, ShelfError, StoreOptions};

#[test]
fn defaults() {
    let config = ShelfConfig::new();
    assert!(matches!(config.store_path(), Err(ShelfError::Configuration(_))));
    assert!(matches!(config.lock_path(), Err(ShelfError::Configuration(_))));
    assert_eq!(config.protocol(), Protocol::Compact);
    assert!(!config.writeback());
    assert_eq!(config.poll_interval(), Duration::from_millis(20));
    assert_eq!(config.store_options(), StoreOptions::default());
}

#[test]
fn lock_file_defaults_to_store_path_plus_suffix() {
    let config = ShelfConfig::new().with_store_path("/var/lib/app/data.db");
    assert_eq!(config.store_path().unwrap(), Path::new("/var/lib/app/data.db"));
    assert_eq!(
        config.lock_path().unwrap(),
        PathBuf::from("/var/lib/app/data.db.lock")
    );

    let config = config.with_lock_path("/run/app.lock");
    assert_eq!(config.lock_path().unwrap(), PathBuf::from("/run/app.lock"));
}

#[test]
fn reads_every_variable() {
    let config = ShelfConfig::from_vars(vec![
        (ENV_FILENAME, "data.db"),
        (ENV_LOCKFILE, "other.lock"),
        (ENV_PROTOCOL, "pretty"),
        (ENV_WRITEBACK, "yes"),
        (ENV_POLL_MS, "7"),
        ("UNRELATED", "ignored"),
    ])
    .unwrap();

    assert_eq!(config.store_path().unwrap(), Path::new("data.db"));
    assert_eq!(config.lock_path().unwrap(), PathBuf::from("other.lock"));
    assert_eq!(config.protocol(), Protocol::Pretty);
    assert!(config.writeback());
    assert_eq!(config.poll_interval(), Duration::from_millis(7));
}

#[test]
fn empty_store_path_counts_as_missing() {
    let config = ShelfConfig::from_vars(vec![(ENV_FILENAME, "")]).unwrap();
    assert!(matches!(config.store_path(), Err(ShelfError::Configuration(_))));
}

#[test]
fn writeback_flags() {
    for (value, expected) in &[("1", true), ("TRUE", true), ("off", false), ("0", false)] {
        let config = ShelfConfig::from_vars(vec![(ENV_WRITEBACK, *value)]).unwrap();
        assert_eq!(config.writeback(), *expected, "SHELF_WRITEBACK={}", value);
    }
}

#[test]
fn invalid_values_are_configuration_errors() {
    for (name, value) in &[
        (ENV_WRITEBACK, "maybe"),
        (ENV_POLL_MS, "soon"),
        (ENV_POLL_MS, "-5"),
        (ENV_PROTOCOL, "pickle"),
    ] {
        let result = ShelfConfig::from_vars(vec![(*name, *value)]);
        assert!(
            matches!(result, Err(ShelfError::Configuration(_))),
            "{}={} should be rejected",
            name,
            value
        );
    }
}
