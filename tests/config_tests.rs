// SPDX-FileCopyrightText: 2025 RAprogramm
// SPDX-License-Identifier: MIT

use std::{
    env::{remove_var, set_var},
    fs,
    sync::Mutex
};

use focus_conformance_engine::config::{ApplicabilitySelection, Config};

static ENV_GUARD: Mutex<()> = Mutex::new(());

#[test]
fn test_default_config() {
    let _guard = ENV_GUARD.lock().unwrap();
    let config = Config::default();
    assert_eq!(config.engine.table_name, "focus_data");
    assert!(config.engine.dataset.is_none());
    assert!(!config.engine.stop_on_first_error);
}

#[test]
fn test_applicability_selection_defaults_to_all() {
    let _guard = ENV_GUARD.lock().unwrap();
    let config = Config::default();
    assert!(matches!(
        config.engine.applicability_selection(),
        ApplicabilitySelection::All
    ));
}

#[test]
fn test_applicability_selection_honors_explicit_tags() {
    let _guard = ENV_GUARD.lock().unwrap();
    let mut config = Config::default();
    config.engine.applicability.active = vec!["SupportsPublicPriceList".to_string()];
    match config.engine.applicability_selection() {
        ApplicabilitySelection::Tags(tags) => {
            assert!(tags.contains("SupportsPublicPriceList"));
        }
        ApplicabilitySelection::All => panic!("expected explicit tag selection")
    }
}

#[test]
fn test_env_vars_override_defaults() {
    let _guard = ENV_GUARD.lock().unwrap();
    unsafe {
        set_var("FOCUS_TABLE_NAME", "custom_table");
        set_var("FOCUS_DATASET", "BillingAccount");
        set_var("FOCUS_STOP_ON_FIRST_ERROR", "true");
    }

    let dir = tempfile::tempdir().unwrap();
    let prev = std::env::current_dir().unwrap();
    std::env::set_current_dir(dir.path()).unwrap();

    let config = Config::load().unwrap();

    std::env::set_current_dir(prev).unwrap();

    assert_eq!(config.engine.table_name, "custom_table");
    assert_eq!(config.engine.dataset.as_deref(), Some("BillingAccount"));
    assert!(config.engine.stop_on_first_error);

    unsafe {
        remove_var("FOCUS_TABLE_NAME");
        remove_var("FOCUS_DATASET");
        remove_var("FOCUS_STOP_ON_FIRST_ERROR");
    }
}

#[test]
fn test_local_config_file_is_loaded() {
    let _guard = ENV_GUARD.lock().unwrap();
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join(".focus-validator.toml"),
        "[engine]\ntable_name = \"from_file\"\n"
    )
    .unwrap();

    let prev = std::env::current_dir().unwrap();
    std::env::set_current_dir(dir.path()).unwrap();
    let config = Config::load().unwrap();
    std::env::set_current_dir(prev).unwrap();

    assert_eq!(config.engine.table_name, "from_file");
}
