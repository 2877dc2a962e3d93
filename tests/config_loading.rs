//! Loading solver settings and parameter controls from JSON.

use lmsvd_rs::lm::LmConfig;
use lmsvd_rs::parameters::ConstraintSet;
use lmsvd_rs::LmSvdError;

#[test]
fn test_config_from_file() {
    let path = std::env::temp_dir().join(format!("lmsvd-config-{}.json", std::process::id()));
    std::fs::write(
        &path,
        r#"{
            "xtol": 1e-3,
            "svd_threshold": 1e-10,
            "regularize": true,
            "regularization_scale": 0.5,
            "worker": 17
        }"#,
    )
    .unwrap();

    let config = LmConfig::from_json_file(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(config.xtol, 1e-3);
    assert_eq!(config.svd_threshold, 1e-10);
    assert!(config.regularize);
    assert_eq!(config.regularization_scale, 0.5);
    assert_eq!(config.worker, 17);
    assert_eq!(config.max_reject, LmConfig::default().max_reject);
}

#[test]
fn test_missing_config_file() {
    let result = LmConfig::from_json_file("/nonexistent/lmsvd.json");
    assert!(matches!(result, Err(LmSvdError::IoError(_))));
}

#[test]
fn test_malformed_config() {
    let result = LmConfig::from_json_str(r#"{"xtol": "small"}"#);
    assert!(matches!(result, Err(LmSvdError::JsonError(_))));
}

#[test]
fn test_constraints_from_json() {
    let set = ConstraintSet::from_json_str(
        r#"[
            {"bounds": {"min": 2500.0, "max": 50000.0},
             "capped": true, "max_change": {"lower": 1500.0, "upper": 1500.0},
             "scale": 1000.0, "group": 0},
            {"bounds": {"min": 0.0, "max": 3.141592653589793}, "cyclic": true, "group": 3},
            {"bounds": {"min": null, "max": null}}
        ]"#,
    )
    .unwrap();

    assert_eq!(set.len(), 3);
    assert_eq!(set.controls()[0].scale, 1000.0);
    assert!(set.controls()[0].capped);
    assert!(set.controls()[1].cyclic);
    assert!(set.controls()[2].bounds.min.is_infinite());
    assert!(set.groups().is_split());
    assert_eq!(set.groups().len(), 2);
}

#[test]
fn test_invalid_controls_are_rejected() {
    let result = ConstraintSet::from_json_str(r#"[{"bounds": {"min": 1.0, "max": 0.0}}]"#);
    assert!(result.is_err());

    let result = ConstraintSet::from_json_str(r#"[{"scale": 0.0}]"#);
    assert!(matches!(result, Err(LmSvdError::BoundsError(_))));
}
