//! Tests for error types

use std::io;
use std::path::PathBuf;

use run_ledger::Error;

#[test]
fn test_store_corrupt_error() {
    let source = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
    let error = Error::StoreCorrupt {
        path: PathBuf::from("/runs/ledger.json"),
        source,
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("/runs/ledger.json"));
    assert!(error_str.contains("is corrupt"));
    assert!(error_str.contains("Restore it from a backup"));
}

#[test]
fn test_unsupported_type_error() {
    let error = Error::UnsupportedType("a map of string to integer".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Unsupported type shape"));
    assert!(error_str.contains("a map of string to integer"));
}

#[test]
fn test_type_mismatch_error() {
    let error = Error::TypeMismatch {
        path: "$.metrics[0].value".to_string(),
        expected: "a float".to_string(),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("Type mismatch"));
    assert!(error_str.contains("$.metrics[0].value"));
    assert!(error_str.contains("a float"));
}

#[test]
fn test_io_error_conversion() {
    let io_error = io::Error::new(io::ErrorKind::TimedOut, "lock wait exceeded");
    let error: Error = io_error.into();
    assert!(matches!(error, Error::Io(ref e) if e.kind() == io::ErrorKind::TimedOut));
    assert!(format!("{error}").contains("IO error"));
}

#[test]
fn test_invalid_pattern_conversion() {
    let regex_error = regex::Regex::new("(").unwrap_err();
    let error: Error = regex_error.into();
    assert!(format!("{error}").contains("Invalid name pattern"));
}

#[test]
fn test_invalid_config_error() {
    let error = Error::InvalidConfig {
        path: PathBuf::from(".runs/config.json"),
        reason: "expected a string".to_string(),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("Invalid configuration"));
    assert!(error_str.contains(".runs/config.json"));
}

#[test]
fn test_invalid_ignore_file_error() {
    let error = Error::InvalidIgnoreFile {
        path: PathBuf::from(".gitignore"),
        reason: "unclosed character class".to_string(),
    };
    assert!(format!("{error}").contains("Invalid ignore file .gitignore"));
}

#[test]
fn test_duplicate_name_error() {
    let error = Error::DuplicateName("run `exp` exists".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Duplicate name"));
    assert!(error_str.contains("run `exp` exists"));
}

#[test]
fn test_walk_error() {
    let error = Error::Walk("loop detected".to_string());
    assert!(format!("{error}").contains("Directory walk failed"));
}

#[test]
fn test_error_debug_format() {
    let error = Error::DuplicateName("debug".to_string());
    assert!(format!("{error:?}").contains("DuplicateName"));
}
