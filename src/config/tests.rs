use std::io::Write;

use super::*;
use crate::cache::CacheConfig;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("info".to_string());
    raw.cache.default_ttl_seconds = Some(60);

    let overrides = GlobalOverrides {
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.cache.default_ttl_seconds, 60);
}

#[test]
fn cache_defaults_match_cache_config() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
    let from_settings = CacheConfig::from(&settings.cache);
    let defaults = CacheConfig::default();

    assert_eq!(from_settings.default_ttl_seconds, defaults.default_ttl_seconds);
    assert_eq!(from_settings.memory_capacity, defaults.memory_capacity);
    assert_eq!(from_settings.read_failure, defaults.read_failure);
    assert_eq!(from_settings.coalesce_misses, defaults.coalesce_misses);
}

#[test]
fn zero_memory_capacity_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.memory_capacity = Some(0);

    let err = Settings::from_raw(raw).expect_err("zero capacity");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.memory_capacity",
            ..
        }
    ));
}

#[test]
fn unknown_read_failure_policy_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.read_failure = Some("retry".to_string());

    let err = Settings::from_raw(raw).expect_err("unknown policy");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.read_failure",
            ..
        }
    ));
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = GlobalOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn config_file_is_layered_under_cli_flags() {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    writeln!(
        file,
        "[logging]\nlevel = \"warn\"\n\n[cache]\ndefault_ttl_seconds = 30\nread_failure = \"miss\"\ncoalesce_misses = true"
    )
    .expect("write config");

    let path = file.path().to_string_lossy().into_owned();
    let args = CliArgs::try_parse_from([
        "typecache",
        "--config-file",
        path.as_str(),
        "--log-level",
        "trace",
        "key",
        "{_model_}",
    ])
    .expect("parse args");

    let settings = load(&args).expect("load settings");
    assert_eq!(settings.logging.level, LevelFilter::TRACE);
    assert_eq!(settings.cache.default_ttl_seconds, 30);
    assert_eq!(settings.cache.read_failure, ReadFailurePolicy::Miss);
    assert!(settings.cache.coalesce_misses);
}

#[test]
fn parse_decode_arguments() {
    let args = CliArgs::try_parse_from(["typecache", "decode", "envelope.json", "--pretty"])
        .expect("parse args");

    match args.command {
        Command::Decode(decode) => {
            assert_eq!(
                decode.file.as_deref(),
                Some(std::path::Path::new("envelope.json"))
            );
            assert!(decode.pretty);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn parse_key_arguments() {
    let args = CliArgs::try_parse_from([
        "typecache",
        "key",
        "{_model_}:{_fn_}:{owner.id}",
        "--model",
        "User",
        "--fn",
        "fullName",
        "--field",
        "owner.id=7",
        "--log-json",
        "true",
    ])
    .expect("parse args");

    assert_eq!(args.overrides.log_json, Some(true));
    match args.command {
        Command::Key(key) => {
            assert_eq!(key.template, "{_model_}:{_fn_}:{owner.id}");
            assert_eq!(key.model.as_deref(), Some("User"));
            assert_eq!(key.function.as_deref(), Some("fullName"));
            assert_eq!(key.fields, vec![("owner.id".to_string(), "7".to_string())]);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn cache_settings_are_file_only() {
    let err = CliArgs::try_parse_from(["typecache", "--cache-read-failure", "miss", "key", "{id}"])
        .expect_err("no cache flags");
    assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
}

#[test]
fn malformed_field_arguments_are_rejected() {
    let err = CliArgs::try_parse_from(["typecache", "key", "{id}", "--field", "id"])
        .expect_err("missing `=`");
    assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
}
