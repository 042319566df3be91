use std::io::Write;

use clap::Parser;

use super::*;

#[test]
fn defaults_apply_without_sources() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert!(matches!(settings.logging.format, LogFormat::Compact));
    assert_eq!(settings.sync.search_debounce, Duration::from_millis(300));
    assert_eq!(settings.sync.stale_time, Duration::from_secs(30));
    assert_eq!(settings.sync.comment_page_size.get(), 20);
    assert!(settings.fixture.path.is_none());
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.sync.search_debounce_ms = Some(500);
    raw.logging.level = Some("info".to_string());

    let overrides = Overrides {
        search_debounce_ms: Some(150),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.sync.search_debounce, Duration::from_millis(150));
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn zero_debounce_is_rejected() {
    let mut raw = RawSettings::default();
    raw.sync.search_debounce_ms = Some(0);

    let err = Settings::from_raw(raw).expect_err("zero debounce rejected");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "sync.search_debounce_ms",
            ..
        }
    ));
}

#[test]
fn zero_page_size_is_rejected() {
    let mut raw = RawSettings::default();
    raw.sync.comment_page_size = Some(0);
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn unknown_log_level_is_rejected() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("chatty".to_string());
    let err = Settings::from_raw(raw).expect_err("bad level");
    assert!(err.to_string().contains("logging.level"));
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = Overrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn config_file_is_layered_under_cli() {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp file");
    writeln!(
        file,
        "[sync]\nsearch_debounce_ms = 450\ncomment_page_size = 5\n\n[fixture]\npath = \"feeds.json\""
    )
    .expect("write config");

    let path = file.path().to_string_lossy().into_owned();
    let args = CliArgs::parse_from([
        "shelfsync",
        "--config-file",
        path.as_str(),
        "--comment-page-size",
        "7",
        "search",
        "dune",
    ]);
    let settings = load(&args).expect("settings load");

    assert_eq!(settings.sync.search_debounce, Duration::from_millis(450));
    assert_eq!(settings.sync.comment_page_size.get(), 7);
    assert_eq!(
        settings.fixture.path.as_deref(),
        Some(std::path::Path::new("feeds.json"))
    );
}

#[test]
fn parse_search_arguments() {
    let args = CliArgs::parse_from([
        "shelfsync",
        "search",
        "dune",
        "--fixture",
        "/tmp/fixture.json",
        "--keystroke-ms",
        "20",
    ]);

    assert_eq!(
        args.overrides.fixture.as_deref(),
        Some(std::path::Path::new("/tmp/fixture.json"))
    );
    match args.command {
        Command::Search(search) => {
            assert_eq!(search.query, "dune");
            assert_eq!(search.keystroke_ms, 20);
            assert!(!search.all_pages);
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_like_arguments() {
    let args = CliArgs::parse_from(["shelfsync", "like", "42", "--undo"]);

    match args.command {
        Command::Like(like) => {
            assert_eq!(like.review_id, "42");
            assert!(like.undo);
        }
        _ => panic!("wrong command parsed"),
    }
}
