use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the shelfsync binary.
#[derive(Debug, Parser)]
#[command(
    name = "shelfsync",
    version,
    about = "Drive the reading-app sync layer against a fixture backend"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "SHELFSYNC_CONFIG_FILE",
        value_name = "PATH",
        global = true
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Type a query keystroke by keystroke and print the committed results.
    Search(SearchArgs),
    /// Like a review and print every feed's copy of it.
    Like(LikeArgs),
}

#[derive(Debug, Args, Clone)]
pub struct SearchArgs {
    /// Search text.
    #[arg(value_name = "QUERY")]
    pub query: String,

    /// Delay between simulated keystrokes.
    #[arg(long = "keystroke-ms", default_value_t = 80, value_name = "MILLIS")]
    pub keystroke_ms: u64,

    /// Also load every following page of results.
    #[arg(long = "all-pages", action = clap::ArgAction::SetTrue)]
    pub all_pages: bool,
}

#[derive(Debug, Args, Clone)]
pub struct LikeArgs {
    /// Review to like.
    #[arg(value_name = "REVIEW_ID")]
    pub review_id: String,

    /// Unlike instead of like.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub undo: bool,
}

#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Override the fixture document served as the backend.
    #[arg(long = "fixture", value_name = "PATH", value_hint = ValueHint::FilePath, global = true)]
    pub fixture: Option<PathBuf>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override the search debounce delay.
    #[arg(long = "search-debounce-ms", value_name = "MILLIS", global = true)]
    pub search_debounce_ms: Option<u64>,

    /// Override how long fetched data counts as fresh.
    #[arg(long = "stale-time-ms", value_name = "MILLIS", global = true)]
    pub stale_time_ms: Option<u64>,

    /// Override the comment page size requested from the backend.
    #[arg(long = "comment-page-size", value_name = "COUNT", global = true)]
    pub comment_page_size: Option<u32>,
}
