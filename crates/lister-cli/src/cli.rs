//! Command-line arguments for `lister`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use colorchoice_clap::Color;
use lister_model::SearchMode;

#[derive(Parser)]
#[command(
    name = "lister",
    version,
    about = "Fetch and search remote option lists defined as presets",
    long_about = "Fetch and search remote option lists defined as presets.\n\n\
                  Presets are read from a TOML or JSON config file and describe\n\
                  the endpoint, the array to extract and how items map to options."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Adjust log verbosity (-v for info, -vv for debug, -q for errors only).
    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    /// Control ANSI color output (auto, always, never).
    #[command(flatten)]
    pub color: Color,

    /// Explicit log level (overrides -v/-q flags).
    #[arg(long = "log-level", value_enum, global = true)]
    pub log_level: Option<LogLevelArg>,

    /// Log output format.
    #[arg(
        long = "log-format",
        value_enum,
        default_value = "pretty",
        global = true
    )]
    pub log_format: LogFormatArg,

    /// Write logs to a file instead of stderr.
    #[arg(long = "log-file", value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// List the presets defined in the config file.
    Presets(PresetsArgs),

    /// Run one fetch for a preset and print the mapped options.
    Fetch(FetchArgs),

    /// Open a session for a preset and print the options visible for a query.
    Search(SearchArgs),
}

#[derive(Args)]
pub struct ConfigArg {
    /// Path to the preset config (TOML, or JSON with a .json extension).
    #[arg(long = "config", short = 'c', value_name = "PATH", default_value = "lister.toml")]
    pub path: PathBuf,
}

#[derive(Args)]
pub struct PresetsArgs {
    #[command(flatten)]
    pub config: ConfigArg,
}

#[derive(Args)]
pub struct FetchArgs {
    #[command(flatten)]
    pub config: ConfigArg,

    /// Preset kind to fetch.
    #[arg(value_name = "KIND")]
    pub kind: String,

    /// Filter passed to the request as `key=value` (repeatable).
    ///
    /// The value is parsed as JSON when possible, otherwise taken as a string.
    #[arg(long = "filter", short = 'f', value_name = "KEY=VALUE", value_parser = parse_filter)]
    pub filters: Vec<(String, serde_json::Value)>,

    /// Query sent under the preset's search parameter.
    #[arg(long = "query", default_value = "")]
    pub query: String,

    /// Pagination cursor, parsed like a filter value.
    #[arg(long = "cursor", value_name = "VALUE", value_parser = parse_value)]
    pub cursor: Option<serde_json::Value>,

    /// Output format for the options.
    #[arg(long = "format", value_enum, default_value = "table")]
    pub format: OutputFormatArg,
}

#[derive(Args)]
pub struct SearchArgs {
    #[command(flatten)]
    pub fetch: FetchArgs,

    /// Where the query is applied (defaults to the config's search mode).
    #[arg(long = "mode", value_enum)]
    pub mode: Option<SearchModeArg>,

    /// Compare the query against this field only.
    #[arg(long = "subject", value_name = "FIELD")]
    pub subject: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormatArg {
    Table,
    Json,
    Csv,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum SearchModeArg {
    Local,
    Remote,
    Hybrid,
}

impl From<SearchModeArg> for SearchMode {
    fn from(arg: SearchModeArg) -> Self {
        match arg {
            SearchModeArg::Local => SearchMode::Local,
            SearchModeArg::Remote => SearchMode::Remote,
            SearchModeArg::Hybrid => SearchMode::Hybrid,
        }
    }
}

/// CLI log level choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// CLI log format choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Compact,
    Json,
}

/// Parse `key=value`, reading the value as JSON when it parses.
pub fn parse_filter(raw: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("filter `{raw}` has an empty key"));
    }
    Ok((key.to_string(), parse_value(value)?))
}

/// JSON when it parses, otherwise the raw text.
pub fn parse_value(raw: &str) -> Result<serde_json::Value, String> {
    Ok(serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string())))
}
