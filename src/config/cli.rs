use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the typecache binary.
#[derive(Debug, Parser)]
#[command(
    name = "typecache",
    version,
    about = "Inspect typecache envelopes and key templates"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "TYPECACHE_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath,
        global = true
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
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
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Decode an envelope and print the revived value tree.
    ///
    /// Timestamps are revived. No types are registered in the binary, so
    /// every tagged instance decodes as absent.
    Decode(DecodeArgs),
    /// Resolve a key template against a model, member and fields.
    Key(KeyArgs),
}

#[derive(Debug, Args, Clone)]
pub struct DecodeArgs {
    /// Envelope file; standard input when omitted.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: Option<PathBuf>,

    /// Pretty-print the decoded tree.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub pretty: bool,
}

#[derive(Debug, Args, Clone)]
pub struct KeyArgs {
    /// Template such as `{_model_}:{_fn_}:{id}`.
    #[arg(value_name = "TEMPLATE")]
    pub template: String,

    /// Value of `{_model_}`.
    #[arg(long, value_name = "NAME")]
    pub model: Option<String>,

    /// Value of `{_fn_}`.
    #[arg(long = "fn", value_name = "NAME")]
    pub function: Option<String>,

    /// Field value; dotted keys build nested objects.
    #[arg(long = "field", value_name = "KEY=VALUE", value_parser = parse_field)]
    pub fields: Vec<(String, String)>,
}

fn parse_field(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("field key is empty in `{raw}`"));
    }
    Ok((key.to_string(), value.to_string()))
}
