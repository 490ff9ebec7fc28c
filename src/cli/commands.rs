//! CLI command definitions

use clap::Args;
use serde_json::Value as Json;

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Positional argument as JSON; repeat for more
    #[arg(long, value_parser = parse_json)]
    pub arg: Vec<Json>,

    /// Store override (key=JSON)
    #[arg(long, value_parser = parse_key_value)]
    pub set: Vec<(String, Json)>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Parse a JSON value, falling back to a bare string
pub fn parse_json(s: &str) -> Result<Json, String> {
    Ok(serde_json::from_str(s).unwrap_or_else(|_| Json::String(s.to_string())))
}

/// Parse key=JSON pairs
pub fn parse_key_value(s: &str) -> Result<(String, Json), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("Invalid key=value pair: {}", s))?;
    if key.is_empty() {
        return Err(format!("Missing key in: {}", s));
    }
    Ok((key.to_string(), parse_json(value)?))
}
