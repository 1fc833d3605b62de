use schemars::schema_for;

use crate::config::Settings;

/// Print the JSON Schema for `mayor/rigbeads.toml` to stdout.
pub fn run_schema() -> anyhow::Result<()> {
    let schema = schema_for!(Settings);
    let json = serde_json::to_string_pretty(&schema)?;
    println!("{json}");
    Ok(())
}
