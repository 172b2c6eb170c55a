// `fieldsync set` — write one key and wait for it to be sent.

use anyhow::Context;
use clap::Args;
use fieldsync_client::EditIntent;
use fieldsync_common::path::FieldPath;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::connect::{self, GlobalArgs};
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct SetArgs {
    /// Document API path.
    pub doc: String,

    /// Field path (e.g. `summary.title`).
    pub path: String,

    /// New value. Parsed as JSON when it is valid JSON, stored as a string
    /// otherwise.
    pub value: String,

    /// Always store the value as a string.
    #[arg(long)]
    pub raw: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetResult {
    pub path: String,
    pub value: Value,
    pub previous: Value,
}

pub async fn run(args: SetArgs, global: &GlobalArgs, format: OutputFormat) -> anyhow::Result<()> {
    let path = FieldPath::parse(&args.path).context("invalid field path")?;
    let value = parse_value(&args.value, args.raw);

    let session = connect::open(global, &args.doc).await?;
    let snapshot = session.snapshot();
    connect::require_writable(&snapshot, &args.doc)?;
    let previous = path.get(&snapshot.store.data).cloned().unwrap_or(Value::Null);

    session
        .edit(EditIntent::UpdateKey { path: path.clone(), value: value.clone() })
        .await
        .with_context(|| format!("cannot set `{path}`"))?;
    // Disconnecting sends what the throttle is holding.
    session.shutdown().await;
    info!(%path, "value sent");

    let result = SetResult { path: args.path, value, previous };
    output::print_output(format, &result, |result| format!("{} = {}", result.path, result.value))?;
    Ok(())
}

fn parse_value(input: &str, raw: bool) -> Value {
    if raw {
        return Value::String(input.to_string());
    }
    serde_json::from_str(input).unwrap_or_else(|_| Value::String(input.to_string()))
}
