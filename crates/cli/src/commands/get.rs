// `fieldsync get` — print one field of the document.

use anyhow::Context;
use clap::Args;
use fieldsync_common::path::FieldPath;
use serde::Serialize;
use serde_json::Value;

use crate::connect::{self, GlobalArgs};
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct GetArgs {
    /// Document API path (e.g. `api/reports/42`).
    pub doc: String,

    /// Field path (e.g. `findings.[0].title`). Prints the whole document
    /// when omitted.
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GetResult {
    pub path: Option<String>,
    pub version: u64,
    pub value: Value,
}

pub async fn run(args: GetArgs, global: &GlobalArgs, format: OutputFormat) -> anyhow::Result<()> {
    let path = args
        .path
        .as_deref()
        .map(FieldPath::parse)
        .transpose()
        .context("invalid field path")?;

    let session = connect::open(global, &args.doc).await?;
    let snapshot = session.snapshot();
    session.shutdown().await;

    let value = match &path {
        Some(path) => path.get(&snapshot.store.data).cloned().unwrap_or(Value::Null),
        None => snapshot.store.data,
    };
    let result = GetResult { path: args.path, version: snapshot.store.version, value };
    output::print_output(format, &result, format_human)?;
    Ok(())
}

fn format_human(result: &GetResult) -> String {
    match &result.value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn result(value: Value) -> GetResult {
        GetResult { path: Some("title".into()), version: 3, value }
    }

    #[test]
    fn human_output_prints_strings_raw() {
        assert_eq!(format_human(&result(json!("Draft"))), "Draft");
    }

    #[test]
    fn human_output_prints_structures_as_json() {
        let text = format_human(&result(json!({"a": 1})));
        assert_eq!(serde_json::from_str::<Value>(&text).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn missing_field_prints_nothing() {
        assert_eq!(format_human(&result(Value::Null)), "");
    }
}
