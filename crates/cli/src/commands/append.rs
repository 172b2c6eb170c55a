// `fieldsync append` — add text to the end of a text field as a live
// text edit, so concurrent editors are rebased rather than overwritten.

use anyhow::{bail, Context};
use clap::Args;
use fieldsync_client::EditIntent;
use fieldsync_common::change::ChangeSet;
use fieldsync_common::path::FieldPath;
use serde::Serialize;
use serde_json::Value;

use crate::connect::{self, GlobalArgs};
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct AppendArgs {
    /// Document API path.
    pub doc: String,

    /// Path of a text field.
    pub path: String,

    /// Text to append.
    pub text: String,

    /// Start the appended text on a new line.
    #[arg(long)]
    pub newline: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppendResult {
    pub path: String,
    pub at: usize,
    pub inserted: String,
}

pub async fn run(args: AppendArgs, global: &GlobalArgs, format: OutputFormat) -> anyhow::Result<()> {
    let path = FieldPath::parse(&args.path).context("invalid field path")?;

    let session = connect::open(global, &args.doc).await?;
    let snapshot = session.snapshot();
    connect::require_writable(&snapshot, &args.doc)?;
    let current = current_text(path.get(&snapshot.store.data), &path)?;
    let (changes, at, inserted) = append_change(&current, &args.text, args.newline)?;

    session
        .edit(EditIntent::UpdateText { path: path.clone(), changes, selection: None })
        .await
        .with_context(|| format!("cannot append to `{path}`"))?;
    session.shutdown().await;

    let result = AppendResult { path: args.path, at, inserted };
    output::print_output(format, &result, |result| {
        format!("appended {} characters to {}", result.inserted.chars().count(), result.path)
    })?;
    Ok(())
}

/// Missing and null fields read as empty text.
fn current_text(value: Option<&Value>, path: &FieldPath) -> anyhow::Result<String> {
    match value {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(text)) => Ok(text.clone()),
        Some(_) => bail!("`{path}` is not a text field"),
    }
}

fn append_change(
    current: &str,
    text: &str,
    newline: bool,
) -> anyhow::Result<(ChangeSet, usize, String)> {
    let at = current.chars().count();
    let inserted = if newline && !current.is_empty() && !current.ends_with('\n') {
        format!("\n{text}")
    } else {
        text.to_string()
    };
    let changes = ChangeSet::insert(at, at, &inserted)?;
    Ok((changes, at, inserted))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn appends_at_end_in_characters() {
        let (changes, at, _) = append_change("héllo", "!", false).unwrap();
        assert_eq!(at, 5);
        assert_eq!(changes.apply("héllo").unwrap(), "héllo!");
    }

    #[test]
    fn newline_flag_separates_lines() {
        let (changes, _, inserted) = append_change("one", "two", true).unwrap();
        assert_eq!(inserted, "\ntwo");
        assert_eq!(changes.apply("one").unwrap(), "one\ntwo");

        let (_, _, inserted) = append_change("", "first", true).unwrap();
        assert_eq!(inserted, "first");
    }

    #[test]
    fn non_text_fields_are_refused() {
        let path = FieldPath::parse("count").unwrap();
        assert!(current_text(Some(&json!(3)), &path).is_err());
        assert_eq!(current_text(None, &path).unwrap(), "");
        assert_eq!(current_text(Some(&Value::Null), &path).unwrap(), "");
    }
}
