// `fieldsync watch` — follow a document until interrupted.

use anyhow::Context;
use clap::Args;
use fieldsync_client::{ConnectionState, SessionSnapshot};
use fieldsync_common::path::FieldPath;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::connect::{self, GlobalArgs};
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Document API path.
    pub doc: String,

    /// Only report changes to this field.
    #[arg(long)]
    pub path: Option<String>,

    /// Also report connection changes and remote cursors.
    #[arg(long)]
    pub verbose: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatchLine {
    pub version: u64,
    pub state: ConnectionState,
    pub value: Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub editors: Vec<String>,
}

pub async fn run(args: WatchArgs, global: &GlobalArgs, format: OutputFormat) -> anyhow::Result<()> {
    let path = args
        .path
        .as_deref()
        .map(FieldPath::parse)
        .transpose()
        .context("invalid field path")?;

    let session = connect::open(global, &args.doc).await?;
    let mut updates = session.subscribe();
    let mut last: Option<WatchLine> = None;

    loop {
        let snapshot = updates.borrow_and_update().clone();
        let line = watch_line(&snapshot, path.as_ref(), args.verbose);
        if last.as_ref().is_none_or(|last| changed(last, &line, args.verbose)) {
            if snapshot.state == ConnectionState::Closed {
                if let Some(error) = snapshot.error {
                    output::print_warning(format, "CONNECTION", error.message());
                }
            }
            output::print_output(format, &line, format_human)?;
            last = Some(line);
        }

        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    session.shutdown().await;
    Ok(())
}

fn watch_line(snapshot: &SessionSnapshot, path: Option<&FieldPath>, verbose: bool) -> WatchLine {
    let store = &snapshot.store;
    let value = match path {
        Some(path) => path.get(&store.data).cloned().unwrap_or(Value::Null),
        None => store.data.clone(),
    };
    let editors = if verbose {
        let mut editors: Vec<String> = store
            .awareness
            .other()
            .iter()
            .filter(|(_, focus)| match (path, &focus.path) {
                (Some(watched), Some(focused)) => focused.starts_with(watched),
                (None, focus) => focus.is_some(),
                (Some(_), None) => false,
            })
            .map(|(client_id, _)| client_id.clone())
            .collect();
        editors.sort();
        editors
    } else {
        Vec::new()
    };
    WatchLine { version: store.version, state: snapshot.state, value, editors }
}

/// Without `--verbose` only the watched value counts.
fn changed(last: &WatchLine, next: &WatchLine, verbose: bool) -> bool {
    if verbose {
        last != next
    } else {
        last.value != next.value
    }
}

fn format_human(line: &WatchLine) -> String {
    let value = match &line.value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    let mut out = format!("[v{}] {value}", line.version);
    if line.state != ConnectionState::Open {
        out.push_str(&format!(" ({:?})", line.state).to_lowercase());
    }
    if !line.editors.is_empty() {
        out.push_str(&format!(" editing: {}", line.editors.join(", ")));
    }
    out
}
