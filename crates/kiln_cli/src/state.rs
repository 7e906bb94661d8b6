//! `kiln state`: dump a source state snapshot.

use std::path::Path;

use kiln_cache::columnar::{ColumnBatch, StateFileReader};
use serde_json::{json, Value};

use crate::{GlobalArgs, StateArgs};

/// Runs the `kiln state` command.
///
/// Prints the snapshot metadata followed by one line per row. Stored paths
/// are shown as stored, relative to their roots.
pub fn run(args: &StateArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let Some(reader) = StateFileReader::open(&args.file)? else {
        return Err(format!("no source state at {}", args.file.display()).into());
    };
    let metadata = reader.metadata().clone();
    let batch = reader.read_batch()?;

    if args.json {
        let document = json!({
            "file": args.file.display().to_string(),
            "metadata": metadata,
            "rows": rows_json(&batch),
        });
        println!("{}", serde_json::to_string_pretty(&document)?);
        return Ok(0);
    }

    print!("{}", render_text(&args.file, &metadata, &batch));
    if !global.quiet {
        eprintln!("   {} row(s)", batch.len());
    }
    Ok(0)
}

fn rows_json(batch: &ColumnBatch) -> Vec<Value> {
    (0..batch.len())
        .map(|row| {
            json!({
                "source_file": batch.source_file(row),
                "digest": batch.digest(row).map(|d| d.to_string()),
                "outputs": batch.outputs(row),
            })
        })
        .collect()
}

fn render_text(
    file: &Path,
    metadata: &std::collections::BTreeMap<String, String>,
    batch: &ColumnBatch,
) -> String {
    let mut out = format!("{}\n", file.display());
    for (key, value) in metadata {
        out.push_str(&format!("  {key} = {value}\n"));
    }
    for row in 0..batch.len() {
        let digest = batch
            .digest(row)
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!("{digest}  {}\n", batch.source_file(row)));
        for output in batch.outputs(row) {
            out.push_str(&format!("    -> {output}\n"));
        }
    }
    out
}
