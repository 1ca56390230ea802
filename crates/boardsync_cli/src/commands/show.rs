//! Show command implementation.

use boardsync_store::UpsertStore;
use std::io::Write;
use std::path::Path;

/// Runs the show command: one JSON record per line.
pub fn run(db: &Path, table: &str, limit: Option<usize>) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_existing(db)?;
    dump(&store, table, limit, &mut std::io::stdout().lock())
}

fn dump<W: Write>(
    store: &dyn UpsertStore,
    table: &str,
    limit: Option<usize>,
    out: &mut W,
) -> Result<(), Box<dyn std::error::Error>> {
    let records = store.read_all(table)?;
    for record in records.iter().take(limit.unwrap_or(usize::MAX)) {
        writeln!(out, "{}", serde_json::to_string(record)?)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use boardsync_store::{InMemoryStore, Record};

    #[test]
    fn dumps_json_lines_with_limit() {
        let store = InMemoryStore::new();
        store.ensure_table("events").unwrap();
        for id in ["a", "b", "c"] {
            store.upsert("events", &Record::new(id).with_field("name", id)).unwrap();
        }

        let mut out = Vec::new();
        dump(&store, "events", Some(2), &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: Record = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.external_id, "a");
    }

    #[test]
    fn unknown_table_is_an_error() {
        let store = InMemoryStore::new();
        let mut out = Vec::new();
        assert!(dump(&store, "missing", None, &mut out).is_err());
    }
}
