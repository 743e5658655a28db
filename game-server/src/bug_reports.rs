//! Bug reports arrive as frames and leave as one JSON object per line
//! in `data/bug_reports.jsonl`. Append-only; the admin tooling reads
//! the file, the server never does.

use serde::Serialize;
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// The persisted form of one report.
#[derive(Serialize, Debug)]
pub struct BugReport<'a> {
    pub description: &'a str,
    pub game_turn: u64,
    pub player_name: &'a str,
    /// Client-supplied timestamp, kept verbatim.
    pub timestamp: &'a str,
    /// Server-side receive time.
    pub received_at: String,
}

/// Appends one report. Failures are logged, never fatal; losing a bug
/// report must not take the game down.
pub async fn append(data_dir: &Path, report: BugReport<'_>) {
    let result = append_inner(data_dir, &report).await;
    if let Err(e) = result {
        tracing::error!(error = %e, "Could not persist bug report.");
    }
}

async fn append_inner(data_dir: &Path, report: &BugReport<'_>) -> std::io::Result<()> {
    tokio::fs::create_dir_all(data_dir).await?;
    let mut line = serde_json::to_string(report).map_err(std::io::Error::other)?;
    line.push('\n');
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(data_dir.join("bug_reports.jsonl"))
        .await?;
    file.write_all(line.as_bytes()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_append_one_json_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        for turn in [1u64, 2] {
            append(
                dir.path(),
                BugReport {
                    description: "fleet vanished",
                    game_turn: turn,
                    player_name: "Alice",
                    timestamp: "2026-01-01T00:00:00Z",
                    received_at: "later".into(),
                },
            )
            .await;
        }
        let text = tokio::fs::read_to_string(dir.path().join("bug_reports.jsonl"))
            .await
            .unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(value["player_name"], "Alice");
        }
    }
}
