//! Wager history input for `wagertally rebuild`
//!
//! One JSON object per line: `{"subject": "...", "amount": 100, "at": "<RFC 3339>"}`.
//! `username` and `time` are accepted as aliases. Blank lines are skipped.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::types::{Result, TallyError, Wager};

pub fn read_history(path: &Path) -> Result<Vec<Wager>> {
    let file = File::open(path)?;
    parse_history(BufReader::new(file))
}

pub fn parse_history(reader: impl BufRead) -> Result<Vec<Wager>> {
    let mut wagers = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let wager: Wager = serde_json::from_str(&line)
            .map_err(|e| TallyError::Parse(format!("history line {}: {}", index + 1, e)))?;
        wagers.push(wager);
    }
    Ok(wagers)
}
