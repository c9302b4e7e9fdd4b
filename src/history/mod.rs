// src/history/mod.rs — Historical draw loader (CSV or TSV)
//
// Row layout: `label, p1..pK, secondary`. Tab-separated when the line
// contains a tab, comma-separated otherwise. Headers and rows whose first
// column is not purely numeric are skipped, as are rows that fail to parse.

use std::path::Path;

use crate::core::types::{Candidate, Domain, IssueRecord};
use crate::infra::errors::FusionLoopError;

fn parse_row(line: &str, domain: &Domain) -> Result<Option<(String, Candidate)>, String> {
    let parts: Vec<&str> = if line.contains('\t') {
        line.split('\t')
    } else {
        line.split(',')
    }
    .map(str::trim)
    .collect();

    let label = parts.first().copied().unwrap_or("");
    if label.is_empty() || !label.chars().all(|c| c.is_ascii_digit()) {
        return Ok(None);
    }

    let k = domain.primary_count;
    if parts.len() < k + 2 {
        return Err(format!("expected {} columns, found {}", k + 2, parts.len()));
    }
    let numbers = parts[1..=k + 1]
        .iter()
        .map(|s| s.parse::<u32>().map_err(|e| format!("'{}': {}", s, e)))
        .collect::<Result<Vec<u32>, String>>()?;

    let candidate = Candidate::new(numbers[..k].iter().copied(), numbers[k], domain)
        .map_err(|e| e.to_string())?;
    Ok(Some((label.to_string(), candidate)))
}

/// Parse history text. Indices follow row order, starting at 0.
pub fn parse_history(text: &str, domain: &Domain) -> Vec<IssueRecord> {
    let mut records = Vec::new();
    let mut skipped = 0usize;
    for (n, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        match parse_row(line, domain) {
            Ok(Some((label, draw))) => records.push(IssueRecord {
                index: records.len() as u64,
                label,
                draw,
            }),
            Ok(None) => {}
            Err(message) => {
                skipped += 1;
                tracing::debug!(
                    "{}",
                    FusionLoopError::History {
                        line: n + 1,
                        message
                    }
                );
            }
        }
    }
    if skipped > 0 {
        tracing::warn!("Skipped {} malformed history rows", skipped);
    }
    records
}

pub fn load_history(path: &Path, domain: &Domain) -> Result<Vec<IssueRecord>, FusionLoopError> {
    let text = std::fs::read_to_string(path)?;
    let records = parse_history(&text, domain);
    tracing::info!("Loaded {} issues from {}", records.len(), path.display());
    Ok(records)
}
