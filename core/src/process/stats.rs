//! Remote memory statistics from `free -m`.

use crate::errors::ProcessError;

use super::types::SystemStats;

/// Parse `free -m` output. Only the `Mem:` row is used; columns are
/// total, used, free in megabytes.
pub fn parse_free_output(raw: &str) -> Result<SystemStats, ProcessError> {
    for line in raw.lines() {
        let trimmed = line.trim();
        if !trimmed.starts_with("Mem:") {
            continue;
        }
        let fields: Vec<u64> = trimmed
            .split_whitespace()
            .skip(1)
            .filter_map(|f| f.parse().ok())
            .collect();
        if fields.len() < 3 {
            return Err(ProcessError::Unparseable(format!(
                "malformed Mem row: {trimmed}"
            )));
        }
        return Ok(SystemStats {
            mem_total_mb: fields[0],
            mem_used_mb: fields[1],
            mem_free_mb: fields[2],
        });
    }
    Err(ProcessError::Unparseable(
        "no Mem row in free output".to_string(),
    ))
}
