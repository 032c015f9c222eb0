//! Parsers for remote PM2 listing output.
//!
//! The daemon output is untrusted text: wrappers print banners around
//! `pm2 jlist`, old versions emit slightly different JSON, and when no
//! JSON can be had at all the human-readable `pm2 list` table is the
//! last resort. Each format is a [`ParseStrategy`]; callers run a chain
//! and take the first strategy that yields records.

use serde_json::Value;
use tracing::debug;

use crate::errors::ProcessError;

use super::types::{ProcessStatus, RemoteProcessRecord};

/// One way of reading a process listing out of raw remote output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStrategy {
    /// The whole output is a JSON array (`pm2 jlist` on a clean shell).
    StrictJson,
    /// A JSON array embedded in noise; takes the outermost `[`..`]`
    /// slice. Covers shells that print motd or nvm banners.
    EmbeddedJson,
    /// The box-drawing table printed by `pm2 list`.
    Table,
}

/// Strategies applied to `pm2 jlist` output, in order.
pub const JSON_CHAIN: [ParseStrategy; 2] = [ParseStrategy::StrictJson, ParseStrategy::EmbeddedJson];

impl ParseStrategy {
    pub fn parse(&self, raw: &str) -> Result<Vec<RemoteProcessRecord>, ProcessError> {
        match self {
            Self::StrictJson => parse_strict_json(raw),
            Self::EmbeddedJson => parse_embedded_json(raw),
            Self::Table => parse_table(raw),
        }
    }
}

/// Run each strategy in order, returning the first successful parse.
pub fn parse_listing(
    chain: &[ParseStrategy],
    raw: &str,
) -> Result<Vec<RemoteProcessRecord>, ProcessError> {
    let mut last_error = None;
    for strategy in chain {
        match strategy.parse(raw) {
            Ok(records) => {
                debug!("Parsed {} processes via {:?}", records.len(), strategy);
                return Ok(records);
            }
            Err(e) => last_error = Some(e),
        }
    }
    Err(last_error
        .unwrap_or_else(|| ProcessError::Unparseable("empty strategy chain".to_string())))
}

fn parse_strict_json(raw: &str) -> Result<Vec<RemoteProcessRecord>, ProcessError> {
    let value: Value = serde_json::from_str(raw.trim())
        .map_err(|e| ProcessError::Unparseable(format!("not valid JSON: {e}")))?;
    records_from_array(&value)
}

fn parse_embedded_json(raw: &str) -> Result<Vec<RemoteProcessRecord>, ProcessError> {
    let start = raw
        .find('[')
        .ok_or_else(|| ProcessError::Unparseable("no JSON array found".to_string()))?;
    let end = raw
        .rfind(']')
        .filter(|&end| end > start)
        .ok_or_else(|| ProcessError::Unparseable("no JSON array found".to_string()))?;
    let value: Value = serde_json::from_str(&raw[start..=end])
        .map_err(|e| ProcessError::Unparseable(format!("embedded slice not valid JSON: {e}")))?;
    records_from_array(&value)
}

fn records_from_array(value: &Value) -> Result<Vec<RemoteProcessRecord>, ProcessError> {
    let array = value
        .as_array()
        .ok_or_else(|| ProcessError::Unparseable("JSON value is not an array".to_string()))?;
    Ok(array.iter().filter_map(record_from_jlist_entry).collect())
}

/// Extract one record from a `pm2 jlist` entry. Entries without a name
/// are skipped rather than failing the whole listing.
fn record_from_jlist_entry(entry: &Value) -> Option<RemoteProcessRecord> {
    let name = entry.get("name")?.as_str()?.to_string();
    let env = entry.get("pm2_env");
    let monit = entry.get("monit");

    let status = env
        .and_then(|e| e.get("status"))
        .and_then(Value::as_str)
        .map(ProcessStatus::from_pm2)
        .unwrap_or_default();

    let uptime_seconds = match status {
        ProcessStatus::Online => env
            .and_then(|e| e.get("pm_uptime"))
            .and_then(Value::as_i64)
            .map(uptime_from_epoch_ms)
            .unwrap_or(0),
        _ => 0,
    };

    Some(RemoteProcessRecord {
        name,
        id: entry.get("pm_id").and_then(Value::as_i64).unwrap_or(-1),
        status,
        memory_bytes: monit
            .and_then(|m| m.get("memory"))
            .and_then(Value::as_u64)
            .unwrap_or(0),
        cpu_percent: monit
            .and_then(|m| m.get("cpu"))
            .and_then(Value::as_f64)
            .unwrap_or(0.0),
        uptime_seconds,
        restart_count: env
            .and_then(|e| e.get("restart_time"))
            .and_then(Value::as_u64)
            .unwrap_or(0),
        pid: entry
            .get("pid")
            .and_then(Value::as_u64)
            .filter(|&pid| pid != 0)
            .map(|pid| pid as u32),
    })
}

/// PM2 reports `pm_uptime` as the start instant in epoch milliseconds.
fn uptime_from_epoch_ms(start_ms: i64) -> u64 {
    let now_ms = chrono::Utc::now().timestamp_millis();
    if now_ms > start_ms {
        ((now_ms - start_ms) / 1000) as u64
    } else {
        0
    }
}

/// Parse the `pm2 list` box-drawing table. Column positions are taken
/// from the header row, so reordered or missing columns still work.
fn parse_table(raw: &str) -> Result<Vec<RemoteProcessRecord>, ProcessError> {
    let mut header: Option<Vec<String>> = None;
    let mut records = Vec::new();

    for line in raw.lines() {
        if !line.contains('│') {
            continue;
        }
        let cells: Vec<String> = line
            .split('│')
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        if cells.is_empty() {
            continue;
        }

        match &header {
            None => {
                let lowered: Vec<String> = cells.iter().map(|c| c.to_lowercase()).collect();
                if lowered.iter().any(|c| c == "name") {
                    header = Some(lowered);
                }
            }
            Some(columns) => {
                if let Some(record) = record_from_table_row(columns, &cells) {
                    records.push(record);
                }
            }
        }
    }

    if header.is_none() {
        return Err(ProcessError::Unparseable(
            "no table header row found".to_string(),
        ));
    }
    Ok(records)
}

fn record_from_table_row(columns: &[String], cells: &[String]) -> Option<RemoteProcessRecord> {
    let cell = |name: &str| -> Option<&str> {
        columns
            .iter()
            .position(|c| c == name)
            .and_then(|i| cells.get(i))
            .map(String::as_str)
    };

    let name = cell("name")?.to_string();
    let status = cell("status").map(ProcessStatus::from_pm2).unwrap_or_default();
    Some(RemoteProcessRecord {
        name,
        id: cell("id").and_then(|v| v.parse().ok()).unwrap_or(-1),
        status,
        memory_bytes: cell("memory")
            .or_else(|| cell("mem"))
            .map(parse_memory_to_bytes)
            .unwrap_or(0),
        cpu_percent: cell("cpu")
            .and_then(|v| v.trim_end_matches('%').trim().parse().ok())
            .unwrap_or(0.0),
        uptime_seconds: match status {
            ProcessStatus::Online => cell("uptime").map(parse_uptime_secs).unwrap_or(0),
            _ => 0,
        },
        restart_count: cell("↺").and_then(|v| v.parse().ok()).unwrap_or(0),
        pid: cell("pid")
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|&pid| pid != 0),
    })
}

/// Parse a human memory figure like `15.2mb`, `512K` or `1.5 GiB` into
/// bytes. Unparseable input yields 0.
pub fn parse_memory_to_bytes(raw: &str) -> u64 {
    let lower = raw.trim().to_lowercase();
    let digits_end = lower
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(lower.len());
    let Ok(number) = lower[..digits_end].parse::<f64>() else {
        return 0;
    };
    let unit = lower[digits_end..].trim();
    let multiplier: f64 = match unit.trim_end_matches('b').trim_end_matches('i') {
        "" => 1.0,
        "k" => 1024.0,
        "m" => 1024.0 * 1024.0,
        "g" => 1024.0 * 1024.0 * 1024.0,
        _ => return 0,
    };
    (number * multiplier) as u64
}

/// Parse a PM2 uptime string like `2d 3h`, `45m` or `12s` into seconds.
/// A bare number is taken as seconds; unparseable input yields 0.
pub fn parse_uptime_secs(raw: &str) -> u64 {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "0" {
        return 0;
    }
    if let Ok(seconds) = trimmed.parse::<u64>() {
        return seconds;
    }

    let mut total = 0u64;
    for token in trimmed.split_whitespace() {
        let Some(unit) = token.chars().last() else {
            continue;
        };
        let Ok(number) = token[..token.len() - unit.len_utf8()].parse::<u64>() else {
            continue;
        };
        total += match unit {
            'd' => number * 86_400,
            'h' => number * 3_600,
            'm' => number * 60,
            's' => number,
            _ => 0,
        };
    }
    total
}
