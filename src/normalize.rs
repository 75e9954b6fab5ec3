use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::model::{Cell, RecordSet};

pub const DEFAULT_MAPPINGS_PATH: &str = "data/mappings/column_mappings.json";

const GOALS_ABBREVIATIONS: [&str; 3] = ["g", "gls", "goals"];
const MATCHES_PLAYED_ABBREVIATIONS: [&str; 3] = ["mp", "matches", "matches_played"];

#[derive(Debug, Deserialize)]
struct RawMappingFile {
    #[serde(default)]
    exact: BTreeMap<String, String>,
    #[serde(default)]
    regex: Vec<(String, String)>,
}

#[derive(Debug, Serialize)]
pub struct ResolvedMappings {
    pub exact: BTreeMap<String, String>,
    pub regex: Vec<(String, String)>,
}

/// Column renames loaded from an external JSON file. Exact keys are matched
/// case-insensitively; patterns are tried in file order after exact lookups.
#[derive(Debug, Default)]
pub struct ColumnMappings {
    exact: BTreeMap<String, String>,
    patterns: Vec<(Regex, String)>,
}

impl ColumnMappings {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "no column mapping file found, using built-in rules only");
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read mapping file: {}", path.display()))?;
        let file: RawMappingFile = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse mapping file: {}", path.display()))?;

        let exact = file
            .exact
            .into_iter()
            .map(|(key, value)| (key.to_lowercase(), value))
            .collect();

        let mut patterns = Vec::with_capacity(file.regex.len());
        for (pattern, canonical) in file.regex {
            let compiled = RegexBuilder::new(&pattern)
                .case_insensitive(true)
                .build()
                .with_context(|| format!("invalid column mapping pattern: {pattern}"))?;
            patterns.push((compiled, canonical));
        }

        Ok(Self { exact, patterns })
    }

    pub fn exact_count(&self) -> usize {
        self.exact.len()
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    pub fn resolved(&self) -> ResolvedMappings {
        ResolvedMappings {
            exact: self.exact.clone(),
            regex: self
                .patterns
                .iter()
                .map(|(pattern, canonical)| (pattern.as_str().to_string(), canonical.clone()))
                .collect(),
        }
    }

    fn apply(&self, name: &str) -> Option<String> {
        if let Some(mapped) = self.exact.get(name) {
            return Some(mapped.clone());
        }
        self.patterns
            .iter()
            .find(|(pattern, _)| pattern.is_match(name))
            .map(|(_, canonical)| canonical.clone())
    }
}

/// Rewrites every column name into its canonical form. The input record set
/// is left untouched.
pub fn canonicalize_headers(record_set: &RecordSet, mappings: &ColumnMappings) -> RecordSet {
    let mut renamed = record_set.clone();
    renamed.columns = record_set
        .columns
        .iter()
        .enumerate()
        .map(|(index, column)| canonical_column_name(column, index + 1, mappings))
        .collect();
    renamed
}

fn canonical_column_name(raw: &str, position: usize, mappings: &ColumnMappings) -> String {
    let flattened = collapse_underscores(&flatten_name(raw));
    if flattened.is_empty() {
        return format!("col_{position}");
    }
    if let Some(mapped) = mappings.apply(&flattened) {
        return mapped;
    }
    semantic_rename(&flattened)
        .map(ToOwned::to_owned)
        .unwrap_or(flattened)
}

pub fn flatten_name(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}

fn collapse_underscores(name: &str) -> String {
    let mut collapsed = String::with_capacity(name.len());
    let mut previous_was_underscore = false;
    for ch in name.chars() {
        if ch == '_' {
            if !previous_was_underscore {
                collapsed.push(ch);
            }
            previous_was_underscore = true;
        } else {
            collapsed.push(ch);
            previous_was_underscore = false;
        }
    }
    collapsed
}

fn semantic_rename(name: &str) -> Option<&'static str> {
    if name.contains("npx") || name.starts_with("npxg") {
        return Some("npxg");
    }
    if name == "xg" || name.starts_with("xg") || has_token(name, "xg") {
        return Some("xg");
    }
    if name == "xa" || name.starts_with("xa") || has_token(name, "xa") {
        return Some("xa");
    }
    if name.contains("poss") || name.ends_with('%') || name.ends_with("_pct") {
        return Some("possession_pct");
    }
    if GOALS_ABBREVIATIONS.contains(&name) || name.ends_with("_goals") {
        return Some("goals");
    }
    if MATCHES_PLAYED_ABBREVIATIONS.contains(&name) {
        return Some("matches_played");
    }
    None
}

fn has_token(name: &str, token: &str) -> bool {
    name.split('_').any(|part| part == token)
}

/// Converts columns that are mostly numeric into typed cells. Values that
/// fail to parse inside an adopted column become missing markers. The input
/// record set is left untouched.
pub fn normalize_types(record_set: &RecordSet) -> RecordSet {
    let mut normalized = record_set.clone();
    let row_count = record_set.rows.len();

    for column in 0..record_set.columns.len() {
        let mut parsed: Vec<Option<f64>> = Vec::with_capacity(row_count);
        let mut successes = 0_usize;

        for row in &record_set.rows {
            let value = match row.get(column) {
                Some(Cell::Text(text)) => text.trim().parse::<f64>().ok(),
                Some(Cell::Number(number)) => Some(*number),
                _ => None,
            };
            if value.is_some() {
                successes += 1;
            }
            parsed.push(value);
        }

        if successes == 0 || successes * 2 < row_count {
            continue;
        }

        for (row, value) in normalized.rows.iter_mut().zip(parsed) {
            if let Some(slot) = row.get_mut(column) {
                *slot = value.map_or(Cell::Missing, Cell::Number);
            }
        }
    }

    normalized
}
