use std::path::Path;

use serde_json::Value;
use tracing::warn;

use super::{as_object, parse_lines, read_optional, ExploitRecord};
use crate::error::ParseError;

#[derive(Debug, serde::Deserialize)]
struct SearchsploitEntry {
    #[serde(rename = "Title", default)]
    title: String,
    #[serde(rename = "Path", default)]
    path: String,
    #[serde(rename = "Type", default)]
    kind: String,
    #[serde(rename = "CVE", default)]
    cve: Option<String>,
    #[serde(rename = "Codes", default)]
    codes: Option<String>,
}

impl From<SearchsploitEntry> for ExploitRecord {
    fn from(e: SearchsploitEntry) -> Self {
        let cve = e
            .cve
            .filter(|c| !c.trim().is_empty())
            .or(e.codes.filter(|c| !c.trim().is_empty()));
        Self {
            title: e.title,
            path: e.path,
            kind: e.kind,
            cve,
        }
    }
}

/// Flattens the result array of one searchsploit document. `RESULTS_EXPLOIT`
/// wins when non-empty, otherwise `RESULTS` is used. Individual malformed
/// entries are skipped.
fn exploits_from_document(value: &Value) -> Result<Vec<ExploitRecord>, ParseError> {
    let obj = as_object(value)?;
    let results = ["RESULTS_EXPLOIT", "RESULTS"]
        .iter()
        .filter_map(|key| obj.get(*key).and_then(Value::as_array))
        .find(|arr| !arr.is_empty());

    let Some(results) = results else {
        return Ok(Vec::new());
    };

    let mut out = Vec::with_capacity(results.len());
    for entry in results {
        match serde_json::from_value::<SearchsploitEntry>(entry.clone()) {
            Ok(e) => out.push(e.into()),
            Err(e) => warn!(source = "searchsploit", error = %e, "skipping malformed exploit entry"),
        }
    }
    Ok(out)
}

/// Accepts a single (possibly pretty-printed) JSON document or one document per line.
pub fn parse_searchsploit_text(content: &str) -> Vec<ExploitRecord> {
    if let Ok(doc) = serde_json::from_str::<Value>(content.trim()) {
        if doc.is_object() {
            return exploits_from_document(&doc).unwrap_or_default();
        }
    }
    parse_lines("searchsploit", content, |line| {
        let doc: Value = serde_json::from_str(line)?;
        exploits_from_document(&doc)
    })
}

pub fn parse_searchsploit_file(path: &Path) -> Vec<ExploitRecord> {
    read_optional(path)
        .map(|content| parse_searchsploit_text(&content))
        .unwrap_or_default()
}
