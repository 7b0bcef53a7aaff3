use std::{collections::BTreeSet, path::Path};

use super::{as_object, parse_lines, read_optional};

/// Union of plugin names over every fingerprint line, deduplicated and sorted.
///
/// Accepts one object per line as well as the `--log-json` array layout,
/// where each object line carries a trailing comma between `[` and `]`.
pub fn parse_whatweb_text(content: &str) -> Vec<String> {
    let names = parse_lines("whatweb", content, |line| {
        let line = line.trim_end_matches(',');
        if line == "[" || line == "]" || line.is_empty() {
            return Ok(Vec::new());
        }
        let value: serde_json::Value = serde_json::from_str(line)?;
        let obj = as_object(&value)?;
        Ok(obj
            .get("plugins")
            .and_then(serde_json::Value::as_object)
            .map(|plugins| plugins.keys().cloned().collect())
            .unwrap_or_default())
    });

    names
        .into_iter()
        .collect::<BTreeSet<String>>()
        .into_iter()
        .collect()
}

pub fn parse_whatweb_file(path: &Path) -> Vec<String> {
    read_optional(path)
        .map(|content| parse_whatweb_text(&content))
        .unwrap_or_default()
}
