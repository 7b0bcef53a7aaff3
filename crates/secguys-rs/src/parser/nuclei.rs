use std::path::Path;

use serde_json::Value;

use super::{as_object, parse_lines, read_optional, VulnRecord};
use crate::{error::ParseError, models::Severity};

fn first_str<'a>(obj: &'a serde_json::Map<String, Value>, keys: &[&str]) -> &'a str {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .unwrap_or_default()
}

/// One nuclei JSONL record. A non-object `info` degrades to severity `info`
/// with empty title and description instead of rejecting the line.
pub fn parse_nuclei_line(line: &str) -> Result<VulnRecord, ParseError> {
    let raw: Value = serde_json::from_str(line)?;
    let obj = as_object(&raw)?;

    let (severity, title, description) = match obj.get("info").and_then(Value::as_object) {
        Some(info) => (
            Severity::parse_lenient(first_str(info, &["severity"])),
            first_str(info, &["name"]).to_string(),
            first_str(info, &["description"]).to_string(),
        ),
        None => (Severity::Info, String::new(), String::new()),
    };

    Ok(VulnRecord {
        template: first_str(obj, &["template", "template-id", "template_id"]).to_string(),
        kind: first_str(obj, &["type"]).to_string(),
        severity,
        title,
        description,
        url: first_str(obj, &["matched_at", "matched-at"]).to_string(),
        raw,
    })
}

pub fn parse_nuclei_file(path: &Path) -> Vec<VulnRecord> {
    read_optional(path)
        .map(|content| {
            parse_lines("nuclei", &content, |line| {
                parse_nuclei_line(line).map(|record| vec![record])
            })
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::{parse_nuclei_file, parse_nuclei_line};
    use crate::{error::ParseError, models::Severity, parser::sample};

    #[test]
    fn full_record_is_extracted() {
        let line = r#"{"template":"ssh-weak-algo","type":"network","info":{"name":"SSH Weak Algorithms","severity":"LOW","description":"weak kex"},"matched_at":"10.0.0.5:22"}"#;
        let rec = parse_nuclei_line(line).unwrap();
        assert_eq!(rec.template, "ssh-weak-algo");
        assert_eq!(rec.kind, "network");
        assert_eq!(rec.severity, Severity::Low);
        assert_eq!(rec.title, "SSH Weak Algorithms");
        assert_eq!(rec.description, "weak kex");
        assert_eq!(rec.url, "10.0.0.5:22");
        assert_eq!(rec.raw["info"]["name"], "SSH Weak Algorithms");
    }

    #[test]
    fn malformed_info_degrades_to_defaults() {
        let rec = parse_nuclei_line(r#"{"template":"x","info":"oops","matched_at":"u"}"#).unwrap();
        assert_eq!(rec.severity, Severity::Info);
        assert_eq!(rec.title, "");
        assert_eq!(rec.url, "u");

        let rec = parse_nuclei_line(r#"{"template":"x","info":{"severity":7}}"#).unwrap();
        assert_eq!(rec.severity, Severity::Info);
    }

    #[test]
    fn hyphenated_field_names_are_accepted() {
        let rec =
            parse_nuclei_line(r#"{"template-id":"apache-detect","matched-at":"http://h:80/"}"#)
                .unwrap();
        assert_eq!(rec.template, "apache-detect");
        assert_eq!(rec.url, "http://h:80/");
    }

    #[test]
    fn non_object_lines_are_rejected() {
        assert!(matches!(
            parse_nuclei_line("[1]"),
            Err(ParseError::NotAnObject)
        ));
        assert!(matches!(parse_nuclei_line("{"), Err(ParseError::Json(_))));
    }

    #[test]
    fn file_parse_skips_bad_lines() {
        let records = parse_nuclei_file(&sample("nuclei.json"));
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].severity, Severity::Info);
    }
}
