use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use super::read_optional;

static FINDING_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+\s+(.+)$").unwrap());

/// Every `+ <text>` line is one finding; the text after the marker is kept verbatim.
pub fn parse_nikto_text(content: &str) -> Vec<String> {
    content
        .lines()
        .filter_map(|line| FINDING_LINE.captures(line))
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|text| !text.is_empty())
        .collect()
}

pub fn parse_nikto_file(path: &Path) -> Vec<String> {
    read_optional(path)
        .map(|content| parse_nikto_text(&content))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::parse_nikto_text;

    #[test]
    fn only_plus_prefixed_lines_count() {
        let content = "- Nikto v2.1.6\n+ Server: Apache/2.4.18\n+No space\n  + indented\n+ \n+   OSVDB-3092: /admin/: This might be interesting.\r\n";
        assert_eq!(
            parse_nikto_text(content),
            vec![
                "Server: Apache/2.4.18",
                "OSVDB-3092: /admin/: This might be interesting."
            ]
        );
    }
}
