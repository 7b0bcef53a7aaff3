use std::{fmt, str::FromStr};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttackType {
    #[serde(rename = "Remote Code Execution")]
    RemoteCodeExecution,
    #[serde(rename = "SQL Injection")]
    SqlInjection,
    #[serde(rename = "Authentication Weakness")]
    AuthenticationWeakness,
    #[serde(rename = "Information Disclosure")]
    InformationDisclosure,
    #[serde(rename = "Directory Traversal")]
    DirectoryTraversal,
    #[serde(rename = "Cross-Site Scripting")]
    CrossSiteScripting,
    #[serde(rename = "Denial of Service")]
    DenialOfService,
    Informational,
}

/// Rule precedence. The first attack type whose keywords match wins.
pub const RULE_ORDER: [AttackType; 7] = [
    AttackType::RemoteCodeExecution,
    AttackType::SqlInjection,
    AttackType::AuthenticationWeakness,
    AttackType::InformationDisclosure,
    AttackType::DirectoryTraversal,
    AttackType::CrossSiteScripting,
    AttackType::DenialOfService,
];

impl AttackType {
    pub fn label(self) -> &'static str {
        match self {
            Self::RemoteCodeExecution => "Remote Code Execution",
            Self::SqlInjection => "SQL Injection",
            Self::AuthenticationWeakness => "Authentication Weakness",
            Self::InformationDisclosure => "Information Disclosure",
            Self::DirectoryTraversal => "Directory Traversal",
            Self::CrossSiteScripting => "Cross-Site Scripting",
            Self::DenialOfService => "Denial of Service",
            Self::Informational => "Informational",
        }
    }

    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::RemoteCodeExecution => &[
                "remote code",
                "command execution",
                "rce",
                "backdoor",
                "shell",
                "execute",
            ],
            Self::SqlInjection => &[
                "sql injection",
                "sqli",
                "database",
                "query",
                "mysql",
                "postgresql",
            ],
            Self::AuthenticationWeakness => &[
                "anonymous login",
                "anonymous",
                "default login",
                "password",
                "auth",
                "credential",
            ],
            Self::InformationDisclosure => &[
                "phpinfo",
                "version",
                "banner",
                "headers",
                "enumeration",
                "leak",
            ],
            Self::DirectoryTraversal => &[
                "directory indexing",
                "file read",
                "path traversal",
                "directory listing",
            ],
            Self::CrossSiteScripting => &["xss", "javascript", "script injection", "dom"],
            Self::DenialOfService => &["dos", "ddos", "overflow", "crash", "resource"],
            Self::Informational => &[],
        }
    }

    /// (tactic, technique)
    pub fn mitre(self) -> (&'static str, &'static str) {
        match self {
            Self::RemoteCodeExecution => ("Execution", "T1059"),
            Self::SqlInjection => ("Initial Access", "T1190"),
            Self::AuthenticationWeakness => ("Credential Access", "T1110"),
            Self::InformationDisclosure => ("Discovery", "T1082"),
            Self::DirectoryTraversal => ("Discovery", "T1083"),
            Self::CrossSiteScripting => ("Initial Access", "T1189"),
            Self::DenialOfService => ("Impact", "T1499"),
            Self::Informational => ("Discovery", "T1082"),
        }
    }

    pub fn capability(self) -> &'static str {
        match self {
            Self::RemoteCodeExecution => "Execute arbitrary commands remotely",
            Self::SqlInjection => "Read or modify backend database",
            Self::AuthenticationWeakness => "Bypass authentication mechanisms",
            Self::InformationDisclosure => "Access sensitive system information",
            Self::DirectoryTraversal => "Read arbitrary files from the system",
            Self::CrossSiteScripting => "Execute arbitrary JavaScript in user browser",
            Self::DenialOfService => "Disrupt service availability",
            Self::Informational => "Gather system and service information",
        }
    }

    /// Reference text embedded for similarity matching. `Informational` has none.
    pub fn definition(self) -> Option<&'static str> {
        match self {
            Self::RemoteCodeExecution => {
                Some("Ability to execute arbitrary commands on a remote system")
            }
            Self::SqlInjection => Some("Injection of malicious SQL queries to manipulate a database"),
            Self::AuthenticationWeakness => {
                Some("Ability to bypass or abuse authentication mechanisms")
            }
            Self::InformationDisclosure => {
                Some("Exposure of sensitive system or application information")
            }
            Self::DirectoryTraversal => Some("Reading files outside the intended directory"),
            Self::CrossSiteScripting => Some("Injection of malicious JavaScript into web pages"),
            Self::DenialOfService => {
                Some("Ability to make a system unavailable to legitimate users")
            }
            Self::Informational => None,
        }
    }
}

impl fmt::Display for AttackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for AttackType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RULE_ORDER
            .into_iter()
            .chain([AttackType::Informational])
            .find(|a| a.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown attack type: {s}"))
    }
}

/// Case-insensitive substring match on any keyword; first rule in table order wins.
static RULES: Lazy<Vec<(AttackType, Regex)>> = Lazy::new(|| {
    RULE_ORDER
        .into_iter()
        .map(|attack| {
            let alternatives: Vec<String> =
                attack.keywords().iter().map(|k| regex::escape(k)).collect();
            let pattern = format!("(?i){}", alternatives.join("|"));
            (attack, Regex::new(&pattern).expect("keyword table compiles"))
        })
        .collect()
});

pub fn match_rules(text: &str) -> Option<AttackType> {
    RULES
        .iter()
        .find(|(_, re)| re.is_match(text))
        .map(|(attack, _)| *attack)
}
