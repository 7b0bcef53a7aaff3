use serde::Serialize;

use super::knowledge::AttackType;
use crate::models::Source;

pub const CVSS_VECTOR: &str = "CVSS:3.1/AV:N/AC:L/PR:N/UI:N/S:U/C:H/I:H/A:H";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QualitativeSeverity {
    Critical,
    High,
    Medium,
    Low,
}

impl QualitativeSeverity {
    pub fn from_score(score: f64) -> Self {
        if score >= 9.0 {
            Self::Critical
        } else if score >= 7.0 {
            Self::High
        } else if score >= 4.0 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "Critical",
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CvssEstimate {
    pub score: f64,
    pub severity: QualitativeSeverity,
    pub vector: &'static str,
}

fn cvss_base(attack: AttackType) -> f64 {
    match attack {
        AttackType::RemoteCodeExecution => 9.8,
        AttackType::SqlInjection => 8.8,
        AttackType::AuthenticationWeakness => 7.5,
        AttackType::DirectoryTraversal => 6.5,
        AttackType::InformationDisclosure => 5.3,
        AttackType::CrossSiteScripting => 6.1,
        AttackType::DenialOfService => 7.5,
        AttackType::Informational => 3.1,
    }
}

/// Base score per attack type, +0.5 for exploit-database findings, +0.3
/// unless authentication is involved; one decimal, capped at 10.0.
pub fn estimate_cvss(attack: AttackType, source: Source) -> CvssEstimate {
    let mut score = cvss_base(attack);
    if source.is_exploit_db() {
        score += 0.5;
    }
    if attack != AttackType::AuthenticationWeakness {
        score += 0.3;
    }
    let score = ((score * 10.0).round() / 10.0).min(10.0);
    CvssEstimate {
        score,
        severity: QualitativeSeverity::from_score(score),
        vector: CVSS_VECTOR,
    }
}

/// Internal 0-100 priority: attack weight plus source weight.
pub fn risk_score(attack: AttackType, source: Source) -> u8 {
    let base: u8 = match attack {
        AttackType::RemoteCodeExecution => 40,
        AttackType::SqlInjection => 30,
        AttackType::AuthenticationWeakness => 25,
        AttackType::InformationDisclosure => 10,
        AttackType::DirectoryTraversal => 15,
        AttackType::CrossSiteScripting => 20,
        AttackType::DenialOfService => 25,
        AttackType::Informational => 5,
    };
    let source_weight: u8 = match source {
        Source::Searchsploit => 30,
        Source::Nuclei => 20,
        Source::Nikto => 10,
        Source::Whatweb | Source::Nmap => 5,
    };
    (base + source_weight).min(100)
}

pub fn risk_level(score: u8) -> &'static str {
    match score {
        75.. => "Critical",
        50..=74 => "High",
        25..=49 => "Medium",
        _ => "Low",
    }
}
