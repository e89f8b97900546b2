//! Masking and consent.
//!
//! The controller masks the record before any evaluator sees it and checks
//! consent before anything else runs. [`BasicCompliance`] is a self-contained
//! default; deployments with a consent store implement [`Compliance`].

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tribunal_core::CandidateRecord;

lazy_static! {
    static ref EMAIL: Regex =
        Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap();

    // Year ranges are matched first so a digit run never starts inside one.
    // Only phone runs with enough digits are treated as phone numbers.
    static ref PHONE: Regex = Regex::new(
        r"(?P<years>\b(?:19|20)\d{2}\s*[-–]\s*(?:19|20)\d{2}\b)|(?P<phone>\+?\d[\d\s().-]{7,}\d)"
    ).unwrap();
}

const PHONE_MIN_DIGITS: usize = 9;

pub const REDACTED_EMAIL: &str = "[email]";
pub const REDACTED_PHONE: &str = "[phone]";
pub const REDACTED: &str = "[redacted]";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[serde(rename_all = "snake_case")]
pub enum MaskingLevel {
    None,
    /// Contact details anywhere in the record
    #[default]
    Partial,
    /// Contact details plus name and location
    Full,
}

impl MaskingLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaskingLevel::None => "none",
            MaskingLevel::Partial => "partial",
            MaskingLevel::Full => "full",
        }
    }
}

impl fmt::Display for MaskingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComplianceSettings {
    /// Default masking level for requests that do not set one
    #[serde(default)]
    pub masking: MaskingLevel,

    #[serde(default = "default_require_consent")]
    pub require_consent: bool,
}

fn default_require_consent() -> bool {
    true
}

impl Default for ComplianceSettings {
    fn default() -> Self {
        Self {
            masking: MaskingLevel::default(),
            require_consent: default_require_consent(),
        }
    }
}

#[async_trait]
pub trait Compliance: Send + Sync {
    /// A copy of `record` with personal data masked to `level`.
    fn mask(&self, record: &CandidateRecord, level: MaskingLevel) -> CandidateRecord;

    async fn has_consent(&self, subject_id: &str) -> bool;
}

/// Redact e-mail addresses and phone numbers in free text.
pub fn redact_contacts(text: &str) -> String {
    let text = EMAIL.replace_all(text, REDACTED_EMAIL);
    PHONE
        .replace_all(&text, |caps: &Captures| match caps.name("phone") {
            Some(run) if digit_count(run.as_str()) >= PHONE_MIN_DIGITS => REDACTED_PHONE.to_string(),
            _ => caps[0].to_string(),
        })
        .into_owned()
}

fn digit_count(run: &str) -> usize {
    run.chars().filter(char::is_ascii_digit).count()
}

/// Regex masking plus an explicit consent list.
#[derive(Debug, Clone, Default)]
pub struct BasicCompliance {
    consented: BTreeSet<String>,
    consent_all: bool,
}

impl BasicCompliance {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every subject has consented.
    pub fn consent_all() -> Self {
        Self {
            consented: BTreeSet::new(),
            consent_all: true,
        }
    }

    pub fn with_consent<I, S>(mut self, subjects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.consented.extend(subjects.into_iter().map(Into::into));
        self
    }
}

#[async_trait]
impl Compliance for BasicCompliance {
    fn mask(&self, record: &CandidateRecord, level: MaskingLevel) -> CandidateRecord {
        let mut masked = record.clone();
        if level == MaskingLevel::None {
            return masked;
        }

        let id = &mut masked.identity;
        id.email = id.email.as_ref().map(|_| REDACTED_EMAIL.to_string());
        id.phone = id.phone.as_ref().map(|_| REDACTED_PHONE.to_string());
        id.headline = id.headline.as_deref().map(redact_contacts);
        if level == MaskingLevel::Full {
            id.full_name = id.full_name.as_ref().map(|_| REDACTED.to_string());
            id.location = id.location.as_ref().map(|_| REDACTED.to_string());
        }

        for exp in &mut masked.experiences {
            exp.title = redact_contacts(&exp.title);
            for mission in &mut exp.missions {
                *mission = redact_contacts(mission);
            }
        }
        masked
    }

    async fn has_consent(&self, subject_id: &str) -> bool {
        self.consent_all || self.consented.contains(subject_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tribunal_core::record::{CandidateIdentity, Experience};

    fn record() -> CandidateRecord {
        CandidateRecord {
            identity: CandidateIdentity {
                subject_id: "c-7".to_string(),
                full_name: Some("Ada Lovelace".to_string()),
                email: Some("ada@example.org".to_string()),
                phone: Some("+44 20 7946 0958".to_string()),
                location: Some("London".to_string()),
                headline: Some("Rust engineer, ada@example.org".to_string()),
            },
            experiences: vec![Experience {
                title: "Engineer".to_string(),
                employer: "Analytical Engines".to_string(),
                start: "2019-01".parse().unwrap(),
                end: None,
                missions: vec!["On call 2019-2021, reach me at 020 7946 0958".to_string()],
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_redact_contacts_keeps_year_ranges() {
        assert_eq!(
            redact_contacts("On call 2019-2021, reach me at 020 7946 0958"),
            "On call 2019-2021, reach me at [phone]"
        );
        assert_eq!(redact_contacts("mail bob.smith@corp.io now"), "mail [email] now");
    }

    #[test]
    fn test_spaced_year_range_is_not_a_phone() {
        let mission = "Led the platform team 2019 - 2021 (2 years), 40% latency cut";
        assert_eq!(redact_contacts(mission), mission);
        assert_eq!(redact_contacts("Contract 1998–2004 (6 years)"), "Contract 1998–2004 (6 years)");
        // A number right after a range is still caught
        assert_eq!(redact_contacts("2019 - 2021 020 7946 0958"), "2019 - 2021 [phone]");

        let mut record = record();
        record.experiences[0].missions = vec![mission.to_string()];
        let masked = BasicCompliance::new().mask(&record, MaskingLevel::Partial);
        assert_eq!(masked.experiences[0].missions[0], mission);
    }

    #[test]
    fn test_partial_masking() {
        let masked = BasicCompliance::new().mask(&record(), MaskingLevel::Partial);
        assert_eq!(masked.identity.email.as_deref(), Some(REDACTED_EMAIL));
        assert_eq!(masked.identity.phone.as_deref(), Some(REDACTED_PHONE));
        assert_eq!(masked.identity.full_name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(masked.identity.headline.as_deref(), Some("Rust engineer, [email]"));
        assert!(masked.experiences[0].missions[0].ends_with("[phone]"));
        assert_eq!(masked.identity.subject_id, "c-7");
    }

    #[test]
    fn test_full_masking() {
        let masked = BasicCompliance::new().mask(&record(), MaskingLevel::Full);
        assert_eq!(masked.identity.full_name.as_deref(), Some(REDACTED));
        assert_eq!(masked.identity.location.as_deref(), Some(REDACTED));
        assert_eq!(masked.experiences[0].employer, "Analytical Engines");
    }

    #[test]
    fn test_no_masking() {
        assert_eq!(BasicCompliance::new().mask(&record(), MaskingLevel::None), record());
    }

    #[tokio::test]
    async fn test_consent() {
        let compliance = BasicCompliance::new().with_consent(["c-7"]);
        assert!(compliance.has_consent("c-7").await);
        assert!(!compliance.has_consent("c-8").await);
        assert!(BasicCompliance::consent_all().has_consent("anyone").await);
    }

    #[test]
    fn test_settings_defaults() {
        let settings: ComplianceSettings = serde_yaml::from_str("masking: full").unwrap();
        assert_eq!(settings.masking, MaskingLevel::Full);
        assert!(settings.require_consent);
    }
}
