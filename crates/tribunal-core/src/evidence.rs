//! Evidence citations into a candidate record.
//!
//! Every strength, improvement and failed rule should cite a literal quote
//! and the structural path it was taken from (e.g. `experiences[2].missions[0]`).

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::record::CandidateRecord;

lazy_static! {
    // Pattern: section[index] or section[index].field or section[index].field[index]
    static ref PATH_PATTERN: Regex = Regex::new(
        r"^(?P<section>[a-z_]+)(?:\[(?P<index>\d+)\])?(?:\.(?P<field>[a-z_]+)(?:\[(?P<sub>\d+)\])?)?$"
    ).unwrap();
}

/// A quote from the record with the path it was taken from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Evidence {
    /// Literal text from the record
    pub quote: String,

    /// Structural path into the record (e.g., "experiences[0].missions[1]")
    pub path: String,
}

impl Evidence {
    pub fn new(path: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            quote: quote.into(),
            path: path.into(),
        }
    }

    /// Evidence from an experience mission description.
    pub fn from_mission(experience: usize, mission: usize, quote: impl Into<String>) -> Self {
        Self::new(format!("experiences[{}].missions[{}]", experience, mission), quote)
    }

    /// Evidence from an experience title.
    pub fn from_title(experience: usize, quote: impl Into<String>) -> Self {
        Self::new(format!("experiences[{}].title", experience), quote)
    }

    /// Evidence from the skill list.
    pub fn from_skill(index: usize, quote: impl Into<String>) -> Self {
        Self::new(format!("skills[{}]", index), quote)
    }

    /// Resolve the path against a record, returning the referenced text.
    pub fn resolve<'r>(&self, record: &'r CandidateRecord) -> Option<&'r str> {
        let caps = PATH_PATTERN.captures(self.path.trim())?;
        let section = caps.name("section")?.as_str();
        let index: Option<usize> = caps.name("index").and_then(|m| m.as_str().parse().ok());
        let field = caps.name("field").map(|m| m.as_str());
        let sub: Option<usize> = caps.name("sub").and_then(|m| m.as_str().parse().ok());

        match (section, index, field) {
            ("identity", None, Some("headline")) => record.identity.headline.as_deref(),
            ("skills", Some(i), None) => record.skills.get(i).map(String::as_str),
            ("experiences", Some(i), Some(f)) => {
                let exp = record.experiences.get(i)?;
                match (f, sub) {
                    ("title", None) => Some(exp.title.as_str()),
                    ("employer", None) => Some(exp.employer.as_str()),
                    ("missions", Some(j)) => exp.missions.get(j).map(String::as_str),
                    _ => None,
                }
            }
            ("education", Some(i), Some(f)) => {
                let edu = record.education.get(i)?;
                match f {
                    "degree" => Some(edu.degree.as_str()),
                    "institution" => Some(edu.institution.as_str()),
                    "field" => edu.field.as_deref(),
                    _ => None,
                }
            }
            ("certifications", Some(i), Some("name")) => {
                record.certifications.get(i).map(|c| c.name.as_str())
            }
            ("languages", Some(i), Some("name")) => record.languages.get(i).map(|l| l.name.as_str()),
            _ => None,
        }
    }

    /// Whether the quote literally occurs at the cited path.
    ///
    /// Comparison ignores case and whitespace runs.
    pub fn is_grounded(&self, record: &CandidateRecord) -> bool {
        match self.resolve(record) {
            Some(text) => {
                let quote = normalize_whitespace(&self.quote).to_lowercase();
                !quote.is_empty() && normalize_whitespace(text).to_lowercase().contains(&quote)
            }
            None => false,
        }
    }
}

/// Normalize whitespace for quote comparison.
fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{CandidateIdentity, Experience};

    fn record() -> CandidateRecord {
        CandidateRecord {
            identity: CandidateIdentity {
                subject_id: "c-1".to_string(),
                ..Default::default()
            },
            experiences: vec![Experience {
                title: "Backend Engineer".to_string(),
                employer: "Acme".to_string(),
                start: "2020-01".parse().unwrap(),
                end: None,
                missions: vec!["Rewrote the billing   service in Rust".to_string()],
            }],
            skills: vec!["Rust".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_paths() {
        let record = record();
        assert_eq!(Evidence::from_title(0, "x").resolve(&record), Some("Backend Engineer"));
        assert_eq!(Evidence::from_skill(0, "x").resolve(&record), Some("Rust"));
        assert!(Evidence::from_skill(5, "x").resolve(&record).is_none());
        assert!(Evidence::new("nonsense", "x").resolve(&record).is_none());
    }

    #[test]
    fn test_grounding_normalizes_whitespace() {
        let record = record();
        assert!(Evidence::from_mission(0, 0, "billing service in rust").is_grounded(&record));
        assert!(!Evidence::from_mission(0, 0, "payments service").is_grounded(&record));
        assert!(!Evidence::from_mission(0, 3, "billing").is_grounded(&record));
    }
}
