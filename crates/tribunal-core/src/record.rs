//! Structured candidate record.
//!
//! The record is produced by an external extraction adapter and is immutable
//! once it reaches the pipeline. All dates are normalized to year-month
//! granularity; an experience without an end is ongoing as of the analysis date.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Years accepted in experience dates.
pub const PLAUSIBLE_YEARS: std::ops::RangeInclusive<i32> = 1900..=2200;

/// Errors raised while reading a candidate record.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Invalid year-month '{0}': expected YYYY-MM")]
    InvalidYearMonth(String),

    #[error("Failed to parse record JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Record validation failed: {0}")]
    ValidationError(String),
}

/// A calendar month, serialized as `"YYYY-MM"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    /// Create a year-month. Returns `None` when `month` is outside 1..=12.
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// Signed number of months from `self` to `other`.
    pub fn months_until(&self, other: YearMonth) -> i64 {
        (other.year as i64 - self.year as i64) * 12 + (other.month as i64 - self.month as i64)
    }
}

impl From<NaiveDate> for YearMonth {
    fn from(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }
}

impl FromStr for YearMonth {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RecordError::InvalidYearMonth(s.to_string());
        let (year, month) = s.trim().split_once('-').ok_or_else(invalid)?;
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        Self::new(year, month).ok_or_else(invalid)
    }
}

impl TryFrom<String> for YearMonth {
    type Error = RecordError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<YearMonth> for String {
    fn from(value: YearMonth) -> Self {
        value.to_string()
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Identity section of a record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CandidateIdentity {
    /// Stable subject identifier used for consent checks
    pub subject_id: String,

    #[serde(default)]
    pub full_name: Option<String>,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub phone: Option<String>,

    #[serde(default)]
    pub location: Option<String>,

    #[serde(default)]
    pub headline: Option<String>,
}

/// One professional experience.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Experience {
    pub title: String,

    #[serde(default)]
    pub employer: String,

    pub start: YearMonth,

    /// Absent when the position is ongoing
    #[serde(default)]
    pub end: Option<YearMonth>,

    /// Free-text mission descriptions
    #[serde(default)]
    pub missions: Vec<String>,
}

impl Experience {
    /// Duration in months, inclusive of both ends.
    ///
    /// An ongoing experience runs until `analysis_month`. Inverted ranges count as zero.
    pub fn months(&self, analysis_month: YearMonth) -> u32 {
        let end = self.end.unwrap_or(analysis_month);
        let span = self.start.months_until(end);
        if span < 0 {
            0
        } else {
            u32::try_from(span + 1).unwrap_or(u32::MAX)
        }
    }

    /// Title, employer and missions as text fragments.
    pub fn text_fragments(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.title.as_str())
            .chain(std::iter::once(self.employer.as_str()))
            .chain(self.missions.iter().map(String::as_str))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Education {
    pub degree: String,

    #[serde(default)]
    pub institution: String,

    #[serde(default)]
    pub field: Option<String>,

    #[serde(default)]
    pub year: Option<i32>,
}

impl Education {
    pub fn text_fragments(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.degree.as_str())
            .chain(std::iter::once(self.institution.as_str()))
            .chain(self.field.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Language {
    pub name: String,

    #[serde(default)]
    pub level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Certification {
    pub name: String,

    #[serde(default)]
    pub issuer: Option<String>,

    #[serde(default)]
    pub year: Option<i32>,
}

/// A normalized candidate record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CandidateRecord {
    pub identity: CandidateIdentity,

    #[serde(default)]
    pub experiences: Vec<Experience>,

    #[serde(default)]
    pub education: Vec<Education>,

    #[serde(default)]
    pub skills: Vec<String>,

    #[serde(default)]
    pub languages: Vec<Language>,

    #[serde(default)]
    pub certifications: Vec<Certification>,
}

impl CandidateRecord {
    /// Parse a record from JSON and check its invariants.
    pub fn from_json(json: &str) -> Result<Self, RecordError> {
        let record: Self = serde_json::from_str(json)?;
        record.validate()?;
        Ok(record)
    }

    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), RecordError> {
        if self.identity.subject_id.trim().is_empty() {
            return Err(RecordError::ValidationError(
                "identity.subject_id must not be empty".to_string(),
            ));
        }
        for (i, exp) in self.experiences.iter().enumerate() {
            for date in std::iter::once(exp.start).chain(exp.end) {
                if !PLAUSIBLE_YEARS.contains(&date.year()) {
                    return Err(RecordError::ValidationError(format!(
                        "experiences[{}] has implausible date {}",
                        i, date
                    )));
                }
            }
            if let Some(end) = exp.end {
                if end < exp.start {
                    return Err(RecordError::ValidationError(format!(
                        "experiences[{}] ends ({}) before it starts ({})",
                        i, end, exp.start
                    )));
                }
            }
        }
        Ok(())
    }

    /// Total distinct months of experience.
    ///
    /// Overlapping positions are merged so concurrent jobs are not double counted.
    pub fn total_experience_months(&self, analysis_month: YearMonth) -> u32 {
        let mut ranges: Vec<(YearMonth, YearMonth)> = self
            .experiences
            .iter()
            .map(|e| (e.start, e.end.unwrap_or(analysis_month)))
            .filter(|(start, end)| start <= end)
            .collect();
        ranges.sort();

        let mut total = 0i64;
        let mut current: Option<(YearMonth, YearMonth)> = None;
        for (start, end) in ranges {
            current = match current {
                Some((cs, ce)) if start.months_until(ce) >= -1 => Some((cs, ce.max(end))),
                Some((cs, ce)) => {
                    total += cs.months_until(ce) + 1;
                    Some((start, end))
                }
                None => Some((start, end)),
            };
        }
        if let Some((cs, ce)) = current {
            total += cs.months_until(ce) + 1;
        }
        u32::try_from(total).unwrap_or(u32::MAX)
    }

    /// Every free-text fragment of the record that carries professional signal.
    pub fn text_fragments(&self) -> Vec<&str> {
        let mut fragments: Vec<&str> = Vec::new();
        if let Some(headline) = self.identity.headline.as_deref() {
            fragments.push(headline);
        }
        for exp in &self.experiences {
            fragments.extend(exp.text_fragments());
        }
        for edu in &self.education {
            fragments.extend(edu.text_fragments());
        }
        fragments.extend(self.skills.iter().map(String::as_str));
        fragments.extend(self.certifications.iter().map(|c| c.name.as_str()));
        fragments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ym(s: &str) -> YearMonth {
        s.parse().unwrap()
    }

    fn experience(start: &str, end: Option<&str>) -> Experience {
        Experience {
            title: "Engineer".to_string(),
            employer: "Acme".to_string(),
            start: ym(start),
            end: end.map(ym),
            missions: vec![],
        }
    }

    #[test]
    fn test_year_month_parse_and_display() {
        let value = ym("2021-03");
        assert_eq!(value.year(), 2021);
        assert_eq!(value.month(), 3);
        assert_eq!(value.to_string(), "2021-03");
        assert!("2021-13".parse::<YearMonth>().is_err());
        assert!("March 2021".parse::<YearMonth>().is_err());
    }

    #[test]
    fn test_year_month_serde() {
        let json = serde_json::to_string(&ym("2019-11")).unwrap();
        assert_eq!(json, "\"2019-11\"");
        let back: YearMonth = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ym("2019-11"));
    }

    #[test]
    fn test_experience_months_inclusive() {
        assert_eq!(experience("2020-01", Some("2020-12")).months(ym("2024-01")), 12);
        assert_eq!(experience("2023-06", None).months(ym("2024-05")), 12);
        assert_eq!(experience("2025-01", None).months(ym("2024-05")), 0);
    }

    #[test]
    fn test_total_experience_merges_overlaps() {
        let record = CandidateRecord {
            identity: CandidateIdentity {
                subject_id: "c-1".to_string(),
                ..Default::default()
            },
            experiences: vec![
                experience("2020-01", Some("2020-12")),
                experience("2020-06", Some("2021-05")),
                experience("2022-01", Some("2022-03")),
            ],
            ..Default::default()
        };
        // 2020-01..2021-05 is 17 months, plus 3
        assert_eq!(record.total_experience_months(ym("2024-01")), 20);
    }

    #[test]
    fn test_validate_rejects_inverted_dates() {
        let record = CandidateRecord {
            identity: CandidateIdentity {
                subject_id: "c-1".to_string(),
                ..Default::default()
            },
            experiences: vec![experience("2022-01", Some("2021-01"))],
            ..Default::default()
        };
        assert!(matches!(
            record.validate(),
            Err(RecordError::ValidationError(_))
        ));
    }

    #[test]
    fn test_validate_rejects_implausible_years() {
        let record = CandidateRecord {
            identity: CandidateIdentity {
                subject_id: "c-1".to_string(),
                ..Default::default()
            },
            experiences: vec![experience("2019-01", Some("999999999-01"))],
            ..Default::default()
        };
        assert!(matches!(
            record.validate(),
            Err(RecordError::ValidationError(msg)) if msg.contains("999999999-01")
        ));
    }

    #[test]
    fn test_month_counts_saturate() {
        let analysis = ym("2024-01");
        let endless = experience("2000-01", Some("999999999-12"));
        assert_eq!(endless.months(analysis), u32::MAX);

        let record = CandidateRecord {
            experiences: vec![endless, experience("1999-01", Some("2001-01"))],
            ..Default::default()
        };
        assert_eq!(record.total_experience_months(analysis), u32::MAX);
    }
}
