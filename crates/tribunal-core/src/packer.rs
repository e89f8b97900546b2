//! Context Packer
//!
//! Reduces a candidate record to the subset most relevant to the job before
//! it is sent to evaluators. Packing only selects: entries are copied
//! verbatim, never rewritten, and the relative order of kept entries is the
//! original order.
//!
//! Records whose serialized size is under `threshold_bytes` are passed
//! through unchanged (`fallback = true`).

use std::collections::BTreeSet;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::evaluation::EvaluationResult;
use crate::evidence::Evidence;
use crate::job::JobSpecification;
use crate::record::CandidateRecord;
use crate::terms::{keyword_set, overlap_coefficient, TermSet};

lazy_static! {
    static ref INDEXED_SECTION: Regex =
        Regex::new(r"^(?P<section>experiences|education|skills)\[(?P<index>\d+)\]").unwrap();
}

const DIRECT_WEIGHT: f64 = 1.0;
const ADJACENT_WEIGHT: f64 = 0.6;
const PERIPHERAL_WEIGHT: f64 = 0.3;

/// Packing limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackerConfig {
    /// Records serializing to fewer bytes are not reduced
    #[serde(default = "default_threshold_bytes")]
    pub threshold_bytes: usize,

    #[serde(default = "default_min_relevance")]
    pub min_relevance: f64,

    #[serde(default = "default_top_experiences")]
    pub top_experiences: usize,

    #[serde(default = "default_top_education")]
    pub top_education: usize,

    #[serde(default = "default_top_skills")]
    pub top_skills: usize,

    #[serde(default = "default_max_citations")]
    pub max_citations: usize,
}

fn default_threshold_bytes() -> usize {
    4096
}

fn default_min_relevance() -> f64 {
    0.1
}

fn default_top_experiences() -> usize {
    5
}

fn default_top_education() -> usize {
    2
}

fn default_top_skills() -> usize {
    20
}

fn default_max_citations() -> usize {
    3
}

impl Default for PackerConfig {
    fn default() -> Self {
        Self {
            threshold_bytes: default_threshold_bytes(),
            min_relevance: default_min_relevance(),
            top_experiences: default_top_experiences(),
            top_education: default_top_education(),
            top_skills: default_top_skills(),
            max_citations: default_max_citations(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Experience,
    Education,
    Skill,
}

/// One kept entry and its score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackedSection {
    pub kind: SectionKind,

    /// Index of the entry in the original record
    pub original_index: usize,

    pub relevance: f64,
}

/// The reduced record plus packing accounting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackedContext {
    /// Identity, kept entries, every certification and language
    pub record: CandidateRecord,

    /// Kept experience, education and skill entries in record order
    pub sections: Vec<PackedSection>,

    /// Literal mission quotes from the top-ranked experiences, with paths
    /// into the original record
    pub citations: Vec<Evidence>,

    pub original_bytes: usize,
    pub packed_bytes: usize,

    /// `packed_bytes / original_bytes`
    pub compression_ratio: f64,

    pub fallback: bool,
}

impl PackedContext {
    fn passthrough(record: &CandidateRecord, bytes: usize) -> Self {
        Self {
            record: record.clone(),
            sections: Vec::new(),
            citations: Vec::new(),
            original_bytes: bytes,
            packed_bytes: bytes,
            compression_ratio: 1.0,
            fallback: true,
        }
    }

    /// Bytes saved by packing.
    pub fn bytes_saved(&self) -> usize {
        self.original_bytes.saturating_sub(self.packed_bytes)
    }

    /// Position in the original record of the `packed`-th kept entry of `kind`.
    pub fn original_index(&self, kind: SectionKind, packed: usize) -> Option<usize> {
        if self.fallback {
            return Some(packed);
        }
        self.sections
            .iter()
            .filter(|s| s.kind == kind)
            .nth(packed)
            .map(|s| s.original_index)
    }

    /// Rewrite experience indices and evidence paths in `result`, which an
    /// evaluator produced against the packed record, so they point into the
    /// original record. Indices with no kept entry are left as they are.
    pub fn restore_indices(&self, result: &mut EvaluationResult) {
        if self.fallback {
            return;
        }
        for experience in &mut result.relevance_summary.by_experience {
            if let Some(i) = self.original_index(SectionKind::Experience, experience.experience_index) {
                experience.experience_index = i;
            }
            self.restore_paths(&mut experience.evidence);
        }
        for point in result.strengths.iter_mut().chain(result.improvements.iter_mut()) {
            self.restore_paths(&mut point.evidence);
        }
        for rule in &mut result.failed_rules {
            self.restore_paths(&mut rule.evidence);
        }
    }

    fn restore_paths(&self, evidence: &mut [Evidence]) {
        for item in evidence {
            let path = item.path.trim();
            let Some(caps) = INDEXED_SECTION.captures(path) else {
                continue;
            };
            let kind = match &caps["section"] {
                "experiences" => SectionKind::Experience,
                "education" => SectionKind::Education,
                _ => SectionKind::Skill,
            };
            let Some(original) = caps["index"]
                .parse()
                .ok()
                .and_then(|i| self.original_index(kind, i))
            else {
                continue;
            };
            let restored = format!("{}[{}]{}", &caps["section"], original, &path[caps[0].len()..]);
            item.path = restored;
        }
    }
}

/// What an evaluator receives: the packed subset or the full record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "content", rename_all = "snake_case")]
pub enum EvaluatorInput {
    Packed(PackedContext),
    Full(CandidateRecord),
}

impl EvaluatorInput {
    /// The record an evaluator should read.
    pub fn record(&self) -> &CandidateRecord {
        match self {
            EvaluatorInput::Packed(ctx) => &ctx.record,
            EvaluatorInput::Full(record) => record,
        }
    }

    pub fn citations(&self) -> &[Evidence] {
        match self {
            EvaluatorInput::Packed(ctx) => &ctx.citations,
            EvaluatorInput::Full(_) => &[],
        }
    }

    pub fn is_packed(&self) -> bool {
        matches!(self, EvaluatorInput::Packed(ctx) if !ctx.fallback)
    }

    /// Map `result` back onto the original record; a no-op for full input.
    pub fn restore_indices(&self, result: &mut EvaluationResult) {
        if let EvaluatorInput::Packed(ctx) = self {
            ctx.restore_indices(result);
        }
    }
}

impl From<PackedContext> for EvaluatorInput {
    fn from(ctx: PackedContext) -> Self {
        if ctx.fallback {
            EvaluatorInput::Full(ctx.record)
        } else {
            EvaluatorInput::Packed(ctx)
        }
    }
}

/// Keyword tiers with their relevance weight.
struct Tiers {
    direct: BTreeSet<String>,
    adjacent: BTreeSet<String>,
    peripheral: BTreeSet<String>,
}

impl Tiers {
    fn from_job(job: &JobSpecification) -> Self {
        Self {
            direct: keyword_set(job.keywords.direct.iter().chain(&job.required_skills)),
            adjacent: keyword_set(job.keywords.adjacent.iter().chain(&job.nice_to_have_skills)),
            peripheral: keyword_set(&job.keywords.peripheral),
        }
    }

    fn score(&self, terms: &TermSet) -> f64 {
        let score = DIRECT_WEIGHT * overlap_coefficient(terms, &self.direct)
            + ADJACENT_WEIGHT * overlap_coefficient(terms, &self.adjacent)
            + PERIPHERAL_WEIGHT * overlap_coefficient(terms, &self.peripheral);
        score.min(1.0)
    }

    fn all(&self) -> BTreeSet<String> {
        self.direct
            .iter()
            .chain(&self.adjacent)
            .chain(&self.peripheral)
            .cloned()
            .collect()
    }
}

/// Relevance-based record reducer.
#[derive(Debug, Clone, Default)]
pub struct ContextPacker {
    config: PackerConfig,
}

impl ContextPacker {
    pub fn new(config: PackerConfig) -> Self {
        Self { config }
    }

    /// Pack `record` for `job`.
    pub fn pack(&self, record: &CandidateRecord, job: &JobSpecification) -> PackedContext {
        let original_bytes = serialized_len(record);
        if original_bytes < self.config.threshold_bytes {
            return PackedContext::passthrough(record, original_bytes);
        }

        let tiers = Tiers::from_job(job);

        let experience_scores: Vec<f64> = record
            .experiences
            .iter()
            .map(|e| tiers.score(&TermSet::from_fragments(e.text_fragments())))
            .collect();
        let education_scores: Vec<f64> = record
            .education
            .iter()
            .map(|e| tiers.score(&TermSet::from_fragments(e.text_fragments())))
            .collect();
        let skill_scores: Vec<f64> = record
            .skills
            .iter()
            .map(|s| tiers.score(&TermSet::from_text(s)))
            .collect();

        let experiences = self.select(&experience_scores, self.config.top_experiences);
        let education = self.select(&education_scores, self.config.top_education);
        let skills = self.select(&skill_scores, self.config.top_skills);

        let citations = self.citations(record, &experience_scores, &experiences, &tiers.all());

        let packed = CandidateRecord {
            identity: record.identity.clone(),
            experiences: experiences.iter().map(|&i| record.experiences[i].clone()).collect(),
            education: education.iter().map(|&i| record.education[i].clone()).collect(),
            skills: skills.iter().map(|&i| record.skills[i].clone()).collect(),
            languages: record.languages.clone(),
            certifications: record.certifications.clone(),
        };

        let mut sections = Vec::new();
        for (kind, kept, scores) in [
            (SectionKind::Experience, &experiences, &experience_scores),
            (SectionKind::Education, &education, &education_scores),
            (SectionKind::Skill, &skills, &skill_scores),
        ] {
            sections.extend(kept.iter().map(|&i| PackedSection {
                kind,
                original_index: i,
                relevance: scores[i],
            }));
        }

        let packed_bytes = serialized_len(&packed);
        PackedContext {
            record: packed,
            sections,
            citations,
            original_bytes,
            packed_bytes,
            compression_ratio: packed_bytes as f64 / original_bytes as f64,
            fallback: false,
        }
    }

    /// Indices above the relevance floor, best `limit` of them, in original order.
    fn select(&self, scores: &[f64], limit: usize) -> Vec<usize> {
        let mut ranked: Vec<usize> = (0..scores.len())
            .filter(|&i| scores[i] >= self.config.min_relevance)
            .collect();
        // Stable: equal scores keep record order
        ranked.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
        ranked.truncate(limit);
        ranked.sort_unstable();
        ranked
    }

    fn citations(
        &self,
        record: &CandidateRecord,
        scores: &[f64],
        kept: &[usize],
        keywords: &BTreeSet<String>,
    ) -> Vec<Evidence> {
        let mut ranked = kept.to_vec();
        ranked.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

        let mut citations = Vec::new();
        for i in ranked {
            if citations.len() >= self.config.max_citations {
                break;
            }
            let best = record.experiences[i]
                .missions
                .iter()
                .enumerate()
                .map(|(j, m)| (j, TermSet::from_text(m).matched(keywords).len()))
                .filter(|(_, hits)| *hits > 0)
                .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)));
            if let Some((j, _)) = best {
                citations.push(Evidence::from_mission(
                    i,
                    j,
                    record.experiences[i].missions[j].clone(),
                ));
            }
        }
        citations
    }
}

fn serialized_len(record: &CandidateRecord) -> usize {
    serde_json::to_vec(record).map(|v| v.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::{
        ExperienceRelevance, FailedRule, Point, Recommendation, RelevanceCategory, RelevanceSummary, Subscores,
    };
    use crate::record::{CandidateIdentity, Certification, Education, Experience};

    const JOB_YAML: &str = r#"
title: "Rust Engineer"
required_skills: ["Rust"]
nice_to_have_skills: ["Kubernetes"]
keywords:
  direct: ["rust", "tokio"]
  adjacent: ["c++", "go"]
  peripheral: ["linux"]
analysis_date: "2025-06-01"
"#;

    fn job() -> JobSpecification {
        JobSpecification::from_yaml(JOB_YAML).unwrap()
    }

    fn experience(title: &str, missions: &[&str]) -> Experience {
        Experience {
            title: title.to_string(),
            employer: "Employer".to_string(),
            start: "2019-01".parse().unwrap(),
            end: Some("2020-01".parse().unwrap()),
            missions: missions.iter().map(|m| m.to_string()).collect(),
        }
    }

    fn large_record() -> CandidateRecord {
        let filler = "Coordinated weekly meetings and wrote quarterly reports for stakeholders. ".repeat(6);
        let mut experiences = vec![
            experience("Rust Developer", &[&filler, "Built a Tokio based gateway in Rust"]),
            experience("Barista", &[&filler]),
            experience("Go Engineer", &["Wrote Go services on Linux", &filler]),
        ];
        for i in 0..6 {
            experiences.push(experience(&format!("Office Assistant {}", i), &[&filler]));
        }
        CandidateRecord {
            identity: CandidateIdentity {
                subject_id: "c-9".to_string(),
                ..Default::default()
            },
            experiences,
            education: vec![
                Education {
                    degree: "BSc Computer Science".to_string(),
                    institution: "Uni".to_string(),
                    field: Some("Rust and C++ systems".to_string()),
                    year: Some(2018),
                },
                Education {
                    degree: "Diploma in Hospitality".to_string(),
                    institution: "College".to_string(),
                    field: None,
                    year: Some(2014),
                },
            ],
            skills: vec!["Rust".to_string(), "Cooking".to_string(), "Kubernetes".to_string()],
            certifications: vec![Certification {
                name: "First Aid".to_string(),
                issuer: None,
                year: None,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_small_record_falls_back() {
        let record = CandidateRecord {
            identity: CandidateIdentity {
                subject_id: "c-1".to_string(),
                ..Default::default()
            },
            skills: vec!["Rust".to_string()],
            ..Default::default()
        };
        let packed = ContextPacker::default().pack(&record, &job());
        assert!(packed.fallback);
        assert_eq!(packed.record, record);
        assert_eq!(packed.compression_ratio, 1.0);
        assert!(!EvaluatorInput::from(packed).is_packed());
    }

    #[test]
    fn test_large_record_is_reduced() {
        let record = large_record();
        let packed = ContextPacker::default().pack(&record, &job());
        assert!(!packed.fallback);
        assert!(packed.packed_bytes < packed.original_bytes);
        assert!(packed.compression_ratio < 1.0);

        let titles: Vec<&str> = packed.record.experiences.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["Rust Developer", "Go Engineer"]);
        assert_eq!(packed.record.education.len(), 1);
        assert_eq!(packed.record.skills, vec!["Rust".to_string(), "Kubernetes".to_string()]);
        // Certifications are always kept
        assert_eq!(packed.record.certifications, record.certifications);
    }

    #[test]
    fn test_sections_reference_original_entries() {
        let record = large_record();
        let packed = ContextPacker::default().pack(&record, &job());
        let experience_indices: Vec<usize> = packed
            .sections
            .iter()
            .filter(|s| s.kind == SectionKind::Experience)
            .map(|s| s.original_index)
            .collect();
        assert_eq!(experience_indices, vec![0, 2]);
        for (kept, index) in packed.record.experiences.iter().zip(&experience_indices) {
            assert_eq!(kept, &record.experiences[*index]);
        }
    }

    #[test]
    fn test_citations_are_grounded_in_original() {
        let record = large_record();
        let packed = ContextPacker::default().pack(&record, &job());
        assert_eq!(packed.citations.len(), 2);
        assert_eq!(packed.citations[0].path, "experiences[0].missions[1]");
        for citation in &packed.citations {
            assert!(citation.is_grounded(&record));
        }
    }

    #[test]
    fn test_top_k_limit() {
        let record = large_record();
        let config = PackerConfig {
            top_experiences: 1,
            ..Default::default()
        };
        let packed = ContextPacker::new(config).pack(&record, &job());
        assert_eq!(packed.record.experiences.len(), 1);
        assert_eq!(packed.record.experiences[0].title, "Rust Developer");
    }

    fn packed_opinion() -> EvaluationResult {
        EvaluationResult {
            meets_all_mandatory: false,
            failed_rules: vec![FailedRule {
                rule_id: "M1".to_string(),
                reason: "Kubernetes only listed".to_string(),
                evidence: vec![Evidence::from_skill(1, "Kubernetes")],
            }],
            relevance_summary: RelevanceSummary {
                by_experience: vec![ExperienceRelevance {
                    experience_index: 1,
                    title: "Go Engineer".to_string(),
                    category: RelevanceCategory::Adjacent,
                    evidence: vec![Evidence::from_mission(1, 0, "Wrote Go services on Linux")],
                }],
                ..Default::default()
            },
            subscores: Subscores::default(),
            overall_score: 60.0,
            recommendation: Recommendation::Consider,
            strengths: vec![Point {
                point: "Async Rust".to_string(),
                evidence: vec![
                    Evidence::from_mission(0, 1, "Built a Tokio based gateway in Rust"),
                    Evidence::new("identity.headline", "Engineer"),
                ],
            }],
            improvements: vec![Point {
                point: "Degree".to_string(),
                evidence: vec![
                    Evidence::new("education[0].degree", "BSc Computer Science"),
                    Evidence::from_title(7, "Office Assistant 4"),
                ],
            }],
        }
    }

    #[test]
    fn test_restore_indices_points_into_original() {
        let record = large_record();
        let packed = ContextPacker::default().pack(&record, &job());
        let mut result = packed_opinion();
        // Paths are valid against the packed record before restoring
        assert!(result.relevance_summary.by_experience[0].evidence[0].is_grounded(&packed.record));

        packed.restore_indices(&mut result);

        let relevance = &result.relevance_summary.by_experience[0];
        assert_eq!(relevance.experience_index, 2);
        assert_eq!(relevance.evidence[0].path, "experiences[2].missions[0]");
        assert!(relevance.evidence[0].is_grounded(&record));
        assert_eq!(result.strengths[0].evidence[0].path, "experiences[0].missions[1]");
        assert_eq!(result.strengths[0].evidence[1].path, "identity.headline");
        assert_eq!(result.failed_rules[0].evidence[0].path, "skills[2]");
        assert!(result.failed_rules[0].evidence[0].is_grounded(&record));
        assert_eq!(result.improvements[0].evidence[0].path, "education[0].degree");
        // No kept entry at that position
        assert_eq!(result.improvements[0].evidence[1].path, "experiences[7].title");
    }

    #[test]
    fn test_restore_indices_is_identity_for_full_input() {
        let record = CandidateRecord {
            skills: vec!["Rust".to_string()],
            ..Default::default()
        };
        let input = EvaluatorInput::from(ContextPacker::default().pack(&record, &job()));
        let mut result = packed_opinion();
        input.restore_indices(&mut result);
        assert_eq!(result, packed_opinion());
    }
}
