//! Scripted evaluators and fixtures for tests.
//!
//! Enabled for this crate's own tests and behind the `mock` feature for
//! downstream test suites.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tribunal_core::evaluation::{ExperienceRelevance, MonthsByCategory, RelevanceSummary};
use tribunal_core::record::{CandidateIdentity, Experience};
use tribunal_core::{
    CandidateRecord, EvaluationResult, Evidence, JobSpecification, Point, Recommendation,
    RelevanceCategory, Subscores, YearMonth,
};

use crate::evaluators::{
    Arbiter, ArbiterVerdict, ArbitrationRequest, Billed, EvaluationRequest, EvaluatorBackend,
    EvaluatorError, Extractor,
};
use crate::providers::ProviderError;
use crate::resilience::Usage;

/// What a scripted call does.
#[derive(Debug, Clone)]
pub enum Script<T> {
    Return(T),
    /// Return after sleeping
    Delay(T, Duration),
    /// Fail as a transport error
    Fail(String),
    /// Never complete
    Hang,
    Panic,
}

impl<T: Clone> Script<T> {
    async fn run(&self, usage: Usage) -> Result<Billed<T>, EvaluatorError> {
        match self {
            Script::Return(value) => Ok(Billed::new(value.clone(), usage)),
            Script::Delay(value, delay) => {
                tokio::time::sleep(*delay).await;
                Ok(Billed::new(value.clone(), usage))
            }
            Script::Fail(message) => Err(ProviderError::Http(message.clone()).into()),
            Script::Hang => std::future::pending().await,
            Script::Panic => panic!("scripted evaluator panicked"),
        }
    }
}

/// An evaluator backend that plays back fixed outcomes.
#[derive(Debug)]
pub struct ScriptedEvaluator {
    name: String,
    model: String,
    cost_usd: f64,
    evaluate: Script<EvaluationResult>,
    arbitrate: Option<Script<ArbiterVerdict>>,
    extract: Option<Script<CandidateRecord>>,
    calls: AtomicUsize,
    arbitrations: AtomicUsize,
    extractions: AtomicUsize,
}

impl ScriptedEvaluator {
    pub fn new(name: impl Into<String>, evaluate: Script<EvaluationResult>) -> Self {
        let name = name.into();
        Self {
            model: format!("scripted-{}", name),
            name,
            cost_usd: 0.0,
            evaluate,
            arbitrate: None,
            extract: None,
            calls: AtomicUsize::new(0),
            arbitrations: AtomicUsize::new(0),
            extractions: AtomicUsize::new(0),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Dollars billed per successful call.
    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.cost_usd = cost_usd;
        self
    }

    pub fn with_arbiter(mut self, script: Script<ArbiterVerdict>) -> Self {
        self.arbitrate = Some(script);
        self
    }

    pub fn with_extractor(mut self, script: Script<CandidateRecord>) -> Self {
        self.extract = Some(script);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn arbitrations(&self) -> usize {
        self.arbitrations.load(Ordering::SeqCst)
    }

    pub fn extractions(&self) -> usize {
        self.extractions.load(Ordering::SeqCst)
    }

    fn usage(&self) -> Usage {
        Usage {
            calls: 1,
            cost_usd: self.cost_usd,
            ..Default::default()
        }
    }
}

#[async_trait]
impl EvaluatorBackend for ScriptedEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn evaluate(&self, _request: &EvaluationRequest) -> Result<Billed<EvaluationResult>, EvaluatorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.evaluate.run(self.usage()).await
    }

    fn as_extractor(&self) -> Option<&dyn Extractor> {
        self.extract.as_ref().map(|_| self as &dyn Extractor)
    }

    fn as_arbiter(&self) -> Option<&dyn Arbiter> {
        self.arbitrate.as_ref().map(|_| self as &dyn Arbiter)
    }
}

#[async_trait]
impl Arbiter for ScriptedEvaluator {
    async fn arbitrate(&self, _request: &ArbitrationRequest) -> Result<Billed<ArbiterVerdict>, EvaluatorError> {
        self.arbitrations.fetch_add(1, Ordering::SeqCst);
        match &self.arbitrate {
            Some(script) => script.run(self.usage()).await,
            None => Err(EvaluatorError::Unsupported("arbitration")),
        }
    }
}

#[async_trait]
impl Extractor for ScriptedEvaluator {
    async fn extract(&self, _raw: &str) -> Result<Billed<CandidateRecord>, EvaluatorError> {
        self.extractions.fetch_add(1, Ordering::SeqCst);
        match &self.extract {
            Some(script) => script.run(self.usage()).await,
            None => Err(EvaluatorError::Unsupported("extraction")),
        }
    }
}

const SAMPLE_JOB: &str = r#"
title: "Rust Engineer"
mandatory_rules:
  - id: "M1"
    description: "At least 3 years of Rust experience"
    severity: critical
  - id: "M2"
    description: "Eligible to work in the EU"
required_skills: ["Rust", "Tokio"]
nice_to_have_skills: ["Kubernetes"]
keywords:
  direct: ["rust", "systems programming"]
  adjacent: ["c++", "go"]
  peripheral: ["linux"]
thresholds:
  years_for_full_score: 5
  shortlist_min: 80
  consider_min: 60
analysis_date: "2025-06-01"
"#;

/// Job with a critical rule `M1`, a standard rule `M2`, shortlist at 80 and
/// consider at 60.
pub fn sample_job() -> JobSpecification {
    match JobSpecification::from_yaml(SAMPLE_JOB) {
        Ok(job) => job,
        Err(e) => panic!("sample job fixture is invalid: {}", e),
    }
}

/// A record that clears the prefilter without soft flags.
pub fn sample_record() -> CandidateRecord {
    CandidateRecord {
        identity: CandidateIdentity {
            subject_id: "cand-001".to_string(),
            full_name: Some("Grace Hopper".to_string()),
            email: Some("grace@example.org".to_string()),
            phone: Some("+1 202 555 0143".to_string()),
            location: Some("Arlington".to_string()),
            headline: Some("Systems engineer".to_string()),
        },
        experiences: vec![Experience {
            title: "Software Engineer".to_string(),
            employer: "Acme".to_string(),
            start: january(2018),
            end: None,
            missions: vec!["Systems programming in Rust and C++".to_string()],
        }],
        skills: ["Rust", "Tokio", "Kubernetes", "Go", "Linux"]
            .into_iter()
            .map(String::from)
            .collect(),
        ..Default::default()
    }
}

/// A record the prefilter rejects as out of scope.
pub fn out_of_scope_record() -> CandidateRecord {
    CandidateRecord {
        identity: CandidateIdentity {
            subject_id: "cand-002".to_string(),
            ..Default::default()
        },
        experiences: vec![Experience {
            title: "Pastry Chef".to_string(),
            employer: "Bakery".to_string(),
            start: january(2018),
            end: None,
            missions: vec!["Managed the bakery".to_string()],
        }],
        skills: vec!["Pastry".to_string(), "Baking".to_string()],
        ..Default::default()
    }
}

fn january(year: i32) -> YearMonth {
    match YearMonth::new(year, 1) {
        Some(month) => month,
        None => unreachable!(),
    }
}

/// A well-evidenced result with every subscore equal to `overall`.
///
/// Carries four citations, so it trips no evidence trigger, and passes every
/// mandatory rule.
pub fn sample_result(overall: f64, recommendation: Recommendation) -> EvaluationResult {
    let mission = Evidence::from_mission(0, 0, "Systems programming in Rust and C++");
    EvaluationResult {
        meets_all_mandatory: true,
        failed_rules: Vec::new(),
        relevance_summary: RelevanceSummary {
            months: MonthsByCategory {
                direct: 89,
                ..Default::default()
            },
            by_experience: vec![ExperienceRelevance {
                experience_index: 0,
                title: "Software Engineer".to_string(),
                category: RelevanceCategory::Direct,
                evidence: vec![mission.clone()],
            }],
        },
        subscores: Subscores {
            experience: overall,
            skills_match: overall,
            nice_to_have: overall,
            experience_years: None,
        },
        overall_score: overall,
        recommendation,
        strengths: vec![Point {
            point: "Production Rust systems work".to_string(),
            evidence: vec![
                mission,
                Evidence::from_skill(0, "Rust"),
                Evidence::from_title(0, "Software Engineer"),
            ],
        }],
        improvements: vec![Point::new("No Kubernetes operations experience cited")],
    }
}
