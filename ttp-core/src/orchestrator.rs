//! The draft/verify retry loop.

use crate::config::MapperConfig;
use crate::drafter::Drafter;
use crate::generation::{GeminiGenerator, GenerationSettings};
use crate::kb::KnowledgeBase;
use crate::record::{CandidateRecord, Focus, Verdict};
use crate::verifier::Verifier;
use gemini::Gemini;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

/// Default number of draft/verify attempts per run.
pub const DEFAULT_MAX_ATTEMPTS: usize = 5;

/// Feedback sent to the drafter after a drafting failure.
pub const MALFORMED_DRAFT_FEEDBACK: &str = "Previous JSON was invalid. Output strict JSON.";

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// A candidate was verified and grounded.
    Passed,
    /// The attempt budget ran out; the record, if any, is best effort.
    Exhausted,
}

/// The result of one run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub status: RunStatus,
    /// The passing candidate, or the last non-empty one on exhaustion.
    pub record: Option<CandidateRecord>,
    /// The most recent verdict.
    pub verdict: Option<Verdict>,
    pub attempts: usize,
    /// A knowledge base snapshot failed to load.
    pub kb_degraded: bool,
}

impl RunOutcome {
    pub fn passed(&self) -> bool {
        self.status == RunStatus::Passed
    }
}

#[derive(Default)]
struct LoopState {
    feedback: String,
    last: Option<CandidateRecord>,
    verdict: Option<Verdict>,
}

/// Restrict a candidate to the sections a focus mode asks for.
pub fn apply_focus(mut candidate: CandidateRecord, focus: Focus) -> CandidateRecord {
    match focus {
        Focus::TechniqueOnly => {
            candidate.knowledge.clear();
            candidate.skills.clear();
            candidate.abilities.clear();
            candidate.tasks.clear();
        }
        Focus::KsaOnly => candidate.techniques.clear(),
        Focus::Both => {}
    }
    candidate
}

/// Drives the drafter and verifier until a candidate passes or the budget runs out.
pub struct Orchestrator {
    drafter: Drafter,
    verifier: Verifier,
    max_attempts: usize,
}

impl Orchestrator {
    pub fn new(drafter: Drafter, verifier: Verifier) -> Self {
        Self {
            drafter,
            verifier,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Set the attempt budget; values below 1 are raised to 1.
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Load the knowledge base and wire Gemini-backed roles from a config.
    pub async fn from_config(config: &MapperConfig) -> Self {
        let kb = KnowledgeBase::load(config.technique_path(), config.role_path()).await;

        let role = |temperature| {
            GeminiGenerator::new(
                Gemini::new(config.api_key.clone()).with_model(config.model.clone()),
                GenerationSettings {
                    model: None,
                    temperature,
                    max_output_tokens: config.max_output_tokens,
                    google_search: config.search_grounding,
                },
            )
        };

        let drafter = Drafter::new(Box::new(role(config.drafter_temperature)));
        let verifier = Verifier::new(Box::new(role(config.verifier_temperature)), Arc::new(kb));

        Self::new(drafter, verifier).with_max_attempts(config.max_attempts)
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn knowledge_base(&self) -> &KnowledgeBase {
        self.verifier.knowledge_base()
    }

    /// Map an activity description.
    ///
    /// Always terminates within the attempt budget; every failure along the
    /// way becomes feedback for the next attempt.
    pub async fn run(&self, input: &str, focus: Focus) -> RunOutcome {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("ttp.run", run_id = %run_id, %focus);
        self.run_inner(run_id, input, focus).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid, input: &str, focus: Focus) -> RunOutcome {
        let kb_degraded = self.knowledge_base().is_degraded();
        if kb_degraded {
            tracing::warn!("running with a degraded knowledge base");
        }

        let mut state = LoopState::default();

        for attempt in 1..=self.max_attempts {
            tracing::info!(attempt, max = self.max_attempts, "drafting");

            let Some(candidate) = self.drafter.draft(input, &state.feedback, focus).await else {
                tracing::warn!(attempt, "drafting failed, requesting strict JSON");
                state.feedback = MALFORMED_DRAFT_FEEDBACK.to_string();
                continue;
            };
            let candidate = apply_focus(candidate, focus);

            let verdict = self.verifier.verify(input, &candidate, focus).await;
            tracing::info!(attempt, status = %verdict.status, "verdict");

            if verdict.passed() {
                return RunOutcome {
                    run_id,
                    status: RunStatus::Passed,
                    record: Some(candidate),
                    verdict: Some(verdict),
                    attempts: attempt,
                    kb_degraded,
                };
            }

            state.feedback = verdict.feedback.clone();
            state.verdict = Some(verdict);
            if !candidate.is_empty() {
                state.last = Some(candidate);
            }
        }

        tracing::warn!(attempts = self.max_attempts, "attempt budget exhausted, returning best effort");
        RunOutcome {
            run_id,
            status: RunStatus::Exhausted,
            record: state.last,
            verdict: state.verdict,
            attempts: self.max_attempts,
            kb_degraded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{KsaRef, TechniqueRef};
    use crate::testing::{sample_knowledge_base, ScriptedGenerator};

    fn candidate() -> CandidateRecord {
        CandidateRecord {
            summary: "s".to_string(),
            techniques: vec![TechniqueRef {
                id: "T1566".to_string(),
                name: "Phishing".to_string(),
            }],
            knowledge: vec![KsaRef {
                id: "K0427".to_string(),
                description: "social engineering".to_string(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_apply_focus() {
        let mitre = apply_focus(candidate(), Focus::TechniqueOnly);
        assert!(!mitre.has_ksa());
        assert_eq!(mitre.techniques.len(), 1);

        let ksa = apply_focus(candidate(), Focus::KsaOnly);
        assert!(ksa.techniques.is_empty());
        assert_eq!(ksa.knowledge.len(), 1);

        assert_eq!(apply_focus(candidate(), Focus::Both), candidate());
    }

    #[tokio::test]
    async fn test_malformed_draft_feedback_reaches_next_prompt() {
        let drafts = ScriptedGenerator::new(vec![
            Ok("not json".to_string()),
            Ok("not json either".to_string()),
        ]);
        let orchestrator = Orchestrator::new(
            Drafter::new(Box::new(drafts.clone())),
            Verifier::new(
                Box::new(ScriptedGenerator::default()),
                Arc::new(sample_knowledge_base()),
            ),
        )
        .with_max_attempts(2);

        let outcome = orchestrator.run("input", Focus::Both).await;
        assert_eq!(outcome.status, RunStatus::Exhausted);
        assert!(outcome.record.is_none());
        assert!(outcome.verdict.is_none());
        assert_eq!(outcome.attempts, 2);
        assert!(drafts.prompts()[1].contains(MALFORMED_DRAFT_FEEDBACK));
    }

    #[test]
    fn test_budget_never_zero() {
        let orchestrator = Orchestrator::new(
            Drafter::new(Box::new(ScriptedGenerator::default())),
            Verifier::new(
                Box::new(ScriptedGenerator::default()),
                Arc::new(KnowledgeBase::default()),
            ),
        )
        .with_max_attempts(0);
        assert_eq!(orchestrator.max_attempts(), 1);
    }
}
