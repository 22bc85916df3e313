//! Testing utilities.
//!
//! This module provides tools for exercising the loop without API calls:
//! - `ScriptedGenerator` replays queued responses and records every prompt
//! - `sample_knowledge_base` builds a small, fixed reference corpus

use crate::generation::{GenerationError, Generator};
use crate::kb::{Category, KbEntry, KnowledgeBase};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// A generator that returns scripted responses in order.
///
/// Clones share the same script, so a test can keep a handle for
/// inspecting prompts after moving a clone into a drafter or verifier.
#[derive(Clone, Default)]
pub struct ScriptedGenerator {
    inner: Arc<Mutex<Script>>,
}

#[derive(Default)]
struct Script {
    responses: VecDeque<Result<String, GenerationError>>,
    prompts: Vec<String>,
}

impl ScriptedGenerator {
    /// Create a generator with scripted responses.
    pub fn new(responses: Vec<Result<String, GenerationError>>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Script {
                responses: responses.into(),
                prompts: Vec::new(),
            })),
        }
    }

    /// A service fault to place in a script.
    pub fn fault(message: impl Into<String>) -> GenerationError {
        GenerationError::ServiceFault(message.into())
    }

    /// Add a response to the queue.
    pub fn queue(&self, response: Result<String, GenerationError>) {
        self.lock().responses.push_back(response);
    }

    /// Every prompt received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.lock().prompts.clone()
    }

    /// Responses not consumed yet.
    pub fn remaining(&self) -> usize {
        self.lock().responses.len()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let mut script = self.lock();
        script.prompts.push(prompt.to_string());
        script
            .responses
            .pop_front()
            .unwrap_or_else(|| Err(Self::fault("no more scripted responses")))
    }
}

/// A small reference corpus for tests.
pub fn sample_knowledge_base() -> KnowledgeBase {
    KnowledgeBase::from_entries(
        vec![
            KbEntry::technique(
                "T1190",
                "Exploit Public-Facing Application",
                "Adversaries may attempt to exploit a weakness in an Internet-facing host or system.",
            ),
            KbEntry::technique(
                "T1566",
                "Phishing",
                "Adversaries may send phishing messages to gain access to victim systems.",
            ),
            KbEntry::technique(
                "T1566.002",
                "Spearphishing Link",
                "Adversaries may send spearphishing emails with a malicious link.",
            ),
            KbEntry::technique(
                "T1056.003",
                "Web Portal Capture",
                "Adversaries may install code on externally facing portals to capture credentials.",
            ),
        ],
        vec![
            KbEntry::element(
                "K0427",
                Category::Knowledge,
                "Knowledge of social engineering and phishing techniques",
            ),
            KbEntry::element("S0114", Category::Skill, "Skill in analyzing email headers"),
            KbEntry::element(
                "A0021",
                Category::Ability,
                "Ability to recognize credential harvesting pages",
            ),
            KbEntry::element(
                "T0260",
                Category::Task,
                "Analyze suspicious email messages and links for phishing indicators",
            ),
            KbEntry::element("OG-WRL-001", Category::Role, "Cyber Defense Analyst"),
        ],
    )
}
