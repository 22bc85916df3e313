//! The drafter: proposes a framework mapping for an activity description.

use crate::generation::Generator;
use crate::record::{parse_model_json, prefix, CandidateRecord, Focus};
use crate::verifier::SUGGESTIONS_MARKER;

/// Marker used in place of feedback on the first attempt.
pub const FIRST_ATTEMPT: &str = "None - First Attempt";

const ROLE_PROMPT: &str = r#"You are a specialized cybersecurity research analyst.
Your goal: map raw, informal or slang descriptions of attacker activity to strict professional frameworks.

Task:
1. Analyze the user's input.
2. Identify the exact MITRE ATT&CK technique IDs (Txxxx or Txxxx.xxx).
3. Identify the exact NICE Framework knowledge, skill, ability and task IDs.
4. Rewrite the input as a professional log entry.

Constraint: you must output valid JSON only."#;

const OUTPUT_SCHEMA: &str = r#"{
    "summary": "Professional summary",
    "techniques": [
        {"id": "TXXXX", "name": "Technique Name"}
    ],
    "knowledge": [
        {"id": "K0001", "description": "Knowledge description"}
    ],
    "skills": [
        {"id": "S0001", "description": "Skill description"}
    ],
    "abilities": [
        {"id": "A0001", "description": "Ability description"}
    ],
    "tasks": [
        {"id": "T0001", "description": "Task description"}
    ],
    "justification": "Why these techniques and KSAs match"
}"#;

/// Emphasis sentence for the focus mode.
fn focus_instruction(focus: Focus) -> &'static str {
    match focus {
        Focus::TechniqueOnly => "Prioritize MITRE ATT&CK descriptions and make sure the right Txxxx codes are highlighted. KSA entries are supplemental and only allowed when they arise from the technique analysis.",
        Focus::KsaOnly => "Prioritize Knowledge/Skill/Ability/Task mappings that align with the input. Mention MITRE techniques only if they directly support the required KSAs.",
        Focus::Both => "Balance MITRE ATT&CK techniques with Knowledge/Skill/Ability/Task mappings, explaining why each framework element is relevant.",
    }
}

/// Section constraint for the focus mode.
fn focus_guidance(focus: Focus) -> &'static str {
    match focus {
        Focus::TechniqueOnly => "Only return MITRE references in 'techniques'. Leave 'knowledge', 'skills', 'abilities' and 'tasks' empty.",
        Focus::KsaOnly => "Only return KSA entries in 'knowledge', 'skills', 'abilities' and 'tasks'. Leave 'techniques' empty.",
        Focus::Both => "Return both MITRE techniques and KSA entries. Each category must be justified against the user's input.",
    }
}

/// Builds drafting prompts and parses the drafted record.
pub struct Drafter {
    generator: Box<dyn Generator>,
}

impl Drafter {
    pub fn new(generator: Box<dyn Generator>) -> Self {
        Self { generator }
    }

    /// Draft a candidate record.
    ///
    /// Returns `None` when the service faults or the output is not a usable
    /// record; drafting failures never abort the loop.
    pub async fn draft(&self, input: &str, feedback: &str, focus: Focus) -> Option<CandidateRecord> {
        let prompt = build_prompt(input, feedback, focus);
        tracing::debug!(prompt_len = prompt.len(), "drafting");

        let text = match self.generator.generate(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "drafter generation failed");
                return None;
            }
        };

        parse_draft(&text)
    }
}

/// Parse drafter output; malformed or empty records yield `None`.
pub fn parse_draft(text: &str) -> Option<CandidateRecord> {
    match parse_model_json::<CandidateRecord>(text) {
        Ok(record) if record.is_empty() => {
            tracing::warn!(raw = %prefix(text, 100), "drafter produced an empty record");
            None
        }
        Ok(record) => Some(record),
        Err(e) => {
            tracing::warn!(error = %e, raw = %prefix(text, 100), "drafter produced invalid JSON");
            None
        }
    }
}

/// Assemble the single drafting prompt.
pub fn build_prompt(input: &str, feedback: &str, focus: Focus) -> String {
    let safe_input = input.replace('"', "'");
    let feedback = if feedback.trim().is_empty() {
        FIRST_ATTEMPT
    } else {
        feedback
    };

    format!(
        r#"[SYSTEM]
{ROLE_PROMPT}

[FOCUS]
{instruction}

[FOCUS GUIDANCE]
{guidance}

[USER INPUT]
"{safe_input}"

[PREVIOUS FEEDBACK]
{feedback}

[REQUIRED JSON OUTPUT FORMAT]
{OUTPUT_SCHEMA}

[CRITICAL INSTRUCTION]
If the [PREVIOUS FEEDBACK] contains "{SUGGESTIONS_MARKER}", you MUST incorporate those specific IDs into your new draft. They come from the internal database and are pre-validated.

[WARNING: LEGACY IDS]
Do NOT reuse legacy NICE Framework IDs such as K0001, K0002 or S0001 unless they are explicitly defined in the feedback context.
The internal database uses a newer version of the framework.
If you are unsure of an ID, describe the concept and let the auditor suggest the correct ID."#,
        instruction = focus_instruction(focus),
        guidance = focus_guidance(focus),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedGenerator;

    #[test]
    fn test_prompt_first_attempt_marker() {
        let prompt = build_prompt("sent a \"fake\" login page", "", Focus::Both);
        assert!(prompt.contains(FIRST_ATTEMPT));
        assert!(prompt.contains("sent a 'fake' login page"));
        assert!(prompt.contains(SUGGESTIONS_MARKER));
        assert!(prompt.contains("legacy"));
        assert!(prompt.contains(r#""techniques""#));
    }

    #[test]
    fn test_prompt_threads_feedback_and_focus() {
        let prompt = build_prompt("x", "Invalid ID T9999", Focus::KsaOnly);
        assert!(prompt.contains("Invalid ID T9999"));
        assert!(!prompt.contains(FIRST_ATTEMPT));
        assert!(prompt.contains(focus_guidance(Focus::KsaOnly)));
        assert!(!prompt.contains(focus_guidance(Focus::TechniqueOnly)));
    }

    #[test]
    fn test_parse_draft_rejects_empty_object() {
        assert!(parse_draft("{}").is_none());
        assert!(parse_draft("This looks like phishing to me.").is_none());
    }

    #[tokio::test]
    async fn test_draft_parses_fenced_output() {
        let generator = ScriptedGenerator::new(vec![Ok(
            "```json\n{\"summary\": \"s\", \"techniques\": [{\"id\": \"T1566\", \"name\": \"Phishing\"}]}\n```"
                .to_string(),
        )]);
        let drafter = Drafter::new(Box::new(generator.clone()));

        let record = drafter.draft("input", "", Focus::Both).await.unwrap();
        assert_eq!(record.techniques[0].id, "T1566");
        assert_eq!(generator.prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_draft_service_fault_yields_none() {
        let generator = ScriptedGenerator::new(vec![Err(ScriptedGenerator::fault("quota exceeded"))]);
        let drafter = Drafter::new(Box::new(generator));
        assert!(drafter.draft("input", "", Focus::Both).await.is_none());
    }
}
