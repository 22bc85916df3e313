//! Records exchanged with the generation capability.
//!
//! The drafter produces a [`CandidateRecord`], the verifier produces a
//! [`Verdict`]. Both arrive as model text and are validated on parse.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Treat an explicit `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A drafted technique reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechniqueRef {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
}

/// A drafted knowledge, skill, ability or task reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KsaRef {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
}

/// Which section of a candidate record an id was drafted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Techniques,
    Knowledge,
    Skills,
    Abilities,
    Tasks,
}

/// The structured mapping proposed by the drafter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRecord {
    /// Professional rewrite of the input.
    #[serde(default, alias = "refined_text", deserialize_with = "null_as_default")]
    pub summary: String,
    #[serde(default, alias = "mitre_attack", deserialize_with = "null_as_default")]
    pub techniques: Vec<TechniqueRef>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub knowledge: Vec<KsaRef>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub skills: Vec<KsaRef>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub abilities: Vec<KsaRef>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tasks: Vec<KsaRef>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub justification: String,
}

impl CandidateRecord {
    /// True when the record carries nothing at all.
    pub fn is_empty(&self) -> bool {
        self.summary.trim().is_empty()
            && self.justification.trim().is_empty()
            && self.techniques.is_empty()
            && !self.has_ksa()
    }

    /// True when any KSA section is populated.
    pub fn has_ksa(&self) -> bool {
        !(self.knowledge.is_empty()
            && self.skills.is_empty()
            && self.abilities.is_empty()
            && self.tasks.is_empty())
    }

    /// Every KSA section with its marker.
    pub fn ksa_sections(&self) -> [(Section, &[KsaRef]); 4] {
        [
            (Section::Knowledge, self.knowledge.as_slice()),
            (Section::Skills, self.skills.as_slice()),
            (Section::Abilities, self.abilities.as_slice()),
            (Section::Tasks, self.tasks.as_slice()),
        ]
    }

    /// Every `(section, id, drafted text)` in section order.
    pub fn references(&self) -> Vec<(Section, &str, &str)> {
        let mut refs: Vec<(Section, &str, &str)> = self
            .techniques
            .iter()
            .map(|t| (Section::Techniques, t.id.as_str(), t.name.as_str()))
            .collect();
        for (section, items) in self.ksa_sections() {
            refs.extend(
                items
                    .iter()
                    .map(|k| (section, k.id.as_str(), k.description.as_str())),
            );
        }
        refs
    }

    /// Distinct ids across all sections, sorted.
    pub fn identifiers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .references()
            .into_iter()
            .map(|(_, id, _)| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// The first drafted name or description for an id.
    pub fn drafted_text(&self, id: &str) -> Option<&str> {
        self.references()
            .into_iter()
            .find(|(_, ref_id, _)| ref_id.trim() == id)
            .map(|(_, _, text)| text)
    }

    /// Whether the id was drafted in the technique section.
    pub fn is_technique_ref(&self, id: &str) -> bool {
        self.techniques.iter().any(|t| t.id.trim() == id)
    }
}

/// Verdict outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VerdictStatus {
    #[serde(alias = "pass", alias = "Pass")]
    Pass,
    #[serde(alias = "fail", alias = "Fail")]
    Fail,
}

impl fmt::Display for VerdictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerdictStatus::Pass => write!(f, "PASS"),
            VerdictStatus::Fail => write!(f, "FAIL"),
        }
    }
}

/// The verifier's judgement of a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub status: VerdictStatus,
    #[serde(default, deserialize_with = "null_as_default")]
    pub feedback: String,
}

impl Verdict {
    pub fn pass(feedback: impl Into<String>) -> Self {
        Self {
            status: VerdictStatus::Pass,
            feedback: feedback.into(),
        }
    }

    pub fn fail(feedback: impl Into<String>) -> Self {
        Self {
            status: VerdictStatus::Fail,
            feedback: feedback.into(),
        }
    }

    pub fn passed(&self) -> bool {
        self.status == VerdictStatus::Pass
    }
}

/// Which identifier categories a run must populate and check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Focus {
    TechniqueOnly,
    KsaOnly,
    #[default]
    Both,
}

impl Focus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Focus::TechniqueOnly => "mitre",
            Focus::KsaOnly => "ksa",
            Focus::Both => "both",
        }
    }
}

impl fmt::Display for Focus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Focus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mitre" | "technique" | "techniques" => Ok(Focus::TechniqueOnly),
            "ksa" | "nice" => Ok(Focus::KsaOnly),
            "" | "both" => Ok(Focus::Both),
            other => Err(format!("unknown focus '{other}' (expected mitre, ksa or both)")),
        }
    }
}

/// Extract JSON from a response that might have markdown code blocks.
pub fn extract_json(text: &str) -> &str {
    let text = text.trim();

    // Handle ```json ... ``` blocks
    if let Some(start) = text.find("```json") {
        let content_start = start + 7;
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    // Handle ``` ... ``` blocks (without json specifier)
    if let Some(start) = text.find("```") {
        let content_start = start + 3;
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    // A stray opening fence with no closing one.
    text.trim_start_matches("```json").trim_start_matches("```").trim()
}

/// Parse model output as a typed record.
pub fn parse_model_json<T: DeserializeOwned>(text: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(extract_json(text))
}

/// The first `max` characters of `text`.
pub(crate) fn prefix(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CandidateRecord {
        CandidateRecord {
            summary: "Phishing link delivered by email".to_string(),
            techniques: vec![TechniqueRef {
                id: "T1566".to_string(),
                name: "Phishing".to_string(),
            }],
            knowledge: vec![KsaRef {
                id: "K0005".to_string(),
                description: "Knowledge of phishing".to_string(),
            }],
            tasks: vec![
                KsaRef {
                    id: "T0021".to_string(),
                    description: "Triage email".to_string(),
                },
                KsaRef {
                    id: "K0005".to_string(),
                    description: "duplicate".to_string(),
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_extract_json_plain() {
        let text = r#"{"status": "PASS"}"#;
        assert_eq!(extract_json(text), text);
    }

    #[test]
    fn test_extract_json_markdown() {
        let text = "```json\n{\"status\": \"FAIL\", \"feedback\": \"x\"}\n```";
        assert_eq!(extract_json(text), r#"{"status": "FAIL", "feedback": "x"}"#);
    }

    #[test]
    fn test_extract_json_markdown_no_specifier() {
        let text = "Here you go:\n```\n{\"status\": \"PASS\"}\n```\nDone.";
        assert_eq!(extract_json(text), r#"{"status": "PASS"}"#);
    }

    #[test]
    fn test_extract_json_unclosed_fence() {
        let text = "```json\n{\"status\": \"PASS\"}";
        assert_eq!(extract_json(text), r#"{"status": "PASS"}"#);
    }

    #[test]
    fn test_fenced_record_parses_unchanged() {
        let record = sample();
        let fenced = format!("```json {} ```", serde_json::to_string(&record).unwrap());
        let parsed: CandidateRecord = parse_model_json(&fenced).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_record_accepts_legacy_keys() {
        let raw = r#"{"refined_text": "x", "mitre_attack": [{"id": "T1566", "name": "Phishing"}]}"#;
        let parsed: CandidateRecord = parse_model_json(raw).unwrap();
        assert_eq!(parsed.summary, "x");
        assert_eq!(parsed.techniques[0].id, "T1566");
        assert!(parsed.knowledge.is_empty());
    }

    #[test]
    fn test_reference_without_id_is_rejected() {
        let raw = r#"{"knowledge": [{"description": "no id"}]}"#;
        assert!(parse_model_json::<CandidateRecord>(raw).is_err());
    }

    #[test]
    fn test_prose_is_rejected() {
        assert!(parse_model_json::<CandidateRecord>("I think this is phishing.").is_err());
    }

    #[test]
    fn test_identifiers_sorted_and_distinct() {
        assert_eq!(sample().identifiers(), vec!["K0005", "T0021", "T1566"]);
    }

    #[test]
    fn test_drafted_text_uses_first_occurrence() {
        let record = sample();
        assert_eq!(record.drafted_text("K0005"), Some("Knowledge of phishing"));
        assert_eq!(record.drafted_text("T1566"), Some("Phishing"));
        assert_eq!(record.drafted_text("A0001"), None);
        assert!(record.is_technique_ref("T1566"));
        assert!(!record.is_technique_ref("T0021"));
    }

    #[test]
    fn test_empty_record() {
        assert!(CandidateRecord::default().is_empty());
        assert!(!sample().is_empty());
    }

    #[test]
    fn test_verdict_status_case_insensitive() {
        let v: Verdict = parse_model_json(r#"{"status": "pass"}"#).unwrap();
        assert!(v.passed());
        assert_eq!(v.feedback, "");
        assert!(parse_model_json::<Verdict>(r#"{"feedback": "no status"}"#).is_err());
    }

    #[test]
    fn test_null_fields_read_as_empty() {
        let v: Verdict = parse_model_json(r#"{"status": "PASS", "feedback": null}"#).unwrap();
        assert!(v.passed());
        assert_eq!(v.feedback, "");

        let raw = r#"{
            "summary": null,
            "techniques": [{"id": "T1566", "name": null}],
            "knowledge": null,
            "tasks": [{"id": "T0260", "description": null}],
            "justification": null
        }"#;
        let parsed: CandidateRecord = parse_model_json(raw).unwrap();
        assert_eq!(parsed.summary, "");
        assert_eq!(parsed.techniques[0].name, "");
        assert!(parsed.knowledge.is_empty());
        assert_eq!(parsed.tasks[0].description, "");
        assert_eq!(parsed.identifiers(), vec!["T0260", "T1566"]);
    }

    #[test]
    fn test_focus_from_str() {
        assert_eq!("MITRE".parse::<Focus>().unwrap(), Focus::TechniqueOnly);
        assert_eq!("nice".parse::<Focus>().unwrap(), Focus::KsaOnly);
        assert_eq!("".parse::<Focus>().unwrap(), Focus::Both);
        assert!("everything".parse::<Focus>().is_err());
        assert_eq!(Focus::default(), Focus::Both);
    }

    #[test]
    fn test_prefix_is_char_safe() {
        assert_eq!(prefix("héllo wörld", 4), "héll");
        assert_eq!(prefix("abc", 10), "abc");
    }
}
