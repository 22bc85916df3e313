//! The verifier: grounds a candidate record against the knowledge base.
//!
//! One verification runs these steps strictly in order, each consuming the
//! previous step's output:
//!
//! 1. collect the distinct ids of the candidate
//! 2. split them into grounded and ungrounded ids, building the definitions context
//! 3. ask the generator for search keywords (falling back to the raw input)
//! 4. keyword-search the knowledge base for alternatives
//! 5. root-cause every ungrounded id to the closest entry of its likely corpus
//! 6. ask the generator for a verdict over the whole context
//! 7. on FAIL, append KB-derived suggestions to the feedback
//!
//! The verdict can never be PASS while an id is ungrounded, whatever the
//! generator says.

use crate::generation::Generator;
use crate::kb::{KbEntry, KnowledgeBase, SearchHit, Source};
use crate::record::{parse_model_json, prefix, CandidateRecord, Focus, Verdict};
use serde::Serialize;
use std::sync::Arc;

/// Marker that introduces KB-validated suggestions in feedback.
pub const SUGGESTIONS_MARKER: &str = "[SUGGESTIONS]";

/// Context placeholder when neither definitions nor alternatives exist.
pub const NO_CONTEXT: &str = "No internal context found.";

/// Feedback used when the verifier cannot obtain a usable verdict.
pub const VERIFIER_FAILURE: &str =
    "Verifier failed to produce a verdict. Please retry the audit with the same draft requirements.";

/// General alternatives appended to failing feedback.
const MAX_GENERAL_SUGGESTIONS: usize = 4;

/// Draft JSON sent to keyword generation is cut to this many characters.
const KEYWORD_DRAFT_LIMIT: usize = 1000;

/// Phrasing stripped from drafted descriptions before root-cause search.
const BOILERPLATE: &[&str] = &["Knowledge of", "Skill in", "Ability to"];

const AUDIT_RULES: &str = r#"You are a senior cybersecurity compliance auditor.
Your job is to VERIFY the research of a junior analyst against an INTERNAL DATABASE.

CRITICAL RULES:
1. SOURCE OF TRUTH: the "INTERNAL KNOWLEDGE BASE CONTEXT" below is the ONLY valid source of truth.
2. NO OUTSIDE KNOWLEDGE: do not use your own training data to verify codes. A code that is not in the context is INVALID.
3. STRICT VERIFICATION:
   - If the draft uses an ID that is NOT defined in the "DEFINITIONS OF DRAFT IDS" section, you MUST FAIL the audit and mark it as an invalid or hallucinated ID.
4. ALTERNATIVES: use the "POTENTIAL ALTERNATIVES" section to suggest corrections when the draft is wrong.

Process:
1. Check every ID in the draft against the "DEFINITIONS OF DRAFT IDS".
2. If an ID is missing from the definitions -> FAIL (reason: invalid/hallucinated ID).
3. If an ID exists but the drafted description contradicts the definition -> FAIL (reason: mismatched description).
4. If every ID and description matches the context -> PASS."#;

const VERDICT_SCHEMA: &str = r#"{
    "status": "PASS" or "FAIL",
    "feedback": "Empty string if PASS, specific instructions on what to fix if FAIL. Suggest specific IDs from the context if applicable."
}"#;

fn focus_instruction(focus: Focus) -> &'static str {
    match focus {
        Focus::TechniqueOnly => "Only verify MITRE ATT&CK entries. KSA sections are intentionally empty; do not fail the audit because of that.",
        Focus::KsaOnly => "Only verify KSA (NICE) entries. Do NOT fail the audit if MITRE ATT&CK entries are missing or empty. Focus strictly on the accuracy of Knowledge, Skills, Abilities and Tasks.",
        Focus::Both => "Verify both MITRE ATT&CK and NICE entries for accuracy.",
    }
}

/// Ids of a candidate split by whether the knowledge base defines them.
#[derive(Debug)]
pub struct Grounding<'a> {
    /// KB entries for every grounded id.
    pub found: Vec<&'a KbEntry>,
    /// Ids with no exact match in either table.
    pub invalid: Vec<String>,
}

impl Grounding<'_> {
    fn is_grounded(&self, id: &str) -> bool {
        self.found.iter().any(|e| e.id == id)
    }
}

/// Look every id up in the knowledge base.
pub fn ground<'a>(kb: &'a KnowledgeBase, ids: &[String]) -> Grounding<'a> {
    let mut found = Vec::new();
    let mut invalid = Vec::new();
    for id in ids {
        let entries = kb.lookup(id);
        if entries.is_empty() {
            invalid.push(id.clone());
        } else {
            found.extend(entries);
        }
    }
    Grounding { found, invalid }
}

/// Decide which corpus an ungrounded id most likely belongs to.
///
/// Technique ids (`T1566`, `T1566.002`) and NICE task ids (`T0021`) share
/// the `T` prefix, so the prefix alone is not enough:
///
/// - `K`, `S` or `A` prefix: NICE framework
/// - `T` prefix with a `.` sub-technique separator: ATT&CK
/// - anything else: the section the id was drafted in, techniques meaning
///   ATT&CK and every KSA section meaning NICE
pub fn infer_source(id: &str, candidate: &CandidateRecord) -> Source {
    if id.starts_with(['K', 'S', 'A']) {
        return Source::RoleCorpus;
    }
    if id.starts_with('T') && id.contains('.') {
        return Source::TechniqueCorpus;
    }
    if candidate.is_technique_ref(id) {
        Source::TechniqueCorpus
    } else {
        Source::RoleCorpus
    }
}

/// A KB entry proposed in place of an ungrounded id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootCause {
    pub invalid_id: String,
    pub suggested_id: String,
    pub text: String,
}

/// Find the closest entry of the inferred corpus for every ungrounded id.
pub fn root_causes(
    kb: &KnowledgeBase,
    invalid: &[String],
    candidate: &CandidateRecord,
) -> Vec<RootCause> {
    let mut causes = Vec::new();

    for id in invalid {
        let Some(drafted) = candidate.drafted_text(id).filter(|d| !d.trim().is_empty()) else {
            continue;
        };

        let source = infer_source(id, candidate);
        let mut cleaned = drafted.to_string();
        for phrase in BOILERPLATE {
            cleaned = cleaned.replace(phrase, "");
        }
        let words: Vec<&str> = cleaned
            .split_whitespace()
            .filter(|w| w.chars().count() > 3)
            .collect();

        let best = kb
            .search(&words)
            .into_iter()
            .find(|hit| hit.entry.source == source);

        if let Some(hit) = best {
            tracing::debug!(invalid = %id, suggested = %hit.entry.id, %source, "root-caused invalid id");
            causes.push(RootCause {
                invalid_id: id.clone(),
                suggested_id: hit.entry.id.clone(),
                text: format!(
                    "For invalid {id} ('{}...'), consider {} ({}...)",
                    prefix(drafted, 30),
                    hit.entry.id,
                    prefix(&hit.entry.description, 50)
                ),
            });
        }
    }

    causes
}

/// Split generated keywords into distinct single tokens longer than 3 characters.
pub fn parse_keywords(text: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for word in text.split(',').flat_map(str::split_whitespace) {
        let word = word.trim_matches(|c: char| !c.is_alphanumeric() && c != '-');
        if word.chars().count() > 3 && !terms.iter().any(|t| t == word) {
            terms.push(word.to_string());
        }
    }
    terms
}

/// Naive tokenization of the raw input, used when keyword generation fails.
pub fn fallback_terms(input: &str) -> Vec<String> {
    input
        .replace(|c: char| c == ',' || c == '.', " ")
        .split_whitespace()
        .map(String::from)
        .collect()
}

fn to_pretty<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

/// Grounds candidates and asks the generator for a verdict.
pub struct Verifier {
    generator: Box<dyn Generator>,
    kb: Arc<KnowledgeBase>,
}

impl Verifier {
    pub fn new(generator: Box<dyn Generator>, kb: Arc<KnowledgeBase>) -> Self {
        Self { generator, kb }
    }

    /// The knowledge base this verifier grounds against.
    pub fn knowledge_base(&self) -> &KnowledgeBase {
        &self.kb
    }

    /// Verify a candidate record.
    ///
    /// Never fails: generator faults become a FAIL verdict asking for a retry.
    pub async fn verify(&self, input: &str, candidate: &CandidateRecord, focus: Focus) -> Verdict {
        let kb = self.kb.as_ref();

        let ids = candidate.identifiers();
        let grounding = ground(kb, &ids);
        tracing::info!(
            ids = ids.len(),
            grounded = grounding.found.len(),
            invalid = grounding.invalid.len(),
            "grounding lookup"
        );

        let terms = self.search_terms(input, candidate).await;
        let alternatives = kb.search(&terms);

        let causes = root_causes(kb, &grounding.invalid, candidate);
        if !grounding.invalid.is_empty() {
            tracing::info!(
                invalid = ?grounding.invalid,
                suggestions = causes.len(),
                "investigated invalid ids"
            );
        }

        let context = build_context(&grounding, &alternatives);
        let prompt = build_verdict_prompt(input, candidate, focus, &context);

        let mut verdict = match self.generator.generate(&prompt).await {
            Ok(text) => match parse_model_json::<Verdict>(&text) {
                Ok(verdict) => verdict,
                Err(e) => {
                    tracing::warn!(error = %e, raw = %prefix(&text, 100), "verifier produced invalid JSON");
                    Verdict::fail(VERIFIER_FAILURE)
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "verifier generation failed");
                Verdict::fail(VERIFIER_FAILURE)
            }
        };

        if !grounding.invalid.is_empty() {
            if verdict.passed() {
                tracing::warn!(invalid = ?grounding.invalid, "overriding PASS with ungrounded ids");
                verdict = Verdict::fail(ungrounded_feedback(kb, &grounding.invalid));
            } else if kb.is_empty() {
                // An empty knowledge base is reported even when the model already failed the draft.
                verdict.feedback = format!(
                    "{}\n{}",
                    ungrounded_feedback(kb, &grounding.invalid),
                    verdict.feedback
                );
            }
        }

        if !verdict.passed() {
            let suggestions = suggestions(&causes, &alternatives, &grounding);
            if !suggestions.is_empty() {
                tracing::info!(count = suggestions.len(), "appended suggestions to feedback");
                verdict.feedback.push('\n');
                verdict.feedback.push_str(SUGGESTIONS_MARKER);
                verdict.feedback.push_str(":\n");
                verdict.feedback.push_str(&suggestions.join("\n"));
            }
        }

        verdict
    }

    async fn search_terms(&self, input: &str, candidate: &CandidateRecord) -> Vec<String> {
        let prompt = build_keyword_prompt(input, candidate);
        match self.generator.generate(&prompt).await {
            Ok(text) => {
                let terms = parse_keywords(&text);
                if !terms.is_empty() {
                    tracing::debug!(?terms, "generated search terms");
                    return terms;
                }
                tracing::warn!(raw = %prefix(&text, 100), "keyword generation returned no usable terms");
            }
            Err(e) => tracing::warn!(error = %e, "keyword generation failed, tokenizing input"),
        }
        fallback_terms(input)
    }
}

fn ungrounded_feedback(kb: &KnowledgeBase, invalid: &[String]) -> String {
    let listed = invalid.join(", ");
    if kb.is_empty() {
        format!(
            "{NO_CONTEXT} The knowledge base is unavailable, so {listed} cannot be grounded."
        )
    } else {
        format!("Invalid/hallucinated IDs not defined in the internal knowledge base: {listed}.")
    }
}

/// Root-cause suggestions first, then general alternatives not already covered.
fn suggestions(causes: &[RootCause], alternatives: &[SearchHit<'_>], grounding: &Grounding<'_>) -> Vec<String> {
    let mut lines: Vec<String> = causes.iter().map(|c| c.text.clone()).collect();
    let mut covered: Vec<&str> = causes.iter().map(|c| c.suggested_id.as_str()).collect();

    for hit in alternatives {
        if lines.len() - causes.len() >= MAX_GENERAL_SUGGESTIONS {
            break;
        }
        let id = hit.entry.id.as_str();
        if covered.contains(&id) || grounding.is_grounded(id) {
            continue;
        }
        covered.push(id);
        lines.push(format!(
            "General Suggestion: {id} ({}...)",
            prefix(hit.entry.display(), 50)
        ));
    }

    lines
}

fn build_context(grounding: &Grounding<'_>, alternatives: &[SearchHit<'_>]) -> String {
    let mut context = String::new();

    if !grounding.found.is_empty() {
        context.push_str("=== DEFINITIONS OF DRAFT IDS ===\n");
        for entry in &grounding.found {
            context.push_str(&to_pretty(entry));
            context.push('\n');
        }
    }

    if !alternatives.is_empty() {
        context.push_str("\n=== POTENTIAL ALTERNATIVES FOUND IN KB ===\n");
        context.push_str(
            "(The junior analyst may have missed these. Use them to correct the draft if necessary.)\n",
        );
        for hit in alternatives {
            context.push_str(&to_pretty(hit.entry));
            context.push('\n');
        }
    }

    context
}

fn build_keyword_prompt(input: &str, candidate: &CandidateRecord) -> String {
    let draft = to_pretty(candidate);
    let draft = prefix(&draft, KEYWORD_DRAFT_LIMIT);

    format!(
        r#"[TASK]
Analyze the USER INPUT and the DRAFT ANALYSIS.
Generate a list of 5-8 specific search keywords or phrases to query an internal MITRE ATT&CK / NICE Framework database.

[GOAL]
Find relevant MITRE techniques and NICE knowledge, skills, abilities and tasks that might be missing or misidentified.
Think about synonyms, related concepts and specific technical terms.

[USER INPUT]
"{input}"

[DRAFT ANALYSIS SAMPLE]
{draft}

[OUTPUT FORMAT]
Return ONLY a comma-separated list of 5-8 SINGLE KEYWORDS or SHORT CONCEPTS.
Do NOT use long sentences.
Example: Phishing, SIEM, Logs, Malware, Headers, SMTP, Triage"#
    )
}

fn build_verdict_prompt(input: &str, candidate: &CandidateRecord, focus: Focus, context: &str) -> String {
    let safe_input = input.replace('"', "'");
    let draft = to_pretty(candidate);
    let context = if context.trim().is_empty() {
        NO_CONTEXT
    } else {
        context
    };

    format!(
        r#"[SYSTEM]
{AUDIT_RULES}

[FOCUS]
{instruction}

[ORIGINAL USER ACTION]
"{safe_input}"

[JUNIOR ANALYST DRAFT]
{draft}

[INTERNAL KNOWLEDGE BASE CONTEXT]
{context}

INSTRUCTION: Verify the junior analyst's draft against the internal knowledge base context. The internal knowledge base context is the source of truth.

[REQUIRED JSON OUTPUT FORMAT]
{VERDICT_SCHEMA}"#,
        instruction = focus_instruction(focus),
    )
}
