//! Reference knowledge base.
//!
//! Two read-only tables loaded once at startup from the simplified corpus
//! snapshots: ATT&CK techniques and NICE framework elements (work roles,
//! tasks, knowledge, skills, abilities). The verifier only needs two things
//! from it: exact lookup by id and ranked keyword search.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

/// Maximum hits kept per table in a keyword search.
pub const MAX_HITS_PER_TABLE: usize = 20;

/// Query tokens ignored by keyword search.
const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
];

/// Errors from reading a corpus snapshot.
#[derive(Debug, Error)]
pub enum KbError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid snapshot {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Kind of framework element an entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Technique,
    Role,
    Task,
    Knowledge,
    Skill,
    Ability,
}

impl Category {
    /// Label as it appears in the role snapshot's `type` field.
    pub fn label(&self) -> &'static str {
        match self {
            Category::Technique => "Technique",
            Category::Role => "Role",
            Category::Task => "Task",
            Category::Knowledge => "Knowledge",
            Category::Skill => "Skill",
            Category::Ability => "Ability",
        }
    }
}

/// Which corpus an entry was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    #[serde(rename = "MITRE ATT&CK")]
    TechniqueCorpus,
    #[serde(rename = "NICE Framework")]
    RoleCorpus,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::TechniqueCorpus => write!(f, "MITRE ATT&CK"),
            Source::RoleCorpus => write!(f, "NICE Framework"),
        }
    }
}

/// A technique as stored in the technique snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechniqueRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: String,
}

/// A NICE element as stored in the role snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub category: Category,
    #[serde(default)]
    pub description: String,
}

/// One knowledge base record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KbEntry {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub description: String,
    #[serde(rename = "type")]
    pub category: Category,
    pub source: Source,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Lower-cased `name description type`, matched by keyword search.
    #[serde(skip)]
    search_text: String,
}

impl KbEntry {
    /// Build a technique entry.
    pub fn technique(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self::build(
            id.into(),
            Some(name.into()),
            description.into(),
            Category::Technique,
            Source::TechniqueCorpus,
            None,
        )
    }

    /// Build a NICE framework entry.
    pub fn element(id: impl Into<String>, category: Category, description: impl Into<String>) -> Self {
        Self::build(
            id.into(),
            None,
            description.into(),
            category,
            Source::RoleCorpus,
            None,
        )
    }

    fn build(
        id: String,
        name: Option<String>,
        description: String,
        category: Category,
        source: Source,
        url: Option<String>,
    ) -> Self {
        // Technique snapshots carry no type column, so nothing is appended for them.
        let type_label = match source {
            Source::TechniqueCorpus => "",
            Source::RoleCorpus => category.label(),
        };
        let search_text = format!(
            "{} {} {}",
            name.as_deref().unwrap_or_default(),
            description,
            type_label
        )
        .to_lowercase();

        Self {
            id,
            name,
            description,
            category,
            source,
            url,
            search_text,
        }
    }

    /// Human-facing label: the name for techniques, the description otherwise.
    pub fn display(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.description)
    }
}

impl From<TechniqueRecord> for KbEntry {
    fn from(record: TechniqueRecord) -> Self {
        let url = (!record.url.is_empty()).then_some(record.url);
        Self::build(
            record.id,
            Some(record.name),
            record.description,
            Category::Technique,
            Source::TechniqueCorpus,
            url,
        )
    }
}

impl From<RoleRecord> for KbEntry {
    fn from(record: RoleRecord) -> Self {
        Self::build(
            record.id,
            None,
            record.description,
            record.category,
            Source::RoleCorpus,
            None,
        )
    }
}

/// A scored keyword search result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit<'a> {
    pub score: usize,
    pub entry: &'a KbEntry,
}

#[derive(Debug, Default)]
struct Table {
    entries: Vec<KbEntry>,
    by_id: HashMap<String, usize>,
}

impl Table {
    fn new(entries: Vec<KbEntry>) -> Self {
        let mut by_id = HashMap::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            by_id.entry(entry.id.clone()).or_insert(index);
        }
        Self { entries, by_id }
    }

    fn get(&self, id: &str) -> Option<&KbEntry> {
        self.by_id.get(id).map(|&index| &self.entries[index])
    }

    fn search(&self, terms: &[String]) -> Vec<SearchHit<'_>> {
        let mut hits: Vec<SearchHit<'_>> = self
            .entries
            .iter()
            .filter_map(|entry| {
                let score = terms
                    .iter()
                    .filter(|term| entry.search_text.contains(term.as_str()))
                    .count();
                (score > 0).then_some(SearchHit { score, entry })
            })
            .collect();

        // sort_by is stable: ties keep table order.
        hits.sort_by(|a, b| b.score.cmp(&a.score));
        hits.truncate(MAX_HITS_PER_TABLE);
        hits
    }
}

/// The in-memory reference corpus.
#[derive(Debug, Default)]
pub struct KnowledgeBase {
    techniques: Table,
    roles: Table,
    degraded: bool,
}

impl KnowledgeBase {
    /// Build a knowledge base from already materialized entries.
    pub fn from_entries(techniques: Vec<KbEntry>, roles: Vec<KbEntry>) -> Self {
        Self {
            techniques: Table::new(techniques),
            roles: Table::new(roles),
            degraded: false,
        }
    }

    /// Load both snapshots.
    ///
    /// A snapshot that is missing or malformed is logged and replaced by an
    /// empty table; the knowledge base is then flagged as degraded.
    pub async fn load(technique_path: impl AsRef<Path>, role_path: impl AsRef<Path>) -> Self {
        let mut degraded = false;

        let techniques = match read_snapshot::<TechniqueRecord>(technique_path.as_ref()).await {
            Ok(records) => {
                tracing::info!(count = records.len(), "loaded ATT&CK techniques");
                records.into_iter().map(KbEntry::from).collect()
            }
            Err(e) => {
                tracing::warn!(error = %e, "technique knowledge base unavailable, continuing with an empty table");
                degraded = true;
                Vec::new()
            }
        };

        let roles = match read_snapshot::<RoleRecord>(role_path.as_ref()).await {
            Ok(records) => {
                tracing::info!(count = records.len(), "loaded NICE framework elements");
                records.into_iter().map(KbEntry::from).collect()
            }
            Err(e) => {
                tracing::warn!(error = %e, "NICE knowledge base unavailable, continuing with an empty table");
                degraded = true;
                Vec::new()
            }
        };

        Self {
            techniques: Table::new(techniques),
            roles: Table::new(roles),
            degraded,
        }
    }

    /// Whether a snapshot failed to load.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Whether both tables are empty.
    pub fn is_empty(&self) -> bool {
        self.techniques.entries.is_empty() && self.roles.entries.is_empty()
    }

    pub fn technique_count(&self) -> usize {
        self.techniques.entries.len()
    }

    pub fn role_count(&self) -> usize {
        self.roles.entries.len()
    }

    /// Every entry with exactly this id, technique table first.
    pub fn lookup(&self, id: &str) -> Vec<&KbEntry> {
        self.techniques
            .get(id)
            .into_iter()
            .chain(self.roles.get(id))
            .collect()
    }

    /// Whether any table defines this id.
    pub fn contains(&self, id: &str) -> bool {
        self.techniques.get(id).is_some() || self.roles.get(id).is_some()
    }

    /// Ranked keyword search over both tables.
    ///
    /// Each table is scored independently (one point per query token found in
    /// the entry text), the top [`MAX_HITS_PER_TABLE`] of each are kept, and
    /// technique hits come before role hits.
    pub fn search<S: AsRef<str>>(&self, terms: &[S]) -> Vec<SearchHit<'_>> {
        let terms = normalize_terms(terms);
        if terms.is_empty() || self.is_empty() {
            return Vec::new();
        }

        tracing::debug!(?terms, "searching knowledge base");

        let mut hits = self.techniques.search(&terms);
        hits.extend(self.roles.search(&terms));
        hits
    }
}

/// Lower-case, drop short tokens and stop-words, dedupe keeping first occurrence.
pub(crate) fn normalize_terms<S: AsRef<str>>(terms: &[S]) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::new();
    for term in terms {
        let term = term.as_ref().trim().to_lowercase();
        if term.chars().count() <= 3 || STOP_WORDS.contains(&term.as_str()) {
            continue;
        }
        if !normalized.contains(&term) {
            normalized.push(term);
        }
    }
    normalized
}

async fn read_snapshot<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, KbError> {
    let content = fs::read_to_string(path).await.map_err(|source| KbError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| KbError::Json {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample() -> KnowledgeBase {
        KnowledgeBase::from_entries(
            vec![
                KbEntry::technique("T1566", "Phishing", "Adversaries may send phishing messages"),
                KbEntry::technique(
                    "T1566.002",
                    "Spearphishing Link",
                    "Adversaries may send spearphishing emails with a malicious link",
                ),
                KbEntry::technique("T1190", "Exploit Public-Facing Application", "Exploit a weakness"),
            ],
            vec![
                KbEntry::element("K0005", Category::Knowledge, "Knowledge of email phishing techniques"),
                KbEntry::element("T0021", Category::Task, "Analyze malicious email headers"),
            ],
        )
    }

    #[test]
    fn test_normalize_terms() {
        let terms = normalize_terms(&["The", "Phishing", "with", "EMAIL", "phishing", "link"]);
        assert_eq!(terms, vec!["phishing", "email", "link"]);
    }

    #[test]
    fn test_search_ranks_by_score() {
        let kb = sample();
        let hits = kb.search(&["spearphishing", "malicious", "link"]);
        assert_eq!(hits[0].entry.id, "T1566.002");
        assert_eq!(hits[0].score, 3);
        // Technique hits always precede role hits.
        let first_role = hits.iter().position(|h| h.entry.source == Source::RoleCorpus);
        let last_technique = hits
            .iter()
            .rposition(|h| h.entry.source == Source::TechniqueCorpus);
        if let (Some(role), Some(technique)) = (first_role, last_technique) {
            assert!(technique < role);
        }
    }

    #[test]
    fn test_search_ties_keep_table_order() {
        let kb = sample();
        let hits = kb.search(&["phishing"]);
        let ids: Vec<&str> = hits.iter().map(|h| h.entry.id.as_str()).collect();
        assert_eq!(ids, vec!["T1566", "T1566.002", "K0005"]);
    }

    #[test]
    fn test_search_matches_type_label() {
        let kb = sample();
        let hits = kb.search(&["task"]);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entry.id, "T0021");
    }

    #[test]
    fn test_search_is_deterministic() {
        let kb = sample();
        let terms = ["email", "phishing", "malicious", "headers"];
        let first: Vec<(usize, String)> = kb
            .search(&terms)
            .iter()
            .map(|h| (h.score, h.entry.id.clone()))
            .collect();
        for _ in 0..5 {
            let again: Vec<(usize, String)> = kb
                .search(&terms)
                .iter()
                .map(|h| (h.score, h.entry.id.clone()))
                .collect();
            assert_eq!(first, again);
        }
    }

    #[test]
    fn test_search_caps_each_table() {
        let techniques = (0..30)
            .map(|i| KbEntry::technique(format!("T{:04}", 1000 + i), "Credential dumping", ""))
            .collect();
        let roles = (0..25)
            .map(|i| KbEntry::element(format!("K{i:04}"), Category::Knowledge, "credential storage"))
            .collect();
        let kb = KnowledgeBase::from_entries(techniques, roles);

        let hits = kb.search(&["credential"]);
        assert_eq!(hits.len(), 2 * MAX_HITS_PER_TABLE);
        assert_eq!(hits[0].entry.id, "T1000");
        assert_eq!(hits[MAX_HITS_PER_TABLE].entry.id, "K0000");
    }

    #[test]
    fn test_search_ignores_short_and_stop_words() {
        let kb = sample();
        assert!(kb.search(&["a", "of", "with", "the"]).is_empty());
    }

    #[test]
    fn test_lookup_and_contains() {
        let kb = sample();
        assert!(kb.contains("T1566"));
        assert!(kb.contains("T0021"));
        assert!(!kb.contains("T9999"));
        assert_eq!(kb.lookup("K0005")[0].category, Category::Knowledge);
        assert!(kb.lookup("K9999").is_empty());
    }

    #[test]
    fn test_display_prefers_name() {
        let kb = sample();
        assert_eq!(kb.lookup("T1566")[0].display(), "Phishing");
        assert_eq!(kb.lookup("T0021")[0].display(), "Analyze malicious email headers");
    }

    #[test]
    fn test_entry_serializes_with_source_label() {
        let entry = KbEntry::element("S0001", Category::Skill, "Skill in triage");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "Skill");
        assert_eq!(json["source"], "NICE Framework");
        assert!(json.get("name").is_none());
        assert!(json.get("search_text").is_none());
    }

    #[tokio::test]
    async fn test_load_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let mitre = dir.path().join("mitre_simple.json");
        let nice = dir.path().join("nice_simple.json");

        let mut f = std::fs::File::create(&mitre).unwrap();
        write!(
            f,
            r#"[{{"id": "T1566", "name": "Phishing", "description": "Send phishing", "url": "https://attack.mitre.org/techniques/T1566"}}]"#
        )
        .unwrap();
        let mut f = std::fs::File::create(&nice).unwrap();
        write!(f, r#"[{{"id": "T0021", "type": "Task", "description": "Triage email"}}]"#).unwrap();

        let kb = KnowledgeBase::load(&mitre, &nice).await;
        assert!(!kb.is_degraded());
        assert_eq!(kb.technique_count(), 1);
        assert_eq!(kb.role_count(), 1);
        assert_eq!(
            kb.lookup("T1566")[0].url.as_deref(),
            Some("https://attack.mitre.org/techniques/T1566")
        );
    }

    #[tokio::test]
    async fn test_load_missing_snapshot_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let kb = KnowledgeBase::load(dir.path().join("nope.json"), dir.path().join("nada.json")).await;
        assert!(kb.is_degraded());
        assert!(kb.is_empty());
        assert!(kb.search(&["phishing"]).is_empty());
    }
}
