//! Corpus simplification.
//!
//! Converts the published corpora into the flat snapshots the knowledge base
//! loads: the ATT&CK STIX bundle into technique records, and the NICE
//! framework components export into role records.

use crate::kb::{Category, RoleRecord, TechniqueRecord};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

const TECHNIQUE_URL: &str = "https://attack.mitre.org/techniques";

#[derive(Debug, Error)]
pub enum SimplifyError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Deserialize)]
struct StixBundle {
    #[serde(default)]
    objects: Vec<StixObject>,
}

#[derive(Deserialize)]
struct StixObject {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    external_references: Vec<ExternalReference>,
}

#[derive(Deserialize)]
struct ExternalReference {
    #[serde(default)]
    source_name: String,
    #[serde(default)]
    external_id: Option<String>,
}

#[derive(Deserialize)]
struct NiceComponents {
    #[serde(default)]
    elements: Vec<NiceElement>,
}

#[derive(Deserialize)]
struct NiceElement {
    #[serde(default)]
    element_type: String,
    #[serde(default)]
    element_identifier: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    text: String,
}

/// Extract technique records from an ATT&CK STIX bundle, sorted by id.
pub fn simplify_attack(bundle: &str) -> Result<Vec<TechniqueRecord>, SimplifyError> {
    let bundle: StixBundle = serde_json::from_str(bundle)?;

    let mut records: Vec<TechniqueRecord> = bundle
        .objects
        .into_iter()
        .filter(|obj| obj.kind == "attack-pattern")
        .filter_map(|obj| {
            let id = obj
                .external_references
                .iter()
                .find(|r| r.source_name == "mitre-attack")
                .and_then(|r| r.external_id.clone())?;
            Some(TechniqueRecord {
                url: format!("{TECHNIQUE_URL}/{id}"),
                name: obj.name.unwrap_or_else(|| "Unknown".to_string()),
                description: obj.description.replace('\n', " "),
                id,
            })
        })
        .collect();

    records.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(records)
}

fn element_category(element_type: &str) -> Option<Category> {
    match element_type {
        "work_role" => Some(Category::Role),
        "task" => Some(Category::Task),
        "knowledge" => Some(Category::Knowledge),
        "skill" => Some(Category::Skill),
        "ability" => Some(Category::Ability),
        _ => None,
    }
}

/// Extract role records from a NICE components export, sorted by id.
pub fn simplify_nice(components: &str) -> Result<Vec<RoleRecord>, SimplifyError> {
    let components: NiceComponents = serde_json::from_str(components)?;

    let mut records: Vec<RoleRecord> = components
        .elements
        .into_iter()
        .filter_map(|element| {
            let category = element_category(&element.element_type)?;
            let id = element.element_identifier?;
            let title = element.title.trim();
            let text = element.text.trim();

            let description = match (title.is_empty(), text.is_empty()) {
                (false, false) if title != text => format!("{title}: {text}"),
                (false, true) => title.to_string(),
                _ => text.to_string(),
            };

            Some(RoleRecord {
                id,
                category,
                description,
            })
        })
        .collect();

    records.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(records)
}

async fn read(path: &Path) -> Result<String, SimplifyError> {
    fs::read_to_string(path).await.map_err(|source| SimplifyError::Read {
        path: path.to_path_buf(),
        source,
    })
}

async fn write<T: serde::Serialize>(path: &Path, records: &[T]) -> Result<(), SimplifyError> {
    let json = serde_json::to_string_pretty(records)?;
    fs::write(path, json).await.map_err(|source| SimplifyError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Simplify an ATT&CK bundle file into a technique snapshot. Returns the record count.
pub async fn simplify_attack_file(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
) -> Result<usize, SimplifyError> {
    let records = simplify_attack(&read(input.as_ref()).await?)?;
    write(output.as_ref(), &records).await?;
    tracing::info!(count = records.len(), output = %output.as_ref().display(), "wrote technique snapshot");
    Ok(records.len())
}

/// Simplify a NICE components file into a role snapshot. Returns the record count.
pub async fn simplify_nice_file(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
) -> Result<usize, SimplifyError> {
    let records = simplify_nice(&read(input.as_ref()).await?)?;
    write(output.as_ref(), &records).await?;
    tracing::info!(count = records.len(), output = %output.as_ref().display(), "wrote NICE snapshot");
    Ok(records.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kb::KnowledgeBase;

    const BUNDLE: &str = r#"{
        "type": "bundle",
        "objects": [
            {
                "type": "attack-pattern",
                "name": "Spearphishing Link",
                "description": "Adversaries may send\nspearphishing emails.",
                "external_references": [
                    {"source_name": "mitre-attack", "external_id": "T1566.002"},
                    {"source_name": "capec", "external_id": "CAPEC-163"}
                ]
            },
            {
                "type": "attack-pattern",
                "name": "Phishing",
                "external_references": [{"source_name": "mitre-attack", "external_id": "T1566"}]
            },
            {
                "type": "attack-pattern",
                "name": "No ATT&CK id",
                "external_references": [{"source_name": "capec", "external_id": "CAPEC-1"}]
            },
            {"type": "intrusion-set", "name": "APT-X"}
        ]
    }"#;

    const COMPONENTS: &str = r#"{
        "elements": [
            {"element_type": "task", "element_identifier": "T0260", "text": "Analyze email"},
            {"element_type": "work_role", "element_identifier": "OG-WRL-001", "title": "Analyst", "text": "Defends networks"},
            {"element_type": "knowledge", "element_identifier": "K0427", "title": "Same", "text": "Same"},
            {"element_type": "skill", "element_identifier": "S0114", "title": "Header analysis"},
            {"element_type": "category", "element_identifier": "OG", "title": "Oversight"}
        ]
    }"#;

    #[test]
    fn test_simplify_attack() {
        let records = simplify_attack(BUNDLE).unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["T1566", "T1566.002"]);
        assert_eq!(records[1].description, "Adversaries may send spearphishing emails.");
        assert_eq!(records[1].url, "https://attack.mitre.org/techniques/T1566.002");
        assert_eq!(records[0].description, "");
    }

    #[test]
    fn test_simplify_nice() {
        let records = simplify_nice(COMPONENTS).unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["K0427", "OG-WRL-001", "S0114", "T0260"]);
        assert_eq!(records[0].description, "Same");
        assert_eq!(records[1].description, "Analyst: Defends networks");
        assert_eq!(records[1].category, Category::Role);
        assert_eq!(records[2].description, "Header analysis");
        assert_eq!(records[3].description, "Analyze email");
    }

    #[tokio::test]
    async fn test_simplified_files_load_into_knowledge_base() {
        let dir = tempfile::tempdir().unwrap();
        let (bundle, components) = (dir.path().join("attack.json"), dir.path().join("nice.json"));
        let (techniques, roles) = (dir.path().join("mitre_simple.json"), dir.path().join("nice_simple.json"));
        std::fs::write(&bundle, BUNDLE).unwrap();
        std::fs::write(&components, COMPONENTS).unwrap();

        assert_eq!(simplify_attack_file(&bundle, &techniques).await.unwrap(), 2);
        assert_eq!(simplify_nice_file(&components, &roles).await.unwrap(), 4);

        let kb = KnowledgeBase::load(&techniques, &roles).await;
        assert!(!kb.is_degraded());
        assert!(kb.contains("T1566.002"));
        assert!(kb.contains("OG-WRL-001"));
    }

    #[tokio::test]
    async fn test_missing_input_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = simplify_attack_file(dir.path().join("absent.json"), dir.path().join("out.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, SimplifyError::Read { .. }));
    }
}
