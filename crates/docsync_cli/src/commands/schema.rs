//! Schema commands.

use std::fs;
use std::path::Path;

use docsync_codec::to_json;
use docsync_core::{ObjectModel, RelationshipDescriptor};
use serde::Serialize;
use tracing::debug;

/// Summary of a loaded model.
#[derive(Debug, Serialize)]
pub struct SchemaSummary {
    /// Model fingerprint.
    pub fingerprint: String,
    /// Entities in declaration order.
    pub entities: Vec<EntitySummary>,
}

/// Summary of one entity.
#[derive(Debug, Serialize)]
pub struct EntitySummary {
    /// Entity name.
    pub name: String,
    /// `name: type` per attribute.
    pub attributes: Vec<String>,
    /// One line per relationship.
    pub relationships: Vec<String>,
}

fn load(file: &Path) -> Result<ObjectModel, Box<dyn std::error::Error>> {
    let text = fs::read_to_string(file)
        .map_err(|e| format!("cannot read {}: {e}", file.display()))?;
    let model = ObjectModel::from_json(&text)?;
    debug!(file = %file.display(), entities = model.entities().len(), "schema loaded");
    Ok(model)
}

fn describe_relationship(r: &RelationshipDescriptor) -> String {
    let arrow = if r.is_to_many() { "->>" } else { "->" };
    let inverse = r.inverse.as_deref().unwrap_or("-");
    format!(
        "{} {arrow} {} (inverse {inverse}, delete {:?})",
        r.name, r.target, r.delete_rule
    )
}

/// Builds the summary of a model.
pub fn summarize(model: &ObjectModel) -> SchemaSummary {
    SchemaSummary {
        fingerprint: model.fingerprint(),
        entities: model
            .entities()
            .iter()
            .map(|e| EntitySummary {
                name: e.name().to_string(),
                attributes: e
                    .attributes()
                    .iter()
                    .map(|a| format!("{}: {}", a.name, a.attr_type))
                    .collect(),
                relationships: e.relationships().iter().map(describe_relationship).collect(),
            })
            .collect(),
    }
}

/// Runs `schema check`.
pub fn check(file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let model = load(file)?;
    println!(
        "OK: {} entities, fingerprint {}",
        model.entities().len(),
        model.fingerprint()
    );
    Ok(())
}

/// Runs `schema show`.
pub fn show(file: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let model = load(file)?;
    match format {
        "json" => {
            let mut json = to_json(&model.describe())?;
            if let Some(map) = json.as_object_mut() {
                map.insert("fingerprint".into(), model.fingerprint().into());
            }
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        _ => print_text_output(&summarize(&model)),
    }
    Ok(())
}

fn print_text_output(summary: &SchemaSummary) {
    println!("Fingerprint: {}", summary.fingerprint);
    for entity in &summary.entities {
        println!();
        println!("{}", entity.name);
        for attribute in &entity.attributes {
            println!("  {attribute}");
        }
        for relationship in &entity.relationships {
            println!("  {relationship}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsync_testkit::{entry_model, entry_schema_json};

    #[test]
    fn summary_lists_fixture_entities() {
        let summary = summarize(&entry_model());
        let names: Vec<_> = summary.entities.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["Entry", "File", "SubEntry"]);
        let entry = &summary.entities[0];
        assert!(entry.attributes.contains(&"i32: int32".to_string()));
        assert!(entry.relationships.iter().any(|r| r.starts_with("files ->> File")));
    }

    #[test]
    fn load_reads_and_rejects() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("model.json");
        fs::write(&good, entry_schema_json()).unwrap();
        assert_eq!(load(&good).unwrap().fingerprint(), entry_model().fingerprint());

        let bad = dir.path().join("bad.json");
        fs::write(&bad, r#"{"entities": [{"name": "$bad"}]}"#).unwrap();
        assert!(load(&bad).is_err());
        assert!(load(&dir.path().join("missing.json")).is_err());
    }
}
