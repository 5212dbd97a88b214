//! Discovery and loading of workflow definition documents.

use super::workflow::WorkflowDefinition;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Lightweight listing entry for one discovered definition.
#[derive(Debug, Clone)]
pub struct WorkflowSummary {
    pub name: String,
    pub description: String,
    pub step_count: usize,
}

/// Scans a directory of YAML workflow definitions.
///
/// Documents that fail to parse or validate are logged and excluded so a
/// directory of partially-invalid pipelines never breaks discovery.
/// Nothing is cached; every lookup re-reads the directory.
pub struct WorkflowLoader {
    workflows_dir: PathBuf,
}

struct DiscoveredWorkflow {
    file_stem: String,
    definition: WorkflowDefinition,
}

impl WorkflowLoader {
    pub fn new(workflows_dir: impl Into<PathBuf>) -> Self {
        Self {
            workflows_dir: workflows_dir.into(),
        }
    }

    fn is_definition_file(path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext == "yml" || ext == "yaml")
    }

    async fn scan(&self) -> Result<Vec<DiscoveredWorkflow>> {
        let mut discovered = Vec::new();

        let mut entries = match fs::read_dir(&self.workflows_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(discovered),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !Self::is_definition_file(&path) {
                continue;
            }

            let file_stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();

            match Self::parse_file(&path).await {
                Ok(definition) => discovered.push(DiscoveredWorkflow {
                    file_stem,
                    definition,
                }),
                Err(e) => {
                    tracing::warn!("Skipping invalid workflow {}: {}", path.display(), e);
                }
            }
        }

        discovered.sort_by(|a, b| a.file_stem.cmp(&b.file_stem));
        Ok(discovered)
    }

    async fn parse_file(path: &Path) -> anyhow::Result<WorkflowDefinition> {
        let content = fs::read_to_string(path).await?;
        let definition: WorkflowDefinition = serde_yaml::from_str(&content)?;
        definition.validate().map_err(anyhow::Error::msg)?;
        Ok(definition)
    }

    /// Names and descriptions of every valid definition in the directory.
    pub async fn list_all(&self) -> Result<Vec<WorkflowSummary>> {
        let discovered = self.scan().await?;
        Ok(discovered
            .into_iter()
            .map(|d| WorkflowSummary {
                name: d
                    .definition
                    .name
                    .unwrap_or_else(|| d.file_stem.clone()),
                description: d.definition.description,
                step_count: d.definition.steps.len(),
            })
            .collect())
    }

    /// Full definition for `name`, matching the explicit `name` field
    /// first and falling back to the file stem.
    pub async fn load_by_name(&self, name: &str) -> Result<WorkflowDefinition> {
        let discovered = self.scan().await?;

        let found = discovered
            .iter()
            .position(|d| d.definition.name.as_deref() == Some(name))
            .or_else(|| discovered.iter().position(|d| d.file_stem == name));

        match found {
            Some(index) => {
                let d = discovered.into_iter().nth(index).expect("index in range");
                let mut definition = d.definition;
                definition.name.get_or_insert(d.file_stem);
                Ok(definition)
            }
            None => Err(Error::NotFound(format!("workflow '{name}'"))),
        }
    }
}
