//! Persona and prompt document library.
//!
//! Documents are markdown files with an optional YAML frontmatter block.
//! The frontmatter may carry a `model:` hint and a `description:`; the
//! body below it is used verbatim as agent or prompt instructions.

use gray_matter::engine::YAML;
use gray_matter::Matter;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Agent,
    Prompt,
}

impl DocumentKind {
    fn subdir(&self) -> &'static str {
        match self {
            DocumentKind::Agent => "agents",
            DocumentKind::Prompt => "prompts",
        }
    }
}

/// A resolved document: frontmatter stripped, hints extracted.
#[derive(Debug, Clone)]
pub struct Document {
    pub name: String,
    pub body: String,
    pub model_hint: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct DocumentFrontmatter {
    model: Option<String>,
    description: Option<String>,
}

/// Resolves document names against an ordered list of library roots;
/// the first root containing the file wins.
pub struct DocumentLibrary {
    roots: Vec<PathBuf>,
    matter: Matter<YAML>,
}

impl DocumentLibrary {
    /// Project library under `<project>/.stagehand`, then the per-user
    /// library under `~/.stagehand`.
    pub fn for_project(project_root: &Path) -> Self {
        let mut roots = vec![project_root.join(".stagehand")];
        if let Some(home) = dirs::home_dir() {
            roots.push(home.join(".stagehand"));
        }
        Self::with_roots(roots)
    }

    pub fn with_roots(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            matter: Matter::<YAML>::new(),
        }
    }

    /// Resolve `name` to a document of the given kind, or `None` when no
    /// library root contains it.
    pub async fn resolve(&self, kind: DocumentKind, name: &str) -> Option<Document> {
        for root in &self.roots {
            let path = root.join(kind.subdir()).join(format!("{name}.md"));
            match fs::read_to_string(&path).await {
                Ok(content) => return Some(self.parse(name, &content)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    tracing::warn!("Failed to read {}: {}", path.display(), e);
                    continue;
                }
            }
        }
        None
    }

    fn parse(&self, name: &str, content: &str) -> Document {
        let parsed = self.matter.parse::<gray_matter::Pod>(content);

        let (has_data, body) = match &parsed {
            Ok(entity) => (entity.data.is_some(), entity.content.trim().to_string()),
            Err(_) => (false, content.trim().to_string()),
        };

        let frontmatter = if has_data {
            Self::extract_frontmatter(content)
        } else {
            DocumentFrontmatter::default()
        };

        Document {
            name: name.to_string(),
            body,
            model_hint: frontmatter.model,
            description: frontmatter.description,
        }
    }

    /// Typed view of the frontmatter block between the `---` markers.
    fn extract_frontmatter(content: &str) -> DocumentFrontmatter {
        let Some(rest) = content.strip_prefix("---\n") else {
            return DocumentFrontmatter::default();
        };
        let Some(end) = rest.find("\n---") else {
            return DocumentFrontmatter::default();
        };
        serde_yaml::from_str(&rest[..end]).unwrap_or_default()
    }
}
