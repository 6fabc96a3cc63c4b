//! The rendered conversation page as seen by the scanner.
//!
//! A document is a point-in-time view: the current location, every rendered
//! turn element with its content containers, and the few bits of page text
//! used for mode detection.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MonitorError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RenderedDocument {
    pub location: String,
    /// Visible text of the model selector element, when rendered.
    #[serde(default)]
    pub model_selector: Option<String>,
    #[serde(default)]
    pub body_text: String,
    #[serde(default)]
    pub turns: Vec<TurnElement>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TurnElement {
    /// Raw author-role attribute, e.g. `user` or `assistant`.
    #[serde(default)]
    pub author_role: String,
    /// Primary rendered content container.
    #[serde(default)]
    pub markdown: Option<String>,
    /// Pre-wrapped plain container some user turns render instead.
    #[serde(default)]
    pub plain_text: Option<String>,
}

impl TurnElement {
    pub fn new(author_role: &str, markdown: Option<&str>, plain_text: Option<&str>) -> Self {
        Self {
            author_role: author_role.to_string(),
            markdown: markdown.map(str::to_string),
            plain_text: plain_text.map(str::to_string),
        }
    }
}

/// Something that can produce the current state of the observed document.
pub trait DocumentSource {
    fn load(&self) -> Result<RenderedDocument>;
}

/// A document mirrored to a JSON file by an external renderer.
#[derive(Debug, Clone)]
pub struct FileDocument {
    path: PathBuf,
}

impl FileDocument {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DocumentSource for FileDocument {
    fn load(&self) -> Result<RenderedDocument> {
        let raw = fs::read_to_string(&self.path)?;
        serde_json::from_str(&raw).map_err(|err| MonitorError::Document {
            path: self.path.clone(),
            message: err.to_string(),
        })
    }
}

impl DocumentSource for RenderedDocument {
    fn load(&self) -> Result<RenderedDocument> {
        Ok(self.clone())
    }
}
