//! Mode (model) detection.
//!
//! Detection is heuristic and page-specific, so each heuristic is a separate
//! strategy and the detector just asks them in order. Callers only ever see the
//! resulting label.

use url::Url;

use crate::config::ModeConfig;
use crate::document::RenderedDocument;

pub const DEFAULT_MODE: &str = "Default";
pub const UNKNOWN_MODE: &str = "Unknown";

pub trait ModeStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn detect(&self, document: &RenderedDocument) -> Option<String>;
}

/// `?model=<label>` on the current location.
#[derive(Debug, Clone)]
pub struct QueryParamStrategy {
    param: String,
}

impl QueryParamStrategy {
    pub fn new(param: &str) -> Self {
        Self {
            param: param.to_string(),
        }
    }
}

impl ModeStrategy for QueryParamStrategy {
    fn name(&self) -> &'static str {
        "query-param"
    }

    fn detect(&self, document: &RenderedDocument) -> Option<String> {
        let url = Url::parse(document.location.trim()).ok()?;
        url.query_pairs()
            .find(|(key, _)| key == self.param.as_str())
            .map(|(_, value)| value.into_owned())
    }
}

/// Text of the model selector element. A rendered but empty selector still
/// counts as a match and reports `"Unknown"`.
#[derive(Debug, Clone, Default)]
pub struct SelectorTextStrategy;

impl ModeStrategy for SelectorTextStrategy {
    fn name(&self) -> &'static str {
        "selector-text"
    }

    fn detect(&self, document: &RenderedDocument) -> Option<String> {
        let text = document.model_selector.as_deref()?.trim();
        if text.is_empty() {
            Some(UNKNOWN_MODE.to_string())
        } else {
            Some(text.to_string())
        }
    }
}

/// An in-progress reasoning marker in the page body implies a reasoning model.
#[derive(Debug, Clone)]
pub struct ThinkingHeuristicStrategy {
    marker: String,
    label: String,
}

impl ThinkingHeuristicStrategy {
    pub fn new(marker: &str, label: &str) -> Self {
        Self {
            marker: marker.to_string(),
            label: label.to_string(),
        }
    }
}

impl ModeStrategy for ThinkingHeuristicStrategy {
    fn name(&self) -> &'static str {
        "thinking-heuristic"
    }

    fn detect(&self, document: &RenderedDocument) -> Option<String> {
        if !self.marker.is_empty() && document.body_text.contains(&self.marker) {
            Some(self.label.clone())
        } else {
            None
        }
    }
}

pub struct ModeDetector {
    strategies: Vec<Box<dyn ModeStrategy>>,
    fallback: String,
}

impl ModeDetector {
    pub fn new(strategies: Vec<Box<dyn ModeStrategy>>, fallback: &str) -> Self {
        Self {
            strategies,
            fallback: fallback.to_string(),
        }
    }

    pub fn from_config(config: &ModeConfig) -> Self {
        Self::new(
            vec![
                Box::new(QueryParamStrategy::new(&config.model_query_param)),
                Box::new(SelectorTextStrategy),
                Box::new(ThinkingHeuristicStrategy::new(
                    &config.thinking_marker,
                    &config.thinking_label,
                )),
            ],
            &config.fallback_label,
        )
    }

    pub fn detect(&self, document: &RenderedDocument) -> String {
        for strategy in &self.strategies {
            if let Some(label) = strategy.detect(document) {
                tracing::trace!(strategy = strategy.name(), mode = %label, "mode detected");
                return label;
            }
        }
        self.fallback.clone()
    }
}

impl Default for ModeDetector {
    fn default() -> Self {
        Self::from_config(&ModeConfig::default())
    }
}
