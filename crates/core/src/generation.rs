//! Per-job generation configuration.
//!
//! The configuration is stored on the job as an opaque JSONB blob and read
//! back by the worker. Every field has a default so a partially specified
//! blob (or an empty `{}`) still yields a runnable plan.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::catalog::{self, OutputFormat};
use crate::error::CoreError;

/// Maximum allowed retry budget per section.
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Maximum length of a section id.
pub const MAX_SECTION_ID_LEN: usize = 64;

/// Maximum length of the free-form target audience string.
pub const MAX_AUDIENCE_LEN: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CitationConstraints {
    pub approved_corpus_only: bool,
    pub flag_unverified: bool,
    pub max_citations_per_section: u32,
    pub required_citations: Vec<String>,
}

impl Default for CitationConstraints {
    fn default() -> Self {
        Self {
            approved_corpus_only: false,
            flag_unverified: true,
            max_citations_per_section: 50,
            required_citations: vec![
                "10.1103/PhysicsPhysiqueFizika.1.195".to_string(),
                "10.1016/j.physrep.2013.02.001".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerationConfig {
    /// Explicit selection. `None` falls back to the format's essential set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_sections: Option<BTreeMap<String, bool>>,
    pub output_format: OutputFormat,
    pub target_audience: String,
    pub sanitized_output: bool,
    /// Explicit order. `None` falls back to catalog order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_order: Option<Vec<String>>,
    pub max_retries: u32,
    pub citation_constraints: CitationConstraints,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            selected_sections: None,
            output_format: OutputFormat::default(),
            target_audience: "technical reviewers".to_string(),
            sanitized_output: false,
            generation_order: None,
            max_retries: 3,
            citation_constraints: CitationConstraints::default(),
        }
    }
}

impl GenerationConfig {
    /// Whether `section_id` is part of this job's selection.
    pub fn is_selected(&self, section_id: &str) -> bool {
        match &self.selected_sections {
            Some(selected) => selected.get(section_id).copied().unwrap_or(false),
            None => self
                .output_format
                .essential_sections()
                .contains(&section_id),
        }
    }

    /// The ordered list of sections a run will process: the generation order
    /// restricted to selected sections, first occurrence wins.
    pub fn plan(&self) -> Vec<String> {
        let order = match &self.generation_order {
            Some(order) => order.clone(),
            None => catalog::default_order(),
        };

        let mut seen = HashSet::new();
        order
            .into_iter()
            .filter(|id| self.is_selected(id))
            .filter(|id| seen.insert(id.clone()))
            .collect()
    }

    /// Whether another retry of a section with `attempts` recorded failures
    /// fits within the configured budget.
    pub fn allows_retry(&self, attempts: i32) -> bool {
        attempts <= self.max_retries as i32
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a section id: non-empty, bounded, ASCII alphanumeric plus `_`/`-`.
pub fn validate_section_id(id: &str) -> Result<(), CoreError> {
    if id.is_empty() {
        return Err(CoreError::Validation("section id must not be empty".into()));
    }
    if id.len() > MAX_SECTION_ID_LEN {
        return Err(CoreError::Validation(format!(
            "section id '{id}' exceeds {MAX_SECTION_ID_LEN} characters"
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(CoreError::Validation(format!(
            "section id '{id}' contains invalid characters"
        )));
    }
    Ok(())
}

/// Validate a generation config submitted at job creation.
pub fn validate_config(config: &GenerationConfig) -> Result<(), CoreError> {
    if config.max_retries > MAX_RETRIES_LIMIT {
        return Err(CoreError::Validation(format!(
            "maxRetries must be at most {MAX_RETRIES_LIMIT}"
        )));
    }
    if config.target_audience.chars().count() > MAX_AUDIENCE_LEN {
        return Err(CoreError::Validation(format!(
            "targetAudience must be at most {MAX_AUDIENCE_LEN} characters"
        )));
    }
    if let Some(order) = &config.generation_order {
        for id in order {
            validate_section_id(id)?;
        }
    }
    if let Some(selected) = &config.selected_sections {
        for id in selected.keys() {
            validate_section_id(id)?;
        }
    }
    if config.plan().is_empty() {
        return Err(CoreError::Validation(
            "configuration selects no sections to generate".into(),
        ));
    }
    Ok(())
}
