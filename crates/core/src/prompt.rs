//! Prompt construction for a single section.

use std::fmt::Write;

use crate::catalog;
use crate::generation::GenerationConfig;

/// System message sent ahead of every section prompt.
pub const SYSTEM_PROMPT: &str = "You are a professional scientific writer. \
Write the requested manuscript section in Markdown format.";

/// Build the user prompt for `section_id` under `config`.
pub fn section_prompt(section_id: &str, config: &GenerationConfig) -> String {
    let title = catalog::find_section(section_id)
        .map(|s| s.name)
        .unwrap_or(section_id);

    let mut prompt = format!(
        "Task: Write the \"{section_id}\" section ({title}) of the manuscript.\n\n\
         Output Format: {}\n\
         Target Audience: {}\n",
        config.output_format, config.target_audience
    );

    if config.sanitized_output {
        prompt.push_str(
            "Sanitization: omit proprietary names, unpublished figures, and internal codenames.\n",
        );
    }

    let citations = &config.citation_constraints;
    let _ = writeln!(
        prompt,
        "Citations: at most {} per section.",
        citations.max_citations_per_section
    );
    if citations.approved_corpus_only {
        prompt.push_str("Cite only sources from the approved corpus.\n");
    }
    if citations.flag_unverified {
        prompt.push_str("Mark any claim without a verifiable source as [UNVERIFIED].\n");
    }
    if !citations.required_citations.is_empty() {
        let _ = writeln!(
            prompt,
            "Where relevant, cite: {}.",
            citations.required_citations.join(", ")
        );
    }

    prompt.push_str("\nPlease proceed with researching and writing this section.");
    prompt
}
