//! Assembly: turn the ordered approved sections into the final document.
//!
//! [`render_markdown`] is the deterministic layout (title, table of contents,
//! sections separated by rules). [`EditorAssembler`] additionally asks the
//! language model to proofread that layout, and keeps the deterministic text
//! whenever the polished version loses a fallback marker.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::collaborators::{Assembler, SectionText};
use super::revision::FALLBACK_MARKER;
use crate::brain::Brain;
use crate::error::AssemblyError;

/// Separator placed between sections.
pub const SECTION_SEPARATOR: &str = "\n\n---\n\n";

const EDITOR_SYSTEM: &str = "You are an expert editor for technical research reports. \
You receive a report that has already been assembled from individually written sections \
and turn it into a single, cohesive, polished document.\n\n\
Follow these instructions:\n\
1. Keep every section and keep them in the given order.\n\
2. Keep the title and make sure it suits the original topic.\n\
3. Keep the markdown table of contents in sync with the section headings.\n\
4. Proofread for grammatical errors, awkward phrasing and inconsistencies.\n\
5. Improve transitions between sections.\n\
6. Any line reading exactly \"*Generated using LLM due to insufficient search results.*\" \
must be kept verbatim at the start of its section.\n\
7. Output only the final Markdown document.";

/// GitHub-style anchor for a heading.
pub fn anchor(label: &str) -> String {
    label
        .trim()
        .to_lowercase()
        .chars()
        .filter_map(|c| match c {
            c if c.is_alphanumeric() || c == '-' || c == '_' => Some(c),
            ' ' => Some('-'),
            _ => None,
        })
        .collect()
}

/// Deterministic markdown layout of a report.
///
/// Section bodies are copied verbatim apart from trailing whitespace, so any
/// fallback or error marker at the start of a body survives.
pub fn render_markdown(topic: &str, sections: &[SectionText<'_>]) -> String {
    let mut md = String::new();
    md.push_str(&format!("# {}\n\n", topic.trim()));

    if !sections.is_empty() {
        md.push_str("## Table of Contents\n\n");
        for (i, section) in sections.iter().enumerate() {
            let title = section.heading.clean_label();
            md.push_str(&format!("{}. [{title}](#{})\n", i + 1, anchor(&title)));
        }
        md.push('\n');
    }

    let bodies: Vec<String> = sections
        .iter()
        .map(|section| {
            format!(
                "## {}\n\n{}",
                section.heading.clean_label(),
                section.body.trim_end()
            )
        })
        .collect();
    md.push_str(&bodies.join(SECTION_SEPARATOR));
    md.push('\n');
    md
}

/// Number of fallback markers in `text`.
pub fn marker_count(text: &str) -> usize {
    text.matches(FALLBACK_MARKER).count()
}

/// Assembler that only applies [`render_markdown`].
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkdownAssembler;

#[async_trait]
impl Assembler for MarkdownAssembler {
    async fn assemble(
        &self,
        topic: &str,
        sections: &[SectionText<'_>],
    ) -> Result<String, AssemblyError> {
        Ok(render_markdown(topic, sections))
    }
}

/// Assembler that has the language model polish the deterministic layout.
pub struct EditorAssembler {
    brain: Arc<Brain>,
}

impl EditorAssembler {
    pub fn new(brain: Arc<Brain>) -> Self {
        Self { brain }
    }
}

#[async_trait]
impl Assembler for EditorAssembler {
    async fn assemble(
        &self,
        topic: &str,
        sections: &[SectionText<'_>],
    ) -> Result<String, AssemblyError> {
        let draft = render_markdown(topic, sections);
        let prompt = format!(
            "**Original Topic:**\n{topic}\n\n**Assembled Report:**\n{draft}\n\n\
             Please edit and format the final report now."
        );

        let polished = self.brain.ask(EDITOR_SYSTEM, &prompt, 0.0, false).await?;
        let polished = strip_markdown_fence(&polished);

        if polished.is_empty() {
            warn!("Editor returned nothing, keeping the assembled draft");
            return Ok(draft);
        }
        let expected = marker_count(&draft);
        if marker_count(polished) < expected {
            warn!(
                expected,
                found = marker_count(polished),
                "Editor dropped fallback markers, keeping the assembled draft"
            );
            return Ok(draft);
        }

        info!(sections = sections.len(), "Report polished");
        Ok(format!("{polished}\n"))
    }
}

/// Remove a ```markdown fence the model sometimes wraps its answer in.
fn strip_markdown_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    body.strip_suffix("```").unwrap_or(body).trim()
}
