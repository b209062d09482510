//! LLM-backed collaborators: planner, drafter and critiquer.
//!
//! Each one owns a shared [`Brain`], so all three draw from the same LLM
//! throttle. Prompt wording lives here and nowhere else.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::collaborators::{
    CritiqueRequest, Critiquer, DraftMode, DraftRequest, Drafter, Planner,
};
use super::evidence::EvidenceItem;
use super::outline::Outline;
use super::revision::{Critique, mark_fallback};
use crate::brain::Brain;
use crate::error::{LlmError, PlanningError};

/// What the writer model answers when the evidence does not support a section.
pub const INSUFFICIENT_SENTINEL: &str = "Insufficient information to write this section.";

/// Relevance at or below this value caps the critique score.
pub const LOW_RELEVANCE: u8 = 4;

const PLANNER_SYSTEM: &str = "You are an expert research assistant. You create concise, \
structured outlines for technical reports.";

const WRITER_SYSTEM: &str = "You are an expert technical writer and research assistant. \
You write detailed, well-structured and informative report sections.";

const CRITIQUER_SYSTEM: &str = "You are an expert academic editor and fact-checker. You \
judge a written report section only against the search results it was written from, \
and you answer with a single JSON object.";

/// Produces outlines by asking the model for a markdown bullet list.
pub struct LlmPlanner {
    brain: Arc<Brain>,
    max_sections: usize,
}

impl LlmPlanner {
    pub fn new(brain: Arc<Brain>, max_sections: usize) -> Self {
        Self {
            brain,
            max_sections,
        }
    }

    fn prompt(topic: &str) -> String {
        format!(
            "Create a structured outline for a technical report.\n\n\
             **Topic:**\n{topic}\n\n\
             **Instructions:**\n\
             1. Generate a hierarchical outline with 3-4 main sections.\n\
             2. Each main section should have 2-3 subsections.\n\
             3. Use Markdown bullet points ('*'), one heading per line.\n\
             4. Output ONLY the Markdown outline, with no introductory or concluding text.\n\n\
             **Example Output:**\n\
             * **I. Introduction**\n\
             * A. Background on Topic\n\
             * B. Problem Statement\n\
             * **II. Main Section Two**\n\
             * A. Sub-point A\n\
             * B. Sub-point B"
        )
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn plan(&self, topic: &str) -> Result<Outline, PlanningError> {
        info!(topic, "Planning outline");
        let text = self
            .brain
            .ask(PLANNER_SYSTEM, &Self::prompt(topic), 0.0, false)
            .await?;
        let outline = Outline::parse(&text, self.max_sections)?;
        info!(sections = outline.len(), "Outline ready");
        Ok(outline)
    }
}

/// Render an evidence slice as the context block of a prompt.
pub fn format_context(evidence: &[EvidenceItem]) -> String {
    evidence
        .iter()
        .map(|item| {
            let mut block = format!("**Source Title:** {}\n", item.title);
            if let Some(url) = &item.url {
                block.push_str(&format!("**Source:** {url}\n"));
            }
            block.push_str(&format!("**Content:** {}", item.body));
            block
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

/// Writes section bodies, grounded in evidence when there is enough of it.
pub struct LlmDrafter {
    brain: Arc<Brain>,
}

impl LlmDrafter {
    pub fn new(brain: Arc<Brain>) -> Self {
        Self { brain }
    }

    fn grounded_prompt(request: &DraftRequest<'_>) -> String {
        let section = request.heading.clean_label();
        let mut prompt = format!(
            "Write a report section for the heading **\"{section}\"** of a report on \
             \"{topic}\".\n\n\
             **Instructions:**\n\
             1. Synthesize the key facts, findings and figures from the search results below.\n\
             2. Base your writing *only* on the search results. Do not add outside information.\n\
             3. Output a single block of Markdown. Do not include a title or heading.\n\
             4. If the search results are empty or insufficient to write a meaningful section, \
             output exactly: \"{INSUFFICIENT_SENTINEL}\"\n",
            topic = request.topic,
        );
        if let Some(critique) = request.prior_critique {
            prompt.push_str(&format!(
                "\n**Reviewer feedback on your previous draft (score {}/10):**\n{}\n\
                 Address every point raised in this feedback.\n",
                critique.score, critique.feedback
            ));
        }
        prompt.push_str(&format!(
            "\n**Search Results:**\n{}",
            format_context(request.evidence)
        ));
        prompt
    }

    fn fallback_prompt(request: &DraftRequest<'_>) -> String {
        format!(
            "Not enough source material was found for the heading **\"{}\"** of a report on \
             \"{}\". Write the section from your general knowledge. Be accurate and avoid \
             specific statistics you are unsure of. Output a single block of Markdown \
             without a title or heading.",
            request.heading.clean_label(),
            request.topic
        )
    }

    async fn write_fallback(&self, request: &DraftRequest<'_>) -> Result<String, LlmError> {
        let body = self
            .brain
            .ask(
                WRITER_SYSTEM,
                &Self::fallback_prompt(request),
                self.brain.temperature(),
                false,
            )
            .await?;
        Ok(mark_fallback(&body))
    }
}

/// Whether the model declined to write from the given evidence.
fn declined(body: &str) -> bool {
    body.trim().trim_matches('"').starts_with(INSUFFICIENT_SENTINEL)
}

#[async_trait]
impl Drafter for LlmDrafter {
    async fn draft(&self, request: DraftRequest<'_>) -> Result<String, LlmError> {
        if request.mode == DraftMode::Fallback {
            debug!(section = %request.heading, "Writing fallback draft");
            return self.write_fallback(&request).await;
        }

        let body = self
            .brain
            .ask(
                WRITER_SYSTEM,
                &Self::grounded_prompt(&request),
                self.brain.temperature(),
                false,
            )
            .await?;
        if declined(&body) {
            info!(section = %request.heading, "Writer judged evidence insufficient, falling back");
            return self.write_fallback(&request).await;
        }
        Ok(body)
    }
}

#[derive(Debug, Deserialize)]
struct CritiqueAnswer {
    #[serde(alias = "score")]
    grounding: i64,
    relevance: Option<i64>,
    #[serde(default, alias = "feedback")]
    critique: String,
}

/// Combine the two axes into one score: the weaker axis wins, so low relevance
/// forces a low score regardless of grounding.
pub fn combine_scores(grounding: i64, relevance: i64) -> u8 {
    let grounding = grounding.clamp(1, 10) as u8;
    let relevance = relevance.clamp(1, 10) as u8;
    grounding.min(relevance)
}

/// Extract the JSON object from a model answer that may wrap it in prose or fences.
fn json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

/// Parse a critiquer answer into a [`Critique`].
pub fn parse_critique(text: &str) -> Result<Critique, LlmError> {
    let json = json_object(text).ok_or_else(|| LlmError::ResponseParse {
        message: "critique answer contains no JSON object".to_string(),
    })?;
    let answer: CritiqueAnswer =
        serde_json::from_str(json).map_err(|e| LlmError::ResponseParse {
            message: format!("invalid critique JSON: {e}"),
        })?;

    let relevance = answer.relevance.unwrap_or(answer.grounding);
    let score = combine_scores(answer.grounding, relevance);
    if relevance.clamp(1, 10) as u8 <= LOW_RELEVANCE {
        debug!(relevance, score, "Low relevance capped the score");
    }
    Ok(Critique::new(i64::from(score), answer.critique.trim()))
}

/// Scores drafts for grounding and relevance.
pub struct LlmCritiquer {
    brain: Arc<Brain>,
}

impl LlmCritiquer {
    pub fn new(brain: Arc<Brain>) -> Self {
        Self { brain }
    }

    fn prompt(request: &CritiqueRequest<'_>) -> String {
        format!(
            "**Report Topic:**\n\"{topic}\"\n\n\
             **Section Heading:**\n\"{section}\"\n\n\
             **Written Section to Critique:**\n{draft}\n\n\
             **Search Results (Context):**\n{context}\n\n\
             **Instructions:**\n\
             1. Grounding: rate 1-10 how fully the claims in the section are supported by the \
             search results.\n\
             2. Relevance: rate 1-10 how well the material used pertains to the section heading \
             and topic. Material about something unrelated must get 3-4 or lower.\n\
             3. A section is acceptable at 8 or above on both axes.\n\
             4. In the critique, list every specific claim that is unsupported or off-topic.\n\n\
             Answer with JSON only, in the form \
             {{\"grounding\": <1-10>, \"relevance\": <1-10>, \"critique\": \"<text>\"}}",
            topic = request.topic,
            section = request.heading.clean_label(),
            draft = request.draft,
            context = format_context(request.evidence),
        )
    }
}

#[async_trait]
impl Critiquer for LlmCritiquer {
    async fn critique(&self, request: CritiqueRequest<'_>) -> Result<Critique, LlmError> {
        let answer = self
            .brain
            .ask(CRITIQUER_SYSTEM, &Self::prompt(&request), 0.0, true)
            .await?;
        parse_critique(&answer).inspect_err(|e| {
            warn!(section = %request.heading, error = %e, "Unparseable critique");
        })
    }
}
