//! Outline model: the ordered list of section headings produced by planning.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::PlanningError;

/// Leading markdown bullets, whitespace, digits, periods and dashes.
static LEADING_NOISE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[*\s\d.\-]+").expect("static heading pattern"));

/// One unit of the report outline.
///
/// `position` is the heading's index in the outline and is the identity used by
/// the evidence pool, so two headings with the same label stay distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SectionHeading {
    pub position: usize,
    pub label: String,
}

impl SectionHeading {
    pub fn new(position: usize, label: impl Into<String>) -> Self {
        Self {
            position,
            label: label.into(),
        }
    }

    /// The label without markdown list decoration, for queries and titles.
    pub fn clean_label(&self) -> String {
        clean_heading(&self.label)
    }
}

impl fmt::Display for SectionHeading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// Strip list markers, numbering and bold markup from a raw outline line.
///
/// `"* **I. Introduction**"` becomes `"I. Introduction"`. Returns the trimmed raw
/// label when stripping would leave nothing.
pub fn clean_heading(raw: &str) -> String {
    let stripped = LEADING_NOISE.replace(raw, "");
    let cleaned = stripped.replace("**", "").trim().to_string();
    if cleaned.is_empty() {
        raw.trim().to_string()
    } else {
        cleaned
    }
}

/// Ordered, immutable sequence of section headings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outline {
    headings: Vec<SectionHeading>,
}

impl Outline {
    /// Build an outline from labels, assigning positions in order.
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let headings = labels
            .into_iter()
            .enumerate()
            .map(|(position, label)| SectionHeading::new(position, label))
            .collect();
        Self { headings }
    }

    /// Parse planner output: every non-empty trimmed line is one heading.
    pub fn parse(text: &str, limit: usize) -> Result<Self, PlanningError> {
        let outline = Self::new(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with("```")),
        );
        outline.validate(limit)?;
        Ok(outline)
    }

    /// Reject empty outlines and outlines longer than `limit`.
    pub fn validate(&self, limit: usize) -> Result<(), PlanningError> {
        if self.headings.is_empty() {
            return Err(PlanningError::EmptyOutline);
        }
        if self.headings.len() > limit {
            return Err(PlanningError::OutlineTooLong {
                sections: self.headings.len(),
                limit,
            });
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.headings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headings.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&SectionHeading> {
        self.headings.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SectionHeading> {
        self.headings.iter()
    }

    /// Whether `heading` is exactly the entry at its position.
    pub fn contains(&self, heading: &SectionHeading) -> bool {
        self.headings.get(heading.position) == Some(heading)
    }

    pub fn labels(&self) -> Vec<&str> {
        self.headings.iter().map(|h| h.label.as_str()).collect()
    }
}

impl<'a> IntoIterator for &'a Outline {
    type Item = &'a SectionHeading;
    type IntoIter = std::slice::Iter<'a, SectionHeading>;

    fn into_iter(self) -> Self::IntoIter {
        self.headings.iter()
    }
}
