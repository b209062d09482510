//! Evidence items and the per-run evidence pool.

use serde::{Deserialize, Serialize};

use super::outline::{Outline, SectionHeading};

/// One raw result returned by an evidence provider, before tagging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceHit {
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl EvidenceHit {
    pub fn new(title: impl Into<String>, body: impl Into<String>, url: Option<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            url,
        }
    }
}

/// A retrieved piece of evidence, tagged with its provider and owning heading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub provider: String,
    pub section: SectionHeading,
}

impl EvidenceItem {
    pub fn from_hit(hit: EvidenceHit, provider: &str, section: &SectionHeading) -> Self {
        Self {
            title: hit.title,
            body: hit.body,
            url: hit.url,
            provider: provider.to_string(),
            section: section.clone(),
        }
    }
}

/// Evidence for every heading of an outline, indexed by heading position.
///
/// Built once by retrieval and read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidencePool {
    slices: Vec<Vec<EvidenceItem>>,
}

impl EvidencePool {
    /// An empty pool with one (empty) slice per outline heading.
    pub fn for_outline(outline: &Outline) -> Self {
        Self {
            slices: vec![Vec::new(); outline.len()],
        }
    }

    /// Add items for `heading`. Items whose tag is not `heading` are dropped.
    pub(crate) fn extend(&mut self, heading: &SectionHeading, items: Vec<EvidenceItem>) {
        if let Some(slice) = self.slices.get_mut(heading.position) {
            slice.extend(items.into_iter().filter(|item| &item.section == heading));
        }
    }

    /// The evidence slice for `heading`; empty when nothing was found.
    pub fn slice(&self, heading: &SectionHeading) -> &[EvidenceItem] {
        self.slices
            .get(heading.position)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of headings covered by the pool.
    pub fn sections(&self) -> usize {
        self.slices.len()
    }

    pub fn total_items(&self) -> usize {
        self.slices.iter().map(Vec::len).sum()
    }

    pub fn items(&self) -> impl Iterator<Item = &EvidenceItem> {
        self.slices.iter().flatten()
    }
}

/// Minimum bar an evidence slice must clear to support a grounded draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvidenceSufficiency {
    pub min_items: usize,
    pub min_chars: usize,
}

impl EvidenceSufficiency {
    /// Whether `slice` has enough items with enough non-whitespace content.
    pub fn is_sufficient(&self, slice: &[EvidenceItem]) -> bool {
        if slice.is_empty() || slice.len() < self.min_items {
            return false;
        }
        let chars: usize = slice
            .iter()
            .map(|item| item.body.trim().chars().count())
            .sum();
        chars >= self.min_chars
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(section: &SectionHeading, body: &str) -> EvidenceItem {
        EvidenceItem::from_hit(EvidenceHit::new("t", body, None), "web", section)
    }

    #[test]
    fn test_pool_slices_by_position() {
        let outline = Outline::new(["Intro", "Intro"]);
        let first = outline.get(0).unwrap();
        let second = outline.get(1).unwrap();

        let mut pool = EvidencePool::for_outline(&outline);
        pool.extend(second, vec![item(second, "a"), item(second, "b")]);

        assert!(pool.slice(first).is_empty());
        assert_eq!(pool.slice(second).len(), 2);
        assert_eq!(pool.total_items(), 2);
        assert_eq!(pool.sections(), 2);
    }

    #[test]
    fn test_pool_drops_mistagged_items() {
        let outline = Outline::new(["A", "B"]);
        let a = outline.get(0).unwrap();
        let b = outline.get(1).unwrap();
        let mut pool = EvidencePool::for_outline(&outline);
        pool.extend(a, vec![item(b, "belongs to b")]);
        assert_eq!(pool.total_items(), 0);
    }

    #[test]
    fn test_unknown_heading_has_empty_slice() {
        let pool = EvidencePool::for_outline(&Outline::new(["A"]));
        assert!(pool.slice(&SectionHeading::new(9, "Z")).is_empty());
    }

    #[test]
    fn test_sufficiency() {
        let heading = SectionHeading::new(0, "A");
        let bar = EvidenceSufficiency {
            min_items: 1,
            min_chars: 10,
        };
        assert!(!bar.is_sufficient(&[]));
        assert!(!bar.is_sufficient(&[item(&heading, "   short   ")]));
        assert!(bar.is_sufficient(&[item(&heading, "long enough body")]));

        let zero_bar = EvidenceSufficiency {
            min_items: 0,
            min_chars: 0,
        };
        assert!(!zero_bar.is_sufficient(&[]));
    }
}
