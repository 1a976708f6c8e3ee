//! Page Inspector: typed observed states from raw layout samples.

use anyhow::Result;
use log::debug;
use scroll_timeline::{ElementState, PRIMARY_CAPTION, SECONDARY_CAPTION, SectionState, Timeline};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::browser::{BrowserControl, LayoutSample, SectionPath, SectionSample, SelectorPath};
use crate::config::PositionSource;
use crate::error::HarnessError;

/// Maps timeline element names to DOM selectors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorMap {
    section_selector: String,
    elements: BTreeMap<String, String>,
}

impl Default for SelectorMap {
    fn default() -> Self {
        Self::new(".screen-section")
            .with_element(PRIMARY_CAPTION, ".strapline")
            .with_element(SECONDARY_CAPTION, ".strapline-2")
    }
}

impl SelectorMap {
    /// An empty map whose sections are matched by `section_selector`.
    pub fn new(section_selector: impl Into<String>) -> Self {
        Self {
            section_selector: section_selector.into(),
            elements: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_element(mut self, name: impl Into<String>, selector: impl Into<String>) -> Self {
        self.elements.insert(name.into(), selector.into());
        self
    }

    pub fn section_selector(&self) -> &str {
        &self.section_selector
    }

    pub fn section_path(&self, section: usize) -> SectionPath {
        SectionPath {
            selector: self.section_selector.clone(),
            index: section,
        }
    }

    /// One section path per timeline section, in timeline order.
    pub fn resolve_sections(&self, timeline: &Timeline) -> Vec<SectionPath> {
        timeline
            .sections()
            .iter()
            .map(|section| self.section_path(section.index))
            .collect()
    }

    /// Selector path of `element` inside section `section`.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::UnmappedElement`] for element names with no selector.
    pub fn path(&self, section: usize, element: &str) -> Result<SelectorPath, HarnessError> {
        let element_selector =
            self.elements
                .get(element)
                .ok_or_else(|| HarnessError::UnmappedElement {
                    section,
                    element: element.to_owned(),
                })?;
        Ok(SelectorPath {
            section_selector: self.section_selector.clone(),
            section_index: section,
            element_selector: element_selector.clone(),
        })
    }

    /// Resolves every tracked element of `timeline`, in timeline order.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::UnmappedElement`] for the first element with no selector.
    pub fn resolve(&self, timeline: &Timeline) -> Result<Vec<TrackedElement>, HarnessError> {
        timeline
            .tracked_elements()
            .map(|(section, element)| {
                Ok(TrackedElement {
                    section,
                    element: element.name.clone(),
                    path: self.path(section, &element.name)?,
                })
            })
            .collect()
    }
}

/// A timeline element together with where to find it in the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedElement {
    pub section: usize,
    pub element: String,
    pub path: SelectorPath,
}

/// Live state of one tracked element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedState {
    pub section: usize,
    pub element: String,
    /// `None` when the element is not in the render tree.
    pub state: Option<ElementState>,
}

/// Raw samples of every section and tracked element, taken in one pass.
///
/// Settle detection compares whole snapshots, so a section whose clip is
/// still moving keeps the page unsettled even when its captions are still.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutSnapshot {
    /// In section order.
    pub sections: Vec<SectionSample>,
    /// In tracking order.
    pub elements: Vec<LayoutSample>,
}

/// Samples every section and tracked element of a page.
pub struct PageInspector<'run, B> {
    browser: &'run B,
    tracked: &'run [TrackedElement],
    sections: &'run [SectionPath],
    position_source: PositionSource,
}

impl<'run, B: BrowserControl> PageInspector<'run, B> {
    pub fn new(
        browser: &'run B,
        tracked: &'run [TrackedElement],
        sections: &'run [SectionPath],
        position_source: PositionSource,
    ) -> Self {
        Self {
            browser,
            tracked,
            sections,
            position_source,
        }
    }

    /// Samples the whole page once.
    ///
    /// # Errors
    ///
    /// Returns the browser's error if any query fails. A section or element
    /// that is merely missing from the page is not an error.
    pub async fn snapshot(&self) -> Result<LayoutSnapshot> {
        let mut sections = Vec::with_capacity(self.sections.len());
        for path in self.sections {
            let sample = self.browser.sample_section(path).await?;
            debug!("sample section {}: {sample:?}", path.index);
            sections.push(sample);
        }
        let mut elements = Vec::with_capacity(self.tracked.len());
        for tracked in self.tracked {
            let sample = self
                .browser
                .sample_layout(&tracked.path, self.position_source)
                .await?;
            debug!(
                "sample section {} {}: {sample:?}",
                tracked.section, tracked.element
            );
            elements.push(sample);
        }
        Ok(LayoutSnapshot { sections, elements })
    }

    /// One observed state per tracked element, in tracking order.
    pub fn observed_elements(&self, snapshot: &LayoutSnapshot) -> Vec<ObservedState> {
        self.tracked
            .iter()
            .zip(&snapshot.elements)
            .map(|(tracked, sample)| ObservedState {
                section: tracked.section,
                element: tracked.element.clone(),
                state: observed_state(sample),
            })
            .collect()
    }

    /// Observed placement of every section, keyed by section index.
    pub fn observed_sections(
        &self,
        snapshot: &LayoutSnapshot,
    ) -> Vec<(usize, Option<SectionState>)> {
        self.sections
            .iter()
            .zip(&snapshot.sections)
            .map(|(path, sample)| (path.index, observed_section(sample)))
            .collect()
    }
}

/// Converts a raw section sample into the comparable placement. A section
/// with no clip counts as revealed.
pub fn observed_section(sample: &SectionSample) -> Option<SectionState> {
    sample.present.then(|| SectionState {
        top_percent: sample.top_percent,
        revealed: sample.reveal_percent.is_none_or(|reveal| reveal > 0.0),
    })
}

/// Converts a raw sample into the comparable state.
///
/// A section with no reveal information counts as revealed. Opacity is the
/// effective one: an element of a fully clipped section is invisible whatever
/// its own opacity says.
pub fn observed_state(sample: &LayoutSample) -> Option<ElementState> {
    if !sample.present {
        return None;
    }
    let revealed = sample.reveal_percent.is_none_or(|reveal| reveal > 0.0);
    let opacity = if revealed {
        sample.opacity_percent.map(|percent| percent / 100.0)
    } else {
        Some(0.0)
    };
    Some(ElementState {
        offset_percent: sample.position_percent,
        opacity,
        revealed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_map_covers_scroll_hero() {
        let timeline = Timeline::scroll_hero(3).unwrap();
        let tracked = SelectorMap::default().resolve(&timeline).unwrap();
        assert_eq!(tracked.len(), 6);
        assert_eq!(tracked[3].path.section_index, 1);
        assert_eq!(tracked[3].path.section_selector, ".screen-section");
        assert_eq!(tracked[3].path.element_selector, ".strapline-2");
    }

    #[test]
    fn unknown_element_is_unmapped() {
        let map = SelectorMap::new(".screen-section").with_element(PRIMARY_CAPTION, ".strapline");
        let timeline = Timeline::scroll_hero(1).unwrap();
        let err = map.resolve(&timeline).unwrap_err();
        assert!(matches!(
            err,
            HarnessError::UnmappedElement { section: 0, ref element }
                if element == SECONDARY_CAPTION
        ));
    }

    #[test]
    fn every_section_gets_a_path() {
        let timeline = Timeline::scroll_hero(3).unwrap();
        let sections = SelectorMap::default().resolve_sections(&timeline);
        let indices: Vec<usize> = sections.iter().map(|path| path.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(sections.iter().all(|path| path.selector == ".screen-section"));
    }

    #[test]
    fn section_reveal_decides_visibility() {
        let clipped = SectionSample {
            top_percent: Some(0.0),
            reveal_percent: Some(0.0),
            present: true,
        };
        assert_eq!(
            observed_section(&clipped),
            Some(SectionState {
                top_percent: Some(0.0),
                revealed: false
            })
        );
        let unclipped = SectionSample {
            reveal_percent: None,
            ..clipped
        };
        assert!(observed_section(&unclipped).is_some_and(|state| state.revealed));
        assert_eq!(observed_section(&SectionSample::absent()), None);
    }

    #[test]
    fn absent_sample_is_absent_state() {
        assert_eq!(observed_state(&LayoutSample::absent()), None);
    }

    #[test]
    fn clipped_section_hides_its_elements() {
        let sample = LayoutSample {
            position_percent: Some(85.0),
            opacity_percent: Some(100.0),
            reveal_percent: Some(0.0),
            present: true,
        };
        let state = observed_state(&sample).unwrap();
        assert!(!state.revealed);
        assert_eq!(state.opacity, Some(0.0));
        assert_eq!(state.offset_percent, Some(85.0));
    }

    #[test]
    fn missing_reveal_counts_as_revealed() {
        let sample = LayoutSample {
            position_percent: Some(18.0),
            opacity_percent: Some(50.0),
            reveal_percent: None,
            present: true,
        };
        let state = observed_state(&sample).unwrap();
        assert!(state.revealed);
        assert!(state.opacity.is_some_and(|opacity| (opacity - 0.5).abs() < 1e-12));
    }
}
