//! Timeline model: sections, their pin/reveal spans and animated elements.
//!
//! Global spans (`pin_span`, `reveal_span`) are measured in viewport heights
//! from the top of the document. Element spans (`active_span`, `fade_span`)
//! are measured in the owning section's reveal progress and must lie in
//! `[0, 1]`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Semantic role of the large caption that slides up first.
pub const PRIMARY_CAPTION: &str = "primary-caption";
/// Semantic role of the caption that follows the primary one.
pub const SECONDARY_CAPTION: &str = "secondary-caption";

/// Closed interval `[start, end]`.
///
/// A zero-length span is a step: progress is 0 before the point and 1 at or
/// after it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub start: f64,
    pub end: f64,
}

impl Span {
    #[inline]
    pub const fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    #[inline]
    pub fn length(&self) -> f64 {
        self.end - self.start
    }

    #[inline]
    pub fn contains(&self, value: f64) -> bool {
        self.start <= value && value <= self.end
    }

    /// Fraction of the span elapsed at `value`, clamped to `[0, 1]`.
    pub fn progress(&self, value: f64) -> f64 {
        if self.length() <= 0.0 {
            return if value >= self.start { 1.0 } else { 0.0 };
        }
        ((value - self.start) / self.length()).clamp(0.0, 1.0)
    }

    fn is_finite(&self) -> bool {
        self.start.is_finite() && self.end.is_finite()
    }

    fn is_ordered(&self) -> bool {
        self.start <= self.end
    }

    fn within_unit(&self) -> bool {
        self.start >= 0.0 && self.end <= 1.0
    }

    fn encloses(&self, inner: &Self) -> bool {
        self.start <= inner.start && inner.end <= self.end
    }
}

/// One text/visual element inside a section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementSpec {
    /// Semantic role, e.g. [`PRIMARY_CAPTION`]. Not a DOM identifier.
    pub name: String,
    /// Slice of section reveal progress over which the element moves.
    pub active_span: Span,
    /// Vertical position (percent of viewport height) before `active_span`.
    pub start_offset_percent: f64,
    /// Vertical position (percent of viewport height) after `active_span`.
    pub end_offset_percent: f64,
    /// Slice of section reveal progress over which opacity goes 0 to 1.
    #[serde(default)]
    pub fade_span: Option<Span>,
    /// Element leaves the render tree while its section is hidden.
    #[serde(default)]
    pub detach_when_hidden: bool,
}

impl ElementSpec {
    pub fn new(
        name: impl Into<String>,
        active_span: Span,
        start_offset_percent: f64,
        end_offset_percent: f64,
    ) -> Self {
        Self {
            name: name.into(),
            active_span,
            start_offset_percent,
            end_offset_percent,
            fade_span: None,
            detach_when_hidden: false,
        }
    }

    #[must_use]
    pub fn with_fade(mut self, fade_span: Span) -> Self {
        self.fade_span = Some(fade_span);
        self
    }

    #[must_use]
    pub fn detached_when_hidden(mut self) -> Self {
        self.detach_when_hidden = true;
        self
    }
}

/// One pinned section of the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionSpec {
    /// Ordinal position in document order.
    pub index: usize,
    /// Scroll range (viewport heights) during which the section is held in place.
    pub pin_span: Span,
    /// Sub-range of `pin_span` over which the section goes from hidden to shown.
    pub reveal_span: Span,
    pub elements: Vec<ElementSpec>,
}

impl SectionSpec {
    pub fn new(index: usize, pin_span: Span, reveal_span: Span) -> Self {
        Self {
            index,
            pin_span,
            reveal_span,
            elements: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_element(mut self, element: ElementSpec) -> Self {
        self.elements.push(element);
        self
    }

    pub fn element(&self, name: &str) -> Option<&ElementSpec> {
        self.elements.iter().find(|element| element.name == name)
    }
}

/// Reasons a list of sections cannot form a timeline.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidTimelineError {
    #[error("timeline has no sections")]
    Empty,
    #[error("section {index} contains a non-finite span or offset")]
    NonFinite { index: usize },
    #[error("section indices must be unique and in document order: {previous} then {index}")]
    IndexOrder { previous: usize, index: usize },
    #[error("section {index}: pin span [{start}, {end}] must have start < end")]
    EmptyPinSpan { index: usize, start: f64, end: f64 },
    #[error("section {index}: reveal span [{start}, {end}] has start > end")]
    InvertedRevealSpan { index: usize, start: f64, end: f64 },
    #[error("section {index}: reveal span lies outside its pin span")]
    RevealOutsidePin { index: usize },
    #[error("section {index} starts at {start} before section {previous} ends at {previous_end}")]
    Overlap {
        previous: usize,
        previous_end: f64,
        index: usize,
        start: f64,
    },
    #[error("section {index}: element '{name}' {span} span [{start}, {end}] has start > end")]
    InvertedElementSpan {
        index: usize,
        name: String,
        span: &'static str,
        start: f64,
        end: f64,
    },
    #[error("section {index}: element '{name}' {span} span [{start}, {end}] is outside [0, 1]")]
    ElementSpanOutOfRange {
        index: usize,
        name: String,
        span: &'static str,
        start: f64,
        end: f64,
    },
    #[error("section {index}: element '{name}' is declared twice")]
    DuplicateElement { index: usize, name: String },
}

/// Validated, immutable list of sections in document order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Timeline {
    sections: Vec<SectionSpec>,
}

impl Timeline {
    /// Validates `sections` and wraps them.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTimelineError`] when the list is empty, sections are
    /// out of order or overlap, or any span is inverted or out of range.
    pub fn new(sections: Vec<SectionSpec>) -> Result<Self, InvalidTimelineError> {
        if sections.is_empty() {
            return Err(InvalidTimelineError::Empty);
        }
        let mut previous: Option<&SectionSpec> = None;
        for section in &sections {
            validate_section(section)?;
            if let Some(prev) = previous {
                if section.index <= prev.index {
                    return Err(InvalidTimelineError::IndexOrder {
                        previous: prev.index,
                        index: section.index,
                    });
                }
                if section.pin_span.start < prev.pin_span.end {
                    return Err(InvalidTimelineError::Overlap {
                        previous: prev.index,
                        previous_end: prev.pin_span.end,
                        index: section.index,
                        start: section.pin_span.start,
                    });
                }
            }
            previous = Some(section);
        }
        Ok(Self { sections })
    }

    /// The parallax cover layout: `section_count` sections of 1.5 viewport
    /// heights each. The first section is shown from the start; every later
    /// one reveals over the first 40% of its pin. The primary caption rises
    /// from 85% to 18% over the first half of reveal progress, the secondary
    /// caption from 105% to 50% over the second half.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTimelineError::Empty`] when `section_count` is zero.
    pub fn scroll_hero(section_count: usize) -> Result<Self, InvalidTimelineError> {
        const SCROLL_PER_SECTION: f64 = 1.5;
        const REVEAL_SHARE: f64 = 0.4;

        let sections = (0..section_count)
            .map(|index| {
                let start = index as f64 * SCROLL_PER_SECTION;
                let pin_span = Span::new(start, start + SCROLL_PER_SECTION);
                let reveal_span = if index == 0 {
                    Span::new(start, start)
                } else {
                    Span::new(start, start + SCROLL_PER_SECTION * REVEAL_SHARE)
                };
                SectionSpec::new(index, pin_span, reveal_span)
                    .with_element(ElementSpec::new(
                        PRIMARY_CAPTION,
                        Span::new(0.0, 0.5),
                        85.0,
                        18.0,
                    ))
                    .with_element(ElementSpec::new(
                        SECONDARY_CAPTION,
                        Span::new(0.5, 1.0),
                        105.0,
                        50.0,
                    ))
            })
            .collect();
        Self::new(sections)
    }

    pub fn sections(&self) -> &[SectionSpec] {
        &self.sections
    }

    pub fn section(&self, index: usize) -> Option<&SectionSpec> {
        self.sections.iter().find(|section| section.index == index)
    }

    /// End of the last pin span, in viewport heights.
    pub fn scroll_extent(&self) -> f64 {
        self.sections
            .last()
            .map_or(0.0, |section| section.pin_span.end)
    }

    /// Every `(section index, element)` pair in document order.
    pub fn tracked_elements(&self) -> impl Iterator<Item = (usize, &ElementSpec)> {
        self.sections.iter().flat_map(|section| {
            section
                .elements
                .iter()
                .map(move |element| (section.index, element))
        })
    }
}

fn validate_section(section: &SectionSpec) -> Result<(), InvalidTimelineError> {
    let index = section.index;
    let offsets_finite = section.elements.iter().all(|element| {
        element.start_offset_percent.is_finite()
            && element.end_offset_percent.is_finite()
            && element.active_span.is_finite()
            && element.fade_span.is_none_or(|fade| fade.is_finite())
    });
    if !section.pin_span.is_finite() || !section.reveal_span.is_finite() || !offsets_finite {
        return Err(InvalidTimelineError::NonFinite { index });
    }
    if section.pin_span.start >= section.pin_span.end {
        return Err(InvalidTimelineError::EmptyPinSpan {
            index,
            start: section.pin_span.start,
            end: section.pin_span.end,
        });
    }
    if !section.reveal_span.is_ordered() {
        return Err(InvalidTimelineError::InvertedRevealSpan {
            index,
            start: section.reveal_span.start,
            end: section.reveal_span.end,
        });
    }
    if !section.pin_span.encloses(&section.reveal_span) {
        return Err(InvalidTimelineError::RevealOutsidePin { index });
    }

    for (position, element) in section.elements.iter().enumerate() {
        if section.elements[..position]
            .iter()
            .any(|earlier| earlier.name == element.name)
        {
            return Err(InvalidTimelineError::DuplicateElement {
                index,
                name: element.name.clone(),
            });
        }
        validate_element_span(index, element, "active", element.active_span)?;
        if let Some(fade) = element.fade_span {
            validate_element_span(index, element, "fade", fade)?;
        }
    }
    Ok(())
}

fn validate_element_span(
    index: usize,
    element: &ElementSpec,
    span_name: &'static str,
    span: Span,
) -> Result<(), InvalidTimelineError> {
    if !span.is_ordered() {
        return Err(InvalidTimelineError::InvertedElementSpan {
            index,
            name: element.name.clone(),
            span: span_name,
            start: span.start,
            end: span.end,
        });
    }
    if !span.within_unit() {
        return Err(InvalidTimelineError::ElementSpanOutOfRange {
            index,
            name: element.name.clone(),
            span: span_name,
            start: span.start,
            end: span.end,
        });
    }
    Ok(())
}
