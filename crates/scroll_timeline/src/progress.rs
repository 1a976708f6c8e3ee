//! Expected rendered state of every tracked element at a scroll offset.
//!
//! This is a pure function of `(timeline, offset, viewport height)`: there is
//! no memory of earlier offsets, so scrolling back to the top always yields
//! the initial state again.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::model::{ElementSpec, SectionSpec, Span, Timeline};

/// One sampled instant of a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScrollPoint {
    pub offset_px: f64,
    /// `offset_px` in viewport heights.
    pub global_progress: f64,
}

impl ScrollPoint {
    /// Converts a pixel offset into viewport-height units.
    ///
    /// A non-positive or non-finite viewport height cannot be converted; the
    /// point is then pinned at the top of the document.
    pub fn new(offset_px: f64, viewport_height_px: f64) -> Self {
        let global_progress = if viewport_height_px > 0.0 && viewport_height_px.is_finite() {
            offset_px / viewport_height_px
        } else {
            warn!("invalid viewport height {viewport_height_px}px, treating offset as 0");
            0.0
        };
        Self {
            offset_px,
            global_progress,
        }
    }
}

/// Rendered state of one element, expected or observed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElementState {
    /// Vertical position, percent of viewport height.
    pub offset_percent: Option<f64>,
    /// 0 (invisible) to 1 (opaque).
    pub opacity: Option<f64>,
    /// Whether the owning section is past its reveal threshold.
    pub revealed: bool,
}

/// Expected state of one element at one scroll point. `state` is `None`
/// when the element is expected to be absent from the render tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedState {
    pub section: usize,
    pub element: String,
    pub state: Option<ElementState>,
}

/// Where a section sits relative to the current scroll position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Pin span entirely after the scroll position.
    Ahead,
    /// Pin span contains the scroll position, or the position lies outside
    /// every pin span and this is the nearest boundary section.
    Active,
    /// Pin span entirely before the scroll position.
    Behind,
}

/// Where a section must sit on screen at a scroll point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    /// The scroll position lies in the pin span: the section top is held at
    /// the top of the viewport.
    Pinned,
    /// The pin span has not started: the section must not be visible yet.
    Waiting,
    /// The pin span is over: the page may keep the section or scroll it away.
    Released,
}

/// Reveal progress of one section at a scroll point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SectionReveal {
    pub index: usize,
    pub phase: Phase,
    /// Reveal progress in `[0, 1]`.
    pub progress: f64,
    pub placement: Placement,
}

impl SectionReveal {
    #[inline]
    pub fn revealed(&self) -> bool {
        self.progress > 0.0
    }
}

/// Reveal progress of every section at `global_progress` (viewport heights).
pub fn section_reveals(timeline: &Timeline, global_progress: f64) -> Vec<SectionReveal> {
    let sections = timeline.sections();
    let last = sections.len().saturating_sub(1);
    sections
        .iter()
        .enumerate()
        .map(|(position, section)| {
            let pin = section.pin_span;
            let (phase, progress, placement) = if pin.contains(global_progress) {
                (
                    Phase::Active,
                    section.reveal_span.progress(global_progress),
                    Placement::Pinned,
                )
            } else if global_progress < pin.start {
                let phase = if position == 0 {
                    Phase::Active
                } else {
                    Phase::Ahead
                };
                (phase, 0.0, Placement::Waiting)
            } else {
                let phase = if position == last {
                    Phase::Active
                } else {
                    Phase::Behind
                };
                (phase, 1.0, Placement::Released)
            };
            SectionReveal {
                index: section.index,
                phase,
                progress,
                placement,
            }
        })
        .collect()
}

/// Expected state of every tracked element, in timeline order.
pub fn compute_expected(
    timeline: &Timeline,
    scroll_offset_px: f64,
    viewport_height_px: f64,
) -> Vec<ExpectedState> {
    compute_expected_at(timeline, ScrollPoint::new(scroll_offset_px, viewport_height_px))
}

/// [`compute_expected`] for an already converted scroll point.
pub fn compute_expected_at(timeline: &Timeline, point: ScrollPoint) -> Vec<ExpectedState> {
    timeline
        .sections()
        .iter()
        .zip(section_reveals(timeline, point.global_progress))
        .flat_map(|(section, reveal)| section_states(section, reveal))
        .collect()
}

fn section_states(
    section: &SectionSpec,
    reveal: SectionReveal,
) -> impl Iterator<Item = ExpectedState> + '_ {
    section.elements.iter().map(move |element| ExpectedState {
        section: section.index,
        element: element.name.clone(),
        state: element_state(element, reveal),
    })
}

fn element_state(element: &ElementSpec, reveal: SectionReveal) -> Option<ElementState> {
    let revealed = reveal.revealed();
    if element.detach_when_hidden && !revealed {
        return None;
    }
    // A hidden section keeps its elements in their start state, even when an
    // element span is a step at progress 0.
    if !revealed {
        return Some(ElementState {
            offset_percent: Some(element.start_offset_percent),
            opacity: Some(0.0),
            revealed,
        });
    }
    let position = interpolate(
        element.start_offset_percent,
        element.end_offset_percent,
        local_progress(element.active_span, reveal.progress),
    );
    let opacity = element
        .fade_span
        .map_or(1.0, |fade| local_progress(fade, reveal.progress));
    Some(ElementState {
        offset_percent: Some(position),
        opacity: Some(opacity),
        revealed,
    })
}

/// Section reveal progress re-normalised to an element's own span.
fn local_progress(span: Span, reveal_progress: f64) -> f64 {
    span.progress(reveal_progress)
}

/// Linear interpolation that lands exactly on its end points and never
/// leaves `[from, to]`.
fn interpolate(from: f64, to: f64, fraction: f64) -> f64 {
    if fraction <= 0.0 {
        return from;
    }
    if fraction >= 1.0 {
        return to;
    }
    let value = (to - from).mul_add(fraction, from);
    value.clamp(from.min(to), from.max(to))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PRIMARY_CAPTION, SECONDARY_CAPTION};

    const VIEWPORT: f64 = 1080.0;

    fn close(actual: f64, expected: f64) -> bool {
        (actual - expected).abs() < 1e-9
    }

    fn state_of<'st>(
        states: &'st [ExpectedState],
        section: usize,
        name: &str,
    ) -> &'st ElementState {
        states
            .iter()
            .find(|st| st.section == section && st.element == name)
            .and_then(|st| st.state.as_ref())
            .unwrap()
    }

    /// Two sections: the first reveals over [0.5, 1.0] of its [0.5, 2.0] pin.
    fn two_sections() -> Timeline {
        Timeline::new(vec![
            SectionSpec::new(0, Span::new(0.5, 2.0), Span::new(0.5, 1.0))
                .with_element(ElementSpec::new(PRIMARY_CAPTION, Span::new(0.0, 0.5), 85.0, 18.0))
                .with_element(
                    ElementSpec::new(SECONDARY_CAPTION, Span::new(0.5, 1.0), 105.0, 50.0)
                        .with_fade(Span::new(0.5, 0.75)),
                ),
            SectionSpec::new(1, Span::new(2.0, 3.5), Span::new(2.0, 2.6))
                .with_element(ElementSpec::new(PRIMARY_CAPTION, Span::new(0.0, 0.5), 85.0, 18.0)),
        ])
        .unwrap()
    }

    #[test]
    fn before_first_pin_everything_is_at_start_state() {
        let timeline = two_sections();
        for offset in [0.0, 100.0, 300.0, 539.0] {
            let states = compute_expected(&timeline, offset, VIEWPORT);
            for (tracked_section, element) in timeline.tracked_elements() {
                let st = state_of(&states, tracked_section, &element.name);
                assert!(close(st.offset_percent.unwrap(), element.start_offset_percent));
                assert!(!st.revealed);
                assert!(close(st.opacity.unwrap(), 0.0));
            }
        }
    }

    #[test]
    fn after_last_pin_everything_is_at_end_state() {
        let timeline = two_sections();
        for offset in [3.5 * VIEWPORT + 1.0, 5000.0, 1.0e6] {
            let states = compute_expected(&timeline, offset, VIEWPORT);
            for (tracked_section, element) in timeline.tracked_elements() {
                let st = state_of(&states, tracked_section, &element.name);
                assert!(close(st.offset_percent.unwrap(), element.end_offset_percent));
                assert!(st.revealed);
                assert!(close(st.opacity.unwrap(), 1.0));
            }
        }
    }

    #[test]
    fn exactly_at_last_pin_end_is_fully_revealed() {
        let timeline = two_sections();
        let reveals = section_reveals(&timeline, 3.5);
        assert_eq!(reveals[1].phase, Phase::Active);
        assert!(close(reveals[1].progress, 1.0));

        let states = compute_expected(&timeline, 3.5 * VIEWPORT, VIEWPORT);
        let st = state_of(&states, 1, PRIMARY_CAPTION);
        assert!(st.revealed);
        assert!(close(st.offset_percent.unwrap(), 18.0));
    }

    #[test]
    fn repeated_calls_are_bit_identical() {
        let timeline = two_sections();
        for offset in [0.0, 612.5, 777.7, 1500.0, 2400.0, 9999.0] {
            let first = compute_expected(&timeline, offset, VIEWPORT);
            let second = compute_expected(&timeline, offset, VIEWPORT);
            assert_eq!(first, second);
            for (lhs, rhs) in first.iter().zip(&second) {
                let (left, right) = (lhs.state.unwrap(), rhs.state.unwrap());
                assert_eq!(
                    left.offset_percent.unwrap().to_bits(),
                    right.offset_percent.unwrap().to_bits()
                );
            }
        }
    }

    #[test]
    fn position_moves_monotonically_within_active_span() {
        let timeline = two_sections();
        let mut previous = f64::INFINITY;
        // Primary caption of section 0 moves downward in value (85 -> 18).
        for step in 0..=400 {
            let offset = 540.0 + f64::from(step) * (540.0 / 400.0);
            let states = compute_expected(&timeline, offset, VIEWPORT);
            let value = state_of(&states, 0, PRIMARY_CAPTION).offset_percent.unwrap();
            assert!(value <= previous, "reversed at offset {offset}");
            assert!((18.0..=85.0).contains(&value), "overshoot at offset {offset}");
            previous = value;
        }
        assert!(close(previous, 18.0));
    }

    #[test]
    fn staggered_captions_reach_reference_positions() {
        // Local progress 1.0: 18% ~ 194px and 50% ~ 540px of a 1080px viewport.
        let timeline = Timeline::scroll_hero(3).unwrap();
        let offset = 2.1 * VIEWPORT;
        let states = compute_expected(&timeline, offset, VIEWPORT);
        let primary = state_of(&states, 1, PRIMARY_CAPTION).offset_percent.unwrap();
        let secondary = state_of(&states, 1, SECONDARY_CAPTION).offset_percent.unwrap();
        assert!(close(primary, 18.0));
        assert!(close(secondary, 50.0));
        assert!(close((primary / 100.0 * VIEWPORT).round(), 194.0));
        assert!(close((secondary / 100.0 * VIEWPORT).round(), 540.0));
    }

    #[test]
    fn secondary_caption_waits_for_primary() {
        let timeline = Timeline::scroll_hero(2).unwrap();
        // Section 1 reveal span is [1.5, 2.1]; local progress 0.25 at 1.65.
        let states = compute_expected(&timeline, 1.65 * VIEWPORT, VIEWPORT);
        let primary = state_of(&states, 1, PRIMARY_CAPTION).offset_percent.unwrap();
        let secondary = state_of(&states, 1, SECONDARY_CAPTION).offset_percent.unwrap();
        assert!(close(primary, 85.0 - 67.0 * 0.5));
        assert!(close(secondary, 105.0));
    }

    #[test]
    fn scrolling_back_to_top_resets_later_sections() {
        let timeline = Timeline::scroll_hero(4).unwrap();
        let forward = compute_expected(&timeline, 4.0 * VIEWPORT, VIEWPORT);
        assert!(state_of(&forward, 2, PRIMARY_CAPTION).revealed);

        let back = compute_expected(&timeline, 0.0, VIEWPORT);
        for st in &back {
            let revealed = st.state.unwrap().revealed;
            assert_eq!(revealed, st.section == 0, "section {}", st.section);
        }
    }

    #[test]
    fn sections_outside_current_pin_are_hidden_or_finished() {
        let timeline = Timeline::scroll_hero(4).unwrap();
        let reveals = section_reveals(&timeline, 3.2);
        let phases: Vec<Phase> = reveals.iter().map(|reveal| reveal.phase).collect();
        assert_eq!(
            phases,
            vec![Phase::Behind, Phase::Behind, Phase::Active, Phase::Ahead]
        );
        assert!(close(reveals[0].progress, 1.0));
        assert!(close(reveals[3].progress, 0.0));
    }

    #[test]
    fn fade_span_drives_opacity_independently() {
        let timeline = two_sections();
        // Section 0 reveal [0.5, 1.0]; local progress 0.625 at gv 0.8125.
        let states = compute_expected(&timeline, 0.8125 * VIEWPORT, VIEWPORT);
        let secondary = state_of(&states, 0, SECONDARY_CAPTION);
        assert!(close(secondary.opacity.unwrap(), 0.5));
        let primary = state_of(&states, 0, PRIMARY_CAPTION);
        assert!(close(primary.opacity.unwrap(), 1.0));
    }

    #[test]
    fn detached_elements_are_absent_while_hidden() {
        let timeline = Timeline::new(vec![
            SectionSpec::new(0, Span::new(0.0, 1.0), Span::new(0.0, 0.0)),
            SectionSpec::new(1, Span::new(1.0, 2.0), Span::new(1.0, 1.5)).with_element(
                ElementSpec::new(PRIMARY_CAPTION, Span::new(0.0, 1.0), 90.0, 10.0)
                    .detached_when_hidden(),
            ),
        ])
        .unwrap();
        let hidden = compute_expected(&timeline, 0.5 * VIEWPORT, VIEWPORT);
        assert_eq!(hidden.len(), 1);
        assert!(hidden[0].state.is_none());

        let shown = compute_expected(&timeline, 1.25 * VIEWPORT, VIEWPORT);
        assert!(close(shown[0].state.unwrap().offset_percent.unwrap(), 50.0));
    }

    #[test]
    fn gap_between_pins_has_no_half_revealed_section() {
        let timeline = Timeline::new(vec![
            SectionSpec::new(0, Span::new(0.0, 1.0), Span::new(0.0, 0.5)),
            SectionSpec::new(1, Span::new(2.0, 3.0), Span::new(2.0, 2.5)),
        ])
        .unwrap();
        let reveals = section_reveals(&timeline, 1.5);
        assert_eq!(reveals[0].phase, Phase::Behind);
        assert_eq!(reveals[1].phase, Phase::Ahead);
    }

    #[test]
    fn zero_length_element_spans_wait_for_the_section_reveal() {
        let timeline = Timeline::new(vec![
            SectionSpec::new(0, Span::new(1.0, 2.0), Span::new(1.0, 1.5)).with_element(
                ElementSpec::new(PRIMARY_CAPTION, Span::new(0.0, 0.0), 80.0, 20.0)
                    .with_fade(Span::new(0.0, 0.0)),
            ),
        ])
        .unwrap();

        for gv in [0.0, 0.5, 1.0] {
            let states = compute_expected(&timeline, gv * VIEWPORT, VIEWPORT);
            let st = state_of(&states, 0, PRIMARY_CAPTION);
            assert_eq!(st.offset_percent, Some(80.0), "gv {gv}");
            assert_eq!(st.opacity, Some(0.0), "gv {gv}");
            assert!(!st.revealed);
        }

        let states = compute_expected(&timeline, 1.25 * VIEWPORT, VIEWPORT);
        let st = state_of(&states, 0, PRIMARY_CAPTION);
        assert_eq!(st.offset_percent, Some(20.0));
        assert_eq!(st.opacity, Some(1.0));
        assert!(st.revealed);
    }

    #[test]
    fn zero_length_fade_inside_the_reveal_is_a_step() {
        let timeline = Timeline::new(vec![
            SectionSpec::new(0, Span::new(0.0, 2.0), Span::new(0.0, 1.0)).with_element(
                ElementSpec::new(SECONDARY_CAPTION, Span::new(0.0, 1.0), 100.0, 50.0)
                    .with_fade(Span::new(0.5, 0.5)),
            ),
        ])
        .unwrap();
        let before = compute_expected(&timeline, 0.25 * VIEWPORT, VIEWPORT);
        assert_eq!(state_of(&before, 0, SECONDARY_CAPTION).opacity, Some(0.0));
        let after = compute_expected(&timeline, 0.5 * VIEWPORT, VIEWPORT);
        assert_eq!(state_of(&after, 0, SECONDARY_CAPTION).opacity, Some(1.0));
    }

    #[test]
    fn placement_follows_the_pin_spans() {
        let timeline = Timeline::scroll_hero(3).unwrap();
        let placements = |gv: f64| -> Vec<Placement> {
            section_reveals(&timeline, gv)
                .iter()
                .map(|reveal| reveal.placement)
                .collect()
        };
        assert_eq!(
            placements(0.0),
            vec![Placement::Pinned, Placement::Waiting, Placement::Waiting]
        );
        // Pin spans share their boundary: both sections are held there.
        assert_eq!(
            placements(1.5),
            vec![Placement::Pinned, Placement::Pinned, Placement::Waiting]
        );
        assert_eq!(
            placements(2.4),
            vec![Placement::Released, Placement::Pinned, Placement::Waiting]
        );
        assert_eq!(
            placements(9.0),
            vec![Placement::Released, Placement::Released, Placement::Released]
        );
    }

    #[test]
    fn invalid_viewport_pins_to_top() {
        let point = ScrollPoint::new(500.0, 0.0);
        assert!(close(point.global_progress, 0.0));
    }
}
