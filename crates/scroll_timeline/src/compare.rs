//! Expected-versus-observed comparison with a two-band tolerance.
//!
//! A delta within `tolerance` is a [`Classification::Match`], within twice the
//! tolerance a [`Classification::TolerableDrift`] (sub-pixel and rounding
//! noise), anything beyond a [`Classification::Mismatch`]. A disagreement on
//! presence or on the section being revealed is never tolerated.
//!
//! Sections are checked against their [`Placement`] with [`compare_section`]:
//! a pinned section must sit at the top of the viewport, a waiting one must
//! not be visible yet.

use serde::{Deserialize, Serialize};

use crate::progress::{ElementState, Placement};

/// Deltas are rounded to this many units before classification.
const DELTA_RESOLUTION: f64 = 1e6;

/// Per-field tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    /// Percentage points of viewport height.
    pub offset_percent: f64,
    /// Absolute opacity units.
    pub opacity: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            offset_percent: 1.0,
            opacity: 0.05,
        }
    }
}

/// Outcome class of one comparison, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    Match,
    TolerableDrift,
    Mismatch,
}

/// Why a comparison ended in [`Classification::Mismatch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum MismatchReason {
    /// One side is absent from the render tree, the other is not.
    Presence { expected_present: bool },
    /// The owning section is revealed on one side only.
    Reveal { expected_revealed: bool },
    /// A field is reported on one side only.
    MissingField { field: Field },
    /// At least one delta exceeds twice its tolerance.
    OutOfTolerance,
    /// The page never settled before sampling.
    SettleTimeout,
    /// A section that should be held in place has moved off the top.
    Unpinned,
    /// A section is visible before its pin span starts.
    EnteredEarly,
}

/// Observed placement of one section.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SectionState {
    /// Top edge relative to the viewport, percent of viewport height.
    pub top_percent: Option<f64>,
    /// Whether any part of the section is uncovered by its clip.
    pub revealed: bool,
}

impl SectionState {
    /// Visible means uncovered and with its top above the viewport bottom,
    /// allowing `tolerance` percentage points of overlap.
    fn is_visible(&self, tolerance: f64) -> bool {
        self.revealed && self.top_percent.is_none_or(|top| top < 100.0 - tolerance)
    }
}

/// Compared field of an [`ElementState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Offset,
    Opacity,
}

/// Result of comparing one element at one scroll point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub classification: Classification,
    /// `|expected - observed|` for the vertical offset, in percentage points.
    pub offset_delta: Option<f64>,
    /// `|expected - observed|` for opacity.
    pub opacity_delta: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<MismatchReason>,
}

impl Verdict {
    fn matched() -> Self {
        Self {
            classification: Classification::Match,
            offset_delta: None,
            opacity_delta: None,
            reason: None,
        }
    }

    fn mismatch(reason: MismatchReason) -> Self {
        Self {
            classification: Classification::Mismatch,
            offset_delta: None,
            opacity_delta: None,
            reason: Some(reason),
        }
    }

    /// Verdict for a step whose page never stopped changing.
    pub fn settle_timeout() -> Self {
        Self::mismatch(MismatchReason::SettleTimeout)
    }

    #[inline]
    pub fn is_mismatch(&self) -> bool {
        self.classification == Classification::Mismatch
    }
}

/// Compares an expected element state with an observed one. `None` on either
/// side means the element is absent from the render tree.
pub fn compare(
    expected: Option<&ElementState>,
    observed: Option<&ElementState>,
    tolerance: &Tolerance,
) -> Verdict {
    let (expected_state, observed_state) = match (expected, observed) {
        (None, None) => return Verdict::matched(),
        (Some(_), None) => {
            return Verdict::mismatch(MismatchReason::Presence {
                expected_present: true,
            });
        }
        (None, Some(_)) => {
            return Verdict::mismatch(MismatchReason::Presence {
                expected_present: false,
            });
        }
        (Some(exp), Some(obs)) => (exp, obs),
    };

    if expected_state.revealed != observed_state.revealed {
        return Verdict::mismatch(MismatchReason::Reveal {
            expected_revealed: expected_state.revealed,
        });
    }

    let offset = match field_delta(expected_state.offset_percent, observed_state.offset_percent) {
        Ok(delta) => delta,
        Err(()) => {
            return Verdict::mismatch(MismatchReason::MissingField {
                field: Field::Offset,
            });
        }
    };
    let opacity = match field_delta(expected_state.opacity, observed_state.opacity) {
        Ok(delta) => delta,
        Err(()) => {
            return Verdict::mismatch(MismatchReason::MissingField {
                field: Field::Opacity,
            });
        }
    };

    let classification = classify(offset, tolerance.offset_percent)
        .max(classify(opacity, tolerance.opacity));
    Verdict {
        classification,
        offset_delta: offset,
        opacity_delta: opacity,
        reason: (classification == Classification::Mismatch)
            .then_some(MismatchReason::OutOfTolerance),
    }
}

/// Checks an observed section against its expected placement. `None` means
/// the section is not in the document.
pub fn compare_section(
    expected: Placement,
    observed: Option<&SectionState>,
    tolerance: &Tolerance,
) -> Verdict {
    match (expected, observed) {
        (Placement::Released, _) | (Placement::Waiting, None) => Verdict::matched(),
        (Placement::Pinned, None) => Verdict::mismatch(MismatchReason::Presence {
            expected_present: true,
        }),
        (Placement::Waiting, Some(state)) => {
            if state.is_visible(tolerance.offset_percent) {
                Verdict::mismatch(MismatchReason::EnteredEarly)
            } else {
                Verdict::matched()
            }
        }
        (Placement::Pinned, Some(state)) => {
            let Some(top) = state.top_percent else {
                return Verdict::mismatch(MismatchReason::MissingField {
                    field: Field::Offset,
                });
            };
            let delta = rounded_delta(0.0, top);
            let classification = classify(Some(delta), tolerance.offset_percent);
            Verdict {
                classification,
                offset_delta: Some(delta),
                opacity_delta: None,
                reason: (classification == Classification::Mismatch)
                    .then_some(MismatchReason::Unpinned),
            }
        }
    }
}

/// `Ok(None)` when neither side reports the field, `Err` when only one does.
fn field_delta(expected: Option<f64>, observed: Option<f64>) -> Result<Option<f64>, ()> {
    match (expected, observed) {
        (Some(exp), Some(obs)) => Ok(Some(rounded_delta(exp, obs))),
        (None, None) => Ok(None),
        _ => Err(()),
    }
}

fn rounded_delta(expected: f64, observed: f64) -> f64 {
    ((expected - observed).abs() * DELTA_RESOLUTION).round() / DELTA_RESOLUTION
}

fn classify(delta: Option<f64>, tolerance: f64) -> Classification {
    match delta {
        None => Classification::Match,
        Some(value) if value <= tolerance => Classification::Match,
        Some(value) if value <= tolerance * 2.0 => Classification::TolerableDrift,
        Some(_) => Classification::Mismatch,
    }
}
