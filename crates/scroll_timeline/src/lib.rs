//! Scroll-linked reveal timelines and their expected rendered state.
//!
//! A [`Timeline`] describes a page made of pinned sections that reveal one
//! after another as the user scrolls, each carrying captions that slide and
//! fade over a slice of the section's reveal progress. Everything here is
//! expressed in viewport-height units so the same timeline applies to any
//! viewport size.
//!
//! The crate is split in three layers:
//!
//! ```text
//! model    : Span / ElementSpec / SectionSpec / Timeline (validated, immutable)
//!     ↓
//! progress : compute_expected(timeline, scroll px, viewport px) -> ExpectedState[]
//!     ↓
//! compare  : compare(expected, observed, tolerance) -> Verdict
//!            compare_section(placement, observed, tolerance) -> Verdict
//! ```
//!
//! Nothing in this crate talks to a browser; the harness crate feeds
//! observed states sampled from a live page into [`compare`].

pub mod compare;
pub mod model;
pub mod progress;

pub use compare::{
    Classification, Field, MismatchReason, SectionState, Tolerance, Verdict, compare,
    compare_section,
};
pub use model::{
    ElementSpec, InvalidTimelineError, PRIMARY_CAPTION, SECONDARY_CAPTION, SectionSpec, Span,
    Timeline,
};
pub use progress::{
    ElementState, ExpectedState, Phase, Placement, ScrollPoint, SectionReveal, compute_expected,
    compute_expected_at, section_reveals,
};
