//! The browser-control capability the harness drives.
//!
//! [`BrowserControl`] is the whole contract between the harness and a live
//! page. [`crate::chrome::ChromePage`] implements it over the DevTools
//! protocol and [`crate::simulated::SimulatedPage`] implements it in process.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::PositionSource;

/// Locates one tracked element: the `section_index`-th match of
/// `section_selector` in document order, then the first match of
/// `element_selector` inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SelectorPath {
    pub section_selector: String,
    pub section_index: usize,
    pub element_selector: String,
}

/// Locates one section: the `index`-th match of `selector` in document order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SectionPath {
    pub selector: String,
    pub index: usize,
}

/// Raw rendered placement of one section, as percentages.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SectionSample {
    /// Bounding box top relative to the viewport, percent of viewport height.
    pub top_percent: Option<f64>,
    /// How much of the section is uncovered by its clip, 0..=100.
    pub reveal_percent: Option<f64>,
    pub present: bool,
}

impl SectionSample {
    pub const fn absent() -> Self {
        Self {
            top_percent: None,
            reveal_percent: None,
            present: false,
        }
    }
}

/// Raw rendered values of one element, as percentages.
///
/// Every field is optional because pages are free to omit the property
/// (no clip-path means the section is not clipped at all).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LayoutSample {
    /// Vertical position as percent of viewport height.
    pub position_percent: Option<f64>,
    /// Element opacity, 0..=100.
    pub opacity_percent: Option<f64>,
    /// How much of the owning section is uncovered, 0..=100.
    pub reveal_percent: Option<f64>,
    /// Whether the element is in the render tree.
    pub present: bool,
}

impl LayoutSample {
    pub const fn absent() -> Self {
        Self {
            position_percent: None,
            opacity_percent: None,
            reveal_percent: None,
            present: false,
        }
    }
}

/// Minimal control surface over one browser page.
///
/// A runner holds the page exclusively for a whole scenario, so methods take
/// `&self` and implementations need no internal ordering guarantees beyond
/// one call at a time.
///
/// # Errors
///
/// Every method fails when the page can no longer be driven: the tab was
/// closed, the protocol connection dropped or the document navigated away.
#[expect(
    async_fn_in_trait,
    reason = "implementations are driven on the caller's task, no Send bound needed"
)]
pub trait BrowserControl {
    /// Loads `url` and waits until the page has finished loading.
    async fn navigate(&self, url: &Url) -> Result<()>;

    /// Resizes the layout viewport in CSS pixels.
    async fn set_viewport(&self, width: u32, height: u32) -> Result<()>;

    /// Scrolls the document to `offset_px` and returns the offset the page
    /// actually applied (pages clamp to their scrollable range).
    async fn set_scroll_offset(&self, offset_px: f64) -> Result<f64>;

    /// Reads the rendered state of one element.
    async fn sample_layout(&self, path: &SelectorPath, source: PositionSource)
    -> Result<LayoutSample>;

    /// Reads where one section sits in the viewport and how far it is revealed.
    async fn sample_section(&self, path: &SectionPath) -> Result<SectionSample>;

    /// Captures the visible viewport as PNG bytes.
    async fn capture_screenshot(&self) -> Result<Vec<u8>>;
}
