//! In-process page that renders a timeline the way a conforming page would.
//!
//! Used for dry runs of a scenario without Chrome and by the test suite.
//! [`Faults`] inject the failure modes a real page exhibits: drifting
//! captions, sections that stay revealed after scrolling back or scroll away
//! instead of pinning, smooth-scroll transitions, layouts that never settle,
//! missing elements and lost pages.
//!
//! A conforming page stacks its sections at the top of the viewport and
//! uncovers them with a clip, so every section top is 0.

use anyhow::{Result, anyhow, bail};
use core::time::Duration;
use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder as _};
use scroll_timeline::{Timeline, compute_expected, section_reveals};
use tokio::sync::Mutex;
use tokio::time::Instant;
use url::Url;

use crate::browser::{BrowserControl, LayoutSample, SectionPath, SectionSample, SelectorPath};
use crate::config::PositionSource;
use crate::error::HarnessError;
use crate::inspector::{SelectorMap, TrackedElement};

/// Screenshot pixels per rendered pixel, per axis.
const SCREENSHOT_SCALE: u32 = 60;

/// Deviations from a conforming page.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// Added to every rendered caption position, in percent of viewport height.
    pub offset_drift_percent: f64,
    /// Added to every rendered opacity.
    pub opacity_drift: f64,
    /// Sections stay revealed after scrolling back above them.
    pub sticky_reveal: bool,
    /// Scrolling animates from the previous offset over this long. Until it
    /// lands, every element is displaced by the remaining scroll distance.
    pub transition: Duration,
    /// Caption positions creep on every sample, so the page never settles.
    pub never_settles: bool,
    /// `(section, element)` pairs missing from the page.
    pub detached: Vec<(usize, String)>,
    /// Sections laid out in normal flow: they scroll with the document
    /// instead of holding at the top during their pin span.
    pub unpinned_sections: Vec<usize>,
    /// The page is lost once this many scrolls have been applied.
    pub lose_page_after_scrolls: Option<usize>,
    /// The page is lost once this many layout queries have been answered.
    pub lose_page_after_samples: Option<u64>,
    pub fail_screenshots: bool,
}

#[derive(Debug)]
struct PageState {
    url: Option<Url>,
    width: u32,
    height: u32,
    from_px: f64,
    target_px: f64,
    scrolled_at: Instant,
    high_water_px: f64,
    scrolls: usize,
    samples: u64,
    lost: bool,
    history: Vec<f64>,
}

impl PageState {
    fn rendered_offset(&self, transition: Duration) -> f64 {
        if transition.is_zero() {
            return self.target_px;
        }
        let elapsed = self.scrolled_at.elapsed().as_secs_f64() / transition.as_secs_f64();
        let progress = elapsed.min(1.0);
        (self.target_px - self.from_px).mul_add(progress, self.from_px)
    }

    fn viewport_height(&self) -> f64 {
        f64::from(self.height)
    }
}

pub struct SimulatedPage {
    timeline: Timeline,
    section_selector: String,
    tracked: Vec<TrackedElement>,
    faults: Faults,
    state: Mutex<PageState>,
}

impl SimulatedPage {
    /// A conforming page for `timeline`, with elements addressed through
    /// `selectors`.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::UnmappedElement`] if `selectors` does not
    /// cover every element of the timeline.
    pub fn new(timeline: Timeline, selectors: &SelectorMap) -> Result<Self, HarnessError> {
        let tracked = selectors.resolve(&timeline)?;
        Ok(Self {
            timeline,
            section_selector: selectors.section_selector().to_owned(),
            tracked,
            faults: Faults::default(),
            state: Mutex::new(PageState {
                url: None,
                width: 1920,
                height: 1080,
                from_px: 0.0,
                target_px: 0.0,
                scrolled_at: Instant::now(),
                high_water_px: 0.0,
                scrolls: 0,
                samples: 0,
                lost: false,
                history: Vec::new(),
            }),
        })
    }

    #[must_use]
    pub fn with_faults(mut self, faults: Faults) -> Self {
        self.faults = faults;
        self
    }

    /// Offsets applied so far, in order.
    pub async fn scroll_history(&self) -> Vec<f64> {
        self.state.lock().await.history.clone()
    }

    /// Counts one layout query, failing once the page is gone.
    fn record_sample(&self, state: &mut PageState) -> Result<()> {
        Self::ensure_usable(state)?;
        if self
            .faults
            .lose_page_after_samples
            .is_some_and(|limit| state.samples >= limit)
        {
            state.lost = true;
            bail!("page closed");
        }
        state.samples += 1;
        Ok(())
    }

    /// Reveal progress of `section` as rendered right now.
    fn rendered_reveal(&self, state: &PageState, section: usize) -> Option<f64> {
        let rendered_px = state.rendered_offset(self.faults.transition);
        let reveal_px = if self.faults.sticky_reveal {
            rendered_px.max(state.high_water_px)
        } else {
            rendered_px
        };
        section_reveals(&self.timeline, reveal_px / state.viewport_height())
            .into_iter()
            .find(|reveal| reveal.index == section)
            .map(|reveal| reveal.progress)
    }

    fn ensure_usable(state: &PageState) -> Result<()> {
        if state.lost {
            bail!("page closed");
        }
        if state.url.is_none() {
            bail!("no document loaded");
        }
        Ok(())
    }
}

impl BrowserControl for SimulatedPage {
    async fn navigate(&self, url: &Url) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.lost {
            bail!("page closed");
        }
        state.url = Some(url.clone());
        state.from_px = 0.0;
        state.target_px = 0.0;
        state.high_water_px = 0.0;
        state.scrolled_at = Instant::now();
        Ok(())
    }

    async fn set_viewport(&self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            bail!("viewport {width}x{height} is empty");
        }
        let mut state = self.state.lock().await;
        state.width = width;
        state.height = height;
        Ok(())
    }

    async fn set_scroll_offset(&self, offset_px: f64) -> Result<f64> {
        let mut state = self.state.lock().await;
        Self::ensure_usable(&state)?;
        if self
            .faults
            .lose_page_after_scrolls
            .is_some_and(|limit| state.scrolls >= limit)
        {
            state.lost = true;
            bail!("page closed");
        }
        if !offset_px.is_finite() {
            bail!("invalid scroll offset {offset_px}");
        }
        let max_px = self.timeline.scroll_extent() * state.viewport_height();
        let applied = offset_px.clamp(0.0, max_px);
        state.from_px = state.rendered_offset(self.faults.transition);
        state.target_px = applied;
        state.scrolled_at = Instant::now();
        state.high_water_px = state.high_water_px.max(applied);
        state.scrolls += 1;
        state.history.push(applied);
        Ok(applied)
    }

    async fn sample_layout(
        &self,
        path: &SelectorPath,
        _source: PositionSource,
    ) -> Result<LayoutSample> {
        let mut state = self.state.lock().await;
        self.record_sample(&mut state)?;

        let Some(tracked) = self.tracked.iter().find(|tracked| tracked.path == *path) else {
            return Ok(LayoutSample::absent());
        };
        let detached = self
            .faults
            .detached
            .iter()
            .any(|(section, element)| *section == tracked.section && *element == tracked.element);
        if detached {
            return Ok(LayoutSample::absent());
        }

        let viewport = state.viewport_height();
        let rendered_px = state.rendered_offset(self.faults.transition);
        let reveal = self.rendered_reveal(&state, tracked.section);
        let element = compute_expected(&self.timeline, rendered_px, viewport)
            .into_iter()
            .find(|expected| {
                expected.section == tracked.section && expected.element == tracked.element
            })
            .and_then(|expected| expected.state);
        let Some(element) = element else {
            return Ok(LayoutSample::absent());
        };

        let lag = (state.target_px - rendered_px) / viewport * 100.0;
        let creep = if self.faults.never_settles {
            state.samples as f64 * 1e-3
        } else {
            0.0
        };
        let displacement = self.faults.offset_drift_percent + lag + creep;
        Ok(LayoutSample {
            position_percent: element.offset_percent.map(|percent| percent + displacement),
            opacity_percent: element
                .opacity
                .map(|opacity| (opacity + self.faults.opacity_drift).clamp(0.0, 1.0) * 100.0),
            reveal_percent: reveal.map(|progress| progress * 100.0),
            present: true,
        })
    }

    async fn sample_section(&self, path: &SectionPath) -> Result<SectionSample> {
        let mut state = self.state.lock().await;
        self.record_sample(&mut state)?;
        if path.selector != self.section_selector {
            return Ok(SectionSample::absent());
        }
        let Some(section) = self.timeline.section(path.index) else {
            return Ok(SectionSample::absent());
        };
        let top_percent = if self.faults.unpinned_sections.contains(&path.index) {
            let scrolled = state.rendered_offset(self.faults.transition) / state.viewport_height();
            (section.pin_span.start - scrolled) * 100.0
        } else {
            0.0
        };
        Ok(SectionSample {
            top_percent: Some(top_percent),
            reveal_percent: self
                .rendered_reveal(&state, path.index)
                .map(|progress| progress * 100.0),
            present: true,
        })
    }

    async fn capture_screenshot(&self) -> Result<Vec<u8>> {
        let state = self.state.lock().await;
        Self::ensure_usable(&state)?;
        if self.faults.fail_screenshots {
            bail!("screenshot capture failed");
        }
        let width = (state.width / SCREENSHOT_SCALE).max(1);
        let height = (state.height / SCREENSHOT_SCALE).max(1);
        let shade = (state.target_px / state.viewport_height() * 40.0).clamp(0.0, 255.0) as u8;
        let rgba: Vec<u8> = [shade, shade, shade, 255]
            .into_iter()
            .cycle()
            .take((width * height * 4) as usize)
            .collect();
        let mut buf = Vec::new();
        PngEncoder::new(&mut buf)
            .write_image(&rgba, width, height, ColorType::Rgba8.into())
            .map_err(|err| anyhow!("Failed to encode screenshot: {err}"))?;
        Ok(buf)
    }
}
