//! Headless Chrome implementation of [`BrowserControl`].
//!
//! Rendered style strings (`top: 194.4px`, `clip-path: inset(37.5% 0px 0px)`,
//! `opacity: 0.35`) are read page-side as plain strings and parsed here, so
//! no value interpretation happens in injected script. Section tops come from
//! `getBoundingClientRect`, which follows sticky and fixed positioning.

use anyhow::{Result, anyhow};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, CaptureScreenshotParams,
};
use chromiumoxide::page::Page;
use futures::StreamExt as _;
use log::{debug, info};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, timeout};
use url::Url;

use crate::browser::{BrowserControl, LayoutSample, SectionPath, SectionSample, SelectorPath};
use crate::config::{HarnessConfig, PositionSource};

const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(60);

/// A launched headless Chrome with its CDP event handler task.
pub struct ChromeSession {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl ChromeSession {
    /// Launches headless Chrome sized to the configured viewport.
    ///
    /// Uses `CHROME_BIN` when set, otherwise chromiumoxide's executable
    /// detection.
    ///
    /// # Errors
    ///
    /// Returns an error if Chrome cannot be found or fails to start.
    pub async fn launch(config: &HarnessConfig) -> Result<Self> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(config.viewport_width, config.viewport_height)
            .arg("--force-device-scale-factor=1")
            .arg("--hide-scrollbars")
            .arg("--disable-gpu")
            .arg("--disable-features=OverlayScrollbar")
            .arg("--allow-file-access-from-files")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-background-networking")
            .arg("--disable-sync")
            .arg("--force-color-profile=sRGB")
            .arg("--mute-audio");
        if let Ok(chrome_bin) = env::var("CHROME_BIN") {
            builder = builder.chrome_executable(PathBuf::from(chrome_bin));
        }

        let (browser, mut handler) = Browser::launch(
            builder
                .build()
                .map_err(|err| anyhow!("Browser config error: {err}"))?,
        )
        .await?;

        let handler_task = spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!("Browser handler error: {err}");
                }
            }
            debug!("Browser handler stream ended");
        });

        info!(
            "Chrome launched ({}x{})",
            config.viewport_width, config.viewport_height
        );
        Ok(Self {
            browser,
            handler: handler_task,
        })
    }

    /// Opens a fresh tab. Each concurrently running scenario needs its own.
    ///
    /// # Errors
    ///
    /// Returns an error if the tab cannot be created.
    pub async fn new_page(&self) -> Result<ChromePage> {
        let page = self.browser.new_page("about:blank").await?;
        Ok(ChromePage { page })
    }

    /// Closes the browser and stops the handler task.
    ///
    /// # Errors
    ///
    /// Returns an error if Chrome does not acknowledge the close command.
    pub async fn close(mut self) -> Result<()> {
        self.browser.close().await?;
        self.handler.abort();
        Ok(())
    }
}

/// One Chrome tab under harness control.
pub struct ChromePage {
    page: Page,
}

impl ChromePage {
    pub fn new(page: Page) -> Self {
        Self { page }
    }
}

impl BrowserControl for ChromePage {
    async fn navigate(&self, url: &Url) -> Result<()> {
        let start = Instant::now();
        timeout(NAVIGATION_TIMEOUT, self.page.goto(url.as_str()))
            .await
            .map_err(|_elapsed| anyhow!("Navigation goto timeout for {url}"))?
            .map_err(|err| anyhow!("Navigation goto failed for {url}: {err}"))?;
        timeout(NAVIGATION_TIMEOUT, self.page.wait_for_navigation())
            .await
            .map_err(|_elapsed| anyhow!("Wait for navigation timeout for {url}"))?
            .map_err(|err| anyhow!("Wait for navigation failed for {url}: {err}"))?;
        info!("Navigation completed in {:?} for: {url}", start.elapsed());
        Ok(())
    }

    async fn set_viewport(&self, width: u32, height: u32) -> Result<()> {
        let viewport_params = SetDeviceMetricsOverrideParams::builder()
            .width(i64::from(width))
            .height(i64::from(height))
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(|err| anyhow!("Failed to build viewport params: {err}"))?;
        self.page.execute(viewport_params).await?;
        Ok(())
    }

    async fn set_scroll_offset(&self, offset_px: f64) -> Result<f64> {
        let script =
            format!("(() => {{ window.scrollTo(0, {offset_px}); return window.scrollY; }})()");
        let applied = self.page.evaluate(script).await?.into_value::<f64>()?;
        debug!("scrollTo({offset_px}) applied {applied}");
        Ok(applied)
    }

    async fn sample_layout(
        &self,
        path: &SelectorPath,
        source: PositionSource,
    ) -> Result<LayoutSample> {
        let script = layout_query_script(path)?;
        let raw = self.page.evaluate(script).await?.into_value::<RawLayout>()?;
        Ok(raw.into_sample(source))
    }

    async fn sample_section(&self, path: &SectionPath) -> Result<SectionSample> {
        let script = section_query_script(path)?;
        let raw = self.page.evaluate(script).await?.into_value::<RawSection>()?;
        Ok(raw.into_sample())
    }

    async fn capture_screenshot(&self) -> Result<Vec<u8>> {
        let params = CaptureScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .from_surface(true)
            .build();
        let response = self.page.execute(params).await?;
        let base64_str: &str = response.data.as_ref();
        BASE64_STANDARD
            .decode(base64_str)
            .map_err(|err| anyhow!("Failed to decode base64 screenshot: {err}"))
    }
}

/// Computed values exactly as the page reports them.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawLayout {
    present: bool,
    top: Option<String>,
    rect_top: Option<f64>,
    opacity: Option<String>,
    clip_path: Option<String>,
    section_height: Option<f64>,
    viewport_height: Option<f64>,
}

impl RawLayout {
    fn into_sample(self, source: PositionSource) -> LayoutSample {
        if !self.present {
            return LayoutSample::absent();
        }
        let viewport = self.viewport_height.filter(|height| *height > 0.0);
        let position_px = match source {
            PositionSource::ComputedTop => self.top.as_deref().and_then(parse_px),
            PositionSource::BoundingRect => self.rect_top,
        };
        LayoutSample {
            position_percent: position_px
                .zip(viewport)
                .map(|(px, height)| px / height * 100.0),
            opacity_percent: self
                .opacity
                .as_deref()
                .and_then(parse_opacity)
                .map(|opacity| opacity * 100.0),
            reveal_percent: self
                .clip_path
                .as_deref()
                .and_then(|clip| parse_clip_reveal(clip, self.section_height)),
            present: true,
        }
    }
}

/// Section box and clip exactly as the page reports them.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawSection {
    present: bool,
    rect_top: Option<f64>,
    clip_path: Option<String>,
    height: Option<f64>,
    viewport_height: Option<f64>,
}

impl RawSection {
    fn into_sample(self) -> SectionSample {
        if !self.present {
            return SectionSample::absent();
        }
        let viewport = self.viewport_height.filter(|height| *height > 0.0);
        SectionSample {
            top_percent: self
                .rect_top
                .zip(viewport)
                .map(|(px, height)| px / height * 100.0),
            reveal_percent: self
                .clip_path
                .as_deref()
                .and_then(|clip| parse_clip_reveal(clip, self.height)),
            present: true,
        }
    }
}

fn section_query_script(path: &SectionPath) -> Result<String> {
    let selector = serde_json::to_string(&path.selector)?;
    let index = path.index;
    Ok(format!(
        r"(() => {{
    const section = document.querySelectorAll({selector})[{index}];
    if (!section) return {{ present: false }};
    const style = window.getComputedStyle(section);
    if (style.display === 'none') return {{ present: false }};
    const rect = section.getBoundingClientRect();
    return {{
        present: true,
        rectTop: rect.top,
        clipPath: style.clipPath,
        height: rect.height,
        viewportHeight: window.innerHeight,
    }};
}})()"
    ))
}

/// Builds the page-side layout query. Selectors are embedded as JSON string literals.
fn layout_query_script(path: &SelectorPath) -> Result<String> {
    let section_selector = serde_json::to_string(&path.section_selector)?;
    let element_selector = serde_json::to_string(&path.element_selector)?;
    let index = path.section_index;
    Ok(format!(
        r"(() => {{
    const section = document.querySelectorAll({section_selector})[{index}];
    if (!section) return {{ present: false }};
    const el = section.querySelector({element_selector});
    if (!el) return {{ present: false }};
    const style = window.getComputedStyle(el);
    if (style.display === 'none') return {{ present: false }};
    return {{
        present: true,
        top: style.top,
        rectTop: el.getBoundingClientRect().top,
        opacity: style.opacity,
        clipPath: window.getComputedStyle(section).clipPath,
        sectionHeight: section.getBoundingClientRect().height,
        viewportHeight: window.innerHeight,
    }};
}})()"
    ))
}

/// `"194.4px"` to `194.4`. `auto` and other keywords yield `None`.
fn parse_px(value: &str) -> Option<f64> {
    value
        .trim()
        .strip_suffix("px")?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|px| px.is_finite())
}

fn parse_opacity(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    let opacity = match trimmed.strip_suffix('%') {
        Some(percent) => percent.trim().parse::<f64>().ok()? / 100.0,
        None => trimmed.parse::<f64>().ok()?,
    };
    opacity.is_finite().then(|| opacity.clamp(0.0, 1.0))
}

/// Reveal amount from a section's `clip-path`.
///
/// The top inset is the hidden share: `inset(100% 0px 0px)` is fully hidden,
/// `none` is fully shown. Pixel insets need the section height.
fn parse_clip_reveal(clip_path: &str, section_height: Option<f64>) -> Option<f64> {
    let trimmed = clip_path.trim();
    if trimmed == "none" {
        return Some(100.0);
    }
    let args = trimmed.strip_prefix("inset(")?.strip_suffix(')')?;
    let top = args.split_whitespace().next()?;
    let hidden = if let Some(percent) = top.strip_suffix('%') {
        percent.parse::<f64>().ok()?
    } else {
        let px = parse_px(top).or_else(|| (top == "0").then_some(0.0))?;
        let height = section_height.filter(|height| *height > 0.0)?;
        px / height * 100.0
    };
    hidden
        .is_finite()
        .then(|| (100.0 - hidden).clamp(0.0, 100.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(actual: Option<f64>, expected: f64) -> bool {
        actual.is_some_and(|value| (value - expected).abs() < 1e-9)
    }

    #[test]
    fn parses_pixel_lengths() {
        assert!(close(parse_px("194.4px"), 194.4));
        assert!(close(parse_px(" -12px "), -12.0));
        assert_eq!(parse_px("auto"), None);
        assert_eq!(parse_px("50%"), None);
    }

    #[test]
    fn parses_opacity_forms() {
        assert!(close(parse_opacity("0.35"), 0.35));
        assert!(close(parse_opacity("40%"), 0.4));
        assert!(close(parse_opacity("1.5"), 1.0));
        assert_eq!(parse_opacity(""), None);
    }

    #[test]
    fn clip_path_reveal_from_percent_inset() {
        assert!(close(parse_clip_reveal("inset(100% 0px 0px)", None), 0.0));
        assert!(close(parse_clip_reveal("inset(37.5% 0px 0px 0px)", None), 62.5));
        assert!(close(parse_clip_reveal("inset(0% 0px 0px)", None), 100.0));
        assert!(close(parse_clip_reveal("none", None), 100.0));
    }

    #[test]
    fn clip_path_reveal_from_pixel_inset_needs_height() {
        assert!(close(parse_clip_reveal("inset(270px 0px 0px)", Some(1080.0)), 75.0));
        assert!(close(parse_clip_reveal("inset(0 0 0 0)", Some(1080.0)), 100.0));
        assert_eq!(parse_clip_reveal("inset(270px 0px 0px)", None), None);
        assert_eq!(parse_clip_reveal("circle(50%)", None), None);
    }

    #[test]
    fn raw_layout_converts_to_percentages() {
        let raw = RawLayout {
            present: true,
            top: Some("194.4px".to_owned()),
            rect_top: Some(540.0),
            opacity: Some("1".to_owned()),
            clip_path: Some("inset(0% 0px 0px)".to_owned()),
            section_height: Some(1080.0),
            viewport_height: Some(1080.0),
        };
        let sample = raw.into_sample(PositionSource::ComputedTop);
        assert!(sample.present);
        assert!(close(sample.position_percent, 18.0));
        assert!(close(sample.opacity_percent, 100.0));
        assert!(close(sample.reveal_percent, 100.0));
    }

    #[test]
    fn bounding_rect_source_uses_rect_top() {
        let raw = RawLayout {
            present: true,
            top: Some("auto".to_owned()),
            rect_top: Some(540.0),
            viewport_height: Some(1080.0),
            ..RawLayout::default()
        };
        let sample = raw.into_sample(PositionSource::BoundingRect);
        assert!(close(sample.position_percent, 50.0));
        assert_eq!(sample.reveal_percent, None);
    }

    #[test]
    fn absent_element_deserializes_from_query_result() {
        let raw: RawLayout = serde_json::from_str(r#"{"present": false}"#).unwrap();
        assert_eq!(
            raw.into_sample(PositionSource::ComputedTop),
            LayoutSample::absent()
        );
    }

    #[test]
    fn raw_section_converts_to_percentages() {
        let raw = RawSection {
            present: true,
            rect_top: Some(-324.0),
            clip_path: Some("inset(270px 0px 0px)".to_owned()),
            height: Some(1080.0),
            viewport_height: Some(1080.0),
        };
        let sample = raw.into_sample();
        assert!(close(sample.top_percent, -30.0));
        assert!(close(sample.reveal_percent, 75.0));

        let missing: RawSection = serde_json::from_str(r#"{"present": false}"#).unwrap();
        assert_eq!(missing.into_sample(), SectionSample::absent());
    }

    #[test]
    fn section_query_reads_the_section_box() {
        let script = section_query_script(&SectionPath {
            selector: ".screen-section".to_owned(),
            index: 1,
        })
        .unwrap();
        assert!(script.contains(r#"querySelectorAll(".screen-section")[1]"#));
        assert!(script.contains("getBoundingClientRect()"));
    }

    #[test]
    fn query_script_quotes_selectors() {
        let script = layout_query_script(&SelectorPath {
            section_selector: ".screen-section".to_owned(),
            section_index: 2,
            element_selector: "[data-role=\"caption\"]".to_owned(),
        })
        .unwrap();
        assert!(script.contains(r#"querySelectorAll(".screen-section")[2]"#));
        assert!(script.contains(r#"querySelector("[data-role=\"caption\"]")"#));
    }
}
