//! Scenario Runner: scroll, settle, inspect, compare, capture.

use anyhow::{Error as AnyhowError, anyhow};
use futures::future::join_all;
use log::{error, info, warn};
use scroll_timeline::{
    ElementState, ScrollPoint, Timeline, Verdict, compare, compare_section, compute_expected_at,
    section_reveals,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use url::Url;

use crate::artifact::{ArtifactRef, ArtifactStore};
use crate::browser::{BrowserControl, SectionPath};
use crate::config::HarnessConfig;
use crate::error::HarnessError;
use crate::inspector::{ObservedState, PageInspector, SelectorMap, TrackedElement};
use crate::report::{ElementVerdict, RunReport, SectionVerdict, StepResult, Viewport};
use crate::settle::{Settled, wait_for_settle};

/// An ordered list of scroll offsets to verify against one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub url: Url,
    pub offsets_px: Vec<f64>,
}

impl Scenario {
    pub fn new(name: impl Into<String>, url: Url, offsets_px: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            url,
            offsets_px,
        }
    }

    /// A scenario over a local HTML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be expressed as a `file://` URL.
    pub fn with_file(
        name: impl Into<String>,
        path: &Path,
        offsets_px: Vec<f64>,
    ) -> anyhow::Result<Self> {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let url = Url::from_file_path(&canonical)
            .map_err(|()| anyhow!("Invalid file path for URL: {}", canonical.display()))?;
        Ok(Self::new(name, url, offsets_px))
    }

    /// Offsets given in viewport heights, converted to pixels.
    pub fn from_viewport_heights(
        name: impl Into<String>,
        url: Url,
        heights: &[f64],
        viewport_height_px: f64,
    ) -> Self {
        let offsets = heights
            .iter()
            .map(|height| height * viewport_height_px)
            .collect();
        Self::new(name, url, offsets)
    }

    /// Offsets at the interesting points of every section: pin start, reveal
    /// midpoint, reveal end and pin end.
    pub fn key_points(
        name: impl Into<String>,
        url: Url,
        timeline: &Timeline,
        viewport_height_px: f64,
    ) -> Self {
        let mut heights: Vec<f64> = Vec::new();
        for section in timeline.sections() {
            let reveal = section.reveal_span;
            for height in [
                section.pin_span.start,
                reveal.start + reveal.length() / 2.0,
                reveal.end,
                section.pin_span.end,
            ] {
                if heights.last().is_none_or(|last| *last < height) {
                    heights.push(height);
                }
            }
        }
        Self::from_viewport_heights(name, url, &heights, viewport_height_px)
    }

    /// Appends the offsets in reverse and finally the top of the page, so
    /// the run scrolls forward and back again.
    #[must_use]
    pub fn round_trip(mut self) -> Self {
        let back: Vec<f64> = self.offsets_px.iter().rev().skip(1).copied().collect();
        self.offsets_px.extend(back);
        if self.offsets_px.last().is_some_and(|last| *last != 0.0) {
            self.offsets_px.push(0.0);
        }
        self
    }
}

/// Cooperative cancellation, checked between steps.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Verifies scenarios of one timeline. Built once, reusable across runs.
pub struct ScenarioRunner<'run, S> {
    timeline: &'run Timeline,
    config: &'run HarnessConfig,
    store: &'run S,
    tracked: Vec<TrackedElement>,
    sections: Vec<SectionPath>,
}

impl<'run, S: ArtifactStore> ScenarioRunner<'run, S> {
    /// Validates configuration and resolves every element selector, before
    /// any browser is touched.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::InvalidConfig`] or
    /// [`HarnessError::UnmappedElement`].
    pub fn new(
        timeline: &'run Timeline,
        selectors: &SelectorMap,
        config: &'run HarnessConfig,
        store: &'run S,
    ) -> Result<Self, HarnessError> {
        config.validate()?;
        let tracked = selectors.resolve(timeline)?;
        Ok(Self {
            timeline,
            config,
            store,
            tracked,
            sections: selectors.resolve_sections(timeline),
        })
    }

    /// Runs every step of `scenario` against `browser`.
    ///
    /// Never fails: harness failures and cancellation are recorded in the
    /// returned report alongside the steps completed so far.
    pub async fn run<B: BrowserControl>(
        &self,
        browser: &mut B,
        scenario: &Scenario,
        cancel: &CancelSignal,
    ) -> RunReport {
        info!(
            "scenario {}: {} steps against {}",
            scenario.name,
            scenario.offsets_px.len(),
            scenario.url
        );
        let mut steps = Vec::with_capacity(scenario.offsets_px.len());
        let mut failure = None;
        let mut cancelled = false;

        if let Err(err) = self.prepare(&*browser, scenario).await {
            failure = Some(err);
        } else {
            for (index, offset) in scenario.offsets_px.iter().copied().enumerate() {
                if cancel.is_cancelled() {
                    warn!("scenario {} cancelled before step {index}", scenario.name);
                    cancelled = true;
                    break;
                }
                match self.run_step(&*browser, scenario, index, offset).await {
                    Ok(step) => steps.push(step),
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                }
            }
        }

        let harness_failure = failure.map(|err| {
            let rendered = error_chain(err);
            error!("scenario {} aborted: {rendered}", scenario.name);
            rendered
        });
        let report = RunReport::new(
            scenario.name.clone(),
            Viewport {
                width: self.config.viewport_width,
                height: self.config.viewport_height,
            },
            steps,
            harness_failure,
            cancelled,
        );
        if let Err(err) = self.store.store_report(&report) {
            warn!("{}", error_chain(err));
        }
        report
    }

    async fn prepare<B: BrowserControl>(
        &self,
        browser: &B,
        scenario: &Scenario,
    ) -> Result<(), HarnessError> {
        browser
            .set_viewport(self.config.viewport_width, self.config.viewport_height)
            .await
            .map_err(|err| HarnessError::inspection("set viewport", err))?;
        browser
            .navigate(&scenario.url)
            .await
            .map_err(|err| HarnessError::inspection(format!("navigate to {}", scenario.url), err))
    }

    async fn run_step<B: BrowserControl>(
        &self,
        browser: &B,
        scenario: &Scenario,
        index: usize,
        requested_offset_px: f64,
    ) -> Result<StepResult, HarnessError> {
        let applied = browser
            .set_scroll_offset(requested_offset_px)
            .await
            .map_err(|err| {
                HarnessError::inspection(format!("scroll to {requested_offset_px}px"), err)
            })?;

        let inspector = PageInspector::new(
            browser,
            &self.tracked,
            &self.sections,
            self.config.position_source,
        );
        let settled = wait_for_settle(
            || inspector.snapshot(),
            self.config.settle_interval,
            self.config.settle_timeout,
        )
        .await
        .map_err(|err| {
            HarnessError::inspection(format!("sample layout at {applied}px"), err)
        })?;

        let (snapshot, annotation) = match settled {
            Settled::Stable(snapshot) => (Some(snapshot), None),
            Settled::TimedOut { last, waited } => {
                let err = HarnessError::SettleTimeout { waited };
                warn!("scenario {} step {index}: {err}", scenario.name);
                (last, Some(err.to_string()))
            }
        };
        let observed = snapshot
            .as_ref()
            .map(|snapshot| inspector.observed_elements(snapshot));
        let observed_sections = snapshot
            .as_ref()
            .map(|snapshot| inspector.observed_sections(snapshot))
            .unwrap_or_default();

        let point = ScrollPoint::new(applied, self.config.viewport_height_px());
        let sections: Vec<SectionVerdict> = section_reveals(self.timeline, point.global_progress)
            .into_iter()
            .map(|reveal| {
                let observed_state = observed_sections
                    .iter()
                    .find(|(section, _)| *section == reveal.index)
                    .and_then(|(_, state)| *state);
                let verdict = if annotation.is_some() {
                    Verdict::settle_timeout()
                } else {
                    compare_section(
                        reveal.placement,
                        observed_state.as_ref(),
                        &self.config.tolerance,
                    )
                };
                SectionVerdict {
                    section: reveal.index,
                    expected: reveal.placement,
                    observed: observed_state,
                    verdict,
                }
            })
            .collect();
        let verdicts: Vec<ElementVerdict> = compute_expected_at(self.timeline, point)
            .into_iter()
            .map(|expected| {
                let observed_state = observed
                    .as_deref()
                    .and_then(|states| find_observed(states, expected.section, &expected.element));
                let verdict = if annotation.is_some() {
                    Verdict::settle_timeout()
                } else {
                    compare(
                        expected.state.as_ref(),
                        observed_state.as_ref(),
                        &self.config.tolerance,
                    )
                };
                ElementVerdict {
                    section: expected.section,
                    element: expected.element,
                    expected: expected.state,
                    observed: observed_state,
                    verdict,
                }
            })
            .collect();

        let mismatched = verdicts.iter().any(|verdict| verdict.verdict.is_mismatch())
            || sections.iter().any(|verdict| verdict.verdict.is_mismatch());
        let artifact = if self.config.capture_policy.should_capture(mismatched) {
            self.capture(browser, scenario, index).await
        } else {
            None
        };

        let step = StepResult {
            index,
            requested_offset_px,
            scroll_offset_px: applied,
            global_progress: point.global_progress,
            sections,
            verdicts,
            artifact,
            annotation,
        };
        info!(
            "scenario {} step {index} @{applied}px: {:?}",
            scenario.name,
            step.classification()
        );
        Ok(step)
    }

    async fn capture<B: BrowserControl>(
        &self,
        browser: &B,
        scenario: &Scenario,
        index: usize,
    ) -> Option<ArtifactRef> {
        let stored = match browser.capture_screenshot().await {
            Ok(png) => self.store.store_screenshot(&scenario.name, index, &png),
            Err(err) => Err(HarnessError::artifact_write(
                self.store.screenshot_path(&scenario.name, index),
                err,
            )),
        };
        match stored {
            Ok(artifact) => Some(artifact),
            Err(err) => {
                warn!("{}", error_chain(err));
                None
            }
        }
    }
}

/// Runs independent scenarios concurrently, each on its own browser page.
/// Reports come back in input order.
pub async fn run_concurrently<S, B>(
    runner: &ScenarioRunner<'_, S>,
    jobs: Vec<(B, Scenario)>,
    cancel: &CancelSignal,
) -> Vec<RunReport>
where
    S: ArtifactStore,
    B: BrowserControl,
{
    join_all(jobs.into_iter().map(|(mut browser, scenario)| async move {
        runner.run(&mut browser, &scenario, cancel).await
    }))
    .await
}

fn find_observed(states: &[ObservedState], section: usize, element: &str) -> Option<ElementState> {
    states
        .iter()
        .find(|observed| observed.section == section && observed.element == element)
        .and_then(|observed| observed.state)
}

/// `outer: inner: root` rendering of an error and its sources.
fn error_chain(err: HarnessError) -> String {
    format!("{:#}", AnyhowError::from(err))
}
