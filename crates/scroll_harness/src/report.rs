//! Report Emitter: aggregates per-step verdicts into a run report.

use log::{error, info, warn};
use scroll_timeline::{Classification, ElementState, Placement, SectionState, Verdict};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::artifact::ArtifactRef;

/// Verdict for one tracked element at one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementVerdict {
    pub section: usize,
    pub element: String,
    pub expected: Option<ElementState>,
    pub observed: Option<ElementState>,
    pub verdict: Verdict,
}

/// Verdict for one section's placement at one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionVerdict {
    pub section: usize,
    pub expected: Placement,
    pub observed: Option<SectionState>,
    pub verdict: Verdict,
}

/// Everything recorded for one scroll offset of a scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub index: usize,
    /// Offset the scenario asked for.
    pub requested_offset_px: f64,
    /// Offset the page reported after scrolling; expectations use this one.
    pub scroll_offset_px: f64,
    pub global_progress: f64,
    #[serde(default)]
    pub sections: Vec<SectionVerdict>,
    pub verdicts: Vec<ElementVerdict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactRef>,
    /// Why the step could not be verified normally, e.g. a settle timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
}

impl StepResult {
    /// Worst classification among the step's section and element verdicts.
    pub fn classification(&self) -> Classification {
        self.sections
            .iter()
            .map(|verdict| verdict.verdict.classification)
            .chain(
                self.verdicts
                    .iter()
                    .map(|verdict| verdict.verdict.classification),
            )
            .max()
            .unwrap_or(Classification::Match)
    }

    #[inline]
    pub fn is_mismatch(&self) -> bool {
        self.classification() == Classification::Mismatch
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Overall outcome. Verification failures and harness failures are kept
/// apart so a broken environment never reads as a broken animation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Passed,
    VerificationFailed,
    HarnessFailed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationCounts {
    pub matched: usize,
    pub drift: usize,
    pub mismatch: usize,
}

impl ClassificationCounts {
    fn record(&mut self, classification: Classification) {
        match classification {
            Classification::Match => self.matched += 1,
            Classification::TolerableDrift => self.drift += 1,
            Classification::Mismatch => self.mismatch += 1,
        }
    }
}

/// A non-matching verdict lifted out of its step for the summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFinding {
    pub step: usize,
    pub scroll_offset_px: f64,
    pub section: usize,
    /// `None` for a finding about the section's own placement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<String>,
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total_steps: usize,
    /// Steps counted by their worst verdict.
    pub steps: ClassificationCounts,
    /// Individual section placement verdicts.
    pub sections: ClassificationCounts,
    /// Individual element verdicts.
    pub elements: ClassificationCounts,
    pub mismatches: Vec<StepFinding>,
    pub drift_warnings: Vec<StepFinding>,
}

impl Summary {
    pub fn from_steps(steps: &[StepResult]) -> Self {
        let mut summary = Self {
            total_steps: steps.len(),
            ..Self::default()
        };
        for step in steps {
            summary.steps.record(step.classification());
            for verdict in &step.verdicts {
                summary.elements.record(verdict.verdict.classification);
                summary.lift(step, verdict.section, Some(&verdict.element), &verdict.verdict);
            }
            for verdict in &step.sections {
                summary.sections.record(verdict.verdict.classification);
                summary.lift(step, verdict.section, None, &verdict.verdict);
            }
        }
        summary
    }

    fn lift(
        &mut self,
        step: &StepResult,
        section: usize,
        element: Option<&str>,
        verdict: &Verdict,
    ) {
        let finding = || StepFinding {
            step: step.index,
            scroll_offset_px: step.scroll_offset_px,
            section,
            element: element.map(str::to_owned),
            verdict: verdict.clone(),
            artifact: step.artifact.as_ref().map(|artifact| artifact.path.clone()),
            annotation: step.annotation.clone(),
        };
        match verdict.classification {
            Classification::Match => {}
            Classification::TolerableDrift => self.drift_warnings.push(finding()),
            Classification::Mismatch => self.mismatches.push(finding()),
        }
    }
}

/// The structured result of one scenario run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub scenario: String,
    pub viewport: Viewport,
    pub status: RunStatus,
    pub summary: Summary,
    pub steps: Vec<StepResult>,
    /// Set when the run could not be completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub harness_failure: Option<String>,
    pub cancelled: bool,
}

impl RunReport {
    pub fn new(
        scenario: impl Into<String>,
        viewport: Viewport,
        steps: Vec<StepResult>,
        harness_failure: Option<String>,
        cancelled: bool,
    ) -> Self {
        let summary = Summary::from_steps(&steps);
        let status = if harness_failure.is_some() {
            RunStatus::HarnessFailed
        } else if summary.steps.mismatch > 0 {
            RunStatus::VerificationFailed
        } else if cancelled {
            RunStatus::Cancelled
        } else {
            RunStatus::Passed
        };
        Self {
            scenario: scenario.into(),
            viewport,
            status,
            summary,
            steps,
            harness_failure,
            cancelled,
        }
    }

    /// A run passes iff it completed and no step mismatched.
    #[inline]
    pub fn passed(&self) -> bool {
        self.status == RunStatus::Passed
    }

    /// Logs the summary: one line per mismatch and per drift warning.
    pub fn emit(&self) {
        let counts = &self.summary.steps;
        let headline = format!(
            "{}: {:?} ({} steps: {} match, {} drift, {} mismatch)",
            self.scenario,
            self.status,
            self.summary.total_steps,
            counts.matched,
            counts.drift,
            counts.mismatch
        );
        match self.status {
            RunStatus::Passed => info!("{headline}"),
            RunStatus::VerificationFailed | RunStatus::Cancelled => warn!("{headline}"),
            RunStatus::HarnessFailed => error!("{headline}"),
        }

        if let Some(failure) = &self.harness_failure {
            error!("  harness failure: {failure}");
        }
        for finding in &self.summary.mismatches {
            error!("  ✗ {}", describe(finding));
        }
        for finding in &self.summary.drift_warnings {
            warn!("  ~ {}", describe(finding));
        }
    }
}

fn describe(finding: &StepFinding) -> String {
    let mut line = format!(
        "step {} @{}px section {}",
        finding.step, finding.scroll_offset_px, finding.section
    );
    if let Some(element) = &finding.element {
        line.push_str(&format!(" {element}"));
    }
    if let Some(delta) = finding.verdict.offset_delta {
        line.push_str(&format!(" offset Δ{delta:.3}"));
    }
    if let Some(delta) = finding.verdict.opacity_delta {
        line.push_str(&format!(" opacity Δ{delta:.3}"));
    }
    if let Some(reason) = &finding.verdict.reason {
        line.push_str(&format!(" ({reason:?})"));
    }
    if let Some(artifact) = &finding.artifact {
        line.push_str(&format!(" [{}]", artifact.display()));
    }
    line
}
