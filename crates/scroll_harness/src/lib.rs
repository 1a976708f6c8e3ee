//! Verifies a scroll-driven page against a [`scroll_timeline::Timeline`].
//!
//! For every offset of a [`Scenario`] the [`ScenarioRunner`] scrolls the page,
//! waits for the layout to settle, samples each tracked element through the
//! [`PageInspector`], compares it with the expected state and captures a
//! screenshot according to the [`CapturePolicy`]. The outcome is a
//! [`RunReport`] that keeps verification failures and harness failures apart.
//!
//! ```no_run
//! use scroll_harness::{
//!     CancelSignal, ChromeSession, FsArtifactStore, HarnessConfig, Scenario, ScenarioRunner,
//!     SelectorMap, init_logger,
//! };
//! use scroll_timeline::Timeline;
//! use url::Url;
//!
//! # async fn verify() -> anyhow::Result<()> {
//! init_logger();
//! let config = HarnessConfig::from_env();
//! let timeline = Timeline::scroll_hero(3)?;
//! let store = FsArtifactStore::new(&config.artifact_dir);
//! let runner = ScenarioRunner::new(&timeline, &SelectorMap::default(), &config, &store)?;
//!
//! let url = Url::parse("http://localhost:3000/")?;
//! let scenario = Scenario::key_points("hero", url, &timeline, config.viewport_height_px())
//!     .round_trip();
//!
//! let session = ChromeSession::launch(&config).await?;
//! let mut page = session.new_page().await?;
//! let report = runner.run(&mut page, &scenario, &CancelSignal::new()).await;
//! report.emit();
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod artifact;
pub mod browser;
pub mod chrome;
pub mod config;
pub mod error;
pub mod inspector;
pub mod logging;
pub mod report;
pub mod runner;
pub mod settle;
pub mod simulated;

pub use artifact::{ArtifactRef, ArtifactStore, CapturePolicy, FsArtifactStore, write_report};
pub use browser::{BrowserControl, LayoutSample, SectionPath, SectionSample, SelectorPath};
pub use chrome::{ChromePage, ChromeSession};
pub use config::{HarnessConfig, PositionSource};
pub use error::HarnessError;
pub use inspector::{
    LayoutSnapshot, ObservedState, PageInspector, SelectorMap, TrackedElement, observed_section,
    observed_state,
};
pub use logging::init_logger;
pub use report::{
    ClassificationCounts, ElementVerdict, RunReport, RunStatus, SectionVerdict, StepFinding,
    StepResult, Summary, Viewport,
};
pub use runner::{CancelSignal, Scenario, ScenarioRunner, run_concurrently};
pub use settle::{Settled, wait_for_settle};
pub use simulated::{Faults, SimulatedPage};
