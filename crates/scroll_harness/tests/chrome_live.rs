use scroll_harness::{
    CancelSignal, ChromeSession, FsArtifactStore, HarnessConfig, RunStatus, Scenario,
    ScenarioRunner, SelectorMap, init_logger,
};
use scroll_timeline::Timeline;
use std::path::PathBuf;

fn fixture() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("scroll_hero.html")
}

#[tokio::test]
#[ignore = "needs a local Chrome (set CHROME_BIN)"]
async fn scroll_hero_fixture_matches_timeline() -> anyhow::Result<()> {
    init_logger();
    let config = HarnessConfig::from_env();
    let timeline = Timeline::scroll_hero(3)?;
    let artifacts = tempfile::tempdir()?;
    let store = FsArtifactStore::new(artifacts.path());
    let runner = ScenarioRunner::new(&timeline, &SelectorMap::default(), &config, &store)?;

    let url = Scenario::with_file("fixture", &fixture(), Vec::new())?.url;
    let scenario =
        Scenario::key_points("fixture", url, &timeline, config.viewport_height_px()).round_trip();

    let session = ChromeSession::launch(&config).await?;
    let mut page = session.new_page().await?;
    let report = runner.run(&mut page, &scenario, &CancelSignal::new()).await;
    report.emit();
    session.close().await?;

    assert_ne!(report.status, RunStatus::HarnessFailed, "{:?}", report.harness_failure);
    assert_eq!(report.status, RunStatus::Passed, "{:#?}", report.summary.mismatches);
    Ok(())
}
