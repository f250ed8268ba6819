//! Shared test helpers for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use streamprize::config::AppConfig;
use streamprize::dashboard::{self, AppState};
use streamprize::metric_source::{FetchFuture, MetricSource};

/// Metric source whose value the test controls.
pub struct FakeSource {
    value: AtomicU64,
    failing: AtomicBool,
}

impl FakeSource {
    pub fn new(value: u64) -> Arc<Self> {
        Arc::new(FakeSource {
            value: AtomicU64::new(value),
            failing: AtomicBool::new(false),
        })
    }

    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::SeqCst);
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl MetricSource for FakeSource {
    fn fetch_metric<'a>(&'a self, _tracked_id: &'a str) -> FetchFuture<'a> {
        Box::pin(async move {
            if self.failing.load(Ordering::SeqCst) {
                None
            } else {
                Some(self.value.load(Ordering::SeqCst))
            }
        })
    }
}

pub struct TestApp {
    pub router: axum::Router,
    pub state: Arc<AppState>,
    pub source: Arc<FakeSource>,
    pub static_dir: tempfile::TempDir,
}

/// Config for tests: 1 s polling, reward system on, no participant process.
pub fn test_config(static_dir: &std::path::Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.metric.poll_interval_secs = 1;
    config.participants.enabled = false;
    config.rewards.enabled = true;
    config.server.static_dir = Some(static_dir.to_path_buf());
    config
}

/// Build a router backed by a live engine and a [`FakeSource`] reading `start`.
pub fn build_test_app(start: u64) -> TestApp {
    let static_dir = tempfile::tempdir().unwrap();
    let source = FakeSource::new(start);
    let state = AppState::start(&test_config(static_dir.path()), source.clone());
    let router = dashboard::build_router(state.clone());
    TestApp {
        router,
        state,
        source,
        static_dir,
    }
}

/// Poll the engine until `check` passes on a snapshot, or panic after 5 s.
pub async fn wait_for<F>(state: &AppState, mut check: F) -> streamprize::session::StateSnapshot
where
    F: FnMut(&streamprize::session::StateSnapshot) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let snapshot = state.engine.snapshot().await.unwrap();
        if check(&snapshot) {
            return snapshot;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("condition not reached; last snapshot: {:?}", snapshot);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
