//! # Progress — Next Target and Percentage Toward It
//!
//! Derives what viewers render on the progress bar: the next unmet threshold
//! and how far the metric has travelled toward it.
//!
//! ## Auto mode
//!
//! The ladder is anchored at zero regardless of where monitoring started:
//! the next target is the next multiple of the interval strictly above the
//! metric, and progress is the metric's position inside its current interval.
//!
//! ## Custom mode
//!
//! The next target is the smallest open (pending or queued) target. Progress
//! runs from the previous settled target below it, or from the metric value
//! at monitoring start when nothing has settled yet.
//!
//! Any non-positive denominator yields 100%: the threshold is treated as
//! already met instead of dividing by zero. A disabled reward system reports
//! no target and 0%.

use crate::reward::{Mode, Target};
use crate::session::SessionState;
use serde::Serialize;

/// What `progress_updated` carries to viewers.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProgressView {
    pub percentage: f64,
    pub next_target: Option<u64>,
    pub current_metric: u64,
    pub start_metric: u64,
}

/// Next unmet threshold for the session, or `None`.
pub fn next_target(state: &SessionState) -> Option<u64> {
    if !state.enabled() {
        return None;
    }
    match state.mode() {
        Mode::Auto => auto_next_target(state.current_metric(), state.auto_config().interval),
        Mode::Custom => custom_next_target(state.targets()),
    }
}

/// Progress toward [`next_target`] in `[0, 100]`.
pub fn progress(state: &SessionState) -> f64 {
    if !state.enabled() {
        return 0.0;
    }
    match state.mode() {
        Mode::Auto => auto_progress(state.current_metric(), state.auto_config().interval),
        Mode::Custom => custom_progress(
            state.current_metric(),
            state.start_metric(),
            state.targets(),
        ),
    }
}

pub fn view(state: &SessionState) -> ProgressView {
    ProgressView {
        percentage: progress(state),
        next_target: next_target(state),
        current_metric: state.current_metric(),
        start_metric: state.start_metric(),
    }
}

pub fn auto_next_target(metric: u64, interval: i64) -> Option<u64> {
    let step = u64::try_from(interval).ok().filter(|&s| s > 0)?;
    (metric / step + 1).checked_mul(step)
}

pub fn auto_progress(metric: u64, interval: i64) -> f64 {
    if interval <= 0 {
        return 100.0;
    }
    let step = interval as u64;
    clamp_percent((metric % step) as f64 / step as f64 * 100.0)
}

/// Smallest open target value. Targets are kept sorted by value, so the
/// first open one wins and ties fall to insertion order.
pub fn custom_next_target(targets: &[Target]) -> Option<u64> {
    targets
        .iter()
        .find(|t| t.state.is_open())
        .map(|t| t.target_value)
}

pub fn custom_progress(metric: u64, start_metric: u64, targets: &[Target]) -> f64 {
    let next = match custom_next_target(targets) {
        Some(n) => n,
        None => return 100.0,
    };
    let previous = targets
        .iter()
        .filter(|t| t.state.is_terminal() && t.target_value <= next)
        .map(|t| t.target_value)
        .max()
        .unwrap_or(start_metric);

    let denominator = next as f64 - previous as f64;
    if denominator <= 0.0 {
        return 100.0;
    }
    clamp_percent((metric as f64 - previous as f64) / denominator * 100.0)
}

fn clamp_percent(p: f64) -> f64 {
    if p.is_nan() {
        return 0.0;
    }
    p.clamp(0.0, 100.0)
}
