//! # Session — Reward Queue, Achiever, and Session Aggregate
//!
//! [`SessionState`] is the single owned aggregate for one monitoring session:
//! the engagement counter, the reward ladder, the participant registry, and
//! the winners list. The engine task owns it exclusively and calls one method
//! per incoming command; each mutating method returns the [`Notice`]s to
//! broadcast.
//!
//! ## Detection and drain
//!
//! Whenever the metric or the reward configuration changes (and the reward
//! system is enabled) a detection pass runs:
//!
//! 1. **Auto**: every multiple of the interval above the ladder anchor and at
//!    or below the metric that has no target yet is created and queued.
//!    Targets at or below the anchor are never created, so progress made
//!    before monitoring began earns nothing.
//! 2. **Custom**: every pending target at or below the metric is queued.
//! 3. The queue drains front to back. Each target draws a winner and becomes
//!    `Achieved`, or becomes `Skipped` when nobody is eligible.
//!
//! The existence check in step 1 prevents duplicate creation; draining each
//! queued value exactly once prevents duplicate achievement. A `draining`
//! flag rejects a nested detection pass while a drain is in progress.
//!
//! ## Resets
//!
//! Switching mode, editing the auto ladder, or enabling the reward system in
//! auto mode clears the targets and the queue and re-anchors the ladder at
//! the current metric. Settled custom targets are immutable history until
//! the next reset: they cannot be removed, replaced, or re-added.

use crate::events::Notice;
use crate::participants::{IncomingParticipant, MergeSummary, Participant, ParticipantRegistry};
use crate::progress::{self, ProgressView};
use crate::reward::{
    AutoConfig, Mode, RewardSpec, Target, TargetState, WinnerRecord, SKIP_NO_PARTICIPANTS,
};
use crate::winner::{self, WinnerPolicy};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use tracing::{debug, info, warn};

/// Operator preferences a session starts from.
#[derive(Clone, Debug)]
pub struct SessionDefaults {
    pub mode: Mode,
    pub auto_config: AutoConfig,
    pub enabled: bool,
    pub title: String,
    pub winner_policy: WinnerPolicy,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        SessionDefaults {
            mode: Mode::Auto,
            auto_config: AutoConfig::default(),
            enabled: false,
            title: "CANLI YAYIN BAŞLADI".to_string(),
            winner_policy: WinnerPolicy::AllowRepeat,
        }
    }
}

/// Full view sent to a viewer on connect and on request.
#[derive(Clone, Debug, Serialize)]
pub struct StateSnapshot {
    pub monitoring: bool,
    pub tracked_id: Option<String>,
    pub current_metric: u64,
    pub start_metric: u64,
    pub mode: Mode,
    pub auto_config: AutoConfig,
    pub reward_system_enabled: bool,
    pub title: String,
    pub winner_policy: WinnerPolicy,
    pub rewards: Vec<Target>,
    pub winners: Vec<WinnerRecord>,
    pub participant_count: usize,
    pub participants: Vec<Participant>,
    pub next_target: Option<u64>,
    pub progress: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

/// Liveness report from the participant source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HeartbeatStatus {
    Alive,
    Terminated,
    Other(String),
}

impl From<&str> for HeartbeatStatus {
    fn from(s: &str) -> Self {
        match s {
            "alive" => HeartbeatStatus::Alive,
            "terminated" => HeartbeatStatus::Terminated,
            other => HeartbeatStatus::Other(other.to_string()),
        }
    }
}

pub struct SessionState {
    monitoring: bool,
    tracked_id: Option<String>,
    current_metric: u64,
    start_metric: u64,
    ladder_anchor: u64,
    mode: Mode,
    auto_config: AutoConfig,
    enabled: bool,
    title: String,
    winner_policy: WinnerPolicy,
    /// Sorted ascending by `target_value`; values are unique.
    targets: Vec<Target>,
    queue: VecDeque<u64>,
    participants: ParticipantRegistry,
    winners: Vec<WinnerRecord>,
    next_order: u64,
    draining: bool,
    started_at: Option<DateTime<Utc>>,
    last_heartbeat: Option<DateTime<Utc>>,
    heartbeat_count: u64,
    rng: StdRng,
}

impl SessionState {
    pub fn new(defaults: SessionDefaults) -> Self {
        Self::with_rng(defaults, StdRng::from_entropy())
    }

    /// Build a session with a caller-supplied RNG (seeded in tests and benches).
    pub fn with_rng(defaults: SessionDefaults, rng: StdRng) -> Self {
        SessionState {
            monitoring: false,
            tracked_id: None,
            current_metric: 0,
            start_metric: 0,
            ladder_anchor: 0,
            mode: defaults.mode,
            auto_config: defaults.auto_config,
            enabled: defaults.enabled,
            title: defaults.title,
            winner_policy: defaults.winner_policy,
            targets: Vec::new(),
            queue: VecDeque::new(),
            participants: ParticipantRegistry::new(),
            winners: Vec::new(),
            next_order: 1,
            draining: false,
            started_at: None,
            last_heartbeat: None,
            heartbeat_count: 0,
            rng,
        }
    }

    // ── Accessors ───────────────────────────────────────────────

    pub fn monitoring(&self) -> bool {
        self.monitoring
    }

    pub fn tracked_id(&self) -> Option<&str> {
        self.tracked_id.as_deref()
    }

    pub fn current_metric(&self) -> u64 {
        self.current_metric
    }

    pub fn start_metric(&self) -> u64 {
        self.start_metric
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn auto_config(&self) -> &AutoConfig {
        &self.auto_config
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn target(&self, value: u64) -> Option<&Target> {
        self.position(value).map(|i| &self.targets[i])
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn participants(&self) -> &ParticipantRegistry {
        &self.participants
    }

    pub fn winners(&self) -> &[WinnerRecord] {
        &self.winners
    }

    pub fn progress_view(&self) -> ProgressView {
        progress::view(self)
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            monitoring: self.monitoring,
            tracked_id: self.tracked_id.clone(),
            current_metric: self.current_metric,
            start_metric: self.start_metric,
            mode: self.mode,
            auto_config: self.auto_config.clone(),
            reward_system_enabled: self.enabled,
            title: self.title.clone(),
            winner_policy: self.winner_policy,
            rewards: self.targets.clone(),
            winners: self.winners.clone(),
            participant_count: self.participants.len(),
            participants: self.participants.all().to_vec(),
            next_target: progress::next_target(self),
            progress: progress::progress(self),
            started_at: self.started_at,
            last_heartbeat: self.last_heartbeat,
        }
    }

    // ── Monitoring lifecycle ────────────────────────────────────

    /// Start a fresh session on `tracked_id` at `start_metric`.
    pub fn begin_monitoring(&mut self, tracked_id: &str, start_metric: u64) -> Vec<Notice> {
        self.reset_session_data();
        self.monitoring = true;
        self.tracked_id = Some(tracked_id.to_string());
        self.current_metric = start_metric;
        self.start_metric = start_metric;
        self.ladder_anchor = start_metric;
        self.started_at = Some(Utc::now());
        info!(tracked_id, start_metric, mode = %self.mode, "monitoring started");
        vec![
            Notice::MonitoringStarted {
                tracked_id: tracked_id.to_string(),
                start_metric,
            },
            Notice::State(self.snapshot()),
        ]
    }

    /// Stop monitoring and return session data to defaults. Operator
    /// preferences (mode, ladder, enabled flag, title) and custom reward
    /// definitions survive; their outcomes do not.
    pub fn end_monitoring(&mut self) -> Vec<Notice> {
        let was_monitoring = self.monitoring;
        self.reset_session_data();
        if was_monitoring {
            info!("monitoring stopped");
        }
        vec![Notice::MonitoringStopped, Notice::State(self.snapshot())]
    }

    fn reset_session_data(&mut self) {
        self.monitoring = false;
        self.tracked_id = None;
        self.current_metric = 0;
        self.start_metric = 0;
        self.ladder_anchor = 0;
        self.queue.clear();
        self.participants.clear();
        self.winners.clear();
        self.started_at = None;
        self.last_heartbeat = None;
        self.heartbeat_count = 0;
        match self.mode {
            Mode::Auto => self.targets.clear(),
            Mode::Custom => {
                for t in &mut self.targets {
                    *t = Target::new(t.target_value, t.prize.clone(), t.order);
                }
            }
        }
    }

    // ── Metric ──────────────────────────────────────────────────

    /// Record a polled metric value and run detection if it changed.
    pub fn apply_metric(&mut self, value: u64) -> Vec<Notice> {
        if value == self.current_metric {
            return Vec::new();
        }
        let previous = self.current_metric;
        self.current_metric = value;
        if value < previous {
            warn!(previous, value, "metric moved backwards");
        } else {
            info!(previous, value, delta = value - previous, "metric updated");
        }
        let mut notices = vec![Notice::MetricUpdated { value, previous }];
        notices.extend(self.detect_and_drain());
        notices.push(Notice::ProgressUpdated(self.progress_view()));
        notices
    }

    // ── Configuration ───────────────────────────────────────────

    pub fn set_mode(&mut self, mode: Mode) -> Vec<Notice> {
        let previous = self.mode;
        self.mode = mode;
        self.reset_ladder();
        info!(from = %previous, to = %mode, "reward mode changed");
        let mut notices = vec![Notice::ModeChanged { mode }];
        notices.extend(self.detect_and_drain());
        notices.push(self.rewards_notice());
        notices.push(Notice::ProgressUpdated(self.progress_view()));
        notices
    }

    pub fn set_auto_config(&mut self, config: AutoConfig) -> Vec<Notice> {
        let changed = self.auto_config != config;
        self.auto_config = config.clone();
        info!(interval = config.interval, prize = %config.prize, "auto config updated");
        let mut notices = vec![Notice::AutoConfigUpdated { config }];
        if changed && self.mode == Mode::Auto {
            self.reset_ladder();
            notices.extend(self.detect_and_drain());
            notices.push(self.rewards_notice());
        }
        notices.push(Notice::ProgressUpdated(self.progress_view()));
        notices
    }

    pub fn set_enabled(&mut self, enabled: bool) -> Vec<Notice> {
        let was = self.enabled;
        self.enabled = enabled;
        let mut notices = vec![Notice::RewardSystemStatus { enabled }];
        if enabled && !was {
            info!(mode = %self.mode, "reward system enabled");
            if self.mode == Mode::Auto {
                self.reset_ladder();
                notices.push(self.rewards_notice());
            }
            notices.extend(self.detect_and_drain());
        } else if !enabled && was {
            self.queue.clear();
            info!("reward system disabled");
        }
        notices.push(Notice::ProgressUpdated(self.progress_view()));
        notices
    }

    pub fn set_title(&mut self, title: &str) -> Vec<Notice> {
        self.title = title.to_string();
        info!(title, "progress title changed");
        vec![Notice::TitleChanged {
            title: title.to_string(),
        }]
    }

    pub fn clear_winners(&mut self) -> Vec<Notice> {
        self.winners.clear();
        info!("winners list cleared");
        vec![Notice::WinnersUpdated {
            winners: Vec::new(),
        }]
    }

    // ── Custom reward list ──────────────────────────────────────

    pub fn add_reward(&mut self, spec: RewardSpec) -> Result<Vec<Notice>, String> {
        self.require_custom_mode()?;
        if spec.target_value == 0 {
            return Err("target value must be greater than zero".to_string());
        }
        let pos = match self.targets.binary_search_by_key(&spec.target_value, |t| t.target_value) {
            Ok(_) => {
                return Err(format!(
                    "a reward at {} already exists",
                    spec.target_value
                ))
            }
            Err(pos) => pos,
        };
        let order = self.take_order();
        info!(target_value = spec.target_value, prize = %spec.prize, "reward added");
        self.targets
            .insert(pos, Target::new(spec.target_value, spec.prize, order));
        Ok(self.after_list_edit())
    }

    /// Remove the reward at `index` in target-value order.
    pub fn remove_reward(&mut self, index: usize) -> Result<Vec<Notice>, String> {
        self.require_custom_mode()?;
        let target = self
            .targets
            .get(index)
            .ok_or_else(|| format!("no reward at index {}", index))?;
        if target.state.is_terminal() {
            return Err(format!(
                "reward at {} is already completed",
                target.target_value
            ));
        }
        let value = target.target_value;
        self.targets.remove(index);
        self.queue.retain(|&v| v != value);
        info!(target_value = value, "reward removed");
        Ok(self.after_list_edit())
    }

    /// Replace every open reward with `specs`. Settled rewards are kept.
    pub fn set_rewards(&mut self, specs: Vec<RewardSpec>) -> Result<Vec<Notice>, String> {
        self.require_custom_mode()?;
        let mut seen = HashSet::new();
        for spec in &specs {
            if spec.target_value == 0 {
                return Err("target value must be greater than zero".to_string());
            }
            if !seen.insert(spec.target_value) {
                return Err(format!("duplicate reward at {}", spec.target_value));
            }
            if let Some(t) = self.target(spec.target_value) {
                if t.state.is_terminal() {
                    return Err(format!(
                        "reward at {} is already completed",
                        spec.target_value
                    ));
                }
            }
        }

        self.targets.retain(|t| t.state.is_terminal());
        self.queue.clear();
        let count = specs.len();
        for spec in specs {
            let order = self.take_order();
            let pos = self
                .targets
                .partition_point(|t| t.target_value < spec.target_value);
            self.targets
                .insert(pos, Target::new(spec.target_value, spec.prize, order));
        }
        info!(count, "custom rewards replaced");
        Ok(self.after_list_edit())
    }

    fn after_list_edit(&mut self) -> Vec<Notice> {
        let mut notices = self.detect_and_drain();
        notices.push(self.rewards_notice());
        notices.push(Notice::ProgressUpdated(self.progress_view()));
        notices
    }

    fn require_custom_mode(&self) -> Result<(), String> {
        if self.mode != Mode::Custom {
            return Err("custom rewards can only be edited in custom mode".to_string());
        }
        Ok(())
    }

    fn take_order(&mut self) -> u64 {
        let order = self.next_order;
        self.next_order += 1;
        order
    }

    // ── Participant source ──────────────────────────────────────

    /// Merge a participant batch. Batches for anything but the tracked id are refused.
    pub fn merge_participants(
        &mut self,
        tracked_id: &str,
        batch: &[IncomingParticipant],
    ) -> Result<(MergeSummary, Vec<Notice>), String> {
        if !self.monitoring || self.tracked_id.as_deref() != Some(tracked_id) {
            return Err("Invalid video ID or no participants".to_string());
        }
        let summary = self.participants.merge_batch(batch);
        if summary.added > 0 {
            info!(
                added = summary.added,
                total = self.participants.len(),
                "new participants"
            );
        }
        let mut notices = Vec::new();
        if summary.changed() {
            notices.push(Notice::ParticipantsUpdated {
                count: self.participants.len(),
                participants: self.participants.all().to_vec(),
            });
        }
        Ok((summary, notices))
    }

    /// Record a participant-source heartbeat.
    pub fn record_heartbeat(
        &mut self,
        tracked_id: &str,
        status: HeartbeatStatus,
        reported_participants: Option<u64>,
        stats: Option<&serde_json::Value>,
    ) {
        if self.tracked_id.as_deref() != Some(tracked_id) {
            debug!(tracked_id, "heartbeat for untracked id ignored");
            return;
        }
        self.last_heartbeat = Some(Utc::now());
        match status {
            HeartbeatStatus::Alive => {
                self.heartbeat_count += 1;
                if self.heartbeat_count % 10 == 0 {
                    info!(
                        count = self.heartbeat_count,
                        participants = reported_participants.unwrap_or(0),
                        "participant source heartbeat"
                    );
                }
            }
            HeartbeatStatus::Terminated => {
                let field = |name: &str| {
                    stats
                        .and_then(|s| s.get(name))
                        .and_then(|v| v.as_u64())
                        .unwrap_or(0)
                };
                warn!(
                    tracked_id,
                    messages = field("messages_processed"),
                    participants = field("participants_found"),
                    errors = field("errors"),
                    reconnects = field("reconnects"),
                    "participant source terminated"
                );
            }
            HeartbeatStatus::Other(s) => debug!(status = %s, "participant source status"),
        }
    }

    // ── Detection and drain ─────────────────────────────────────

    fn reset_ladder(&mut self) {
        self.targets.clear();
        self.queue.clear();
        self.ladder_anchor = self.current_metric;
    }

    fn rewards_notice(&self) -> Notice {
        Notice::RewardsUpdated {
            rewards: self.targets.clone(),
        }
    }

    fn position(&self, value: u64) -> Option<usize> {
        self.targets
            .binary_search_by_key(&value, |t| t.target_value)
            .ok()
    }

    /// Run one detection pass and drain whatever it queued.
    pub fn detect_and_drain(&mut self) -> Vec<Notice> {
        if !self.enabled {
            return Vec::new();
        }
        if self.draining {
            warn!("detection pass rejected while a drain is in progress");
            return Vec::new();
        }
        match self.mode {
            Mode::Auto => self.detect_auto(),
            Mode::Custom => self.detect_custom(),
        }
        if self.queue.is_empty() {
            return Vec::new();
        }

        self.draining = true;
        let mut notices = self.drain();
        self.draining = false;

        if self.mode == Mode::Custom
            && !self.targets.is_empty()
            && self.targets.iter().all(|t| t.state.is_terminal())
        {
            info!("all custom rewards completed");
            notices.push(Notice::AllRewardsCompleted);
        }
        notices.push(self.rewards_notice());
        notices
    }

    fn detect_auto(&mut self) {
        let step = match self.auto_config.step() {
            Some(s) => s,
            None => return,
        };
        let mut value = match (self.ladder_anchor / step + 1).checked_mul(step) {
            Some(v) => v,
            None => return,
        };
        while value <= self.current_metric {
            if let Err(pos) = self.targets.binary_search_by_key(&value, |t| t.target_value) {
                let mut target = Target::new(value, self.auto_config.prize.clone(), value / step);
                target.enqueue();
                self.targets.insert(pos, target);
                self.queue.push_back(value);
                info!(
                    target_value = value,
                    start_metric = self.start_metric,
                    current = self.current_metric,
                    "target reached"
                );
            }
            value = match value.checked_add(step) {
                Some(v) => v,
                None => break,
            };
        }
    }

    fn detect_custom(&mut self) {
        let metric = self.current_metric;
        for target in &mut self.targets {
            if target.state == TargetState::Pending && target.target_value <= metric {
                target.enqueue();
                self.queue.push_back(target.target_value);
                info!(target_value = target.target_value, "custom target reached");
            }
        }
    }

    fn drain(&mut self) -> Vec<Notice> {
        let mut notices = Vec::new();
        let mut winners_changed = false;

        while let Some(value) = self.queue.pop_front() {
            let idx = match self.position(value) {
                Some(i) if self.targets[i].state == TargetState::Queued => i,
                _ => continue,
            };
            let now = Utc::now();
            let picked = {
                let previous: HashSet<&str> = match self.winner_policy {
                    WinnerPolicy::AllowRepeat => HashSet::new(),
                    WinnerPolicy::ExcludePrevious => self
                        .winners
                        .iter()
                        .map(|w| w.participant_id.as_str())
                        .collect(),
                };
                winner::select(
                    &self.participants,
                    self.winner_policy,
                    &previous,
                    &mut self.rng,
                )
                .map(|p| (p.id.clone(), p.display_name.clone()))
            };

            let target = &mut self.targets[idx];
            match picked {
                Some((id, name)) => {
                    target.achieve(&id, &name, now);
                    let record = WinnerRecord {
                        participant_id: id,
                        display_name: name,
                        prize: target.prize.clone(),
                        target_value: target.target_value,
                        order: target.order,
                        achieved_at: now,
                    };
                    self.winners.push(record.clone());
                    winners_changed = true;
                    notices.push(Notice::RewardAchieved {
                        target: target.clone(),
                        winner: record,
                    });
                }
                None => {
                    target.skip(SKIP_NO_PARTICIPANTS, now);
                    notices.push(Notice::RewardSkipped {
                        target: target.clone(),
                    });
                }
            }
        }

        if winners_changed {
            notices.push(Notice::WinnersUpdated {
                winners: self.winners.clone(),
            });
        }
        notices
    }
}
