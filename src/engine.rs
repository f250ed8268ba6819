//! # Engine — Single-Owner Session Task
//!
//! One spawned task owns the [`SessionState`] and consumes a single
//! `tokio::sync::mpsc` command queue. Viewer commands, metric samples,
//! participant batches, and heartbeats are applied strictly one at a time,
//! so detection and the queue drain never interleave and no lock guards the
//! session.
//!
//! ## Command flow
//!
//! ```text
//! viewer WS ─┐
//! poller ────┼─► mpsc<Command> ─► Engine ─► SessionState ─► Vec<Notice> ─► EventBus
//! HTTP ingest┘                       │
//!                                    └─► oneshot reply to the requester
//! ```
//!
//! `start_monitoring` fetches the start metric off the engine task and posts
//! the result back as [`Command::BeginMonitoring`]. A generation counter
//! discards a start that was superseded by a later start or stop while its
//! fetch was in flight. A session already being monitored keeps running
//! until that fetch succeeds, so a failed start leaves it as it was.

use crate::events::{EventBus, Notice};
use crate::metric_source::{normalize_tracked_id, MetricSource};
use crate::participant_process::{ParticipantProcess, ParticipantSourceConfig};
use crate::participants::IncomingParticipant;
use crate::poller;
use crate::prom_metrics::Metrics;
use crate::reward::{AutoConfig, Mode, RewardSpec};
use crate::session::{HeartbeatStatus, SessionDefaults, SessionState, StateSnapshot};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

const COMMAND_QUEUE_CAPACITY: usize = 256;

/// A command sent by a viewer over the WebSocket: `{"action": "...", ...}`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ViewerCommand {
    StartMonitoring {
        #[serde(alias = "videoId")]
        tracked_id: String,
    },
    StopMonitoring,
    SetMode {
        mode: Mode,
    },
    SetAutoConfig {
        interval: i64,
        prize: String,
    },
    AddReward {
        #[serde(alias = "targetValue", alias = "targetLikes")]
        target_value: u64,
        prize: String,
    },
    RemoveReward {
        index: usize,
    },
    SetRewards {
        rewards: Vec<RewardSpec>,
    },
    SetRewardSystem {
        enabled: bool,
    },
    GetProgress,
    GetState,
    SetTitle {
        title: String,
    },
    ClearWinners,
}

impl ViewerCommand {
    pub fn action(&self) -> &'static str {
        match self {
            ViewerCommand::StartMonitoring { .. } => "start_monitoring",
            ViewerCommand::StopMonitoring => "stop_monitoring",
            ViewerCommand::SetMode { .. } => "set_mode",
            ViewerCommand::SetAutoConfig { .. } => "set_auto_config",
            ViewerCommand::AddReward { .. } => "add_reward",
            ViewerCommand::RemoveReward { .. } => "remove_reward",
            ViewerCommand::SetRewards { .. } => "set_rewards",
            ViewerCommand::SetRewardSystem { .. } => "set_reward_system",
            ViewerCommand::GetProgress => "get_progress",
            ViewerCommand::GetState => "get_state",
            ViewerCommand::SetTitle { .. } => "set_title",
            ViewerCommand::ClearWinners => "clear_winners",
        }
    }
}

/// Everything the engine task consumes.
pub enum Command {
    Viewer {
        command: ViewerCommand,
        reply: oneshot::Sender<Vec<Notice>>,
    },
    BeginMonitoring {
        generation: u64,
        tracked_id: String,
        start_metric: Option<u64>,
        reply: oneshot::Sender<Vec<Notice>>,
    },
    MetricSample {
        tracked_id: String,
        value: Option<u64>,
    },
    Participants {
        tracked_id: String,
        batch: Vec<IncomingParticipant>,
        reply: oneshot::Sender<Result<usize, String>>,
    },
    Heartbeat {
        tracked_id: String,
        status: String,
        participants: Option<u64>,
        stats: Option<serde_json::Value>,
    },
    Snapshot {
        reply: oneshot::Sender<StateSnapshot>,
    },
}

/// Runtime settings for the engine task.
#[derive(Clone, Debug)]
pub struct EngineSettings {
    pub poll_interval: Duration,
    /// `None` runs without a participant source (participants arrive only via HTTP).
    pub participant_source: Option<ParticipantSourceConfig>,
    pub defaults: SessionDefaults,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            poll_interval: Duration::from_secs(5),
            participant_source: None,
            defaults: SessionDefaults::default(),
        }
    }
}

/// Cloneable front door to the engine task.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Command>,
}

impl EngineHandle {
    /// Apply a viewer command and return the notices meant only for the requester.
    pub async fn viewer(&self, command: ViewerCommand) -> Vec<Notice> {
        let action = command.action();
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Viewer { command, reply }).await.is_err() {
            return vec![engine_gone(action)];
        }
        rx.await.unwrap_or_else(|_| vec![engine_gone(action)])
    }

    pub async fn submit_participants(
        &self,
        tracked_id: String,
        batch: Vec<IncomingParticipant>,
    ) -> Result<usize, String> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Participants {
                tracked_id,
                batch,
                reply,
            })
            .await
            .map_err(|_| "engine unavailable".to_string())?;
        rx.await.map_err(|_| "engine unavailable".to_string())?
    }

    pub async fn heartbeat(
        &self,
        tracked_id: String,
        status: String,
        participants: Option<u64>,
        stats: Option<serde_json::Value>,
    ) -> bool {
        self.tx
            .send(Command::Heartbeat {
                tracked_id,
                status,
                participants,
                stats,
            })
            .await
            .is_ok()
    }

    pub async fn snapshot(&self) -> Option<StateSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::Snapshot { reply }).await.ok()?;
        rx.await.ok()
    }
}

fn engine_gone(action: &str) -> Notice {
    Notice::Error {
        message: format!("{}: engine unavailable", action),
    }
}

fn clamp_gauge(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

pub struct Engine {
    state: SessionState,
    bus: Arc<EventBus>,
    metrics: Arc<Metrics>,
    source: Arc<dyn MetricSource>,
    settings: EngineSettings,
    poller: Option<JoinHandle<()>>,
    process: Option<ParticipantProcess>,
    generation: u64,
    self_tx: mpsc::WeakSender<Command>,
    rx: mpsc::Receiver<Command>,
}

impl Engine {
    pub fn new(
        settings: EngineSettings,
        source: Arc<dyn MetricSource>,
        bus: Arc<EventBus>,
        metrics: Arc<Metrics>,
    ) -> (Engine, EngineHandle) {
        let state = SessionState::new(settings.defaults.clone());
        Self::with_state(state, settings, source, bus, metrics)
    }

    /// Build around an existing session (seeded RNG in tests).
    pub fn with_state(
        state: SessionState,
        settings: EngineSettings,
        source: Arc<dyn MetricSource>,
        bus: Arc<EventBus>,
        metrics: Arc<Metrics>,
    ) -> (Engine, EngineHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let engine = Engine {
            state,
            bus,
            metrics,
            source,
            settings,
            poller: None,
            process: None,
            generation: 0,
            self_tx: tx.downgrade(),
            rx,
        };
        (engine, EngineHandle { tx })
    }

    /// Spawn the engine task and return its handle.
    pub fn spawn(
        settings: EngineSettings,
        source: Arc<dyn MetricSource>,
        bus: Arc<EventBus>,
        metrics: Arc<Metrics>,
    ) -> EngineHandle {
        let (engine, handle) = Engine::new(settings, source, bus, metrics);
        tokio::spawn(engine.run());
        handle
    }

    pub async fn run(mut self) {
        info!("engine started");
        while let Some(cmd) = self.rx.recv().await {
            self.handle(cmd).await;
        }
        self.shutdown().await;
        info!("engine stopped");
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Viewer {
                command: ViewerCommand::StartMonitoring { tracked_id },
                reply,
            } => self.start_monitoring(&tracked_id, reply).await,
            Command::Viewer { command, reply } => {
                let direct = self.apply_viewer(command).await;
                let _ = reply.send(direct);
            }
            Command::BeginMonitoring {
                generation,
                tracked_id,
                start_metric,
                reply,
            } => {
                let direct = self
                    .begin_monitoring(generation, &tracked_id, start_metric)
                    .await;
                let _ = reply.send(direct);
            }
            Command::MetricSample { tracked_id, value } => self.metric_sample(&tracked_id, value),
            Command::Participants {
                tracked_id,
                batch,
                reply,
            } => {
                let result = match self.state.merge_participants(&tracked_id, &batch) {
                    Ok((_, notices)) => {
                        self.broadcast(&notices);
                        Ok(self.state.participants().len())
                    }
                    Err(e) => {
                        warn!(%tracked_id, error = %e, "participant batch refused");
                        Err(e)
                    }
                };
                let _ = reply.send(result);
            }
            Command::Heartbeat {
                tracked_id,
                status,
                participants,
                stats,
            } => self.state.record_heartbeat(
                &tracked_id,
                HeartbeatStatus::from(status.as_str()),
                participants,
                stats.as_ref(),
            ),
            Command::Snapshot { reply } => {
                let _ = reply.send(self.state.snapshot());
            }
        }
    }

    /// Broadcast `notices` and keep the gauges and counters in step.
    fn broadcast(&self, notices: &[Notice]) {
        for notice in notices {
            match notice {
                Notice::RewardAchieved { .. } => {
                    self.metrics.rewards_achieved.inc();
                }
                Notice::RewardSkipped { .. } => {
                    self.metrics.rewards_skipped.inc();
                }
                _ => {}
            }
        }
        self.metrics
            .current_metric
            .set(clamp_gauge(self.state.current_metric()));
        self.metrics
            .participants
            .set(self.state.participants().len() as i64);
        self.bus.publish_all(notices);
    }

    // ── Monitoring lifecycle ────────────────────────────────────

    async fn start_monitoring(&mut self, raw_id: &str, reply: oneshot::Sender<Vec<Notice>>) {
        let tracked_id = match normalize_tracked_id(raw_id) {
            Ok(id) => id,
            Err(e) => {
                let _ = reply.send(rejected("start_monitoring", e));
                return;
            }
        };
        // The running session stays untouched until the new start metric arrives.
        self.generation += 1;
        let generation = self.generation;
        info!(%tracked_id, "fetching start metric");

        let source = Arc::clone(&self.source);
        let self_tx = self.self_tx.clone();
        tokio::spawn(async move {
            let start_metric = source.fetch_metric(&tracked_id).await;
            if let Some(tx) = self_tx.upgrade() {
                let _ = tx
                    .send(Command::BeginMonitoring {
                        generation,
                        tracked_id,
                        start_metric,
                        reply,
                    })
                    .await;
            }
        });
    }

    async fn begin_monitoring(
        &mut self,
        generation: u64,
        tracked_id: &str,
        start_metric: Option<u64>,
    ) -> Vec<Notice> {
        if generation != self.generation {
            info!(tracked_id, "superseded start discarded");
            return rejected("start_monitoring", "superseded by a later command".to_string());
        }
        let start_metric = match start_metric {
            Some(v) => v,
            None => {
                self.metrics.metric_fetch_failures.inc();
                return rejected(
                    "start_monitoring",
                    format!("could not read the metric for {}", tracked_id),
                );
            }
        };

        if self.state.monitoring() || self.poller.is_some() || self.process.is_some() {
            self.release_io().await;
            let notices = self.state.end_monitoring();
            self.broadcast(&notices);
        }

        let notices = self.state.begin_monitoring(tracked_id, start_metric);
        self.broadcast(&notices);

        if let Some(tx) = self.self_tx.upgrade() {
            self.poller = Some(poller::spawn(
                Arc::clone(&self.source),
                tracked_id.to_string(),
                self.settings.poll_interval,
                tx,
            ));
        }
        if let Some(config) = &self.settings.participant_source {
            match ParticipantProcess::spawn(config, tracked_id) {
                Ok(p) => self.process = Some(p),
                Err(e) => {
                    warn!(error = %e, "participant source unavailable");
                    self.broadcast(&[Notice::Error {
                        message: format!("participant source failed to start: {}", e),
                    }]);
                }
            }
        }
        accepted("start_monitoring")
    }

    async fn stop_monitoring(&mut self) {
        self.generation += 1;
        self.release_io().await;
        let notices = self.state.end_monitoring();
        self.broadcast(&notices);
    }

    /// Abort the poller and stop the participant source, if any.
    async fn release_io(&mut self) {
        if let Some(handle) = self.poller.take() {
            handle.abort();
        }
        if let Some(process) = self.process.take() {
            info!(
                tracked_id = process.tracked_id(),
                running = process.is_running(),
                "stopping participant source"
            );
            process.stop().await;
        }
    }

    async fn shutdown(&mut self) {
        self.release_io().await;
    }

    fn metric_sample(&mut self, tracked_id: &str, value: Option<u64>) {
        if !self.state.monitoring() || self.state.tracked_id() != Some(tracked_id) {
            return;
        }
        match value {
            Some(v) => {
                let notices = self.state.apply_metric(v);
                if !notices.is_empty() {
                    self.broadcast(&notices);
                }
            }
            None => {
                self.metrics.metric_fetch_failures.inc();
                warn!(tracked_id, "metric poll returned nothing, skipping");
            }
        }
    }

    // ── Viewer commands ─────────────────────────────────────────

    /// Apply a non-start viewer command. Returns the requester's reply.
    async fn apply_viewer(&mut self, command: ViewerCommand) -> Vec<Notice> {
        let action = command.action();
        let outcome: Result<Vec<Notice>, String> = match command {
            ViewerCommand::StartMonitoring { .. } => {
                Err("start_monitoring is handled separately".to_string())
            }
            ViewerCommand::StopMonitoring => {
                self.stop_monitoring().await;
                Ok(Vec::new())
            }
            ViewerCommand::GetProgress => {
                return vec![Notice::ProgressUpdated(self.state.progress_view())];
            }
            ViewerCommand::GetState => return vec![Notice::State(self.state.snapshot())],
            ViewerCommand::SetMode { mode } => Ok(self.state.set_mode(mode)),
            ViewerCommand::SetAutoConfig { interval, prize } => {
                Ok(self.state.set_auto_config(AutoConfig { interval, prize }))
            }
            ViewerCommand::AddReward {
                target_value,
                prize,
            } => self.state.add_reward(RewardSpec {
                target_value,
                prize,
            }),
            ViewerCommand::RemoveReward { index } => self.state.remove_reward(index),
            ViewerCommand::SetRewards { rewards } => self.state.set_rewards(rewards),
            ViewerCommand::SetRewardSystem { enabled } => Ok(self.state.set_enabled(enabled)),
            ViewerCommand::SetTitle { title } => Ok(self.state.set_title(&title)),
            ViewerCommand::ClearWinners => Ok(self.state.clear_winners()),
        };

        match outcome {
            Ok(notices) => {
                self.broadcast(&notices);
                accepted(action)
            }
            Err(message) => {
                warn!(action, %message, "command rejected");
                rejected(action, message)
            }
        }
    }
}

fn accepted(action: &str) -> Vec<Notice> {
    vec![Notice::CommandResult {
        action: action.to_string(),
        ok: true,
        message: None,
    }]
}

fn rejected(action: &str, message: String) -> Vec<Notice> {
    vec![
        Notice::CommandResult {
            action: action.to_string(),
            ok: false,
            message: Some(message.clone()),
        },
        Notice::Error { message },
    ]
}
