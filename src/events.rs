//! # Events — Notifications and the Viewer Broadcast Bus
//!
//! Every mutation of the session produces [`Notice`] values. The engine hands
//! them to the [`EventBus`], which logs them, keeps a bounded history for the
//! `/api/events` endpoint, and broadcasts their JSON form to every connected
//! viewer.
//!
//! ## Notification types
//!
//! | `type` | Sent when |
//! |--------|-----------|
//! | `state` | Viewer connects, asks for state, or monitoring starts/stops |
//! | `metric_updated` | The polled counter changed |
//! | `progress_updated` | Next target or percentage may have changed |
//! | `reward_achieved` | A target was drained with a winner |
//! | `reward_skipped` | A target was drained with nobody eligible |
//! | `rewards_updated` | The target list changed |
//! | `winners_updated` | The winners list changed |
//! | `participants_updated` | The participant registry gained or changed members |
//! | `all_rewards_completed` | Custom mode ran out of open targets |
//! | `command_result` | Reply to the viewer that issued a command |
//! | `error` | A command was rejected |
//!
//! ## Delivery
//!
//! Delivery is fire-and-forget over a `tokio::sync::broadcast` channel. A
//! viewer that falls behind loses the oldest messages (`Lagged`) and never
//! blocks the engine.

use crate::participants::Participant;
use crate::progress::ProgressView;
use crate::reward::{AutoConfig, Mode, Target, WinnerRecord};
use crate::session::StateSnapshot;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::broadcast;

/// A server-issued notification.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notice {
    State(StateSnapshot),
    MetricUpdated {
        value: u64,
        previous: u64,
    },
    ProgressUpdated(ProgressView),
    RewardAchieved {
        target: Target,
        winner: WinnerRecord,
    },
    RewardSkipped {
        target: Target,
    },
    RewardsUpdated {
        rewards: Vec<Target>,
    },
    WinnersUpdated {
        winners: Vec<WinnerRecord>,
    },
    ParticipantsUpdated {
        count: usize,
        participants: Vec<Participant>,
    },
    ModeChanged {
        mode: Mode,
    },
    AutoConfigUpdated {
        config: AutoConfig,
    },
    RewardSystemStatus {
        enabled: bool,
    },
    AllRewardsCompleted,
    MonitoringStarted {
        tracked_id: String,
        start_metric: u64,
    },
    MonitoringStopped,
    TitleChanged {
        title: String,
    },
    CommandResult {
        action: String,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Error {
        message: String,
    },
}

impl Notice {
    pub fn kind(&self) -> &'static str {
        match self {
            Notice::State(_) => "state",
            Notice::MetricUpdated { .. } => "metric_updated",
            Notice::ProgressUpdated(_) => "progress_updated",
            Notice::RewardAchieved { .. } => "reward_achieved",
            Notice::RewardSkipped { .. } => "reward_skipped",
            Notice::RewardsUpdated { .. } => "rewards_updated",
            Notice::WinnersUpdated { .. } => "winners_updated",
            Notice::ParticipantsUpdated { .. } => "participants_updated",
            Notice::ModeChanged { .. } => "mode_changed",
            Notice::AutoConfigUpdated { .. } => "auto_config_updated",
            Notice::RewardSystemStatus { .. } => "reward_system_status",
            Notice::AllRewardsCompleted => "all_rewards_completed",
            Notice::MonitoringStarted { .. } => "monitoring_started",
            Notice::MonitoringStopped => "monitoring_stopped",
            Notice::TitleChanged { .. } => "title_changed",
            Notice::CommandResult { .. } => "command_result",
            Notice::Error { .. } => "error",
        }
    }

    /// One-line description for the event log.
    pub fn summary(&self) -> String {
        match self {
            Notice::State(s) => format!(
                "state: monitoring={} metric={} mode={}",
                s.monitoring, s.current_metric, s.mode
            ),
            Notice::MetricUpdated { value, previous } => {
                format!("metric {} -> {}", previous, value)
            }
            Notice::ProgressUpdated(p) => match p.next_target {
                Some(next) => format!("{:.1}% toward {}", p.percentage, next),
                None => format!("{:.1}%, no next target", p.percentage),
            },
            Notice::RewardAchieved { winner, .. } => format!(
                "{} won \"{}\" at {}",
                winner.display_name, winner.prize, winner.target_value
            ),
            Notice::RewardSkipped { target } => format!(
                "reward at {} skipped: {}",
                target.target_value,
                target.skip_reason.as_deref().unwrap_or("unknown")
            ),
            Notice::RewardsUpdated { rewards } => format!("{} rewards", rewards.len()),
            Notice::WinnersUpdated { winners } => format!("{} winners", winners.len()),
            Notice::ParticipantsUpdated { count, .. } => format!("{} participants", count),
            Notice::ModeChanged { mode } => format!("mode {}", mode),
            Notice::AutoConfigUpdated { config } => {
                format!("auto interval={} prize={}", config.interval, config.prize)
            }
            Notice::RewardSystemStatus { enabled } => {
                format!("reward system {}", if *enabled { "enabled" } else { "disabled" })
            }
            Notice::AllRewardsCompleted => "all custom rewards completed".to_string(),
            Notice::MonitoringStarted {
                tracked_id,
                start_metric,
            } => format!("monitoring {} from {}", tracked_id, start_metric),
            Notice::MonitoringStopped => "monitoring stopped".to_string(),
            Notice::TitleChanged { title } => format!("title \"{}\"", title),
            Notice::CommandResult {
                action,
                ok,
                message,
            } => match message {
                Some(m) => format!("{} ok={}: {}", action, ok, m),
                None => format!("{} ok={}", action, ok),
            },
            Notice::Error { message } => message.clone(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            serde_json::json!({"type": "error", "message": format!("encode failed: {}", e)})
                .to_string()
        })
    }
}

/// A published notification as kept in the recent-events log.
#[derive(Clone, Debug, Serialize)]
pub struct EventRecord {
    pub id: u64,
    pub kind: String,
    pub message: String,
    pub elapsed_secs: f64,
    pub timestamp_ms: u64,
}

const RECENT_EVENTS_CAP: usize = 200;

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Central broadcaster: one sender, one receiver per connected viewer.
pub struct EventBus {
    recent: Mutex<VecDeque<EventRecord>>,
    next_id: AtomicU64,
    sender: broadcast::Sender<String>,
    start: Instant,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        EventBus {
            recent: Mutex::new(VecDeque::with_capacity(RECENT_EVENTS_CAP)),
            next_id: AtomicU64::new(1),
            sender,
            start: Instant::now(),
        }
    }

    /// Subscribe to notification broadcasts (one receiver per viewer).
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }

    pub fn viewer_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Log, record, and broadcast a notification to every viewer.
    pub fn publish(&self, notice: &Notice) {
        match notice {
            Notice::RewardAchieved { winner, .. } => tracing::info!(
                target_value = winner.target_value,
                winner = %winner.display_name,
                prize = %winner.prize,
                "reward achieved"
            ),
            Notice::RewardSkipped { target } => tracing::warn!(
                target_value = target.target_value,
                reason = target.skip_reason.as_deref().unwrap_or(""),
                "reward skipped"
            ),
            Notice::Error { message } => tracing::warn!(%message, "error notice"),
            other => tracing::debug!(kind = other.kind(), "{}", other.summary()),
        }
        self.push_record(notice);
        // No receivers is not an error: nobody is watching yet.
        let _ = self.sender.send(notice.to_json());
    }

    pub fn publish_all(&self, notices: &[Notice]) {
        for notice in notices {
            self.publish(notice);
        }
    }

    /// Most recent first.
    pub fn recent_events(&self, limit: usize) -> Vec<EventRecord> {
        let recent = lock_or_recover(&self.recent);
        recent.iter().rev().take(limit).cloned().collect()
    }

    fn push_record(&self, notice: &Notice) {
        let mut recent = lock_or_recover(&self.recent);
        if recent.len() >= RECENT_EVENTS_CAP {
            recent.pop_front();
        }
        recent.push_back(EventRecord {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            kind: notice.kind().to_string(),
            message: notice.summary(),
            elapsed_secs: self.start.elapsed().as_secs_f64(),
            timestamp_ms: now_ms(),
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_bus_has_no_events() {
        let bus = EventBus::default();
        assert!(bus.recent_events(10).is_empty());
        assert_eq!(bus.viewer_count(), 0);
    }

    #[test]
    fn publish_without_viewers_still_records() {
        let bus = EventBus::default();
        bus.publish(&Notice::MonitoringStopped);
        let events = bus.recent_events(10);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "monitoring_stopped");
    }

    #[test]
    fn subscribers_receive_json_with_type_tag() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(&Notice::MetricUpdated {
            value: 250,
            previous: 200,
        });
        let msg = rx.try_recv().unwrap();
        let json: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(json["type"], "metric_updated");
        assert_eq!(json["value"], 250);
        assert_eq!(json["previous"], 200);
    }

    #[test]
    fn unit_variant_serializes_as_type_only() {
        let json: serde_json::Value =
            serde_json::from_str(&Notice::AllRewardsCompleted.to_json()).unwrap();
        assert_eq!(json, serde_json::json!({"type": "all_rewards_completed"}));
    }

    #[test]
    fn command_result_omits_empty_message() {
        let json: serde_json::Value = serde_json::from_str(
            &Notice::CommandResult {
                action: "set_mode".into(),
                ok: true,
                message: None,
            }
            .to_json(),
        )
        .unwrap();
        assert!(json.get("message").is_none());
        assert_eq!(json["ok"], true);
    }

    #[test]
    fn lagging_viewer_does_not_block_publisher() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        for i in 0..20 {
            bus.publish(&Notice::TitleChanged {
                title: format!("t{}", i),
            });
        }
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Lagged(_))
        ));
    }

    #[test]
    fn recent_events_capped_and_newest_first() {
        let bus = EventBus::default();
        for i in 0..250 {
            bus.publish(&Notice::TitleChanged {
                title: format!("t{}", i),
            });
        }
        let events = bus.recent_events(500);
        assert_eq!(events.len(), RECENT_EVENTS_CAP);
        assert!(events[0].message.contains("t249"));
        assert!(events[0].id > events[1].id);
    }
}
