//! Reward records: modes, ladder configuration, targets, and winners.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reason recorded on a target drained while nobody was eligible.
pub const SKIP_NO_PARTICIPANTS: &str = "No participants";

/// How the reward ladder is produced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Uniform ladder every `interval` units of the metric.
    #[default]
    Auto,
    /// Operator-supplied list of discrete targets.
    Custom,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Auto => write!(f, "auto"),
            Mode::Custom => write!(f, "custom"),
        }
    }
}

/// Auto-mode ladder settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoConfig {
    pub interval: i64,
    pub prize: String,
}

impl Default for AutoConfig {
    fn default() -> Self {
        AutoConfig {
            interval: 100,
            prize: "100 TL".to_string(),
        }
    }
}

impl AutoConfig {
    /// The ladder step, or `None` when the interval describes no ladder.
    pub fn step(&self) -> Option<u64> {
        u64::try_from(self.interval).ok().filter(|&s| s > 0)
    }
}

/// Lifecycle of a single target. Transitions only move forward:
/// `Pending -> Queued -> Achieved | Skipped`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetState {
    Pending,
    Queued,
    Achieved,
    Skipped,
}

impl TargetState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TargetState::Achieved | TargetState::Skipped)
    }

    pub fn is_open(self) -> bool {
        !self.is_terminal()
    }
}

/// A reward threshold owned by the scheduler.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Target {
    pub target_value: u64,
    pub prize: String,
    pub order: u64,
    pub state: TargetState,
    pub winner_id: Option<String>,
    pub winner_name: Option<String>,
    pub skip_reason: Option<String>,
    pub achieved_at: Option<DateTime<Utc>>,
}

impl Target {
    pub fn new(target_value: u64, prize: impl Into<String>, order: u64) -> Self {
        Target {
            target_value,
            prize: prize.into(),
            order,
            state: TargetState::Pending,
            winner_id: None,
            winner_name: None,
            skip_reason: None,
            achieved_at: None,
        }
    }

    /// `Pending -> Queued`. Returns `false` (and changes nothing) from any other state.
    pub fn enqueue(&mut self) -> bool {
        if self.state != TargetState::Pending {
            return false;
        }
        self.state = TargetState::Queued;
        true
    }

    /// `Queued -> Achieved`.
    pub fn achieve(&mut self, winner_id: &str, winner_name: &str, at: DateTime<Utc>) -> bool {
        if self.state != TargetState::Queued {
            return false;
        }
        self.state = TargetState::Achieved;
        self.winner_id = Some(winner_id.to_string());
        self.winner_name = Some(winner_name.to_string());
        self.achieved_at = Some(at);
        true
    }

    /// `Queued -> Skipped`.
    pub fn skip(&mut self, reason: &str, at: DateTime<Utc>) -> bool {
        if self.state != TargetState::Queued {
            return false;
        }
        self.state = TargetState::Skipped;
        self.skip_reason = Some(reason.to_string());
        self.achieved_at = Some(at);
        true
    }
}

/// An operator-supplied custom reward definition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardSpec {
    #[serde(alias = "targetValue", alias = "targetLikes")]
    pub target_value: u64,
    pub prize: String,
}

/// A completed draw. Append order is achievement order.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WinnerRecord {
    pub participant_id: String,
    pub display_name: String,
    pub prize: String,
    pub target_value: u64,
    pub order: u64,
    pub achieved_at: DateTime<Utc>,
}
