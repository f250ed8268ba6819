//! Winner selection: uniform draw over the eligible participants.

use crate::participants::{Participant, ParticipantRegistry};
use rand::seq::SliceRandom;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Whether a participant may win more than once per session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WinnerPolicy {
    /// Every draw is independent over the whole registry.
    #[default]
    AllowRepeat,
    /// Participants already on the winners list are not eligible.
    ExcludePrevious,
}

impl std::str::FromStr for WinnerPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow_repeat" | "allow-repeat" => Ok(WinnerPolicy::AllowRepeat),
            "exclude_previous" | "exclude-previous" => Ok(WinnerPolicy::ExcludePrevious),
            other => Err(format!(
                "unknown winner policy '{}' (expected allow_repeat or exclude_previous)",
                other
            )),
        }
    }
}

/// Pick one participant uniformly at random.
///
/// `previous_winners` is only consulted under [`WinnerPolicy::ExcludePrevious`].
/// Returns `None` when nobody is eligible.
pub fn select<'a>(
    registry: &'a ParticipantRegistry,
    policy: WinnerPolicy,
    previous_winners: &HashSet<&str>,
    rng: &mut dyn RngCore,
) -> Option<&'a Participant> {
    match policy {
        WinnerPolicy::AllowRepeat => registry.all().choose(rng),
        WinnerPolicy::ExcludePrevious => {
            let eligible: Vec<&Participant> = registry
                .all()
                .iter()
                .filter(|p| !previous_winners.contains(p.id.as_str()))
                .collect();
            eligible.choose(rng).copied()
        }
    }
}
