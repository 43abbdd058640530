//! The per-cycle decision: at most one state-changing action, chosen
//! top-down from freshly observed server state.

use std::fmt;

use super::AccountState;
use crate::{
    config::Settings,
    game::{BoostKind, Tier},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ApplyBoost(BoostKind),
    Upgrade(Tier),
    Cooldown,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::ApplyBoost(kind) => write!(f, "apply {} boost", kind),
            Action::Upgrade(tier) => write!(f, "upgrade {}", tier),
            Action::Cooldown => f.write_str("cooldown"),
        }
    }
}

/// Pick the first matching rung. Nothing fires while turbo is running.
pub fn decide(state: &AccountState, settings: &Settings, upgrade_balance: i64) -> Option<Action> {
    if state.turbo_active {
        return None;
    }

    let low_energy = state.energy < settings.energy_floor;

    if settings.apply_energy_boost && state.boosts(BoostKind::Energy) > 0 && low_energy {
        return Some(Action::ApplyBoost(BoostKind::Energy));
    }

    if settings.apply_turbo_boost && state.boosts(BoostKind::Turbo) > 0 {
        return Some(Action::ApplyBoost(BoostKind::Turbo));
    }

    if let Some(tier) = Tier::ALL
        .into_iter()
        .find(|tier| can_upgrade(state, settings, *tier, upgrade_balance))
    {
        return Some(Action::Upgrade(tier));
    }

    if low_energy {
        return Some(Action::Cooldown);
    }

    None
}

/// Upgrade allowed, affordable and under the cap. A level missing from the
/// price table is never bought.
pub fn can_upgrade(state: &AccountState, settings: &Settings, tier: Tier, balance: i64) -> bool {
    let next = state.next_level(tier);

    settings.auto_upgrade(tier)
        && next <= settings.max_level(tier)
        && state
            .prices
            .price(tier, next)
            .map(|price| balance > price)
            .unwrap_or(false)
}
