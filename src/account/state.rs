use std::{collections::VecDeque, time::Duration};

use tokio::time::Instant;

use crate::game::{BoostKind, Player, PriceTables, Profile, Tier};

/// Per-account record, owned and mutated by exactly one driver
#[derive(Debug, Clone, Default)]
pub struct AccountState {
    pub balance: i64,
    pub energy: u64,
    pub tap_level: u32,
    pub energy_level: u32,
    pub charge_level: u32,
    pub energy_boosts: u32,
    pub turbo_boosts: u32,
    /// Unix seconds at which the server says the running turbo ends
    pub turbo_ends_at: i64,
    pub total_earned: i64,

    pub token: Option<String>,
    pub token_issued_at: Option<Instant>,

    pub turbo_active: bool,
    pub turbo_started_at: Option<Instant>,

    pub prices: PriceTables,
    pub pending_claims: VecDeque<String>,
}

impl AccountState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopt a fresh login. The only place the token and its age change.
    pub fn apply_login(&mut self, profile: Profile, now: Instant) {
        self.token = Some(profile.access_token);
        self.token_issued_at = Some(now);
        self.prices = profile.prices;

        self.pending_claims.clear();
        for task_id in &profile.player.claims {
            if !self.pending_claims.contains(task_id) {
                self.pending_claims.push_back(task_id.clone());
            }
        }

        self.apply_player(&profile.player);
    }

    /// Refresh everything the server reports about the player
    pub fn apply_player(&mut self, player: &Player) {
        self.balance = player.shares;
        self.energy = player.energy.max(0) as u64;
        self.tap_level = player.tap_level;
        self.energy_level = player.energy_level;
        self.charge_level = player.charge_level;
        self.energy_boosts = player.boost_count(BoostKind::Energy);
        self.turbo_boosts = player.boost_count(BoostKind::Turbo);
        self.turbo_ends_at = player
            .boost(BoostKind::Turbo)
            .map(|slot| slot.end)
            .unwrap_or(0);
        self.total_earned = player.stat.earned;
    }

    /// Drop the credential so the next cycle logs in again
    pub fn invalidate_token(&mut self) {
        self.token = None;
        self.token_issued_at = None;
    }

    /// Stale when unset or at least `ttl` old
    pub fn token_is_stale(&self, now: Instant, ttl: Duration) -> bool {
        match (&self.token, self.token_issued_at) {
            (Some(_), Some(issued_at)) => now.saturating_duration_since(issued_at) >= ttl,
            _ => true,
        }
    }

    pub fn level(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Tap => self.tap_level,
            Tier::Energy => self.energy_level,
            Tier::Charge => self.charge_level,
        }
    }

    pub fn next_level(&self, tier: Tier) -> u32 {
        self.level(tier) + 1
    }

    pub fn boosts(&self, kind: BoostKind) -> u32 {
        match kind {
            BoostKind::Energy => self.energy_boosts,
            BoostKind::Turbo => self.turbo_boosts,
        }
    }

    /// An end time left over from an earlier turbo must not cut this one short
    pub fn start_turbo(&mut self, now: Instant, unix_now: i64) {
        self.turbo_active = true;
        self.turbo_started_at = Some(now);

        if self.turbo_ends_at <= unix_now {
            self.turbo_ends_at = 0;
        }
    }

    pub fn stop_turbo(&mut self) {
        self.turbo_active = false;
        self.turbo_started_at = None;
    }

    /// Turbo is over once the window elapsed or the server marked it ended
    pub fn turbo_expired(&self, now: Instant, window: Duration, unix_now: i64) -> bool {
        if !self.turbo_active {
            return false;
        }

        let window_elapsed = self
            .turbo_started_at
            .map(|started| now.saturating_duration_since(started) > window)
            .unwrap_or(true);

        let server_ended = self.turbo_ends_at > 0 && self.turbo_ends_at <= unix_now;

        window_elapsed || server_ended
    }
}
