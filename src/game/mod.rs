use std::{collections::BTreeMap, fmt};

use async_trait::async_trait;
use thiserror::Error;

use crate::challenge::SolvedChallenge;

mod agents;
mod client;
mod models;

pub use agents::random_user_agent;
pub use client::GameClient;
pub use models::{BoostSlot, GameConf, LevelConf, Player, Stat};

#[derive(Error, Debug)]
pub enum GameError {
    /// Timeout, refused or reset connection, unreadable body
    #[error("transport failure: {0}")]
    Transport(String),

    /// The server answered with a well-formed error
    #[error("request rejected with status {status}: {message}")]
    Protocol { status: u16, message: String },

    /// The server refused the credential outright
    #[error("unauthorized (status {status})")]
    Unauthorized { status: u16 },

    /// Login answered with a challenge instead of a token
    #[error("challenge required before login")]
    ChallengeRequired { challenge: String },
}

pub type GameResult<T> = Result<T, GameError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoostKind {
    Energy,
    Turbo,
}

impl BoostKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoostKind::Energy => "energy",
            BoostKind::Turbo => "turbo",
        }
    }
}

impl fmt::Display for BoostKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upgradeable attribute bought with balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    Tap,
    Energy,
    Charge,
}

impl Tier {
    /// Ladder order
    pub const ALL: [Tier; 3] = [Tier::Tap, Tier::Energy, Tier::Charge];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Tap => "tap",
            Tier::Energy => "energy",
            Tier::Charge => "charge",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `level -> price` for every tier, valid for the lifetime of one token
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriceTables {
    tables: BTreeMap<Tier, BTreeMap<u32, i64>>,
}

impl PriceTables {
    pub fn from_conf(conf: &GameConf) -> Self {
        let mut tables = Self::default();
        tables.set(Tier::Tap, &conf.tap_levels);
        tables.set(Tier::Energy, &conf.energy_levels);
        tables.set(Tier::Charge, &conf.charge_levels);
        tables
    }

    fn set(&mut self, tier: Tier, levels: &[LevelConf]) {
        let prices = levels
            .iter()
            .enumerate()
            .map(|(index, level)| (index as u32 + 1, level.price))
            .collect();

        self.tables.insert(tier, prices);
    }

    pub fn insert(&mut self, tier: Tier, level: u32, price: i64) {
        self.tables.entry(tier).or_default().insert(level, price);
    }

    pub fn price(&self, tier: Tier, level: u32) -> Option<i64> {
        self.tables.get(&tier)?.get(&level).copied()
    }
}

/// Everything a successful login hands back
#[derive(Debug, Clone)]
pub struct Profile {
    pub access_token: String,
    pub player: Player,
    pub prices: PriceTables,
    pub bot_shares: i64,
}

/// One method per server action. Implementations hold no per-account
/// mutable state and never retry.
#[async_trait]
pub trait GameApi: Send + Sync {
    async fn login(&self, init_data: &str, solved: &SolvedChallenge) -> GameResult<Profile>;

    async fn submit_taps(&self, token: &str, taps: u64) -> GameResult<Player>;

    /// `Ok(None)` when the server accepted the action without echoing the player
    async fn apply_boost(&self, token: &str, boost: BoostKind) -> GameResult<Option<Player>>;

    async fn upgrade(&self, token: &str, tier: Tier) -> GameResult<Option<Player>>;

    async fn claim_reward(&self, token: &str, task_id: &str) -> GameResult<Option<Player>>;

    /// Auxiliary check returning the IP the remote side sees
    async fn check_proxy(&self) -> GameResult<String>;
}
