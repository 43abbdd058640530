use serde::Deserialize;

use super::BoostKind;

/// Player snapshot as reported by the server
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Player {
    #[serde(default)]
    pub shares: i64,
    #[serde(default)]
    pub energy: i64,
    #[serde(default)]
    pub tap_level: u32,
    #[serde(default)]
    pub energy_level: u32,
    #[serde(default)]
    pub charge_level: u32,
    #[serde(default)]
    pub boost: Vec<BoostSlot>,
    #[serde(default)]
    pub claims: Vec<String>,
    #[serde(default)]
    pub tap_bot: bool,
    #[serde(default)]
    pub stat: Stat,
}

impl Player {
    pub fn boost(&self, kind: BoostKind) -> Option<&BoostSlot> {
        self.boost.iter().find(|slot| slot.kind == kind.as_str())
    }

    /// Remaining uses of a boost today
    pub fn boost_count(&self, kind: BoostKind) -> u32 {
        self.boost(kind).map(|slot| slot.cnt).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BoostSlot {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub cnt: u32,
    /// Unix seconds at which an applied boost runs out, 0 when idle
    #[serde(default)]
    pub end: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Stat {
    #[serde(default)]
    pub earned: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LevelConf {
    #[serde(default)]
    pub price: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GameConf {
    #[serde(default)]
    pub tap_levels: Vec<LevelConf>,
    #[serde(default)]
    pub energy_levels: Vec<LevelConf>,
    #[serde(default)]
    pub charge_levels: Vec<LevelConf>,
}

#[derive(Debug, Deserialize)]
pub(super) struct LoginResponse {
    pub access_token: Option<String>,
    pub player: Option<Player>,
    pub conf: Option<GameConf>,
    #[serde(default)]
    pub bot_shares: i64,
    /// Present instead of a token when a challenge must be solved first
    pub chq: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct PlayerEnvelope {
    pub player: Player,
}

#[derive(Debug, Deserialize)]
pub(super) struct MaybePlayerEnvelope {
    pub player: Option<Player>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ErrorBody {
    pub message: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct OriginIp {
    pub origin: String,
}
