use std::{env, fs, str::FromStr, time::Duration};

use log::{info, warn};
use rand::Rng;

use crate::{error::ConfigError, game::Tier};

const DEFAULT_ACCOUNTS_PATH: &str = "accounts.txt";

/// Inclusive `min..=max` range read from a `"min,max"` setting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleRange {
    pub min: u64,
    pub max: u64,
}

impl SampleRange {
    pub fn new(min: u64, max: u64) -> Self {
        Self { min, max }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        rng.gen_range(self.min..=self.max)
    }
}

impl FromStr for SampleRange {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim().trim_start_matches('[').trim_end_matches(']');
        let (min, max) = trimmed
            .split_once(',')
            .ok_or_else(|| format!("expected \"min,max\", got \"{}\"", raw))?;

        let min = min.trim().parse::<u64>().map_err(|e| e.to_string())?;
        let max = max.trim().parse::<u64>().map_err(|e| e.to_string())?;

        if min > max {
            return Err(format!("min {} is greater than max {}", min, max));
        }

        Ok(Self { min, max })
    }
}

/// Which balance the upgrade rungs compare against tier prices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceBasis {
    /// Balance reported by the tap response of the current cycle
    PostTap,
    /// Balance held before the current cycle's taps were submitted
    PreTap,
}

impl FromStr for BalanceBasis {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "post_tap" | "post" => Ok(Self::PostTap),
            "pre_tap" | "pre" => Ok(Self::PreTap),
            other => Err(format!("expected post_tap or pre_tap, got \"{}\"", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TelegramSettings {
    pub bot_token: String,
    pub admin_id: i64,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub api_base_url: String,
    pub webdriver_url: String,
    pub accounts_path: String,
    pub request_timeout: Duration,

    pub energy_floor: u64,
    pub cooldown: Duration,
    pub taps: SampleRange,
    pub cycle_sleep: SampleRange,
    pub turbo_sleep: Duration,
    pub turbo_bonus: u64,
    pub turbo_window: Duration,
    pub token_ttl: Duration,
    pub retry_delay: Duration,
    pub claim_delay: Duration,
    pub action_delay: Duration,

    pub apply_energy_boost: bool,
    pub apply_turbo_boost: bool,
    pub upgrade_tap: bool,
    pub upgrade_energy: bool,
    pub upgrade_charge: bool,
    pub max_tap_level: u32,
    pub max_energy_level: u32,
    pub max_charge_level: u32,
    pub balance_basis: BalanceBasis,

    /// `None` retries authentication forever
    pub max_auth_attempts: Option<u32>,

    pub telegram: Option<TelegramSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.tapswap.ai".to_string(),
            webdriver_url: "http://localhost:4444".to_string(),
            accounts_path: DEFAULT_ACCOUNTS_PATH.to_string(),
            request_timeout: Duration::from_secs(5),

            energy_floor: 200,
            cooldown: Duration::from_secs(314),
            taps: SampleRange::new(50, 200),
            cycle_sleep: SampleRange::new(10, 25),
            turbo_sleep: Duration::from_secs(4),
            turbo_bonus: 2500,
            turbo_window: Duration::from_secs(20),
            token_ttl: Duration::from_secs(1800),
            retry_delay: Duration::from_secs(3),
            claim_delay: Duration::from_secs(5),
            action_delay: Duration::from_secs(5),

            apply_energy_boost: true,
            apply_turbo_boost: true,
            upgrade_tap: false,
            upgrade_energy: false,
            upgrade_charge: false,
            max_tap_level: 5,
            max_energy_level: 5,
            max_charge_level: 5,
            balance_basis: BalanceBasis::PostTap,

            max_auth_attempts: None,

            telegram: None,
        }
    }
}

impl Settings {
    /// Read settings from the process environment (after `.env` was loaded)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read settings through an arbitrary key lookup, falling back to defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let telegram = match get("TELEGRAM_BOT_TOKEN") {
            Some(bot_token) => {
                let admin_id = parse_field::<i64>("TELEGRAM_ADMIN_ID", get("TELEGRAM_ADMIN_ID"))?
                    .ok_or_else(|| ConfigError::Missing {
                        field: "TELEGRAM_ADMIN_ID".to_string(),
                    })?;

                Some(TelegramSettings {
                    bot_token,
                    admin_id,
                })
            }
            None => None,
        };

        let max_auth_attempts = parse_field::<u32>("MAX_AUTH_ATTEMPTS", get("MAX_AUTH_ATTEMPTS"))?
            .filter(|attempts| *attempts > 0);

        Ok(Self {
            api_base_url: get("API_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base_url),
            webdriver_url: get("WEBDRIVER_URL").unwrap_or(defaults.webdriver_url),
            accounts_path: get("ACCOUNTS_PATH").unwrap_or(defaults.accounts_path),
            request_timeout: seconds("REQUEST_TIMEOUT", get("REQUEST_TIMEOUT"), defaults.request_timeout)?,

            energy_floor: parse_field("MIN_AVAILABLE_ENERGY", get("MIN_AVAILABLE_ENERGY"))?
                .unwrap_or(defaults.energy_floor),
            cooldown: seconds("SLEEP_BY_MIN_ENERGY", get("SLEEP_BY_MIN_ENERGY"), defaults.cooldown)?,
            taps: parse_field("RANDOM_TAPS_COUNT", get("RANDOM_TAPS_COUNT"))?
                .unwrap_or(defaults.taps),
            cycle_sleep: parse_field("SLEEP_BETWEEN_TAP", get("SLEEP_BETWEEN_TAP"))?
                .unwrap_or(defaults.cycle_sleep),
            turbo_sleep: seconds("TURBO_SLEEP", get("TURBO_SLEEP"), defaults.turbo_sleep)?,
            turbo_bonus: parse_field("ADD_TAPS_ON_TURBO", get("ADD_TAPS_ON_TURBO"))?
                .unwrap_or(defaults.turbo_bonus),
            turbo_window: seconds("TURBO_WINDOW", get("TURBO_WINDOW"), defaults.turbo_window)?,
            token_ttl: seconds("TOKEN_TTL", get("TOKEN_TTL"), defaults.token_ttl)?,
            retry_delay: seconds("RETRY_DELAY", get("RETRY_DELAY"), defaults.retry_delay)?,
            claim_delay: seconds("CLAIM_DELAY", get("CLAIM_DELAY"), defaults.claim_delay)?,
            action_delay: seconds("ACTION_DELAY", get("ACTION_DELAY"), defaults.action_delay)?,

            apply_energy_boost: flag("APPLY_DAILY_ENERGY", get("APPLY_DAILY_ENERGY"), defaults.apply_energy_boost)?,
            apply_turbo_boost: flag("APPLY_DAILY_TURBO", get("APPLY_DAILY_TURBO"), defaults.apply_turbo_boost)?,
            upgrade_tap: flag("AUTO_UPGRADE_TAP", get("AUTO_UPGRADE_TAP"), defaults.upgrade_tap)?,
            upgrade_energy: flag("AUTO_UPGRADE_ENERGY", get("AUTO_UPGRADE_ENERGY"), defaults.upgrade_energy)?,
            upgrade_charge: flag("AUTO_UPGRADE_CHARGE", get("AUTO_UPGRADE_CHARGE"), defaults.upgrade_charge)?,
            max_tap_level: parse_field("MAX_TAP_LEVEL", get("MAX_TAP_LEVEL"))?
                .unwrap_or(defaults.max_tap_level),
            max_energy_level: parse_field("MAX_ENERGY_LEVEL", get("MAX_ENERGY_LEVEL"))?
                .unwrap_or(defaults.max_energy_level),
            max_charge_level: parse_field("MAX_CHARGE_LEVEL", get("MAX_CHARGE_LEVEL"))?
                .unwrap_or(defaults.max_charge_level),
            balance_basis: parse_field("UPGRADE_BALANCE", get("UPGRADE_BALANCE"))?
                .unwrap_or(defaults.balance_basis),

            max_auth_attempts,

            telegram,
        })
    }

    pub fn auto_upgrade(&self, tier: Tier) -> bool {
        match tier {
            Tier::Tap => self.upgrade_tap,
            Tier::Energy => self.upgrade_energy,
            Tier::Charge => self.upgrade_charge,
        }
    }

    pub fn max_level(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Tap => self.max_tap_level,
            Tier::Energy => self.max_energy_level,
            Tier::Charge => self.max_charge_level,
        }
    }
}

fn parse_field<T>(field: &str, raw: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    raw.map(|raw| {
        raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
            field: field.to_string(),
            reason: e.to_string(),
        })
    })
    .transpose()
}

fn seconds(field: &str, raw: Option<String>, default: Duration) -> Result<Duration, ConfigError> {
    Ok(parse_field::<u64>(field, raw)?
        .map(Duration::from_secs)
        .unwrap_or(default))
}

fn flag(field: &str, raw: Option<String>, default: bool) -> Result<bool, ConfigError> {
    match raw.map(|raw| raw.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(value) => match value.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                field: field.to_string(),
                reason: format!("expected a boolean, got \"{}\"", value),
            }),
        },
    }
}

/// One managed account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountConfig {
    pub session_name: String,
    pub auth_url: String,
    pub proxy: Option<String>,
}

/// Load accounts from disk, one `<session_name> <auth_url> [proxy_url]` per line
pub fn load_accounts(path: &str) -> Result<Vec<AccountConfig>, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_string(),
        source,
    })?;

    let accounts = parse_accounts(&content)?;

    if accounts.is_empty() {
        return Err(ConfigError::NoAccounts {
            path: path.to_string(),
        });
    }

    let with_proxy = accounts.iter().filter(|a| a.proxy.is_some()).count();
    info!(
        "Loaded {} accounts from {} | {} with proxy",
        accounts.len(),
        path,
        with_proxy
    );

    Ok(accounts)
}

pub fn parse_accounts(content: &str) -> Result<Vec<AccountConfig>, ConfigError> {
    let mut accounts: Vec<AccountConfig> = Vec::new();

    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut parts = line.split_whitespace();
        let invalid = |reason: &str| ConfigError::InvalidAccount {
            line: index + 1,
            reason: reason.to_string(),
        };

        let session_name = parts.next().ok_or_else(|| invalid("missing session name"))?;
        let auth_url = parts.next().ok_or_else(|| invalid("missing auth url"))?;
        let proxy = parts.next().map(str::to_string);

        if parts.next().is_some() {
            return Err(invalid("too many fields"));
        }

        if accounts.iter().any(|a| a.session_name == session_name) {
            warn!("Skipping duplicate session {} on line {}", session_name, index + 1);
            continue;
        }

        accounts.push(AccountConfig {
            session_name: session_name.to_string(),
            auth_url: auth_url.to_string(),
            proxy,
        });
    }

    Ok(accounts)
}
