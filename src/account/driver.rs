use std::{fmt, sync::Arc, time::Duration};

use log::{debug, error, info, warn};
use rand::{rngs::StdRng, SeedableRng};
use tokio::{sync::watch, time::Instant};
use tokio_util::sync::CancellationToken;

use super::{
    ladder::{self, Action},
    AccountState,
};
use crate::{
    challenge::{AuthContext, ChallengeGate},
    config::{BalanceBasis, Settings},
    error::DriverError,
    game::{BoostKind, GameApi, GameError, Player},
};

/// Non-terminal states of the driver loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Unauthenticated,
    Authenticating,
    Active,
    Cooldown,
}

/// What the driver reports upward
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverStatus {
    Starting,
    Authenticating,
    Active,
    Cooldown,
    Stopped,
    Failed(String),
}

impl fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverStatus::Starting => f.write_str("starting"),
            DriverStatus::Authenticating => f.write_str("authenticating"),
            DriverStatus::Active => f.write_str("active"),
            DriverStatus::Cooldown => f.write_str("cooldown"),
            DriverStatus::Stopped => f.write_str("stopped"),
            DriverStatus::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

impl From<Phase> for DriverStatus {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Unauthenticated => DriverStatus::Starting,
            Phase::Authenticating => DriverStatus::Authenticating,
            Phase::Active => DriverStatus::Active,
            Phase::Cooldown => DriverStatus::Cooldown,
        }
    }
}

#[derive(Debug)]
pub enum DriverExit {
    Stopped,
    Failed(DriverError),
}

/// Why the loop has to end
enum Halt {
    Stopped,
    Failed(DriverError),
}

impl From<DriverError> for Halt {
    fn from(error: DriverError) -> Self {
        Halt::Failed(error)
    }
}

type Step = Result<Phase, Halt>;

/// Drives one account until it is stopped or fails
pub struct AccountDriver {
    session_name: String,
    auth_url: String,
    init_data: String,
    proxy: Option<String>,

    settings: Arc<Settings>,
    client: Box<dyn GameApi>,
    gate: Arc<ChallengeGate>,
    cancel: CancellationToken,
    status: watch::Sender<DriverStatus>,
    rng: StdRng,

    state: AccountState,
    phase: Phase,
    challenge: Option<String>,
    auth_attempts: u32,
}

impl AccountDriver {
    pub fn new(
        session_name: impl Into<String>,
        auth_url: impl Into<String>,
        init_data: impl Into<String>,
        settings: Arc<Settings>,
        client: Box<dyn GameApi>,
        gate: Arc<ChallengeGate>,
        cancel: CancellationToken,
    ) -> Self {
        let (status, _) = watch::channel(DriverStatus::Starting);

        Self {
            session_name: session_name.into(),
            auth_url: auth_url.into(),
            init_data: init_data.into(),
            proxy: None,
            settings,
            client,
            gate,
            cancel,
            status,
            rng: StdRng::from_entropy(),
            state: AccountState::new(),
            phase: Phase::Unauthenticated,
            challenge: None,
            auth_attempts: 0,
        }
    }

    /// Proxy whose egress IP is logged on start
    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<DriverStatus> {
        self.status.subscribe()
    }

    /// Run until cancelled or failed. Consumes the driver so its network
    /// session is released on return.
    pub async fn run(mut self) -> DriverExit {
        info!("{} | Driver started", self.session_name);

        if let Some(proxy) = self.proxy.clone() {
            self.report_proxy(&proxy).await;
        }

        let exit = loop {
            if self.cancel.is_cancelled() {
                break DriverExit::Stopped;
            }

            match self.step().await {
                Ok(next) => self.transition(next),
                Err(Halt::Stopped) => break DriverExit::Stopped,
                Err(Halt::Failed(error)) => break DriverExit::Failed(error),
            }
        };

        match &exit {
            DriverExit::Stopped => {
                info!("{} | Driver stopped", self.session_name);
                self.status.send_replace(DriverStatus::Stopped);
            }
            DriverExit::Failed(error) => {
                error!("{} | Driver failed: {}", self.session_name, error);
                self.status
                    .send_replace(DriverStatus::Failed(error.to_string()));
            }
        }

        exit
    }

    async fn step(&mut self) -> Step {
        match self.phase {
            Phase::Unauthenticated => Ok(Phase::Authenticating),
            Phase::Authenticating => self.authenticate().await,
            Phase::Active => self.cycle().await,
            Phase::Cooldown => self.cool_down().await,
        }
    }

    fn transition(&mut self, next: Phase) {
        if next != self.phase {
            debug!(
                "{} | {:?} -> {:?}",
                self.session_name, self.phase, next
            );
            self.phase = next;
            self.status.send_replace(next.into());
        }
    }

    /// Sleep unless stopped first
    async fn pause(&self, duration: Duration) -> Result<(), Halt> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Halt::Stopped),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    async fn report_proxy(&self, proxy: &str) {
        match self.client.check_proxy().await {
            Ok(ip) => info!("{} | Proxy IP: {}", self.session_name, ip),
            Err(error) => warn!("{} | Proxy: {} | Error: {}", self.session_name, proxy, error),
        }
    }

    /// Solve the challenge through the gate, then log in
    async fn authenticate(&mut self) -> Step {
        self.auth_attempts += 1;

        if let Some(max) = self.settings.max_auth_attempts {
            if self.auth_attempts > max {
                return Err(DriverError::AuthExhausted { attempts: max }.into());
            }
        }

        let context = AuthContext {
            session_name: self.session_name.clone(),
            auth_url: self.auth_url.clone(),
            init_data: self.init_data.clone(),
            challenge: self.challenge.clone(),
        };

        let gate = Arc::clone(&self.gate);
        let solved = {
            let mut solver = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Halt::Stopped),
                solver = gate.acquire() => solver,
            };

            debug!("{} | Solving challenge", self.session_name);
            solver.solve(&context).await
        };

        let solved = match solved {
            Ok(solved) => solved,
            Err(error) if error.is_fatal() => {
                return Err(DriverError::AuthInvalid {
                    reason: error.to_string(),
                }
                .into());
            }
            Err(error) => {
                warn!(
                    "{} | Challenge solving failed: {} | Retry in {}s",
                    self.session_name,
                    error,
                    self.settings.retry_delay.as_secs()
                );
                self.pause(self.settings.retry_delay).await?;
                return Ok(Phase::Authenticating);
            }
        };

        match self.client.login(&self.init_data, &solved).await {
            Ok(profile) => {
                self.challenge = None;
                self.auth_attempts = 0;

                if profile.player.tap_bot {
                    info!(
                        "{} | Tap bot earned +{} coins!",
                        self.session_name, profile.bot_shares
                    );
                }

                self.state.apply_login(profile, Instant::now());

                info!(
                    "{} | Logged in | Balance: {} | Energy: {} | Pending claims: {}",
                    self.session_name,
                    self.state.balance,
                    self.state.energy,
                    self.state.pending_claims.len()
                );

                Ok(Phase::Active)
            }
            Err(GameError::ChallengeRequired { challenge }) => {
                info!("{} | Login requires a challenge", self.session_name);

                // An answered challenge that still bounces gets a backoff.
                // A first challenge is solved within the same attempt.
                if context.challenge.is_some() {
                    self.pause(self.settings.retry_delay).await?;
                } else {
                    self.auth_attempts = self.auth_attempts.saturating_sub(1);
                }

                self.challenge = Some(challenge);
                Ok(Phase::Authenticating)
            }
            Err(GameError::Unauthorized { status }) => Err(DriverError::AuthInvalid {
                reason: format!("login rejected with status {}", status),
            }
            .into()),
            Err(error) => {
                warn!(
                    "{} | Login failed: {} | Retry in {}s",
                    self.session_name,
                    error,
                    self.settings.retry_delay.as_secs()
                );
                self.pause(self.settings.retry_delay).await?;
                Ok(Phase::Authenticating)
            }
        }
    }

    /// One pass of the active loop
    async fn cycle(&mut self) -> Step {
        let now = Instant::now();

        let token = match self.state.token.clone() {
            Some(token) if !self.state.token_is_stale(now, self.settings.token_ttl) => token,
            _ => {
                info!("{} | Access token expired, logging in again", self.session_name);
                self.state.invalidate_token();
                return Ok(Phase::Authenticating);
            }
        };

        self.drain_claims(&token).await?;

        let mut taps = self.settings.taps.sample(&mut self.rng);
        if self.state.turbo_active {
            taps += self.settings.turbo_bonus;
        }

        let balance_before = self.state.balance;

        let player = match self.client.submit_taps(&token, taps).await {
            Ok(player) => player,
            Err(GameError::Unauthorized { status }) => {
                warn!(
                    "{} | Token rejected with status {}, logging in again",
                    self.session_name, status
                );
                self.state.invalidate_token();
                return Ok(Phase::Authenticating);
            }
            Err(error) => {
                warn!(
                    "{} | Tapping failed: {} | Retry in {}s",
                    self.session_name,
                    error,
                    self.settings.retry_delay.as_secs()
                );
                self.pause(self.settings.retry_delay).await?;
                return Ok(Phase::Active);
            }
        };

        self.state.apply_player(&player);

        let earned = (self.state.balance - balance_before).abs();
        info!(
            "{} | Successful tapped! | Balance: {} (+{}) | Energy: {} | Total: {}",
            self.session_name, self.state.balance, earned, self.state.energy, self.state.total_earned
        );

        let upgrade_balance = match self.settings.balance_basis {
            BalanceBasis::PostTap => self.state.balance,
            BalanceBasis::PreTap => balance_before,
        };

        if let Some(action) = ladder::decide(&self.state, &self.settings, upgrade_balance) {
            if let Some(next) = self.perform(action, &token).await? {
                return Ok(next);
            }
        }

        if self
            .state
            .turbo_expired(Instant::now(), self.settings.turbo_window, unix_now())
        {
            info!("{} | Turbo finished", self.session_name);
            self.state.stop_turbo();
        }

        let delay = if self.state.turbo_active {
            self.settings.turbo_sleep
        } else {
            Duration::from_secs(self.settings.cycle_sleep.sample(&mut self.rng))
        };

        debug!("{} | Sleep {}s", self.session_name, delay.as_secs());
        self.pause(delay).await?;

        Ok(Phase::Active)
    }

    /// Claim every pending reward once, in order
    async fn drain_claims(&mut self, token: &str) -> Result<(), Halt> {
        while let Some(task_id) = self.state.pending_claims.pop_front() {
            info!(
                "{} | Sleep {}s before claim {} reward",
                self.session_name,
                self.settings.claim_delay.as_secs(),
                task_id
            );
            self.pause(self.settings.claim_delay).await?;

            match self.client.claim_reward(token, &task_id).await {
                Ok(player) => {
                    self.apply_optional(player);
                    info!("{} | Successfully claim {} reward", self.session_name, task_id);
                }
                Err(error) => {
                    warn!(
                        "{} | Claim {} reward failed, skipping: {}",
                        self.session_name, task_id, error
                    );
                }
            }
        }

        Ok(())
    }

    /// Execute the single action chosen for this cycle. `Some` ends the
    /// cycle in a different phase.
    async fn perform(&mut self, action: Action, token: &str) -> Result<Option<Phase>, Halt> {
        if action == Action::Cooldown {
            info!(
                "{} | Minimum energy reached: {}",
                self.session_name, self.state.energy
            );
            self.state.stop_turbo();
            return Ok(Some(Phase::Cooldown));
        }

        info!(
            "{} | Sleep {}s before {}",
            self.session_name,
            self.settings.action_delay.as_secs(),
            action
        );
        self.pause(self.settings.action_delay).await?;

        let result = match action {
            Action::ApplyBoost(kind) => self.client.apply_boost(token, kind).await,
            Action::Upgrade(tier) => self.client.upgrade(token, tier).await,
            Action::Cooldown => return Ok(Some(Phase::Cooldown)),
        };

        match result {
            Ok(player) => {
                self.apply_optional(player);

                match action {
                    Action::ApplyBoost(BoostKind::Turbo) => {
                        self.state.start_turbo(Instant::now(), unix_now());
                        info!("{} | Turbo boost applied", self.session_name);
                    }
                    Action::ApplyBoost(BoostKind::Energy) => {
                        info!("{} | Energy boost applied", self.session_name);
                    }
                    Action::Upgrade(tier) => {
                        info!(
                            "{} | {} upgraded to {} lvl",
                            self.session_name,
                            tier,
                            self.state.level(tier).max(1)
                        );
                    }
                    Action::Cooldown => {}
                }

                Ok(None)
            }
            Err(GameError::Unauthorized { status }) => {
                warn!(
                    "{} | Token rejected with status {} during {}, logging in again",
                    self.session_name, status, action
                );
                self.state.invalidate_token();
                Ok(Some(Phase::Authenticating))
            }
            Err(error @ GameError::Transport(_)) => {
                warn!(
                    "{} | Could not {}: {} | Retry next cycle",
                    self.session_name, action, error
                );
                self.pause(self.settings.retry_delay).await?;
                Ok(None)
            }
            Err(error) => {
                warn!("{} | Could not {}: {}", self.session_name, action, error);
                Ok(None)
            }
        }
    }

    /// Sleep off low energy, then force a fresh login
    async fn cool_down(&mut self) -> Step {
        let cooldown = self.settings.cooldown;
        let wake = chrono::Local::now() + chrono::Duration::seconds(cooldown.as_secs() as i64);

        info!(
            "{} | Sleep {}s until {}",
            self.session_name,
            cooldown.as_secs(),
            wake.format("%H:%M:%S")
        );

        self.pause(cooldown).await?;
        self.state.invalidate_token();

        Ok(Phase::Authenticating)
    }

    fn apply_optional(&mut self, player: Option<Player>) {
        if let Some(player) = player {
            self.state.apply_player(&player);
        }
    }
}

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        challenge::{ChallengeError, SolvedChallenge},
        config::SampleRange,
        game::{PriceTables, Profile, Tier},
        testing::{player, profile, with_boosts, Call, ScriptedGame, ScriptedSolver},
    };

    fn settings() -> Settings {
        Settings {
            energy_floor: 100,
            taps: SampleRange::new(10, 20),
            cycle_sleep: SampleRange::new(1, 1),
            turbo_bonus: 1000,
            apply_energy_boost: true,
            apply_turbo_boost: true,
            upgrade_tap: false,
            upgrade_energy: false,
            upgrade_charge: false,
            ..Settings::default()
        }
    }

    fn driver_with(
        settings: Settings,
        game: &ScriptedGame,
        solver: &ScriptedSolver,
    ) -> AccountDriver {
        let gate = Arc::new(ChallengeGate::new(Box::new(solver.clone())));

        AccountDriver::new(
            "alice",
            "https://app.tapswap.ai/#tgWebAppData=x",
            "init-data",
            Arc::new(settings),
            Box::new(game.clone()),
            gate,
            CancellationToken::new(),
        )
        .with_rng(StdRng::seed_from_u64(11))
    }

    /// Driver already logged in with the given state tweaks
    async fn active_driver(
        settings: Settings,
        game: &ScriptedGame,
        solver: &ScriptedSolver,
    ) -> AccountDriver {
        let mut driver = driver_with(settings, game, solver);

        let next = driver.authenticate().await.ok().unwrap();
        assert_eq!(next, Phase::Active);
        driver.transition(next);
        game.clear_calls();

        driver
    }

    fn taps_of(calls: &[Call]) -> Vec<u64> {
        calls
            .iter()
            .filter_map(|call| match call {
                Call::SubmitTaps(taps) => Some(*taps),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn low_energy_cools_down_and_forces_login() {
        let game = ScriptedGame::new();
        let solver = ScriptedSolver::new();
        let mut driver = active_driver(settings(), &game, &solver).await;

        game.push_tap(Ok(player(1000, 50)));

        let next = driver.cycle().await.ok().unwrap();
        assert_eq!(next, Phase::Cooldown);
        assert!(matches!(game.calls()[..], [Call::SubmitTaps(_)]));

        let next = driver.cool_down().await.ok().unwrap();
        assert_eq!(next, Phase::Authenticating);
        assert!(driver.state.token.is_none());
        assert!(!driver.state.turbo_active);

        game.clear_calls();
        let next = driver.authenticate().await.ok().unwrap();
        assert_eq!(next, Phase::Active);
        assert!(matches!(game.calls()[..], [Call::Login { .. }]));
    }

    #[tokio::test(start_paused = true)]
    async fn affordable_tap_upgrade_happens_once() {
        let game = ScriptedGame::new();
        let solver = ScriptedSolver::new();
        let mut tap_response = player(500, 1000);
        tap_response.tap_level = 2;

        let mut login_player = tap_response.clone();
        login_player.shares = 500;
        let mut prices = PriceTables::default();
        prices.insert(Tier::Tap, 3, 400);
        let login = Profile {
            prices,
            ..profile("token", login_player)
        };
        game.push_login(Ok(login));

        let settings = Settings {
            upgrade_tap: true,
            ..settings()
        };
        let mut driver = active_driver(settings, &game, &solver).await;
        assert_eq!(driver.state.balance, 500);

        game.push_tap(Ok(tap_response));
        let next = driver.cycle().await.ok().unwrap();

        assert_eq!(next, Phase::Active);
        let calls = game.calls();
        assert_eq!(calls.len(), 2);
        assert!(matches!(calls[0], Call::SubmitTaps(_)));
        assert_eq!(calls[1], Call::Upgrade(Tier::Tap));
    }

    #[tokio::test(start_paused = true)]
    async fn pre_tap_balance_basis_uses_old_balance() {
        let game = ScriptedGame::new();
        let solver = ScriptedSolver::new();

        let mut login = profile("token", player(300, 1000));
        login.prices.insert(Tier::Tap, 2, 400);
        game.push_login(Ok(login));

        let settings = Settings {
            upgrade_tap: true,
            balance_basis: BalanceBasis::PreTap,
            ..settings()
        };
        let mut driver = active_driver(settings, &game, &solver).await;

        game.push_tap(Ok(player(450, 1000)));
        driver.cycle().await.ok().unwrap();

        assert!(!game.calls().contains(&Call::Upgrade(Tier::Tap)));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_token_logs_in_before_tapping() {
        let game = ScriptedGame::new();
        let solver = ScriptedSolver::new();
        game.set_default_tap(player(1000, 1000));
        let mut driver = active_driver(settings(), &game, &solver).await;

        tokio::time::advance(Duration::from_secs(1801)).await;

        let next = driver.cycle().await.ok().unwrap();
        assert_eq!(next, Phase::Authenticating);
        assert!(game.calls().is_empty());

        driver.transition(next);
        let next = driver.authenticate().await.ok().unwrap();
        assert_eq!(next, Phase::Active);
        driver.transition(next);
        driver.cycle().await.ok().unwrap();

        let calls = game.calls();
        assert!(matches!(calls[0], Call::Login { .. }));
        assert!(matches!(calls[1], Call::SubmitTaps(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_token_is_reused() {
        let game = ScriptedGame::new();
        let solver = ScriptedSolver::new();
        game.set_default_tap(player(1000, 1000));
        let settings = Settings {
            cycle_sleep: SampleRange::new(0, 0),
            ..settings()
        };
        let mut driver = active_driver(settings, &game, &solver).await;

        tokio::time::advance(Duration::from_secs(1799)).await;

        assert_eq!(driver.cycle().await.ok().unwrap(), Phase::Active);
        assert!(matches!(game.calls()[..], [Call::SubmitTaps(_)]));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_tap_timeouts_leave_state_untouched() {
        let game = ScriptedGame::new();
        let solver = ScriptedSolver::new();
        let mut login = profile("token", with_boosts(player(5000, 50), 2, 2));
        login.prices.insert(Tier::Tap, 2, 10);
        game.push_login(Ok(login));

        let settings = Settings {
            upgrade_tap: true,
            ..settings()
        };
        let mut driver = active_driver(settings, &game, &solver).await;
        let before = (driver.state.balance, driver.state.energy, driver.state.tap_level);

        for _ in 0..3 {
            game.push_tap(Err(GameError::Transport("timed out".to_string())));
            assert_eq!(driver.cycle().await.ok().unwrap(), Phase::Active);
        }

        assert_eq!(
            (driver.state.balance, driver.state.energy, driver.state.tap_level),
            before
        );
        assert_eq!(taps_of(&game.calls()).len(), 3);
        assert_eq!(game.calls().len(), 3);
        assert!(!driver.cancel.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn tap_counts_stay_in_range() {
        let game = ScriptedGame::new();
        let solver = ScriptedSolver::new();
        game.set_default_tap(player(1000, 1000));
        let mut driver = active_driver(settings(), &game, &solver).await;

        for _ in 0..50 {
            driver.cycle().await.ok().unwrap();
        }

        driver.state.start_turbo(Instant::now(), 0);
        driver.state.turbo_started_at = Some(Instant::now() + Duration::from_secs(3600));
        for _ in 0..50 {
            driver.cycle().await.ok().unwrap();
        }

        let taps = taps_of(&game.calls());
        assert_eq!(taps.len(), 100);
        assert!(taps[..50].iter().all(|t| (10..=20).contains(t)));
        assert!(taps[50..].iter().all(|t| (1010..=1020).contains(t)));
    }

    #[tokio::test(start_paused = true)]
    async fn claims_are_drained_once_each() {
        let game = ScriptedGame::new();
        let solver = ScriptedSolver::new();
        let mut login_player = player(1000, 1000);
        login_player.claims = vec!["M1".to_string(), "M2".to_string(), "M1".to_string()];
        game.push_login(Ok(profile("token", login_player)));
        game.set_default_tap(player(1000, 1000));
        game.push_claim(Err(GameError::Protocol {
            status: 400,
            message: "already claimed".to_string(),
        }));

        let mut driver = active_driver(settings(), &game, &solver).await;
        driver.cycle().await.ok().unwrap();
        driver.cycle().await.ok().unwrap();

        let calls = game.calls();
        assert_eq!(calls[0], Call::ClaimReward("M1".to_string()));
        assert_eq!(calls[1], Call::ClaimReward("M2".to_string()));
        assert!(matches!(calls[2], Call::SubmitTaps(_)));
        assert!(matches!(calls[3], Call::SubmitTaps(_)));
        assert_eq!(calls.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn energy_boost_wins_over_upgrade() {
        let game = ScriptedGame::new();
        let solver = ScriptedSolver::new();
        let mut login = profile("token", player(5000, 1000));
        login.prices.insert(Tier::Tap, 2, 10);
        game.push_login(Ok(login));

        let settings = Settings {
            upgrade_tap: true,
            ..settings()
        };
        let mut driver = active_driver(settings, &game, &solver).await;

        game.push_tap(Ok(with_boosts(player(5000, 20), 1, 0)));
        driver.cycle().await.ok().unwrap();

        let calls = game.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1], Call::ApplyBoost(BoostKind::Energy));
    }

    #[tokio::test(start_paused = true)]
    async fn turbo_adds_taps_until_window_ends() {
        let game = ScriptedGame::new();
        let solver = ScriptedSolver::new();
        let settings = Settings {
            turbo_window: Duration::from_secs(20),
            turbo_sleep: Duration::from_secs(4),
            ..settings()
        };
        let mut driver = active_driver(settings, &game, &solver).await;

        game.push_tap(Ok(with_boosts(player(1000, 1000), 0, 1)));
        driver.cycle().await.ok().unwrap();
        assert!(driver.state.turbo_active);
        assert_eq!(game.calls()[1], Call::ApplyBoost(BoostKind::Turbo));

        game.set_default_tap(player(1000, 1000));
        game.clear_calls();

        let mut turbo_cycles = 0;
        while driver.state.turbo_active {
            driver.cycle().await.ok().unwrap();
            turbo_cycles += 1;
            assert!(turbo_cycles < 20);
        }

        let taps = taps_of(&game.calls());
        assert!(taps.iter().all(|t| *t >= 1010));
        assert!(!game
            .calls()
            .iter()
            .any(|call| matches!(call, Call::ApplyBoost(_) | Call::Upgrade(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn challenge_round_trip_before_login() {
        let game = ScriptedGame::new();
        let solver = ScriptedSolver::new();
        solver.push(Ok(SolvedChallenge::default()));
        solver.push(Ok(SolvedChallenge {
            answer: "777".to_string(),
            ..SolvedChallenge::default()
        }));
        game.push_login(Err(GameError::ChallengeRequired {
            challenge: "abcd".to_string(),
        }));

        let mut driver = driver_with(settings(), &game, &solver);

        assert_eq!(driver.authenticate().await.ok().unwrap(), Phase::Authenticating);
        assert_eq!(driver.authenticate().await.ok().unwrap(), Phase::Active);

        let contexts = solver.contexts();
        assert_eq!(contexts[0].challenge, None);
        assert_eq!(contexts[1].challenge.as_deref(), Some("abcd"));
        assert_eq!(
            game.calls()[1],
            Call::Login {
                answer: "777".to_string()
            }
        );
        assert!(driver.challenge.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn solver_outage_is_retried() {
        let game = ScriptedGame::new();
        let solver = ScriptedSolver::new();
        solver.push(Err(ChallengeError::Unavailable("busy".to_string())));

        let mut driver = driver_with(settings(), &game, &solver);

        assert_eq!(driver.authenticate().await.ok().unwrap(), Phase::Authenticating);
        assert!(game.calls().is_empty());
        assert_eq!(driver.authenticate().await.ok().unwrap(), Phase::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_login_fails_the_driver() {
        let game = ScriptedGame::new();
        let solver = ScriptedSolver::new();
        game.push_login(Err(GameError::Unauthorized { status: 401 }));

        let driver = driver_with(settings(), &game, &solver);
        let status = driver.subscribe();

        let exit = driver.run().await;

        assert!(matches!(
            exit,
            DriverExit::Failed(DriverError::AuthInvalid { .. })
        ));
        assert!(matches!(*status.borrow(), DriverStatus::Failed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_context_fails_the_driver() {
        let game = ScriptedGame::new();
        let solver = ScriptedSolver::new();
        solver.push(Err(ChallengeError::InvalidContext("bad".to_string())));

        let exit = driver_with(settings(), &game, &solver).run().await;

        assert!(matches!(
            exit,
            DriverExit::Failed(DriverError::AuthInvalid { .. })
        ));
        assert!(game.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn auth_attempts_are_bounded_when_configured() {
        let game = ScriptedGame::new();
        let solver = ScriptedSolver::new();
        for _ in 0..5 {
            solver.push(Err(ChallengeError::Unavailable("busy".to_string())));
        }

        let settings = Settings {
            max_auth_attempts: Some(3),
            ..settings()
        };
        let exit = driver_with(settings, &game, &solver).run().await;

        assert!(matches!(
            exit,
            DriverExit::Failed(DriverError::AuthExhausted { attempts: 3 })
        ));
        assert_eq!(solver.contexts().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn challenge_follow_up_shares_the_attempt() {
        let game = ScriptedGame::new();
        let solver = ScriptedSolver::new();
        game.push_login(Err(GameError::ChallengeRequired {
            challenge: "abcd".to_string(),
        }));

        let settings = Settings {
            max_auth_attempts: Some(1),
            ..settings()
        };
        let mut driver = driver_with(settings, &game, &solver);

        assert_eq!(driver.authenticate().await.ok().unwrap(), Phase::Authenticating);
        assert_eq!(driver.authenticate().await.ok().unwrap(), Phase::Active);
        assert_eq!(solver.contexts().len(), 2);
    }

    /// Logged in with a cheap tap upgrade on offer
    async fn upgrade_ready_driver(game: &ScriptedGame, solver: &ScriptedSolver) -> AccountDriver {
        let mut login = profile("token", player(5000, 1000));
        login.prices.insert(Tier::Tap, 2, 10);
        game.push_login(Ok(login));

        let settings = Settings {
            upgrade_tap: true,
            ..settings()
        };

        active_driver(settings, game, solver).await
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_turbo_is_not_started() {
        let game = ScriptedGame::new();
        let solver = ScriptedSolver::new();
        let mut driver = active_driver(settings(), &game, &solver).await;

        game.push_tap(Ok(with_boosts(player(1000, 1000), 0, 1)));
        game.push_action(Err(GameError::Protocol {
            status: 400,
            message: "no boosts left".to_string(),
        }));

        assert_eq!(driver.cycle().await.ok().unwrap(), Phase::Active);
        assert!(!driver.state.turbo_active);
        assert!(driver.state.turbo_started_at.is_none());
        assert!(driver.state.token.is_some());

        let calls = game.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1], Call::ApplyBoost(BoostKind::Turbo));
    }

    #[tokio::test(start_paused = true)]
    async fn upgrade_timeout_backs_off_and_retries_next_cycle() {
        let game = ScriptedGame::new();
        let solver = ScriptedSolver::new();
        let mut driver = upgrade_ready_driver(&game, &solver).await;
        game.set_default_tap(player(5000, 1000));
        game.push_action(Err(GameError::Transport("timed out".to_string())));

        let started = Instant::now();
        assert_eq!(driver.cycle().await.ok().unwrap(), Phase::Active);

        let settings = &driver.settings;
        assert!(started.elapsed() >= settings.action_delay + settings.retry_delay);
        assert_eq!(driver.state.tap_level, 1);

        assert_eq!(driver.cycle().await.ok().unwrap(), Phase::Active);

        let upgrades = game
            .calls()
            .iter()
            .filter(|call| **call == Call::Upgrade(Tier::Tap))
            .count();
        assert_eq!(upgrades, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_token_on_upgrade_forces_login() {
        let game = ScriptedGame::new();
        let solver = ScriptedSolver::new();
        let mut driver = upgrade_ready_driver(&game, &solver).await;
        game.push_tap(Ok(player(5000, 1000)));
        game.push_action(Err(GameError::Unauthorized { status: 401 }));

        assert_eq!(driver.cycle().await.ok().unwrap(), Phase::Authenticating);
        assert!(driver.state.token.is_none());
        assert_eq!(game.calls()[1], Call::Upgrade(Tier::Tap));
    }

    #[tokio::test(start_paused = true)]
    async fn upgrade_response_refreshes_state() {
        let game = ScriptedGame::new();
        let solver = ScriptedSolver::new();
        let mut driver = upgrade_ready_driver(&game, &solver).await;
        game.push_tap(Ok(player(5000, 1000)));

        let mut upgraded = player(4990, 1000);
        upgraded.tap_level = 2;
        game.push_action(Ok(Some(upgraded)));

        assert_eq!(driver.cycle().await.ok().unwrap(), Phase::Active);
        assert_eq!(driver.state.tap_level, 2);
        assert_eq!(driver.state.balance, 4990);
    }

    #[tokio::test(start_paused = true)]
    async fn revoked_token_triggers_login() {
        let game = ScriptedGame::new();
        let solver = ScriptedSolver::new();
        let mut driver = active_driver(settings(), &game, &solver).await;

        game.push_tap(Err(GameError::Unauthorized { status: 401 }));

        assert_eq!(driver.cycle().await.ok().unwrap(), Phase::Authenticating);
        assert!(driver.state.token.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_signal_ends_run() {
        let game = ScriptedGame::new();
        let solver = ScriptedSolver::new();
        game.set_default_tap(player(1000, 1000));

        let driver = driver_with(settings(), &game, &solver)
            .with_proxy(Some("http://proxy:1".to_string()));
        let cancel = driver.cancel.clone();
        let status = driver.subscribe();

        let task = tokio::spawn(driver.run());
        tokio::time::sleep(Duration::from_secs(30)).await;
        cancel.cancel();

        let exit = task.await.unwrap();
        assert!(matches!(exit, DriverExit::Stopped));
        assert_eq!(*status.borrow(), DriverStatus::Stopped);

        let calls = game.calls();
        assert_eq!(calls[0], Call::CheckProxy);
        assert!(taps_of(&calls).len() >= 2);
    }
}
