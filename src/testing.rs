//! Scripted stand-ins for the game API and the challenge solver

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    challenge::{AuthContext, ChallengeError, ChallengeSolver, SolvedChallenge},
    game::{
        BoostKind, BoostSlot, GameApi, GameError, GameResult, Player, PriceTables, Profile, Stat,
        Tier,
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Login { answer: String },
    SubmitTaps(u64),
    ApplyBoost(BoostKind),
    Upgrade(Tier),
    ClaimReward(String),
    CheckProxy,
}

#[derive(Default)]
struct GameScript {
    calls: Vec<Call>,
    logins: VecDeque<GameResult<Profile>>,
    taps: VecDeque<GameResult<Player>>,
    default_tap: Option<Player>,
    actions: VecDeque<GameResult<Option<Player>>>,
    claims: VecDeque<GameResult<Option<Player>>>,
}

/// Answers from queues, falls back to a default tap response and
/// successful logins. Clones share the same script.
#[derive(Clone, Default)]
pub struct ScriptedGame {
    script: Arc<Mutex<GameScript>>,
}

impl ScriptedGame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_login(&self, result: GameResult<Profile>) {
        self.script.lock().unwrap().logins.push_back(result);
    }

    pub fn push_tap(&self, result: GameResult<Player>) {
        self.script.lock().unwrap().taps.push_back(result);
    }

    pub fn set_default_tap(&self, player: Player) {
        self.script.lock().unwrap().default_tap = Some(player);
    }

    pub fn push_action(&self, result: GameResult<Option<Player>>) {
        self.script.lock().unwrap().actions.push_back(result);
    }

    pub fn push_claim(&self, result: GameResult<Option<Player>>) {
        self.script.lock().unwrap().claims.push_back(result);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.script.lock().unwrap().calls.clear();
    }

    fn record(&self, call: Call) {
        self.script.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl GameApi for ScriptedGame {
    async fn login(&self, _init_data: &str, solved: &SolvedChallenge) -> GameResult<Profile> {
        self.record(Call::Login {
            answer: solved.answer.clone(),
        });

        let next = self.script.lock().unwrap().logins.pop_front();
        next.unwrap_or_else(|| Ok(profile("token", player(1000, 1000))))
    }

    async fn submit_taps(&self, _token: &str, taps: u64) -> GameResult<Player> {
        self.record(Call::SubmitTaps(taps));

        let mut script = self.script.lock().unwrap();
        match script.taps.pop_front() {
            Some(result) => result,
            None => script
                .default_tap
                .clone()
                .ok_or_else(|| GameError::Transport("no scripted tap".to_string())),
        }
    }

    async fn apply_boost(&self, _token: &str, boost: BoostKind) -> GameResult<Option<Player>> {
        self.record(Call::ApplyBoost(boost));

        let next = self.script.lock().unwrap().actions.pop_front();
        next.unwrap_or(Ok(None))
    }

    async fn upgrade(&self, _token: &str, tier: Tier) -> GameResult<Option<Player>> {
        self.record(Call::Upgrade(tier));

        let next = self.script.lock().unwrap().actions.pop_front();
        next.unwrap_or(Ok(None))
    }

    async fn claim_reward(&self, _token: &str, task_id: &str) -> GameResult<Option<Player>> {
        self.record(Call::ClaimReward(task_id.to_string()));

        let next = self.script.lock().unwrap().claims.pop_front();
        next.unwrap_or(Ok(None))
    }

    async fn check_proxy(&self) -> GameResult<String> {
        self.record(Call::CheckProxy);

        Ok("127.0.0.1".to_string())
    }
}

#[derive(Default)]
struct SolverScript {
    contexts: Vec<AuthContext>,
    results: VecDeque<Result<SolvedChallenge, ChallengeError>>,
    delay: Duration,
}

/// Solver that records every context and tracks how many solves overlap
#[derive(Clone, Default)]
pub struct ScriptedSolver {
    script: Arc<Mutex<SolverScript>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl ScriptedSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        self.script.lock().unwrap().delay = delay;
        self
    }

    pub fn push(&self, result: Result<SolvedChallenge, ChallengeError>) {
        self.script.lock().unwrap().results.push_back(result);
    }

    pub fn contexts(&self) -> Vec<AuthContext> {
        self.script.lock().unwrap().contexts.clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChallengeSolver for ScriptedSolver {
    async fn solve(&mut self, context: &AuthContext) -> Result<SolvedChallenge, ChallengeError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let (delay, next) = {
            let mut script = self.script.lock().unwrap();
            script.contexts.push(context.clone());
            (script.delay, script.results.pop_front())
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        next.unwrap_or_else(|| {
            Ok(SolvedChallenge {
                answer: "42".to_string(),
                ..SolvedChallenge::default()
            })
        })
    }
}

pub fn player(shares: i64, energy: i64) -> Player {
    Player {
        shares,
        energy,
        tap_level: 1,
        energy_level: 1,
        charge_level: 1,
        boost: vec![
            BoostSlot {
                kind: "energy".to_string(),
                cnt: 0,
                end: 0,
            },
            BoostSlot {
                kind: "turbo".to_string(),
                cnt: 0,
                end: 0,
            },
        ],
        claims: Vec::new(),
        tap_bot: false,
        stat: Stat { earned: shares },
    }
}

pub fn with_boosts(mut player: Player, energy: u32, turbo: u32) -> Player {
    for slot in &mut player.boost {
        match slot.kind.as_str() {
            "energy" => slot.cnt = energy,
            "turbo" => slot.cnt = turbo,
            _ => {}
        }
    }
    player
}

pub fn profile(token: &str, player: Player) -> Profile {
    Profile {
        access_token: token.to_string(),
        player,
        prices: PriceTables::default(),
        bot_shares: 0,
    }
}
