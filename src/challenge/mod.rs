use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};

mod browser;

pub use browser::BrowserSolver;

const CHALLENGE_XOR_KEY: u8 = 157;

#[derive(Error, Debug)]
pub enum ChallengeError {
    /// The solver could not produce an answer this time
    #[error("challenge solver unavailable: {0}")]
    Unavailable(String),

    #[error("browser error: {0}")]
    Browser(#[from] thirtyfour::error::WebDriverError),

    /// The authorization context itself is unusable; retrying cannot help
    #[error("invalid authorization context: {0}")]
    InvalidContext(String),
}

impl ChallengeError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ChallengeError::InvalidContext(_))
    }
}

/// What a solver gets to work with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub session_name: String,
    pub auth_url: String,
    pub init_data: String,
    /// Hex challenge returned by a previous login attempt
    pub challenge: Option<String>,
}

/// Solver output, consumed opaquely by the login call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SolvedChallenge {
    pub answer: String,
    pub client_version: String,
    pub touch: String,
}

#[async_trait]
pub trait ChallengeSolver: Send {
    async fn solve(&mut self, context: &AuthContext) -> Result<SolvedChallenge, ChallengeError>;

    /// Release whatever the solver holds on to
    async fn shutdown(&mut self) -> Result<(), ChallengeError> {
        Ok(())
    }
}

/// The single process-wide entry to the solver. Only one solve runs at a
/// time; the guard must be held for the whole call.
pub struct ChallengeGate {
    solver: Mutex<Box<dyn ChallengeSolver>>,
}

impl ChallengeGate {
    pub fn new(solver: Box<dyn ChallengeSolver>) -> Self {
        Self {
            solver: Mutex::new(solver),
        }
    }

    /// Wait for exclusive access to the solver
    pub async fn acquire(&self) -> MutexGuard<'_, Box<dyn ChallengeSolver>> {
        self.solver.lock().await
    }

    pub async fn shutdown(&self) -> Result<(), ChallengeError> {
        self.solver.lock().await.shutdown().await
    }
}

/// Turn a hex challenge into the script text it hides
pub fn decode_challenge(challenge: &str) -> Result<String, ChallengeError> {
    let challenge = challenge.trim();

    if challenge.len() % 2 != 0 {
        return Err(ChallengeError::InvalidContext(format!(
            "challenge has odd length {}",
            challenge.len()
        )));
    }

    let bytes = (0..challenge.len())
        .step_by(2)
        .map(|i| {
            challenge
                .get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .map(|byte| byte ^ CHALLENGE_XOR_KEY)
                .ok_or_else(|| {
                    ChallengeError::InvalidContext(format!("invalid hex at offset {}", i))
                })
        })
        .collect::<Result<Vec<u8>, ChallengeError>>()?;

    String::from_utf8(bytes)
        .map_err(|e| ChallengeError::InvalidContext(format!("challenge is not utf-8: {}", e)))
}
