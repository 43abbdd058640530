use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, trace, warn};
use serde_json::Value;
use thirtyfour::{
    http::reqwest_async::ReqwestDriverAsync, DesiredCapabilities, GenericWebDriver, WebDriver,
    WebDriverCommands,
};

use super::{decode_challenge, AuthContext, ChallengeError, ChallengeSolver, SolvedChallenge};

type Driver = GenericWebDriver<ReqwestDriverAsync>;

const PAGE_LOAD_POLL: Duration = Duration::from_millis(250);
const PAGE_LOAD_ATTEMPTS: u32 = 120;

const CLIENT_VERSION_SCRIPT: &str =
    "return window.localStorage.getItem('x-cv') || document.documentElement.getAttribute('data-cv') || '';";
const TOUCH_SCRIPT: &str = "return window.localStorage.getItem('x-touch') || '';";

/// Solves challenges inside a remote Chrome session driven over WebDriver.
/// The session is opened on first use and reused across solves.
pub struct BrowserSolver {
    driver_url: String,
    driver: Option<Driver>,
}

impl BrowserSolver {
    pub fn new(driver_url: impl Into<String>) -> Self {
        Self {
            driver_url: driver_url.into(),
            driver: None,
        }
    }

    /// Connect to the WebDriver endpoint
    async fn connect(&mut self) -> Result<(), ChallengeError> {
        let mut caps = DesiredCapabilities::chrome();
        caps.add_chrome_arg("--headless")?;
        caps.add_chrome_arg("--window-size=412,915")?;

        trace!("Connecting to {}", self.driver_url);

        let driver = WebDriver::new(&self.driver_url, &caps).await?;

        trace!("Connected");

        self.driver = Some(driver);

        Ok(())
    }

    /// Get driver instance, connecting first if needed
    async fn driver(&mut self) -> Result<&Driver, ChallengeError> {
        if self.driver.is_none() {
            self.connect().await?;
        }

        self.driver
            .as_ref()
            .ok_or_else(|| ChallengeError::Unavailable("browser session not started".to_string()))
    }

    /// Wait until the document has finished loading
    async fn wait_page_load(driver: &Driver) -> Result<(), ChallengeError> {
        for _ in 0..PAGE_LOAD_ATTEMPTS {
            let state = driver.execute_script("return document.readyState").await?;

            if state.value().as_str() == Some("complete") {
                return Ok(());
            }

            tokio::time::sleep(PAGE_LOAD_POLL).await;
        }

        Err(ChallengeError::Unavailable(
            "web app did not finish loading".to_string(),
        ))
    }

    async fn run_script(driver: &Driver, script: &str) -> Result<String, ChallengeError> {
        let ret = driver.execute_script(script).await?;

        Ok(script_value(ret.value()))
    }

    async fn solve_in_page(
        &mut self,
        context: &AuthContext,
    ) -> Result<SolvedChallenge, ChallengeError> {
        let script = match &context.challenge {
            Some(challenge) => Some(decode_challenge(challenge)?),
            None => None,
        };

        let driver = self.driver().await?;

        debug!("{} | Loading web app for challenge", context.session_name);

        driver.get(&context.auth_url).await?;
        Self::wait_page_load(driver).await?;

        let answer = match script {
            Some(script) => {
                let literal = serde_json::to_string(&script)
                    .map_err(|e| ChallengeError::InvalidContext(e.to_string()))?;

                Self::run_script(driver, &format!("return String(eval({}));", literal)).await?
            }
            None => String::new(),
        };

        let client_version = Self::run_script(driver, CLIENT_VERSION_SCRIPT).await?;
        let touch = Self::run_script(driver, TOUCH_SCRIPT).await?;

        Ok(SolvedChallenge {
            answer,
            client_version,
            touch,
        })
    }

    async fn exit(&mut self) -> Result<(), ChallengeError> {
        if let Some(driver) = self.driver.take() {
            info!("Closing challenge browser");
            driver.quit().await?;
        }

        Ok(())
    }
}

fn script_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl ChallengeSolver for BrowserSolver {
    async fn solve(&mut self, context: &AuthContext) -> Result<SolvedChallenge, ChallengeError> {
        match self.solve_in_page(context).await {
            Ok(solved) => Ok(solved),
            Err(error @ ChallengeError::Browser(_)) => {
                // A broken session is dropped so the next solve reconnects
                warn!(
                    "{} | Browser session failed, resetting: {}",
                    context.session_name, error
                );
                self.driver = None;
                Err(error)
            }
            Err(error) => Err(error),
        }
    }

    async fn shutdown(&mut self) -> Result<(), ChallengeError> {
        self.exit().await
    }
}
