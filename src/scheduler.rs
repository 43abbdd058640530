use std::{collections::HashMap, sync::Arc};

use log::{error, info, warn};
use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    account::{AccountDriver, DriverExit, DriverStatus},
    challenge::ChallengeGate,
    config::{AccountConfig, Settings},
    error::{ConfigError, DriverError},
    game::{random_user_agent, GameApi, GameClient},
    session,
};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("unknown account '{0}'")]
    UnknownAccount(String),

    #[error("account '{0}' is already running")]
    AlreadyRunning(String),

    #[error("account '{0}' is not running")]
    NotRunning(String),
}

/// Builds the network client a driver talks to the game through
pub trait ClientFactory: Send + Sync {
    fn build(
        &self,
        settings: &Settings,
        account: &AccountConfig,
        account_id: i64,
    ) -> Result<Box<dyn GameApi>, ConfigError>;
}

/// One HTTP client per account, each with its own user agent and proxy
pub struct HttpClientFactory;

impl ClientFactory for HttpClientFactory {
    fn build(
        &self,
        settings: &Settings,
        account: &AccountConfig,
        account_id: i64,
    ) -> Result<Box<dyn GameApi>, ConfigError> {
        let user_agent = random_user_agent(&mut rand::thread_rng());
        let client = GameClient::new(settings, account, account_id, &user_agent)?;

        Ok(Box::new(client))
    }
}

struct DriverHandle {
    cancel: CancellationToken,
    status: watch::Receiver<DriverStatus>,
    task: Option<JoinHandle<DriverExit>>,
}

impl DriverHandle {
    fn is_running(&self) -> bool {
        self.task
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    fn status(&self) -> DriverStatus {
        self.status.borrow().clone()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WaitSummary {
    pub stopped: usize,
    pub failed: usize,
}

/// Runs one driver per account. Drivers share nothing but the challenge gate.
pub struct Scheduler {
    settings: Arc<Settings>,
    accounts: Vec<AccountConfig>,
    gate: Arc<ChallengeGate>,
    factory: Box<dyn ClientFactory>,
    root: CancellationToken,
    drivers: HashMap<String, DriverHandle>,
}

pub type SharedScheduler = Arc<tokio::sync::Mutex<Scheduler>>;

impl Scheduler {
    pub fn new(
        settings: Arc<Settings>,
        accounts: Vec<AccountConfig>,
        gate: Arc<ChallengeGate>,
        factory: Box<dyn ClientFactory>,
    ) -> Self {
        Self {
            settings,
            accounts,
            gate,
            factory,
            root: CancellationToken::new(),
            drivers: HashMap::new(),
        }
    }

    /// Cancelling this token stops every driver
    pub fn root_token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Start every account that is neither running nor failed. Failed
    /// accounts are only restarted by name.
    pub fn start_all(&mut self) -> usize {
        let mut started = 0;

        for account in self.accounts.clone() {
            if let Some(handle) = self.drivers.get(&account.session_name) {
                if handle.is_running() {
                    continue;
                }

                if let DriverStatus::Failed(reason) = handle.status() {
                    warn!(
                        "{} | Not restarting failed account: {}",
                        account.session_name, reason
                    );
                    continue;
                }
            }

            let handle = self.spawn(&account);
            self.drivers.insert(account.session_name, handle);
            started += 1;
        }

        info!("Started {} drivers", started);
        started
    }

    pub fn start(&mut self, name: &str) -> Result<(), SchedulerError> {
        let account = self
            .accounts
            .iter()
            .find(|account| account.session_name == name)
            .cloned()
            .ok_or_else(|| SchedulerError::UnknownAccount(name.to_string()))?;

        if self
            .drivers
            .get(name)
            .map(DriverHandle::is_running)
            .unwrap_or(false)
        {
            return Err(SchedulerError::AlreadyRunning(name.to_string()));
        }

        let handle = self.spawn(&account);
        self.drivers.insert(account.session_name, handle);

        Ok(())
    }

    /// Signal one driver and wait for it to wind down
    pub async fn stop(&mut self, name: &str) -> Result<(), SchedulerError> {
        if !self.accounts.iter().any(|account| account.session_name == name) {
            return Err(SchedulerError::UnknownAccount(name.to_string()));
        }

        let handle = self
            .drivers
            .get_mut(name)
            .filter(|handle| handle.is_running())
            .ok_or_else(|| SchedulerError::NotRunning(name.to_string()))?;

        handle.cancel.cancel();

        if let Some(task) = handle.task.take() {
            if let Err(error) = task.await {
                error!("{} | Driver task aborted: {}", name, error);
            }
        }

        Ok(())
    }

    pub async fn stop_all(&mut self) -> usize {
        let running: Vec<String> = self
            .drivers
            .iter()
            .filter(|(_, handle)| handle.is_running())
            .map(|(name, _)| name.clone())
            .collect();

        for name in &running {
            if let Some(handle) = self.drivers.get(name) {
                handle.cancel.cancel();
            }
        }

        for name in &running {
            if let Err(error) = self.stop_task(name).await {
                warn!("{} | {}", name, error);
            }
        }

        running.len()
    }

    async fn stop_task(&mut self, name: &str) -> Result<(), SchedulerError> {
        let task = self
            .drivers
            .get_mut(name)
            .and_then(|handle| handle.task.take())
            .ok_or_else(|| SchedulerError::NotRunning(name.to_string()))?;

        if let Err(error) = task.await {
            error!("{} | Driver task aborted: {}", name, error);
        }

        Ok(())
    }

    /// Last reported status per account in configuration order, `None` for
    /// accounts never started
    pub fn statuses(&self) -> Vec<(String, Option<DriverStatus>)> {
        self.accounts
            .iter()
            .map(|account| {
                let status = self
                    .drivers
                    .get(&account.session_name)
                    .map(DriverHandle::status);

                (account.session_name.clone(), status)
            })
            .collect()
    }

    /// Join every driver task and log how they ended
    pub async fn wait(&mut self) -> WaitSummary {
        let mut summary = WaitSummary::default();

        for account in &self.accounts {
            let name = &account.session_name;
            let handle = match self.drivers.get_mut(name) {
                Some(handle) => handle,
                None => continue,
            };

            if let Some(task) = handle.task.take() {
                if let Err(error) = task.await {
                    error!("{} | Driver task aborted: {}", name, error);
                    summary.failed += 1;
                    continue;
                }
            }

            match handle.status() {
                DriverStatus::Failed(reason) => {
                    warn!("{} | Failed: {}", name, reason);
                    summary.failed += 1;
                }
                _ => summary.stopped += 1,
            }
        }

        info!(
            "All drivers finished | Stopped: {} | Failed: {}",
            summary.stopped, summary.failed
        );

        summary
    }

    /// Stop everything and release the challenge solver
    pub async fn shutdown(&mut self) -> WaitSummary {
        self.root.cancel();
        let summary = self.wait().await;
        self.release_solver().await;

        summary
    }

    pub async fn release_solver(&self) {
        if let Err(error) = self.gate.shutdown().await {
            warn!("Could not shut down the challenge solver: {}", error);
        }
    }

    /// A driver that cannot even be built is reported as failed without a task
    fn spawn(&self, account: &AccountConfig) -> DriverHandle {
        let cancel = self.root.child_token();

        match self.build_driver(account, cancel.clone()) {
            Ok(driver) => {
                let status = driver.subscribe();
                let task = tokio::spawn(driver.run());

                DriverHandle {
                    cancel,
                    status,
                    task: Some(task),
                }
            }
            Err(error) => {
                error!("{} | Cannot start driver: {}", account.session_name, error);
                let (_, status) = watch::channel(DriverStatus::Failed(error.to_string()));

                DriverHandle {
                    cancel,
                    status,
                    task: None,
                }
            }
        }
    }

    fn build_driver(
        &self,
        account: &AccountConfig,
        cancel: CancellationToken,
    ) -> Result<AccountDriver, DriverError> {
        let init_data = session::init_data_from_auth_url(&account.session_name, &account.auth_url)?;

        let account_id = session::account_id(&init_data).unwrap_or_else(|| {
            warn!(
                "{} | No user id in init data, requests go without Content-Id",
                account.session_name
            );
            0
        });

        let client = self.factory.build(&self.settings, account, account_id)?;

        Ok(AccountDriver::new(
            account.session_name.clone(),
            account.auth_url.clone(),
            init_data,
            Arc::clone(&self.settings),
            client,
            Arc::clone(&self.gate),
            cancel,
        )
        .with_proxy(account.proxy.clone()))
    }
}
