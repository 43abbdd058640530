use std::{process, sync::Arc};

use log::{error, info, LevelFilter};
use telegram_bot::Api;
use tokio::sync::Mutex;

use crate::{
    challenge::{BrowserSolver, ChallengeGate},
    config::Settings,
    scheduler::{HttpClientFactory, Scheduler, SharedScheduler},
};

mod account;
mod challenge;
mod config;
mod error;
mod game;
mod scheduler;
mod session;
mod telegram;
#[cfg(test)]
mod testing;

fn init_logger() {
    let mut builder = pretty_env_logger::formatted_timed_builder();
    builder.filter_level(LevelFilter::Info);

    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }

    builder.init();
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    init_logger();

    let settings = match Settings::from_env() {
        Ok(settings) => Arc::new(settings),
        Err(error) => {
            error!("Invalid configuration: {}", error);
            process::exit(1);
        }
    };

    let accounts = match config::load_accounts(&settings.accounts_path) {
        Ok(accounts) => accounts,
        Err(error) => {
            error!("{}", error);
            process::exit(1);
        }
    };

    let gate = Arc::new(ChallengeGate::new(Box::new(BrowserSolver::new(
        settings.webdriver_url.clone(),
    ))));

    let scheduler = Scheduler::new(
        Arc::clone(&settings),
        accounts,
        gate,
        Box::new(HttpClientFactory),
    );
    let root = scheduler.root_token();
    let scheduler: SharedScheduler = Arc::new(Mutex::new(scheduler));

    {
        let root = root.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl+C, stopping all accounts...");
                    root.cancel();
                }
                Err(error) => error!("Unable to listen for shutdown signal: {}", error),
            }
        });
    }

    scheduler.lock().await.start_all();

    let summary = match settings.telegram.clone() {
        Some(telegram) => {
            let api = Api::new(telegram.bot_token);

            tokio::select! {
                _ = telegram::handle_messages(&api, scheduler.clone(), telegram.admin_id) => {
                    info!("Telegram update stream ended");
                }
                _ = root.cancelled() => {}
            }

            scheduler.lock().await.shutdown().await
        }
        None => {
            // Ends on Ctrl+C or once every driver has failed
            let mut scheduler = scheduler.lock().await;
            let summary = scheduler.wait().await;
            scheduler.release_solver().await;
            summary
        }
    };

    if summary.failed > 0 {
        process::exit(1);
    }
}
