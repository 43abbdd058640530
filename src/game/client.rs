use std::time::Duration;

use async_trait::async_trait;
use log::trace;
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, ORIGIN, REFERER},
    StatusCode,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use super::{
    models::{ErrorBody, LoginResponse, MaybePlayerEnvelope, OriginIp, PlayerEnvelope},
    BoostKind, GameApi, GameError, GameResult, Player, PriceTables, Profile, Tier,
};
use crate::{
    challenge::SolvedChallenge,
    config::{AccountConfig, Settings},
    error::ConfigError,
};

const WEB_APP_ORIGIN: &str = "https://app.tapswap.club";
const PROXY_CHECK_URL: &str = "https://httpbin.org/ip";
const PROXY_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_ERROR_MESSAGE_LEN: usize = 200;

/// Anti-replay value sent with every tap batch. Derived only from the
/// request time and the account id; `None` when the id is unknown.
pub fn content_id(timestamp_ms: i64, account_id: i64) -> Option<i64> {
    if account_id == 0 {
        return None;
    }

    Some(timestamp_ms.rem_euclid(account_id.abs()))
}

/// HTTP implementation of [`GameApi`] for a single account
#[derive(Debug, Clone)]
pub struct GameClient {
    http: reqwest::Client,
    base_url: String,
    account_id: i64,
}

impl GameClient {
    /// Build the per-account client, routed through the account proxy if any
    pub fn new(
        settings: &Settings,
        account: &AccountConfig,
        account_id: i64,
        user_agent: &str,
    ) -> Result<Self, ConfigError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert(ORIGIN, HeaderValue::from_static(WEB_APP_ORIGIN));
        headers.insert(REFERER, HeaderValue::from_static("https://app.tapswap.club/"));
        headers.insert("x-app", HeaderValue::from_static("tapswap_server"));

        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(user_agent)
            .timeout(settings.request_timeout);

        if let Some(proxy) = &account.proxy {
            let proxy = reqwest::Proxy::all(proxy.as_str()).map_err(ConfigError::HttpClient)?;
            builder = builder.proxy(proxy);
        }

        let http = builder.build().map_err(ConfigError::HttpClient)?;

        Ok(Self {
            http,
            base_url: settings.api_base_url.clone(),
            account_id,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// POST a JSON body and decode the JSON answer
    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        token: Option<&str>,
        body: &Value,
        headers: &[(&'static str, String)],
    ) -> GameResult<T> {
        let mut request = self.http.post(self.url(path)).json(body);

        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        for (name, value) in headers {
            request = request.header(*name, value.as_str());
        }

        trace!("POST {}", path);

        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        let text = response.text().await.map_err(transport)?;

        classify(status, &text)?;

        serde_json::from_str(&text).map_err(|e| GameError::Protocol {
            status: status.as_u16(),
            message: format!("malformed response body: {}", e),
        })
    }
}

fn transport(error: reqwest::Error) -> GameError {
    if error.is_timeout() {
        GameError::Transport(format!("timed out: {}", error))
    } else {
        GameError::Transport(error.to_string())
    }
}

/// Map a non-success status to the error taxonomy
fn classify(status: StatusCode, body: &str) -> GameResult<()> {
    if status.is_success() {
        return Ok(());
    }

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(GameError::Unauthorized {
            status: status.as_u16(),
        });
    }

    Err(GameError::Protocol {
        status: status.as_u16(),
        message: error_message(body),
    })
}

fn error_message(body: &str) -> String {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|body| body.message.or(body.error))
        .unwrap_or_else(|| body.to_string());

    message.chars().take(MAX_ERROR_MESSAGE_LEN).collect()
}

/// Numeric answers go over the wire as numbers
fn answer_value(answer: &str) -> Value {
    answer
        .parse::<i64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::from(answer))
}

#[async_trait]
impl GameApi for GameClient {
    async fn login(&self, init_data: &str, solved: &SolvedChallenge) -> GameResult<Profile> {
        let mut body = json!({ "init_data": init_data, "referrer": "" });
        if !solved.answer.is_empty() {
            body["chr"] = answer_value(&solved.answer);
        }

        let mut headers = Vec::new();
        if !solved.client_version.is_empty() {
            headers.push(("x-cv", solved.client_version.clone()));
        }
        if !solved.touch.is_empty() {
            headers.push(("x-touch", solved.touch.clone()));
        }

        let response: LoginResponse = self
            .post("/api/account/login", None, &body, &headers)
            .await?;

        match (response.access_token, response.player) {
            (Some(access_token), Some(player)) => Ok(Profile {
                access_token,
                player,
                prices: PriceTables::from_conf(&response.conf.unwrap_or_default()),
                bot_shares: response.bot_shares,
            }),
            _ => match response.chq {
                Some(challenge) => Err(GameError::ChallengeRequired { challenge }),
                None => Err(GameError::Protocol {
                    status: StatusCode::OK.as_u16(),
                    message: "login response without access token".to_string(),
                }),
            },
        }
    }

    async fn submit_taps(&self, token: &str, taps: u64) -> GameResult<Player> {
        let timestamp = chrono::Utc::now().timestamp_millis();
        let body = json!({ "taps": taps, "time": timestamp });

        let mut headers = Vec::new();
        if let Some(id) = content_id(timestamp, self.account_id) {
            headers.push(("Content-Id", id.to_string()));
        }

        let envelope: PlayerEnvelope = self
            .post("/api/player/submit_taps", Some(token), &body, &headers)
            .await?;

        Ok(envelope.player)
    }

    async fn apply_boost(&self, token: &str, boost: BoostKind) -> GameResult<Option<Player>> {
        let body = json!({ "type": boost.as_str() });

        let envelope: MaybePlayerEnvelope = self
            .post("/api/player/apply_boost", Some(token), &body, &[])
            .await?;

        Ok(envelope.player)
    }

    async fn upgrade(&self, token: &str, tier: Tier) -> GameResult<Option<Player>> {
        let body = json!({ "type": tier.as_str() });

        let envelope: MaybePlayerEnvelope = self
            .post("/api/player/upgrade", Some(token), &body, &[])
            .await?;

        Ok(envelope.player)
    }

    async fn claim_reward(&self, token: &str, task_id: &str) -> GameResult<Option<Player>> {
        let body = json!({ "task_id": task_id });

        let envelope: MaybePlayerEnvelope = self
            .post("/api/player/claim_reward", Some(token), &body, &[])
            .await?;

        Ok(envelope.player)
    }

    async fn check_proxy(&self) -> GameResult<String> {
        let response = self
            .http
            .get(PROXY_CHECK_URL)
            .timeout(PROXY_CHECK_TIMEOUT)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        let text = response.text().await.map_err(transport)?;
        classify(status, &text)?;

        let origin: OriginIp = serde_json::from_str(&text).map_err(|e| GameError::Protocol {
            status: status.as_u16(),
            message: e.to_string(),
        })?;

        Ok(origin.origin)
    }
}
