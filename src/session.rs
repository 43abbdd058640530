//! Turning the web-app authorization URL handed over by the Telegram side
//! into the pieces the game API needs.

use serde::Deserialize;

use crate::error::ConfigError;

const WEB_APP_DATA_MARKER: &str = "tgWebAppData=";
const WEB_APP_VERSION_MARKER: &str = "&tgWebAppVersion";

#[derive(Deserialize)]
struct WebAppUser {
    id: i64,
}

/// Extract the `tgWebAppData` payload from an authorization URL.
///
/// The payload is percent-encoded twice inside the URL fragment.
pub fn init_data_from_auth_url(session: &str, auth_url: &str) -> Result<String, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidAuthUrl {
        session: session.to_string(),
        reason: reason.to_string(),
    };

    let (_, data) = auth_url
        .split_once(WEB_APP_DATA_MARKER)
        .ok_or_else(|| invalid("missing tgWebAppData"))?;

    let data = data
        .split_once(WEB_APP_VERSION_MARKER)
        .map(|(data, _)| data)
        .unwrap_or(data);

    if data.is_empty() {
        return Err(invalid("empty tgWebAppData"));
    }

    let once = urlencoding::decode(data).map_err(|e| invalid(&e.to_string()))?;
    let twice = urlencoding::decode(&once).map_err(|e| invalid(&e.to_string()))?;

    Ok(twice.into_owned())
}

/// Numeric user id carried in the `user` field of the init data
pub fn account_id(init_data: &str) -> Option<i64> {
    init_data
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "user")
        .and_then(|(_, user)| serde_json::from_str::<WebAppUser>(user).ok())
        .map(|user| user.id)
}
