use thiserror::Error;

/// Problems with the process or account configuration. Always fatal for
/// whatever was being configured.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required setting '{field}'")]
    Missing { field: String },

    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid account on line {line}: {reason}")]
    InvalidAccount { line: usize, reason: String },

    #[error("no accounts found in {path}")]
    NoAccounts { path: String },

    #[error("invalid auth url for {session}: {reason}")]
    InvalidAuthUrl { session: String, reason: String },

    #[error("cannot build http client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

/// Reasons a driver terminates in the failed state.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("session rejected: {reason}")]
    AuthInvalid { reason: String },

    #[error("authentication failed {attempts} times in a row")]
    AuthExhausted { attempts: u32 },

    #[error(transparent)]
    Config(#[from] ConfigError),
}
