use thiserror::Error;

/// Setup-time failures. Anything that goes wrong inside a single delivery or a
/// single poll cycle is logged and swallowed instead of surfacing here.
#[derive(Debug, Error)]
pub enum Error {
    #[error("API key not set. Use 'sapliy auth login' or set SAPLIY_API_KEY")]
    MissingApiKey,

    #[error("could not determine home directory to locate .sapliy.yaml")]
    HomeDirUnavailable,

    #[error("failed to load configuration: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("failed to bind webhook listener on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("webhook listener stopped unexpectedly: {0}")]
    Serve(#[source] std::io::Error),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("event request failed: {0}")]
    Fetch(#[from] reqwest::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
