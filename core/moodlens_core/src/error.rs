use thiserror::Error;

/// Failures of one classifier round-trip. None of these escape a pipeline run.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("classifier transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("classifier returned http {0}")]
    Status(u16),

    #[error("invalid classifier response: {0}")]
    Protocol(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid selector '{selector}': {reason}")]
    Selector { selector: String, reason: String },

    #[error("cannot read site profiles from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid site profile file {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
