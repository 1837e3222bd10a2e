use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Missing required config field: \"{0}\"")]
    MissingField(&'static str),

    #[error("Configuration error: {0}")]
    ConfigInvalid(String),

    #[error("Invalid time range: \"to\" ({to}) must come chronologically after \"from\" ({from})")]
    InvalidRange { from: String, to: String },

    #[error("Invalid query step {step} for target \"{expr}\"")]
    InvalidStep { expr: String, step: f64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status code from {endpoint}: {status} - {body}")]
    UnexpectedStatus {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Dashboard not found: {slug}: {message}")]
    DashboardNotFound { slug: String, message: String },

    #[error("Malformed dashboard document at {path}: {reason}")]
    MalformedDocument { path: String, reason: String },

    #[error("Unexpected query result type: got \"{got}\", want \"matrix\"")]
    UnexpectedResultType { got: String },

    #[error("Query against datasource {datasource} failed: {message}")]
    QueryFailed { datasource: String, message: String },

    #[error("Unsupported datasource {name} of type \"{kind}\": {reason}")]
    UnsupportedDatasource {
        name: String,
        kind: String,
        reason: String,
    },

    #[error("Snapshot publish failed with status {status}: {body}")]
    PublishFailed { status: u16, body: String },

    #[error("Malformed snapshot response: {0}")]
    MalformedResponse(String),

    #[error("Snapshot operation cancelled")]
    Cancelled,
}

impl SnapshotError {
    pub fn malformed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        SnapshotError::MalformedDocument {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SnapshotError>;

impl From<anyhow::Error> for SnapshotError {
    fn from(err: anyhow::Error) -> Self {
        SnapshotError::ConfigInvalid(err.to_string())
    }
}
