use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Session gateway unreachable: {0}")]
    GatewayUnreachable(String),
    #[error("Session gateway rejected the request: {0}")]
    GatewayRejected(String),
    #[error("Corrupt timer snapshot: {0}")]
    PersistenceCorrupt(String),
}

impl InfraError {
    pub fn is_gateway_failure(&self) -> bool {
        matches!(self, Self::GatewayUnreachable(_) | Self::GatewayRejected(_))
    }
}
