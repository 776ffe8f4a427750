/// Domain-specific error types for the strategy engine.
/// Failures are terminal for the single request that triggered them:
/// - Bad inputs are rejected before any computation, never coerced
/// - A non-finite intermediate halts the computation instead of leaking NaN
/// - Retries belong to the ingestion collaborator, never to the engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("numerical divergence: {0}")]
    Numerical(String),

    #[error("market data unavailable: {0}")]
    MarketData(String),

    #[error("config error: {0}")]
    Config(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Validation error naming the offending input, so the caller can act on it.
    pub fn invalid(field: &str, value: f64, constraint: &str) -> Self {
        EngineError::Validation(format!("{field}={value} must be {constraint}"))
    }
}

impl axum::response::IntoResponse for EngineError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;
        let status = match &self {
            EngineError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::Numerical(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EngineError::MarketData(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = axum::Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
