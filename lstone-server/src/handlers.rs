/// HTTP handlers
///
/// Core calls are blocking (SQLite and Redis clients are synchronous), so
/// every one of them runs on the blocking thread pool.

use crate::metrics;
use crate::models::*;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use lstone_core::Error;
use tracing::{error, info};

/// Longest URL accepted for shortening
pub const MAX_URL_LENGTH: usize = 2048;

/// Run a core call on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> lstone_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(AppError::Join)?
        .map_err(AppError::Core)
}

fn validate_long_url(url: &str) -> Result<(), AppError> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| AppError::BadRequest("long_url must be an http or https URL".to_string()))?;

    if rest.is_empty() || rest.starts_with('/') {
        return Err(AppError::BadRequest("long_url has no host".to_string()));
    }
    if url.len() > MAX_URL_LENGTH {
        return Err(AppError::BadRequest(format!(
            "long_url exceeds {} bytes",
            MAX_URL_LENGTH
        )));
    }
    if url.chars().any(char::is_whitespace) {
        return Err(AppError::BadRequest("long_url contains whitespace".to_string()));
    }
    Ok(())
}

/// Allocate a token for a long URL
pub async fn shorten_url(
    State(state): State<AppState>,
    Json(request): Json<ShortenRequest>,
) -> Result<(StatusCode, Json<ShortenResponse>), AppError> {
    validate_long_url(&request.long_url)?;

    let expiration_days = request
        .expiration_days
        .unwrap_or(state.config.default_expiration_days);
    let budget = state.config.budget;
    let allocator = state.allocator.clone();
    let long_url = request.long_url.clone();

    let timer = metrics::ALLOCATION_DURATION_SECONDS.start_timer();
    let counted =
        blocking(move || Ok(allocator.allocate_counted(&long_url, expiration_days, budget))).await;
    timer.observe_duration();
    metrics::CAPACITY_ESTIMATE.set(state.allocator.capacity().get().min(i64::MAX as u64) as i64);

    // Every claim call counts, whether or not the allocation succeeded
    let result = counted.and_then(|(result, attempts)| {
        metrics::CLAIM_ATTEMPTS_TOTAL.inc_by(attempts);
        result.map_err(AppError::Core)
    });

    let allocation = match result {
        Ok(allocation) => allocation,
        Err(e) => {
            let outcome = match &e {
                AppError::Core(Error::DeadlineExceeded { .. }) => "deadline_exceeded",
                _ => "error",
            };
            metrics::ALLOCATIONS_TOTAL.with_label_values(&[outcome]).inc();
            return Err(e);
        }
    };

    let outcome = if allocation.reclaimed { "reclaimed" } else { "created" };
    metrics::ALLOCATIONS_TOTAL.with_label_values(&[outcome]).inc();

    info!(
        token = %allocation.token,
        attempts = allocation.attempts,
        outcome,
        "Created short URL"
    );

    let token = allocation.token.into_string();
    Ok((
        StatusCode::CREATED,
        Json(ShortenResponse {
            short_url: format!("{}/{}", state.public_url, token),
            token,
            long_url: request.long_url,
            expiration_days,
            attempts: allocation.attempts,
        }),
    ))
}

async fn read_live(state: &AppState, token: String) -> Result<String, AppError> {
    let backend = state.backend.clone();
    let result = blocking(move || backend.read(&token)).await;
    record_backend_op("read", &result);
    result
}

/// Redirect to the live URL behind a token
pub async fn redirect_url(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Redirect, AppError> {
    let long_url = read_live(&state, token).await?;
    Ok(Redirect::temporary(&long_url))
}

/// Look up a live token without redirecting
pub async fn get_url(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<LookupResponse>, AppError> {
    let long_url = read_live(&state, token.clone()).await?;
    Ok(Json(LookupResponse { token, long_url }))
}

/// Replace a token's expiration window
pub async fn reassign_expiration(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(request): Json<ReassignRequest>,
) -> Result<StatusCode, AppError> {
    let backend = state.backend.clone();
    let days = request.expiration_days;
    let target = token.clone();
    let result = blocking(move || backend.reassign(&target, days)).await;
    record_backend_op("reassign", &result);
    result?;

    info!(token = %token, expiration_days = days, "Reassigned expiration");
    Ok(StatusCode::NO_CONTENT)
}

/// Delete a token; deleting an unknown token succeeds
pub async fn delete_url(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<StatusCode, AppError> {
    let backend = state.backend.clone();
    let target = token.clone();
    let result = blocking(move || backend.remove(&target)).await;
    record_backend_op("remove", &result);
    result?;

    info!(token = %token, "Deleted short URL");
    Ok(StatusCode::NO_CONTENT)
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        backend: state.backend.kind().to_string(),
        token_length: state.config.token_length,
        budget_ms: state.config.budget.as_millis() as u64,
        capacity_estimate: state.allocator.capacity().get(),
    })
}

pub async fn metrics_handler() -> String {
    metrics::encode_metrics().unwrap_or_else(|e| {
        error!("Failed to encode metrics: {}", e);
        String::from("# Error encoding metrics\n")
    })
}

fn record_backend_op<T>(operation: &str, result: &Result<T, AppError>) {
    let status = match result {
        Ok(_) => "success",
        Err(AppError::Core(e)) => metrics::error_label(e),
        Err(_) => "error",
    };
    metrics::BACKEND_OPERATIONS_TOTAL
        .with_label_values(&[operation, status])
        .inc();
}

/// Application errors
#[derive(Debug)]
pub enum AppError {
    Core(Error),
    BadRequest(String),
    Join(tokio::task::JoinError),
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        AppError::Core(err)
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Core(Error::InvalidArgument(_)) => StatusCode::BAD_REQUEST,
            AppError::Core(Error::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Core(Error::DeadlineExceeded { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Core(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Core(e) => e.code(),
            AppError::BadRequest(_) => "INVALID_ARGUMENT",
            AppError::Join(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::Core(err) => err.to_string(),
            AppError::BadRequest(msg) => msg.clone(),
            AppError::Join(err) => format!("Worker task failed: {}", err),
        };

        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            error!(code = self.code(), "Request failed: {}", message);
        }

        let body = Json(ErrorResponse {
            error: message,
            code: self.code().to_string(),
        });

        (status, body).into_response()
    }
}
