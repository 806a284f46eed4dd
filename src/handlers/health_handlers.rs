//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the record store and the hot bucket

use crate::services::file_data_service::FileDataService;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::fs;
use uuid::Uuid;

/// `GET /healthz`
///
/// Liveness only; never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// 1. Queries the `file_data` table, so a missing migration is reported.
/// 2. Writes, reads back and removes a probe file in the hot bucket.
///
/// HTTP 200 when all checks pass, HTTP 503 otherwise.
pub async fn readyz(State(service): State<FileDataService>) -> impl IntoResponse {
    let mut checks: BTreeMap<&'static str, CheckStatus> = BTreeMap::new();
    checks.insert("sqlite", check_records(&service).await.into());
    checks.insert("hot_bucket", check_hot_bucket(&service).await.into());

    let ready = checks.values().all(|c| c.ok);
    let status = if ready {
        StatusCode::OK
    } else {
        tracing::warn!(?checks, "readiness check failed");
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = ReadyResponse {
        status: if ready { "ok" } else { "error" }.into(),
        checks,
    };
    (status, Json(body))
}

async fn check_records(service: &FileDataService) -> Result<(), String> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM file_data WHERE sync_locked_till < 0")
        .fetch_one(&*service.db)
        .await
        .map(|_| ())
        .map_err(|e| format!("error: {}", e))
}

async fn check_hot_bucket(service: &FileDataService) -> Result<(), String> {
    let dir = service.buckets.base_path.join(&service.policy.hot_bucket);
    fs::create_dir_all(&dir)
        .await
        .map_err(|e| format!("could not create bucket dir: {}", e))?;
    let probe = dir.join(format!(".readyz-{}", Uuid::new_v4()));

    let outcome = match fs::write(&probe, b"readyz").await {
        Ok(()) => match fs::read(&probe).await {
            Ok(bytes) if bytes == b"readyz" => Ok(()),
            Ok(_) => Err("probe content mismatch".to_string()),
            Err(e) => Err(format!("could not read probe: {}", e)),
        },
        Err(e) => Err(format!("could not write probe: {}", e)),
    };
    // best-effort cleanup
    let _ = fs::remove_file(&probe).await;
    outcome
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: BTreeMap<&'static str, CheckStatus>,
}

#[derive(Serialize, Debug)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl From<Result<(), String>> for CheckStatus {
    fn from(result: Result<(), String>) -> Self {
        Self {
            ok: result.is_ok(),
            error: result.err(),
        }
    }
}
