//! Defines routes for the file-data API and signed object transfer.
//!
//! ## Structure
//! - **File data** (caller identified by `X-User-ID`)
//!   - `POST   /files/data/fetch` — batch fetch playlists / ML metadata
//!   - `GET    /files/data/fetch` — single fetch
//!   - `PUT    /files/data` — register an uploaded derived object
//!   - `DELETE /files/data` — tombstone a derived object
//!   - `GET    /files/data/preview` — signed preview download URL
//!   - `GET    /files/data/preview-upload-url` — signed preview upload URL
//!
//! - **Signed transfer**
//!   - `PUT|GET /objects/{bucket}/{*key}?expires=&sig=`

use crate::{
    handlers::{
        file_data_handlers::{
            delete_file_data, fetch_file_data, fetch_files_data, preview_upload_url, preview_url,
            put_file_data,
        },
        health_handlers::{healthz, readyz},
        object_handlers::{get_object, upload_object},
    },
    services::file_data_service::FileDataService,
};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Build the router. Handlers share the `FileDataService` state.
pub fn routes() -> Router<FileDataService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/files/data/fetch", post(fetch_files_data).get(fetch_file_data))
        .route("/files/data", put(put_file_data).delete(delete_file_data))
        .route("/files/data/preview", get(preview_url))
        .route("/files/data/preview-upload-url", get(preview_upload_url))
        .route("/objects/{bucket}/{*key}", put(upload_object).get(get_object))
}
