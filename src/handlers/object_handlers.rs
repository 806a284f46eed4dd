//! Direct object transfer through signed URLs.
//! Streams object bodies to avoid buffering in memory and delegates storage
//! concerns to `BucketStore`.

use crate::{
    errors::AppError,
    services::{file_data_service::FileDataService, url_signer::SignedMethod},
};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use futures::StreamExt;
use serde::Deserialize;
use std::io;
use tokio_util::io::ReaderStream;

/// Query parameters carried by every signed URL.
#[derive(Debug, Deserialize)]
pub struct SignedQuery {
    pub expires: i64,
    pub sig: String,
}

/// `PUT /objects/{bucket}/{*key}` — upload through a signed URL.
pub async fn upload_object(
    State(service): State<FileDataService>,
    Path((bucket, key)): Path<(String, String)>,
    Query(q): Query<SignedQuery>,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    service
        .signer
        .verify(SignedMethod::Put, &bucket, &key, q.expires, &q.sig, Utc::now())?;

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other));

    let stored = service
        .buckets
        .put_object_stream(&bucket, &key, stream)
        .await?;

    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", stored.etag)) {
        headers.insert(header::ETAG, value);
    }
    Ok((StatusCode::OK, headers))
}

/// `GET /objects/{bucket}/{*key}` — download through a signed URL.
pub async fn get_object(
    State(service): State<FileDataService>,
    Path((bucket, key)): Path<(String, String)>,
    Query(q): Query<SignedQuery>,
) -> Result<Response, AppError> {
    service
        .signer
        .verify(SignedMethod::Get, &bucket, &key, q.expires, &q.sig, Utc::now())?;

    let (file, len) = service.buckets.open_object(&bucket, &key).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    Ok(response)
}
