//! HTTP handlers for file-data records: sidecar fetch, registration,
//! deletion, and preview URLs. Validation and storage live in
//! `FileDataService`.

use crate::{
    errors::AppError,
    handlers::identity::{ClientPackage, UserId},
    models::contracts::{
        DeleteFileData, Entity, GetFileData, GetFilesData, GetFilesDataResponse,
        GetPreviewUrlRequest, PreviewUploadUrl, PreviewUploadUrlRequest, PreviewUrl,
        PutFileDataRequest,
    },
    services::file_data_service::{FileDataService, now_micros},
};
use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use chrono::Utc;

/// `POST /files/data/fetch` — batch fetch of playlists or ML metadata.
pub async fn fetch_files_data(
    State(service): State<FileDataService>,
    UserId(user_id): UserId,
    Json(req): Json<GetFilesData>,
) -> Result<Json<GetFilesDataResponse>, AppError> {
    let resp = service.get_files_data(user_id, &req).await?;
    Ok(Json(resp))
}

/// `GET /files/data/fetch?fileID=&type=`
pub async fn fetch_file_data(
    State(service): State<FileDataService>,
    UserId(user_id): UserId,
    Query(req): Query<GetFileData>,
) -> Result<Json<Entity>, AppError> {
    let entity = service.get_file_data(user_id, &req).await?;
    Ok(Json(entity))
}

/// `PUT /files/data` — register an uploaded derived object.
pub async fn put_file_data(
    State(service): State<FileDataService>,
    UserId(user_id): UserId,
    ClientPackage(client): ClientPackage,
    Json(req): Json<PutFileDataRequest>,
) -> Result<StatusCode, AppError> {
    service
        .put_file_data(user_id, &client, &req, Utc::now())
        .await?;
    Ok(StatusCode::OK)
}

/// `DELETE /files/data?fileID=&type=`
pub async fn delete_file_data(
    State(service): State<FileDataService>,
    UserId(user_id): UserId,
    Query(req): Query<DeleteFileData>,
) -> Result<StatusCode, AppError> {
    service
        .mark_deleted(user_id, req.file_id, req.object_type, now_micros())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /files/data/preview?fileID=&type=&suffix=`
pub async fn preview_url(
    State(service): State<FileDataService>,
    UserId(user_id): UserId,
    Query(req): Query<GetPreviewUrlRequest>,
) -> Result<Json<PreviewUrl>, AppError> {
    let url = service.get_preview_url(user_id, &req, Utc::now()).await?;
    Ok(Json(url))
}

/// `GET /files/data/preview-upload-url?fileID=&type=`
pub async fn preview_upload_url(
    State(service): State<FileDataService>,
    UserId(user_id): UserId,
    Query(req): Query<PreviewUploadUrlRequest>,
) -> Result<Json<PreviewUploadUrl>, AppError> {
    let upload = service.preview_upload_url(user_id, &req, Utc::now())?;
    Ok(Json(upload))
}
