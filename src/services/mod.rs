pub mod bucket_store;
pub mod file_data_service;
pub mod reconciler;
pub mod url_signer;
