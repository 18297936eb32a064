pub mod retention;
pub mod storage;
pub mod token_service;
pub mod upload_service;
