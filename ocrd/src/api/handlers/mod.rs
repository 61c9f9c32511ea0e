//! HTTP request handlers for all API endpoints.
//!
//! # Handler Modules
//!
//! - [`ocr`]: Image upload, staging, and text extraction

pub mod ocr;
