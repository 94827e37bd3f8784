//! Hanzi bulk import
//!
//! Ingests ZIP archives of handwritten character images, recognizes each one
//! through a handwriting OCR service, and produces a spreadsheet of
//! character records plus a failure log, reporting progress per task.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
