//! File conversion server library
//!
//! Accepts an uploaded file plus a target format, stores the upload under a
//! random identifier, routes it to an external converter by MIME type or
//! extension, and returns the converted file.
//!
//! ## Module Overview
//!
//! - `api`: axum routes for `/healthz` and `/convert`
//! - `config`: environment-driven configuration
//! - `converter`: runs an invocation and interprets success or failure
//! - `error`: client-visible error taxonomy
//! - `job`: per-request job model and pipeline states
//! - `reaper`: optional TTL cleanup of stored files
//! - `router`: the conversion pipeline
//! - `routing`: ordered classification table and converter strategies
//! - `runner`: external process execution with timeout
//! - `telemetry`: OpenTelemetry integration and structured logging
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use convert_server::{
//!     config::Config,
//!     router::{ConversionRequest, ConversionRouter},
//!     runner::SystemRunner,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let router = ConversionRouter::new(Config::default(), Arc::new(SystemRunner::new()))?;
//!
//!     let upload = tokio::fs::File::open("photo.png").await?;
//!     let converted = router
//!         .run(ConversionRequest {
//!             upload,
//!             filename: Some("photo.png".to_string()),
//!             content_type: Some("image/png".to_string()),
//!             target: "jpg".to_string(),
//!         })
//!         .await?;
//!
//!     println!("{} -> {}", converted.download_name, converted.path.display());
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod converter;
pub mod error;
pub mod job;
pub mod reaper;
pub mod router;
pub mod routing;
pub mod runner;
pub mod telemetry;
