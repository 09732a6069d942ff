//! Core library for the reviewcast review-to-image service.
//!
//! Ingests customer reviews from review platforms, deduplicates and
//! persists them, renders each review as a branded social-media image
//! through a shared headless browser, optionally shares the result to a
//! chat workspace, and exposes an HTTP API for push, poll, and on-demand
//! rendering.

pub mod browser;
pub mod cache;
pub mod chat;
pub mod config;
pub mod error;
pub mod import;
pub mod models;
pub mod pipeline;
pub mod render;
pub mod scheduler;
pub mod server;
pub mod source_facebook;
pub mod source_generic;
pub mod source_google;
pub mod source_yelp;
pub mod sources;
pub mod store;
pub mod template;

pub use config::{load_config, Config};
pub use error::{ApiError, ApiResult};
pub use models::{Review, ReviewDraft};
pub use server::{build_router, AppState};
pub use store::ReviewStore;
