//! HTTP surface of the webhook delivery service.
//!
//! Exposes webhook ingestion, subscription CRUD with cache write-through,
//! the delivery status read API, and the health endpoint. Handlers receive
//! their dependencies through `AppState`, constructed once by the
//! composition root.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use hookline_cache::SubscriptionCache;
use hookline_core::Storage;
use hookline_queue::JobStore;

pub mod config;
pub mod error;
pub mod handlers;
pub mod server;

pub use config::Config;
pub use error::ApiError;
pub use server::{create_router, start_server};

/// Shared dependencies for all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Durable subscription and delivery-log storage.
    pub storage: Storage,

    /// Cache-aside subscription lookup.
    pub cache: Arc<SubscriptionCache>,

    /// Delivery job queue.
    pub jobs: Arc<dyn JobStore>,
}

impl AppState {
    /// Bundles the handler dependencies.
    pub fn new(storage: Storage, cache: Arc<SubscriptionCache>, jobs: Arc<dyn JobStore>) -> Self {
        Self { storage, cache, jobs }
    }
}
