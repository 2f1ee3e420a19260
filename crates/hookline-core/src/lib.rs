//! Core domain models and storage layer.
//!
//! Provides strongly-typed domain primitives, the delivery outcome state
//! machine, and the subscription/delivery-log store traits with Postgres and
//! in-memory backends. All other crates depend on these foundational types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod store;
pub mod time;

pub use error::{CoreError, Result};
pub use models::{
    DeliveryJob, DeliveryLog, DeliveryOutcome, Subscription, SubscriptionId, WebhookId,
};
pub use store::{DeliveryLogStore, Storage, SubscriptionStore};
pub use time::{Clock, RealClock};
