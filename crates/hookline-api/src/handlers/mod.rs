//! HTTP request handlers.

pub mod health;
pub mod ingest;
pub mod status;
pub mod subscriptions;

pub use health::health_check;
pub use ingest::ingest_webhook;
pub use status::{get_webhook_status, list_subscription_attempts};
pub use subscriptions::{
    create_subscription, delete_subscription, list_subscriptions, read_subscription,
    update_subscription,
};
