//! Outbound integrations

pub mod alerts;

pub use alerts::{
    AlertPublisher, PgAlertPublisher, RecordingAlertPublisher, TracingAlertPublisher,
    WebhookAlertPublisher,
};
