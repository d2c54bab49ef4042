//! Low-stock alert delivery
//!
//! The ledger evaluates alerts after a successful mutation and hands them to an
//! [`AlertPublisher`]. Delivery failures are logged by the caller and never
//! affect the stock operation that produced the alert.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::Sha256;
use sqlx::PgPool;

use shared::StockAlert;

type HmacSha256 = Hmac<Sha256>;

/// Sink for stock alerts
#[async_trait]
pub trait AlertPublisher: Send + Sync {
    async fn publish(&self, alert: &StockAlert) -> anyhow::Result<()>;
}

/// Writes alerts to the log
#[derive(Debug, Clone, Default)]
pub struct TracingAlertPublisher;

#[async_trait]
impl AlertPublisher for TracingAlertPublisher {
    async fn publish(&self, alert: &StockAlert) -> anyhow::Result<()> {
        tracing::warn!(
            branch_id = alert.branch_id,
            ingredient_id = alert.ingredient_id,
            severity = alert.severity.as_str(),
            available = %alert.available,
            threshold = %alert.threshold,
            unit = %alert.unit_code,
            "Low stock alert"
        );
        Ok(())
    }
}

/// Appends alerts to the `stock_alerts` table
#[derive(Clone)]
pub struct PgAlertPublisher {
    db: PgPool,
}

impl PgAlertPublisher {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AlertPublisher for PgAlertPublisher {
    async fn publish(&self, alert: &StockAlert) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_alerts (branch_id, ingredient_id, severity, available, threshold, unit_code, raised_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(alert.branch_id)
        .bind(alert.ingredient_id)
        .bind(alert.severity.as_str())
        .bind(alert.available)
        .bind(alert.threshold)
        .bind(&alert.unit_code)
        .bind(alert.raised_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }
}

/// POSTs alerts as JSON, signed with HMAC-SHA256 in `X-Signature`
#[derive(Clone)]
pub struct WebhookAlertPublisher {
    client: Client,
    url: String,
    secret: Option<String>,
}

impl WebhookAlertPublisher {
    pub fn new(url: String, secret: Option<String>) -> Self {
        Self {
            client: Client::new(),
            url,
            secret,
        }
    }

    /// Base64 HMAC-SHA256 of `body` under `secret`
    pub fn sign(secret: &str, body: &[u8]) -> anyhow::Result<String> {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| anyhow::anyhow!("invalid webhook secret: {e}"))?;
        mac.update(body);
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }
}

#[async_trait]
impl AlertPublisher for WebhookAlertPublisher {
    async fn publish(&self, alert: &StockAlert) -> anyhow::Result<()> {
        let body = serde_json::to_vec(alert)?;

        let mut request = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(secret) = &self.secret {
            request = request.header("X-Signature", Self::sign(secret, &body)?);
        }

        let response = request.body(body).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("alert webhook returned {status}: {text}");
        }
        Ok(())
    }
}

/// Keeps published alerts in memory; used by tests
#[derive(Clone, Default)]
pub struct RecordingAlertPublisher {
    alerts: Arc<Mutex<Vec<StockAlert>>>,
}

impl RecordingAlertPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<StockAlert> {
        self.alerts.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AlertPublisher for RecordingAlertPublisher {
    async fn publish(&self, alert: &StockAlert) -> anyhow::Result<()> {
        self.alerts
            .lock()
            .map_err(|_| anyhow::anyhow!("alert recorder poisoned"))?
            .push(alert.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_is_deterministic() {
        let a = WebhookAlertPublisher::sign("secret", b"{\"a\":1}").unwrap();
        let b = WebhookAlertPublisher::sign("secret", b"{\"a\":1}").unwrap();
        let c = WebhookAlertPublisher::sign("other", b"{\"a\":1}").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(BASE64.decode(&a).is_ok());
    }
}
