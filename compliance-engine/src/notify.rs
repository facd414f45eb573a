//! NotificationSink trait and implementations.
//!
//! Sinks receive the emergency alerts that a scan newly surfaced. Delivery is
//! advisory: the monitor logs and discards any error a sink returns.

use std::io::Write;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::error;

use crate::alert::Alert;

/// Queue that [`AmqpNotificationSink`] publishes to.
pub const EMERGENCY_QUEUE: &str = "pool.emergency_alert";

// ------------------------------------------------------------------ //
//  Trait                                                              //
// ------------------------------------------------------------------ //

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, alerts: &[Alert]) -> Result<()>;
}

// ------------------------------------------------------------------ //
//  FakeNotificationSink (for tests)                                   //
// ------------------------------------------------------------------ //

/// In-memory sink that records every batch it receives.
#[derive(Debug, Default, Clone)]
pub struct FakeNotificationSink {
    pub batches: Arc<Mutex<Vec<Vec<Alert>>>>,
    fail: bool,
}

impl FakeNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose every call fails after recording the batch.
    pub fn failing() -> Self {
        Self { fail: true, ..Self::default() }
    }

    pub fn snapshot(&self) -> Vec<Vec<Alert>> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for FakeNotificationSink {
    async fn notify(&self, alerts: &[Alert]) -> Result<()> {
        self.batches.lock().unwrap().push(alerts.to_vec());
        if self.fail {
            anyhow::bail!("notification backend unavailable");
        }
        Ok(())
    }
}

// ------------------------------------------------------------------ //
//  TerminalBellSink                                                   //
// ------------------------------------------------------------------ //

/// Rings the terminal bell (BEL, 0x07) once per batch.
#[derive(Debug, Default)]
pub struct TerminalBellSink;

#[async_trait]
impl NotificationSink for TerminalBellSink {
    async fn notify(&self, alerts: &[Alert]) -> Result<()> {
        if alerts.is_empty() {
            return Ok(());
        }
        ring_bell().context("terminal bell write failed")
    }
}

fn ring_bell() -> std::io::Result<()> {
    let mut out = std::io::stdout().lock();
    out.write_all(b"\x07")?;
    out.flush()
}

// ------------------------------------------------------------------ //
//  LogNotificationSink                                                //
// ------------------------------------------------------------------ //

/// Emits one `error!` event per alert.
#[derive(Debug, Default)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn notify(&self, alerts: &[Alert]) -> Result<()> {
        for a in alerts {
            error!(
                alert_id = %a.id,
                facility_id = %a.facility_id,
                chemical = ?a.chemical,
                value = ?a.value,
                "EMERGENCY: {}",
                a.message
            );
        }
        Ok(())
    }
}

// ------------------------------------------------------------------ //
//  AmqpNotificationSink (production)                                  //
// ------------------------------------------------------------------ //

/// Publishes a `PoolEmergencyAlert.v1` JSON event per alert to RabbitMQ.
pub struct AmqpNotificationSink {
    _conn:   lapin::Connection,
    channel: lapin::Channel,
}

impl AmqpNotificationSink {
    /// Connect and declare the durable emergency queue.
    pub async fn connect(url: &str) -> Result<Self> {
        let conn = lapin::Connection::connect(url, lapin::ConnectionProperties::default())
            .await
            .context("AMQP connect failed")?;
        let channel = conn.create_channel().await?;
        channel
            .queue_declare(
                EMERGENCY_QUEUE,
                lapin::options::QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                lapin::types::FieldTable::default(),
            )
            .await?;
        Ok(Self { _conn: conn, channel })
    }
}

pub fn emergency_event(alert: &Alert) -> serde_json::Value {
    serde_json::json!({
        "type":          "PoolEmergencyAlert.v1",
        "alert_id":      &alert.id,
        "facility_id":   &alert.facility_id,
        "facility_name": &alert.facility_name,
        "severity":      alert.severity.as_str(),
        "chemical":      alert.chemical.map(|c| c.key()),
        "value":         alert.value,
        "message":       &alert.message,
        "reading_at":    alert.timestamp.to_rfc3339(),
    })
}

#[async_trait]
impl NotificationSink for AmqpNotificationSink {
    async fn notify(&self, alerts: &[Alert]) -> Result<()> {
        for alert in alerts {
            let body = serde_json::to_vec(&emergency_event(alert))?;
            self.channel
                .basic_publish(
                    "",
                    EMERGENCY_QUEUE,
                    lapin::options::BasicPublishOptions::default(),
                    &body,
                    lapin::BasicProperties::default().with_content_type("application/json".into()),
                )
                .await
                .with_context(|| format!("publish of alert {} failed", alert.id))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::alert::{AlertSeverity, AlertTrigger};
    use crate::standards::Parameter;

    fn emergency() -> Alert {
        Alert::new(
            "POOL-004",
            "Therapy Pool",
            AlertTrigger::Chemical(Parameter::FreeChlorine),
            AlertSeverity::Emergency,
            "closure required".into(),
            Utc::now(),
            Some(0.3),
        )
    }

    #[tokio::test]
    async fn fake_records_batches() {
        let sink = FakeNotificationSink::new();
        sink.notify(&[emergency()]).await.unwrap();
        assert_eq!(sink.snapshot().len(), 1);
        assert_eq!(sink.snapshot()[0][0].facility_id, "POOL-004");
    }

    #[tokio::test]
    async fn failing_fake_still_records() {
        let sink = FakeNotificationSink::failing();
        assert!(sink.notify(&[emergency()]).await.is_err());
        assert_eq!(sink.snapshot().len(), 1);
    }

    #[test]
    fn emergency_event_payload() {
        let event = emergency_event(&emergency());
        assert_eq!(event["type"], "PoolEmergencyAlert.v1");
        assert_eq!(event["chemical"], "free_chlorine");
        assert_eq!(event["severity"], "emergency");
        assert_eq!(event["value"], 0.3);
    }
}
