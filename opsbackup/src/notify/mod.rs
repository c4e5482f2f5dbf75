//! Outbound notifications.
//!
//! Posts run outcomes to whichever webhook channels are configured and
//! optionally pushes metrics to a Prometheus Pushgateway. Every delivery
//! is best-effort: a dead webhook must never fail a backup.

use crate::config::NotifyConfig;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Notification severity, mapped per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    fn emoji(&self) -> &'static str {
        match self {
            Severity::Info => ":white_check_mark:",
            Severity::Warning => ":warning:",
            Severity::Critical => ":rotating_light:",
        }
    }

    fn discord_color(&self) -> u32 {
        match self {
            Severity::Info => 0x2eccfa,
            Severity::Warning => 0xf7ca18,
            Severity::Critical => 0xd91e18,
        }
    }

    fn pagerduty_severity(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

fn slack_payload(instance: &str, status: &str, message: &str, severity: Severity) -> Value {
    json!({
        "text": format!("{} [{instance}] {status}: {message}", severity.emoji()),
    })
}

fn discord_payload(instance: &str, status: &str, message: &str, severity: Severity) -> Value {
    json!({
        "embeds": [{
            "title": format!("[{instance}] {status}"),
            "description": message,
            "color": severity.discord_color(),
        }],
    })
}

fn pagerduty_payload(
    routing_key: &str,
    instance: &str,
    status: &str,
    message: &str,
    severity: Severity,
) -> Value {
    json!({
        "routing_key": routing_key,
        "event_action": "trigger",
        "payload": {
            "summary": format!("[{instance}] {status}: {message}"),
            "source": instance,
            "severity": severity.pagerduty_severity(),
        },
    })
}

/// Plain-text exposition lines for the Pushgateway.
fn metrics_body(operation: &str, success: bool, duration_secs: f64, artifact_bytes: u64) -> String {
    format!(
        "# TYPE opsbackup_last_run_success gauge\n\
         opsbackup_last_run_success{{operation=\"{operation}\"}} {}\n\
         # TYPE opsbackup_last_run_duration_seconds gauge\n\
         opsbackup_last_run_duration_seconds{{operation=\"{operation}\"}} {duration_secs}\n\
         # TYPE opsbackup_last_run_artifact_bytes gauge\n\
         opsbackup_last_run_artifact_bytes{{operation=\"{operation}\"}} {artifact_bytes}\n",
        if success { 1 } else { 0 },
    )
}

/// Fans one message out to all configured channels.
pub struct Notifier {
    config: NotifyConfig,
    instance: String,
    client: reqwest::Client,
}

impl Notifier {
    pub fn new(config: NotifyConfig, instance: &str) -> Self {
        Notifier {
            config,
            instance: instance.to_string(),
            client: reqwest::Client::new(),
        }
    }

    async fn post(&self, channel: &str, url: &str, payload: &Value) {
        let result = self
            .client
            .post(url)
            .timeout(WEBHOOK_TIMEOUT)
            .json(payload)
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => {
                debug!(channel, "Notification delivered");
            }
            Ok(resp) => {
                warn!(channel, status = %resp.status(), "Notification rejected");
            }
            Err(e) => {
                warn!(channel, error = %e, "Notification failed");
            }
        }
    }

    /// Send a status message to every configured channel.
    pub async fn send(&self, status: &str, message: &str, severity: Severity) {
        if let Some(url) = &self.config.slack_webhook_url {
            let payload = slack_payload(&self.instance, status, message, severity);
            self.post("slack", url, &payload).await;
        }
        if let Some(url) = &self.config.discord_webhook_url {
            let payload = discord_payload(&self.instance, status, message, severity);
            self.post("discord", url, &payload).await;
        }
        if let Some(key) = &self.config.pagerduty_routing_key {
            // PagerDuty only hears about problems
            if severity != Severity::Info {
                let payload = pagerduty_payload(key, &self.instance, status, message, severity);
                self.post("pagerduty", "https://events.pagerduty.com/v2/enqueue", &payload)
                    .await;
            }
        }
    }

    /// Push run metrics to the Pushgateway, if configured.
    pub async fn push_metrics(
        &self,
        operation: &str,
        success: bool,
        duration_secs: f64,
        artifact_bytes: u64,
    ) {
        let Some(base) = &self.config.pushgateway_url else {
            return;
        };
        let url = format!(
            "{}/metrics/job/opsbackup/instance/{}",
            base.trim_end_matches('/'),
            self.instance
        );
        let body = metrics_body(operation, success, duration_secs, artifact_bytes);

        let result = self
            .client
            .put(&url)
            .timeout(WEBHOOK_TIMEOUT)
            .header("content-type", "text/plain")
            .body(body)
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => debug!("Metrics pushed"),
            Ok(resp) => warn!(status = %resp.status(), "Pushgateway rejected metrics"),
            Err(e) => warn!(error = %e, "Pushgateway unreachable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slack_payload_carries_status_and_instance() {
        let payload = slack_payload("webapp-prod", "failed", "backup_database: pg_dump exited with 1", Severity::Critical);
        let text = payload["text"].as_str().unwrap();
        assert!(text.contains("[webapp-prod]"));
        assert!(text.contains("failed"));
        assert!(text.contains("pg_dump"));
    }

    #[test]
    fn test_discord_payload_shape() {
        let payload = discord_payload("webapp-prod", "success", "all components ok", Severity::Info);
        assert_eq!(payload["embeds"][0]["title"], "[webapp-prod] success");
        assert_eq!(payload["embeds"][0]["color"], 0x2eccfa);
    }

    #[test]
    fn test_pagerduty_payload_shape() {
        let payload = pagerduty_payload("rk-123", "webapp-prod", "failed", "restore failed", Severity::Critical);
        assert_eq!(payload["routing_key"], "rk-123");
        assert_eq!(payload["event_action"], "trigger");
        assert_eq!(payload["payload"]["severity"], "critical");
        assert_eq!(payload["payload"]["source"], "webapp-prod");
    }

    #[test]
    fn test_metrics_body_exposition() {
        let body = metrics_body("backup", true, 12.5, 4096);
        assert!(body.contains("opsbackup_last_run_success{operation=\"backup\"} 1"));
        assert!(body.contains("opsbackup_last_run_duration_seconds{operation=\"backup\"} 12.5"));
        assert!(body.contains("opsbackup_last_run_artifact_bytes{operation=\"backup\"} 4096"));
    }

    /// Unreachable endpoints must never error out of `send`.
    #[tokio::test]
    async fn test_send_is_best_effort() {
        let config = NotifyConfig {
            slack_webhook_url: Some("http://127.0.0.1:1/hook".into()),
            discord_webhook_url: None,
            pagerduty_routing_key: None,
            pushgateway_url: Some("http://127.0.0.1:1".into()),
        };
        let notifier = Notifier::new(config, "test");
        notifier.send("failed", "boom", Severity::Critical).await;
        notifier.push_metrics("backup", false, 1.0, 0).await;
    }
}
