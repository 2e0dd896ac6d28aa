use async_trait::async_trait;
use log::{info, warn};
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::json;
use std::{collections::VecDeque, sync::Arc};
use tokio::{sync::RwLock, time::Duration};

use crate::error::SinkError;
use crate::models::AlertEvent;
use crate::ports::AlertSink;

pub const ALERT_FEED_CAPACITY: usize = 100;

/// Prints a banner for every alert through the logger.
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    async fn notify(&self, event: &AlertEvent) -> Result<(), SinkError> {
        if event.dosage.is_empty() {
            info!("ALARM: Time to take {} (#{})", event.name, event.medication_id);
        } else {
            info!("ALARM: Time to take {} ({}) (#{})", event.name, event.dosage, event.medication_id);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// The most recent alerts, newest last, for clients polling `/alerts`.
#[derive(Clone, Default)]
pub struct AlertFeed {
    recent: Arc<RwLock<VecDeque<AlertEvent>>>,
}

impl AlertFeed {
    pub fn new() -> AlertFeed {
        AlertFeed::default()
    }

    pub async fn recent(&self) -> Vec<AlertEvent> {
        self.recent.read().await.iter().cloned().collect()
    }
}

#[async_trait]
impl AlertSink for AlertFeed {
    async fn notify(&self, event: &AlertEvent) -> Result<(), SinkError> {
        let mut recent = self.recent.write().await;
        recent.push_back(event.clone());
        while recent.len() > ALERT_FEED_CAPACITY {
            recent.pop_front();
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "feed"
    }
}

/// POSTs each alert as JSON to an external endpoint.
pub struct WebhookSink {
    url: String,
    bearer_token: Option<String>,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(url: String, bearer_token: Option<String>, timeout: Duration) -> Result<WebhookSink, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(WebhookSink { url, bearer_token, client })
    }

    fn headers(&self) -> Result<HeaderMap, SinkError> {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        if let Some(token) = &self.bearer_token {
            let value = HeaderValue::from_str(&format!("bearer {token}"))
                .map_err(|e| SinkError::Delivery(format!("bad webhook token: {e}")))?;
            headers.insert("authorization", value);
        }
        Ok(headers)
    }
}

fn webhook_body(event: &AlertEvent) -> String {
    json!({
        "event": "medication-due",
        "medicationId": event.medication_id,
        "firedAt": event.fired_at,
        "alert": {
            "title": format!("Time to take {}", event.name),
            "body": event.dosage,
        }
    }).to_string()
}

#[async_trait]
impl AlertSink for WebhookSink {
    async fn notify(&self, event: &AlertEvent) -> Result<(), SinkError> {
        let res = self.client.post(&self.url)
            .headers(self.headers()?)
            .body(webhook_body(event))
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(SinkError::Delivery(format!("webhook responded {status}: {body}")));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

/// Delivers to every inner sink; a failing sink does not stop the rest.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn AlertSink>>) -> FanoutSink {
        FanoutSink { sinks }
    }
}

#[async_trait]
impl AlertSink for FanoutSink {
    async fn notify(&self, event: &AlertEvent) -> Result<(), SinkError> {
        let mut last_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.notify(event).await {
                warn!("fanout:: sink {} failed for medication {}: {}", sink.name(), event.medication_id, e);
                last_err = Some(e);
            }
        }
        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn name(&self) -> &str {
        "fanout"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn event(id: u64) -> AlertEvent {
        AlertEvent {
            medication_id: id,
            name: "Lisinopril".into(),
            dosage: "10mg".into(),
            fired_at: NaiveDateTime::parse_from_str("2024-01-01T08:00", "%Y-%m-%dT%H:%M").unwrap(),
        }
    }

    struct BrokenSink;

    #[async_trait]
    impl AlertSink for BrokenSink {
        async fn notify(&self, _event: &AlertEvent) -> Result<(), SinkError> {
            Err(SinkError::Delivery("unreachable".into()))
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    #[tokio::test]
    async fn feed_keeps_only_the_latest_alerts() {
        let feed = AlertFeed::new();
        for id in 0..(ALERT_FEED_CAPACITY as u64 + 5) {
            feed.notify(&event(id)).await.unwrap();
        }
        let recent = feed.recent().await;
        assert_eq!(recent.len(), ALERT_FEED_CAPACITY);
        assert_eq!(recent.first().unwrap().medication_id, 5);
        assert_eq!(recent.last().unwrap().medication_id, ALERT_FEED_CAPACITY as u64 + 4);
    }

    #[tokio::test]
    async fn fanout_delivers_past_a_failing_sink() {
        let feed = AlertFeed::new();
        let fanout = FanoutSink::new(vec![Arc::new(BrokenSink), Arc::new(feed.clone()), Arc::new(LogSink)]);

        let result = fanout.notify(&event(1)).await;
        assert!(matches!(result, Err(SinkError::Delivery(_))));
        assert_eq!(feed.recent().await.len(), 1);
    }

    #[test]
    fn webhook_body_carries_the_alert() {
        let body: serde_json::Value = serde_json::from_str(&webhook_body(&event(7))).unwrap();
        assert_eq!(body["medicationId"], 7);
        assert_eq!(body["alert"]["title"], "Time to take Lisinopril");
        assert_eq!(body["alert"]["body"], "10mg");
        assert_eq!(body["firedAt"], "2024-01-01T08:00:00");
    }

    #[tokio::test]
    async fn webhook_to_closed_port_is_a_sink_error() {
        let sink = WebhookSink::new("http://127.0.0.1:9/alerts".into(), Some("secret".into()),
            Duration::from_secs(2)).unwrap();
        assert!(sink.notify(&event(1)).await.is_err());
    }
}
