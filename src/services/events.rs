//! Order event fan-out over NATS.

use crate::domain::events::OrderEvent;

/// Publishes committed order events. Without a NATS client events are only
/// logged; a publish failure never fails the request that caused it.
#[derive(Clone, Default)]
pub struct EventPublisher {
    nats: Option<async_nats::Client>,
}

impl EventPublisher {
    pub fn new(nats: Option<async_nats::Client>) -> Self {
        Self { nats }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub async fn publish(&self, event: OrderEvent) {
        let Some(client) = &self.nats else {
            tracing::debug!(?event, "order event");
            return;
        };
        let payload = match serde_json::to_vec(&event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode order event");
                return;
            }
        };
        if let Err(e) = client.publish(event.subject(), payload.into()).await {
            tracing::warn!(error = %e, subject = %event.subject(), "failed to publish order event");
        }
    }
}
