//! Message handlers for the consumer binary.

use async_trait::async_trait;
use basekit_messaging::{Delivery, HandlerError, MessageHandler};
use serde_json::{Map, Value};
use tracing::info;

#[cfg(test)]
#[path = "handlers_tests.rs"]
mod tests;

/// Accepts any JSON object and logs it.
///
/// Application handlers decode into their own types and call a service
/// resolved from the container; this one only proves the transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonObjectHandler;

#[async_trait]
impl MessageHandler for JsonObjectHandler {
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError> {
        let message: Map<String, Value> =
            delivery.json().map_err(|e| HandlerError::InvalidMessage {
                message: e.to_string(),
            })?;

        info!(
            delivery_tag = delivery.tag(),
            redelivered = delivery.redelivered(),
            message = %serde_json::Value::Object(message),
            "Processing message"
        );
        Ok(())
    }
}
