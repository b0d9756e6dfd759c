//! Conversion between logical messages and transport messages.

use common::headers;
use pipeline::LogicalMessage;
use transport::TransportMessage;

use crate::error::{BusError, Result};

/// Content type written by [`JsonSerializer`].
pub const JSON_CONTENT_TYPE: &str = "application/json;charset=utf-8";

/// Turns logical messages into bytes and back. Headers pass through as-is.
pub trait Serializer: Send + Sync {
    fn serialize(&self, message: &LogicalMessage) -> Result<TransportMessage>;

    fn deserialize(&self, message: &TransportMessage) -> Result<LogicalMessage>;
}

/// UTF-8 JSON bodies.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, message: &LogicalMessage) -> Result<TransportMessage> {
        let mut message_headers = message.headers().clone();
        message_headers.insert(headers::CONTENT_TYPE.to_string(), JSON_CONTENT_TYPE.to_string());
        let body = serde_json::to_vec(message.body())?;
        Ok(TransportMessage::new(message_headers, body))
    }

    fn deserialize(&self, message: &TransportMessage) -> Result<LogicalMessage> {
        if let Some(content_type) = message.header(headers::CONTENT_TYPE)
            && !content_type.starts_with("application/json")
        {
            return Err(BusError::UnsupportedContentType(content_type.to_string()));
        }
        let body = serde_json::from_slice(message.body())?;
        Ok(LogicalMessage::new(message.headers().clone(), body))
    }
}
