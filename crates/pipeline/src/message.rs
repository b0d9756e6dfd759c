use common::{MessageId, headers};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use transport::Headers;

/// A message type that can travel on the bus.
///
/// The type name is written to the message-type header when sending and
/// used to activate handlers when receiving.
pub trait BusMessage: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable logical name of the message type.
    fn message_type() -> &'static str;
}

/// A message with a deserialized body, as handlers and steps see it.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalMessage {
    headers: Headers,
    body: Value,
}

impl LogicalMessage {
    /// Creates a logical message from headers and a JSON body.
    pub fn new(headers: Headers, body: Value) -> Self {
        Self { headers, body }
    }

    /// Creates a logical message from a typed message, stamping its type.
    pub fn from_message<M: BusMessage>(message: &M) -> Result<Self, serde_json::Error> {
        let mut h = Headers::new();
        h.insert(headers::MESSAGE_TYPE.to_string(), M::message_type().to_string());
        Ok(Self::new(h, serde_json::to_value(message)?))
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Returns the logical type name, if stamped.
    pub fn message_type(&self) -> Option<&str> {
        self.header(headers::MESSAGE_TYPE)
    }

    pub fn message_id(&self) -> Option<MessageId> {
        self.header(headers::MESSAGE_ID).map(MessageId::from)
    }

    /// Deserializes the body into a typed message.
    pub fn decode<M: BusMessage>(&self) -> Result<M, serde_json::Error> {
        M::deserialize(&self.body)
    }

    pub fn into_parts(self) -> (Headers, Value) {
        (self.headers, self.body)
    }
}
