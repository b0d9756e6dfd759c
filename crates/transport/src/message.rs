use std::collections::HashMap;

use common::{MessageId, headers};
use serde::{Deserialize, Serialize};

/// Header map carried by every message. Keys are unique.
pub type Headers = HashMap<String, String>;

/// A message as the transport sees it: string headers plus an opaque body.
///
/// Immutable once constructed; transports and their decorators hand it
/// around unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportMessage {
    headers: Headers,
    body: Vec<u8>,
}

impl TransportMessage {
    /// Creates a transport message.
    pub fn new(headers: Headers, body: Vec<u8>) -> Self {
        Self { headers, body }
    }

    /// Returns the headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns a single header value.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Returns the serialized body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Returns the stable message identity, if the sender assigned one.
    pub fn message_id(&self) -> Option<MessageId> {
        self.header(headers::MESSAGE_ID).map(MessageId::from)
    }

    /// Splits the message into headers and body.
    pub fn into_parts(self) -> (Headers, Vec<u8>) {
        (self.headers, self.body)
    }
}
