//! Well-known message header keys.
//!
//! Headers are plain string pairs carried next to the message body. The
//! keys below are assigned by the outgoing pipeline and read by the
//! incoming pipeline; integrators may add any other keys.

/// Stable identity of the message, preserved across redeliveries.
pub const MESSAGE_ID: &str = "msg-id";

/// Logical type name of the message body.
pub const MESSAGE_TYPE: &str = "msg-type";

/// Content type of the serialized body.
pub const CONTENT_TYPE: &str = "msg-content-type";

/// Application-level correlation key, defaulting to the id of the message
/// that caused this one to be sent.
pub const CORRELATION_ID: &str = "msg-correlation-id";

/// Address replies should be sent to.
pub const RETURN_ADDRESS: &str = "msg-return-address";

/// Address of the endpoint that sent the message.
pub const SENDER_ADDRESS: &str = "msg-sender-address";

/// RFC 3339 timestamp of when the message was sent.
pub const SENT_TIME: &str = "msg-sent-time";
