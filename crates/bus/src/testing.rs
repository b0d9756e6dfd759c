//! Test doubles shared by the unit tests of this crate.

use std::sync::Arc;

use async_trait::async_trait;
use pipeline::{Destination, LogicalMessage, MessageSender};
use transport::TransactionContext;

/// Accepts and drops every message.
pub(crate) struct NullSender;

#[async_trait]
impl MessageSender for NullSender {
    async fn send(
        &self,
        _destination: Destination,
        _message: LogicalMessage,
        _transaction: &Arc<TransactionContext>,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}
