//! Correlation declarations: which message value maps to which saga property.

use std::marker::PhantomData;
use std::sync::Arc;

use pipeline::{BusMessage, CorrelationLookup, LogicalMessage};
use saga_storage::correlation_key;
use serde::Serialize;
use serde_json::Value;

type Extractor = Arc<dyn Fn(&LogicalMessage) -> anyhow::Result<Option<Value>> + Send + Sync>;

/// One declared correlation.
#[derive(Clone)]
pub struct Correlation {
    message_type: &'static str,
    property_name: String,
    extract: Extractor,
}

impl Correlation {
    pub fn message_type(&self) -> &'static str {
        self.message_type
    }

    pub fn property_name(&self) -> &str {
        &self.property_name
    }

    /// Computes the lookup for `message`, or `None` when the message
    /// carries no value for this correlation.
    pub fn lookup(&self, message: &LogicalMessage) -> anyhow::Result<Option<CorrelationLookup>> {
        let Some(raw) = (self.extract)(message)? else {
            return Ok(None);
        };
        Ok(correlation_key(&raw).map(|value| CorrelationLookup {
            property_name: self.property_name.clone(),
            value,
            raw,
        }))
    }
}

impl std::fmt::Debug for Correlation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlation")
            .field("message_type", &self.message_type)
            .field("property_name", &self.property_name)
            .finish()
    }
}

/// Collects the correlations a saga declares in `correlate_messages`.
///
/// Property names are dotted paths into the serialized saga data; `id`
/// matches the saga identity.
pub struct CorrelationConfig<D> {
    correlations: Vec<Correlation>,
    _data: PhantomData<fn() -> D>,
}

impl<D> CorrelationConfig<D> {
    pub(crate) fn new() -> Self {
        Self {
            correlations: Vec::new(),
            _data: PhantomData,
        }
    }

    /// Correlates messages of type `M` on a value computed from the body.
    pub fn correlate<M, V, F>(&mut self, message_value: F, property_name: &str) -> &mut Self
    where
        M: BusMessage,
        V: Serialize,
        F: Fn(&M) -> V + Send + Sync + 'static,
    {
        let extract: Extractor = Arc::new(move |message: &LogicalMessage| {
            let typed: M = message.decode()?;
            Ok(Some(serde_json::to_value(message_value(&typed))?))
        });
        self.correlations.push(Correlation {
            message_type: M::message_type(),
            property_name: property_name.to_string(),
            extract,
        });
        self
    }

    /// Correlates messages of type `M` on a header value.
    pub fn correlate_header<M: BusMessage>(&mut self, header: &str, property_name: &str) -> &mut Self {
        let header = header.to_string();
        let extract: Extractor = Arc::new(move |message: &LogicalMessage| {
            Ok(message.header(&header).map(|v| Value::String(v.to_string())))
        });
        self.correlations.push(Correlation {
            message_type: M::message_type(),
            property_name: property_name.to_string(),
            extract,
        });
        self
    }

    pub(crate) fn into_correlations(self) -> Vec<Correlation> {
        self.correlations
    }
}
