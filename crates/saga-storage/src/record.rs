use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Revision, SagaId};

/// Reserved correlation property that matches on the saga identity itself.
pub const ID_PROPERTY: &str = "id";

/// A persisted saga instance.
///
/// The saga state lives in `data` as JSON so storages stay independent of
/// the concrete saga data types. Identity and revision are kept outside the
/// data and are managed by the storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaRecord {
    /// Identity of the instance. Immutable after creation.
    pub id: SagaId,

    /// Optimistic concurrency guard. 0 for an instance never persisted.
    pub revision: Revision,

    /// Logical saga data type, e.g. "OrderSagaData".
    pub saga_type: String,

    /// The serialized saga state.
    pub data: Value,
}

impl SagaRecord {
    /// Creates a record for a fresh instance at the initial revision.
    pub fn new(id: SagaId, saga_type: impl Into<String>, data: Value) -> Self {
        Self {
            id,
            revision: Revision::initial(),
            saga_type: saga_type.into(),
            data,
        }
    }

    /// Deserializes the saga state.
    pub fn to_data<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }

    /// Returns the lookup key this record exposes for a correlation property.
    ///
    /// [`ID_PROPERTY`] yields the saga id. Other names are resolved as a
    /// dotted path into the data. Missing or null values yield `None`.
    pub fn correlation_value(&self, property_name: &str) -> Option<String> {
        if property_name == ID_PROPERTY {
            return Some(self.id.to_string());
        }
        lookup_path(&self.data, property_name).and_then(correlation_key)
    }
}

/// A property of a saga data type used to find instances.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationProperty {
    /// Saga data type the property belongs to.
    pub saga_type: String,

    /// Dotted path of the property inside the saga data.
    pub property_name: String,
}

impl CorrelationProperty {
    /// Creates a correlation property.
    pub fn new(saga_type: impl Into<String>, property_name: impl Into<String>) -> Self {
        Self {
            saga_type: saga_type.into(),
            property_name: property_name.into(),
        }
    }

    /// Returns true for the reserved saga id property.
    pub fn is_id(&self) -> bool {
        self.property_name == ID_PROPERTY
    }
}

/// Normalizes a JSON value into the string form used for correlation.
///
/// Strings are used as-is so a header value and a body field compare equal.
/// Other scalars and composites use their JSON text. Null has no key.
pub fn correlation_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Resolves a dotted path such as `customer.id` inside a JSON object.
pub fn lookup_path<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(data, |current, segment| current.get(segment))
}

/// Writes `value` at a dotted path, creating intermediate objects.
///
/// Fails when an intermediate segment exists but is not an object.
pub fn assign_path(data: &mut Value, path: &str, value: Value) -> bool {
    let mut current = data;
    let mut segments = path.split('.').peekable();

    while let Some(segment) = segments.next() {
        if current.is_null() {
            *current = Value::Object(serde_json::Map::new());
        }
        let Some(object) = current.as_object_mut() else {
            return false;
        };
        if segments.peek().is_none() {
            object.insert(segment.to_string(), value);
            return true;
        }
        current = object
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }

    false
}
