pub mod error;
pub mod memory;
pub mod postgres;
pub mod record;
pub mod store;
pub mod tap;

pub use common::{Revision, SagaId};
pub use error::{Result, SagaStorageError};
pub use memory::InMemorySagaStorage;
pub use postgres::PostgresSagaStorage;
pub use record::{
    CorrelationProperty, ID_PROPERTY, SagaRecord, assign_path, correlation_key, lookup_path,
};
pub use store::{SagaStorage, SagaStorageExt};
pub use tap::{PersistedSagas, SagaStorageObserver, SagaStorageTap};
