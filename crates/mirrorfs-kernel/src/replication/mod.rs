//! Background replication.
//!
//! Mirror mutations become [`ReplicationTask`]s on a [`ReplicationQueue`];
//! one [`BackendWorker`] applies them to a [`StoreOps`](crate::store::StoreOps)
//! in order. The [`StartupReplicator`] runs on the same worker first and
//! fills the mirror from the backend.

mod queue;
mod startup;
mod task;
mod worker;

pub use queue::{ReplicationQueue, TaskReceiver, channel};
pub use startup::{StartupReplicator, StartupReport};
pub use task::{BackendKey, ReplicationTask};
pub use worker::{BackendWorker, ReplicationStats, StatsSnapshot};
