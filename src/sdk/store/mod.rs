//! 远端树存储与快照监听适配

pub mod listener;
pub mod memory;
pub mod path;
pub mod query;
pub mod remote;
pub mod snapshot;

pub use listener::{subscribe, subscribe_list, subscribe_query, subscribe_value, SnapshotStream};
pub use memory::MemoryStore;
pub use path::{paths, DataPath};
pub use query::{QueryCursor, StoreQuery};
pub use remote::{ListenerRegistration, RemoteStore, ValueListener};
pub use snapshot::DataSnapshot;
