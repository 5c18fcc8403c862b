pub mod listener;
pub mod models;
pub mod service;

pub use listener::{CallHomeListener, EmptyCallHomeListener};
pub use models::{CallHomeRequest, CallHomeStatus, ClearedRequest};
pub use service::{AutoClearHandle, CallHomeCoordinator};
