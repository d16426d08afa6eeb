//! The transfer pipeline: two block watchers (one per chain), the
//! confirmation verifier and the periodic controller, all sharing only
//! the [`tngate_store::Storage`].

pub mod controller;
pub mod policy;
pub mod verifier;
pub mod watcher;

pub use controller::{Controller, ControllerConfig, HealthSnapshot, SharedHealth};
pub use verifier::{Verifier, VerifyOutcome};
pub use watcher::{Watcher, WatcherConfig};

#[cfg(test)]
mod tests;
