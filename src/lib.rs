//! Job run lifecycle and resumption engine.
//!
//! A [`JobManager`](manager::JobManager) builds runs from job specs and wakes
//! suspended runs when the condition they wait on (block confirmations, a
//! chain connection, a bridge adapter response) is met. Storage and task
//! execution are collaborators behind the [`RunStore`](store::RunStore) and
//! [`DispatchSink`](dispatch::DispatchSink) traits.

pub mod builder;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod manager;
pub mod service;
pub mod state_machine;
pub mod store;
pub mod ui;

pub use error::{BuildError, DispatchError, EngineError, StoreError};
pub use manager::{BatchReport, JobManager};
