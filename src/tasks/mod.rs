//! Background Tasks Module
//!
//! Contains background tasks bound to a provider's lifetime.
//!
//! # Tasks
//! - Expiration sweep: deletes expired rows from the SQLite file at a fixed interval

mod sweep;

pub use sweep::spawn_sweep_task;
