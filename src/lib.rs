//! A childcare center run by independent adult and child workers.
//!
//! At most three children may be inside per adult inside, until the last
//! configured adult has left ("child day"). Workers coordinate through a
//! [`Center`]: one named shared-memory segment holding a robust futex lock, the
//! shared counters and four permit pools. The same protocol runs across
//! processes ([`supervisor::run_processes`]) or threads
//! ([`supervisor::run_threads`]).

pub mod center;
pub mod config;
pub mod error;
pub mod event;
mod futex;
mod mutex;
mod semaphore;
mod shared_mem;
pub mod state;
pub mod supervisor;
pub mod worker;

pub use center::{Center, Pool};
pub use config::Config;
pub use error::CenterError;
pub use event::{Action, Event, EventLog, FileLog, MemoryLog, Role};
pub use shared_mem::unlink_if_exists;
pub use state::SharedState;
