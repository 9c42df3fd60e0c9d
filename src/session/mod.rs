//! Per-connection session state.
//!
//! - [`AckTracker`]: packet identifiers and PUBACK/SUBACK correlation
//! - [`KeepAlive`]: PINGREQ scheduling and dead-connection detection
//! - [`ConnectionStats`]: counters reported to callers
//! - [`SessionStore`]: resumption tickets shared across connection attempts

mod ack;
mod keepalive;
mod resumption;
mod stats;

pub use ack::{Ack, AckError, AckHandle, AckKind, AckTracker};
pub use keepalive::{KeepAlive, KeepAliveAction};
pub use resumption::{
    FileSessionStore, MAX_TICKET_LEN, MemorySessionStore, SessionStore, SessionTicket, StoreError,
};
pub use stats::{ConnectionStats, LatencyStats};
