//! Real-time event distribution for the issue tracker
//!
//! A process-wide publish/subscribe bus that fans workspace-scoped events out
//! to long-lived SSE connections, an axum stream endpoint with catch-up
//! replay and presence, and the client-side reconnection engine that keeps a
//! subscription alive across network failures.
//!
//! Delivery is advisory and best-effort by design: the persisted data the
//! events announce remains the source of truth, and the worst failure mode is
//! degraded freshness, never data loss.

pub mod auth;
pub mod bus;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod routes;
pub mod state;

pub use bus::EventBus;
pub use events::{Event, EventType, NewEvent};
