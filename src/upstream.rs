//! Upstream Layer
//!
//! Everything between the collectors and the UniFi Protect API.
//!
//! # Architecture
//!
//! - [`UpstreamConnector`] / [`UpstreamSession`]: authenticate and fetch the
//!   bootstrap document
//! - [`ProtectConnector`]: the real console over HTTPS
//! - [`MemoryConnector`]: an in-process stand-in for tests and offline runs
//! - [`UpstreamGate`]: the shared front door (permits, one lazy session,
//!   snapshot cache)

mod client;
mod gate;
mod memory;
mod session;
pub mod types;

pub use client::{DEFAULT_EVENT_WINDOW, ProtectConnector};
pub use gate::{DEFAULT_CONCURRENCY_LIMIT, UpstreamGate};
pub use memory::MemoryConnector;
pub use session::{UpstreamConnector, UpstreamSession};
pub use types::{Bootstrap, Camera, Entity, EntityKind, Nvr, ProtectEvent, Sensor};
