//! Core engine for lockstep watch-together rooms.
//!
//! Keeps every participant of a room on the same playback timeline:
//! rooms and presence, a host-gated playback state machine with
//! monotonically increasing control epochs, periodic computed-position
//! snapshots, sequenced chat, and a per-room append-only log tying it
//! all together. Transport is out of scope; gateways drive the
//! [`RoomRegistry`](service::RoomRegistry) and fan events out from the
//! [`EventHub`](service::EventHub).

pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod service;

pub use config::Config;
pub use error::{Error, Result};
pub use service::{EventHub, RoomRegistry};
