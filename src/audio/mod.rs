//! # Audio Module
//!
//! Per-guild playback queues and the engine that sequences them.
//!
//! ## Architecture
//!
//! ### [`manager`] - Session Registry
//! - Maps each guild to its [`session::PlaybackSession`]
//! - Entry point for every command (play, pause, skip, stop, ...)
//!
//! ### [`session`] - Playback State Machine
//! - `Disconnected` → `Idle` → `Playing` ⇄ `Paused`
//! - Serializes every operation of one guild
//! - Advances the queue when the transport reports a finished track
//!
//! ### [`queue`] - Queue Management
//! - Strict FIFO pending list plus the "currently playing" slot
//!
//! ### [`transport`] and [`voice`] - Voice Layer
//! - Traits the engine drives, and their Songbird implementation

pub mod error;
pub mod manager;
pub mod queue;
pub mod session;
pub mod track;
pub mod transport;
pub mod voice;

#[cfg(test)]
mod testing;
