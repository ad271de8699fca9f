//! Contracts between the playback engine and the voice layer.
//!
//! The engine never talks to Discord directly. It joins channels through a
//! [`VoiceConnector`], starts tracks through the [`AudioTransport`] that the
//! connector returns, and controls a running track through its
//! [`PlaybackHandle`]. When a track ends, the transport reports it through the
//! [`TrackEndNotifier`] it was given, which feeds the session's completion
//! channel.

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use super::{error::PlayerError, track::TrackMetadata};

/// Why a track stopped producing audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// Ended naturally, or was cut short by a skip.
    Completed,
    /// Ended by an explicit stop; the queue is not advanced.
    StoppedByUser,
    /// The stream failed while playing.
    Error,
}

/// Messages consumed by a session's event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionEvent {
    TrackEnd { epoch: u64, reason: FinishReason },
    Advance,
}

/// Reports the end of one specific started track.
///
/// Each notifier is stamped with the epoch of the track it was created for,
/// so reports about tracks the session has already moved past are dropped.
#[derive(Debug, Clone)]
pub struct TrackEndNotifier {
    epoch: u64,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl TrackEndNotifier {
    pub(crate) fn new(epoch: u64, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { epoch, tx }
    }

    pub fn notify(&self, reason: FinishReason) {
        let event = SessionEvent::TrackEnd {
            epoch: self.epoch,
            reason,
        };

        if self.tx.send(event).is_err() {
            debug!("Sesión cerrada, fin de track descartado (epoch {})", self.epoch);
        }
    }
}

/// Joins and leaves voice channels.
#[async_trait]
pub trait VoiceConnector: Send + Sync {
    /// Connects to `channel_id` and returns the transport bound to that call.
    async fn join(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn AudioTransport>, PlayerError>;

    async fn leave(&self, guild_id: GuildId) -> Result<(), PlayerError>;

    /// Whether the voice layer still holds a live connection for the guild.
    async fn is_connected(&self, guild_id: GuildId) -> bool;
}

/// Plays tracks into one guild's voice connection.
#[async_trait]
pub trait AudioTransport: Send + Sync {
    /// Starts `track` and reports its end through `on_finished`.
    ///
    /// Implementations only bind the stream here; any network work needed to
    /// fetch audio happens lazily once playback runs, so the caller may hold
    /// the guild lock across this call.
    async fn start(
        &self,
        track: &TrackMetadata,
        volume: f32,
        on_finished: TrackEndNotifier,
    ) -> Result<Box<dyn PlaybackHandle>, PlayerError>;
}

/// Controls one running track.
pub trait PlaybackHandle: Send + Sync {
    /// Ends the track; the transport then reports it through its notifier.
    fn stop(&self);
    fn pause(&self) -> Result<(), PlayerError>;
    fn resume(&self) -> Result<(), PlayerError>;
    fn set_volume(&self, volume: f32);
}
