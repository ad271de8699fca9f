use std::{collections::VecDeque, time::Duration};
use tracing::{debug, info};

use super::{session::PlaybackState, track::TrackMetadata};

/// Pending tracks and the "currently playing" slot of one guild.
///
/// A track leaves `pending` at the moment it becomes `current`, so a track is
/// never held in both places. The pending list is unbounded; memory is the
/// only limit.
#[derive(Debug, Default)]
pub struct GuildQueue {
    pending: VecDeque<TrackMetadata>,
    current: Option<TrackMetadata>,
}

impl GuildQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Agrega un track al final de la cola y devuelve su posición (1 = siguiente)
    pub fn enqueue(&mut self, track: TrackMetadata) -> usize {
        info!("➕ Agregado a la cola: {}", track.title());
        self.pending.push_back(track);
        self.pending.len()
    }

    /// Obtiene el siguiente track (FIFO estricto)
    pub fn dequeue_next(&mut self) -> Option<TrackMetadata> {
        let next = self.pending.pop_front();
        match &next {
            Some(track) => debug!("➡️ Siguiente en cola (FIFO): {}", track.title()),
            None => debug!("📭 Cola vacía, no hay siguiente track"),
        }
        next
    }

    pub fn set_current(&mut self, track: Option<TrackMetadata>) {
        self.current = track;
    }

    pub fn current(&self) -> Option<&TrackMetadata> {
        self.current.as_ref()
    }

    pub fn take_current(&mut self) -> Option<TrackMetadata> {
        self.current.take()
    }

    /// Limpia la cola y el track actual
    pub fn clear(&mut self) {
        self.pending.clear();
        self.current = None;
        info!("🗑️ Cola limpiada");
    }

    /// Número de tracks pendientes (sin contar el actual)
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Sin track actual ni pendientes
    pub fn is_idle(&self) -> bool {
        self.current.is_none() && self.pending.is_empty()
    }

    fn total_duration(&self) -> Duration {
        let queue_duration: Duration = self.pending.iter().filter_map(|t| t.duration()).sum();
        let current_duration = self
            .current
            .as_ref()
            .and_then(|t| t.duration())
            .unwrap_or_default();

        queue_duration + current_duration
    }

    pub fn snapshot(&self, state: PlaybackState, volume: f32) -> QueueSnapshot {
        QueueSnapshot {
            state,
            current: self.current.clone(),
            pending: self.pending.iter().cloned().collect(),
            total_duration: self.total_duration(),
            volume,
        }
    }
}

/// Read-only copy of a guild's queue, handed to the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSnapshot {
    pub state: PlaybackState,
    pub current: Option<TrackMetadata>,
    pub pending: Vec<TrackMetadata>,
    pub total_duration: Duration,
    pub volume: f32,
}

impl QueueSnapshot {
    /// Snapshot de un guild sin sesión
    pub fn empty(volume: f32) -> Self {
        GuildQueue::new().snapshot(PlaybackState::Disconnected, volume)
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.pending.is_empty()
    }

    /// Primeros `limit` tracks pendientes y cuántos quedan fuera
    pub fn up_next(&self, limit: usize) -> (&[TrackMetadata], usize) {
        let shown = self.pending.len().min(limit);
        (&self.pending[..shown], self.pending.len() - shown)
    }
}
