//! # Playback Session
//!
//! One [`PlaybackSession`] exists per guild. It owns the guild's
//! [`GuildQueue`], the voice transport bound to the guild's call and the
//! handle of the track that is currently playing.
//!
//! ## Serialization
//!
//! Every operation, whether it comes from a command or from the transport,
//! runs under the session's own async mutex, so operations on one guild never
//! interleave while different guilds never contend with each other.
//!
//! ## Advancing
//!
//! Commands never pop the queue while a track is in flight. A finished track
//! is reported through the [`TrackEndNotifier`] handed to the transport; the
//! report lands on the session's completion channel and a per-session event
//! loop runs the advance. Because that loop is the single consumer of the
//! channel, at most one advance per guild is ever in progress.
//!
//! Each started track gets a new epoch. Reports carrying an older epoch (a
//! track that was replaced, or a stop that already tore the session down) are
//! ignored.
//!
//! ## Retirement
//!
//! Stopping a session retires it: it never connects again, and the manager
//! replaces it with a fresh session on the next request. A command that got
//! hold of the session just before the stop sees the retirement once the
//! stop releases the lock and starts over instead of reviving it.

use serenity::model::id::{ChannelId, GuildId};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Weak,
};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    error::PlayerError,
    queue::{GuildQueue, QueueSnapshot},
    track::TrackMetadata,
    transport::{
        AudioTransport, FinishReason, PlaybackHandle, SessionEvent, TrackEndNotifier,
        VoiceConnector,
    },
};
use crate::sources::TrackResolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Disconnected,
    Idle,
    Playing,
    Paused,
}

/// Result of asking a session to play a track.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayOutcome {
    NowPlaying(TrackMetadata),
    /// `position` is 1-based: 1 means "plays next".
    Queued { track: TrackMetadata, position: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkipOutcome {
    pub skipped: TrackMetadata,
    /// Tracks still waiting after the skipped one.
    pub remaining: usize,
}

pub struct PlaybackSession {
    guild_id: GuildId,
    resolver: Arc<dyn TrackResolver>,
    max_advance_attempts: usize,
    retired: AtomicBool,
    inner: Mutex<SessionInner>,
}

struct SessionInner {
    state: PlaybackState,
    queue: GuildQueue,
    channel_id: Option<ChannelId>,
    transport: Option<Arc<dyn AudioTransport>>,
    handle: Option<Box<dyn PlaybackHandle>>,
    epoch: u64,
    volume: f32,
    /// Skip pedido mientras el siguiente track aún se estaba preparando
    skip_requested: bool,
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
    cancel: Option<CancellationToken>,
}

impl SessionInner {
    /// Instala `track` como actual y arranca el transporte.
    ///
    /// Si el transporte falla, la sesión vuelve a `Idle` sin track actual.
    async fn start_track(&mut self, guild_id: GuildId, track: TrackMetadata) -> Result<(), PlayerError> {
        let (Some(transport), Some(events)) = (self.transport.clone(), self.events.clone()) else {
            return Err(PlayerError::NotConnected);
        };

        self.epoch += 1;
        let notifier = TrackEndNotifier::new(self.epoch, events);
        self.queue.set_current(Some(track.clone()));

        match transport.start(&track, self.volume, notifier).await {
            Ok(handle) => {
                self.handle = Some(handle);
                self.state = PlaybackState::Playing;
                info!("🎵 Reproduciendo en guild {}: {}", guild_id, track.title());
                Ok(())
            }
            Err(e) => {
                self.queue.set_current(None);
                self.handle = None;
                self.state = PlaybackState::Idle;
                Err(e)
            }
        }
    }

    fn request_advance(&self) {
        if let Some(events) = &self.events {
            let _ = events.send(SessionEvent::Advance);
        }
    }

    /// Corta el transporte, vacía la cola y suelta la conexión.
    /// Devuelve si había una conexión activa.
    fn teardown(&mut self) -> bool {
        let was_connected = self.state != PlaybackState::Disconnected;

        // Cualquier fin de track que llegue después queda obsoleto
        self.epoch += 1;
        if let Some(handle) = self.handle.take() {
            handle.stop();
        }
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }

        self.queue.clear();
        self.transport = None;
        self.channel_id = None;
        self.events = None;
        self.skip_requested = false;
        self.state = PlaybackState::Disconnected;

        was_connected
    }
}

impl PlaybackSession {
    pub fn new(
        guild_id: GuildId,
        resolver: Arc<dyn TrackResolver>,
        volume: f32,
        max_advance_attempts: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            guild_id,
            resolver,
            max_advance_attempts: max_advance_attempts.max(1),
            retired: AtomicBool::new(false),
            inner: Mutex::new(SessionInner {
                state: PlaybackState::Disconnected,
                queue: GuildQueue::new(),
                channel_id: None,
                transport: None,
                handle: None,
                epoch: 0,
                volume: volume.clamp(0.0, 2.0),
                skip_requested: false,
                events: None,
                cancel: None,
            }),
        })
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub async fn state(&self) -> PlaybackState {
        self.inner.lock().await.state
    }

    /// A retired session has been stopped for good and must be replaced.
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    /// Retires a session that never got connected. Returns `false` when
    /// another command connected it in the meantime.
    pub async fn retire_if_unused(&self) -> bool {
        let inner = self.inner.lock().await;
        if inner.state != PlaybackState::Disconnected {
            return false;
        }

        self.retired.store(true, Ordering::Release);
        true
    }

    /// Joins `channel_id` and starts the session's event loop.
    ///
    /// Connecting again to the channel the session is already in is a no-op;
    /// a different channel is refused and a retired session reports
    /// `NotConnected`. The guild lock is held across the join so two commands
    /// racing for the same guild cannot join twice.
    pub async fn connect(
        self: &Arc<Self>,
        connector: &dyn VoiceConnector,
        channel_id: ChannelId,
    ) -> Result<(), PlayerError> {
        let mut inner = self.inner.lock().await;

        if self.is_retired() {
            return Err(PlayerError::NotConnected);
        }

        match inner.channel_id {
            Some(current) if current == channel_id => return Ok(()),
            Some(current) => return Err(PlayerError::AlreadyConnectedElsewhere(current)),
            None => {}
        }

        let transport = match connector.join(self.guild_id, channel_id).await {
            Ok(transport) => transport,
            Err(e) => {
                error!("Error al conectar en guild {}: {}", self.guild_id, e);
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        tokio::spawn(run_events(Arc::downgrade(self), rx, cancel.clone()));

        inner.transport = Some(transport);
        inner.channel_id = Some(channel_id);
        inner.events = Some(tx);
        inner.cancel = Some(cancel);
        inner.state = PlaybackState::Idle;

        info!("🔊 Conectado al canal {} en guild {}", channel_id, self.guild_id);
        Ok(())
    }

    /// Plays `track` right away when nothing is current, otherwise queues it.
    pub async fn enqueue_or_play(&self, track: TrackMetadata) -> Result<PlayOutcome, PlayerError> {
        let mut inner = self.inner.lock().await;

        if inner.state == PlaybackState::Disconnected {
            return Err(PlayerError::NotConnected);
        }

        let busy = matches!(inner.state, PlaybackState::Playing | PlaybackState::Paused)
            || inner.queue.current().is_some();

        if !inner.queue.is_idle() || busy {
            let position = inner.queue.enqueue(track.clone());
            if !busy {
                // Quedaron pendientes tras un avance fallido: retomar desde la cabeza
                inner.request_advance();
            }
            return Ok(PlayOutcome::Queued { track, position });
        }

        inner.start_track(self.guild_id, track.clone()).await?;
        Ok(PlayOutcome::NowPlaying(track))
    }

    /// Handles the end of the track started under `epoch`.
    pub async fn on_transport_finished(&self, epoch: u64, reason: FinishReason) {
        {
            let mut inner = self.inner.lock().await;

            if epoch != inner.epoch || inner.handle.is_none() {
                debug!(
                    "Fin de track obsoleto en guild {} (epoch {}, actual {})",
                    self.guild_id, epoch, inner.epoch
                );
                return;
            }

            inner.handle = None;
            inner.state = PlaybackState::Idle;
            let finished = inner.queue.take_current();

            if let Some(track) = &finished {
                match reason {
                    FinishReason::Completed => info!("🎵 Track terminado en guild {}: {}", self.guild_id, track.title()),
                    FinishReason::StoppedByUser => info!("⏹️ Track detenido en guild {}: {}", self.guild_id, track.title()),
                    FinishReason::Error => warn!("❌ Track falló en guild {}: {}", self.guild_id, track.title()),
                }
            }

            if reason == FinishReason::StoppedByUser {
                return;
            }
        }

        self.advance().await;
    }

    /// Moves the head of the queue into the current slot and starts it.
    ///
    /// Queued tracks are re-resolved right before playing since their stream
    /// may have expired while waiting. A track that fails to resolve or start
    /// is dropped and the next one is tried, up to `max_advance_attempts`
    /// consecutive failures. Resolution runs without holding the guild lock;
    /// while it runs the candidate already occupies the current slot, so new
    /// requests queue behind it.
    pub(crate) async fn advance(&self) {
        let mut failures = 0usize;

        loop {
            let (candidate, epoch) = {
                let mut inner = self.inner.lock().await;

                if inner.state == PlaybackState::Disconnected || inner.queue.current().is_some() {
                    return;
                }

                if failures >= self.max_advance_attempts {
                    error!(
                        "❌ {} fallos seguidos en guild {}, {} canciones siguen en cola",
                        failures,
                        self.guild_id,
                        inner.queue.len()
                    );
                    inner.state = PlaybackState::Idle;
                    return;
                }

                let Some(next) = inner.queue.dequeue_next() else {
                    inner.state = PlaybackState::Idle;
                    info!("📭 Cola terminada en guild {}", self.guild_id);
                    return;
                };

                inner.queue.set_current(Some(next.clone()));
                inner.state = PlaybackState::Playing;
                inner.skip_requested = false;
                (next, inner.epoch)
            };

            let refreshed = self
                .resolver
                .resolve_direct(candidate.url(), candidate.requested_by())
                .await;

            let mut inner = self.inner.lock().await;

            if inner.epoch != epoch || inner.state == PlaybackState::Disconnected {
                debug!("Sesión detenida durante el avance en guild {}", self.guild_id);
                return;
            }

            if std::mem::take(&mut inner.skip_requested) {
                info!("⏭️ Saltado antes de empezar: {}", candidate.title());
                inner.queue.set_current(None);
                inner.state = PlaybackState::Idle;
                continue;
            }

            let started = match refreshed {
                Ok(track) => {
                    let track = track.with_requested_by(candidate.requested_by());
                    inner.start_track(self.guild_id, track).await
                }
                Err(e) => {
                    inner.queue.set_current(None);
                    inner.state = PlaybackState::Idle;
                    Err(e)
                }
            };

            match started {
                Ok(()) => return,
                Err(e) => {
                    failures += 1;
                    warn!(
                        "⚠️ Saltando '{}' en guild {}: {}",
                        candidate.title(),
                        self.guild_id,
                        e
                    );
                }
            }
        }
    }

    pub async fn pause(&self) -> Result<(), PlayerError> {
        let mut inner = self.inner.lock().await;

        if inner.state != PlaybackState::Playing {
            return Err(PlayerError::NothingPlaying);
        }
        let Some(handle) = inner.handle.as_ref() else {
            return Err(PlayerError::NothingPlaying);
        };

        handle.pause()?;
        inner.state = PlaybackState::Paused;
        info!("⏸️ Reproducción pausada en guild {}", self.guild_id);
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), PlayerError> {
        let mut inner = self.inner.lock().await;

        if inner.state != PlaybackState::Paused {
            return Err(PlayerError::NothingPaused);
        }
        let Some(handle) = inner.handle.as_ref() else {
            return Err(PlayerError::NothingPaused);
        };

        handle.resume()?;
        inner.state = PlaybackState::Playing;
        info!("▶️ Reproducción reanudada en guild {}", self.guild_id);
        Ok(())
    }

    /// Ends the current track; the completion handler then plays the next one.
    pub async fn skip(&self) -> Result<SkipOutcome, PlayerError> {
        let mut inner = self.inner.lock().await;

        if !matches!(inner.state, PlaybackState::Playing | PlaybackState::Paused) {
            return Err(PlayerError::NothingPlaying);
        }
        let skipped = inner
            .queue
            .current()
            .cloned()
            .ok_or(PlayerError::NothingPlaying)?;

        match inner.handle.as_ref() {
            Some(handle) => handle.stop(),
            None => inner.skip_requested = true,
        }

        info!("⏭️ Saltando en guild {}: {}", self.guild_id, skipped.title());
        Ok(SkipOutcome {
            skipped,
            remaining: inner.queue.len(),
        })
    }

    /// Stops playback, clears the queue, leaves the voice channel and retires
    /// the session.
    ///
    /// The session always ends `Disconnected` with an empty queue; a failure
    /// to leave the call is only logged.
    pub async fn stop_all(&self, connector: &dyn VoiceConnector) {
        let mut inner = self.inner.lock().await;
        self.retired.store(true, Ordering::Release);

        if inner.teardown() {
            if let Err(e) = connector.leave(self.guild_id).await {
                warn!("⚠️ Error al salir del canal de voz en guild {}: {}", self.guild_id, e);
            }
        }

        info!("⏹️ Reproducción detenida en guild {}", self.guild_id);
    }

    /// Leaving is the same as stopping: the queue is cleared as well.
    pub async fn disconnect(&self, connector: &dyn VoiceConnector) {
        self.stop_all(connector).await;
        info!("👋 Desconectado del canal de voz en guild {}", self.guild_id);
    }

    /// Sets the session volume (clamped to 0.0–2.0) and applies it to the live track.
    pub async fn set_volume(&self, volume: f32) -> f32 {
        let mut inner = self.inner.lock().await;
        let volume = volume.clamp(0.0, 2.0);

        inner.volume = volume;
        if let Some(handle) = &inner.handle {
            handle.set_volume(volume);
        }

        info!("🔊 Volumen en guild {} ajustado a {}%", self.guild_id, (volume * 100.0).round() as u32);
        volume
    }

    pub async fn volume(&self) -> f32 {
        self.inner.lock().await.volume
    }

    pub async fn snapshot(&self) -> QueueSnapshot {
        let inner = self.inner.lock().await;
        inner.queue.snapshot(inner.state, inner.volume)
    }

    /// Track bound to the voice call, if any. A track still being prepared
    /// by an advance does not count until it actually starts.
    pub async fn now_playing(&self) -> Option<(TrackMetadata, PlaybackState)> {
        let inner = self.inner.lock().await;
        inner.handle.as_ref()?;
        inner.queue.current().cloned().map(|track| (track, inner.state))
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        if let Some(cancel) = self.inner.get_mut().cancel.take() {
            cancel.cancel();
        }
    }
}

/// Consumes a session's completion channel until the session stops.
async fn run_events(
    session: Weak<PlaybackSession>,
    mut rx: mpsc::UnboundedReceiver<SessionEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let Some(session) = session.upgrade() else {
            break;
        };

        match event {
            SessionEvent::TrackEnd { epoch, reason } => {
                session.on_transport_finished(epoch, reason).await
            }
            SessionEvent::Advance => session.advance().await,
        }
    }

    debug!("Bucle de eventos de sesión terminado");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::{
        eventually, resolver_failing_on, track, FakeConnector, GatedResolver,
    };
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    const CHANNEL: ChannelId = ChannelId::new(500);

    async fn connected(connector: &FakeConnector, failing: &[&str]) -> Arc<PlaybackSession> {
        let session = PlaybackSession::new(
            GuildId::new(1),
            Arc::new(resolver_failing_on(failing)),
            0.5,
            10,
        );
        session.connect(connector, CHANNEL).await.unwrap();
        session
    }

    fn titles(snapshot: &QueueSnapshot) -> Vec<String> {
        snapshot.pending.iter().map(|t| t.title().to_string()).collect()
    }

    fn current_title(snapshot: &QueueSnapshot) -> Option<String> {
        snapshot.current.as_ref().map(|t| t.title().to_string())
    }

    #[tokio::test]
    async fn test_first_track_plays_and_rest_queue_in_order() {
        let connector = FakeConnector::new();
        let session = connected(&connector, &[]).await;

        let first = session.enqueue_or_play(track("a")).await.unwrap();
        assert!(matches!(first, PlayOutcome::NowPlaying(ref t) if t.title() == "a"));

        for (i, name) in ["b", "c", "d"].into_iter().enumerate() {
            match session.enqueue_or_play(track(name)).await.unwrap() {
                PlayOutcome::Queued { position, .. } => assert_eq!(position, i + 1),
                other => panic!("esperaba Queued, obtuve {other:?}"),
            }
        }

        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.state, PlaybackState::Playing);
        assert_eq!(current_title(&snapshot), Some("a".to_string()));
        assert_eq!(titles(&snapshot), vec!["b", "c", "d"]);
        assert_eq!(connector.transport.started_titles(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_completion_moves_head_into_current() {
        let connector = FakeConnector::new();
        let session = connected(&connector, &[]).await;
        session.enqueue_or_play(track("a")).await.unwrap();
        session.enqueue_or_play(track("b")).await.unwrap();
        session.enqueue_or_play(track("c")).await.unwrap();

        connector.transport.finish_latest(FinishReason::Completed);

        let snapshot = eventually(&session, |s| current_title(s).as_deref() == Some("b")).await;
        assert_eq!(titles(&snapshot), vec!["c"]);
        assert_eq!(snapshot.state, PlaybackState::Playing);
        assert_eq!(connector.transport.started_titles(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_completion_with_empty_queue_goes_idle() {
        let connector = FakeConnector::new();
        let session = connected(&connector, &[]).await;
        session.enqueue_or_play(track("a")).await.unwrap();

        connector.transport.finish_latest(FinishReason::Completed);

        let snapshot = eventually(&session, |s| s.state == PlaybackState::Idle).await;
        assert!(snapshot.current.is_none());
        assert!(snapshot.pending.is_empty());
    }

    #[tokio::test]
    async fn test_stream_error_advances_like_completion() {
        let connector = FakeConnector::new();
        let session = connected(&connector, &[]).await;
        session.enqueue_or_play(track("a")).await.unwrap();
        session.enqueue_or_play(track("b")).await.unwrap();

        connector.transport.finish_latest(FinishReason::Error);

        eventually(&session, |s| current_title(s).as_deref() == Some("b")).await;
    }

    #[tokio::test]
    async fn test_stopped_by_user_does_not_advance() {
        let connector = FakeConnector::new();
        let session = connected(&connector, &[]).await;
        session.enqueue_or_play(track("a")).await.unwrap();
        session.enqueue_or_play(track("b")).await.unwrap();

        connector.transport.finish_latest(FinishReason::StoppedByUser);

        let snapshot = eventually(&session, |s| s.current.is_none()).await;
        assert_eq!(snapshot.state, PlaybackState::Idle);
        assert_eq!(titles(&snapshot), vec!["b"]);
        assert_eq!(connector.transport.started_titles(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_stop_all_clears_from_any_state() {
        let connector = FakeConnector::new();

        // Desconectada
        let session = PlaybackSession::new(GuildId::new(1), Arc::new(resolver_failing_on(&[])), 0.5, 10);
        session.stop_all(&connector).await;
        assert!(session.snapshot().await.is_empty());
        assert_eq!(session.state().await, PlaybackState::Disconnected);

        // Idle
        let session = connected(&connector, &[]).await;
        session.stop_all(&connector).await;
        assert_eq!(session.state().await, PlaybackState::Disconnected);

        // Reproduciendo con cola
        let session = connected(&connector, &[]).await;
        session.enqueue_or_play(track("a")).await.unwrap();
        session.enqueue_or_play(track("b")).await.unwrap();
        session.stop_all(&connector).await;
        let snapshot = session.snapshot().await;
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.state, PlaybackState::Disconnected);

        // En pausa
        let session = connected(&connector, &[]).await;
        session.enqueue_or_play(track("c")).await.unwrap();
        session.pause().await.unwrap();
        session.stop_all(&connector).await;
        let snapshot = session.snapshot().await;
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.state, PlaybackState::Disconnected);

        assert_eq!(connector.leaves(), 3);
    }

    #[tokio::test]
    async fn test_pause_and_resume_only_from_valid_states() {
        let connector = FakeConnector::new();
        let session = connected(&connector, &[]).await;

        assert_eq!(session.pause().await, Err(PlayerError::NothingPlaying));
        assert_eq!(session.resume().await, Err(PlayerError::NothingPaused));

        session.enqueue_or_play(track("a")).await.unwrap();
        assert_eq!(session.resume().await, Err(PlayerError::NothingPaused));

        session.pause().await.unwrap();
        assert_eq!(session.state().await, PlaybackState::Paused);
        assert!(connector.transport.latest_paused());
        assert_eq!(session.pause().await, Err(PlayerError::NothingPlaying));

        session.resume().await.unwrap();
        assert_eq!(session.state().await, PlaybackState::Playing);
        assert!(!connector.transport.latest_paused());
    }

    #[tokio::test]
    async fn test_track_requested_while_paused_is_queued() {
        let connector = FakeConnector::new();
        let session = connected(&connector, &[]).await;
        session.enqueue_or_play(track("a")).await.unwrap();
        session.pause().await.unwrap();

        let outcome = session.enqueue_or_play(track("b")).await.unwrap();
        assert!(matches!(outcome, PlayOutcome::Queued { position: 1, .. }));
        assert_eq!(session.state().await, PlaybackState::Paused);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_enqueues_never_lose_or_duplicate() {
        let connector = FakeConnector::new();
        let session = connected(&connector, &[]).await;

        let tasks: Vec<_> = (0..64)
            .map(|i| {
                let session = session.clone();
                tokio::spawn(async move { session.enqueue_or_play(track(&format!("t{i}"))).await })
            })
            .collect();

        let mut now_playing = 0;
        for task in futures::future::join_all(tasks).await {
            if let PlayOutcome::NowPlaying(_) = task.unwrap().unwrap() {
                now_playing += 1;
            }
        }
        assert_eq!(now_playing, 1);

        let snapshot = session.snapshot().await;
        let mut all: Vec<String> = titles(&snapshot);
        all.extend(current_title(&snapshot));
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 64);
        assert_eq!(snapshot.pending.len(), 63);
    }

    #[tokio::test]
    async fn test_skip_then_stop_scenario() {
        let connector = FakeConnector::new();
        let session = connected(&connector, &[]).await;
        for name in ["a", "b", "c"] {
            session.enqueue_or_play(track(name)).await.unwrap();
        }

        let snapshot = session.snapshot().await;
        assert_eq!(current_title(&snapshot), Some("a".to_string()));
        assert_eq!(titles(&snapshot), vec!["b", "c"]);

        let outcome = session.skip().await.unwrap();
        assert_eq!(outcome.skipped.title(), "a");
        assert_eq!(outcome.remaining, 2);

        let snapshot = eventually(&session, |s| current_title(s).as_deref() == Some("b")).await;
        assert_eq!(titles(&snapshot), vec!["c"]);

        session.stop_all(&connector).await;
        let snapshot = session.snapshot().await;
        assert!(snapshot.current.is_none());
        assert!(snapshot.pending.is_empty());
        assert_eq!(snapshot.state, PlaybackState::Disconnected);
    }

    #[tokio::test]
    async fn test_skip_while_paused_advances() {
        let connector = FakeConnector::new();
        let session = connected(&connector, &[]).await;
        session.enqueue_or_play(track("a")).await.unwrap();
        session.enqueue_or_play(track("b")).await.unwrap();
        session.pause().await.unwrap();

        session.skip().await.unwrap();

        let snapshot = eventually(&session, |s| current_title(s).as_deref() == Some("b")).await;
        assert_eq!(snapshot.state, PlaybackState::Playing);
    }

    #[tokio::test]
    async fn test_skip_with_nothing_playing_fails() {
        let connector = FakeConnector::new();
        let session = connected(&connector, &[]).await;

        assert_eq!(session.skip().await, Err(PlayerError::NothingPlaying));
    }

    #[tokio::test]
    async fn test_failed_resolution_skips_to_next_track() {
        let connector = FakeConnector::new();
        let session = connected(&connector, &["b"]).await;
        for name in ["a", "b", "c"] {
            session.enqueue_or_play(track(name)).await.unwrap();
        }

        connector.transport.finish_latest(FinishReason::Completed);

        let snapshot = eventually(&session, |s| current_title(s).as_deref() == Some("c")).await;
        assert!(snapshot.pending.is_empty());
        assert_eq!(connector.transport.started_titles(), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_all_failures_end_idle_with_empty_queue() {
        let connector = FakeConnector::new();
        let session = connected(&connector, &["b", "c"]).await;
        for name in ["a", "b", "c"] {
            session.enqueue_or_play(track(name)).await.unwrap();
        }

        connector.transport.finish_latest(FinishReason::Completed);

        let snapshot = eventually(&session, |s| s.state == PlaybackState::Idle && s.is_empty()).await;
        assert!(snapshot.current.is_none());
        assert_eq!(connector.transport.started_titles(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_transport_start_failure_during_advance_is_skipped() {
        let connector = FakeConnector::new();
        connector.transport.fail_on("b");
        let session = connected(&connector, &[]).await;
        for name in ["a", "b", "c"] {
            session.enqueue_or_play(track(name)).await.unwrap();
        }

        connector.transport.finish_latest(FinishReason::Completed);

        eventually(&session, |s| current_title(s).as_deref() == Some("c")).await;
    }

    #[tokio::test]
    async fn test_advance_attempts_are_bounded() {
        let connector = FakeConnector::new();
        let session = PlaybackSession::new(
            GuildId::new(1),
            Arc::new(resolver_failing_on(&["x1", "x2"])),
            0.5,
            2,
        );
        session.connect(&connector, CHANNEL).await.unwrap();
        for name in ["a", "x1", "x2", "x3"] {
            session.enqueue_or_play(track(name)).await.unwrap();
        }

        connector.transport.finish_latest(FinishReason::Completed);

        let snapshot = eventually(&session, |s| {
            s.state == PlaybackState::Idle && s.current.is_none() && s.pending.len() == 1
        })
        .await;
        assert_eq!(titles(&snapshot), vec!["x3"]);

        // Un nuevo pedido retoma la cola desde la cabeza
        let outcome = session.enqueue_or_play(track("y")).await.unwrap();
        assert!(matches!(outcome, PlayOutcome::Queued { position: 2, .. }));

        let snapshot = eventually(&session, |s| current_title(s).as_deref() == Some("x3")).await;
        assert_eq!(titles(&snapshot), vec!["y"]);
    }

    #[tokio::test]
    async fn test_start_failure_rolls_back_to_idle() {
        let connector = FakeConnector::new();
        connector.transport.fail_on("a");
        let session = connected(&connector, &[]).await;

        let result = session.enqueue_or_play(track("a")).await;
        assert!(matches!(result, Err(PlayerError::TransportStart(_))));

        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.state, PlaybackState::Idle);
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_stale_end_reports_are_ignored() {
        let connector = FakeConnector::new();
        let session = connected(&connector, &[]).await;
        for name in ["a", "b", "c"] {
            session.enqueue_or_play(track(name)).await.unwrap();
        }
        let old = connector.transport.latest_epoch_notifier();

        session.skip().await.unwrap();
        eventually(&session, |s| current_title(s).as_deref() == Some("b")).await;

        // Un segundo fin del track "a" no debe saltar "b"
        old.notify(FinishReason::Completed);
        session.on_transport_finished(0, FinishReason::Completed).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let snapshot = session.snapshot().await;
        assert_eq!(current_title(&snapshot), Some("b".to_string()));
        assert_eq!(titles(&snapshot), vec!["c"]);
        assert_eq!(connector.transport.started_titles(), vec!["a", "b"]);

        session.stop_all(&connector).await;
        connector.transport.finish_latest(FinishReason::Completed);
        tokio::time::sleep(Duration::from_millis(30)).await;

        let snapshot = session.snapshot().await;
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.state, PlaybackState::Disconnected);
        assert_eq!(connector.transport.started_titles(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_stopped_session_is_retired() {
        let connector = FakeConnector::new();
        let session = connected(&connector, &[]).await;
        session.enqueue_or_play(track("a")).await.unwrap();

        session.stop_all(&connector).await;
        assert!(session.is_retired());
        assert_eq!(session.connect(&connector, CHANNEL).await, Err(PlayerError::NotConnected));
        assert_eq!(session.enqueue_or_play(track("b")).await, Err(PlayerError::NotConnected));
        assert_eq!(connector.joins(), 1);
    }

    #[tokio::test]
    async fn test_retire_if_unused_spares_connected_sessions() {
        let connector = FakeConnector::new();

        let session = connected(&connector, &[]).await;
        assert!(!session.retire_if_unused().await);
        assert!(!session.is_retired());

        let fresh = PlaybackSession::new(GuildId::new(2), Arc::new(resolver_failing_on(&[])), 0.5, 10);
        assert!(fresh.retire_if_unused().await);
        assert!(fresh.is_retired());
    }

    async fn gated_session(connector: &FakeConnector, gated: &str) -> (Arc<PlaybackSession>, Arc<GatedResolver>) {
        let resolver = GatedResolver::new(gated);
        let session = PlaybackSession::new(GuildId::new(1), resolver.clone(), 0.5, 10);
        session.connect(connector, CHANNEL).await.unwrap();
        (session, resolver)
    }

    #[tokio::test]
    async fn test_skip_while_next_track_resolves_drops_it() {
        let connector = FakeConnector::new();
        let (session, resolver) = gated_session(&connector, "b").await;
        for name in ["a", "b", "c"] {
            session.enqueue_or_play(track(name)).await.unwrap();
        }

        connector.transport.finish_latest(FinishReason::Completed);
        let snapshot = eventually(&session, |s| current_title(s).as_deref() == Some("b")).await;
        assert_eq!(titles(&snapshot), vec!["c"]);

        // "b" todavía no suena
        assert_eq!(session.now_playing().await, None);
        assert_eq!(session.pause().await, Err(PlayerError::NothingPlaying));

        let outcome = session.skip().await.unwrap();
        assert_eq!(outcome.skipped.title(), "b");
        assert_eq!(outcome.remaining, 1);

        resolver.open();

        let snapshot = eventually(&session, |s| current_title(s).as_deref() == Some("c")).await;
        assert!(snapshot.pending.is_empty());
        assert_eq!(snapshot.state, PlaybackState::Playing);
        assert_eq!(connector.transport.started_titles(), vec!["a", "c"]);

        let (playing, state) = session.now_playing().await.unwrap();
        assert_eq!(playing.title(), "c");
        assert_eq!(state, PlaybackState::Playing);
    }

    #[tokio::test]
    async fn test_stop_while_next_track_resolves() {
        let connector = FakeConnector::new();
        let (session, resolver) = gated_session(&connector, "b").await;
        for name in ["a", "b", "c"] {
            session.enqueue_or_play(track(name)).await.unwrap();
        }

        connector.transport.finish_latest(FinishReason::Completed);
        eventually(&session, |s| current_title(s).as_deref() == Some("b")).await;

        session.stop_all(&connector).await;
        resolver.open();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let snapshot = session.snapshot().await;
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.state, PlaybackState::Disconnected);
        assert_eq!(connector.transport.started_titles(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_connect_failure_and_other_channel() {
        let connector = FakeConnector::new();
        connector.fail_joins(true);
        let session = PlaybackSession::new(GuildId::new(1), Arc::new(resolver_failing_on(&[])), 0.5, 10);

        let result = session.connect(&connector, CHANNEL).await;
        assert!(matches!(result, Err(PlayerError::Connection(_))));
        assert_eq!(session.state().await, PlaybackState::Disconnected);

        connector.fail_joins(false);
        session.connect(&connector, CHANNEL).await.unwrap();
        session.connect(&connector, CHANNEL).await.unwrap();
        assert_eq!(connector.joins(), 1);

        let other = ChannelId::new(501);
        assert_eq!(
            session.connect(&connector, other).await,
            Err(PlayerError::AlreadyConnectedElsewhere(CHANNEL))
        );
    }

    #[tokio::test]
    async fn test_volume_applies_to_live_and_later_tracks() {
        let connector = FakeConnector::new();
        let session = connected(&connector, &[]).await;
        session.enqueue_or_play(track("a")).await.unwrap();
        session.enqueue_or_play(track("b")).await.unwrap();

        assert_eq!(session.set_volume(3.0).await, 2.0);
        assert_eq!(connector.transport.latest_volume(), 2.0);

        session.skip().await.unwrap();
        eventually(&session, |s| current_title(s).as_deref() == Some("b")).await;
        assert_eq!(connector.transport.latest_volume(), 2.0);
    }
}
