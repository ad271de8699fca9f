//! Test doubles for the voice layer and the resolver.

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::Notify;

use super::{
    error::PlayerError,
    queue::QueueSnapshot,
    session::PlaybackSession,
    track::TrackMetadata,
    transport::{AudioTransport, FinishReason, PlaybackHandle, TrackEndNotifier, VoiceConnector},
};
use crate::sources::{MockTrackResolver, TrackResolver};

pub fn track(name: &str) -> TrackMetadata {
    TrackMetadata::new(name, format!("https://youtu.be/{name}"), UserId::new(42))
}

fn name_from_url(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

/// Resolver whose `resolve_direct` echoes the track back, except for the
/// names in `failing`, and whose `resolve` finds everything except "nada".
pub fn resolver_failing_on(failing: &[&str]) -> MockTrackResolver {
    let failing: HashSet<String> = failing.iter().map(|s| s.to_string()).collect();
    let mut resolver = MockTrackResolver::new();

    resolver.expect_resolve_direct().returning(move |url, requested_by| {
        let name = name_from_url(url);
        if failing.contains(name) {
            Err(PlayerError::Resolution(format!("video no disponible: {name}")))
        } else {
            Ok(TrackMetadata::new(name, url, requested_by))
        }
    });

    resolver.expect_resolve().returning(|query, requested_by| {
        if query == "nada" {
            Ok(None)
        } else {
            Ok(Some(track(query).with_requested_by(requested_by)))
        }
    });

    resolver
}

/// Resolver whose `resolve_direct` for one track name blocks until
/// [`GatedResolver::open`] is called; everything else resolves at once.
pub struct GatedResolver {
    gated: String,
    gate: Notify,
}

impl GatedResolver {
    pub fn new(gated: &str) -> Arc<Self> {
        Arc::new(Self {
            gated: gated.to_string(),
            gate: Notify::new(),
        })
    }

    pub fn open(&self) {
        self.gate.notify_one();
    }
}

#[async_trait]
impl TrackResolver for GatedResolver {
    async fn resolve(
        &self,
        query: &str,
        requested_by: UserId,
    ) -> Result<Option<TrackMetadata>, PlayerError> {
        Ok(Some(track(query).with_requested_by(requested_by)))
    }

    async fn resolve_direct(
        &self,
        url: &str,
        requested_by: UserId,
    ) -> Result<TrackMetadata, PlayerError> {
        let name = name_from_url(url);
        if name == self.gated {
            self.gate.notified().await;
        }
        Ok(TrackMetadata::new(name, url, requested_by))
    }
}

/// Waits until the session's snapshot satisfies `check`.
pub async fn eventually<F>(session: &PlaybackSession, check: F) -> QueueSnapshot
where
    F: Fn(&QueueSnapshot) -> bool,
{
    for _ in 0..400 {
        let snapshot = session.snapshot().await;
        if check(&snapshot) {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    panic!("la sesión nunca llegó al estado esperado: {:?}", session.snapshot().await);
}

#[derive(Debug)]
pub struct FakeControl {
    pub stopped: AtomicBool,
    pub paused: AtomicBool,
    pub volume: Mutex<f32>,
}

struct Started {
    track: TrackMetadata,
    notifier: TrackEndNotifier,
    control: Arc<FakeControl>,
}

/// Records started tracks; `stop` reports `Completed` like Songbird's end event.
#[derive(Default)]
pub struct FakeTransport {
    started: Mutex<Vec<Started>>,
    failing: Mutex<HashSet<String>>,
}

impl FakeTransport {
    pub fn fail_on(&self, name: &str) {
        self.failing.lock().insert(name.to_string());
    }

    pub fn started_titles(&self) -> Vec<String> {
        self.started
            .lock()
            .iter()
            .map(|s| s.track.title().to_string())
            .collect()
    }

    pub fn latest_epoch_notifier(&self) -> TrackEndNotifier {
        self.started
            .lock()
            .last()
            .map(|s| s.notifier.clone())
            .expect("ningún track iniciado")
    }

    /// Reports the end of the most recently started track.
    pub fn finish_latest(&self, reason: FinishReason) {
        self.latest_epoch_notifier().notify(reason);
    }

    pub fn latest_paused(&self) -> bool {
        self.started
            .lock()
            .last()
            .map(|s| s.control.paused.load(Ordering::SeqCst))
            .expect("ningún track iniciado")
    }

    pub fn latest_volume(&self) -> f32 {
        self.started
            .lock()
            .last()
            .map(|s| *s.control.volume.lock())
            .expect("ningún track iniciado")
    }
}

#[async_trait]
impl AudioTransport for FakeTransport {
    async fn start(
        &self,
        track: &TrackMetadata,
        volume: f32,
        on_finished: TrackEndNotifier,
    ) -> Result<Box<dyn PlaybackHandle>, PlayerError> {
        if self.failing.lock().contains(name_from_url(track.url())) {
            return Err(PlayerError::TransportStart("stream inválido".to_string()));
        }

        let control = Arc::new(FakeControl {
            stopped: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            volume: Mutex::new(volume),
        });

        self.started.lock().push(Started {
            track: track.clone(),
            notifier: on_finished.clone(),
            control: control.clone(),
        });

        Ok(Box::new(FakeHandle {
            control,
            notifier: on_finished,
        }))
    }
}

struct FakeHandle {
    control: Arc<FakeControl>,
    notifier: TrackEndNotifier,
}

impl PlaybackHandle for FakeHandle {
    fn stop(&self) {
        if !self.control.stopped.swap(true, Ordering::SeqCst) {
            self.notifier.notify(FinishReason::Completed);
        }
    }

    fn pause(&self) -> Result<(), PlayerError> {
        self.control.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn resume(&self) -> Result<(), PlayerError> {
        self.control.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn set_volume(&self, volume: f32) {
        *self.control.volume.lock() = volume;
    }
}

pub struct FakeConnector {
    pub transport: Arc<FakeTransport>,
    fail_joins: AtomicBool,
    joins: AtomicUsize,
    leaves: AtomicUsize,
    connected: Mutex<HashSet<GuildId>>,
    leave_delay: Mutex<Duration>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self {
            transport: Arc::new(FakeTransport::default()),
            fail_joins: AtomicBool::new(false),
            joins: AtomicUsize::new(0),
            leaves: AtomicUsize::new(0),
            connected: Mutex::new(HashSet::new()),
            leave_delay: Mutex::new(Duration::ZERO),
        }
    }

    /// Makes every later `leave` take `delay` before returning.
    pub fn delay_leaves(&self, delay: Duration) {
        *self.leave_delay.lock() = delay;
    }

    /// Simulates the bot being kicked: the call is gone without a `leave`.
    pub fn drop_connection(&self, guild_id: GuildId) {
        self.connected.lock().remove(&guild_id);
    }

    pub fn fail_joins(&self, fail: bool) {
        self.fail_joins.store(fail, Ordering::SeqCst);
    }

    pub fn joins(&self) -> usize {
        self.joins.load(Ordering::SeqCst)
    }

    pub fn leaves(&self) -> usize {
        self.leaves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VoiceConnector for FakeConnector {
    async fn join(
        &self,
        guild_id: GuildId,
        _channel_id: ChannelId,
    ) -> Result<Arc<dyn AudioTransport>, PlayerError> {
        if self.fail_joins.load(Ordering::SeqCst) {
            return Err(PlayerError::Connection("sin permisos".to_string()));
        }

        self.joins.fetch_add(1, Ordering::SeqCst);
        self.connected.lock().insert(guild_id);
        let transport: Arc<dyn AudioTransport> = self.transport.clone();
        Ok(transport)
    }

    async fn leave(&self, guild_id: GuildId) -> Result<(), PlayerError> {
        let delay = *self.leave_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.connected.lock().remove(&guild_id);
        self.leaves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn is_connected(&self, guild_id: GuildId) -> bool {
        self.connected.lock().contains(&guild_id)
    }
}
