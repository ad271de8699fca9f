//! Voice layer backed by Songbird.
//!
//! Audio is fetched lazily: `YoutubeDl` only spawns yt-dlp once the driver
//! starts pulling the track, so [`SongbirdTransport::start`] returns as soon
//! as the track is bound to the call.

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    input::YoutubeDl, tracks::TrackHandle, Call, Event, EventContext,
    EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use super::{
    error::PlayerError,
    track::TrackMetadata,
    transport::{AudioTransport, FinishReason, PlaybackHandle, TrackEndNotifier, VoiceConnector},
};

pub struct SongbirdConnector {
    manager: Arc<Songbird>,
    http: reqwest::Client,
    ytdlp_path: &'static str,
}

impl SongbirdConnector {
    /// `ytdlp_path` must outlive every track, so it is fixed for the whole process.
    pub fn new(manager: Arc<Songbird>, http: reqwest::Client, ytdlp_path: &'static str) -> Self {
        Self {
            manager,
            http,
            ytdlp_path,
        }
    }
}

#[async_trait]
impl VoiceConnector for SongbirdConnector {
    async fn join(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn AudioTransport>, PlayerError> {
        let call = self.manager.join(guild_id, channel_id).await.map_err(|e| {
            error!("Error al obtener handler de voz: {:?}", e);
            PlayerError::Connection(e.to_string())
        })?;

        // Sin audio entrante que procesar
        call.lock().await.deafen(true).await.ok();

        let transport: Arc<dyn AudioTransport> = Arc::new(SongbirdTransport {
            guild_id,
            call,
            http: self.http.clone(),
            ytdlp_path: self.ytdlp_path,
        });
        Ok(transport)
    }

    async fn leave(&self, guild_id: GuildId) -> Result<(), PlayerError> {
        self.manager
            .remove(guild_id)
            .await
            .map_err(|e| PlayerError::Connection(e.to_string()))
    }

    async fn is_connected(&self, guild_id: GuildId) -> bool {
        match self.manager.get(guild_id) {
            Some(call) => call.lock().await.current_channel().is_some(),
            None => false,
        }
    }
}

pub struct SongbirdTransport {
    guild_id: GuildId,
    call: Arc<Mutex<Call>>,
    http: reqwest::Client,
    ytdlp_path: &'static str,
}

#[async_trait]
impl AudioTransport for SongbirdTransport {
    async fn start(
        &self,
        track: &TrackMetadata,
        volume: f32,
        on_finished: TrackEndNotifier,
    ) -> Result<Box<dyn PlaybackHandle>, PlayerError> {
        let source = stream_source(self.ytdlp_path, &self.http, track.url());

        let handle = {
            let mut call = self.call.lock().await;
            call.play_only_input(source.into())
        };

        let registered = handle
            .set_volume(volume)
            .and_then(|_| {
                handle.add_event(
                    Event::Track(TrackEvent::End),
                    TrackEndRelay {
                        notifier: on_finished.clone(),
                        reason: FinishReason::Completed,
                    },
                )
            })
            .and_then(|_| {
                handle.add_event(
                    Event::Track(TrackEvent::Error),
                    TrackEndRelay {
                        notifier: on_finished,
                        reason: FinishReason::Error,
                    },
                )
            });

        if let Err(e) = registered {
            // Sin eventos no habría avance: no dejar el track sonando huérfano
            let _ = handle.stop();
            return Err(PlayerError::TransportStart(e.to_string()));
        }

        debug!("Track enlazado a la llamada en guild {}: {}", self.guild_id, track.title());
        Ok(Box::new(SongbirdPlayback(handle)))
    }
}

/// Fuente perezosa que lanza `program` cuando el driver empieza a leer
fn stream_source(program: &'static str, http: &reqwest::Client, url: &str) -> YoutubeDl<'static> {
    YoutubeDl::new_ytdl_like(program, http.clone(), url.to_string())
}

struct SongbirdPlayback(TrackHandle);

impl PlaybackHandle for SongbirdPlayback {
    fn stop(&self) {
        if let Err(e) = self.0.stop() {
            debug!("Track ya terminado al detener: {}", e);
        }
    }

    fn pause(&self) -> Result<(), PlayerError> {
        self.0
            .pause()
            .map_err(|e| PlayerError::TransportStart(e.to_string()))
    }

    fn resume(&self) -> Result<(), PlayerError> {
        self.0
            .play()
            .map_err(|e| PlayerError::TransportStart(e.to_string()))
    }

    fn set_volume(&self, volume: f32) {
        if let Err(e) = self.0.set_volume(volume) {
            warn!("⚠️ No se pudo ajustar el volumen: {}", e);
        }
    }
}

/// Reenvía los eventos de fin de Songbird al canal de la sesión
struct TrackEndRelay {
    notifier: TrackEndNotifier,
    reason: FinishReason,
}

#[async_trait]
impl VoiceEventHandler for TrackEndRelay {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if self.reason == FinishReason::Error {
            if let EventContext::Track(tracks) = ctx {
                for (state, _) in tracks.iter() {
                    warn!("❌ Error de reproducción: {:?}", state.playing);
                }
            }
        }

        self.notifier.notify(self.reason);
        None
    }
}
