use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use super::{
    error::PlayerError,
    queue::QueueSnapshot,
    session::{PlayOutcome, PlaybackSession, PlaybackState, SkipOutcome},
    track::TrackMetadata,
    transport::VoiceConnector,
};
use crate::{config::Config, sources::TrackResolver};

/// Intentos de conexión cuando la sesión se retira a mitad de camino
const CONNECT_RETRIES: usize = 3;

/// Registro de sesiones por guild y punto de entrada de los comandos
pub struct QueueManager {
    sessions: DashMap<GuildId, Arc<PlaybackSession>>,
    connector: Arc<dyn VoiceConnector>,
    resolver: Arc<dyn TrackResolver>,
    default_volume: f32,
    max_advance_attempts: usize,
    resolve_timeout: Duration,
}

impl QueueManager {
    pub fn new(
        connector: Arc<dyn VoiceConnector>,
        resolver: Arc<dyn TrackResolver>,
        config: &Config,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            connector,
            resolver,
            default_volume: config.default_volume,
            max_advance_attempts: config.max_advance_attempts,
            resolve_timeout: config.resolve_timeout(),
        }
    }

    fn new_session(&self, guild_id: GuildId) -> Arc<PlaybackSession> {
        debug!("Nueva sesión para guild {}", guild_id);
        PlaybackSession::new(
            guild_id,
            self.resolver.clone(),
            self.default_volume,
            self.max_advance_attempts,
        )
    }

    /// Obtiene la sesión del guild, creándola si no existe.
    /// Una sesión retirada por /stop se reemplaza por una nueva.
    pub fn get_or_create(&self, guild_id: GuildId) -> Arc<PlaybackSession> {
        let mut entry = self
            .sessions
            .entry(guild_id)
            .or_insert_with(|| self.new_session(guild_id));

        if entry.is_retired() {
            *entry = self.new_session(guild_id);
        }

        entry.clone()
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<PlaybackSession>> {
        self.sessions.get(&guild_id).map(|s| s.clone())
    }

    pub fn remove(&self, guild_id: GuildId) -> Option<Arc<PlaybackSession>> {
        self.sessions.remove(&guild_id).map(|(_, session)| session)
    }

    /// Quita la sesión solo si sigue siendo la misma instancia
    fn remove_session(&self, session: &Arc<PlaybackSession>) {
        self.sessions
            .remove_if(&session.guild_id(), |_, current| Arc::ptr_eq(current, session));
    }

    /// Sesión del guild conectada a `channel_id`.
    ///
    /// Si un /stop retira la sesión mientras esperábamos su lock, se vuelve a
    /// empezar con una nueva. Un join fallido no deja la sesión registrada.
    async fn connect_session(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<PlaybackSession>, PlayerError> {
        for _ in 0..CONNECT_RETRIES {
            let session = self.get_or_create(guild_id);

            match session.connect(self.connector.as_ref(), channel_id).await {
                Ok(()) => return Ok(session),
                Err(_) if session.is_retired() => {
                    debug!("Sesión retirada durante la conexión en guild {}, reintentando", guild_id);
                }
                Err(e) => {
                    if session.retire_if_unused().await {
                        self.remove_session(&session);
                    }
                    return Err(e);
                }
            }
        }

        Err(PlayerError::NotConnected)
    }

    async fn connected(&self, guild_id: GuildId) -> Result<Arc<PlaybackSession>, PlayerError> {
        let session = self.get(guild_id).ok_or(PlayerError::NotConnected)?;
        if session.state().await == PlaybackState::Disconnected {
            return Err(PlayerError::NotConnected);
        }
        Ok(session)
    }

    /// Conecta al canal del usuario, resuelve la consulta y la reproduce o encola
    pub async fn play(
        &self,
        guild_id: GuildId,
        user_channel: Option<ChannelId>,
        query: &str,
        requested_by: UserId,
    ) -> Result<PlayOutcome, PlayerError> {
        let channel_id = user_channel.ok_or(PlayerError::NotInVoiceChannel)?;

        let session = self.connect_session(guild_id, channel_id).await?;

        let resolved = tokio::time::timeout(
            self.resolve_timeout,
            self.resolver.resolve(query, requested_by),
        )
        .await
        .map_err(|_| {
            warn!("⏰ Timeout resolviendo '{}' en guild {}", query, guild_id);
            PlayerError::Resolution(format!(
                "tiempo de espera agotado ({}s)",
                self.resolve_timeout.as_secs()
            ))
        })??;

        let track = resolved.ok_or_else(|| PlayerError::NotFound(query.to_string()))?;
        session.enqueue_or_play(track).await
    }

    pub async fn pause(&self, guild_id: GuildId) -> Result<(), PlayerError> {
        match self.get(guild_id) {
            Some(session) => session.pause().await,
            None => Err(PlayerError::NothingPlaying),
        }
    }

    pub async fn resume(&self, guild_id: GuildId) -> Result<(), PlayerError> {
        match self.get(guild_id) {
            Some(session) => session.resume().await,
            None => Err(PlayerError::NothingPaused),
        }
    }

    pub async fn skip(&self, guild_id: GuildId) -> Result<SkipOutcome, PlayerError> {
        match self.get(guild_id) {
            Some(session) => session.skip().await,
            None => Err(PlayerError::NothingPlaying),
        }
    }

    /// Detiene todo, limpia la cola, sale del canal y elimina la sesión
    pub async fn stop(&self, guild_id: GuildId) -> Result<(), PlayerError> {
        let session = self.connected(guild_id).await?;
        session.stop_all(self.connector.as_ref()).await;
        self.remove_session(&session);
        Ok(())
    }

    pub async fn leave(&self, guild_id: GuildId) -> Result<(), PlayerError> {
        let session = self.connected(guild_id).await?;
        session.disconnect(self.connector.as_ref()).await;
        self.remove_session(&session);
        Ok(())
    }

    pub async fn queue(&self, guild_id: GuildId) -> QueueSnapshot {
        match self.get(guild_id) {
            Some(session) => session.snapshot().await,
            None => QueueSnapshot::empty(self.default_volume),
        }
    }

    pub async fn now_playing(
        &self,
        guild_id: GuildId,
    ) -> Result<(TrackMetadata, PlaybackState), PlayerError> {
        let session = self.get(guild_id).ok_or(PlayerError::NothingPlaying)?;
        session.now_playing().await.ok_or(PlayerError::NothingPlaying)
    }

    /// Ajusta el volumen (0.0–2.0) o, sin nivel, devuelve el actual
    pub async fn set_volume(&self, guild_id: GuildId, level: Option<f32>) -> Result<f32, PlayerError> {
        let session = self.connected(guild_id).await?;
        match level {
            Some(level) => Ok(session.set_volume(level).await),
            None => Ok(session.volume().await),
        }
    }

    /// El bot salió del canal de voz (expulsado o desconectado).
    ///
    /// Solo limpia si la capa de voz confirma que ya no hay llamada: un aviso
    /// atrasado de un /stop anterior no debe cerrar la sesión nueva.
    pub async fn handle_disconnected(&self, guild_id: GuildId) {
        let Some(session) = self.get(guild_id) else {
            return;
        };

        if self.connector.is_connected(guild_id).await {
            debug!("Aviso de desconexión obsoleto en guild {}, la llamada sigue activa", guild_id);
            return;
        }

        info!("🔌 Bot desconectado del canal de voz en guild {}, limpiando sesión", guild_id);
        session.stop_all(self.connector.as_ref()).await;
        self.remove_session(&session);
    }

    /// Detiene todas las sesiones activas
    pub async fn shutdown(&self) {
        let guilds: Vec<GuildId> = self.sessions.iter().map(|entry| *entry.key()).collect();
        let sessions: Vec<Arc<PlaybackSession>> =
            guilds.into_iter().filter_map(|guild_id| self.remove(guild_id)).collect();

        info!("🛑 Cerrando {} sesiones de reproducción", sessions.len());
        futures::future::join_all(
            sessions
                .iter()
                .map(|session| session.stop_all(self.connector.as_ref())),
        )
        .await;
    }

    #[cfg(test)]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
