pub mod spotify;
pub mod youtube;

use async_trait::async_trait;
use serenity::model::id::UserId;
use tracing::{debug, info};

use crate::audio::{error::PlayerError, track::TrackMetadata};
use crate::config::Config;

pub use spotify::{SpotifyClient, SpotifyLink};
pub use youtube::YouTubeClient;

/// Convierte lo que escribe el usuario en metadata reproducible
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackResolver: Send + Sync {
    /// Resuelve un link o una búsqueda libre; `None` si no hubo resultados
    async fn resolve(
        &self,
        query: &str,
        requested_by: UserId,
    ) -> Result<Option<TrackMetadata>, PlayerError>;

    /// Vuelve a resolver un link ya conocido (refresca el stream antes de reproducir)
    async fn resolve_direct(
        &self,
        url: &str,
        requested_by: UserId,
    ) -> Result<TrackMetadata, PlayerError>;
}

/// A qué proveedor va cada consulta
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryKind {
    Spotify(SpotifyLink),
    Url(String),
    Search(String),
}

impl QueryKind {
    pub fn classify(query: &str) -> Self {
        let query = query.trim();

        if let Some(link) = SpotifyLink::parse(query) {
            return Self::Spotify(link);
        }

        if YouTubeClient::is_youtube_url(query) || is_http_url(query) {
            return Self::Url(query.to_string());
        }

        Self::Search(query.to_string())
    }
}

fn is_http_url(query: &str) -> bool {
    url::Url::parse(query)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// Gestor de fuentes: enruta cada consulta a YouTube o Spotify
pub struct SourceManager {
    youtube: YouTubeClient,
    spotify: Option<SpotifyClient>,
}

impl SourceManager {
    pub fn new(config: &Config, http: reqwest::Client) -> Self {
        let spotify = match (&config.spotify_client_id, &config.spotify_client_secret) {
            (Some(id), Some(secret)) => {
                info!("🎧 Links de Spotify habilitados");
                Some(SpotifyClient::new(http, id.clone(), secret.clone()))
            }
            _ => None,
        };

        Self {
            youtube: YouTubeClient::new(config.ytdlp_path.clone()),
            spotify,
        }
    }

    /// Verifica que yt-dlp esté instalado
    pub async fn verify_dependencies(&self) -> Result<String, PlayerError> {
        let version = self.youtube.version().await?;
        info!("✅ yt-dlp versión: {}", version);
        Ok(version)
    }

    async fn resolve_spotify(
        &self,
        link: SpotifyLink,
        requested_by: UserId,
    ) -> Result<Option<TrackMetadata>, PlayerError> {
        let SpotifyLink::Track(id) = link else {
            return Err(PlayerError::Resolution(
                "solo se soportan links de canciones de Spotify".to_string(),
            ));
        };

        let Some(spotify) = &self.spotify else {
            return Err(PlayerError::Resolution(
                "Spotify no está configurado en este bot".to_string(),
            ));
        };

        let search = spotify.track_query(&id).await?;
        debug!("🎧 Spotify {} → búsqueda '{}'", id, search);
        self.youtube.search_first(&search, requested_by).await
    }
}

#[async_trait]
impl TrackResolver for SourceManager {
    async fn resolve(
        &self,
        query: &str,
        requested_by: UserId,
    ) -> Result<Option<TrackMetadata>, PlayerError> {
        match QueryKind::classify(query) {
            QueryKind::Spotify(link) => self.resolve_spotify(link, requested_by).await,
            QueryKind::Url(url) => self.youtube.get_info(&url, requested_by).await.map(Some),
            QueryKind::Search(terms) => self.youtube.search_first(&terms, requested_by).await,
        }
    }

    async fn resolve_direct(
        &self,
        url: &str,
        requested_by: UserId,
    ) -> Result<TrackMetadata, PlayerError> {
        self.youtube.get_info(url, requested_by).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_query_routing() {
        assert_eq!(
            QueryKind::classify("https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC"),
            QueryKind::Spotify(SpotifyLink::Track("4uLU6hMCjMI75M1A2tKUQC".to_string()))
        );
        assert_eq!(
            QueryKind::classify("https://youtu.be/dQw4w9WgXcQ"),
            QueryKind::Url("https://youtu.be/dQw4w9WgXcQ".to_string())
        );
        assert_eq!(
            QueryKind::classify("https://soundcloud.com/artist/song"),
            QueryKind::Url("https://soundcloud.com/artist/song".to_string())
        );
        assert_eq!(
            QueryKind::classify("  never gonna give you up "),
            QueryKind::Search("never gonna give you up".to_string())
        );
    }

    #[tokio::test]
    async fn test_spotify_without_credentials_is_rejected() {
        let manager = SourceManager::new(&Config::default(), reqwest::Client::new());

        let result = manager
            .resolve("https://open.spotify.com/track/abc123", UserId::new(1))
            .await;
        assert!(matches!(result, Err(PlayerError::Resolution(_))));

        let result = manager
            .resolve("https://open.spotify.com/playlist/abc123", UserId::new(1))
            .await;
        assert!(matches!(result, Err(PlayerError::Resolution(_))));
    }
}
