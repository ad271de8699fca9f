//! Spotify track links.
//!
//! Spotify does not serve audio to bots, so a track link is only used to
//! build an `"artists - title"` query that is then searched on YouTube.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use tracing::{debug, info};

use crate::audio::error::PlayerError;

const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const API_URL: &str = "https://api.spotify.com/v1";

static SPOTIFY_URL: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^https?://open\.spotify\.com/(?:intl-[a-z]+/)?(track|album|playlist)/([a-zA-Z0-9]+)").ok()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpotifyLink {
    Track(String),
    Album(String),
    Playlist(String),
}

impl SpotifyLink {
    pub fn parse(url: &str) -> Option<Self> {
        let captures = SPOTIFY_URL.as_ref()?.captures(url)?;
        let id = captures.get(2)?.as_str().to_string();

        match captures.get(1)?.as_str() {
            "track" => Some(Self::Track(id)),
            "album" => Some(Self::Album(id)),
            "playlist" => Some(Self::Playlist(id)),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct SpotifyTrack {
    name: String,
    artists: Vec<SpotifyArtist>,
}

#[derive(Debug, Deserialize)]
struct SpotifyArtist {
    name: String,
}

impl SpotifyTrack {
    fn search_query(&self) -> String {
        let artists = self
            .artists
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        format!("{} - {}", artists, self.name)
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Cliente de la Web API de Spotify (client credentials)
pub struct SpotifyClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<CachedToken>>,
}

impl SpotifyClient {
    pub fn new(http: reqwest::Client, client_id: String, client_secret: String) -> Self {
        Self {
            http,
            client_id,
            client_secret,
            token: Mutex::new(None),
        }
    }

    async fn access_token(&self) -> Result<String, PlayerError> {
        let cached = self.token.lock().clone();
        if let Some(token) = cached.filter(|t| t.expires_at > Utc::now()) {
            return Ok(token.value);
        }

        debug!("🔑 Renovando token de Spotify");

        let response: TokenResponse = self
            .http
            .post(TOKEN_URL)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PlayerError::Resolution(format!("autenticación con Spotify falló: {}", e)))?
            .json()
            .await
            .map_err(|e| PlayerError::Resolution(format!("token de Spotify inválido: {}", e)))?;

        // Margen para no usar un token a punto de expirar
        let expires_at = Utc::now() + ChronoDuration::seconds((response.expires_in - 60).max(0));
        *self.token.lock() = Some(CachedToken {
            value: response.access_token.clone(),
            expires_at,
        });

        Ok(response.access_token)
    }

    /// Consulta el track y devuelve la búsqueda "artistas - título"
    pub async fn track_query(&self, track_id: &str) -> Result<String, PlayerError> {
        let token = self.access_token().await?;

        let response = self
            .http
            .get(format!("{}/tracks/{}", API_URL, track_id))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| PlayerError::Resolution(format!("error consultando Spotify: {}", e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(PlayerError::NotFound(format!("spotify:track:{}", track_id)));
        }

        let track: SpotifyTrack = response
            .error_for_status()
            .map_err(|e| PlayerError::Resolution(format!("error consultando Spotify: {}", e)))?
            .json()
            .await
            .map_err(|e| PlayerError::Resolution(format!("respuesta de Spotify inválida: {}", e)))?;

        let query = track.search_query();
        info!("🎧 Track de Spotify: {}", query);
        Ok(query)
    }
}
