use async_process::Command;
use regex::Regex;
use serde::Deserialize;
use serenity::model::id::UserId;
use std::{sync::LazyLock, time::Duration};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::audio::{error::PlayerError, track::TrackMetadata};

static YOUTUBE_URL: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^(https?://)?(www\.|m\.|music\.)?(youtube|youtu|youtube-nocookie)\.(com|be)/").ok()
});

/// Cliente para interactuar con YouTube/yt-dlp
pub struct YouTubeClient {
    ytdlp_path: String,
    rate_limiter: Semaphore,
}

/// Información extraída de yt-dlp
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: String,
    webpage_url: Option<String>,
    original_url: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
}

impl YtDlpInfo {
    fn into_metadata(self, fallback_url: &str, requested_by: UserId) -> TrackMetadata {
        let url = self
            .webpage_url
            .or(self.original_url)
            .unwrap_or_else(|| fallback_url.to_string());

        let mut track = TrackMetadata::new(self.title, url, requested_by);

        if let Some(duration) = self.duration.filter(|d| d.is_finite() && *d > 0.0) {
            track = track.with_duration(Duration::from_secs_f64(duration));
        }

        if let Some(thumbnail) = self.thumbnail {
            track = track.with_thumbnail(thumbnail);
        }

        track
    }
}

impl YouTubeClient {
    pub fn new(ytdlp_path: String) -> Self {
        Self {
            ytdlp_path,
            // Limitar requests concurrentes para evitar rate limiting
            rate_limiter: Semaphore::new(3),
        }
    }

    /// Primer resultado de una búsqueda en YouTube
    pub async fn search_first(
        &self,
        query: &str,
        requested_by: UserId,
    ) -> Result<Option<TrackMetadata>, PlayerError> {
        info!("🔍 Buscando en YouTube: {}", query);

        let search_query = format!("ytsearch1:{}", query);
        let stdout = self.run(&search_query).await?;

        let first = stdout
            .lines()
            .filter(|line| !line.trim().is_empty())
            .find_map(|line| serde_json::from_str::<YtDlpInfo>(line).ok());

        match first {
            Some(info) => Ok(Some(info.into_metadata(&search_query, requested_by))),
            None => {
                debug!("Sin resultados para '{}'", query);
                Ok(None)
            }
        }
    }

    /// Obtiene información de una URL específica
    pub async fn get_info(&self, url: &str, requested_by: UserId) -> Result<TrackMetadata, PlayerError> {
        debug!("📊 Obteniendo info de: {}", url);

        let stdout = self.run(url).await?;
        let line = stdout
            .lines()
            .find(|line| !line.trim().is_empty())
            .ok_or_else(|| PlayerError::NotFound(url.to_string()))?;

        let info: YtDlpInfo = serde_json::from_str(line).map_err(|e| {
            PlayerError::Resolution(format!("respuesta de yt-dlp inválida: {}", e))
        })?;

        Ok(info.into_metadata(url, requested_by))
    }

    async fn run(&self, target: &str) -> Result<String, PlayerError> {
        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|e| PlayerError::Resolution(e.to_string()))?;

        let output = Command::new(&self.ytdlp_path)
            .args(["--no-playlist", "--dump-json", "--skip-download", "--no-warnings", target])
            .output()
            .await
            .map_err(|e| PlayerError::Resolution(format!("error al ejecutar yt-dlp: {}", e)))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            warn!("❌ yt-dlp falló para '{}': {}", target, error.trim());
            return Err(PlayerError::Resolution(first_error_line(&error)));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Versión de yt-dlp; falla si el ejecutable no está disponible
    pub async fn version(&self) -> Result<String, PlayerError> {
        let output = Command::new(&self.ytdlp_path)
            .arg("--version")
            .output()
            .await
            .map_err(|e| PlayerError::Resolution(format!("yt-dlp no está disponible: {}", e)))?;

        if !output.status.success() {
            return Err(PlayerError::Resolution(
                "yt-dlp no puede ejecutarse correctamente".to_string(),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Verifica si una URL es válida para YouTube
    pub fn is_youtube_url(url: &str) -> bool {
        YOUTUBE_URL.as_ref().is_some_and(|re| re.is_match(url))
    }
}

fn first_error_line(stderr: &str) -> String {
    stderr
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("ERROR"))
        .or_else(|| stderr.lines().map(str::trim).find(|line| !line.is_empty()))
        .unwrap_or("yt-dlp terminó con error")
        .to_string()
}
