use chrono::{DateTime, Utc};
use serenity::model::id::UserId;
use std::time::Duration;

/// A resolved track, ready to be handed to the audio transport.
///
/// Values are built once by a resolver and never mutated afterwards; the
/// `with_*` builders consume `self` and are only used while resolving.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackMetadata {
    title: String,
    url: String,
    duration: Option<Duration>,
    thumbnail: Option<String>,
    requested_by: UserId,
    requested_at: DateTime<Utc>,
}

impl TrackMetadata {
    pub fn new(title: impl Into<String>, url: impl Into<String>, requested_by: UserId) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            duration: None,
            thumbnail: None,
            requested_by,
            requested_at: Utc::now(),
        }
    }

    // Getters
    pub fn title(&self) -> &str {
        &self.title
    }
    pub fn url(&self) -> &str {
        &self.url
    }
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }
    pub fn thumbnail(&self) -> Option<&str> {
        self.thumbnail.as_deref()
    }
    pub fn requested_by(&self) -> UserId {
        self.requested_by
    }
    pub fn requested_at(&self) -> DateTime<Utc> {
        self.requested_at
    }

    // Builders
    pub fn with_duration(mut self, duration: Duration) -> Self {
        // Solo segundos enteros
        self.duration = Some(Duration::from_secs(duration.as_secs()));
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: String) -> Self {
        self.thumbnail = Some(thumbnail);
        self
    }

    /// Conserva quién pidió la canción al refrescar sus metadatos
    pub fn with_requested_by(mut self, user_id: UserId) -> Self {
        self.requested_by = user_id;
        self
    }
}
