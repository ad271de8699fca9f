use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::audio::{
    error::PlayerError,
    queue::QueueSnapshot,
    session::{PlaybackState, SkipOutcome},
    track::TrackMetadata,
};

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const WARNING_ORANGE: Colour = Colour::from_rgb(255, 193, 7);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎵 Jukebox Bot";

/// Canciones pendientes que se listan en /queue
const QUEUE_PREVIEW: usize = 10;

fn track_fields(mut embed: CreateEmbed, track: &TrackMetadata) -> CreateEmbed {
    if let Some(duration) = track.duration() {
        embed = embed.field("⏱️ Duración", format_duration(duration), true);
    } else {
        embed = embed.field("⏱️ Duración", "🔴 En vivo", true);
    }

    embed = embed.field("👤 Solicitado por", format!("<@{}>", track.requested_by()), true);

    if let Some(thumbnail) = track.thumbnail() {
        embed = embed.thumbnail(thumbnail);
    }

    embed.url(track.url())
}

/// Crea un embed para mostrar la canción actual
pub fn create_now_playing_embed(track: &TrackMetadata, state: PlaybackState) -> CreateEmbed {
    let (title, color) = match state {
        PlaybackState::Paused => ("⏸️ En Pausa", colors::WARNING_ORANGE),
        _ => ("🎵 Reproduciendo Ahora", colors::SUCCESS_GREEN),
    };

    let embed = CreateEmbed::default()
        .title(title)
        .description(format!("**{}**", track.title()))
        .color(color);

    track_fields(embed, track)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed para mostrar que se agregó una canción a la cola
pub fn create_track_added_embed(track: &TrackMetadata, position: usize) -> CreateEmbed {
    let embed = CreateEmbed::default()
        .title("✅ Canción Agregada a la Cola")
        .description(format!("**{}**", track.title()))
        .color(colors::MUSIC_PURPLE)
        .field("📍 Posición", format!("#{}", position), true);

    let requested_at = Timestamp::from_unix_timestamp(track.requested_at().timestamp())
        .unwrap_or_else(|_| Timestamp::now());

    track_fields(embed, track)
        .timestamp(requested_at)
        .footer(CreateEmbedFooter::new(
            "🎵 Se reproducirá automáticamente cuando llegue su turno",
        ))
}

/// Crea un embed para mostrar la cola de reproducción
pub fn create_queue_embed(snapshot: &QueueSnapshot) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("📋 Cola de Reproducción")
        .color(colors::INFO_BLUE);

    if snapshot.is_empty() {
        return embed
            .description("😴 **La cola está vacía**\n\n💡 Usa `/play <canción>` para agregar música")
            .color(colors::NEUTRAL_GRAY)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
            .timestamp(Timestamp::now());
    }

    // Canción actual
    if let Some(current) = &snapshot.current {
        let status = match snapshot.state {
            PlaybackState::Paused => "⏸️",
            _ => "▶️",
        };

        embed = embed.field(
            format!("{} Reproduciendo", status),
            format!("**{}** • <@{}>", current.title(), current.requested_by()),
            false,
        );
    }

    // Próximas canciones
    let (shown, hidden) = snapshot.up_next(QUEUE_PREVIEW);
    if !shown.is_empty() {
        let mut description = String::new();

        for (i, item) in shown.iter().enumerate() {
            let duration = item
                .duration()
                .map(|d| format!(" `[{}]`", format_duration(d)))
                .unwrap_or_default();

            description.push_str(&format!(
                "**{}**. {}{} • <@{}>\n",
                i + 1,
                item.title(),
                duration,
                item.requested_by()
            ));
        }

        if hidden > 0 {
            description.push_str(&format!("… y {} más", hidden));
        }

        embed = embed.field("Próximas canciones", description, false);
    }

    // Información adicional
    let mut info = format!("**Pendientes:** {} canciones", snapshot.pending.len());

    if snapshot.total_duration > Duration::ZERO {
        info.push_str(&format!(
            " • **Duración:** {}",
            format_duration(snapshot.total_duration)
        ));
    }

    info.push_str(&format!(" • **Volumen:** {}%", volume_percent(snapshot.volume)));

    embed
        .field("Información", info, false)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
        .timestamp(Timestamp::now())
}

/// Crea un embed con el resultado de /skip
pub fn create_skip_embed(outcome: &SkipOutcome) -> CreateEmbed {
    let next = match outcome.remaining {
        0 => "📭 No hay más canciones en la cola".to_string(),
        1 => "➡️ Queda 1 canción en la cola".to_string(),
        n => format!("➡️ Quedan {} canciones en la cola", n),
    };

    create_success_embed(
        "Canción Saltada",
        &format!("**{}**\n\n{}", outcome.skipped.title(), next),
    )
}

/// Traduce un error del reproductor a un embed para el usuario
pub fn create_player_error_embed(error: &PlayerError) -> CreateEmbed {
    let title = match error {
        PlayerError::NotInVoiceChannel => "No estás en un canal de voz",
        PlayerError::NotConnected => "No estoy conectado",
        PlayerError::AlreadyConnectedElsewhere(_) => "Ya estoy en otro canal",
        PlayerError::Connection(_) => "Error de conexión",
        PlayerError::Resolution(_) => "Error al buscar",
        PlayerError::NotFound(_) => "Sin resultados",
        PlayerError::NothingPlaying => "Nada reproduciéndose",
        PlayerError::NothingPaused => "Nada en pausa",
        PlayerError::TransportStart(_) => "Error de reproducción",
    };

    let mut description = capitalize(&error.to_string());
    if let PlayerError::AlreadyConnectedElsewhere(channel) = error {
        description = format!("Estoy reproduciendo en <#{}>. Únete ahí para usarme.", channel);
    }

    create_error_embed(title, &description)
}

/// Crea un embed de error
pub fn create_error_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("❌ {}", title))
        .description(description)
        .color(colors::ERROR_RED)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed de éxito
pub fn create_success_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("✅ {}", title))
        .description(description)
        .color(colors::SUCCESS_GREEN)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed de volumen con indicador visual
pub fn create_volume_embed(volume: f32) -> CreateEmbed {
    let percent = volume_percent(volume);
    let status_emoji = match percent {
        0 => "🔇",
        1..=50 => "🔉",
        _ => "🔊",
    };

    CreateEmbed::default()
        .title(format!("{} Control de Volumen", status_emoji))
        .description(format!("**Volumen actual: {}%**", percent))
        .field("📊 Nivel", create_volume_bar(volume), false)
        .color(colors::INFO_BLUE)
        .footer(CreateEmbedFooter::new("💡 Usa /volume <0-200> para ajustar"))
        .timestamp(Timestamp::now())
}

fn volume_percent(volume: f32) -> u32 {
    (volume.clamp(0.0, 2.0) * 100.0).round() as u32
}

/// Barra de 20 segmentos sobre la escala 0–200%
fn create_volume_bar(volume: f32) -> String {
    let segments = 20;
    let filled = ((volume.clamp(0.0, 2.0) / 2.0) * segments as f32).round() as usize;
    let empty = segments - filled;

    format!("`[{}{}]`", "█".repeat(filled), "▒".repeat(empty))
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Formatea una duración en formato legible
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}
