use serenity::model::id::ChannelId;
use thiserror::Error;

/// Errores que el motor de reproducción devuelve a los comandos.
///
/// Cada comando recibe uno de estos valores como resultado tipado; la capa de
/// presentación decide cómo mostrarlo.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlayerError {
    #[error("el usuario no está en un canal de voz")]
    NotInVoiceChannel,

    #[error("el bot no está conectado a un canal de voz")]
    NotConnected,

    #[error("el bot ya está conectado en otro canal de voz ({0})")]
    AlreadyConnectedElsewhere(ChannelId),

    #[error("no se pudo conectar al canal de voz: {0}")]
    Connection(String),

    #[error("no se pudo resolver la canción: {0}")]
    Resolution(String),

    #[error("sin resultados para \"{0}\"")]
    NotFound(String),

    #[error("no hay nada reproduciéndose")]
    NothingPlaying,

    #[error("no hay nada en pausa")]
    NothingPaused,

    #[error("no se pudo iniciar la reproducción: {0}")]
    TransportStart(String),
}
