use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tracing::{error, info, warn};

mod audio;
mod bot;
mod config;
mod sources;
mod ui;

use crate::audio::{manager::QueueManager, voice::SongbirdConnector};
use crate::bot::JukeboxBot;
use crate::config::Config;
use crate::sources::SourceManager;

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("jukebox_bot=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Jukebox Bot v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    let http = reqwest::Client::new();
    let sources = Arc::new(SourceManager::new(&config, http.clone()));

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        sources.verify_dependencies().await?;
        println!("OK");
        return Ok(());
    }

    if let Err(e) = sources.verify_dependencies().await {
        warn!("⚠️ {}; la reproducción fallará hasta instalar yt-dlp", e);
    }

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let songbird = Songbird::serenity();
    // Songbird exige una ruta 'static para el ejecutable de yt-dlp
    let ytdlp_path: &'static str = Box::leak(config.ytdlp_path.clone().into_boxed_str());
    let connector = Arc::new(SongbirdConnector::new(songbird.clone(), http, ytdlp_path));
    let manager = Arc::new(QueueManager::new(connector, sources, &config));

    // Crear handler del bot
    let handler = JukeboxBot::new(config.clone(), manager.clone());

    // Construir cliente
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        manager.shutdown().await;
        shard_manager.shutdown_all().await;
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}
