//! # Bot Module
//!
//! Discord glue for the jukebox.
//!
//! [`JukeboxBot`] implements Serenity's [`EventHandler`]: it registers the
//! slash commands once the gateway is ready, routes every command interaction
//! to [`handlers`], and tears a guild's session down when the bot itself is
//! removed from voice.

use anyhow::Result;
use serenity::{
    all::{Context, EventHandler, Interaction, Ready, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tracing::{error, info};

pub mod commands;
pub mod handlers;

use crate::{audio::manager::QueueManager, config::Config};

/// Discord event handler holding the shared playback registry.
pub struct JukeboxBot {
    pub config: Arc<Config>,
    pub manager: Arc<QueueManager>,
}

impl JukeboxBot {
    pub fn new(config: Arc<Config>, manager: Arc<QueueManager>) -> Self {
        Self { config, manager }
    }

    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        match self.config.guild_id {
            Some(guild_id) => {
                commands::register_guild_commands(ctx, serenity::all::GuildId::new(guild_id)).await
            }
            None => commands::register_global_commands(ctx).await,
        }
    }
}

#[async_trait]
impl EventHandler for JukeboxBot {
    /// Registers slash commands (global, or per guild when `GUILD_ID` is set).
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command_interaction) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command_interaction, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    /// Cleans up when the bot is kicked or disconnected from voice.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || new.channel_id.is_some() {
            return;
        }

        // El estado anterior puede faltar si la caché no lo tenía
        if let Some(guild_id) = new.guild_id.or(old.and_then(|o| o.guild_id)) {
            if self.manager.get(guild_id).is_some() {
                info!("🔌 Bot desconectado en guild {}", guild_id);
                self.manager.handle_disconnected(guild_id).await;
            }
        }
    }
}
