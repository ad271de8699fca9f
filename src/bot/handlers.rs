use anyhow::Result;
use serenity::{
    builder::{
        CreateEmbed, CreateInteractionResponse, CreateInteractionResponseMessage,
        EditInteractionResponse,
    },
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use tracing::{info, warn};

use crate::{
    audio::{
        error::PlayerError,
        session::{PlayOutcome, PlaybackState},
    },
    bot::JukeboxBot,
    ui::embeds,
};

/// Maneja comandos slash
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &JukeboxBot) -> Result<()> {
    let Some(guild_id) = command.guild_id else {
        let embed = embeds::create_error_embed("Solo en servidores", "Este comando solo funciona dentro de un servidor");
        return respond(ctx, &command, embed, true).await;
    };

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    match command.data.name.as_str() {
        "play" => handle_play(ctx, &command, bot, guild_id).await?,
        "pause" => {
            let embed = match bot.manager.pause(guild_id).await {
                Ok(()) => embeds::create_success_embed("Pausado", "⏸️ Reproducción pausada"),
                Err(e) => embeds::create_player_error_embed(&e),
            };
            respond(ctx, &command, embed, false).await?;
        }
        "resume" => {
            let embed = match bot.manager.resume(guild_id).await {
                Ok(()) => embeds::create_success_embed("Reanudado", "▶️ Reproducción reanudada"),
                Err(e) => embeds::create_player_error_embed(&e),
            };
            respond(ctx, &command, embed, false).await?;
        }
        "skip" => {
            let embed = match bot.manager.skip(guild_id).await {
                Ok(outcome) => embeds::create_skip_embed(&outcome),
                Err(e) => embeds::create_player_error_embed(&e),
            };
            respond(ctx, &command, embed, false).await?;
        }
        "stop" => {
            let embed = match bot.manager.stop(guild_id).await {
                Ok(()) => embeds::create_success_embed(
                    "Detenido",
                    "⏹️ Música detenida, cola limpiada y desconectado del canal",
                ),
                Err(e) => embeds::create_player_error_embed(&e),
            };
            respond(ctx, &command, embed, false).await?;
        }
        "leave" => {
            let embed = match bot.manager.leave(guild_id).await {
                Ok(()) => embeds::create_success_embed("Desconectado", "👋 Salí del canal de voz"),
                Err(e) => embeds::create_player_error_embed(&e),
            };
            respond(ctx, &command, embed, false).await?;
        }
        "queue" => {
            let snapshot = bot.manager.queue(guild_id).await;
            respond(ctx, &command, embeds::create_queue_embed(&snapshot), false).await?;
        }
        "nowplaying" => {
            let embed = match bot.manager.now_playing(guild_id).await {
                Ok((track, state)) => embeds::create_now_playing_embed(&track, state),
                Err(e) => embeds::create_player_error_embed(&e),
            };
            respond(ctx, &command, embed, false).await?;
        }
        "volume" => handle_volume(ctx, &command, bot, guild_id).await?,
        _ => {
            command
                .create_response(
                    &ctx.http,
                    CreateInteractionResponse::Message(
                        CreateInteractionResponseMessage::new()
                            .content("❌ Comando no reconocido")
                            .ephemeral(true),
                    ),
                )
                .await?;
        }
    }

    Ok(())
}

async fn handle_play(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<()> {
    let query = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "query")
        .and_then(|opt| opt.value.as_str())
        .ok_or_else(|| anyhow::anyhow!("Query no proporcionado"))?
        .to_string();

    // Defer la respuesta ya que puede tomar tiempo
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let voice_channel_id = get_user_voice_channel(ctx, guild_id, command.user.id);

    let embed = match bot
        .manager
        .play(guild_id, voice_channel_id, &query, command.user.id)
        .await
    {
        Ok(PlayOutcome::NowPlaying(track)) => {
            embeds::create_now_playing_embed(&track, PlaybackState::Playing)
        }
        Ok(PlayOutcome::Queued { track, position }) => {
            embeds::create_track_added_embed(&track, position)
        }
        Err(e) => {
            if !matches!(e, PlayerError::NotInVoiceChannel | PlayerError::NotFound(_)) {
                warn!("⚠️ /play falló en guild {}: {}", guild_id, e);
            }
            embeds::create_player_error_embed(&e)
        }
    };

    command
        .edit_response(&ctx.http, EditInteractionResponse::new().embed(embed))
        .await?;

    Ok(())
}

async fn handle_volume(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<()> {
    let level = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "level")
        .and_then(|opt| opt.value.as_i64())
        .map(|level| level.clamp(0, 200) as f32 / 100.0);

    let embed = match bot.manager.set_volume(guild_id, level).await {
        Ok(volume) => embeds::create_volume_embed(volume),
        Err(e) => embeds::create_player_error_embed(&e),
    };

    respond(ctx, command, embed, false).await
}

async fn respond(
    ctx: &Context,
    command: &CommandInteraction,
    embed: CreateEmbed,
    ephemeral: bool,
) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .embed(embed)
                    .ephemeral(ephemeral),
            ),
        )
        .await?;

    Ok(())
}

/// Canal de voz del usuario según la caché, si está en uno
fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;

    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}
