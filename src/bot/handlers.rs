use anyhow::Result;
use serenity::{
    builder::{CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse},
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use tracing::{info, warn};

use super::{announcer, QueueBot};
use crate::audio::{
    manager::QueueManager,
    queue::{PlayerState, QueueSnapshot},
};

const QUEUE_PREVIEW: usize = 10;

/// Maneja comandos slash
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &QueueBot) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    let manager = bot.registry().get(guild_id);
    bot.announcer()
        .watch(ctx.http.clone(), &manager, command.channel_id);

    match command.data.name.as_str() {
        "play" => handle_play(ctx, &command, &manager).await?,
        "add" => handle_add(ctx, &command, &manager).await?,
        "pause" => {
            manager.pause()?;
            respond(ctx, &command, "⏸️ Pausando...").await?
        }
        "unpause" => {
            manager.unpause()?;
            respond(ctx, &command, "▶️ Reanudando...").await?
        }
        "skip" => {
            manager.skip()?;
            respond(ctx, &command, "⏭️ Saltando canción...").await?
        }
        "stop" => {
            manager.stop()?;
            respond(ctx, &command, "⏹️ Deteniendo...").await?
        }
        "reset" => {
            manager.reset()?;
            respond(ctx, &command, "🗑️ Vaciando la cola...").await?
        }
        "queue" => {
            let snapshot = manager.snapshot().await?;
            respond(ctx, &command, render_queue(&snapshot)).await?
        }
        "leave" => handle_leave(ctx, &command, &manager).await?,
        _ => respond(ctx, &command, "❌ Comando no reconocido").await?,
    }

    Ok(())
}

async fn handle_play(ctx: &Context, command: &CommandInteraction, manager: &QueueManager) -> Result<()> {
    defer(ctx, command).await?;

    let url = url_option(command);
    let outcome = async {
        ensure_voice(ctx, manager.guild_id(), command.user.id).await?;
        manager.play(url)?;
        anyhow::Ok(())
    }
    .await;

    let content = match (outcome, url) {
        (Ok(()), Some(url)) => format!("🔍 Preparando <{}>...", url),
        (Ok(()), None) => "🔍 Preparando la cola...".to_string(),
        (Err(e), _) => format!("❌ {}", e),
    };
    edit(ctx, command, content).await
}

async fn handle_add(ctx: &Context, command: &CommandInteraction, manager: &QueueManager) -> Result<()> {
    defer(ctx, command).await?;

    let outcome = async {
        let url = url_option(command).ok_or_else(|| anyhow::anyhow!("Falta la URL"))?;
        ensure_voice(ctx, manager.guild_id(), command.user.id).await?;
        manager.add(url)?;
        anyhow::Ok(url)
    }
    .await;

    let content = match outcome {
        Ok(url) => format!("🔍 Agregando <{}>...", url),
        Err(e) => format!("❌ {}", e),
    };
    edit(ctx, command, content).await
}

async fn handle_leave(ctx: &Context, command: &CommandInteraction, manager: &QueueManager) -> Result<()> {
    manager.reset()?;

    let songbird = songbird::get(ctx)
        .await
        .ok_or_else(|| anyhow::anyhow!("Songbird no inicializado"))?;

    if songbird.get(manager.guild_id()).is_some() {
        songbird.remove(manager.guild_id()).await?;
        info!("👋 Desconectado del canal de voz en guild {}", manager.guild_id());
    }

    respond(ctx, command, "👋 Hasta luego").await
}

fn url_option(command: &CommandInteraction) -> Option<&str> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "url")
        .and_then(|opt| opt.value.as_str())
        .map(str::trim)
        .filter(|url| !url.is_empty())
}

/// Conecta al canal de voz del usuario si el bot todavía no está en uno
async fn ensure_voice(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Result<()> {
    let songbird = songbird::get(ctx)
        .await
        .ok_or_else(|| anyhow::anyhow!("Songbird no inicializado"))?;

    if songbird.get(guild_id).is_some() {
        return Ok(());
    }

    let channel_id = get_user_voice_channel(ctx, guild_id, user_id)?;
    songbird.join(guild_id, channel_id).await.map_err(|e| {
        warn!("Error al conectar al canal de voz: {:?}", e);
        anyhow::anyhow!("Error al conectar al canal de voz")
    })?;

    info!("🔊 Conectado al canal de voz en guild {}", guild_id);
    Ok(())
}

fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Result<ChannelId> {
    let guild = guild_id
        .to_guild_cached(&ctx.cache)
        .ok_or_else(|| anyhow::anyhow!("Guild no encontrada en caché"))?;

    let channel_id = guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
        .ok_or_else(|| anyhow::anyhow!("Debes estar en un canal de voz"))?;

    Ok(channel_id)
}

async fn respond(ctx: &Context, command: &CommandInteraction, content: impl Into<String>) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new().content(content),
            ),
        )
        .await?;
    Ok(())
}

async fn defer(ctx: &Context, command: &CommandInteraction) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;
    Ok(())
}

async fn edit(ctx: &Context, command: &CommandInteraction, content: impl Into<String>) -> Result<()> {
    command
        .edit_response(&ctx.http, EditInteractionResponse::new().content(content))
        .await?;
    Ok(())
}

/// Texto del comando `/queue`
pub fn render_queue(snapshot: &QueueSnapshot) -> String {
    if snapshot.entries.is_empty() {
        return "📭 La cola está vacía".to_string();
    }

    let mut text = format!(
        "🎶 **Cola** ({} · {} canciones",
        snapshot.state.as_str(),
        snapshot.entries.len()
    );
    if !snapshot.total_duration.is_zero() {
        text.push_str(&format!(" · {}", announcer::format_duration(snapshot.total_duration)));
    }
    text.push(')');

    let head_marker = match snapshot.state {
        PlayerState::Playing => "▶️",
        PlayerState::Paused => "⏸️",
        PlayerState::Resolving | PlayerState::Pipelining => "⏳",
        PlayerState::Idle | PlayerState::Stopped => "⏹️",
    };

    for (index, entry) in snapshot.entries.iter().take(QUEUE_PREVIEW).enumerate() {
        let marker = if index == 0 { head_marker } else { "  " };
        text.push_str(&format!("\n{} `{}.` **{}**", marker, index + 1, entry.title()));
        if let Some(details) = announcer::entry_details(entry) {
            text.push_str(&format!(" ({})", details));
        }
    }

    let hidden = snapshot.entries.len().saturating_sub(QUEUE_PREVIEW);
    if hidden > 0 {
        text.push_str(&format!("\n... y {} más", hidden));
    }

    text
}
