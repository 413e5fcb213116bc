use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, id::GuildId},
    prelude::Context,
};

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in all_commands() {
        ctx.http.create_global_command(&command).await?;
    }

    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;

    Ok(())
}

fn all_commands() -> Vec<CreateCommand> {
    vec![
        play_command(),
        add_command(),
        pause_command(),
        unpause_command(),
        skip_command(),
        stop_command(),
        reset_command(),
        queue_command(),
        leave_command(),
    ]
}

fn url_option(required: bool) -> CreateCommandOption {
    CreateCommandOption::new(CommandOptionType::String, "url", "URL del video o archivo de audio")
        .required(required)
}

// Comandos de cola

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Reproduce una URL ahora, o la cola actual si no se indica ninguna")
        .add_option(url_option(false))
}

fn add_command() -> CreateCommand {
    CreateCommand::new("add")
        .description("Agrega una URL al final de la cola")
        .add_option(url_option(true))
}

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue").description("Muestra la cola de reproducción")
}

fn reset_command() -> CreateCommand {
    CreateCommand::new("reset").description("Vacía la cola y detiene la reproducción")
}

// Comandos de control

fn pause_command() -> CreateCommand {
    CreateCommand::new("pause").description("Pausa la reproducción actual")
}

fn unpause_command() -> CreateCommand {
    CreateCommand::new("unpause").description("Reanuda la reproducción pausada")
}

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip").description("Salta a la siguiente canción")
}

fn stop_command() -> CreateCommand {
    CreateCommand::new("stop").description("Detiene la reproducción sin vaciar la cola")
}

fn leave_command() -> CreateCommand {
    CreateCommand::new("leave").description("Vacía la cola y sale del canal de voz")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::Value;

    fn as_json(command: CreateCommand) -> Value {
        serde_json::to_value(command).unwrap()
    }

    #[test]
    fn test_registers_one_command_per_operation() {
        let names: Vec<String> = all_commands()
            .into_iter()
            .map(|c| as_json(c)["name"].as_str().unwrap().to_string())
            .collect();

        assert_eq!(
            names,
            vec!["play", "add", "pause", "unpause", "skip", "stop", "reset", "queue", "leave"]
        );
    }

    #[test]
    fn test_url_is_optional_for_play_only() {
        let play = as_json(play_command());
        let add = as_json(add_command());

        assert_eq!(play["options"][0]["name"], "url");
        assert_ne!(play["options"][0]["required"], true);
        assert_eq!(add["options"][0]["required"], true);
    }
}
