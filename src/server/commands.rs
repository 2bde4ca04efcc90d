//! Host command parser and executor.
//!
//! Handles console commands like `start`, `next` and `cancel`.

use super::game::GameSettings;
use super::server::QuizServer;
use super::state::Step;

/// Result of executing a command.
#[derive(Debug, PartialEq, Eq)]
pub enum CommandResult {
    /// Command executed successfully with optional message.
    Ok(Option<String>),
    /// Command failed with an error message.
    Error(String),
    /// Host wants to close the room.
    Quit,
}

#[derive(Debug, PartialEq, Eq)]
pub enum HostCommand {
    Start,
    Next,
    Cancel(Option<String>),
    Players,
    Quit,
    Help,
}

/// Parse one line of host input. `Ok(None)` for a blank line.
pub fn parse_command(input: &str) -> Result<Option<HostCommand>, String> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(None);
    }
    let (command, rest) = input
        .split_once(char::is_whitespace)
        .map(|(c, r)| (c, r.trim()))
        .unwrap_or((input, ""));

    let command = match command.to_lowercase().as_str() {
        "start" => HostCommand::Start,
        "next" | "n" => HostCommand::Next,
        "cancel" => HostCommand::Cancel((!rest.is_empty()).then(|| rest.to_string())),
        "players" | "list" => HostCommand::Players,
        "quit" | "exit" => HostCommand::Quit,
        "help" | "?" => HostCommand::Help,
        other => {
            return Err(format!(
                "Unknown command: {}. Type 'help' for available commands.",
                other
            ));
        }
    };
    Ok(Some(command))
}

/// Parse and execute a command against a running room.
pub async fn execute_command(server: &QuizServer, settings: GameSettings, input: &str) -> CommandResult {
    let command = match parse_command(input) {
        Ok(Some(command)) => command,
        Ok(None) => return CommandResult::Ok(None),
        Err(e) => return CommandResult::Error(e),
    };

    match command {
        HostCommand::Start => cmd_start(server, settings).await,
        HostCommand::Next => cmd_next(server).await,
        HostCommand::Cancel(reason) => cmd_cancel(server, reason).await,
        HostCommand::Players => cmd_players(server).await,
        HostCommand::Quit => CommandResult::Quit,
        HostCommand::Help => cmd_help(),
    }
}

async fn cmd_start(server: &QuizServer, settings: GameSettings) -> CommandResult {
    if server.is_game_running().await {
        return CommandResult::Error("A game is already running.".to_string());
    }
    if server.start_game(settings).await {
        CommandResult::Ok(None)
    } else {
        CommandResult::Error("Could not start the game.".to_string())
    }
}

/// Reveal or move on, in manual mode.
async fn cmd_next(server: &QuizServer) -> CommandResult {
    match server.advance().await {
        Step::Ignored => CommandResult::Error("Nothing to advance. Is a manual game running?".to_string()),
        _ => CommandResult::Ok(None),
    }
}

async fn cmd_cancel(server: &QuizServer, reason: Option<String>) -> CommandResult {
    let reason = reason.unwrap_or_else(|| "Host cancelled the game".to_string());
    if server.cancel_game(&reason).await {
        CommandResult::Ok(Some("Game cancelled.".to_string()))
    } else {
        CommandResult::Error("No game is running.".to_string())
    }
}

async fn cmd_players(server: &QuizServer) -> CommandResult {
    let players = server.players().await;
    if players.is_empty() {
        return CommandResult::Ok(Some("No players in the room.".to_string()));
    }
    let names: Vec<&str> = players.iter().map(|p| p.name.as_str()).collect();
    CommandResult::Ok(Some(format!("Players ({}): {}", names.len(), names.join(", "))))
}

fn cmd_help() -> CommandResult {
    let help = r#"Available commands:
  start           - Start a game with everyone in the room
  next/n          - Reveal the answer, or go to the next question (manual mode)
  cancel [reason] - Abort the running game
  players/list    - List players in the room
  quit/exit       - Close the room
  help/?          - Show this help"#;
    CommandResult::Ok(Some(help.to_string()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::ServerConfig;
    use crate::discovery::NoDiscovery;

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("   "), Ok(None));
        assert_eq!(parse_command("START"), Ok(Some(HostCommand::Start)));
        assert_eq!(parse_command(" n "), Ok(Some(HostCommand::Next)));
        assert_eq!(parse_command("cancel"), Ok(Some(HostCommand::Cancel(None))));
        assert_eq!(
            parse_command("cancel  fire  drill "),
            Ok(Some(HostCommand::Cancel(Some("fire  drill".to_string()))))
        );
        assert!(parse_command("kick bob").is_err());
    }

    #[tokio::test]
    async fn test_commands_without_open_room() {
        let (server, _events) = QuizServer::new(ServerConfig::default(), Arc::new(NoDiscovery));
        let settings = GameSettings::default();

        assert_eq!(execute_command(&server, settings, "").await, CommandResult::Ok(None));
        assert!(matches!(execute_command(&server, settings, "start").await, CommandResult::Error(_)));
        assert!(matches!(execute_command(&server, settings, "next").await, CommandResult::Error(_)));
        assert!(matches!(execute_command(&server, settings, "cancel").await, CommandResult::Error(_)));
        assert_eq!(
            execute_command(&server, settings, "players").await,
            CommandResult::Ok(Some("No players in the room.".to_string()))
        );
        assert_eq!(execute_command(&server, settings, "exit").await, CommandResult::Quit);
    }
}
