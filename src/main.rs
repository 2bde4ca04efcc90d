//! Console front end for hosting or joining a quiz room.
//!
//! Run with:
//! ```not_rust
//! cargo run -- host --questions questions.json --manual --play-as Alice
//! cargo run -- join --code ABCD --name Bob
//! cargo run -- join --host 192.168.1.20 --port 40123 --code ABCD --name Bob
//! ```

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use lan_quiz::client::resolve_room;
use lan_quiz::logger::setup_logger;
use lan_quiz::protocol::random_room_code;
use lan_quiz::server::{execute_command, CommandResult};
use lan_quiz::{
    load_questions_from_path, AnswerPayload, ClientConfig, ClientEvent, Discovery, GameSettings, HostEvent,
    NoDiscovery, QuestionKind, QuizClient, QuizServer, ServerConfig, UdpDiscovery,
};

#[derive(Parser, Debug)]
#[command(version, about = "LAN multiplayer quiz", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Host a room and run games from the console
    Host(HostArgs),
    /// Join a room as a player
    Join(JoinArgs),
}

#[derive(Args, Debug)]
struct HostArgs {
    /// JSON, TXT or XLSX file to load the questions from
    #[arg(short, long)]
    questions: PathBuf,

    /// Room code; a random one is generated when omitted
    #[arg(short, long)]
    code: Option<String>,

    #[arg(short, long)]
    password: Option<String>,

    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Seconds each question stays open
    #[arg(short, long, default_value_t = 15)]
    duration: u64,

    /// Questions have no countdown; the host advances with `next`
    #[arg(long)]
    no_timer: bool,

    /// The host reveals and advances with `next`
    #[arg(long)]
    manual: bool,

    /// Also play from this console under the given name
    #[arg(long)]
    play_as: Option<String>,

    /// Seconds a player who drops mid-game keeps their seat
    #[arg(long)]
    reconnect_window: Option<u64>,

    /// Don't announce the room on the local network
    #[arg(long)]
    no_advertise: bool,
}

#[derive(Args, Debug)]
struct JoinArgs {
    /// Host address; the room is looked up on the local network when omitted
    #[arg(short = 'H', long, requires = "port")]
    host: Option<String>,

    #[arg(short, long, requires = "host")]
    port: Option<u16>,

    #[arg(short, long)]
    code: String,

    #[arg(short, long)]
    name: String,

    #[arg(long)]
    password: Option<String>,
}

#[tokio::main]
async fn main() {
    setup_logger(env!("CARGO_BIN_NAME"), "info");

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Host(args) => run_host(args).await,
        Command::Join(args) => run_join(args).await,
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run_host(args: HostArgs) -> Result<(), Box<dyn std::error::Error>> {
    let questions = load_questions_from_path(&args.questions)?;
    println!("Loaded {} questions", questions.len());

    let config = ServerConfig {
        bind_addr: args.bind,
        reconnect_window: args.reconnect_window.map(Duration::from_secs),
        ..ServerConfig::default()
    };
    let settings = GameSettings {
        duration: Duration::from_secs(args.duration),
        timer_enabled: !args.no_timer,
        manual_advance: args.manual,
    };

    let discovery: Arc<dyn Discovery> = if args.no_advertise {
        Arc::new(NoDiscovery)
    } else {
        Arc::new(UdpDiscovery::default())
    };
    let (server, mut events) = QuizServer::new(config, discovery);
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_host_event(&event);
        }
    });

    let code = args.code.unwrap_or_else(random_room_code);
    let port = server.start(&code, args.password.clone(), questions).await?;
    println!("Room {} is open on port {}. Type 'help' for commands.", code, port);

    let player = match &args.play_as {
        Some(name) => {
            let (client, mut client_events) = QuizClient::new(ClientConfig::default());
            client
                .connect("127.0.0.1", port, &code, name, args.password.as_deref())
                .await;
            tokio::spawn(async move {
                while let Some(event) = client_events.recv().await {
                    print_client_event(&event);
                }
            });
            Some(client)
        }
        None => None,
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if let (Some(client), Some(answer)) = (&player, line.trim().strip_prefix("answer ")) {
            answer_from_console(client, answer).await;
            continue;
        }

        match execute_command(&server, settings, &line).await {
            CommandResult::Ok(Some(msg)) => println!("{}", msg),
            CommandResult::Ok(None) => {}
            CommandResult::Error(msg) => println!("Error: {}", msg),
            CommandResult::Quit => break,
        }
    }

    if let Some(client) = player {
        client.close().await;
    }
    server.stop(Some("Host closed the room")).await;
    Ok(())
}

async fn run_join(args: JoinArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (host, port) = match (args.host, args.port) {
        (Some(host), Some(port)) => (host, port),
        _ => {
            println!("Looking for room {} on the local network...", args.code);
            let room = resolve_room(&UdpDiscovery::default(), &args.code).await?;
            println!("Found {} at {}:{}", room.name, room.host, room.port);
            (room.host, room.port)
        }
    };

    let (client, mut events) = QuizClient::new(ClientConfig::default());
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_client_event(&event);
        }
    });

    client
        .connect(&host, port, &args.code, &args.name, args.password.as_deref())
        .await;
    println!("Answer with y/n or an option number, 'clear' to take it back, 'quit' to leave.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => {}
            "quit" | "exit" => break,
            input => answer_from_console(&client, input).await,
        }
    }

    client.close().await;
    Ok(())
}

async fn answer_from_console(client: &QuizClient, input: &str) {
    let Some(question) = client.current_question().await else {
        println!("No question right now.");
        return;
    };

    if input.trim().eq_ignore_ascii_case("clear") {
        client.clear_answer(question.index).await;
        return;
    }

    match parse_answer(input, question.kind, question.options.len()) {
        Some(payload) => client.send_answer(question.index, payload).await,
        None => println!("Can't read '{}' as an answer.", input.trim()),
    }
}

/// `y`/`n` for yes/no questions, a 1-based option number otherwise.
fn parse_answer(input: &str, kind: QuestionKind, option_count: usize) -> Option<AnswerPayload> {
    let input = input.trim().to_lowercase();
    match kind {
        QuestionKind::YesNo => match input.as_str() {
            "y" | "yes" | "true" | "1" => Some(AnswerPayload::Bool { value: true }),
            "n" | "no" | "false" | "0" => Some(AnswerPayload::Bool { value: false }),
            _ => None,
        },
        QuestionKind::Multi => {
            let number: usize = input.parse().ok()?;
            (1..=option_count)
                .contains(&number)
                .then(|| AnswerPayload::Index { value: number - 1 })
        }
    }
}

fn print_host_event(event: &HostEvent) {
    match event {
        HostEvent::RoomStarted { name, port } => println!("[host] advertised as {} on port {}", name, port),
        HostEvent::Error { message } => println!("[host] error: {}", message),
        HostEvent::PlayerJoined { name, .. } => println!("[host] {} joined", name),
        HostEvent::PlayerLeft { id } => println!("[host] player {} left", id),
        HostEvent::RosterChanged { players } => println!("[host] {} players in the room", players.len()),
        HostEvent::GameStarted { count } => println!("[host] game started, {} questions", count),
        HostEvent::GameCancelled { reason } => println!("[host] game cancelled: {}", reason),
        HostEvent::QuestionStarted { index, total, question } => {
            println!("[host] question {}/{}: {}", index + 1, total, question.text)
        }
        HostEvent::Revealed(reveal) => println!("[host] answer revealed: {:?}", reveal.correct),
        HostEvent::GameOver { scoreboard } => {
            println!("[host] game over");
            for (rank, entry) in scoreboard.iter().enumerate() {
                println!("  {}. {} ({} right, {} wrong)", rank + 1, entry.name, entry.correct, entry.wrong);
            }
        }
    }
}

fn print_client_event(event: &ClientEvent) {
    match event {
        ClientEvent::Joined { players, .. } => println!("Joined! {} players in the room", players.len()),
        ClientEvent::RosterChanged { players } => {
            let names: Vec<&str> = players.iter().map(|p| p.name.as_str()).collect();
            println!("Players: {}", names.join(", "));
        }
        ClientEvent::GameStarted { count } => println!("Game started with {} questions", count),
        ClientEvent::GameCancelled { reason } => println!("Game cancelled: {}", reason),
        ClientEvent::Question(question) => {
            println!("Question {}/{}: {}", question.index + 1, question.total, question.text);
            for (i, option) in question.options.iter().enumerate() {
                println!("  {}) {}", i + 1, option);
            }
            if let Some(duration) = question.duration {
                println!("  {} seconds to answer", duration.as_secs());
            }
        }
        ClientEvent::Revealed(reveal) => {
            println!("Correct answer: {:?}", reveal.correct);
            for entry in &reveal.scoreboard {
                println!("  {} {}/{}", entry.name, entry.correct, entry.correct + entry.wrong);
            }
        }
        ClientEvent::GameOver { scoreboard } => {
            println!("Game over!");
            for (rank, entry) in scoreboard.iter().enumerate() {
                println!("  {}. {} ({} right)", rank + 1, entry.name, entry.correct);
            }
        }
        ClientEvent::Reconnecting => println!("Connection lost, reconnecting..."),
        ClientEvent::Error { message } => println!("Error: {}", message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_answer() {
        assert_eq!(
            parse_answer(" Yes ", QuestionKind::YesNo, 0),
            Some(AnswerPayload::Bool { value: true })
        );
        assert_eq!(parse_answer("2", QuestionKind::Multi, 3), Some(AnswerPayload::Index { value: 1 }));
        assert_eq!(parse_answer("0", QuestionKind::Multi, 3), None);
        assert_eq!(parse_answer("4", QuestionKind::Multi, 3), None);
        assert_eq!(parse_answer("maybe", QuestionKind::YesNo, 0), None);
    }

    #[test]
    fn test_join_address_is_optional_but_paired() {
        let cli = Cli::try_parse_from(["lan-quiz", "join", "--code", "ABCD", "--name", "Bob"]).unwrap();
        let Command::Join(args) = cli.command else {
            panic!("expected join");
        };
        assert!(args.host.is_none() && args.port.is_none());

        assert!(Cli::try_parse_from(["lan-quiz", "join", "-H", "10.0.0.2", "--code", "ABCD", "--name", "Bob"]).is_err());
        assert!(Cli::try_parse_from([
            "lan-quiz", "join", "-H", "10.0.0.2", "-p", "4000", "--code", "ABCD", "--name", "Bob"
        ])
        .is_ok());
    }
}
