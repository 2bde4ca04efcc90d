//! # lan-quiz
//!
//! A local network multiplayer quiz engine. One device hosts a room and runs
//! the game; players join over WebSocket, answer questions and get scored
//! live.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use lan_quiz::{GameSettings, NoDiscovery, QuizServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load questions from a JSON, TXT or XLSX file
//!     let questions = lan_quiz::load_questions_from_path("questions.json")?;
//!
//!     let (server, mut events) = QuizServer::new(ServerConfig::default(), Arc::new(NoDiscovery));
//!     let port = server.start("ABCD", None, questions).await?;
//!     println!("Room ABCD open on port {}", port);
//!
//!     server.start_game(GameSettings::default()).await;
//!     while let Some(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod data;
pub mod discovery;
pub mod error;
pub mod logger;
pub mod models;
pub mod protocol;
pub mod server;

pub use client::{ClientEvent, QuestionView, QuizClient};
pub use config::{ClientConfig, ServerConfig};
pub use data::{load_questions_from_path, parse_questions};
pub use discovery::{Discovery, LocalDiscovery, NoDiscovery, ResolvedRoom, UdpDiscovery};
pub use error::{ClientError, CodecError, DiscoveryError, ImportError, ServerError};
pub use models::{Question, QuestionKind};
pub use protocol::{AnswerPayload, PlayerInfo, Reveal, ScoreEntry, WireMessage};
pub use server::{GameSettings, HostEvent, QuizServer};
