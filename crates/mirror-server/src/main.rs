use std::io::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use mirror_ai::vendors::gemini::GeminiProvider;
use mirror_ai::{ChatClient, ChatGoal, ChatTurnRequest, InMemoryTranscriptStore};
use mirror_server::config::{self, ServerConfig};
use mirror_server::observability::init_observability;
use mirror_server::{AppState, serve};

#[derive(Parser)]
#[command(name = "mirror", about = "Future-self reflection service")]
struct Cli {
    /// Log filter override (for example `debug` or `mirror_ai=trace`).
    #[arg(long, global = true)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server.
    Serve {
        /// Listen address; overrides MIRROR_BIND_ADDR.
        #[arg(long)]
        addr: Option<SocketAddr>,
    },
    /// Send one chat turn to a running server and print the reply as it streams.
    Chat {
        #[arg(long, env = "MIRROR_URL", default_value = "http://127.0.0.1:8787")]
        url: String,
        #[arg(long)]
        session: String,
        /// Goal title.
        #[arg(long)]
        goal: String,
        #[arg(long)]
        description: Option<String>,
        message: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    config::init();
    let cli = Cli::parse();
    init_observability(cli.log_level.as_deref());

    match cli.command {
        Command::Serve { addr } => {
            let mut config = ServerConfig::from_env()?;
            if let Some(addr) = addr {
                config.bind_addr = addr;
            }
            let generator = Arc::new(GeminiProvider::from_env()?);
            let store = Arc::new(InMemoryTranscriptStore::new());
            let state = AppState::new(generator, store, &config)?;

            let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
            tracing::info!(addr = %config.bind_addr, "mirror server listening");
            serve(listener, state).await?;
        }
        Command::Chat {
            url,
            session,
            goal,
            description,
            message,
        } => {
            let client = ChatClient::new(url)?;
            let request = ChatTurnRequest {
                session_id: session,
                goal: ChatGoal {
                    title: goal,
                    description,
                },
                user_message: message,
            };
            let mut streamed = String::new();
            let reply = client
                .send_turn(&request, |message| {
                    if !message.streaming {
                        return;
                    }
                    if let Some(fresh) = message.content.get(streamed.len()..) {
                        print!("{fresh}");
                        let _ = std::io::stdout().flush();
                        streamed.push_str(fresh);
                    }
                })
                .await?;

            if !streamed.is_empty() {
                println!();
            }
            if reply.label.is_some() || reply.content != streamed {
                match reply.label {
                    Some(label) => println!("[{}] {}", label.as_str(), reply.content),
                    None => println!("{}", reply.content),
                }
            }
        }
    }
    Ok(())
}
