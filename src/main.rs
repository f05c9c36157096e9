use clap::{Parser, Subcommand};
use futures::StreamExt;
use mockstream::backend::MockBackend;
use mockstream::client::{ChatClient, ClientConfig};
use mockstream::config::{SessionOptions, StreamTiming, TimingPreset};
use mockstream::protocol::ChatRequest;
use mockstream::render::{LivePrinter, notice_line};
use mockstream::server::{self, ServerConfig};
use mockstream::session::{ChatSession, TurnOutcome, TurnTransport};
use mockstream::store::KnowledgeStore;
use mockstream::tools::ToolRegistry;
use std::error::Error;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

type CliResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

#[derive(Parser)]
#[command(name = "mockstream", about = "Simulated AI chat backend and stream consumer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the mock chat backend over HTTP
    Serve {
        #[arg(long, env = "MOCKSTREAM_LISTEN", default_value = "127.0.0.1:3000")]
        listen: String,
        #[arg(long, env = "MOCKSTREAM_TIMING", value_enum, default_value = "realistic")]
        timing: TimingPreset,
    },
    /// Send one message to a running server and print the streamed answer
    Chat {
        #[arg(long, env = "MOCKSTREAM_URL", default_value = "http://127.0.0.1:3000")]
        url: String,
        #[arg(long, env = "MOCKSTREAM_MAX_SILENCE_MS", default_value_t = 30_000)]
        max_silence_ms: u64,
        #[arg(required = true)]
        message: Vec<String>,
    },
    /// Run producer and consumer in-process without a server
    Demo {
        #[arg(long, env = "MOCKSTREAM_TIMING", value_enum, default_value = "realistic")]
        timing: TimingPreset,
        #[arg(long, env = "MOCKSTREAM_MAX_SILENCE_MS", default_value_t = 30_000)]
        max_silence_ms: u64,
        #[arg(required = true)]
        message: Vec<String>,
    },
    /// Manage the server's knowledge base
    Docs {
        #[arg(long, env = "MOCKSTREAM_URL", default_value = "http://127.0.0.1:3000")]
        url: String,
        #[command(subcommand)]
        action: DocsAction,
    },
    /// List the tools the server can stream
    Tools {
        #[arg(long, env = "MOCKSTREAM_URL", default_value = "http://127.0.0.1:3000")]
        url: String,
    },
}

#[derive(Subcommand)]
enum DocsAction {
    List,
    Add {
        #[arg(long)]
        title: String,
        #[arg(long)]
        content: String,
    },
}

#[tokio::main]
async fn main() -> CliResult<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let default_level = match cli.command {
        Commands::Serve { .. } => "info",
        _ => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Commands::Serve { listen, timing } => {
            let backend = MockBackend::new(Arc::new(KnowledgeStore::sample()), timing.into());
            server::run(ServerConfig { listen }, backend).await
        }
        Commands::Chat {
            url,
            max_silence_ms,
            message,
        } => {
            let client = ChatClient::new(ClientConfig { base_url: url });
            run_turn(Arc::new(client), max_silence_ms, message.join(" ")).await
        }
        Commands::Demo {
            timing,
            max_silence_ms,
            message,
        } => {
            let timing: StreamTiming = timing.into();
            let backend = MockBackend::new(Arc::new(KnowledgeStore::sample()), timing);
            run_turn(Arc::new(backend), max_silence_ms, message.join(" ")).await
        }
        Commands::Docs { url, action } => {
            let client = ChatClient::new(ClientConfig { base_url: url });
            match action {
                DocsAction::List => {
                    for doc in client.list_documents().await? {
                        println!("{}  {}", doc.id, doc.title);
                    }
                }
                DocsAction::Add { title, content } => {
                    let doc = client.add_document(&title, &content).await?;
                    println!("added {}", doc.id);
                }
            }
            Ok(())
        }
        Commands::Tools { url } => {
            let client = ChatClient::new(ClientConfig { base_url: url });
            for tool in client.list_tools().await? {
                println!("{}: {}", tool.name, tool.description);
            }
            Ok(())
        }
    }
}

async fn run_turn(
    transport: Arc<dyn TurnTransport>,
    max_silence_ms: u64,
    message: String,
) -> CliResult<()> {
    let session = ChatSession::new(
        transport,
        SessionOptions {
            max_silence: Duration::from_millis(max_silence_ms),
        },
        Arc::new(ToolRegistry::builtin()),
    );

    let mut printer = LivePrinter::new();
    printer.skip_artifact(&session.snapshot());
    let mut updates = session.updates();
    let mut notices = session.subscribe_notices();

    session.submit_user_turn(ChatRequest::new(message)).await?;

    let wait = session.wait();
    tokio::pin!(wait);
    let outcome = loop {
        tokio::select! {
            outcome = &mut wait => break outcome,
            Some(state) = updates.next() => {
                printer.update(&state, &mut io::stdout().lock())?;
            }
            Ok(notice) = notices.recv() => eprintln!("\n{}", notice_line(&notice)),
            _ = tokio::signal::ctrl_c() => {
                session.cancel_turn().await;
            }
        }
    };

    printer.update(&session.snapshot(), &mut io::stdout().lock())?;
    println!();
    while let Ok(notice) = notices.try_recv() {
        eprintln!("{}", notice_line(&notice));
    }

    match outcome {
        Some(TurnOutcome::Finished) => Ok(()),
        Some(TurnOutcome::Cancelled) => {
            eprintln!("(turn cancelled)");
            Ok(())
        }
        Some(TurnOutcome::Failed) => Err("turn failed; try again".into()),
        None => Err("turn task ended unexpectedly".into()),
    }
}
