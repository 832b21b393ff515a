//! # tootloom CLI
//!
//! The `tootloom` binary runs the bot and its maintenance commands.
//!
//! ## Usage
//!
//! ```bash
//! tootloom --config ./tootloom.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tootloom init` | Write a default config scaffold |
//! | `tootloom chat [message]` | One-shot chat with the model, or a REPL |
//! | `tootloom reply-to <id>` | Run the reply pipeline for one status |
//! | `tootloom history <account>` | Print an account's recent threads |
//! | `tootloom reconcile <id>` | Rebuild a thread from network history |
//! | `tootloom serve` | Poll for mentions and reply (ctrl-c to stop) |
//!
//! Secrets come from the environment: `MASTODON_ACCESS_TOKEN` and
//! `OPENAI_API_KEY`.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use tootloom::config::{self, Config};
use tootloom::llm::OpenAiClient;
use tootloom::mastodon::MastodonClient;
use tootloom::models::ChatMessage;
use tootloom::pipeline::{self, Bot};
use tootloom::{db, history, migrate, server, store};

/// tootloom — a Mastodon reply bot with durable conversation threads.
#[derive(Parser)]
#[command(
    name = "tootloom",
    about = "A Mastodon reply bot that weaves mentions into durable conversation threads",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). A missing file means defaults.
    #[arg(long, global = true, default_value = "tootloom.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config scaffold. Refuses to overwrite.
    Init,

    /// Chat with the model directly, without Mastodon or persistence.
    ///
    /// With a message argument, prints one reply and exits. Without one,
    /// starts a REPL; `exit` or `quit` leaves.
    Chat {
        /// The message to send. Omit for an interactive REPL.
        message: Option<String>,
    },

    /// Run the reply pipeline for one status.
    ReplyTo {
        /// The status id to reply to.
        status_id: String,
        /// Actually post the reply. Without this the reply is printed
        /// (but still persisted to the thread).
        #[arg(long)]
        post: bool,
    },

    /// Print an account's recent conversation threads.
    History {
        /// The account name (`user` or `user@instance`).
        account: String,
    },

    /// Rebuild a local thread from the network's ancestor chain.
    Reconcile {
        /// The status id whose ancestors seed the thread.
        status_id: String,
    },

    /// Poll for mentions and reply until interrupted.
    Serve,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tootloom=info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init => init(&cli.config),
        Commands::Chat { message } => {
            let config = config::load_config_or_default(&cli.config)?;
            chat(&config, message).await
        }
        Commands::ReplyTo { status_id, post } => {
            let config = config::load_config_or_default(&cli.config)?;
            let bot = build_bot(&config).await?;
            let status = bot.mastodon.get_status(&status_id).await?;
            let outcome = bot.reply_to_status(&status, post).await?;
            println!("thread: {}", outcome.thread_id);
            println!("{}", outcome.reply);
            for id in &outcome.posted_ids {
                println!("posted: {}", id);
            }
            Ok(())
        }
        Commands::History { account } => {
            let config = config::load_config_or_default(&cli.config)?;
            let pool = open_db(&config).await?;
            let digest = history::per_user_thread_digest(&pool, &account).await?;
            if digest.is_empty() {
                println!("No threads found for {}", account);
                return Ok(());
            }
            for (i, thread) in digest.iter().enumerate() {
                println!("--- thread {} ({} messages) ---", i + 1, thread.len());
                for message in thread {
                    let chat = message.chat_message()?;
                    println!(
                        "[{}] {}",
                        message.author,
                        chat.content.as_deref().unwrap_or("")
                    );
                }
            }
            Ok(())
        }
        Commands::Reconcile { status_id } => {
            let config = config::load_config_or_default(&cli.config)?;
            let bot = build_bot(&config).await?;
            let thread_id =
                pipeline::reconcile(&bot.pool, &bot.mastodon, &bot.account_id, &status_id).await?;
            println!("thread: {}", thread_id);
            for message in store::thread_messages(&bot.pool, &thread_id).await? {
                let chat = message.chat_message()?;
                println!(
                    "[{}] {}",
                    message.author,
                    chat.content.as_deref().unwrap_or("")
                );
            }
            Ok(())
        }
        Commands::Serve => {
            let config = config::load_config_or_default(&cli.config)?;
            let bot = build_bot(&config).await?;

            let (tx, rx) = tokio::sync::watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    let _ = tx.send(true);
                }
            });

            server::run(&bot, rx).await
        }
    }
}

fn init(path: &Path) -> Result<()> {
    if path.exists() {
        bail!(
            "{} already exists; move it aside before re-running init",
            path.display()
        );
    }
    std::fs::write(path, config::default_config_toml())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote {}", path.display());
    println!("Set mastodon.base_url, then export MASTODON_ACCESS_TOKEN and OPENAI_API_KEY.");
    Ok(())
}

/// One-shot chat or REPL. No database, no Mastodon.
async fn chat(config: &Config, message: Option<String>) -> Result<()> {
    let llm = OpenAiClient::from_config(&config.llm)?;
    let mut transcript = vec![ChatMessage::system(config.bot.persona.clone())];

    if let Some(message) = message {
        transcript.push(ChatMessage::user(message, None));
        let outcome = llm.chat(transcript).await?;
        println!("{}", outcome.message);
        for url in &outcome.image_urls {
            println!("image: {}", url);
        }
        return Ok(());
    }

    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }

        transcript.push(ChatMessage::user(line.to_string(), None));
        match llm.chat(transcript.clone()).await {
            Ok(outcome) => {
                println!("{}", outcome.message);
                for url in &outcome.image_urls {
                    println!("image: {}", url);
                }
                transcript.push(ChatMessage::assistant(outcome.message));
            }
            Err(err) => eprintln!("Error: {err:#}"),
        }
    }
    Ok(())
}

async fn open_db(config: &Config) -> Result<sqlx::SqlitePool> {
    let pool = db::connect(&config.db.path).await?;
    migrate::run_migrations(&pool).await?;
    Ok(pool)
}

/// Connects everything a network command needs, verifying the Mastodon
/// credentials up front so role inference knows the bot's own account id.
async fn build_bot(config: &Config) -> Result<Bot> {
    let pool = open_db(config).await?;
    let mastodon = MastodonClient::from_config(&config.mastodon)?;
    let llm = OpenAiClient::from_config(&config.llm)?;
    let account = mastodon
        .verify_credentials()
        .await
        .context("verifying Mastodon credentials")?;

    Ok(Bot {
        pool,
        mastodon,
        llm,
        config: config.clone(),
        account_id: account.id,
    })
}
