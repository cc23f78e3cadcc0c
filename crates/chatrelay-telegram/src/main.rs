//! chatrelay Telegram bot binary.
//!
//! Start the bot with:
//! ```bash
//! TELEGRAM_BOT_TOKEN=xxx OPENROUTER_API_KEYS=k1,k2 cargo run -p chatrelay-telegram
//! ```

use chatrelay_core::{config, RelayConfig};
use chatrelay_telegram::{create_shared_state, ChatBot};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// chatrelay - chat with an AI model from Telegram
#[derive(Parser, Debug)]
#[command(name = "chatrelay-telegram")]
#[command(about = "Telegram bot that relays messages to an OpenRouter-compatible API")]
struct Args {
    /// Write session snapshots every N seconds (overrides CHATRELAY_SNAPSHOT_SECS)
    #[arg(long)]
    snapshot_secs: Option<u64>,

    /// Verbose logging (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load environment variables from config directory first
    let env_path = config::env_file();
    if env_path.exists() {
        let _ = dotenvy::from_path(&env_path);
    }
    let _ = dotenvy::from_filename(".env.local").or_else(|_| dotenvy::dotenv());

    let filter = match args.verbose {
        0 => "chatrelay_telegram=info,chatrelay_core=info,teloxide=warn",
        1 => "chatrelay_telegram=debug,chatrelay_core=debug,chatrelay_persistence=debug,teloxide=info",
        2 => "chatrelay_telegram=trace,chatrelay_core=trace,chatrelay_persistence=trace,teloxide=debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut relay_config = RelayConfig::from_env()?;
    if let Some(secs) = args.snapshot_secs {
        relay_config.snapshot_secs = secs;
    }

    if relay_config.snapshot_secs > 0 {
        if let Err(e) = config::ensure_runtime_state_dir() {
            tracing::warn!(error = %e, "Failed to create state directory");
        }
    }

    let state = create_shared_state(&relay_config, &config::snapshot_file())?;
    let bot = ChatBot::new(state)?;

    match bot.get_me().await {
        Ok(username) => {
            tracing::info!(username = %username, "Bot initialized successfully");
            println!("\n[robot] chatrelay");
            println!("   Bot: @{}", username);
            println!("   Model: {}", relay_config.model.model);
            println!("   API keys: {}", relay_config.api_keys.len());
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to get bot info");
            return Err(e.into());
        }
    }

    println!("\n[phone] Open Telegram and send /start to begin");
    println!("   Press Ctrl+C to stop\n");

    bot.start_polling().await?;

    Ok(())
}
