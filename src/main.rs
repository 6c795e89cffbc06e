//! Binary entrypoint for the meshbot CLI.
//!
//! Commands:
//! - `start` - run the daemon against the configured device
//! - `init` - create a starter `config.toml` and action manifest directory
//! - `status` - print configuration, node database and catalog summary
//!
//! See the library crate docs for module-level details: `meshbot::`.
use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;

use meshbot::bot::BotServer;
use meshbot::config::Config;

#[derive(Parser)]
#[command(name = "meshbot")]
#[command(about = "An automation daemon for Meshtastic mesh networks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bot
    Start {
        /// Serial device path, overriding the configured one
        #[arg(short, long)]
        port: Option<String>,
    },
    /// Initialize a new configuration and actions directory
    Init,
    /// Show bot status and statistics
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config early so logging picks up the configured file/level.
    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Start { port } => {
            let mut config = match pre_config {
                Some(config) => config,
                None => Config::load(&cli.config).await?,
            };
            info!("Starting meshbot v{}", env!("CARGO_PKG_VERSION"));
            if let Some(port) = port {
                config.connection.port = port;
            }
            let mut bot = BotServer::new(config).await?;
            bot.run().await?;
        }
        Commands::Init => {
            info!("Initializing new meshbot configuration");
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);

            let actions_dir = Config::default().actions.dir;
            tokio::fs::create_dir_all(&actions_dir).await?;
            // Seed the two packet-driven builtins; the operator enables the
            // timer-driven ones by dropping in more manifests.
            let seeds: [(&str, &str); 2] = [
                ("ping_pong.toml", "kind = \"ping_pong\"\n"),
                (
                    "welcome.toml",
                    "kind = \"welcome\"\n\n[params]\nmessage = \"Welcome to the mesh!\"\n",
                ),
            ];
            for (file, body) in seeds {
                let path = std::path::Path::new(&actions_dir).join(file);
                if !path.exists() {
                    tokio::fs::write(&path, body).await?;
                }
            }
            info!("Initialized action manifests in {}", actions_dir);
        }
        Commands::Status => {
            let config = match pre_config {
                Some(config) => config,
                None => Config::load(&cli.config).await?,
            };
            let bot = BotServer::new(config).await?;
            bot.show_status().await?;
        }
    }

    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // Base level from CLI verbosity overrides config.
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .map(|c| c.logging.level.parse().unwrap_or(log::LevelFilter::Info))
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config.as_ref().and_then(|c| c.logging.file.clone());
    if let Some(file) = log_file {
        if let Ok(f) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file)
        {
            let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));

            // If stdout is a terminal, echo to the console as well; under a
            // service manager only the file gets written.
            let is_tty = atty::is(atty::Stream::Stdout);

            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());

                if let Ok(mut guard) = write_mutex.lock() {
                    let _ = writeln!(guard, "{}", line);
                }

                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
            let _ = builder.try_init();
            return;
        }
    }

    builder.format(|fmt, record| {
        writeln!(
            fmt,
            "{} [{}] {}",
            chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
            record.level(),
            record.args()
        )
    });
    let _ = builder.try_init();
}
