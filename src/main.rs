use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use carik_pieces::infrastructure::config::Config;
use carik_pieces::{
    Check, Command, CommandKind, ConsoleHost, Context, Hook, Host, Piece, PieceError,
};

#[derive(Parser)]
#[command(name = "carik-pieces")]
#[command(about = "Load and unload bot pieces on a console host", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Piece name (overrides config)
    #[arg(short, long)]
    piece: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the demo piece and read commands from stdin
    Run,
    /// Show version
    Version,
    /// Generate default config
    InitConfig,
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run => {
            run(cli.config, cli.piece);
        }
        Commands::Version => {
            println!("carik-pieces v{}", env!("CARGO_PKG_VERSION"));
        }
        Commands::InitConfig => {
            init_config();
        }
    }
}

fn run(config_path: String, piece_override: Option<String>) {
    // Load config
    let mut config = if std::path::Path::new(&config_path).exists() {
        Config::load(&config_path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config: {}, using defaults", e);
            Config::load_env()
        })
    } else {
        Config::load_env()
    };

    if let Some(name) = piece_override {
        config.piece.name = name;
    }

    tracing::info!("Starting {} with piece `{}`", config.bot.name, config.piece.name);

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = rt.block_on(run_console(config)) {
        tracing::error!("Piece lifecycle failed: {}", e);
        std::process::exit(1);
    }
}

fn build_demo_piece(config: &Config) -> Result<Piece, PieceError> {
    let mut builder = Piece::builder(config.piece.name.clone())
        .extra("bot", serde_json::json!(config.bot.name));
    if let Some(logger) = &config.piece.logger {
        builder = builder.logger(logger.clone());
    }
    let piece = builder.build();

    piece.command(
        Command::new("echo")
            .with_description("Repeat the arguments")
            .with_usage("echo <text>")
            .with_handler(|ctx: Context| async move { Ok(ctx.args.join(" ")) }),
    )?;

    let extras_piece = piece.clone();
    piece.command(
        Command::new("extras")
            .with_description("Show piece extras")
            .with_handler(move |_| {
                let piece = extras_piece.clone();
                async move { Ok(serde_json::to_string(&piece.extras()).unwrap_or_default()) }
            }),
    )?;

    piece.slash_command(
        Command::slash("ping").with_handler(|_| async { Ok("pong".to_string()) }),
    )?;

    piece.command_check(Check::sync("known-user", |ctx| ctx.user_id.is_some()));

    piece.listener("message", |payload| async move {
        tracing::debug!("Message event: {}", payload);
    });

    let heartbeat = carik_pieces::TaskLoop::new(
        "heartbeat",
        Duration::from_secs(config.loops.interval_secs),
        || async {
            tracing::info!("Heartbeat");
            Ok(())
        },
    );
    piece.register_loop(heartbeat, config.loops.wait_until_ready)?;

    let name = piece.name().to_string();
    piece.load_hook(false, Hook::new("announce", move || {
        let name = name.clone();
        async move {
            tracing::info!("Loading `{}`", name);
            Ok(())
        }
    }));
    piece.unload_hook(true, Hook::new("farewell", || async {
        tracing::info!("Piece gone");
        Ok(())
    }));

    Ok(piece)
}

async fn run_console(config: Config) -> Result<(), PieceError> {
    let piece = build_demo_piece(&config)?;
    let host = Arc::new(ConsoleHost::new(config.bot.name.clone()));

    piece.load(host.clone()).await?;
    host.flush_command_sync();
    host.set_ready();

    let prefix = config.bot.prefix.clone();
    println!("Type `{}echo hi`, `/ping` or `quit`", prefix);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let input = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Failed to read input: {}", e);
                break;
            }
        };

        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        if input == "quit" {
            break;
        }

        host.dispatch("message", serde_json::json!({ "content": input })).await;

        let ctx = Context::new(CommandKind::Prefix, "")
            .with_user("console")
            .with_channel("console");
        let reply = match input.strip_prefix('/') {
            Some(name) => {
                let ctx = Context { kind: CommandKind::Slash, ..ctx };
                Some(host.invoke(CommandKind::Slash, name.trim(), ctx).await)
            }
            None => host.handle_line(&prefix, input, ctx).await,
        };

        match reply {
            Some(Ok(response)) => println!("[BOT] {}", response),
            Some(Err(e)) => println!("[BOT] Error: {}", e),
            None => {}
        }
    }

    piece.unload(host.clone()).await?;
    host.flush_command_sync();
    tracing::info!("Host `{}` left with {} commands", host.name(), host.snapshot().commands.len());
    Ok(())
}

fn init_config() {
    match Config::default().to_yaml() {
        Ok(yaml) => {
            println!("{}", yaml);
            println!("\nSave this to config.yaml and adjust as needed.");
        }
        Err(e) => tracing::error!("Failed to render config: {}", e),
    }
}
