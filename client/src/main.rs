use anyhow::{Context, Result};
use clap::Parser;
use pasteport::cli::{self, Cli, Commands};
use pasteport::{Client, Connector, Settings};
use pasteport_agent::{Agent, Capabilities, RejectPolicy};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_from(cli::expand_alias(std::env::args_os()));
    let mut settings = Settings::load(&cli.options)?;

    init_logging(&cli, &settings);

    match cli.command {
        Commands::Server {
            listen,
            reject,
            translate_loopback,
        } => {
            if let Some(listen) = listen {
                settings.listen = listen;
            }
            if let Some(translate) = translate_loopback {
                settings.agent_trans_loopback = translate;
            }
            if let Some(reject) = reject {
                settings.reject = reject.parse::<RejectPolicy>()?;
            }
            run_server(&settings).await
        }
        command => {
            let connector = Connector::new(settings.endpoint(), settings.fallback_policy());
            let mut client = Client::new(connector, settings.client_options());

            let result = run_command(&mut client, command).await;
            client.shutdown().await;
            result
        }
    }
}

fn init_logging(cli: &Cli, settings: &Settings) {
    let default = if cli.options.verbose {
        "debug"
    } else if let Some(level) = settings.log_level.as_deref() {
        level
    } else if cli.command.is_server() {
        "info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_server(settings: &Settings) -> Result<()> {
    let config = settings.agent_config();
    let capabilities = Capabilities::system(&settings.tmux_path);
    let agent = Agent::bind(config, capabilities).await?;

    agent
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down...");
        })
        .await?;
    Ok(())
}

async fn run_command(client: &mut Client, command: Commands) -> Result<()> {
    match command {
        Commands::Open { uri } => {
            let uri = match uri {
                Some(uri) => uri,
                None => read_stdin().await?.trim_end_matches(['\r', '\n']).to_string(),
            };
            client.open(&uri).await?;
        }
        Commands::Copy { text } => {
            let text = match text {
                Some(text) => text,
                None => read_stdin().await?,
            };
            client.copy(&text).await?;
        }
        Commands::Paste => {
            let text = client.paste().await?;
            let mut stdout = tokio::io::stdout();
            stdout.write_all(text.as_bytes()).await?;
            stdout.flush().await?;
        }
        Commands::Tmux {
            target,
            keys,
            select_target_pane,
        } => {
            client.send_keys(&target, &keys, select_target_pane).await?;
        }
        Commands::Server { .. } => anyhow::bail!("the agent does not run through a client connection"),
    }
    Ok(())
}

async fn read_stdin() -> Result<String> {
    let mut input = String::new();
    tokio::io::stdin()
        .read_to_string(&mut input)
        .await
        .context("Failed to read stdin")?;
    Ok(input)
}
