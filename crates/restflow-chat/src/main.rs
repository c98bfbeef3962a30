mod cli;
mod command;
mod render;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use colored::Colorize;
use command::Command;
use render::Renderer;
use restflow_stream::{ChannelController, ChannelTarget, OpenOptions, SseChannel, StreamConfig};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Streamed replies own stdout; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                if cli.verbose {
                    "debug".into()
                } else {
                    "warn".into()
                }
            }),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(err) = run(cli).await {
        handle_error(err);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let lines = BufReader::new(tokio::io::stdin()).lines();

    if cli.sse {
        run_stream(config, lines).await
    } else {
        run_channel(config, cli.idle_timeout, lines).await
    }
}

fn load_config(cli: &Cli) -> Result<StreamConfig> {
    let mut config = match &cli.config {
        Some(path) => StreamConfig::load_from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => StreamConfig::load().context("Failed to load stream config")?,
    };

    if let Some(url) = &cli.url {
        config = config.with_base_url(url.as_str());
    }
    if cli.agent.is_some() {
        config.agent_id = cli.agent.clone();
    }
    if cli.session.is_some() {
        config.session_id = cli.session.clone();
    }
    Ok(config)
}

async fn run_channel(
    config: StreamConfig,
    idle_timeout_secs: Option<u64>,
    mut lines: Lines<BufReader<Stdin>>,
) -> Result<()> {
    let channel = ChannelController::new(config.clone());
    let mut events = channel.subscribe();
    let mut renderer = Renderer::default();

    channel
        .open(
            ChannelTarget::from_config(&config),
            OpenOptions { idle_timeout_secs },
        )
        .await
        .with_context(|| format!("Failed to connect to {}", config.ws_url()))?;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match Command::parse(&line) {
                    Command::Say(text) => {
                        if let Err(e) = channel.send(&text, Vec::new()) {
                            eprintln!("{} {}", "Error:".red().bold(), e);
                        }
                    }
                    Command::Cancel => channel.cancel(),
                    Command::Timeout(secs) => {
                        channel.update_config(secs);
                        eprintln!("{} idle timeout set to {}s", "[channel]".dimmed(), secs);
                    }
                    Command::Reconnect => {
                        if let Err(e) = channel.reconnect().await {
                            eprintln!("{} {}", "Error:".red().bold(), e);
                        }
                    }
                    Command::Quit => break,
                    Command::Empty => {}
                    Command::Invalid(message) => eprintln!("{}", message.yellow()),
                }
            }
            event = events.recv() => {
                let Some(event) = event else {
                    break;
                };
                renderer.render(&event);
            }
        }
    }

    channel.close().await;
    while let Some(event) = events.try_recv() {
        renderer.render(&event);
    }
    Ok(())
}

async fn run_stream(config: StreamConfig, mut lines: Lines<BufReader<Stdin>>) -> Result<()> {
    let channel = SseChannel::new(&config);
    let mut events = channel.subscribe();
    let mut renderer = Renderer::default();

    while let Some(line) = lines.next_line().await? {
        let text = match Command::parse(&line) {
            Command::Say(text) => text,
            Command::Quit => break,
            Command::Empty => continue,
            Command::Invalid(message) => {
                eprintln!("{}", message.yellow());
                continue;
            }
            _ => {
                eprintln!(
                    "{}",
                    "Only /quit is available in --sse mode; press Ctrl-C to cancel a turn".yellow()
                );
                continue;
            }
        };

        let turn = channel.send(&text);
        tokio::pin!(turn);
        let result = loop {
            tokio::select! {
                result = &mut turn => break result,
                Some(event) = events.recv() => renderer.render(&event),
                _ = tokio::signal::ctrl_c() => channel.cancel(),
            }
        };
        while let Some(event) = events.try_recv() {
            renderer.render(&event);
        }

        if let Err(e) = result {
            eprintln!("{} {}", "Error:".red().bold(), e);
        }
    }
    Ok(())
}

fn handle_error(err: anyhow::Error) -> ! {
    eprintln!("{} {:#}", "Error:".red().bold(), err);

    let msg = format!("{:#}", err).to_lowercase();
    if msg.contains("connect") || msg.contains("refused") {
        eprintln!("\n{}", "Suggestion:".yellow().bold());
        eprintln!("  Check that the RestFlow server is running, or pass --url.");
    }

    std::process::exit(1);
}
