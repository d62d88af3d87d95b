use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use fitness_relay::command::{self, Command, CommandMessage};
use fitness_relay::config::Config;
use fitness_relay::generator::runner;
use fitness_relay::mqtt::MqttClient;
use fitness_relay::relay;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// YAML config file; defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Publish a fitness reading every few seconds
    Generate,
    /// Publish high-rate distance samples once started
    Simulate,
    /// Persist readings and serve them over HTTP
    Relay,
    /// Publish one control command and exit
    Command {
        action: Action,

        /// Address a single generator by uid
        #[arg(long)]
        target: Option<String>,

        /// Command topic; defaults to the configured one
        #[arg(long)]
        topic: Option<String>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Action {
    Start,
    Stop,
}

impl From<Action> for Command {
    fn from(action: Action) -> Self {
        match action {
            Action::Start => Command::Start,
            Action::Stop => Command::Stop,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).await?;

    match cli.mode {
        Mode::Generate => runner::run_fitness(&config).await,
        Mode::Simulate => runner::run_simulator(&config).await,
        Mode::Relay => relay::run(&config).await,
        Mode::Command { action, target, topic } => {
            send_command(&config, action.into(), target, topic).await
        }
    }
}

async fn send_command(
    config: &Config,
    command: Command,
    target: Option<String>,
    topic: Option<String>,
) -> Result<()> {
    let topic = topic.unwrap_or_else(|| config.topics.command.clone());
    if topic.is_empty() || !rumqttc::valid_topic(&topic) {
        bail!("cannot publish to topic {:?}", topic);
    }
    let message = match target {
        Some(target) => CommandMessage::to(command, target),
        None => CommandMessage::broadcast(command),
    };

    let mqtt = MqttClient::new(&config.mqtt);
    command::send(mqtt.client(), &topic, &message).await?;
    mqtt
        .flush_and_disconnect(Duration::from_secs(config.mqtt.connect_timeout_secs))
        .await?;

    info!("Command {} delivered to the broker", message);
    Ok(())
}
