use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use super::{DistanceModel, FitnessModel, Generator, GeneratorOptions, Mode, ReadingLog, SampleModel};
use crate::command::{self, Command, CommandMessage};
use crate::config::{CommandPolicy, Config, MqttConfig, Topics};
use crate::mqtt::client::{subscribe, wait_for_connection};
use crate::mqtt::{MqttClient, MqttEvent};
use crate::shutdown::shutdown_signal;
use crate::util::random_uid;

/// Typed at the process console.
#[derive(Debug, PartialEq, Eq)]
pub enum ConsoleInput {
    Control(Command),
    Exit,
    Unknown(String),
}

impl ConsoleInput {
    pub fn parse(line: &str) -> Option<ConsoleInput> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        if line.eq_ignore_ascii_case("exit") {
            return Some(ConsoleInput::Exit);
        }
        Some(match line.parse() {
            Ok(command) => ConsoleInput::Control(command),
            Err(()) => ConsoleInput::Unknown(line.to_string()),
        })
    }
}

struct Process<'a, M: SampleModel> {
    mqtt: &'a MqttConfig,
    topics: &'a Topics,
    options: GeneratorOptions,
    model: M,
    log_path: Option<&'a Path>,
    autostart: bool,
}

/// Coarse weight-stack generator: one reading every few seconds.
pub async fn run_fitness(config: &Config) -> Result<()> {
    let settings = &config.generator;
    let uid = settings
        .uid
        .clone()
        .unwrap_or_else(|| random_uid(&mut StdRng::from_entropy(), 4));
    info!("Generator uid: {}", uid);

    run(Process {
        mqtt: &config.mqtt,
        topics: &config.topics,
        options: options(&uid, &config.topics, settings.interval_ms, settings.command_policy),
        model: FitnessModel::from_config(settings, uid)?,
        log_path: settings.log_path.as_deref(),
        autostart: settings.autostart,
    })
    .await
}

/// High-rate proximity simulator.
pub async fn run_simulator(config: &Config) -> Result<()> {
    let settings = &config.simulator;
    let uid = settings
        .uid
        .clone()
        .unwrap_or_else(|| random_uid(&mut StdRng::from_entropy(), 6));
    info!("Simulator uid: {}", uid);

    run(Process {
        mqtt: &config.mqtt,
        topics: &settings.topics,
        options: options(&uid, &settings.topics, settings.interval_ms, settings.command_policy),
        model: DistanceModel::from_config(settings),
        log_path: settings.log_path.as_deref(),
        autostart: settings.autostart,
    })
    .await
}

fn options(uid: &str, topics: &Topics, interval_ms: u64, command_policy: CommandPolicy) -> GeneratorOptions {
    GeneratorOptions {
        uid: uid.to_string(),
        topic: topics.data.clone(),
        interval: Duration::from_millis(interval_ms),
        command_policy,
    }
}

async fn run<M: SampleModel>(process: Process<'_, M>) -> Result<()> {
    if !rumqttc::valid_topic(&process.options.topic) {
        bail!("cannot publish to wildcard topic {}", process.options.topic);
    }

    let log = match process.log_path {
        Some(path) => Some(
            ReadingLog::open(path)
                .await
                .with_context(|| format!("cannot open reading log {}", path.display()))?,
        ),
        None => None,
    };

    let (mqtt_handle, mut events, client) = MqttClient::new(process.mqtt).run();
    let timeout = Duration::from_secs(process.mqtt.connect_timeout_secs);
    if !wait_for_connection(&mut events, timeout).await {
        mqtt_handle.abort();
        bail!(
            "could not connect to MQTT broker at {}:{} within {:?}",
            process.mqtt.host,
            process.mqtt.port,
            timeout
        );
    }

    let command_topic = process.topics.command.clone();
    subscribe(&client, &command_topic).await;

    let mut generator = Generator::new(process.options, process.model, Arc::new(client.clone()), log);
    if process.autostart {
        generator.start();
    } else {
        info!("Generator ready. Waiting for \"start\" command...");
    }
    info!("Console commands: start, stop, exit");

    let mut console = BufReader::new(tokio::io::stdin()).lines();
    let mut console_open = true;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(MqttEvent::Connected) => subscribe(&client, &command_topic).await,
                Some(MqttEvent::Message(msg)) if msg.is_on(&command_topic) => {
                    if let Some(message) = command::decode(&msg.payload) {
                        generator.handle_command(&message);
                    }
                }
                Some(MqttEvent::Message(_)) => {}
                None => {
                    error!("MQTT event loop stopped");
                    break;
                }
            },
            line = console.next_line(), if console_open => match line {
                Ok(Some(line)) => match ConsoleInput::parse(&line) {
                    Some(ConsoleInput::Control(command)) => {
                        generator.handle_command(&CommandMessage::to(command, generator.uid().to_string()));
                    }
                    Some(ConsoleInput::Exit) => {
                        info!("Exiting...");
                        break;
                    }
                    Some(ConsoleInput::Unknown(input)) => {
                        warn!("Unknown command {:?}. Available commands: start, stop, exit", input)
                    }
                    None => {}
                },
                Ok(None) => console_open = false,
                Err(e) => {
                    warn!("Console input unavailable: {}", e);
                    console_open = false;
                }
            },
            _ = &mut shutdown => break,
        }
    }

    if generator.mode() == Mode::Collecting {
        generator.shutdown().await;
    }
    if let Err(e) = client.disconnect().await {
        warn!("MQTT disconnect failed: {}", e);
    }
    mqtt_handle.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_input() {
        assert_eq!(
            ConsoleInput::parse(" Start "),
            Some(ConsoleInput::Control(Command::Start))
        );
        assert_eq!(
            ConsoleInput::parse("stop"),
            Some(ConsoleInput::Control(Command::Stop))
        );
        assert_eq!(ConsoleInput::parse("EXIT"), Some(ConsoleInput::Exit));
        assert_eq!(
            ConsoleInput::parse("pause"),
            Some(ConsoleInput::Unknown("pause".to_string()))
        );
        assert_eq!(ConsoleInput::parse("   "), None);
    }

    #[test]
    fn options_use_data_topic() {
        let topics = Topics::default();
        let options = options("a1b2", &topics, 25, CommandPolicy::Addressed);

        assert_eq!(options.topic, "iot/fitness/data");
        assert_eq!(options.interval, Duration::from_millis(25));
        assert_eq!(options.uid, "a1b2");
    }
}
