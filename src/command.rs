//! Start/stop control tokens.
//!
//! A control payload is a plain token, `start` or `stop`, optionally addressed
//! to one generator as `<token>@<uid>`. Tokens are trimmed and compared
//! case-insensitively. There is no acknowledgement: publishing is fire-and-forget
//! and every subscribed generator sees every command.

use std::fmt;
use std::str::FromStr;

use tracing::{debug, info};

use crate::config::CommandPolicy;
use crate::error::PublishError;
use crate::mqtt::Publish;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Stop => "stop",
        }
    }
}

impl FromStr for Command {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(Command::Start),
            "stop" => Ok(Command::Stop),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandMessage {
    pub command: Command,
    pub target: Option<String>,
}

impl CommandMessage {
    pub fn broadcast(command: Command) -> Self {
        CommandMessage {
            command,
            target: None,
        }
    }

    pub fn to(command: Command, target: impl Into<String>) -> Self {
        CommandMessage {
            command,
            target: Some(target.into()),
        }
    }

    /// Returns `None` for anything that is not a recognised token.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(payload).ok()?.trim();
        let (token, target) = match text.split_once('@') {
            Some((token, target)) => {
                let target = target.trim();
                if target.is_empty() {
                    return None;
                }
                (token, Some(target.to_string()))
            }
            None => (text, None),
        };
        let command = token.parse().ok()?;
        Some(CommandMessage { command, target })
    }

    pub fn is_for(&self, uid: &str, policy: CommandPolicy) -> bool {
        match (&self.target, policy) {
            (Some(target), _) => target.eq_ignore_ascii_case(uid),
            (None, CommandPolicy::Broadcast) => true,
            (None, CommandPolicy::Addressed) => false,
        }
    }
}

impl fmt::Display for CommandMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(target) => write!(f, "{}@{}", self.command.as_str(), target),
            None => f.write_str(self.command.as_str()),
        }
    }
}

/// Parses a control payload, logging and dropping anything unrecognised.
pub fn decode(payload: &[u8]) -> Option<CommandMessage> {
    let message = CommandMessage::parse(payload);
    if message.is_none() {
        debug!("Ignoring unrecognised command payload: {:?}", String::from_utf8_lossy(payload));
    }
    message
}

/// Publishes one control token. No acknowledgement is awaited.
pub async fn send<P: Publish + ?Sized>(
    publisher: &P,
    topic: &str,
    message: &CommandMessage,
) -> Result<(), PublishError> {
    publisher
        .publish(topic, message.to_string().into_bytes())
        .await?;
    info!("Sent command {} on {}", message, topic);
    Ok(())
}
