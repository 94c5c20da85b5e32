// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Routing decisions and the command set workers may invoke.
//!
//! `details` of an `actionReq` is either a list `["verb", argument]` or a
//! map `{"verb": argument}`. Only the verbs below are accepted.

use serde_json::Value;

use super::ipc::{Message, MessageType};
use super::types::MANAGER_NAME;

/// Commands a worker may ask the manager to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Shut the whole manager down.
    CloseServer,
    /// Gracefully close a worker.
    CloseBot(String),
    /// Kill a worker's process.
    KillBot(String),
    /// Register and launch a worker.
    StartBot(String),
    /// Sample metrics for a subject.
    Metrics(String),
}

/// Why `details` did not parse into a command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("empty command")]
    Empty,

    #[error("command details must be a list or map")]
    InvalidShape,

    #[error("unknown command: {0}")]
    UnknownVerb(String),

    #[error("command {0} requires a string argument")]
    MissingArgument(&'static str),
}

impl Command {
    /// Parse an `actionReq`'s details.
    pub fn parse(details: &Value) -> Result<Self, CommandError> {
        let (verb, argument) = split_details(details)?;
        let target = || {
            argument
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        match verb {
            "closeServer" => Ok(Self::CloseServer),
            "closeBot" => target().map(Self::CloseBot).ok_or(CommandError::MissingArgument("closeBot")),
            "killBot" => target().map(Self::KillBot).ok_or(CommandError::MissingArgument("killBot")),
            "startBot" => target().map(Self::StartBot).ok_or(CommandError::MissingArgument("startBot")),
            "metrics" => target().map(Self::Metrics).ok_or(CommandError::MissingArgument("metrics")),
            other => Err(CommandError::UnknownVerb(other.to_string())),
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Self::CloseServer => "closeServer",
            Self::CloseBot(_) => "closeBot",
            Self::KillBot(_) => "killBot",
            Self::StartBot(_) => "startBot",
            Self::Metrics(_) => "metrics",
        }
    }

    pub fn target(&self) -> Option<&str> {
        match self {
            Self::CloseServer => None,
            Self::CloseBot(name) | Self::KillBot(name) | Self::StartBot(name) | Self::Metrics(name) => {
                Some(name)
            }
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.target() {
            Some(target) => write!(f, "{} {}", self.verb(), target),
            None => f.write_str(self.verb()),
        }
    }
}

/// Queries a worker may send as `dataReq`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataRequest {
    Metrics(String),
}

impl DataRequest {
    pub fn parse(details: &Value) -> Result<Self, CommandError> {
        let (verb, argument) = split_details(details)?;
        match verb {
            "metrics" => argument
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(|s| Self::Metrics(s.to_string()))
                .ok_or(CommandError::MissingArgument("metrics")),
            other => Err(CommandError::UnknownVerb(other.to_string())),
        }
    }
}

fn split_details(details: &Value) -> Result<(&str, Option<&Value>), CommandError> {
    match details {
        Value::Array(items) => {
            let verb = items.first().ok_or(CommandError::Empty)?;
            let verb = verb.as_str().ok_or(CommandError::InvalidShape)?;
            Ok((verb, items.get(1)))
        }
        Value::Object(map) => {
            if map.len() > 1 {
                return Err(CommandError::InvalidShape);
            }
            let (verb, argument) = map.iter().next().ok_or(CommandError::Empty)?;
            Ok((verb.as_str(), Some(argument)))
        }
        Value::String(verb) => Ok((verb.as_str(), None)),
        _ => Err(CommandError::InvalidShape),
    }
}

/// Where an inbound message goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Handled by the manager.
    Local(MessageType),
    /// Relayed to the named worker if it is active.
    Forward(String),
    /// Discarded.
    Drop(DropReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// `from` does not match the connection's verified name.
    SenderMismatch { claimed: String },
    /// Addressed to the manager with a type it does not handle.
    UnknownType,
}

/// Decide how to handle `msg` arriving on the connection bound to `source`.
pub fn route(source: &str, msg: &Message) -> Route {
    if msg.from != source {
        return Route::Drop(DropReason::SenderMismatch {
            claimed: msg.from.clone(),
        });
    }
    if msg.to == MANAGER_NAME {
        return match msg.kind {
            MessageType::Unknown => Route::Drop(DropReason::UnknownType),
            kind => Route::Local(kind),
        };
    }
    Route::Forward(msg.to.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_list_commands() {
        assert_eq!(Command::parse(&json!(["closeServer"])), Ok(Command::CloseServer));
        assert_eq!(
            Command::parse(&json!(["startBot", "juan"])),
            Ok(Command::StartBot("juan".into()))
        );
        assert_eq!(
            Command::parse(&json!(["killBot", "juan"])),
            Ok(Command::KillBot("juan".into()))
        );
        assert_eq!(
            Command::parse(&json!(["metrics", "system"])),
            Ok(Command::Metrics("system".into()))
        );
    }

    #[test]
    fn test_parse_map_commands() {
        assert_eq!(
            Command::parse(&json!({"closeBot": "bulbe"})),
            Ok(Command::CloseBot("bulbe".into()))
        );
        assert_eq!(Command::parse(&json!({"closeServer": null})), Ok(Command::CloseServer));
        assert_eq!(Command::parse(&json!({})), Err(CommandError::Empty));
    }

    #[test]
    fn test_parse_rejects_multi_key_maps() {
        assert_eq!(
            Command::parse(&json!({"startBot": "juan", "closeServer": null})),
            Err(CommandError::InvalidShape)
        );
        assert_eq!(
            DataRequest::parse(&json!({"metrics": "bulbe", "extra": 1})),
            Err(CommandError::InvalidShape)
        );
    }

    #[test]
    fn test_parse_rejects_unknown_and_malformed() {
        assert_eq!(
            Command::parse(&json!(["loop", "get_event_loop"])),
            Err(CommandError::UnknownVerb("loop".into()))
        );
        assert_eq!(
            Command::parse(&json!({"_bots": null})),
            Err(CommandError::UnknownVerb("_bots".into()))
        );
        assert_eq!(Command::parse(&json!([])), Err(CommandError::Empty));
        assert_eq!(Command::parse(&json!([42])), Err(CommandError::InvalidShape));
        assert_eq!(Command::parse(&json!(7)), Err(CommandError::InvalidShape));
        assert_eq!(
            Command::parse(&json!(["startBot"])),
            Err(CommandError::MissingArgument("startBot"))
        );
        assert_eq!(
            Command::parse(&json!(["startBot", ""])),
            Err(CommandError::MissingArgument("startBot"))
        );
    }

    #[test]
    fn test_command_display() {
        assert_eq!(Command::StartBot("juan".into()).to_string(), "startBot juan");
        assert_eq!(Command::CloseServer.to_string(), "closeServer");
    }

    #[test]
    fn test_parse_data_request() {
        assert_eq!(
            DataRequest::parse(&json!(["metrics", "bulbe"])),
            Ok(DataRequest::Metrics("bulbe".into()))
        );
        assert!(DataRequest::parse(&json!(["status", "bulbe"])).is_err());
    }

    #[test]
    fn test_route_rejects_spoofed_sender() {
        let msg = Message::action("startBot", Some("x")).to(MANAGER_NAME).sent_by("juan");
        assert_eq!(
            route("bulbe", &msg),
            Route::Drop(DropReason::SenderMismatch {
                claimed: "juan".into()
            })
        );
    }

    #[test]
    fn test_route_local_and_forward() {
        let local = Message::ping().to(MANAGER_NAME).sent_by("bulbe");
        assert_eq!(route("bulbe", &local), Route::Local(MessageType::Ping));

        let forward = Message::ping().to("juan").sent_by("bulbe");
        assert_eq!(route("bulbe", &forward), Route::Forward("juan".into()));

        let unknown = Message::new(MessageType::Unknown, Value::Null)
            .to(MANAGER_NAME)
            .sent_by("bulbe");
        assert_eq!(route("bulbe", &unknown), Route::Drop(DropReason::UnknownType));
    }
}
