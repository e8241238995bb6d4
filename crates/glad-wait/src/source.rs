//! Telemetry sources: where a poll round's raw query responses come from.

use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use glad_error::{GladError, Result};
use parking_lot::Mutex;
use tracing::debug;

use crate::config::{CommandTemplate, ReplaySourceConfig, SourceConfig};

/// Windowed query for the latest values of a set of channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelQuery {
    pub session_id: u32,
    pub lookback: Duration,
    pub channel_ids: Vec<String>,
}

/// Windowed query for EVRs. Empty `event_ids` asks for every EVR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvrQuery {
    pub session_id: u32,
    pub lookback: Duration,
    pub event_ids: Vec<u32>,
}

/// A query endpoint returning raw response documents.
pub trait TelemetrySource: Send + Sync {
    fn query_channels(&self, query: &ChannelQuery) -> Result<Vec<u8>>;

    fn query_evrs(&self, query: &EvrQuery) -> Result<Vec<u8>>;
}

impl<S: TelemetrySource + ?Sized> TelemetrySource for Box<S> {
    fn query_channels(&self, query: &ChannelQuery) -> Result<Vec<u8>> {
        (**self).query_channels(query)
    }

    fn query_evrs(&self, query: &EvrQuery) -> Result<Vec<u8>> {
        (**self).query_evrs(query)
    }
}

/// Build the source described by a configuration.
pub fn source_from_config(config: &SourceConfig) -> Result<Box<dyn TelemetrySource>> {
    config.validate()?;
    match config {
        SourceConfig::Command {
            channel_command,
            evr_command,
        } => Ok(Box::new(CommandSource::new(
            channel_command.clone(),
            evr_command.clone(),
        ))),
        SourceConfig::Replay(replay) => Ok(Box::new(ScriptedSource::from_replay(replay)?)),
    }
}

/// Runs an external query command per request and captures its stdout.
#[derive(Debug, Clone)]
pub struct CommandSource {
    channel_command: CommandTemplate,
    evr_command: CommandTemplate,
}

impl CommandSource {
    #[must_use]
    pub const fn new(channel_command: CommandTemplate, evr_command: CommandTemplate) -> Self {
        Self {
            channel_command,
            evr_command,
        }
    }

    fn run(template: &CommandTemplate, values: &TemplateValues) -> Result<Vec<u8>> {
        let args: Vec<String> = template.args.iter().map(|arg| values.expand(arg)).collect();
        debug!(program = %template.program, ?args, "running telemetry query");

        let output = Command::new(&template.program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| {
                if err.kind() == io::ErrorKind::NotFound {
                    GladError::configuration(format!(
                        "query program '{}' does not exist",
                        template.program
                    ))
                } else {
                    GladError::Io(err)
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GladError::query(format!(
                "'{}' exited with {}: {}",
                template.program,
                output.status,
                stderr.trim()
            )));
        }
        Ok(output.stdout)
    }
}

impl TelemetrySource for CommandSource {
    fn query_channels(&self, query: &ChannelQuery) -> Result<Vec<u8>> {
        let values = TemplateValues {
            session: query.session_id,
            lookback: query.lookback,
            channels: query.channel_ids.join(","),
            event_ids: String::new(),
        };
        Self::run(&self.channel_command, &values)
    }

    fn query_evrs(&self, query: &EvrQuery) -> Result<Vec<u8>> {
        let event_ids: Vec<String> = query.event_ids.iter().map(u32::to_string).collect();
        let values = TemplateValues {
            session: query.session_id,
            lookback: query.lookback,
            channels: String::new(),
            event_ids: event_ids.join(","),
        };
        Self::run(&self.evr_command, &values)
    }
}

struct TemplateValues {
    session: u32,
    lookback: Duration,
    channels: String,
    event_ids: String,
}

impl TemplateValues {
    fn expand(&self, arg: &str) -> String {
        arg.replace("{session}", &self.session.to_string())
            .replace("{lookback_secs}", &self.lookback.as_secs().to_string())
            .replace("{channels}", &self.channels)
            .replace("{event_ids}", &self.event_ids)
    }
}

/// One canned reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    Body(Vec<u8>),
    /// Fails the query with a transient [`GladError::Query`].
    QueryFailure(String),
}

impl ScriptedReply {
    fn to_result(&self) -> Result<Vec<u8>> {
        match self {
            Self::Body(body) => Ok(body.clone()),
            Self::QueryFailure(detail) => Err(GladError::query(detail.clone())),
        }
    }
}

#[derive(Debug, Default)]
struct Script {
    replies: VecDeque<ScriptedReply>,
    last: Option<ScriptedReply>,
}

impl Script {
    fn next(&mut self, kind: &str) -> Result<Vec<u8>> {
        if let Some(reply) = self.replies.pop_front() {
            self.last = Some(reply);
        }
        self.last.as_ref().map_or_else(
            || {
                Err(GladError::configuration(format!(
                    "no scripted {kind} response available"
                )))
            },
            ScriptedReply::to_result,
        )
    }
}

/// Replays queued responses in order, repeating the last one once the
/// queue drains. Records every query it receives.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    channels: Mutex<Script>,
    evrs: Mutex<Script>,
    channel_queries: Mutex<Vec<ChannelQuery>>,
    evr_queries: Mutex<Vec<EvrQuery>>,
}

impl ScriptedSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_channel_reply(self, reply: ScriptedReply) -> Self {
        self.channels.lock().replies.push_back(reply);
        self
    }

    #[must_use]
    pub fn with_evr_reply(self, reply: ScriptedReply) -> Self {
        self.evrs.lock().replies.push_back(reply);
        self
    }

    /// Queue a channel-list response body.
    #[must_use]
    pub fn with_channel_body(self, body: impl Into<Vec<u8>>) -> Self {
        self.with_channel_reply(ScriptedReply::Body(body.into()))
    }

    /// Queue an EVR-list response body.
    #[must_use]
    pub fn with_evr_body(self, body: impl Into<Vec<u8>>) -> Self {
        self.with_evr_reply(ScriptedReply::Body(body.into()))
    }

    /// Load captured response files, in order.
    pub fn from_replay(config: &ReplaySourceConfig) -> Result<Self> {
        let mut source = Self::new();
        for path in &config.channel_responses {
            source = source.with_channel_body(read_capture(path)?);
        }
        for path in &config.evr_responses {
            source = source.with_evr_body(read_capture(path)?);
        }
        Ok(source)
    }

    #[must_use]
    pub fn channel_queries(&self) -> Vec<ChannelQuery> {
        self.channel_queries.lock().clone()
    }

    #[must_use]
    pub fn evr_queries(&self) -> Vec<EvrQuery> {
        self.evr_queries.lock().clone()
    }

    /// Total queries of both kinds.
    #[must_use]
    pub fn query_count(&self) -> usize {
        self.channel_queries.lock().len() + self.evr_queries.lock().len()
    }
}

impl TelemetrySource for ScriptedSource {
    fn query_channels(&self, query: &ChannelQuery) -> Result<Vec<u8>> {
        self.channel_queries.lock().push(query.clone());
        self.channels.lock().next("channel")
    }

    fn query_evrs(&self, query: &EvrQuery) -> Result<Vec<u8>> {
        self.evr_queries.lock().push(query.clone());
        self.evrs.lock().next("EVR")
    }
}

fn read_capture(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|err| {
        if err.kind() == io::ErrorKind::NotFound {
            GladError::configuration(format!(
                "captured response '{}' does not exist",
                path.display()
            ))
        } else {
            GladError::Io(err)
        }
    })
}
