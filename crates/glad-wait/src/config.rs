//! Wait configuration, read from JSON.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use glad_error::{GladError, Result};
use glad_telemetry::{CHANNEL_LIST_DECODER, DecoderRegistry, EVR_LIST_DECODER};
use serde::{Deserialize, Serialize};

/// Default sleep between poll rounds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Default overall wait budget used by the CLI.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Default query lookback window used by the CLI.
pub const DEFAULT_LOOKBACK_SECS: u64 = 30;

/// Default argument template for channel queries.
pub const DEFAULT_CHANNEL_ARGS: [&str; 6] = [
    "--session",
    "{session}",
    "--lookback",
    "{lookback_secs}",
    "--channels",
    "{channels}",
];

/// Default argument template for EVR queries.
pub const DEFAULT_EVR_ARGS: [&str; 6] = [
    "--session",
    "{session}",
    "--lookback",
    "{lookback_secs}",
    "--event-ids",
    "{event_ids}",
];

/// External program plus argument template.
///
/// Arguments may contain `{session}`, `{lookback_secs}`, `{channels}` and
/// `{event_ids}`, substituted per query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTemplate {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandTemplate {
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    fn with_default_args(program: &str, args: &[&str]) -> Self {
        Self::new(program, args.iter().map(|arg| (*arg).to_owned()).collect())
    }
}

/// Captured response files replayed in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaySourceConfig {
    #[serde(default)]
    pub channel_responses: Vec<PathBuf>,
    #[serde(default)]
    pub evr_responses: Vec<PathBuf>,
}

/// Where poll rounds get their responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    Command {
        channel_command: CommandTemplate,
        evr_command: CommandTemplate,
    },
    Replay(ReplaySourceConfig),
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self::Command {
            channel_command: CommandTemplate::with_default_args("", &DEFAULT_CHANNEL_ARGS),
            evr_command: CommandTemplate::with_default_args("", &DEFAULT_EVR_ARGS),
        }
    }
}

impl SourceConfig {
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Command {
                channel_command,
                evr_command,
            } => {
                for (kind, command) in [("channel", channel_command), ("EVR", evr_command)] {
                    if command.program.trim().is_empty() {
                        return Err(GladError::configuration(format!(
                            "{kind} query command has no program"
                        )));
                    }
                }
                Ok(())
            }
            Self::Replay(replay) => {
                if replay.channel_responses.is_empty() && replay.evr_responses.is_empty() {
                    return Err(GladError::configuration(
                        "replay source lists no captured responses",
                    ));
                }
                Ok(())
            }
        }
    }
}

/// Everything a wait needs besides the condition itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitConfig {
    pub session_id: Option<u32>,
    pub poll_interval_ms: u64,
    pub timeout_secs: u64,
    pub lookback_secs: u64,
    /// Registry name of the decoder for channel responses.
    pub channel_decoder: String,
    /// Registry name of the decoder for EVR responses.
    pub evr_decoder: String,
    pub source: SourceConfig,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            session_id: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            lookback_secs: DEFAULT_LOOKBACK_SECS,
            channel_decoder: CHANNEL_LIST_DECODER.to_owned(),
            evr_decoder: EVR_LIST_DECODER.to_owned(),
            source: SourceConfig::default(),
        }
    }
}

impl WaitConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|err| GladError::configuration(format!("invalid wait configuration: {err}")))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                GladError::configuration(format!(
                    "wait configuration '{}' does not exist",
                    path.display()
                ))
            } else {
                GladError::Io(err)
            }
        })?;
        Self::from_json_str(&text)
    }

    pub fn session_id(&self) -> Result<u32> {
        self.session_id
            .ok_or_else(|| GladError::configuration("no session id configured"))
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    #[must_use]
    pub const fn lookback(&self) -> Duration {
        Duration::from_secs(self.lookback_secs)
    }

    /// Check the settings against the decoders `registry` knows about.
    pub fn validate(&self, registry: &DecoderRegistry) -> Result<()> {
        self.session_id()?;
        if self.poll_interval_ms == 0 {
            return Err(GladError::configuration("poll_interval_ms must be positive"));
        }
        for name in [&self.channel_decoder, &self.evr_decoder] {
            registry.constructor(name)?;
        }
        self.source.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = WaitConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.channel_decoder, "channel_list");
        assert_eq!(config.evr_decoder, "evr_list");
        match &config.source {
            SourceConfig::Command { channel_command, .. } => {
                assert!(channel_command.args.contains(&"{channels}".to_owned()));
            }
            other => panic!("unexpected source: {other:?}"),
        }
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config = WaitConfig::from_json_str(
            r#"{
                "session_id": 7,
                "source": {
                    "type": "command",
                    "channel_command": {"program": "lad-query", "args": ["{session}"]},
                    "evr_command": {"program": "lad-query"}
                }
            }"#,
        )
        .expect("config");
        assert_eq!(config.session_id, Some(7));
        assert_eq!(config.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
        config
            .validate(&DecoderRegistry::with_defaults())
            .expect("valid");
    }

    #[test]
    fn validation_failures() {
        let registry = DecoderRegistry::with_defaults();

        let missing_session = WaitConfig::default();
        let err = missing_session.validate(&registry).unwrap_err();
        assert!(err.to_string().contains("session id"), "{err}");

        let empty_program = WaitConfig {
            session_id: Some(1),
            ..WaitConfig::default()
        };
        let err = empty_program.validate(&registry).unwrap_err();
        assert!(err.to_string().contains("no program"), "{err}");

        let unknown_decoder = WaitConfig {
            session_id: Some(1),
            channel_decoder: "bus_1553".to_owned(),
            source: SourceConfig::Replay(ReplaySourceConfig {
                channel_responses: vec![PathBuf::from("x.xml")],
                evr_responses: Vec::new(),
            }),
            ..WaitConfig::default()
        };
        let err = unknown_decoder.validate(&registry).unwrap_err();
        assert!(matches!(err, GladError::Configuration { .. }));
        assert!(err.to_string().contains("bus_1553"), "{err}");
    }

    #[test]
    fn replay_source_json() {
        let config = WaitConfig::from_json_str(
            r#"{"session_id": 3, "source": {"type": "replay", "channel_responses": ["a.xml"]}}"#,
        )
        .expect("config");
        assert_eq!(
            config.source,
            SourceConfig::Replay(ReplaySourceConfig {
                channel_responses: vec![PathBuf::from("a.xml")],
                evr_responses: Vec::new(),
            })
        );
    }

    #[test]
    fn load_reports_missing_file_and_bad_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = WaitConfig::load(&dir.path().join("none.json")).unwrap_err();
        assert!(matches!(err, GladError::Configuration { .. }));

        let bad = dir.path().join("bad.json");
        fs::write(&bad, "{ not json").expect("write");
        assert!(matches!(
            WaitConfig::load(&bad),
            Err(GladError::Configuration { .. })
        ));
    }
}
