//! Wait-condition engine: block until a tree of channel and EVR conditions
//! holds over polled telemetry, or a timeout expires.

pub mod condition;
pub mod config;
pub mod engine;
pub mod source;

pub use condition::{ChannelMatch, CompoundOp, EvrMatch, LeafMatch, WaitCondition, values_equal};
pub use config::{
    CommandTemplate, DEFAULT_LOOKBACK_SECS, DEFAULT_POLL_INTERVAL_MS, DEFAULT_TIMEOUT_SECS,
    ReplaySourceConfig, SourceConfig, WaitConfig,
};
pub use engine::{
    CancelHandle, MatchResult, TimeoutReport, WaitEngine, WaitOptions, WaitOutcome, WaitRequest,
};
pub use source::{
    ChannelQuery, CommandSource, EvrQuery, ScriptedReply, ScriptedSource, TelemetrySource,
    source_from_config,
};
