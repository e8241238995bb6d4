//! Blocking poll loop that waits for a condition tree to become true.
//!
//! Each round issues at most one channel query and one EVR query covering
//! every leaf in the tree, parses both responses completely, rebuilds the
//! [`LatestValueIndex`] from the channel samples, and evaluates the tree
//! under the index lock. A channel absent from the round's response never
//! matches, whatever an earlier round or wait returned. EVR samples are
//! scanned for that round only.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use glad_error::{GladError, Result};
use glad_telemetry::{
    ChannelSample, DecoderOptions, DecoderRegistry, EvrFilter, EvrSample, LatestValueIndex,
    ResponseParser,
};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::condition::{LeafMatch, WaitCondition};
use crate::config::{DEFAULT_POLL_INTERVAL_MS, WaitConfig};
use crate::source::{ChannelQuery, EvrQuery, TelemetrySource};

/// Shared flag that aborts a wait between poll rounds.
///
/// Cancelling wakes a wait that is sleeping between rounds. A poll that is
/// already running always finishes first.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    inner: Arc<CancelState>,
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: Mutex<bool>,
    wake: Condvar,
}

impl CancelHandle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        *self.inner.cancelled.lock() = true;
        self.inner.wake.notify_all();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.lock()
    }

    /// Sleep up to `duration`; returns `true` if cancelled before or during.
    fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut cancelled = self.inner.cancelled.lock();
        while !*cancelled {
            if self
                .inner
                .wake
                .wait_until(&mut cancelled, deadline)
                .timed_out()
            {
                break;
            }
        }
        *cancelled
    }
}

/// Per-wait options.
#[derive(Debug, Clone, Default)]
pub struct WaitOptions {
    /// Overall budget. Zero polls exactly once.
    pub timeout: Duration,
    /// History window each query covers.
    pub lookback: Duration,
    pub cancel: Option<CancelHandle>,
}

impl WaitOptions {
    #[must_use]
    pub const fn new(timeout: Duration, lookback: Duration) -> Self {
        Self {
            timeout,
            lookback,
            cancel: None,
        }
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// A satisfied wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    /// Samples that satisfied each contributing leaf, in tree order.
    pub matches: Vec<LeafMatch>,
    pub attempts: u64,
    pub elapsed: Duration,
}

/// A wait whose budget ran out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutReport {
    pub timeout: Duration,
    pub attempts: u64,
    pub elapsed: Duration,
    /// Channels named by the condition that no response ever contained.
    pub unseen_channels: Vec<String>,
    /// The most recent transient query failure, if any round failed.
    pub last_error: Option<String>,
}

impl TimeoutReport {
    #[must_use]
    pub const fn to_error(&self) -> GladError {
        GladError::Timeout {
            timeout: self.timeout,
            attempts: self.attempts,
        }
    }
}

impl fmt::Display for TimeoutReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_error())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Matched(MatchResult),
    TimedOut(TimeoutReport),
}

impl WaitOutcome {
    #[must_use]
    pub const fn is_matched(&self) -> bool {
        matches!(self, Self::Matched(_))
    }

    /// A timeout becomes [`GladError::Timeout`].
    pub fn into_result(self) -> Result<MatchResult> {
        match self {
            Self::Matched(result) => Ok(result),
            Self::TimedOut(report) => Err(report.to_error()),
        }
    }
}

/// One wait for [`WaitEngine::wait_all`].
#[derive(Debug, Clone)]
pub struct WaitRequest {
    pub condition: WaitCondition,
    pub options: WaitOptions,
}

/// What one round asks the source for.
#[derive(Debug)]
struct PollPlan {
    channel_ids: Vec<String>,
    evr_filter: Option<EvrFilter>,
}

impl PollPlan {
    fn for_condition(condition: &WaitCondition) -> Self {
        Self {
            channel_ids: condition.channel_ids().into_iter().collect(),
            evr_filter: condition.evr_filter(),
        }
    }
}

/// Polls a telemetry source until conditions hold.
///
/// The engine can be shared by concurrent waits. They share the source, but
/// each round evaluates against an index rebuilt from its own response.
pub struct WaitEngine<S> {
    source: S,
    session_id: u32,
    poll_interval: Duration,
    registry: DecoderRegistry,
    channel_decoder: String,
    evr_decoder: String,
    index: LatestValueIndex,
}

impl<S: TelemetrySource> WaitEngine<S> {
    /// Engine with the built-in decoders and the default poll interval.
    pub fn new(source: S, session_id: u32) -> Self {
        let defaults = WaitConfig::default();
        Self {
            source,
            session_id,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            registry: DecoderRegistry::with_defaults(),
            channel_decoder: defaults.channel_decoder,
            evr_decoder: defaults.evr_decoder,
            index: LatestValueIndex::new(),
        }
    }

    /// Engine configured from a validated [`WaitConfig`].
    pub fn from_config(source: S, config: &WaitConfig, registry: DecoderRegistry) -> Result<Self> {
        config.validate(&registry)?;
        Ok(Self {
            source,
            session_id: config.session_id()?,
            poll_interval: config.poll_interval(),
            registry,
            channel_decoder: config.channel_decoder.clone(),
            evr_decoder: config.evr_decoder.clone(),
            index: LatestValueIndex::new(),
        })
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn index(&self) -> &LatestValueIndex {
        &self.index
    }

    pub const fn session_id(&self) -> u32 {
        self.session_id
    }

    /// Block until `condition` holds, the timeout passes, or the wait is cancelled.
    ///
    /// Transient query failures are logged and retried. Protocol violations
    /// and configuration errors end the wait immediately.
    pub fn wait(&self, condition: &WaitCondition, options: &WaitOptions) -> Result<WaitOutcome> {
        condition.validate()?;
        let plan = PollPlan::for_condition(condition);
        info!(
            session_id = self.session_id,
            channels = plan.channel_ids.len(),
            queries_evrs = plan.evr_filter.is_some(),
            timeout_ms = options.timeout.as_millis() as u64,
            lookback_secs = options.lookback.as_secs(),
            "waiting for condition"
        );

        let started = Instant::now();
        let mut attempts = 0_u64;
        let mut seen = BTreeSet::new();
        let mut last_error: Option<String> = None;

        loop {
            if options.cancel.as_ref().is_some_and(CancelHandle::is_cancelled) {
                info!(attempts, "wait cancelled");
                return Err(GladError::Cancelled { attempts });
            }

            attempts += 1;
            match self.poll_once(condition, &plan, options.lookback, &mut seen) {
                Ok(Some(matches)) => {
                    let elapsed = started.elapsed();
                    info!(
                        attempts,
                        elapsed_ms = elapsed.as_millis() as u64,
                        leaves = matches.len(),
                        "condition satisfied"
                    );
                    return Ok(WaitOutcome::Matched(MatchResult {
                        matches,
                        attempts,
                        elapsed,
                    }));
                }
                Ok(None) => debug!(attempt = attempts, "condition not yet satisfied"),
                Err(err) if err.is_transient() => {
                    warn!(attempt = attempts, error = %err, "poll round failed, retrying");
                    last_error = Some(err.to_string());
                }
                Err(err) => {
                    warn!(attempt = attempts, error = %err, "aborting wait");
                    return Err(err);
                }
            }

            let elapsed = started.elapsed();
            if elapsed >= options.timeout {
                return Ok(self.timed_out(&plan, &seen, options.timeout, attempts, elapsed, last_error));
            }

            let pause = self.poll_interval.min(options.timeout - elapsed);
            match &options.cancel {
                Some(cancel) => {
                    if cancel.sleep(pause) {
                        info!(attempts, "wait cancelled");
                        return Err(GladError::Cancelled { attempts });
                    }
                }
                None => std::thread::sleep(pause),
            }

            let elapsed = started.elapsed();
            if elapsed >= options.timeout {
                return Ok(self.timed_out(&plan, &seen, options.timeout, attempts, elapsed, last_error));
            }
        }
    }

    /// Run independent waits concurrently, one scoped thread each.
    ///
    /// Results come back in request order.
    pub fn wait_all(&self, requests: &[WaitRequest]) -> Vec<Result<WaitOutcome>> {
        std::thread::scope(|scope| {
            let handles: Vec<_> = requests
                .iter()
                .map(|request| scope.spawn(move || self.wait(&request.condition, &request.options)))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(GladError::internal("wait thread panicked")))
                })
                .collect()
        })
    }

    fn poll_once(
        &self,
        condition: &WaitCondition,
        plan: &PollPlan,
        lookback: Duration,
        seen: &mut BTreeSet<String>,
    ) -> Result<Option<Vec<LeafMatch>>> {
        let channel_samples = if plan.channel_ids.is_empty() {
            Vec::new()
        } else {
            self.fetch_channels(&plan.channel_ids, lookback)?
        };
        let evrs = match &plan.evr_filter {
            Some(filter) => self.fetch_evrs(filter, lookback)?,
            None => Vec::new(),
        };

        seen.extend(channel_samples.iter().map(|sample| sample.channel_id.clone()));
        debug!(
            channel_samples = channel_samples.len(),
            evrs = evrs.len(),
            "poll round fetched"
        );
        Ok(self
            .index
            .replace_then(channel_samples, |view| condition.evaluate(view, &evrs)))
    }

    fn fetch_channels(&self, channel_ids: &[String], lookback: Duration) -> Result<Vec<ChannelSample>> {
        let body = self.source.query_channels(&ChannelQuery {
            session_id: self.session_id,
            lookback,
            channel_ids: channel_ids.to_vec(),
        })?;
        let decoder = self
            .registry
            .create(&self.channel_decoder, &DecoderOptions::now(EvrFilter::All))?;
        Ok(ResponseParser::new(decoder)
            .parse(body.as_slice())?
            .into_channels()?
            .samples)
    }

    fn fetch_evrs(&self, filter: &EvrFilter, lookback: Duration) -> Result<Vec<EvrSample>> {
        let event_ids = match filter {
            EvrFilter::All => Vec::new(),
            EvrFilter::Ids(ids) => ids.iter().copied().collect(),
        };
        let body = self.source.query_evrs(&EvrQuery {
            session_id: self.session_id,
            lookback,
            event_ids,
        })?;
        let decoder = self
            .registry
            .create(&self.evr_decoder, &DecoderOptions::now(filter.clone()))?;
        Ok(ResponseParser::new(decoder)
            .parse(body.as_slice())?
            .into_evrs()?
            .samples)
    }

    fn timed_out(
        &self,
        plan: &PollPlan,
        seen: &BTreeSet<String>,
        timeout: Duration,
        attempts: u64,
        elapsed: Duration,
        last_error: Option<String>,
    ) -> WaitOutcome {
        let unseen_channels: Vec<String> = plan
            .channel_ids
            .iter()
            .filter(|id| !seen.contains(*id))
            .cloned()
            .collect();
        info!(
            session_id = self.session_id,
            attempts,
            elapsed_ms = elapsed.as_millis() as u64,
            unseen = unseen_channels.len(),
            "wait timed out"
        );
        WaitOutcome::TimedOut(TimeoutReport {
            timeout,
            attempts,
            elapsed,
            unseen_channels,
            last_error,
        })
    }
}

impl<S> fmt::Debug for WaitEngine<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitEngine")
            .field("session_id", &self.session_id)
            .field("poll_interval", &self.poll_interval)
            .field("channel_decoder", &self.channel_decoder)
            .field("evr_decoder", &self.evr_decoder)
            .field("indexed_channels", &self.index.len())
            .finish_non_exhaustive()
    }
}
