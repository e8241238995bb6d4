//! Wait-condition trees and their evaluation against one poll round.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use glad_error::{GladError, Result};
use glad_telemetry::{ChannelSample, EvrFilter, EvrSample, IndexView};
use serde::{Deserialize, Serialize};

/// Boolean operator of a compound node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CompoundOp {
    And,
    Or,
}

const COMPOUND_OP_NAMES: [(CompoundOp, &str); 2] = [(CompoundOp::And, "AND"), (CompoundOp::Or, "OR")];

impl CompoundOp {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

impl fmt::Display for CompoundOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompoundOp {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        COMPOUND_OP_NAMES
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(s.trim()))
            .map(|(op, _)| *op)
            .ok_or_else(|| format!("unknown compound operator '{s}'"))
    }
}

/// Leaf over the latest value of one channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMatch {
    pub channel_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eu: Option<String>,
}

impl ChannelMatch {
    #[must_use]
    pub fn any(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_dn(mut self, dn: impl Into<String>) -> Self {
        self.dn = Some(dn.into());
        self
    }

    #[must_use]
    pub fn with_eu(mut self, eu: impl Into<String>) -> Self {
        self.eu = Some(eu.into());
        self
    }

    /// Every present constraint equals the sample's field.
    #[must_use]
    pub fn matches(&self, sample: &ChannelSample) -> bool {
        if sample.channel_id != self.channel_id {
            return false;
        }
        if let Some(dn) = &self.dn {
            if !values_equal(dn, &sample.dn) {
                return false;
            }
        }
        match &self.eu {
            None => true,
            Some(eu) => sample
                .display_value()
                .is_some_and(|value| values_equal(eu, value)),
        }
    }
}

/// Leaf over the EVRs fetched in the current round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvrMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sclk: Option<String>,
}

impl EvrMatch {
    #[must_use]
    pub fn event_id(event_id: u32) -> Self {
        Self {
            event_id: Some(event_id),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn matches(&self, sample: &EvrSample) -> bool {
        self.event_id.is_none_or(|id| id == sample.event_id)
            && field_matches(self.level.as_deref(), &sample.level)
            && field_matches(self.module.as_deref(), &sample.module)
            && field_matches(self.message.as_deref(), &sample.message)
            && field_matches(self.sclk.as_deref(), &sample.sclk)
    }
}

fn field_matches(expected: Option<&str>, actual: &str) -> bool {
    expected.is_none_or(|expected| expected == actual)
}

/// Compare a DN/EU constraint with a sample value.
///
/// Equal strings match; otherwise both must parse as finite numbers with
/// the same value, so `"5"` matches `"5.0"`.
#[must_use]
pub fn values_equal(expected: &str, actual: &str) -> bool {
    let (expected, actual) = (expected.trim(), actual.trim());
    if expected == actual {
        return true;
    }
    match (expected.parse::<f64>(), actual.parse::<f64>()) {
        (Ok(a), Ok(b)) => a.is_finite() && b.is_finite() && a == b,
        _ => false,
    }
}

/// A wait condition: leaves over channel values and EVRs, combined with AND/OR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WaitCondition {
    Channel(ChannelMatch),
    Evr(EvrMatch),
    Compound {
        op: CompoundOp,
        children: Vec<WaitCondition>,
    },
}

/// The sample that satisfied one leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LeafMatch {
    Channel(ChannelSample),
    Evr(EvrSample),
}

impl WaitCondition {
    #[must_use]
    pub fn and(children: Vec<Self>) -> Self {
        Self::Compound {
            op: CompoundOp::And,
            children,
        }
    }

    #[must_use]
    pub fn or(children: Vec<Self>) -> Self {
        Self::Compound {
            op: CompoundOp::Or,
            children,
        }
    }

    /// Parse a condition tree from JSON.
    pub fn from_json(text: &str) -> Result<Self> {
        let condition: Self = serde_json::from_str(text)
            .map_err(|err| GladError::configuration(format!("invalid wait condition: {err}")))?;
        condition.validate()?;
        Ok(condition)
    }

    /// Reject trees that can never be evaluated meaningfully.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Channel(leaf) if leaf.channel_id.trim().is_empty() => Err(
                GladError::configuration("channel condition has an empty channel id"),
            ),
            Self::Channel(_) | Self::Evr(_) => Ok(()),
            Self::Compound { op, children } => {
                if children.is_empty() {
                    return Err(GladError::configuration(format!(
                        "{op} condition has no children"
                    )));
                }
                children.iter().try_for_each(Self::validate)
            }
        }
    }

    /// Channel ids referenced anywhere in the tree.
    #[must_use]
    pub fn channel_ids(&self) -> BTreeSet<String> {
        let mut ids = BTreeSet::new();
        self.visit_leaves(&mut |leaf| {
            if let Self::Channel(channel) = leaf {
                ids.insert(channel.channel_id.clone());
            }
        });
        ids
    }

    /// Filter for the round's single EVR query, or `None` if the tree has no
    /// EVR leaves. Any leaf without an event id widens it to all EVRs.
    #[must_use]
    pub fn evr_filter(&self) -> Option<EvrFilter> {
        let mut filter: Option<EvrFilter> = None;
        self.visit_leaves(&mut |leaf| {
            let Self::Evr(evr) = leaf else {
                return;
            };
            filter = Some(match (filter.take(), evr.event_id) {
                (Some(EvrFilter::All), _) | (_, None) => EvrFilter::All,
                (Some(EvrFilter::Ids(mut ids)), Some(id)) => {
                    ids.insert(id);
                    EvrFilter::Ids(ids)
                }
                (None, Some(id)) => EvrFilter::single(id),
            });
        });
        filter
    }

    /// Evaluate against the index and this round's EVRs.
    ///
    /// Returns the samples that satisfied each contributing leaf, or `None`.
    /// AND stops at its first false child and OR at its first true child.
    #[must_use]
    pub fn evaluate(&self, channels: &IndexView<'_>, evrs: &[EvrSample]) -> Option<Vec<LeafMatch>> {
        let mut matches = Vec::new();
        self.evaluate_into(channels, evrs, &mut matches)
            .then_some(matches)
    }

    fn evaluate_into(
        &self,
        channels: &IndexView<'_>,
        evrs: &[EvrSample],
        matches: &mut Vec<LeafMatch>,
    ) -> bool {
        match self {
            Self::Channel(leaf) => match channels.get(&leaf.channel_id) {
                Some(sample) if leaf.matches(sample) => {
                    matches.push(LeafMatch::Channel(sample.clone()));
                    true
                }
                _ => false,
            },
            Self::Evr(leaf) => match evrs.iter().find(|sample| leaf.matches(sample)) {
                Some(sample) => {
                    matches.push(LeafMatch::Evr(sample.clone()));
                    true
                }
                None => false,
            },
            Self::Compound {
                op: CompoundOp::And,
                children,
            } => {
                let mark = matches.len();
                let all = children
                    .iter()
                    .all(|child| child.evaluate_into(channels, evrs, matches));
                if !all {
                    matches.truncate(mark);
                }
                all
            }
            Self::Compound {
                op: CompoundOp::Or,
                children,
            } => children.iter().any(|child| {
                let mark = matches.len();
                let hit = child.evaluate_into(channels, evrs, matches);
                if !hit {
                    matches.truncate(mark);
                }
                hit
            }),
        }
    }

    fn visit_leaves<'a>(&'a self, visit: &mut impl FnMut(&'a Self)) {
        match self {
            Self::Compound { children, .. } => {
                for child in children {
                    child.visit_leaves(visit);
                }
            }
            leaf => visit(leaf),
        }
    }
}
