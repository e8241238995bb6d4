//! Typed telemetry samples produced by the response parser.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Channel data type as reported in the `type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelType {
    UnsignedInt,
    SignedInt,
    Float,
    Double,
    Status,
    Ascii,
    Boolean,
    Digital,
}

const CHANNEL_TYPE_NAMES: [(ChannelType, &str); 8] = [
    (ChannelType::UnsignedInt, "UNSIGNED_INT"),
    (ChannelType::SignedInt, "SIGNED_INT"),
    (ChannelType::Float, "FLOAT"),
    (ChannelType::Double, "DOUBLE"),
    (ChannelType::Status, "STATUS"),
    (ChannelType::Ascii, "ASCII"),
    (ChannelType::Boolean, "BOOLEAN"),
    (ChannelType::Digital, "DIGITAL"),
];

impl ChannelType {
    /// Wire name of this type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnsignedInt => "UNSIGNED_INT",
            Self::SignedInt => "SIGNED_INT",
            Self::Float => "FLOAT",
            Self::Double => "DOUBLE",
            Self::Status => "STATUS",
            Self::Ascii => "ASCII",
            Self::Boolean => "BOOLEAN",
            Self::Digital => "DIGITAL",
        }
    }

    /// Case-insensitive lookup by wire name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        CHANNEL_TYPE_NAMES
            .iter()
            .find(|(_, wire)| wire.eq_ignore_ascii_case(name))
            .map(|(kind, _)| *kind)
    }

    /// Status channels carry a state name in place of an EU value.
    #[must_use]
    pub const fn has_engineering_units(self) -> bool {
        !matches!(self, Self::Status)
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| format!("unknown channel type '{s}'"))
    }
}

/// Timestamp attributes carried on a response's list element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListAttributes {
    pub event_time: Option<String>,
    pub primary_time: Option<String>,
    pub secondary_time: Option<String>,
}

/// Latest value of one channel as parsed from a channel-list row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSample {
    pub channel_id: String,
    pub channel_type: ChannelType,
    /// Raw data number.
    pub dn: String,
    /// Engineering-unit value; absent for status channels.
    pub eu: Option<String>,
    /// State name for status channels.
    pub status: Option<String>,
    pub sclk: String,
    pub scet: String,
    pub ert: String,
    /// Wall-clock time the response was parsed (unix nanoseconds).
    pub received_at_ns: u64,
    /// `eventTime` of the enclosing list, if the server sent one.
    pub event_time: Option<String>,
}

impl ChannelSample {
    /// The value an `eu` constraint is compared against: the EU value, or
    /// the status string for status channels.
    #[must_use]
    pub fn display_value(&self) -> Option<&str> {
        if self.channel_type.has_engineering_units() {
            self.eu.as_deref()
        } else {
            self.status.as_deref()
        }
    }
}

/// One event record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvrSample {
    pub event_id: u32,
    pub level: String,
    pub module: String,
    pub message: String,
    pub sclk: String,
    pub received_at_ns: u64,
    pub event_time: Option<String>,
}

/// Event-id selection applied while parsing EVR responses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EvrFilter {
    /// Keep every EVR.
    #[default]
    All,
    /// Keep only EVRs whose id is in the set.
    Ids(BTreeSet<u32>),
}

impl EvrFilter {
    /// Filter for exactly one event id.
    #[must_use]
    pub fn single(event_id: u32) -> Self {
        Self::Ids(BTreeSet::from([event_id]))
    }

    #[must_use]
    pub fn accepts(&self, event_id: u32) -> bool {
        match self {
            Self::All => true,
            Self::Ids(ids) => ids.contains(&event_id),
        }
    }
}

/// Parsed channel-list response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelResponse {
    pub attributes: ListAttributes,
    /// Samples in row order.
    pub samples: Vec<ChannelSample>,
}

/// Parsed EVR-list response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvrResponse {
    pub attributes: ListAttributes,
    /// Samples that passed the filter, in document order.
    pub samples: Vec<EvrSample>,
    /// Well-formed EVRs dropped by the filter.
    pub filtered_out: usize,
}

/// Current wall-clock time in unix nanoseconds (0 if the clock is before 1970).
#[must_use]
pub fn unix_now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX)
        })
}
