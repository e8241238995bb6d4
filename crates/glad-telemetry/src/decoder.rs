//! Response decoders and the name → constructor registry.
//!
//! A decoder tells the parser which element names frame its response and
//! turns the accumulated text of header and record elements into samples.
//! Decoders are looked up by name from a [`DecoderRegistry`] populated at
//! start-up, so new response shapes plug in without touching the parser.

use glad_error::{GladError, Result};
use hashbrown::HashMap;

use crate::rows::{ColumnMap, data_rows, decode_evr_row, split_quoted_fields};
use crate::types::{
    ChannelResponse, EvrFilter, EvrResponse, ListAttributes, unix_now_ns,
};

/// Registry name of the channel-list decoder.
pub const CHANNEL_LIST_DECODER: &str = "channel_list";
/// Registry name of the EVR-list decoder.
pub const EVR_LIST_DECODER: &str = "evr_list";

pub const CHANNEL_LIST_ELEMENT: &str = "ChannelList";
pub const EVR_LIST_ELEMENT: &str = "EvrList";
pub const HEADER_ELEMENT: &str = "Header";
pub const CHANNEL_DATA_ELEMENT: &str = "Data";
pub const EVR_RECORD_ELEMENT: &str = "Evr";

/// Per-parse inputs handed to a decoder constructor.
#[derive(Debug, Clone, Default)]
pub struct DecoderOptions {
    pub evr_filter: EvrFilter,
    /// Capture time stamped onto every sample.
    pub received_at_ns: u64,
}

impl DecoderOptions {
    /// Options stamped with the current wall-clock time.
    #[must_use]
    pub fn now(evr_filter: EvrFilter) -> Self {
        Self {
            evr_filter,
            received_at_ns: unix_now_ns(),
        }
    }
}

/// Output of a finished decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedResponse {
    Channels(ChannelResponse),
    Evrs(EvrResponse),
}

impl DecodedResponse {
    pub fn into_channels(self) -> Result<ChannelResponse> {
        match self {
            Self::Channels(response) => Ok(response),
            Self::Evrs(_) => Err(GladError::configuration(
                "decoder produced an EVR response where a channel response was expected",
            )),
        }
    }

    pub fn into_evrs(self) -> Result<EvrResponse> {
        match self {
            Self::Evrs(response) => Ok(response),
            Self::Channels(_) => Err(GladError::configuration(
                "decoder produced a channel response where an EVR response was expected",
            )),
        }
    }
}

/// Element-level callbacks driven by [`crate::parser::ResponseParser`].
///
/// Callbacks report failures as plain detail strings; the parser attaches
/// the document position.
pub trait ResponseDecoder: Send {
    /// Name of the outer list element.
    fn list_element(&self) -> &'static str;

    /// Name of the column-header element, if this response has one.
    fn header_element(&self) -> Option<&'static str> {
        None
    }

    /// Name of the element whose text holds record data.
    fn record_element(&self) -> &'static str;

    fn on_list_open(&mut self, attributes: ListAttributes);

    fn on_header(&mut self, text: &str) -> std::result::Result<(), String> {
        Err(format!("unexpected column header '{}'", text.trim()))
    }

    fn on_record(&mut self, text: &str) -> std::result::Result<(), String>;

    fn finish(self: Box<Self>) -> DecodedResponse;
}

/// Decodes `<ChannelList>` responses.
#[derive(Debug, Default)]
pub struct ChannelListDecoder {
    received_at_ns: u64,
    columns: Option<ColumnMap>,
    response: ChannelResponse,
}

impl ChannelListDecoder {
    #[must_use]
    pub fn new(options: &DecoderOptions) -> Self {
        Self {
            received_at_ns: options.received_at_ns,
            ..Self::default()
        }
    }
}

impl ResponseDecoder for ChannelListDecoder {
    fn list_element(&self) -> &'static str {
        CHANNEL_LIST_ELEMENT
    }

    fn header_element(&self) -> Option<&'static str> {
        Some(HEADER_ELEMENT)
    }

    fn record_element(&self) -> &'static str {
        CHANNEL_DATA_ELEMENT
    }

    fn on_list_open(&mut self, attributes: ListAttributes) {
        self.response.attributes = attributes;
    }

    fn on_header(&mut self, text: &str) -> std::result::Result<(), String> {
        self.columns = Some(ColumnMap::from_header(text)?);
        Ok(())
    }

    fn on_record(&mut self, text: &str) -> std::result::Result<(), String> {
        let Some(columns) = self.columns.as_ref() else {
            return Err(format!(
                "<{CHANNEL_DATA_ELEMENT}> appeared before <{HEADER_ELEMENT}>"
            ));
        };
        let event_time = self.response.attributes.event_time.as_deref();
        for (row_index, row) in data_rows(text).enumerate() {
            let fields = split_quoted_fields(row).map_err(|err| format!("row {row_index}: {err}"))?;
            let sample = columns
                .decode_row(fields, self.received_at_ns, event_time)
                .map_err(|err| format!("row {row_index}: {err}"))?;
            self.response.samples.push(sample);
        }
        Ok(())
    }

    fn finish(self: Box<Self>) -> DecodedResponse {
        DecodedResponse::Channels(self.response)
    }
}

/// Decodes `<EvrList>` responses, applying the event-id filter.
#[derive(Debug, Default)]
pub struct EvrListDecoder {
    received_at_ns: u64,
    filter: EvrFilter,
    response: EvrResponse,
}

impl EvrListDecoder {
    #[must_use]
    pub fn new(options: &DecoderOptions) -> Self {
        Self {
            received_at_ns: options.received_at_ns,
            filter: options.evr_filter.clone(),
            response: EvrResponse::default(),
        }
    }
}

impl ResponseDecoder for EvrListDecoder {
    fn list_element(&self) -> &'static str {
        EVR_LIST_ELEMENT
    }

    fn record_element(&self) -> &'static str {
        EVR_RECORD_ELEMENT
    }

    fn on_list_open(&mut self, attributes: ListAttributes) {
        self.response.attributes = attributes;
    }

    fn on_record(&mut self, text: &str) -> std::result::Result<(), String> {
        let event_time = self.response.attributes.event_time.as_deref();
        let sample = decode_evr_row(text, self.received_at_ns, event_time)?;
        if self.filter.accepts(sample.event_id) {
            self.response.samples.push(sample);
        } else {
            self.response.filtered_out += 1;
        }
        Ok(())
    }

    fn finish(self: Box<Self>) -> DecodedResponse {
        DecodedResponse::Evrs(self.response)
    }
}

/// Builds a decoder for one parse.
pub type DecoderConstructor = fn(&DecoderOptions) -> Box<dyn ResponseDecoder>;

fn channel_list_constructor(options: &DecoderOptions) -> Box<dyn ResponseDecoder> {
    Box::new(ChannelListDecoder::new(options))
}

fn evr_list_constructor(options: &DecoderOptions) -> Box<dyn ResponseDecoder> {
    Box::new(EvrListDecoder::new(options))
}

/// Explicit decoder-name → constructor mapping.
#[derive(Debug, Clone, Default)]
pub struct DecoderRegistry {
    constructors: HashMap<String, DecoderConstructor>,
}

impl DecoderRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in channel-list and EVR-list decoders.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(CHANNEL_LIST_DECODER, channel_list_constructor);
        registry.register(EVR_LIST_DECODER, evr_list_constructor);
        registry
    }

    /// Register a constructor, returning any constructor it replaced.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        constructor: DecoderConstructor,
    ) -> Option<DecoderConstructor> {
        self.constructors.insert(name.into(), constructor)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Look up a constructor by name.
    pub fn constructor(&self, name: &str) -> Result<DecoderConstructor> {
        self.constructors.get(name).copied().ok_or_else(|| {
            GladError::configuration(format!(
                "no response decoder registered under '{name}' (known: {})",
                self.names().join(", ")
            ))
        })
    }

    /// Build a decoder by name.
    pub fn create(&self, name: &str, options: &DecoderOptions) -> Result<Box<dyn ResponseDecoder>> {
        Ok(self.constructor(name)?(options))
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_registered() {
        let registry = DecoderRegistry::with_defaults();
        assert_eq!(registry.names(), vec!["channel_list", "evr_list"]);
        let decoder = registry
            .create(CHANNEL_LIST_DECODER, &DecoderOptions::default())
            .expect("channel decoder");
        assert_eq!(decoder.list_element(), CHANNEL_LIST_ELEMENT);
        assert_eq!(decoder.header_element(), Some(HEADER_ELEMENT));
    }

    #[test]
    fn unknown_name_is_configuration_error() {
        let registry = DecoderRegistry::with_defaults();
        let err = registry
            .create("bus_1553", &DecoderOptions::default())
            .err()
            .expect("unknown decoder");
        assert!(matches!(err, GladError::Configuration { .. }));
        assert!(err.to_string().contains("channel_list, evr_list"), "{err}");
    }

    #[test]
    fn register_replaces_existing_constructor() {
        let mut registry = DecoderRegistry::new();
        assert!(registry.register("evrs", evr_list_constructor).is_none());
        assert!(registry.register("evrs", channel_list_constructor).is_some());
        let decoder = registry
            .create("evrs", &DecoderOptions::default())
            .expect("replaced constructor");
        assert_eq!(decoder.list_element(), CHANNEL_LIST_ELEMENT);
    }

    #[test]
    fn channel_data_before_header_is_rejected() {
        let mut decoder = ChannelListDecoder::new(&DecoderOptions::default());
        let err = decoder.on_record("\"A\",\"FLOAT\"").unwrap_err();
        assert!(err.contains("before <Header>"), "{err}");
    }

    #[test]
    fn evr_decoder_counts_filtered_records() {
        let options = DecoderOptions {
            evr_filter: EvrFilter::single(220),
            received_at_ns: 5,
        };
        let mut decoder: Box<dyn ResponseDecoder> = Box::new(EvrListDecoder::new(&options));
        decoder.on_record("220|WARNING_HI|1|a|m").expect("record");
        decoder.on_record("221|WARNING_HI|1|b|m").expect("record");
        let response = decoder.finish().into_evrs().expect("evr response");
        assert_eq!(response.samples.len(), 1);
        assert_eq!(response.samples[0].event_id, 220);
        assert_eq!(response.samples[0].received_at_ns, 5);
        assert_eq!(response.filtered_out, 1);
    }

    #[test]
    fn wrong_kind_conversion_is_configuration_error() {
        let decoded = DecodedResponse::Evrs(EvrResponse::default());
        assert!(matches!(
            decoded.into_channels(),
            Err(GladError::Configuration { .. })
        ));
    }
}
