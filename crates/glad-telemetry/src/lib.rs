//! Telemetry query responses: typed samples, the streaming response parser,
//! pluggable decoders, and the latest-value channel index.

pub mod decoder;
pub mod index;
pub mod parser;
pub mod rows;
pub mod types;

pub use decoder::{
    CHANNEL_LIST_DECODER, ChannelListDecoder, DecodedResponse, DecoderConstructor,
    DecoderOptions, DecoderRegistry, EVR_LIST_DECODER, EvrListDecoder, ResponseDecoder,
};
pub use index::{IndexView, LatestValueIndex};
pub use parser::{ParserPhase, ResponseParser, parse_channel_list, parse_evr_list};
pub use types::{
    ChannelResponse, ChannelSample, ChannelType, EvrFilter, EvrResponse, EvrSample,
    ListAttributes, unix_now_ns,
};
