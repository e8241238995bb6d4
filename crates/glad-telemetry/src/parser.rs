//! Streaming query-response parser.
//!
//! A small state machine over element boundaries:
//!
//! ```text
//! Idle --<List>--> InList --<Header>--> InColumnHeader --</Header>--> InList
//!                  InList --<Record>--> InRecord       --</Record>--> InList
//!                  InList --</List>---> Idle (done)
//! ```
//!
//! All state lives in one [`ParserState`] value threaded through the event
//! loop. Element names come from the [`ResponseDecoder`], which also turns
//! header and record text into samples. Any markup or row error rejects the
//! whole document.

use std::borrow::Cow;
use std::io::{self, BufRead, Read};

use glad_error::{GladError, Result};
use memchr::memchr_iter;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tracing::debug;

use crate::decoder::{
    ChannelListDecoder, DecodedResponse, DecoderOptions, EvrListDecoder, ResponseDecoder,
};
use crate::types::{ChannelResponse, EvrFilter, EvrResponse, ListAttributes};

const READ_BUFFER_BYTES: usize = 8 * 1024;

const EVENT_TIME_ATTR: &str = "eventTime";
const PRIMARY_TIME_ATTR: &str = "primaryTime";
const SECONDARY_TIME_ATTR: &str = "secondaryTime";

/// Where the parser is relative to the response's element structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserPhase {
    Idle,
    InList,
    InRecord,
    InColumnHeader,
}

struct ParserState {
    decoder: Box<dyn ResponseDecoder>,
    phase: ParserPhase,
    text: String,
    list_closed: bool,
    records: usize,
}

type Step = std::result::Result<(), String>;

impl ParserState {
    fn new(decoder: Box<dyn ResponseDecoder>) -> Self {
        Self {
            decoder,
            phase: ParserPhase::Idle,
            text: String::new(),
            list_closed: false,
            records: 0,
        }
    }

    fn on_open(&mut self, element: &BytesStart<'_>, self_closing: bool) -> Step {
        let name = element_name(element.local_name().as_ref())?;
        match self.phase {
            ParserPhase::Idle => {
                if self.list_closed {
                    return Err(format!("unexpected <{name}> after the list element closed"));
                }
                if name != self.decoder.list_element() {
                    return Err(format!(
                        "unexpected <{name}>, expected <{}>",
                        self.decoder.list_element()
                    ));
                }
                let attributes = list_attributes(element)?;
                self.decoder.on_list_open(attributes);
                self.phase = ParserPhase::InList;
            }
            ParserPhase::InList => {
                if Some(name.as_str()) == self.decoder.header_element() {
                    self.phase = ParserPhase::InColumnHeader;
                } else if name == self.decoder.record_element() {
                    self.phase = ParserPhase::InRecord;
                } else {
                    return Err(format!(
                        "unexpected <{name}> inside <{}>",
                        self.decoder.list_element()
                    ));
                }
                self.text.clear();
            }
            ParserPhase::InRecord | ParserPhase::InColumnHeader => {
                return Err(format!("element <{name}> may not be nested in record text"));
            }
        }

        if self_closing {
            self.on_close(&name)?;
        }
        Ok(())
    }

    fn on_close(&mut self, name: &str) -> Step {
        match self.phase {
            ParserPhase::Idle => Err(format!("unexpected </{name}>")),
            ParserPhase::InList => {
                expect_close(name, self.decoder.list_element())?;
                self.phase = ParserPhase::Idle;
                self.list_closed = true;
                Ok(())
            }
            ParserPhase::InColumnHeader => {
                let header = self.decoder.header_element().unwrap_or_default();
                expect_close(name, header)?;
                self.decoder.on_header(&self.text)?;
                self.phase = ParserPhase::InList;
                Ok(())
            }
            ParserPhase::InRecord => {
                expect_close(name, self.decoder.record_element())?;
                self.decoder.on_record(&self.text)?;
                self.records += 1;
                self.phase = ParserPhase::InList;
                Ok(())
            }
        }
    }

    fn on_text(&mut self, text: &str) -> Step {
        match self.phase {
            ParserPhase::InRecord | ParserPhase::InColumnHeader => {
                self.text.push_str(text);
                Ok(())
            }
            ParserPhase::Idle | ParserPhase::InList => {
                if text.trim().is_empty() {
                    Ok(())
                } else {
                    Err(format!("unexpected character data '{}'", text.trim()))
                }
            }
        }
    }

    fn finish(self) -> std::result::Result<(DecodedResponse, usize), String> {
        match self.phase {
            ParserPhase::Idle if self.list_closed => Ok((self.decoder.finish(), self.records)),
            ParserPhase::Idle => Err(format!(
                "document has no <{}> element",
                self.decoder.list_element()
            )),
            phase => Err(format!("document ended while {phase:?}")),
        }
    }
}

/// Parses one response document with a given decoder.
pub struct ResponseParser {
    decoder: Box<dyn ResponseDecoder>,
}

impl ResponseParser {
    #[must_use]
    pub fn new(decoder: Box<dyn ResponseDecoder>) -> Self {
        Self { decoder }
    }

    /// Consume `input` to the end and return the decoded response.
    pub fn parse<R: Read>(self, input: R) -> Result<DecodedResponse> {
        let mut xml = Reader::from_reader(PositionTracker::new(input));
        xml.trim_text(true);

        let mut state = ParserState::new(self.decoder);
        let mut buf = Vec::new();
        loop {
            let step = match xml.read_event_into(&mut buf) {
                Err(err) => Err(err.to_string()),
                Ok(Event::Eof) => break,
                Ok(Event::Start(element)) => state.on_open(&element, false),
                Ok(Event::Empty(element)) => state.on_open(&element, true),
                Ok(Event::End(element)) => element_name(element.local_name().as_ref())
                    .and_then(|name| state.on_close(&name)),
                Ok(Event::Text(text)) => text
                    .unescape()
                    .map_err(|err| err.to_string())
                    .and_then(|text| state.on_text(&text)),
                Ok(Event::CData(data)) => std::str::from_utf8(&data.into_inner())
                    .map_err(|err| format!("CDATA is not UTF-8: {err}"))
                    .and_then(|text| state.on_text(text)),
                Ok(_) => Ok(()),
            };
            if let Err(detail) = step {
                return Err(position_error(&xml, detail));
            }
            buf.clear();
        }

        let (response, records) = state.finish().map_err(|detail| position_error(&xml, detail))?;
        debug!(
            records,
            bytes = xml.buffer_position(),
            "parsed telemetry response"
        );
        Ok(response)
    }
}

/// Parse a channel-list response.
pub fn parse_channel_list<R: Read>(input: R) -> Result<ChannelResponse> {
    let decoder = ChannelListDecoder::new(&DecoderOptions::now(EvrFilter::All));
    ResponseParser::new(Box::new(decoder))
        .parse(input)?
        .into_channels()
}

/// Parse an EVR-list response, keeping only EVRs `filter` accepts.
pub fn parse_evr_list<R: Read>(input: R, filter: &EvrFilter) -> Result<EvrResponse> {
    let decoder = EvrListDecoder::new(&DecoderOptions::now(filter.clone()));
    ResponseParser::new(Box::new(decoder)).parse(input)?.into_evrs()
}

fn element_name(raw: &[u8]) -> std::result::Result<String, String> {
    std::str::from_utf8(raw)
        .map(str::to_owned)
        .map_err(|err| format!("element name is not UTF-8: {err}"))
}

fn expect_close(found: &str, expected: &str) -> Step {
    if found == expected {
        Ok(())
    } else {
        Err(format!("expected </{expected}>, found </{found}>"))
    }
}

fn list_attributes(element: &BytesStart<'_>) -> std::result::Result<ListAttributes, String> {
    let mut attributes = ListAttributes::default();
    for attr in element.attributes() {
        let attr = attr.map_err(|err| format!("malformed attribute: {err}"))?;
        let value: Cow<'_, str> = attr
            .unescape_value()
            .map_err(|err| format!("malformed attribute value: {err}"))?;
        match attr.key.local_name().as_ref() {
            key if key == EVENT_TIME_ATTR.as_bytes() => {
                attributes.event_time = Some(value.into_owned());
            }
            key if key == PRIMARY_TIME_ATTR.as_bytes() => {
                attributes.primary_time = Some(value.into_owned());
            }
            key if key == SECONDARY_TIME_ATTR.as_bytes() => {
                attributes.secondary_time = Some(value.into_owned());
            }
            _ => {}
        }
    }
    Ok(attributes)
}

fn position_error<R>(xml: &Reader<PositionTracker<R>>, detail: String) -> GladError {
    let offset = xml.buffer_position() as u64;
    let (line, column) = xml.get_ref().line_col(offset);
    GladError::parse(line, column, detail)
}

/// Buffered reader that remembers where every consumed newline was, so a
/// byte offset reported by the XML reader can be turned into line/column.
struct PositionTracker<R> {
    inner: R,
    buf: Box<[u8]>,
    pos: usize,
    filled: usize,
    consumed: u64,
    newlines: Vec<u64>,
}

impl<R> PositionTracker<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            buf: vec![0; READ_BUFFER_BYTES].into_boxed_slice(),
            pos: 0,
            filled: 0,
            consumed: 0,
            newlines: Vec::new(),
        }
    }

    /// 1-based line and column of a byte offset.
    fn line_col(&self, offset: u64) -> (u64, u64) {
        let preceding = self.newlines.partition_point(|&newline| newline < offset);
        let line_start = match preceding {
            0 => 0,
            n => self.newlines[n - 1] + 1,
        };
        (preceding as u64 + 1, offset.saturating_sub(line_start) + 1)
    }
}

impl<R: Read> Read for PositionTracker<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(out.len());
        out[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl<R: Read> BufRead for PositionTracker<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.pos >= self.filled {
            self.pos = 0;
            self.filled = loop {
                match self.inner.read(&mut self.buf) {
                    Ok(n) => break n,
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                    Err(err) => return Err(err),
                }
            };
        }
        Ok(&self.buf[self.pos..self.filled])
    }

    fn consume(&mut self, amt: usize) {
        let amt = amt.min(self.filled - self.pos);
        let window = &self.buf[self.pos..self.pos + amt];
        let base = self.consumed;
        self.newlines
            .extend(memchr_iter(b'\n', window).map(|index| base + index as u64));
        self.consumed += amt as u64;
        self.pos += amt;
    }
}
