//! Row-level decoding: header columns, quoted channel rows, delimited EVR rows.

use memchr::memchr_iter;

use crate::types::{ChannelSample, ChannelType, EvrSample};

/// Reserved field delimiter inside an EVR record element.
pub const EVR_FIELD_DELIMITER: char = '|';

/// Number of fields in an EVR row.
pub const EVR_FIELD_COUNT: usize = 5;

/// Columns a channel-list header may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    ChannelId,
    Type,
    Sclk,
    Scet,
    Ert,
    Raw,
    Value,
    /// Present in the header but not mapped onto a sample field.
    Ignored,
}

impl Column {
    /// Case-insensitive header name lookup.
    #[must_use]
    pub fn from_header_name(name: &str) -> Self {
        let name = name.trim().trim_matches('"').trim().to_ascii_lowercase();
        match name.as_str() {
            "channel id" | "id" => Self::ChannelId,
            "type" => Self::Type,
            "sclk" => Self::Sclk,
            "scet" => Self::Scet,
            "ert" => Self::Ert,
            "raw" => Self::Raw,
            "value" => Self::Value,
            _ => Self::Ignored,
        }
    }
}

/// Positional column layout taken from the header element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMap {
    columns: Vec<Column>,
}

impl ColumnMap {
    /// Build from the comma-separated header text.
    pub fn from_header(text: &str) -> Result<Self, String> {
        let columns: Vec<Column> = text.trim().split(',').map(Column::from_header_name).collect();
        for required in [Column::ChannelId, Column::Type] {
            if !columns.contains(&required) {
                return Err(format!(
                    "column header '{}' has no {required:?} column",
                    text.trim()
                ));
            }
        }
        Ok(Self { columns })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Map one row of fields onto a sample.
    pub fn decode_row(
        &self,
        fields: Vec<String>,
        received_at_ns: u64,
        event_time: Option<&str>,
    ) -> Result<ChannelSample, String> {
        if fields.len() != self.columns.len() {
            return Err(format!(
                "row has {} fields but the header names {} columns",
                fields.len(),
                self.columns.len()
            ));
        }

        let mut channel_id = None;
        let mut type_name = None;
        let mut dn = String::new();
        let mut value = None;
        let mut sclk = String::new();
        let mut scet = String::new();
        let mut ert = String::new();
        for (column, field) in self.columns.iter().zip(fields) {
            match column {
                Column::ChannelId => channel_id = Some(field),
                Column::Type => type_name = Some(field),
                Column::Sclk => sclk = field,
                Column::Scet => scet = field,
                Column::Ert => ert = field,
                Column::Raw => dn = field,
                Column::Value => value = Some(field),
                Column::Ignored => {}
            }
        }

        let channel_id = channel_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| "row has an empty channel id".to_owned())?;
        let type_name = type_name.unwrap_or_default();
        let channel_type = ChannelType::from_name(&type_name)
            .ok_or_else(|| format!("channel {channel_id}: unknown type '{type_name}'"))?;

        let (eu, status) = if channel_type.has_engineering_units() {
            (value, None)
        } else {
            (None, value)
        };

        Ok(ChannelSample {
            channel_id,
            channel_type,
            dn,
            eu,
            status,
            sclk,
            scet,
            ert,
            received_at_ns,
            event_time: event_time.map(str::to_owned),
        })
    }
}

/// Split a channel data block into its non-blank rows.
pub fn data_rows(block: &str) -> impl Iterator<Item = &str> {
    let bytes = block.as_bytes();
    let mut start = 0;
    let mut breaks = memchr_iter(b'\n', bytes).chain(std::iter::once(bytes.len()));
    std::iter::from_fn(move || {
        let end = breaks.next()?;
        let row = &block[start..end];
        start = end + 1;
        Some(row)
    })
    .map(|row| row.trim_end_matches('\r').trim())
    .filter(|row| !row.is_empty())
}

/// Split a row of comma-separated, optionally quoted fields.
///
/// Quoted fields may contain commas; `""` inside quotes is a literal quote.
pub fn split_quoted_fields(row: &str) -> Result<Vec<String>, String> {
    let mut fields = Vec::new();
    let mut chars = row.chars().peekable();

    loop {
        while chars.next_if(|c| *c == ' ' || *c == '\t').is_some() {}

        let mut field = String::new();
        if chars.next_if_eq(&'"').is_some() {
            loop {
                match chars.next() {
                    Some('"') => {
                        if chars.next_if_eq(&'"').is_some() {
                            field.push('"');
                        } else {
                            break;
                        }
                    }
                    Some(c) => field.push(c),
                    None => return Err(format!("unterminated quoted field in row '{row}'")),
                }
            }
            while chars.next_if(|c| *c == ' ' || *c == '\t').is_some() {}
            match chars.next() {
                None => {
                    fields.push(field);
                    return Ok(fields);
                }
                Some(',') => fields.push(field),
                Some(other) => {
                    return Err(format!(
                        "unexpected '{other}' after closing quote in row '{row}'"
                    ));
                }
            }
        } else {
            loop {
                match chars.next() {
                    None => {
                        fields.push(field.trim().to_owned());
                        return Ok(fields);
                    }
                    Some(',') => {
                        fields.push(field.trim().to_owned());
                        break;
                    }
                    Some('"') => return Err(format!("stray quote in unquoted field of row '{row}'")),
                    Some(c) => field.push(c),
                }
            }
        }
    }
}

/// Decode one EVR record: `id|level|sclk|message|module`.
///
/// The message is everything between the third delimiter and the last one,
/// so it may itself contain the delimiter.
pub fn decode_evr_row(
    text: &str,
    received_at_ns: u64,
    event_time: Option<&str>,
) -> Result<EvrSample, String> {
    let text = text.trim();
    let mut head = text.splitn(4, EVR_FIELD_DELIMITER);
    let (Some(id), Some(level), Some(sclk), Some(rest)) =
        (head.next(), head.next(), head.next(), head.next())
    else {
        return Err(format!(
            "EVR record '{text}' has fewer than {EVR_FIELD_COUNT} fields"
        ));
    };
    let Some((message, module)) = rest.rsplit_once(EVR_FIELD_DELIMITER) else {
        return Err(format!(
            "EVR record '{text}' has fewer than {EVR_FIELD_COUNT} fields"
        ));
    };

    let event_id = id
        .trim()
        .parse::<u32>()
        .map_err(|err| format!("EVR event id '{}' is not an unsigned integer: {err}", id.trim()))?;

    Ok(EvrSample {
        event_id,
        level: level.trim().to_owned(),
        module: module.trim().to_owned(),
        message: message.trim().to_owned(),
        sclk: sclk.trim().to_owned(),
        received_at_ns,
        event_time: event_time.map(str::to_owned),
    })
}
