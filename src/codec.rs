use std::io::Cursor;
use std::str::FromStr;

use apache_avro::types::Value;
use apache_avro::{from_avro_datum, from_value, to_avro_datum, to_value, Schema};

use crate::error::DecodeError;
use crate::event::{InputEvent, OutputEvent, INPUT_EVENT_SCHEMA, OUTPUT_EVENT_SCHEMA};

/// How input datums become [`InputEvent`]s.
///
/// Picked once when the pipeline is assembled; the hot path branches on the
/// tag and never re-reads configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFormat {
    /// Decode to a generic Avro record and pull fields out by name.
    Generic,
    /// Deserialize the datum straight into the typed event struct.
    Typed,
}

impl FromStr for RecordFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "generic" => Ok(RecordFormat::Generic),
            "typed" => Ok(RecordFormat::Typed),
            other => Err(format!(
                "unknown record format '{other}', expected 'generic' or 'typed'"
            )),
        }
    }
}

// Registry framing: one magic byte, then the schema id, big-endian.
const MAGIC_BYTE: u8 = 0x00;
const FRAMING_LEN: usize = 5;

/// Stateless codec between topic payloads and event structs.
///
/// Decoding is pure: the same bytes always yield the same event or the
/// same error, so replays after a restart decode identically.
pub struct RecordCodec {
    format: RecordFormat,
    framing: bool,
    output_schema_id: u32,
    input_schema: Schema,
    output_schema: Schema,
}

impl RecordCodec {
    pub fn new(
        format: RecordFormat,
        framing: bool,
        output_schema_id: u32,
    ) -> Result<Self, DecodeError> {
        Ok(Self {
            format,
            framing,
            output_schema_id,
            input_schema: Schema::parse_str(INPUT_EVENT_SCHEMA)?,
            output_schema: Schema::parse_str(OUTPUT_EVENT_SCHEMA)?,
        })
    }

    pub fn format(&self) -> RecordFormat {
        self.format
    }

    /// Decode one input payload.
    pub fn decode(&self, payload: &[u8]) -> Result<InputEvent, DecodeError> {
        let datum = self.strip_framing(payload)?;
        let mut reader = Cursor::new(datum);
        let value = from_avro_datum(&self.input_schema, &mut reader, None)?;
        match self.format {
            RecordFormat::Generic => Self::event_from_record(value),
            RecordFormat::Typed => Ok(from_value::<InputEvent>(&value)?),
        }
    }

    /// Encode one output record, re-applying registry framing with the
    /// configured output schema id.
    pub fn encode(&self, event: &OutputEvent) -> Result<Vec<u8>, DecodeError> {
        let datum = to_avro_datum(&self.output_schema, to_value(event)?)?;
        if !self.framing {
            return Ok(datum);
        }
        let mut framed = Vec::with_capacity(FRAMING_LEN + datum.len());
        framed.push(MAGIC_BYTE);
        framed.extend_from_slice(&self.output_schema_id.to_be_bytes());
        framed.extend_from_slice(&datum);
        Ok(framed)
    }

    fn strip_framing<'a>(&self, payload: &'a [u8]) -> Result<&'a [u8], DecodeError> {
        if payload.is_empty() {
            return Err(DecodeError::EmptyPayload);
        }
        if !self.framing {
            return Ok(payload);
        }
        if payload.len() < FRAMING_LEN {
            return Err(DecodeError::Truncated {
                expected: FRAMING_LEN,
                got: payload.len(),
            });
        }
        if payload[0] != MAGIC_BYTE {
            return Err(DecodeError::BadMagic(payload[0]));
        }
        Ok(&payload[FRAMING_LEN..])
    }

    fn event_from_record(value: Value) -> Result<InputEvent, DecodeError> {
        let Value::Record(fields) = value else {
            return Err(DecodeError::FieldType("record"));
        };

        let mut id = None;
        let mut version = None;
        for (name, field) in fields {
            match (name.as_str(), field) {
                ("id", Value::String(s)) => id = Some(s),
                ("version", Value::Long(v)) => version = Some(v),
                ("id", _) => return Err(DecodeError::FieldType("id")),
                ("version", _) => return Err(DecodeError::FieldType("version")),
                _ => {}
            }
        }

        Ok(InputEvent {
            id: id.ok_or(DecodeError::MissingField("id"))?,
            version: version.ok_or(DecodeError::MissingField("version"))?,
        })
    }
}
