//! Sentence handlers for NMEA 2000 traffic tunnelled through NMEA 0183
//! gateways.

mod mxpgn;
mod pcdin;

pub use mxpgn::MxpgnHandler;
pub use pcdin::PcdinHandler;

use crate::error::Error;
use crate::n2k::DecodedMessage;
use crate::record::{Record, Value};

fn hex_number(token: &str, what: &str) -> Result<u32, Error> {
    if token.is_empty() || token.len() > 8 {
        return Err(Error::parse(format!("{} must be 1 to 8 hex digits", what), token));
    }
    u32::from_str_radix(token, 16).map_err(|_| Error::parse(format!("{} is not hex", what), token))
}

fn hex_payload(token: &str) -> Result<Vec<u8>, Error> {
    hex::decode(token).map_err(|e| Error::parse(format!("payload: {}", e), token))
}

/// Flattens a decoded message into a sentence record: bus metadata first,
/// the decoded fields nested under `fields`.
fn message_record(message: DecodedMessage, timestamp: Option<u32>) -> Record {
    let mut record = Record::new();
    record.insert("pgn", Value::Unsigned(message.pgn as u64));
    record.insert("description", Value::Text(message.description));
    if let Some(priority) = message.priority {
        record.insert("priority", Value::Unsigned(priority as u64));
    }
    if let Some(source) = message.source {
        record.insert("source", Value::Unsigned(source as u64));
    }
    if let Some(timestamp) = timestamp {
        record.insert("timestamp", Value::Unsigned(timestamp as u64));
    }
    record.insert("fields", Value::Record(message.fields));
    record
}
