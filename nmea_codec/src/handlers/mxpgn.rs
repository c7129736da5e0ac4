use std::sync::Arc;
use std::time::Instant;

use tracing::warn;

use super::{hex_number, hex_payload, message_record};
use crate::error::Error;
use crate::fast_packet::{FRAME_LEN, Reassembler, ReassemblyPolicy, SessionTable};
use crate::n2k::{FrameHeader, Nmea2000Decoder};
use crate::nmea0183::SentenceHandler;
use crate::record::{Outcome, Record};
use crate::store::DefinitionStore;

/// `$--PGN,<pgn>,<attributes>,<data>`: one CAN frame per sentence.
///
/// The attribute word packs the priority (bits 14..12), the data length
/// (bits 11..8) and the source address (bits 7..0). Fast packet PGNs are
/// reassembled in the handler's own session table, so a sentence can come
/// back as `Outcome::Pending`.
pub struct MxpgnHandler {
    decoder: Nmea2000Decoder,
    reverse_bytes: bool,
}

impl MxpgnHandler {
    pub fn new(store: Arc<DefinitionStore>, table: Arc<SessionTable>) -> Self {
        Self {
            decoder: Nmea2000Decoder::new(store, table),
            reverse_bytes: false,
        }
    }

    /// Some gateways emit the data bytes last-to-first.
    pub fn with_reversed_bytes(mut self, reverse: bool) -> Self {
        self.reverse_bytes = reverse;
        self
    }

    pub fn with_policy(mut self, policy: ReassemblyPolicy) -> Self {
        self.decoder = self.decoder.with_policy(policy);
        self
    }

    pub fn reassembler(&self) -> &Reassembler {
        self.decoder.reassembler()
    }
}

impl SentenceHandler for MxpgnHandler {
    fn decode(&self, _sentence: &str, fields: &[&str]) -> Result<Outcome<Record>, Error> {
        let &[pgn, attributes, data] = fields else {
            return Err(Error::parse(
                "expected pgn, attribute and data fields",
                fields.join(","),
            ));
        };
        let pgn = hex_number(pgn, "pgn")?;
        let attributes = hex_number(attributes, "attribute word")?;
        if attributes > 0xFFFF {
            return Err(Error::parse("attribute word exceeds 16 bits", fields.join(",")));
        }
        let mut data = hex_payload(data)?;
        if data.len() > FRAME_LEN {
            return Err(Error::parse(
                format!("more than {} data bytes", FRAME_LEN),
                fields.join(","),
            ));
        }
        if self.reverse_bytes {
            data.reverse();
        }

        let length = ((attributes >> 8) & 0x0F) as usize;
        if length != data.len() {
            warn!("MXPGN length {} does not match {} data bytes", length, data.len());
        }

        let header = FrameHeader {
            priority: ((attributes >> 12) & 0x07) as u8,
            pgn,
            source: (attributes & 0xFF) as u8,
            destination: None,
        };
        let decoded = self.decoder.decode_parts(header, &data, Instant::now())?;
        Ok(decoded.map(|message| message_record(message, None)))
    }
}
