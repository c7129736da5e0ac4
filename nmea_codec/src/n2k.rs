use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use nmea2000::Identifier;
use serde::Serialize;
use socketcan::ExtendedId;

use crate::definition::PacketType;
use crate::engine;
use crate::error::Error;
use crate::fast_packet::{FRAME_LEN, FastPacketFrame, Reassembler, ReassemblyPolicy, SessionTable};
use crate::record::{Outcome, Record};
use crate::store::DefinitionStore;

/// Highest PGN representable in the 18-bit PGN field.
pub const MAX_PGN: u32 = 0x3FFFF;

/// Rejects PGNs that cannot appear on the bus: wider than 18 bits, or PDU1
/// format (PF < 240) with a non-zero destination byte.
pub fn validate_pgn(pgn: u32) -> Result<(), Error> {
    if pgn > MAX_PGN {
        return Err(Error::Pgn {
            pgn,
            reason: "exceeds 18 bits".to_string(),
        });
    }
    let pdu_format = (pgn >> 8) & 0xFF;
    if pdu_format < 240 && pgn & 0xFF != 0 {
        return Err(Error::Pgn {
            pgn,
            reason: "PDU1 format with a non-zero destination byte".to_string(),
        });
    }
    Ok(())
}

/// Fields packed into a 29-bit NMEA 2000 CAN identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameHeader {
    pub priority: u8,
    pub pgn: u32,
    pub source: u8,
    /// Destination address of PDU1 (addressed) PGNs.
    pub destination: Option<u8>,
}

impl FrameHeader {
    pub fn from_can_id(id: ExtendedId) -> Self {
        let identifier = Identifier::from_can_id(id);
        let raw = id.as_raw();
        let pgn = identifier.pgn();
        let (pgn, destination) = if (pgn >> 8) & 0xFF < 240 {
            (pgn & !0xFF, Some(((raw >> 8) & 0xFF) as u8))
        } else {
            (pgn, None)
        };
        Self {
            priority: identifier.priority(),
            pgn,
            source: identifier.source(),
            destination,
        }
    }
}

/// One raw CAN frame: extended identifier plus up to 8 data bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanFrame {
    pub id: ExtendedId,
    pub data: Vec<u8>,
}

impl CanFrame {
    pub fn new(raw_id: u32, data: &[u8]) -> Result<Self, Error> {
        let id = ExtendedId::new(raw_id)
            .ok_or_else(|| Error::parse("CAN identifier exceeds 29 bits", format!("{:X}", raw_id)))?;
        if data.len() > FRAME_LEN {
            return Err(Error::parse(
                "CAN frame carries more than 8 bytes",
                hex::encode_upper(data),
            ));
        }
        Ok(Self {
            id,
            data: data.to_vec(),
        })
    }

    /// Parses the text form `09F201C9 41823C050000C0C8`: the identifier in
    /// hex, then the data bytes in hex, optionally split by whitespace.
    pub fn parse_hex(line: &str) -> Result<Self, Error> {
        let mut tokens = line.split_whitespace();
        let id = tokens
            .next()
            .ok_or_else(|| Error::parse("empty CAN frame", line))?;
        if id.len() > 8 {
            return Err(Error::parse("CAN identifier too long", line));
        }
        let raw_id =
            u32::from_str_radix(id, 16).map_err(|_| Error::parse("CAN identifier is not hex", line))?;
        let payload: String = tokens.collect();
        let data = hex::decode(&payload).map_err(|e| Error::parse(format!("CAN data: {}", e), line))?;
        Self::new(raw_id, &data)
    }

    pub fn header(&self) -> FrameHeader {
        FrameHeader::from_can_id(self.id)
    }
}

impl fmt::Display for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X} {}", self.id.as_raw(), hex::encode_upper(&self.data))
    }
}

/// A decoded NMEA 2000 message. Priority and source are known only when the
/// message came from a frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedMessage {
    pub pgn: u32,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<u8>,
    pub fields: Record,
}

/// Decodes a complete payload for `pgn`.
pub fn decode_payload(store: &DefinitionStore, pgn: u32, payload: &[u8]) -> Result<DecodedMessage, Error> {
    validate_pgn(pgn)?;
    let definition = store.pgn(pgn)?;
    let fields = engine::decode(&definition, payload)?;
    Ok(DecodedMessage {
        pgn,
        description: definition.description.clone(),
        priority: None,
        source: None,
        fields,
    })
}

/// Frame-level decoder: routes fast packet PGNs through reassembly and
/// decodes single frame PGNs directly.
pub struct Nmea2000Decoder {
    store: Arc<DefinitionStore>,
    reassembler: Reassembler,
}

impl Nmea2000Decoder {
    pub fn new(store: Arc<DefinitionStore>, table: Arc<SessionTable>) -> Self {
        Self {
            store,
            reassembler: Reassembler::new(table),
        }
    }

    pub fn with_policy(mut self, policy: ReassemblyPolicy) -> Self {
        self.reassembler = self.reassembler.with_policy(policy);
        self
    }

    pub fn reassembler(&self) -> &Reassembler {
        &self.reassembler
    }

    pub fn store(&self) -> &Arc<DefinitionStore> {
        &self.store
    }

    /// Decodes a complete payload.
    pub fn decode(&self, pgn: u32, payload: &[u8]) -> Result<DecodedMessage, Error> {
        decode_payload(&self.store, pgn, payload)
    }

    pub fn decode_frame(&self, frame: &CanFrame, now: Instant) -> Result<Outcome<DecodedMessage>, Error> {
        self.decode_parts(frame.header(), &frame.data, now)
    }

    /// Decodes one frame given its unpacked header.
    pub fn decode_parts(
        &self,
        header: FrameHeader,
        data: &[u8],
        now: Instant,
    ) -> Result<Outcome<DecodedMessage>, Error> {
        validate_pgn(header.pgn)?;
        let definition = self.store.pgn(header.pgn)?;

        let assembled;
        let payload = match definition.packet {
            PacketType::Single => data,
            PacketType::Fast => {
                let frame = FastPacketFrame {
                    source: header.source,
                    pgn: header.pgn,
                    data,
                };
                match self.reassembler.push(&frame, now)? {
                    Outcome::Complete(bytes) => {
                        assembled = bytes;
                        assembled.as_slice()
                    }
                    Outcome::Pending => return Ok(Outcome::Pending),
                }
            }
        };

        let fields = engine::decode(&definition, payload)?;
        Ok(Outcome::Complete(DecodedMessage {
            pgn: header.pgn,
            description: definition.description.clone(),
            priority: Some(header.priority),
            source: Some(header.source),
            fields,
        }))
    }
}
