//! NMEA 0183 / NMEA 2000 decoding library
//!
//! This library turns raw marine telemetry into structured records:
//! - NMEA 0183 sentences: envelope parsing, checksum verification, address
//!   classification and field decoding
//! - NMEA 2000 frames: CAN header unpacking and fast packet reassembly
//! - A definition store that resolves sentence and PGN layouts from a JSON
//!   document, including nested structures and inheritance
//! - Gateway handlers for NMEA 2000 traffic carried inside 0183 sentences
//!   (`$MXPGN`, `$PCDIN`)
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use nmea_codec::{DefinitionStore, Nmea0183Decoder, Outcome};
//!
//! let store = Arc::new(DefinitionStore::builtin().unwrap());
//! let decoder = Nmea0183Decoder::new(store);
//!
//! let line = "$GNGGA,122203.19,5741.1549,N,01153.1748,E,4,37,0.5,4.03,M,35.78,M,,*72";
//! if let Ok(Outcome::Complete(sentence)) = decoder.decode(line) {
//!     println!("{}: {:?}", sentence.formatter, sentence.fields.get("latitude"));
//! }
//! ```

pub mod checksum;
pub mod definition;
pub mod engine;
pub mod error;
pub mod fast_packet;
pub mod handlers;
pub mod n2k;
pub mod nmea0183;
pub mod record;
pub mod store;

// Re-export commonly used types
pub use definition::{Definition, DefinitionDocument, DefinitionKey, FieldKind, PacketType};
pub use error::{DecodeError, DecodeErrorKind, DefinitionError, DefinitionErrorKind, DiscardCause, Error, MultiPacketError};
pub use fast_packet::{Reassembler, ReassemblyPolicy, SessionInfo, SessionKey, SessionTable};
pub use handlers::{MxpgnHandler, PcdinHandler};
pub use n2k::{CanFrame, DecodedMessage, FrameHeader, Nmea2000Decoder};
pub use nmea0183::{DecodedSentence, Nmea0183Decoder, SentenceHandler, decode_lines};
pub use record::{EnumCode, Outcome, Record, Value};
pub use store::DefinitionStore;

// Re-export external types for convenience
pub use nmea2000::Identifier;
pub use socketcan::ExtendedId;
