use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::checksum;
use crate::engine;
use crate::error::{DefinitionError, Error};
use crate::record::{Outcome, Record};
use crate::store::DefinitionStore;

/// Address field of a sentence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// `TTFFF`
    Standard { talker: String, formatter: String },
    /// `TTLLQ,FFF`
    Query {
        talker: String,
        listener: String,
        formatter: String,
    },
    /// `PMMM...`; the sentence id is the rest of the address or, when that is
    /// empty, the first data field.
    Proprietary {
        manufacturer: String,
        sentence: String,
    },
}

/// A sentence split into its parts, with the checksum already verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope<'a> {
    pub delimiter: char,
    pub address: Address,
    pub fields: Vec<&'a str>,
    pub checksum: Option<u8>,
}

impl<'a> Envelope<'a> {
    pub fn parse(line: &'a str) -> Result<Self, Error> {
        let (delimiter, body, trailer) = checksum::split(line)?;
        if let Some(expected) = trailer {
            let computed = checksum::calculate(body);
            if computed != expected {
                return Err(Error::Checksum { expected, computed });
            }
        }

        let mut parts = body.split(',');
        let address = parts.next().unwrap_or_default();
        let mut fields: Vec<&'a str> = parts.collect();

        if address.is_empty() || !address.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(Error::parse("malformed address field", line));
        }
        let address = address.to_ascii_uppercase();

        let address = if address.starts_with('P') && address.len() >= 4 {
            let manufacturer = address[1..4].to_string();
            let mut sentence = address[4..].to_string();
            if sentence.is_empty() {
                if fields.is_empty() || fields[0].is_empty() {
                    return Err(Error::parse("proprietary sentence without an identifier", line));
                }
                sentence = fields.remove(0).to_string();
            }
            Address::Proprietary {
                manufacturer,
                sentence,
            }
        } else if address.len() == 5 && address.ends_with('Q') && fields.len() == 1 && fields[0].len() == 3 {
            Address::Query {
                talker: address[0..2].to_string(),
                listener: address[2..4].to_string(),
                formatter: fields[0].to_string(),
            }
        } else if address.len() == 5 {
            Address::Standard {
                talker: address[0..2].to_string(),
                formatter: address[2..5].to_string(),
            }
        } else {
            return Err(Error::parse("address field must be talker + formatter", line));
        };

        Ok(Self {
            delimiter,
            address,
            fields,
            checksum: trailer,
        })
    }
}

/// Custom decoder for one sentence formatter or one manufacturer, consulted
/// before the definition store.
pub trait SentenceHandler: Send + Sync {
    /// `sentence` is the formatter for standard sentences and the sentence id
    /// for proprietary ones; `fields` are the remaining data fields.
    fn decode(&self, sentence: &str, fields: &[&str]) -> Result<Outcome<Record>, Error>;
}

/// A decoded sentence. For proprietary sentences `talker` holds the
/// manufacturer code and `formatter` the sentence id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedSentence {
    pub talker: String,
    pub formatter: String,
    pub proprietary: bool,
    pub fields: Record,
}

pub struct Nmea0183Decoder {
    store: Arc<DefinitionStore>,
    formatters: HashMap<String, Box<dyn SentenceHandler>>,
    manufacturers: HashMap<String, Box<dyn SentenceHandler>>,
}

impl Nmea0183Decoder {
    pub fn new(store: Arc<DefinitionStore>) -> Self {
        Self {
            store,
            formatters: HashMap::new(),
            manufacturers: HashMap::new(),
        }
    }

    /// Registers a handler for a standard formatter such as `PGN`.
    pub fn with_formatter(mut self, formatter: &str, handler: impl SentenceHandler + 'static) -> Self {
        self.formatters.insert(formatter.to_string(), Box::new(handler));
        self
    }

    /// Registers a handler for all proprietary sentences of a manufacturer.
    pub fn with_manufacturer(mut self, manufacturer: &str, handler: impl SentenceHandler + 'static) -> Self {
        self.manufacturers.insert(manufacturer.to_string(), Box::new(handler));
        self
    }

    pub fn store(&self) -> &Arc<DefinitionStore> {
        &self.store
    }

    /// Decodes one line. Handlers that reassemble multi-frame payloads return
    /// `Outcome::Pending` until the message is complete.
    pub fn decode(&self, line: &str) -> Result<Outcome<DecodedSentence>, Error> {
        let envelope = Envelope::parse(line)?;
        let fields = envelope.fields.as_slice();

        match envelope.address {
            Address::Query {
                talker,
                listener,
                formatter,
            } => Err(Error::SentenceType(format!("query {}{}Q,{}", talker, listener, formatter))),
            Address::Standard { talker, formatter } => {
                let decoded = match self.formatters.get(&formatter) {
                    Some(handler) => {
                        debug!("Dispatching {}{} to custom handler", talker, formatter);
                        handler.decode(&formatter, fields)?
                    }
                    None => {
                        let definition = self.store.sentence(&formatter).map_err(|e| match e {
                            DefinitionError::NotFound(_) => Error::SentenceType(formatter.clone()),
                            other => Error::Definition(other),
                        })?;
                        Outcome::Complete(engine::decode_tokens(&definition, fields)?)
                    }
                };
                Ok(decoded.map(|record| DecodedSentence {
                    talker,
                    formatter,
                    proprietary: false,
                    fields: record,
                }))
            }
            Address::Proprietary {
                manufacturer,
                sentence,
            } => {
                let decoded = match self.manufacturers.get(&manufacturer) {
                    Some(handler) => {
                        debug!("Dispatching P{}{} to custom handler", manufacturer, sentence);
                        handler.decode(&sentence, fields)?
                    }
                    None => {
                        let definition = self
                            .store
                            .proprietary(&manufacturer, &sentence)
                            .map_err(|e| match e {
                                DefinitionError::NotFound(_) => {
                                    Error::SentenceType(format!("P{}{}", manufacturer, sentence))
                                }
                                other => Error::Definition(other),
                            })?;
                        Outcome::Complete(engine::decode_tokens(&definition, fields)?)
                    }
                };
                Ok(decoded.map(|record| DecodedSentence {
                    talker: manufacturer,
                    formatter: sentence,
                    proprietary: true,
                    fields: record,
                }))
            }
        }
    }
}

/// Decodes a sequence of lines, yielding complete sentences.
///
/// Multi-packet signals (pending, discarded, orphan frames) are always
/// swallowed; with `quiet` every other failure is logged and skipped too.
pub fn decode_lines<'a, I>(
    decoder: &'a Nmea0183Decoder,
    lines: I,
    quiet: bool,
) -> impl Iterator<Item = Result<DecodedSentence, Error>> + 'a
where
    I: IntoIterator,
    I::Item: AsRef<str>,
    I::IntoIter: 'a,
{
    lines
        .into_iter()
        .filter_map(move |line| match decoder.decode(line.as_ref()) {
            Ok(Outcome::Complete(sentence)) => Some(Ok(sentence)),
            Ok(Outcome::Pending) | Err(Error::MultiPacket(_)) => None,
            Err(e) if quiet => {
                debug!("Skipped line: {}", e);
                None
            }
            Err(e) => Some(Err(e)),
        })
}
