//! Structural definitions: the serde-facing source form loaded from JSON and
//! the resolved form the decode engine walks.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::DefinitionError;

/// The closed set of field kinds understood by the decode engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Unsigned,
    Signed,
    /// Integer scaled by `resolution`, always decoded as a float.
    Fixed,
    Lookup,
    Flag,
    /// Fixed-length string (binary) or raw token (text).
    Text,
    /// Everything from the cursor to the end of the buffer.
    Remainder,
    Nested,
    Time,
    Date,
    /// `(d)ddmm.mmmm` on the text protocol, scaled integer degrees on the bus.
    Coordinate,
    Reserved,
}

/// Binary packet type of a PGN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketType {
    #[default]
    Single,
    Fast,
}

/// Identifies one entry of the definition store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DefinitionKey {
    Sentence(String),
    Proprietary {
        manufacturer: String,
        sentence: String,
    },
    Pgn(u32),
    Structure(String),
}

impl fmt::Display for DefinitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sentence(formatter) => write!(f, "sentence/{}", formatter),
            Self::Proprietary {
                manufacturer,
                sentence,
            } => write!(f, "proprietary/{}/{}", manufacturer, sentence),
            Self::Pgn(pgn) => write!(f, "pgn/{}", pgn),
            Self::Structure(name) => write!(f, "struct/{}", name),
        }
    }
}

impl FromStr for DefinitionKey {
    type Err = DefinitionError;

    /// Parses the reference syntax used inside definition documents:
    /// `sentence/GGA`, `proprietary/ASH/R`, `pgn/127488`, `struct/name`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DefinitionError::InvalidKey(s.to_string());
        let (axis, rest) = s.split_once('/').ok_or_else(invalid)?;
        if rest.is_empty() {
            return Err(invalid());
        }
        match axis {
            "sentence" => Ok(Self::Sentence(rest.to_string())),
            "struct" => Ok(Self::Structure(rest.to_string())),
            "pgn" => rest.parse().map(Self::Pgn).map_err(|_| invalid()),
            "proprietary" => {
                let (manufacturer, sentence) = rest.split_once('/').ok_or_else(invalid)?;
                if manufacturer.is_empty() || sentence.is_empty() {
                    return Err(invalid());
                }
                Ok(Self::Proprietary {
                    manufacturer: manufacturer.to_string(),
                    sentence: sentence.to_string(),
                })
            }
            _ => Err(invalid()),
        }
    }
}

/// A field as written in the definition document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldSource {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub kind: FieldKind,
    /// Width in bits on the binary protocol.
    #[serde(default)]
    pub bits: Option<u32>,
    /// Explicit start: bit offset (binary) or token index (text).
    #[serde(default)]
    pub offset: Option<u32>,
    #[serde(default)]
    pub signed: bool,
    #[serde(default)]
    pub resolution: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub lookup: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    /// Raw code meaning "not available"; such fields are left out of the record.
    #[serde(default)]
    pub not_available: Option<u64>,
    #[serde(default)]
    pub count_field: Option<String>,
    #[serde(default)]
    pub repeat: bool,
}

/// A definition as written in the definition document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefinitionSource {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub packet: Option<PacketType>,
    #[serde(default)]
    pub length: Option<usize>,
    /// Key of a base definition whose fields come first.
    #[serde(default)]
    pub extends: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldSource>,
}

/// Top-level layout of a definition document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefinitionDocument {
    #[serde(default)]
    pub lookups: HashMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    pub sentences: HashMap<String, DefinitionSource>,
    /// manufacturer code -> sentence id -> definition
    #[serde(default)]
    pub proprietary: HashMap<String, HashMap<String, DefinitionSource>>,
    #[serde(default)]
    pub pgns: BTreeMap<u32, DefinitionSource>,
    #[serde(default)]
    pub structures: HashMap<String, DefinitionSource>,
}

impl DefinitionDocument {
    pub fn from_json(json: &str) -> Result<Self, DefinitionError> {
        serde_json::from_str(json).map_err(|e| DefinitionError::Document(e.to_string()))
    }
}

/// Code -> label table backing enumerated fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupTable {
    pub name: String,
    entries: HashMap<String, String>,
}

impl LookupTable {
    pub fn new(name: impl Into<String>, entries: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            name: name.into(),
            entries: entries.into_iter().collect(),
        }
    }

    pub fn label(&self, code: &str) -> Option<&str> {
        self.entries.get(code).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A field with its references resolved.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub id: String,
    pub name: Option<String>,
    pub kind: FieldKind,
    pub bits: Option<u32>,
    pub offset: Option<u32>,
    pub signed: bool,
    pub resolution: Option<f64>,
    pub unit: Option<String>,
    pub lookup: Option<Arc<LookupTable>>,
    pub reference: Option<Arc<Definition>>,
    pub not_available: Option<u64>,
    pub count_field: Option<String>,
    pub repeat: bool,
}

impl FieldSpec {
    pub fn is_repeated(&self) -> bool {
        self.repeat || self.count_field.is_some()
    }

    /// True when the field swallows the rest of the buffer, so nothing may
    /// follow it.
    pub fn consumes_rest(&self) -> bool {
        match self.kind {
            FieldKind::Remainder => true,
            FieldKind::Nested => {
                self.repeat
                    || (self.bits.is_none()
                        && self
                            .reference
                            .as_ref()
                            .is_some_and(|r| r.bit_length().is_none() && r.token_count().is_none()))
            }
            _ => false,
        }
    }
}

/// A fully resolved, immutable structural definition.
#[derive(Debug, Clone)]
pub struct Definition {
    pub key: DefinitionKey,
    pub description: String,
    pub packet: PacketType,
    /// Declared payload length in bytes, if the definition states one.
    pub length: Option<usize>,
    pub fields: Vec<FieldSpec>,
    bit_length: Option<usize>,
    token_count: Option<usize>,
}

impl Definition {
    pub fn new(
        key: DefinitionKey,
        description: String,
        packet: PacketType,
        length: Option<usize>,
        fields: Vec<FieldSpec>,
    ) -> Self {
        let bit_length = static_extent(&fields, |f| match f.kind {
            FieldKind::Remainder => None,
            FieldKind::Nested if f.is_repeated() => None,
            FieldKind::Nested => f
                .bits
                .map(|b| b as usize)
                .or_else(|| f.reference.as_ref().and_then(|r| r.bit_length())),
            _ => f.bits.map(|b| b as usize),
        });
        let token_count = static_extent(&fields, |f| match f.kind {
            FieldKind::Remainder => None,
            FieldKind::Nested if f.is_repeated() => None,
            FieldKind::Nested => f.reference.as_ref().and_then(|r| r.token_count()),
            _ => Some(1),
        });
        Self {
            key,
            description,
            packet,
            length,
            fields,
            bit_length,
            token_count,
        }
    }

    pub fn field(&self, id: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.id == id)
    }

    pub fn field_ids(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.id.as_str())
    }

    /// Static size in bits, or `None` when the layout is open-ended or not
    /// fully sized.
    pub fn bit_length(&self) -> Option<usize> {
        self.bit_length
    }

    /// Number of text tokens one instance consumes, or `None` when open-ended.
    pub fn token_count(&self) -> Option<usize> {
        self.token_count
    }
}

fn static_extent(fields: &[FieldSpec], width: impl Fn(&FieldSpec) -> Option<usize>) -> Option<usize> {
    let mut cursor = 0;
    let mut end = 0;
    for field in fields {
        if let Some(offset) = field.offset {
            cursor = offset as usize;
        }
        cursor += width(field)?;
        end = end.max(cursor);
    }
    Some(end)
}
