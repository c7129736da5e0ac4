use std::fmt;

use thiserror::Error;

use crate::fast_packet::SessionKey;

/// Coarse classification of a [`DefinitionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefinitionErrorKind {
    NotFound,
    CyclicReference,
    RemainderNotLast,
    UnknownLookup,
    InvalidField,
    InvalidKey,
    Document,
}

/// Failure while looking up or resolving a structural definition.
///
/// Everything except `NotFound` points at a broken definition document and is
/// reported by [`crate::DefinitionStore::validate`] at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("no definition for {0}")]
    NotFound(String),

    #[error("cyclic reference while resolving {key}: {}", .chain.join(" -> "))]
    CyclicReference { key: String, chain: Vec<String> },

    #[error("{key}: remainder field `{field}` must be the last field")]
    RemainderNotLast { key: String, field: String },

    #[error("{key}: field `{field}` uses unknown lookup table `{table}`")]
    UnknownLookup {
        key: String,
        field: String,
        table: String,
    },

    #[error("{key}: field `{field}`: {reason}")]
    InvalidField {
        key: String,
        field: String,
        reason: String,
    },

    #[error("invalid definition key `{0}`")]
    InvalidKey(String),

    #[error("malformed definition document: {0}")]
    Document(String),
}

impl DefinitionError {
    pub fn kind(&self) -> DefinitionErrorKind {
        match self {
            Self::NotFound(_) => DefinitionErrorKind::NotFound,
            Self::CyclicReference { .. } => DefinitionErrorKind::CyclicReference,
            Self::RemainderNotLast { .. } => DefinitionErrorKind::RemainderNotLast,
            Self::UnknownLookup { .. } => DefinitionErrorKind::UnknownLookup,
            Self::InvalidField { .. } => DefinitionErrorKind::InvalidField,
            Self::InvalidKey(_) => DefinitionErrorKind::InvalidKey,
            Self::Document(_) => DefinitionErrorKind::Document,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecodeErrorKind {
    /// The cursor would read past the end of the buffer.
    TruncatedBuffer,
    /// A token did not parse, or a nested decode failed.
    InvalidField,
}

impl fmt::Display for DecodeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TruncatedBuffer => write!(f, "truncated buffer"),
            Self::InvalidField => write!(f, "invalid field"),
        }
    }
}

/// Field-level extraction failure. `field` is the dotted path from the
/// top-level definition down to the failing field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} at `{field}`: {detail}")]
pub struct DecodeError {
    pub kind: DecodeErrorKind,
    pub field: String,
    pub detail: String,
}

impl DecodeError {
    pub fn truncated(field: &str, detail: impl Into<String>) -> Self {
        Self {
            kind: DecodeErrorKind::TruncatedBuffer,
            field: field.to_string(),
            detail: detail.into(),
        }
    }

    pub fn invalid(field: &str, detail: impl Into<String>) -> Self {
        Self {
            kind: DecodeErrorKind::InvalidField,
            field: field.to_string(),
            detail: detail.into(),
        }
    }

    /// Wrap a failure from a nested decode under the enclosing field.
    pub(crate) fn nested(parent: &str, inner: DecodeError) -> Self {
        Self {
            kind: DecodeErrorKind::InvalidField,
            field: format!("{}.{}", parent, inner.field),
            detail: inner.detail,
        }
    }
}

/// Why a reassembly session was thrown away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscardCause {
    /// The caller asked for it (e.g. the link dropped).
    Explicit,
    /// A new start frame arrived for the same key.
    Restarted,
    /// The session outlived the caller's staleness window.
    Stale,
}

impl fmt::Display for DiscardCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Explicit => write!(f, "explicit"),
            Self::Restarted => write!(f, "restarted"),
            Self::Stale => write!(f, "stale"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MultiPacketError {
    #[error("empty fast packet frame for pgn {pgn} from {source_address}")]
    EmptyFrame { pgn: u32, source_address: u8 },

    #[error("{key}: invalid fast packet length {length}")]
    InvalidLength { key: SessionKey, length: usize },

    #[error("{key}: continuation frame {index} without a start frame")]
    Orphan { key: SessionKey, index: u8 },

    #[error("{key}: frame {index} conflicts with the buffered copy")]
    Conflict { key: SessionKey, index: u8 },

    #[error("{key}: frame {index} beyond expected frame count {expected_frames}")]
    OutOfRange {
        key: SessionKey,
        index: u8,
        expected_frames: usize,
    },

    #[error("{key}: still assembling ({received}/{expected_frames} frames)")]
    InProcess {
        key: SessionKey,
        received: usize,
        expected_frames: usize,
    },

    #[error("{key}: session discarded ({cause})")]
    Discarded { key: SessionKey, cause: DiscardCause },
}

impl MultiPacketError {
    /// True for the "still assembling" signal, which callers usually suppress.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::InProcess { .. })
    }

    pub fn is_discarded(&self) -> bool {
        matches!(self, Self::Discarded { .. })
    }
}

/// Every failure the decoding core can surface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("parse error: {message}: {input:?}")]
    Parse { message: String, input: String },

    #[error("checksum mismatch: trailer {expected:02X}, computed {computed:02X}")]
    Checksum { expected: u8, computed: u8 },

    #[error("unsupported sentence type {0}")]
    SentenceType(String),

    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("invalid pgn {pgn}: {reason}")]
    Pgn { pgn: u32, reason: String },

    #[error(transparent)]
    MultiPacket(#[from] MultiPacketError),
}

impl Error {
    pub fn parse(message: impl Into<String>, input: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
            input: input.into(),
        }
    }

    /// Stable short name of the error kind, used for metrics and filtering.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "parse",
            Self::Checksum { .. } => "checksum",
            Self::SentenceType(_) => "sentence_type",
            Self::Definition(_) => "definition",
            Self::Decode(_) => "decode",
            Self::Pgn { .. } => "pgn",
            Self::MultiPacket(e) if e.is_pending() => "multi_packet_in_process",
            Self::MultiPacket(e) if e.is_discarded() => "multi_packet_discarded",
            Self::MultiPacket(_) => "multi_packet",
        }
    }
}
