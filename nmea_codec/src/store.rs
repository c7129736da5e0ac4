use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use tracing::debug;

use crate::definition::{
    Definition, DefinitionDocument, DefinitionKey, DefinitionSource, FieldKind, FieldSource,
    FieldSpec, LookupTable, PacketType,
};
use crate::error::DefinitionError;

type Resolution = Result<Arc<Definition>, DefinitionError>;

struct Entry {
    source: DefinitionSource,
    resolved: OnceLock<Resolution>,
}

/// Immutable set of structural definitions, resolved lazily on first use.
///
/// Every key resolves at most once; the outcome (definition or error) is
/// kept in a write-once cell so later lookups are lock-free. Share it across
/// decoders behind an `Arc`.
pub struct DefinitionStore {
    lookups: HashMap<String, Arc<LookupTable>>,
    entries: HashMap<DefinitionKey, Entry>,
}

impl DefinitionStore {
    pub fn from_document(document: DefinitionDocument) -> Self {
        let lookups = document
            .lookups
            .into_iter()
            .map(|(name, entries)| {
                let table = LookupTable::new(name.clone(), entries);
                (name, Arc::new(table))
            })
            .collect();

        let mut entries = HashMap::new();
        let mut add = |key: DefinitionKey, source: DefinitionSource| {
            entries.insert(
                key,
                Entry {
                    source,
                    resolved: OnceLock::new(),
                },
            );
        };
        for (formatter, source) in document.sentences {
            add(DefinitionKey::Sentence(formatter), source);
        }
        for (manufacturer, sentences) in document.proprietary {
            for (sentence, source) in sentences {
                add(
                    DefinitionKey::Proprietary {
                        manufacturer: manufacturer.clone(),
                        sentence,
                    },
                    source,
                );
            }
        }
        for (pgn, source) in document.pgns {
            add(DefinitionKey::Pgn(pgn), source);
        }
        for (name, source) in document.structures {
            add(DefinitionKey::Structure(name), source);
        }

        Self { lookups, entries }
    }

    pub fn from_json(json: &str) -> Result<Self, DefinitionError> {
        DefinitionDocument::from_json(json).map(Self::from_document)
    }

    /// The definition set compiled into the crate.
    pub fn builtin() -> Result<Self, DefinitionError> {
        Self::from_json(include_str!("definitions.json"))
    }

    pub fn resolve(&self, key: &DefinitionKey) -> Result<Arc<Definition>, DefinitionError> {
        self.resolve_with(key, &mut Vec::new())
    }

    pub fn sentence(&self, formatter: &str) -> Result<Arc<Definition>, DefinitionError> {
        self.resolve(&DefinitionKey::Sentence(formatter.to_string()))
    }

    pub fn proprietary(
        &self,
        manufacturer: &str,
        sentence: &str,
    ) -> Result<Arc<Definition>, DefinitionError> {
        self.resolve(&DefinitionKey::Proprietary {
            manufacturer: manufacturer.to_string(),
            sentence: sentence.to_string(),
        })
    }

    pub fn pgn(&self, pgn: u32) -> Result<Arc<Definition>, DefinitionError> {
        self.resolve(&DefinitionKey::Pgn(pgn))
    }

    pub fn contains(&self, key: &DefinitionKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<LookupTable>> {
        self.lookups.get(name).cloned()
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<DefinitionKey> {
        let mut keys: Vec<_> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Human readable description of a sentence formatter, PGN or structure.
    pub fn describe(&self, key: &DefinitionKey) -> Result<String, DefinitionError> {
        self.resolve(key).map(|definition| definition.description.clone())
    }

    /// Resolves every entry, returning the number of definitions or the first
    /// failure in key order.
    pub fn validate(&self) -> Result<usize, DefinitionError> {
        let keys = self.keys();
        for key in &keys {
            self.resolve(key)?;
        }
        Ok(keys.len())
    }

    fn resolve_with(
        &self,
        key: &DefinitionKey,
        chain: &mut Vec<DefinitionKey>,
    ) -> Result<Arc<Definition>, DefinitionError> {
        let entry = self
            .entries
            .get(key)
            .ok_or_else(|| DefinitionError::NotFound(key.to_string()))?;

        if let Some(done) = entry.resolved.get() {
            return done.clone();
        }

        if chain.contains(key) {
            let mut path: Vec<String> = chain.iter().map(ToString::to_string).collect();
            path.push(key.to_string());
            return Err(DefinitionError::CyclicReference {
                key: key.to_string(),
                chain: path,
            });
        }

        // Build outside the cell so nested resolutions never re-enter it.
        chain.push(key.clone());
        let built = self.build(key, &entry.source, chain);
        chain.pop();

        entry.resolved.get_or_init(|| built).clone()
    }

    fn build(
        &self,
        key: &DefinitionKey,
        source: &DefinitionSource,
        chain: &mut Vec<DefinitionKey>,
    ) -> Resolution {
        let base = match &source.extends {
            Some(reference) => {
                let base_key: DefinitionKey = reference.parse()?;
                Some(self.resolve_with(&base_key, chain)?)
            }
            None => None,
        };

        let mut fields: Vec<FieldSpec> = base
            .as_ref()
            .map(|b| b.fields.clone())
            .unwrap_or_default();
        for field in &source.fields {
            let spec = self.field_spec(key, field, chain)?;
            match fields.iter_mut().find(|f| f.id == spec.id) {
                Some(slot) => *slot = spec,
                None => fields.push(spec),
            }
        }

        check_layout(key, &fields)?;

        let description = source
            .description
            .clone()
            .or_else(|| base.as_ref().map(|b| b.description.clone()))
            .unwrap_or_else(|| key.to_string());
        let packet = source
            .packet
            .or_else(|| base.as_ref().map(|b| b.packet))
            .unwrap_or(PacketType::Single);
        let length = source.length.or_else(|| base.as_ref().and_then(|b| b.length));

        debug!("Resolved {} with {} fields", key, fields.len());
        Ok(Arc::new(Definition::new(
            key.clone(),
            description,
            packet,
            length,
            fields,
        )))
    }

    fn field_spec(
        &self,
        key: &DefinitionKey,
        field: &FieldSource,
        chain: &mut Vec<DefinitionKey>,
    ) -> Result<FieldSpec, DefinitionError> {
        let invalid = |reason: &str| DefinitionError::InvalidField {
            key: key.to_string(),
            field: field.id.clone(),
            reason: reason.to_string(),
        };

        let lookup = match &field.lookup {
            Some(table) => Some(self.lookups.get(table).cloned().ok_or_else(|| {
                DefinitionError::UnknownLookup {
                    key: key.to_string(),
                    field: field.id.clone(),
                    table: table.clone(),
                }
            })?),
            None if field.kind == FieldKind::Lookup => {
                return Err(invalid("lookup field without a lookup table"));
            }
            None => None,
        };

        let reference = match &field.reference {
            Some(target) => {
                let target_key: DefinitionKey = target.parse()?;
                Some(self.resolve_with(&target_key, chain)?)
            }
            None if field.kind == FieldKind::Nested => {
                return Err(invalid("nested field without a reference"));
            }
            None => None,
        };

        if let Some(bits) = field.bits {
            if bits == 0 {
                return Err(invalid("zero bit width"));
            }
            let numeric = matches!(
                field.kind,
                FieldKind::Unsigned
                    | FieldKind::Signed
                    | FieldKind::Fixed
                    | FieldKind::Lookup
                    | FieldKind::Flag
                    | FieldKind::Coordinate
                    | FieldKind::Date
                    | FieldKind::Time
            );
            if numeric && bits > 64 {
                return Err(invalid("numeric fields are at most 64 bits wide"));
            }
        }
        if field.repeat && field.count_field.is_some() {
            return Err(invalid("repeat and count_field are mutually exclusive"));
        }
        if (field.repeat || field.count_field.is_some()) && field.kind != FieldKind::Nested {
            return Err(invalid("only nested fields can repeat"));
        }

        Ok(FieldSpec {
            id: field.id.clone(),
            name: field.name.clone(),
            kind: field.kind,
            bits: field.bits,
            offset: field.offset,
            signed: field.signed || field.kind == FieldKind::Signed,
            resolution: field.resolution,
            unit: field.unit.clone(),
            lookup,
            reference,
            not_available: field.not_available,
            count_field: field.count_field.clone(),
            repeat: field.repeat,
        })
    }
}

fn check_layout(key: &DefinitionKey, fields: &[FieldSpec]) -> Result<(), DefinitionError> {
    let last = fields.len().saturating_sub(1);
    for (index, field) in fields.iter().enumerate() {
        if field.consumes_rest() && index != last {
            return Err(DefinitionError::RemainderNotLast {
                key: key.to_string(),
                field: field.id.clone(),
            });
        }
        if let Some(count_field) = &field.count_field
            && !fields[..index].iter().any(|f| &f.id == count_field)
        {
            return Err(DefinitionError::InvalidField {
                key: key.to_string(),
                field: field.id.clone(),
                reason: format!("count field `{}` must precede it", count_field),
            });
        }
    }
    Ok(())
}
