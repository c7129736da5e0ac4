//! Definition-driven field decoding.
//!
//! Binary payloads are read with a bit cursor in the bus's little-endian bit
//! order: bit `n` of the buffer is bit `n % 8` of byte `n / 8`, and a field's
//! least significant bit comes first. Text sentences are read with a token
//! cursor over the comma-separated data fields.

use chrono::{Days, NaiveDate, NaiveTime};

use crate::definition::{Definition, FieldKind, FieldSpec};
use crate::error::DecodeError;
use crate::record::{EnumCode, Record, Value};

/// Decodes a binary payload against `definition`.
pub fn decode(definition: &Definition, data: &[u8]) -> Result<Record, DecodeError> {
    let (record, _) = decode_window(definition, data, 0, data.len() * 8)?;
    Ok(record)
}

/// Decodes the data fields of a text sentence (address and checksum already
/// removed) against `definition`.
pub fn decode_tokens(definition: &Definition, tokens: &[&str]) -> Result<Record, DecodeError> {
    let mut record = Record::new();
    let mut cursor = 0usize;

    for field in &definition.fields {
        let pos = field.offset.map_or(cursor, |o| o as usize);
        match field.kind {
            FieldKind::Nested => {
                cursor = decode_nested_tokens(field, tokens, pos, &mut record)?;
            }
            FieldKind::Remainder => {
                if pos < tokens.len() {
                    record.insert(field.id.clone(), Value::Text(tokens[pos..].join(",")));
                }
                cursor = tokens.len().max(pos);
            }
            FieldKind::Reserved => cursor = pos + 1,
            _ => {
                cursor = pos + 1;
                // Older revisions send fewer fields; empty means "not available".
                let Some(token) = tokens.get(pos).map(|t| t.trim()) else {
                    continue;
                };
                if token.is_empty() {
                    continue;
                }
                if let Some(value) = token_value(field, token)? {
                    record.insert(field.id.clone(), value);
                }
            }
        }
    }

    Ok(record)
}

/// Reads `width` bits starting at bit `start`. The caller guarantees the span
/// lies inside `data` and `width <= 64`.
pub fn extract_bits(data: &[u8], start: usize, width: usize) -> u64 {
    let mut value = 0u64;
    let mut written = 0usize;
    let mut bit = start;
    while written < width {
        let byte = data[bit / 8] as u64;
        let shift = bit % 8;
        let take = (8 - shift).min(width - written);
        let mask = (1u64 << take) - 1;
        value |= ((byte >> shift) & mask) << written;
        written += take;
        bit += take;
    }
    value
}

/// Interprets the low `width` bits of `raw` as two's complement.
pub fn sign_extend(raw: u64, width: usize) -> i64 {
    if width == 0 || width >= 64 {
        return raw as i64;
    }
    let shift = 64 - width;
    ((raw << shift) as i64) >> shift
}

fn decode_window(
    definition: &Definition,
    data: &[u8],
    start: usize,
    end: usize,
) -> Result<(Record, usize), DecodeError> {
    let mut record = Record::new();
    let mut cursor = start;
    let mut furthest = start;

    for field in &definition.fields {
        let pos = field.offset.map_or(cursor, |o| start + o as usize);
        cursor = match field.kind {
            FieldKind::Nested => decode_nested(field, data, pos, end, &mut record)?,
            FieldKind::Remainder => {
                if pos % 8 != 0 {
                    return Err(DecodeError::invalid(&field.id, "remainder must start on a byte boundary"));
                }
                if pos > end {
                    return Err(DecodeError::truncated(&field.id, format!("cursor at bit {} past end {}", pos, end)));
                }
                record.insert(field.id.clone(), Value::Bytes(data[pos / 8..end / 8].to_vec()));
                end
            }
            FieldKind::Text => {
                let width = field_width(field)?;
                check_span(field, pos, width, end)?;
                if pos % 8 != 0 || width % 8 != 0 {
                    return Err(DecodeError::invalid(&field.id, "text must be byte aligned"));
                }
                let bytes = &data[pos / 8..(pos + width) / 8];
                let text = strip_padding(bytes);
                if !text.is_empty() {
                    record.insert(field.id.clone(), Value::Text(text));
                }
                pos + width
            }
            _ => {
                let width = field_width(field)?;
                check_span(field, pos, width, end)?;
                if field.kind != FieldKind::Reserved {
                    let raw = extract_bits(data, pos, width);
                    if field.not_available != Some(raw) {
                        record.insert(field.id.clone(), scalar_value(field, raw, width)?);
                    }
                }
                pos + width
            }
        };
        furthest = furthest.max(cursor);
    }

    Ok((record, furthest))
}

fn field_width(field: &FieldSpec) -> Result<usize, DecodeError> {
    match (field.bits, field.kind) {
        (Some(bits), _) => Ok(bits as usize),
        (None, FieldKind::Flag) => Ok(1),
        (None, FieldKind::Date) => Ok(16),
        (None, FieldKind::Time) => Ok(32),
        (None, FieldKind::Coordinate) => Ok(32),
        (None, _) => Err(DecodeError::invalid(&field.id, "no bit width declared")),
    }
}

fn check_span(field: &FieldSpec, pos: usize, width: usize, end: usize) -> Result<(), DecodeError> {
    if pos + width > end {
        return Err(DecodeError::truncated(
            &field.id,
            format!("need bits {}..{}, buffer ends at {}", pos, pos + width, end),
        ));
    }
    Ok(())
}

fn scalar_value(field: &FieldSpec, raw: u64, width: usize) -> Result<Value, DecodeError> {
    let signed = || sign_extend(raw, width);
    let value = match field.kind {
        FieldKind::Unsigned => match field.resolution {
            Some(resolution) => Value::Float(raw as f64 * resolution),
            None => Value::Unsigned(raw),
        },
        FieldKind::Signed => match field.resolution {
            Some(resolution) => Value::Float(signed() as f64 * resolution),
            None => Value::Signed(signed()),
        },
        FieldKind::Fixed => {
            let scaled = if field.signed { signed() as f64 } else { raw as f64 };
            Value::Float(scaled * field.resolution.unwrap_or(1.0))
        }
        FieldKind::Lookup => lookup_value(field, EnumCode::Numeric(raw)),
        FieldKind::Flag => Value::Bool(raw != 0),
        FieldKind::Coordinate => {
            let default = if width > 32 { 1e-16 } else { 1e-7 };
            Value::Float(signed() as f64 * field.resolution.unwrap_or(default))
        }
        FieldKind::Date => {
            let date = NaiveDate::from_ymd_opt(1970, 1, 1)
                .and_then(|epoch| epoch.checked_add_days(Days::new(raw)))
                .ok_or_else(|| DecodeError::invalid(&field.id, format!("day {} out of range", raw)))?;
            Value::Text(date.format("%Y-%m-%d").to_string())
        }
        FieldKind::Time => {
            let resolution = field.resolution.unwrap_or(1e-4);
            let units_per_second = (1.0 / resolution).round() as u64;
            let seconds = raw / units_per_second.max(1);
            let fraction = raw % units_per_second.max(1);
            let time = NaiveTime::from_num_seconds_from_midnight_opt(seconds as u32, 0)
                .filter(|_| seconds < 86_400)
                .ok_or_else(|| DecodeError::invalid(&field.id, format!("{} s past midnight", seconds)))?;
            let digits = units_per_second.max(1).to_string().len() - 1;
            let text = if digits == 0 {
                time.format("%H:%M:%S").to_string()
            } else {
                format!("{}.{:0width$}", time.format("%H:%M:%S"), fraction, width = digits)
            };
            Value::Text(text)
        }
        FieldKind::Text | FieldKind::Remainder | FieldKind::Nested | FieldKind::Reserved => {
            return Err(DecodeError::invalid(&field.id, "not a scalar field"));
        }
    };
    Ok(value)
}

fn lookup_value(field: &FieldSpec, code: EnumCode) -> Value {
    let label = field
        .lookup
        .as_ref()
        .and_then(|table| table.label(&code.to_string()));
    match label {
        Some(label) => Value::Enum {
            label: label.to_string(),
            code,
        },
        None => Value::Unrecognized(code),
    }
}

fn strip_padding(bytes: &[u8]) -> String {
    let end = bytes
        .iter()
        .rposition(|b| !matches!(b, 0x00 | 0xFF | b'@' | b' '))
        .map_or(0, |i| i + 1);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn decode_nested(
    field: &FieldSpec,
    data: &[u8],
    pos: usize,
    end: usize,
    record: &mut Record,
) -> Result<usize, DecodeError> {
    let Some(reference) = field.reference.as_deref() else {
        return Err(DecodeError::invalid(&field.id, "nested field without a definition"));
    };
    let width = field.bits.map(|b| b as usize).or(reference.bit_length());

    let element = |index: Option<usize>, at: usize| -> Result<(Record, usize), DecodeError> {
        let label = match index {
            Some(i) => format!("{}[{}]", field.id, i),
            None => field.id.clone(),
        };
        let limit = match width {
            Some(w) if at + w > end => {
                return Err(DecodeError::truncated(
                    &label,
                    format!("need bits {}..{}, buffer ends at {}", at, at + w, end),
                ));
            }
            Some(w) => at + w,
            None => end,
        };
        let (nested, reached) =
            decode_window(reference, data, at, limit).map_err(|e| DecodeError::nested(&label, e))?;
        Ok((nested, width.map_or(reached, |w| at + w)))
    };

    if let Some(count_field) = &field.count_field {
        let count = record.get(count_field).and_then(|v| v.as_u64()).unwrap_or(0);
        let mut items = Vec::new();
        let mut cursor = pos;
        for index in 0..count as usize {
            let (nested, next) = element(Some(index), cursor)?;
            items.push(Value::Record(nested));
            cursor = next;
        }
        record.insert(field.id.clone(), Value::List(items));
        Ok(cursor)
    } else if field.repeat {
        let mut items = Vec::new();
        let mut cursor = pos;
        while cursor < end && cursor + width.unwrap_or(1) <= end {
            let (nested, next) = element(Some(items.len()), cursor)?;
            items.push(Value::Record(nested));
            if next <= cursor {
                break;
            }
            cursor = next;
        }
        record.insert(field.id.clone(), Value::List(items));
        Ok(end.max(cursor))
    } else {
        let (nested, next) = element(None, pos)?;
        record.insert(field.id.clone(), Value::Record(nested));
        Ok(next)
    }
}

fn decode_nested_tokens(
    field: &FieldSpec,
    tokens: &[&str],
    pos: usize,
    record: &mut Record,
) -> Result<usize, DecodeError> {
    let Some(reference) = field.reference.as_deref() else {
        return Err(DecodeError::invalid(&field.id, "nested field without a definition"));
    };

    let group = |label: String, at: usize, span: usize| -> Result<Option<Record>, DecodeError> {
        let end = (at + span).min(tokens.len());
        let slice = &tokens[at.min(end)..end];
        if slice.iter().all(|t| t.trim().is_empty()) {
            return Ok(None);
        }
        decode_tokens(reference, slice)
            .map(Some)
            .map_err(|e| DecodeError::nested(&label, e))
    };

    if !field.is_repeated() {
        let span = reference.token_count().unwrap_or(tokens.len().saturating_sub(pos));
        if let Some(nested) = group(field.id.clone(), pos, span)? {
            record.insert(field.id.clone(), Value::Record(nested));
        }
        return Ok(pos + span);
    }

    let Some(span) = reference.token_count().filter(|n| *n > 0) else {
        return Err(DecodeError::invalid(&field.id, "repeated group needs a fixed token count"));
    };
    let count = match &field.count_field {
        Some(count_field) => record.get(count_field).and_then(|v| v.as_u64()).unwrap_or(0) as usize,
        None => tokens.len().saturating_sub(pos).div_ceil(span),
    };

    let mut items = Vec::new();
    let mut cursor = pos;
    for index in 0..count {
        if cursor >= tokens.len() {
            break;
        }
        if let Some(nested) = group(format!("{}[{}]", field.id, index), cursor, span)? {
            items.push(Value::Record(nested));
        }
        cursor += span;
    }
    record.insert(field.id.clone(), Value::List(items));
    Ok(cursor.max(tokens.len()))
}

fn token_value(field: &FieldSpec, token: &str) -> Result<Option<Value>, DecodeError> {
    let bad = |what: &str| DecodeError::invalid(&field.id, format!("expected {}, got {:?}", what, token));

    let value = match field.kind {
        FieldKind::Unsigned => {
            let raw: u64 = token.parse().map_err(|_| bad("unsigned integer"))?;
            if field.not_available == Some(raw) {
                return Ok(None);
            }
            match field.resolution {
                Some(resolution) => Value::Float(raw as f64 * resolution),
                None => Value::Unsigned(raw),
            }
        }
        FieldKind::Signed => {
            let raw: i64 = token.parse().map_err(|_| bad("integer"))?;
            match field.resolution {
                Some(resolution) => Value::Float(raw as f64 * resolution),
                None => Value::Signed(raw),
            }
        }
        FieldKind::Fixed => {
            let raw: f64 = token.parse().map_err(|_| bad("number"))?;
            Value::Float(raw * field.resolution.unwrap_or(1.0))
        }
        FieldKind::Lookup => lookup_value(field, EnumCode::Token(token.to_string())),
        FieldKind::Flag => match token {
            "A" | "T" | "Y" => Value::Bool(true),
            "V" | "F" | "N" => Value::Bool(false),
            _ => Value::Bool(token.parse::<u64>().map_err(|_| bad("flag"))? != 0),
        },
        FieldKind::Text => Value::Text(token.to_string()),
        FieldKind::Time => Value::Text(parse_time(token).ok_or_else(|| bad("hhmmss.ss"))?),
        FieldKind::Date => Value::Text(parse_date(token).ok_or_else(|| bad("ddmmyy"))?),
        FieldKind::Coordinate => Value::Float(parse_coordinate(token).ok_or_else(|| bad("(d)ddmm.mmmm"))?),
        FieldKind::Remainder | FieldKind::Nested | FieldKind::Reserved => return Ok(None),
    };
    Ok(Some(value))
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// `hhmmss[.ss]` to `HH:MM:SS[.ss]`, keeping the sender's precision.
fn parse_time(token: &str) -> Option<String> {
    let (whole, fraction) = match token.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (token, None),
    };
    if whole.len() != 6 || !all_digits(whole) {
        return None;
    }
    let hour = whole[0..2].parse().ok()?;
    let minute = whole[2..4].parse().ok()?;
    let second = whole[4..6].parse().ok()?;
    let time = NaiveTime::from_hms_opt(hour, minute, second)?;
    match fraction {
        Some(f) if !f.is_empty() => {
            if !all_digits(f) {
                return None;
            }
            Some(format!("{}.{}", time.format("%H:%M:%S"), f))
        }
        _ => Some(time.format("%H:%M:%S").to_string()),
    }
}

/// `ddmmyy` to ISO date; two digit years below 70 are 20xx.
fn parse_date(token: &str) -> Option<String> {
    if token.len() != 6 || !all_digits(token) {
        return None;
    }
    let day = token[0..2].parse().ok()?;
    let month = token[2..4].parse().ok()?;
    let yy: i32 = token[4..6].parse().ok()?;
    let year = if yy < 70 { 2000 + yy } else { 1900 + yy };
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some(date.format("%Y-%m-%d").to_string())
}

/// `(d)ddmm.mmmm` to decimal degrees.
fn parse_coordinate(token: &str) -> Option<f64> {
    let whole = token.split_once('.').map_or(token, |(w, _)| w);
    if whole.len() < 3 || !all_digits(whole) {
        return None;
    }
    let value: f64 = token.parse().ok()?;
    let degrees = (value / 100.0).trunc();
    let minutes = value - degrees * 100.0;
    if minutes >= 60.0 {
        return None;
    }
    Some(degrees + minutes / 60.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeErrorKind;
    use crate::store::DefinitionStore;
    use approx::assert_relative_eq;

    fn store(json: &str) -> DefinitionStore {
        DefinitionStore::from_json(json).unwrap()
    }

    /// Packs raw codes into a buffer with the bus bit order.
    fn encode(fields: &[(u64, usize)]) -> Vec<u8> {
        let total: usize = fields.iter().map(|(_, w)| w).sum();
        let mut data = vec![0u8; total.div_ceil(8)];
        let mut bit = 0;
        for &(value, width) in fields {
            for i in 0..width {
                if (value >> i) & 1 == 1 {
                    data[(bit + i) / 8] |= 1 << ((bit + i) % 8);
                }
            }
            bit += width;
        }
        data
    }

    #[test]
    fn test_extract_bits_little_endian() {
        let data = [0x34, 0x12, 0xF0];
        assert_eq!(extract_bits(&data, 0, 16), 0x1234);
        assert_eq!(extract_bits(&data, 4, 8), 0x23);
        assert_eq!(extract_bits(&data, 20, 4), 0xF);
        assert_eq!(extract_bits(&[0xFF; 8], 0, 64), u64::MAX);
    }

    #[test]
    fn test_sign_extend() {
        assert_eq!(sign_extend(0xFF, 8), -1);
        assert_eq!(sign_extend(0x7F, 8), 127);
        assert_eq!(sign_extend(0b100, 3), -4);
        assert_eq!(sign_extend(u64::MAX, 64), -1);
    }

    #[test]
    fn test_unscaled_integers_round_trip() {
        let store = store(
            r#"{ "pgns": { "65280": { "fields": [
                { "id": "a", "kind": "unsigned", "bits": 3 },
                { "id": "b", "kind": "unsigned", "bits": 13 },
                { "id": "c", "kind": "unsigned", "bits": 32 },
                { "id": "d", "kind": "unsigned", "bits": 7 },
                { "id": "e", "kind": "unsigned", "bits": 9 } ] } } }"#,
        );
        let def = store.pgn(65280).unwrap();
        let raw = [(5, 3), (8000, 13), (0xDEADBEEF, 32), (100, 7), (300, 9)];
        let record = decode(&def, &encode(&raw)).unwrap();
        let decoded: Vec<u64> = record.iter().map(|(_, v)| v.as_u64().unwrap()).collect();
        assert_eq!(decoded, raw.iter().map(|(v, _)| *v).collect::<Vec<_>>());
    }

    #[test]
    fn test_wind_data_payload() {
        let store = DefinitionStore::builtin().unwrap();
        let def = store.pgn(130306).unwrap();
        // sid 0, 5.00 m/s, 1.5708 rad, apparent
        let data = [0x00, 0xF4, 0x01, 0x5C, 0x3D, 0xFA, 0xFF, 0xFF];
        let record = decode(&def, &data).unwrap();
        assert_relative_eq!(record.get("wind_speed").unwrap().as_f64().unwrap(), 5.0, epsilon = 1e-9);
        assert_relative_eq!(record.get("wind_angle").unwrap().as_f64().unwrap(), 1.5708, epsilon = 1e-9);
        assert_eq!(record.get("reference").unwrap().as_str(), Some("Apparent"));
    }

    #[test]
    fn test_unknown_enum_is_unrecognized() {
        let store = DefinitionStore::builtin().unwrap();
        let def = store.pgn(130306).unwrap();
        let data = [0x00, 0xF4, 0x01, 0x5C, 0x3D, 0xFE, 0xFF, 0xFF];
        let record = decode(&def, &data).unwrap();
        assert_eq!(
            record.get("reference"),
            Some(&Value::Unrecognized(EnumCode::Numeric(6)))
        );
    }

    #[test]
    fn test_not_available_is_omitted() {
        let store = DefinitionStore::builtin().unwrap();
        let def = store.pgn(127250).unwrap();
        // heading 1.0 rad, deviation and variation not available, magnetic
        let data = [0xFF, 0x10, 0x27, 0xFF, 0x7F, 0xFF, 0x7F, 0xFD];
        let record = decode(&def, &data).unwrap();
        assert!(!record.contains("sid"));
        assert!(!record.contains("deviation"));
        assert!(!record.contains("variation"));
        assert_relative_eq!(record.get("heading").unwrap().as_f64().unwrap(), 1.0, epsilon = 1e-9);
        assert_eq!(record.get("reference").unwrap().as_str(), Some("Magnetic"));
    }

    #[test]
    fn test_truncated_buffer() {
        let store = DefinitionStore::builtin().unwrap();
        let def = store.pgn(130306).unwrap();
        let err = decode(&def, &[0x00, 0xF4, 0x01]).unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::TruncatedBuffer);
        assert_eq!(err.field, "wind_angle");
    }

    #[test]
    fn test_signed_and_flag() {
        let store = store(
            r#"{ "pgns": { "65280": { "fields": [
                { "id": "tilt", "kind": "signed", "bits": 8 },
                { "id": "on", "kind": "flag", "bits": 2 },
                { "id": "off", "kind": "flag", "bits": 2 },
                { "id": "pad", "kind": "reserved", "bits": 4 } ] } } }"#,
        );
        let def = store.pgn(65280).unwrap();
        let record = decode(&def, &[0xF6, 0b0000_0010]).unwrap();
        assert_eq!(record.get("tilt"), Some(&Value::Signed(-10)));
        assert_eq!(record.get("on"), Some(&Value::Bool(true)));
        assert_eq!(record.get("off"), Some(&Value::Bool(false)));
        assert!(!record.contains("pad"));
    }

    #[test]
    fn test_date_and_time() {
        let store = DefinitionStore::builtin().unwrap();
        let def = store.pgn(126992).unwrap();
        // 2021-01-01 is day 18628; 12:00:00.5 is 432005000 units
        let days = 18628u16.to_le_bytes();
        let time = 432_005_000u32.to_le_bytes();
        let data = [1, 0xF0, days[0], days[1], time[0], time[1], time[2], time[3]];
        let record = decode(&def, &data).unwrap();
        assert_eq!(record.get("date").unwrap().as_str(), Some("2021-01-01"));
        assert_eq!(record.get("time").unwrap().as_str(), Some("12:00:00.5000"));
        assert_eq!(record.get("source").unwrap().as_str(), Some("GPS"));
    }

    #[test]
    fn test_text_padding_and_remainder() {
        let store = store(
            r#"{ "pgns": { "65280": { "fields": [
                { "id": "name", "kind": "text", "bits": 48 },
                { "id": "rest", "kind": "remainder" } ] } } }"#,
        );
        let def = store.pgn(65280).unwrap();
        let record = decode(&def, b"AB C@\xFF\x01\x02").unwrap();
        assert_eq!(record.get("name").unwrap().as_str(), Some("AB C"));
        assert_eq!(record.get("rest"), Some(&Value::Bytes(vec![1, 2])));
    }

    #[test]
    fn test_count_field_repetition() {
        let store = store(
            r#"{ "structures": { "pair": { "fields": [
                    { "id": "x", "kind": "unsigned", "bits": 4 },
                    { "id": "y", "kind": "unsigned", "bits": 4 } ] } },
                 "pgns": { "65280": { "fields": [
                    { "id": "n", "kind": "unsigned", "bits": 8 },
                    { "id": "pairs", "kind": "nested", "reference": "struct/pair", "count_field": "n" },
                    { "id": "tail", "kind": "unsigned", "bits": 8 } ] } } }"#,
        );
        let def = store.pgn(65280).unwrap();
        let record = decode(&def, &[2, 0x21, 0x43, 0x99]).unwrap();
        assert_eq!(record.deep_get(&["pairs", "1", "y"]), Some(&Value::Unsigned(4)));
        assert_eq!(record.get("tail"), Some(&Value::Unsigned(0x99)));

        let err = decode(&def, &[3, 0x21, 0x43]).unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::TruncatedBuffer);
        assert_eq!(err.field, "pairs[2]");
    }

    #[test]
    fn test_repeat_until_exhausted() {
        let store = store(
            r#"{ "structures": { "item": { "fields": [ { "id": "v", "kind": "unsigned", "bits": 8 } ] } },
                 "pgns": { "65280": { "fields": [
                    { "id": "head", "kind": "unsigned", "bits": 8 },
                    { "id": "items", "kind": "nested", "reference": "struct/item", "repeat": true } ] } } }"#,
        );
        let def = store.pgn(65280).unwrap();
        let record = decode(&def, &[9, 1, 2, 3]).unwrap();
        assert_eq!(record.get("items").unwrap().as_list().unwrap().len(), 3);
        let empty = decode(&def, &[9]).unwrap();
        assert_eq!(empty.get("items"), Some(&Value::List(Vec::new())));
    }

    #[test]
    fn test_tokens_gga() {
        let store = DefinitionStore::builtin().unwrap();
        let def = store.sentence("GGA").unwrap();
        let tokens: Vec<&str> =
            "092750.000,5321.6802,N,00630.3372,W,1,8,1.03,61.7,M,55.2,M,,"
                .split(',')
                .collect();
        let record = decode_tokens(&def, &tokens).unwrap();
        assert_eq!(record.get("utc").unwrap().as_str(), Some("09:27:50.000"));
        assert_relative_eq!(record.get("latitude").unwrap().as_f64().unwrap(), 53.36133667, epsilon = 1e-6);
        assert_eq!(record.get("latitude_hemisphere").unwrap().as_str(), Some("North"));
        assert_eq!(record.get("quality").unwrap().as_str(), Some("GPS fix"));
        assert_eq!(record.get("satellites"), Some(&Value::Unsigned(8)));
        assert!(!record.contains("age_of_corrections"));
        assert!(!record.contains("station_id"));
    }

    #[test]
    fn test_tokens_short_sentence_omits_trailing() {
        let store = DefinitionStore::builtin().unwrap();
        let def = store.sentence("RMC").unwrap();
        let tokens: Vec<&str> = "123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W"
            .split(',')
            .collect();
        let record = decode_tokens(&def, &tokens).unwrap();
        assert_eq!(record.get("date").unwrap().as_str(), Some("1994-03-23"));
        assert!(!record.contains("mode"));
    }

    #[test]
    fn test_tokens_bad_number_is_invalid_field() {
        let store = DefinitionStore::builtin().unwrap();
        let def = store.sentence("HDT").unwrap();
        let err = decode_tokens(&def, &["abc", "T"]).unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::InvalidField);
        assert_eq!(err.field, "heading");
    }

    #[test]
    fn test_tokens_repeated_groups() {
        let store = DefinitionStore::builtin().unwrap();
        let def = store.sentence("GSV").unwrap();
        let tokens: Vec<&str> = "3,3,11,03,03,111,00,04,15,270,00,06,01,010,00"
            .split(',')
            .collect();
        let record = decode_tokens(&def, &tokens).unwrap();
        let satellites = record.get("satellites").unwrap().as_list().unwrap();
        assert_eq!(satellites.len(), 3);
        assert_eq!(record.deep_get(&["satellites", "2", "prn"]), Some(&Value::Unsigned(6)));
        assert_eq!(record.deep_get(&["satellites", "1", "azimuth"]), Some(&Value::Unsigned(270)));
    }

    #[test]
    fn test_token_helpers() {
        assert_eq!(parse_time("123519").as_deref(), Some("12:35:19"));
        assert_eq!(parse_time("246000"), None);
        assert_eq!(parse_date("010170").as_deref(), Some("1970-01-01"));
        assert_eq!(parse_date("311269").as_deref(), Some("2069-12-31"));
        assert_eq!(parse_date("300299"), None);
        assert_relative_eq!(parse_coordinate("01131.000").unwrap(), 11.516666666, epsilon = 1e-6);
        assert_eq!(parse_coordinate("4875.0"), None);
    }
}
