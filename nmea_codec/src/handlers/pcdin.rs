use std::sync::Arc;

use super::{hex_number, hex_payload, message_record};
use crate::error::Error;
use crate::n2k::decode_payload;
use crate::nmea0183::SentenceHandler;
use crate::record::{Outcome, Record};
use crate::store::DefinitionStore;

/// `$PCDIN,<pgn>,<timestamp>,<source>,<data>`: a complete NMEA 2000 payload,
/// already reassembled by the gateway.
pub struct PcdinHandler {
    store: Arc<DefinitionStore>,
}

impl PcdinHandler {
    pub fn new(store: Arc<DefinitionStore>) -> Self {
        Self { store }
    }
}

impl SentenceHandler for PcdinHandler {
    fn decode(&self, sentence: &str, fields: &[&str]) -> Result<Outcome<Record>, Error> {
        if sentence != "N" {
            return Err(Error::SentenceType(format!("PCDI{}", sentence)));
        }
        let &[pgn, timestamp, source, data] = fields else {
            return Err(Error::parse(
                "expected pgn, timestamp, source and data fields",
                fields.join(","),
            ));
        };
        let pgn = hex_number(pgn, "pgn")?;
        let timestamp = hex_number(timestamp, "timestamp")?;
        let source = hex_number(source, "source")?;
        let source = u8::try_from(source).map_err(|_| Error::parse("source address exceeds 255", fields.join(",")))?;
        let payload = hex_payload(data)?;

        let mut message = decode_payload(&self.store, pgn, &payload)?;
        message.source = Some(source);
        Ok(Outcome::Complete(message_record(message, Some(timestamp))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nmea0183::Nmea0183Decoder;
    use crate::record::Value;
    use approx::assert_relative_eq;

    const ENGINE: &str = "$PCDIN,01F201,001935D5,38,0000000B0C477CBC0C0000FFFFFFFFFFFF30007F000000000000*26";

    fn store() -> Arc<DefinitionStore> {
        Arc::new(DefinitionStore::builtin().unwrap())
    }

    #[test]
    fn test_engine_parameters() {
        let store = store();
        let decoder = Nmea0183Decoder::new(store.clone()).with_manufacturer("CDI", PcdinHandler::new(store));
        let sentence = decoder.decode(ENGINE).unwrap().complete().unwrap();
        assert!(sentence.proprietary);
        assert_eq!(sentence.talker, "CDI");
        assert_eq!(sentence.formatter, "N");

        let record = &sentence.fields;
        assert_eq!(record.get("pgn"), Some(&Value::Unsigned(127489)));
        assert_eq!(record.get("source"), Some(&Value::Unsigned(56)));
        assert_eq!(record.get("timestamp"), Some(&Value::Unsigned(0x001935D5)));
        assert_eq!(record.get("priority"), None);
        assert_relative_eq!(
            record.deep_get(&["fields", "temperature"]).unwrap().as_f64().unwrap(),
            318.15,
            epsilon = 1e-9
        );
        assert_eq!(record.deep_get(&["fields", "total_engine_hours"]), None);
    }

    #[test]
    fn test_unknown_pgn() {
        let handler = PcdinHandler::new(store());
        let err = handler
            .decode("N", &["01F256", "00000000", "38", "FFFF7F00000CB201"])
            .unwrap_err();
        assert!(matches!(err, Error::Definition(_)));
        let err = handler.decode("N", &["40000", "00000000", "38", "00"]).unwrap_err();
        assert!(matches!(err, Error::Pgn { .. }));
    }

    #[test]
    fn test_rejects_other_sentences_and_shapes() {
        let handler = PcdinHandler::new(store());
        assert_eq!(
            handler.decode("X", &["01F201", "0", "38", "00"]).unwrap_err(),
            Error::SentenceType("PCDIX".to_string())
        );
        assert!(matches!(handler.decode("N", &["01F201", "0", "38"]), Err(Error::Parse { .. })));
        assert!(matches!(
            handler.decode("N", &["01F201", "0", "100", "00"]),
            Err(Error::Parse { .. })
        ));
        assert!(matches!(
            handler.decode("N", &["01F201", "0", "38", "0G"]),
            Err(Error::Parse { .. })
        ));
    }
}
