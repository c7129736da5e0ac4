use crate::error::Error;

/// XOR of every byte of `body` (the text between the start delimiter and `*`).
pub fn calculate(body: &str) -> u8 {
    body.bytes().fold(0, |acc, b| acc ^ b)
}

/// Splits a raw sentence into its start delimiter, its body and its optional
/// checksum trailer. Surrounding whitespace and CR/LF are ignored.
pub(crate) fn split(sentence: &str) -> Result<(char, &str, Option<u8>), Error> {
    let line = sentence.trim();
    let mut chars = line.chars();
    let delimiter = match chars.next() {
        Some(c @ ('$' | '!')) => c,
        _ => return Err(Error::parse("missing start delimiter", sentence)),
    };
    let rest = chars.as_str();

    match rest.split_once('*') {
        None => Ok((delimiter, rest, None)),
        Some((body, trailer)) => {
            if trailer.len() != 2 || !trailer.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(Error::parse("checksum trailer is not two hex digits", sentence));
            }
            let expected = u8::from_str_radix(trailer, 16)
                .map_err(|_| Error::parse("checksum trailer is not two hex digits", sentence))?;
            Ok((delimiter, body, Some(expected)))
        }
    }
}

/// Verifies the `*HH` trailer of a raw sentence. Sentences without a trailer
/// are not checksummed and pass.
pub fn verify(sentence: &str) -> Result<(), Error> {
    let (_, body, trailer) = split(sentence)?;
    match trailer {
        Some(expected) => {
            let computed = calculate(body);
            if computed == expected {
                Ok(())
            } else {
                Err(Error::Checksum { expected, computed })
            }
        }
        None => Ok(()),
    }
}
