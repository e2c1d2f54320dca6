use encoding_rs::{Encoding, BIG5, UTF_8};
use thiserror::Error;

/// Candidate encodings, in the order they are attempted. Government exports
/// are usually UTF-8 with a BOM, older ones cp950 (a Big5 superset).
pub const CANDIDATE_ENCODINGS: &[&str] = &["utf-8-sig", "utf-8", "cp950", "big5"];

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Error)]
#[error("no candidate encoding could decode the input (tried {})", .tried.join(", "))]
pub struct DecodeError {
    pub tried: Vec<&'static str>,
}

fn encoding_for(label: &str) -> &'static Encoding {
    match label {
        "cp950" | "big5" => BIG5,
        _ => UTF_8,
    }
}

/// Strictly decode `bytes` with the first candidate that yields no malformed
/// sequences. Returns the text and the label that succeeded.
pub fn decode_text(bytes: &[u8]) -> Result<(String, &'static str), DecodeError> {
    for &label in CANDIDATE_ENCODINGS {
        let input = if label == "utf-8-sig" {
            bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes)
        } else {
            bytes
        };
        if let Some(text) =
            encoding_for(label).decode_without_bom_handling_and_without_replacement(input)
        {
            return Ok((text.into_owned(), label));
        }
    }
    Err(DecodeError {
        tried: CANDIDATE_ENCODINGS.to_vec(),
    })
}
