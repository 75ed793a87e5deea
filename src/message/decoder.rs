//! Body extraction for queue entries.

use std::io::Read;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use flate2::read::ZlibDecoder;
use serde_json::Value;

use super::{legacy, Compression, ContentType, QueueEntry, TaskBody};
use crate::error::DecodeError;

/// Decodes the task payload carried by `entry`.
///
/// Errors are returned to the caller untouched; an unrecognized content type
/// is not an error and yields an empty descriptor.
pub fn extract_body(entry: &QueueEntry) -> Result<TaskBody, DecodeError> {
    let encoded = entry
        .body
        .as_ref()
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingBody)?;
    let mut raw = BASE64.decode(encoded)?;

    if entry.compression() == Compression::Gzip {
        raw = inflate(&raw)?;
    }

    match entry.content_type() {
        ContentType::Json => {
            let text = String::from_utf8(raw)?;
            Ok(TaskBody::from_value(serde_json::from_str(&text)?))
        }
        ContentType::Legacy => legacy::decode_mapping(&raw).map(TaskBody::from_value),
        ContentType::Unknown(content_type) => {
            tracing::debug!(?content_type, "Unrecognized content type, body left undecoded");
            Ok(TaskBody::empty())
        }
    }
}

/// Inflates a zlib stream.
fn inflate(raw: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut decoder = ZlibDecoder::new(raw);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(DecodeError::Decompress)?;
    Ok(out)
}
