//! Predict wire codec.
//!
//! The predict endpoint speaks three response shapes depending on the output
//! mix, and the request carries binary inputs as multipart parts whose
//! filenames are decimal batch indices. Both the ingress and the client link
//! against this module so the two sides cannot drift.
//!
//! Response shapes:
//! - exactly one output and it is binary: `application/octet-stream` body;
//! - all outputs binary: `multipart/mixed` with one `output<i>.bin` part per
//!   output;
//! - otherwise: `application/json` `{"outputs": [...]}` where binary entries
//!   are wrapped as `{"__type__": "base64", "content": <b64>}`.

use crate::types::OutputValue;
use base64::Engine;
use serde_json::Value;
use thiserror::Error;

/// Fixed boundary used for multipart/mixed predict responses.
pub const MULTIPART_BOUNDARY: &str = "multipart-boundary";

/// Type tag marking a base64-wrapped binary output inside a JSON response.
pub const BASE64_TYPE_TAG: &str = "base64";

#[derive(Debug, Error)]
pub enum WireError {
    #[error("unexpected content type: {0}")]
    UnexpectedContentType(String),
    #[error("missing multipart boundary in content type: {0}")]
    MissingBoundary(String),
    #[error("malformed multipart part: {0}")]
    MalformedPart(String),
    #[error("invalid output filename: {0}")]
    InvalidOutputFilename(String),
    #[error("missing output index {0} in multipart response")]
    MissingOutputIndex(usize),
    #[error("invalid json payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid base64 content: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// An encoded predict response body, ready to be sent.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedResponse {
    pub content_type: String,
    pub body: Vec<u8>,
}

/// Encode a batch of outputs into the response shape the client expects.
pub fn encode_outputs(outputs: &[OutputValue]) -> Result<EncodedResponse, WireError> {
    if outputs.len() == 1 {
        if let OutputValue::Binary(bytes) = &outputs[0] {
            return Ok(EncodedResponse {
                content_type: "application/octet-stream".to_string(),
                body: bytes.clone(),
            });
        }
    }

    if !outputs.is_empty() && outputs.iter().all(|o| o.is_binary()) {
        let mut body = Vec::new();
        for (idx, output) in outputs.iter().enumerate() {
            let bytes = output.as_binary().expect("all binary");
            body.extend_from_slice(
                format!(
                    "--{MULTIPART_BOUNDARY}\r\nContent-Type: application/octet-stream\r\nContent-Disposition: attachment; filename=\"output{idx}.bin\"\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}--\r\n").as_bytes());
        return Ok(EncodedResponse {
            content_type: format!("multipart/mixed; boundary={MULTIPART_BOUNDARY}"),
            body,
        });
    }

    let mut encoded = Vec::with_capacity(outputs.len());
    for output in outputs {
        match output {
            OutputValue::Json(v) => encoded.push(v.clone()),
            OutputValue::Binary(bytes) => {
                encoded.push(serde_json::json!({
                    "__type__": BASE64_TYPE_TAG,
                    "content": base64::engine::general_purpose::STANDARD.encode(bytes),
                }));
            }
        }
    }
    let body = serde_json::to_vec(&serde_json::json!({ "outputs": encoded }))?;
    Ok(EncodedResponse {
        content_type: "application/json".to_string(),
        body,
    })
}

/// Decode a predict response body back into outputs.
pub fn decode_outputs(content_type: &str, body: &[u8]) -> Result<Vec<OutputValue>, WireError> {
    if content_type.contains("application/json") {
        let parsed: Value = serde_json::from_slice(body)?;
        let outputs = parsed
            .get("outputs")
            .and_then(Value::as_array)
            .ok_or_else(|| WireError::MalformedPart("missing 'outputs' array".to_string()))?;
        return outputs.iter().map(unwrap_json_output).collect();
    }

    if content_type.contains("multipart/mixed") {
        let boundary = content_type
            .split("boundary=")
            .nth(1)
            .map(|b| b.trim_matches('"').to_string())
            .ok_or_else(|| WireError::MissingBoundary(content_type.to_string()))?;
        return parse_multipart_outputs(&boundary, body)
            .map(|parts| parts.into_iter().map(OutputValue::Binary).collect());
    }

    if content_type.contains("application/octet-stream") {
        return Ok(vec![OutputValue::Binary(body.to_vec())]);
    }

    Err(WireError::UnexpectedContentType(content_type.to_string()))
}

fn unwrap_json_output(value: &Value) -> Result<OutputValue, WireError> {
    if let Some(obj) = value.as_object() {
        if obj.get("__type__").and_then(Value::as_str) == Some(BASE64_TYPE_TAG) {
            let content = obj
                .get("content")
                .and_then(Value::as_str)
                .ok_or_else(|| WireError::MalformedPart("base64 wrapper without content".into()))?;
            let bytes = base64::engine::general_purpose::STANDARD.decode(content)?;
            return Ok(OutputValue::Binary(bytes));
        }
    }
    Ok(OutputValue::Json(value.clone()))
}

/// Split a multipart/mixed body into `output<i>.bin` payloads, densely
/// ordered by index.
pub fn parse_multipart_outputs(boundary: &str, body: &[u8]) -> Result<Vec<Vec<u8>>, WireError> {
    let delim = format!("--{boundary}");
    let mut indexed: Vec<(usize, Vec<u8>)> = Vec::new();

    for part in split_on(body, delim.as_bytes()) {
        if part.is_empty() || !contains(part, b"Content-Type") {
            continue;
        }
        let split_at = find(part, b"\r\n\r\n")
            .ok_or_else(|| WireError::MalformedPart("no header/body separator".to_string()))?;
        let (headers, content) = part.split_at(split_at);
        let content = &content[4..];
        let headers = String::from_utf8_lossy(headers);
        let filename = headers
            .lines()
            .find(|l| l.contains("Content-Disposition"))
            .and_then(|l| l.split("filename=\"").nth(1))
            .and_then(|rest| rest.split('"').next())
            .ok_or_else(|| WireError::MalformedPart("missing filename".to_string()))?;
        let index: usize = filename
            .strip_prefix("output")
            .and_then(|s| s.strip_suffix(".bin"))
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| WireError::InvalidOutputFilename(filename.to_string()))?;
        let content = content
            .strip_suffix(b"\r\n")
            .unwrap_or(content)
            .to_vec();
        indexed.push((index, content));
    }

    let count = indexed.len();
    let mut outputs: Vec<Option<Vec<u8>>> = vec![None; count];
    for (index, content) in indexed {
        if index >= count {
            return Err(WireError::InvalidOutputFilename(format!("output{index}.bin")));
        }
        outputs[index] = Some(content);
    }
    outputs
        .into_iter()
        .enumerate()
        .map(|(i, o)| o.ok_or(WireError::MissingOutputIndex(i)))
        .collect()
}

/// Extract the batch index from a `Content-Disposition` header whose
/// filename is a decimal integer.
pub fn index_from_content_disposition(header: &str) -> Option<usize> {
    for part in header.split(';') {
        let part = part.trim();
        if let Some(value) = part.strip_prefix("filename=") {
            return value.trim().trim_matches('"').parse().ok();
        }
    }
    None
}

fn split_on<'a>(haystack: &'a [u8], needle: &[u8]) -> Vec<&'a [u8]> {
    let mut parts = Vec::new();
    let mut start = 0;
    while let Some(pos) = find(&haystack[start..], needle) {
        parts.push(&haystack[start..start + pos]);
        start += pos + needle.len();
    }
    parts.push(&haystack[start..]);
    parts
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    find(haystack, needle).is_some()
}
