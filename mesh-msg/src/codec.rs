//! The `mesh/1` wire protocol.
//!
//! A message is a sequence of binary frames, each length-delimited on the
//! wire:
//!
//! - Frame 1 (header): space-separated ASCII tokens
//!   `mesh/1 <role> <address|status> <mimetype> <context-length> <data-length>`
//!   with `role` one of `req` / `rep` and `none` marking an absent payload.
//! - Frame 2 (present iff `context-length > 0`): newline-separated
//!   `key: value` context entries.
//! - Frame 3 (present iff `data-length > 0`): the serialized payload in
//!   the declared mimetype.

use std::collections::HashMap;

use bytes::Bytes;
use mesh_core::error::RequestError;
use mesh_core::status::Status;

/// The fixed protocol version token.
pub const VERSION: &str = "mesh/1";

fn bad_request() -> RequestError {
    RequestError::new(Status::BadRequest)
}

struct Header {
    role: String,
    target: String,
    mimetype: Option<String>,
    context_length: usize,
    data_length: usize,
}

impl Header {
    fn parse(frame: &[u8]) -> Result<Header, RequestError> {
        let text = std::str::from_utf8(frame).map_err(|_| bad_request())?;
        let tokens: Vec<&str> = text.split(' ').collect();
        if tokens.len() != 6 || tokens[0] != VERSION {
            return Err(bad_request());
        }

        Ok(Header {
            role: tokens[1].to_string(),
            target: tokens[2].to_string(),
            mimetype: match tokens[3] {
                "none" => None,
                mimetype => Some(mimetype.to_string()),
            },
            context_length: tokens[4].parse().map_err(|_| bad_request())?,
            data_length: tokens[5].parse().map_err(|_| bad_request())?,
        })
    }

    fn render(role: &str, target: &str, mimetype: Option<&str>, context: usize, data: usize) -> Bytes {
        Bytes::from(format!(
            "{VERSION} {role} {target} {} {context} {data}",
            mimetype.unwrap_or("none")
        ))
    }
}

/// How many frames follow the given header frame.
pub fn trailing_frames(header: &[u8]) -> Result<usize, RequestError> {
    let header = Header::parse(header)?;
    Ok(usize::from(header.context_length > 0) + usize::from(header.data_length > 0))
}

fn parse_context(frame: &[u8]) -> Result<HashMap<String, String>, RequestError> {
    let text = std::str::from_utf8(frame).map_err(|_| bad_request())?;
    let mut context = HashMap::new();
    for line in text.lines() {
        let (key, value) = line.split_once(':').ok_or_else(bad_request)?;
        context.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(context)
}

fn encode_context(context: &HashMap<String, String>) -> Option<Bytes> {
    if context.is_empty() {
        return None;
    }
    let mut entries: Vec<String> = context
        .iter()
        .map(|(key, value)| format!("{key}: {value}"))
        .collect();
    entries.sort();
    Some(Bytes::from(entries.join("\n")))
}

fn assemble(header: Bytes, context: Option<Bytes>, data: Option<Bytes>) -> Vec<Bytes> {
    let mut frames = vec![header];
    if let Some(context) = context {
        frames.push(context);
    }
    if let Some(data) = data {
        frames.push(data);
    }
    frames
}

/// A decoded request message.
#[derive(Debug, Clone, Default)]
pub struct WireRequest {
    pub address: String,
    pub mimetype: Option<String>,
    pub context: HashMap<String, String>,
    pub data: Option<String>,
}

impl WireRequest {
    pub fn decode(frames: &[Bytes]) -> Result<WireRequest, RequestError> {
        let header = Header::parse(frames.first().ok_or_else(bad_request)?)?;
        if header.role != "req" {
            return Err(bad_request());
        }

        let mut request = WireRequest {
            address: header.target,
            mimetype: header.mimetype,
            context: HashMap::new(),
            data: None,
        };

        let mut frame = 1;
        if header.context_length > 0 {
            request.context = parse_context(frames.get(frame).ok_or_else(bad_request)?)?;
            frame += 1;
        }
        if header.data_length > 0 {
            let data = frames.get(frame).ok_or_else(bad_request)?;
            request.data =
                Some(std::str::from_utf8(data).map_err(|_| bad_request())?.to_string());
        }
        Ok(request)
    }

    pub fn encode(&self) -> Vec<Bytes> {
        let context = encode_context(&self.context);
        let data = self.data.as_ref().map(|data| Bytes::from(data.clone()));
        let header = Header::render(
            "req",
            &self.address,
            self.mimetype.as_deref(),
            context.as_ref().map(Bytes::len).unwrap_or(0),
            data.as_ref().map(Bytes::len).unwrap_or(0),
        );
        assemble(header, context, data)
    }
}

/// A decoded reply message.
#[derive(Debug, Clone)]
pub struct WireReply {
    pub status: Status,
    pub mimetype: Option<String>,
    pub context: HashMap<String, String>,
    pub data: Option<String>,
}

impl WireReply {
    pub fn new(status: Status) -> WireReply {
        WireReply {
            status,
            mimetype: None,
            context: HashMap::new(),
            data: None,
        }
    }

    pub fn decode(frames: &[Bytes]) -> Result<WireReply, RequestError> {
        let header = Header::parse(frames.first().ok_or_else(bad_request)?)?;
        if header.role != "rep" {
            return Err(bad_request());
        }

        let status: Status = header.target.parse().map_err(|_| bad_request())?;
        let mut reply = WireReply {
            status,
            mimetype: header.mimetype,
            context: HashMap::new(),
            data: None,
        };

        let mut frame = 1;
        if header.context_length > 0 {
            reply.context = parse_context(frames.get(frame).ok_or_else(bad_request)?)?;
            frame += 1;
        }
        if header.data_length > 0 {
            let data = frames.get(frame).ok_or_else(bad_request)?;
            reply.data =
                Some(std::str::from_utf8(data).map_err(|_| bad_request())?.to_string());
        }
        Ok(reply)
    }

    pub fn encode(&self) -> Vec<Bytes> {
        let context = encode_context(&self.context);
        let data = self.data.as_ref().map(|data| Bytes::from(data.clone()));
        let header = Header::render(
            "rep",
            self.status.token(),
            self.mimetype.as_deref(),
            context.as_ref().map(Bytes::len).unwrap_or(0),
            data.as_ref().map(Bytes::len).unwrap_or(0),
        );
        assemble(header, context, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trip() {
        let request = WireRequest {
            address: "test::/examples/1.0/example".into(),
            mimetype: Some("application/json".into()),
            context: HashMap::from([("caller".to_string(), "tester".to_string())]),
            data: Some("{\"id\": 2}".into()),
        };

        let frames = request.encode();
        assert_eq!(frames.len(), 3);
        assert!(frames[0].starts_with(b"mesh/1 req "));

        let decoded = WireRequest::decode(&frames).unwrap();
        assert_eq!(decoded.address, request.address);
        assert_eq!(decoded.mimetype, request.mimetype);
        assert_eq!(decoded.context, request.context);
        assert_eq!(decoded.data, request.data);
    }

    #[test]
    fn bare_reply_is_a_single_frame() {
        let reply = WireReply::new(Status::NotFound);
        let frames = reply.encode();

        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], b"mesh/1 rep NOT_FOUND none 0 0");

        let decoded = WireReply::decode(&frames).unwrap();
        assert_eq!(decoded.status, Status::NotFound);
        assert!(decoded.data.is_none());
    }

    #[test]
    fn trailing_frame_counts() {
        let header = Header::render("req", "/a/1.0/x", None, 0, 0);
        assert_eq!(trailing_frames(&header).unwrap(), 0);

        let header = Header::render("req", "/a/1.0/x", Some("application/json"), 12, 34);
        assert_eq!(trailing_frames(&header).unwrap(), 2);
    }

    #[test]
    fn malformed_headers_are_rejected() {
        assert!(WireRequest::decode(&[Bytes::from_static(b"mesh/2 req /a 0 0")]).is_err());
        assert!(WireRequest::decode(&[Bytes::from_static(b"garbage")]).is_err());
        assert!(
            WireRequest::decode(&[Bytes::from_static(b"mesh/1 rep /a/1.0/x none 0 0")]).is_err()
        );
    }
}
