use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use mesh_core::address::Address;
use mesh_core::error::{ConnectionError, MeshError, RequestError};
use mesh_core::format::{Format, FormatRegistry, Json};
use mesh_core::request::Response;
use mesh_core::status::Status;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::codec::{trailing_frames, WireReply, WireRequest};

/// A client speaking `mesh/1` over a TCP connection per request.
pub struct MsgClient {
    target: String,
    formats: FormatRegistry,
    format: Arc<dyn Format>,
    context: HashMap<String, String>,
}

impl MsgClient {
    pub fn new(target: impl Into<String>) -> MsgClient {
        MsgClient {
            target: target.into(),
            formats: FormatRegistry::standard(),
            format: Arc::new(Json),
            context: HashMap::new(),
        }
    }

    pub fn with_context(mut self, context: HashMap<String, String>) -> MsgClient {
        self.context = context;
        self
    }

    pub fn with_format(mut self, format: Arc<dyn Format>) -> MsgClient {
        self.formats.register(format.clone());
        self.format = format;
        self
    }

    /// Execute an endpoint by address text, raising the declared request
    /// error for any non-OK reply.
    pub async fn execute(
        &self,
        target: &str,
        subject: Option<&str>,
        data: Option<Value>,
        context: Option<HashMap<String, String>>,
    ) -> Result<Response, MeshError> {
        let address = Address::parse(target)
            .map_err(|_| MeshError::Request(RequestError::new(Status::BadRequest)))?;
        let address = match subject {
            Some(subject) => address.with_subject(subject),
            None => address,
        };

        let mut merged = self.context.clone();
        if let Some(context) = context {
            merged.extend(context);
        }

        let mut message = WireRequest {
            address: address.to_string(),
            mimetype: None,
            context: merged,
            data: None,
        };
        if let Some(data) = data {
            message.mimetype = Some(self.format.mimetype().to_string());
            message.data = Some(self.format.serialize(&data)?);
        }

        let reply = self.exchange(&message).await?;

        let mut data = None;
        if let Some(text) = &reply.data {
            let format = reply
                .mimetype
                .as_deref()
                .and_then(|mimetype| self.formats.get(mimetype))
                .unwrap_or_else(|| self.format.clone());
            data = Some(format.unserialize(text)?);
        }

        if reply.status.is_valid() {
            Ok(Response {
                status: Some(reply.status),
                data,
                context: reply.context,
                mimetype: reply.mimetype,
            })
        } else {
            Err(MeshError::Request(RequestError {
                status: reply.status,
                content: data,
            }))
        }
    }

    async fn exchange(&self, message: &WireRequest) -> Result<WireReply, MeshError> {
        let stream = TcpStream::connect(&self.target)
            .await
            .map_err(|error| map_connect_error(&self.target, error))?;
        let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

        for frame in message.encode() {
            framed
                .send(frame)
                .await
                .map_err(|_| connection_failed(&self.target))?;
        }

        let header = match framed.next().await {
            Some(Ok(header)) => Bytes::from(header),
            _ => return Err(connection_failed(&self.target)),
        };

        let mut frames = vec![header];
        let expected =
            trailing_frames(&frames[0]).map_err(|_| connection_failed(&self.target))?;
        for _ in 0..expected {
            match framed.next().await {
                Some(Ok(frame)) => frames.push(Bytes::from(frame)),
                _ => return Err(connection_failed(&self.target)),
            }
        }

        WireReply::decode(&frames).map_err(|_| connection_failed(&self.target))
    }
}

fn connection_failed(target: &str) -> MeshError {
    MeshError::Connection(ConnectionError::Failed(target.to_string()))
}

fn map_connect_error(target: &str, error: std::io::Error) -> MeshError {
    let target = target.to_string();
    match error.kind() {
        std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::PermissionDenied => {
            MeshError::Connection(ConnectionError::Refused(target))
        }
        std::io::ErrorKind::TimedOut => MeshError::Connection(ConnectionError::TimedOut(target)),
        _ => MeshError::Connection(ConnectionError::Failed(target)),
    }
}
