use std::sync::Arc;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use mesh_core::address::Address;
use mesh_core::request::{Request, Response};
use mesh_core::server::{EndpointTable, ServerCore};
use mesh_core::status::Status;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::codec::{trailing_frames, WireReply, WireRequest};

/// The message-framed server: a TCP accept loop dispatching `mesh/1`
/// messages through the shared pipeline.
pub struct MsgServer {
    core: ServerCore,
    endpoints: EndpointTable,
}

impl MsgServer {
    pub fn new(core: ServerCore) -> MsgServer {
        let endpoints = EndpointTable::compile(&core);
        MsgServer { core, endpoints }
    }

    pub fn core(&self) -> &ServerCore {
        &self.core
    }

    /// Dispatch one decoded message, producing the reply to put back on
    /// the wire.
    pub fn dispatch(&self, message: &WireRequest, identity: Option<&str>) -> WireReply {
        let address = match Address::parse(&message.address) {
            Ok(address) => address,
            Err(_) => {
                tracing::info!(address = %message.address, "invalid address");
                return WireReply::new(Status::NotFound);
            }
        };

        let entry = match self.endpoints.get(&address.routing_key()) {
            Some(entry) => entry,
            None => return WireReply::new(Status::NotFound),
        };

        let format = match &message.mimetype {
            Some(mimetype) => match self.core.formats().get(mimetype) {
                Some(format) => Some(format),
                None => return WireReply::new(Status::BadRequest),
            },
            None => None,
        };

        let mut request = Request::new(address).with_context(message.context.clone());
        if let Some(identity) = identity {
            request.identity = Some(identity.to_string());
        }

        if let (Some(format), Some(data)) = (&format, &message.data) {
            match format.unserialize(data) {
                Ok(value) => {
                    request = request.with_mimetype(format.mimetype());
                    request.data = Some(value);
                }
                Err(_) => {
                    tracing::info!(endpoint = %entry.endpoint, "failed to parse message data");
                    return WireReply::new(Status::BadRequest);
                }
            }
        }

        let mut response = Response::new();
        entry.endpoint.process(
            entry.controller.handler.as_ref(),
            &request,
            &mut response,
            self.core.mediators(),
        );

        let serializer = format.unwrap_or_else(|| self.core.default_format().clone());
        let mut reply = WireReply::new(response.status.unwrap_or(Status::ServerError));
        reply.context = response.context;

        if let Some(data) = &response.data {
            match serializer.serialize(data) {
                Ok(text) => {
                    reply.mimetype = Some(serializer.mimetype().to_string());
                    reply.data = Some(text);
                }
                Err(error) => {
                    tracing::error!(%error, "failed to serialize reply");
                    return WireReply::new(Status::ServerError);
                }
            }
        }
        reply
    }

    /// Accept and serve connections until the listener fails.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                server.handle_connection(stream, peer.to_string()).await;
            });
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, peer: String) {
        let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

        while let Some(header) = framed.next().await {
            let header = match header {
                Ok(header) => Bytes::from(header),
                Err(error) => {
                    tracing::info!(%peer, %error, "dropping connection");
                    return;
                }
            };

            let mut frames = vec![header];
            let reply = match trailing_frames(&frames[0]) {
                Ok(expected) => {
                    let mut truncated = false;
                    for _ in 0..expected {
                        match framed.next().await {
                            Some(Ok(frame)) => frames.push(Bytes::from(frame)),
                            _ => {
                                truncated = true;
                                break;
                            }
                        }
                    }

                    if truncated {
                        WireReply::new(Status::BadRequest)
                    } else {
                        match WireRequest::decode(&frames) {
                            Ok(message) => self.dispatch(&message, Some(&peer)),
                            Err(error) => WireReply::new(error.status),
                        }
                    }
                }
                Err(error) => WireReply::new(error.status),
            };

            for frame in reply.encode() {
                if framed.send(frame).await.is_err() {
                    return;
                }
            }
        }
    }
}
