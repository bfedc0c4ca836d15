use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use mesh_core::address::Address;
use mesh_core::client::ClientHandle;
use mesh_core::error::{ConnectionError, MeshError, RequestError};
use mesh_core::format::{Format, FormatRegistry, Json, UrlEncoded};
use mesh_core::request::Response;
use mesh_core::schema::Phase;
use mesh_core::specification::{Specification, SpecEndpoint};
use mesh_core::status::Status;
use serde_json::Value;

/// A prepared HTTP exchange: everything needed to put the request on the
/// wire.
struct Prepared {
    endpoint: Arc<SpecEndpoint>,
    method: String,
    url: String,
    mimetype: Option<String>,
    body: Option<String>,
    headers: HashMap<String, String>,
}

/// An HTTP client over a bundle specification.
pub struct HttpClient {
    url: String,
    http: reqwest::Client,
    specification: Arc<Specification>,
    formats: FormatRegistry,
    format: Arc<dyn Format>,
    context: HashMap<String, String>,
    context_header_prefix: Option<String>,
}

impl HttpClient {
    pub fn new(url: &str, specification: Arc<Specification>) -> HttpClient {
        let url = if url.contains("//") {
            url.to_string()
        } else {
            format!("http://{url}")
        };

        HttpClient {
            url: url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            specification,
            formats: FormatRegistry::standard(),
            format: Arc::new(Json),
            context: HashMap::new(),
            context_header_prefix: None,
        }
    }

    /// Apply a request timeout; timeouts surface as TIMEOUT responses.
    pub fn with_timeout(mut self, timeout: Duration) -> HttpClient {
        self.http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        self
    }

    /// Context entries sent with every request.
    pub fn with_context(mut self, context: HashMap<String, String>) -> HttpClient {
        self.context = context;
        self
    }

    pub fn with_format(mut self, format: Arc<dyn Format>) -> HttpClient {
        self.formats.register(format.clone());
        self.format = format;
        self
    }

    pub fn with_context_header_prefix(mut self, prefix: impl Into<String>) -> HttpClient {
        self.context_header_prefix = Some(prefix.into());
        self
    }

    /// Execute an endpoint by address text, deserializing the response
    /// through its declared schema and raising the declared error for any
    /// non-OK status.
    pub async fn execute(
        &self,
        target: &str,
        subject: Option<&str>,
        data: Option<Value>,
        context: Option<HashMap<String, String>>,
    ) -> Result<Response, MeshError> {
        let prepared = self.prepare(target, subject, data, context)?;

        let method: reqwest::Method = prepared
            .method
            .parse()
            .map_err(|_| MeshError::internal(format!("invalid method {:?}", prepared.method)))?;

        let mut builder = self.http.request(method, &prepared.url);
        for (name, value) in &prepared.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(mimetype) = &prepared.mimetype {
            builder = builder.header("Content-Type", mimetype.as_str());
        }
        if let Some(body) = prepared.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(map_transport_error)?;
        let status = Status::from_http_code(response.status().as_u16()).ok_or_else(|| {
            MeshError::internal(format!("server returned unknown status {}", response.status()))
        })?;
        let mimetype = response
            .headers()
            .get("Content-Type")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let text = response.text().await.map_err(map_transport_error)?;

        let definition = prepared.endpoint.endpoint.responses.get(&status);
        if definition.is_none() && !(status.is_error() && text.is_empty()) {
            return Err(RequestError::construct(status, None)
                .map(MeshError::Request)
                .unwrap_or_else(|| {
                    MeshError::internal(format!("server returned undeclared status {status}"))
                }));
        }

        let mut data = None;
        if !text.is_empty() {
            let format = mimetype
                .as_deref()
                .and_then(|mimetype| self.formats.get(mimetype))
                .unwrap_or_else(|| self.format.clone());
            let value = format.unserialize(&text)?;
            data = match definition.and_then(|definition| definition.schema.as_ref()) {
                Some(schema) => Some(schema.process(&value, Phase::Inbound, true)?),
                None => Some(value),
            };
        }

        if status.is_valid() {
            Ok(Response {
                status: Some(status),
                data,
                context: HashMap::new(),
                mimetype,
            })
        } else {
            Err(MeshError::Request(RequestError {
                status,
                content: data,
            }))
        }
    }

    fn prepare(
        &self,
        target: &str,
        subject: Option<&str>,
        data: Option<Value>,
        context: Option<HashMap<String, String>>,
    ) -> Result<Prepared, MeshError> {
        let requested = Address::parse(target)
            .map_err(|_| MeshError::Request(RequestError::new(Status::BadRequest)))?;

        let endpoint = match self
            .specification
            .find(&requested)
            .map_err(|_| MeshError::Request(RequestError::new(Status::NotFound)))?
            .endpoint()
        {
            Some(endpoint) => endpoint.clone(),
            None => return Err(MeshError::Request(RequestError::new(Status::NotFound))),
        };

        // The wire address is the endpoint's declared one; only the
        // subject comes from the caller.
        let mut address = match &endpoint.address {
            Some(declared) => Address::parse(declared)
                .map_err(|_| MeshError::internal("endpoint declares an unparseable address"))?,
            None => requested.clone(),
        };
        match subject.or_else(|| requested.subject.as_ref().and_then(|s| s.value())) {
            Some(subject) => address = address.with_subject(subject),
            None => address.subject = None,
        }

        let mut headers = HashMap::new();
        let prefix = self.context_header_prefix.clone().unwrap_or_default();
        let mut merged = self.context.clone();
        if let Some(context) = context {
            merged.extend(context);
        }
        for (key, value) in merged {
            headers.insert(format!("{prefix}{key}"), value);
        }

        let method = endpoint
            .endpoint
            .method
            .clone()
            .unwrap_or_else(|| "POST".to_string());

        let mut path = address.prefixed_path();
        let mut body = None;
        let mut mimetype = None;

        if let Some(data) = data {
            let processed = match &endpoint.endpoint.schema {
                Some(schema) => schema.process(&data, Phase::Outbound, true)?,
                None => data,
            };
            if method == "GET" {
                let query = UrlEncoded.serialize(&processed)?;
                if !query.is_empty() {
                    path = format!("{path}?{query}");
                }
            } else {
                body = Some(self.format.serialize(&processed)?);
                mimetype = Some(self.format.mimetype().to_string());
            }
        }

        Ok(Prepared {
            endpoint,
            method,
            url: format!("{}{}", self.url, path),
            mimetype,
            body,
            headers,
        })
    }
}

impl ClientHandle for HttpClient {
    fn name(&self) -> &str {
        &self.specification.name
    }

    fn specification(&self) -> Arc<Specification> {
        self.specification.clone()
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Map connection-level failures onto the client error taxonomy; read
/// timeouts surface as TIMEOUT.
fn map_transport_error(error: reqwest::Error) -> MeshError {
    let target = error
        .url()
        .map(|url| url.to_string())
        .unwrap_or_else(|| "request".to_string());

    if error.is_timeout() {
        MeshError::Request(RequestError::new(Status::Timeout))
    } else if error.is_connect() {
        MeshError::Connection(ConnectionError::Refused(target))
    } else {
        MeshError::Connection(ConnectionError::Failed(target))
    }
}
