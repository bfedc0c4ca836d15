use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::Router;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use mesh_core::address::AddressParser;
use mesh_core::format::Format;
use mesh_core::request::{Request, Response};
use mesh_core::server::{RouteEntry, ServerCore};
use mesh_core::status::Status;

/// Construction options for an [`HttpServer`].
#[derive(Default, Clone)]
pub struct HttpOptions {
    /// A static path prefix installed in front of every bundle.
    pub prefix: Option<String>,
    /// Header prefix mapped to request/response context entries, e.g.
    /// `"X-Mesh-"`.
    pub context_header_prefix: Option<String>,
}

/// The finalized result of an HTTP dispatch, ready for the wire.
pub struct HttpResult {
    pub status: Status,
    pub body: Option<String>,
    pub mimetype: Option<String>,
    pub context: HashMap<String, String>,
}

impl HttpResult {
    fn bare(status: Status) -> HttpResult {
        HttpResult {
            status,
            body: None,
            mimetype: None,
            context: HashMap::new(),
        }
    }
}

/// The HTTP server adapter.
///
/// Routes are keyed by the prefixed wire path with subject and subsubject
/// rendered as the literal token `id`, paired with the HTTP method.
pub struct HttpServer {
    core: ServerCore,
    prefix: Option<String>,
    parser: AddressParser,
    paths: HashMap<String, HashMap<String, RouteEntry>>,
    context_header_prefix: Option<String>,
}

impl HttpServer {
    pub fn new(core: ServerCore, options: HttpOptions) -> HttpServer {
        let prefix = options
            .prefix
            .map(|prefix| format!("/{}", prefix.trim_matches('/')));

        let base = prefix.as_ref().map(|prefix| {
            mesh_core::Address::default().with_prefix(prefix.clone())
        });

        let mut paths: HashMap<String, HashMap<String, RouteEntry>> = HashMap::new();
        for bundle in core.bundles() {
            for (address, resource, controller) in bundle.enumerate_resources(base.as_ref()) {
                for (endpoint_address, endpoint) in resource.enumerate_endpoints(&address) {
                    let method = match &endpoint.method {
                        Some(method) => method.clone(),
                        None => continue,
                    };
                    // Route signatures carry no !format suffix.
                    let signature =
                        endpoint_address.render_with("pbrsuv", Some("id"), Some("id"));
                    paths.entry(signature).or_default().insert(
                        method,
                        RouteEntry {
                            resource: resource.clone(),
                            controller: controller.clone(),
                            endpoint,
                        },
                    );
                }
            }
        }

        HttpServer {
            parser: AddressParser::new(prefix.as_deref()),
            core,
            prefix,
            paths,
            context_header_prefix: options.context_header_prefix,
        }
    }

    pub fn core(&self) -> &ServerCore {
        &self.core
    }

    pub fn context_header_prefix(&self) -> Option<&str> {
        self.context_header_prefix.as_deref()
    }

    /// True when the path names a bundle root under the prefix; a GET
    /// there is the liveness check.
    fn is_bundle_root(&self, path: &str) -> bool {
        let unprefixed = match &self.prefix {
            Some(prefix) => match path.strip_prefix(prefix.as_str()) {
                Some(rest) => rest,
                None => return false,
            },
            None => path,
        };
        self.core.bundle(unprefixed.trim_matches('/')).is_some()
    }

    /// Dispatch one HTTP exchange through the pipeline.
    pub fn dispatch(
        &self,
        method: &str,
        path: &str,
        mimetype: Option<&str>,
        accept: Option<&str>,
        context: HashMap<String, String>,
        data: Option<String>,
        identity: Option<String>,
    ) -> HttpResult {
        if method == "GET" && self.is_bundle_root(path) {
            return HttpResult::bare(Status::Ok);
        }

        // Inbound format: Content-Type when known, otherwise URL-encoded
        // for GET and the server default for everything else.
        let inbound: Arc<dyn Format> = match mimetype.and_then(|m| self.core.formats().get(m)) {
            Some(format) => format,
            None if method == "GET" => self
                .core
                .formats()
                .get("urlencoded")
                .unwrap_or_else(|| self.core.default_format().clone()),
            None => self.core.default_format().clone(),
        };

        let address = match self.parser.parse(path) {
            Ok(address) => address,
            Err(_) => {
                tracing::info!(path, "no route for path");
                return HttpResult::bare(Status::NotFound);
            }
        };

        // Outbound format: Accept, then the !format suffix, then the
        // inbound mimetype, then the default.
        let outbound: Arc<dyn Format> = accept
            .and_then(|accept| self.core.formats().get(accept))
            .or_else(|| {
                address
                    .format
                    .as_deref()
                    .and_then(|format| self.core.formats().get(format))
            })
            .or_else(|| {
                mimetype
                    .filter(|m| !m.starts_with("application/x-www-form-urlencoded"))
                    .and_then(|m| self.core.formats().get(m))
            })
            .unwrap_or_else(|| self.core.default_format().clone());

        let signature = address.render_with("pbrsuv", Some("id"), Some("id"));
        let entry = match self.paths.get(&signature) {
            Some(methods) => match methods.get(method) {
                Some(entry) => entry,
                None => return HttpResult::bare(Status::MethodNotAllowed),
            },
            None => return HttpResult::bare(Status::NotFound),
        };

        let mut request = Request::new(address)
            .with_context(context)
            .with_mimetype(inbound.mimetype());
        request.identity = identity;

        if let Some(data) = data.filter(|data| !data.is_empty()) {
            match inbound.unserialize(&data) {
                Ok(value) => request.data = Some(value),
                Err(_) => {
                    tracing::info!(endpoint = %entry.endpoint, "failed to parse request data");
                    return HttpResult::bare(Status::BadRequest);
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

        let status = response.status.unwrap_or(Status::ServerError);
        let body = match &response.data {
            Some(data) => match outbound.serialize(data) {
                Ok(body) => Some(body),
                Err(error) => {
                    tracing::error!(%error, "failed to serialize response");
                    return HttpResult::bare(Status::ServerError);
                }
            },
            None => None,
        };

        HttpResult {
            status,
            body,
            mimetype: Some(outbound.mimetype().to_string()),
            context: response.context,
        }
    }

    /// Extract context entries from prefixed request headers.
    fn context_from_headers(&self, headers: &HeaderMap) -> HashMap<String, String> {
        let prefix = match &self.context_header_prefix {
            Some(prefix) => prefix.to_ascii_lowercase(),
            None => return HashMap::new(),
        };

        let mut context = HashMap::new();
        for (name, value) in headers {
            let name = name.as_str();
            if let Some(key) = name.strip_prefix(&prefix) {
                if let Ok(value) = value.to_str() {
                    context.insert(key.to_string(), value.to_string());
                }
            }
        }
        context
    }
}

/// Assemble an axum router dispatching every request through the server.
pub fn router(server: Arc<HttpServer>) -> Router {
    Router::new().fallback(handle).with_state(server)
}

/// Bind and serve until the listener closes.
pub async fn serve(
    server: Arc<HttpServer>,
    listener: tokio::net::TcpListener,
) -> std::io::Result<()> {
    axum::serve(listener, router(server)).await
}

async fn handle(
    State(server): State<Arc<HttpServer>>,
    request: axum::extract::Request,
) -> axum::response::Response {
    let (parts, body) = request.into_parts();

    let method = parts.method.as_str().to_string();
    let path = parts.uri.path().to_string();
    let header = |name: http::header::HeaderName| {
        parts
            .headers
            .get(&name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };

    let mimetype = header(http::header::CONTENT_TYPE);
    let accept = header(http::header::ACCEPT);
    let identity = header(HeaderName::from_static("x-forwarded-for"));
    let context = server.context_from_headers(&parts.headers);

    // GET payloads ride the query string; everything else is the body.
    let data = if method == "GET" {
        parts.uri.query().map(str::to_string)
    } else {
        match axum::body::to_bytes(body, 4 * 1024 * 1024).await {
            Ok(bytes) if !bytes.is_empty() => {
                Some(String::from_utf8_lossy(&bytes).into_owned())
            }
            Ok(_) => None,
            Err(_) => {
                return plain_response(Status::BadRequest);
            }
        }
    };

    let result = server.dispatch(
        &method,
        &path,
        mimetype.as_deref(),
        accept.as_deref(),
        context,
        data,
        identity,
    );

    let mut builder = http::Response::builder()
        .status(result.status.http_code())
        .header(http::header::CACHE_CONTROL, "must-revalidate, no-cache");

    if let Some(mimetype) = &result.mimetype {
        builder = builder.header(http::header::CONTENT_TYPE, mimetype.as_str());
    }

    let context_prefix = server.context_header_prefix().unwrap_or_default();
    for (key, value) in &result.context {
        let name = format!("{context_prefix}{key}");
        if let (Ok(name), Ok(value)) = (
            name.parse::<HeaderName>(),
            value.parse::<HeaderValue>(),
        ) {
            builder = builder.header(name, value);
        }
    }

    builder
        .body(Body::from(result.body.unwrap_or_default()))
        .unwrap_or_else(|_| plain_response(Status::ServerError))
}

fn plain_response(status: Status) -> axum::response::Response {
    http::Response::builder()
        .status(status.http_code())
        .body(Body::empty())
        .expect("static response must build")
}
