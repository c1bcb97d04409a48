//! Reverse-proxy gateway in front of the vendor APIs.
//!
//! Pure pass-through: `/api/{vendor}/{rest}` maps to the configured vendor
//! base URL; the body is streamed through chunk by chunk. The gateway
//! injects the server-held credential when the client sent none, strips
//! `WWW-Authenticate` so the browser never shows a credential prompt, and
//! sets `X-Accel-Buffering: no` so intermediaries do not buffer streamed
//! responses.

use anyhow::{anyhow, Result};
use futures::StreamExt;
use shared::settings::AppSettings;
use std::io::Read;
use std::sync::mpsc;
use tiny_http::{Header, Request, Response, Server, StatusCode};
use url::Url;

/// One vendor route.
#[derive(Debug, Clone)]
pub struct Route {
    /// Path prefix, e.g. `/api/midjourney/`.
    pub prefix: String,
    /// Vendor base URL the rest of the path is appended to.
    pub upstream: String,
    /// `Authorization` value to inject when the client sends none.
    pub auth: Option<String>,
}

/// Build the route table from settings. Vendors without a configured key
/// still get a route; requests to them must then carry their own
/// credential.
pub fn routes_from(settings: &AppSettings) -> Vec<Route> {
    let auth = |key: &str, bearer: bool| {
        if key.is_empty() {
            None
        } else if bearer {
            Some(format!("Bearer {}", key))
        } else {
            Some(key.to_string())
        }
    };
    vec![
        Route {
            prefix: "/api/midjourney/".into(),
            upstream: settings.midjourney.base_url.clone(),
            auth: auth(&settings.midjourney.api_key, false),
        },
        Route {
            prefix: "/api/stability/".into(),
            upstream: settings.stability.base_url.clone(),
            auth: auth(&settings.stability.api_key, true),
        },
        Route {
            prefix: "/api/qwen/".into(),
            upstream: settings.qwen.base_url.clone(),
            auth: auth(&settings.qwen.api_key, true),
        },
        Route {
            prefix: "/api/ernie/".into(),
            upstream: settings.ernie.base_url.clone(),
            auth: auth(&settings.ernie.api_key, true),
        },
    ]
}

/// Longest matching route for a request path, plus the remainder to forward.
fn match_route<'a>(routes: &'a [Route], path: &str) -> Option<(&'a Route, String)> {
    routes
        .iter()
        .filter(|r| path.starts_with(r.prefix.as_str()))
        .max_by_key(|r| r.prefix.len())
        .map(|r| (r, path[r.prefix.len()..].to_string()))
}

fn upstream_url(route: &Route, rest: &str, query: Option<&str>) -> String {
    let mut target = format!("{}/{}", route.upstream.trim_end_matches('/'), rest);
    if let Some(q) = query {
        target.push('?');
        target.push_str(q);
    }
    target
}

/// Response headers to relay downstream.
///
/// `WWW-Authenticate` is dropped to prevent a browser credential prompt;
/// hop-by-hop and length headers are dropped because the gateway re-frames
/// the body; `X-Accel-Buffering: no` disables intermediary buffering.
fn response_headers<'a>(
    upstream: impl Iterator<Item = (&'a str, &'a str)>,
) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = upstream
        .filter(|(name, _)| {
            !matches!(
                name.to_ascii_lowercase().as_str(),
                "www-authenticate" | "transfer-encoding" | "connection" | "content-length"
            )
        })
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect();
    out.push(("X-Accel-Buffering".into(), "no".into()));
    out
}

/// Blocking reader over chunks pumped in from the async byte stream.
struct ChannelReader {
    rx: mpsc::Receiver<Vec<u8>>,
    pending: Vec<u8>,
    pos: usize,
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.pos >= self.pending.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.pending = chunk;
                    self.pos = 0;
                }
                // Sender gone: upstream body finished (or failed mid-way).
                Err(_) => return Ok(0),
            }
        }
        let n = (self.pending.len() - self.pos).min(buf.len());
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

pub struct Gateway {
    routes: Vec<Route>,
    http: reqwest::Client,
}

impl Gateway {
    pub fn new(routes: Vec<Route>) -> Self {
        Self {
            routes,
            http: reqwest::Client::new(),
        }
    }

    /// Serve forever on `addr`. Blocking; run it on a dedicated thread.
    ///
    /// Each request is answered from its own thread: `respond` blocks for
    /// the life of the upstream body, so a long-lived streamed response
    /// must not sit on the accept loop.
    pub fn serve(&self, addr: &str) -> Result<()> {
        let server = Server::http(addr).map_err(|e| anyhow!("gateway bind failed: {}", e))?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()?;
        tracing::info!(addr, "gateway listening");

        for request in server.incoming_requests() {
            let routes = self.routes.clone();
            let http = self.http.clone();
            let handle = runtime.handle().clone();
            std::thread::spawn(move || {
                if let Err(e) = handle_request(&routes, &http, &handle, request) {
                    tracing::warn!(error = %e, "gateway request failed");
                }
            });
        }
        Ok(())
    }
}

fn handle_request(
    routes: &[Route],
    http: &reqwest::Client,
    runtime: &tokio::runtime::Handle,
    mut request: Request,
) -> Result<()> {
    // tiny_http hands us path?query in one string.
    let raw = format!("http://gateway.invalid{}", request.url());
    let parsed = Url::parse(&raw)?;
    let path = parsed.path().to_string();
    let query = parsed.query().map(|q| q.to_string());

    let Some((route, rest)) = match_route(routes, &path) else {
        let body = serde_json::json!({"error": true, "message": "unknown route"});
        return Ok(request.respond(json_response(404, &body))?);
    };
    let route = route.clone();

    let client_auth = request
        .headers()
        .iter()
        .find(|h| h.field.equiv("Authorization"))
        .map(|h| h.value.to_string());
    let content_type = request
        .headers()
        .iter()
        .find(|h| h.field.equiv("Content-Type"))
        .map(|h| h.value.to_string());

    // Client credential wins; the configured key only fills the gap.
    let auth = match client_auth.or(route.auth.clone()) {
        Some(a) => a,
        None => {
            let body = serde_json::json!({
                "error": true,
                "message": "missing api key for this vendor",
            });
            return Ok(request.respond(json_response(401, &body))?);
        }
    };

    let method = reqwest::Method::from_bytes(request.method().as_str().as_bytes())?;
    let mut body = Vec::new();
    request.as_reader().read_to_end(&mut body)?;

    let target = upstream_url(&route, &rest, query.as_deref());
    tracing::debug!(%target, "forwarding");

    let mut builder = http
        .request(method, &target)
        .header("Authorization", auth)
        .header("Cache-Control", "no-store")
        .body(body);
    if let Some(ct) = content_type {
        builder = builder.header("Content-Type", ct);
    }

    let upstream = runtime.block_on(builder.send())?;
    let status = upstream.status().as_u16();

    let header_pairs: Vec<(String, String)> = upstream
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    let headers: Vec<Header> =
        response_headers(header_pairs.iter().map(|(n, v)| (n.as_str(), v.as_str())))
            .into_iter()
            .filter_map(|(name, value)| {
                Header::from_bytes(name.as_bytes(), value.as_bytes()).ok()
            })
            .collect();

    // Pump the upstream body into a channel so tiny_http can stream it
    // out without assembling it in memory.
    let (tx, rx) = mpsc::sync_channel::<Vec<u8>>(8);
    runtime.spawn(async move {
        let mut stream = upstream.bytes_stream();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => {
                    if tx.send(bytes.to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "upstream stream ended early");
                    break;
                }
            }
        }
    });

    let reader = ChannelReader {
        rx,
        pending: Vec::new(),
        pos: 0,
    };
    let response = Response::new(StatusCode(status), headers, reader, None, None);
    request.respond(response)?;
    Ok(())
}

fn json_response(status: u16, body: &serde_json::Value) -> Response<std::io::Cursor<Vec<u8>>> {
    let mut response = Response::from_data(body.to_string().into_bytes())
        .with_status_code(StatusCode(status));
    if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]) {
        response = response.with_header(header);
    }
    response
}
