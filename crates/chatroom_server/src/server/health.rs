#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::warn;

use crate::server::rooms::RoomManager;

#[derive(Clone, Default)]
pub struct HealthState {
	ready: Arc<AtomicBool>,
	rooms: Option<RoomManager>,
}

impl HealthState {
	pub fn new() -> Self {
		Self::default()
	}

	/// Serve `/rooms` from this manager.
	pub fn with_rooms(mut self, rooms: RoomManager) -> Self {
		self.rooms = Some(rooms);
		self
	}

	pub fn mark_ready(&self) {
		self.ready.store(true, Ordering::Relaxed);
	}

	pub fn is_ready(&self) -> bool {
		self.ready.load(Ordering::Relaxed)
	}
}

pub fn spawn_health_server(bind: SocketAddr, state: HealthState) {
	tokio::spawn(async move {
		if let Err(err) = run_health_server(bind, state).await {
			warn!(error = %err, "health server stopped");
		}
	});
}

async fn run_health_server(bind: SocketAddr, state: HealthState) -> anyhow::Result<()> {
	let listener = TcpListener::bind(bind).await?;
	loop {
		let (stream, _addr) = listener.accept().await?;
		let io = TokioIo::new(stream);
		let state = state.clone();
		tokio::spawn(async move {
			let service = service_fn(move |req| handle_health(req, state.clone()));
			if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
				warn!(error = %err, "health connection error");
			}
		});
	}
}

fn respond(status: StatusCode, content_type: Option<&'static str>, body: Bytes) -> Response<Full<Bytes>> {
	let mut builder = Response::builder().status(status);
	if let Some(ct) = content_type {
		builder = builder.header(CONTENT_TYPE, ct);
	}
	builder.body(Full::new(body.clone())).unwrap_or_else(|_| {
		let mut resp = Response::new(Full::new(body));
		*resp.status_mut() = status;
		resp
	})
}

async fn handle_health(req: Request<Incoming>, state: HealthState) -> Result<Response<Full<Bytes>>, hyper::Error> {
	if req.method() != Method::GET {
		return Ok(respond(StatusCode::METHOD_NOT_ALLOWED, None, Bytes::new()));
	}

	let resp = match req.uri().path() {
		"/healthz" => respond(StatusCode::OK, None, Bytes::from_static(b"ok")),
		"/readyz" if state.is_ready() => respond(StatusCode::OK, None, Bytes::from_static(b"ready")),
		"/readyz" => respond(StatusCode::SERVICE_UNAVAILABLE, None, Bytes::from_static(b"not-ready")),
		"/rooms" => match &state.rooms {
			Some(rooms) => match serde_json::to_vec(&rooms.stats().await) {
				Ok(body) => respond(StatusCode::OK, Some("application/json"), Bytes::from(body)),
				Err(e) => {
					warn!(error = %e, "failed to encode room stats");
					respond(StatusCode::INTERNAL_SERVER_ERROR, None, Bytes::new())
				}
			},
			None => respond(StatusCode::NOT_FOUND, None, Bytes::new()),
		},
		_ => respond(StatusCode::NOT_FOUND, None, Bytes::new()),
	};
	Ok(resp)
}
