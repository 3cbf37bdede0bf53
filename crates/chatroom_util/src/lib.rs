#![forbid(unsafe_code)]

pub mod endpoint {
	use std::net::SocketAddr;

	/// Parsed listen endpoint in the form `ws://host:port` (or bare `host:port`).
	#[derive(Debug, Clone, PartialEq, Eq, Hash)]
	pub struct WsEndpoint {
		pub host: String,
		pub port: u16,
	}

	impl WsEndpoint {
		/// Returns `host:port` (IPv6 stays bracketed).
		pub fn hostport(&self) -> String {
			format!("{}:{}", self.host, self.port)
		}

		/// Convert to `SocketAddr`; DNS names are not resolved here.
		pub fn to_socket_addr(&self) -> Result<SocketAddr, String> {
			self.hostport()
				.parse()
				.map_err(|_| format!("host must be an IP literal: {}", self.host))
		}

		pub fn parse(s: &str) -> Result<Self, String> {
			let s = s.trim();
			if s.is_empty() {
				return Err("endpoint must be non-empty (expected ws://host:port)".to_string());
			}

			let rest = match s.split_once("://") {
				Some(("ws", rest)) => rest,
				Some((scheme, _)) => {
					return Err(format!(
						"unsupported scheme {scheme:?}; TLS is terminated upstream (expected ws://host:port)"
					));
				}
				None => s,
			};

			let rest = rest.strip_suffix('/').unwrap_or(rest);
			if rest.contains(['/', '?', '#']) {
				return Err(format!("endpoint must not carry a path, query or fragment: {s}"));
			}

			let (host, port_str) = rest
				.rsplit_once(':')
				.ok_or_else(|| format!("missing :port in endpoint: {s}"))?;

			let host = host.trim();
			if host.is_empty() {
				return Err(format!("missing host in endpoint: {s}"));
			}
			if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
				return Err(format!("IPv6 hosts must be bracketed like ws://[::1]:9002: {s}"));
			}

			let port = match port_str.trim().parse::<u16>() {
				Ok(0) | Err(_) => return Err(format!("invalid port (expected 1..=65535): {s}")),
				Ok(p) => p,
			};

			Ok(Self {
				host: host.to_string(),
				port,
			})
		}
	}

}
