//! Log messages from managed apps over a loopback TCP socket.
//!
//! Each line is one JSON envelope:
//! `{"app_name": ..., "type": "log", "payload": {"logger": ..., "levelname": ..., "message": ...}}`.

use crate::error::Result;
use crate::logfilter::LogFilters;
use crate::logging::{LoggerTree, parse_level};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpListener;
use tracing::{Level, debug, warn};

/// Envelope type carrying a log record.
pub const LOG_MESSAGE_TYPE: &str = "log";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
	pub app_name: String,
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(default)]
	pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogPayload {
	#[serde(default)]
	pub logger: String,
	#[serde(default)]
	pub levelname: String,
	#[serde(default)]
	pub message: String,
}

impl Envelope {
	pub fn log(app_name: impl Into<String>, payload: LogPayload) -> Self {
		Envelope {
			app_name: app_name.into(),
			kind: LOG_MESSAGE_TYPE.to_string(),
			payload: serde_json::to_value(payload).unwrap_or_default(),
		}
	}

	/// The log payload, when this is a log envelope with a well-formed one.
	pub fn log_payload(&self) -> Option<LogPayload> {
		if self.kind != LOG_MESSAGE_TYPE {
			return None;
		}
		serde_json::from_value(self.payload.clone()).ok()
	}
}

/// Receiver of decoded envelopes.
pub trait MessageHandler: Send + Sync {
	fn handle(&self, envelope: Envelope);
}

/// A log record after filtering, ready to be emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedLog {
	pub logger: String,
	pub level: Level,
	pub message: String,
}

/// Runs log envelopes through the filters and emits them on the logger tree.
#[derive(Debug, Clone)]
pub struct LogRouter {
	filters: LogFilters,
	loggers: LoggerTree,
}

impl LogRouter {
	pub fn new(filters: LogFilters, loggers: LoggerTree) -> Self {
		LogRouter { filters, loggers }
	}

	/// Filter a log envelope.
	///
	/// Returns `None` for non-log envelopes and suppressed messages. The
	/// logger falls back to the app name when the payload names none.
	pub fn route(&self, envelope: &Envelope) -> Result<Option<RoutedLog>> {
		let Some(payload) = envelope.log_payload() else {
			return Ok(None);
		};
		let Some(message) = self.filters.apply(&envelope.app_name, &payload.message)? else {
			return Ok(None);
		};
		let logger = if payload.logger.is_empty() {
			envelope.app_name.clone()
		} else {
			payload.logger
		};
		Ok(Some(RoutedLog {
			logger,
			level: parse_level(&payload.levelname).unwrap_or(Level::INFO),
			message,
		}))
	}

	/// Emit a routed record; returns whether its logger level let it through.
	pub fn emit(&self, log: &RoutedLog) -> bool {
		self.loggers.emit(&log.logger, log.level, &log.message)
	}

	pub fn loggers(&self) -> &LoggerTree {
		&self.loggers
	}
}

impl MessageHandler for LogRouter {
	fn handle(&self, envelope: Envelope) {
		match self.route(&envelope) {
			Ok(Some(log)) => {
				self.emit(&log);
			}
			Ok(None) => {}
			Err(e) => warn!(app = %envelope.app_name, "Failed to filter log message: {}", e),
		}
	}
}

/// Decode one line; malformed lines are logged and skipped.
pub fn decode_line(line: &str) -> Option<Envelope> {
	let line = line.trim();
	if line.is_empty() {
		return None;
	}
	match serde_json::from_str(line) {
		Ok(envelope) => Some(envelope),
		Err(e) => {
			warn!("Skipping malformed message: {}", e);
			None
		}
	}
}

/// Feed every line of `reader` to `handler` until EOF.
pub async fn read_messages<R>(reader: R, handler: &dyn MessageHandler) -> std::io::Result<()>
where
	R: AsyncRead + Unpin,
{
	let mut lines = BufReader::new(reader).lines();
	while let Some(line) = lines.next_line().await? {
		if let Some(envelope) = decode_line(&line) {
			handler.handle(envelope);
		}
	}
	Ok(())
}

/// A listening message socket.
#[derive(Debug)]
pub struct MessageChannel {
	listener: TcpListener,
	addr: SocketAddr,
}

impl MessageChannel {
	/// Listen on an ephemeral loopback port.
	pub async fn bind() -> Result<Self> {
		Self::bind_to(SocketAddr::from(([127, 0, 0, 1], 0))).await
	}

	pub async fn bind_to(addr: SocketAddr) -> Result<Self> {
		let listener = TcpListener::bind(addr).await?;
		let addr = listener.local_addr()?;
		debug!(%addr, "message channel listening");
		Ok(MessageChannel { listener, addr })
	}

	pub fn port(&self) -> u16 {
		self.addr.port()
	}

	pub fn local_addr(&self) -> SocketAddr {
		self.addr
	}

	/// Accept connections forever, one task per connection.
	pub async fn serve(self, handler: Arc<dyn MessageHandler>) -> Result<()> {
		loop {
			let (stream, peer) = self.listener.accept().await?;
			let handler = handler.clone();
			tokio::spawn(async move {
				debug!(%peer, "message connection opened");
				if let Err(e) = read_messages(stream, handler.as_ref()).await {
					warn!(%peer, "Message connection failed: {}", e);
				}
				debug!(%peer, "message connection closed");
			});
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::{ConfigValue, RawValue};
	use crate::template::{FunctionRegistry, Namespace};
	use crate::variables::VariablesNamespace;
	use std::sync::Mutex;
	use tokio::io::AsyncWriteExt;

	#[derive(Default)]
	struct Recorder {
		envelopes: Mutex<Vec<Envelope>>,
	}

	impl MessageHandler for Recorder {
		fn handle(&self, envelope: Envelope) {
			self.envelopes.lock().unwrap().push(envelope);
		}
	}

	fn router(content: &str) -> LogRouter {
		let raw = RawValue::from(toml::Value::Table(toml::from_str(content).unwrap()));
		let namespace = Namespace::new(Default::default(), VariablesNamespace::default(), FunctionRegistry::builtin());
		let filters = LogFilters::compile(&ConfigValue::create(&raw, &namespace)).unwrap();
		LogRouter::new(filters, LoggerTree::builder(Level::INFO).child("web", None).build())
	}

	fn log(app: &str, logger: &str, levelname: &str, message: &str) -> Envelope {
		Envelope::log(
			app,
			LogPayload {
				logger: logger.to_string(),
				levelname: levelname.to_string(),
				message: message.to_string(),
			},
		)
	}

	#[test]
	fn test_envelope_wire_format() {
		let line = r#"{"app_name": "web", "type": "log", "payload": {"logger": "web.access", "levelname": "WARNING", "message": "slow"}}"#;
		let envelope = decode_line(line).unwrap();
		assert_eq!(envelope, log("web", "web.access", "WARNING", "slow"));

		let encoded = serde_json::to_value(&envelope).unwrap();
		assert_eq!(encoded["type"], "log");
	}

	#[test]
	fn test_decode_skips_malformed_and_blank_lines() {
		assert!(decode_line("").is_none());
		assert!(decode_line("not json").is_none());
		assert!(decode_line(r#"{"type": "log"}"#).is_none());
	}

	#[test]
	fn test_route_applies_filters() {
		let router = router(
			r#"
[logger]
suppress_regex = ["^DEBUG"]
replace_regex = [{ from = "^Hello, (.*)$", to = "Hi, \\1" }]

[app.web.logger]
suppress_regex = ["healthz"]
"#,
		);

		let routed = router.route(&log("web", "", "warning", "Hello, foo")).unwrap().unwrap();
		assert_eq!(
			routed,
			RoutedLog {
				logger: "web".to_string(),
				level: Level::WARN,
				message: "Hi, foo".to_string(),
			}
		);

		assert_eq!(router.route(&log("web", "web", "info", "GET /healthz")).unwrap(), None);
		assert_eq!(router.route(&log("other", "x", "info", "DEBUG stuff")).unwrap(), None);
		assert!(router.route(&log("other", "x", "info", "GET /healthz")).unwrap().is_some());
	}

	#[test]
	fn test_route_ignores_other_envelopes() {
		let router = router("");
		let envelope = Envelope {
			app_name: "web".to_string(),
			kind: "status".to_string(),
			payload: serde_json::json!({"message": "ignored"}),
		};
		assert_eq!(router.route(&envelope).unwrap(), None);
	}

	#[test]
	fn test_route_unknown_level_defaults_to_info() {
		let routed = router("").route(&log("web", "web", "verbose", "hi")).unwrap().unwrap();
		assert_eq!(routed.level, Level::INFO);
	}

	#[tokio::test]
	async fn test_serve_delivers_lines_in_order() {
		let channel = MessageChannel::bind().await.unwrap();
		let addr = channel.local_addr();
		assert_ne!(channel.port(), 0);

		let recorder = Arc::new(Recorder::default());
		let server = tokio::spawn(channel.serve(recorder.clone()));

		let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
		let first = serde_json::to_string(&log("web", "", "info", "one")).unwrap();
		let second = serde_json::to_string(&log("web", "", "info", "two")).unwrap();
		stream
			.write_all(format!("{first}\n{{broken\n{second}\n").as_bytes())
			.await
			.unwrap();
		stream.shutdown().await.unwrap();

		tokio::time::timeout(std::time::Duration::from_secs(5), async {
			while recorder.envelopes.lock().unwrap().len() < 2 {
				tokio::time::sleep(std::time::Duration::from_millis(10)).await;
			}
		})
		.await
		.unwrap();

		let messages: Vec<_> = recorder
			.envelopes
			.lock()
			.unwrap()
			.iter()
			.map(|e| e.log_payload().unwrap().message)
			.collect();
		assert_eq!(messages, vec!["one", "two"]);
		server.abort();
	}
}
