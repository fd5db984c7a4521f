//! HTTP pull connection to the raw PCM feed.
//!
//! One long-lived GET per session. The body is read as-is (s16le, no framing); the read
//! timeout bounds every socket read so the puller notices stop requests.

use std::io::Read;
use std::time::Duration;

use pcm_pipeline::{ConnectError, StreamConnector};

pub const USER_AGENT: &str = concat!("radio/", env!("CARGO_PKG_VERSION"));

pub struct HttpPcmConnector {
    agent: ureq::Agent,
    url: String,
}

impl HttpPcmConnector {
    pub fn new(url: impl Into<String>, connect_timeout: Duration, read_timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(connect_timeout)
            .timeout_read(read_timeout)
            .user_agent(USER_AGENT)
            .build();
        Self {
            agent,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl StreamConnector for HttpPcmConnector {
    type Stream = Box<dyn Read + Send + Sync + 'static>;

    fn connect(&mut self) -> Result<Self::Stream, ConnectError> {
        tracing::debug!(url = %self.url, "connecting to stream");
        let resp = self.agent.get(&self.url).call().map_err(map_error)?;
        if resp.status() != 200 {
            return Err(ConnectError::Status(resp.status()));
        }
        tracing::info!(
            url = %self.url,
            content_type = resp.header("Content-Type").unwrap_or("-"),
            icy_name = resp.header("icy-name").unwrap_or("-"),
            "stream response"
        );
        Ok(resp.into_reader())
    }
}

fn map_error(err: ureq::Error) -> ConnectError {
    match err {
        ureq::Error::Status(code, _) => ConnectError::Status(code),
        ureq::Error::Transport(transport) => ConnectError::Transport(transport.to_string()),
    }
}
