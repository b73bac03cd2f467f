//! Pull mode: periodic check-in with the management server
//!
//! Each check-in delivers the results gathered since the last successful
//! one and receives new jobs. Results stay queued until a check-in is
//! acknowledged, so a server outage loses nothing.

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use bulwark_core::{CommandResponse, Parameters};

use crate::bridge::Bridge;
use crate::config::{AgentSession, PullSettings};
use crate::error::{AgentError, Result};

/// Outcome of one job, as reported back to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub command_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResult {
    pub fn from_response(command_id: String, response: CommandResponse) -> Self {
        match response.into_result() {
            Ok(output) => Self {
                command_id,
                success: true,
                output: Some(output),
                error: None,
            },
            Err(message) => Self::failed(command_id, message),
        }
    }

    pub fn failed(command_id: String, message: impl Into<String>) -> Self {
        Self {
            command_id,
            success: false,
            output: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Serialize)]
struct CheckinRequest<'a> {
    agent_id: &'a str,
    api_key: &'a str,
    status: &'a str,
    command_results: &'a [CommandResult],
}

/// A job handed out by the server
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Job {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub module: String,
    pub action: String,
    #[serde(default)]
    pub params: Parameters,
}

/// The server's answer to a check-in
#[derive(Debug, Default, Deserialize)]
pub struct CheckinResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub commands: Vec<Job>,
    #[serde(default)]
    pub sync_interval: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

/// The remote end of pull mode
#[async_trait]
pub trait JobServer: Send + Sync {
    async fn checkin(
        &self,
        settings: &PullSettings,
        results: &[CommandResult],
    ) -> Result<CheckinResponse>;
}

/// Management server reached over HTTP(S)
pub struct HttpJobServer {
    client: reqwest::Client,
}

impl HttpJobServer {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("bulwark-agent/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl JobServer for HttpJobServer {
    async fn checkin(
        &self,
        settings: &PullSettings,
        results: &[CommandResult],
    ) -> Result<CheckinResponse> {
        let body = CheckinRequest {
            agent_id: &settings.agent_id,
            api_key: &settings.api_key,
            status: "online",
            command_results: results,
        };

        let response = self
            .client
            .post(settings.checkin_url())
            .header("X-API-Key", &settings.api_key)
            .timeout(settings.http_timeout)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AgentError::Server {
                status: status.as_u16(),
                message: clip(message, MAX_ERROR_BODY),
            });
        }

        let reply: CheckinResponse = response.json().await?;
        if !reply.success {
            return Err(AgentError::Server {
                status: status.as_u16(),
                message: reply
                    .error
                    .unwrap_or_else(|| "check-in rejected".to_string()),
            });
        }
        Ok(reply)
    }
}

/// Longest server error body kept in an error message
const MAX_ERROR_BODY: usize = 512;

/// Shorten `text` to at most `max` bytes without splitting a character
fn clip(mut text: String, max: usize) -> String {
    if text.len() > max {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}

/// Consecutive-failure counter producing capped exponential delays
#[derive(Debug, Default)]
pub struct Backoff {
    failures: u32,
}

impl Backoff {
    /// Record a failure and return how long to wait before retrying
    pub fn next_delay(&mut self, base: Duration, max: Duration) -> Duration {
        let exponent = self.failures.min(16);
        self.failures = self.failures.saturating_add(1);
        base.saturating_mul(1u32 << exponent).min(max)
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

/// Pull-mode state machine
pub struct PullAgent<S> {
    bridge: Bridge,
    server: S,
    session: watch::Receiver<AgentSession>,
    settings: PullSettings,
    server_interval: Option<Duration>,
    pending: Vec<CommandResult>,
    backoff: Backoff,
}

impl<S: JobServer> PullAgent<S> {
    pub fn new(
        bridge: Bridge,
        server: S,
        settings: PullSettings,
        session: watch::Receiver<AgentSession>,
    ) -> Self {
        Self {
            bridge,
            server,
            session,
            settings,
            server_interval: None,
            pending: Vec::new(),
            backoff: Backoff::default(),
        }
    }

    /// Results not yet acknowledged by the server
    pub fn pending(&self) -> &[CommandResult] {
        &self.pending
    }

    /// Pick up settings published by a configuration reload
    fn refresh_settings(&mut self) {
        if !self.session.has_changed().unwrap_or(false) {
            return;
        }
        match &*self.session.borrow_and_update() {
            AgentSession::Pull(settings) => {
                info!("Pull settings reloaded");
                self.settings = settings.clone();
            }
            other => warn!(
                "Configuration now selects {} mode; restart the agent to switch",
                other.mode()
            ),
        }
    }

    /// Loop until `stop` becomes true
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) -> Result<()> {
        info!("Running in PULL mode against {}", self.settings.server_url);

        loop {
            if *stop.borrow() {
                break;
            }
            self.refresh_settings();

            let delay = match self.poll_once().await {
                Ok(interval) => {
                    self.backoff.reset();
                    interval
                }
                Err(e) => {
                    let delay = self
                        .backoff
                        .next_delay(self.settings.poll_interval, self.settings.max_backoff);
                    warn!(
                        "Check-in failed ({} in a row): {}; retrying in {:?}",
                        self.backoff.failures(),
                        e,
                        delay
                    );
                    delay
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stop.changed() => {}
            }
        }

        info!(
            "Pull loop stopped ({} result(s) awaiting delivery)",
            self.pending.len()
        );
        Ok(())
    }

    /// One check-in plus execution of whatever it returned
    ///
    /// Returns the interval to wait before the next check-in.
    pub async fn poll_once(&mut self) -> Result<Duration> {
        let reply = self.server.checkin(&self.settings, &self.pending).await?;
        if !self.pending.is_empty() {
            debug!("Delivered {} result(s)", self.pending.len());
            self.pending.clear();
        }

        if let Some(secs) = reply.sync_interval.filter(|s| *s > 0) {
            let interval = Duration::from_secs(secs);
            if self.server_interval != Some(interval) {
                info!("Server set poll interval to {}s", secs);
                self.server_interval = Some(interval);
            }
        }

        for job in reply.commands {
            info!("Executing command {}: {}/{}", job.id, job.module, job.action);
            let result = match self
                .bridge
                .dispatch_one(&job.module, &job.action, job.params)
                .await
            {
                Ok(response) => CommandResult::from_response(job.id, response),
                Err(e) => CommandResult::failed(job.id, e.to_string()),
            };
            self.pending.push(result);
        }

        Ok(self.server_interval.unwrap_or(self.settings.poll_interval))
    }
}
