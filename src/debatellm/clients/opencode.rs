//! [`AgentRuntime`] over an OpenCode-compatible HTTP server.
//!
//! Endpoints used:
//!
//! | Operation          | Request                                  |
//! |--------------------|------------------------------------------|
//! | create session     | `POST /session[?directory=..]`           |
//! | send prompt        | `POST /session/{id}/prompt_async`        |
//! | session status     | `GET /session/status`                    |
//! | messages           | `GET /session/{id}/message`              |
//! | activity feed      | `GET /event` (Server-Sent Events)        |
//! | providers          | `GET /provider`                          |
//!
//! Use [`OpencodeRuntime::connect`] to attach to a server that is already
//! running, or [`OpencodeRuntime::launch`] to spawn `opencode serve` as a
//! child process that is killed again by [`AgentRuntime::shutdown`].
//!
//! ```rust,no_run
//! use debatellm::clients::opencode::OpencodeRuntime;
//! use debatellm::runtime::AgentRuntime;
//!
//! # async {
//! let runtime = OpencodeRuntime::launch(4096, None).await.unwrap();
//! let providers = runtime.list_providers().await.unwrap();
//! println!("connected providers: {:?}", providers.connected);
//! runtime.shutdown().await.unwrap();
//! # };
//! ```

use crate::debatellm::runtime::{
    AgentRuntime, ProviderListing, PromptRequest, RuntimeError, RuntimeEvent, RuntimeEventStream,
    SessionHandle, SessionOptions, SessionStatus, EXPLORATION_TOOLS,
};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

/// Port `opencode serve` listens on by default.
pub const DEFAULT_OPENCODE_PORT: u16 = 4096;

/// Bound on every request except the long-lived event feed.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How long [`OpencodeRuntime::launch`] waits for the server to answer.
const LAUNCH_TIMEOUT: Duration = Duration::from_secs(30);
const LAUNCH_POLL: Duration = Duration::from_millis(250);

/// Failures specific to the OpenCode client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpencodeError {
    /// The server answered with a non-success status.
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },
    /// `opencode serve` could not be started.
    Launch(String),
    /// A launched server never became reachable.
    NotReady { url: String, waited: Duration },
}

impl fmt::Display for OpencodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpencodeError::Status {
                endpoint,
                status,
                body,
            } => write!(f, "OpenCode {} returned status {}: {}", endpoint, status, body),
            OpencodeError::Launch(msg) => write!(f, "Failed to launch opencode: {}", msg),
            OpencodeError::NotReady { url, waited } => write!(
                f,
                "OpenCode server at {} not ready after {}s",
                url,
                waited.as_secs()
            ),
        }
    }
}

impl Error for OpencodeError {}

/// HTTP client for an OpenCode server.
pub struct OpencodeRuntime {
    base_url: String,
    client: reqwest::Client,
    server: Mutex<Option<Child>>,
}

impl OpencodeRuntime {
    /// Attach to a server that is already running at `base_url`.
    pub fn connect(base_url: impl Into<String>) -> Result<Self, RuntimeError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            server: Mutex::new(None),
        })
    }

    /// Spawn `opencode serve` on `port` and wait until it answers.
    pub async fn launch(port: u16, directory: Option<&Path>) -> Result<Self, RuntimeError> {
        let mut command = Command::new("opencode");
        command
            .arg("serve")
            .arg("--port")
            .arg(port.to_string())
            .arg("--hostname")
            .arg("127.0.0.1")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = directory {
            command.current_dir(dir);
        }

        let child = command
            .spawn()
            .map_err(|e| OpencodeError::Launch(e.to_string()))?;
        log::info!("Launched opencode server on port {}", port);

        let runtime = Self::connect(format!("http://127.0.0.1:{}", port))?;
        *runtime.server.lock().await = Some(child);

        if let Err(e) = runtime.wait_until_ready(LAUNCH_TIMEOUT).await {
            let _ = runtime.shutdown().await;
            return Err(e);
        }
        Ok(runtime)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn wait_until_ready(&self, limit: Duration) -> Result<(), RuntimeError> {
        let start = tokio::time::Instant::now();
        while start.elapsed() < limit {
            let probe = self
                .client
                .get(self.url("/provider"))
                .timeout(LAUNCH_POLL * 4)
                .send()
                .await;
            if matches!(probe, Ok(ref r) if r.status().is_success()) {
                log::debug!("OpenCode server ready after {:?}", start.elapsed());
                return Ok(());
            }
            tokio::time::sleep(LAUNCH_POLL).await;
        }
        Err(Box::new(OpencodeError::NotReady {
            url: self.base_url.clone(),
            waited: limit,
        }))
    }

    async fn check(endpoint: &str, response: reqwest::Response) -> Result<reqwest::Response, RuntimeError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(Box::new(OpencodeError::Status {
            endpoint: endpoint.to_string(),
            status,
            body,
        }))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, RuntimeError> {
        let response = self
            .client
            .get(self.url(path))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        let response = Self::check(path, response).await?;
        Ok(response.json().await?)
    }
}

/// Request body for `POST /session`.
pub fn session_body(title: &str, enable_tools: bool) -> Value {
    let mut body = json!({ "title": title });
    if enable_tools {
        let rules: Vec<Value> = EXPLORATION_TOOLS
            .iter()
            .map(|tool| json!({"permission": tool, "pattern": "*", "action": "allow"}))
            .collect();
        body["permission"] = Value::Array(rules);
    }
    body
}

/// Request body for `POST /session/{id}/prompt_async`.
pub fn prompt_body(request: &PromptRequest) -> Value {
    let mut body = json!({
        "model": request.model,
        "system": request.system,
        "parts": [{"type": "text", "text": request.text}],
    });
    if request.enable_tools {
        let tools: serde_json::Map<String, Value> = EXPLORATION_TOOLS
            .iter()
            .map(|tool| (tool.to_string(), Value::Bool(true)))
            .collect();
        body["tools"] = Value::Object(tools);
    }
    body
}

#[async_trait]
impl AgentRuntime for OpencodeRuntime {
    async fn create_session(
        &self,
        title: &str,
        options: &SessionOptions,
    ) -> Result<SessionHandle, RuntimeError> {
        let mut request = self
            .client
            .post(self.url("/session"))
            .timeout(REQUEST_TIMEOUT)
            .json(&session_body(title, options.enable_tools));
        if let Some(dir) = &options.directory {
            let dir = dir.to_string_lossy().into_owned();
            request = request.query(&[("directory", dir)]);
        }

        let response = Self::check("/session", request.send().await?).await?;
        Ok(response.json().await?)
    }

    async fn send_prompt(&self, request: &PromptRequest) -> Result<(), RuntimeError> {
        let path = format!("/session/{}/prompt_async", request.session_id);
        let response = self
            .client
            .post(self.url(&path))
            .timeout(REQUEST_TIMEOUT)
            .json(&prompt_body(request))
            .send()
            .await?;
        Self::check(&path, response).await?;
        Ok(())
    }

    async fn session_status(&self) -> Result<HashMap<String, SessionStatus>, RuntimeError> {
        self.get_json("/session/status").await
    }

    async fn get_messages(&self, session_id: &str) -> Result<Vec<Value>, RuntimeError> {
        self.get_json(&format!("/session/{}/message", session_id)).await
    }

    async fn subscribe_events(&self) -> Result<RuntimeEventStream, RuntimeError> {
        let response = self
            .client
            .get(self.url("/event"))
            .header("Accept", "text/event-stream")
            .send()
            .await?;
        let response = Self::check("/event", response).await?;

        let events = response.bytes_stream().eventsource().filter_map(|item| async move {
            match item {
                Ok(message) => match serde_json::from_str::<RuntimeEvent>(&message.data) {
                    Ok(event) => Some(Ok(event)),
                    Err(e) => {
                        log::debug!("Skipping malformed event: {}", e);
                        None
                    }
                },
                Err(e) => {
                    let error: RuntimeError = e.to_string().into();
                    Some(Err(error))
                }
            }
        });

        Ok(Box::pin(events))
    }

    async fn list_providers(&self) -> Result<ProviderListing, RuntimeError> {
        self.get_json("/provider").await
    }

    async fn shutdown(&self) -> Result<(), RuntimeError> {
        if let Some(mut child) = self.server.lock().await.take() {
            log::info!("Stopping opencode server at {}", self.base_url);
            child.kill().await?;
        }
        Ok(())
    }
}
