use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::error::ConnectionError;
use crate::rpc;
use crate::session::JsonRpcChannel;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Newline-delimited JSON-RPC over a child process's stdin/stdout.
pub(crate) struct StdioChannel {
    server: String,
    request_timeout: Duration,
    request_id: AtomicU64,
    process: Mutex<Option<StdioProcess>>,
    closing: AtomicBool,
}

struct StdioProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl Drop for StdioProcess {
    fn drop(&mut self) {
        let _ = self.child.start_kill();
    }
}

impl StdioChannel {
    pub(crate) fn spawn(
        server: &str,
        program: &str,
        args: &[String],
        env: &IndexMap<String, String>,
        request_timeout: Duration,
    ) -> Result<Self, ConnectionError> {
        let mut command = Command::new(program);
        command
            .args(args)
            .envs(env.iter())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|err| {
            ConnectionError::transport(server, format!("spawning `{program}` failed: {err}"))
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ConnectionError::transport(server, "failed to capture stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ConnectionError::transport(server, "failed to capture stdout"))?;
        debug!(target: "mcp_client", server, program, "spawned MCP stdio server");

        Ok(Self {
            server: server.to_string(),
            request_timeout,
            request_id: AtomicU64::new(1),
            process: Mutex::new(Some(StdioProcess {
                child,
                stdin,
                stdout: BufReader::new(stdout),
            })),
            closing: AtomicBool::new(false),
        })
    }

    async fn exchange(
        &self,
        process: &mut StdioProcess,
        body: &Value,
        request_id: u64,
        method: &str,
    ) -> Result<Value, ConnectionError> {
        process.send(body, &self.server).await?;
        loop {
            let value = process
                .read_message(self.request_timeout, &self.server, method)
                .await?;
            if rpc::matches_request(&value, request_id) {
                return Ok(value);
            }
            self.handle_server_message(process, &value).await?;
        }
    }

    async fn handle_server_message(
        &self,
        process: &mut StdioProcess,
        payload: &Value,
    ) -> Result<(), ConnectionError> {
        let Some(method) = rpc::server_method(payload) else {
            trace!(target: "mcp_client", server = %self.server, "ignoring stale response");
            return Ok(());
        };
        match (method, payload.get("id")) {
            ("ping", Some(id)) => {
                let pong = json!({ "jsonrpc": "2.0", "id": id, "result": {} });
                process.send(&pong, &self.server).await
            }
            (_, Some(id)) => {
                let reply = json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": { "code": -32601, "message": "Method not found" }
                });
                process.send(&reply, &self.server).await
            }
            (_, None) => {
                debug!(target: "mcp_client", server = %self.server, method, "server notification");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl JsonRpcChannel for StdioChannel {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ConnectionError> {
        let mut guard = self.process.lock().await;
        if self.closing.load(Ordering::SeqCst) {
            guard.take();
            return Err(ConnectionError::SessionNotInitialized(self.server.clone()));
        }
        let process = guard
            .as_mut()
            .ok_or_else(|| ConnectionError::SessionNotInitialized(self.server.clone()))?;

        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let body = rpc::request(id, method, params);
        let outcome = self.exchange(process, &body, id, method).await;

        // A close that raced this request leaves the process for us to drop.
        if outcome.is_err() || self.closing.load(Ordering::SeqCst) {
            guard.take();
        }
        rpc::extract_result(outcome?, &self.server)
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), ConnectionError> {
        let mut guard = self.process.lock().await;
        let process = guard
            .as_mut()
            .ok_or_else(|| ConnectionError::SessionNotInitialized(self.server.clone()))?;
        process
            .send(&rpc::notification(method, params), &self.server)
            .await
    }

    async fn shutdown(&self) -> Result<(), ConnectionError> {
        self.closing.store(true, Ordering::SeqCst);
        let mut guard = match self.process.try_lock() {
            Ok(guard) => guard,
            Err(_) => return Err(ConnectionError::TornDown(self.server.clone())),
        };
        if let Some(mut process) = guard.take() {
            process.shutdown(&self.server).await;
        }
        Ok(())
    }
}

impl StdioProcess {
    async fn send(&mut self, body: &Value, server: &str) -> Result<(), ConnectionError> {
        let mut payload = serde_json::to_vec(body)
            .map_err(|err| ConnectionError::protocol(server, format!("encoding request: {err}")))?;
        payload.push(b'\n');
        self.stdin
            .write_all(&payload)
            .await
            .map_err(|err| ConnectionError::transport(server, format!("writing request: {err}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|err| ConnectionError::transport(server, format!("flushing stdin: {err}")))
    }

    async fn read_message(
        &mut self,
        timeout_dur: Duration,
        server: &str,
        method: &str,
    ) -> Result<Value, ConnectionError> {
        loop {
            let mut line = String::new();
            let read = timeout(timeout_dur, self.stdout.read_line(&mut line))
                .await
                .map_err(|_| ConnectionError::Timeout {
                    server: server.to_string(),
                    operation: method.to_string(),
                    after: timeout_dur,
                })?
                .map_err(|err| {
                    ConnectionError::transport(server, format!("reading stdout: {err}"))
                })?;
            if read == 0 {
                return Err(ConnectionError::transport(server, "server closed stdout"));
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str(trimmed) {
                Ok(value) => return Ok(value),
                Err(_) => {
                    debug!(target: "mcp_client", server, line = trimmed, "skipping non JSON-RPC output");
                }
            }
        }
    }

    async fn shutdown(&mut self, server: &str) {
        let _ = self.stdin.shutdown().await;
        match timeout(SHUTDOWN_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(target: "mcp_client", server, %status, "MCP stdio server exited");
            }
            _ => {
                let _ = self.child.start_kill();
                debug!(target: "mcp_client", server, "killed MCP stdio server");
            }
        }
    }
}
