use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Result, bail};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

use agentbox_exec_events::SessionOutputEvent;

use crate::command_safety::{CommandAllowlist, SafetyOptions, validate_command};
use crate::config::CommandsConfig;
use crate::config::constants::{DEFAULT_AUDIT_OUTPUT_LIMIT, DEFAULT_PREVIEW_OUTPUT_LIMIT};
use crate::terminal::{
    CreateSessionOptions, SessionStatus, StreamingOutputHandler, TerminalSessionManager,
};
use crate::workspace::{PathValidation, WorkspacePathValidator};

use super::policy::{PolicyDecision, PolicyEngine, ToolExecutionRecord, ToolExecutionRepository};

/// Truncation limits for audit rows and status previews.
#[derive(Debug, Clone)]
pub struct TerminalToolLimits {
    pub audit_output_limit: usize,
    pub preview_output_limit: usize,
}

impl Default for TerminalToolLimits {
    fn default() -> Self {
        Self {
            audit_output_limit: DEFAULT_AUDIT_OUTPUT_LIMIT,
            preview_output_limit: DEFAULT_PREVIEW_OUTPUT_LIMIT,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteArgs {
    command: String,
    #[serde(default)]
    cwd: Option<String>,
    /// Timeout in milliseconds.
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    allow_pipes: bool,
    #[serde(default)]
    allow_redirections: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteResponse {
    session_id: String,
    command: String,
    cwd: String,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    policy_result: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusArgs {
    session_id: String,
    #[serde(default)]
    include_output: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KillArgs {
    session_id: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListArgs {
    #[serde(default)]
    active_only: bool,
}

/// The terminal tool façade: path validation, policy consultation, command
/// safety gating, then PTY session management, exposed as JSON operations.
pub struct TerminalTool {
    validator: WorkspacePathValidator,
    allowlist: RwLock<CommandAllowlist>,
    manager: Arc<TerminalSessionManager>,
    policy: Option<Arc<dyn PolicyEngine>>,
    repository: Option<Arc<dyn ToolExecutionRepository>>,
    streaming: Option<Arc<StreamingOutputHandler>>,
    limits: TerminalToolLimits,
    session_counter: AtomicU64,
}

impl TerminalTool {
    pub fn new(
        validator: WorkspacePathValidator,
        allowlist: CommandAllowlist,
        manager: Arc<TerminalSessionManager>,
    ) -> Self {
        Self {
            validator,
            allowlist: RwLock::new(allowlist),
            manager,
            policy: None,
            repository: None,
            streaming: None,
            limits: TerminalToolLimits::default(),
            session_counter: AtomicU64::new(0),
        }
    }

    pub fn with_policy_engine(mut self, policy: Arc<dyn PolicyEngine>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_repository(mut self, repository: Arc<dyn ToolExecutionRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Forwards every session's events into a streaming handler (the UI
    /// transport side of the bridge).
    pub fn with_streaming(mut self, streaming: Arc<StreamingOutputHandler>) -> Self {
        self.streaming = Some(streaming);
        self
    }

    pub fn with_limits(mut self, limits: TerminalToolLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn manager(&self) -> &Arc<TerminalSessionManager> {
        &self.manager
    }

    /// Atomically replaces the allowlist from configuration.
    pub fn reload_allowlist(&self, config: &CommandsConfig) {
        self.allowlist.write().load_from_config(config);
    }

    /// Dispatches one of the four tool operations by name.
    pub async fn dispatch(&self, operation: &str, args: Value) -> Result<Value> {
        match operation {
            "terminal_execute" => self.terminal_execute(args).await,
            "terminal_status" => self.terminal_status(args).await,
            "terminal_kill" => self.terminal_kill(args).await,
            "terminal_list" => self.terminal_list(args).await,
            other => bail!("unknown terminal operation '{other}'"),
        }
    }

    /// Validates and spawns a command; returns immediately with the session
    /// id while output streams in the background.
    pub async fn terminal_execute(&self, args: Value) -> Result<Value> {
        let args: ExecuteArgs = serde_json::from_value(args)?;
        let session_id = self.next_session_id();

        let requested_cwd = args.cwd.as_deref().unwrap_or(".");
        let cwd = match self.validator.validate(requested_cwd).await {
            PathValidation::Valid { resolved } => resolved,
            PathValidation::Invalid { reason } => {
                return Ok(serde_json::to_value(ExecuteResponse {
                    session_id,
                    command: args.command,
                    cwd: requested_cwd.to_string(),
                    status: "denied".to_string(),
                    message: Some(reason),
                    policy_result: None,
                })?);
            }
        };
        let cwd_display = self.validator.display_relative(&cwd);

        if let Some(policy) = &self.policy {
            let details = json!({
                "command": args.command,
                "cwd": cwd_display,
            });
            let evaluation = policy.evaluate("terminal_execute", &details).await;
            if evaluation.decision != PolicyDecision::Allow {
                // No interactive approval at this layer; anything short of
                // an allow is surfaced as a denial with the evaluation
                // attached.
                return Ok(serde_json::to_value(ExecuteResponse {
                    session_id,
                    command: args.command,
                    cwd: cwd_display,
                    status: "denied".to_string(),
                    message: evaluation.reason.clone(),
                    policy_result: Some(serde_json::to_value(&evaluation)?),
                })?);
            }
        }

        let options = SafetyOptions {
            allow_pipes: args.allow_pipes,
            allow_redirections: args.allow_redirections,
            ..SafetyOptions::default()
        };
        let verdict = {
            let allowlist = self.allowlist.read();
            validate_command(&args.command, &allowlist, options)
        };
        if !verdict.allowed {
            return Ok(serde_json::to_value(ExecuteResponse {
                session_id,
                command: args.command,
                cwd: cwd_display,
                status: "denied".to_string(),
                message: verdict.reason,
                policy_result: None,
            })?);
        }

        let spawned = match self
            .manager
            .create_session(
                session_id.clone(),
                &args.command,
                &cwd,
                CreateSessionOptions {
                    timeout_ms: args.timeout,
                    env: args.env,
                },
            )
            .await
        {
            Ok(spawned) => spawned,
            Err(error) => {
                return Ok(serde_json::to_value(ExecuteResponse {
                    session_id,
                    command: args.command,
                    cwd: cwd_display,
                    status: "error".to_string(),
                    message: Some(error.to_string()),
                    policy_result: None,
                })?);
            }
        };

        if let Some(repository) = &self.repository {
            let record = ToolExecutionRecord {
                id: session_id.clone(),
                tool: "terminal_execute".to_string(),
                command: args.command.clone(),
                cwd: cwd_display.clone(),
                started_at_ms: unix_millis(),
            };
            if let Err(error) = repository.create(&record).await {
                warn!(
                    target: "agentbox.tools",
                    session_id = %session_id,
                    %error,
                    "failed to create audit record"
                );
            }
        }

        self.forward_events(spawned.events);

        Ok(serde_json::to_value(ExecuteResponse {
            session_id,
            command: args.command,
            cwd: cwd_display,
            status: "running".to_string(),
            message: None,
            policy_result: None,
        })?)
    }

    pub async fn terminal_status(&self, args: Value) -> Result<Value> {
        let args: StatusArgs = serde_json::from_value(args)?;
        let Some(info) = self.manager.get_session(&args.session_id) else {
            return Ok(json!({
                "sessionId": args.session_id,
                "exists": false,
                "running": false,
            }));
        };

        let mut response = json!({
            "sessionId": info.id,
            "exists": true,
            "command": info.command,
            "cwd": self.validator.display_relative(&info.cwd),
            "status": info.status,
            "exitCode": info.exit_code,
            "running": info.status == SessionStatus::Running,
            "startedAt": info.started_at_ms,
            "timeoutMs": info.timeout_ms,
        });
        if args.include_output {
            let preview = self
                .manager
                .get_output(&args.session_id)
                .map(|output| truncate_tail(&output, self.limits.preview_output_limit));
            response["outputPreview"] = json!(preview);
        }
        Ok(response)
    }

    pub async fn terminal_kill(&self, args: Value) -> Result<Value> {
        let args: KillArgs = serde_json::from_value(args)?;
        let reason = args.reason.as_deref().unwrap_or("killed by caller");

        let Some(info) = self.manager.get_session(&args.session_id) else {
            return Ok(json!({
                "sessionId": args.session_id,
                "killed": false,
                "wasRunning": false,
                "message": "session not found",
            }));
        };
        let was_running = info.status == SessionStatus::Running;
        let killed = self.manager.cancel_session(&args.session_id, reason);
        Ok(json!({
            "sessionId": args.session_id,
            "killed": killed,
            "wasRunning": was_running,
            "message": if killed { None } else { Some("session already finished") },
        }))
    }

    pub async fn terminal_list(&self, args: Value) -> Result<Value> {
        let args: ListArgs = serde_json::from_value(args)?;
        let mut sessions = self.manager.list_sessions();
        if args.active_only {
            sessions.retain(|session| session.status == SessionStatus::Running);
        }
        let active_count = self.manager.running_count();
        let sessions: Vec<Value> = sessions
            .iter()
            .map(|session| {
                json!({
                    "sessionId": session.id,
                    "command": session.command,
                    "cwd": self.validator.display_relative(&session.cwd),
                    "status": session.status,
                    "exitCode": session.exit_code,
                    "startedAt": session.started_at_ms,
                    "timeoutMs": session.timeout_ms,
                })
            })
            .collect();
        Ok(json!({
            "sessions": sessions,
            "activeCount": active_count,
            "maxConcurrency": self.manager.config().max_concurrency,
        }))
    }

    /// Drains a session's event stream: into the streaming handler when one
    /// is attached, and into the audit repository on the terminal event.
    fn forward_events(
        &self,
        mut events: tokio::sync::mpsc::UnboundedReceiver<SessionOutputEvent>,
    ) {
        let streaming = self.streaming.clone();
        let repository = self.repository.clone();
        let manager = Arc::clone(&self.manager);
        let audit_limit = self.limits.audit_output_limit;
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let Some(streaming) = &streaming {
                    streaming.handle_event(&event);
                }
                if event.is_terminal()
                    && let Some(repository) = &repository
                {
                    let session_id = event.session_id().to_string();
                    let (status, exit_code) = match &event {
                        SessionOutputEvent::Exit { exit_code, .. } => {
                            let status = if *exit_code == 0 { "completed" } else { "failed" };
                            (status, Some(*exit_code))
                        }
                        SessionOutputEvent::Error { .. } => ("cancelled", None),
                        SessionOutputEvent::Timeout { .. } => ("timed_out", None),
                        SessionOutputEvent::Data { .. } => unreachable!(),
                    };
                    let excerpt = manager
                        .get_output(&session_id)
                        .map(|output| truncate_tail(&output, audit_limit));
                    if let Err(error) = repository
                        .update_status(&session_id, status, exit_code, excerpt.as_deref())
                        .await
                    {
                        warn!(
                            target: "agentbox.tools",
                            session_id = %session_id,
                            %error,
                            "failed to update audit record"
                        );
                    }
                }
            }
        });
    }

    fn next_session_id(&self) -> String {
        let counter = self.session_counter.fetch_add(1, Ordering::Relaxed);
        format!("term-{:x}-{counter}", unix_millis())
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Keeps the last `limit` bytes of `text` on a char boundary.
fn truncate_tail(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut cut = text.len() - limit;
    while cut < text.len() && !text.is_char_boundary(cut) {
        cut += 1;
    }
    text[cut..].to_string()
}
