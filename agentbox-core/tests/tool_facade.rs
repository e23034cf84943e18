//! Tool-level contract tests: JSON in/out, policy and audit collaborators.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::time::timeout;

use agentbox_core::command_safety::CommandAllowlist;
use agentbox_core::config::StreamingConfig;
use agentbox_core::terminal::{
    SessionManagerConfig, StreamEvent, StreamingOutputHandler, TerminalSessionManager,
};
use agentbox_core::tools::{
    PolicyDecision, PolicyEngine, PolicyEvaluation, RiskLevel, TerminalTool, ToolExecutionRecord,
    ToolExecutionRepository,
};
use agentbox_core::workspace::WorkspacePathValidator;

fn tool_in(workspace: &tempfile::TempDir) -> TerminalTool {
    TerminalTool::new(
        WorkspacePathValidator::bind(workspace.path()),
        CommandAllowlist::default_policy(),
        Arc::new(TerminalSessionManager::new(SessionManagerConfig::default())),
    )
}

async fn wait_until_finished(tool: &TerminalTool, session_id: &str) -> Value {
    timeout(Duration::from_secs(20), async {
        loop {
            let status = tool
                .terminal_status(json!({"sessionId": session_id, "includeOutput": true}))
                .await
                .unwrap();
            if status["running"] == json!(false) {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("session should finish in time")
}

#[tokio::test]
async fn execute_then_status_round_trip() {
    let workspace = tempfile::tempdir().unwrap();
    let tool = tool_in(&workspace);

    let response = tool
        .terminal_execute(json!({"command": "echo hello"}))
        .await
        .unwrap();
    assert_eq!(response["status"], "running");
    let session_id = response["sessionId"].as_str().unwrap().to_string();

    let status = wait_until_finished(&tool, &session_id).await;
    assert_eq!(status["exists"], json!(true));
    assert_eq!(status["status"], "completed");
    assert_eq!(status["exitCode"], json!(0));
    assert!(
        status["outputPreview"]
            .as_str()
            .unwrap()
            .contains("hello")
    );
}

#[tokio::test]
async fn disallowed_command_is_denied_as_data() {
    let workspace = tempfile::tempdir().unwrap();
    let tool = tool_in(&workspace);

    let response = tool
        .terminal_execute(json!({"command": "systemctl restart nginx"}))
        .await
        .unwrap();
    assert_eq!(response["status"], "denied");
    assert!(
        response["message"]
            .as_str()
            .unwrap()
            .contains("not in the allowlist")
    );
    // No session was created for the denied command.
    let list = tool.terminal_list(json!({})).await.unwrap();
    assert_eq!(list["sessions"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn feature_gates_deny_without_opt_in() {
    let workspace = tempfile::tempdir().unwrap();
    let tool = tool_in(&workspace);

    let denied = tool
        .terminal_execute(json!({"command": "cat a.txt | grep x"}))
        .await
        .unwrap();
    assert_eq!(denied["status"], "denied");
    assert!(denied["message"].as_str().unwrap().contains("pipes"));

    let allowed = tool
        .terminal_execute(json!({"command": "echo one | grep one", "allowPipes": true}))
        .await
        .unwrap();
    assert_eq!(allowed["status"], "running");
}

#[tokio::test]
async fn cwd_outside_workspace_is_denied() {
    let workspace = tempfile::tempdir().unwrap();
    let tool = tool_in(&workspace);

    let response = tool
        .terminal_execute(json!({"command": "echo hi", "cwd": "../escape"}))
        .await
        .unwrap();
    assert_eq!(response["status"], "denied");
    assert!(
        response["message"]
            .as_str()
            .unwrap()
            .contains("outside the workspace")
    );
}

#[tokio::test]
async fn unknown_session_status_and_kill() {
    let workspace = tempfile::tempdir().unwrap();
    let tool = tool_in(&workspace);

    let status = tool
        .terminal_status(json!({"sessionId": "ghost"}))
        .await
        .unwrap();
    assert_eq!(status["exists"], json!(false));
    assert_eq!(status["running"], json!(false));

    let kill = tool.terminal_kill(json!({"sessionId": "ghost"})).await.unwrap();
    assert_eq!(kill["killed"], json!(false));
    assert_eq!(kill["wasRunning"], json!(false));
}

#[tokio::test]
async fn kill_running_session_reports_was_running() {
    let workspace = tempfile::tempdir().unwrap();
    let tool = tool_in(&workspace);

    let response = tool
        .terminal_execute(json!({"command": "cat"}))
        .await
        .unwrap();
    let session_id = response["sessionId"].as_str().unwrap().to_string();

    let kill = tool
        .terminal_kill(json!({"sessionId": session_id, "reason": "test"}))
        .await
        .unwrap();
    assert_eq!(kill["killed"], json!(true));
    assert_eq!(kill["wasRunning"], json!(true));

    let again = tool
        .terminal_kill(json!({"sessionId": session_id}))
        .await
        .unwrap();
    assert_eq!(again["killed"], json!(false));
}

#[tokio::test]
async fn list_reports_counts_and_filters_active() {
    let workspace = tempfile::tempdir().unwrap();
    let tool = tool_in(&workspace);

    let running = tool
        .terminal_execute(json!({"command": "cat"}))
        .await
        .unwrap();
    let running_id = running["sessionId"].as_str().unwrap().to_string();
    let finished = tool
        .terminal_execute(json!({"command": "echo done"}))
        .await
        .unwrap();
    let finished_id = finished["sessionId"].as_str().unwrap().to_string();
    wait_until_finished(&tool, &finished_id).await;

    let all = tool.terminal_list(json!({})).await.unwrap();
    assert_eq!(all["sessions"].as_array().unwrap().len(), 2);
    assert_eq!(all["activeCount"], json!(1));
    assert_eq!(all["maxConcurrency"], json!(5));

    let active = tool.terminal_list(json!({"activeOnly": true})).await.unwrap();
    let sessions = active["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["sessionId"], json!(running_id));

    tool.terminal_kill(json!({"sessionId": running_id}))
        .await
        .unwrap();
}

struct DenyAll;

#[async_trait]
impl PolicyEngine for DenyAll {
    async fn evaluate(&self, _action_type: &str, _details: &Value) -> PolicyEvaluation {
        PolicyEvaluation {
            decision: PolicyDecision::Deny,
            risk_level: RiskLevel::High,
            reason: Some("blocked by workspace policy".to_string()),
        }
    }
}

#[tokio::test]
async fn policy_deny_short_circuits_before_spawn() {
    let workspace = tempfile::tempdir().unwrap();
    let tool = tool_in(&workspace).with_policy_engine(Arc::new(DenyAll));

    let response = tool
        .terminal_execute(json!({"command": "echo hello"}))
        .await
        .unwrap();
    assert_eq!(response["status"], "denied");
    assert_eq!(response["policyResult"]["decision"], "deny");
    assert_eq!(
        response["message"],
        json!("blocked by workspace policy")
    );
}

#[derive(Default)]
struct RecordingRepository {
    created: Mutex<Vec<ToolExecutionRecord>>,
    updates: Mutex<Vec<(String, String, Option<i32>)>>,
}

#[async_trait]
impl ToolExecutionRepository for RecordingRepository {
    async fn create(&self, record: &ToolExecutionRecord) -> anyhow::Result<()> {
        self.created.lock().push(record.clone());
        Ok(())
    }

    async fn update_status(
        &self,
        id: &str,
        status: &str,
        exit_code: Option<i32>,
        _output_excerpt: Option<&str>,
    ) -> anyhow::Result<()> {
        self.updates
            .lock()
            .push((id.to_string(), status.to_string(), exit_code));
        Ok(())
    }
}

#[tokio::test]
async fn repository_records_lifecycle() {
    let workspace = tempfile::tempdir().unwrap();
    let repository = Arc::new(RecordingRepository::default());
    let tool = tool_in(&workspace)
        .with_repository(Arc::clone(&repository) as Arc<dyn ToolExecutionRepository>);

    let response = tool
        .terminal_execute(json!({"command": "echo audited"}))
        .await
        .unwrap();
    let session_id = response["sessionId"].as_str().unwrap().to_string();
    wait_until_finished(&tool, &session_id).await;

    // Give the forwarder task a beat to flush the terminal update.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let created = repository.created.lock();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].command, "echo audited");
    let updates = repository.updates.lock();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].1, "completed");
    assert_eq!(updates[0].2, Some(0));
}

#[tokio::test]
async fn streaming_handler_receives_forwarded_events() {
    let workspace = tempfile::tempdir().unwrap();
    let (streaming, mut events) = StreamingOutputHandler::new(&StreamingConfig::default());
    let streaming = Arc::new(streaming);
    let tool = tool_in(&workspace).with_streaming(Arc::clone(&streaming));

    let response = tool
        .terminal_execute(json!({"command": "echo streamed"}))
        .await
        .unwrap();
    let session_id = response["sessionId"].as_str().unwrap().to_string();

    let mut saw_line = false;
    let mut saw_end = false;
    timeout(Duration::from_secs(20), async {
        while let Some(event) = events.recv().await {
            match event {
                StreamEvent::Line { line, .. } if line.contains("streamed") => saw_line = true,
                StreamEvent::SessionEnd { .. } => {
                    saw_end = true;
                    break;
                }
                _ => {}
            }
        }
    })
    .await
    .expect("stream should end");
    assert!(saw_line);
    assert!(saw_end);
    assert!(streaming.buffer(&session_id).unwrap().contains("streamed"));
}
