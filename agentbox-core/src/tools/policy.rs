use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Verdict from the external policy engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDecision {
    Allow,
    Deny,
    RequireApproval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// Result of one policy evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyEvaluation {
    pub decision: PolicyDecision,
    pub risk_level: RiskLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// External policy engine, consulted before a session is spawned.
///
/// Only the interface is owned here; rule evaluation lives elsewhere.
#[async_trait]
pub trait PolicyEngine: Send + Sync {
    async fn evaluate(&self, action_type: &str, details: &Value) -> PolicyEvaluation;
}

/// Audit row describing one command execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecutionRecord {
    pub id: String,
    pub tool: String,
    pub command: String,
    pub cwd: String,
    /// Milliseconds since the Unix epoch.
    pub started_at_ms: u64,
}

/// Audit persistence for command lifecycle. Entirely optional; failures are
/// logged and swallowed by callers.
#[async_trait]
pub trait ToolExecutionRepository: Send + Sync {
    async fn create(&self, record: &ToolExecutionRecord) -> anyhow::Result<()>;

    async fn update_status(
        &self,
        id: &str,
        status: &str,
        exit_code: Option<i32>,
        output_excerpt: Option<&str>,
    ) -> anyhow::Result<()>;
}
