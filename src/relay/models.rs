use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry of the activity feed.
///
/// `id` and `created_at` are assigned by the store; events relayed straight
/// from a socket producer may not carry them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RealtimeEvent {
    #[serde(default)]
    pub id: Option<i64>,
    pub event_type: String,
    #[serde(default)]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Producer submission, before the store assigns `id` and `created_at`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewEvent {
    pub event_type: String,
    #[serde(default)]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default = "empty_object")]
    pub metadata: Value,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

impl NewEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            agent_name: None,
            project_name: None,
            message: String::new(),
            metadata: empty_object(),
        }
    }

    pub fn agent(mut self, name: impl Into<String>) -> Self {
        self.agent_name = Some(name.into());
        self
    }

    pub fn project(mut self, name: impl Into<String>) -> Self {
        self.project_name = Some(name.into());
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Agent {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub system_prompt: Option<String>,
    pub webhook_path: Option<String>,
    pub model: Option<String>,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub status: Option<String>,
    pub workspace_path: Option<String>,
    pub github_repo: Option<String>,
    pub tech_stack: Value,
    pub created_at: String,
    pub updated_at: String,
}

/// Fields accepted when creating an agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewAgent {
    #[serde(default)]
    pub name: String,
    pub description: Option<String>,
    pub system_prompt: Option<String>,
    pub webhook_path: Option<String>,
    pub model: Option<String>,
    pub is_active: Option<bool>,
}

/// Partial agent update; `None` leaves the column untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub system_prompt: Option<String>,
    pub webhook_path: Option<String>,
    pub model: Option<String>,
    pub is_active: Option<bool>,
}

/// Fields accepted when creating a project.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewProject {
    pub name: String,
    pub description: Option<String>,
    pub status: Option<String>,
    pub workspace_path: Option<String>,
    pub github_repo: Option<String>,
    #[serde(default)]
    pub tech_stack: Vec<String>,
}

/// Which status channel an update is broadcast on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Agent,
    Project,
}

impl StatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Project => "project",
        }
    }
}

impl FromStr for StatusKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "agent" | "agents" => Ok(Self::Agent),
            "project" | "projects" => Ok(Self::Project),
            _ => Err(format!("Invalid status kind: {}", s)),
        }
    }
}

/// Status change for one agent or project, matched by name.
///
/// Producers may key the entity as `name`, `agent_name` or `project_name`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StatusUpdate {
    #[serde(default, alias = "agent_name", alias = "project_name")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Everything a dashboard needs before live updates start.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub agents: Vec<Agent>,
    pub projects: Vec<Project>,
    /// Most recent first.
    pub events: Vec<RealtimeEvent>,
}
