//! Subscriber-side live state: the event buffer plus cached agents/projects.

use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;

use super::buffer::EventBuffer;
use super::models::{Agent, Project, RealtimeEvent, Snapshot, StatusUpdate};
use super::ws::WsMessage;

/// What a dashboard renders from.
#[derive(Debug, Clone)]
pub struct LiveState {
    pub connected: bool,
    pub events: EventBuffer<RealtimeEvent>,
    pub agents: Vec<Agent>,
    pub projects: Vec<Project>,
}

/// Effect of applying one relay message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    EventAdded,
    /// Whole list replaced by an array payload.
    AgentsReplaced,
    ProjectsReplaced,
    AgentUpdated(String),
    ProjectUpdated(String),
    /// Payload referenced nothing known locally, or could not be read.
    Ignored,
}

impl LiveState {
    pub fn new(event_capacity: usize) -> Self {
        Self {
            connected: false,
            events: EventBuffer::new(event_capacity),
            agents: Vec::new(),
            projects: Vec::new(),
        }
    }

    /// Load the initial snapshot. `snapshot.events` is most-recent-first.
    pub fn seed(&mut self, snapshot: Snapshot) {
        self.agents = snapshot.agents;
        self.projects = snapshot.projects;
        self.events.replace(snapshot.events);
    }

    pub fn add_event(&mut self, event: RealtimeEvent) {
        self.events.push(event);
    }

    /// Set `is_active` on the agent called `name`. Unknown names are ignored.
    pub fn update_agent_active(&mut self, name: &str, is_active: bool) -> bool {
        match self.agents.iter_mut().find(|a| a.name == name) {
            Some(agent) => {
                agent.is_active = is_active;
                true
            }
            None => false,
        }
    }

    /// Set `status` on the project called `name`. Unknown names are ignored.
    pub fn update_project_status(&mut self, name: &str, status: &str) -> bool {
        match self.projects.iter_mut().find(|p| p.name == name) {
            Some(project) => {
                project.status = Some(status.to_string());
                true
            }
            None => false,
        }
    }

    pub fn apply(&mut self, msg: WsMessage) -> Applied {
        match msg {
            WsMessage::NewEvent(data) => match serde_json::from_value::<RealtimeEvent>(data) {
                Ok(event) => {
                    self.add_event(event);
                    Applied::EventAdded
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Dropping event without the event shape");
                    Applied::Ignored
                }
            },
            WsMessage::AgentUpdate(data) => self.apply_agent_update(data),
            WsMessage::ProjectUpdate(data) => self.apply_project_update(data),
        }
    }

    fn apply_agent_update(&mut self, data: Value) -> Applied {
        if data.is_array() {
            return match serde_json::from_value::<Vec<Agent>>(data) {
                Ok(agents) => {
                    self.agents = agents;
                    Applied::AgentsReplaced
                }
                Err(_) => Applied::Ignored,
            };
        }
        let Ok(StatusUpdate {
            name: Some(name),
            is_active: Some(is_active),
            ..
        }) = serde_json::from_value::<StatusUpdate>(data)
        else {
            return Applied::Ignored;
        };
        if self.update_agent_active(&name, is_active) {
            Applied::AgentUpdated(name)
        } else {
            Applied::Ignored
        }
    }

    fn apply_project_update(&mut self, data: Value) -> Applied {
        if data.is_array() {
            return match serde_json::from_value::<Vec<Project>>(data) {
                Ok(projects) => {
                    self.projects = projects;
                    Applied::ProjectsReplaced
                }
                Err(_) => Applied::Ignored,
            };
        }
        let Ok(StatusUpdate {
            name: Some(name),
            status: Some(status),
            ..
        }) = serde_json::from_value::<StatusUpdate>(data)
        else {
            return Applied::Ignored;
        };
        if self.update_project_status(&name, &status) {
            Applied::ProjectUpdated(name)
        } else {
            Applied::Ignored
        }
    }
}

impl Default for LiveState {
    fn default() -> Self {
        Self::new(super::buffer::DEFAULT_EVENT_BUFFER_CAPACITY)
    }
}

/// Shared handle to one subscriber's [`LiveState`].
///
/// Created once by whoever owns the session and passed down explicitly.
#[derive(Clone, Default)]
pub struct LiveStore {
    inner: Arc<Mutex<LiveState>>,
}

impl LiveStore {
    pub fn new(event_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LiveState::new(event_capacity))),
        }
    }

    /// Lock the state. Never hold the guard across an `.await`.
    pub fn lock(&self) -> MutexGuard<'_, LiveState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn seed(&self, snapshot: Snapshot) {
        self.lock().seed(snapshot);
    }

    pub fn apply(&self, msg: WsMessage) -> Applied {
        self.lock().apply(msg)
    }

    pub fn set_connected(&self, connected: bool) {
        self.lock().connected = connected;
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    /// Copy of the buffered events, most recent first.
    pub fn events(&self) -> Vec<RealtimeEvent> {
        self.lock().events.iter().cloned().collect()
    }

    pub fn agents(&self) -> Vec<Agent> {
        self.lock().agents.clone()
    }

    pub fn projects(&self) -> Vec<Project> {
        self.lock().projects.clone()
    }
}
