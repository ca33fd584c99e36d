use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{Alert, AlertId, SessionUser};

/// Success action of a Docker endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DockerAction {
    InspectContainer,
    CreateContainer,
    ListContainers,
    StartContainer,
    StopContainer,
    RestartContainer,
    PauseContainer,
    UnpauseContainer,
    ListImages,
    SearchImages,
    PullImage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    AuthLogin,
    AuthLogout,
    RouteChange,
    AlertCreate,
    AlertDismiss,
    AlertClear,
    Docker(DockerAction),
    StreamClosed,
}

/// Result of a request-mode call. `host` and `id` are echoed from the
/// request because Docker does not reliably include them in the body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DockerPayload {
    pub id: Option<String>,
    pub host: String,
    pub response: Value,
}

/// One structurally matched node of a streamed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub id: Option<String>,
    pub host: String,
    pub pattern: String,
    pub response: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StreamOutcome {
    /// The server closed the connection at a value boundary.
    Completed { events: usize },
    /// Transport failure, malformed JSON, or EOF in the middle of a node.
    Interrupted { events: usize, reason: String },
    Cancelled { events: usize },
}

impl StreamOutcome {
    pub fn events(&self) -> usize {
        match self {
            Self::Completed { events }
            | Self::Interrupted { events, .. }
            | Self::Cancelled { events } => *events,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamClosedPayload {
    pub id: Option<String>,
    pub host: String,
    pub action: DockerAction,
    pub outcome: StreamOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    AuthLogin(SessionUser),
    AuthLogout,
    RouteChange(String),
    AlertCreate(Alert),
    AlertDismiss(AlertId),
    AlertClear,
    Docker {
        kind: DockerAction,
        payload: DockerPayload,
    },
    DockerStream {
        kind: DockerAction,
        event: StreamEvent,
    },
    StreamClosed(StreamClosedPayload),
}

impl flux::Action for Action {
    type Kind = ActionKind;

    fn kind(&self) -> ActionKind {
        match self {
            Self::AuthLogin(_) => ActionKind::AuthLogin,
            Self::AuthLogout => ActionKind::AuthLogout,
            Self::RouteChange(_) => ActionKind::RouteChange,
            Self::AlertCreate(_) => ActionKind::AlertCreate,
            Self::AlertDismiss(_) => ActionKind::AlertDismiss,
            Self::AlertClear => ActionKind::AlertClear,
            Self::Docker { kind, .. } | Self::DockerStream { kind, .. } => {
                ActionKind::Docker(*kind)
            }
            Self::StreamClosed(_) => ActionKind::StreamClosed,
        }
    }
}
