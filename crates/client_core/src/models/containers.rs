use std::collections::HashMap;

use flux::Model;
use serde::Deserialize;
use serde_json::Value;
use shared::{
    domain::ContainerSummary,
    protocol::{Action, ActionKind, DockerAction, DockerPayload},
};

use super::decode;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostContainers {
    pub containers: Vec<ContainerSummary>,
    /// Raw `inspect` documents keyed by the id they were requested with.
    pub inspected: HashMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreatedContainer {
    #[serde(skip)]
    pub host: String,
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Warnings", default)]
    pub warnings: Option<Vec<String>>,
}

/// The most recent successful lifecycle call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerOperation {
    pub host: String,
    pub id: String,
    pub action: DockerAction,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerModel {
    pub hosts: HashMap<String, HostContainers>,
    pub last_created: Option<CreatedContainer>,
    pub last_operation: Option<ContainerOperation>,
}

impl ContainerModel {
    pub fn containers(&self, host: &str) -> &[ContainerSummary] {
        self.hosts
            .get(host)
            .map(|host| host.containers.as_slice())
            .unwrap_or_default()
    }

    pub fn inspected(&self, host: &str, id: &str) -> Option<&Value> {
        self.hosts.get(host)?.inspected.get(id)
    }

    fn apply_lifecycle(&mut self, action: DockerAction, payload: &DockerPayload) -> bool {
        let Some(state) = lifecycle_state(action) else {
            return false;
        };
        let Some(id) = payload.id.clone() else {
            return false;
        };
        if let Some(host) = self.hosts.get_mut(&payload.host) {
            for container in host
                .containers
                .iter_mut()
                .filter(|container| container.is_identified_by(&id))
            {
                container.state = state.to_string();
            }
        }
        self.last_operation = Some(ContainerOperation {
            host: payload.host.clone(),
            id,
            action,
        });
        true
    }
}

/// Container state after a successful lifecycle call.
fn lifecycle_state(action: DockerAction) -> Option<&'static str> {
    match action {
        DockerAction::StartContainer
        | DockerAction::RestartContainer
        | DockerAction::UnpauseContainer => Some("running"),
        DockerAction::StopContainer => Some("exited"),
        DockerAction::PauseContainer => Some("paused"),
        _ => None,
    }
}

impl Model for ContainerModel {
    type Action = Action;
    const NAME: &'static str = "containers";

    fn reacts_to(kind: ActionKind) -> bool {
        matches!(
            kind,
            ActionKind::Docker(
                DockerAction::ListContainers
                    | DockerAction::InspectContainer
                    | DockerAction::CreateContainer
                    | DockerAction::StartContainer
                    | DockerAction::StopContainer
                    | DockerAction::RestartContainer
                    | DockerAction::PauseContainer
                    | DockerAction::UnpauseContainer
            )
        )
    }

    fn reduce(&mut self, action: &Action) -> bool {
        let Action::Docker { kind, payload } = action else {
            return false;
        };
        match kind {
            DockerAction::ListContainers => {
                let Some(containers) =
                    decode::<Vec<ContainerSummary>>(Self::NAME, "container list", &payload.response)
                else {
                    return false;
                };
                self.hosts.entry(payload.host.clone()).or_default().containers = containers;
                true
            }
            DockerAction::InspectContainer => {
                let id = payload
                    .id
                    .clone()
                    .or_else(|| payload.response["Id"].as_str().map(str::to_string));
                let Some(id) = id else {
                    return false;
                };
                let host = self.hosts.entry(payload.host.clone()).or_default();
                if let Some(status) = payload.response["State"]["Status"].as_str() {
                    for container in host
                        .containers
                        .iter_mut()
                        .filter(|container| container.is_identified_by(&id))
                    {
                        container.state = status.to_string();
                    }
                }
                host.inspected.insert(id, payload.response.clone());
                true
            }
            DockerAction::CreateContainer => {
                let Some(mut created) =
                    decode::<CreatedContainer>(Self::NAME, "created container", &payload.response)
                else {
                    return false;
                };
                created.host.clone_from(&payload.host);
                self.last_created = Some(created);
                true
            }
            other => self.apply_lifecycle(*other, payload),
        }
    }
}
