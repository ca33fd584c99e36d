//! Static table of the Docker API calls the dashboard knows how to make.

use std::{borrow::Cow, fmt, str::FromStr};

use reqwest::Method;
use shared::protocol::DockerAction;
use thiserror::Error;

const ID_PLACEHOLDER: &str = "{id}";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("endpoint namespace `{0}` must look like `resource.verb`")]
    MalformedNamespace(String),
    #[error("unknown endpoint resource `{0}`")]
    UnknownResource(String),
    #[error("unknown verb `{verb}` for endpoint resource `{resource}`")]
    UnknownVerb { resource: String, verb: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerVerb {
    Inspect,
    Create,
    List,
    Start,
    Stop,
    Restart,
    Pause,
    Unpause,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageVerb {
    List,
    Search,
    Pull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Containers(ContainerVerb),
    Images(ImageVerb),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub method: Method,
    pub template: &'static str,
    pub action: DockerAction,
}

impl EndpointDescriptor {
    fn new(method: Method, template: &'static str, action: DockerAction) -> Self {
        Self {
            method,
            template,
            action,
        }
    }

    /// The template with its `{id}` placeholder filled in. Without an id, or
    /// for templates that carry no placeholder, the template is unchanged.
    pub fn path(&self, id: Option<&str>) -> Cow<'static, str> {
        match id {
            Some(id) if self.template.contains(ID_PLACEHOLDER) => {
                Cow::Owned(self.template.replacen(ID_PLACEHOLDER, id, 1))
            }
            _ => Cow::Borrowed(self.template),
        }
    }
}

impl Endpoint {
    pub const ALL: [Endpoint; 11] = [
        Endpoint::Containers(ContainerVerb::Inspect),
        Endpoint::Containers(ContainerVerb::Create),
        Endpoint::Containers(ContainerVerb::List),
        Endpoint::Containers(ContainerVerb::Start),
        Endpoint::Containers(ContainerVerb::Stop),
        Endpoint::Containers(ContainerVerb::Restart),
        Endpoint::Containers(ContainerVerb::Pause),
        Endpoint::Containers(ContainerVerb::Unpause),
        Endpoint::Images(ImageVerb::List),
        Endpoint::Images(ImageVerb::Search),
        Endpoint::Images(ImageVerb::Pull),
    ];

    pub fn descriptor(self) -> EndpointDescriptor {
        use ContainerVerb as C;
        use DockerAction as A;
        use ImageVerb as I;

        match self {
            Self::Containers(C::Inspect) => {
                EndpointDescriptor::new(Method::GET, "/containers/{id}/json", A::InspectContainer)
            }
            Self::Containers(C::Create) => {
                EndpointDescriptor::new(Method::POST, "/containers/create", A::CreateContainer)
            }
            Self::Containers(C::List) => {
                EndpointDescriptor::new(Method::GET, "/containers/json", A::ListContainers)
            }
            Self::Containers(C::Start) => {
                EndpointDescriptor::new(Method::POST, "/containers/{id}/start", A::StartContainer)
            }
            Self::Containers(C::Stop) => {
                EndpointDescriptor::new(Method::POST, "/containers/{id}/stop", A::StopContainer)
            }
            Self::Containers(C::Restart) => EndpointDescriptor::new(
                Method::POST,
                "/containers/{id}/restart",
                A::RestartContainer,
            ),
            Self::Containers(C::Pause) => {
                EndpointDescriptor::new(Method::POST, "/containers/{id}/pause", A::PauseContainer)
            }
            Self::Containers(C::Unpause) => EndpointDescriptor::new(
                Method::POST,
                "/containers/{id}/unpause",
                A::UnpauseContainer,
            ),
            Self::Images(I::List) => {
                EndpointDescriptor::new(Method::GET, "/images/json", A::ListImages)
            }
            Self::Images(I::Search) => {
                EndpointDescriptor::new(Method::GET, "/images/search", A::SearchImages)
            }
            Self::Images(I::Pull) => {
                EndpointDescriptor::new(Method::POST, "/images/create", A::PullImage)
            }
        }
    }

    fn resource(self) -> &'static str {
        match self {
            Self::Containers(_) => "containers",
            Self::Images(_) => "images",
        }
    }

    fn verb(self) -> &'static str {
        match self {
            Self::Containers(verb) => match verb {
                ContainerVerb::Inspect => "inspect",
                ContainerVerb::Create => "create",
                ContainerVerb::List => "list",
                ContainerVerb::Start => "start",
                ContainerVerb::Stop => "stop",
                ContainerVerb::Restart => "restart",
                ContainerVerb::Pause => "pause",
                ContainerVerb::Unpause => "unpause",
            },
            Self::Images(verb) => match verb {
                ImageVerb::List => "list",
                ImageVerb::Search => "search",
                ImageVerb::Pull => "pull",
            },
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource(), self.verb())
    }
}

impl FromStr for Endpoint {
    type Err = RegistryError;

    fn from_str(namespace: &str) -> Result<Self, Self::Err> {
        let Some((resource, verb)) = namespace.split_once('.') else {
            return Err(RegistryError::MalformedNamespace(namespace.to_string()));
        };
        if !Self::ALL.iter().any(|endpoint| endpoint.resource() == resource) {
            return Err(RegistryError::UnknownResource(resource.to_string()));
        }
        Self::ALL
            .into_iter()
            .find(|endpoint| endpoint.resource() == resource && endpoint.verb() == verb)
            .ok_or_else(|| RegistryError::UnknownVerb {
                resource: resource.to_string(),
                verb: verb.to_string(),
            })
    }
}
