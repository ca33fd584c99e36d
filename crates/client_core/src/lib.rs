//! Client core of the Docker dashboard: the endpoint registry, the HTTP
//! gateway with its request and stream modes, the domain stores, and the
//! application root that wires them to one dispatcher.

pub mod alerts;
pub mod app;
pub mod endpoints;
pub mod error;
pub mod gateway;
pub mod json_stream;
pub mod models;
pub mod pattern;
pub mod stream;

pub use alerts::{AlertModel, AlertService, AlertSurface};
pub use app::{Dashboard, SessionCache};
pub use endpoints::{ContainerVerb, Endpoint, EndpointDescriptor, ImageVerb, RegistryError};
pub use error::GatewayError;
pub use gateway::{DockerClient, Gateway, Request, RequestHandle};
pub use pattern::{Pattern, PatternError};
pub use stream::StreamHandle;
