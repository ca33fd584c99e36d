//! Domain stores fed by the dispatcher.

mod app_model;
mod containers;
mod images;

pub use app_model::{AppModel, LOGIN_ROUTE};
pub use containers::{ContainerModel, ContainerOperation, CreatedContainer, HostContainers};
pub use images::{ImageModel, LayerProgress, PullKey, PullState};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

/// Decodes a Docker response, logging and discarding it when the shape is
/// not what the store expects.
fn decode<T: DeserializeOwned>(store: &str, what: &str, response: &Value) -> Option<T> {
    match T::deserialize(response) {
        Ok(decoded) => Some(decoded),
        Err(err) => {
            warn!(store, what, error = %err, "store: undecodable docker response");
            None
        }
    }
}
