use std::sync::Arc;

use flux::{Dispatcher, Model};
use shared::{
    domain::{Alert, AlertId, AlertRequest},
    protocol::{Action, ActionKind},
};
use tracing::warn;

/// Where user-facing messages go.
pub trait AlertSurface: Send + Sync {
    fn create(&self, alert: AlertRequest);
    fn clear(&self);
}

/// Alert surface backed by the dispatch loop: alerts become actions and land
/// in [`AlertModel`].
#[derive(Clone)]
pub struct AlertService {
    dispatcher: Arc<Dispatcher<Action>>,
}

impl AlertService {
    pub fn new(dispatcher: Arc<Dispatcher<Action>>) -> Self {
        Self { dispatcher }
    }

    pub fn dismiss(&self, id: AlertId) {
        self.send(Action::AlertDismiss(id));
    }

    fn send(&self, action: Action) {
        if let Err(err) = self.dispatcher.dispatch(action) {
            warn!(error = %err, "alerts: dispatch failed");
        }
    }
}

impl AlertSurface for AlertService {
    fn create(&self, alert: AlertRequest) {
        self.send(Action::AlertCreate(Alert::from(alert)));
    }

    fn clear(&self) {
        self.send(Action::AlertClear);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertModel {
    pub alerts: Vec<Alert>,
}

impl Model for AlertModel {
    type Action = Action;
    const NAME: &'static str = "alerts";

    fn reacts_to(kind: ActionKind) -> bool {
        matches!(
            kind,
            ActionKind::AlertCreate | ActionKind::AlertDismiss | ActionKind::AlertClear
        )
    }

    fn reduce(&mut self, action: &Action) -> bool {
        match action {
            Action::AlertCreate(alert) => {
                self.alerts.push(alert.clone());
                true
            }
            Action::AlertDismiss(id) => {
                let before = self.alerts.len();
                self.alerts.retain(|alert| alert.id != *id);
                self.alerts.len() != before
            }
            Action::AlertClear if !self.alerts.is_empty() => {
                self.alerts.clear();
                true
            }
            _ => false,
        }
    }
}
