use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use flux::{Dispatcher, Handler, Store};
use reqwest::Client;
use shared::{domain::SessionUser, protocol::Action};
use tracing::{debug, info, warn};

use crate::{
    alerts::{AlertModel, AlertService, AlertSurface},
    error::GatewayError,
    gateway::Gateway,
    models::{AppModel, ContainerModel, ImageModel, LOGIN_ROUTE},
};

const ROUTE_KEY: &str = "route";

/// In-memory key/value storage scoped to one dashboard session. Emptied on
/// every `AuthLogout`, whoever dispatches it.
#[derive(Debug, Default)]
pub struct SessionCache {
    entries: Mutex<HashMap<String, String>>,
}

impl SessionCache {
    pub fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Handler<Action> for SessionCache {
    fn name(&self) -> &str {
        "session"
    }

    fn handle(&self, action: &Action) {
        if matches!(action, Action::AuthLogout) {
            debug!("session: cleared on logout");
            self.clear();
        }
    }
}

/// Application root. Owns the dispatcher, every store, the alert surface and
/// the gateway, wired in that order.
pub struct Dashboard {
    dispatcher: Arc<Dispatcher<Action>>,
    app: Arc<Store<AppModel>>,
    alert_store: Arc<Store<AlertModel>>,
    containers: Arc<Store<ContainerModel>>,
    images: Arc<Store<ImageModel>>,
    alerts: Arc<AlertService>,
    gateway: Gateway,
    session: Arc<SessionCache>,
}

impl Dashboard {
    pub fn new(api_base: &str) -> Result<Self, GatewayError> {
        Self::with_client(Client::new(), api_base)
    }

    pub fn with_client(http: Client, api_base: &str) -> Result<Self, GatewayError> {
        let dispatcher = Arc::new(Dispatcher::new());
        let app = Store::attach(AppModel::default(), &dispatcher);
        let alert_store = Store::attach(AlertModel::default(), &dispatcher);
        let containers = Store::attach(ContainerModel::default(), &dispatcher);
        let images = Store::attach(ImageModel::default(), &dispatcher);
        let session = Arc::new(SessionCache::default());
        dispatcher.register(&session);
        let alerts = Arc::new(AlertService::new(Arc::clone(&dispatcher)));
        let gateway = Gateway::with_client(
            http,
            api_base,
            Arc::clone(&dispatcher),
            Arc::clone(&alerts) as Arc<dyn AlertSurface>,
        )?;
        info!(api_base, "dashboard: initialized");

        Ok(Self {
            dispatcher,
            app,
            alert_store,
            containers,
            images,
            alerts,
            gateway,
            session,
        })
    }

    /// Signs `user` in and restores the last route of this session. Without
    /// a usable user the dashboard goes to the login page.
    pub fn boot(&self, user: Option<SessionUser>) {
        match user.filter(|user| !user.email.trim().is_empty()) {
            Some(user) => {
                info!(email = %user.email, "dashboard: session restored");
                self.dispatch(Action::AuthLogin(user));
                let route = self
                    .session
                    .get(ROUTE_KEY)
                    .filter(|route| route != LOGIN_ROUTE)
                    .unwrap_or_else(|| "/".to_string());
                self.navigate(route);
            }
            None => self.navigate(LOGIN_ROUTE),
        }
    }

    /// Changes the route. Alerts belong to the page they were raised on and
    /// are cleared.
    pub fn navigate(&self, route: impl Into<String>) {
        let route = route.into();
        self.session.set(ROUTE_KEY, route.clone());
        self.dispatch(Action::RouteChange(route));
        self.alerts.clear();
    }

    pub fn logout(&self) {
        self.dispatch(Action::AuthLogout);
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher<Action>> {
        &self.dispatcher
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn alerts(&self) -> &AlertService {
        &self.alerts
    }

    pub fn session(&self) -> &SessionCache {
        &self.session
    }

    pub fn app(&self) -> &Arc<Store<AppModel>> {
        &self.app
    }

    pub fn alert_store(&self) -> &Arc<Store<AlertModel>> {
        &self.alert_store
    }

    pub fn containers(&self) -> &Arc<Store<ContainerModel>> {
        &self.containers
    }

    pub fn images(&self) -> &Arc<Store<ImageModel>> {
        &self.images
    }

    fn dispatch(&self, action: Action) {
        if let Err(err) = self.dispatcher.dispatch(action) {
            warn!(error = %err, "dashboard: dispatch failed");
        }
    }
}

#[cfg(test)]
#[path = "tests/app_tests.rs"]
mod tests;
