use flux::Model;
use shared::{
    domain::SessionUser,
    protocol::{Action, ActionKind},
};

pub const LOGIN_ROUTE: &str = "/login";

/// Session and navigation state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppModel {
    pub user: Option<SessionUser>,
    pub route: String,
}

impl Default for AppModel {
    fn default() -> Self {
        Self {
            user: None,
            route: "/".to_string(),
        }
    }
}

impl AppModel {
    pub fn is_logged_in(&self) -> bool {
        self.user.is_some()
    }
}

impl Model for AppModel {
    type Action = Action;
    const NAME: &'static str = "app";

    fn reacts_to(kind: ActionKind) -> bool {
        matches!(
            kind,
            ActionKind::AuthLogin | ActionKind::AuthLogout | ActionKind::RouteChange
        )
    }

    fn reduce(&mut self, action: &Action) -> bool {
        match action {
            Action::AuthLogin(user) if self.user.as_ref() != Some(user) => {
                self.user = Some(user.clone());
                true
            }
            Action::AuthLogout if self.user.is_some() || self.route != LOGIN_ROUTE => {
                self.user = None;
                self.route = LOGIN_ROUTE.to_string();
                true
            }
            Action::RouteChange(route) if *route != self.route => {
                self.route.clone_from(route);
                true
            }
            _ => false,
        }
    }
}
