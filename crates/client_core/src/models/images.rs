use std::collections::{BTreeMap, HashMap};

use flux::Model;
use shared::{
    domain::{ImageSearchResult, ImageSummary, PullProgress},
    protocol::{Action, ActionKind, DockerAction, StreamClosedPayload, StreamEvent, StreamOutcome},
};

use super::decode;

/// A pull is identified by the host and the image reference passed as the
/// request id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PullKey {
    pub host: String,
    pub image: String,
}

impl PullKey {
    pub fn new(host: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            image: image.into(),
        }
    }

    fn from_parts(host: &str, id: Option<&str>) -> Self {
        Self::new(host, id.unwrap_or_default())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerProgress {
    pub status: String,
    pub current: Option<u64>,
    pub total: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullState {
    pub layers: BTreeMap<String, LayerProgress>,
    pub status: Option<String>,
    pub error: Option<String>,
    pub finished: bool,
}

impl PullState {
    /// Summed byte progress over the layers that report a total.
    pub fn progress(&self) -> Option<(u64, u64)> {
        let (current, total) = self
            .layers
            .values()
            .filter_map(|layer| Some((layer.current.unwrap_or(0), layer.total?)))
            .fold((0u64, 0u64), |(current, total), (c, t)| {
                (current.saturating_add(c), total.saturating_add(t))
            });
        (total > 0).then_some((current, total))
    }

    fn apply(&mut self, progress: PullProgress) {
        if let Some(error) = progress.error {
            self.error = Some(error);
            return;
        }
        let status = progress.status.unwrap_or_default();
        match progress.id {
            Some(layer) if progress.progress_detail.is_some() || !status.is_empty() => {
                let entry = self.layers.entry(layer).or_default();
                if let Some(detail) = progress.progress_detail {
                    entry.current = detail.current.or(entry.current);
                    entry.total = detail.total.or(entry.total);
                }
                entry.status = status;
            }
            _ if !status.is_empty() => self.status = Some(status),
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageModel {
    pub hosts: HashMap<String, Vec<ImageSummary>>,
    pub search_results: Vec<ImageSearchResult>,
    pub pulls: BTreeMap<PullKey, PullState>,
}

impl ImageModel {
    pub fn images(&self, host: &str) -> &[ImageSummary] {
        self.hosts.get(host).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn pull(&self, host: &str, image: &str) -> Option<&PullState> {
        self.pulls.get(&PullKey::new(host, image))
    }

    fn pull_progress(&mut self, event: &StreamEvent) -> bool {
        let Some(progress) = decode::<PullProgress>(Self::NAME, "pull progress", &event.response)
        else {
            return false;
        };
        let pull = self
            .pulls
            .entry(PullKey::from_parts(&event.host, event.id.as_deref()))
            .or_default();
        // a new pull of the same image starts from scratch
        if pull.finished {
            *pull = PullState::default();
        }
        pull.apply(progress);
        true
    }

    fn pull_closed(&mut self, closed: &StreamClosedPayload) -> bool {
        if closed.action != DockerAction::PullImage {
            return false;
        }
        let pull = self
            .pulls
            .entry(PullKey::from_parts(&closed.host, closed.id.as_deref()))
            .or_default();
        pull.finished = true;
        if let StreamOutcome::Interrupted { reason, .. } = &closed.outcome {
            pull.error.get_or_insert_with(|| reason.clone());
        }
        true
    }
}

impl Model for ImageModel {
    type Action = Action;
    const NAME: &'static str = "images";

    fn reacts_to(kind: ActionKind) -> bool {
        matches!(
            kind,
            ActionKind::Docker(
                DockerAction::ListImages | DockerAction::SearchImages | DockerAction::PullImage
            ) | ActionKind::StreamClosed
        )
    }

    fn reduce(&mut self, action: &Action) -> bool {
        match action {
            Action::Docker {
                kind: DockerAction::ListImages,
                payload,
            } => {
                let Some(images) = decode(Self::NAME, "image list", &payload.response) else {
                    return false;
                };
                self.hosts.insert(payload.host.clone(), images);
                true
            }
            Action::Docker {
                kind: DockerAction::SearchImages,
                payload,
            } => {
                let Some(results) = decode(Self::NAME, "image search", &payload.response) else {
                    return false;
                };
                self.search_results = results;
                true
            }
            // a pull made in request mode: the body is the whole progress log
            Action::Docker {
                kind: DockerAction::PullImage,
                payload,
            } => {
                self.pulls
                    .entry(PullKey::from_parts(&payload.host, payload.id.as_deref()))
                    .or_default()
                    .finished = true;
                true
            }
            Action::DockerStream {
                kind: DockerAction::PullImage,
                event,
            } => self.pull_progress(event),
            Action::StreamClosed(closed) => self.pull_closed(closed),
            _ => false,
        }
    }
}
