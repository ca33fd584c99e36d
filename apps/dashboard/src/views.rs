//! Console rendering of store state.

use std::{
    collections::HashSet,
    fmt::Write as _,
    sync::{Arc, Mutex, PoisonError},
};

use client_core::{
    models::{ContainerModel, ImageModel, PullState},
    Dashboard,
};
use flux::Subscription;
use shared::domain::{AlertId, AlertKind, ImageSearchResult};

/// Prints each alert once, as it is raised.
pub fn watch_alerts(dashboard: &Dashboard) -> Subscription {
    let shown: Arc<Mutex<HashSet<AlertId>>> = Arc::default();
    dashboard.alert_store().subscribe(move |state| {
        let mut shown = shown.lock().unwrap_or_else(PoisonError::into_inner);
        for alert in &state.alerts {
            if shown.insert(alert.id) {
                eprintln!("[{}] {}", alert_label(alert.kind), alert.message);
            }
        }
    })
}

fn alert_label(kind: AlertKind) -> &'static str {
    match kind {
        AlertKind::Info => "info",
        AlertKind::Success => "ok",
        AlertKind::Warning => "warning",
        AlertKind::Danger => "error",
    }
}

pub fn render_containers(model: &ContainerModel, host: &str) -> String {
    let containers = model.containers(host);
    if containers.is_empty() {
        return format!("no containers on {host}\n");
    }
    let mut out = format!("{:<14} {:<24} {:<28} {}\n", "ID", "NAME", "IMAGE", "STATE");
    for container in containers {
        let _ = writeln!(
            out,
            "{:<14} {:<24} {:<28} {}",
            short_id(&container.id),
            container.display_name(),
            container.image,
            container.state
        );
    }
    out
}

pub fn render_images(model: &ImageModel, host: &str) -> String {
    let images = model.images(host);
    if images.is_empty() {
        return format!("no images on {host}\n");
    }
    let mut out = format!("{:<14} {:<40} {:>10}\n", "ID", "TAG", "SIZE");
    for image in images {
        let tags = image
            .repo_tags
            .as_deref()
            .filter(|tags| !tags.is_empty())
            .map(|tags| tags.join(", "))
            .unwrap_or_else(|| "<none>".to_string());
        let _ = writeln!(
            out,
            "{:<14} {:<40} {:>10}",
            short_id(image.id.trim_start_matches("sha256:")),
            tags,
            human_size(image.size)
        );
    }
    out
}

pub fn render_search(results: &[ImageSearchResult]) -> String {
    let mut out = String::new();
    for result in results {
        let official = if result.is_official { " [official]" } else { "" };
        let _ = writeln!(out, "{} ({} stars){official}", result.name, result.star_count);
        if !result.description.is_empty() {
            let _ = writeln!(out, "    {}", result.description);
        }
    }
    out
}

/// One status line for an in-flight or finished pull.
pub fn render_pull(image: &str, pull: &PullState) -> String {
    if let Some(error) = &pull.error {
        return format!("{image}: failed: {error}");
    }
    let status = pull.status.as_deref().unwrap_or("waiting");
    match pull.progress() {
        Some((current, total)) if !pull.finished => format!(
            "{image}: {} layers, {} / {} ({status})",
            pull.layers.len(),
            human_size(current as i64),
            human_size(total as i64)
        ),
        _ if pull.finished => format!("{image}: done ({status})"),
        _ => format!("{image}: {status}"),
    }
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

fn human_size(bytes: i64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes.max(0) as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit + 1 < UNITS.len() {
        value /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes}B")
    } else {
        format!("{value:.1}{}", UNITS[unit])
    }
}
