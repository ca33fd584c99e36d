mod config;
mod views;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    ContainerVerb, Dashboard, Endpoint, ImageVerb, Request, StreamHandle,
};
use serde_json::json;
use shared::{domain::SessionUser, protocol::StreamOutcome};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{load_settings, Settings};

#[derive(Parser, Debug)]
#[command(name = "dashboard", about = "Docker dashboard client")]
struct Args {
    /// TOML settings file. Defaults to ./dashboard.toml when present.
    #[arg(long, env = "DASHBOARD_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long)]
    api_base: Option<String>,
    /// Docker host to address, as known to the dashboard API.
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    user: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(subcommand)]
    Containers(ContainerCommand),
    #[command(subcommand)]
    Images(ImageCommand),
}

#[derive(Subcommand, Debug)]
enum ContainerCommand {
    List {
        #[arg(long)]
        all: bool,
    },
    Inspect {
        id: String,
    },
    Create {
        image: String,
        #[arg(long)]
        name: Option<String>,
    },
    Start {
        id: String,
    },
    Stop {
        id: String,
    },
    Restart {
        id: String,
    },
    Pause {
        id: String,
    },
    Unpause {
        id: String,
    },
}

#[derive(Subcommand, Debug)]
enum ImageCommand {
    List,
    Search {
        term: String,
        #[arg(long, default_value_t = 25)]
        limit: u32,
    },
    Pull {
        image: String,
        #[arg(long, default_value = "latest")]
        tag: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let settings = resolve_settings(&args)?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_filter))
        .context("invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let dashboard = Dashboard::new(&settings.api_base)?;
    let _alerts = views::watch_alerts(&dashboard);
    dashboard.boot(settings.user_email.clone().map(SessionUser::new));
    if !dashboard.app().get_state().is_logged_in() {
        bail!("no user configured; pass --user or set DASHBOARD_USER");
    }
    info!(host = %settings.default_host, "dashboard: running command");

    match args.command {
        Command::Containers(command) => {
            run_container_command(&dashboard, &settings.default_host, command).await
        }
        Command::Images(command) => {
            run_image_command(&dashboard, &settings.default_host, command).await
        }
    }
}

fn resolve_settings(args: &Args) -> Result<Settings> {
    let mut settings = load_settings(args.config.as_deref())?;
    if let Some(api_base) = &args.api_base {
        settings.api_base.clone_from(api_base);
    }
    if let Some(host) = &args.host {
        settings.default_host.clone_from(host);
    }
    if let Some(user) = &args.user {
        settings.user_email = Some(user.clone());
    }
    Ok(settings)
}

async fn run_container_command(
    dashboard: &Dashboard,
    host: &str,
    command: ContainerCommand,
) -> Result<()> {
    let gateway = dashboard.gateway();
    let (verb, request) = match command {
        ContainerCommand::List { all } => (
            ContainerVerb::List,
            Request::new(host).query("all", all),
        ),
        ContainerCommand::Inspect { id } => (ContainerVerb::Inspect, Request::new(host).id(id)),
        ContainerCommand::Create { image, name } => {
            let mut request = Request::new(host).data(json!({ "Image": image }));
            if let Some(name) = name {
                request = request.query("name", name);
            }
            (ContainerVerb::Create, request)
        }
        ContainerCommand::Start { id } => (ContainerVerb::Start, Request::new(host).id(id)),
        ContainerCommand::Stop { id } => (ContainerVerb::Stop, Request::new(host).id(id)),
        ContainerCommand::Restart { id } => (ContainerVerb::Restart, Request::new(host).id(id)),
        ContainerCommand::Pause { id } => (ContainerVerb::Pause, Request::new(host).id(id)),
        ContainerCommand::Unpause { id } => (ContainerVerb::Unpause, Request::new(host).id(id)),
    };

    let payload = gateway.request(Endpoint::Containers(verb), &request).await?;

    let containers = dashboard.containers().get_state();
    match verb {
        ContainerVerb::List => print!("{}", views::render_containers(&containers, host)),
        ContainerVerb::Inspect => {
            println!("{}", serde_json::to_string_pretty(&payload.response)?);
        }
        ContainerVerb::Create => {
            if let Some(created) = &containers.last_created {
                println!("created {}", created.id);
                for warning in created.warnings.iter().flatten() {
                    println!("warning: {warning}");
                }
            }
        }
        _ => {
            if let Some(operation) = &containers.last_operation {
                println!("{:?} {}", operation.action, operation.id);
            }
        }
    }
    Ok(())
}

async fn run_image_command(dashboard: &Dashboard, host: &str, command: ImageCommand) -> Result<()> {
    let gateway = dashboard.gateway();
    match command {
        ImageCommand::List => {
            gateway
                .request(Endpoint::Images(ImageVerb::List), &Request::new(host))
                .await?;
            print!("{}", views::render_images(&dashboard.images().get_state(), host));
        }
        ImageCommand::Search { term, limit } => {
            gateway
                .request(
                    Endpoint::Images(ImageVerb::Search),
                    &Request::new(host).query("term", term).query("limit", limit),
                )
                .await?;
            print!(
                "{}",
                views::render_search(&dashboard.images().get_state().search_results)
            );
        }
        ImageCommand::Pull { image, tag } => {
            let reference = format!("{image}:{tag}");
            let handle = gateway
                .stream(
                    Endpoint::Images(ImageVerb::Pull),
                    Request::new(host)
                        .id(reference.clone())
                        .data(json!({ "fromImage": image, "tag": tag }))
                        .pattern("!"),
                )
                .await?;
            let outcome = follow_pull(dashboard, host, &reference, handle).await;
            if let StreamOutcome::Interrupted { reason, .. } = outcome {
                bail!("pull of {reference} did not finish: {reason}");
            }
        }
    }
    Ok(())
}

/// Prints pull progress until the stream closes. Ctrl-C cancels the pull.
async fn follow_pull(
    dashboard: &Dashboard,
    host: &str,
    reference: &str,
    mut handle: StreamHandle,
) -> StreamOutcome {
    loop {
        tokio::select! {
            event = handle.next_event() => {
                if event.is_none() {
                    break;
                }
                if let Some(pull) = dashboard.images().get_state().pull(host, reference) {
                    println!("{}", views::render_pull(reference, pull));
                }
            }
            _ = tokio::signal::ctrl_c() => handle.cancel(),
        }
    }
    let outcome = handle.closed().await;
    if let Some(pull) = dashboard.images().get_state().pull(host, reference) {
        println!("{}", views::render_pull(reference, pull));
    }
    outcome
}
