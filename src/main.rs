//! Projection Mapper - projective compositing with live output
//!
//! Main entry point: loads configuration and the project, then runs the control
//! server, the editing render loop and the output surface until Ctrl-C.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use parking_lot::Mutex;
use tokio::sync::watch;

use projection_mapper::config::{AppConfig, ConfigOverrides};
use projection_mapper::output::{describe_displays, pick_output_display};
use projection_mapper::project::{load_project, save_project, Project, SharedProject};
use projection_mapper::render::{run_editing_loop, RenderLoopConfig, Surface};
use projection_mapper::sync::{sync_channel, OutputSurface};
use projection_mapper::ControlServer;

#[derive(Parser, Debug)]
#[command(name = "projection-mapper", version, about)]
struct Cli {
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Project file to open
    #[arg(long)]
    project: Option<PathBuf>,

    /// WebSocket control port
    #[arg(long)]
    port: Option<u16>,

    /// Render rate for both surfaces
    #[arg(long)]
    fps: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_or_default(cli.config.as_deref())
        .context("failed to load configuration")?;
    config.apply_overrides(ConfigOverrides {
        project_path: cli.project,
        control_port: cli.port,
        target_fps: cli.fps,
    });

    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .format_timestamp_millis()
        .init();

    log::info!("Starting Projection Mapper v{}", env!("CARGO_PKG_VERSION"));

    let project = open_project(&config)?.into_shared();

    // Output display
    let displays = describe_displays(&config.displays);
    let preferred = match &config.output_display_id {
        Some(id) => Some(id.clone()),
        None => project.read().await.global().output_display_id.clone(),
    };
    let display = pick_output_display(&displays, preferred.as_deref());
    let (output_width, output_height) = match display {
        Some(d) => {
            log::info!("Output display: {}", d.name);
            project
                .write()
                .await
                .select_output_display(Some(d.id.clone()));
            (d.bounds.width, d.bounds.height)
        }
        None => {
            log::info!(
                "No output display available, rendering output off-screen at {}x{}",
                config.output_width,
                config.output_height
            );
            (config.output_width, config.output_height)
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server = ControlServer::bind(
        project.clone(),
        SocketAddr::from(([0, 0, 0, 0], config.control_port)),
    )
    .await
    .with_context(|| format!("failed to bind control port {}", config.control_port))?;
    let server_task = tokio::spawn(server.run(shutdown_rx.clone()));

    let (mut editing, output_endpoint) = sync_channel();
    editing.designate_output(display.map(|d| d.id.clone()));
    let output = OutputSurface::with_surface(output_endpoint, output_width, output_height);
    let output_task = tokio::spawn(output.run(config.target_fps, shutdown_rx.clone()));

    let editing_surface = Arc::new(Mutex::new(Surface::new(
        config.output_width,
        config.output_height,
    )));
    let mut editing_task = tokio::spawn(run_editing_loop(
        project.clone(),
        editing,
        editing_surface,
        RenderLoopConfig {
            target_fps: config.target_fps,
        },
        shutdown_rx.clone(),
    ));

    let autosave_task = config.autosave_secs.map(|secs| {
        tokio::spawn(autosave(
            project.clone(),
            Duration::from_secs(secs.max(1)),
            shutdown_rx.clone(),
        ))
    });

    let editing_result = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl-C")?;
            log::info!("Shutting down");
            let _ = shutdown_tx.send(true);
            editing_task.await.context("editing loop panicked")?
        }
        finished = &mut editing_task => {
            let _ = shutdown_tx.send(true);
            finished.context("editing loop panicked")?
        }
    };

    let output_result = output_task.await.context("output loop panicked")?;
    server_task.await.context("control server panicked")?;
    if let Some(task) = autosave_task {
        task.await.context("autosave panicked")?;
    }

    let frames = editing_result.context("editing surface failed")?;
    let output_frames = output_result.context("output surface failed")?;
    log::info!(
        "Stopped after {} editing frames and {} output frames",
        frames,
        output_frames
    );
    Ok(())
}

/// Open the configured project, or start a fresh one
fn open_project(config: &AppConfig) -> anyhow::Result<Project> {
    let mut project = Project::default();
    let Some(path) = &config.project_path else {
        return Ok(project);
    };
    if path.exists() {
        let loaded = load_project(path)
            .with_context(|| format!("failed to open project {}", path.display()))?;
        project.load(loaded, Some(path.clone()));
    } else {
        log::info!("{} does not exist yet, starting a new project", path.display());
        project.mark_saved(path.clone());
    }
    Ok(project)
}

/// Save the project whenever it is dirty and has a path
async fn autosave(project: SharedProject, every: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        let pending = {
            let project = project.read().await;
            match project.path() {
                Some(path) if project.is_dirty() => Some((project.clone(), path.clone())),
                _ => None,
            }
        };
        let Some((snapshot, path)) = pending else {
            continue;
        };
        match save_project(&snapshot, &path) {
            Ok(()) => {
                let mut project = project.write().await;
                // Edits made while saving stay dirty
                if project.modified == snapshot.modified {
                    project.mark_saved(path);
                }
            }
            Err(e) => log::warn!("Autosave failed: {}", e),
        }
    }
}
