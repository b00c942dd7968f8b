//! Livepub application composition root
//!
//! Wires configuration, the generation backend and one materialization slot
//! into a command-line consumer that behaves like a map popup: it requests a
//! publication, waits until it is ready, holds it while "open", and deletes
//! it when closed.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use livepub_materialize::{
    BackendConfig, BackendFactory, ChannelListener, CleanupStatus, FailureReason,
    GenerationBackend, Materializer, PollPolicy, PublicationProfile, ReadyArtifact,
    RequestDescriptor, SlotEvent,
};

#[derive(Debug, Clone, Parser)]
#[command(
    name = "livepub",
    version,
    about = "Request a live publication, wait until it is generated, and clean it up on exit"
)]
pub struct Cli {
    /// Site or transect ids; each id supersedes the previous request in the same slot
    #[arg(required = true)]
    pub ids: Vec<String>,

    /// Publication profile (micropublication | shoreline) [env: LIVEPUB_PROFILE]
    #[arg(long)]
    pub profile: Option<PublicationProfile>,

    /// GeoJSON geometry sent with every request
    #[arg(long)]
    pub geometry: Option<String>,

    /// Publication service base URL [env: LIVEPUB_BASE_URL]
    #[arg(long)]
    pub base_url: Option<String>,

    /// Probes before giving up [env: LIVEPUB_POLL_MAX_ATTEMPTS]
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Milliseconds between probes [env: LIVEPUB_POLL_INTERVAL_MS]
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// Milliseconds to wait between successive submissions
    #[arg(long, default_value_t = 0)]
    pub stagger_ms: u64,

    /// Delete the publication as soon as it is ready instead of holding it
    #[arg(long)]
    pub release: bool,

    /// Emit JSON logs
    #[arg(long)]
    pub json: bool,
}

/// Resolved configuration: CLI flags over environment over profile defaults
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub profile: PublicationProfile,
    pub backend: BackendConfig,
    pub policy: PollPolicy,
}

impl AppConfig {
    pub fn load(cli: &Cli) -> Result<Self> {
        livepub_common::config::load_dotenv();

        let profile = match cli.profile {
            Some(profile) => profile,
            None => PublicationProfile::from_env()?,
        };

        let mut backend = BackendConfig::from_env(profile)?;
        if let Some(base_url) = &cli.base_url {
            backend.base_url = base_url.trim_end_matches('/').to_string();
            backend.validate()?;
        }

        let defaults = PollPolicy::from_env(profile.poll_policy())?;
        let policy = PollPolicy::new(
            cli.max_attempts.unwrap_or(defaults.max_attempts),
            cli.interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.interval),
        )?;

        Ok(Self {
            profile,
            backend,
            policy,
        })
    }
}

/// How the last submitted session ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Ready {
        artifact: ReadyArtifact,
        cleanup: Option<CleanupStatus>,
    },
    Failed(FailureReason),
    /// Shutdown arrived before the publication settled
    Interrupted { cleanup: Option<CleanupStatus> },
}

/// Submit every id into one slot, wait for the last one, then hold the
/// artifact until `shutdown` resolves (or release it right away).
///
/// `shutdown` is watched from the start, so an interrupt while the
/// publication is still generating dismisses the slot as well.
pub async fn run(
    cli: &Cli,
    config: AppConfig,
    shutdown: impl Future<Output = ()>,
) -> Result<RunOutcome> {
    let backend = BackendFactory::create(config.backend.clone())?;
    run_with_backend(cli, config, backend, shutdown).await
}

pub async fn run_with_backend(
    cli: &Cli,
    config: AppConfig,
    backend: Arc<dyn GenerationBackend>,
    shutdown: impl Future<Output = ()>,
) -> Result<RunOutcome> {
    tokio::pin!(shutdown);

    let materializer = Materializer::new(backend, config.policy)?;
    let (listener, mut events) = ChannelListener::new();
    let slot = materializer.slot(Arc::new(listener));

    let geometry: Option<serde_json::Value> = cli
        .geometry
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .context("--geometry is not valid JSON")?;

    let mut last = None;
    let mut interrupted = false;
    for (i, id) in cli.ids.iter().enumerate() {
        if i > 0 && cli.stagger_ms > 0 {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(cli.stagger_ms)) => {}
                _ = &mut shutdown => {
                    interrupted = true;
                    break;
                }
            }
        }
        let mut descriptor = RequestDescriptor::new(id.clone());
        if let Some(geometry) = &geometry {
            descriptor = descriptor.with_geometry(geometry.clone());
        }
        last = Some(slot.submit(descriptor)?);
    }
    let Some(session) = last else {
        bail!("No ids to request");
    };

    tracing::info!(
        profile = %config.profile,
        base_url = %config.backend.base_url,
        max_attempts = config.policy.max_attempts,
        interval_ms = config.policy.interval.as_millis() as u64,
        "Waiting for publication"
    );

    let outcome = loop {
        if interrupted {
            tracing::info!("Shutdown requested before the publication settled");
            break None;
        }
        let event = tokio::select! {
            event = events.recv() => event,
            _ = &mut shutdown => {
                tracing::info!("Shutdown requested before the publication settled");
                break None;
            }
        };
        let Some(event) = event else {
            bail!("Slot listener closed before the publication settled");
        };
        let is_last = event.session() == session.id();
        match event {
            SlotEvent::Progress { poll, .. } => {
                tracing::info!(
                    attempt = poll.attempt,
                    max_attempts = poll.max_attempts,
                    progress = %format!("{:.0}%", poll.progress_fraction() * 100.0),
                    "Publication not ready yet"
                );
            }
            SlotEvent::Ready(artifact) => {
                println!("{}", artifact.url);
                if is_last {
                    break Some(RunOutcome::Ready {
                        artifact,
                        cleanup: None,
                    });
                }
            }
            SlotEvent::Failed { reason, .. } => {
                tracing::error!(reason = %reason, "Publication failed");
                if is_last {
                    break Some(RunOutcome::Failed(reason));
                }
            }
        }
    };

    if matches!(outcome, Some(RunOutcome::Ready { .. })) && !cli.release {
        tracing::info!("Holding publication; press Ctrl+C to release it");
        (&mut shutdown).await;
    }

    slot.dismiss();
    let cleanup_budget = config.backend.http_timeout + Duration::from_secs(1);
    let cleanup = match tokio::time::timeout(cleanup_budget, session.cleanup_settled()).await {
        Ok(status) => Some(status),
        Err(_) => {
            tracing::warn!("Gave up waiting for publication cleanup");
            None
        }
    };

    Ok(match outcome {
        Some(RunOutcome::Ready { artifact, .. }) => RunOutcome::Ready { artifact, cleanup },
        Some(failed) => failed,
        None => RunOutcome::Interrupted { cleanup },
    })
}
