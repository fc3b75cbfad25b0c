//! Implementation of `herald controller`, `herald webhook` and `herald run`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Args;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::adapters::loops::LoopsClient;
use crate::adapters::memory::{load_manifests, InMemoryEventRecorder, InMemoryStore};
use crate::adapters::resend::{ResendClient, ResendClientConfig};
use crate::domain::models::Config;
use crate::domain::ports::{AudienceProvider, EventRecorder, ResourceStore};
use crate::infrastructure::config::ConfigLoader;
use crate::infrastructure::logging::{LogConfig, LoggerImpl};
use crate::services::{Context, ControllerManager, ProviderService, WebhookServer};

#[derive(Args, Debug, Default, Clone)]
pub struct ServeArgs {
    /// Directory of YAML manifests to seed the store with
    #[arg(short, long)]
    pub manifests: Option<PathBuf>,
}

/// Which halves of the engine a process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Controller,
    Webhook,
    All,
}

impl Mode {
    const fn runs_controllers(self) -> bool {
        matches!(self, Self::Controller | Self::All)
    }

    const fn runs_webhook(self) -> bool {
        matches!(self, Self::Webhook | Self::All)
    }
}

/// Reconciler context backed by the real provider clients.
pub fn build_context<St: ResourceStore>(
    config: Arc<Config>,
    store: Arc<St>,
    recorder: Arc<dyn EventRecorder>,
) -> Result<Arc<Context<St>>> {
    let resend = ResendClient::with_config(ResendClientConfig::from(&config.email_provider))
        .context("Failed to build email provider client")?;
    let provider = ProviderService::new(
        Arc::new(resend),
        config.email_provider.from.clone(),
        config.email_provider.reply_to.clone(),
    );

    let audience: Option<Arc<dyn AudienceProvider>> = if config.audience_provider.enabled {
        let loops = LoopsClient::new(&config.audience_provider)
            .context("Failed to build audience provider client")?;
        Some(Arc::new(loops))
    } else {
        None
    };

    Ok(Arc::new(Context::new(store, provider, audience, recorder, config)))
}

/// Flips to `true` on Ctrl-C.
fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested");
                let _ = tx.send(true);
            }
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C"),
        }
    });
    rx
}

async fn run_controllers<St: ResourceStore + 'static>(
    ctx: Arc<Context<St>>,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    ControllerManager::with_reconcilers(&ctx)
        .run(shutdown)
        .await
        .context("Controller runtime failed")
}

async fn run_webhook<St: ResourceStore + 'static>(
    config: &Config,
    store: Arc<St>,
    recorder: Arc<dyn EventRecorder>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let server = WebhookServer::new(store, recorder, config.webhook.clone())?;
    server
        .serve_with_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
}

/// Run `mode` over `store` until `shutdown` flips.
pub async fn run<St: ResourceStore + 'static>(
    mode: Mode,
    config: Arc<Config>,
    store: Arc<St>,
    recorder: Arc<dyn EventRecorder>,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let controllers = async {
        if mode.runs_controllers() {
            let ctx =
                build_context(Arc::clone(&config), Arc::clone(&store), Arc::clone(&recorder))?;
            run_controllers(ctx, shutdown.clone()).await
        } else {
            Ok(())
        }
    };
    let webhook = async {
        if mode.runs_webhook() {
            run_webhook(&config, Arc::clone(&store), Arc::clone(&recorder), shutdown.clone()).await
        } else {
            Ok(())
        }
    };
    tokio::try_join!(controllers, webhook)?;
    Ok(())
}

pub async fn execute(mode: Mode, args: ServeArgs, config_path: Option<&Path>) -> Result<()> {
    let config = Arc::new(ConfigLoader::load_optional(config_path)?);
    let _logger = LoggerImpl::init(&LogConfig::from_settings(&config.logging)?)?;
    info!(?mode, config = ?config, "Starting herald");

    let store = Arc::new(InMemoryStore::new());
    if let Some(dir) = &args.manifests {
        load_manifests(store.as_ref(), dir)
            .await
            .with_context(|| format!("Failed to load manifests from {}", dir.display()))?;
    }
    let recorder: Arc<dyn EventRecorder> = Arc::new(InMemoryEventRecorder::new());

    run(mode, config, store, recorder, shutdown_signal()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{AudienceProviderConfig, EmailProviderConfig};

    fn config(audience: bool) -> Arc<Config> {
        Arc::new(Config {
            email_provider: EmailProviderConfig {
                api_key: "re_test".into(),
                from: "noreply@example.com".into(),
                reply_to: "support@example.com".into(),
                ..EmailProviderConfig::default()
            },
            audience_provider: AudienceProviderConfig {
                enabled: audience,
                api_key: "loops_test".into(),
                newsletter_list_id: "list".into(),
                ..AudienceProviderConfig::default()
            },
            ..Config::default()
        })
    }

    #[test]
    fn test_modes() {
        assert!(Mode::All.runs_controllers() && Mode::All.runs_webhook());
        assert!(!Mode::Controller.runs_webhook());
        assert!(!Mode::Webhook.runs_controllers());
    }

    #[test]
    fn test_build_context_registers_audience_when_enabled() {
        let store = Arc::new(InMemoryStore::new());
        let recorder: Arc<dyn EventRecorder> = Arc::new(InMemoryEventRecorder::new());

        let with = build_context(config(true), Arc::clone(&store), Arc::clone(&recorder)).unwrap();
        let without = build_context(config(false), store, recorder).unwrap();

        assert_eq!(with.contact_readiness().len(), 2);
        assert_eq!(without.contact_readiness().len(), 1);
    }

    #[tokio::test]
    async fn test_controllers_stop_on_shutdown() {
        let (tx, rx) = watch::channel(false);
        let store = Arc::new(InMemoryStore::new());
        let recorder: Arc<dyn EventRecorder> = Arc::new(InMemoryEventRecorder::new());
        let handle = tokio::spawn(run(Mode::Controller, config(false), store, recorder, rx));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("controllers should stop")
            .unwrap();
        assert!(result.is_ok());
    }
}
