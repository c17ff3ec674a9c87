// Shared command context: config resolution, identity and the backend client.

use std::future::Future;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Args;
use mdroom_client::api::ApiClient;
use mdroom_client::config::ClientConfig;
use mdroom_client::identity;
use mdroom_common::types::UserContext;

use crate::output::OutputFormat;

#[derive(Debug, Clone, Default, Args)]
pub struct GlobalArgs {
    /// Config file (default: ~/.mdroom/config.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the document backend URL.
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Override the collaboration endpoint URL.
    #[arg(long, global = true)]
    pub collab_url: Option<String>,

    /// Override the backend account id.
    #[arg(long, global = true)]
    pub user_id: Option<String>,

    /// Force JSON output.
    #[arg(long, global = true)]
    pub json: bool,
}

pub struct CliContext {
    pub config: ClientConfig,
    pub format: OutputFormat,
}

impl CliContext {
    pub fn from_args(args: &GlobalArgs) -> anyhow::Result<Self> {
        let config = match &args.config {
            Some(path) => ClientConfig::load_from(path)
                .with_context(|| format!("failed to load config `{}`", path.display()))?,
            None => ClientConfig::load(),
        };
        Ok(Self { config: apply_overrides(config, args), format: OutputFormat::detect(args.json) })
    }

    pub fn require_user_id(&self) -> anyhow::Result<&str> {
        if self.config.user_id.trim().is_empty() {
            bail!("no user_id configured; set it in ~/.mdroom/config.toml or pass --user-id");
        }
        Ok(&self.config.user_id)
    }

    pub fn api(&self) -> anyhow::Result<ApiClient> {
        let user_id = self.require_user_id()?;
        ApiClient::new(&self.config.api_url, user_id, self.config.timeouts.request())
            .context("failed to build backend client")
    }

    pub fn user(&self) -> anyhow::Result<UserContext> {
        identity::user_context(&self.config).context("failed to resolve local identity")
    }
}

fn apply_overrides(mut config: ClientConfig, args: &GlobalArgs) -> ClientConfig {
    if let Some(url) = &args.api_url {
        config.api_url = url.clone();
    }
    if let Some(url) = &args.collab_url {
        config.collab_url = url.clone();
    }
    if let Some(user_id) = &args.user_id {
        config.user_id = user_id.clone();
    }
    config
}

/// Run a future to completion on a fresh multi-threaded runtime.
pub fn block_on<F: Future>(future: F) -> anyhow::Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    Ok(runtime.block_on(future))
}
