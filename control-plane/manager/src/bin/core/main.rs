//! The core manager: volume, snapshot and group lifecycle orchestration.

/// The controller logic shared by all resources.
pub(crate) mod controller;
/// The group and group snapshot related operations.
pub(crate) mod group;
/// The snapshot related operations.
pub(crate) mod snapshot;
/// The volume related operations.
pub(crate) mod volume;

#[cfg(test)]
mod tests;

use controller::{
    backend::fake::FakeBackend,
    image::FakeImages,
    keys::FakeKeys,
    notify::EventNotifier,
    quota::MemQuotas,
    registry::{BackendState, CoreConfig, Registry},
};
use vol_port::types::v0::{store::mem::MemStore, transport::BackendHost};

use clap::Parser;
use std::sync::Arc;

/// The Cli arguments for this binary.
#[derive(Debug, Parser)]
pub(crate) struct CliArgs {
    /// The name of the host this manager instance runs on. Resources whose
    /// host component differs are not managed by this instance.
    #[clap(long, default_value = "localhost", env = "MANAGER_HOST")]
    pub(crate) host: String,

    /// The availability zone assigned to resources which request none and
    /// have no source to inherit one from.
    #[clap(long, default_value = "nova")]
    pub(crate) default_availability_zone: String,

    /// The maximum number of concurrent create volume requests.
    #[clap(long, default_value = "10")]
    pub(crate) create_volume_limit: usize,

    /// How many times a failed create may be rescheduled onto another backend.
    #[clap(long, default_value = "3")]
    pub(crate) schedule_retries: u32,

    /// The period at which an asynchronous backend migration is polled.
    #[clap(long, default_value = "1s")]
    pub(crate) poll_period: humantime::Duration,

    /// The maximum number of migration poll attempts before the volume is
    /// placed in maintenance.
    #[clap(long, default_value = "60")]
    pub(crate) poll_attempts: u32,

    /// A backend to register at startup, formatted as `host@backend#pool`.
    #[clap(long, default_value = "localhost@fake#pool-a")]
    pub(crate) backend: String,

    /// The capacity in GiB of the startup backend.
    #[clap(long, default_value = "1024")]
    pub(crate) backend_capacity: u64,
}
impl CliArgs {
    fn args() -> Self {
        CliArgs::parse()
    }
}

impl From<&CliArgs> for CoreConfig {
    fn from(args: &CliArgs) -> Self {
        Self {
            host: args.host.clone(),
            default_availability_zone: args.default_availability_zone.as_str().into(),
            create_volume_limit: args.create_volume_limit,
            schedule_retries: args.schedule_retries,
            poll_period: args.poll_period.into(),
            poll_attempts: args.poll_attempts,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli_args = CliArgs::args();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
    tracing::info!(?cli_args, "starting core manager");
    server(cli_args).await
}

async fn server(cli_args: CliArgs) -> anyhow::Result<()> {
    let registry = Registry::new(
        MemStore::new(),
        Arc::new(MemQuotas::default()),
        Arc::new(EventNotifier::default()),
        Arc::new(FakeBackend::new()),
        Arc::new(FakeImages::default()),
        Arc::new(FakeKeys {}),
        CoreConfig::from(&cli_args),
    );
    registry.add_backend(
        BackendHost::from(cli_args.backend.as_str()),
        BackendState::new(
            cli_args.default_availability_zone.as_str().into(),
            cli_args.backend_capacity,
        ),
    );
    registry.init().await;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    Ok(())
}
