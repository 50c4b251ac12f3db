//! Demo CLI wiring a `confd_provider::Provider` up to one remote
//! configuration endpoint over HTTP and printing the published mapping
//! whenever it changes.

mod http_client;

use clap::Parser;
use confd_provider::config::ProviderOptionsBuilder;
use confd_provider::client_factory::CachingClientFactory;
use confd_provider::model::Selector;
use confd_provider::provider::Provider;
use http_client::HttpRemoteClient;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Remote configuration service endpoint, e.g. https://cfg.example.com
    #[arg(long)]
    endpoint: String,

    /// Key filter, supporting a trailing `*` wildcard.
    #[arg(long, default_value = "*")]
    selector: String,

    /// Strip this prefix from published keys.
    #[arg(long)]
    key_prefix: Option<String>,

    /// Deadline for the initial load before giving up.
    #[arg(long, default_value = "30")]
    startup_timeout: u64,

    /// Don't fail startup if the initial load can't complete.
    #[arg(long)]
    optional: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let clients = Arc::new(CachingClientFactory::new(|endpoint: &str| {
        HttpRemoteClient::new(endpoint).map(|c| Arc::new(c) as Arc<dyn confd_provider::client::RemoteClient>)
    }));

    let mut builder = ProviderOptionsBuilder::new()
        .endpoint(args.endpoint)
        .select(Selector { key_filter: args.selector, label_filter: None, snapshot_name: None })
        .startup_timeout(Duration::from_secs(args.startup_timeout))
        .optional(args.optional);
    if let Some(prefix) = args.key_prefix {
        builder = builder.trim_key_prefix(prefix);
    }

    let provider = Provider::new(clients, builder.build());

    if let Err(err) = provider.load(args.optional, Duration::from_secs(args.startup_timeout)).await {
        error!(error = %err, "initial load failed");
        std::process::exit(1);
    }

    info!(settings = provider.data().len(), "initial load complete");
    for (key, value) in provider.data().iter() {
        println!("{key} = {value}");
    }

    let mut reload = provider.on_reload();
    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = provider.try_refresh().await {
                    error!(error = %err, "refresh failed");
                }
            }
            result = reload.changed() => {
                if result.is_err() {
                    break;
                }
                info!("configuration changed, republishing");
                for (key, value) in provider.data().iter() {
                    println!("{key} = {value}");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                provider.shutdown();
                break;
            }
        }
    }
}
