//! Background process running every event subscription.

use std::{env, sync::Arc};

use gatehouse_server::config::loader::{load_config, resolve_config_path};
use gatehouse_server::events::RedisStreamBus;
use gatehouse_server::mailing::HttpMailingList;
use gatehouse_server::workers::runner::{RunnerConfig, SubscriptionRunner};
use gatehouse_server::workers::{WorkerDeps, registry};
use gatehouse_server::{create_cache_backend, create_storage};

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound) {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    gatehouse_server::observability::init_tracing();

    let (config_path, source) =
        resolve_config_path(env::args().skip(1), env::var("GATEHOUSE_CONFIG").ok());
    let cfg = match load_config(Some(&config_path)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };
    tracing::info!(path = %config_path, source = %source, "Configuration loaded");
    gatehouse_server::observability::apply_logging(&cfg.logging);

    if !cfg.redis.enabled {
        eprintln!("Workers require Redis: set redis.enabled = true");
        std::process::exit(2);
    }

    let cache = create_cache_backend(&cfg.redis).await;
    let Some(pool) = cache.redis_pool().cloned() else {
        eprintln!("Workers require a reachable Redis at {}", cfg.redis.url);
        std::process::exit(2);
    };

    let storage = match create_storage(&cfg.database).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Storage initialization failed: {e}");
            std::process::exit(2);
        }
    };

    let mailing = match HttpMailingList::new(&cfg.mailing) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("Mailing client initialization failed: {e}");
            std::process::exit(2);
        }
    };

    let deps = WorkerDeps {
        cache,
        users: storage.users,
        bus: Arc::new(RedisStreamBus::new(pool)),
        mailing: Arc::new(mailing),
    };

    let runner_config = Arc::new(RunnerConfig::from_config(&cfg));
    let handles: Vec<_> = registry(&deps)
        .into_iter()
        .map(|worker| {
            tracing::info!(
                topic = worker.topic(),
                subscription = worker.subscription(),
                "starting worker"
            );
            SubscriptionRunner::new(worker, runner_config.clone()).start()
        })
        .collect();

    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
    for handle in handles {
        handle.abort();
    }
}
