use std::{process, sync::Arc};

use cachegate::{
    cache::{
        ActorId, CacheHooks, CacheManager, CacheState, DriverRegistry, PolicyStore,
        SnapshotWriter,
        drivers::{FilesystemDriver, MemoryDriver, ProxyCacheDriver},
        key_set, with_flush_log,
    },
    config,
    infra::{
        error::InfraError,
        http,
        store::{FileOptionStore, FileScratchStore},
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &InfraError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), InfraError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(config::ServeArgs::default()));

    telemetry::init(&settings.logging)?;
    let manager = Arc::new(build_manager(&settings)?);

    match command {
        config::Command::Serve(_) => run_serve(&settings, manager).await,
        config::Command::Purge(args) => run_purge(manager, args).await,
        config::Command::Flush(args) => run_flush(manager, args).await,
        config::Command::Drivers => run_drivers(manager).await,
        config::Command::Snapshot(args) => run_snapshot(&settings, manager, args).await,
    }
}

fn build_registry(settings: &config::Settings) -> Result<DriverRegistry, InfraError> {
    let registry = DriverRegistry::new();

    if settings.proxy.enabled {
        let proxy = ProxyCacheDriver::new(
            &settings.proxy.address,
            settings.proxy.timeout,
            &settings.site.home,
        )?;
        registry.register(Arc::new(proxy));
    }
    registry.register(Arc::new(MemoryDriver::new(settings.memory.limit.get())));
    if settings.filesystem.enabled {
        registry.register(Arc::new(FilesystemDriver::new(
            settings.filesystem.directory.clone(),
        )));
    }

    Ok(registry)
}

fn build_manager(settings: &config::Settings) -> Result<CacheManager, InfraError> {
    let registry = Arc::new(build_registry(settings)?);

    let mut policy = PolicyStore::new(Arc::new(FileOptionStore::new(
        settings.policy.file.clone(),
    )));
    if let Some(path) = &settings.policy.snapshot {
        policy = policy.with_snapshot(SnapshotWriter::new(path.clone()));
    }

    Ok(CacheManager::new(
        registry,
        Arc::new(policy),
        Arc::new(CacheHooks::new()),
        Arc::new(FileScratchStore::new(settings.scratch.directory.clone())),
        settings.site.home.clone(),
    ))
}

async fn run_serve(settings: &config::Settings, manager: Arc<CacheManager>) -> Result<(), InfraError> {
    info!(
        target = "cachegate::serve",
        driver = %manager.active_driver_label().await,
        home = %manager.home(),
        "Starting admin service"
    );

    let router = http::build_admin_router(CacheState::new(manager));
    http::serve(settings.server.addr, router).await
}

async fn run_purge(manager: Arc<CacheManager>, args: config::PurgeArgs) -> Result<(), InfraError> {
    let actor = args.actor.map(ActorId::new);
    let (outcome, log) = with_flush_log(manager.purge_detailed(key_set(args.keys))).await;
    manager.finalize(actor.as_ref(), &log).await?;

    info!(
        target = "cachegate::purge",
        outcome = outcome.label(),
        purged = outcome.purged_keys().map_or(0, |keys| keys.len()),
        "Purge finished"
    );

    if outcome.succeeded() {
        Ok(())
    } else {
        Err(InfraError::operation(format!("purge {}", outcome.label())))
    }
}

async fn run_flush(manager: Arc<CacheManager>, args: config::FlushArgs) -> Result<(), InfraError> {
    let actor = args.actor.map(ActorId::new);
    let (outcome, log) = with_flush_log(manager.flush_all_detailed()).await;
    manager.finalize(actor.as_ref(), &log).await?;

    info!(
        target = "cachegate::flush",
        outcome = outcome.label(),
        cleared = outcome.cleared(),
        "Flush finished"
    );

    if outcome.succeeded() {
        Ok(())
    } else {
        Err(InfraError::operation(format!("flush {}", outcome.label())))
    }
}

async fn run_drivers(manager: Arc<CacheManager>) -> Result<(), InfraError> {
    let active = manager.active_driver_label().await;
    for driver in manager.list_available_drivers().await {
        let marker = if driver.label == active { "*" } else { " " };
        let status = if driver.available { "available" } else { "unreachable" };
        println!("{marker} {:<12} {:<20} {status}", driver.id, driver.label);
    }
    Ok(())
}

async fn run_snapshot(
    settings: &config::Settings,
    manager: Arc<CacheManager>,
    args: config::SnapshotArgs,
) -> Result<(), InfraError> {
    let Some(path) = &settings.policy.snapshot else {
        return Err(InfraError::configuration("policy.snapshot is disabled"));
    };

    if args.disable {
        manager.policy().disable().await;
    } else {
        manager.policy().enable().await;
    }

    info!(
        target = "cachegate::snapshot",
        path = %path.display(),
        enabled = !args.disable,
        "Snapshot refreshed"
    );
    Ok(())
}
