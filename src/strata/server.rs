use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;

use strata_util::background::BackgroundRunner;
use strata_util::config::read_config;
use strata_util::error::{Error, OkOrMessage};

use strata_coordinator::membership::{LivenessMonitor, Membership};
use strata_coordinator::namespace::Namespace;
use strata_coordinator::server::Coordinator;

use strata_block::manager::BlockManager;
use strata_block::replication::ReplicationDispatcher;

const N_BACKGROUND_RUNNERS: usize = 4;
const N_REPLICATION_WORKERS: usize = 4;

async fn wait_from(mut chan: watch::Receiver<bool>) {
	while !*chan.borrow() {
		if chan.changed().await.is_err() {
			return;
		}
	}
}

pub async fn run_coordinator(config_file: PathBuf) -> Result<(), Error> {
	info!("Loading configuration...");
	let config = read_config(config_file)?;
	let cfg = config.coordinator;

	info!("Opening metadata store ({})...", cfg.db_engine);
	let db = strata_db::open_db(&cfg.metadata_dir, &cfg.db_engine)?;
	let namespace = Namespace::new(&db)?;

	info!("Initializing membership and placement...");
	let membership = Arc::new(Membership::new(cfg.heartbeat_timeout_secs));
	let coordinator = Arc::new(Coordinator::new(
		namespace,
		membership.clone(),
		cfg.replication_factor,
		cfg.max_cache_size,
	));

	info!("Initializing background runner...");
	let watch_cancel = watch_shutdown_signal();
	let (background, await_background_done) = BackgroundRunner::new(N_BACKGROUND_RUNNERS, watch_cancel.clone());

	info!("Spawning liveness monitor...");
	background.spawn_worker(LivenessMonitor::new(membership.clone()));

	info!("Listening on {}...", cfg.bind_addr);
	tokio::select! {
		res = strata_coordinator::server::run(cfg.bind_addr, coordinator) => res?,
		_ = wait_from(watch_cancel.clone()) => info!("Shutdown signal received, stopping coordinator."),
	}

	drop(background);
	await_background_done.await.ok();

	info!("Coordinator stopped.");
	Ok(())
}

pub async fn run_block_server(config_file: PathBuf) -> Result<(), Error> {
	info!("Loading configuration...");
	let config = read_config(config_file)?;
	let cfg = config
		.block
		.ok_or_message("Configuration file has no [block] section")?;

	info!("Opening block storage at {:?}...", cfg.data_dir);
	let manager = Arc::new(BlockManager::new(cfg.data_dir).await?);

	info!("Initializing background runner...");
	let watch_cancel = watch_shutdown_signal();
	let (background, await_background_done) = BackgroundRunner::new(N_BACKGROUND_RUNNERS, watch_cancel.clone());

	let dispatcher = ReplicationDispatcher::new(
		&background,
		cfg.public_addr.to_string(),
		cfg.coordinator_addr,
		cfg.replication_factor,
		N_REPLICATION_WORKERS,
	);

	info!("Registering with coordinator and starting heartbeat...");
	tokio::spawn(strata_block::heartbeat::run(
		cfg.public_addr.to_string(),
		cfg.coordinator_addr,
		std::time::Duration::from_secs(cfg.heartbeat_interval_secs),
	));

	info!("Listening on {}...", cfg.bind_addr);
	tokio::select! {
		res = strata_block::server::run(cfg.bind_addr, manager, dispatcher) => res?,
		_ = wait_from(watch_cancel.clone()) => info!("Shutdown signal received, stopping block server."),
	}

	drop(background);
	await_background_done.await.ok();

	info!("Block server stopped.");
	Ok(())
}

#[cfg(unix)]
fn watch_shutdown_signal() -> watch::Receiver<bool> {
	use tokio::signal::unix::*;

	let (send_cancel, watch_cancel) = watch::channel(false);
	tokio::spawn(async move {
		let mut sigint = signal(SignalKind::interrupt()).expect("Failed to install SIGINT handler");
		let mut sigterm = signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
		let mut sighup = signal(SignalKind::hangup()).expect("Failed to install SIGHUP handler");
		tokio::select! {
			_ = sigint.recv() => info!("Received SIGINT, shutting down."),
			_ = sigterm.recv() => info!("Received SIGTERM, shutting down."),
			_ = sighup.recv() => info!("Received SIGHUP, shutting down."),
		}
		send_cancel.send(true).unwrap();
	});
	watch_cancel
}

#[cfg(windows)]
fn watch_shutdown_signal() -> watch::Receiver<bool> {
	use tokio::signal::windows::*;

	let (send_cancel, watch_cancel) = watch::channel(false);
	tokio::spawn(async move {
		let mut sigint = ctrl_c().expect("Failed to install Ctrl-C handler");
		let mut sigclose = ctrl_close().expect("Failed to install Ctrl-Close handler");
		let mut siglogoff = ctrl_logoff().expect("Failed to install Ctrl-Logoff handler");
		let mut sigsdown = ctrl_shutdown().expect("Failed to install Ctrl-Shutdown handler");
		tokio::select! {
			_ = sigint.recv() => info!("Received Ctrl-C, shutting down."),
			_ = sigclose.recv() => info!("Received Ctrl-Close, shutting down."),
			_ = siglogoff.recv() => info!("Received Ctrl-Logoff, shutting down."),
			_ = sigsdown.recv() => info!("Received Ctrl-Shutdown, shutting down."),
		}
		send_cancel.send(true).unwrap();
	});
	watch_cancel
}
