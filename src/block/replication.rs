//! Asynchronous peer replication: after a primary write is acknowledged
//! to the client, a task is enqueued here rather than spawned as an
//! ad-hoc thread (spec.md §9's explicit recommendation). A small pool of
//! `strata_util::background::Worker`s drains the queue, in the shape of
//! `garage_block::manager::BlockManager::spawn_workers`'s resync-worker
//! pool. Grounded on `datanode.py::replicate_block`/
//! `replicate_block_with_retry`/`send_replica_to_node_with_retry`.
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};

use strata_util::background::worker::{Worker, WorkerStatus};
use strata_util::background::BackgroundRunner;
use strata_util::error::{Error, Result};

use crate::protocol::{read_frame, write_frame};

const MAX_SEND_ATTEMPTS: u32 = 2;

struct ReplicationTask {
	storage_key: String,
	ordinal: u64,
	data: Vec<u8>,
}

/// Enqueues replication tasks fed to a pool of background workers.
pub struct ReplicationDispatcher {
	tx: mpsc::UnboundedSender<ReplicationTask>,
}

impl ReplicationDispatcher {
	pub fn new(
		bg: &BackgroundRunner,
		self_addr: String,
		coordinator_addr: SocketAddr,
		replication_factor: usize,
		n_workers: usize,
	) -> Arc<Self> {
		let (tx, rx) = mpsc::unbounded_channel();
		let rx = Arc::new(Mutex::new(rx));

		for index in 0..n_workers {
			bg.spawn_worker(ReplicationWorker {
				index,
				chan: rx.clone(),
				next: None,
				self_addr: self_addr.clone(),
				coordinator_addr,
				replication_factor,
			});
		}

		Arc::new(Self { tx })
	}

	/// Enqueue a block for best-effort replication to peers. Never
	/// blocks the caller (the client's write acknowledgment does not
	/// wait on this).
	pub fn enqueue(&self, storage_key: String, ordinal: u64, data: Vec<u8>) {
		let task = ReplicationTask {
			storage_key,
			ordinal,
			data,
		};
		if self.tx.send(task).is_err() {
			error!("Replication dispatcher channel closed, dropping task");
		}
	}
}

struct ReplicationWorker {
	index: usize,
	chan: Arc<Mutex<mpsc::UnboundedReceiver<ReplicationTask>>>,
	next: Option<ReplicationTask>,
	self_addr: String,
	coordinator_addr: SocketAddr,
	replication_factor: usize,
}

#[async_trait]
impl Worker for ReplicationWorker {
	fn name(&self) -> String {
		format!("Replication worker #{}", self.index)
	}

	async fn work(&mut self, _must_exit: &mut watch::Receiver<bool>) -> Result<WorkerStatus> {
		match self.next.take() {
			None => Ok(WorkerStatus::Idle),
			Some(task) => {
				self.replicate(&task).await;
				Ok(WorkerStatus::Busy)
			}
		}
	}

	async fn wait_for_work(&mut self, _must_exit: &watch::Receiver<bool>) -> WorkerStatus {
		match self.chan.lock().await.recv().await {
			Some(task) => {
				self.next = Some(task);
				WorkerStatus::Busy
			}
			None => WorkerStatus::Done,
		}
	}
}

impl ReplicationWorker {
	async fn replicate(&self, task: &ReplicationTask) {
		let peers = match get_live_datanodes(self.coordinator_addr).await {
			Ok(mut nodes) => {
				nodes.retain(|n| n != &self.self_addr);
				nodes
			}
			Err(e) => {
				warn!("Replication: could not fetch live datanodes: {}", e);
				return;
			}
		};

		if peers.is_empty() {
			debug!(
				"No peers available to replicate block {} of {}",
				task.ordinal, task.storage_key
			);
			return;
		}

		let n = std::cmp::min(self.replication_factor.saturating_sub(1), peers.len());
		let mut rng = rand::thread_rng();
		let chosen: Vec<&String> = peers
			.choose_multiple(&mut rng, n)
			.collect();

		let mut successes = 0;
		for peer in &chosen {
			if send_with_retry(peer, &task.storage_key, task.ordinal, &task.data).await {
				successes += 1;
			}
		}

		info!(
			"Replicated block {} of {} to {}/{} peers",
			task.ordinal,
			task.storage_key,
			successes,
			chosen.len()
		);
	}
}

async fn send_with_retry(peer: &str, storage_key: &str, ordinal: u64, data: &[u8]) -> bool {
	for attempt in 0..MAX_SEND_ATTEMPTS {
		match send_replica(peer, storage_key, ordinal, data).await {
			Ok(true) => return true,
			Ok(false) | Err(_) => {
				if attempt + 1 < MAX_SEND_ATTEMPTS {
					let delay = Duration::from_secs_f64(0.5 * 2f64.powi(attempt as i32));
					tokio::time::sleep(delay).await;
				}
			}
		}
	}
	false
}

async fn send_replica(peer: &str, storage_key: &str, ordinal: u64, data: &[u8]) -> Result<bool> {
	let mut stream = TcpStream::connect(peer).await?;
	let metadata = format!("replicate_block {} {}", storage_key, ordinal);
	write_frame(&mut stream, metadata.as_bytes()).await?;
	write_frame(&mut stream, data).await?;

	match read_frame(&mut stream).await? {
		Some(resp) => Ok(resp == b"success"),
		None => Ok(false),
	}
}

/// Ask the coordinator for the current live-node set (§4.1 `get_datanodes`).
pub async fn get_live_datanodes(coordinator_addr: SocketAddr) -> Result<Vec<String>> {
	use tokio::io::{AsyncReadExt, AsyncWriteExt};

	let mut stream = TcpStream::connect(coordinator_addr).await?;
	stream.write_all(b"get_datanodes").await?;
	stream.shutdown().await.ok();

	let mut buf = Vec::new();
	stream.read_to_end(&mut buf).await?;
	let response = String::from_utf8_lossy(&buf);

	if let Some(rest) = response.strip_prefix("datanodes") {
		Ok(rest.split_whitespace().map(|s| s.to_string()).collect())
	} else {
		Err(Error::Protocol(format!(
			"unexpected get_datanodes response: {}",
			response
		)))
	}
}
