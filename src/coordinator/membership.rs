//! Cluster membership: the live block-server registry, heartbeat
//! bookkeeping, and the liveness monitor that evicts nodes whose
//! heartbeat has gone stale. Grounded on `namenode.py`'s
//! `register_datanode`/`update_heartbeat`/`monitor_heartbeats`/
//! `print_datanode_status`, the monitor ported onto
//! `strata_util::background::Worker` (teacher: `garage_block`'s
//! resync/scrub workers registered via `bg.spawn_worker`).
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};

use strata_util::background::worker::{Worker, WorkerStatus};
use strata_util::error::Result;
use strata_util::time::now_epoch_secs;

const STATUS_PRINT_INTERVAL_SECS: u64 = 10;
const MONITOR_SCAN_INTERVAL_SECS: u64 = 5;

pub struct Membership {
	nodes: Mutex<HashMap<String, f64>>,
	heartbeat_timeout_secs: u64,
}

impl Membership {
	pub fn new(heartbeat_timeout_secs: u64) -> Self {
		Self {
			nodes: Mutex::new(HashMap::new()),
			heartbeat_timeout_secs,
		}
	}

	pub async fn register(&self, addr: &str) {
		self.nodes.lock().await.insert(addr.to_string(), now_epoch_secs());
		info!("DataNode {} registered", addr);
	}

	/// Refresh the heartbeat of an already-registered node, or register
	/// it fresh if it isn't known yet (a restarted coordinator sees
	/// heartbeats before any `register`).
	pub async fn heartbeat(&self, addr: &str) {
		let already_known = {
			let mut nodes = self.nodes.lock().await;
			if let Some(t) = nodes.get_mut(addr) {
				*t = now_epoch_secs();
				true
			} else {
				warn!("Heartbeat from unregistered DataNode {}", addr);
				false
			}
		};
		if !already_known {
			self.register(addr).await;
		}
	}

	pub async fn live_nodes(&self) -> Vec<String> {
		self.nodes.lock().await.keys().cloned().collect()
	}

	pub async fn count(&self) -> usize {
		self.nodes.lock().await.len()
	}

	pub async fn random_node(&self) -> Option<String> {
		use rand::seq::IteratorRandom;
		let nodes = self.nodes.lock().await;
		nodes.keys().choose(&mut rand::thread_rng()).cloned()
	}

	async fn evict_dead(&self) -> Vec<String> {
		let now = now_epoch_secs();
		let timeout = self.heartbeat_timeout_secs as f64;

		let dead: Vec<String> = {
			let nodes = self.nodes.lock().await;
			nodes
				.iter()
				.filter(|(_, last)| now - **last > timeout)
				.map(|(addr, _)| addr.clone())
				.collect()
		};

		if !dead.is_empty() {
			let mut nodes = self.nodes.lock().await;
			for addr in &dead {
				if nodes.remove(addr).is_some() {
					warn!(
						"DataNode {} considered dead - no heartbeat for {} seconds",
						addr, self.heartbeat_timeout_secs
					);
				}
			}
		}

		dead
	}

	async fn print_status(&self) {
		let nodes = self.nodes.lock().await;
		let mut items: Vec<(&String, &f64)> = nodes.iter().collect();
		items.sort_by(|a, b| a.0.cmp(b.0));

		info!("Current DataNode Status:");
		let now = now_epoch_secs();
		for (addr, last) in items {
			info!("DataNode: {}, last heartbeat {:.0}s ago", addr, now - last);
		}
	}
}

/// Background worker: every `MONITOR_SCAN_INTERVAL_SECS`, evicts nodes
/// past their heartbeat timeout; every `STATUS_PRINT_INTERVAL_SECS`,
/// logs the live set. Mirrors `monitor_heartbeats`'s dedicated thread,
/// folded into the shared worker pool instead of an ad-hoc
/// `threading.Thread(daemon=True)`.
pub struct LivenessMonitor {
	pub membership: std::sync::Arc<Membership>,
	last_status_print: f64,
}

impl LivenessMonitor {
	pub fn new(membership: std::sync::Arc<Membership>) -> Self {
		Self {
			membership,
			last_status_print: 0.0,
		}
	}
}

#[async_trait]
impl Worker for LivenessMonitor {
	fn name(&self) -> String {
		"Liveness monitor".to_string()
	}

	async fn work(&mut self, _must_exit: &mut watch::Receiver<bool>) -> Result<WorkerStatus> {
		let dead = self.membership.evict_dead().await;
		if !dead.is_empty() {
			self.membership.print_status().await;
		}

		let now = now_epoch_secs();
		if now - self.last_status_print > STATUS_PRINT_INTERVAL_SECS as f64 {
			self.membership.print_status().await;
			self.last_status_print = now;
		}

		Ok(WorkerStatus::Idle)
	}

	async fn wait_for_work(&mut self, must_exit: &watch::Receiver<bool>) -> WorkerStatus {
		let mut must_exit = must_exit.clone();
		tokio::select! {
			_ = tokio::time::sleep(Duration::from_secs(MONITOR_SCAN_INTERVAL_SECS)) => WorkerStatus::Busy,
			_ = must_exit.changed() => WorkerStatus::Done,
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[tokio::test]
	async fn register_then_heartbeat_keeps_node_live() {
		let m = Membership::new(30);
		m.register("n1:9000").await;
		m.heartbeat("n1:9000").await;
		assert_eq!(m.live_nodes().await, vec!["n1:9000".to_string()]);
	}

	#[tokio::test]
	async fn heartbeat_from_unknown_node_registers_it() {
		let m = Membership::new(30);
		m.heartbeat("n1:9000").await;
		assert_eq!(m.count().await, 1);
	}

	#[tokio::test]
	async fn evict_dead_removes_stale_nodes() {
		let m = Membership::new(0);
		m.register("n1:9000").await;
		tokio::time::sleep(Duration::from_millis(10)).await;
		let dead = m.evict_dead().await;
		assert_eq!(dead, vec!["n1:9000".to_string()]);
		assert_eq!(m.count().await, 0);
	}
}
