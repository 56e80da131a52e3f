//! Least-loaded-node block placement. Grounded on
//! `namenode.py::get_optimal_datanodes` (sort live nodes by load, take
//! the first `num_replicas`, increment their counters under one lock).
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::membership::Membership;

pub struct Placement {
	membership: Arc<Membership>,
	load: Mutex<HashMap<String, u64>>,
}

impl Placement {
	pub fn new(membership: Arc<Membership>) -> Self {
		Self {
			membership,
			load: Mutex::new(HashMap::new()),
		}
	}

	/// Selects up to `num_replicas` of the least-loaded live nodes and
	/// bumps their load counters. Returns fewer than `num_replicas` (or
	/// none) if the cluster doesn't have enough live nodes.
	pub async fn select_nodes(&self, num_replicas: usize) -> Vec<String> {
		// load_lock, then datanodes_lock, matching the nesting order in
		// `get_optimal_datanodes`.
		let mut load = self.load.lock().await;
		let active = self.membership.live_nodes().await;

		if active.is_empty() {
			return vec![];
		}

		let mut sorted = active;
		sorted.sort_by_key(|n| *load.get(n).unwrap_or(&0));
		let selected: Vec<String> = sorted.into_iter().take(num_replicas).collect();

		for node in &selected {
			*load.entry(node.clone()).or_insert(0) += 1;
		}

		selected
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[tokio::test]
	async fn prefers_least_loaded_nodes() {
		let membership = Arc::new(Membership::new(30));
		membership.register("n1").await;
		membership.register("n2").await;
		membership.register("n3").await;

		let placement = Placement::new(membership);

		let first = placement.select_nodes(1).await;
		assert_eq!(first.len(), 1);
		let loaded = first[0].clone();

		// Asking for 2 more should prefer the two untouched nodes over
		// the one we just loaded.
		let second = placement.select_nodes(2).await;
		assert_eq!(second.len(), 2);
		assert!(!second.contains(&loaded));
	}

	#[tokio::test]
	async fn empty_cluster_yields_no_nodes() {
		let membership = Arc::new(Membership::new(30));
		let placement = Placement::new(membership);
		assert!(placement.select_nodes(3).await.is_empty());
	}
}
