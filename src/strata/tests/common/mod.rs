//! Test harness: boots a coordinator and a handful of block servers as
//! in-process tokio tasks bound to ephemeral ports, the way
//! `strata::server::run_coordinator`/`run_block_server` wire up a real
//! deployment, minus the config file. Grounded on the teacher's
//! `tests/lib.rs` + `common::context()` pattern
//! (`examples/aankur-garage/src/garage/tests/k2v/*.rs`): a shared setup
//! helper that every `#[tokio::test]` calls to get a running cluster.
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use strata_block::manager::BlockManager;
use strata_block::replication::ReplicationDispatcher;
use strata_coordinator::membership::{LivenessMonitor, Membership};
use strata_coordinator::namespace::Namespace;
use strata_coordinator::server::Coordinator;
use strata_util::background::BackgroundRunner;

pub struct TestCluster {
	pub coordinator_addr: SocketAddr,
	pub block_addrs: Vec<SocketAddr>,
	_tmp: tempfile::TempDir,
	_stop_tx: watch::Sender<bool>,
	block_server_tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl TestCluster {
	/// Stop accepting connections on one block server, simulating that
	/// process dying while its heartbeat task (left untouched) keeps
	/// telling the coordinator it's live — the client only discovers
	/// the failure when it actually tries to connect.
	pub fn kill_block_server(&self, index: usize) {
		self.block_server_tasks[index].abort();
	}
}

async fn send_raw(addr: SocketAddr, message: &str) -> String {
	let mut stream = TcpStream::connect(addr).await.unwrap();
	stream.write_all(message.as_bytes()).await.unwrap();
	stream.shutdown().await.ok();
	let mut buf = Vec::new();
	stream.read_to_end(&mut buf).await.unwrap();
	String::from_utf8_lossy(&buf).into_owned()
}

/// Start a coordinator plus `n_blocks` block servers, with the
/// coordinator's default replication factor (3) and cache size (1000),
/// and wait until every block server has registered.
pub async fn spawn_cluster(n_blocks: usize) -> TestCluster {
	spawn_cluster_with_replication(n_blocks, 3).await
}

pub async fn spawn_cluster_with_replication(n_blocks: usize, replication_factor: usize) -> TestCluster {
	let tmp = tempfile::tempdir().unwrap();
	let (stop_tx, stop_rx) = watch::channel(false);

	let coordinator_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let coordinator_addr = coordinator_listener.local_addr().unwrap();

	let db = strata_db::open_db(tmp.path().join("metadata"), "sled").unwrap();
	let namespace = Namespace::new(&db).unwrap();
	let membership = Arc::new(Membership::new(30));
	let coordinator = Arc::new(Coordinator::new(namespace, membership.clone(), replication_factor, 1000));

	let (background, _await_background_done) = BackgroundRunner::new(2, stop_rx.clone());
	background.spawn_worker(LivenessMonitor::new(membership.clone()));

	tokio::spawn(strata_coordinator::server::serve(coordinator_listener, coordinator));

	let mut block_addrs = Vec::with_capacity(n_blocks);
	let mut block_server_tasks = Vec::with_capacity(n_blocks);

	for i in 0..n_blocks {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		block_addrs.push(addr);

		let manager = Arc::new(BlockManager::new(tmp.path().join(format!("block{}", i))).await.unwrap());
		let dispatcher = ReplicationDispatcher::new(&background, addr.to_string(), coordinator_addr, replication_factor, 2);

		block_server_tasks.push(tokio::spawn(strata_block::server::serve(listener, manager, dispatcher)));

		tokio::spawn(strata_block::heartbeat::run(
			addr.to_string(),
			coordinator_addr,
			Duration::from_millis(200),
		));
	}

	for addr in &block_addrs {
		loop {
			let nodes = send_raw(coordinator_addr, "get_datanodes").await;
			if nodes.contains(&addr.to_string()) {
				break;
			}
			tokio::time::sleep(Duration::from_millis(20)).await;
		}
	}

	TestCluster {
		coordinator_addr,
		block_addrs,
		_tmp: tmp,
		_stop_tx: stop_tx,
		block_server_tasks,
	}
}
