//! Coordinator control-protocol server: a plain-text, single-line
//! request/single-line response TCP service. Grounded on
//! `namenode.py::start`/`handle_datanode_registration`'s per-connection
//! threading (ported to per-connection `tokio::spawn`, matching
//! `garage/server.rs`'s service-launch pattern) and, for `get_metrics`,
//! the spec.md §9 fix making it a uniform one-request/one-response
//! operation rather than the original's special-cased socket handling.
use std::net::SocketAddr;
use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use strata_util::error::Result;
use strata_util::path::{basename, path_to_key, resolve};
use strata_util::time::now_epoch_secs;

use crate::cache::MetadataCache;
use crate::membership::Membership;
use crate::namespace::{BlockRef, FileMetadata, Namespace};
use crate::placement::Placement;
use crate::protocol::{parse_request, Request};

/// Everything one coordinator process owns, composed the way
/// `NameNode.__init__` bundles the directory tree, membership table,
/// cache, and load counters into a single object.
pub struct Coordinator {
	pub namespace: Namespace,
	pub membership: Arc<Membership>,
	pub placement: Placement,
	pub cache: MetadataCache,
	pub replication_factor: usize,
	start_time: f64,
}

impl Coordinator {
	pub fn new(namespace: Namespace, membership: Arc<Membership>, replication_factor: usize, max_cache_size: usize) -> Self {
		let placement = Placement::new(membership.clone());
		Self {
			namespace,
			membership,
			placement,
			cache: MetadataCache::new(max_cache_size),
			replication_factor,
			start_time: now_epoch_secs(),
		}
	}

	async fn store_metadata(
		&self,
		filename: &str,
		block_count: u64,
		block_size: u64,
		total_size: u64,
		current_dir: &str,
	) -> Result<bool> {
		if self.membership.count().await == 0 {
			return Ok(false);
		}

		let full_path = resolve(current_dir, filename);
		let actual_filename = basename(&full_path).to_string();
		let file_key = path_to_key(&full_path);

		let mut blocks = Vec::with_capacity(block_count as usize);
		for i in 0..block_count {
			let locations = self.placement.select_nodes(self.replication_factor).await;
			// Corrected last-block-size formula (spec.md §9): the
			// original's `block_size // 2` bore no relation to the
			// file's real length.
			let size = if i + 1 < block_count {
				block_size
			} else {
				total_size.saturating_sub(block_size * (block_count - 1))
			};
			blocks.push(BlockRef {
				block_id: format!("block_{}", i),
				size,
				locations,
				timestamp: now_epoch_secs(),
			});
		}

		let metadata = FileMetadata {
			filename: actual_filename,
			full_path,
			storage_name: file_key.clone(),
			blocks,
			total_size,
			creation_time: now_epoch_secs(),
		};

		self.namespace.store_file_metadata(&metadata).await?;
		self.cache.put(file_key, metadata).await;
		Ok(true)
	}

	async fn get_metadata(&self, filename: &str, current_dir: &str) -> Result<Option<FileMetadata>> {
		let full_path = match self.namespace.get_file_full_path(filename, current_dir)? {
			Some(p) => p,
			None => return Ok(None),
		};
		let file_key = path_to_key(&full_path);

		let mut metadata = match self.cache.get(&file_key).await {
			Some(m) => m,
			None => match self.namespace.get_file_metadata_raw(&file_key)? {
				Some(m) => {
					self.cache.put(file_key.clone(), m.clone()).await;
					m
				}
				None => return Ok(None),
			},
		};

		let active = self.membership.live_nodes().await;
		for block in metadata.blocks.iter_mut() {
			block.locations.retain(|loc| active.contains(loc));
			if block.locations.is_empty() {
				warn!("Block {} of {} has no active DataNodes", block.block_id, full_path);
				return Ok(None);
			}
		}

		Ok(Some(metadata))
	}

	async fn delete_file(&self, filename: &str, current_dir: &str) -> Result<std::result::Result<String, String>> {
		match self.namespace.delete_file(filename, current_dir).await? {
			Ok(blocks_info) => {
				let file_key = path_to_key(&resolve(current_dir, filename));
				self.cache.remove(&file_key).await;
				Ok(Ok(serde_json::to_string(&blocks_info)?))
			}
			Err(msg) => Ok(Err(msg)),
		}
	}

	async fn get_metrics(&self) -> Metrics {
		let total_files = self.namespace.files_len().unwrap_or(0);
		let total_blocks = self.namespace.total_blocks().unwrap_or(0);
		Metrics {
			uptime: now_epoch_secs() - self.start_time,
			total_files,
			total_blocks,
			active_datanodes: self.membership.count().await,
		}
	}
}

#[derive(Serialize)]
struct Metrics {
	uptime: f64,
	total_files: usize,
	total_blocks: usize,
	active_datanodes: usize,
}

pub async fn run(bind_addr: SocketAddr, coordinator: Arc<Coordinator>) -> Result<()> {
	let listener = TcpListener::bind(bind_addr).await?;
	info!("Coordinator listening on {}", bind_addr);
	serve(listener, coordinator).await
}

/// Accept loop over an already-bound listener, so callers that need to
/// know the actual bound port (tests using `127.0.0.1:0`) can inspect
/// `listener.local_addr()` before handing it off.
pub async fn serve(listener: TcpListener, coordinator: Arc<Coordinator>) -> Result<()> {
	loop {
		let (stream, peer) = listener.accept().await?;
		let coordinator = coordinator.clone();
		tokio::spawn(async move {
			if let Err(e) = handle_connection(stream, coordinator).await {
				debug!("Connection from {} ended with error: {}", peer, e);
			}
		});
	}
}

async fn handle_connection(mut stream: TcpStream, coordinator: Arc<Coordinator>) -> Result<()> {
	let mut buf = vec![0u8; 4096];
	let n = stream.read(&mut buf).await?;
	if n == 0 {
		return Ok(());
	}
	let line = String::from_utf8_lossy(&buf[..n]).into_owned();

	let request = match parse_request(&line) {
		Ok(r) => r,
		Err(e) => {
			stream.write_all(e.to_string().as_bytes()).await?;
			return Ok(());
		}
	};

	let response = dispatch(&coordinator, request).await?;
	stream.write_all(response.as_bytes()).await?;
	Ok(())
}

async fn dispatch(coordinator: &Coordinator, request: Request) -> Result<String> {
	Ok(match request {
		Request::Register { addr } => {
			coordinator.membership.register(&addr).await;
			format!("DataNode {} registered", addr)
		}
		Request::Heartbeat { addr } => {
			coordinator.membership.heartbeat(&addr).await;
			"Heartbeat acknowledged".to_string()
		}
		Request::GetDatanodes => {
			let nodes = coordinator.membership.live_nodes().await;
			format!("datanodes {}", nodes.join(" "))
		}
		Request::GetDatanode => match coordinator.membership.random_node().await {
			Some(node) => format!("datanode {}", node),
			None => "no_datanode_available".to_string(),
		},
		Request::StoreMetadata {
			filename,
			block_count,
			block_size,
			total_size,
			current_dir,
		} => {
			let ok = coordinator
				.store_metadata(&filename, block_count, block_size, total_size, &current_dir)
				.await?;
			if ok { "success".to_string() } else { "error".to_string() }
		}
		Request::GetMetadata { filename, current_dir } => match coordinator.get_metadata(&filename, &current_dir).await? {
			Some(metadata) => format!("metadata {}", serde_json::to_string(&metadata)?),
			None => "file_not_found".to_string(),
		},
		Request::Mkdir { path } => {
			let (ok, msg) = coordinator.namespace.create_directory(&path).await?;
			format!("mkdir_result {} {}", ok, msg)
		}
		Request::Ls { path } => match coordinator.namespace.list_directory(&path).await? {
			Some(entries) => format!("ls_result success {}", serde_json::to_string(&entries)?),
			None => format!("ls_result error Directory '{}' does not exist", path),
		},
		Request::Exists { path } => {
			let exists = coordinator.namespace.path_exists(&path)?;
			format!("exists_result {}", exists)
		}
		Request::DeleteFile { filename, current_dir } => match coordinator.delete_file(&filename, &current_dir).await? {
			Ok(blocks_json) => format!("delete_file_result success {}", blocks_json),
			Err(msg) => format!("delete_file_result error {}", msg),
		},
		Request::DeleteDirectory { path } => match coordinator.namespace.delete_directory(&path).await? {
			Ok(result) => format!("delete_directory_result success {}", serde_json::to_string(&result)?),
			Err(msg) => format!("delete_directory_result error {}", msg),
		},
		Request::GetMetrics => {
			let metrics = coordinator.get_metrics().await;
			serde_json::to_string(&metrics)?
		}
	})
}

#[cfg(test)]
mod test {
	use super::*;

	fn tmp_coordinator(replication_factor: usize, max_cache_size: usize) -> Coordinator {
		let dir = std::env::temp_dir().join(format!("strata_coord_test_{}", rand::random::<u64>()));
		let db = strata_db::open_db(dir, "sled").unwrap();
		let namespace = Namespace::new(&db).unwrap();
		let membership = Arc::new(Membership::new(30));
		Coordinator::new(namespace, membership, replication_factor, max_cache_size)
	}

	#[tokio::test]
	async fn store_metadata_computes_correct_last_block_size() {
		let coordinator = tmp_coordinator(3, 10);
		coordinator.membership.register("n1:9000").await;

		// 3 blocks of 65536 bytes each, total 150000 bytes: the last
		// block should be 150000 - 2*65536 = 18928, never block_size/2.
		let ok = coordinator.store_metadata("f.bin", 3, 65536, 150000, "/").await.unwrap();
		assert!(ok);

		let metadata = coordinator.get_metadata("f.bin", "/").await.unwrap().unwrap();
		assert_eq!(metadata.blocks[0].size, 65536);
		assert_eq!(metadata.blocks[1].size, 65536);
		assert_eq!(metadata.blocks[2].size, 150000 - 2 * 65536);
	}

	#[tokio::test]
	async fn store_metadata_fails_with_no_live_nodes() {
		let coordinator = tmp_coordinator(3, 10);
		let ok = coordinator.store_metadata("f.bin", 1, 65536, 65536, "/").await.unwrap();
		assert!(!ok);
	}

	#[tokio::test]
	async fn get_metadata_filters_dead_node_locations() {
		let coordinator = tmp_coordinator(2, 10);
		// Only n1 is currently live; n2 was a placement target that has
		// since gone away (its heartbeat stopped and it was evicted).
		coordinator.membership.register("n1:9000").await;

		let metadata = FileMetadata {
			filename: "f.bin".to_string(),
			full_path: "/f.bin".to_string(),
			storage_name: "__f.bin".to_string(),
			blocks: vec![BlockRef {
				block_id: "block_0".to_string(),
				size: 65536,
				locations: vec!["n1:9000".to_string(), "n2:9000".to_string()],
				timestamp: now_epoch_secs(),
			}],
			total_size: 65536,
			creation_time: now_epoch_secs(),
		};
		coordinator.namespace.store_file_metadata(&metadata).await.unwrap();

		let fetched = coordinator.get_metadata("f.bin", "/").await.unwrap().unwrap();
		assert_eq!(fetched.blocks[0].locations, vec!["n1:9000".to_string()]);
	}

	#[tokio::test]
	async fn get_metadata_returns_none_when_all_locations_dead() {
		let coordinator = tmp_coordinator(1, 10);
		// No live nodes at all; the placed locations are all stale.
		let metadata = FileMetadata {
			filename: "f.bin".to_string(),
			full_path: "/f.bin".to_string(),
			storage_name: "__f.bin".to_string(),
			blocks: vec![BlockRef {
				block_id: "block_0".to_string(),
				size: 65536,
				locations: vec!["n1:9000".to_string()],
				timestamp: now_epoch_secs(),
			}],
			total_size: 65536,
			creation_time: now_epoch_secs(),
		};
		coordinator.namespace.store_file_metadata(&metadata).await.unwrap();

		assert!(coordinator.get_metadata("f.bin", "/").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn get_metrics_counts_files_and_blocks() {
		let coordinator = tmp_coordinator(2, 10);
		coordinator.membership.register("n1:9000").await;
		coordinator.membership.register("n2:9000").await;
		coordinator.store_metadata("a.bin", 2, 65536, 100000, "/").await.unwrap();
		coordinator.store_metadata("b.bin", 1, 65536, 65536, "/").await.unwrap();

		let metrics = coordinator.get_metrics().await;
		assert_eq!(metrics.total_files, 2);
		assert_eq!(metrics.total_blocks, 3);
		assert_eq!(metrics.active_datanodes, 2);
	}
}
