//! Block-parallel upload and download orchestration: adaptive
//! concurrency, per-block retry with node exclusion, rotated replica
//! read order, strict ordinal write-out. Grounded on
//! `original_source/client.py`'s `write_file`/
//! `process_single_block_streaming`/`read_file`/
//! `read_single_block_streaming`/`retry_with_backoff`.
use std::collections::HashSet;
use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tokio::sync::Semaphore;
use std::sync::Arc;

use strata_util::config::BLOCK_SIZE;
use strata_util::error::{Error, OkOrMessage, Result};
use strata_util::path::{basename, path_to_key, resolve};

use crate::{block_client, coordinator_client};

const MAX_BLOCK_RETRIES: u32 = 3;
const MAX_DATANODE_RETRIES: u32 = 2;

/// Number of 64 KiB blocks a file of `size` bytes splits into. Zero for
/// an empty file (spec.md §8: "File size 0 -> nblocks=0").
fn num_blocks_for_size(size: u64) -> u64 {
	(size + BLOCK_SIZE as u64 - 1) / BLOCK_SIZE as u64
}

/// File-size-tiered worker count, matching `write_file`/`read_file`'s
/// dynamic concurrency table.
fn concurrency_for_size(size: u64) -> usize {
	let cpu = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
	const MB: u64 = 1024 * 1024;
	if size < 10 * MB {
		6.min(cpu.max(2))
	} else if size < 100 * MB {
		4.min((cpu / 2).max(2))
	} else {
		3.min((cpu / 3).max(1))
	}
}

async fn retry_with_backoff<F, Fut, T>(mut f: F, max_retries: u32, base_delay: f64, max_delay: f64) -> Result<T>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T>>,
{
	let mut last_err = None;
	for attempt in 0..max_retries {
		match f().await {
			Ok(v) => return Ok(v),
			Err(e) => {
				if attempt + 1 == max_retries {
					return Err(e);
				}
				let delay = (base_delay * 2f64.powi(attempt as i32)).min(max_delay);
				let jitter = rand::random::<f64>() * delay * 0.1;
				tokio::time::sleep(Duration::from_secs_f64(delay + jitter)).await;
				last_err = Some(e);
			}
		}
	}
	Err(last_err.unwrap_or_else(|| Error::Message("retry loop exited with no attempts".to_string())))
}

async fn read_block_from_file(path: &Path, block_id: u64) -> Result<Vec<u8>> {
	let mut f = tokio::fs::File::open(path).await?;
	f.seek(SeekFrom::Start(block_id * BLOCK_SIZE as u64)).await?;
	let mut buf = vec![0u8; BLOCK_SIZE];
	let n = f.read(&mut buf).await?;
	buf.truncate(n);
	Ok(buf)
}

async fn process_single_block(
	coordinator_addr: SocketAddr,
	file_path: Arc<std::path::PathBuf>,
	storage_name: Arc<String>,
	block_id: u64,
	total_blocks: u64,
) -> bool {
	let mut exclude: HashSet<String> = HashSet::new();

	for attempt in 0..MAX_BLOCK_RETRIES {
		let data = match read_block_from_file(&file_path, block_id).await {
			Ok(d) if !d.is_empty() => d,
			_ => return false,
		};

		let exclude_snapshot = exclude.clone();
		let datanode = retry_with_backoff(
			|| {
				let exclude_snapshot = exclude_snapshot.clone();
				async move {
					coordinator_client::get_active_datanode(coordinator_addr, &exclude_snapshot)
						.await
						.ok_or_message("No active DataNode available")
				}
			},
			MAX_DATANODE_RETRIES,
			0.5,
			3.0,
		)
		.await;

		let datanode = match datanode {
			Ok(d) => d,
			Err(_) => {
				warn!("No DataNode available for block {} on attempt {}", block_id, attempt + 1);
				continue;
			}
		};

		let timeout = Duration::from_secs_f64((data.len() as f64 / (512.0 * 1024.0) + 5.0).max(10.0));
		if block_client::write_block(&datanode, &storage_name, block_id, total_blocks, &data, timeout).await {
			return true;
		}

		warn!("Failed to send block {} to {}, excluding from future attempts", block_id, datanode);
		exclude.insert(datanode);

		if attempt + 1 < MAX_BLOCK_RETRIES {
			let delay = 0.5 * 2f64.powi(attempt as i32) + rand::random::<f64>() * 0.5;
			tokio::time::sleep(Duration::from_secs_f64(delay)).await;
		}
	}

	false
}

/// Upload `file_path` as `target_filename` (or its basename) under
/// `current_dir`. All-or-nothing: metadata is only stored once every
/// block has been written somewhere.
pub async fn upload_file(
	coordinator_addr: SocketAddr,
	file_path: &Path,
	target_filename: Option<&str>,
	current_dir: &str,
) -> Result<bool> {
	let file_size = tokio::fs::metadata(file_path).await?.len();
	let num_blocks = num_blocks_for_size(file_size);

	let filename = target_filename
		.map(|s| s.to_string())
		.unwrap_or_else(|| basename(&file_path.to_string_lossy()).to_string());
	let full_path = resolve(current_dir, &filename);
	let storage_name = Arc::new(path_to_key(&full_path));
	let file_path = Arc::new(file_path.to_path_buf());

	info!("Streaming {} ({} bytes) into {} blocks", filename, file_size, num_blocks);

	let concurrency = concurrency_for_size(file_size);
	let semaphore = Arc::new(Semaphore::new(concurrency));
	let mut tasks = Vec::with_capacity(num_blocks as usize);

	for block_id in 0..num_blocks {
		let permit = semaphore.clone().acquire_owned().await.unwrap();
		let file_path = file_path.clone();
		let storage_name = storage_name.clone();
		tasks.push(tokio::spawn(async move {
			let ok = process_single_block(coordinator_addr, file_path, storage_name, block_id, num_blocks).await;
			drop(permit);
			(block_id, ok)
		}));
	}

	let mut failed = Vec::new();
	for task in tasks {
		let (block_id, ok) = task.await.map_err(|e| Error::Message(e.to_string()))?;
		if !ok {
			failed.push(block_id);
		}
	}

	if !failed.is_empty() {
		failed.sort_unstable();
		warn!("Upload failed: blocks {:?} could not be written", failed);
		return Ok(false);
	}

	info!("All blocks streamed successfully, storing metadata");
	coordinator_client::store_metadata(
		coordinator_addr,
		&filename,
		num_blocks,
		BLOCK_SIZE as u64,
		file_size,
		current_dir,
	)
	.await
}

async fn read_single_block(storage_name: &str, block_id: &str, locations: &[String], block_idx: usize) -> Option<Vec<u8>> {
	if locations.is_empty() {
		return None;
	}
	let primary_idx = block_idx % locations.len();
	let reordered = locations[primary_idx..].iter().chain(locations[..primary_idx].iter());

	for addr in reordered {
		if let Some(data) = block_client::read_block(addr, storage_name, block_id).await {
			return Some(data);
		}
	}
	None
}

/// Download `filename` (resolved against `current_dir`) into
/// `output_path`. Reads are dispatched with the adaptive-concurrency
/// table and a per-block rotated replica order, but the final file is
/// always written out in strict ordinal order.
pub async fn download_file(
	coordinator_addr: SocketAddr,
	filename: &str,
	current_dir: &str,
	output_path: &Path,
) -> Result<bool> {
	let metadata = match coordinator_client::get_file_metadata(coordinator_addr, filename, current_dir).await? {
		Some(m) => m,
		None => {
			warn!("Could not find file {}", filename);
			return Ok(false);
		}
	};

	if let Some(parent) = output_path.parent() {
		tokio::fs::create_dir_all(parent).await?;
	}

	let total_blocks = metadata.blocks.len();
	info!("Streaming download: {} blocks ({} bytes)", total_blocks, metadata.total_size);

	let concurrency = concurrency_for_size(metadata.total_size);
	let semaphore = Arc::new(Semaphore::new(concurrency));
	let storage_name = Arc::new(metadata.storage_name.clone());
	let mut tasks = Vec::with_capacity(total_blocks);

	for (block_idx, block) in metadata.blocks.iter().enumerate() {
		let permit = semaphore.clone().acquire_owned().await.unwrap();
		let storage_name = storage_name.clone();
		let block_id = block.block_id.clone();
		let locations = block.locations.clone();
		tasks.push(tokio::spawn(async move {
			let data = read_single_block(&storage_name, &block_id, &locations, block_idx).await;
			drop(permit);
			(block_idx, data)
		}));
	}

	let mut results: Vec<Option<Vec<u8>>> = vec![None; total_blocks];
	for task in tasks {
		let (block_idx, data) = task.await.map_err(|e| Error::Message(e.to_string()))?;
		results[block_idx] = data;
	}

	let mut outfile = tokio::fs::File::create(output_path).await?;
	for (block_idx, data) in results.into_iter().enumerate() {
		match data {
			Some(bytes) => outfile.write_all(&bytes).await?,
			None => {
				warn!("Missing block data for block {}", block_idx);
				return Ok(false);
			}
		}
	}

	info!("Successfully streamed {} to {}", filename, output_path.display());
	Ok(true)
}

/// Best-effort parallel deletion of every block of a deleted file from
/// every replica that claims to hold it. Grounded on
/// `delete_blocks_from_datanodes`.
pub async fn delete_blocks(blocks_info: &[strata_coordinator::delete::BlockDeletionInfo]) -> (usize, usize) {
	let mut tasks = Vec::new();
	for block in blocks_info {
		for addr in &block.locations {
			let addr = addr.clone();
			let storage_name = block.storage_name.clone();
			let block_id = block.block_id.clone();
			tasks.push(tokio::spawn(async move {
				block_client::delete_block(&addr, &storage_name, &block_id).await
			}));
		}
	}

	let total = tasks.len();
	let mut succeeded = 0;
	for task in tasks {
		if task.await.unwrap_or(false) {
			succeeded += 1;
		}
	}
	(succeeded, total)
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn concurrency_tiers_respect_cpu_floor_and_ceiling() {
		assert!(concurrency_for_size(1024) <= 6);
		assert!(concurrency_for_size(50 * 1024 * 1024) <= 4);
		assert!(concurrency_for_size(500 * 1024 * 1024) <= 3);
	}

	#[test]
	fn empty_file_has_zero_blocks() {
		assert_eq!(num_blocks_for_size(0), 0);
	}

	#[test]
	fn exact_multiple_of_block_size_has_no_short_last_block() {
		assert_eq!(num_blocks_for_size(BLOCK_SIZE as u64 * 3), 3);
		assert_eq!(num_blocks_for_size(BLOCK_SIZE as u64 * 3 + 1), 4);
	}
}
