//! Control-protocol client calls: one short-lived TCP connection per
//! request, a single write followed by a single read, exactly mirroring
//! the coordinator's plain-text verb/response shape. Grounded on
//! `original_source/client.py`'s `get_active_datanode`/
//! `get_file_metadata`/`store_metadata`/`create_directory`/
//! `list_directory`/`path_exists`/`delete_file`/`delete_directory`.
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use strata_coordinator::delete::{BlockDeletionInfo, DeleteDirectoryResult};
use strata_coordinator::namespace::{DirEntry, FileMetadata};
use strata_util::error::{Error, Result};

async fn request(coordinator_addr: SocketAddr, message: &str, timeout: Duration) -> Result<String> {
	let connect = TcpStream::connect(coordinator_addr);
	let mut stream = tokio::time::timeout(timeout, connect)
		.await
		.map_err(|_| Error::Message("timed out connecting to coordinator".to_string()))??;

	stream.write_all(message.as_bytes()).await?;
	stream.shutdown().await.ok();

	let mut buf = Vec::new();
	tokio::time::timeout(timeout, stream.read_to_end(&mut buf))
		.await
		.map_err(|_| Error::Message("timed out reading coordinator response".to_string()))??;

	Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Ask the coordinator for a live block server, skipping anything in
/// `exclude`. Retries up to 3 times with a flat 0.5s pause between
/// attempts, matching `get_active_datanode`'s shape (a different retry
/// policy than the exponential `retry_with_backoff` used elsewhere).
pub async fn get_active_datanode(
	coordinator_addr: SocketAddr,
	exclude: &HashSet<String>,
) -> Option<String> {
	const MAX_ATTEMPTS: u32 = 3;
	for attempt in 0..MAX_ATTEMPTS {
		match request(coordinator_addr, "get_datanode", Duration::from_secs(5)).await {
			Ok(response) => {
				if let Some(addr) = response.strip_prefix("datanode ") {
					if !exclude.contains(addr) {
						return Some(addr.to_string());
					}
					debug!("Skipping excluded node: {}", addr);
				}
			}
			Err(e) => warn!("Attempt {} failed to get datanode: {}", attempt + 1, e),
		}
		if attempt + 1 < MAX_ATTEMPTS {
			tokio::time::sleep(Duration::from_millis(500)).await;
		}
	}
	None
}

pub async fn get_file_metadata(
	coordinator_addr: SocketAddr,
	filename: &str,
	current_dir: &str,
) -> Result<Option<FileMetadata>> {
	let message = format!("get_metadata {} {}", filename, current_dir);
	let response = request(coordinator_addr, &message, Duration::from_secs(5)).await?;

	if let Some(json) = response.strip_prefix("metadata ") {
		Ok(Some(serde_json::from_str(json)?))
	} else {
		Ok(None)
	}
}

pub async fn store_metadata(
	coordinator_addr: SocketAddr,
	filename: &str,
	num_blocks: u64,
	block_size: u64,
	total_size: u64,
	current_dir: &str,
) -> Result<bool> {
	let message = format!(
		"store_metadata {} {} {} {} {}",
		filename, num_blocks, block_size, total_size, current_dir
	);
	let response = request(coordinator_addr, &message, Duration::from_secs(5)).await?;
	Ok(response == "success")
}

pub async fn create_directory(coordinator_addr: SocketAddr, path: &str) -> Result<(bool, String)> {
	let message = format!("mkdir {}", path);
	let response = request(coordinator_addr, &message, Duration::from_secs(5)).await?;

	let rest = response
		.strip_prefix("mkdir_result ")
		.ok_or_else(|| Error::Protocol(format!("unexpected mkdir response: {}", response)))?;
	let (ok_str, msg) = rest.split_once(' ').unwrap_or((rest, ""));
	Ok((ok_str == "true", msg.to_string()))
}

pub async fn list_directory(coordinator_addr: SocketAddr, path: &str) -> Result<Option<Vec<DirEntry>>> {
	let message = format!("ls {}", path);
	let response = request(coordinator_addr, &message, Duration::from_secs(5)).await?;

	if let Some(json) = response.strip_prefix("ls_result success ") {
		Ok(Some(serde_json::from_str(json)?))
	} else if response.starts_with("ls_result error") {
		Ok(None)
	} else {
		Err(Error::Protocol(format!("unexpected ls response: {}", response)))
	}
}

pub async fn path_exists(coordinator_addr: SocketAddr, path: &str) -> Result<bool> {
	let message = format!("exists {}", path);
	let response = request(coordinator_addr, &message, Duration::from_secs(5)).await?;
	response
		.strip_prefix("exists_result ")
		.map(|v| v == "true")
		.ok_or_else(|| Error::Protocol(format!("unexpected exists response: {}", response)))
}

pub async fn delete_file(
	coordinator_addr: SocketAddr,
	filename: &str,
	current_dir: &str,
) -> Result<std::result::Result<Vec<BlockDeletionInfo>, String>> {
	let message = format!("delete_file {} {}", filename, current_dir);
	let response = request(coordinator_addr, &message, Duration::from_secs(5)).await?;

	if let Some(json) = response.strip_prefix("delete_file_result success ") {
		Ok(Ok(serde_json::from_str(json)?))
	} else if let Some(msg) = response.strip_prefix("delete_file_result error ") {
		Ok(Err(msg.to_string()))
	} else {
		Err(Error::Protocol(format!("unexpected delete_file response: {}", response)))
	}
}

pub async fn delete_directory(
	coordinator_addr: SocketAddr,
	path: &str,
) -> Result<std::result::Result<DeleteDirectoryResult, String>> {
	let message = format!("delete_directory {}", path);
	let response = request(coordinator_addr, &message, Duration::from_secs(5)).await?;

	if let Some(json) = response.strip_prefix("delete_directory_result success ") {
		Ok(Ok(serde_json::from_str(json)?))
	} else if let Some(msg) = response.strip_prefix("delete_directory_result error ") {
		Ok(Err(msg.to_string()))
	} else {
		Err(Error::Protocol(format!(
			"unexpected delete_directory response: {}",
			response
		)))
	}
}
