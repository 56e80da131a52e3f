//! Block-protocol client calls. Length-prefixed request frames, as the
//! block servers expect; `delete_block`'s reply is read raw, preserving
//! the observed irregularity. Grounded on `original_source/client.py`'s
//! `send_message`/`recv_message`/`read_block`/
//! `send_block_to_datanode_with_timeout`/`delete_block_from_datanode`.
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use strata_util::error::{Error, Result};

async fn write_frame(stream: &mut TcpStream, data: &[u8]) -> Result<()> {
	let len = (data.len() as u32).to_be_bytes();
	stream.write_all(&len).await?;
	stream.write_all(data).await?;
	Ok(())
}

async fn read_frame(stream: &mut TcpStream) -> Result<Option<Vec<u8>>> {
	let mut len_buf = [0u8; 4];
	let n = stream.read(&mut len_buf).await?;
	if n == 0 {
		return Ok(None);
	}
	if n < 4 {
		stream.read_exact(&mut len_buf[n..]).await?;
	}
	let len = u32::from_be_bytes(len_buf) as usize;
	let mut data = vec![0u8; len];
	stream.read_exact(&mut data).await?;
	Ok(Some(data))
}

/// Write one block to `addr`. Returns `Ok(false)` (not an error) on any
/// failure that should make the caller pick a different node and retry.
pub async fn write_block(
	addr: &str,
	storage_name: &str,
	block_id: u64,
	total_blocks: u64,
	data: &[u8],
	timeout: Duration,
) -> bool {
	let attempt = async {
		let mut stream = TcpStream::connect(addr).await?;
		stream.set_nodelay(true).ok();

		let metadata = format!("write_block {} {} {}", storage_name, block_id, total_blocks);
		write_frame(&mut stream, metadata.as_bytes()).await?;
		write_frame(&mut stream, data).await?;

		match read_frame(&mut stream).await? {
			Some(resp) => Ok::<bool, Error>(resp == b"success"),
			None => Ok(false),
		}
	};

	match tokio::time::timeout(timeout, attempt).await {
		Ok(Ok(ok)) => ok,
		Ok(Err(e)) => {
			warn!("Error sending block to {}: {}", addr, e);
			false
		}
		Err(_) => {
			warn!("Timed out sending block to {}", addr);
			false
		}
	}
}

/// Read one block from `addr`. `None` means "not present here, or the
/// connection failed" — both are fail-over signals to the caller.
pub async fn read_block(addr: &str, storage_name: &str, block_id: &str) -> Option<Vec<u8>> {
	let block_num = block_id.strip_prefix("block_").unwrap_or(block_id);

	let attempt = async {
		let mut stream = TcpStream::connect(addr).await?;
		let metadata = format!("read_block {} {}", storage_name, block_num);
		write_frame(&mut stream, metadata.as_bytes()).await?;
		read_frame(&mut stream).await
	};

	match attempt.await {
		Ok(data) => data,
		Err(e) => {
			warn!("Error reading block from {}: {}", addr, e);
			None
		}
	}
}

/// Delete one block from `addr`. `success` and `block_not_found` are
/// both acceptable outcomes (the block may already be gone).
pub async fn delete_block(addr: &str, storage_name: &str, block_id: &str) -> bool {
	let block_num = block_id.strip_prefix("block_").unwrap_or(block_id);

	let attempt = async {
		let mut stream = TcpStream::connect(addr).await?;
		let metadata = format!("delete_block {} {}", storage_name, block_num);
		write_frame(&mut stream, metadata.as_bytes()).await?;

		let mut buf = vec![0u8; 1024];
		let n = stream.read(&mut buf).await?;
		Ok::<Vec<u8>, Error>(buf[..n].to_vec())
	};

	match attempt.await {
		Ok(reply) => reply == b"success" || reply == b"block_not_found",
		Err(e) => {
			warn!("Error deleting block from {}: {}", addr, e);
			false
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use tokio::net::TcpListener;

	async fn fake_server() -> (String, TcpListener) {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap().to_string();
		(addr, listener)
	}

	#[tokio::test]
	async fn write_block_succeeds_on_success_reply() {
		let (addr, listener) = fake_server().await;
		tokio::spawn(async move {
			let (mut stream, _) = listener.accept().await.unwrap();
			let _metadata = read_frame(&mut stream).await.unwrap().unwrap();
			let _data = read_frame(&mut stream).await.unwrap().unwrap();
			write_frame(&mut stream, b"success").await.unwrap();
		});

		let ok = write_block(&addr, "storage_key", 0, 1, b"hello", Duration::from_secs(2)).await;
		assert!(ok);
	}

	#[tokio::test]
	async fn write_block_fails_on_error_reply() {
		let (addr, listener) = fake_server().await;
		tokio::spawn(async move {
			let (mut stream, _) = listener.accept().await.unwrap();
			let _metadata = read_frame(&mut stream).await.unwrap().unwrap();
			let _data = read_frame(&mut stream).await.unwrap().unwrap();
			write_frame(&mut stream, b"error: disk full").await.unwrap();
		});

		let ok = write_block(&addr, "storage_key", 0, 1, b"hello", Duration::from_secs(2)).await;
		assert!(!ok);
	}

	#[tokio::test]
	async fn read_block_returns_payload() {
		let (addr, listener) = fake_server().await;
		tokio::spawn(async move {
			let (mut stream, _) = listener.accept().await.unwrap();
			let _metadata = read_frame(&mut stream).await.unwrap().unwrap();
			write_frame(&mut stream, b"payload bytes").await.unwrap();
		});

		let data = read_block(&addr, "storage_key", "block_3").await;
		assert_eq!(data, Some(b"payload bytes".to_vec()));
	}

	#[tokio::test]
	async fn read_block_returns_none_on_truncated_reply() {
		let (addr, listener) = fake_server().await;
		tokio::spawn(async move {
			let (stream, _) = listener.accept().await.unwrap();
			drop(stream);
		});

		let data = read_block(&addr, "storage_key", "3").await;
		assert_eq!(data, None);
	}

	#[tokio::test]
	async fn delete_block_reads_unframed_reply() {
		let (addr, listener) = fake_server().await;
		tokio::spawn(async move {
			let (mut stream, _) = listener.accept().await.unwrap();
			let _request = read_frame(&mut stream).await.unwrap().unwrap();
			stream.write_all(b"success").await.unwrap();
		});

		let ok = delete_block(&addr, "storage_key", "block_5").await;
		assert!(ok);
	}

	#[tokio::test]
	async fn delete_block_accepts_block_not_found() {
		let (addr, listener) = fake_server().await;
		tokio::spawn(async move {
			let (mut stream, _) = listener.accept().await.unwrap();
			let _request = read_frame(&mut stream).await.unwrap().unwrap();
			stream.write_all(b"block_not_found").await.unwrap();
		});

		let ok = delete_block(&addr, "storage_key", "5").await;
		assert!(ok);
	}
}
