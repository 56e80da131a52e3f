//! Block protocol TCP server: one task per accepted connection,
//! dispatching to the block manager / replication dispatcher. Grounded
//! on `datanode.py::start_server`/`accept_connections`/`handle_connection`
//! and, for the per-connection `tokio::spawn` shape, on
//! `garage/server.rs`'s service-launch pattern.
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};

use strata_util::error::Result;

use crate::manager::BlockManager;
use crate::protocol::{read_frame, write_frame, write_raw, Request};
use crate::replication::ReplicationDispatcher;

pub async fn run(
	bind_addr: SocketAddr,
	manager: Arc<BlockManager>,
	dispatcher: Arc<ReplicationDispatcher>,
) -> Result<()> {
	let listener = TcpListener::bind(bind_addr).await?;
	info!("Block server listening on {}", bind_addr);
	serve(listener, manager, dispatcher).await
}

/// Accept loop over an already-bound listener (see
/// `strata_coordinator::server::serve` for why this is split out).
pub async fn serve(
	listener: TcpListener,
	manager: Arc<BlockManager>,
	dispatcher: Arc<ReplicationDispatcher>,
) -> Result<()> {
	loop {
		let (stream, peer) = listener.accept().await?;
		let manager = manager.clone();
		let dispatcher = dispatcher.clone();
		tokio::spawn(async move {
			if let Err(e) = handle_connection(stream, manager, dispatcher).await {
				debug!("Connection from {} ended with error: {}", peer, e);
			}
		});
	}
}

async fn handle_connection(
	mut stream: TcpStream,
	manager: Arc<BlockManager>,
	dispatcher: Arc<ReplicationDispatcher>,
) -> Result<()> {
	let command_frame = match read_frame(&mut stream).await? {
		Some(frame) => frame,
		None => return Ok(()),
	};
	let command_line = String::from_utf8_lossy(&command_frame);
	let request = match crate::protocol::parse_request(&command_line) {
		Ok(r) => r,
		Err(e) => {
			write_frame(&mut stream, format!("error: {}", e).as_bytes()).await?;
			return Ok(());
		}
	};

	match request {
		Request::WriteBlock {
			storage_key,
			ordinal,
			total_blocks: _,
		} => {
			let data = match read_frame(&mut stream).await? {
				Some(d) => d,
				None => {
					write_frame(&mut stream, b"error: no data").await?;
					return Ok(());
				}
			};

			match manager.write_block(&storage_key, ordinal, &data).await {
				Ok(()) => {
					write_frame(&mut stream, b"success").await?;
					dispatcher.enqueue(storage_key, ordinal, data);
				}
				Err(e) => {
					write_frame(&mut stream, format!("error: {}", e).as_bytes()).await?;
				}
			}
		}
		Request::ReplicateBlock {
			storage_key,
			ordinal,
		} => {
			let data = match read_frame(&mut stream).await? {
				Some(d) => d,
				None => {
					write_frame(&mut stream, b"error: no data").await?;
					return Ok(());
				}
			};
			match manager.write_block(&storage_key, ordinal, &data).await {
				Ok(()) => write_frame(&mut stream, b"success").await?,
				Err(e) => write_frame(&mut stream, format!("error: {}", e).as_bytes()).await?,
			}
		}
		Request::ReadBlock {
			storage_key,
			ordinal,
		} => match manager.read_block(&storage_key, ordinal).await? {
			Some(data) => write_frame(&mut stream, &data).await?,
			None => {
				// No frame at all: the client observes truncation and
				// retries at another replica (spec.md §4.2).
			}
		},
		Request::DeleteBlock {
			storage_key,
			ordinal,
		} => {
			let existed = manager.delete_block(&storage_key, ordinal).await?;
			let reply: &[u8] = if existed { b"success" } else { b"block_not_found" };
			write_raw(&mut stream, reply).await?;
		}
	}

	Ok(())
}
