//! The block protocol's wire framing and verb parsing. Grounded on
//! `datanode.py::send_message`/`recv_message`/`handle_connection` plus
//! the four `handle_*` dispatchers. Two framing styles coexist (spec.md
//! §4.4): every verb's *request* is a 4-byte-big-endian length-prefixed
//! frame, but `delete_block`'s *reply* is sent raw, without a length
//! prefix — preserved here rather than unified, per spec.md §9 and
//! `DESIGN.md`'s recorded decision.
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use strata_util::error::{Error, Result};

/// Send one length-prefixed frame.
pub async fn write_frame(stream: &mut TcpStream, data: &[u8]) -> Result<()> {
	let len = (data.len() as u32).to_be_bytes();
	stream.write_all(&len).await?;
	stream.write_all(data).await?;
	Ok(())
}

/// Read one length-prefixed frame. Returns `None` on a clean close
/// before any bytes of the length prefix arrive (the caller treats this
/// as "the peer sent nothing"); a partial prefix or truncated body is
/// reported as an I/O error.
pub async fn read_frame(stream: &mut TcpStream) -> Result<Option<Vec<u8>>> {
	let mut len_buf = [0u8; 4];
	match read_exact_or_eof(stream, &mut len_buf).await? {
		false => return Ok(None),
		true => {}
	}
	let len = u32::from_be_bytes(len_buf) as usize;
	let mut data = vec![0u8; len];
	stream.read_exact(&mut data).await?;
	Ok(Some(data))
}

/// Like `AsyncReadExt::read_exact`, but returns `Ok(false)` instead of
/// an `UnexpectedEof` error when zero bytes were read before the peer
/// closed the connection (a clean close between messages, not mid-frame).
async fn read_exact_or_eof(stream: &mut TcpStream, buf: &mut [u8]) -> Result<bool> {
	let mut filled = 0;
	while filled < buf.len() {
		let n = stream.read(&mut buf[filled..]).await?;
		if n == 0 {
			if filled == 0 {
				return Ok(false);
			}
			return Err(Error::Protocol("connection closed mid-frame".into()));
		}
		filled += n;
	}
	Ok(true)
}

/// Send bytes with no length prefix: `delete_block`'s reply style.
pub async fn write_raw(stream: &mut TcpStream, data: &[u8]) -> Result<()> {
	stream.write_all(data).await?;
	Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
	WriteBlock {
		storage_key: String,
		ordinal: u64,
		total_blocks: u64,
	},
	ReplicateBlock {
		storage_key: String,
		ordinal: u64,
	},
	ReadBlock {
		storage_key: String,
		ordinal: u64,
	},
	DeleteBlock {
		storage_key: String,
		ordinal: u64,
	},
}

/// Strip an optional `block_` prefix and parse the remainder as an
/// ordinal. The original source is inconsistent about which callers
/// prefix their block id, so every verb accepts both forms.
fn parse_ordinal(token: &str) -> Result<u64> {
	let stripped = token.strip_prefix("block_").unwrap_or(token);
	stripped
		.parse::<u64>()
		.map_err(|_| Error::Protocol(format!("invalid block ordinal: {}", token)))
}

pub fn parse_request(line: &str) -> Result<Request> {
	let parts: Vec<&str> = line.split_whitespace().collect();
	match parts.as_slice() {
		["write_block", storage_key, ordinal, total_blocks] => Ok(Request::WriteBlock {
			storage_key: storage_key.to_string(),
			ordinal: parse_ordinal(ordinal)?,
			total_blocks: parse_ordinal(total_blocks)?,
		}),
		["replicate_block", storage_key, ordinal] => Ok(Request::ReplicateBlock {
			storage_key: storage_key.to_string(),
			ordinal: parse_ordinal(ordinal)?,
		}),
		["read_block", storage_key, ordinal] => Ok(Request::ReadBlock {
			storage_key: storage_key.to_string(),
			ordinal: parse_ordinal(ordinal)?,
		}),
		["delete_block", storage_key, ordinal] => Ok(Request::DeleteBlock {
			storage_key: storage_key.to_string(),
			ordinal: parse_ordinal(ordinal)?,
		}),
		_ => Err(Error::Protocol(format!("malformed request: {}", line))),
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn parses_all_four_verbs() {
		assert_eq!(
			parse_request("write_block __a.txt 0 3").unwrap(),
			Request::WriteBlock {
				storage_key: "__a.txt".into(),
				ordinal: 0,
				total_blocks: 3
			}
		);
		assert_eq!(
			parse_request("read_block __a.txt block_2").unwrap(),
			Request::ReadBlock {
				storage_key: "__a.txt".into(),
				ordinal: 2
			}
		);
		assert_eq!(
			parse_request("delete_block __a.txt block_2").unwrap(),
			Request::DeleteBlock {
				storage_key: "__a.txt".into(),
				ordinal: 2
			}
		);
	}

	#[test]
	fn rejects_unknown_verb() {
		assert!(parse_request("frobnicate foo").is_err());
	}
}
