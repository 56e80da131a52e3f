//! Control-protocol verb parsing. A single whitespace-delimited line in,
//! a single line out — no length prefix (spec.md §4.4 contrasts this
//! with the block protocol's framing). Grounded on
//! `namenode.py::handle_datanode_registration`'s if/elif verb ladder,
//! restructured per spec.md §9's suggestion: "a small parser that
//! recognizes the leading verb then delegates to a verb-specific
//! remainder parser; strongly-typed request/response variants."
use strata_util::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
	Register {
		addr: String,
	},
	Heartbeat {
		addr: String,
	},
	GetDatanodes,
	GetDatanode,
	StoreMetadata {
		filename: String,
		block_count: u64,
		block_size: u64,
		total_size: u64,
		current_dir: String,
	},
	GetMetadata {
		filename: String,
		current_dir: String,
	},
	Mkdir {
		path: String,
	},
	Ls {
		path: String,
	},
	Exists {
		path: String,
	},
	DeleteFile {
		filename: String,
		current_dir: String,
	},
	DeleteDirectory {
		path: String,
	},
	GetMetrics,
}

/// On failure, the returned `Error::Protocol`'s message is the literal
/// wire response text, matching the original's ad hoc per-branch error
/// strings (`"Invalid message"`, `"error: insufficient parameters"`, ...).
pub fn parse_request(line: &str) -> Result<Request> {
	let mut parts = line.trim().split_whitespace();
	let verb = parts.next().ok_or_else(|| Error::Protocol("Invalid message".to_string()))?;

	match verb {
		"register" => {
			let addr = next_required(&mut parts)?;
			Ok(Request::Register { addr })
		}
		"heartbeat" => {
			let addr = next_required(&mut parts)?;
			Ok(Request::Heartbeat { addr })
		}
		"get_datanodes" => Ok(Request::GetDatanodes),
		"get_datanode" => Ok(Request::GetDatanode),
		"store_metadata" => {
			let rest: Vec<&str> = parts.collect();
			if rest.len() < 3 {
				return Err(Error::Protocol("error: insufficient parameters".to_string()));
			}
			let filename = rest[0].to_string();
			let block_count = parse_u64(rest[1])?;
			let block_size = parse_u64(rest[2])?;
			// The 4th field is `total_size` in the current 5-field shape, but the
			// older 4-field shape puts `cwd` there instead. Tell them apart by
			// whether the token parses as a number.
			let (total_size, current_dir) = match rest.get(3).and_then(|s| s.parse::<u64>().ok()) {
				Some(total_size) => (total_size, rest.get(4).map(|s| s.to_string()).unwrap_or_else(|| "/".to_string())),
				None => (block_count * block_size, rest.get(3).map(|s| s.to_string()).unwrap_or_else(|| "/".to_string())),
			};
			Ok(Request::StoreMetadata {
				filename,
				block_count,
				block_size,
				total_size,
				current_dir,
			})
		}
		"get_metadata" => {
			let rest: Vec<&str> = parts.collect();
			if rest.is_empty() {
				return Err(Error::Protocol("error: insufficient parameters".to_string()));
			}
			Ok(Request::GetMetadata {
				filename: rest[0].to_string(),
				current_dir: rest.get(1).map(|s| s.to_string()).unwrap_or_else(|| "/".to_string()),
			})
		}
		"mkdir" => {
			let path = next_required(&mut parts)?;
			Ok(Request::Mkdir { path })
		}
		"ls" => {
			let path = parts.next().map(|s| s.to_string()).unwrap_or_else(|| "/".to_string());
			Ok(Request::Ls { path })
		}
		"exists" => {
			let path = next_required(&mut parts)?;
			Ok(Request::Exists { path })
		}
		"delete_file" => {
			let rest: Vec<&str> = parts.collect();
			if rest.is_empty() {
				return Err(Error::Protocol(
					"delete_file_result error insufficient parameters".to_string(),
				));
			}
			Ok(Request::DeleteFile {
				filename: rest[0].to_string(),
				current_dir: rest.get(1).map(|s| s.to_string()).unwrap_or_else(|| "/".to_string()),
			})
		}
		"delete_directory" => {
			let path = parts.next().ok_or_else(|| {
				Error::Protocol("delete_directory_result error insufficient parameters".to_string())
			})?;
			Ok(Request::DeleteDirectory { path: path.to_string() })
		}
		"get_metrics" => Ok(Request::GetMetrics),
		_ => Err(Error::Protocol("Invalid message".to_string())),
	}
}

fn next_required<'a, I: Iterator<Item = &'a str>>(parts: &mut I) -> Result<String> {
	parts
		.next()
		.map(|s| s.to_string())
		.ok_or_else(|| Error::Protocol("Invalid message".to_string()))
}

fn parse_u64(s: &str) -> Result<u64> {
	s.parse::<u64>().map_err(|_| Error::Protocol("Invalid message".to_string()))
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn parses_register_and_heartbeat() {
		assert_eq!(
			parse_request("register 10.0.0.1:9000").unwrap(),
			Request::Register { addr: "10.0.0.1:9000".to_string() }
		);
		assert_eq!(
			parse_request("heartbeat 10.0.0.1:9000").unwrap(),
			Request::Heartbeat { addr: "10.0.0.1:9000".to_string() }
		);
	}

	#[test]
	fn parses_store_metadata_with_and_without_total_size() {
		assert_eq!(
			parse_request("store_metadata a.txt 3 65536 150000 /").unwrap(),
			Request::StoreMetadata {
				filename: "a.txt".to_string(),
				block_count: 3,
				block_size: 65536,
				total_size: 150000,
				current_dir: "/".to_string(),
			}
		);
		assert_eq!(
			parse_request("store_metadata a.txt 2 65536").unwrap(),
			Request::StoreMetadata {
				filename: "a.txt".to_string(),
				block_count: 2,
				block_size: 65536,
				total_size: 131072,
				current_dir: "/".to_string(),
			}
		);
	}

	#[test]
	fn parses_store_metadata_older_four_field_shape_with_cwd() {
		assert_eq!(
			parse_request("store_metadata a.txt 2 65536 /some/dir").unwrap(),
			Request::StoreMetadata {
				filename: "a.txt".to_string(),
				block_count: 2,
				block_size: 65536,
				total_size: 131072,
				current_dir: "/some/dir".to_string(),
			}
		);
	}

	#[test]
	fn ls_defaults_to_root() {
		assert_eq!(parse_request("ls").unwrap(), Request::Ls { path: "/".to_string() });
	}

	#[test]
	fn rejects_unknown_verb() {
		assert!(parse_request("frobnicate").is_err());
	}
}
