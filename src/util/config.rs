//! Contains types and functions related to the store's configuration file.
use std::io::Read;
use std::net::SocketAddr;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::Error;

/// Top-level configuration. A single TOML file is shared by both roles;
/// each binary only reads the section relevant to the role it was
/// started with (`strata coordinator` / `strata block`).
#[derive(Deserialize, Debug, Clone)]
pub struct Config {
	pub coordinator: CoordinatorConfig,
	#[serde(default)]
	pub block: Option<BlockConfig>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct CoordinatorConfig {
	/// Address to bind the control protocol listener on.
	pub bind_addr: SocketAddr,

	/// Directory in which the metadata store adapter keeps its files.
	pub metadata_dir: PathBuf,

	/// Metadata store engine: "sled" (default) or "sqlite".
	#[serde(default = "default_db_engine")]
	pub db_engine: String,

	/// Replication factor used for new block placements.
	#[serde(default = "default_replication_factor")]
	pub replication_factor: usize,

	/// A node is considered dead once this many seconds pass without a
	/// heartbeat.
	#[serde(default = "default_heartbeat_timeout")]
	pub heartbeat_timeout_secs: u64,

	/// Capacity of the bounded LRU metadata cache.
	#[serde(default = "default_cache_size")]
	pub max_cache_size: usize,
}

#[derive(Deserialize, Debug, Clone)]
pub struct BlockConfig {
	/// Address to bind the block protocol listener on.
	pub bind_addr: SocketAddr,

	/// Address other nodes should use to reach this block server
	/// (what gets registered with the coordinator).
	pub public_addr: SocketAddr,

	/// Coordinator control-protocol address.
	pub coordinator_addr: SocketAddr,

	/// Directory in which this node stores its blocks.
	pub data_dir: PathBuf,

	/// Target number of copies per block (including the primary).
	#[serde(default = "default_replication_factor")]
	pub replication_factor: usize,

	/// Heartbeat send interval.
	#[serde(default = "default_heartbeat_interval")]
	pub heartbeat_interval_secs: u64,
}

fn default_db_engine() -> String {
	"sled".to_string()
}
fn default_replication_factor() -> usize {
	3
}
fn default_heartbeat_timeout() -> u64 {
	30
}
fn default_heartbeat_interval() -> u64 {
	10
}
fn default_cache_size() -> usize {
	1000
}

/// Fixed block size: 64 KiB, per spec. Kept as a named constant (rather
/// than hardcoded at every call site) so tests can exercise multi-block
/// files without allocating real 64 KiB buffers.
pub const BLOCK_SIZE: usize = 64 * 1024;

/// Read and parse configuration.
pub fn read_config(config_file: PathBuf) -> Result<Config, Error> {
	let mut file = std::fs::OpenOptions::new()
		.read(true)
		.open(config_file.as_path())?;

	let mut config = String::new();
	file.read_to_string(&mut config)?;

	Ok(toml::from_str(&config)?)
}
