//! Pure planning helpers for `delete_file`/`delete_directory`: no I/O, no
//! locking — just the aggregation logic `namespace.rs` calls while
//! already holding `dir_lock`. Grounded on `namenode.py::delete_file`/
//! `delete_directory`/`get_directory_contents_recursive`.
use serde::{Deserialize, Serialize};

use crate::namespace::FileMetadata;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BlockDeletionInfo {
	pub block_id: String,
	pub locations: Vec<String>,
	pub storage_name: String,
}

#[derive(Debug, Clone, Default)]
pub struct DirectoryContents {
	pub files: Vec<String>,
	pub directories: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DeleteDirectoryResult {
	pub blocks_info: Vec<BlockDeletionInfo>,
	pub deleted_files: usize,
	pub deleted_directories: usize,
}

/// The block-deletion plan for one file's metadata: every block the
/// block servers will be asked to remove.
pub fn blocks_to_deletion_info(metadata: &FileMetadata) -> Vec<BlockDeletionInfo> {
	metadata
		.blocks
		.iter()
		.map(|b| BlockDeletionInfo {
			block_id: b.block_id.clone(),
			locations: b.locations.clone(),
			storage_name: metadata.storage_name.clone(),
		})
		.collect()
}

/// Directory removal order: children before parents, so a crash
/// mid-deletion never leaves a directory entry pointing at an already-
/// removed child. The original source sorts lexicographically then
/// reverses; a true bottom-up topological order would work too, but
/// this matches the observed behavior exactly.
pub fn dirs_deletion_order(contents: &DirectoryContents, path: &str) -> Vec<String> {
	let mut all = contents.directories.clone();
	all.push(path.to_string());
	all.sort();
	all.reverse();
	all
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn deletion_order_is_children_before_parents() {
		let contents = DirectoryContents {
			files: vec![],
			directories: vec!["/a/b".to_string(), "/a".to_string()],
		};
		let order = dirs_deletion_order(&contents, "/a");
		let a_pos = order.iter().position(|p| p == "/a").unwrap();
		let ab_pos = order.iter().position(|p| p == "/a/b").unwrap();
		assert!(ab_pos < a_pos);
	}
}
