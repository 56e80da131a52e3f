//! The directory tree and file metadata namespace: everything the
//! control protocol's `mkdir`/`ls`/`exists`/`store_metadata`/
//! `get_metadata`/`delete_file`/`delete_directory` verbs touch. Grounded
//! on `original_source/namenode.py`'s directory/file methods, with the
//! external store (originally Redis) replaced by `strata_db::HashStore`
//! (spec.md §6's "metadata store adapter").
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use strata_db::hash_store::HashStore;
use strata_db::Db;
use strata_util::error::Result;
use strata_util::path::{basename, canonicalize, parent, path_to_key, resolve};
use strata_util::time::now_epoch_secs;

use crate::delete::{self, BlockDeletionInfo, DeleteDirectoryResult, DirectoryContents};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ChildInfo {
	#[serde(rename = "type")]
	pub child_type: String,
	pub created: f64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub size: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DirectoryData {
	#[serde(rename = "type")]
	pub dir_type: String,
	pub created: f64,
	pub children: HashMap<String, ChildInfo>,
	pub files: HashMap<String, ChildInfo>,
}

impl DirectoryData {
	fn new() -> Self {
		Self {
			dir_type: "directory".to_string(),
			created: now_epoch_secs(),
			children: HashMap::new(),
			files: HashMap::new(),
		}
	}
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DirEntry {
	pub name: String,
	#[serde(rename = "type")]
	pub entry_type: String,
	pub created: f64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub size: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BlockRef {
	pub block_id: String,
	pub size: u64,
	pub locations: Vec<String>,
	pub timestamp: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FileMetadata {
	pub filename: String,
	pub full_path: String,
	pub storage_name: String,
	pub blocks: Vec<BlockRef>,
	pub total_size: u64,
	pub creation_time: f64,
}

/// Owns the `directories` and `files` hash namespaces plus the `dir_lock`
/// that serializes every structural mutation (spec.md §5's lock table).
pub struct Namespace {
	dirs: HashStore,
	files: HashStore,
	dir_lock: Mutex<()>,
}

impl Namespace {
	pub fn new(db: &Db) -> Result<Self> {
		let dirs = HashStore::open(db, "directories")?;
		let files = HashStore::open(db, "files")?;
		let ns = Self {
			dirs,
			files,
			dir_lock: Mutex::new(()),
		};
		ns.init_root()?;
		Ok(ns)
	}

	fn init_root(&self) -> Result<()> {
		if !self.dirs.hexists("/")? {
			self.save_directory_data("/", &DirectoryData::new())?;
			info!("Initialized root directory structure");
		}
		Ok(())
	}

	fn get_directory_data(&self, path: &str) -> Result<Option<DirectoryData>> {
		match self.dirs.hget(path.as_bytes())? {
			Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
			None => Ok(None),
		}
	}

	fn save_directory_data(&self, path: &str, data: &DirectoryData) -> Result<()> {
		self.dirs.hset(path.as_bytes(), serde_json::to_vec(data)?)?;
		Ok(())
	}

	/// Whether a directory or a file exists at this (already-canonical
	/// or not) path.
	pub fn path_exists(&self, path: &str) -> Result<bool> {
		let path = canonicalize(path);
		if self.dirs.hexists(path.as_bytes())? {
			return Ok(true);
		}
		let key = path_to_key(&path);
		self.files.hexists(key.as_bytes())
	}

	pub async fn create_directory(&self, path: &str) -> Result<(bool, String)> {
		let path = canonicalize(path);
		let _guard = self.dir_lock.lock().await;

		if self.path_exists(&path)? {
			return Ok((false, "Directory already exists".to_string()));
		}

		let parent_path = parent(&path);
		if let Some(ref pp) = parent_path {
			if !self.path_exists(pp)? {
				return Ok((false, "Parent directory does not exist".to_string()));
			}
		}

		self.save_directory_data(&path, &DirectoryData::new())?;

		if let Some(pp) = parent_path {
			if let Some(mut parent_data) = self.get_directory_data(&pp)? {
				parent_data.children.insert(
					basename(&path).to_string(),
					ChildInfo {
						child_type: "directory".to_string(),
						created: now_epoch_secs(),
						size: None,
					},
				);
				self.save_directory_data(&pp, &parent_data)?;
			}
		}

		info!("Created directory: {}", path);
		Ok((true, "Directory created successfully".to_string()))
	}

	pub async fn list_directory(&self, path: &str) -> Result<Option<Vec<DirEntry>>> {
		let path = canonicalize(path);
		let _guard = self.dir_lock.lock().await;

		let dir_data = match self.get_directory_data(&path)? {
			Some(d) => d,
			None => return Ok(None),
		};

		let mut contents = Vec::new();
		for (name, info) in dir_data.children.iter() {
			contents.push(DirEntry {
				name: name.clone(),
				entry_type: info.child_type.clone(),
				created: info.created,
				size: None,
			});
		}
		for (name, info) in dir_data.files.iter() {
			contents.push(DirEntry {
				name: name.clone(),
				entry_type: "file".to_string(),
				created: info.created,
				size: Some(info.size.unwrap_or(0)),
			});
		}

		Ok(Some(contents))
	}

	/// Resolve a bare filename or path against `current_dir`, returning
	/// the canonical full path only if something actually exists there.
	pub fn get_file_full_path(&self, filename: &str, current_dir: &str) -> Result<Option<String>> {
		let full_path = resolve(current_dir, filename);
		if self.path_exists(&full_path)? {
			Ok(Some(full_path))
		} else {
			Ok(None)
		}
	}

	async fn register_file_in_directory(
		&self,
		file_path: &str,
		creation_time: f64,
		total_size: u64,
	) -> Result<()> {
		let parent_path = parent(file_path).unwrap_or_else(|| "/".to_string());
		let filename = basename(file_path).to_string();

		let _guard = self.dir_lock.lock().await;

		let mut parent_data = self
			.get_directory_data(&parent_path)?
			.unwrap_or_else(DirectoryData::new);

		parent_data.files.insert(
			filename.clone(),
			ChildInfo {
				child_type: "file".to_string(),
				created: creation_time,
				size: Some(total_size),
			},
		);
		self.save_directory_data(&parent_path, &parent_data)?;

		debug!("Registered file {} in directory {}", filename, parent_path);
		Ok(())
	}

	/// Persist metadata for a newly-placed file and link it into its
	/// parent directory. `metadata.full_path` must already be canonical.
	pub async fn store_file_metadata(&self, metadata: &FileMetadata) -> Result<()> {
		let file_key = path_to_key(&metadata.full_path);
		self.files.hset(file_key.as_bytes(), serde_json::to_vec(metadata)?)?;
		self.register_file_in_directory(&metadata.full_path, metadata.creation_time, metadata.total_size)
			.await?;
		info!(
			"Stored metadata for {} at {} with key {}",
			metadata.filename, metadata.full_path, file_key
		);
		Ok(())
	}

	/// Raw lookup, bypassing the metadata cache and any liveness
	/// filtering of block locations — the caller is responsible for both.
	pub fn get_file_metadata_raw(&self, file_key: &str) -> Result<Option<FileMetadata>> {
		match self.files.hget(file_key.as_bytes())? {
			Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
			None => Ok(None),
		}
	}

	/// Number of stored files, for `get_metrics`.
	pub fn files_len(&self) -> Result<usize> {
		self.files.len()
	}

	/// Total block count across every stored file, for `get_metrics`.
	pub fn total_blocks(&self) -> Result<usize> {
		let mut total = 0;
		for key in self.files.hkeys()? {
			if let Some(bytes) = self.files.hget(&key)? {
				let metadata: FileMetadata = serde_json::from_slice(&bytes)?;
				total += metadata.blocks.len();
			}
		}
		Ok(total)
	}

	pub async fn delete_file(
		&self,
		filename: &str,
		current_dir: &str,
	) -> Result<std::result::Result<Vec<BlockDeletionInfo>, String>> {
		let full_path = match self.get_file_full_path(filename, current_dir)? {
			Some(p) => p,
			None => return Ok(Err(format!("File '{}' not found", filename))),
		};
		let file_key = path_to_key(&full_path);

		let _guard = self.dir_lock.lock().await;

		let metadata = match self.get_file_metadata_raw(&file_key)? {
			Some(m) => m,
			None => return Ok(Err("File metadata not found".to_string())),
		};

		if let Some(pp) = parent(&full_path) {
			if let Some(mut parent_data) = self.get_directory_data(&pp)? {
				parent_data.files.remove(basename(&full_path));
				self.save_directory_data(&pp, &parent_data)?;
			}
		}
		self.files.hdel(file_key.as_bytes())?;

		info!("Deleted file metadata for {}", full_path);
		Ok(Ok(delete::blocks_to_deletion_info(&metadata)))
	}

	fn collect_directory_contents(&self, path: &str) -> Result<DirectoryContents> {
		let mut files = Vec::new();
		let mut directories = Vec::new();
		self.collect_directory_contents_rec(path, &mut files, &mut directories)?;
		Ok(DirectoryContents { files, directories })
	}

	fn collect_directory_contents_rec(
		&self,
		current_path: &str,
		files: &mut Vec<String>,
		directories: &mut Vec<String>,
	) -> Result<()> {
		let dir_data = match self.get_directory_data(current_path)? {
			Some(d) => d,
			None => return Ok(()),
		};

		for filename in dir_data.files.keys() {
			let file_path = canonicalize(&format!("{}/{}", current_path, filename));
			files.push(file_path);
		}

		for dirname in dir_data.children.keys() {
			let subdir_path = canonicalize(&format!("{}/{}", current_path, dirname));
			directories.push(subdir_path.clone());
			self.collect_directory_contents_rec(&subdir_path, files, directories)?;
		}

		Ok(())
	}

	pub async fn delete_directory(
		&self,
		path: &str,
	) -> Result<std::result::Result<DeleteDirectoryResult, String>> {
		let path = canonicalize(path);
		if path == "/" {
			return Ok(Err("Cannot delete root directory".to_string()));
		}

		let _guard = self.dir_lock.lock().await;

		if !self.path_exists(&path)? {
			return Ok(Err(format!("Directory '{}' does not exist", path)));
		}

		let contents = self.collect_directory_contents(&path)?;

		let mut all_blocks_info = Vec::new();
		for file_path in &contents.files {
			let file_key = path_to_key(file_path);
			if let Some(metadata) = self.get_file_metadata_raw(&file_key)? {
				all_blocks_info.extend(delete::blocks_to_deletion_info(&metadata));
			}
			self.files.hdel(file_key.as_bytes())?;
		}

		for dir_path in delete::dirs_deletion_order(&contents, &path) {
			self.dirs.hdel(dir_path.as_bytes())?;
		}

		if let Some(pp) = parent(&path) {
			if let Some(mut parent_data) = self.get_directory_data(&pp)? {
				parent_data.children.remove(basename(&path));
				self.save_directory_data(&pp, &parent_data)?;
			}
		}

		let deleted_files = contents.files.len();
		let deleted_directories = contents.directories.len() + 1;
		Ok(Ok(DeleteDirectoryResult {
			blocks_info: all_blocks_info,
			deleted_files,
			deleted_directories,
		}))
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn tmp_db() -> Db {
		let dir = std::env::temp_dir().join(format!("strata_ns_test_{}", rand::random::<u64>()));
		strata_db::open_db(dir, "sled").unwrap()
	}

	#[tokio::test]
	async fn root_exists_after_init() {
		let ns = Namespace::new(&tmp_db()).unwrap();
		assert!(ns.path_exists("/").unwrap());
	}

	#[tokio::test]
	async fn create_directory_requires_existing_parent() {
		let ns = Namespace::new(&tmp_db()).unwrap();
		let (ok, msg) = ns.create_directory("/a/b").await.unwrap();
		assert!(!ok);
		assert_eq!(msg, "Parent directory does not exist");

		let (ok, _) = ns.create_directory("/a").await.unwrap();
		assert!(ok);
		let (ok, _) = ns.create_directory("/a/b").await.unwrap();
		assert!(ok);
	}

	#[tokio::test]
	async fn create_directory_rejects_duplicate() {
		let ns = Namespace::new(&tmp_db()).unwrap();
		ns.create_directory("/a").await.unwrap();
		let (ok, msg) = ns.create_directory("/a").await.unwrap();
		assert!(!ok);
		assert_eq!(msg, "Directory already exists");
	}

	#[tokio::test]
	async fn list_directory_reports_children_and_files() {
		let ns = Namespace::new(&tmp_db()).unwrap();
		ns.create_directory("/a").await.unwrap();

		let metadata = FileMetadata {
			filename: "f.txt".to_string(),
			full_path: "/a/f.txt".to_string(),
			storage_name: path_to_key("/a/f.txt"),
			blocks: vec![],
			total_size: 42,
			creation_time: now_epoch_secs(),
		};
		ns.store_file_metadata(&metadata).await.unwrap();

		let listing = ns.list_directory("/a").await.unwrap().unwrap();
		assert_eq!(listing.len(), 1);
		assert_eq!(listing[0].name, "f.txt");
		assert_eq!(listing[0].entry_type, "file");
		assert_eq!(listing[0].size, Some(42));
	}

	#[tokio::test]
	async fn delete_file_removes_metadata_and_directory_entry() {
		let ns = Namespace::new(&tmp_db()).unwrap();
		let metadata = FileMetadata {
			filename: "f.txt".to_string(),
			full_path: "/f.txt".to_string(),
			storage_name: path_to_key("/f.txt"),
			blocks: vec![BlockRef {
				block_id: "block_0".to_string(),
				size: 10,
				locations: vec!["n1:1".to_string()],
				timestamp: now_epoch_secs(),
			}],
			total_size: 10,
			creation_time: now_epoch_secs(),
		};
		ns.store_file_metadata(&metadata).await.unwrap();

		let result = ns.delete_file("f.txt", "/").await.unwrap().unwrap();
		assert_eq!(result.len(), 1);
		assert_eq!(result[0].block_id, "block_0");
		assert!(!ns.path_exists("/f.txt").unwrap());
	}

	#[tokio::test]
	async fn delete_directory_rejects_root() {
		let ns = Namespace::new(&tmp_db()).unwrap();
		let result = ns.delete_directory("/").await.unwrap();
		assert_eq!(result.unwrap_err(), "Cannot delete root directory");
	}

	#[tokio::test]
	async fn delete_directory_removes_nested_contents() {
		let ns = Namespace::new(&tmp_db()).unwrap();
		ns.create_directory("/a").await.unwrap();
		ns.create_directory("/a/b").await.unwrap();

		let metadata = FileMetadata {
			filename: "f.txt".to_string(),
			full_path: "/a/b/f.txt".to_string(),
			storage_name: path_to_key("/a/b/f.txt"),
			blocks: vec![],
			total_size: 1,
			creation_time: now_epoch_secs(),
		};
		ns.store_file_metadata(&metadata).await.unwrap();

		let result = ns.delete_directory("/a").await.unwrap().unwrap();
		assert_eq!(result.deleted_files, 1);
		assert_eq!(result.deleted_directories, 2);
		assert!(!ns.path_exists("/a").unwrap());
		assert!(!ns.path_exists("/a/b").unwrap());
	}
}
