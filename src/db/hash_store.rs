//! Thin wrapper over a single [`crate::Tree`] exposed with hash-map
//! vocabulary (`hset`/`hget`/`hdel`/`hkeys`/`hexists`), mirroring the
//! ordered external hash store the coordinator treats its metadata
//! store as.
use crate::{Db, Result, Tree, Value};

#[derive(Clone)]
pub struct HashStore(Tree);

impl HashStore {
	pub fn open<S: AsRef<str>>(db: &Db, name: S) -> Result<Self> {
		Ok(Self(db.open_tree(name)?))
	}

	pub fn hset<K: AsRef<[u8]>, V: AsRef<[u8]>>(&self, field: K, value: V) -> Result<()> {
		self.0.insert(field, value)?;
		Ok(())
	}

	pub fn hget<K: AsRef<[u8]>>(&self, field: K) -> Result<Option<Value>> {
		self.0.get(field)
	}

	pub fn hdel<K: AsRef<[u8]>>(&self, field: K) -> Result<bool> {
		Ok(self.0.remove(field)?.is_some())
	}

	pub fn hexists<K: AsRef<[u8]>>(&self, field: K) -> Result<bool> {
		Ok(self.0.get(field)?.is_some())
	}

	/// All fields currently stored, in key order.
	pub fn hkeys(&self) -> Result<Vec<Value>> {
		self.0.iter()?.map(|r| r.map(|(k, _)| k)).collect()
	}

	pub fn len(&self) -> Result<usize> {
		self.0.len()
	}
}
