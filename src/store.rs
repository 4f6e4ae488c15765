// ---------------------------------------------------------------------------
// AssociationStore — pairwise co-purchase counters with ranked lookup
// ---------------------------------------------------------------------------
//
// Maintains item id → (peer id → count), one directed edge per direction of
// an associated pair. Both directions are incremented together by
// `record_purchase` but stored as independent counters. Queries merge the
// neighbor sets of the input items by summing counts per peer and rank the
// result by descending count, ascending id on ties.
//
// All data methods take `&self`; the edge map sits behind an RwLock so the
// store can be shared across request-handling threads.
// ---------------------------------------------------------------------------

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;

use crate::error::AssocError;
use crate::persistence::{self, SnapshotItems};

pub type ItemId = String;
pub type Score = u64;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Suggestion count used when a query does not name one.
pub const DEFAULT_SUGGESTIONS: usize = 6;

/// Configuration for an `AssociationStore`.
pub struct StoreConfig {
	pub storage_path: Option<String>,
	pub default_suggestions: usize,
}

impl Default for StoreConfig {
	fn default() -> Self {
		Self {
			storage_path: None,
			default_suggestions: DEFAULT_SUGGESTIONS,
		}
	}
}

// ---------------------------------------------------------------------------
// Suggestion
// ---------------------------------------------------------------------------

/// One ranked query result: an item id and its (combined) association count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
	pub id: ItemId,
	pub score: Score,
}

// ---------------------------------------------------------------------------
// AssociationStore
// ---------------------------------------------------------------------------

struct Inner {
	edges: HashMap<ItemId, HashMap<ItemId, Score>>,
	dirty: bool,
}

/// Shared co-purchase association store.
pub struct AssociationStore {
	inner: RwLock<Inner>,
	config: StoreConfig,
}

const POISON_MSG: &str = "association map lock poisoned";

fn storage_error(e: persistence::PersistenceError) -> AssocError {
	match e {
		persistence::PersistenceError::Io(io) => AssocError::Unavailable(io.to_string()),
		persistence::PersistenceError::Corruption(msg) => AssocError::Corruption(msg),
		persistence::PersistenceError::Serialization(msg) => AssocError::Serialization(msg),
	}
}

/// Drop repeated ids, keeping first occurrences in order.
fn dedup(items: &[ItemId]) -> Vec<&str> {
	let mut seen = HashSet::new();
	items
		.iter()
		.map(|id| id.as_str())
		.filter(|id| seen.insert(*id))
		.collect()
}

impl AssociationStore {
	// -- Lifecycle -----------------------------------------------------------

	/// Create a new empty store.
	pub fn new(config: StoreConfig) -> Self {
		Self {
			inner: RwLock::new(Inner {
				edges: HashMap::new(),
				dirty: false,
			}),
			config,
		}
	}

	/// Initialize the store. If a storage path is provided (or was set in
	/// config), load the persisted snapshot from disk.
	pub fn initialize(&mut self, storage_path: Option<&str>) -> Result<(), AssocError> {
		let effective_path = storage_path
			.map(|s| s.to_string())
			.or_else(|| self.config.storage_path.clone());

		if let Some(ref path) = effective_path {
			self.config.storage_path = Some(path.clone());

			let items = persistence::load_from_directory(path).map_err(storage_error)?;
			let loaded = items.len();

			let inner = self
				.inner
				.get_mut()
				.map_err(|_| AssocError::Unavailable(POISON_MSG.into()))?;
			inner.edges = items;
			inner.dirty = false;

			tracing::info!(items = loaded, "Loaded association snapshot");
		}

		Ok(())
	}

	/// Persist the current association map when a storage path is configured.
	/// Held under the write lock so the dirty transition matches exactly what
	/// was written.
	pub fn save(&self) -> Result<(), AssocError> {
		let dir = match &self.config.storage_path {
			Some(d) => d,
			None => return Ok(()),
		};

		let mut inner = self.write()?;
		persistence::save_to_directory(dir, &inner.edges).map_err(storage_error)?;
		inner.dirty = false;
		Ok(())
	}

	/// Save any unsaved changes (when a storage path is configured) and let
	/// the store go.
	pub fn dispose(&mut self) -> Result<(), AssocError> {
		let dirty = self
			.inner
			.get_mut()
			.map_err(|_| AssocError::Unavailable(POISON_MSG.into()))?
			.dirty;
		if dirty && self.config.storage_path.is_some() {
			self.save()?;
		}
		Ok(())
	}

	pub fn default_suggestions(&self) -> usize {
		self.config.default_suggestions
	}

	// -- Recording -----------------------------------------------------------

	/// Record one completed purchase: every unordered pair of distinct items
	/// in the basket gets both of its directed counters incremented by 1.
	///
	/// Repeated ids within the basket are collapsed first, so an item never
	/// pairs with itself. Fewer than two distinct items is a no-op. Returns
	/// the number of pairs touched.
	pub fn record_purchase(&self, items: &[ItemId]) -> Result<usize, AssocError> {
		let unique = dedup(items);
		if unique.len() < 2 {
			return Ok(0);
		}

		let mut inner = self.write()?;
		for i in 0..unique.len() {
			for j in (i + 1)..unique.len() {
				let a = unique[i];
				let b = unique[j];

				*inner
					.edges
					.entry(a.to_string())
					.or_default()
					.entry(b.to_string())
					.or_insert(0) += 1;
				*inner
					.edges
					.entry(b.to_string())
					.or_default()
					.entry(a.to_string())
					.or_insert(0) += 1;
			}
		}
		inner.dirty = true;

		let pairs = unique.len() * (unique.len() - 1) / 2;
		tracing::debug!(items = unique.len(), pairs, "Recorded purchase");
		Ok(pairs)
	}

	// -- Queries -------------------------------------------------------------

	/// Items most strongly associated with the given ones, best first.
	pub fn suggest(&self, items: &[ItemId], limit: usize) -> Result<Vec<ItemId>, AssocError> {
		Ok(self.merged(items, limit)?.into_iter().map(|s| s.id).collect())
	}

	/// Like [`suggest`](Self::suggest), but keeps the combined counts.
	pub fn suggest_detailed(
		&self,
		items: &[ItemId],
		limit: usize,
	) -> Result<Vec<Suggestion>, AssocError> {
		self.merged(items, limit)
	}

	/// Union-sum merge of the input items' neighbor sets. Computed into
	/// call-local state under the read lock; the store itself is never
	/// touched and no scratch key is shared between concurrent queries.
	fn merged(&self, items: &[ItemId], limit: usize) -> Result<Vec<Suggestion>, AssocError> {
		if limit == 0 {
			return Ok(Vec::new());
		}
		let unique = dedup(items);
		if unique.is_empty() {
			return Ok(Vec::new());
		}

		let inner = self.read()?;

		let mut combined: HashMap<&str, Score> = HashMap::new();
		for id in &unique {
			if let Some(neighbors) = inner.edges.get(*id) {
				for (peer, &score) in neighbors {
					*combined.entry(peer.as_str()).or_insert(0) += score;
				}
			}
		}

		// An input item is never suggested alongside itself.
		for id in &unique {
			combined.remove(*id);
		}

		let mut ranked: Vec<(&str, Score)> = combined.into_iter().collect();
		ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
		ranked.truncate(limit);

		Ok(ranked
			.into_iter()
			.map(|(id, score)| Suggestion {
				id: id.to_string(),
				score,
			})
			.collect())
	}

	/// The ranked neighbor set of a single item, descending count then
	/// ascending id. Unknown items have no neighbors.
	pub fn neighbors(&self, id: &str, limit: usize) -> Result<Vec<Suggestion>, AssocError> {
		let inner = self.read()?;
		let neighbors = match inner.edges.get(id) {
			Some(n) => n,
			None => return Ok(Vec::new()),
		};

		let mut ranked: Vec<(&str, Score)> = neighbors
			.iter()
			.map(|(peer, &score)| (peer.as_str(), score))
			.collect();
		ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
		ranked.truncate(limit);

		Ok(ranked
			.into_iter()
			.map(|(peer, score)| Suggestion {
				id: peer.to_string(),
				score,
			})
			.collect())
	}

	// -- Maintenance ---------------------------------------------------------

	/// Remove every association. Exclusive while the map is wiped, so a
	/// concurrent reader sees either the full store or an empty one.
	pub fn clear(&self) -> Result<(), AssocError> {
		{
			let mut inner = self.write()?;
			inner.edges.clear();
			inner.dirty = true;
		}

		// The snapshot must be wiped too, or a restart would resurrect the
		// cleared associations.
		if let Some(dir) = &self.config.storage_path {
			persistence::save_to_directory(dir, &SnapshotItems::new())
				.map_err(|e| AssocError::MaintenanceFailed(e.to_string()))?;
			let mut inner = self.write()?;
			// A purchase recorded while the empty snapshot was written keeps
			// its dirty bit.
			if inner.edges.is_empty() {
				inner.dirty = false;
			}
		}

		tracing::info!("Association store cleared");
		Ok(())
	}

	/// Remove one item entirely: its own neighbor set and every edge pointing
	/// at it. Returns whether anything was removed.
	pub fn evict(&self, id: &str) -> Result<bool, AssocError> {
		let mut inner = self.write()?;

		let removed_forward = inner.edges.remove(id).is_some();
		let mut removed_reverse = false;
		for neighbors in inner.edges.values_mut() {
			if neighbors.remove(id).is_some() {
				removed_reverse = true;
			}
		}
		inner.edges.retain(|_, neighbors| !neighbors.is_empty());

		let removed = removed_forward || removed_reverse;
		if removed {
			inner.dirty = true;
			tracing::info!(item = id, "Evicted item from association store");
		}
		Ok(removed)
	}

	// -- Metrics -------------------------------------------------------------

	/// Number of items with at least one recorded association.
	pub fn item_count(&self) -> Result<usize, AssocError> {
		Ok(self.read()?.edges.len())
	}

	/// Total number of directed edges.
	pub fn edge_count(&self) -> Result<usize, AssocError> {
		Ok(self.read()?.edges.values().map(|n| n.len()).sum())
	}

	pub fn is_dirty(&self) -> Result<bool, AssocError> {
		Ok(self.read()?.dirty)
	}

	// -- Lock accessors ------------------------------------------------------

	fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, AssocError> {
		self.inner
			.read()
			.map_err(|_| AssocError::Unavailable(POISON_MSG.into()))
	}

	fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, AssocError> {
		self.inner
			.write()
			.map_err(|_| AssocError::Unavailable(POISON_MSG.into()))
	}
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;

	fn store() -> AssociationStore {
		AssociationStore::new(StoreConfig::default())
	}

	fn ids(raw: &[&str]) -> Vec<ItemId> {
		raw.iter().map(|s| s.to_string()).collect()
	}

	/// The worked three-basket history: {1,2}, {1,3}, {2,3}.
	fn seeded() -> AssociationStore {
		let s = store();
		s.record_purchase(&ids(&["1", "2"])).unwrap();
		s.record_purchase(&ids(&["1", "3"])).unwrap();
		s.record_purchase(&ids(&["2", "3"])).unwrap();
		s
	}

	// -- record_purchase ------------------------------------------------------

	#[test]
	fn record_creates_symmetric_edges() {
		let s = store();
		s.record_purchase(&ids(&["a", "b", "c"])).unwrap();

		for (x, y) in [("a", "b"), ("a", "c"), ("b", "c")] {
			let forward = s.neighbors(x, 10).unwrap();
			let backward = s.neighbors(y, 10).unwrap();
			assert_eq!(
				forward.iter().find(|n| n.id == y).unwrap().score,
				backward.iter().find(|n| n.id == x).unwrap().score,
			);
		}
	}

	#[test]
	fn record_is_additive() {
		let s = store();
		s.record_purchase(&ids(&["a", "b"])).unwrap();
		s.record_purchase(&ids(&["a", "b"])).unwrap();

		let n = s.neighbors("a", 10).unwrap();
		assert_eq!(n, vec![Suggestion { id: "b".into(), score: 2 }]);
	}

	#[test]
	fn record_never_self_associates() {
		let s = store();
		// Same item twice in one basket: distinct occurrences, but no A→A edge.
		s.record_purchase(&ids(&["a", "a", "b"])).unwrap();

		let n = s.neighbors("a", 10).unwrap();
		assert!(n.iter().all(|x| x.id != "a"));
		assert_eq!(n.len(), 1);
		assert_eq!(n[0].score, 1);
	}

	#[test]
	fn record_empty_or_single_is_noop() {
		let s = store();
		assert_eq!(s.record_purchase(&[]).unwrap(), 0);
		assert_eq!(s.record_purchase(&ids(&["a"])).unwrap(), 0);
		assert_eq!(s.record_purchase(&ids(&["a", "a", "a"])).unwrap(), 0);
		assert_eq!(s.item_count().unwrap(), 0);
		assert!(!s.is_dirty().unwrap());
	}

	#[test]
	fn record_returns_pair_count() {
		let s = store();
		assert_eq!(s.record_purchase(&ids(&["a", "b", "c", "d"])).unwrap(), 6);
	}

	// -- suggest --------------------------------------------------------------

	#[test]
	fn suggest_single_item_breaks_ties_by_ascending_id() {
		let s = seeded();
		// Both 2 and 3 have count 1 with item 1.
		assert_eq!(s.suggest(&ids(&["1"]), 2).unwrap(), ids(&["2", "3"]));
	}

	#[test]
	fn suggest_ranks_higher_counts_first() {
		let s = seeded();
		s.record_purchase(&ids(&["1", "3"])).unwrap();
		// 1↔3 is now 2, 1↔2 still 1.
		assert_eq!(s.suggest(&ids(&["1"]), 2).unwrap(), ids(&["3", "2"]));
	}

	#[test]
	fn suggest_truncates_to_limit() {
		let s = seeded();
		s.record_purchase(&ids(&["1", "2"])).unwrap();
		assert_eq!(s.suggest(&ids(&["1"]), 1).unwrap(), ids(&["2"]));
	}

	#[test]
	fn suggest_union_sums_across_inputs() {
		let s = seeded();
		// Neighbors of {1,2} minus the inputs: 3 with 1+1.
		let detailed = s.suggest_detailed(&ids(&["1", "2"]), 5).unwrap();
		assert_eq!(detailed, vec![Suggestion { id: "3".into(), score: 2 }]);
	}

	#[test]
	fn suggest_excludes_input_items() {
		let s = seeded();
		let result = s.suggest(&ids(&["1", "2"]), 10).unwrap();
		assert!(!result.contains(&"1".to_string()));
		assert!(!result.contains(&"2".to_string()));
	}

	#[test]
	fn suggest_limit_zero_returns_empty() {
		let s = seeded();
		assert!(s.suggest(&ids(&["1"]), 0).unwrap().is_empty());
	}

	#[test]
	fn suggest_bounded_by_limit() {
		let s = store();
		s.record_purchase(&ids(&["x", "a", "b", "c", "d", "e"])).unwrap();
		assert_eq!(s.suggest(&ids(&["x"]), 3).unwrap().len(), 3);
	}

	#[test]
	fn suggest_unknown_or_empty_input_returns_empty() {
		let s = seeded();
		assert!(s.suggest(&ids(&["nope"]), 5).unwrap().is_empty());
		assert!(s.suggest(&[], 5).unwrap().is_empty());
	}

	#[test]
	fn suggest_on_fresh_store_returns_empty() {
		let s = store();
		assert!(s.suggest(&ids(&["1"]), 5).unwrap().is_empty());
	}

	#[test]
	fn suggest_is_deterministic() {
		let s = seeded();
		let first = s.suggest(&ids(&["1", "2", "3"]), 10).unwrap();
		for _ in 0..5 {
			assert_eq!(s.suggest(&ids(&["1", "2", "3"]), 10).unwrap(), first);
		}
	}

	#[test]
	fn suggest_does_not_mutate_the_store() {
		let s = seeded();
		let edges_before = s.edge_count().unwrap();
		s.suggest(&ids(&["1", "2"]), 5).unwrap();
		assert_eq!(s.edge_count().unwrap(), edges_before);
	}

	#[test]
	fn suggest_collapses_repeated_inputs() {
		let s = seeded();
		// "1" named twice still contributes its neighbor set once.
		let once = s.suggest_detailed(&ids(&["1", "2"]), 5).unwrap();
		let twice = s.suggest_detailed(&ids(&["1", "1", "2"]), 5).unwrap();
		assert_eq!(once, twice);
	}

	// -- neighbors ------------------------------------------------------------

	#[test]
	fn neighbors_ranked_with_scores() {
		let s = seeded();
		s.record_purchase(&ids(&["1", "3"])).unwrap();
		let n = s.neighbors("1", 10).unwrap();
		assert_eq!(
			n,
			vec![
				Suggestion { id: "3".into(), score: 2 },
				Suggestion { id: "2".into(), score: 1 },
			]
		);
	}

	#[test]
	fn neighbors_of_unknown_item_is_empty() {
		assert!(seeded().neighbors("nope", 10).unwrap().is_empty());
	}

	// -- clear / evict --------------------------------------------------------

	#[test]
	fn clear_resets_every_item() {
		let s = seeded();
		s.clear().unwrap();
		for id in ["1", "2", "3"] {
			assert!(s.suggest(&ids(&[id]), 5).unwrap().is_empty());
		}
		assert_eq!(s.item_count().unwrap(), 0);
		assert_eq!(s.edge_count().unwrap(), 0);
	}

	#[test]
	fn store_usable_after_clear() {
		let s = seeded();
		s.clear().unwrap();
		s.record_purchase(&ids(&["7", "8"])).unwrap();
		assert_eq!(s.suggest(&ids(&["7"]), 5).unwrap(), ids(&["8"]));
	}

	#[test]
	fn evict_removes_both_directions() {
		let s = seeded();
		assert!(s.evict("1").unwrap());

		assert!(s.neighbors("1", 10).unwrap().is_empty());
		// 2 and 3 keep only each other.
		assert_eq!(s.suggest(&ids(&["2"]), 5).unwrap(), ids(&["3"]));
		assert_eq!(s.suggest(&ids(&["3"]), 5).unwrap(), ids(&["2"]));
	}

	#[test]
	fn evict_unknown_item_returns_false() {
		let s = seeded();
		assert!(!s.evict("nope").unwrap());
		assert_eq!(s.item_count().unwrap(), 3);
	}

	// -- metrics / dirty ------------------------------------------------------

	#[test]
	fn counts_track_items_and_edges() {
		let s = seeded();
		assert_eq!(s.item_count().unwrap(), 3);
		// Three pairs, two directions each.
		assert_eq!(s.edge_count().unwrap(), 6);
	}

	#[test]
	fn dirty_set_by_mutation() {
		let s = store();
		assert!(!s.is_dirty().unwrap());
		s.record_purchase(&ids(&["a", "b"])).unwrap();
		assert!(s.is_dirty().unwrap());
	}

	// -- persistence lifecycle ------------------------------------------------

	#[test]
	fn save_and_reload_round_trip() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().to_str().unwrap();

		let mut s = AssociationStore::new(StoreConfig::default());
		s.initialize(Some(path)).unwrap();
		s.record_purchase(&ids(&["1", "2"])).unwrap();
		s.record_purchase(&ids(&["1", "2"])).unwrap();
		s.save().unwrap();
		assert!(!s.is_dirty().unwrap());

		let mut restored = AssociationStore::new(StoreConfig::default());
		restored.initialize(Some(path)).unwrap();
		assert_eq!(
			restored.neighbors("1", 10).unwrap(),
			vec![Suggestion { id: "2".into(), score: 2 }]
		);
	}

	#[test]
	fn save_without_storage_path_is_noop() {
		let s = seeded();
		s.save().unwrap();
		// Nothing was configured, so nothing was persisted and the data stays.
		assert_eq!(s.item_count().unwrap(), 3);
	}

	#[test]
	fn clear_wipes_the_snapshot() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().to_str().unwrap();

		let mut s = AssociationStore::new(StoreConfig::default());
		s.initialize(Some(path)).unwrap();
		s.record_purchase(&ids(&["1", "2"])).unwrap();
		s.save().unwrap();

		s.clear().unwrap();

		let mut restored = AssociationStore::new(StoreConfig::default());
		restored.initialize(Some(path)).unwrap();
		assert_eq!(restored.item_count().unwrap(), 0);
	}

	#[test]
	fn dispose_saves_dirty_state() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().to_str().unwrap();

		let mut s = AssociationStore::new(StoreConfig::default());
		s.initialize(Some(path)).unwrap();
		s.record_purchase(&ids(&["1", "2"])).unwrap();
		s.dispose().unwrap();

		let mut restored = AssociationStore::new(StoreConfig::default());
		restored.initialize(Some(path)).unwrap();
		assert_eq!(restored.suggest(&ids(&["1"]), 5).unwrap(), ids(&["2"]));
	}

	#[test]
	fn initialize_surfaces_corrupt_snapshot() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(dir.path().join("index.json"), b"garbage").unwrap();

		let mut s = AssociationStore::new(StoreConfig::default());
		let err = s.initialize(dir.path().to_str()).unwrap_err();
		assert!(matches!(err, AssocError::Corruption(_)));
	}

	// -- concurrency ----------------------------------------------------------

	#[test]
	fn concurrent_records_lose_no_increments() {
		let s = Arc::new(store());
		let threads = 8;
		let rounds = 100;

		let handles: Vec<_> = (0..threads)
			.map(|_| {
				let s = Arc::clone(&s);
				std::thread::spawn(move || {
					for _ in 0..rounds {
						s.record_purchase(&ids(&["a", "b"])).unwrap();
					}
				})
			})
			.collect();
		for h in handles {
			h.join().unwrap();
		}

		let expected = (threads * rounds) as u64;
		let n = s.neighbors("a", 10).unwrap();
		assert_eq!(n, vec![Suggestion { id: "b".into(), score: expected }]);
		let n = s.neighbors("b", 10).unwrap();
		assert_eq!(n[0].score, expected);
	}

	#[test]
	fn concurrent_readers_and_writers() {
		let s = Arc::new(seeded());

		let writer = {
			let s = Arc::clone(&s);
			std::thread::spawn(move || {
				for _ in 0..200 {
					s.record_purchase(&ids(&["1", "2", "3"])).unwrap();
				}
			})
		};
		let readers: Vec<_> = (0..4)
			.map(|_| {
				let s = Arc::clone(&s);
				std::thread::spawn(move || {
					for _ in 0..200 {
						let result = s.suggest(&ids(&["1", "2"]), 5).unwrap();
						assert!(result.len() <= 5);
						assert!(!result.contains(&"1".to_string()));
						assert!(!result.contains(&"2".to_string()));
					}
				})
			})
			.collect();

		writer.join().unwrap();
		for r in readers {
			r.join().unwrap();
		}

		// Every writer increment landed.
		let n = s.neighbors("2", 10).unwrap();
		assert_eq!(n.iter().find(|x| x.id == "3").unwrap().score, 201);
	}
}
