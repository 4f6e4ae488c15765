// ---------------------------------------------------------------------------
// AssocServer — JSON-RPC dispatcher
// ---------------------------------------------------------------------------
//
// Routes incoming JSON-RPC 2.0 requests (NDJSON over stdin) to
// AssociationStore operations: a main `run()` loop, a `dispatch()` match, a
// `with_store` helper, and free-standing handler functions for each method.
// ---------------------------------------------------------------------------

use std::io::{self, BufRead};

use serde::Deserialize;

use crate::error::AssocError;
use crate::protocol::*;
use crate::store::{AssociationStore, ItemId, StoreConfig, DEFAULT_SUGGESTIONS};
use crate::transport::NdjsonTransport;

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// JSON-RPC server that dispatches requests to an [`AssociationStore`].
pub struct AssocServer {
	transport: NdjsonTransport,
	store: Option<AssociationStore>,
}

impl AssocServer {
	/// Create a new server with the given transport.  The store is created
	/// lazily when `store/initialize` is called.
	pub fn new(transport: NdjsonTransport) -> Self {
		Self {
			transport,
			store: None,
		}
	}

	/// Main loop: read JSON-RPC messages from stdin, dispatch to handlers.
	pub fn run(&mut self) -> Result<(), AssocError> {
		let stdin = io::stdin();
		let reader = stdin.lock();

		for line_result in reader.lines() {
			let line = line_result?;
			if line.trim().is_empty() {
				continue;
			}

			let request: JsonRpcRequest = match serde_json::from_str(&line) {
				Ok(r) => r,
				Err(e) => {
					tracing::error!("Failed to parse request: {}", e);
					continue;
				}
			};

			self.dispatch(request);
		}

		Ok(())
	}

	// ── Dispatch ──────────────────────────────────────────────────────────

	fn dispatch(&mut self, req: JsonRpcRequest) {
		let id = req.id;
		let result = match req.method.as_str() {
			// -- Lifecycle -----------------------------------------------
			"store/initialize" => self.handle_initialize(req.params),
			"store/dispose" => self.handle_dispose(),
			"store/save" => self.with_store(|s| {
				s.save()?;
				Ok(serde_json::json!({}))
			}),

			// -- Recording -----------------------------------------------
			"store/recordPurchase" => {
				self.with_store(|s| handle_record_purchase(s, req.params))
			}

			// -- Queries -------------------------------------------------
			"store/suggest" => self.with_store(|s| handle_suggest(s, req.params)),
			"store/suggestDetailed" => {
				self.with_store(|s| handle_suggest_detailed(s, req.params))
			}
			"store/neighbors" => self.with_store(|s| handle_neighbors(s, req.params)),

			// -- Maintenance ---------------------------------------------
			"store/clear" => self.with_store(|s| {
				s.clear()?;
				Ok(serde_json::json!({}))
			}),
			"store/evict" => self.with_store(|s| handle_evict(s, req.params)),

			// -- Size / Dirty --------------------------------------------
			"store/size" => self.with_store(|s| {
				Ok(serde_json::json!({
					"items": s.item_count()?,
					"edges": s.edge_count()?,
				}))
			}),
			"store/isDirty" => {
				self.with_store(|s| Ok(serde_json::json!({ "dirty": s.is_dirty()? })))
			}

			// -- Unknown -------------------------------------------------
			_ => {
				self.transport.write_error(
					id,
					METHOD_NOT_FOUND,
					format!("Unknown method: {}", req.method),
					None,
				);
				return;
			}
		};

		match result {
			Ok(value) => self.transport.write_response(id, value),
			Err(e) => self.transport.write_error(
				id,
				ASSOC_ERROR,
				e.to_string(),
				Some(e.to_json_rpc_error()),
			),
		}
	}

	// ── Store accessor ────────────────────────────────────────────────────

	fn with_store<F>(&self, f: F) -> Result<serde_json::Value, AssocError>
	where
		F: FnOnce(&AssociationStore) -> Result<serde_json::Value, AssocError>,
	{
		match &self.store {
			Some(s) => f(s),
			None => Err(AssocError::NotInitialized),
		}
	}

	// ── Initialize / dispose ──────────────────────────────────────────────

	fn handle_initialize(
		&mut self,
		params: serde_json::Value,
	) -> Result<serde_json::Value, AssocError> {
		let p: InitializeParams = parse_params(params)?;

		let config = StoreConfig {
			storage_path: p.storage_path.clone(),
			default_suggestions: p.default_suggestions.unwrap_or(DEFAULT_SUGGESTIONS),
		};

		let mut store = AssociationStore::new(config);
		store.initialize(p.storage_path.as_deref())?;
		self.store = Some(store);

		Ok(serde_json::json!({}))
	}

	fn handle_dispose(&mut self) -> Result<serde_json::Value, AssocError> {
		match self.store.take() {
			Some(mut s) => {
				s.dispose()?;
				Ok(serde_json::json!({}))
			}
			None => Err(AssocError::NotInitialized),
		}
	}
}

// ---------------------------------------------------------------------------
// Param types
// ---------------------------------------------------------------------------

fn parse_params<T: serde::de::DeserializeOwned>(
	params: serde_json::Value,
) -> Result<T, AssocError> {
	serde_json::from_value(params)
		.map_err(|e| AssocError::Serialization(format!("Invalid params: {}", e)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeParams {
	storage_path: Option<String>,
	default_suggestions: Option<usize>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemsParams {
	items: Vec<ItemId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SuggestParams {
	items: Vec<ItemId>,
	max_results: Option<usize>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NeighborsParams {
	id: ItemId,
	max_results: Option<usize>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdParams {
	id: ItemId,
}

// ---------------------------------------------------------------------------
// Free-standing handler functions
// ---------------------------------------------------------------------------

fn handle_record_purchase(
	store: &AssociationStore,
	params: serde_json::Value,
) -> Result<serde_json::Value, AssocError> {
	let p: ItemsParams = parse_params(params)?;
	store.record_purchase(&p.items)?;
	Ok(serde_json::json!({}))
}

fn handle_suggest(
	store: &AssociationStore,
	params: serde_json::Value,
) -> Result<serde_json::Value, AssocError> {
	let p: SuggestParams = parse_params(params)?;
	let limit = p.max_results.unwrap_or_else(|| store.default_suggestions());
	let suggestions = store.suggest(&p.items, limit)?;
	Ok(serde_json::json!({ "suggestions": suggestions }))
}

fn handle_suggest_detailed(
	store: &AssociationStore,
	params: serde_json::Value,
) -> Result<serde_json::Value, AssocError> {
	let p: SuggestParams = parse_params(params)?;
	let limit = p.max_results.unwrap_or_else(|| store.default_suggestions());
	let suggestions = store.suggest_detailed(&p.items, limit)?;
	Ok(serde_json::json!({ "suggestions": suggestions }))
}

fn handle_neighbors(
	store: &AssociationStore,
	params: serde_json::Value,
) -> Result<serde_json::Value, AssocError> {
	let p: NeighborsParams = parse_params(params)?;
	let limit = p.max_results.unwrap_or(20);
	let neighbors = store.neighbors(&p.id, limit)?;
	Ok(serde_json::json!({ "neighbors": neighbors }))
}

fn handle_evict(
	store: &AssociationStore,
	params: serde_json::Value,
) -> Result<serde_json::Value, AssocError> {
	let p: IdParams = parse_params(params)?;
	let evicted = store.evict(&p.id)?;
	Ok(serde_json::json!({ "evicted": evicted }))
}
