//! Querygrid – configuration-driven paginated queries over document collections.
//!
//! A *grid* is a named, declarative description of which fields of a
//! collection callers may search, filter, range over, sort by and see. A
//! request is a small JSON document:
//!
//! ```json
//! {"searchKeyword": {"query": "alice", "status": "active"},
//!  "filter": {"tags": ["a", "b"]},
//!  "range": {"age": {"min": 18, "max": 65}},
//!  "sort": {"name": "ascending"},
//!  "page": 2, "limit": 5}
//! ```
//!
//! Every clause is checked against the grid's field configuration before any
//! storage access; a request naming an unknown field or using a field for
//! something it does not allow is rejected as a whole.
//!
//! ## Modules
//! * [`config`] – Field descriptors, remote dependency descriptors and process settings.
//! * [`query`] – The request shape, conditions and pagination.
//! * [`field`] – [`field::FieldConfig`], per-clause validation plus the public/database name projection.
//! * [`formatter`] – [`formatter::QueryFormatter`], turning validated conditions into a [`predicate::Predicate`].
//! * [`store`] / [`persist`] – The [`store::Store`] trait with in-memory and SQLite implementations.
//! * [`grid`] – [`grid::CollectionGrid`], one paginated fetch against a store.
//! * [`api`] / [`remote`] – Fields owned by other services and the call capability used to reach them.
//! * [`composite`] – [`composite::CompositeGrid`], orchestrating a primary grid and its remotes.
//! * [`output`] – Column renaming and the response envelope.
//! * [`server`] – HTTP surface.
//!
//! ## Remote fields
//! A grid may declare remote dependencies. Criteria on fields a remote owns
//! are first resolved by calling that remote; the keys it returns constrain
//! the primary query, and the remote's records are merged into the returned
//! rows afterwards. Resolution fails closed: a failing remote, or a remote
//! criterion nothing satisfies, rejects the request rather than widening it.
//!
//! ## Quick Start
//! ```
//! use querygrid::{config::CollectionConfig, grid::CollectionGrid, store::MemoryStore};
//! use serde_json::json;
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let config = CollectionConfig::from_json(json!({
//!     "name": {"databaseName": "full_name", "search": true, "sort": true, "show": true}
//! })).unwrap();
//! let store = MemoryStore::new();
//! store.insert("people", [json!({"full_name": "Alice"}), json!({"full_name": "Bob"})]).unwrap();
//! let input = json!({"searchKeyword": {"name": "ali"}});
//! let mut grid = CollectionGrid::new(&store, "people", &config, &input).unwrap();
//! let page = grid.fetch().await.unwrap();
//! assert_eq!(page.pagination.total, 1);
//! # });
//! ```
//!
//! ## License
//! Dual licensed under Apache-2.0 and MIT.

pub mod api;
pub mod composite;
pub mod config;
pub mod error;
pub mod field;
pub mod formatter;
pub mod grid;
pub mod output;
pub mod persist;
pub mod predicate;
pub mod query;
pub mod remote;
pub mod server;
pub mod store;

pub use error::{GridError, Result};
