//! Station catalog client and stream URL resolver
//!
//! This crate provides the station-facing half of the radio broadcast
//! engine:
//!
//! - **Catalog access**: the [`StationCatalog`] trait with an HTTP
//!   implementation ([`HttpStationCatalog`]) and an in-memory one
//!   ([`StaticCatalog`])
//! - **Stream resolution**: [`StationResolver`] turns a station key into a
//!   directly playable URL, following `.pls`/`.m3u` playlist indirections
//!
//! Resolution is stateless and happens once per broadcast creation, never
//! per listening session.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use pmostations::{StationRecord, StationResolver, StaticCatalog};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let catalog = StaticCatalog::from_records([StationRecord::new(
//!         "87.6",
//!         "Test FM",
//!         "http://stream.example.com/listen.pls",
//!     )]);
//!
//!     let resolver = StationResolver::new(Arc::new(catalog));
//!     let resolved = resolver.resolve("87.6").await?;
//!     println!("playable: {}", resolved.stream_url);
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod error;
pub mod models;
pub mod resolver;

pub use catalog::{HttpStationCatalog, HttpStationCatalogBuilder, StaticCatalog, StationCatalog};
pub use error::{Error, Result};
pub use models::{ResolvedStation, StationRecord};
pub use resolver::{detect_playlist_format, parse_playlist, PlaylistFormat, StationResolver};
