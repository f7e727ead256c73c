//! Example: Resolve a station key to a playable stream URL
//!
//! Run with: cargo run -p pmostations --example resolve_station -- <catalog-url> <key>

use std::sync::Arc;

use pmostations::{HttpStationCatalog, StationResolver};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let base_url = args.next().unwrap_or_else(|| "https://cdn.homer.radio".to_string());
    let key = args.next().unwrap_or_else(|| "87.6".to_string());

    println!("Resolving station {} against {}...\n", key, base_url);

    let catalog = HttpStationCatalog::builder().base_url(base_url).build()?;
    let resolver = StationResolver::new(Arc::new(catalog));

    let resolved = resolver.resolve(&key).await?;
    println!("Station:  {}", resolved.record.name);
    println!("Catalog:  {}", resolved.record.url);
    println!("Playable: {}", resolved.stream_url);

    Ok(())
}
