//! View Builder Binary - Per-Host View Aggregation
//!
//! Merges address-sorted passive observations and active scan records into
//! one view record per host address.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release --bin view_builder -- --backend sqlite
//! ```
//!
//! ## Environment Variables
//!
//! - VIEW_PASSIVE_SOURCES - Comma list of passive inputs (`*.jsonl` or `*.db`)
//! - VIEW_ACTIVE_SOURCES - Comma list of active inputs
//! - VIEW_OUTPUT_PATH - Sink path (default: data/view.jsonl, or data/view.db with --backend sqlite)
//! - VIEW_CATEGORY - Category label attached to every view (optional)
//! - VIEW_SENSOR / VIEW_RECONTYPES - Passive record filter (optional)
//! - VIEW_BINARY_ENCODING - base64 or hex (default: base64)
//! - VIEW_PROBES_PATH - JSON banner-match rules (default: built-in rules)
//! - IPDATA_URL - Address-info service; unset disables enrichment
//! - VIEW_CHANNEL_BUFFER - Merge to writer channel size (default: 1000)
//! - RUST_LOG - Logging level (optional, default: info)

use reconview::config::ViewConfig;
use reconview::enrichment::{enrich, HttpIpData};
use reconview::output::ViewWriter;
use reconview::sources::{open_active, open_passive};
use reconview::view_core::{ExtractorRegistry, HostView, PatternMatcher, ViewBuilder};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    dotenv::dotenv().ok();

    let config = ViewConfig::from_env()?;

    log::info!("🚀 Starting View Builder");
    log::info!("   Passive sources: {}", config.passive_sources.len());
    log::info!("   Active sources: {}", config.active_sources.len());
    log::info!("   Output: {}", config.output_path.display());
    log::info!("   Binary encoding: {}", config.binary_encoding);
    if let Some(category) = &config.category {
        log::info!("   Category: {}", category);
    }

    let registry = match &config.probes_path {
        Some(path) => ExtractorRegistry::new(Arc::new(PatternMatcher::from_json_file(path)?)),
        None => ExtractorRegistry::default(),
    };

    let filter = config.record_filter();
    let mut builder = ViewBuilder::new(config.category.clone())
        .with_registry(registry)
        .with_codec(config.codec()?);
    for path in &config.passive_sources {
        builder = builder.add_passive(open_passive(path, &filter)?);
    }
    for path in &config.active_sources {
        builder = builder.add_active(open_active(path)?);
    }

    let lookup = match &config.ipdata_url {
        Some(url) => {
            log::info!("🌍 Address info enrichment: {}", url);
            Some(HttpIpData::new(url.clone())?)
        }
        None => None,
    };

    let mut writer = ViewWriter::new(config.backend, &config.output_path)?;
    log::info!("📊 Backend: {}", writer.backend_type());

    let (tx, mut rx) = mpsc::channel::<HostView>(config.channel_buffer);
    let started = Instant::now();

    // Readers and the merge are blocking I/O; keep them off the runtime
    let merge_task = tokio::task::spawn_blocking(move || {
        let mut views = builder.build();
        for view in views.by_ref() {
            if tx.blocking_send(view).is_err() {
                log::warn!("⚠️  Writer gone, stopping merge");
                break;
            }
        }
        views.stats().clone()
    });

    let mut written: u64 = 0;
    let mut enriched: u64 = 0;
    while let Some(mut view) = rx.recv().await {
        if let Some(lookup) = &lookup {
            if enrich(lookup, &mut view).await {
                enriched += 1;
            }
        }
        writer.write_view(&view).await?;
        written += 1;
        if written % 10_000 == 0 {
            log::info!("📝 {} views written", written);
        }
    }
    writer.flush().await?;

    let stats = merge_task.await?;

    log::info!("✅ View build complete in {:.1}s", started.elapsed().as_secs_f64());
    log::info!("   Views written: {}", written);
    log::info!("   Fragments combined: {}", stats.combined);
    if lookup.is_some() {
        log::info!("   Views enriched: {}", enriched);
    }
    if stats.order_violations > 0 {
        log::warn!(
            "⚠️  {} out-of-order fragments seen; inputs are not address-sorted",
            stats.order_violations
        );
    }

    Ok(())
}
