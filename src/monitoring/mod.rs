//! Metrics Exposition
//!
//! Renders group and tier statistics in the Prometheus text format. Each
//! scrape builds a private registry from the live counters, so nothing is
//! registered globally and dropped groups disappear from the output.

use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::cache::CacheStats;
use crate::error::{Error, Result};
use crate::group::{GroupRegistry, GroupStatsSnapshot};

/// Content type of [`render`]'s output
pub const CONTENT_TYPE: &str = prometheus::TEXT_FORMAT;

const NAMESPACE: &str = "peercache";

fn metric_err(e: prometheus::Error) -> Error {
    Error::Internal(format!("Metrics error: {}", e))
}

fn counter_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> Result<IntCounterVec> {
    let counter = IntCounterVec::new(Opts::new(name, help).namespace(NAMESPACE), labels)
        .map_err(metric_err)?;
    registry
        .register(Box::new(counter.clone()))
        .map_err(metric_err)?;
    Ok(counter)
}

fn gauge_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> Result<IntGaugeVec> {
    let gauge = IntGaugeVec::new(Opts::new(name, help).namespace(NAMESPACE), labels)
        .map_err(metric_err)?;
    registry
        .register(Box::new(gauge.clone()))
        .map_err(metric_err)?;
    Ok(gauge)
}

/// Per-group counters, in exposition order
const GROUP_COUNTERS: &[(&str, &str, fn(&GroupStatsSnapshot) -> u64)] = &[
    ("gets_total", "Gets received", |s| s.gets),
    ("cache_hits_total", "Gets answered from either tier", |s| s.cache_hits),
    ("peer_loads_total", "Successful fetches from the owning peer", |s| s.peer_loads),
    ("peer_errors_total", "Failed fetches from the owning peer", |s| s.peer_errors),
    ("loads_total", "Gets that missed the cache", |s| s.loads),
    ("loads_deduped_total", "Fills executed after coalescing", |s| s.loads_deduped),
    ("coalesced_waits_total", "Gets that joined an in-flight fill", |s| s.coalesced_waits),
    ("local_loads_total", "Successful loader calls", |s| s.local_loads),
    ("local_load_errors_total", "Failed loader calls", |s| s.local_load_errors),
    ("server_requests_total", "Requests served to peers", |s| s.server_requests),
    ("negative_hits_total", "Gets answered from the negative cache", |s| s.negative_hits),
    ("evictions_total", "Entries evicted from either tier for capacity", |s| s.evictions),
    ("removals_total", "Entries deleted from a tier", |s| s.removals),
    ("expirations_total", "Entries found expired on read", |s| s.expirations),
];

const TIER_LABELS: &[&str] = &["group", "tier"];

/// Render every group's statistics
pub fn render(groups: &GroupRegistry) -> Result<String> {
    render_snapshots(&groups.stats())
}

/// Render the given snapshots
pub fn render_snapshots(snapshots: &[GroupStatsSnapshot]) -> Result<String> {
    let registry = Registry::new();

    let counters = GROUP_COUNTERS
        .iter()
        .map(|(name, help, field)| Ok((counter_vec(&registry, name, help, &["group"])?, *field)))
        .collect::<Result<Vec<_>>>()?;

    let tier_bytes = gauge_vec(&registry, "tier_bytes", "Bytes held by the tier", TIER_LABELS)?;
    let tier_max_bytes =
        gauge_vec(&registry, "tier_max_bytes", "Byte allotment of the tier", TIER_LABELS)?;
    let tier_items = gauge_vec(&registry, "tier_items", "Entries held by the tier", TIER_LABELS)?;
    let tier_gets =
        counter_vec(&registry, "tier_gets_total", "Lookups against the tier", TIER_LABELS)?;
    let tier_hits =
        counter_vec(&registry, "tier_hits_total", "Lookups answered by the tier", TIER_LABELS)?;
    let tier_evictions = counter_vec(
        &registry,
        "tier_evictions_total",
        "Entries evicted for capacity",
        TIER_LABELS,
    )?;

    for snapshot in snapshots {
        let group = snapshot.name.as_str();
        for (counter, field) in &counters {
            counter.with_label_values(&[group]).inc_by(field(snapshot));
        }

        let tiers: [(&str, &CacheStats); 2] = [("main", &snapshot.main), ("hot", &snapshot.hot)];
        for (tier, stats) in tiers {
            let labels = [group, tier];
            tier_bytes.with_label_values(&labels).set(stats.bytes as i64);
            tier_max_bytes.with_label_values(&labels).set(stats.max_bytes as i64);
            tier_items.with_label_values(&labels).set(stats.items as i64);
            tier_gets.with_label_values(&labels).inc_by(stats.gets);
            tier_hits.with_label_values(&labels).inc_by(stats.hits);
            tier_evictions.with_label_values(&labels).inc_by(stats.evictions);
        }
    }

    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .map_err(metric_err)?;
    String::from_utf8(buffer).map_err(|e| Error::Internal(format!("Metrics are not UTF-8: {}", e)))
}
