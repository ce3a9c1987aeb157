//! Triggered Check Types
//!
//! A stream that observes a new instrument emits a [`CheckRequest`]; the
//! dispatcher worker turns each request into one [`CheckReport`] per
//! downstream provider. [`SightingSet`] keeps a stream from requesting the
//! same instrument twice.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::lag::DiscoveredInstrument;

// =============================================================================
// Check Request
// =============================================================================

/// A deferred downstream lookup for an instrument a stream just reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRequest {
    /// Token or pool address.
    pub address: String,
    /// Normalized chain name.
    pub chain: String,
    /// Chain identifier in provider scheme (`evm:8453`, `solana:solana`).
    pub chain_id: String,
    /// When the stream observed the instrument.
    pub discovered_at: DateTime<Utc>,
    /// Provider whose stream reported it.
    pub source: String,
    /// Token symbol, if known.
    pub symbol: Option<String>,
    /// Token name, if known.
    pub name: Option<String>,
}

impl CheckRequest {
    /// Build a request from a discovery event.
    #[must_use]
    pub fn from_discovery(
        source: &str,
        chain: &str,
        discovered: &DiscoveredInstrument,
        discovered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            address: discovered.address.clone(),
            chain: chain.to_string(),
            chain_id: discovered.chain_id.clone(),
            discovered_at,
            source: source.to_string(),
            symbol: discovered.symbol.clone(),
            name: discovered.name.clone(),
        }
    }
}

// =============================================================================
// First-Sighting Tracking
// =============================================================================

/// Default bound on remembered instruments before the set is reset.
pub const DEFAULT_SIGHTING_CAPACITY: usize = 10_000;

/// Remembers which instruments a stream has already reported.
///
/// Bounded: once `capacity` keys are held the set is cleared, so memory
/// stays flat at the cost of an occasional repeated check.
#[derive(Debug)]
pub struct SightingSet {
    seen: Mutex<HashSet<String>>,
    capacity: usize,
}

impl Default for SightingSet {
    fn default() -> Self {
        Self::new(DEFAULT_SIGHTING_CAPACITY)
    }
}

impl SightingSet {
    /// Create a set holding at most `capacity` keys.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: Mutex::new(HashSet::new()),
            capacity: capacity.max(1),
        }
    }

    /// Record a sighting. Returns `true` the first time a key is seen.
    pub fn first_sighting(&self, chain: &str, address: &str) -> bool {
        let key = format!("{chain}:{address}");
        let mut seen = self.seen.lock();
        if seen.contains(&key) {
            return false;
        }
        if seen.len() >= self.capacity {
            tracing::debug!(capacity = self.capacity, "Sighting set full, resetting");
            seen.clear();
        }
        seen.insert(key)
    }

    /// Number of remembered instruments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    /// Whether nothing has been sighted yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}

// =============================================================================
// Check Results
// =============================================================================

/// Metadata fields whose presence is tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataField {
    /// Token logo image.
    Logo,
    /// Free-text description.
    Description,
    /// Twitter / X handle.
    Twitter,
    /// Project website.
    Website,
}

impl MetadataField {
    /// All tracked fields.
    pub const ALL: [Self; 4] = [Self::Logo, Self::Description, Self::Twitter, Self::Website];

    /// Metric label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Logo => "logo",
            Self::Description => "description",
            Self::Twitter => "twitter",
            Self::Website => "website",
        }
    }
}

/// Presence of each tracked field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetadataCoverage {
    /// Logo present.
    pub logo: bool,
    /// Description present.
    pub description: bool,
    /// Twitter present.
    pub twitter: bool,
    /// Website present.
    pub website: bool,
}

impl MetadataCoverage {
    /// Field/presence pairs in [`MetadataField::ALL`] order.
    #[must_use]
    pub const fn fields(&self) -> [(MetadataField, bool); 4] {
        [
            (MetadataField::Logo, self.logo),
            (MetadataField::Description, self.description),
            (MetadataField::Twitter, self.twitter),
            (MetadataField::Website, self.website),
        ]
    }
}

/// What a single downstream check found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The provider answered; coverage per field.
    Coverage(MetadataCoverage),
    /// The check failed.
    Failed {
        /// Metric label for the failure.
        error_kind: String,
    },
    /// The check could not run (e.g. credential absent).
    Skipped {
        /// Metric label for the reason.
        reason: String,
    },
}

/// Result of one downstream check for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckReport {
    /// Provider that was queried.
    pub provider: String,
    /// Normalized chain name.
    pub chain: String,
    /// Request round-trip time.
    pub latency: Duration,
    /// Result.
    pub outcome: CheckOutcome,
}

/// Running per-provider coverage totals, for periodic summaries.
#[derive(Debug, Default)]
pub struct CoverageTally {
    checks: HashMap<String, u64>,
    present: HashMap<(String, MetadataField), u64>,
}

impl CoverageTally {
    /// Fold a report into the totals. Only coverage outcomes count.
    pub fn record(&mut self, report: &CheckReport) {
        let CheckOutcome::Coverage(coverage) = &report.outcome else {
            return;
        };
        *self.checks.entry(report.provider.clone()).or_default() += 1;
        for (field, present) in coverage.fields() {
            if present {
                *self
                    .present
                    .entry((report.provider.clone(), field))
                    .or_default() += 1;
            }
        }
    }

    /// Completed checks for a provider.
    #[must_use]
    pub fn checks(&self, provider: &str) -> u64 {
        self.checks.get(provider).copied().unwrap_or(0)
    }

    /// Percentage of checks for `provider` where `field` was present.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn coverage_pct(&self, provider: &str, field: MetadataField) -> f64 {
        let total = self.checks(provider);
        if total == 0 {
            return 0.0;
        }
        let present = self
            .present
            .get(&(provider.to_string(), field))
            .copied()
            .unwrap_or(0);
        present as f64 * 100.0 / total as f64
    }

    /// Providers with at least one completed check, sorted.
    #[must_use]
    pub fn providers(&self) -> Vec<String> {
        let mut providers: Vec<String> = self.checks.keys().cloned().collect();
        providers.sort();
        providers
    }
}
