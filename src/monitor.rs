//! The scan pipeline: document -> session id -> snapshot -> delta merge.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::aggregate::{self, MergeReport};
use crate::config::ModeConfig;
use crate::document::{DocumentSource, RenderedDocument};
use crate::error::Result;
use crate::identity::SessionResolver;
use crate::mode::ModeDetector;
use crate::snapshot::{FullScanExtractor, SnapshotBuilder};
use crate::store::KeyValueStore;

/// Shared in-flight flag. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct ScanGuard {
    in_flight: Arc<AtomicBool>,
}

/// Held for the duration of one scan; dropping it (also while unwinding)
/// releases the guard.
#[derive(Debug)]
pub struct InFlightScan {
    in_flight: Arc<AtomicBool>,
}

impl ScanGuard {
    pub fn try_begin(&self) -> Option<InFlightScan> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightScan {
                in_flight: Arc::clone(&self.in_flight),
            })
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

impl Drop for InFlightScan {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Another scan was still running; this trigger was dropped.
    Skipped,
    /// The page had no rendered turns.
    NoTurns,
    Merged(MergeReport),
}

pub struct ScanPipeline<S: KeyValueStore> {
    store: S,
    builder: SnapshotBuilder,
    resolver: Option<SessionResolver>,
    guard: ScanGuard,
}

impl<S: KeyValueStore> ScanPipeline<S> {
    pub fn new(store: S, builder: SnapshotBuilder) -> Self {
        Self {
            store,
            builder,
            resolver: None,
            guard: ScanGuard::default(),
        }
    }

    pub fn with_modes(store: S, modes: &ModeConfig) -> Self {
        Self::new(
            store,
            SnapshotBuilder::new(Box::new(FullScanExtractor), ModeDetector::from_config(modes)),
        )
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn guard(&self) -> ScanGuard {
        self.guard.clone()
    }

    pub fn current_session_id(&self) -> Option<&str> {
        self.resolver
            .as_ref()
            .map(SessionResolver::current_session_id)
    }

    pub fn scan(&mut self, document: &RenderedDocument) -> Result<ScanOutcome> {
        self.scan_at(document, Utc::now())
    }

    pub fn scan_at(
        &mut self,
        document: &RenderedDocument,
        now: DateTime<Utc>,
    ) -> Result<ScanOutcome> {
        let Some(_in_flight) = self.guard.try_begin() else {
            debug!("scan already in flight, dropping trigger");
            return Ok(ScanOutcome::Skipped);
        };

        let resolver = self
            .resolver
            .get_or_insert_with(|| SessionResolver::new(&document.location));
        resolver.observe(&document.location);
        let session_id = resolver.current_session_id().to_string();

        let Some(snapshot) = self.builder.build(&session_id, document, now) else {
            debug!(session = %session_id, "no rendered turns");
            return Ok(ScanOutcome::NoTurns);
        };

        let day = aggregate::local_day(now);
        let report = aggregate::merge_snapshot(&mut self.store, snapshot, day)?;
        Ok(ScanOutcome::Merged(report))
    }

    /// Loads the document and scans it. Failures are logged and swallowed so
    /// the next trigger starts from a clean slate.
    pub fn run_cycle(&mut self, source: &dyn DocumentSource) -> Option<ScanOutcome> {
        let document = match source.load() {
            Ok(document) => document,
            Err(err) => {
                warn!(error = %err, "failed to read document, skipping cycle");
                return None;
            }
        };
        match self.scan(&document) {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                warn!(error = %err, "failed to update stats, skipping cycle");
                None
            }
        }
    }
}
