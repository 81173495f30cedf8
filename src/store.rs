//! Store root: the two fixed collections, configuration, and startup.
//!
//! A [`DocStore`] owns one [`Collection`] per [`CollectionKind`] and is
//! constructed once at process start, then passed by reference to whatever
//! consumes it. Opening the store creates the data directory if absent and
//! replays each collection's log before any handle is usable.

use crate::collection::Collection;
use crate::config;
use crate::error::Result;
use std::env;
use std::fs;
use std::path::PathBuf;

/// The fixed set of collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    /// The `ANALYTIC_UNITS` collection.
    AnalyticUnits,
    /// The `SEGMENTS` collection.
    Segments,
}

impl CollectionKind {
    /// Every collection the store manages.
    pub const ALL: [CollectionKind; 2] = [CollectionKind::AnalyticUnits, CollectionKind::Segments];

    /// The collection's canonical name.
    pub fn name(self) -> &'static str {
        match self {
            CollectionKind::AnalyticUnits => "ANALYTIC_UNITS",
            CollectionKind::Segments => "SEGMENTS",
        }
    }

    fn default_file(self) -> &'static str {
        match self {
            CollectionKind::AnalyticUnits => config::ANALYTIC_UNITS_FILE,
            CollectionKind::Segments => config::SEGMENTS_FILE,
        }
    }
}

/// Runtime configuration for opening a [`DocStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding the collection logs; created if absent.
    pub data_dir: PathBuf,
    /// Explicit log path for `ANALYTIC_UNITS`, overriding the data dir.
    pub analytic_units_path: Option<PathBuf>,
    /// Explicit log path for `SEGMENTS`, overriding the data dir.
    pub segments_path: Option<PathBuf>,
    /// Fail `open` on a corrupt or inconsistent log instead of leaving the
    /// affected collection readable but halted.
    pub strict_replay: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(config::DEFAULT_DATA_DIR),
            analytic_units_path: None,
            segments_path: None,
            strict_replay: false,
        }
    }
}

impl StoreConfig {
    /// Defaults overridden by `DOCSDB_DATA_DIR`, `DOCSDB_ANALYTIC_UNITS_PATH`
    /// and `DOCSDB_SEGMENTS_PATH` where set.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(dir) = env::var(config::ENV_DATA_DIR) {
            cfg.data_dir = PathBuf::from(dir);
        }
        if let Ok(path) = env::var(config::ENV_ANALYTIC_UNITS_PATH) {
            cfg.analytic_units_path = Some(PathBuf::from(path));
        }
        if let Ok(path) = env::var(config::ENV_SEGMENTS_PATH) {
            cfg.segments_path = Some(PathBuf::from(path));
        }
        cfg
    }

    /// Resolved log file path for a collection.
    pub fn log_path(&self, kind: CollectionKind) -> PathBuf {
        let explicit = match kind {
            CollectionKind::AnalyticUnits => &self.analytic_units_path,
            CollectionKind::Segments => &self.segments_path,
        };
        explicit
            .clone()
            .unwrap_or_else(|| self.data_dir.join(kind.default_file()))
    }
}

/// The store root: both collections, opened and replayed.
pub struct DocStore {
    analytic_units: Collection,
    segments: Collection,
}

impl DocStore {
    /// Open the store: create the data directory if needed (idempotent) and
    /// replay each collection's log.
    pub async fn open(cfg: StoreConfig) -> Result<Self> {
        fs::create_dir_all(&cfg.data_dir)?;

        let analytic_units = Collection::open(
            CollectionKind::AnalyticUnits.name(),
            &cfg.log_path(CollectionKind::AnalyticUnits),
            cfg.strict_replay,
        )
        .await?;
        let segments = Collection::open(
            CollectionKind::Segments.name(),
            &cfg.log_path(CollectionKind::Segments),
            cfg.strict_replay,
        )
        .await?;

        tracing::info!(
            "store open: {} analytic units, {} segments",
            analytic_units.count().await,
            segments.count().await
        );
        Ok(Self {
            analytic_units,
            segments,
        })
    }

    /// Handle for the given collection.
    pub fn collection(&self, kind: CollectionKind) -> &Collection {
        match kind {
            CollectionKind::AnalyticUnits => &self.analytic_units,
            CollectionKind::Segments => &self.segments,
        }
    }

    /// Handle for `ANALYTIC_UNITS`.
    pub fn analytic_units(&self) -> &Collection {
        &self.analytic_units
    }

    /// Handle for `SEGMENTS`.
    pub fn segments(&self) -> &Collection {
        &self.segments
    }
}
