//! Session dirtiness
//!
//! "The local database holds changes no migration file encodes." The flag
//! only ever goes from false to true while a session runs. It is mirrored to
//! a marker file so the next session starts dirty, and only `db reset`
//! removes that marker.

use crate::error::{AppError, AppResult};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

#[derive(Debug)]
pub struct SessionDirty {
    /// Marker existed when the session started
    inherited: bool,
    /// A non-empty diff was applied during this session
    applied: AtomicBool,
    marker: PathBuf,
}

impl SessionDirty {
    /// Start from the persisted marker
    pub fn load(marker: impl Into<PathBuf>) -> Self {
        let marker = marker.into();
        let inherited = marker.exists();
        if inherited {
            debug!("Local database already dirty ({} exists)", marker.display());
        }
        Self {
            inherited,
            applied: AtomicBool::new(false),
            marker,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.inherited || self.applied_this_session()
    }

    /// Dirty before this session applied anything
    pub fn inherited(&self) -> bool {
        self.inherited
    }

    pub fn applied_this_session(&self) -> bool {
        self.applied.load(Ordering::SeqCst)
    }

    /// Exit notice, if the local database holds uncaptured changes
    pub fn exit_warning(&self) -> Option<&'static str> {
        if !self.is_dirty() {
            None
        } else if self.applied_this_session() {
            Some(
                "This session applied schema changes no migration captures. \
                 Run `supadev db diff -f <name>` to keep them or `supadev db reset` to discard them.",
            )
        } else {
            Some(
                "The local database still has uncaptured schema changes from an earlier session. \
                 Run `supadev db diff -f <name>` to keep them or `supadev db reset` to discard them.",
            )
        }
    }

    /// Record that a non-empty diff reached the local database
    pub fn mark(&self) {
        if self.applied.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = write_marker(&self.marker) {
            warn!("⚠️  Could not persist dirty marker: {}", e);
        }
    }

    /// Remove the persisted marker after the local database was rebuilt
    pub fn clear(marker: &Path) -> AppResult<()> {
        match std::fs::remove_file(marker) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::fs(marker, e)),
        }
    }
}

fn write_marker(marker: &Path) -> AppResult<()> {
    if let Some(parent) = marker.parent() {
        std::fs::create_dir_all(parent).map_err(|e| AppError::fs(parent, e))?;
    }
    std::fs::write(marker, chrono::Utc::now().to_rfc3339()).map_err(|e| AppError::fs(marker, e))
}
