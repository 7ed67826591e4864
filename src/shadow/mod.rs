//! Shadow database
//!
//! A dedicated Postgres container holding "committed migrations + declared
//! schemas", rebuilt for every diff. Migrations are applied once to
//! `postgres`, which is cloned into `shadow_template`; each diff cycle then
//! clones the template into `contrib_regression` and applies the declared
//! files on top.
//!
//! Templates only copy database-scoped objects. Roles are cluster-wide, so
//! every role created after the baseline snapshot is dropped before a reset.

pub mod lock;
pub mod manager;

pub use manager::ShadowManager;

use std::collections::BTreeSet;

/// Database the declared schemas are applied to and diffed against
pub const TARGET_DATABASE: &str = "contrib_regression";
/// Clone source holding the migrated baseline
pub const TEMPLATE_DATABASE: &str = "shadow_template";
/// Database migrations are applied to
pub const MIGRATED_DATABASE: &str = "postgres";
/// Database used for administrative statements so no target database is held open
pub const ADMIN_DATABASE: &str = "template1";

/// What the next `prepare` has to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowAction {
    /// No container yet: start one, migrate, snapshot roles, build the template
    ColdStart,
    /// Migration set changed: rebuild `postgres` and the template
    RebuildTemplate,
    /// Template valid: clone it into the target database
    FastPath,
    /// Template unavailable: migrate a fresh target database every time
    Ephemeral,
}

/// In-memory record of the shadow container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShadowState {
    pub container_id: Option<String>,
    /// Roles present when the container first became ready
    pub boot_roles: BTreeSet<String>,
    /// Roles present after migrations, before any declared schema
    pub baseline_roles: BTreeSet<String>,
    pub template_ready: bool,
    /// Hash of the migration set the template was built from
    pub migrations_hash: Option<String>,
    /// Template rebuilds keep failing; migrate a fresh target every cycle
    pub degraded: bool,
}

impl ShadowState {
    pub fn is_absent(&self) -> bool {
        self.container_id.is_none()
    }

    /// Decide how to bring the shadow up to date with `current_hash`
    pub fn plan(&self, current_hash: &str) -> ShadowAction {
        if self.is_absent() {
            ShadowAction::ColdStart
        } else if self.degraded {
            ShadowAction::Ephemeral
        } else if self.migrations_hash.as_deref() != Some(current_hash) {
            ShadowAction::RebuildTemplate
        } else if self.template_ready {
            ShadowAction::FastPath
        } else {
            ShadowAction::Ephemeral
        }
    }

    /// Force a template rebuild on the next `prepare`
    pub fn invalidate(&mut self) {
        self.migrations_hash = None;
    }

    /// Stop using the template until the container is rebuilt from scratch
    pub fn degrade(&mut self) {
        self.degraded = true;
        self.template_ready = false;
    }

    /// Record a successful migration of `postgres` at `hash`
    pub fn record_migrated(&mut self, hash: &str, roles: BTreeSet<String>) {
        self.migrations_hash = Some(hash.to_string());
        self.baseline_roles = roles;
    }
}

/// Roles in `current` missing from `baseline`, in name order
pub fn roles_to_drop<'a, I>(baseline: &BTreeSet<String>, current: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a String>,
{
    let extra: BTreeSet<&String> = current
        .into_iter()
        .filter(|role| !baseline.contains(*role))
        .collect();
    extra.into_iter().cloned().collect()
}
