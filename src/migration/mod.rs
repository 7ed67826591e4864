//! Migrations
//!
//! Timestamped migration files on disk, the history table that records which
//! of them reached a database, and `db diff` which writes new ones.

pub mod history;
pub mod store;
pub mod synthesizer;

pub use history::{AppliedMigration, HistoryService};
pub use store::{MigrationFile, MigrationStore};
pub use synthesizer::MigrationSynthesizer;
