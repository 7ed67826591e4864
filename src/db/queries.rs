//! SQL query constants and builders
//!
//! Contains all SQL issued by the engine itself. User SQL never goes
//! through here.

pub const CREATE_HISTORY_SCHEMA: &str = "CREATE SCHEMA IF NOT EXISTS supabase_migrations";

/// Migration history: one row per applied migration file
pub const CREATE_HISTORY_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS supabase_migrations.schema_migrations (
        version text PRIMARY KEY,
        name text NOT NULL,
        hash text NOT NULL,
        applied_at timestamptz NOT NULL DEFAULT now()
    )
"#;

/// Seed cache: last applied content hash per seed file
pub const CREATE_SEED_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS supabase_migrations.seed_files (
        path text PRIMARY KEY,
        hash text NOT NULL
    )
"#;

pub const LIST_APPLIED_MIGRATIONS: &str = r#"
    SELECT version, name, hash, applied_at
    FROM supabase_migrations.schema_migrations
    ORDER BY version
"#;

pub const INSERT_MIGRATION: &str = r#"
    INSERT INTO supabase_migrations.schema_migrations (version, name, hash)
    VALUES ($1, $2, $3)
    ON CONFLICT (version) DO UPDATE
        SET name = EXCLUDED.name, hash = EXCLUDED.hash, applied_at = now()
"#;

pub const DELETE_MIGRATION: &str =
    "DELETE FROM supabase_migrations.schema_migrations WHERE version = $1";

pub const GET_SEED_HASH: &str = "SELECT hash FROM supabase_migrations.seed_files WHERE path = $1";

pub const UPSERT_SEED_HASH: &str = r#"
    INSERT INTO supabase_migrations.seed_files (path, hash)
    VALUES ($1, $2)
    ON CONFLICT (path) DO UPDATE SET hash = EXCLUDED.hash
"#;

/// Cluster-wide roles, used for the shadow baseline snapshot
pub const LIST_ROLES: &str = "SELECT rolname FROM pg_roles ORDER BY rolname";

/// Quote an identifier for interpolation into DDL
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Clone `template` into a new database. `template0` gives an empty database
/// without contending for `template1`, which admin sessions stay connected to.
pub fn create_database(name: &str, template: &str) -> String {
    format!(
        "CREATE DATABASE {} TEMPLATE {}",
        quote_ident(name),
        quote_ident(template)
    )
}

/// Drop a database, terminating any sessions still attached to it
pub fn drop_database(name: &str) -> String {
    format!("DROP DATABASE IF EXISTS {} WITH (FORCE)", quote_ident(name))
}

pub fn drop_role(name: &str) -> String {
    format!("DROP ROLE IF EXISTS {}", quote_ident(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("anon"), "\"anon\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_database_builders() {
        assert_eq!(
            create_database("contrib_regression", "shadow_template"),
            "CREATE DATABASE \"contrib_regression\" TEMPLATE \"shadow_template\""
        );
        assert_eq!(
            create_database("postgres", "template0"),
            "CREATE DATABASE \"postgres\" TEMPLATE \"template0\""
        );
        assert_eq!(
            drop_database("shadow_template"),
            "DROP DATABASE IF EXISTS \"shadow_template\" WITH (FORCE)"
        );
        assert_eq!(drop_role("app_reader"), "DROP ROLE IF EXISTS \"app_reader\"");
    }
}
