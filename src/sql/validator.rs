//! Declared schema syntax validator
//!
//! A pure pre-gate in front of the shadow pipeline: parses every declared
//! file with the embedded Postgres parser and reports the first failure with
//! its file, line and column. Never touches a database.

use crate::error::{AppError, SyntaxError};
use crate::sql::splitter::split_statements;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::debug;

static NEAR_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"at or near "(.*)"\s*$"#).expect("valid near-token pattern"));

pub struct SchemaValidator;

impl SchemaValidator {
    /// Validate every file in order; the first syntax error wins.
    /// `files` are relative to `root` and reported relative.
    pub fn validate_files(root: &Path, files: &[PathBuf]) -> Result<(), AppError> {
        for relative in files {
            let absolute = root.join(relative);
            let sql = std::fs::read_to_string(&absolute).map_err(|e| AppError::fs(&absolute, e))?;
            Self::validate_source(relative, &sql).map_err(AppError::SqlSyntax)?;
        }
        debug!("Validated {} declared schema file(s)", files.len());
        Ok(())
    }

    /// Validate one script. Empty and comment-only scripts are valid.
    pub fn validate_source(path: &Path, sql: &str) -> Result<(), SyntaxError> {
        let message = match pg_query::parse(sql) {
            Ok(_) => return Ok(()),
            Err(err) => parse_message(err),
        };

        let (offset, message) = Self::locate(sql).unwrap_or((0, message));
        let (line, column) = line_column(sql, offset);
        Err(SyntaxError {
            path: path.to_path_buf(),
            line,
            column,
            message,
        })
    }

    /// Find the first failing statement and the byte offset of the offending token
    fn locate(sql: &str) -> Option<(usize, String)> {
        split_statements(sql).into_iter().find_map(|statement| {
            pg_query::parse(&statement.text).err().map(|err| {
                let message = parse_message(err);
                let relative = near_offset(&statement.text, &message);
                (statement.offset + relative, message)
            })
        })
    }
}

fn parse_message(err: pg_query::Error) -> String {
    match err {
        pg_query::Error::Parse(message) => message,
        other => other.to_string(),
    }
}

/// Offset of the token named in `... at or near "X"`, preferring a whole-word match
fn near_offset(statement: &str, message: &str) -> usize {
    if message.contains("at end of input") {
        return statement.len();
    }
    let Some(token) = NEAR_TOKEN.captures(message).map(|c| c[1].to_string()) else {
        return 0;
    };
    if token.is_empty() {
        return 0;
    }

    let is_word = |b: Option<&u8>| b.is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'_');
    let bytes = statement.as_bytes();
    let whole_word = statement.match_indices(token.as_str()).find(|(idx, _)| {
        let before = if *idx == 0 { None } else { bytes.get(idx - 1) };
        let after = bytes.get(idx + token.len());
        !is_word(before) && !is_word(after)
    });

    whole_word
        .map(|(idx, _)| idx)
        .or_else(|| statement.find(token.as_str()))
        .unwrap_or(0)
}

/// 1-based line and column (in characters) of a byte offset
fn line_column(sql: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(sql.len());
    let before = &sql[..offset];
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map_or(0, |p| p + 1);
    let column = before[line_start..].chars().count() + 1;
    (line, column)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn check(sql: &str) -> Result<(), SyntaxError> {
        SchemaValidator::validate_source(Path::new("users.sql"), sql)
    }

    #[test]
    fn test_valid_schema() {
        let sql = r#"
-- users live here
create table public.users (id uuid primary key, name text);

create function public.touch() returns trigger language plpgsql as $$
begin
  new.name := lower(new.name);
  return new;
end;
$$;
"#;
        assert!(check(sql).is_ok());
    }

    #[test]
    fn test_empty_and_comment_only_files() {
        assert!(check("").is_ok());
        assert!(check("-- todo\n/* later */\n").is_ok());
    }

    #[test]
    fn test_reports_line_and_column() {
        let err = check("CREATE TABL public.users (id uuid);").unwrap_err();
        assert_eq!((err.line, err.column), (1, 8));
        assert!(err.message.contains("TABL"));
        assert_eq!(err.to_string(), format!("users.sql:1:8: {}", err.message));
    }

    #[test]
    fn test_error_in_later_statement() {
        let sql = "create table a (id int);\n\ncreate tabel b (id int);\n";
        let err = check(sql).unwrap_err();
        assert_eq!((err.line, err.column), (3, 8));
    }

    #[test]
    fn test_validate_files_stops_at_first_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.sql"), "create table a (id int);").unwrap();
        fs::write(dir.path().join("b.sql"), "create tabl b ();").unwrap();
        fs::write(dir.path().join("c.sql"), "select from from;").unwrap();

        let files = vec![
            PathBuf::from("a.sql"),
            PathBuf::from("b.sql"),
            PathBuf::from("c.sql"),
        ];
        match SchemaValidator::validate_files(dir.path(), &files) {
            Err(AppError::SqlSyntax(err)) => assert_eq!(err.path, PathBuf::from("b.sql")),
            other => panic!("expected syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_line_column_counts_characters() {
        let sql = "-- é\nselect 1";
        assert_eq!(line_column(sql, sql.find("select").unwrap()), (2, 1));
        assert_eq!(line_column("ab", 99), (1, 3));
    }
}
