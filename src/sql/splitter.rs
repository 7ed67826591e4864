//! Statement splitter
//!
//! Splits a SQL script on `;` at depth 0. Dollar-quoted bodies (any tag),
//! single-quoted strings (including `E''` escapes), quoted identifiers and
//! both comment styles are opaque to the terminator.

/// One statement and where it starts in the source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlStatement {
    /// Statement text without the terminating `;`, whitespace-trimmed
    pub text: String,
    /// Byte offset of `text` in the source
    pub offset: usize,
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

/// Split a script into statements, dropping empty and comment-only chunks
pub fn split_statements(sql: &str) -> Vec<SqlStatement> {
    let bytes = sql.as_bytes();
    let len = bytes.len();
    let mut statements = Vec::new();
    let mut start = 0;
    let mut has_code = false;
    let mut i = 0;

    while i < len {
        let b = bytes[i];
        let next = bytes.get(i + 1).copied();

        match b {
            b'-' if next == Some(b'-') => {
                i = skip_line_comment(bytes, i);
            }
            b'/' if next == Some(b'*') => {
                i = skip_block_comment(bytes, i);
            }
            b'\'' => {
                has_code = true;
                let escapes = i > 0
                    && matches!(bytes[i - 1], b'E' | b'e')
                    && (i < 2 || !is_ident_byte(bytes[i - 2]));
                i = skip_single_quoted(bytes, i, escapes);
            }
            b'"' => {
                has_code = true;
                i = skip_double_quoted(bytes, i);
            }
            b'$' => {
                has_code = true;
                i = match dollar_tag_end(bytes, i) {
                    Some(tag_end) => {
                        let tag = &sql[i..=tag_end];
                        match sql[tag_end + 1..].find(tag) {
                            Some(pos) => tag_end + 1 + pos + tag.len(),
                            None => len,
                        }
                    }
                    None => i + 1,
                };
            }
            b';' => {
                if has_code {
                    statements.push(make_statement(sql, start, i));
                }
                start = i + 1;
                has_code = false;
                i += 1;
            }
            _ => {
                if !b.is_ascii_whitespace() {
                    has_code = true;
                }
                i += 1;
            }
        }
    }

    if has_code {
        statements.push(make_statement(sql, start, len));
    }
    statements
}

fn make_statement(sql: &str, start: usize, end: usize) -> SqlStatement {
    let chunk = &sql[start..end];
    let leading = chunk.len() - chunk.trim_start().len();
    SqlStatement {
        text: chunk.trim().to_string(),
        offset: start + leading,
    }
}

fn skip_line_comment(bytes: &[u8], i: usize) -> usize {
    bytes[i..]
        .iter()
        .position(|&b| b == b'\n')
        .map_or(bytes.len(), |p| i + p + 1)
}

/// Postgres block comments nest
fn skip_block_comment(bytes: &[u8], mut i: usize) -> usize {
    let mut depth = 0usize;
    while i < bytes.len() {
        if bytes[i] == b'/' && bytes.get(i + 1) == Some(&b'*') {
            depth += 1;
            i += 2;
        } else if bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/') {
            depth -= 1;
            i += 2;
            if depth == 0 {
                return i;
            }
        } else {
            i += 1;
        }
    }
    bytes.len()
}

fn skip_single_quoted(bytes: &[u8], mut i: usize, backslash_escapes: bool) -> usize {
    i += 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if backslash_escapes => i += 2,
            b'\'' if bytes.get(i + 1) == Some(&b'\'') => i += 2,
            b'\'' => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

fn skip_double_quoted(bytes: &[u8], mut i: usize) -> usize {
    i += 1;
    while i < bytes.len() {
        if bytes[i] == b'"' {
            if bytes.get(i + 1) == Some(&b'"') {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

/// If a dollar-quote opening tag starts at `i`, return the index of its closing `$`.
/// `$1` parameters and `$` inside identifiers are not tags.
fn dollar_tag_end(bytes: &[u8], i: usize) -> Option<usize> {
    if i > 0 && is_ident_byte(bytes[i - 1]) {
        return None;
    }
    if bytes.get(i + 1).is_some_and(|b| b.is_ascii_digit()) {
        return None;
    }
    let mut j = i + 1;
    while j < bytes.len() {
        let b = bytes[j];
        if b == b'$' {
            return Some(j);
        }
        if !(b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80) {
            return None;
        }
        j += 1;
    }
    None
}

/// Strip whitespace and any leading `--` / `/* */` comments
pub fn strip_leading_comments(sql: &str) -> &str {
    let mut rest = sql.trim_start();
    loop {
        if rest.starts_with("--") {
            let end = skip_line_comment(rest.as_bytes(), 0);
            rest = rest[end..].trim_start();
        } else if rest.starts_with("/*") {
            let end = skip_block_comment(rest.as_bytes(), 0);
            rest = rest[end..].trim_start();
        } else {
            return rest;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn texts(sql: &str) -> Vec<String> {
        split_statements(sql).into_iter().map(|s| s.text).collect()
    }

    #[test]
    fn test_simple_statements() {
        assert_eq!(
            texts("create table a (id int);\ncreate table b (id int);"),
            vec!["create table a (id int)", "create table b (id int)"]
        );
    }

    #[test]
    fn test_trailing_statement_without_terminator() {
        assert_eq!(texts("select 1; select 2"), vec!["select 1", "select 2"]);
    }

    #[test]
    fn test_dollar_quoted_body() {
        let sql = r#"
create function f() returns trigger language plpgsql as $body$
begin
  perform 1; -- inner
  return new;
end;
$body$;
select 1;
"#;
        let statements = texts(sql);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].ends_with("$body$"));
        assert_eq!(statements[1], "select 1");
    }

    #[test]
    fn test_nested_dollar_tags() {
        let sql = "do $outer$ begin execute $$select 1; select 2$$; end $outer$; select 3;";
        assert_eq!(texts(sql).len(), 2);
    }

    #[test]
    fn test_positional_parameter_is_not_a_tag() {
        let sql = "prepare p as select $1; select 'after';";
        assert_eq!(texts(sql), vec!["prepare p as select $1", "select 'after'"]);
    }

    #[test]
    fn test_quotes_and_identifiers() {
        let sql = r#"insert into "we;ird" values ('a;b', 'it''s;'); select E'\';';"#;
        assert_eq!(
            texts(sql),
            vec![
                r#"insert into "we;ird" values ('a;b', 'it''s;')"#,
                r"select E'\';'",
            ]
        );
    }

    #[test]
    fn test_comments_hide_terminators() {
        let sql = "-- a; b\nselect 1 /* x; /* nested; */ y; */ + 1;";
        assert_eq!(texts(sql), vec!["-- a; b\nselect 1 /* x; /* nested; */ y; */ + 1"]);
    }

    #[test]
    fn test_comment_only_input_is_empty() {
        assert!(split_statements("").is_empty());
        assert!(split_statements("  -- nothing here;\n/* or; here */\n;;").is_empty());
    }

    #[test]
    fn test_offsets_point_at_statement_text() {
        let sql = "select 1;\n\n  create table t ();";
        let statements = split_statements(sql);
        assert_eq!(statements[1].offset, 13);
        assert!(sql[statements[1].offset..].starts_with("create table"));
    }

    #[test]
    fn test_strip_leading_comments() {
        assert_eq!(
            strip_leading_comments("  -- note\n /* block */ DROP TABLE x"),
            "DROP TABLE x"
        );
        assert_eq!(strip_leading_comments("select 1"), "select 1");
    }
}
