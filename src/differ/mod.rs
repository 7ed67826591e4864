//! Structural differ adapter
//!
//! Runs the external schema differ through the supervisor with the local
//! database as source and the shadow database as target, and classifies the
//! statements it prints. Classification is advisory: nothing is suppressed.

use crate::connection::ConnectionParams;
use crate::error::{AppError, AppResult};
use crate::sql::{split_statements, strip_leading_comments};
use crate::supervisor::{ExecRequest, Supervisor};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Image providing the `migra` differ
pub const DIFFER_IMAGE: &str = "supabase/migra:3.0.1663481299";
pub const DIFFER_TIMEOUT: Duration = Duration::from_secs(60);

/// `migra` exits 2 when it found differences; only other codes are failures
const DIFFER_OK_CODES: [i32; 2] = [0, 2];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Safe,
    Destructive,
}

/// One differ statement, verbatim, with its classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub kind: StatementKind,
}

impl Statement {
    pub fn is_destructive(&self) -> bool {
        self.kind == StatementKind::Destructive
    }
}

/// `DROP ...` or `ALTER ... DROP COLUMN ...`, ignoring case and leading comments
pub fn classify(sql: &str) -> StatementKind {
    let head = strip_leading_comments(sql).to_ascii_uppercase();
    let normalized: String = head.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.starts_with("DROP ")
        || (normalized.starts_with("ALTER ") && normalized.contains(" DROP COLUMN "))
    {
        StatementKind::Destructive
    } else {
        StatementKind::Safe
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
    /// Raw differ output
    pub sql: String,
    pub statements: Vec<Statement>,
    pub destructive: Vec<Statement>,
}

impl DiffResult {
    pub fn from_sql(sql: impl Into<String>) -> Self {
        let sql = sql.into();
        let statements: Vec<Statement> = split_statements(&sql)
            .into_iter()
            .map(|s| Statement {
                kind: classify(&s.text),
                sql: s.text,
            })
            .collect();
        let destructive = statements
            .iter()
            .filter(|s| s.is_destructive())
            .cloned()
            .collect();
        Self {
            sql,
            statements,
            destructive,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

pub struct SchemaDiffer {
    supervisor: Arc<dyn Supervisor>,
    image: String,
    timeout: Duration,
}

impl SchemaDiffer {
    pub fn new(supervisor: Arc<dyn Supervisor>) -> Self {
        Self {
            supervisor,
            image: DIFFER_IMAGE.to_string(),
            timeout: DIFFER_TIMEOUT,
        }
    }

    #[cfg(test)]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// SQL that evolves `source` into `target`. With `schemas`, the differ
    /// runs once per schema and the outputs are concatenated in list order.
    pub async fn diff(
        &self,
        source: &ConnectionParams,
        target: &ConnectionParams,
        schemas: &[String],
    ) -> AppResult<DiffResult> {
        let mut sql = String::new();
        if schemas.is_empty() {
            sql.push_str(&self.run(source, target, None).await?);
        } else {
            for schema in schemas {
                let output = self.run(source, target, Some(schema)).await?;
                if !output.trim().is_empty() {
                    if !sql.is_empty() && !sql.ends_with('\n') {
                        sql.push('\n');
                    }
                    sql.push_str(&output);
                }
            }
        }

        let result = DiffResult::from_sql(sql);
        debug!(
            "Differ produced {} statement(s), {} destructive",
            result.statements.len(),
            result.destructive.len()
        );
        Ok(result)
    }

    fn request(&self, source: &ConnectionParams, target: &ConnectionParams, schema: Option<&str>) -> ExecRequest {
        let mut cmd = vec!["migra".to_string(), "--unsafe".to_string()];
        if let Some(schema) = schema {
            cmd.push("--schema".to_string());
            cmd.push(schema.to_string());
        }
        cmd.push(source.to_url());
        cmd.push(target.to_url());
        ExecRequest {
            image: self.image.clone(),
            cmd,
            ..ExecRequest::default()
        }
    }

    async fn run(
        &self,
        source: &ConnectionParams,
        target: &ConnectionParams,
        schema: Option<&str>,
    ) -> AppResult<String> {
        let request = self.request(source, target, schema);
        debug!(
            "Diffing {} -> {}",
            source.to_display_string(),
            target.to_display_string()
        );

        let output = tokio::time::timeout(self.timeout, self.supervisor.exec(&request))
            .await
            .map_err(|_| AppError::DifferTimeout(self.timeout))??;

        if DIFFER_OK_CODES.contains(&output.exit_code) {
            Ok(output.stdout)
        } else {
            let stderr = if output.stderr.trim().is_empty() {
                format!("exit code {}", output.exit_code)
            } else {
                output.stderr.trim().to_string()
            };
            Err(AppError::DifferFailed { stderr })
        }
    }
}
