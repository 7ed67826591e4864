//! Tracing setup
//!
//! `DEBUG=<comma-list of namespace globs>` is the only switch. Namespaces use
//! `:` as separator (`supadev:shadow`) and map onto tracing targets
//! (`supadev::shadow`).

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "supadev=info,warn";

/// Initialize tracing with structured logging on stderr
pub fn init_tracing() {
    let debug = std::env::var("DEBUG").ok();
    let env_filter = EnvFilter::try_new(filter_directives(debug.as_deref()))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_level(true)
                .without_time()
                .compact(),
        )
        .init();
}

/// Translate the `DEBUG` value into `EnvFilter` directives
pub fn filter_directives(debug: Option<&str>) -> String {
    let mut directives = vec![DEFAULT_FILTER.to_string()];

    for namespace in debug.unwrap_or_default().split(',') {
        let namespace = namespace.trim();
        if namespace.is_empty() {
            continue;
        }
        if namespace == "*" {
            return "debug".to_string();
        }

        let target = namespace
            .trim_end_matches('*')
            .trim_end_matches(':')
            .replace(':', "::");
        if target.is_empty() {
            continue;
        }
        directives.push(format!("{}=debug", target));
    }

    directives.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        assert_eq!(filter_directives(None), DEFAULT_FILTER);
        assert_eq!(filter_directives(Some("")), DEFAULT_FILTER);
    }

    #[test]
    fn test_namespace_globs() {
        assert_eq!(
            filter_directives(Some("supadev:shadow, supadev:watcher:*")),
            "supadev=info,warn,supadev::shadow=debug,supadev::watcher=debug"
        );
        assert_eq!(
            filter_directives(Some("supadev:*")),
            "supadev=info,warn,supadev=debug"
        );
    }

    #[test]
    fn test_wildcard_enables_everything() {
        assert_eq!(filter_directives(Some("tokio_postgres,*")), "debug");
    }

    #[test]
    fn test_directives_parse() {
        let directives = filter_directives(Some("supadev:pipeline"));
        assert!(EnvFilter::try_new(directives).is_ok());
    }
}
