//! ErrorReporter - high-level error logging service
//!
//! Wraps `IMetadataRepository::append_error()` with the severity/category
//! taxonomy and optional webhook forwarding. All methods are non-fatal:
//! persistence and forwarding failures are logged via `tracing::warn!` but
//! never propagated, so error reporting can never break the operation that
//! failed.

use std::sync::Arc;

use tracing::warn;

use curator_core::config::SlackWebhookConfig;
use curator_core::domain::{ErrorCategory, ErrorLog, Severity};
use curator_core::ports::{IMetadataRepository, INotifier, NullNotifier};

/// Which rows get forwarded to the notifier
#[derive(Debug, Clone, Default)]
struct ForwardFilter {
    /// Severities to forward; empty means all
    severities: Vec<Severity>,
    /// Categories to forward; empty means all
    categories: Vec<ErrorCategory>,
}

impl ForwardFilter {
    fn matches(&self, row: &ErrorLog) -> bool {
        (self.severities.is_empty() || self.severities.contains(&row.severity))
            && (self.categories.is_empty() || self.categories.contains(&row.category))
    }
}

/// Error reporting service
pub struct ErrorReporter {
    repository: Arc<dyn IMetadataRepository>,
    notifier: Arc<dyn INotifier>,
    filter: ForwardFilter,
}

impl ErrorReporter {
    /// Creates a reporter that records rows but forwards nothing
    pub fn new(repository: Arc<dyn IMetadataRepository>) -> Self {
        Self {
            repository,
            notifier: Arc::new(NullNotifier),
            filter: ForwardFilter::default(),
        }
    }

    /// Attaches a notifier with forwarding filters from the configuration
    ///
    /// Unknown severity or category names in the configuration were caught
    /// at startup validation; anything left unparseable is skipped with a
    /// warning rather than silently widening the filter.
    pub fn with_webhook(
        mut self,
        notifier: Arc<dyn INotifier>,
        config: &SlackWebhookConfig,
    ) -> Self {
        let mut filter = ForwardFilter::default();
        for name in &config.post_error_severity {
            match Severity::parse(name) {
                Some(s) => filter.severities.push(s),
                None => warn!(severity = %name, "Ignoring unknown webhook severity filter"),
            }
        }
        for name in &config.post_error_category {
            match ErrorCategory::parse(name) {
                Some(c) => filter.categories.push(c),
                None => warn!(category = %name, "Ignoring unknown webhook category filter"),
            }
        }
        self.notifier = notifier;
        self.filter = filter;
        self
    }

    /// Records one failure, forwarding it when the filters match
    pub async fn report(&self, severity: Severity, category: ErrorCategory, message: &str) {
        let row = ErrorLog::new(severity, category, message);

        if let Err(e) = self.repository.append_error(&row).await {
            warn!(error = %e, message, "Failed to append error row");
        }
        if self.filter.matches(&row) {
            if let Err(e) = self.notifier.notify_error(&row).await {
                warn!(error = %e, "Failed to forward error row");
            }
        }
    }
}
