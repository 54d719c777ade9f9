use amx_core::{Alert, Severity};
use tracing::warn;

/// Where a diagnostic points: one row, optionally one column of it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertContext {
    pub line: usize,
    pub test_case: Option<String>,
    pub row_id: Option<String>,
    pub reference: Option<String>,
    pub column: Option<String>,
}

impl AlertContext {
    pub fn at_line(line: usize) -> Self {
        Self {
            line,
            ..Self::default()
        }
    }

    pub fn with_column(&self, column: impl Into<String>) -> Self {
        Self {
            column: Some(column.into()),
            ..self.clone()
        }
    }
}

/// Append-only diagnostics sink shared by every compiler component.
#[derive(Debug, Clone)]
pub struct AlertCollector {
    alerts: Vec<Alert>,
    deduplicate: bool,
}

impl Default for AlertCollector {
    fn default() -> Self {
        Self::new(true)
    }
}

impl AlertCollector {
    pub fn new(deduplicate: bool) -> Self {
        Self {
            alerts: Vec::new(),
            deduplicate,
        }
    }

    /// Returns `false` when an identical alert was already recorded.
    pub fn push(&mut self, alert: Alert) -> bool {
        if self.deduplicate
            && self.alerts.iter().any(|known| {
                known.severity == alert.severity
                    && known.line == alert.line
                    && known.message == alert.message
            })
        {
            warn!(line = alert.line, message = %alert.message, "duplicate alert dropped");
            return false;
        }
        self.alerts.push(alert);
        true
    }

    pub fn error(&mut self, context: &AlertContext, message: impl Into<String>) -> bool {
        self.push(make_alert(Severity::Error, context, message.into()))
    }

    pub fn warning(&mut self, context: &AlertContext, message: impl Into<String>) -> bool {
        self.push(make_alert(Severity::Warning, context, message.into()))
    }

    pub fn contains_message(&self, message: &str) -> bool {
        self.alerts.iter().any(|alert| alert.message == message)
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.alerts
            .iter()
            .filter(|alert| alert.severity == severity)
            .count()
    }

    pub fn error_count(&self) -> usize {
        self.count(Severity::Error)
    }

    pub fn warning_count(&self) -> usize {
        self.count(Severity::Warning)
    }

    pub fn has_errors(&self) -> bool {
        self.alerts
            .iter()
            .any(|alert| alert.severity == Severity::Error)
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Alert> {
        self.alerts.iter()
    }

    pub fn into_vec(self) -> Vec<Alert> {
        self.alerts
    }
}

fn make_alert(severity: Severity, context: &AlertContext, message: String) -> Alert {
    Alert {
        severity,
        line: context.line,
        test_case: context.test_case.clone(),
        row_id: context.row_id.clone(),
        reference: context.reference.clone(),
        column: context.column.clone(),
        message,
    }
}
