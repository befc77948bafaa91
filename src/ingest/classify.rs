//! Maps accumulated per-item outcomes to one of three result tiers.

/// Overall result of one ingestion task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestResult {
    NoErrors,
    NonCriticalErrors,
    CriticalErrors,
}

/// Strict priority, not a count: one critical error dominates any number of
/// non-critical ones, even when data sources were still produced.
pub fn classify(critical_error_occurred: bool, error_messages: &[String]) -> IngestResult {
    if critical_error_occurred {
        IngestResult::CriticalErrors
    } else if !error_messages.is_empty() {
        IngestResult::NonCriticalErrors
    } else {
        IngestResult::NoErrors
    }
}
