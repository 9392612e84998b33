//! Bounded, in-memory warning sink.
//!
//! Real warning delivery (paging, dashboards) is an external collaborator;
//! this keeps the last N warnings queryable from the monitoring API and logs
//! every one through `tracing` so an operator watching logs never needs the
//! API to notice something went wrong.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use waypoint_core::{Warning, WarningCategory, WarningSeverity};

const RETAINED_WARNINGS: usize = 500;

pub struct WarningService {
    source: String,
    buffer: Mutex<VecDeque<Warning>>,
}

impl WarningService {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            buffer: Mutex::new(VecDeque::with_capacity(RETAINED_WARNINGS)),
        }
    }

    pub fn emit(&self, category: WarningCategory, severity: WarningSeverity, message: impl Into<String>) {
        let warning = Warning::new(category, severity, message, self.source.clone());
        match warning.severity {
            WarningSeverity::Critical => tracing::error!(category = ?warning.category, "{}", warning.message),
            WarningSeverity::Error => tracing::error!(category = ?warning.category, "{}", warning.message),
            WarningSeverity::Warn => tracing::warn!(category = ?warning.category, "{}", warning.message),
            WarningSeverity::Info => tracing::info!(category = ?warning.category, "{}", warning.message),
        }
        let mut buffer = self.buffer.lock();
        if buffer.len() == RETAINED_WARNINGS {
            buffer.pop_front();
        }
        buffer.push_back(warning);
    }

    pub fn warn(&self, category: WarningCategory, message: impl Into<String>) {
        self.emit(category, WarningSeverity::Warn, message);
    }

    pub fn critical(&self, category: WarningCategory, message: impl Into<String>) {
        self.emit(category, WarningSeverity::Critical, message);
    }

    pub fn recent(&self, limit: usize) -> Vec<Warning> {
        let buffer = self.buffer.lock();
        buffer.iter().rev().take(limit).cloned().collect()
    }
}

pub type SharedWarnings = Arc<WarningService>;
