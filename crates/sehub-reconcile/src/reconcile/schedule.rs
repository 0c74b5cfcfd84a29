//! Cron-driven background cleanup.
//!
//! Expressions use the standard five cron fields (`min hour dom mon dow`);
//! a seconds field of `0` is prepended before handing them to `cron`, and
//! six- or seven-field expressions pass through unchanged. In five-field
//! form the day of week follows classic cron (`0` and `7` are Sunday, `1`
//! is Monday) and is renumbered to the `cron` crate's Sunday-is-1 scheme.
//! Rescheduling stops the previous background task before the new one
//! starts.

use crate::reconcile::cleanup::CleanupEngine;
use crate::reconcile::types::*;
use chrono::{DateTime, Utc};
use cron::Schedule;
use log::{info, warn};
use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Parse a cron expression into a schedule.
pub fn parse_schedule(expr: &str) -> Result<Schedule, ReconcileError> {
    let trimmed = expr.trim();
    let fields = trimmed.split_whitespace().count();
    let full = match fields {
        5 => {
            let mut parts: Vec<String> = trimmed.split_whitespace().map(str::to_string).collect();
            parts[4] = translate_weekdays(&parts[4])?;
            format!("0 {}", parts.join(" "))
        }
        6 | 7 => trimmed.to_string(),
        _ => {
            return Err(ReconcileError::config(format!(
                "Schedule '{}' must have 5 cron fields",
                trimmed
            )))
        }
    };
    Schedule::from_str(&full)
        .map_err(|e| ReconcileError::config(format!("Invalid schedule '{}': {}", trimmed, e)))
}

/// Renumber a classic day-of-week field (Sunday = 0 or 7) for `cron`
/// (Sunday = 1). Numeric items are expanded to an explicit list; names
/// pass through untouched.
fn translate_weekdays(field: &str) -> Result<String, ReconcileError> {
    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }
    let invalid = || ReconcileError::config(format!("Invalid day of week '{}'", field));
    let day = |v: &str| v.parse::<u32>().ok().filter(|d| *d <= 7).ok_or_else(invalid);

    let mut days = BTreeSet::new();
    let mut names = Vec::new();
    for item in field.split(',') {
        if item.chars().any(|c| c.is_ascii_alphabetic()) {
            names.push(item.to_string());
            continue;
        }
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step = step.parse::<usize>().ok().filter(|s| *s > 0).ok_or_else(invalid)?;
                (range, Some(step))
            }
            None => (item, None),
        };
        let (lo, hi) = match range.split_once('-') {
            _ if range == "*" => (0, 6),
            Some((lo, hi)) => (day(lo)?, day(hi)?),
            None if step.is_some() => (day(range)?, 6),
            None => {
                let d = day(range)?;
                (d, d)
            }
        };
        if lo > hi {
            return Err(invalid());
        }
        for d in (lo..=hi).step_by(step.unwrap_or(1)) {
            days.insert(d % 7);
        }
    }

    let mut items: Vec<String> = days.into_iter().map(|d| (d + 1).to_string()).collect();
    items.extend(names);
    Ok(items.join(","))
}

/// Next fire time strictly after `after`.
pub fn next_fire(expr: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    parse_schedule(expr).ok()?.after(&after).next()
}

struct ActiveSchedule {
    expr: String,
    handle: JoinHandle<()>,
}

/// Owns the single background cleanup task.
#[derive(Default)]
pub struct CleanupScheduler {
    active: Mutex<Option<ActiveSchedule>>,
}

impl CleanupScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop any running schedule, then start `expr` when `enabled`.
    pub async fn reschedule(
        &self,
        engine: Arc<CleanupEngine>,
        enabled: bool,
        expr: &str,
    ) -> Result<(), ReconcileError> {
        let schedule = if enabled { Some(parse_schedule(expr)?) } else { None };

        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            previous.handle.abort();
        }
        if let Some(schedule) = schedule {
            info!("Automatic cleanup scheduled with '{}'", expr.trim());
            *active = Some(ActiveSchedule {
                expr: expr.trim().to_string(),
                handle: tokio::spawn(run_schedule(engine, schedule)),
            });
        } else {
            info!("Automatic cleanup disabled");
        }
        Ok(())
    }

    pub async fn stop(&self) {
        if let Some(previous) = self.active.lock().await.take() {
            previous.handle.abort();
        }
    }

    pub async fn is_active(&self) -> bool {
        self.active.lock().await.is_some()
    }

    /// Next fire time of the active schedule.
    pub async fn next_run(&self) -> Option<DateTime<Utc>> {
        let active = self.active.lock().await;
        next_fire(&active.as_ref()?.expr, Utc::now())
    }
}

async fn run_schedule(engine: Arc<CleanupEngine>, schedule: Schedule) {
    loop {
        let Some(next) = schedule.upcoming(Utc).next() else {
            warn!("Cleanup schedule has no future fire times; stopping");
            return;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;

        // Run detached so a reschedule mid-run does not cut deletions short.
        let engine = engine.clone();
        let run = tokio::spawn(async move { engine.run_once(CleanupTrigger::Auto).await });
        match run.await {
            Ok(Ok(report)) => info!(
                "Scheduled cleanup removed {} accounts ({} failed)",
                report.removed,
                report.failed.len()
            ),
            Ok(Err(e)) if e.kind == ReconcileErrorKind::AlreadyRunning => {
                info!("Skipping scheduled cleanup: a run is already in progress")
            }
            Ok(Err(e)) => warn!("Scheduled cleanup failed: {}", e),
            Err(e) => warn!("Scheduled cleanup task ended abnormally: {}", e),
        }
    }
}
