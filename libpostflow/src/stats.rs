//! Scheduler statistics
//!
//! A snapshot computed from the posts table on demand; nothing here is stored.

use serde::Serialize;
use std::time::Duration;

use crate::db::{Database, PostStats};
use crate::error::Result;
use crate::types::PostStatus;

const HOUR: i64 = 3600;
const DAY: i64 = 24 * HOUR;
const WEEK: i64 = 7 * DAY;

/// Future scheduled posts grouped by how soon they are due
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScheduleSummary {
    pub next_hour: usize,
    pub next_day: usize,
    pub next_week: usize,
    pub later: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerStatistics {
    pub running: bool,
    pub poll_interval_secs: u64,
    pub counts: PostStats,
    /// Earliest `scheduled_time` strictly in the future
    pub next_publication: Option<i64>,
    pub seconds_until_next: Option<i64>,
    /// Due scheduled posts with media attached
    pub ready_now: i64,
    /// Scheduled posts due for longer than two poll intervals
    pub overdue: usize,
    pub summary: ScheduleSummary,
}

/// Time-derived parts of the statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timeline {
    pub next_publication: Option<i64>,
    pub overdue: usize,
    pub summary: ScheduleSummary,
}

/// Classify scheduled times relative to `now`.
///
/// A time due for `grace_secs` or more counts as overdue; future times fall
/// into the first bucket whose horizon they fit.
pub fn summarize(scheduled_times: &[i64], now: i64, grace_secs: i64) -> Timeline {
    let mut timeline = Timeline::default();

    for &at in scheduled_times {
        if at <= now {
            if now - at >= grace_secs {
                timeline.overdue += 1;
            }
            continue;
        }

        timeline.next_publication = Some(timeline.next_publication.map_or(at, |n| n.min(at)));
        let delta = at - now;
        if delta <= HOUR {
            timeline.summary.next_hour += 1;
        } else if delta <= DAY {
            timeline.summary.next_day += 1;
        } else if delta <= WEEK {
            timeline.summary.next_week += 1;
        } else {
            timeline.summary.later += 1;
        }
    }

    timeline
}

pub async fn collect(
    db: &Database,
    running: bool,
    poll_interval: Duration,
) -> Result<SchedulerStatistics> {
    let counts = db.stats().await?;
    let scheduled_times: Vec<i64> = db
        .list_posts_by_status(PostStatus::Scheduled)
        .await?
        .iter()
        .filter_map(|p| p.scheduled_time)
        .collect();

    let now = chrono::Utc::now().timestamp();
    let poll_interval_secs = poll_interval.as_secs();
    let grace = i64::try_from(poll_interval_secs.saturating_mul(2)).unwrap_or(i64::MAX);
    let timeline = summarize(&scheduled_times, now, grace);

    Ok(SchedulerStatistics {
        running,
        poll_interval_secs,
        counts,
        next_publication: timeline.next_publication,
        seconds_until_next: timeline.next_publication.map(|at| at - now),
        ready_now: counts.ready_to_publish,
        overdue: timeline.overdue,
        summary: timeline.summary,
    })
}
