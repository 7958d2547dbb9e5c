// Schedule parsing and fire-time enumeration
//
// Computes the instants a canonical trigger would fire inside a bounded
// window. Used by the blockout evaluator and the in-memory engine; the
// firing loop itself lives in the scheduling engine.

use crate::errors::TriggerError;
use crate::models::Trigger;
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use std::str::FromStr;

/// FireTimes trait defines the interface for enumerating trigger firings
pub trait FireTimes {
    /// Fire times `t` with `from <= t < until`, at most `limit` of them
    fn fire_times_between(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DateTime<Utc>>, TriggerError>;

    /// First fire time at or after `after`
    fn next_fire_time(&self, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, TriggerError>;
}

impl FireTimes for Trigger {
    fn fire_times_between(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DateTime<Utc>>, TriggerError> {
        match self {
            Trigger::Simple {
                start_time,
                end_time,
                repeat_count,
                repeat_interval_seconds,
                ..
            } => Ok(simple_fire_times(
                *start_time,
                *end_time,
                *repeat_count,
                *repeat_interval_seconds,
                from,
                until,
                limit,
            )),

            Trigger::Cron {
                expression,
                start_time,
                end_time,
                timezone,
            } => cron_fire_times(
                expression, *timezone, *start_time, *end_time, from, until, limit,
            ),
        }
    }

    fn next_fire_time(&self, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, TriggerError> {
        let until = self.end_time().map_or(DateTime::<Utc>::MAX_UTC, |end| {
            end + Duration::seconds(1)
        });
        Ok(self.fire_times_between(after, until, 1)?.into_iter().next())
    }
}

/// Parse and validate a cron expression
///
/// Accepts the six/seven field form with second precision.
pub fn parse_cron_expression(expression: &str) -> Result<CronSchedule, TriggerError> {
    CronSchedule::from_str(expression).map_err(|e| TriggerError::InvalidCronExpression {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

fn simple_fire_times(
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
    repeat_count: i32,
    interval_seconds: i64,
    from: DateTime<Utc>,
    until: DateTime<Utc>,
    limit: usize,
) -> Vec<DateTime<Utc>> {
    let mut times = Vec::new();
    if limit == 0 || from >= until {
        return times;
    }

    // A non-positive interval can only ever fire once
    if interval_seconds <= 0 || repeat_count == 0 {
        if start >= from && start < until && end.map_or(true, |e| start <= e) {
            times.push(start);
        }
        return times;
    }

    // Jump straight to the first occurrence inside the window
    let mut index = if from <= start {
        0
    } else {
        let elapsed = (from - start).num_seconds();
        (elapsed + interval_seconds - 1) / interval_seconds
    };
    let last_index = if repeat_count < 0 {
        i64::MAX
    } else {
        repeat_count as i64
    };

    while index <= last_index && times.len() < limit {
        let offset = match index.checked_mul(interval_seconds) {
            Some(secs) => Duration::seconds(secs),
            None => break,
        };
        let fire = match start.checked_add_signed(offset) {
            Some(t) => t,
            None => break,
        };
        if fire >= until || end.is_some_and(|e| fire > e) {
            break;
        }
        if fire >= from {
            times.push(fire);
        }
        index += 1;
    }

    times
}

fn cron_fire_times(
    expression: &str,
    timezone: Tz,
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
    from: DateTime<Utc>,
    until: DateTime<Utc>,
    limit: usize,
) -> Result<Vec<DateTime<Utc>>, TriggerError> {
    let schedule = parse_cron_expression(expression)?;
    if limit == 0 || from >= until {
        return Ok(Vec::new());
    }

    let lower = from.max(start);
    // `after` is exclusive; cron resolution is one second
    let reference = (lower - Duration::seconds(1)).with_timezone(&timezone);

    let times = schedule
        .after(&reference)
        .map(|t| t.with_timezone(&Utc))
        .skip_while(|t| *t < lower)
        .take_while(|t| *t < until && end.map_or(true, |e| *t <= e))
        .take(limit)
        .collect();

    Ok(times)
}
