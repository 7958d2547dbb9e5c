// Conversion of schedule requests into canonical triggers

use crate::errors::TriggerError;
use crate::models::{ComplexTriggerSpec, CronTriggerSpec, ScheduleRequest, SimpleTriggerSpec, Trigger};
use crate::schedule::parse_cron_expression;
use chrono::{DateTime, NaiveDateTime, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use std::str::FromStr;
use tracing::{debug, instrument};

/// Builds engine-ready triggers from the raw trigger fields of a request
#[derive(Debug, Clone)]
pub struct TriggerBuilder {
    default_timezone: Tz,
}

impl TriggerBuilder {
    pub fn new(default_timezone: Tz) -> Self {
        Self { default_timezone }
    }

    pub fn default_timezone(&self) -> Tz {
        self.default_timezone
    }

    /// Build the trigger for a request
    ///
    /// Exactly one of the simple, cron or complex forms must be present.
    /// `now` is used as the start of cron and complex triggers that do not
    /// carry one.
    #[instrument(skip(self, request), fields(job_name = %request.job_name))]
    pub fn build(
        &self,
        request: &ScheduleRequest,
        now: DateTime<Utc>,
    ) -> Result<Trigger, TriggerError> {
        let forms = request.trigger_forms();
        if forms.len() > 1 {
            return Err(TriggerError::AmbiguousSpecification(
                forms.into_iter().map(str::to_string).collect(),
            ));
        }

        let timezone = self.resolve_timezone(request.time_zone.as_deref())?;

        let trigger = if let Some(simple) = &request.simple_job_trigger {
            build_simple(simple, timezone)?
        } else if let Some(cron) = &request.cron_job_trigger {
            build_cron(cron, timezone, now)?
        } else if let Some(complex) = &request.complex_job_trigger {
            build_complex(complex, timezone, now)?
        } else {
            return Err(TriggerError::MissingSpecification);
        };

        debug!(trigger = ?trigger, "Trigger built");
        Ok(trigger)
    }

    /// Resolve the zone named on a request, falling back to the default
    pub fn resolve_timezone(&self, name: Option<&str>) -> Result<Tz, TriggerError> {
        match name.map(str::trim).filter(|n| !n.is_empty()) {
            None => Ok(self.default_timezone),
            Some(name) => {
                Tz::from_str(name).map_err(|_| TriggerError::InvalidTimezone(name.to_string()))
            }
        }
    }
}

/// Re-interpret a naive wall-clock time in `timezone`
///
/// The wall-clock fields are kept as-is; only the zone changes. Ambiguous
/// times (DST fall-back) resolve to the earlier instant.
pub fn localize(naive: NaiveDateTime, timezone: Tz) -> Result<DateTime<Utc>, TriggerError> {
    timezone
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| TriggerError::NonexistentLocalTime {
            start: naive.to_string(),
            timezone: timezone.to_string(),
        })
}

fn localize_bounds(
    start: Option<NaiveDateTime>,
    end: Option<NaiveDateTime>,
    timezone: Tz,
    now: DateTime<Utc>,
) -> Result<(DateTime<Utc>, Option<DateTime<Utc>>), TriggerError> {
    let start_time = match start {
        Some(naive) => localize(naive, timezone)?,
        None => now,
    };
    let end_time = end.map(|naive| localize(naive, timezone)).transpose()?;
    if end_time.is_some_and(|end| end < start_time) {
        return Err(TriggerError::EndBeforeStart);
    }
    Ok((start_time, end_time))
}

fn build_simple(spec: &SimpleTriggerSpec, timezone: Tz) -> Result<Trigger, TriggerError> {
    if spec.repeat_count != 0 && spec.repeat_interval_seconds <= 0 {
        return Err(TriggerError::InvalidInterval(spec.repeat_interval_seconds));
    }

    let start_time = localize(spec.start_time, timezone)?;
    let end_time = spec
        .end_time
        .map(|naive| localize(naive, timezone))
        .transpose()?;
    if end_time.is_some_and(|end| end < start_time) {
        return Err(TriggerError::EndBeforeStart);
    }

    Ok(Trigger::Simple {
        start_time,
        end_time,
        repeat_count: spec.repeat_count,
        repeat_interval_seconds: spec.repeat_interval_seconds,
        timezone,
    })
}

fn build_cron(
    spec: &CronTriggerSpec,
    timezone: Tz,
    now: DateTime<Utc>,
) -> Result<Trigger, TriggerError> {
    parse_cron_expression(&spec.cron_string)?;
    let (start_time, end_time) = localize_bounds(spec.start_time, spec.end_time, timezone, now)?;

    Ok(Trigger::Cron {
        expression: spec.cron_string.clone(),
        start_time,
        end_time,
        timezone,
    })
}

fn build_complex(
    spec: &ComplexTriggerSpec,
    timezone: Tz,
    now: DateTime<Utc>,
) -> Result<Trigger, TriggerError> {
    let expression = match spec.cron_string.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => raw.to_string(),
        _ => compose_cron_expression(spec)?,
    };
    parse_cron_expression(&expression)?;
    let (start_time, end_time) = localize_bounds(spec.start_time, spec.end_time, timezone, now)?;

    Ok(Trigger::Cron {
        expression,
        start_time,
        end_time,
        timezone,
    })
}

/// Compose a seven-field cron expression from recurrence lists
///
/// Minute and hour default to the wall-clock of the spec's start time (or
/// midnight). Empty day/month/year lists mean "every".
pub fn compose_cron_expression(spec: &ComplexTriggerSpec) -> Result<String, TriggerError> {
    let has_recurrence = !(spec.minutes.is_empty()
        && spec.hours.is_empty()
        && spec.days_of_month.is_empty()
        && spec.months.is_empty()
        && spec.days_of_week.is_empty()
        && spec.years.is_empty());
    if !has_recurrence {
        return Err(TriggerError::InvalidRecurrence(
            "complex trigger needs a cron string or at least one recurrence".to_string(),
        ));
    }

    let (default_hour, default_minute) = spec
        .start_time
        .map(|start| (start.hour(), start.minute()))
        .unwrap_or((0, 0));

    let minutes = field(&spec.minutes, "minute", 0..=59)?.unwrap_or(default_minute.to_string());
    let hours = field(&spec.hours, "hour", 0..=23)?.unwrap_or(default_hour.to_string());
    let days_of_month = field(&spec.days_of_month, "day of month", 1..=31)?.unwrap_or("*".into());
    let months = field(&spec.months, "month", 1..=12)?.unwrap_or("*".into());
    let days_of_week = if spec.days_of_week.is_empty() {
        "*".to_string()
    } else {
        spec.days_of_week
            .iter()
            .map(|d| weekday_name(*d))
            .collect::<Vec<_>>()
            .join(",")
    };

    let mut expression = format!("0 {minutes} {hours} {days_of_month} {months} {days_of_week}");
    if !spec.years.is_empty() {
        let years = spec
            .years
            .iter()
            .map(i32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        expression.push(' ');
        expression.push_str(&years);
    }

    Ok(expression)
}

fn field(
    values: &[u32],
    name: &str,
    range: std::ops::RangeInclusive<u32>,
) -> Result<Option<String>, TriggerError> {
    if values.is_empty() {
        return Ok(None);
    }
    if let Some(bad) = values.iter().find(|v| !range.contains(*v)) {
        return Err(TriggerError::InvalidRecurrence(format!(
            "{name} {bad} outside {}..={}",
            range.start(),
            range.end()
        )));
    }
    Ok(Some(
        values
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(","),
    ))
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "MON",
        Weekday::Tue => "TUE",
        Weekday::Wed => "WED",
        Weekday::Thu => "THU",
        Weekday::Fri => "FRI",
        Weekday::Sat => "SAT",
        Weekday::Sun => "SUN",
    }
}
