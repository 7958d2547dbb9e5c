// Blockout calendar: windows during which scheduled jobs must not fire
//
// A blockout is an ordinary engine job whose action is the blockout action.
// Each of its fire times opens a window of `duration` seconds.

use super::engine::Scheduler;
use crate::errors::{EngineError, TriggerError};
use crate::models::{BlockVerdict, Job, JobFilter, Trigger};
use crate::schedule::FireTimes;
use crate::telemetry;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Blockout manager capability
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlockoutManager: Send + Sync {
    async fn get_block_out_jobs(&self) -> Result<Vec<Job>, EngineError>;

    /// True when at least one fire time of the trigger lands inside a window
    async fn is_partially_blocked(&self, trigger: &Trigger) -> Result<bool, EngineError>;

    /// True when at least one fire time of the trigger is outside every window
    async fn will_fire(&self, trigger: &Trigger) -> Result<bool, EngineError>;

    /// False while a blockout window is open right now
    async fn should_fire_now(&self) -> Result<bool, EngineError>;
}

/// Bounds on how far ahead triggers are enumerated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookaheadConfig {
    pub horizon: Duration,
    pub max_occurrences: usize,
}

impl Default for LookaheadConfig {
    fn default() -> Self {
        Self {
            horizon: Duration::days(7),
            max_occurrences: 1000,
        }
    }
}

/// One blockout job reduced to its recurring window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockoutWindow {
    pub job_id: String,
    pub trigger: Trigger,
    pub duration: Duration,
}

impl BlockoutWindow {
    /// `None` unless the job is a blockout with a positive duration
    pub fn from_job(job: &Job) -> Option<Self> {
        job.blockout_duration().map(|duration| Self {
            job_id: job.job_id.clone(),
            trigger: job.trigger.clone(),
            duration,
        })
    }

    /// The window `[start, start + duration)` containing `instant`, if any
    ///
    /// Any window starting in `(instant - duration, instant]` contains it,
    /// so at most one occurrence is enumerated however often the window repeats.
    pub fn interval_containing(
        &self,
        instant: DateTime<Utc>,
    ) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>, TriggerError> {
        let earliest = instant - self.duration + Duration::nanoseconds(1);
        let latest = instant + Duration::nanoseconds(1);
        let starts = self.trigger.fire_times_between(earliest, latest, 1)?;
        Ok(starts
            .into_iter()
            .next()
            .map(|start| (start, start + self.duration)))
    }
}

/// Count of candidate fire times and how many of them fall in a window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coverage {
    pub total: usize,
    pub blocked: usize,
}

impl Coverage {
    pub fn has_unblocked(&self) -> bool {
        self.blocked < self.total
    }

    pub fn verdict(&self) -> BlockVerdict {
        if self.blocked == 0 {
            BlockVerdict::NotBlocked
        } else if self.blocked == self.total {
            BlockVerdict::FullyBlocked
        } else {
            BlockVerdict::PartiallyBlocked
        }
    }
}

/// Mark each fire time blocked when any interval contains it
pub fn coverage(
    fire_times: &[DateTime<Utc>],
    intervals: &[(DateTime<Utc>, DateTime<Utc>)],
) -> Coverage {
    let blocked = fire_times
        .iter()
        .filter(|t| intervals.iter().any(|(start, end)| start <= *t && *t < end))
        .count();
    Coverage {
        total: fire_times.len(),
        blocked,
    }
}

/// Blockout manager reading its calendar from the scheduling engine
pub struct BlockoutEvaluator {
    scheduler: Arc<dyn Scheduler>,
    lookahead: LookaheadConfig,
}

impl BlockoutEvaluator {
    pub fn new(scheduler: Arc<dyn Scheduler>, lookahead: LookaheadConfig) -> Self {
        Self {
            scheduler,
            lookahead,
        }
    }

    async fn windows(&self) -> Result<Vec<BlockoutWindow>, EngineError> {
        let jobs = self.get_block_out_jobs().await?;
        Ok(jobs
            .iter()
            .filter_map(|job| {
                let window = BlockoutWindow::from_job(job);
                if window.is_none() {
                    warn!(job_id = %job.job_id, "Ignoring blockout without a positive duration");
                }
                window
            })
            .collect())
    }

    /// Windows containing any of `instants`; unusable windows are skipped
    fn intervals_containing(
        windows: &[BlockoutWindow],
        instants: &[DateTime<Utc>],
    ) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
        let mut intervals = Vec::new();
        for window in windows {
            for instant in instants {
                match window.interval_containing(*instant) {
                    Ok(Some(interval)) => intervals.push(interval),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(job_id = %window.job_id, error = %e, "Ignoring blockout with unusable trigger");
                        break;
                    }
                }
            }
        }
        intervals.sort();
        intervals.dedup();
        intervals
    }

    fn evaluate(
        &self,
        windows: &[BlockoutWindow],
        trigger: &Trigger,
        now: DateTime<Utc>,
    ) -> Result<Coverage, EngineError> {
        let from = trigger.start_time().max(now);
        let until = from + self.lookahead.horizon;

        let fire_times = trigger
            .fire_times_between(from, until, self.lookahead.max_occurrences)
            .map_err(|e| EngineError::Failed(format!("cannot evaluate trigger: {e}")))?;

        let intervals = Self::intervals_containing(windows, &fire_times);
        let coverage = coverage(&fire_times, &intervals);
        debug!(
            from = %from,
            total = coverage.total,
            blocked = coverage.blocked,
            "Trigger evaluated against blockouts"
        );
        Ok(coverage)
    }

    /// Evaluate the upcoming fire times of a trigger against the calendar
    ///
    /// The horizon opens at the later of the trigger's start and `now`.
    #[instrument(skip(self, trigger), fields(start = %trigger.start_time()))]
    pub async fn coverage(
        &self,
        trigger: &Trigger,
        now: DateTime<Utc>,
    ) -> Result<Coverage, EngineError> {
        let windows = self.windows().await?;
        self.evaluate(&windows, trigger, now)
    }

    pub async fn is_blocked(
        &self,
        trigger: &Trigger,
        now: DateTime<Utc>,
    ) -> Result<BlockVerdict, EngineError> {
        let verdict = self.coverage(trigger, now).await?.verdict();
        telemetry::record_blockout_evaluation(verdict);
        Ok(verdict)
    }

    /// True when some upcoming fire time escapes every window; always true
    /// with an empty calendar
    pub async fn will_fire_at(
        &self,
        trigger: &Trigger,
        now: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        let windows = self.windows().await?;
        if windows.is_empty() {
            return Ok(true);
        }
        Ok(self.evaluate(&windows, trigger, now)?.has_unblocked())
    }

    /// False when `instant` falls inside an open window
    pub async fn should_fire_at(&self, instant: DateTime<Utc>) -> Result<bool, EngineError> {
        let windows = self.windows().await?;
        Ok(Self::intervals_containing(&windows, &[instant]).is_empty())
    }
}

#[async_trait]
impl BlockoutManager for BlockoutEvaluator {
    async fn get_block_out_jobs(&self) -> Result<Vec<Job>, EngineError> {
        self.scheduler.get_jobs(&JobFilter::blockouts()).await
    }

    async fn is_partially_blocked(&self, trigger: &Trigger) -> Result<bool, EngineError> {
        Ok(self.coverage(trigger, Utc::now()).await?.blocked > 0)
    }

    async fn will_fire(&self, trigger: &Trigger) -> Result<bool, EngineError> {
        self.will_fire_at(trigger, Utc::now()).await
    }

    async fn should_fire_now(&self) -> Result<bool, EngineError> {
        self.should_fire_at(Utc::now()).await
    }
}
