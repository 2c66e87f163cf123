// Job triggers: fixed interval or cron expression. Cron is evaluated in UTC.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Upper bound on missed fire times walked after a long pause before skipping ahead.
const MAX_CATCH_UP: usize = 1024;

#[derive(Debug, Clone)]
pub enum Trigger {
    Interval(Duration),
    Cron {
        expression: String,
        schedule: cron::Schedule,
    },
}

/// Fire times that fell due while the driver was sleeping, plus the following fire time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueTimes {
    pub due: Vec<DateTime<Utc>>,
    pub next: Option<DateTime<Utc>>,
}

impl Trigger {
    pub fn interval(every: Duration) -> anyhow::Result<Self> {
        anyhow::ensure!(!every.is_zero(), "interval trigger must be > 0");
        Ok(Trigger::Interval(every))
    }

    /// Six or seven field cron expression (seconds first), e.g. "0 */15 * * * *".
    pub fn cron(expression: &str) -> anyhow::Result<Self> {
        let schedule = cron::Schedule::from_str(expression)
            .map_err(|e| anyhow::anyhow!("invalid cron expression {:?}: {}", expression, e))?;
        Ok(Trigger::Cron {
            expression: expression.to_string(),
            schedule,
        })
    }

    /// Stable text form persisted next to the job state.
    pub fn descriptor(&self) -> String {
        match self {
            Trigger::Interval(every) => format!("interval:{}ms", every.as_millis()),
            Trigger::Cron { expression, .. } => format!("cron:{}", expression),
        }
    }

    /// First fire time for a job with no usable persisted state.
    pub fn first_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Interval(every) => Some(now + chrono::Duration::from_std(*every).ok()?),
            Trigger::Cron { schedule, .. } => schedule.after(&now).next(),
        }
    }

    /// Fire time following `prev`.
    pub fn next_after(&self, prev: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.first_after(prev)
    }

    /// Walks fire times from `next` up to and including `now`.
    pub fn due_times(&self, next: DateTime<Utc>, now: DateTime<Utc>) -> DueTimes {
        let mut due = Vec::new();
        let mut cursor = Some(next);
        while let Some(t) = cursor {
            if t > now {
                break;
            }
            if due.len() >= MAX_CATCH_UP {
                return DueTimes {
                    due,
                    next: self.first_after(now),
                };
            }
            due.push(t);
            cursor = self.next_after(t);
        }
        DueTimes { due, next: cursor }
    }
}
