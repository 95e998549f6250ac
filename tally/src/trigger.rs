//! Calendar-aligned firing schedule for aggregation.
//!
//! A [`Cadence`] maps any instant to the next boundary after it. The
//! [`PeriodicTrigger`] sleeps toward that boundary in short checks of the wall
//! clock, so processing delays never shift later boundaries and a missed
//! boundary is simply skipped.

use chrono::{DateTime, Local, TimeDelta, TimeZone, Timelike};
use std::time::Duration;
use tracing::debug;

use crate::prelude::*;

/// When aggregation boundaries occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// At the given minute of every hour, on the local wall clock.
    Hourly { minute: u32 },
    /// At every multiple of the period since the Unix epoch.
    Every(Duration),
}

impl Default for Cadence {
    fn default() -> Self {
        Self::Hourly { minute: 0 }
    }
}

impl Cadence {
    /// Checks that the cadence describes a usable schedule.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Hourly { minute } if *minute > 59 => Err(TallyError::Configuration(format!(
                "Hourly cadence minute must be between 0 and 59, got {minute}"
            ))),
            Self::Every(period) if period.is_zero() => Err(TallyError::Configuration(
                "Cadence period must be greater than zero".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Length of one period.
    pub fn period(&self) -> Duration {
        match self {
            Self::Hourly { .. } => Duration::from_secs(3600),
            Self::Every(period) => *period,
        }
    }

    /// Returns the first boundary strictly after `now`.
    pub fn next_after<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> DateTime<Tz> {
        match self {
            Self::Hourly { minute } => {
                let into_hour = TimeDelta::seconds(i64::from(now.minute() * 60 + now.second()))
                    + TimeDelta::nanoseconds(i64::from(now.nanosecond() % 1_000_000_000));
                let candidate =
                    now.clone() - into_hour + TimeDelta::minutes(i64::from(*minute));
                if candidate > *now {
                    candidate
                } else {
                    candidate + TimeDelta::hours(1)
                }
            }
            Self::Every(period) => {
                let period = period.as_nanos().max(1) as i128;
                let now_nanos = i128::from(now.timestamp()) * 1_000_000_000
                    + i128::from(now.timestamp_subsec_nanos());
                let next = (now_nanos.div_euclid(period) + 1) * period;
                let delta = i64::try_from(next - now_nanos).unwrap_or(i64::MAX);
                now.clone() + TimeDelta::nanoseconds(delta)
            }
        }
    }

    /// Human-readable name of one period, used in reports ("hour", "15 minutes").
    pub fn label(&self) -> String {
        match self {
            Self::Hourly { .. } => "hour".to_string(),
            Self::Every(period) => humanize(*period),
        }
    }
}

fn humanize(period: Duration) -> String {
    let plural = |n: u128, unit: &str| {
        if n == 1 {
            unit.to_string()
        } else {
            format!("{n} {unit}s")
        }
    };

    let millis = period.as_millis();
    if millis % 86_400_000 == 0 && millis > 0 {
        plural(millis / 86_400_000, "day")
    } else if millis % 3_600_000 == 0 && millis > 0 {
        plural(millis / 3_600_000, "hour")
    } else if millis % 60_000 == 0 && millis > 0 {
        plural(millis / 60_000, "minute")
    } else if millis % 1000 == 0 && millis > 0 {
        plural(millis / 1000, "second")
    } else {
        plural(millis, "millisecond")
    }
}

/// Fires once per cadence boundary, aligned to the wall clock.
#[derive(Debug)]
pub struct PeriodicTrigger {
    cadence: Cadence,
    check_interval: Duration,
    next: DateTime<Local>,
}

impl PeriodicTrigger {
    /// Creates a trigger whose first boundary is the next one after now.
    ///
    /// `check_interval` bounds how long the trigger sleeps before looking at
    /// the wall clock again.
    pub fn new(cadence: Cadence, check_interval: Duration) -> Self {
        let next = cadence.next_after(&Local::now());
        Self {
            cadence,
            check_interval,
            next,
        }
    }

    /// The boundary the trigger is waiting for.
    pub fn next_boundary(&self) -> DateTime<Local> {
        self.next
    }

    /// Waits for the next boundary and returns it.
    ///
    /// If the process was blocked past one or more boundaries, only the most
    /// recently scheduled one is reported and the schedule resumes from the
    /// current time. Dropping the future before it completes leaves the
    /// schedule unchanged.
    pub async fn tick(&mut self) -> DateTime<Local> {
        loop {
            let now = Local::now();
            if now >= self.next {
                let fired = self.next;
                self.next = self.cadence.next_after(&now);

                let lag = (now - fired).to_std().unwrap_or_default();
                if lag >= self.cadence.period() {
                    debug!(
                        boundary = %fired,
                        lag_ms = lag.as_millis() as u64,
                        "Skipped missed boundaries"
                    );
                }
                return fired;
            }

            let remaining = (self.next - now).to_std().unwrap_or_default();
            tokio::time::sleep(remaining.min(self.check_interval)).await;
        }
    }
}
