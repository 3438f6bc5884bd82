//! Daily maintenance window arithmetic
//!
//! A window is a time-of-day range with a fixed UTC offset on each bound
//! (`HHMMSS+ZZZZ`). It repeats every day and may wrap past midnight.

use chrono::{DateTime, NaiveTime, TimeDelta, Timelike, Utc};
use rand::Rng;

use canopy_common::crd::{MaintenanceTimeWindow, Shoot};
use canopy_common::{Error, Result};

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// A parsed daily maintenance window, normalised to UTC
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MaintenanceWindow {
    /// Start, in seconds after UTC midnight
    begin: i64,
    /// Length in seconds, always in `1..=86399`
    duration: i64,
}

impl Default for MaintenanceWindow {
    /// 22:00 to 23:00 UTC
    fn default() -> Self {
        Self {
            begin: 22 * 60 * 60,
            duration: 60 * 60,
        }
    }
}

impl MaintenanceWindow {
    /// Parse a window from its `begin`/`end` bounds
    pub fn parse(begin: &str, end: &str) -> Result<Self> {
        let begin = parse_time_of_day(begin)?;
        let end = parse_time_of_day(end)?;
        let duration = (end - begin).rem_euclid(SECONDS_PER_DAY);
        if duration == 0 {
            return Err(Error::validation(
                "maintenance window begin and end must differ",
            ));
        }
        Ok(Self { begin, duration })
    }

    /// The configured (or default) window of a Shoot
    pub fn for_shoot(shoot: &Shoot) -> Result<Self> {
        let MaintenanceTimeWindow { begin, end } = shoot.maintenance_time_window();
        Self::parse(&begin, &end).map_err(|e| {
            Error::validation_for_field(shoot.key(), "spec.maintenance.timeWindow", e.to_string())
        })
    }

    /// Length of one window instance
    pub fn duration(&self) -> TimeDelta {
        TimeDelta::seconds(self.duration)
    }

    /// Window instances starting yesterday, today and tomorrow (UTC days)
    fn instances_around(&self, now: DateTime<Utc>) -> [(DateTime<Utc>, DateTime<Utc>); 3] {
        let midnight = now.date_naive().and_time(NaiveTime::MIN).and_utc();
        let today = midnight + TimeDelta::seconds(self.begin);
        [-1, 0, 1].map(|day| {
            let begin = today + TimeDelta::days(day);
            (begin, begin + self.duration())
        })
    }

    /// The instance `now` falls into, if any
    pub fn current_instance(&self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        self.instances_around(now)
            .into_iter()
            .find(|(begin, end)| *begin <= now && now < *end)
    }

    /// Whether `now` lies inside an instance of this window
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        self.current_instance(now).is_some()
    }

    /// First instance whose end is still ahead of `now`
    fn next_instance(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let instances = self.instances_around(now);
        instances
            .into_iter()
            .find(|(_, end)| now < *end)
            .unwrap_or(instances[2])
    }

    /// Random instant inside the next instance not yet passed, never before `now`
    pub fn next_instant<R: Rng + ?Sized>(&self, now: DateTime<Utc>, rng: &mut R) -> DateTime<Utc> {
        let (begin, end) = self.next_instance(now);
        let from = begin.max(now);
        let span_ms = (end - from).num_milliseconds();
        if span_ms <= 0 {
            return from;
        }
        from + TimeDelta::milliseconds(rng.gen_range(0..span_ms))
    }

    /// Random instant in the first instance starting after the current one.
    ///
    /// Equal to [`next_instant`](Self::next_instant) when `now` is outside
    /// the window; inside it, the rest of the running instance is skipped.
    pub fn next_instant_after_current<R: Rng + ?Sized>(
        &self,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> DateTime<Utc> {
        match self.current_instance(now) {
            Some((_, end)) => self.next_instant(end, rng),
            None => self.next_instant(now, rng),
        }
    }
}

/// Next maintenance instant for `window` as seen at `now`, with random jitter
pub fn next_window(window: &MaintenanceWindow, now: DateTime<Utc>) -> DateTime<Utc> {
    window.next_instant(now, &mut rand::thread_rng())
}

/// Parse `HHMMSS+ZZZZ` into seconds after UTC midnight
fn parse_time_of_day(value: &str) -> Result<i64> {
    let invalid = || {
        Error::validation(format!(
            "invalid maintenance time {:?}, expected HHMMSS+ZZZZ",
            value
        ))
    };
    if value.len() != 11 || !value.is_ascii() {
        return Err(invalid());
    }
    let (time, zone) = value.split_at(6);
    if !time.bytes().chain(zone.bytes().skip(1)).all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let time = NaiveTime::parse_from_str(time, "%H%M%S").map_err(|_| invalid())?;
    let local = i64::from(time.num_seconds_from_midnight());

    let sign = match &zone[..1] {
        "+" => 1,
        "-" => -1,
        _ => return Err(invalid()),
    };
    let hours: i64 = zone[1..3].parse().map_err(|_| invalid())?;
    let minutes: i64 = zone[3..5].parse().map_err(|_| invalid())?;
    if hours > 14 || minutes > 59 {
        return Err(invalid());
    }
    let offset = sign * (hours * 3600 + minutes * 60);

    Ok((local - offset).rem_euclid(SECONDS_PER_DAY))
}
