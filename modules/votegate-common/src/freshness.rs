//! Vote freshness: decides whether a recorded vote still satisfies the gate.
//!
//! A rule string is either a rolling window (`"24h"`, `"90m"`, `"500ms"`) or a
//! daily cutoff (`"07:00"`). Anything else falls back to a 24 hour rolling
//! window. Stored vote times carry no zone; they are interpreted in the
//! configured zone when the check runs, never when the vote is written.

use std::sync::LazyLock;

use chrono::{DateTime, Duration, Local, LocalResult, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;

const FALLBACK_WINDOW_MS: i64 = 86_400_000;

/// Wire format for `vote_time`: ISO-8601 local date-time, no offset.
const VOTE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
const VOTE_TIME_FORMAT_MINUTES: &str = "%Y-%m-%dT%H:%M";

static ROLLING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(\d+)\s*(ms|s|m|h|d)$").unwrap());
static DAILY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{1,2}):(\d{2})$").unwrap());

/// Parsed form of the `vote-reset` setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshnessRule {
    /// Fresh if `now - occurred_at <= window_ms`.
    Rolling { window_ms: i64 },
    /// Fresh if the vote happened at or after the most recent `at` in the zone.
    DailyCutoff { at: NaiveTime },
}

impl FreshnessRule {
    pub const FALLBACK: FreshnessRule = FreshnessRule::Rolling {
        window_ms: FALLBACK_WINDOW_MS,
    };

    /// Parse a rule string, substituting the 24h fallback for anything malformed.
    pub fn parse(rule: &str) -> Self {
        Self::try_parse(rule).unwrap_or(Self::FALLBACK)
    }

    /// Strict parse. `None` for unrecognized shapes, out-of-range clock times
    /// and windows that overflow `i64` milliseconds.
    pub fn try_parse(rule: &str) -> Option<Self> {
        let rule = rule.trim();

        if let Some(caps) = ROLLING_RE.captures(rule) {
            let amount: i64 = caps[1].parse().ok()?;
            let unit_ms: i64 = match caps[2].to_ascii_lowercase().as_str() {
                "ms" => 1,
                "s" => 1_000,
                "m" => 60_000,
                "h" => 3_600_000,
                "d" => 86_400_000,
                _ => return None,
            };
            return amount
                .checked_mul(unit_ms)
                .map(|window_ms| FreshnessRule::Rolling { window_ms });
        }

        if let Some(caps) = DAILY_RE.captures(rule) {
            let hour: u32 = caps[1].parse().ok()?;
            let minute: u32 = caps[2].parse().ok()?;
            return NaiveTime::from_hms_opt(hour, minute, 0)
                .map(|at| FreshnessRule::DailyCutoff { at });
        }

        None
    }

    /// Verdict for a vote recorded at `occurred_at` (wall time in `zone`).
    /// Boundaries are inclusive; votes from the future count as fresh.
    pub fn is_fresh(&self, occurred_at: NaiveDateTime, zone: &Zone, now: DateTime<Utc>) -> bool {
        let occurred = zone.instant_of(occurred_at);

        match *self {
            FreshnessRule::Rolling { window_ms } => {
                now - occurred <= Duration::milliseconds(window_ms)
            }
            FreshnessRule::DailyCutoff { at } => {
                let today_local = zone.local_now(now).date().and_time(at);
                let today_cutoff = zone.instant_of(today_local);
                let cutoff = if now < today_cutoff {
                    zone.instant_of(today_local - Duration::days(1))
                } else {
                    today_cutoff
                };
                occurred >= cutoff
            }
        }
    }
}

/// The zone stored vote times are read in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Zone {
    Named(Tz),
    SystemLocal,
}

impl Zone {
    /// Resolve an IANA zone id. Empty or unknown ids resolve to the process
    /// zone; the check itself never fails on a bad id.
    pub fn resolve(id: &str) -> Self {
        let id = id.trim();
        if id.is_empty() {
            return Zone::SystemLocal;
        }
        match id.parse::<Tz>() {
            Ok(tz) => Zone::Named(tz),
            Err(_) => {
                tracing::debug!(timezone = id, "Invalid vote-reset-timezone, using system zone");
                Zone::SystemLocal
            }
        }
    }

    /// Instant of a wall-clock time in this zone.
    pub fn instant_of(&self, local: NaiveDateTime) -> DateTime<Utc> {
        match self {
            Zone::Named(tz) => resolve_local(tz, local),
            Zone::SystemLocal => resolve_local(&Local, local),
        }
    }

    /// Wall-clock reading of `now` in this zone.
    pub fn local_now(&self, now: DateTime<Utc>) -> NaiveDateTime {
        match self {
            Zone::Named(tz) => now.with_timezone(tz).naive_local(),
            Zone::SystemLocal => now.with_timezone(&Local).naive_local(),
        }
    }
}

// Overlaps take the earlier offset; wall times inside a forward transition
// are pushed past the gap.
fn resolve_local<Z: TimeZone>(zone: &Z, local: NaiveDateTime) -> DateTime<Utc> {
    match zone.from_local_datetime(&local) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => zone
            .from_local_datetime(&(local + Duration::hours(1)))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&local)),
    }
}

/// A rule bound to a zone, as configured by `vote-reset` and
/// `vote-reset-timezone`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FreshnessPolicy {
    pub rule: FreshnessRule,
    pub zone: Zone,
}

impl FreshnessPolicy {
    pub fn new(rule: &str, timezone: &str) -> Self {
        Self {
            rule: FreshnessRule::parse(rule),
            zone: Zone::resolve(timezone),
        }
    }

    pub fn is_fresh(&self, occurred_at: NaiveDateTime, now: DateTime<Utc>) -> bool {
        self.rule.is_fresh(occurred_at, &self.zone, now)
    }

    /// `now` as a wall-clock vote time in the policy zone.
    pub fn vote_time_now(&self, now: DateTime<Utc>) -> NaiveDateTime {
        self.zone.local_now(now)
    }
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self {
            rule: FreshnessRule::FALLBACK,
            zone: Zone::SystemLocal,
        }
    }
}

/// One-shot check straight from config strings.
pub fn is_fresh(occurred_at: NaiveDateTime, rule: &str, timezone: &str, now: DateTime<Utc>) -> bool {
    FreshnessPolicy::new(rule, timezone).is_fresh(occurred_at, now)
}

pub fn format_vote_time(at: NaiveDateTime) -> String {
    at.format(VOTE_TIME_FORMAT).to_string()
}

pub fn parse_vote_time(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    NaiveDateTime::parse_from_str(raw, VOTE_TIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, VOTE_TIME_FORMAT_MINUTES))
        .ok()
}
