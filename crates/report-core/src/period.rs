use chrono::{Datelike, NaiveDate, Utc};
use chrono_tz::Tz;
use tracing::warn;

// ── System timezone detection ─────────────────────────────────────────────────

/// Detect the IANA timezone name of the running system.
///
/// Uses the `iana-time-zone` crate directly. Falls back to `"UTC"` if
/// detection fails.
pub fn get_system_timezone() -> String {
    iana_time_zone::get_timezone().unwrap_or_else(|_| "UTC".to_string())
}

/// Resolve a timezone argument to a concrete [`Tz`].
///
/// `"auto"` resolves to the system timezone. Unrecognised names fall back to
/// UTC and log a warning.
pub fn resolve_timezone(tz_name: &str) -> Tz {
    let name = if tz_name.eq_ignore_ascii_case("auto") {
        get_system_timezone()
    } else {
        tz_name.to_string()
    };
    name.parse::<Tz>().unwrap_or_else(|_| {
        warn!("unrecognised timezone \"{}\", falling back to UTC", name);
        Tz::UTC
    })
}

// ── ReportingPeriod ───────────────────────────────────────────────────────────

/// The calendar month one report run covers.
///
/// Always the month preceding the run date, computed from the wall clock in
/// the configured timezone. The input file's own dates play no part; a run
/// in early March labels its output for February whatever the rows contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportingPeriod {
    year: i32,
    month: u32,
}

impl ReportingPeriod {
    /// Period for a run happening right now in `tz`.
    pub fn current(tz: Tz) -> Self {
        Self::for_run_date(Utc::now().with_timezone(&tz).date_naive())
    }

    /// Period for a run happening on the given local date.
    pub fn for_run_date(run_date: NaiveDate) -> Self {
        if run_date.month() == 1 {
            Self {
                year: run_date.year() - 1,
                month: 12,
            }
        } else {
            Self {
                year: run_date.year(),
                month: run_date.month() - 1,
            }
        }
    }

    /// Calendar year of the covered month.
    pub fn year(&self) -> i32 {
        self.year
    }

    /// Covered month, 1 through 12.
    pub fn month(&self) -> u32 {
        self.month
    }

    /// Sheet name for this period, e.g. `"Feb_2024"`.
    pub fn sheet_name(&self) -> String {
        self.first_day().format("%b_%Y").to_string()
    }

    fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
            .expect("constructed periods hold a valid month")
    }
}

/// Wall-clock run timestamp in `tz`, formatted for output filenames
/// (`YYYYmmdd_HHMMSS`).
///
/// Captured once per run so every workbook of that run shares it.
pub fn run_timestamp(tz: Tz) -> String {
    Utc::now()
        .with_timezone(&tz)
        .format("%Y%m%d_%H%M%S")
        .to_string()
}

// ── Tests ──────────────────────────────────────────────────────────────────────
