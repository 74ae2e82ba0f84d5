use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveTime, TimeDelta};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::model::*;

use super::EngineError;

/// Reporting period, anchored on the date of `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Period {
    /// Today only, one row per reservation.
    Day,
    /// Today and the 7 days before it, one row per date.
    Week,
    /// Today and the 30 days before it, one row per date.
    #[default]
    Month,
}

impl Period {
    /// Unrecognized names fall back to `Month`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" | "dia" | "día" => Period::Day,
            "week" | "semana" => Period::Week,
            _ => Period::Month,
        }
    }

    /// Earliest start date included.
    pub fn first_date(self, today: NaiveDate) -> NaiveDate {
        match self {
            Period::Day => today,
            Period::Week => today - TimeDelta::days(7),
            Period::Month => today - TimeDelta::days(30),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "month",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeriodRow {
    pub date: NaiveDate,
    /// Set only on per-reservation (`Day`) rows.
    pub start: Option<NaiveTime>,
    pub end: Option<NaiveTime>,
    pub count: u64,
    pub recognized_revenue: Decimal,
}

/// Revenue counts once the owner confirmed it and the slot has been played.
pub fn is_recognized(r: &Reservation, now: Ts) -> bool {
    r.state == ReservationState::Confirmed && r.span.end < now
}

fn recognized_amount(r: &Reservation, now: Ts) -> Decimal {
    if is_recognized(r, now) { r.amount } else { Decimal::ZERO }
}

/// Group reservations into report rows for `period`, sorted ascending.
///
/// Every matching reservation counts toward `count` regardless of state;
/// only recognized ones add to `recognized_revenue`. Reservations starting
/// after today are included in `Week`/`Month` rows. Fails with
/// `AmountOverflow` if a day's revenue leaves `Decimal`'s range.
pub fn aggregate<'a, I>(reservations: I, period: Period, now: Ts) -> Result<Vec<PeriodRow>, EngineError>
where
    I: IntoIterator<Item = &'a Reservation>,
{
    let today = now.date();

    if period == Period::Day {
        let mut rows: Vec<PeriodRow> = reservations
            .into_iter()
            .filter(|r| r.date() == today)
            .map(|r| PeriodRow {
                date: r.date(),
                start: Some(r.span.start.time()),
                end: Some(r.span.end.time()),
                count: 1,
                recognized_revenue: recognized_amount(r, now),
            })
            .collect();
        rows.sort_by_key(|row| (row.date, row.start));
        return Ok(rows);
    }

    let first = period.first_date(today);
    let mut by_date: BTreeMap<NaiveDate, (u64, Decimal)> = BTreeMap::new();
    for r in reservations.into_iter().filter(|r| r.date() >= first) {
        let entry = by_date.entry(r.date()).or_insert((0, Decimal::ZERO));
        entry.0 += 1;
        entry.1 = entry
            .1
            .checked_add(recognized_amount(r, now))
            .ok_or(EngineError::AmountOverflow)?;
    }

    Ok(by_date
        .into_iter()
        .map(|(date, (count, recognized_revenue))| PeriodRow {
            date,
            start: None,
            end: None,
            count,
            recognized_revenue,
        })
        .collect())
}
