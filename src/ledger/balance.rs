//! Running balances and period summaries over a member's ledger.
//!
//! Every function here expects entries in ascending `occurred_at` order, the
//! order `LedgerRepository::entries_for_member` returns them in. Ordering is
//! a caller contract: nothing re-sorts, and an unordered input yields an
//! undefined balance sequence.

use chrono::{DateTime, Datelike, Months, TimeZone, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use std::collections::BTreeMap;

use super::models::{LedgerEntry, LedgerEntryWithBalance, TransactionType};
use crate::error::LedgerError;

/// Annotate each entry with the balance right after it.
///
/// Pending and failed entries carry the previous balance forward.
pub fn compute_running_balances(
    entries: impl IntoIterator<Item = LedgerEntry>,
) -> Vec<LedgerEntryWithBalance> {
    let mut balance = Decimal::ZERO;
    entries
        .into_iter()
        .map(|entry| {
            balance += entry.effective_amount();
            LedgerEntryWithBalance {
                entry,
                balance_after: balance,
            }
        })
        .collect()
}

/// Balance made of every completed entry strictly before `instant`
pub fn balance_at(entries: &[LedgerEntry], instant: DateTime<Utc>) -> Decimal {
    entries
        .iter()
        .take_while(|e| e.occurred_at < instant)
        .map(LedgerEntry::effective_amount)
        .sum()
}

/// Percentage change between two period totals
pub fn trend_percent(current: Decimal, previous: Decimal) -> Decimal {
    if previous.is_zero() {
        return if current > Decimal::ZERO {
            Decimal::ONE_HUNDRED
        } else if current < Decimal::ZERO {
            -Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        };
    }

    ((current - previous) / previous * Decimal::ONE_HUNDRED).round_dp(2)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    Month,
    Quarter,
    Custom,
}

/// Half-open reporting window `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Window {
    pub kind: WindowKind,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

fn month_start(year: i32, month: u32) -> Option<DateTime<Utc>> {
    let naive = chrono::NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)?;
    Some(Utc.from_utc_datetime(&naive))
}

impl Window {
    pub fn month(year: i32, month: u32) -> Result<Self, LedgerError> {
        Self::calendar(WindowKind::Month, year, month, 1)
    }

    pub fn quarter(year: i32, quarter: u32) -> Result<Self, LedgerError> {
        if !(1..=4).contains(&quarter) {
            return Err(LedgerError::InvalidWindow(format!(
                "quarter must be between 1 and 4, got {}",
                quarter
            )));
        }
        Self::calendar(WindowKind::Quarter, year, (quarter - 1) * 3 + 1, 3)
    }

    pub fn custom(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, LedgerError> {
        if start >= end {
            return Err(LedgerError::InvalidWindow(format!(
                "window start {} must precede end {}",
                start, end
            )));
        }
        Ok(Self {
            kind: WindowKind::Custom,
            start,
            end,
        })
    }

    fn calendar(kind: WindowKind, year: i32, month: u32, span: u32) -> Result<Self, LedgerError> {
        let start = month_start(year, month)
            .ok_or_else(|| LedgerError::InvalidWindow(format!("no such month: {}-{}", year, month)))?;
        let end = start
            .checked_add_months(Months::new(span))
            .ok_or_else(|| LedgerError::InvalidWindow(format!("year {} out of range", year)))?;
        Ok(Self { kind, start, end })
    }

    /// The window of the same kind immediately before this one
    pub fn previous(&self) -> Option<Window> {
        let start = match self.kind {
            WindowKind::Month => self.start.checked_sub_months(Months::new(1))?,
            WindowKind::Quarter => self.start.checked_sub_months(Months::new(3))?,
            WindowKind::Custom => self.start.checked_sub_signed(self.end - self.start)?,
        };
        Some(Window {
            kind: self.kind,
            start,
            end: self.start,
        })
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }
}

/// Totals for one window, grouped by the requested transaction types
#[derive(Debug, Clone, Serialize)]
pub struct WindowSummary {
    pub window: Window,
    pub buckets: BTreeMap<String, Decimal>,
    /// Completed amounts whose type is not among the requested buckets
    pub other: Decimal,
    pub total: Decimal,
    pub previous_total: Decimal,
    pub trend_percent: Decimal,
}

/// Sum completed amounts per bucket over `window`, and compare the window
/// total with the preceding window of the same kind.
pub fn summarize_by_window(
    entries: &[LedgerEntry],
    window: &Window,
    buckets: &[TransactionType],
) -> WindowSummary {
    let previous = window.previous();

    let mut named: BTreeMap<String, Decimal> = buckets
        .iter()
        .filter(|b| !matches!(b, TransactionType::Other(_)))
        .map(|b| (b.as_str().to_string(), Decimal::ZERO))
        .collect();
    let mut other = Decimal::ZERO;
    let mut total = Decimal::ZERO;
    let mut previous_total = Decimal::ZERO;

    for entry in entries {
        let amount = entry.effective_amount();
        if amount.is_zero() {
            continue;
        }

        if window.contains(entry.occurred_at) {
            total += amount;
            let is_named = !matches!(entry.transaction_type, TransactionType::Other(_))
                && buckets.contains(&entry.transaction_type);
            if is_named {
                *named
                    .entry(entry.transaction_type.as_str().to_string())
                    .or_default() += amount;
            } else {
                other += amount;
            }
        } else if previous.is_some_and(|p| p.contains(entry.occurred_at)) {
            previous_total += amount;
        }
    }

    WindowSummary {
        window: *window,
        buckets: named,
        other,
        total,
        previous_total,
        trend_percent: trend_percent(total, previous_total),
    }
}

/// Interest owed for a quarter on its closing balance.
/// A closing balance at or below zero earns nothing.
pub fn quarterly_interest(
    entries: &[LedgerEntry],
    quarter: &Window,
    annual_rate_percent: Decimal,
) -> Decimal {
    let closing = balance_at(entries, quarter.end);
    if closing <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    (closing * annual_rate_percent / Decimal::ONE_HUNDRED / Decimal::from(4))
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[derive(Debug, Clone, Serialize)]
pub struct StatementLine {
    pub month: u32,
    pub contributions: Decimal,
    pub interest: Decimal,
    /// Magnitude of withdrawals, reported as a positive number
    pub withdrawals: Decimal,
    pub other: Decimal,
    pub closing_balance: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnnualStatement {
    pub year: i32,
    pub opening_balance: Decimal,
    pub closing_balance: Decimal,
    pub lines: Vec<StatementLine>,
}

/// Month-by-month movements and closing balances for a calendar year
pub fn annual_statement(entries: &[LedgerEntry], year: i32) -> Result<AnnualStatement, LedgerError> {
    let year_window = Window::calendar(WindowKind::Custom, year, 1, 12)?;
    let opening_balance = balance_at(entries, year_window.start);

    let mut lines: Vec<StatementLine> = (1..=12)
        .map(|month| StatementLine {
            month,
            contributions: Decimal::ZERO,
            interest: Decimal::ZERO,
            withdrawals: Decimal::ZERO,
            other: Decimal::ZERO,
            closing_balance: Decimal::ZERO,
        })
        .collect();

    let mut net = [Decimal::ZERO; 12];
    for entry in entries.iter().filter(|e| year_window.contains(e.occurred_at)) {
        let amount = entry.effective_amount();
        let month = entry.occurred_at.month0() as usize;
        net[month] += amount;
        let line = &mut lines[month];
        match &entry.transaction_type {
            t if t.is_contribution() => line.contributions += amount,
            TransactionType::Interest => line.interest += amount,
            TransactionType::Withdrawal => line.withdrawals += amount.abs(),
            _ => line.other += amount,
        }
    }

    let mut balance = opening_balance;
    for (line, movement) in lines.iter_mut().zip(net) {
        balance += movement;
        line.closing_balance = balance;
    }

    Ok(AnnualStatement {
        year,
        opening_balance,
        closing_balance: balance,
        lines,
    })
}
