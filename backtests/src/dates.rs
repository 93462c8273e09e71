//! Relative date rules, holiday calendars and simulation date grids
//!
//! A [`RelativeDateRule`] is a sequence of signed tenor terms such as `"3m"`,
//! `"-1b"` or `"1y6m"`. Units are `d` (calendar days), `b` (business days),
//! `w` (weeks), `m` (months) and `y` (years). Month arithmetic clamps to the
//! end of the month, so 31 January plus `1m` is the last day of February.

use chrono::{Datelike, Duration, Months, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{BacktestError, BacktestResult};

/// Weekends plus an explicit holiday list
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HolidayCalendar {
    #[serde(default)]
    holidays: BTreeSet<NaiveDate>,
}

impl HolidayCalendar {
    pub fn new(holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            holidays: holidays.into_iter().collect(),
        }
    }

    /// Calendar with weekends only
    pub fn weekends() -> Self {
        Self::default()
    }

    pub fn holidays(&self) -> impl Iterator<Item = &NaiveDate> {
        self.holidays.iter()
    }

    pub fn is_business_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }

    /// First business day on or after `date`
    pub fn roll_forward(&self, date: NaiveDate) -> NaiveDate {
        let mut d = date;
        while !self.is_business_day(d) {
            d = d + Duration::days(1);
        }
        d
    }

    /// Last business day on or before `date`
    pub fn roll_backward(&self, date: NaiveDate) -> NaiveDate {
        let mut d = date;
        while !self.is_business_day(d) {
            d = d - Duration::days(1);
        }
        d
    }

    /// Move `count` business days; zero rolls forward onto a business day
    pub fn add_business_days(&self, date: NaiveDate, count: i64) -> NaiveDate {
        if count == 0 {
            return self.roll_forward(date);
        }
        let step = Duration::days(count.signum());
        let mut remaining = count.abs();
        let mut d = date;
        while remaining > 0 {
            d = d + step;
            if self.is_business_day(d) {
                remaining -= 1;
            }
        }
        d
    }
}

/// Unit of one rule term
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DateUnit {
    Day,
    BusinessDay,
    Week,
    Month,
    Year,
}

impl DateUnit {
    fn from_char(c: char) -> Option<Self> {
        match c {
            'd' => Some(DateUnit::Day),
            'b' => Some(DateUnit::BusinessDay),
            'w' => Some(DateUnit::Week),
            'm' => Some(DateUnit::Month),
            'y' => Some(DateUnit::Year),
            _ => None,
        }
    }

    fn as_char(&self) -> char {
        match self {
            DateUnit::Day => 'd',
            DateUnit::BusinessDay => 'b',
            DateUnit::Week => 'w',
            DateUnit::Month => 'm',
            DateUnit::Year => 'y',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuleTerm {
    pub count: i64,
    pub unit: DateUnit,
}

/// Date offset such as `"3m"` or `"-1b"`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelativeDateRule {
    terms: Vec<RuleTerm>,
}

impl RelativeDateRule {
    pub fn terms(&self) -> &[RuleTerm] {
        &self.terms
    }

    /// The rule repeated `k` times, e.g. `"1m"` times 3 is `"3m"`
    pub fn times(&self, k: i64) -> Self {
        Self {
            terms: self
                .terms
                .iter()
                .map(|t| RuleTerm {
                    count: t.count * k,
                    unit: t.unit,
                })
                .collect(),
        }
    }

    pub fn apply(&self, date: NaiveDate, calendar: &HolidayCalendar) -> BacktestResult<NaiveDate> {
        self.terms.iter().try_fold(date, |d, term| {
            let shifted = match term.unit {
                DateUnit::Day => d.checked_add_signed(Duration::days(term.count)),
                DateUnit::BusinessDay => Some(calendar.add_business_days(d, term.count)),
                DateUnit::Week => d.checked_add_signed(Duration::weeks(term.count)),
                DateUnit::Month => add_months(d, term.count),
                DateUnit::Year => term.count.checked_mul(12).and_then(|m| add_months(d, m)),
            };
            shifted.ok_or_else(|| {
                BacktestError::InvalidRule(format!("{} applied to {} is out of range", self, date))
            })
        })
    }
}

fn add_months(date: NaiveDate, months: i64) -> Option<NaiveDate> {
    let n = u32::try_from(months.unsigned_abs()).ok()?;
    if months >= 0 {
        date.checked_add_months(Months::new(n))
    } else {
        date.checked_sub_months(Months::new(n))
    }
}

impl FromStr for RelativeDateRule {
    type Err = BacktestError;

    fn from_str(rule: &str) -> Result<Self, Self::Err> {
        let invalid = || BacktestError::InvalidRule(format!("cannot parse relative date rule {:?}", rule));
        let mut terms = Vec::new();
        let mut chars = rule.trim().chars().peekable();

        while chars.peek().is_some() {
            let negative = match chars.peek() {
                Some('-') => {
                    chars.next();
                    true
                }
                Some('+') => {
                    chars.next();
                    false
                }
                _ => false,
            };

            let mut digits = String::new();
            while let Some(c) = chars.peek().copied().filter(char::is_ascii_digit) {
                digits.push(c);
                chars.next();
            }
            let count: i64 = digits.parse().map_err(|_| invalid())?;

            let unit = chars
                .next()
                .and_then(|c| DateUnit::from_char(c.to_ascii_lowercase()))
                .ok_or_else(invalid)?;

            terms.push(RuleTerm {
                count: if negative { -count } else { count },
                unit,
            });
        }

        if terms.is_empty() {
            return Err(invalid());
        }
        Ok(Self { terms })
    }
}

impl TryFrom<String> for RelativeDateRule {
    type Error = BacktestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RelativeDateRule> for String {
    fn from(rule: RelativeDateRule) -> Self {
        rule.to_string()
    }
}

impl fmt::Display for RelativeDateRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for term in &self.terms {
            write!(f, "{}{}", term.count, term.unit.as_char())?;
        }
        Ok(())
    }
}

/// Spacing of a simulation date grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Frequency {
    /// Every calendar day
    Daily,
    /// Every business day
    BusinessDaily,
    /// Every seventh day from the start
    Weekly,
    MonthEnd,
    BusinessMonthEnd,
    QuarterEnd,
    BusinessQuarterEnd,
    YearEnd,
}

impl Frequency {
    pub fn code(&self) -> &'static str {
        match self {
            Frequency::Daily => "D",
            Frequency::BusinessDaily => "B",
            Frequency::Weekly => "W",
            Frequency::MonthEnd => "M",
            Frequency::BusinessMonthEnd => "BM",
            Frequency::QuarterEnd => "Q",
            Frequency::BusinessQuarterEnd => "BQ",
            Frequency::YearEnd => "Y",
        }
    }
}

impl FromStr for Frequency {
    type Err = BacktestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "D" => Ok(Frequency::Daily),
            "B" => Ok(Frequency::BusinessDaily),
            "W" => Ok(Frequency::Weekly),
            "M" => Ok(Frequency::MonthEnd),
            "BM" => Ok(Frequency::BusinessMonthEnd),
            "Q" => Ok(Frequency::QuarterEnd),
            "BQ" => Ok(Frequency::BusinessQuarterEnd),
            "Y" | "A" => Ok(Frequency::YearEnd),
            other => Err(BacktestError::InvalidRule(format!("unknown frequency {:?}", other))),
        }
    }
}

impl TryFrom<String> for Frequency {
    type Error = BacktestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Frequency> for String {
    fn from(frequency: Frequency) -> Self {
        frequency.code().to_string()
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

fn month_end(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1).and_then(|d| d.pred_opt())
}

/// Period ends of every month between `start` and `end`, filtered to `months`
fn period_ends(
    start: NaiveDate,
    end: NaiveDate,
    months: &[u32],
    adjust: impl Fn(NaiveDate) -> NaiveDate,
) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    let (mut year, mut month) = (start.year(), start.month());
    while (year, month) <= (end.year(), end.month()) {
        if months.contains(&month) {
            if let Some(d) = month_end(year, month).map(&adjust) {
                if d >= start && d <= end {
                    dates.push(d);
                }
            }
        }
        if month == 12 {
            year += 1;
            month = 1;
        } else {
            month += 1;
        }
    }
    dates
}

/// Simulation dates between `start` and `end` inclusive
pub fn date_grid(
    start: NaiveDate,
    end: NaiveDate,
    frequency: Frequency,
    calendar: &HolidayCalendar,
) -> BacktestResult<Vec<NaiveDate>> {
    if start > end {
        return Err(BacktestError::InvalidParameter(format!(
            "start {} is after end {}",
            start, end
        )));
    }

    const ALL_MONTHS: [u32; 12] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12];
    const QUARTER_MONTHS: [u32; 4] = [3, 6, 9, 12];

    let dates = match frequency {
        Frequency::Daily => start.iter_days().take_while(|d| *d <= end).collect(),
        Frequency::BusinessDaily => start
            .iter_days()
            .take_while(|d| *d <= end)
            .filter(|d| calendar.is_business_day(*d))
            .collect(),
        Frequency::Weekly => start.iter_weeks().take_while(|d| *d <= end).collect(),
        Frequency::MonthEnd => period_ends(start, end, &ALL_MONTHS, |d| d),
        Frequency::BusinessMonthEnd => {
            period_ends(start, end, &ALL_MONTHS, |d| calendar.roll_backward(d))
        }
        Frequency::QuarterEnd => period_ends(start, end, &QUARTER_MONTHS, |d| d),
        Frequency::BusinessQuarterEnd => {
            period_ends(start, end, &QUARTER_MONTHS, |d| calendar.roll_backward(d))
        }
        Frequency::YearEnd => period_ends(start, end, &[12], |d| d),
    };
    Ok(dates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_rules() {
        let rule: RelativeDateRule = "3m".parse().unwrap();
        assert_eq!(rule.terms(), &[RuleTerm { count: 3, unit: DateUnit::Month }]);

        let rule: RelativeDateRule = "-1b".parse().unwrap();
        assert_eq!(rule.terms()[0].count, -1);
        assert_eq!(rule.to_string(), "-1b");

        let rule: RelativeDateRule = "1y6m".parse().unwrap();
        assert_eq!(rule.terms().len(), 2);

        for bad in ["", "m", "3x", "3", "--1d", "1.5y"] {
            let err = bad.parse::<RelativeDateRule>().unwrap_err();
            assert!(matches!(err, BacktestError::InvalidRule(_)), "{:?}", bad);
        }
    }

    #[test]
    fn test_apply_rules() {
        let cal = HolidayCalendar::weekends();
        let friday = date(2021, 12, 3);
        let apply = |r: &str, d| r.parse::<RelativeDateRule>().unwrap().apply(d, &cal).unwrap();

        assert_eq!(apply("0d", friday), friday);
        assert_eq!(apply("1b", friday), date(2021, 12, 6));
        assert_eq!(apply("-1b", date(2021, 12, 6)), friday);
        assert_eq!(apply("1w", friday), date(2021, 12, 10));
        assert_eq!(apply("2y", friday), date(2023, 12, 3));
        assert_eq!(apply("1m", date(2021, 1, 31)), date(2021, 2, 28));
        assert_eq!(apply("-3m", date(2021, 5, 31)), date(2021, 2, 28));
    }

    #[test]
    fn test_calendar_holidays() {
        let christmas = date(2021, 12, 24);
        let cal = HolidayCalendar::new([christmas]);
        assert!(!cal.is_business_day(christmas));
        assert_eq!(cal.add_business_days(date(2021, 12, 23), 1), date(2021, 12, 27));
        assert_eq!(cal.roll_backward(date(2021, 12, 26)), date(2021, 12, 23));
        assert_eq!(cal.add_business_days(date(2021, 12, 25), 0), date(2021, 12, 27));
    }

    #[test]
    fn test_frequency_parse() {
        assert_eq!("BM".parse::<Frequency>().unwrap(), Frequency::BusinessMonthEnd);
        assert_eq!("a".parse::<Frequency>().unwrap(), Frequency::YearEnd);
        assert!("H".parse::<Frequency>().is_err());
        let json = serde_json::to_string(&Frequency::QuarterEnd).unwrap();
        assert_eq!(json, "\"Q\"");
    }

    #[test]
    fn test_date_grids() {
        let cal = HolidayCalendar::weekends();
        let start = date(2021, 1, 1);
        let end = date(2021, 12, 31);

        let bm = date_grid(start, end, Frequency::BusinessMonthEnd, &cal).unwrap();
        assert_eq!(bm.len(), 12);
        // 31 July 2021 is a Saturday
        assert_eq!(bm[6], date(2021, 7, 30));

        let q = date_grid(start, end, Frequency::QuarterEnd, &cal).unwrap();
        assert_eq!(q, vec![date(2021, 3, 31), date(2021, 6, 30), date(2021, 9, 30), date(2021, 12, 31)]);

        let b = date_grid(date(2021, 12, 1), date(2021, 12, 7), Frequency::BusinessDaily, &cal).unwrap();
        assert_eq!(b.len(), 5);

        let w = date_grid(date(2021, 12, 1), date(2021, 12, 31), Frequency::Weekly, &cal).unwrap();
        assert_eq!(w.len(), 5);

        assert_eq!(date_grid(start, end, Frequency::YearEnd, &cal).unwrap(), vec![end]);
        assert!(date_grid(end, start, Frequency::Daily, &cal).is_err());
    }

    proptest! {
        #[test]
        fn prop_business_grid_sorted_and_open(offset in 0i64..2000, len in 0i64..120) {
            let cal = HolidayCalendar::weekends();
            let start = date(2015, 1, 1) + Duration::days(offset);
            let end = start + Duration::days(len);
            let grid = date_grid(start, end, Frequency::BusinessDaily, &cal).unwrap();
            prop_assert!(grid.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(grid.iter().all(|d| cal.is_business_day(*d) && *d >= start && *d <= end));
        }

        #[test]
        fn prop_business_day_round_trip(offset in 0i64..2000, n in 1i64..30) {
            let cal = HolidayCalendar::weekends();
            let d = cal.roll_forward(date(2015, 1, 1) + Duration::days(offset));
            let there = cal.add_business_days(d, n);
            prop_assert_eq!(cal.add_business_days(there, -n), d);
        }
    }
}
