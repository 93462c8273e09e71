//! Triggers: per-date predicates that fire actions
//!
//! A [`Trigger`] pairs [`TriggerRequirements`] with the actions fired when
//! the requirements hold. Requirements that only look at dates or external
//! market data can be evaluated for every date up front; requirements that
//! read the backtest's own results are path dependent and are evaluated day
//! by day.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use mq_risk::RiskMeasure;

use crate::actions::Action;
use crate::backtest::objects::BackTest;
use crate::dates::{HolidayCalendar, RelativeDateRule};
use crate::error::{BacktestError, BacktestResult};

/// How much of the simulation an action or trigger depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalcType {
    /// Independent of earlier dates; batched up front
    Simple,
    /// Batched, then one sequential scaling step
    SemiPathDependent,
    /// Evaluated date by date
    PathDependent,
}

/// Comparison of an observed value against a level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerDirection {
    Above,
    Below,
    Equal,
}

impl TriggerDirection {
    pub fn holds(&self, value: f64, level: f64) -> bool {
        match self {
            TriggerDirection::Above => value > level,
            TriggerDirection::Below => value < level,
            TriggerDirection::Equal => (value - level).abs() <= f64::EPSILON * level.abs().max(1.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMode {
    All,
    Any,
}

/// Condition under which a trigger fires
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TriggerRequirements {
    /// Every `frequency` from `start` (default: first simulation date) to
    /// `end` (default: last); fires on the first simulation date on or
    /// after each scheduled date
    Periodic {
        #[serde(default)]
        start: Option<NaiveDate>,
        #[serde(default)]
        end: Option<NaiveDate>,
        frequency: RelativeDateRule,
    },
    /// On listed dates
    Dates { dates: Vec<NaiveDate> },
    /// When an observed market series crosses a level
    Mkt {
        data: BTreeMap<NaiveDate, f64>,
        direction: TriggerDirection,
        level: f64,
    },
    /// When the backtest's own aggregated risk crosses a level
    StrategyRisk {
        risk: RiskMeasure,
        direction: TriggerDirection,
        level: f64,
    },
    /// Combination of other requirements
    Aggregate {
        triggers: Vec<TriggerRequirements>,
        mode: AggregationMode,
    },
    /// Negation of another requirement
    Not { trigger: Box<TriggerRequirements> },
}

impl TriggerRequirements {
    pub fn periodic(frequency: RelativeDateRule) -> Self {
        TriggerRequirements::Periodic {
            start: None,
            end: None,
            frequency,
        }
    }

    pub fn dates(dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        TriggerRequirements::Dates {
            dates: dates.into_iter().collect(),
        }
    }

    pub fn calc_type(&self) -> CalcType {
        match self {
            TriggerRequirements::StrategyRisk { .. } => CalcType::PathDependent,
            TriggerRequirements::Aggregate { triggers, .. } => triggers
                .iter()
                .map(TriggerRequirements::calc_type)
                .max()
                .unwrap_or(CalcType::Simple),
            TriggerRequirements::Not { trigger } => trigger.calc_type(),
            _ => CalcType::Simple,
        }
    }

    /// Measures read from the backtest's results
    pub fn risks(&self) -> Vec<RiskMeasure> {
        match self {
            TriggerRequirements::StrategyRisk { risk, .. } => vec![risk.clone()],
            TriggerRequirements::Aggregate { triggers, .. } => {
                triggers.iter().flat_map(TriggerRequirements::risks).collect()
            }
            TriggerRequirements::Not { trigger } => trigger.risks(),
            _ => Vec::new(),
        }
    }

    pub fn has_triggered(
        &self,
        date: NaiveDate,
        backtest: &BackTest,
        calendar: &HolidayCalendar,
    ) -> BacktestResult<bool> {
        match self {
            TriggerRequirements::Periodic {
                start,
                end,
                frequency,
            } => {
                let states = backtest.states();
                let (first, last) = match (states.first(), states.last()) {
                    (Some(f), Some(l)) => (*f, *l),
                    _ => return Ok(false),
                };
                let start = start.unwrap_or(first);
                let end = end.unwrap_or(last);
                for scheduled in periodic_schedule(start, end, frequency, calendar)? {
                    if let Some(state) = states.iter().find(|s| **s >= scheduled) {
                        if *state == date {
                            return Ok(true);
                        }
                        if *state > date {
                            break;
                        }
                    }
                }
                Ok(false)
            }
            TriggerRequirements::Dates { dates } => Ok(dates.contains(&date)),
            TriggerRequirements::Mkt {
                data,
                direction,
                level,
            } => Ok(data.get(&date).map_or(false, |v| direction.holds(*v, *level))),
            TriggerRequirements::StrategyRisk {
                risk,
                direction,
                level,
            } => Ok(backtest
                .risk_value(date, risk)?
                .map_or(false, |v| direction.holds(v, *level))),
            TriggerRequirements::Aggregate { triggers, mode } => {
                if triggers.is_empty() {
                    return Ok(false);
                }
                for t in triggers {
                    let fired = t.has_triggered(date, backtest, calendar)?;
                    match mode {
                        AggregationMode::All if !fired => return Ok(false),
                        AggregationMode::Any if fired => return Ok(true),
                        _ => {}
                    }
                }
                Ok(matches!(mode, AggregationMode::All))
            }
            TriggerRequirements::Not { trigger } => {
                Ok(!trigger.has_triggered(date, backtest, calendar)?)
            }
        }
    }
}

/// Dates `start + k * frequency` up to `end`
pub fn periodic_schedule(
    start: NaiveDate,
    end: NaiveDate,
    frequency: &RelativeDateRule,
    calendar: &HolidayCalendar,
) -> BacktestResult<Vec<NaiveDate>> {
    let mut schedule = Vec::new();
    let mut k = 0;
    loop {
        let date = frequency.times(k).apply(start, calendar)?;
        if date > end {
            break;
        }
        if let Some(previous) = schedule.last() {
            if date <= *previous {
                return Err(BacktestError::InvalidRule(format!(
                    "periodic frequency {} does not move forward",
                    frequency
                )));
            }
        }
        schedule.push(date);
        k += 1;
    }
    Ok(schedule)
}

/// Requirements plus the actions they fire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub requirements: TriggerRequirements,
    pub actions: Vec<Action>,
}

impl Trigger {
    pub fn new(requirements: TriggerRequirements, actions: Vec<Action>) -> Self {
        Self {
            requirements,
            actions,
        }
    }

    pub fn calc_type(&self) -> CalcType {
        self.requirements.calc_type()
    }

    /// Measures the trigger and its actions read
    pub fn risks(&self) -> Vec<RiskMeasure> {
        let mut risks = self.requirements.risks();
        risks.extend(self.actions.iter().filter_map(|a| a.risk().cloned()));
        risks
    }

    pub fn has_triggered(
        &self,
        date: NaiveDate,
        backtest: &BackTest,
        calendar: &HolidayCalendar,
    ) -> BacktestResult<bool> {
        self.requirements.has_triggered(date, backtest, calendar)
    }

    /// Simulation dates on which the trigger fires
    pub fn triggered_dates(
        &self,
        backtest: &BackTest,
        calendar: &HolidayCalendar,
    ) -> BacktestResult<Vec<NaiveDate>> {
        let mut dates = Vec::new();
        for state in backtest.states() {
            if self.has_triggered(*state, backtest, calendar)? {
                dates.push(*state);
            }
        }
        Ok(dates)
    }
}
