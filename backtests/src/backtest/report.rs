//! Tabular views of a finished backtest

use chrono::NaiveDate;
use indexmap::IndexMap;

use mq_risk::{Cell, DataFrame, Instrument};

use crate::error::BacktestResult;

use super::objects::{BackTest, PaymentKind};

const TRANSACTION_COSTS: &str = "Transaction Costs";
const TOTAL: &str = "Total";

#[derive(Debug)]
struct LedgerEntry {
    open: NaiveDate,
    close: Option<NaiveDate>,
    open_value: Option<f64>,
    close_value: Option<f64>,
    short: bool,
}

impl BackTest {
    /// One row per simulation date: each measure, cumulative cash,
    /// cumulative transaction costs and the total value
    ///
    /// A measure that fails to aggregate shows its error and leaves the
    /// total empty.
    pub fn result_summary(&self) -> BacktestResult<DataFrame> {
        let cash_column = format!("Cumulative Cash {}", self.cash_currency());
        let mut columns = vec!["date".to_string()];
        columns.extend(self.risks().iter().map(|r| r.to_string()));
        columns.push(cash_column);
        columns.push(TRANSACTION_COSTS.to_string());
        columns.push(TOTAL.to_string());

        let costs = self.transaction_costs();
        let price = self.risks().iter().find(|r| r.is_price()).cloned();
        let mut cumulative_cost = 0.0;
        let mut frame = DataFrame::new(columns);

        for state in self.states() {
            let mut row = vec![Cell::Date(*state)];
            let mut price_value = Some(0.0);
            for risk in self.risks() {
                let cell = match self.risk_value(*state, risk) {
                    Ok(value) => {
                        let value = value.unwrap_or(0.0);
                        if price.as_ref() == Some(risk) {
                            price_value = Some(value);
                        }
                        Cell::Number(value)
                    }
                    Err(e) => {
                        if price.as_ref() == Some(risk) {
                            price_value = None;
                        }
                        Cell::text(e.to_string())
                    }
                };
                row.push(cell);
            }

            let cash = self.cash_dict().get(state).copied().unwrap_or(0.0);
            cumulative_cost += costs.get(state).copied().unwrap_or(0.0);
            row.push(Cell::Number(cash));
            row.push(Cell::Number(-cumulative_cost));
            row.push(match price_value {
                Some(value) => Cell::Number(value + cash - cumulative_cost),
                None => Cell::Empty,
            });
            frame.push(row)?;
        }
        Ok(frame.with_index(["date"]))
    }

    /// One row per trade that changed hands: open and close dates and
    /// values, direction, status and realised PnL
    pub fn trade_ledger(&self) -> BacktestResult<DataFrame> {
        let mut entries: IndexMap<String, LedgerEntry> = IndexMap::new();
        for payments in self.cash_payments().values() {
            for payment in payments {
                let value = payment.amount.map(|a| a * payment.direction);
                match payment.kind {
                    PaymentKind::Open => {
                        entries.insert(
                            payment.trade_name().to_string(),
                            LedgerEntry {
                                open: payment.effective_date,
                                close: None,
                                open_value: value,
                                close_value: None,
                                short: is_short(&payment.trade),
                            },
                        );
                    }
                    PaymentKind::Close => {
                        if let Some(entry) = entries.get_mut(payment.trade_name()) {
                            entry.close = Some(payment.effective_date);
                            entry.close_value = value;
                        }
                    }
                }
            }
        }

        let mut frame = DataFrame::new([
            "Trade Name",
            "Open",
            "Close",
            "Open Value",
            "Close Value",
            "Long/Short",
            "Status",
            "Trade PnL",
        ]);
        for (name, entry) in entries {
            let number = |v: Option<f64>| v.map_or(Cell::Empty, Cell::Number);
            let pnl = match (entry.open_value, entry.close_value) {
                (Some(open), Some(close)) => Some(close - open),
                _ => None,
            };
            frame.push(vec![
                Cell::text(name),
                Cell::Date(entry.open),
                entry.close.map_or(Cell::Empty, Cell::Date),
                number(entry.open_value),
                number(entry.close_value),
                Cell::text(if entry.short { "Short" } else { "Long" }),
                Cell::text(if entry.close.is_some() { "closed" } else { "open" }),
                number(pnl),
            ])?;
        }
        Ok(frame.with_index(["Trade Name"]))
    }
}

fn is_short(trade: &Instrument) -> bool {
    trade.text("buy_sell") == Some("Sell")
        || trade
            .scaling_property()
            .and_then(|p| trade.number(p))
            .map_or(false, |size| size < 0.0)
}
