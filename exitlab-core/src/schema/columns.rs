//! Column groups: the compile-time field sets records are assembled from.
//!
//! Each group is declared once and expands to a struct with one typed field
//! per column plus the group's ordered column definitions. Shapes are unions
//! of groups (see `SchemaShape::columns`).

use super::value::{FieldCodec, FieldValue};
use super::{ColumnDef, ColumnType, SchemaError};

macro_rules! column_group {
    (
        $(#[$meta:meta])*
        $name:ident, $columns:ident {
            $( $field:ident : $ty:ty => $col:literal, $kind:ident, $nullable:literal, $desc:literal; )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name {
            $( pub $field: $ty, )+
        }

        pub const $columns: &[ColumnDef] = &[
            $( ColumnDef {
                name: $col,
                kind: ColumnType::$kind,
                nullable: $nullable,
                description: $desc,
            }, )+
        ];

        impl $name {
            /// Build the group by resolving each column through `resolve`.
            pub(crate) fn resolve(
                resolve: &mut dyn FnMut(&'static str) -> FieldValue,
            ) -> Result<Self, SchemaError> {
                Ok(Self {
                    $( $field: decode_column::<$ty>($col, ColumnType::$kind, resolve($col))?, )+
                })
            }

            /// Value of a column in this group, if the group owns it.
            pub fn get(&self, column: &str) -> Option<FieldValue> {
                match column {
                    $( $col => Some(FieldCodec::encode(&self.$field)), )+
                    _ => None,
                }
            }

            /// Append `(column, value)` pairs in declared order.
            pub fn push_values(&self, out: &mut Vec<(&'static str, FieldValue)>) {
                $( out.push(($col, FieldCodec::encode(&self.$field))); )+
            }
        }
    };
}

fn decode_column<T: FieldCodec>(
    column: &'static str,
    kind: ColumnType,
    value: FieldValue,
) -> Result<T, SchemaError> {
    // Numeric seconds on a duration column are formatted, not stringified.
    let value = match (kind, value) {
        (ColumnType::Duration, FieldValue::Int(secs)) => FieldValue::Duration(secs),
        (ColumnType::Duration, FieldValue::Float(secs)) if secs.is_finite() => {
            FieldValue::Duration(secs.round() as i64)
        }
        (_, value) => value,
    };
    T::decode(&value).ok_or_else(|| SchemaError::InvalidValue {
        column,
        value: value.to_string(),
        found: value.type_name(),
    })
}

column_group! {
    /// Performance metrics shared by every shape.
    BaseMetrics, BASE_COLUMNS {
        ticker: String => "Ticker", Text, false, "Subject identifier the sweep ran against";
        strategy_type: String => "Strategy Type", Text, false, "Entry strategy family (SMA, EMA, MACD)";
        short_window: i64 => "Short Window", Integer, false, "Fast moving-average period of the entry";
        long_window: i64 => "Long Window", Integer, false, "Slow moving-average period of the entry";
        signal_window: i64 => "Signal Window", Integer, false, "Signal-line period (0 when unused)";
        signal_entry: bool => "Signal Entry", Boolean, false, "Entry signal present on the last bar";
        signal_exit: bool => "Signal Exit", Boolean, false, "Exit signal present on the last bar";
        total_open_trades: i64 => "Total Open Trades", Integer, false, "Trades still open at the end of the window";
        total_trades: i64 => "Total Trades", Integer, false, "Closed plus open trades";
        score: f64 => "Score", Float, false, "Composite ranking score";
        win_rate_pct: f64 => "Win Rate [%]", Float, false, "Share of winning closed trades";
        profit_factor: f64 => "Profit Factor", Float, false, "Gross profit over gross loss";
        expectancy_per_trade: f64 => "Expectancy per Trade", Float, false, "Mean return per closed trade";
        sortino_ratio: f64 => "Sortino Ratio", Float, false, "Return over downside deviation";
        beats_bnh_pct: f64 => "Beats BNH [%]", Float, false, "Excess return over buy-and-hold";
        avg_trade_duration: String => "Avg Trade Duration", Duration, false, "Mean holding time";
        trades_per_day: f64 => "Trades Per Day", Float, false, "Trade frequency per day";
        trades_per_month: f64 => "Trades per Month", Float, false, "Trade frequency per month";
        signals_per_month: f64 => "Signals per Month", Float, false, "Signal frequency per month";
        expectancy_per_month: f64 => "Expectancy per Month", Float, false, "Expectancy scaled by monthly trade count";
        start: Option<String> => "Start", Timestamp, true, "First bar of the backtest window";
        end: Option<String> => "End", Timestamp, true, "Last bar of the backtest window";
        period: String => "Period", Duration, false, "Length of the backtest window";
        start_value: f64 => "Start Value", Float, false, "Portfolio value at the start";
        end_value: f64 => "End Value", Float, false, "Portfolio value at the end";
        total_return_pct: f64 => "Total Return [%]", Float, false, "Total return over the window";
        benchmark_return_pct: f64 => "Benchmark Return [%]", Float, false, "Buy-and-hold return over the window";
        max_gross_exposure_pct: f64 => "Max Gross Exposure [%]", Float, false, "Peak gross exposure";
        total_fees_paid: f64 => "Total Fees Paid", Float, false, "Fees across all orders";
        max_drawdown_pct: f64 => "Max Drawdown [%]", Float, false, "Largest peak-to-trough decline";
        max_drawdown_duration: String => "Max Drawdown Duration", Duration, false, "Longest drawdown";
        total_closed_trades: i64 => "Total Closed Trades", Integer, false, "Closed trades";
        open_trade_pnl: f64 => "Open Trade PnL", Float, false, "Unrealized PnL of open trades";
        best_trade_pct: f64 => "Best Trade [%]", Float, false, "Best closed trade";
        worst_trade_pct: f64 => "Worst Trade [%]", Float, false, "Worst closed trade";
        avg_winning_trade_pct: f64 => "Avg Winning Trade [%]", Float, false, "Mean winning trade";
        avg_losing_trade_pct: f64 => "Avg Losing Trade [%]", Float, false, "Mean losing trade";
        avg_winning_trade_duration: String => "Avg Winning Trade Duration", Duration, false, "Mean holding time of winners";
        avg_losing_trade_duration: String => "Avg Losing Trade Duration", Duration, false, "Mean holding time of losers";
        sharpe_ratio: f64 => "Sharpe Ratio", Float, false, "Annualized return over volatility";
        calmar_ratio: f64 => "Calmar Ratio", Float, false, "Annualized return over max drawdown";
        omega_ratio: f64 => "Omega Ratio", Float, false, "Probability-weighted gains over losses";
        skew: f64 => "Skew", Float, false, "Skewness of daily returns";
        kurtosis: f64 => "Kurtosis", Float, false, "Excess kurtosis of daily returns";
        tail_ratio: f64 => "Tail Ratio", Float, false, "95th over 5th percentile return";
        common_sense_ratio: f64 => "Common Sense Ratio", Float, false, "Tail ratio times profit factor";
        value_at_risk: f64 => "Value at Risk", Float, false, "5% daily value at risk";
        annualized_return: f64 => "Annualized Return", Float, false, "Geometric annual return";
        annualized_volatility: f64 => "Annualized Volatility", Float, false, "Annualized standard deviation";
        signal_count: i64 => "Signal Count", Integer, false, "Entry plus exit signals";
        position_count: i64 => "Position Count", Integer, false, "Positions opened";
        total_period: f64 => "Total Period", Float, false, "Window length in days";
    }
}

column_group! {
    /// Exit-stop parameters tagged onto stop-sweep records.
    StopParams, STOP_COLUMNS {
        stop_length: i64 => "Stop Length", Integer, false, "Lookback of the volatility stop";
        stop_multiplier: f64 => "Stop Multiplier", Float, false, "Volatility multiple of the stop distance";
    }
}

column_group! {
    /// Live-position metadata. Always null in analysis exports.
    PositionFields, POSITION_COLUMNS {
        allocation_pct: Option<f64> => "Allocation [%]", Float, true, "Capital allocated to the position";
        stop_loss_pct: Option<f64> => "Stop Loss [%]", Float, true, "Stop-loss distance of the position";
        last_position_open_date: Option<String> => "Last Position Open Date", Timestamp, true, "When the latest position opened";
        last_position_close_date: Option<String> => "Last Position Close Date", Timestamp, true, "When the latest position closed";
    }
}

column_group! {
    /// Leading label of filtered exports (which metric a row was selected by).
    MetricLabel, METRIC_COLUMNS {
        metric_type: String => "Metric Type", Text, false, "Metric the row was selected for";
    }
}

impl PositionFields {
    /// All-null position metadata.
    pub fn empty() -> Self {
        Self {
            allocation_pct: None,
            stop_loss_pct: None,
            last_position_open_date: None,
            last_position_close_date: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn group_sizes() {
        assert_eq!(BASE_COLUMNS.len(), 52);
        assert_eq!(STOP_COLUMNS.len(), 2);
        assert_eq!(POSITION_COLUMNS.len(), 4);
        assert_eq!(METRIC_COLUMNS.len(), 1);
    }

    #[test]
    fn column_names_are_unique_across_groups() {
        let mut seen = HashSet::new();
        for def in BASE_COLUMNS
            .iter()
            .chain(STOP_COLUMNS)
            .chain(POSITION_COLUMNS)
            .chain(METRIC_COLUMNS)
        {
            assert!(seen.insert(def.name), "duplicate column {}", def.name);
        }
    }

    #[test]
    fn resolve_reports_bad_values() {
        let err = StopParams::resolve(&mut |col| match col {
            "Stop Length" => FieldValue::Text("abc".into()),
            _ => FieldValue::Float(2.0),
        })
        .unwrap_err();
        assert!(matches!(
            err,
            SchemaError::InvalidValue {
                column: "Stop Length",
                ..
            }
        ));
    }

    #[test]
    fn numeric_seconds_become_duration_strings() {
        assert_eq!(
            decode_column::<String>("Period", ColumnType::Duration, FieldValue::Int(86_400))
                .unwrap(),
            "1 days 00:00:00"
        );
        assert_eq!(
            decode_column::<String>("Period", ColumnType::Duration, FieldValue::Float(90.4))
                .unwrap(),
            "0 days 00:01:30"
        );
        assert_eq!(
            decode_column::<String>("Ticker", ColumnType::Text, FieldValue::Int(86_400)).unwrap(),
            "86400"
        );
    }

    #[test]
    fn push_values_follows_declared_order() {
        let stop = StopParams {
            stop_length: 14,
            stop_multiplier: 2.5,
        };
        let mut out = Vec::new();
        stop.push_values(&mut out);
        assert_eq!(
            out,
            vec![
                ("Stop Length", FieldValue::Int(14)),
                ("Stop Multiplier", FieldValue::Float(2.5)),
            ]
        );
        assert_eq!(stop.get("Stop Multiplier"), Some(FieldValue::Float(2.5)));
        assert_eq!(stop.get("Ticker"), None);
    }
}
