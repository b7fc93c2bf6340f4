use chrono::{DateTime, Utc};
use comfy_table::{
    Attribute, Cell, CellAlignment, Color, ContentArrangement, Table, modifiers::UTF8_ROUND_CORNERS,
    presets::UTF8_BORDERS_ONLY,
};

use crate::analysis::ScanResult;

/// Rows further down the ranking fade towards 40% brightness.
fn get_visibility_ratio(current: f64, top: f64) -> f64 {
    if top <= 0.0 {
        1.0
    } else {
        (0.4 + 0.6 * (current / top)).clamp(0.4, 1.0)
    }
}

/// Brightness per printed row, scaled between the lowest and highest ranking
/// key among them.
fn row_brightness(result: &ScanResult, top: usize) -> Vec<f64> {
    let keys: Vec<Option<f64>> = result
        .rows
        .iter()
        .take(top)
        .map(|row| result.rank_by.key(row))
        .collect();
    let low = keys.iter().flatten().copied().fold(f64::INFINITY, f64::min);
    let high = keys.iter().flatten().copied().fold(f64::NEG_INFINITY, f64::max);

    keys.into_iter()
        .map(|key| match key {
            Some(k) if high > low => get_visibility_ratio(k - low, high - low),
            Some(_) => 1.0,
            None => 0.4,
        })
        .collect()
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%d-%m-%Y %H:%M:%S").to_string()
}

fn format_opt(value: Option<f64>, decimals: usize) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{v:.decimals$}"),
        _ => "-".to_string(),
    }
}

pub fn build_table(result: &ScanResult, top: usize) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Rank").add_attribute(Attribute::Bold),
            Cell::new("Pair").add_attribute(Attribute::Bold),
            Cell::new("Price").add_attribute(Attribute::Bold).set_alignment(CellAlignment::Right),
            Cell::new("Vol Ratio").add_attribute(Attribute::Bold).set_alignment(CellAlignment::Right),
            Cell::new("Return (%)").add_attribute(Attribute::Bold).set_alignment(CellAlignment::Right),
            Cell::new("Lookback (%)").add_attribute(Attribute::Bold).set_alignment(CellAlignment::Right),
            Cell::new("RSI").add_attribute(Attribute::Bold).set_alignment(CellAlignment::Right),
            Cell::new("MACD").add_attribute(Attribute::Bold).set_alignment(CellAlignment::Right),
        ]);

    let brightness = row_brightness(result, top);

    for (row, ratio) in result.rows.iter().take(top).zip(brightness) {
        let cyan_val = (255.0 * ratio) as u8;
        let green_val = (255.0 * ratio) as u8;

        let return_color = if row.current_return_pct >= 0.0 {
            Color::Rgb { r: 0, g: green_val, b: 0 }
        } else {
            Color::Rgb { r: green_val, g: 0, b: 0 }
        };

        table.add_row(vec![
            Cell::new(row.rank).fg(Color::DarkGrey),
            Cell::new(&row.symbol).fg(Color::Rgb { r: 0, g: cyan_val, b: cyan_val }),
            Cell::new(row.last_price).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.2}x", row.volume_ratio))
                .fg(Color::Rgb { r: 0, g: cyan_val, b: cyan_val })
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.2}", row.current_return_pct))
                .fg(return_color)
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.2}", row.lookback_return_pct)).set_alignment(CellAlignment::Right),
            Cell::new(format_opt(row.indicators.rsi, 2)).set_alignment(CellAlignment::Right),
            Cell::new(format_opt(row.indicators.macd.map(|m| m.macd), 4))
                .set_alignment(CellAlignment::Right),
        ]);
    }

    table
}

pub fn print(result: &ScanResult, top: usize) {
    let title = format!(
        "{} · {} pairs scanned, {} failed (Data taken at {} UTC)",
        result.exchange.as_str().to_ascii_uppercase(),
        result.pairs_scanned,
        result.pairs_failed,
        format_timestamp(result.finished_at),
    );

    if result.rows.is_empty() {
        println!("\n{}\nNo pairs meeting the criteria found.", title);
        return;
    }

    println!("\n{}\n{}", title, build_table(result, top));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{RankBy, ScanRow};
    use crate::exchange::ExchangeId;
    use crate::indicators::IndicatorSnapshot;

    fn result(n: usize) -> ScanResult {
        let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        ScanResult {
            exchange: ExchangeId::Binance,
            started_at: at,
            finished_at: at,
            rank_by: RankBy::VolumeRatio,
            pairs_scanned: n,
            pairs_failed: 0,
            rows: (0..n)
                .map(|i| ScanRow {
                    rank: i + 1,
                    symbol: format!("T{i}/USDT"),
                    last_price: 1.0,
                    current_volume: 10.0,
                    normal_volume: 5.0,
                    volume_ratio: (n - i) as f64,
                    current_return_pct: -1.0,
                    normal_return_pct: 0.0,
                    lookback_return_pct: 4.0,
                    ticker_volume: None,
                    indicators: IndicatorSnapshot::default(),
                    candle_time: at,
                })
                .collect(),
        }
    }

    #[test]
    fn visibility_ratio_is_bounded() {
        assert_eq!(get_visibility_ratio(10.0, 10.0), 1.0);
        assert_eq!(get_visibility_ratio(0.0, 10.0), 0.4);
        assert_eq!(get_visibility_ratio(-5.0, 10.0), 0.4);
        assert_eq!(get_visibility_ratio(3.0, 0.0), 1.0);
    }

    #[test]
    fn brightness_follows_the_ranking_key() {
        let mut result = result(3);
        result.rank_by = RankBy::CurrentReturn;
        for (row, ret) in result.rows.iter_mut().zip([-5.0, -1.0, 3.0]) {
            row.current_return_pct = ret;
        }
        result.rows.reverse();

        let shades = row_brightness(&result, 3);
        assert_eq!(shades, vec![1.0, 0.4 + 0.6 * 0.5, 0.4]);
    }

    #[test]
    fn rows_missing_the_key_are_dimmest() {
        let mut result = result(2);
        result.rank_by = RankBy::Rsi;
        result.rows[0].indicators.rsi = Some(70.0);

        assert_eq!(row_brightness(&result, 2), vec![1.0, 0.4]);
    }

    #[test]
    fn table_is_capped_at_top() {
        let table = build_table(&result(20), 15);
        assert_eq!(table.row_iter().count(), 15);
        let rendered = table.to_string();
        assert!(rendered.contains("T0/USDT"));
        assert!(!rendered.contains("T15/USDT"));
    }
}
