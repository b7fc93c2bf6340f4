//! Server-rendered HTML for the dashboard.

use chrono::{DateTime, Utc};
use std::fmt::Write;

use crate::analysis::ScanRow;
use crate::cache::{CacheLookup, Freshness};
use crate::exchange::ExchangeId;

pub const STALE_NOTICE: &str = "Data temporarily unavailable, showing last known results.";

const STYLE: &str = "body{font-family:system-ui,sans-serif;background:#f9f9f9;padding:20px}\
.container{max-width:1400px;margin:30px auto;background:#fff;border-radius:10px;\
box-shadow:0 4px 10px rgba(0,0,0,.1);padding:20px}\
h1{text-align:center}table{width:100%;border-collapse:collapse}\
th,td{padding:6px 10px;border-bottom:1px solid #eee;text-align:right}\
th:nth-child(2),td:nth-child(2){text-align:left}\
.notice{background:#fff3cd;border:1px solid #ffe69c;padding:10px;border-radius:6px}\
.error{background:#f8d7da;border:1px solid #f1aeb5;padding:10px;border-radius:6px}\
.meta{color:#666}";

pub struct PageView<'a> {
    pub selected: ExchangeId,
    pub lookup: Option<&'a CacheLookup>,
    pub error: Option<&'a str>,
    pub reload_secs: i64,
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn format_time(ts: DateTime<Utc>) -> String {
    ts.format("%d-%m-%Y %H:%M:%S UTC").to_string()
}

fn format_opt(value: Option<f64>, decimals: usize) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{v:.decimals$}"),
        _ => "-".to_string(),
    }
}

fn controls(out: &mut String, selected: ExchangeId) {
    out.push_str(r#"<form method="get" action="/results"><label>Exchange <select name="exchange" onchange="this.form.submit()">"#);
    for id in ExchangeId::ALL {
        let marker = if id == selected { " selected" } else { "" };
        let _ = write!(
            out,
            r#"<option value="{id}"{marker}>{}</option>"#,
            id.as_str().to_ascii_uppercase()
        );
    }
    out.push_str(r#"</select></label> <button type="submit" name="refresh" value="true">Refresh now</button></form>"#);
}

fn row_html(out: &mut String, row: &ScanRow) {
    let macd = row.indicators.macd.map(|m| m.macd);
    let _ = write!(
        out,
        "<tr><td>{}</td><td>{}</td><td>{}</td><td>{:.2}</td><td>{:.2}</td><td>{:.2}</td>\
         <td>{:.2}</td><td>{:.2}</td><td>{:.2}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
        row.rank,
        escape_html(&row.symbol),
        row.last_price,
        row.current_volume,
        row.normal_volume,
        row.volume_ratio,
        row.current_return_pct,
        row.normal_return_pct,
        row.lookback_return_pct,
        format_opt(row.indicators.rsi, 2),
        format_opt(macd, 4),
        format_time(row.candle_time),
    );
}

fn results_table(out: &mut String, rows: &[ScanRow]) {
    out.push_str(
        "<table><thead><tr><th>Rank</th><th>Symbol</th><th>Price</th><th>Current Volume</th>\
         <th>Normal Volume</th><th>Volume Ratio</th><th>Current Return (%)</th>\
         <th>Normal Return (%)</th><th>Lookback Return (%)</th><th>RSI</th><th>MACD</th>\
         <th>Candle Time</th></tr></thead><tbody>",
    );
    if rows.is_empty() {
        out.push_str(r#"<tr><td colspan="12" style="text-align:center">No pairs meeting the criteria found.</td></tr>"#);
    }
    for row in rows {
        row_html(out, row);
    }
    out.push_str("</tbody></table>");
}

pub fn page(view: &PageView<'_>) -> String {
    let mut out = String::with_capacity(16 * 1024);
    let _ = write!(
        out,
        r#"<!DOCTYPE html><html><head><meta charset="UTF-8"><meta name="viewport" content="width=device-width, initial-scale=1.0"><meta http-equiv="refresh" content="{};url=/results?exchange={}"><title>Crypto Scanner Results</title><style>{STYLE}</style></head><body><div class="container"><h1>Crypto Scanner Results</h1>"#,
        view.reload_secs.max(1),
        view.selected,
    );
    controls(&mut out, view.selected);

    if let Some(error) = view.error {
        let _ = write!(out, r#"<p class="error">{}</p>"#, escape_html(error));
    }

    if let Some(lookup) = view.lookup {
        if let Freshness::Stale { reason } = &lookup.freshness {
            let _ = write!(
                out,
                r#"<p class="notice">{STALE_NOTICE} <span class="meta">({})</span></p>"#,
                escape_html(reason)
            );
        }
        let result = &lookup.entry.result;
        let _ = write!(
            out,
            r#"<p class="meta">Last updated: {} &middot; {} of {} pairs ({} failed) ranked by {}</p>"#,
            format_time(lookup.entry.refreshed_at),
            result.rows.len(),
            result.pairs_scanned,
            result.pairs_failed,
            result.rank_by.as_str(),
        );
        results_table(&mut out, &result.rows);
    }

    out.push_str("</div></body></html>");
    out
}
