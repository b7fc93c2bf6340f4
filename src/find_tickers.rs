use crate::exchange::TradingPair;

/// Narrows a venue's listing to the pairs a scan covers: quoted in one of
/// `quote_assets`, ordered by symbol, capped at `max_pairs`.
pub fn select_pairs(
    pairs: Vec<TradingPair>,
    quote_assets: &[String],
    max_pairs: Option<usize>,
) -> Vec<TradingPair> {
    let mut selected: Vec<TradingPair> = pairs
        .into_iter()
        .filter(|p| quote_assets.iter().any(|q| q.eq_ignore_ascii_case(&p.quote)))
        .collect();

    selected.sort_by(|a, b| a.venue_symbol.cmp(&b.venue_symbol));
    selected.dedup_by(|a, b| a.venue_symbol == b.venue_symbol);

    if let Some(max) = max_pairs {
        selected.truncate(max);
    }
    selected
}
