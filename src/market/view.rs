use crate::market::types::{AssetRecord, SortConfig, SortDirection, SortKey};
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Case-insensitive ordering (Unicode lowercase, not locale collation) with a
/// raw tiebreak, so "bitcoin" and "Bitcoin" sit next to each other but still
/// compare deterministically.
fn compare_text(lhs: &str, rhs: &str) -> Ordering {
    lhs.to_lowercase()
        .cmp(&rhs.to_lowercase())
        .then_with(|| lhs.cmp(rhs))
}

fn compare_by_key(lhs: &AssetRecord, rhs: &AssetRecord, key: SortKey) -> Ordering {
    match key {
        SortKey::Name => compare_text(&lhs.name, &rhs.name),
        SortKey::Symbol => compare_text(&lhs.symbol, &rhs.symbol),
        SortKey::CurrentPrice => lhs.current_price.total_cmp(&rhs.current_price),
        SortKey::PriceChange24h => lhs.price_change_24h.total_cmp(&rhs.price_change_24h),
        SortKey::MarketCap => lhs.market_cap.total_cmp(&rhs.market_cap),
        SortKey::Volume24h => lhs.volume_24h.total_cmp(&rhs.volume_24h),
        SortKey::CirculatingSupply => lhs.circulating_supply.total_cmp(&rhs.circulating_supply),
    }
}

pub fn sort_assets(assets: &[AssetRecord], sort: SortConfig) -> Vec<AssetRecord> {
    let mut sorted = assets.to_vec();
    let Some(key) = sort.key else {
        return sorted;
    };

    // `sort_by` is stable; equal keys keep their upstream order in both
    // directions because descending flips the comparator, not the output.
    sorted.sort_by(|lhs, rhs| {
        let ordering = compare_by_key(lhs, rhs, key);
        match sort.direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    });
    sorted
}

pub fn partition_favorites(
    sorted: Vec<AssetRecord>,
    favorites: &BTreeSet<String>,
) -> Vec<AssetRecord> {
    if favorites.is_empty() {
        return sorted;
    }

    let (mut pinned, rest): (Vec<_>, Vec<_>) = sorted
        .into_iter()
        .partition(|asset| favorites.contains(&asset.id));
    pinned.extend(rest);
    pinned
}

pub fn matches_search(asset: &AssetRecord, needle_lowercase: &str) -> bool {
    asset.name.to_lowercase().contains(needle_lowercase)
        || asset.symbol.to_lowercase().contains(needle_lowercase)
}

pub fn filter_by_search(rows: Vec<AssetRecord>, term: &str) -> Vec<AssetRecord> {
    if term.is_empty() {
        return rows;
    }

    let needle = term.to_lowercase();
    rows.into_iter()
        .filter(|asset| matches_search(asset, &needle))
        .collect()
}

/// Sort, pin favorites, then filter. Pure; callers re-run it after every
/// mutation of any input.
pub fn derive_view(
    assets: &[AssetRecord],
    sort: SortConfig,
    favorites: &BTreeSet<String>,
    search_term: &str,
) -> Vec<AssetRecord> {
    let sorted = sort_assets(assets, sort);
    let pinned = partition_favorites(sorted, favorites);
    filter_by_search(pinned, search_term)
}

/// Returns whether `id` is a favorite after the toggle.
pub fn toggle_favorite(favorites: &mut BTreeSet<String>, id: &str) -> bool {
    if favorites.remove(id) {
        false
    } else {
        favorites.insert(id.to_string());
        true
    }
}
