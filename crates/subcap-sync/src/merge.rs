//! Field-level merge of card settings edited on two devices.
//!
//! Last-writer-wins per field, where the "last writer" is whatever was most
//! recently pulled from the server. Maps are unioned with remote entries
//! winning per key; scalar fields take the remote value only when the remote
//! actually provides one.

use std::collections::BTreeSet;
use subcap_core::{CardSettings, SyncData};
use tracing::warn;

// ── Card merge ────────────────────────────────────────────────────────────────

/// Merge one card. If either side is absent the other is returned unchanged.
pub fn merge_card_settings(
    local: Option<&CardSettings>,
    remote: Option<&CardSettings>,
) -> Option<CardSettings> {
    let (local, remote) = match (local, remote) {
        (None, None) => return None,
        (Some(only), None) | (None, Some(only)) => return Some(only.clone()),
        (Some(local), Some(remote)) => (local, remote),
    };

    // Existing keys keep their local position; new remote keys are appended.
    let mut merchant_map = local.merchant_map.clone();
    for (merchant, category) in &remote.merchant_map {
        merchant_map.insert(merchant.clone(), category.clone());
    }

    let mut monthly_totals = local.monthly_totals.clone();
    for (month, totals) in &remote.monthly_totals {
        monthly_totals.insert(month.clone(), totals.clone());
    }

    let selected_categories = match &remote.selected_categories {
        Some(remote) => Some(remote.clone()),
        None => local.selected_categories.clone(),
    };

    let default_category = match remote.default_category.as_deref() {
        Some(remote) if !remote.is_empty() => Some(remote.to_string()),
        _ => local.default_category.clone(),
    };

    Some(CardSettings {
        selected_categories,
        default_category,
        merchant_map,
        monthly_totals,
    })
}

// ── Data merge ────────────────────────────────────────────────────────────────

/// Merge every card present on either side.
pub fn merge_sync_data(local: &SyncData, remote: &SyncData) -> SyncData {
    let names: BTreeSet<&String> = local.cards.keys().chain(remote.cards.keys()).collect();

    let mut merged = SyncData::default();
    for name in names {
        let Some(card) = merge_card_settings(local.cards.get(name), remote.cards.get(name)) else {
            continue;
        };
        if let Err(reason) = card.check_invariants() {
            warn!(card = %name, "merged card violates invariants: {reason}");
        }
        merged.cards.insert(name.clone(), card);
    }
    merged
}
