//! crates/homecare_core/src/mining.rs
//!
//! Market-basket mining over purchase history.
//!
//! Purchases are first segmented into shopping sessions per user, then every
//! pair of products that shares a session is scored with support, confidence
//! and lift. Results are exact and deterministic for a given input.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet};

use crate::domain::{ProductAssociation, PurchaseEvent};

/// A maximal run of one user's purchases with no gap above the session gap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShoppingSession {
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub products: BTreeSet<String>,
}

/// Splits events into sessions, starting a new one whenever the time since a
/// user's previous purchase exceeds `gap`.
///
/// Sessions come back ordered by user, then by start time.
pub fn segment_sessions(events: &[PurchaseEvent], gap: Duration) -> Vec<ShoppingSession> {
    let mut by_user: BTreeMap<&str, Vec<&PurchaseEvent>> = BTreeMap::new();
    for event in events {
        by_user.entry(event.user_id.as_str()).or_default().push(event);
    }

    let mut sessions = Vec::new();
    for (user_id, mut user_events) in by_user {
        user_events.sort_by(|a, b| {
            a.occurred_at
                .cmp(&b.occurred_at)
                .then_with(|| a.product_id.cmp(&b.product_id))
        });

        let mut current: Option<ShoppingSession> = None;
        for event in user_events {
            match current.as_mut() {
                Some(session) if event.occurred_at - session.ended_at <= gap => {
                    session.ended_at = event.occurred_at;
                    session.products.insert(event.product_id.clone());
                }
                _ => {
                    if let Some(done) = current.take() {
                        sessions.push(done);
                    }
                    current = Some(ShoppingSession {
                        user_id: user_id.to_string(),
                        started_at: event.occurred_at,
                        ended_at: event.occurred_at,
                        products: BTreeSet::from([event.product_id.clone()]),
                    });
                }
            }
        }
        sessions.extend(current);
    }
    sessions
}

/// Containment counts gathered in one pass over the sessions.
#[derive(Debug, Default)]
struct BasketCounts<'a> {
    total: u64,
    items: BTreeMap<&'a str, u64>,
    /// Keyed by the lexicographically ordered pair.
    pairs: BTreeMap<(&'a str, &'a str), u64>,
}

impl<'a> BasketCounts<'a> {
    fn gather(sessions: &'a [ShoppingSession]) -> Self {
        let mut counts = Self::default();
        for session in sessions {
            counts.total += 1;
            let products: Vec<&str> = session.products.iter().map(String::as_str).collect();
            for (i, &a) in products.iter().enumerate() {
                *counts.items.entry(a).or_default() += 1;
                for &b in &products[i + 1..] {
                    *counts.pairs.entry((a, b)).or_default() += 1;
                }
            }
        }
        counts
    }
}

/// Scores every co-occurring product pair in both directions.
///
/// For `A -> B` over `N` sessions:
/// support = n(A,B) / N, confidence = n(A,B) / n(A) and
/// lift = confidence / (n(B) / N).
///
/// Pairs whose support is below `min_support` are dropped; the values of the
/// pairs that remain are unaffected. Output is sorted by antecedent, then
/// consequent.
pub fn mine_associations(
    sessions: &[ShoppingSession],
    min_support: f64,
) -> Vec<ProductAssociation> {
    let counts = BasketCounts::gather(sessions);
    if counts.total == 0 {
        return Vec::new();
    }
    let total = counts.total as f64;

    let mut associations = Vec::with_capacity(counts.pairs.len() * 2);
    for (&(a, b), &both) in &counts.pairs {
        let support = both as f64 / total;
        if support < min_support {
            continue;
        }
        let count_a = counts.items[a];
        let count_b = counts.items[b];
        // Computed from counts directly so both directions are bit-identical.
        let lift = (both * counts.total) as f64 / (count_a * count_b) as f64;

        associations.push(ProductAssociation {
            antecedent: a.to_string(),
            consequent: b.to_string(),
            support,
            confidence: both as f64 / count_a as f64,
            lift,
        });
        associations.push(ProductAssociation {
            antecedent: b.to_string(),
            consequent: a.to_string(),
            support,
            confidence: both as f64 / count_b as f64,
            lift,
        });
    }

    associations.sort_by(|x, y| {
        x.antecedent
            .cmp(&y.antecedent)
            .then_with(|| x.consequent.cmp(&y.consequent))
    });
    associations
}
