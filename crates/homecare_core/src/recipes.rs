//! crates/homecare_core/src/recipes.rs
//!
//! Turns mined associations into product clusters that seed recipe drafts.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::domain::{ProductAssociation, ProductInfo, RecipeIngredient};

pub const DEFAULT_CANDIDATE_LIMIT: u32 = 50;

/// Largest number of products one recipe draft is built from.
pub const MAX_CLUSTER_SIZE: usize = 6;

/// Why a cluster produced no draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SkipReason {
    /// Fewer than two products in the cluster have a catalog name.
    InsufficientMetadata,
    /// The synthesizer found no sensible recipe for the combination.
    SynthesizerDeclined,
    /// The same ingredient set was already drafted in this run.
    Duplicate,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::InsufficientMetadata => "insufficient_metadata",
            SkipReason::SynthesizerDeclined => "synthesizer_declined",
            SkipReason::Duplicate => "duplicate",
        }
    }
}

/// Strongest first: lift, then confidence, then product ids for stability.
pub fn by_strength(a: &ProductAssociation, b: &ProductAssociation) -> Ordering {
    b.lift
        .total_cmp(&a.lift)
        .then_with(|| b.confidence.total_cmp(&a.confidence))
        .then_with(|| a.antecedent.cmp(&b.antecedent))
        .then_with(|| a.consequent.cmp(&b.consequent))
}

/// Picks up to `limit` of the strongest associations, keeping one direction
/// per product pair.
pub fn select_candidates(
    associations: &[ProductAssociation],
    limit: usize,
) -> Vec<&ProductAssociation> {
    let mut ranked: Vec<&ProductAssociation> = associations.iter().collect();
    ranked.sort_by(|a, b| by_strength(a, b));

    let mut seen: BTreeSet<(&str, &str)> = BTreeSet::new();
    ranked
        .into_iter()
        .filter(|assoc| {
            let a = assoc.antecedent.as_str();
            let b = assoc.consequent.as_str();
            seen.insert(if a <= b { (a, b) } else { (b, a) })
        })
        .take(limit)
        .collect()
}

/// A group of products that tend to be bought together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductCluster {
    pub antecedent: String,
    pub consequent: String,
    /// The seed pair first, then companions in descending strength.
    pub products: Vec<String>,
}

/// Builds one cluster per selected candidate pair.
///
/// A seed pair {A, B} is extended by every product C for which both A -> C
/// and B -> C exist with lift above 1, strongest first by the weaker of the
/// two lifts, up to `MAX_CLUSTER_SIZE` products.
pub fn build_clusters(associations: &[ProductAssociation], limit: usize) -> Vec<ProductCluster> {
    let mut lifts: HashMap<(&str, &str), f64> = HashMap::new();
    let mut by_antecedent: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for assoc in associations {
        lifts.insert((&assoc.antecedent, &assoc.consequent), assoc.lift);
        by_antecedent
            .entry(&assoc.antecedent)
            .or_default()
            .push(&assoc.consequent);
    }

    select_candidates(associations, limit)
        .into_iter()
        .map(|seed| {
            let a = seed.antecedent.as_str();
            let b = seed.consequent.as_str();

            let mut companions: Vec<(&str, f64)> = by_antecedent
                .get(a)
                .into_iter()
                .flatten()
                .copied()
                .filter(|&c| c != b)
                .filter_map(|c| {
                    let with_a = lifts.get(&(a, c)).copied()?;
                    let with_b = lifts.get(&(b, c)).copied()?;
                    (with_a > 1.0 && with_b > 1.0).then_some((c, with_a.min(with_b)))
                })
                .collect();
            companions.sort_by(|x, y| y.1.total_cmp(&x.1).then_with(|| x.0.cmp(y.0)));

            let mut products = vec![a.to_string(), b.to_string()];
            products.extend(
                companions
                    .into_iter()
                    .take(MAX_CLUSTER_SIZE - 2)
                    .map(|(c, _)| c.to_string()),
            );
            ProductCluster {
                antecedent: a.to_string(),
                consequent: b.to_string(),
                products,
            }
        })
        .collect()
}

/// Resolves catalog names for a cluster, dropping unnamed products.
pub fn ingredients_for(
    cluster: &ProductCluster,
    catalog: &HashMap<String, ProductInfo>,
) -> Result<Vec<RecipeIngredient>, SkipReason> {
    let ingredients: Vec<RecipeIngredient> = cluster
        .products
        .iter()
        .filter_map(|id| {
            let name = catalog.get(id)?.name.as_deref()?.trim();
            (!name.is_empty()).then(|| RecipeIngredient {
                product_id: id.clone(),
                name: name.to_string(),
            })
        })
        .collect();
    if ingredients.len() < 2 {
        return Err(SkipReason::InsufficientMetadata);
    }
    Ok(ingredients)
}
