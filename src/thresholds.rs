use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::markets::{Market, MatchRecord, Tier};

/// One optimized decision cell. Wire names are kept byte-compatible
/// with the historical threshold files so existing artifacts still load.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdEntry {
    #[serde(rename = "umbral_prob")]
    pub min_prob: f64,
    #[serde(rename = "margen")]
    pub min_edge: f64,
    #[serde(rename = "apuestas")]
    pub bets: usize,
    pub roi: f64,
}

/// Grid searched for one risk tier. Probability and edge axes are
/// produced by integer stepping so the cells are reproducible.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TierGrid {
    pub prob_lo: f64,
    pub prob_hi: f64,
    pub prob_step: f64,
    pub edge_lo: f64,
    pub edge_hi: f64,
    pub edge_step: f64,
    /// A cell with fewer qualifying bets than this is never selected.
    pub min_bets: usize,
}

impl TierGrid {
    pub fn prob_axis(&self) -> Vec<f64> {
        axis(self.prob_lo, self.prob_hi, self.prob_step)
    }

    pub fn edge_axis(&self) -> Vec<f64> {
        axis(self.edge_lo, self.edge_hi, self.edge_step)
    }
}

fn axis(lo: f64, hi: f64, step: f64) -> Vec<f64> {
    let steps = ((hi - lo) / step).round() as usize;
    (0..=steps).map(|k| lo + k as f64 * step).collect()
}

pub static TIER_GRIDS: Lazy<BTreeMap<Tier, TierGrid>> = Lazy::new(|| {
    BTreeMap::from([
        (
            Tier::Conservative,
            TierGrid {
                prob_lo: 0.55,
                prob_hi: 0.80,
                prob_step: 0.01,
                edge_lo: 0.025,
                edge_hi: 0.10,
                edge_step: 0.005,
                min_bets: 10,
            },
        ),
        (
            Tier::Moderate,
            TierGrid {
                prob_lo: 0.50,
                prob_hi: 0.70,
                prob_step: 0.01,
                edge_lo: 0.0,
                edge_hi: 0.10,
                edge_step: 0.005,
                min_bets: 20,
            },
        ),
        (
            Tier::Aggressive,
            TierGrid {
                prob_lo: 0.40,
                prob_hi: 0.60,
                prob_step: 0.01,
                edge_lo: -0.05,
                edge_hi: 0.05,
                edge_step: 0.005,
                min_bets: 30,
            },
        ),
    ])
});

/// Hand-set fallbacks used when a market never accumulates enough
/// history to optimize. ROI is zero because nothing was measured.
pub fn market_default(market: Market) -> ThresholdEntry {
    let (min_prob, min_edge) = match market {
        Market::Result => (0.54, 0.03),
        Market::Btts => (0.56, 0.03),
        Market::Over => (0.62, 0.03),
    };
    ThresholdEntry {
        min_prob,
        min_edge,
        bets: 0,
        roi: 0.0,
    }
}

/// One settled pick as the optimizer sees it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BetSample {
    pub prob: f64,
    pub odds: f64,
    pub won: bool,
}

impl BetSample {
    pub fn edge(&self) -> f64 {
        self.prob - 1.0 / self.odds
    }

    pub fn profit(&self) -> f64 {
        if self.won { self.odds - 1.0 } else { -1.0 }
    }
}

/// Exhaustive scan of the tier grid, flat one-unit staking. Cells are
/// visited probability-ascending then edge-ascending and only a strictly
/// better ROI displaces the incumbent, so ties resolve to the loosest
/// qualifying cell and reruns on the same samples are idempotent.
pub fn grid_search(samples: &[BetSample], grid: &TierGrid) -> Option<ThresholdEntry> {
    let mut best: Option<ThresholdEntry> = None;
    for &min_prob in &grid.prob_axis() {
        for &min_edge in &grid.edge_axis() {
            let mut bets = 0usize;
            let mut profit = 0.0;
            for s in samples {
                if s.prob >= min_prob && s.edge() >= min_edge {
                    bets += 1;
                    profit += s.profit();
                }
            }
            if bets < grid.min_bets {
                continue;
            }
            let roi = profit / bets as f64;
            if best.is_none_or(|b| roi > b.roi) {
                best = Some(ThresholdEntry {
                    min_prob,
                    min_edge,
                    bets,
                    roi,
                });
            }
        }
    }
    best
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThresholdTable {
    pub tiers: BTreeMap<Tier, BTreeMap<Market, ThresholdEntry>>,
}

impl ThresholdTable {
    /// Entry for a tier/market pair, falling back to the market default
    /// so lookups on a partial table stay total.
    pub fn entry(&self, tier: Tier, market: Market) -> ThresholdEntry {
        self.tiers
            .get(&tier)
            .and_then(|m| m.get(&market))
            .copied()
            .unwrap_or_else(|| market_default(market))
    }

    /// Fills every missing tier/market cell with the market default.
    pub fn hydrate(&mut self) {
        for tier in Tier::ALL {
            let row = self.tiers.entry(tier).or_default();
            for market in Market::ALL {
                row.entry(market).or_insert_with(|| market_default(market));
            }
        }
    }
}

/// Runs the grid for all nine tier/market cells. Markets without a
/// qualifying cell land on their defaults.
pub fn optimize(samples_by_market: &BTreeMap<Market, Vec<BetSample>>) -> ThresholdTable {
    let mut table = ThresholdTable::default();
    for tier in Tier::ALL {
        let grid = &TIER_GRIDS[&tier];
        let mut row = BTreeMap::new();
        for market in Market::ALL {
            let samples = samples_by_market
                .get(&market)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let entry = match grid_search(samples, grid) {
                Some(e) => {
                    log::info!(
                        "tier {} market {}: prob>={:.2} edge>={:.3} roi {:.4} over {} bets",
                        tier.as_str(),
                        market.as_str(),
                        e.min_prob,
                        e.min_edge,
                        e.roi,
                        e.bets
                    );
                    e
                }
                None => {
                    log::warn!(
                        "tier {} market {}: not enough qualifying bets, using defaults",
                        tier.as_str(),
                        market.as_str()
                    );
                    market_default(market)
                }
            };
            row.insert(market, entry);
        }
        table.tiers.insert(tier, row);
    }
    table
}

/// Composite identity used to drop held-out fixtures from the
/// optimization corpus. Name-based on purpose so exports from a feed
/// with different numeric ids still match.
pub fn match_key(m: &MatchRecord) -> String {
    format!("{}|{}|{}", m.date.trim(), m.home.name.trim(), m.away.name.trim())
}
