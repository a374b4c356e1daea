use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::features::FeatureExtractor;
use crate::markets::{BttsPick, Market, MatchRecord, Prediction, Tier, TotalPick};
use crate::meta_model::{MetaModels, apply_meta_filter};
use crate::thresholds::ThresholdTable;
use crate::training::{ModelSet, predict_match};

/// Flat-stake outcome of one tier/market slice.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MarketLine {
    pub bets: usize,
    pub wins: usize,
    pub profit: f64,
    pub roi: f64,
    pub hit_rate: f64,
}

impl MarketLine {
    fn settle(&mut self, odds: f64, won: bool) {
        self.bets += 1;
        if won {
            self.wins += 1;
            self.profit += odds - 1.0;
        } else {
            self.profit -= 1.0;
        }
    }

    fn finalize(&mut self) {
        if self.bets > 0 {
            self.roi = self.profit / self.bets as f64;
            self.hit_rate = self.wins as f64 / self.bets as f64;
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BacktestReport {
    pub matches_scanned: usize,
    pub matches_settled: usize,
    pub tiers: BTreeMap<Tier, BTreeMap<Market, MarketLine>>,
}

impl BacktestReport {
    pub fn line(&self, tier: Tier, market: Market) -> MarketLine {
        self.tiers
            .get(&tier)
            .and_then(|r| r.get(&market))
            .copied()
            .unwrap_or_default()
    }
}

/// Settles one market of a stored prediction against the final score.
/// None when the match is unfinished or the picked side has no quote.
fn settle_pick(pred: &Prediction, m: &MatchRecord, market: Market) -> Option<(f64, bool)> {
    match market {
        Market::Result => {
            let code = m.result_code()?;
            let odds = m.odds.result_price(pred.result.pick)?;
            Some((odds, pred.result.pick.code() == code))
        }
        Market::Btts => {
            let hit = m.btts()?;
            let odds = m.odds.btts_price(pred.btts.pick)?;
            Some((odds, (pred.btts.pick == BttsPick::Yes) == hit))
        }
        Market::Over => {
            let hit = m.over25()?;
            let odds = m.odds.total_price(pred.over25.pick)?;
            Some((odds, (pred.over25.pick == TotalPick::Over) == hit))
        }
    }
}

/// Replays stored recommendations over settled matches. A pick is
/// counted once per tier that recommended it; matches without a stored
/// prediction are scanned but contribute nothing.
pub fn run_backtest(matches: &[MatchRecord]) -> BacktestReport {
    let mut report = BacktestReport::default();
    for tier in Tier::ALL {
        let row = report.tiers.entry(tier).or_default();
        for market in Market::ALL {
            row.insert(market, MarketLine::default());
        }
    }

    for m in matches {
        report.matches_scanned += 1;
        let Some(stored) = &m.prediction else { continue };
        if !m.is_finished() {
            continue;
        }
        let pred = Prediction::hydrate(Some(stored.clone()));
        let mut settled_any = false;

        for market in Market::ALL {
            let flags = pred.flags(market);
            if !flags.any() {
                continue;
            }
            let Some((odds, won)) = settle_pick(&pred, m, market) else {
                continue;
            };
            settled_any = true;
            for tier in Tier::ALL {
                if flags.get(tier)
                    && let Some(line) = report
                        .tiers
                        .get_mut(&tier)
                        .and_then(|r| r.get_mut(&market))
                {
                    line.settle(odds, won);
                }
            }
        }
        if settled_any {
            report.matches_settled += 1;
        }
    }

    for row in report.tiers.values_mut() {
        for line in row.values_mut() {
            line.finalize();
        }
    }
    report
}

/// Rescores settled matches with the current models, thresholds and
/// meta filter, as if every prediction had just been generated, and
/// replays the fresh picks. Set against the stored replay this shows
/// what the present artifacts would have done over the same period.
pub fn run_backtest_regenerated(
    matches: &[MatchRecord],
    models: &ModelSet,
    extractor: &FeatureExtractor,
    table: &ThresholdTable,
    meta: &MetaModels,
) -> Result<BacktestReport> {
    let mut rescored = Vec::with_capacity(matches.len());
    for m in matches {
        let mut m = m.clone();
        let pred = predict_match(models, extractor, &m, table)?;
        m.prediction = Some(apply_meta_filter(&pred, &m.odds, meta));
        rescored.push(m);
    }
    Ok(run_backtest(&rescored))
}

/// Minimum bets on both sides before a tier/market slice is considered
/// comparable between two prediction generations.
pub const COMPARE_MIN_BETS: usize = 10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ComparisonLine {
    pub tier: Tier,
    pub market: Market,
    pub bets_a: usize,
    pub bets_b: usize,
    pub roi_a: f64,
    pub roi_b: f64,
    pub roi_delta: f64,
}

/// Side-by-side ROI of two backtests, skipping slices where either side
/// is too thin to say anything.
pub fn compare(a: &BacktestReport, b: &BacktestReport) -> Vec<ComparisonLine> {
    let mut out = Vec::new();
    for tier in Tier::ALL {
        for market in Market::ALL {
            let la = a.line(tier, market);
            let lb = b.line(tier, market);
            if la.bets <= COMPARE_MIN_BETS || lb.bets <= COMPARE_MIN_BETS {
                continue;
            }
            out.push(ComparisonLine {
                tier,
                market,
                bets_a: la.bets,
                bets_b: lb.bets,
                roi_a: la.roi,
                roi_b: lb.roi,
                roi_delta: lb.roi - la.roi,
            });
        }
    }
    out
}
