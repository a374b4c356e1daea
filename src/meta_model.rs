use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::features::FeatureExtractor;
use crate::gbdt::{GbdtParams, GbdtRegressor};
use crate::markets::{
    BttsPick, Market, MarketOdds, MatchRecord, Prediction, Tier, TotalPick,
};
use crate::thresholds::ThresholdTable;
use crate::training::{ModelSet, predict_match};

/// A market needs this many settled picks before a meta regressor is
/// worth fitting; below it the filter stays disabled for that market.
pub const META_MIN_SAMPLES: usize = 30;

pub fn meta_params() -> GbdtParams {
    GbdtParams {
        n_trees: 100,
        max_depth: 4,
        learning_rate: 0.05,
        min_leaf: 20,
        l1: 1.0,
        l2: 5.0,
    }
}

/// Minimum predicted expected value a pick must carry to survive at a
/// tier. Conservative demands real profit, aggressive tolerates a
/// slightly negative estimate because the regressor is pessimistic on
/// thin slices.
pub fn ev_floor(tier: Tier) -> f64 {
    match tier {
        Tier::Conservative => 0.10,
        Tier::Moderate => 0.03,
        Tier::Aggressive => -0.01,
    }
}

/// Per-market expected-value regressors. A market with too little
/// history simply has no entry and passes picks through unfiltered.
/// Serialized keys are the stable artifact names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetaModels {
    #[serde(rename = "meta_result")]
    pub result: Option<GbdtRegressor>,
    #[serde(rename = "meta_btts")]
    pub btts: Option<GbdtRegressor>,
    #[serde(rename = "meta_over")]
    pub over25: Option<GbdtRegressor>,
}

impl MetaModels {
    pub fn get(&self, market: Market) -> Option<&GbdtRegressor> {
        match market {
            Market::Result => self.result.as_ref(),
            Market::Btts => self.btts.as_ref(),
            Market::Over => self.over25.as_ref(),
        }
    }

    fn slot(&mut self, market: Market) -> &mut Option<GbdtRegressor> {
        match market {
            Market::Result => &mut self.result,
            Market::Btts => &mut self.btts,
            Market::Over => &mut self.over25,
        }
    }
}

fn entropy(probs: &[f64]) -> f64 {
    -probs
        .iter()
        .filter(|&&p| p > 0.0)
        .map(|&p| p * p.ln())
        .sum::<f64>()
}

/// Describes one pick to the meta regressor. Result rows carry eleven
/// values, the binary markets nine. None when the picked side has no
/// quote.
pub fn meta_features(pred: &Prediction, odds: &MarketOdds, market: Market) -> Option<Vec<f64>> {
    match market {
        Market::Result => {
            let price = odds.result_price(pred.result.pick)?;
            let p = pred.result.probs;
            let sorted = {
                let mut v = [p.home, p.draw, p.away];
                v.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
                v
            };
            let implied = 1.0 / price;
            Some(vec![
                sorted[0],
                sorted[0] - sorted[1],
                entropy(&[p.home, p.draw, p.away]),
                price,
                implied,
                sorted[0] - implied,
                p.home,
                p.draw,
                p.away,
                odds.result_overround().unwrap_or(0.0),
                sorted[2],
            ])
        }
        Market::Btts => {
            let price = odds.btts_price(pred.btts.pick)?;
            let prob = pred.btts.probability;
            let p_yes = if pred.btts.pick == BttsPick::Yes { prob } else { 1.0 - prob };
            let implied = 1.0 / price;
            Some(vec![
                prob,
                (2.0 * prob - 1.0).abs(),
                entropy(&[prob, 1.0 - prob]),
                price,
                implied,
                prob - implied,
                p_yes,
                odds.btts_overround().unwrap_or(0.0),
                prob.min(1.0 - prob),
            ])
        }
        Market::Over => {
            let price = odds.total_price(pred.over25.pick)?;
            let prob = pred.over25.probability;
            let p_over = if pred.over25.pick == TotalPick::Over { prob } else { 1.0 - prob };
            let implied = 1.0 / price;
            Some(vec![
                prob,
                (2.0 * prob - 1.0).abs(),
                entropy(&[prob, 1.0 - prob]),
                price,
                implied,
                prob - implied,
                p_over,
                odds.total_overround().unwrap_or(0.0),
                prob.min(1.0 - prob),
            ])
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetaSample {
    pub features: Vec<f64>,
    pub profit: f64,
}

/// Replays the base models over settled matches and records, per
/// market, the pick's meta features and its realized flat-stake profit.
pub fn collect_meta_samples(
    models: &ModelSet,
    extractor: &FeatureExtractor,
    matches: &[MatchRecord],
) -> Result<BTreeMap<Market, Vec<MetaSample>>> {
    let mut table = ThresholdTable::default();
    table.hydrate();

    let mut out: BTreeMap<Market, Vec<MetaSample>> = BTreeMap::new();
    for m in matches {
        let (Some(code), Some(btts_hit), Some(over_hit)) = (m.result_code(), m.btts(), m.over25())
        else {
            continue;
        };
        let pred = predict_match(models, extractor, m, &table)?;

        if let Some(features) = meta_features(&pred, &m.odds, Market::Result) {
            // meta_features only returns Some when the pick is priced.
            let odds = m.odds.result_price(pred.result.pick).unwrap_or(0.0);
            let won = pred.result.pick.code() == code;
            out.entry(Market::Result).or_default().push(MetaSample {
                features,
                profit: if won { odds - 1.0 } else { -1.0 },
            });
        }
        if let Some(features) = meta_features(&pred, &m.odds, Market::Btts) {
            let odds = m.odds.btts_price(pred.btts.pick).unwrap_or(0.0);
            let won = (pred.btts.pick == BttsPick::Yes) == btts_hit;
            out.entry(Market::Btts).or_default().push(MetaSample {
                features,
                profit: if won { odds - 1.0 } else { -1.0 },
            });
        }
        if let Some(features) = meta_features(&pred, &m.odds, Market::Over) {
            let odds = m.odds.total_price(pred.over25.pick).unwrap_or(0.0);
            let won = (pred.over25.pick == TotalPick::Over) == over_hit;
            out.entry(Market::Over).or_default().push(MetaSample {
                features,
                profit: if won { odds - 1.0 } else { -1.0 },
            });
        }
    }
    Ok(out)
}

pub fn train_meta_models(samples: &BTreeMap<Market, Vec<MetaSample>>) -> MetaModels {
    let mut out = MetaModels::default();
    for market in Market::ALL {
        let Some(batch) = samples.get(&market) else {
            log::warn!("no settled picks for {}, meta filter disabled", market.as_str());
            continue;
        };
        if batch.len() < META_MIN_SAMPLES {
            log::warn!(
                "only {} settled picks for {}, meta filter disabled",
                batch.len(),
                market.as_str()
            );
            continue;
        }
        let rows: Vec<Vec<f64>> = batch.iter().map(|s| s.features.clone()).collect();
        let profits: Vec<f64> = batch.iter().map(|s| s.profit).collect();
        *out.slot(market) = Some(GbdtRegressor::fit(&rows, &profits, meta_params()));
        log::info!("meta regressor for {} fitted on {} picks", market.as_str(), batch.len());
    }
    out
}

/// Second-stage veto. Each recommended market is scored for expected
/// value; tiers whose floor the estimate misses are cleared. Markets
/// without a fitted regressor pass through untouched, but a
/// recommendation whose pick cannot be priced is always withdrawn.
pub fn apply_meta_filter(pred: &Prediction, odds: &MarketOdds, meta: &MetaModels) -> Prediction {
    let mut out = pred.clone();
    for market in Market::ALL {
        let flags = out.flags_mut(market);
        if !flags.any() {
            continue;
        }
        let Some(features) = meta_features(&out, odds, market) else {
            *out.flags_mut(market) = crate::markets::TierFlags::none();
            continue;
        };
        let Some(model) = meta.get(market) else {
            continue;
        };
        let ev = model.predict(&features);
        for tier in Tier::ALL {
            if out.flags(market).get(tier) && ev < ev_floor(tier) {
                out.flags_mut(market).clear(tier);
            }
        }
    }
    out
}
