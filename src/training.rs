use anyhow::{Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use crate::calibration::{
    CalibratedClassifier, ClassifierMetrics, RoiDiagnostic, evaluate_probs, simulated_roi,
};
use crate::features::FeatureExtractor;
use crate::gbdt::{GbdtClassifier, GbdtParams, GbdtRegressor};
use crate::markets::{
    BttsPick, ExpectedGoals, Market, MatchRecord, Prediction, ResultMarket, ResultProbs, Tier,
    TierFlags, TotalPick, TotalsMarket, BttsMarket,
};
use crate::thresholds::{BetSample, ThresholdTable};
use std::collections::BTreeMap;

pub const MIN_TRAINING_MATCHES: usize = 80;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrainConfig {
    /// Fraction of the chronologically sorted corpus used for fitting;
    /// the remainder is the calibration and scoring hold-out.
    pub train_split: f64,
    pub regressor: GbdtParams,
    pub classifier: GbdtParams,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            train_split: 0.8,
            regressor: GbdtParams::default(),
            classifier: GbdtParams::default(),
        }
    }
}

/// The five fitted models: two goal regressors and three calibrated
/// market classifiers. Result classes are 0 draw, 1 home, 2 away.
/// Serialized keys are the stable artifact names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSet {
    #[serde(rename = "model_goals_home")]
    pub goals_home: GbdtRegressor,
    #[serde(rename = "model_goals_away")]
    pub goals_away: GbdtRegressor,
    #[serde(rename = "model_result")]
    pub result: CalibratedClassifier,
    #[serde(rename = "model_btts")]
    pub btts: CalibratedClassifier,
    #[serde(rename = "model_over25")]
    pub over25: CalibratedClassifier,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MarketReport {
    pub metrics: ClassifierMetrics,
    pub roi: RoiDiagnostic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainReport {
    pub total_matches: usize,
    pub train_rows: usize,
    pub validation_rows: usize,
    pub goals_home_mae: f64,
    pub goals_away_mae: f64,
    pub result: MarketReport,
    pub btts: MarketReport,
    pub over25: MarketReport,
}

/// Fits the full model set on a historical corpus. Matches are sorted
/// chronologically and split by position, never randomly; the held-out
/// tail feeds both the isotonic calibrators and the report metrics.
pub fn train_models(corpus: &[MatchRecord], cfg: &TrainConfig) -> Result<(ModelSet, TrainReport)> {
    let extractor = FeatureExtractor::new(corpus);

    let mut usable: Vec<&MatchRecord> = corpus
        .iter()
        .filter(|m| m.is_finished() && m.parsed_date().is_some())
        .collect();
    usable.sort_by(|a, b| a.parsed_date().cmp(&b.parsed_date()).then(a.id.cmp(&b.id)));

    let n = usable.len();
    if n < MIN_TRAINING_MATCHES {
        bail!("need at least {MIN_TRAINING_MATCHES} finished matches, have {n}");
    }

    let split = ((n as f64 * cfg.train_split) as usize).clamp(1, n - 1);
    log::info!("training on {split} matches, holding out {}", n - split);

    let rows: Vec<Vec<f64>> = usable.iter().map(|m| extractor.extract(m).to_vec()).collect();
    let holdout: Vec<bool> = (0..n).map(|i| i >= split).collect();

    let train_rows: Vec<Vec<f64>> = rows[..split].to_vec();

    let goals_home_y: Vec<f64> = usable[..split]
        .iter()
        .map(|m| m.home_goals.max(0) as f64)
        .collect();
    let goals_away_y: Vec<f64> = usable[..split]
        .iter()
        .map(|m| m.away_goals.max(0) as f64)
        .collect();
    let goals_home = GbdtRegressor::fit(&train_rows, &goals_home_y, cfg.regressor);
    let goals_away = GbdtRegressor::fit(&train_rows, &goals_away_y, cfg.regressor);

    let result_y: Vec<u8> = usable.iter().map(|m| m.result_code().unwrap_or(0)).collect();
    let btts_y: Vec<u8> = usable
        .iter()
        .map(|m| m.btts().unwrap_or(false) as u8)
        .collect();
    let over_y: Vec<u8> = usable
        .iter()
        .map(|m| m.over25().unwrap_or(false) as u8)
        .collect();

    let fit_market = |labels: &[u8], n_classes: usize| {
        let raw = GbdtClassifier::fit(&train_rows, &labels[..split], n_classes, cfg.classifier);
        CalibratedClassifier::fit(raw, &rows, labels, &holdout)
    };
    let result = fit_market(&result_y, 3);
    let btts = fit_market(&btts_y, 2);
    let over25 = fit_market(&over_y, 2);

    let val_rows = &rows[split..];
    let val_matches = &usable[split..];

    let mae = |model: &GbdtRegressor, target: fn(&MatchRecord) -> f64| {
        let total: f64 = val_rows
            .iter()
            .zip(val_matches)
            .map(|(x, m)| (model.predict(x) - target(m)).abs())
            .sum();
        total / val_rows.len() as f64
    };

    let score_market = |model: &CalibratedClassifier,
                        labels: &[u8],
                        quotes: &dyn Fn(&MatchRecord) -> Vec<Option<f64>>| {
        let probs: Vec<Vec<f64>> = val_rows.iter().map(|x| model.predict_proba(x)).collect();
        let val_labels = &labels[split..];
        let odds: Vec<Vec<Option<f64>>> = val_matches.iter().map(|m| quotes(m)).collect();
        MarketReport {
            metrics: evaluate_probs(&probs, val_labels),
            roi: simulated_roi(&probs, val_labels, &odds),
        }
    };

    let report = TrainReport {
        total_matches: n,
        train_rows: split,
        validation_rows: n - split,
        goals_home_mae: mae(&goals_home, |m| m.home_goals.max(0) as f64),
        goals_away_mae: mae(&goals_away, |m| m.away_goals.max(0) as f64),
        result: score_market(&result, &result_y, &|m| {
            vec![
                crate::markets::MarketOdds::price(m.odds.draw),
                crate::markets::MarketOdds::price(m.odds.home),
                crate::markets::MarketOdds::price(m.odds.away),
            ]
        }),
        btts: score_market(&btts, &btts_y, &|m| {
            vec![
                crate::markets::MarketOdds::price(m.odds.btts_no),
                crate::markets::MarketOdds::price(m.odds.btts_yes),
            ]
        }),
        over25: score_market(&over25, &over_y, &|m| {
            vec![
                crate::markets::MarketOdds::price(m.odds.under),
                crate::markets::MarketOdds::price(m.odds.over),
            ]
        }),
    };

    log::info!(
        "result acc {:.3} brier {:.3}, btts acc {:.3}, over acc {:.3}",
        report.result.metrics.accuracy,
        report.result.metrics.brier,
        report.btts.metrics.accuracy,
        report.over25.metrics.accuracy
    );

    Ok((
        ModelSet {
            goals_home,
            goals_away,
            result,
            btts,
            over25,
        },
        report,
    ))
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Per-tier qualification with enforced looseness ordering: a pick can
/// only be conservative if it also clears the moderate and aggressive
/// cells, so tighter tiers always recommend a subset of looser ones.
fn cascade_flags(
    prob: f64,
    price: Option<f64>,
    market: Market,
    table: &ThresholdTable,
) -> TierFlags {
    let Some(odds) = price else {
        return TierFlags::none();
    };
    let edge = prob - 1.0 / odds;
    let clears = |tier: Tier| {
        let cell = table.entry(tier, market);
        prob >= cell.min_prob && edge >= cell.min_edge
    };
    let aggressive = clears(Tier::Aggressive);
    let moderate = aggressive && clears(Tier::Moderate);
    let conservative = moderate && clears(Tier::Conservative);
    TierFlags {
        conservative,
        moderate,
        aggressive,
    }
}

/// Guards against artifacts fitted with the wrong class count; a
/// classifier loaded from disk is not trusted to have the arity the
/// market expects.
fn class_probs<const N: usize>(model: &CalibratedClassifier, x: &[f64]) -> Result<[f64; N]> {
    let p = model.predict_proba(x);
    let n = p.len();
    p.try_into()
        .map_err(|_| anyhow!("classifier emitted {n} class probabilities, expected {N}"))
}

/// Scores one fixture. Missing odds zero out the affected market's
/// recommendations but never suppress the probabilities themselves.
pub fn predict_match(
    models: &ModelSet,
    extractor: &FeatureExtractor,
    m: &MatchRecord,
    table: &ThresholdTable,
) -> Result<Prediction> {
    let x = extractor.extract(m).to_vec();

    let expected_goals = ExpectedGoals {
        home: round2(models.goals_home.predict(&x).max(0.0)),
        away: round2(models.goals_away.predict(&x).max(0.0)),
    };

    let p: [f64; 3] = class_probs(&models.result, &x)?;
    let probs = ResultProbs {
        draw: p[0],
        home: p[1],
        away: p[2],
    };
    let (pick, top_prob) = probs.top();
    let result = ResultMarket {
        probs,
        pick,
        top_prob,
        recommendation: cascade_flags(
            top_prob,
            m.odds.result_price(pick),
            Market::Result,
            table,
        ),
    };

    let p: [f64; 2] = class_probs(&models.btts, &x)?;
    let btts_pick = if p[1] >= 0.5 { BttsPick::Yes } else { BttsPick::No };
    let btts_prob = p[0].max(p[1]);
    let btts = BttsMarket {
        probability: btts_prob,
        pick: btts_pick,
        recommendation: cascade_flags(
            btts_prob,
            m.odds.btts_price(btts_pick),
            Market::Btts,
            table,
        ),
    };

    let p: [f64; 2] = class_probs(&models.over25, &x)?;
    let total_pick = if p[1] >= 0.5 { TotalPick::Over } else { TotalPick::Under };
    let total_prob = p[0].max(p[1]);
    let over25 = TotalsMarket {
        probability: total_prob,
        pick: total_pick,
        recommendation: cascade_flags(
            total_prob,
            m.odds.total_price(total_pick),
            Market::Over,
            table,
        ),
    };

    Ok(Prediction {
        expected_goals,
        result,
        btts,
        over25,
    })
}

/// Replays the model's picks over settled matches and buckets them into
/// optimizer samples per market. Unpriced picks are dropped because a
/// bet without a quote has no ROI.
pub fn collect_bet_samples(
    models: &ModelSet,
    extractor: &FeatureExtractor,
    matches: &[MatchRecord],
) -> Result<BTreeMap<Market, Vec<BetSample>>> {
    let mut out: BTreeMap<Market, Vec<BetSample>> = BTreeMap::new();

    for m in matches {
        let (Some(code), Some(btts_hit), Some(over_hit)) = (m.result_code(), m.btts(), m.over25())
        else {
            continue;
        };
        let x = extractor.extract(m).to_vec();

        let p: [f64; 3] = class_probs(&models.result, &x)?;
        let probs = ResultProbs {
            draw: p[0],
            home: p[1],
            away: p[2],
        };
        let (pick, prob) = probs.top();
        if let Some(odds) = m.odds.result_price(pick) {
            out.entry(Market::Result).or_default().push(BetSample {
                prob,
                odds,
                won: pick.code() == code,
            });
        }

        let p: [f64; 2] = class_probs(&models.btts, &x)?;
        let pick = if p[1] >= 0.5 { BttsPick::Yes } else { BttsPick::No };
        if let Some(odds) = m.odds.btts_price(pick) {
            out.entry(Market::Btts).or_default().push(BetSample {
                prob: p[0].max(p[1]),
                odds,
                won: (pick == BttsPick::Yes) == btts_hit,
            });
        }

        let p: [f64; 2] = class_probs(&models.over25, &x)?;
        let pick = if p[1] >= 0.5 { TotalPick::Over } else { TotalPick::Under };
        if let Some(odds) = m.odds.total_price(pick) {
            out.entry(Market::Over).or_default().push(BetSample {
                prob: p[0].max(p[1]),
                odds,
                won: (pick == TotalPick::Over) == over_hit,
            });
        }
    }

    Ok(out)
}
