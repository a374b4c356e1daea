use std::collections::BTreeMap;

use matchedge::backtest::{run_backtest, run_backtest_regenerated};
use matchedge::features::FeatureExtractor;
use matchedge::gbdt::GbdtParams;
use matchedge::markets::{Market, MarketOdds, MatchRecord, MatchStatus, TeamRef, Tier};
use matchedge::meta_model::{apply_meta_filter, collect_meta_samples, train_meta_models, MetaModels};
use matchedge::thresholds::{BetSample, ThresholdEntry, ThresholdTable, optimize};
use matchedge::training::{TrainConfig, collect_bet_samples, predict_match, train_models};

fn league_corpus(n: usize) -> Vec<MatchRecord> {
    // Four teams with a fixed pecking order so the models have signal:
    // lower team id means stronger side.
    let start = chrono::NaiveDate::from_ymd_opt(2024, 8, 3).unwrap();
    let pairs = [(1u32, 2u32), (3, 4), (2, 3), (1, 4), (4, 2), (3, 1)];
    let mut out = Vec::new();
    for i in 0..n {
        let (home, away) = pairs[i % pairs.len()];
        let date = start + chrono::Days::new((i * 2) as u64);
        let strength_gap = away as i32 - home as i32;
        let (hg, ag) = if strength_gap > 0 {
            (1 + strength_gap.min(2) + (i % 2 == 0) as i32, (i % 4 == 0) as i32)
        } else {
            ((i % 4 == 0) as i32, 1 - strength_gap.max(-2) + (i % 2 == 0) as i32)
        };
        out.push(MatchRecord {
            id: i as u64,
            league_id: 1,
            season: "2024".to_string(),
            date: date.format("%d/%m/%Y").to_string(),
            kickoff: "15:00".to_string(),
            status: MatchStatus::Finished,
            home: TeamRef {
                id: home,
                name: format!("Club {home}"),
                league_id: 1,
            },
            away: TeamRef {
                id: away,
                name: format!("Club {away}"),
                league_id: 1,
            },
            home_goals: hg,
            away_goals: ag,
            odds: MarketOdds {
                home: if strength_gap > 0 { 1.7 } else { 3.6 },
                draw: 3.5,
                away: if strength_gap > 0 { 4.1 } else { 1.8 },
                over: 1.85,
                under: 1.95,
                btts_yes: 1.9,
                btts_no: 1.9,
            },
            prediction: None,
        });
    }
    out
}

fn quick_config() -> TrainConfig {
    let params = GbdtParams {
        n_trees: 12,
        max_depth: 3,
        learning_rate: 0.2,
        min_leaf: 5,
        l1: 0.0,
        l2: 1.0,
    };
    TrainConfig {
        train_split: 0.8,
        regressor: params,
        classifier: params,
    }
}

#[test]
fn recommendations_cascade_from_tight_to_loose_tiers() {
    let corpus = league_corpus(150);
    let (models, _) = train_models(&corpus, &quick_config()).unwrap();
    let extractor = FeatureExtractor::new(&corpus);

    let mut table = ThresholdTable::default();
    table.hydrate();

    for m in corpus.iter().rev().take(30) {
        let pred = predict_match(&models, &extractor, m, &table).unwrap();
        for market in Market::ALL {
            let f = pred.flags(market);
            // conservative implies moderate implies aggressive.
            assert!(!f.conservative || f.moderate, "{market:?}");
            assert!(!f.moderate || f.aggressive, "{market:?}");
        }
    }
}

#[test]
fn meta_filter_never_adds_recommendations() {
    let corpus = league_corpus(150);
    let (models, _) = train_models(&corpus, &quick_config()).unwrap();
    let extractor = FeatureExtractor::new(&corpus);

    let meta_samples = collect_meta_samples(&models, &extractor, &corpus[100..]).unwrap();
    let meta = train_meta_models(&meta_samples);

    let mut table = ThresholdTable::default();
    table.hydrate();

    for m in corpus.iter().rev().take(30) {
        let raw = predict_match(&models, &extractor, m, &table).unwrap();
        let filtered = apply_meta_filter(&raw, &m.odds, &meta);
        for market in Market::ALL {
            for tier in Tier::ALL {
                assert!(
                    raw.flags(market).get(tier) || !filtered.flags(market).get(tier),
                    "filter invented a {tier:?} recommendation on {market:?}"
                );
            }
        }
    }
}

#[test]
fn optimizer_output_feeds_prediction_and_backtest() {
    let corpus = league_corpus(180);
    let split = 140;
    let (models, _) = train_models(&corpus[..split], &quick_config()).unwrap();
    let extractor = FeatureExtractor::new(&corpus);

    let samples = collect_bet_samples(&models, &extractor, &corpus[split..]).unwrap();
    assert!(!samples.is_empty());
    let table = optimize(&samples);

    // Score the tail, store predictions, replay them.
    let mut scored = corpus[split..].to_vec();
    for m in &mut scored {
        let pred = predict_match(&models, &extractor, m, &table).unwrap();
        m.prediction = Some(apply_meta_filter(&pred, &m.odds, &MetaModels::default()));
    }
    let report = run_backtest(&scored);
    assert_eq!(report.matches_scanned, scored.len());
    for tier in Tier::ALL {
        for market in Market::ALL {
            let line = report.line(tier, market);
            if line.bets > 0 {
                assert!(line.hit_rate >= 0.0 && line.hit_rate <= 1.0);
                assert!(line.roi.is_finite());
            }
        }
    }
}

fn uniform_table(min_prob: f64, min_edge: f64) -> ThresholdTable {
    let mut table = ThresholdTable::default();
    for tier in Tier::ALL {
        let row = table.tiers.entry(tier).or_default();
        for market in Market::ALL {
            row.insert(
                market,
                ThresholdEntry {
                    min_prob,
                    min_edge,
                    bets: 0,
                    roi: 0.0,
                },
            );
        }
    }
    table
}

#[test]
fn regenerated_backtest_reflects_current_artifacts() {
    let corpus = league_corpus(180);
    let split = 140;
    let (models, _) = train_models(&corpus[..split], &quick_config()).unwrap();
    let extractor = FeatureExtractor::new(&corpus);

    // Generation A: stored picks under a fully permissive table.
    let permissive = uniform_table(0.0, -1.0);
    let mut stored = corpus[split..].to_vec();
    for m in &mut stored {
        let pred = predict_match(&models, &extractor, m, &permissive).unwrap();
        m.prediction = Some(pred);
    }
    let replay = run_backtest(&stored);
    assert!(replay.line(Tier::Aggressive, Market::Result).bets > 0);

    // Current thresholds forbid everything. Rescoring the same period
    // must follow them, not the stored recommendations.
    let shut = uniform_table(1.01, 1.0);
    let regen =
        run_backtest_regenerated(&stored, &models, &extractor, &shut, &MetaModels::default())
            .unwrap();
    assert_eq!(regen.matches_scanned, stored.len());
    for tier in Tier::ALL {
        for market in Market::ALL {
            assert_eq!(regen.line(tier, market).bets, 0, "{tier:?}/{market:?}");
        }
    }

    // Rescoring with the stored generation's own artifacts reproduces it.
    let same = run_backtest_regenerated(
        &stored,
        &models,
        &extractor,
        &permissive,
        &MetaModels::default(),
    )
    .unwrap();
    assert_eq!(
        same.line(Tier::Moderate, Market::Result).bets,
        replay.line(Tier::Moderate, Market::Result).bets
    );
}

#[test]
fn losing_history_still_produces_a_full_table() {
    // Every pick loses. The optimizer must fall back to defaults rather
    // than emitting a partial table.
    let mut samples: BTreeMap<Market, Vec<BetSample>> = BTreeMap::new();
    for market in Market::ALL {
        samples.insert(
            market,
            (0..100)
                .map(|i| BetSample {
                    prob: 0.45 + (i % 30) as f64 / 100.0,
                    odds: 2.0,
                    won: false,
                })
                .collect(),
        );
    }
    let table = optimize(&samples);
    for tier in Tier::ALL {
        for market in Market::ALL {
            let e = table.entry(tier, market);
            assert!(e.min_prob > 0.0);
            assert!(e.roi <= 0.0);
        }
    }
}

#[test]
fn threshold_wire_shape_round_trips() {
    let mut samples: BTreeMap<Market, Vec<BetSample>> = BTreeMap::new();
    for market in Market::ALL {
        samples.insert(
            market,
            (0..60)
                .map(|i| BetSample {
                    prob: 0.50 + (i % 25) as f64 / 100.0,
                    odds: 1.9,
                    won: i % 2 == 0,
                })
                .collect(),
        );
    }
    let table = optimize(&samples);
    let json = serde_json::to_value(&table).unwrap();

    // {tier: {market: {umbral_prob, margen, apuestas, roi}}}
    for tier in ["conservative", "moderate", "aggressive"] {
        for market in ["result", "btts", "over"] {
            let cell = &json[tier][market];
            assert!(cell["umbral_prob"].is_number(), "{tier}/{market}");
            assert!(cell["margen"].is_number());
            assert!(cell["apuestas"].is_number());
            assert!(cell["roi"].is_number());
        }
    }

    let back: ThresholdTable = serde_json::from_value(json).unwrap();
    for tier in Tier::ALL {
        for market in Market::ALL {
            assert_eq!(back.entry(tier, market), table.entry(tier, market));
        }
    }
}

#[test]
fn unpriced_fixture_is_probabilities_only() {
    let corpus = league_corpus(150);
    let (models, _) = train_models(&corpus, &quick_config()).unwrap();
    let extractor = FeatureExtractor::new(&corpus);

    let mut table = ThresholdTable::default();
    table.hydrate();

    let mut fixture = corpus[0].clone();
    fixture.id = 5000;
    fixture.status = MatchStatus::Scheduled;
    fixture.date = "01/07/2025".to_string();
    fixture.home_goals = -1;
    fixture.away_goals = -1;
    fixture.odds = MarketOdds::unpriced();

    let pred = predict_match(&models, &extractor, &fixture, &table).unwrap();
    let pred = apply_meta_filter(&pred, &fixture.odds, &MetaModels::default());

    let p = pred.result.probs;
    assert!((p.home + p.draw + p.away - 1.0).abs() < 1e-9);
    for market in Market::ALL {
        assert!(!pred.flags(market).any(), "{market:?}");
    }
}
