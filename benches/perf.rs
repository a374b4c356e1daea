use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use matchedge::features::FeatureExtractor;
use matchedge::gbdt::{GbdtClassifier, GbdtParams, GbdtRegressor};
use matchedge::markets::{MarketOdds, MatchRecord, MatchStatus, TeamRef};

fn synthetic_corpus(n: usize) -> Vec<MatchRecord> {
    let start = chrono::NaiveDate::from_ymd_opt(2023, 8, 5).unwrap();
    (0..n)
        .map(|i| {
            let home = (i % 20) as u32 + 1;
            let away = ((i + 7) % 20) as u32 + 1;
            let date = start + chrono::Days::new((i / 10) as u64);
            MatchRecord {
                id: i as u64,
                league_id: 1,
                season: "2023".to_string(),
                date: date.format("%d/%m/%Y").to_string(),
                kickoff: "16:00".to_string(),
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
                home_goals: (i % 4) as i32,
                away_goals: ((i + 2) % 3) as i32,
                odds: MarketOdds {
                    home: 2.0,
                    draw: 3.4,
                    away: 3.8,
                    over: 1.9,
                    under: 1.9,
                    btts_yes: 1.85,
                    btts_no: 1.95,
                },
                prediction: None,
            }
        })
        .collect()
}

fn bench_feature_extraction(c: &mut Criterion) {
    let corpus = synthetic_corpus(2000);
    let extractor = FeatureExtractor::new(&corpus);
    let target = corpus.last().unwrap().clone();

    c.bench_function("feature_extract_single", |b| {
        b.iter(|| {
            let x = extractor.extract(black_box(&target));
            black_box(x[0]);
        })
    });

    let batch = &corpus[1500..];
    c.bench_function("feature_extract_batch_500", |b| {
        b.iter(|| {
            let rows = extractor.extract_matrix(black_box(batch));
            black_box(rows.len());
        })
    });
}

fn bench_extractor_build(c: &mut Criterion) {
    let corpus = synthetic_corpus(2000);
    c.bench_function("extractor_build_2000", |b| {
        b.iter(|| {
            let ex = FeatureExtractor::new(black_box(&corpus));
            black_box(ex.indexed_matches());
        })
    });
}

fn bench_gbdt_predict(c: &mut Criterion) {
    let corpus = synthetic_corpus(1000);
    let extractor = FeatureExtractor::new(&corpus);
    let rows: Vec<Vec<f64>> = corpus
        .iter()
        .map(|m| extractor.extract(m).to_vec())
        .collect();
    let goals: Vec<f64> = corpus.iter().map(|m| m.home_goals as f64).collect();
    let outcomes: Vec<u8> = corpus.iter().map(|m| m.result_code().unwrap()).collect();

    let params = GbdtParams {
        n_trees: 60,
        ..GbdtParams::default()
    };
    let regressor = GbdtRegressor::fit(&rows, &goals, params);
    let classifier = GbdtClassifier::fit(&rows, &outcomes, 3, params);
    let row = rows.last().unwrap().clone();

    c.bench_function("gbdt_regressor_predict", |b| {
        b.iter(|| black_box(regressor.predict(black_box(&row))))
    });
    c.bench_function("gbdt_classifier_proba", |b| {
        b.iter(|| {
            let p = classifier.predict_proba(black_box(&row));
            black_box(p[0]);
        })
    });
}

criterion_group!(
    perf,
    bench_feature_extraction,
    bench_extractor_build,
    bench_gbdt_predict
);
criterion_main!(perf);
