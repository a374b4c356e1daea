use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;

use matchedge::features::FeatureExtractor;
use matchedge::markets::{Market, Tier};
use matchedge::match_store::{
    default_db_path, load_finished_matches, load_future_matches, load_upcoming_matches, open_db,
    save_prediction,
};
use matchedge::meta_model::apply_meta_filter;
use matchedge::model_store::{
    default_artifact_dir, load_meta_models, load_models, load_thresholds,
};
use matchedge::training::predict_match;

const DEFAULT_HORIZON_DAYS: u64 = 10;

fn arg_value(flag: &str) -> Option<String> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == flag {
            return args.next();
        }
    }
    None
}

fn has_flag(flag: &str) -> bool {
    std::env::args().skip(1).any(|arg| arg == flag)
}

fn main() -> Result<()> {
    env_logger::init();

    let db_path = arg_value("--db").map(PathBuf::from).unwrap_or_else(default_db_path);
    let artifact_dir = arg_value("--artifacts")
        .map(PathBuf::from)
        .unwrap_or_else(default_artifact_dir);
    let horizon = arg_value("--horizon")
        .map(|s| s.parse::<u64>().context("parse --horizon"))
        .transpose()?
        .unwrap_or(DEFAULT_HORIZON_DAYS);
    let store = has_flag("--store");

    let models = load_models(&artifact_dir)?;
    let thresholds = load_thresholds(&artifact_dir)?;
    let meta = load_meta_models(&artifact_dir).unwrap_or_else(|err| {
        log::warn!("meta models unavailable ({err}), filter disabled");
        Default::default()
    });

    let conn = open_db(&db_path)?;
    let corpus = load_finished_matches(&conn, None)?;
    let extractor = FeatureExtractor::new(&corpus);

    let today = Utc::now().date_naive();
    let upcoming = load_upcoming_matches(&conn, today, horizon)?;
    if upcoming.is_empty() {
        return Err(anyhow!("no scheduled matches in the next {horizon} days"));
    }
    println!("{} fixtures in the next {horizon} days\n", upcoming.len());

    for m in &upcoming {
        let raw = predict_match(&models, &extractor, m, &thresholds)?;
        let pred = apply_meta_filter(&raw, &m.odds, &meta);

        println!(
            "{} {} vs {}  xG {:.2}-{:.2}",
            m.date,
            m.home.name,
            m.away.name,
            pred.expected_goals.home,
            pred.expected_goals.away
        );
        println!(
            "  1x2  H {:.2} D {:.2} A {:.2}  pick {:?} {}",
            pred.result.probs.home,
            pred.result.probs.draw,
            pred.result.probs.away,
            pred.result.pick,
            tier_tags(&pred, Market::Result)
        );
        println!(
            "  btts {:?} {:.2} {}",
            pred.btts.pick,
            pred.btts.probability,
            tier_tags(&pred, Market::Btts)
        );
        println!(
            "  o/u  {:?} {:.2} {}",
            pred.over25.pick,
            pred.over25.probability,
            tier_tags(&pred, Market::Over)
        );

        if store {
            save_prediction(&conn, m.id, &pred)?;
        }
    }
    if store {
        println!("\npredictions stored for {} fixtures", upcoming.len());
    }

    let further = load_future_matches(&conn, today, horizon)?;
    if !further.is_empty() {
        println!("({} more fixtures scheduled beyond the horizon)", further.len());
    }
    Ok(())
}

fn tier_tags(pred: &matchedge::markets::Prediction, market: Market) -> String {
    let flags = pred.flags(market);
    let tags: Vec<&str> = Tier::ALL
        .iter()
        .filter(|t| flags.get(**t))
        .map(|t| t.as_str())
        .collect();
    if tags.is_empty() {
        String::new()
    } else {
        format!("[{}]", tags.join(","))
    }
}
