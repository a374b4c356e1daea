use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};

use matchedge::features::{FeatureExtractor, align_team_ids};
use matchedge::markets::{Market, MatchRecord, Tier};
use matchedge::match_store::{default_db_path, load_finished_matches, open_db};
use matchedge::meta_model::{collect_meta_samples, train_meta_models};
use matchedge::model_store::{default_artifact_dir, save_meta_models, save_thresholds};
use matchedge::thresholds::{match_key, optimize};
use matchedge::training::{TrainConfig, collect_bet_samples, train_models};

fn arg_value(flag: &str) -> Option<String> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == flag {
            return args.next();
        }
    }
    None
}

fn main() -> Result<()> {
    env_logger::init();

    let db_path = arg_value("--db").map(PathBuf::from).unwrap_or_else(default_db_path);
    let artifact_dir = arg_value("--artifacts")
        .map(PathBuf::from)
        .unwrap_or_else(default_artifact_dir);
    let league_id = arg_value("--league")
        .map(|s| s.parse::<u32>().context("parse --league"))
        .transpose()?;
    let holdout_path = arg_value("--holdout").map(PathBuf::from);

    let conn = open_db(&db_path)?;
    let corpus = load_finished_matches(&conn, league_id)?;
    if corpus.is_empty() {
        return Err(anyhow!("no finished matches in {}", db_path.display()));
    }

    // Thresholds must be fitted on picks the models never trained on.
    // With an explicit holdout file the fit corpus is the database minus
    // the holdout fixtures (matched by date and team names); otherwise
    // the chronological tail of the corpus plays that role.
    let (fit_corpus, eval_matches): (Vec<MatchRecord>, Vec<MatchRecord>) = match &holdout_path {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("read holdout {}", path.display()))?;
            let holdout: Vec<MatchRecord> =
                serde_json::from_str(&raw).context("decode holdout matches")?;
            // Curated files carry their own team numbering; remap it to
            // the database ids so the history index resolves.
            let holdout = align_team_ids(&corpus, &holdout);
            let keys: HashSet<String> = holdout.iter().map(match_key).collect();
            let fit = corpus
                .iter()
                .filter(|m| !keys.contains(&match_key(m)))
                .cloned()
                .collect();
            (fit, holdout)
        }
        None => {
            let split = (corpus.len() * 4) / 5;
            (corpus[..split].to_vec(), corpus[split..].to_vec())
        }
    };
    println!(
        "fitting on {} matches, evaluating picks over {}",
        fit_corpus.len(),
        eval_matches.len()
    );

    let (models, _) = train_models(&fit_corpus, &TrainConfig::default())?;

    // The history index covers the fit corpus and the evaluation
    // fixtures themselves; strict before-date filtering keeps every
    // pick leakage-free anyway.
    let mut indexed = fit_corpus.clone();
    indexed.extend(eval_matches.iter().cloned());
    let extractor = FeatureExtractor::new(&indexed);
    let samples = collect_bet_samples(&models, &extractor, &eval_matches)?;
    for market in Market::ALL {
        println!(
            "{:>7}: {} settled picks",
            market.as_str(),
            samples.get(&market).map_or(0, Vec::len)
        );
    }

    let table = optimize(&samples);
    let path = save_thresholds(&artifact_dir, &table)?;
    println!("thresholds saved to {}", path.display());
    for tier in Tier::ALL {
        for market in Market::ALL {
            let e = table.entry(tier, market);
            println!(
                "{:>12} {:>7}: prob>={:.2} edge>={:+.3} roi {:+.4} ({} bets)",
                tier.as_str(),
                market.as_str(),
                e.min_prob,
                e.min_edge,
                e.roi,
                e.bets
            );
        }
    }

    let meta_samples = collect_meta_samples(&models, &extractor, &eval_matches)?;
    let meta = train_meta_models(&meta_samples);
    let meta_path = save_meta_models(&artifact_dir, &meta)?;
    println!("meta models saved to {}", meta_path.display());

    Ok(())
}
