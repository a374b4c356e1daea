use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};

use matchedge::match_store::{default_db_path, load_finished_matches, open_db};
use matchedge::model_store::{default_artifact_dir, load_report, save_models, save_report};
use matchedge::training::{TrainConfig, train_models};

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

    let compare_dir = arg_value("--compare").map(PathBuf::from);

    let conn = open_db(&db_path)?;
    let corpus = load_finished_matches(&conn, league_id)?;
    if corpus.is_empty() {
        return Err(anyhow!("no finished matches in {}", db_path.display()));
    }
    println!("loaded {} finished matches from {}", corpus.len(), db_path.display());

    let cfg = TrainConfig::default();
    let (models, report) = train_models(&corpus, &cfg)?;

    // Read the baseline before saving, in case it lives in the same dir.
    let baseline = compare_dir
        .as_ref()
        .map(|dir| {
            load_report(dir).with_context(|| format!("load baseline report from {}", dir.display()))
        })
        .transpose()?;

    let models_path = save_models(&artifact_dir, &models)?;
    save_report(&artifact_dir, &report)?;

    println!("models saved to {}", models_path.display());
    println!(
        "split: {} train / {} validation",
        report.train_rows, report.validation_rows
    );
    println!(
        "goals mae: home {:.3}, away {:.3}",
        report.goals_home_mae, report.goals_away_mae
    );
    for (name, market) in [
        ("result", &report.result),
        ("btts", &report.btts),
        ("over25", &report.over25),
    ] {
        println!(
            "{name:>7}: acc {:.3}  brier {:.3}  logloss {:.3}  ece {:.3}  roi {:+.3} ({} bets)",
            market.metrics.accuracy,
            market.metrics.brier,
            market.metrics.log_loss,
            market.metrics.ece,
            market.roi.roi,
            market.roi.bets,
        );
    }

    // Same-split metric comparison against a previously saved report.
    if let Some(baseline) = baseline {
        if baseline.validation_rows != report.validation_rows {
            println!(
                "\nbaseline validated on {} rows vs {} now; metric deltas are indicative only",
                baseline.validation_rows, report.validation_rows
            );
        } else {
            println!("\nbaseline vs current on the same validation slice:");
        }
        for (name, old, new) in [
            ("result", &baseline.result, &report.result),
            ("btts", &baseline.btts, &report.btts),
            ("over25", &baseline.over25, &report.over25),
        ] {
            println!(
                "{name:>7}: acc {:+.3}  brier {:+.3}  logloss {:+.3}  ece {:+.3}",
                new.metrics.accuracy - old.metrics.accuracy,
                new.metrics.brier - old.metrics.brier,
                new.metrics.log_loss - old.metrics.log_loss,
                new.metrics.ece - old.metrics.ece,
            );
        }
    }
    Ok(())
}
