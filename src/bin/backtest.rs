use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};

use matchedge::backtest::{BacktestReport, compare, run_backtest, run_backtest_regenerated};
use matchedge::features::FeatureExtractor;
use matchedge::markets::{Market, Tier};
use matchedge::match_store::{default_db_path, load_finished_matches, open_db};
use matchedge::model_store::{
    default_artifact_dir, load_meta_models, load_models, load_thresholds,
};

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

fn print_lines(report: &BacktestReport) {
    for tier in Tier::ALL {
        for market in Market::ALL {
            let line = report.line(tier, market);
            if line.bets == 0 {
                continue;
            }
            println!(
                "{:>12} {:>7}: {} bets, hit {:.1}%, roi {:+.2}%",
                tier.as_str(),
                market.as_str(),
                line.bets,
                line.hit_rate * 100.0,
                line.roi * 100.0
            );
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let db_path = arg_value("--db").map(PathBuf::from).unwrap_or_else(default_db_path);
    let league_id = arg_value("--league")
        .map(|s| s.parse::<u32>().context("parse --league"))
        .transpose()?;
    let out_path = arg_value("--out").map(PathBuf::from);
    let compare_path = arg_value("--compare").map(PathBuf::from);
    let regenerate = has_flag("--regenerate");
    let artifact_dir = arg_value("--artifacts")
        .map(PathBuf::from)
        .unwrap_or_else(default_artifact_dir);

    let conn = open_db(&db_path)?;
    let matches = load_finished_matches(&conn, league_id)?;
    if matches.is_empty() {
        return Err(anyhow!("no finished matches in {}", db_path.display()));
    }

    let report = run_backtest(&matches);
    println!(
        "scanned {} matches, {} with settled recommendations\n",
        report.matches_scanned, report.matches_settled
    );
    print_lines(&report);

    if regenerate {
        let models = load_models(&artifact_dir)?;
        let thresholds = load_thresholds(&artifact_dir)?;
        let meta = load_meta_models(&artifact_dir).unwrap_or_else(|err| {
            log::warn!("meta models unavailable ({err}), filter disabled");
            Default::default()
        });
        let extractor = FeatureExtractor::new(&matches);
        let regen = run_backtest_regenerated(&matches, &models, &extractor, &thresholds, &meta)?;

        println!("\nregenerated with current artifacts:");
        print_lines(&regen);
        let lines = compare(&report, &regen);
        if lines.is_empty() {
            println!("\nno tier/market slice has enough bets on both sides to compare");
        } else {
            println!("\nstored vs regenerated:");
            for l in lines {
                println!(
                    "{:>12} {:>7}: roi {:+.2}% -> {:+.2}%  (delta {:+.2}%, {}/{} bets)",
                    l.tier.as_str(),
                    l.market.as_str(),
                    l.roi_a * 100.0,
                    l.roi_b * 100.0,
                    l.roi_delta * 100.0,
                    l.bets_a,
                    l.bets_b
                );
            }
        }
    }

    if let Some(path) = &out_path {
        let json = serde_json::to_string_pretty(&report).context("encode report")?;
        fs::write(path, json).with_context(|| format!("write {}", path.display()))?;
        println!("\nreport written to {}", path.display());
    }

    if let Some(path) = &compare_path {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read baseline report {}", path.display()))?;
        let baseline: BacktestReport =
            serde_json::from_str(&raw).context("decode baseline report")?;
        let lines = compare(&baseline, &report);
        if lines.is_empty() {
            println!("\nno tier/market slice has enough bets on both sides to compare");
        } else {
            println!("\nbaseline vs current:");
            for l in lines {
                println!(
                    "{:>12} {:>7}: roi {:+.2}% -> {:+.2}%  (delta {:+.2}%, {}/{} bets)",
                    l.tier.as_str(),
                    l.market.as_str(),
                    l.roi_a * 100.0,
                    l.roi_b * 100.0,
                    l.roi_delta * 100.0,
                    l.bets_a,
                    l.bets_b
                );
            }
        }
    }
    Ok(())
}
