use std::collections::HashMap;

use chrono::NaiveDate;
use rayon::prelude::*;

use crate::markets::MatchRecord;

pub const FEATURE_COUNT: usize = 50;

/// Documented layout of the feature vector. Index i of `extract` output is
/// the value named here.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    // Season-accumulated, overall (8)
    "acc_home_ppm",
    "acc_home_gf",
    "acc_home_gc",
    "acc_home_wr",
    "acc_away_ppm",
    "acc_away_gf",
    "acc_away_gc",
    "acc_away_wr",
    // Season-accumulated, venue-specific (4)
    "acc_home_at_home_gf",
    "acc_home_at_home_gc",
    "acc_away_at_away_gf",
    "acc_away_at_away_gc",
    // Differentials (4)
    "diff_ppm",
    "diff_home_atk_away_def",
    "diff_away_atk_home_def",
    "diff_venue_atk_def",
    // Ratios (2)
    "ratio_home_atk_away_def",
    "ratio_away_atk_home_def",
    // Season depth (2)
    "season_depth_home",
    "season_depth_away",
    // Recent streak, overall (6)
    "streak_home_pts",
    "streak_home_gf",
    "streak_home_gc",
    "streak_away_pts",
    "streak_away_gf",
    "streak_away_gc",
    // Recent streak, venue-specific (4)
    "streak_home_at_home_pts",
    "streak_home_at_home_gf",
    "streak_away_at_away_pts",
    "streak_away_at_away_gf",
    // Streak differentials (2)
    "diff_streak_pts",
    "diff_streak_gf",
    // Head-to-head (5)
    "h2h_home_wins",
    "h2h_away_wins",
    "h2h_draws",
    "h2h_goal_diff",
    "h2h_depth",
    // Rest days (3)
    "rest_home",
    "rest_away",
    "rest_diff",
    // Market rates (6)
    "btts_rate_home",
    "btts_rate_away",
    "over_rate_home",
    "over_rate_away",
    "btts_rate_avg",
    "over_rate_avg",
    // Strength buckets (4)
    "bucket_home_strong",
    "bucket_away_strong",
    "bucket_home_top",
    "bucket_away_top",
];

pub const STREAK_WINDOW: usize = 5;
pub const H2H_WINDOW: usize = 10;
pub const MARKET_RATE_WINDOW: usize = 10;
pub const DEFAULT_REST_DAYS: i64 = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Venue {
    Home,
    Away,
}

#[derive(Debug, Clone, Copy)]
pub struct SeasonStats {
    pub ppm: f64,
    pub gf: f64,
    pub gc: f64,
    pub win_rate: f64,
    pub played: usize,
}

impl SeasonStats {
    /// League-average-like prior used before a team has any history in the
    /// league+season, so cold starts do not collapse to zero variance.
    pub fn neutral() -> Self {
        Self {
            ppm: 1.0,
            gf: 1.0,
            gc: 1.0,
            win_rate: 0.33,
            played: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StreakStats {
    /// Points over the window normalized to 0..1 (points / 3n).
    pub points: f64,
    pub gf: f64,
    pub gc: f64,
    pub played: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HeadToHead {
    pub home_wins: f64,
    pub away_wins: f64,
    pub draws: f64,
    pub goal_diff: f64,
    pub samples: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct MarketRates {
    pub btts: f64,
    pub over: f64,
}

impl MarketRates {
    pub fn neutral() -> Self {
        Self { btts: 0.5, over: 0.5 }
    }
}

#[derive(Debug, Clone, Copy)]
struct TeamEntry {
    date: NaiveDate,
    idx: usize,
    venue: Venue,
}

#[derive(Debug, Clone, Copy)]
struct PairEntry {
    date: NaiveDate,
    idx: usize,
}

/// Builds the 50-feature vector for a match from the full corpus of
/// finished matches. Every historical lookup filters to dates strictly
/// before the target date, so the target match may safely sit in its own
/// index during batch generation.
pub struct FeatureExtractor {
    matches: Vec<MatchRecord>,
    by_team: HashMap<u32, Vec<TeamEntry>>,
    by_pair: HashMap<(u32, u32), Vec<PairEntry>>,
}

impl FeatureExtractor {
    pub fn new(corpus: &[MatchRecord]) -> Self {
        let mut matches: Vec<MatchRecord> = corpus
            .iter()
            .filter(|m| m.is_finished() && m.parsed_date().is_some())
            .cloned()
            .collect();
        matches.sort_by(|a, b| {
            a.parsed_date()
                .cmp(&b.parsed_date())
                .then(a.id.cmp(&b.id))
        });

        let mut by_team: HashMap<u32, Vec<TeamEntry>> = HashMap::new();
        let mut by_pair: HashMap<(u32, u32), Vec<PairEntry>> = HashMap::new();
        for (idx, m) in matches.iter().enumerate() {
            let Some(date) = m.parsed_date() else { continue };
            by_team.entry(m.home.id).or_default().push(TeamEntry {
                date,
                idx,
                venue: Venue::Home,
            });
            by_team.entry(m.away.id).or_default().push(TeamEntry {
                date,
                idx,
                venue: Venue::Away,
            });
            let key = pair_key(m.home.id, m.away.id);
            by_pair.entry(key).or_default().push(PairEntry { date, idx });
        }
        // Construction order already sorted the entries chronologically.

        Self {
            matches,
            by_team,
            by_pair,
        }
    }

    pub fn indexed_matches(&self) -> usize {
        self.matches.len()
    }

    pub fn season_stats(
        &self,
        team_id: u32,
        before: NaiveDate,
        league_id: u32,
        season: &str,
        venue: Option<Venue>,
    ) -> SeasonStats {
        let Some(entries) = self.by_team.get(&team_id) else {
            return SeasonStats::neutral();
        };

        let mut points = 0u32;
        let mut gf = 0i64;
        let mut gc = 0i64;
        let mut wins = 0usize;
        let mut n = 0usize;

        for e in entries {
            if e.date >= before {
                break;
            }
            if let Some(filter) = venue {
                if e.venue != filter {
                    continue;
                }
            }
            let m = &self.matches[e.idx];
            if m.league_id != league_id || m.season != season {
                continue;
            }
            let Some(code) = m.result_code() else { continue };
            n += 1;
            let (won, drew) = match e.venue {
                Venue::Home => {
                    gf += m.home_goals.max(0) as i64;
                    gc += m.away_goals.max(0) as i64;
                    (code == 1, code == 0)
                }
                Venue::Away => {
                    gf += m.away_goals.max(0) as i64;
                    gc += m.home_goals.max(0) as i64;
                    (code == 2, code == 0)
                }
            };
            if won {
                points += 3;
                wins += 1;
            } else if drew {
                points += 1;
            }
        }

        if n == 0 {
            return SeasonStats::neutral();
        }
        let nf = n as f64;
        SeasonStats {
            ppm: points as f64 / nf,
            gf: gf as f64 / nf,
            gc: gc as f64 / nf,
            win_rate: wins as f64 / nf,
            played: n,
        }
    }

    pub fn streak_stats(
        &self,
        team_id: u32,
        before: NaiveDate,
        window: usize,
        venue: Option<Venue>,
    ) -> StreakStats {
        let Some(entries) = self.by_team.get(&team_id) else {
            return StreakStats::default();
        };

        let mut points = 0u32;
        let mut gf = 0i64;
        let mut gc = 0i64;
        let mut n = 0usize;

        for e in entries.iter().rev() {
            if e.date >= before {
                continue;
            }
            if let Some(filter) = venue {
                if e.venue != filter {
                    continue;
                }
            }
            let m = &self.matches[e.idx];
            let Some(code) = m.result_code() else { continue };
            n += 1;
            match e.venue {
                Venue::Home => {
                    gf += m.home_goals.max(0) as i64;
                    gc += m.away_goals.max(0) as i64;
                    if code == 1 {
                        points += 3;
                    } else if code == 0 {
                        points += 1;
                    }
                }
                Venue::Away => {
                    gf += m.away_goals.max(0) as i64;
                    gc += m.home_goals.max(0) as i64;
                    if code == 2 {
                        points += 3;
                    } else if code == 0 {
                        points += 1;
                    }
                }
            }
            if n >= window {
                break;
            }
        }

        if n == 0 {
            return StreakStats::default();
        }
        let nf = n as f64;
        StreakStats {
            points: points as f64 / (nf * 3.0),
            gf: gf as f64 / nf,
            gc: gc as f64 / nf,
            played: n,
        }
    }

    /// H2H counters from the perspective of `home_id`, normalized by the
    /// number of prior meetings seen (capped at `window`).
    pub fn head_to_head(
        &self,
        home_id: u32,
        away_id: u32,
        before: NaiveDate,
        window: usize,
    ) -> HeadToHead {
        let Some(entries) = self.by_pair.get(&pair_key(home_id, away_id)) else {
            return HeadToHead::default();
        };

        let mut home_wins = 0usize;
        let mut away_wins = 0usize;
        let mut draws = 0usize;
        let mut diff = 0i64;
        let mut n = 0usize;

        for e in entries.iter().rev() {
            if e.date >= before {
                continue;
            }
            let m = &self.matches[e.idx];
            let Some(code) = m.result_code() else { continue };
            n += 1;
            let (gf, ga, won, lost) = if m.home.id == home_id {
                (m.home_goals.max(0), m.away_goals.max(0), code == 1, code == 2)
            } else {
                (m.away_goals.max(0), m.home_goals.max(0), code == 2, code == 1)
            };
            diff += (gf - ga) as i64;
            if won {
                home_wins += 1;
            } else if lost {
                away_wins += 1;
            } else {
                draws += 1;
            }
            if n >= window {
                break;
            }
        }

        if n == 0 {
            return HeadToHead::default();
        }
        let nf = n as f64;
        HeadToHead {
            home_wins: home_wins as f64 / nf,
            away_wins: away_wins as f64 / nf,
            draws: draws as f64 / nf,
            goal_diff: diff as f64 / nf,
            samples: n,
        }
    }

    /// Calendar days since the team's previous match; 14 when none exists.
    pub fn rest_days(&self, team_id: u32, date: NaiveDate) -> i64 {
        let Some(entries) = self.by_team.get(&team_id) else {
            return DEFAULT_REST_DAYS;
        };
        for e in entries.iter().rev() {
            if e.date < date {
                return (date - e.date).num_days();
            }
        }
        DEFAULT_REST_DAYS
    }

    pub fn market_rates(&self, team_id: u32, before: NaiveDate, window: usize) -> MarketRates {
        let Some(entries) = self.by_team.get(&team_id) else {
            return MarketRates::neutral();
        };

        let mut btts = 0usize;
        let mut over = 0usize;
        let mut n = 0usize;
        for e in entries.iter().rev() {
            if e.date >= before {
                continue;
            }
            let m = &self.matches[e.idx];
            let (Some(b), Some(o)) = (m.btts(), m.over25()) else {
                continue;
            };
            n += 1;
            if b {
                btts += 1;
            }
            if o {
                over += 1;
            }
            if n >= window {
                break;
            }
        }

        if n == 0 {
            return MarketRates::neutral();
        }
        MarketRates {
            btts: btts as f64 / n as f64,
            over: over as f64 / n as f64,
        }
    }

    pub fn extract(&self, m: &MatchRecord) -> [f64; FEATURE_COUNT] {
        let date = m.parsed_date();
        let home = m.home.id;
        let away = m.away.id;

        let (acc_h, acc_a, acc_hh, acc_aa) = match date {
            Some(d) => (
                self.season_stats(home, d, m.league_id, &m.season, None),
                self.season_stats(away, d, m.league_id, &m.season, None),
                self.season_stats(home, d, m.league_id, &m.season, Some(Venue::Home)),
                self.season_stats(away, d, m.league_id, &m.season, Some(Venue::Away)),
            ),
            None => (
                SeasonStats::neutral(),
                SeasonStats::neutral(),
                SeasonStats::neutral(),
                SeasonStats::neutral(),
            ),
        };

        let (st_h, st_a, st_hh, st_aa, h2h, rest_h, rest_a, rates_h, rates_a) = match date {
            Some(d) => (
                self.streak_stats(home, d, STREAK_WINDOW, None),
                self.streak_stats(away, d, STREAK_WINDOW, None),
                self.streak_stats(home, d, STREAK_WINDOW, Some(Venue::Home)),
                self.streak_stats(away, d, STREAK_WINDOW, Some(Venue::Away)),
                self.head_to_head(home, away, d, H2H_WINDOW),
                self.rest_days(home, d),
                self.rest_days(away, d),
                self.market_rates(home, d, MARKET_RATE_WINDOW),
                self.market_rates(away, d, MARKET_RATE_WINDOW),
            ),
            None => (
                StreakStats::default(),
                StreakStats::default(),
                StreakStats::default(),
                StreakStats::default(),
                HeadToHead::default(),
                DEFAULT_REST_DAYS,
                DEFAULT_REST_DAYS,
                MarketRates::neutral(),
                MarketRates::neutral(),
            ),
        };

        let mut x = [0.0_f64; FEATURE_COUNT];
        let mut i = 0usize;
        let mut push = |v: f64| {
            x[i] = v;
            i += 1;
        };

        // Season-accumulated block.
        push(acc_h.ppm);
        push(acc_h.gf);
        push(acc_h.gc);
        push(acc_h.win_rate);
        push(acc_a.ppm);
        push(acc_a.gf);
        push(acc_a.gc);
        push(acc_a.win_rate);
        push(acc_hh.gf);
        push(acc_hh.gc);
        push(acc_aa.gf);
        push(acc_aa.gc);
        push(acc_h.ppm - acc_a.ppm);
        push(acc_h.gf - acc_a.gc);
        push(acc_a.gf - acc_h.gc);
        push(acc_hh.gf - acc_aa.gc);
        // Additive epsilon keeps the ratios defined for airtight defenses.
        push(acc_h.gf / (acc_a.gc + 0.1));
        push(acc_a.gf / (acc_h.gc + 0.1));
        push((acc_h.played.min(38) as f64) / 38.0);
        push((acc_a.played.min(38) as f64) / 38.0);

        // Streak / H2H / rest / market-rate block.
        push(st_h.points);
        push(st_h.gf);
        push(st_h.gc);
        push(st_a.points);
        push(st_a.gf);
        push(st_a.gc);
        push(st_hh.points);
        push(st_hh.gf);
        push(st_aa.points);
        push(st_aa.gf);
        push(st_h.points - st_a.points);
        push(st_h.gf - st_a.gf);
        push(h2h.home_wins);
        push(h2h.away_wins);
        push(h2h.draws);
        push(h2h.goal_diff);
        push((h2h.samples.min(H2H_WINDOW) as f64) / H2H_WINDOW as f64);
        push((rest_h.min(30) as f64) / 30.0);
        push((rest_a.min(30) as f64) / 30.0);
        push((rest_h - rest_a) as f64 / 30.0);
        push(rates_h.btts);
        push(rates_a.btts);
        push(rates_h.over);
        push(rates_a.over);
        push((rates_h.btts + rates_a.btts) / 2.0);
        push((rates_h.over + rates_a.over) / 2.0);

        // Coarse strength buckets.
        push(if acc_h.ppm >= 1.8 { 1.0 } else { 0.0 });
        push(if acc_a.ppm >= 1.8 { 1.0 } else { 0.0 });
        push(if acc_h.ppm >= 2.2 { 1.0 } else { 0.0 });
        push(if acc_a.ppm >= 2.2 { 1.0 } else { 0.0 });

        debug_assert_eq!(i, FEATURE_COUNT);
        x
    }

    pub fn extract_matrix(&self, matches: &[MatchRecord]) -> Vec<[f64; FEATURE_COUNT]> {
        matches.par_iter().map(|m| self.extract(m)).collect()
    }
}

fn pair_key(a: u32, b: u32) -> (u32, u32) {
    (a.min(b), a.max(b))
}

/// Rewrites team ids in `extra` to the ids `corpus` uses for the same
/// team names. Curated fixture files carry their own numbering, and an
/// unaligned id misses the history index entirely, scoring the fixture
/// as a cold start. Names are matched after trimming; teams unknown to
/// the corpus keep their original ids.
pub fn align_team_ids(corpus: &[MatchRecord], extra: &[MatchRecord]) -> Vec<MatchRecord> {
    let mut by_name: HashMap<&str, u32> = HashMap::new();
    for m in corpus {
        by_name.entry(m.home.name.trim()).or_insert(m.home.id);
        by_name.entry(m.away.name.trim()).or_insert(m.away.id);
    }
    extra
        .iter()
        .map(|m| {
            let mut m = m.clone();
            if let Some(&id) = by_name.get(m.home.name.trim()) {
                m.home.id = id;
            }
            if let Some(&id) = by_name.get(m.away.name.trim()) {
                m.away.id = id;
            }
            m
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markets::{MarketOdds, MatchStatus, TeamRef};

    fn played(id: u64, date: &str, home: u32, away: u32, hg: i32, ag: i32) -> MatchRecord {
        MatchRecord {
            id,
            league_id: 1,
            season: "2025".to_string(),
            date: date.to_string(),
            kickoff: "18:00".to_string(),
            status: MatchStatus::Finished,
            home: TeamRef {
                id: home,
                name: format!("T{home}"),
                league_id: 1,
            },
            away: TeamRef {
                id: away,
                name: format!("T{away}"),
                league_id: 1,
            },
            home_goals: hg,
            away_goals: ag,
            odds: MarketOdds::unpriced(),
            prediction: None,
        }
    }

    #[test]
    fn feature_names_cover_the_vector() {
        assert_eq!(FEATURE_NAMES.len(), FEATURE_COUNT);
    }

    #[test]
    fn lookups_ignore_same_day_and_later_matches() {
        let corpus = vec![
            played(1, "01/01/2025", 1, 2, 3, 0),
            played(2, "10/01/2025", 1, 2, 2, 2),
            played(3, "20/01/2025", 1, 2, 0, 5),
        ];
        let ex = FeatureExtractor::new(&corpus);
        let cutoff = parse("10/01/2025");

        let season = ex.season_stats(1, cutoff, 1, "2025", None);
        assert_eq!(season.played, 1);
        assert!((season.ppm - 3.0).abs() < 1e-12);

        let streak = ex.streak_stats(1, cutoff, 5, None);
        assert_eq!(streak.played, 1);
        assert!((streak.gf - 3.0).abs() < 1e-12);
    }

    #[test]
    fn rest_days_default_without_history() {
        let ex = FeatureExtractor::new(&[]);
        assert_eq!(ex.rest_days(7, parse("01/01/2025")), DEFAULT_REST_DAYS);
    }

    #[test]
    fn rest_days_count_from_previous_match() {
        let corpus = vec![played(1, "01/01/2025", 1, 2, 1, 0)];
        let ex = FeatureExtractor::new(&corpus);
        assert_eq!(ex.rest_days(1, parse("08/01/2025")), 7);
        assert_eq!(ex.rest_days(2, parse("04/01/2025")), 3);
    }

    #[test]
    fn market_rates_default_to_uninformative_prior() {
        let ex = FeatureExtractor::new(&[]);
        let rates = ex.market_rates(1, parse("01/01/2025"), MARKET_RATE_WINDOW);
        assert!((rates.btts - 0.5).abs() < 1e-12);
        assert!((rates.over - 0.5).abs() < 1e-12);
    }

    #[test]
    fn head_to_head_is_symmetric_in_perspective() {
        let corpus = vec![
            played(1, "01/01/2025", 1, 2, 2, 0),
            played(2, "08/01/2025", 2, 1, 1, 1),
            played(3, "15/01/2025", 1, 2, 0, 1),
        ];
        let ex = FeatureExtractor::new(&corpus);
        let cutoff = parse("01/02/2025");

        let from_1 = ex.head_to_head(1, 2, cutoff, H2H_WINDOW);
        let from_2 = ex.head_to_head(2, 1, cutoff, H2H_WINDOW);
        assert_eq!(from_1.samples, 3);
        assert!((from_1.home_wins - from_2.away_wins).abs() < 1e-12);
        assert!((from_1.goal_diff + from_2.goal_diff).abs() < 1e-12);
    }

    #[test]
    fn unparseable_date_short_circuits_to_defaults() {
        let corpus = vec![played(1, "01/01/2025", 1, 2, 4, 0)];
        let ex = FeatureExtractor::new(&corpus);
        let mut target = played(9, "garbage", 1, 2, -1, -1);
        target.status = MatchStatus::Scheduled;

        let x = ex.extract(&target);
        // Season block is the neutral prior, not team 1's crushing form.
        assert!((x[0] - 1.0).abs() < 1e-12);
        assert!((x[3] - 0.33).abs() < 1e-12);
        // Market rates fall back to 0.5.
        assert!((x[40] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn foreign_ids_align_to_corpus_history_by_name() {
        let corpus = vec![
            played(1, "01/02/2025", 1, 2, 3, 0),
            played(2, "08/02/2025", 1, 2, 4, 1),
            played(3, "15/02/2025", 2, 1, 0, 2),
        ];
        let ex = FeatureExtractor::new(&corpus);

        // A curated copy of the fixture with its own id scheme but the
        // same team names. Unaligned it misses the index entirely and is
        // indistinguishable from two teams nobody has ever seen.
        let mut foreign = played(900, "01/03/2025", 1, 2, -1, -1);
        foreign.home.id = 101;
        foreign.away.id = 102;
        let stranger = played(901, "01/03/2025", 77, 78, -1, -1);
        assert_eq!(ex.extract(&foreign), ex.extract(&stranger));

        let aligned = align_team_ids(&corpus, &[foreign]);
        assert_eq!(aligned[0].home.id, 1);
        assert_eq!(aligned[0].away.id, 2);
        let native = played(902, "01/03/2025", 1, 2, -1, -1);
        assert_eq!(ex.extract(&aligned[0]), ex.extract(&native));
        assert_ne!(ex.extract(&aligned[0]), ex.extract(&stranger));
    }

    #[test]
    fn indexed_curated_matches_feed_later_curated_fixtures() {
        let corpus = vec![played(1, "01/02/2025", 1, 2, 1, 1)];
        let early = played(50, "08/02/2025", 3, 4, 2, 0);
        let target = played(51, "15/02/2025", 3, 4, -1, -1);

        let without = FeatureExtractor::new(&corpus);
        let mut combined = corpus.clone();
        combined.push(early);
        let with = FeatureExtractor::new(&combined);
        assert_ne!(without.extract(&target), with.extract(&target));
    }

    fn parse(raw: &str) -> NaiveDate {
        crate::markets::parse_match_date(raw).unwrap()
    }
}
