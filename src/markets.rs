use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Sentinel for a market that carries no bookmaker price.
pub const UNPRICED: f64 = -1.0;

/// Sentinel for a score that has not been recorded yet.
pub const NO_SCORE: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchStatus {
    Scheduled,
    Finished,
    Postponed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamRef {
    pub id: u32,
    pub name: String,
    pub league_id: u32,
}

/// Seven decimal odds for the three markets. A field is either a valid
/// decimal price > 1.0 or the -1 sentinel; `price` is the only sanctioned
/// way to read one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketOdds {
    pub home: f64,
    pub draw: f64,
    pub away: f64,
    pub over: f64,
    pub under: f64,
    pub btts_yes: f64,
    pub btts_no: f64,
}

impl Default for MarketOdds {
    fn default() -> Self {
        Self::unpriced()
    }
}

impl MarketOdds {
    pub fn unpriced() -> Self {
        Self {
            home: UNPRICED,
            draw: UNPRICED,
            away: UNPRICED,
            over: UNPRICED,
            under: UNPRICED,
            btts_yes: UNPRICED,
            btts_no: UNPRICED,
        }
    }

    pub fn price(raw: f64) -> Option<f64> {
        if raw.is_finite() && raw > 1.0 {
            Some(raw)
        } else {
            None
        }
    }

    pub fn result_price(&self, pick: ResultPick) -> Option<f64> {
        match pick {
            ResultPick::Home => Self::price(self.home),
            ResultPick::Draw => Self::price(self.draw),
            ResultPick::Away => Self::price(self.away),
        }
    }

    pub fn btts_price(&self, pick: BttsPick) -> Option<f64> {
        match pick {
            BttsPick::Yes => Self::price(self.btts_yes),
            BttsPick::No => Self::price(self.btts_no),
        }
    }

    pub fn total_price(&self, pick: TotalPick) -> Option<f64> {
        match pick {
            TotalPick::Over => Self::price(self.over),
            TotalPick::Under => Self::price(self.under),
        }
    }

    /// Bookmaker margin of the 1X2 market; None when any side is unpriced.
    pub fn result_overround(&self) -> Option<f64> {
        let h = Self::price(self.home)?;
        let d = Self::price(self.draw)?;
        let a = Self::price(self.away)?;
        Some(1.0 / h + 1.0 / d + 1.0 / a - 1.0)
    }

    pub fn btts_overround(&self) -> Option<f64> {
        let y = Self::price(self.btts_yes)?;
        let n = Self::price(self.btts_no)?;
        Some(1.0 / y + 1.0 / n - 1.0)
    }

    pub fn total_overround(&self) -> Option<f64> {
        let o = Self::price(self.over)?;
        let u = Self::price(self.under)?;
        Some(1.0 / o + 1.0 / u - 1.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: u64,
    pub league_id: u32,
    pub season: String,
    /// Day-first date string as the fixture feeds deliver it ("dd/mm/YYYY",
    /// with "YYYY-mm-dd" accepted as a fallback).
    pub date: String,
    pub kickoff: String,
    pub status: MatchStatus,
    pub home: TeamRef,
    pub away: TeamRef,
    pub home_goals: i32,
    pub away_goals: i32,
    pub odds: MarketOdds,
    #[serde(default)]
    pub prediction: Option<Prediction>,
}

impl MatchRecord {
    pub fn parsed_date(&self) -> Option<NaiveDate> {
        parse_match_date(&self.date)
    }

    pub fn is_finished(&self) -> bool {
        self.status == MatchStatus::Finished
            && self.home_goals >= 0
            && self.away_goals >= 0
    }

    /// 1X2 code: 0 draw, 1 home win, 2 away win. None until finished.
    pub fn result_code(&self) -> Option<u8> {
        if !self.is_finished() {
            return None;
        }
        Some(if self.home_goals > self.away_goals {
            1
        } else if self.home_goals < self.away_goals {
            2
        } else {
            0
        })
    }

    pub fn btts(&self) -> Option<bool> {
        if !self.is_finished() {
            return None;
        }
        Some(self.home_goals > 0 && self.away_goals > 0)
    }

    pub fn over25(&self) -> Option<bool> {
        if !self.is_finished() {
            return None;
        }
        Some(self.home_goals + self.away_goals > 2)
    }
}

pub fn parse_match_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(s, "%d/%m/%Y")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Market {
    Result,
    Btts,
    Over,
}

impl Market {
    pub const ALL: [Market; 3] = [Market::Result, Market::Btts, Market::Over];

    pub fn as_str(&self) -> &'static str {
        match self {
            Market::Result => "result",
            Market::Btts => "btts",
            Market::Over => "over",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Conservative,
    Moderate,
    Aggressive,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Conservative, Tier::Moderate, Tier::Aggressive];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Conservative => "conservative",
            Tier::Moderate => "moderate",
            Tier::Aggressive => "aggressive",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultPick {
    Draw,
    Home,
    Away,
}

impl ResultPick {
    pub fn code(&self) -> u8 {
        match self {
            ResultPick::Draw => 0,
            ResultPick::Home => 1,
            ResultPick::Away => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BttsPick {
    Yes,
    No,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TotalPick {
    Over,
    Under,
}

/// Per-tier recommendation flags. Pre-meta-filter these cascade: a
/// conservative recommendation always implies moderate and aggressive
/// eligibility; the meta-model veto may later break the cascade.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierFlags {
    #[serde(default)]
    pub conservative: bool,
    #[serde(default)]
    pub moderate: bool,
    #[serde(default)]
    pub aggressive: bool,
}

impl TierFlags {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn get(&self, tier: Tier) -> bool {
        match tier {
            Tier::Conservative => self.conservative,
            Tier::Moderate => self.moderate,
            Tier::Aggressive => self.aggressive,
        }
    }

    pub fn clear(&mut self, tier: Tier) {
        match tier {
            Tier::Conservative => self.conservative = false,
            Tier::Moderate => self.moderate = false,
            Tier::Aggressive => self.aggressive = false,
        }
    }

    pub fn any(&self) -> bool {
        self.conservative || self.moderate || self.aggressive
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExpectedGoals {
    pub home: f64,
    pub away: f64,
}

impl Default for ExpectedGoals {
    fn default() -> Self {
        Self { home: 1.0, away: 1.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResultProbs {
    pub home: f64,
    pub draw: f64,
    pub away: f64,
}

impl Default for ResultProbs {
    fn default() -> Self {
        Self {
            home: 1.0 / 3.0,
            draw: 1.0 / 3.0,
            away: 1.0 / 3.0,
        }
    }
}

impl ResultProbs {
    pub fn get(&self, pick: ResultPick) -> f64 {
        match pick {
            ResultPick::Home => self.home,
            ResultPick::Draw => self.draw,
            ResultPick::Away => self.away,
        }
    }

    /// Argmax pick with its probability. Ties resolve home > draw > away,
    /// matching the class order of the result model.
    pub fn top(&self) -> (ResultPick, f64) {
        if self.home >= self.draw && self.home >= self.away {
            (ResultPick::Home, self.home)
        } else if self.draw >= self.away {
            (ResultPick::Draw, self.draw)
        } else {
            (ResultPick::Away, self.away)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultMarket {
    pub probs: ResultProbs,
    pub pick: ResultPick,
    pub top_prob: f64,
    pub recommendation: TierFlags,
}

impl Default for ResultMarket {
    fn default() -> Self {
        Self {
            probs: ResultProbs::default(),
            pick: ResultPick::Home,
            top_prob: 1.0 / 3.0,
            recommendation: TierFlags::none(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BttsMarket {
    /// Probability of the chosen side, not of "yes" unconditionally.
    pub probability: f64,
    pub pick: BttsPick,
    pub recommendation: TierFlags,
}

impl Default for BttsMarket {
    fn default() -> Self {
        Self {
            probability: 0.5,
            pick: BttsPick::No,
            recommendation: TierFlags::none(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TotalsMarket {
    pub probability: f64,
    pub pick: TotalPick,
    pub recommendation: TierFlags,
}

impl Default for TotalsMarket {
    fn default() -> Self {
        Self {
            probability: 0.5,
            pick: TotalPick::Under,
            recommendation: TierFlags::none(),
        }
    }
}

/// Full prediction record. All three markets are always present; a
/// partially stored record hydrates missing pieces via the serde defaults
/// (uniform probabilities, no recommendations).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Prediction {
    pub expected_goals: ExpectedGoals,
    pub result: ResultMarket,
    pub btts: BttsMarket,
    pub over25: TotalsMarket,
}

impl Prediction {
    /// Normalizes a possibly-partial stored payload into a fully populated
    /// record. `None` hydrates to the neutral default.
    pub fn hydrate(stored: Option<Prediction>) -> Prediction {
        stored.unwrap_or_default()
    }

    pub fn flags(&self, market: Market) -> TierFlags {
        match market {
            Market::Result => self.result.recommendation,
            Market::Btts => self.btts.recommendation,
            Market::Over => self.over25.recommendation,
        }
    }

    pub fn flags_mut(&mut self, market: Market) -> &mut TierFlags {
        match market {
            Market::Result => &mut self.result.recommendation,
            Market::Btts => &mut self.btts.recommendation,
            Market::Over => &mut self.over25.recommendation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finished(home_goals: i32, away_goals: i32) -> MatchRecord {
        MatchRecord {
            id: 1,
            league_id: 10,
            season: "2025".to_string(),
            date: "14/03/2025".to_string(),
            kickoff: "20:00".to_string(),
            status: MatchStatus::Finished,
            home: TeamRef {
                id: 1,
                name: "Home FC".to_string(),
                league_id: 10,
            },
            away: TeamRef {
                id: 2,
                name: "Away FC".to_string(),
                league_id: 10,
            },
            home_goals,
            away_goals,
            odds: MarketOdds::unpriced(),
            prediction: None,
        }
    }

    #[test]
    fn outcome_flags_follow_score() {
        let m = finished(2, 1);
        assert_eq!(m.result_code(), Some(1));
        assert_eq!(m.btts(), Some(true));
        assert_eq!(m.over25(), Some(true));

        let m = finished(0, 0);
        assert_eq!(m.result_code(), Some(0));
        assert_eq!(m.btts(), Some(false));
        assert_eq!(m.over25(), Some(false));

        let m = finished(0, 3);
        assert_eq!(m.result_code(), Some(2));
        assert_eq!(m.btts(), Some(false));
        assert_eq!(m.over25(), Some(true));
    }

    #[test]
    fn unset_score_yields_no_outcome() {
        let mut m = finished(NO_SCORE, NO_SCORE);
        assert_eq!(m.result_code(), None);
        m.status = MatchStatus::Scheduled;
        m.home_goals = 2;
        m.away_goals = 0;
        assert_eq!(m.result_code(), None);
    }

    #[test]
    fn date_parsing_accepts_both_formats() {
        assert_eq!(
            parse_match_date("14/03/2025"),
            NaiveDate::from_ymd_opt(2025, 3, 14)
        );
        assert_eq!(
            parse_match_date("2025-03-14"),
            NaiveDate::from_ymd_opt(2025, 3, 14)
        );
        assert_eq!(parse_match_date("not a date"), None);
        assert_eq!(parse_match_date(""), None);
    }

    #[test]
    fn unpriced_odds_expose_no_prices() {
        let odds = MarketOdds::unpriced();
        assert!(odds.result_price(ResultPick::Home).is_none());
        assert!(odds.btts_price(BttsPick::Yes).is_none());
        assert!(odds.result_overround().is_none());
        // Sub-1.0 junk values are also unpriced.
        assert!(MarketOdds::price(0.95).is_none());
        assert!(MarketOdds::price(1.0).is_none());
        assert!(MarketOdds::price(1.85).is_some());
    }

    #[test]
    fn hydrate_fills_missing_markets() {
        let raw = r#"{"expected_goals": {"home": 1.4, "away": 0.9}}"#;
        let partial: Prediction = serde_json::from_str(raw).unwrap();
        let full = Prediction::hydrate(Some(partial));
        assert!((full.expected_goals.home - 1.4).abs() < 1e-12);
        assert!((full.result.top_prob - 1.0 / 3.0).abs() < 1e-12);
        assert!(!full.btts.recommendation.any());
    }

    #[test]
    fn prediction_round_trips_exactly() {
        let mut pred = Prediction::default();
        pred.expected_goals = ExpectedGoals { home: 1.73, away: 0.58 };
        pred.result.probs = ResultProbs {
            home: 0.512345678901,
            draw: 0.25,
            away: 0.237654321099,
        };
        let (pick, top) = pred.result.probs.top();
        pred.result.pick = pick;
        pred.result.top_prob = top;
        pred.result.recommendation.aggressive = true;
        pred.result.recommendation.moderate = true;
        pred.btts.probability = 0.61;
        pred.btts.pick = BttsPick::Yes;
        pred.over25.probability = 0.57;
        pred.over25.pick = TotalPick::Over;
        pred.over25.recommendation.aggressive = true;

        let raw = serde_json::to_string(&pred).unwrap();
        let back: Prediction = serde_json::from_str(&raw).unwrap();
        assert_eq!(pred, back);
    }
}
