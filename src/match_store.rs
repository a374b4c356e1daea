use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{Days, NaiveDate, Utc};
use rusqlite::{Connection, params};

use crate::markets::{MarketOdds, MatchRecord, MatchStatus, Prediction, TeamRef};

pub fn default_db_path() -> PathBuf {
    std::env::var_os("MATCHEDGE_DB")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("matchedge.sqlite"))
}

pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let conn =
        Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS matches (
            match_id INTEGER PRIMARY KEY,
            league_id INTEGER NOT NULL,
            season TEXT NOT NULL,
            match_date TEXT NOT NULL,
            kickoff TEXT NOT NULL,
            status TEXT NOT NULL,
            home_team_id INTEGER NOT NULL,
            home_team TEXT NOT NULL,
            away_team_id INTEGER NOT NULL,
            away_team TEXT NOT NULL,
            home_goals INTEGER NOT NULL,
            away_goals INTEGER NOT NULL,
            odds_home REAL NOT NULL,
            odds_draw REAL NOT NULL,
            odds_away REAL NOT NULL,
            odds_over REAL NOT NULL,
            odds_under REAL NOT NULL,
            odds_btts_yes REAL NOT NULL,
            odds_btts_no REAL NOT NULL,
            prediction_json TEXT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_matches_league ON matches(league_id);
        CREATE INDEX IF NOT EXISTS idx_matches_season ON matches(season);
        CREATE INDEX IF NOT EXISTS idx_matches_status ON matches(status);
        "#,
    )
    .context("create sqlite schema")?;
    Ok(())
}

fn status_str(status: MatchStatus) -> &'static str {
    match status {
        MatchStatus::Scheduled => "scheduled",
        MatchStatus::Finished => "finished",
        MatchStatus::Postponed => "postponed",
    }
}

fn parse_status(raw: &str) -> Result<MatchStatus> {
    match raw {
        "scheduled" => Ok(MatchStatus::Scheduled),
        "finished" => Ok(MatchStatus::Finished),
        "postponed" => Ok(MatchStatus::Postponed),
        other => Err(anyhow!("unknown match status {other:?}")),
    }
}

/// Upserts a batch inside one transaction. Fixture feeds carry no
/// predictions, so a NULL incoming prediction never clobbers a stored one.
pub fn save_matches(conn: &mut Connection, matches: &[MatchRecord]) -> Result<usize> {
    let tx = conn.transaction().context("begin save transaction")?;
    for m in matches {
        let prediction_json = m
            .prediction
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("encode prediction")?;
        tx.execute(
            r#"
            INSERT INTO matches (
                match_id, league_id, season, match_date, kickoff, status,
                home_team_id, home_team, away_team_id, away_team,
                home_goals, away_goals,
                odds_home, odds_draw, odds_away, odds_over, odds_under,
                odds_btts_yes, odds_btts_no,
                prediction_json, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6,
                ?7, ?8, ?9, ?10,
                ?11, ?12,
                ?13, ?14, ?15, ?16, ?17,
                ?18, ?19,
                ?20, ?21
            )
            ON CONFLICT(match_id) DO UPDATE SET
                league_id = excluded.league_id,
                season = excluded.season,
                match_date = excluded.match_date,
                kickoff = excluded.kickoff,
                status = excluded.status,
                home_team_id = excluded.home_team_id,
                home_team = excluded.home_team,
                away_team_id = excluded.away_team_id,
                away_team = excluded.away_team,
                home_goals = excluded.home_goals,
                away_goals = excluded.away_goals,
                odds_home = excluded.odds_home,
                odds_draw = excluded.odds_draw,
                odds_away = excluded.odds_away,
                odds_over = excluded.odds_over,
                odds_under = excluded.odds_under,
                odds_btts_yes = excluded.odds_btts_yes,
                odds_btts_no = excluded.odds_btts_no,
                prediction_json = COALESCE(excluded.prediction_json, matches.prediction_json),
                updated_at = excluded.updated_at
            "#,
            params![
                m.id as i64,
                m.league_id as i64,
                m.season,
                m.date,
                m.kickoff,
                status_str(m.status),
                m.home.id as i64,
                m.home.name,
                m.away.id as i64,
                m.away.name,
                m.home_goals,
                m.away_goals,
                m.odds.home,
                m.odds.draw,
                m.odds.away,
                m.odds.over,
                m.odds.under,
                m.odds.btts_yes,
                m.odds.btts_no,
                prediction_json,
                Utc::now().to_rfc3339(),
            ],
        )
        .context("upsert match")?;
    }
    tx.commit().context("commit save transaction")?;
    Ok(matches.len())
}

pub fn save_prediction(conn: &Connection, match_id: u64, prediction: &Prediction) -> Result<()> {
    let json = serde_json::to_string(prediction).context("encode prediction")?;
    let changed = conn
        .execute(
            "UPDATE matches SET prediction_json = ?1, updated_at = ?2 WHERE match_id = ?3",
            params![json, Utc::now().to_rfc3339(), match_id as i64],
        )
        .context("store prediction")?;
    if changed == 0 {
        return Err(anyhow!("no stored match with id {match_id}"));
    }
    Ok(())
}

const SELECT_COLUMNS: &str = r#"
    SELECT
        match_id, league_id, season, match_date, kickoff, status,
        home_team_id, home_team, away_team_id, away_team,
        home_goals, away_goals,
        odds_home, odds_draw, odds_away, odds_over, odds_under,
        odds_btts_yes, odds_btts_no,
        prediction_json
    FROM matches
"#;

fn decode_row(
    row: &rusqlite::Row<'_>,
) -> rusqlite::Result<(MatchRecord, String, Option<String>)> {
    let league_id: u32 = row.get(1)?;
    let record = MatchRecord {
        id: row.get::<_, u64>(0)?,
        league_id,
        season: row.get(2)?,
        date: row.get(3)?,
        kickoff: row.get(4)?,
        // Overwritten by the caller once the raw status text is validated.
        status: MatchStatus::Scheduled,
        home: TeamRef {
            id: row.get::<_, u32>(6)?,
            name: row.get(7)?,
            league_id,
        },
        away: TeamRef {
            id: row.get::<_, u32>(8)?,
            name: row.get(9)?,
            league_id,
        },
        home_goals: row.get(10)?,
        away_goals: row.get(11)?,
        odds: MarketOdds {
            home: row.get(12)?,
            draw: row.get(13)?,
            away: row.get(14)?,
            over: row.get(15)?,
            under: row.get(16)?,
            btts_yes: row.get(17)?,
            btts_no: row.get(18)?,
        },
        prediction: None,
    };
    let status_raw: String = row.get(5)?;
    let prediction_json: Option<String> = row.get(19)?;
    Ok((record, status_raw, prediction_json))
}

fn load_where(
    conn: &Connection,
    clause: &str,
    args: &[&dyn rusqlite::ToSql],
) -> Result<Vec<MatchRecord>> {
    let sql = format!("{SELECT_COLUMNS} {clause} ORDER BY match_id ASC");
    let mut stmt = conn.prepare(&sql).context("prepare match query")?;
    let rows = stmt.query_map(args, decode_row).context("query matches")?;

    let mut out = Vec::new();
    for row in rows {
        let (mut record, status_raw, prediction_json) = row.context("decode match row")?;
        record.status = parse_status(&status_raw)?;
        if let Some(json) = prediction_json {
            record.prediction = Some(
                serde_json::from_str(&json)
                    .with_context(|| format!("decode prediction for match {}", record.id))?,
            );
        }
        out.push(record);
    }
    out.sort_by(|a, b| a.parsed_date().cmp(&b.parsed_date()).then(a.id.cmp(&b.id)));
    Ok(out)
}

/// Finished matches with a real score, date ascending. Scoped to one
/// league when an id is given.
pub fn load_finished_matches(conn: &Connection, league_id: Option<u32>) -> Result<Vec<MatchRecord>> {
    match league_id {
        Some(id) => load_where(
            conn,
            "WHERE status = 'finished' AND home_goals >= 0 AND away_goals >= 0 AND league_id = ?1",
            &[&(id as i64)],
        ),
        None => load_where(
            conn,
            "WHERE status = 'finished' AND home_goals >= 0 AND away_goals >= 0",
            &[],
        ),
    }
}

/// Scheduled matches whose date falls inside [today, today + horizon].
/// Unparseable dates are excluded rather than guessed at.
pub fn load_upcoming_matches(
    conn: &Connection,
    today: NaiveDate,
    horizon_days: u64,
) -> Result<Vec<MatchRecord>> {
    let all = load_where(conn, "WHERE status = 'scheduled'", &[])?;
    let limit = today + Days::new(horizon_days);
    Ok(all
        .into_iter()
        .filter(|m| {
            m.parsed_date()
                .is_some_and(|d| d >= today && d <= limit)
        })
        .collect())
}

/// Scheduled matches beyond the horizon, for the fixture outlook.
pub fn load_future_matches(
    conn: &Connection,
    today: NaiveDate,
    horizon_days: u64,
) -> Result<Vec<MatchRecord>> {
    let all = load_where(conn, "WHERE status = 'scheduled'", &[])?;
    let limit = today + Days::new(horizon_days);
    Ok(all
        .into_iter()
        .filter(|m| m.parsed_date().is_some_and(|d| d > limit))
        .collect())
}
