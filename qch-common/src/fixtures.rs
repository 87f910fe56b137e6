//! Streaming-service fixture: schema and synthetic data.
//!
//! Loaded once before a run. Everything is inserted in a single transaction
//! so a failed load leaves the database empty.

use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime, Utc};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub const TABLES: [&str; 4] = ["users", "subscriptions", "movies", "viewing_history"];

const GENRES: [&str; 8] = [
    "Action",
    "Comedy",
    "Drama",
    "Horror",
    "Sci-Fi",
    "Romance",
    "Documentary",
    "Thriller",
];
const PLAN_TYPES: [&str; 3] = ["Basic", "Standard", "Premium"];
const COUNTRIES: [&str; 8] = [
    "USA",
    "Canada",
    "UK",
    "France",
    "Germany",
    "Japan",
    "Australia",
    "Brazil",
];
const FIRST_NAMES: [&str; 16] = [
    "Ava", "Ben", "Chloe", "Diego", "Emma", "Felix", "Grace", "Hiro", "Isla", "Jonas", "Kira",
    "Liam", "Maya", "Noah", "Olga", "Priya",
];
const LAST_NAMES: [&str; 16] = [
    "Anders", "Brooks", "Castillo", "Dubois", "Eriksen", "Fischer", "Garcia", "Hayes", "Ito",
    "Jensen", "Kowalski", "Lopez", "Martin", "Nakamura", "Okafor", "Silva",
];
const TITLE_ADJECTIVES: [&str; 12] = [
    "Silent", "Crimson", "Hidden", "Broken", "Eternal", "Midnight", "Golden", "Frozen", "Savage",
    "Distant", "Electric", "Last",
];
const TITLE_NOUNS: [&str; 12] = [
    "Horizon", "Empire", "Signal", "Garden", "Voyage", "Protocol", "Harbor", "Kingdom", "Echo",
    "Frontier", "Paradox", "Summer",
];

const SIGNUP_WINDOW_DAYS: i64 = 3 * 365;
const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS users (
    user_id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    email TEXT NOT NULL,
    signup_date TEXT NOT NULL,
    country TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS subscriptions (
    subscription_id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES users(user_id),
    plan_type TEXT NOT NULL,
    status TEXT NOT NULL,
    renewal_date TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS movies (
    movie_id INTEGER PRIMARY KEY,
    title TEXT NOT NULL,
    genre TEXT NOT NULL,
    release_year INTEGER NOT NULL,
    rating REAL NOT NULL
);
CREATE TABLE IF NOT EXISTS viewing_history (
    history_id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES users(user_id),
    movie_id INTEGER NOT NULL REFERENCES movies(movie_id),
    watch_time TEXT NOT NULL,
    duration_watched INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_viewing_history_user ON viewing_history(user_id);
CREATE INDEX IF NOT EXISTS idx_viewing_history_movie ON viewing_history(movie_id);
";

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("fixture database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("invalid fixture sizes: {0}")]
    InvalidSizes(String),
}

/// How much data to generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixtureSizes {
    pub users: u32,
    pub movies: u32,
    pub min_views_per_user: u32,
    pub max_views_per_user: u32,
}

impl Default for FixtureSizes {
    fn default() -> Self {
        Self {
            users: 1000,
            movies: 200,
            min_views_per_user: 5,
            max_views_per_user: 20,
        }
    }
}

impl FixtureSizes {
    pub fn validate(&self) -> Result<(), FixtureError> {
        if self.min_views_per_user > self.max_views_per_user {
            return Err(FixtureError::InvalidSizes(format!(
                "min_views_per_user ({}) exceeds max_views_per_user ({})",
                self.min_views_per_user, self.max_views_per_user
            )));
        }
        if self.max_views_per_user > 0 && self.movies == 0 {
            return Err(FixtureError::InvalidSizes(
                "viewing history requires at least one movie".to_string(),
            ));
        }
        Ok(())
    }
}

/// Row counts per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableCounts {
    pub users: u64,
    pub subscriptions: u64,
    pub movies: u64,
    pub viewing_history: u64,
}

pub fn setup_schema(conn: &Connection) -> Result<(), FixtureError> {
    conn.execute_batch(SCHEMA_SQL)?;
    info!("Fixture schema ready");
    Ok(())
}

/// Generate and insert the fixture data in one transaction.
pub fn populate(
    conn: &mut Connection,
    sizes: FixtureSizes,
    seed: u64,
) -> Result<TableCounts, FixtureError> {
    sizes.validate()?;
    let mut rng = fastrand::Rng::with_seed(seed);
    let now = Utc::now().naive_utc();
    let today = now.date();

    let tx = conn.transaction()?;
    let mut counts = TableCounts::default();

    info!(users = sizes.users, "Generating users and subscriptions");
    let mut signups: Vec<(i64, NaiveDate)> = Vec::with_capacity(sizes.users as usize);
    {
        let mut insert_user = tx.prepare(
            "INSERT INTO users (name, email, signup_date, country) VALUES (?1, ?2, ?3, ?4)",
        )?;
        let mut insert_sub = tx.prepare(
            "INSERT INTO subscriptions (user_id, plan_type, status, renewal_date) \
             VALUES (?1, ?2, ?3, ?4)",
        )?;

        for n in 0..sizes.users {
            let first = pick(&mut rng, &FIRST_NAMES);
            let last = pick(&mut rng, &LAST_NAMES);
            let signup = today - ChronoDuration::days(rng.i64(0..=SIGNUP_WINDOW_DAYS));
            insert_user.execute(params![
                format!("{first} {last}"),
                format!(
                    "{}.{}{n}@example.com",
                    first.to_lowercase(),
                    last.to_lowercase()
                ),
                signup.format(DATE_FORMAT).to_string(),
                pick(&mut rng, &COUNTRIES),
            ])?;
            let user_id = tx.last_insert_rowid();
            signups.push((user_id, signup));
            counts.users += 1;

            let status = subscription_status(&mut rng);
            let renewal = if status == "cancelled" {
                signup + ChronoDuration::days(rng.i64(0..=(today - signup).num_days()))
            } else {
                today + ChronoDuration::days(rng.i64(1..=365))
            };
            insert_sub.execute(params![
                user_id,
                pick(&mut rng, &PLAN_TYPES),
                status,
                renewal.format(DATE_FORMAT).to_string(),
            ])?;
            counts.subscriptions += 1;
        }
    }

    info!(movies = sizes.movies, "Generating movies");
    let mut movie_ids: Vec<i64> = Vec::with_capacity(sizes.movies as usize);
    {
        let mut insert_movie = tx.prepare(
            "INSERT INTO movies (title, genre, release_year, rating) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for n in 0..sizes.movies {
            let title = format!(
                "The {} {} {}",
                pick(&mut rng, &TITLE_ADJECTIVES),
                pick(&mut rng, &TITLE_NOUNS),
                n + 1
            );
            let rating = ((1.0 + rng.f64() * 9.0) * 10.0).round() / 10.0;
            insert_movie.execute(params![
                title,
                pick(&mut rng, &GENRES),
                rng.i32(1990..=2024),
                rating,
            ])?;
            movie_ids.push(tx.last_insert_rowid());
            counts.movies += 1;
        }
    }

    info!("Generating viewing history");
    {
        let mut insert_view = tx.prepare(
            "INSERT INTO viewing_history (user_id, movie_id, watch_time, duration_watched) \
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        let max_views = (sizes.max_views_per_user as usize).min(movie_ids.len());
        let min_views = (sizes.min_views_per_user as usize).min(max_views);
        for (user_id, signup) in &signups {
            let views = rng.usize(min_views..=max_views);
            // Partial Fisher-Yates: distinct movies per user.
            for i in 0..views {
                let j = rng.usize(i..movie_ids.len());
                movie_ids.swap(i, j);
            }
            let start = signup.and_hms_opt(0, 0, 0).unwrap_or(now);
            for movie_id in &movie_ids[..views] {
                insert_view.execute(params![
                    user_id,
                    movie_id,
                    random_datetime(&mut rng, start, now).format(DATETIME_FORMAT).to_string(),
                    rng.i32(10..=180),
                ])?;
                counts.viewing_history += 1;
            }
        }
    }

    tx.commit()?;
    info!(
        users = counts.users,
        subscriptions = counts.subscriptions,
        movies = counts.movies,
        viewing_history = counts.viewing_history,
        "Fixture data committed"
    );
    Ok(counts)
}

/// Count the rows in every fixture table.
pub fn verify(conn: &Connection) -> Result<TableCounts, FixtureError> {
    let count = |table: &str| -> Result<u64, FixtureError> {
        let sql = format!("SELECT COUNT(*) FROM {table}");
        let n: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
        info!(table, records = n, "Fixture table verified");
        Ok(n.max(0) as u64)
    };
    Ok(TableCounts {
        users: count("users")?,
        subscriptions: count("subscriptions")?,
        movies: count("movies")?,
        viewing_history: count("viewing_history")?,
    })
}

fn pick<'a>(rng: &mut fastrand::Rng, items: &[&'a str]) -> &'a str {
    items[rng.usize(..items.len())]
}

fn subscription_status(rng: &mut fastrand::Rng) -> &'static str {
    let roll = rng.f64();
    if roll < 0.80 {
        "active"
    } else if roll < 0.95 {
        "cancelled"
    } else {
        "paused"
    }
}

fn random_datetime(
    rng: &mut fastrand::Rng,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> NaiveDateTime {
    let span = (end - start).num_seconds();
    if span <= 0 {
        return start;
    }
    start + ChronoDuration::seconds(rng.i64(0..=span))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> FixtureSizes {
        FixtureSizes {
            users: 40,
            movies: 15,
            min_views_per_user: 5,
            max_views_per_user: 10,
        }
    }

    fn loaded(seed: u64) -> (Connection, TableCounts) {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON").unwrap();
        setup_schema(&conn).unwrap();
        let counts = populate(&mut conn, small(), seed).unwrap();
        (conn, counts)
    }

    #[test]
    fn test_populate_counts_match_verify() {
        let (conn, counts) = loaded(7);
        assert_eq!(counts.users, 40);
        assert_eq!(counts.subscriptions, 40);
        assert_eq!(counts.movies, 15);
        assert!((40 * 5..=40 * 10).contains(&counts.viewing_history));
        assert_eq!(verify(&conn).unwrap(), counts);
    }

    #[test]
    fn test_views_are_distinct_per_user() {
        let (conn, _) = loaded(3);
        let dupes: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM (SELECT user_id, movie_id FROM viewing_history \
                 GROUP BY user_id, movie_id HAVING COUNT(*) > 1)",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(dupes, 0);
    }

    #[test]
    fn test_value_domains() {
        let (conn, _) = loaded(11);
        let bad_movies: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM movies WHERE release_year NOT BETWEEN 1990 AND 2024 \
                 OR rating < 1.0 OR rating > 10.0",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(bad_movies, 0);

        let bad_views: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM viewing_history \
                 WHERE duration_watched NOT BETWEEN 10 AND 180",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(bad_views, 0);

        let bad_status: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM subscriptions \
                 WHERE status NOT IN ('active', 'cancelled', 'paused')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(bad_status, 0);
    }

    #[test]
    fn test_same_seed_same_data() {
        let (a, _) = loaded(99);
        let (b, _) = loaded(99);
        let titles = |conn: &Connection| -> Vec<String> {
            let mut stmt = conn.prepare("SELECT title FROM movies ORDER BY movie_id").unwrap();
            stmt.query_map([], |row| row.get(0))
                .unwrap()
                .collect::<Result<_, _>>()
                .unwrap()
        };
        assert_eq!(titles(&a), titles(&b));
    }

    #[test]
    fn test_inverted_view_range_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        setup_schema(&conn).unwrap();
        let sizes = FixtureSizes {
            min_views_per_user: 9,
            max_views_per_user: 3,
            ..FixtureSizes::default()
        };
        assert!(matches!(
            populate(&mut conn, sizes, 1),
            Err(FixtureError::InvalidSizes(_))
        ));
        assert_eq!(verify(&conn).unwrap(), TableCounts::default());
    }

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        setup_schema(&conn).unwrap();
        setup_schema(&conn).unwrap();
        for table in TABLES {
            let exists: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(exists, 1, "{table}");
        }
    }
}
