use qch_common::fixtures::{self, FixtureSizes};
use qch_common::{DurationRange, RetryPolicy, SqliteDatabase};
use std::sync::Once;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_test_writer()
                    .with_target(true)
                    .with_line_number(true)
                    .json(),
            )
            .with(filter)
            .init();
    });
}

/// Ephemeral database with a small fixture loaded.
#[allow(dead_code)]
pub fn fixture_db() -> SqliteDatabase {
    let mut db = SqliteDatabase::ephemeral().expect("ephemeral database");
    let conn = db.connection_mut().expect("connection");
    fixtures::setup_schema(conn).expect("schema");
    let sizes = FixtureSizes {
        users: 60,
        movies: 25,
        min_views_per_user: 5,
        max_views_per_user: 12,
    };
    fixtures::populate(conn, sizes, 2024).expect("populate");
    db
}

/// Three attempts with millisecond backoff so real-time tests stay fast.
#[allow(dead_code)]
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy::new(3, DurationRange::from_millis(1, 5)).expect("valid policy")
}
