//! Natural-language to SQL generation.
//!
//! The harness treats the text-generation service as a black box: a task
//! description and the schema go in, free text comes out. Whatever comes
//! back is passed through [`strip_code_fences`] before it is executed.

use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::debug;

/// Schema of the streaming-service fixture, as shown to the generator.
pub const SCHEMA_DESCRIPTION: &str = "\
- users (user_id PRIMARY KEY, name, email, signup_date, country)
- subscriptions (subscription_id PRIMARY KEY, user_id FOREIGN KEY, plan_type, status, renewal_date)
- movies (movie_id PRIMARY KEY, title, genre, release_year, rating)
- viewing_history (history_id PRIMARY KEY, user_id FOREIGN KEY, movie_id FOREIGN KEY, \
watch_time, duration_watched)";

/// Analytics tasks run when no prompt list is configured.
pub const DEFAULT_PROMPTS: [&str; 7] = [
    "Find the top 5 most-watched movies in the last month",
    "List users who watched more than 10 movies last month",
    "Get users who have never finished a movie",
    "Find churn risk users (users inactive for last 60 days)",
    "Calculate the average watch time per genre",
    "Find the most-watched genre in each country",
    "Find users who have watched all movies of a particular genre",
];

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("API key not set; export {0} or add it to .env")]
    MissingApiKey(String),

    #[error("generation request failed: {0}")]
    Transport(String),

    #[error("generation service returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("generation service returned no query text")]
    EmptyResponse,

    #[error("failed to read canned queries from {path}: {source}")]
    CannedIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid canned query file {path}: {source}")]
    CannedParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("no canned query for task {0:?} and no fallback configured")]
    NoCannedQuery(String),
}

/// Source of SQL for a natural-language task.
pub trait QueryGenerator: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Produce a query for `task` over `schema`. The result is already
    /// stripped of formatting markers.
    fn generate(
        &self,
        task: &str,
        schema: &str,
    ) -> impl Future<Output = Result<String, GeneratorError>> + Send;
}

/// Instruction text sent to the generation service.
pub fn build_prompt(task: &str, schema: &str) -> String {
    format!(
        "You are a SQL query generator for a streaming-service analytics database.\n\
         Respond ONLY with a single SQLite query, nothing else: no explanations, \
         no markdown formatting, no code blocks.\n\
         \n\
         Schema:\n\
         {schema}\n\
         \n\
         Task: {task}\n"
    )
}

fn fence_regex() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| {
            // A language tag is either a known SQL dialect or any word on
            // the fence line itself.
            Regex::new(concat!(
                r"(?s)^```(?:(?i:sqlite|sql|postgresql|postgres|psql)\b[ \t]*",
                r"|[A-Za-z0-9_+-]*[ \t]*\r?\n)?(.*?)\s*```$",
            ))
            .ok()
        })
        .as_ref()
}

/// Remove surrounding code fences or inline backticks from generated text.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();

    if let Some(caps) = fence_regex().and_then(|re| re.captures(trimmed))
        && let Some(body) = caps.get(1)
    {
        return body.as_str().trim().to_string();
    }

    if trimmed.len() >= 2 && trimmed.starts_with('`') && trimmed.ends_with('`') {
        return trimmed.trim_matches('`').trim().to_string();
    }

    trimmed.to_string()
}

#[derive(Debug, Clone, Deserialize)]
struct CannedFile {
    #[serde(default)]
    fallback: Option<String>,
    #[serde(default, rename = "query")]
    queries: Vec<CannedEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct CannedEntry {
    task: String,
    sql: String,
}

/// Offline generator backed by a fixed task-to-SQL table.
///
/// File format:
///
/// ```toml
/// fallback = "SELECT COUNT(*) FROM users"
///
/// [[query]]
/// task = "Calculate the average watch time per genre"
/// sql = "SELECT ..."
/// ```
#[derive(Debug, Clone, Default)]
pub struct CannedGenerator {
    queries: HashMap<String, String>,
    fallback: Option<String>,
}

impl CannedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queries for [`DEFAULT_PROMPTS`] against the fixture schema.
    pub fn builtin() -> Self {
        let sql = [
            "SELECT m.title, COUNT(*) AS views \
             FROM viewing_history vh JOIN movies m ON m.movie_id = vh.movie_id \
             WHERE vh.watch_time >= datetime('now', '-1 month') \
             GROUP BY m.movie_id ORDER BY views DESC LIMIT 5",
            "SELECT u.user_id, u.name, COUNT(*) AS watched \
             FROM users u JOIN viewing_history vh ON vh.user_id = u.user_id \
             WHERE vh.watch_time >= datetime('now', '-1 month') \
             GROUP BY u.user_id HAVING COUNT(*) > 10",
            "SELECT u.user_id, u.name FROM users u \
             WHERE NOT EXISTS (SELECT 1 FROM viewing_history vh \
             WHERE vh.user_id = u.user_id AND vh.duration_watched >= 90)",
            "SELECT u.user_id, u.name, MAX(vh.watch_time) AS last_watch \
             FROM users u LEFT JOIN viewing_history vh ON vh.user_id = u.user_id \
             GROUP BY u.user_id \
             HAVING MAX(vh.watch_time) IS NULL \
             OR MAX(vh.watch_time) < datetime('now', '-60 days')",
            "SELECT m.genre, AVG(vh.duration_watched) AS avg_minutes \
             FROM viewing_history vh JOIN movies m ON m.movie_id = vh.movie_id \
             GROUP BY m.genre ORDER BY avg_minutes DESC",
            "WITH counts AS (SELECT u.country, m.genre, COUNT(*) AS views \
             FROM viewing_history vh JOIN users u ON u.user_id = vh.user_id \
             JOIN movies m ON m.movie_id = vh.movie_id GROUP BY u.country, m.genre) \
             SELECT country, genre, MAX(views) AS views FROM counts GROUP BY country",
            "SELECT u.user_id, u.name FROM users u \
             JOIN viewing_history vh ON vh.user_id = u.user_id \
             JOIN movies m ON m.movie_id = vh.movie_id \
             WHERE m.genre = 'Documentary' GROUP BY u.user_id \
             HAVING COUNT(DISTINCT m.movie_id) = \
             (SELECT COUNT(*) FROM movies WHERE genre = 'Documentary')",
        ];
        let mut canned = Self::new();
        for (task, sql) in DEFAULT_PROMPTS.iter().zip(sql) {
            canned = canned.with_query(*task, sql);
        }
        canned
    }

    pub fn from_toml_str(text: &str, origin: &Path) -> Result<Self, GeneratorError> {
        let file: CannedFile = toml::from_str(text).map_err(|source| GeneratorError::CannedParse {
            path: origin.to_path_buf(),
            source,
        })?;
        Ok(Self {
            queries: file
                .queries
                .into_iter()
                .map(|entry| (normalize_task(&entry.task), entry.sql))
                .collect(),
            fallback: file.fallback,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, GeneratorError> {
        let text = std::fs::read_to_string(path).map_err(|source| GeneratorError::CannedIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text, path)
    }

    pub fn with_query(mut self, task: impl AsRef<str>, sql: impl Into<String>) -> Self {
        self.queries.insert(normalize_task(task.as_ref()), sql.into());
        self
    }

    pub fn with_fallback(mut self, sql: impl Into<String>) -> Self {
        self.fallback = Some(sql.into());
        self
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    fn lookup(&self, task: &str) -> Result<String, GeneratorError> {
        self.queries
            .get(&normalize_task(task))
            .or(self.fallback.as_ref())
            .map(|sql| strip_code_fences(sql))
            .ok_or_else(|| GeneratorError::NoCannedQuery(task.to_string()))
    }
}

fn normalize_task(task: &str) -> String {
    task.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

impl QueryGenerator for CannedGenerator {
    fn name(&self) -> &str {
        "canned"
    }

    async fn generate(&self, task: &str, _schema: &str) -> Result<String, GeneratorError> {
        let sql = self.lookup(task)?;
        debug!(task, sql = %sql, "Canned query selected");
        Ok(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // strip_code_fences() tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_strip_sql_fence() {
        let text = "```sql\nSELECT * FROM users;\n```";
        assert_eq!(strip_code_fences(text), "SELECT * FROM users;");
    }

    #[test]
    fn test_strip_untagged_fence_with_padding() {
        let text = "  \n```\nSELECT 1\n```\n\n";
        assert_eq!(strip_code_fences(text), "SELECT 1");
    }

    #[test]
    fn test_strip_other_language_tag() {
        let text = "```sqlite\nSELECT 1\nFROM movies\n```";
        assert_eq!(strip_code_fences(text), "SELECT 1\nFROM movies");
    }

    #[test]
    fn test_strip_single_line_fence_keeps_first_word() {
        assert_eq!(strip_code_fences("```SELECT 1```"), "SELECT 1");
        assert_eq!(
            strip_code_fences("```SELECT * FROM users```"),
            "SELECT * FROM users"
        );
    }

    #[test]
    fn test_strip_single_line_fence_with_tag() {
        assert_eq!(strip_code_fences("```sql SELECT 1```"), "SELECT 1");
        assert_eq!(
            strip_code_fences("```SQL SELECT title FROM movies```"),
            "SELECT title FROM movies"
        );
    }

    #[test]
    fn test_strip_untagged_fence_starting_on_fence_line() {
        let text = "```SELECT name\nFROM users```";
        assert_eq!(strip_code_fences(text), "SELECT name\nFROM users");
    }

    #[test]
    fn test_strip_inline_backticks() {
        assert_eq!(strip_code_fences("`SELECT 1`"), "SELECT 1");
    }

    #[test]
    fn test_plain_query_unchanged() {
        assert_eq!(
            strip_code_fences("SELECT name FROM users WHERE country = 'UK'"),
            "SELECT name FROM users WHERE country = 'UK'"
        );
    }

    #[test]
    fn test_prompt_contains_schema_and_task() {
        let prompt = build_prompt("count users", SCHEMA_DESCRIPTION);
        assert!(prompt.contains("Task: count users"));
        assert!(prompt.contains("viewing_history (history_id"));
        assert!(prompt.contains("ONLY"));
    }

    // -------------------------------------------------------------------------
    // CannedGenerator tests
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_builtin_covers_default_prompts() {
        let canned = CannedGenerator::builtin();
        assert_eq!(canned.len(), DEFAULT_PROMPTS.len());
        for prompt in DEFAULT_PROMPTS {
            let sql = canned.generate(prompt, SCHEMA_DESCRIPTION).await.unwrap();
            assert!(sql.starts_with("SELECT") || sql.starts_with("WITH"), "{sql}");
        }
    }

    #[tokio::test]
    async fn test_lookup_ignores_case_and_spacing() {
        let canned =
            CannedGenerator::new().with_query("Count  Users", "SELECT COUNT(*) FROM users");
        let sql = canned.generate("count users", "").await.unwrap();
        assert_eq!(sql, "SELECT COUNT(*) FROM users");
    }

    #[tokio::test]
    async fn test_unknown_task_uses_fallback_or_errors() {
        let canned = CannedGenerator::new();
        assert!(matches!(
            canned.generate("anything", "").await,
            Err(GeneratorError::NoCannedQuery(_))
        ));

        let canned = canned.with_fallback("```sql\nSELECT 1\n```");
        assert_eq!(canned.generate("anything", "").await.unwrap(), "SELECT 1");
    }

    #[tokio::test]
    async fn test_load_from_toml() {
        let text = r#"
fallback = "SELECT 0"

[[query]]
task = "List movies"
sql = "SELECT title FROM movies"
"#;
        let canned = CannedGenerator::from_toml_str(text, Path::new("canned.toml")).unwrap();
        assert_eq!(canned.generate("list movies", "").await.unwrap(), "SELECT title FROM movies");
        assert_eq!(canned.generate("other", "").await.unwrap(), "SELECT 0");
    }

    #[test]
    fn test_invalid_toml_reports_path() {
        let err = CannedGenerator::from_toml_str("[[query]]\ntask = 1", Path::new("bad.toml"))
            .unwrap_err();
        assert!(err.to_string().contains("bad.toml"));
    }
}
