//! SQLite-backed analytics store.
//!
//! Uses an `r2d2` pool over `r2d2_sqlite`; every pooled connection is put in
//! WAL mode with a busy timeout so concurrent inserts from the blocking pool
//! wait for each other instead of failing.
//!
//! All queries are plain reads over the `requests` table; nothing is
//! pre-aggregated. Success means a 2xx status, error means 400 or above.

use super::{
    DailyPoint, HourlyBucket, Overview, RecentRequest, RequestEvent, Snapshot, TodayStats,
    ToolStats,
};
use crate::error::ToolError;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection};
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub type ConnectionPool = Pool<SqliteConnectionManager>;

const POOL_SIZE: u32 = 8;
const BUSY_TIMEOUT_MS: u32 = 5_000;

/// Days covered by the daily series in a snapshot.
pub const SNAPSHOT_DAYS: i64 = 30;
/// Rows in the recent list of a snapshot.
pub const SNAPSHOT_RECENT: i64 = 50;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS requests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    date TEXT NOT NULL,
    tool TEXT NOT NULL,
    status_code INTEGER NOT NULL DEFAULT 200,
    processing_ms REAL DEFAULT 0,
    file_count INTEGER DEFAULT 0,
    ip_hash TEXT,
    user_agent TEXT
);
CREATE INDEX IF NOT EXISTS idx_requests_date ON requests(date);
CREATE INDEX IF NOT EXISTS idx_requests_tool ON requests(tool);
CREATE INDEX IF NOT EXISTS idx_requests_ip_hash ON requests(ip_hash);
";

/// Pragmas applied to each new pooled connection.
#[derive(Debug)]
struct PragmaCustomizer {
    busy_timeout_ms: u32,
}

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for PragmaCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = WAL;\
             PRAGMA busy_timeout = {};\
             PRAGMA synchronous = NORMAL;",
            self.busy_timeout_ms
        ))
    }
}

fn db_err(e: impl std::fmt::Display) -> ToolError {
    ToolError::Analytics(e.to_string())
}

/// Handle to the analytics database. Cheap to clone.
#[derive(Clone)]
pub struct AnalyticsStore {
    pool: ConnectionPool,
}

impl std::fmt::Debug for AnalyticsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyticsStore")
            .field("connections", &self.pool.state().connections)
            .finish()
    }
}

impl AnalyticsStore {
    /// Open (creating if needed) the database at `path` and ensure the schema.
    pub fn open(path: &Path) -> Result<Self, ToolError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ToolError::io(parent, e))?;
        }
        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder()
            .max_size(POOL_SIZE)
            .connection_timeout(Duration::from_secs(5))
            .connection_customizer(Box::new(PragmaCustomizer {
                busy_timeout_ms: BUSY_TIMEOUT_MS,
            }))
            .build(manager)
            .map_err(db_err)?;

        let store = Self { pool };
        store.conn()?.execute_batch(SCHEMA).map_err(db_err)?;
        info!("Analytics database initialised: {}", path.display());
        Ok(store)
    }

    fn conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>, ToolError> {
        self.pool.get().map_err(db_err)
    }

    /// Append one event.
    pub fn insert(&self, event: &RequestEvent) -> Result<(), ToolError> {
        self.conn()?
            .execute(
                "INSERT INTO requests
                    (timestamp, date, tool, status_code, processing_ms, file_count, ip_hash, user_agent)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    event.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                    event.date(),
                    event.tool,
                    event.status_code,
                    event.processing_ms,
                    event.file_count,
                    event.client_hash,
                    event.user_agent,
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn overview(&self) -> Result<Overview, ToolError> {
        self.conn()?
            .query_row(
                "SELECT COUNT(*),
                        COUNT(DISTINCT ip_hash),
                        COUNT(DISTINCT tool),
                        COALESCE(ROUND(AVG(processing_ms), 1), 0.0),
                        COALESCE(SUM(CASE WHEN status_code >= 200 AND status_code < 300 THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN status_code >= 400 THEN 1 ELSE 0 END), 0)
                 FROM requests",
                [],
                |row| {
                    Ok(Overview {
                        total_requests: row.get(0)?,
                        unique_users: row.get(1)?,
                        tools_used: row.get(2)?,
                        avg_processing_ms: row.get(3)?,
                        success_count: row.get(4)?,
                        error_count: row.get(5)?,
                    })
                },
            )
            .map_err(db_err)
    }

    /// Requests and distinct users per day, for dates within the last `days`.
    pub fn daily_series(&self, days: i64) -> Result<Vec<DailyPoint>, ToolError> {
        self.daily_series_at(days, Utc::now())
    }

    fn daily_series_at(&self, days: i64, now: DateTime<Utc>) -> Result<Vec<DailyPoint>, ToolError> {
        let cutoff = (now - ChronoDuration::days(days)).format("%Y-%m-%d").to_string();
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT date, COUNT(*), COUNT(DISTINCT ip_hash)
                 FROM requests WHERE date >= ?1 GROUP BY date ORDER BY date",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![cutoff], |row| {
                Ok(DailyPoint {
                    date: row.get(0)?,
                    requests: row.get(1)?,
                    users: row.get(2)?,
                })
            })
            .map_err(db_err)?;
        rows.collect::<Result<_, _>>().map_err(db_err)
    }

    /// Per-tool totals, busiest first.
    pub fn per_tool_breakdown(&self) -> Result<Vec<ToolStats>, ToolError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT tool, COUNT(*) AS requests,
                        COUNT(DISTINCT ip_hash),
                        COALESCE(ROUND(AVG(processing_ms), 1), 0.0),
                        SUM(CASE WHEN status_code >= 200 AND status_code < 300 THEN 1 ELSE 0 END),
                        SUM(CASE WHEN status_code >= 400 THEN 1 ELSE 0 END)
                 FROM requests GROUP BY tool ORDER BY requests DESC, tool",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ToolStats {
                    tool: row.get(0)?,
                    requests: row.get(1)?,
                    users: row.get(2)?,
                    avg_ms: row.get(3)?,
                    success: row.get(4)?,
                    errors: row.get(5)?,
                })
            })
            .map_err(db_err)?;
        rows.collect::<Result<_, _>>().map_err(db_err)
    }

    /// The newest `limit` requests, newest first.
    pub fn recent(&self, limit: i64) -> Result<Vec<RecentRequest>, ToolError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT timestamp, tool, status_code, processing_ms, file_count
                 FROM requests ORDER BY id DESC LIMIT ?1",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(RecentRequest {
                    timestamp: row.get(0)?,
                    tool: row.get(1)?,
                    status_code: row.get(2)?,
                    processing_ms: row.get(3)?,
                    file_count: row.get(4)?,
                })
            })
            .map_err(db_err)?;
        rows.collect::<Result<_, _>>().map_err(db_err)
    }

    /// Request count per UTC hour of day; hours with no requests are absent.
    pub fn hourly_histogram(&self) -> Result<Vec<HourlyBucket>, ToolError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT CAST(strftime('%H', timestamp) AS INTEGER) AS hour, COUNT(*)
                 FROM requests GROUP BY hour ORDER BY hour",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(HourlyBucket {
                    hour: row.get(0)?,
                    requests: row.get(1)?,
                })
            })
            .map_err(db_err)?;
        rows.collect::<Result<_, _>>().map_err(db_err)
    }

    pub fn today(&self) -> Result<TodayStats, ToolError> {
        self.today_at(Utc::now())
    }

    fn today_at(&self, now: DateTime<Utc>) -> Result<TodayStats, ToolError> {
        let today = now.format("%Y-%m-%d").to_string();
        self.conn()?
            .query_row(
                "SELECT COUNT(*),
                        COUNT(DISTINCT ip_hash),
                        COALESCE(SUM(CASE WHEN status_code >= 200 AND status_code < 300 THEN 1 ELSE 0 END), 0)
                 FROM requests WHERE date = ?1",
                params![today],
                |row| {
                    Ok(TodayStats {
                        requests: row.get(0)?,
                        users: row.get(1)?,
                        success: row.get(2)?,
                    })
                },
            )
            .map_err(db_err)
    }

    /// Every aggregate, with the default window sizes.
    pub fn snapshot(&self) -> Result<Snapshot, ToolError> {
        Ok(Snapshot {
            overview: self.overview()?,
            today: self.today()?,
            daily: self.daily_series(SNAPSHOT_DAYS)?,
            tools: self.per_tool_breakdown()?,
            recent: self.recent(SNAPSHOT_RECENT)?,
            hourly: self.hourly_histogram()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn open_temp() -> (tempfile::TempDir, AnalyticsStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = AnalyticsStore::open(&dir.path().join("analytics.db")).unwrap();
        (dir, store)
    }

    fn event(at: DateTime<Utc>, tool: &str, status: u16, ms: f64, who: Option<&str>) -> RequestEvent {
        RequestEvent {
            timestamp: at,
            tool: tool.into(),
            status_code: status,
            processing_ms: ms,
            file_count: 1,
            client_hash: who.map(str::to_string),
            user_agent: Some("test-agent".into()),
        }
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn empty_store_has_zero_overview() {
        let (_dir, store) = open_temp();
        assert_eq!(store.overview().unwrap(), Overview::default());
        assert!(store.per_tool_breakdown().unwrap().is_empty());
        assert!(store.recent(50).unwrap().is_empty());
        assert_eq!(store.today().unwrap(), TodayStats::default());
    }

    #[test]
    fn connections_use_wal() {
        let (_dir, store) = open_temp();
        let mode: String = store
            .conn()
            .unwrap()
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
    }

    #[test]
    fn overview_counts_success_errors_and_users() {
        let (_dir, store) = open_temp();
        let t = at(2026, 5, 1, 10);
        store.insert(&event(t, "merge-pdf", 200, 10.0, Some("a"))).unwrap();
        store.insert(&event(t, "merge-pdf", 422, 20.0, Some("b"))).unwrap();
        store.insert(&event(t, "split-pdf", 500, 30.0, Some("a"))).unwrap();
        store.insert(&event(t, "split-pdf", 200, 0.5, None)).unwrap();

        let o = store.overview().unwrap();

        assert_eq!(o.total_requests, 4);
        assert_eq!(o.unique_users, 2);
        assert_eq!(o.tools_used, 2);
        assert_eq!(o.success_count, 2);
        assert_eq!(o.error_count, 2);
        assert_eq!(o.avg_processing_ms, 15.1);
    }

    #[test]
    fn per_tool_breakdown_is_busiest_first() {
        let (_dir, store) = open_temp();
        let t = at(2026, 5, 1, 10);
        store.insert(&event(t, "unlock-pdf", 200, 5.0, Some("a"))).unwrap();
        for ms in [10.0, 20.0, 40.0] {
            store.insert(&event(t, "compress-pdf", 200, ms, Some("b"))).unwrap();
        }
        store.insert(&event(t, "compress-pdf", 400, 1.0, Some("c"))).unwrap();

        let tools = store.per_tool_breakdown().unwrap();

        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].tool, "compress-pdf");
        assert_eq!(tools[0].requests, 4);
        assert_eq!(tools[0].users, 2);
        assert_eq!(tools[0].success, 3);
        assert_eq!(tools[0].errors, 1);
        assert_eq!(tools[0].avg_ms, 17.8);
        assert_eq!(tools[1].tool, "unlock-pdf");
    }

    #[test]
    fn not_found_counts_as_an_error() {
        let (_dir, store) = open_temp();
        let t = at(2026, 5, 1, 10);
        for status in [200, 200, 404] {
            store.insert(&event(t, "merge-pdf", status, 12.0, Some("a"))).unwrap();
        }

        let tools = store.per_tool_breakdown().unwrap();

        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].tool, "merge-pdf");
        assert_eq!(tools[0].requests, 3);
        assert_eq!(tools[0].success, 2);
        assert_eq!(tools[0].errors, 1);
        let o = store.overview().unwrap();
        assert_eq!((o.success_count, o.error_count), (2, 1));
    }

    #[test]
    fn daily_series_respects_window() {
        let (_dir, store) = open_temp();
        let now = at(2026, 5, 31, 12);
        store.insert(&event(at(2026, 4, 1, 9), "merge-pdf", 200, 1.0, Some("old"))).unwrap();
        store.insert(&event(at(2026, 5, 30, 9), "merge-pdf", 200, 1.0, Some("a"))).unwrap();
        store.insert(&event(at(2026, 5, 30, 11), "split-pdf", 200, 1.0, Some("a"))).unwrap();
        store.insert(&event(at(2026, 5, 31, 8), "split-pdf", 200, 1.0, Some("b"))).unwrap();

        let daily = store.daily_series_at(30, now).unwrap();

        assert_eq!(
            daily,
            vec![
                DailyPoint {
                    date: "2026-05-30".into(),
                    requests: 2,
                    users: 1
                },
                DailyPoint {
                    date: "2026-05-31".into(),
                    requests: 1,
                    users: 1
                },
            ]
        );
    }

    #[test]
    fn recent_is_newest_first_and_limited() {
        let (_dir, store) = open_temp();
        for h in 0..5 {
            store.insert(&event(at(2026, 5, 1, h), "merge-pdf", 200, h as f64, None)).unwrap();
        }

        let recent = store.recent(3).unwrap();

        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].timestamp, "2026-05-01 04:00:00");
        assert_eq!(recent[2].processing_ms, 2.0);
        assert_eq!(recent[0].file_count, 1);
    }

    #[test]
    fn hourly_histogram_groups_by_hour() {
        let (_dir, store) = open_temp();
        store.insert(&event(at(2026, 5, 1, 9), "merge-pdf", 200, 1.0, None)).unwrap();
        store.insert(&event(at(2026, 5, 2, 9), "merge-pdf", 200, 1.0, None)).unwrap();
        store.insert(&event(at(2026, 5, 2, 17), "merge-pdf", 200, 1.0, None)).unwrap();

        let hourly = store.hourly_histogram().unwrap();

        assert_eq!(
            hourly,
            vec![
                HourlyBucket { hour: 9, requests: 2 },
                HourlyBucket { hour: 17, requests: 1 },
            ]
        );
    }

    #[test]
    fn today_only_counts_current_date() {
        let (_dir, store) = open_temp();
        let now = at(2026, 5, 2, 12);
        store.insert(&event(at(2026, 5, 1, 23), "merge-pdf", 200, 1.0, Some("a"))).unwrap();
        store.insert(&event(at(2026, 5, 2, 1), "merge-pdf", 200, 1.0, Some("a"))).unwrap();
        store.insert(&event(at(2026, 5, 2, 2), "merge-pdf", 500, 1.0, Some("b"))).unwrap();

        let today = store.today_at(now).unwrap();

        assert_eq!(
            today,
            TodayStats {
                requests: 2,
                users: 2,
                success: 1
            }
        );
    }

    #[test]
    fn snapshot_serialises_with_dashboard_keys() {
        let (_dir, store) = open_temp();
        store.insert(&event(Utc::now(), "pdf-to-word", 200, 3.0, Some("a"))).unwrap();

        let json = serde_json::to_value(store.snapshot().unwrap()).unwrap();

        for key in ["overview", "today", "daily", "tools", "recent", "hourly"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert_eq!(json["overview"]["total_requests"], 1);
        assert_eq!(json["today"]["requests"], 1);
        assert_eq!(json["tools"][0]["tool"], "pdf-to-word");
    }

    #[test]
    fn concurrent_inserts_are_all_recorded() {
        let (_dir, store) = open_temp();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        store
                            .insert(&event(Utc::now(), "merge-pdf", 200, i as f64, None))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.overview().unwrap().total_requests, 80);
    }
}
