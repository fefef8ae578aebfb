//! SQLite repository implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::models::*;
use super::repository::{Repository, RepositoryError};

mod embedded {
    refinery::embed_migrations!("migrations");
}

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

const TARGET_COLUMNS: &str =
    "id, name, kind, config, interval_secs, timeout_ms, failure_threshold, recovery_threshold, deleted";

const CHECK_COLUMNS: &str =
    "id, target_id, started_at, elapsed_ms, status, measurements, metrics, error";

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the database at `path` and apply migrations.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, RepositoryError> {
        Self::init(Connection::open(path)?)
    }

    /// An in-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self, RepositoryError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Result<Self, RepositoryError> {
        embedded::migrations::runner()
            .run(&mut conn)
            .map_err(|e| RepositoryError::Migration(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // --- Target CRUD (used by the external API layer) ---

    /// Add a new target and return its ID.
    pub fn add_target(&self, target: &mut Target) -> Result<TargetId, RepositoryError> {
        target.interval_secs = target.interval_secs.max(1);
        target.timeout_ms = target.timeout_ms.max(1);
        let config = serde_json::to_string(&target.params)?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO targets (name, kind, config, interval_secs, timeout_ms, failure_threshold, recovery_threshold, deleted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                target.name,
                target.params.kind_name(),
                config,
                target.interval_secs as i64,
                target.timeout_ms as i64,
                target.failure_threshold,
                target.recovery_threshold,
                target.deleted,
            ],
        )?;
        let id = conn.last_insert_rowid();
        target.id = id;
        Ok(id)
    }

    /// Update an existing target.
    pub fn update_target(&self, target: &Target) -> Result<(), RepositoryError> {
        let config = serde_json::to_string(&target.params)?;
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE targets SET name=?1, kind=?2, config=?3, interval_secs=?4, timeout_ms=?5,
             failure_threshold=?6, recovery_threshold=?7, deleted=?8 WHERE id=?9",
            params![
                target.name,
                target.params.kind_name(),
                config,
                target.interval_secs.max(1) as i64,
                target.timeout_ms.max(1) as i64,
                target.failure_threshold,
                target.recovery_threshold,
                target.deleted,
                target.id,
            ],
        )?;
        if changed == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    /// Soft-delete a target. Its checks and alerts are kept.
    pub fn delete_target(&self, id: TargetId) -> Result<(), RepositoryError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute("UPDATE targets SET deleted = 1 WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    // --- Sinks ---

    /// Register a notification sink and return its ID.
    pub fn add_sink(&self, kind: SinkKind, config: &serde_json::Value) -> Result<i64, RepositoryError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO notification_sinks (kind, config) VALUES (?1, ?2)",
            params![kind.as_str(), config.to_string()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn delete_sink(&self, id: i64) -> Result<(), RepositoryError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM notification_sinks WHERE id = ?1", params![id])?;
        Ok(())
    }

    // --- Alerts ---

    /// Alerts for a target, newest first.
    pub fn list_alerts(&self, target_id: TargetId) -> Result<Vec<Alert>, RepositoryError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, source_kind, target_id, metric, threshold, current_value, status, triggered_at, resolved_at, message
             FROM alerts WHERE target_id = ?1 ORDER BY id DESC",
        )?;
        let alerts = stmt
            .query_map(params![target_id], row_to_alert)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(alerts)
    }
}

impl Repository for Store {
    fn list_targets(&self) -> Result<Vec<Target>, RepositoryError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM targets WHERE deleted = 0 ORDER BY id",
            TARGET_COLUMNS
        ))?;
        let targets = stmt
            .query_map([], row_to_target)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(targets)
    }

    fn get_target(&self, id: TargetId) -> Result<Option<Target>, RepositoryError> {
        let conn = self.conn.lock().unwrap();
        let target = conn
            .query_row(
                &format!("SELECT {} FROM targets WHERE id = ?1 AND deleted = 0", TARGET_COLUMNS),
                params![id],
                row_to_target,
            )
            .optional()?;
        Ok(target)
    }

    fn append_check(&self, outcome: &ProbeOutcome) -> Result<(), RepositoryError> {
        let measurements = if outcome.measurements.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&outcome.measurements)?)
        };
        let metrics = outcome.metrics.as_ref().map(serde_json::to_string).transpose()?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO checks (target_id, started_at, elapsed_ms, status, measurements, metrics, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                outcome.target_id,
                format_db_time(&outcome.started_at),
                outcome.elapsed_ms as i64,
                outcome.status.as_str(),
                measurements,
                metrics,
                outcome.error,
            ],
        )?;
        Ok(())
    }

    fn append_alert(&self, alert: &Alert) -> Result<i64, RepositoryError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO alerts (source_kind, target_id, metric, threshold, current_value, status, triggered_at, resolved_at, message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                alert.source_kind.as_str(),
                alert.target_id,
                alert.metric,
                alert.threshold,
                alert.current_value,
                alert.status.as_str(),
                format_db_time(&alert.triggered_at),
                alert.resolved_at.as_ref().map(format_db_time),
                alert.message,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn list_sinks(&self) -> Result<Vec<NotificationSink>, RepositoryError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id, kind, config FROM notification_sinks ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut sinks = Vec::with_capacity(rows.len());
        for (id, kind, config) in rows {
            let Some(kind) = SinkKind::parse(&kind) else {
                tracing::warn!("Store: skipping sink {} with unknown kind {}", id, kind);
                continue;
            };
            let config = serde_json::from_str(&config)?;
            sinks.push(NotificationSink { id, kind, config });
        }
        Ok(sinks)
    }

    fn list_checks(
        &self,
        target_id: TargetId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Check>, RepositoryError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM checks
             WHERE target_id = ?1
               AND (?2 IS NULL OR started_at >= ?2)
               AND (?3 IS NULL OR started_at <= ?3)
             ORDER BY started_at DESC, id DESC",
            CHECK_COLUMNS
        ))?;
        let checks = stmt
            .query_map(
                params![
                    target_id,
                    from.as_ref().map(format_db_time),
                    to.as_ref().map(format_db_time),
                ],
                row_to_check,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(checks)
    }

    fn latest_check(&self, target_id: TargetId) -> Result<Option<Check>, RepositoryError> {
        let conn = self.conn.lock().unwrap();
        let check = conn
            .query_row(
                &format!(
                    "SELECT {} FROM checks WHERE target_id = ?1 ORDER BY started_at DESC, id DESC LIMIT 1",
                    CHECK_COLUMNS
                ),
                params![target_id],
                row_to_check,
            )
            .optional()?;
        Ok(check)
    }
}

fn row_to_target(row: &Row<'_>) -> rusqlite::Result<Target> {
    let kind: String = row.get(2)?;
    let config: String = row.get(3)?;
    let params = serde_json::from_str::<TargetParams>(&config).unwrap_or_else(|e| {
        TargetParams::Unsupported {
            kind: kind.clone(),
            reason: e.to_string(),
        }
    });
    let interval_secs: i64 = row.get(4)?;
    let timeout_ms: i64 = row.get(5)?;

    Ok(Target {
        id: row.get(0)?,
        name: row.get(1)?,
        interval_secs: interval_secs.max(1) as u64,
        timeout_ms: timeout_ms.max(1) as u64,
        failure_threshold: row.get(6)?,
        recovery_threshold: row.get(7)?,
        deleted: row.get(8)?,
        params,
    })
}

fn row_to_check(row: &Row<'_>) -> rusqlite::Result<Check> {
    let started_at: String = row.get(2)?;
    let elapsed_ms: i64 = row.get(3)?;
    let status: String = row.get(4)?;
    let measurements: Option<String> = row.get(5)?;
    let metrics: Option<String> = row.get(6)?;

    Ok(Check {
        id: row.get(0)?,
        outcome: ProbeOutcome {
            target_id: row.get(1)?,
            started_at: parse_db_time(&started_at).unwrap_or_else(Utc::now),
            elapsed_ms: elapsed_ms.max(0) as u64,
            status: CheckStatus::parse(&status).unwrap_or(CheckStatus::Unknown),
            measurements: measurements
                .and_then(|m| serde_json::from_str(&m).ok())
                .unwrap_or_default(),
            metrics: metrics.and_then(|m| serde_json::from_str(&m).ok()),
            error: row.get(7)?,
        },
    })
}

fn row_to_alert(row: &Row<'_>) -> rusqlite::Result<Alert> {
    let source_kind: String = row.get(1)?;
    let status: String = row.get(6)?;
    let triggered_at: String = row.get(7)?;
    let resolved_at: Option<String> = row.get(8)?;

    Ok(Alert {
        id: row.get(0)?,
        source_kind: SourceKind::parse(&source_kind).unwrap_or(SourceKind::Service),
        target_id: row.get(2)?,
        metric: row.get(3)?,
        threshold: row.get(4)?,
        current_value: row.get(5)?,
        status: AlertStatus::parse(&status).unwrap_or(AlertStatus::Triggered),
        triggered_at: parse_db_time(&triggered_at).unwrap_or_else(Utc::now),
        resolved_at: resolved_at.and_then(|s| parse_db_time(&s)),
        message: row.get(9)?,
    })
}

fn format_db_time(t: &DateTime<Utc>) -> String {
    t.format(TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [
        TIME_FORMAT,
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use tempfile::NamedTempFile;

    fn http_target(name: &str) -> Target {
        Target::new(
            0,
            name,
            TargetParams::Http(HttpParams {
                scheme: "http".to_string(),
                host: "svc".to_string(),
                port: Some(80),
                path: "/healthz".to_string(),
                method: "GET".to_string(),
                expected_status: 200,
                body_regex: None,
                verify_tls: true,
            }),
        )
    }

    #[test]
    fn test_target_crud() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();

        let mut target = http_target("Test");
        let id = store.add_target(&mut target).unwrap();
        assert!(id > 0);

        let fetched = store.get_target(id).unwrap().unwrap();
        assert_eq!(fetched.name, "Test");
        assert_eq!(fetched.kind(), Some(TargetKind::Http));

        let mut updated = fetched;
        updated.name = "Updated".to_string();
        updated.interval_secs = 30;
        store.update_target(&updated).unwrap();
        let fetched = store.get_target(id).unwrap().unwrap();
        assert_eq!(fetched.name, "Updated");
        assert_eq!(fetched.interval_secs, 30);

        store.delete_target(id).unwrap();
        assert!(store.get_target(id).unwrap().is_none());
        assert!(store.list_targets().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_kind_loads_as_unsupported() {
        let store = Store::open_in_memory().unwrap();
        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO targets (name, kind, config) VALUES ('ping', 'ping', '{\"kind\":\"ping\"}')",
                [],
            )
            .unwrap();
        }
        let targets = store.list_targets().unwrap();
        assert_eq!(targets.len(), 1);
        match &targets[0].params {
            TargetParams::Unsupported { kind, .. } => assert_eq!(kind, "ping"),
            other => panic!("unexpected params: {:?}", other),
        }
    }

    #[test]
    fn test_checks_query_order_and_bounds() {
        let store = Store::open_in_memory().unwrap();
        let t0 = Utc::now();
        for i in 0..5 {
            let mut outcome =
                ProbeOutcome::new(3, t0 + ChronoDuration::seconds(i), CheckStatus::Up);
            outcome.measurements.response_time_ms = Some(10 + i as u64);
            store.append_check(&outcome).unwrap();
        }

        let all = store.list_checks(3, None, None).unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].outcome.measurements.response_time_ms, Some(14));

        let window = store
            .list_checks(
                3,
                Some(t0 + ChronoDuration::seconds(1)),
                Some(t0 + ChronoDuration::seconds(3)),
            )
            .unwrap();
        assert_eq!(window.len(), 3);

        let latest = store.latest_check(3).unwrap().unwrap();
        assert_eq!(latest.outcome.started_at, t0 + ChronoDuration::seconds(4));
        assert!(store.latest_check(99).unwrap().is_none());
    }

    #[test]
    fn test_alert_and_sink_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        let alert = Alert {
            id: 0,
            source_kind: SourceKind::Dns,
            target_id: 4,
            metric: "dns_resolution".to_string(),
            threshold: "resolved".to_string(),
            current_value: "failed".to_string(),
            status: AlertStatus::Triggered,
            triggered_at: Utc::now(),
            resolved_at: None,
            message: "DNS resolution failed".to_string(),
        };
        let id = store.append_alert(&alert).unwrap();
        let alerts = store.list_alerts(4).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].id, id);
        assert_eq!(alerts[0].source_kind, SourceKind::Dns);

        let config = serde_json::json!({ "url": "http://127.0.0.1:9/hook" });
        store.add_sink(SinkKind::Webhook, &config).unwrap();
        let sinks = store.list_sinks().unwrap();
        assert_eq!(sinks.len(), 1);
        assert_eq!(sinks[0].kind, SinkKind::Webhook);
        assert_eq!(sinks[0].config, config);
    }
}
