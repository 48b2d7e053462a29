//! `SQLite` implementation of [`TimerRepository`].

use std::future::Future;

use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

use homegate_app::ports::TimerRepository;
use homegate_domain::error::GatewayError;
use homegate_domain::id::TimerId;
use homegate_domain::timer::{Timer, TimerSchedule};

use crate::error::StorageError;
use crate::row::{decode_err, format_timestamp, parse, parse_timestamp, required};
use crate::storage::SqliteStorage;

const AT: &str = "at";
const EVERY: &str = "every";

/// Wrapper for converting database rows into domain [`Timer`].
struct Wrapper(Timer);

impl<'r> FromRow<'r, SqliteRow> for Wrapper {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let id: String = row.try_get("id")?;
        let schedule_kind: String = row.try_get("schedule_kind")?;
        let instant: Option<String> = row.try_get("instant")?;
        let interval_minutes: Option<i64> = row.try_get("interval_minutes")?;

        let schedule = match schedule_kind.as_str() {
            AT => TimerSchedule::At {
                instant: parse_timestamp(&required(instant, "instant")?)?,
            },
            EVERY => TimerSchedule::Every {
                interval_minutes: u32::try_from(required(interval_minutes, "interval_minutes")?)
                    .map_err(decode_err)?,
            },
            other => {
                return Err(sqlx::Error::ColumnDecode {
                    index: "schedule_kind".to_string(),
                    source: format!("unknown schedule {other}").into(),
                });
            }
        };

        Ok(Self(Timer {
            id: parse(&id)?,
            name: row.try_get("name")?,
            schedule,
            boot_init: row.try_get("boot_init")?,
        }))
    }
}

const INSERT: &str = "INSERT INTO timers \
    (id, name, schedule_kind, instant, interval_minutes, boot_init) \
    VALUES (?, ?, ?, ?, ?, ?)";
const SELECT_BY_ID: &str = "SELECT * FROM timers WHERE id = ?";
const SELECT_ALL: &str = "SELECT * FROM timers ORDER BY name";
const SELECT_BOOT: &str = "SELECT * FROM timers WHERE boot_init = 1 ORDER BY name";
const DELETE_BY_ID: &str = "DELETE FROM timers WHERE id = ?";

impl SqliteStorage {
    async fn fetch_timers(&self, query: &'static str) -> Result<Vec<Timer>, GatewayError> {
        let rows: Vec<Wrapper> = sqlx::query_as(query)
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(rows.into_iter().map(|w| w.0).collect())
    }
}

impl TimerRepository for SqliteStorage {
    fn create_timer(
        &self,
        timer: Timer,
    ) -> impl Future<Output = Result<Timer, GatewayError>> + Send {
        let pool = self.pool.clone();
        async move {
            timer.validate()?;
            let (kind, instant, interval) = match timer.schedule {
                TimerSchedule::At { instant } => (AT, Some(format_timestamp(instant)), None),
                TimerSchedule::Every { interval_minutes } => {
                    (EVERY, None, Some(i64::from(interval_minutes)))
                }
            };
            sqlx::query(INSERT)
                .bind(timer.id.to_string())
                .bind(&timer.name)
                .bind(kind)
                .bind(instant)
                .bind(interval)
                .bind(timer.boot_init)
                .execute(&pool)
                .await
                .map_err(StorageError::from)?;

            Ok(timer)
        }
    }

    fn get_timer(
        &self,
        id: TimerId,
    ) -> impl Future<Output = Result<Option<Timer>, GatewayError>> + Send {
        let pool = self.pool.clone();
        async move {
            let row: Option<Wrapper> = sqlx::query_as(SELECT_BY_ID)
                .bind(id.to_string())
                .fetch_optional(&pool)
                .await
                .map_err(StorageError::from)?;

            Ok(row.map(|w| w.0))
        }
    }

    fn list_timers(&self) -> impl Future<Output = Result<Vec<Timer>, GatewayError>> + Send {
        self.fetch_timers(SELECT_ALL)
    }

    fn list_boot_timers(&self) -> impl Future<Output = Result<Vec<Timer>, GatewayError>> + Send {
        self.fetch_timers(SELECT_BOOT)
    }

    fn delete_timer(&self, id: TimerId) -> impl Future<Output = Result<(), GatewayError>> + Send {
        let pool = self.pool.clone();
        async move {
            sqlx::query(DELETE_BY_ID)
                .bind(id.to_string())
                .execute(&pool)
                .await
                .map_err(StorageError::from)?;

            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use homegate_domain::time::now;

    use super::*;
    use crate::storage::testing::setup;

    #[tokio::test]
    async fn should_round_trip_both_schedules() {
        let storage = setup().await;
        let once = Timer::at("Wake", now() + chrono::Duration::hours(2));
        let poll = Timer::every("Poll", 15);
        storage.create_timer(once.clone()).await.unwrap();
        storage.create_timer(poll.clone()).await.unwrap();

        assert_eq!(storage.get_timer(once.id).await.unwrap(), Some(once));
        assert_eq!(storage.get_timer(poll.id).await.unwrap(), Some(poll));
    }

    #[tokio::test]
    async fn should_list_only_boot_timers() {
        let storage = setup().await;
        let boot = Timer::every("Boot", 5).with_boot_init(true);
        storage.create_timer(boot.clone()).await.unwrap();
        storage.create_timer(Timer::every("Manual", 5)).await.unwrap();

        assert_eq!(storage.list_timers().await.unwrap().len(), 2);
        assert_eq!(storage.list_boot_timers().await.unwrap(), vec![boot]);
    }

    #[tokio::test]
    async fn should_refuse_zero_interval() {
        let storage = setup().await;
        let result = storage.create_timer(Timer::every("Broken", 0)).await;
        assert!(matches!(result, Err(GatewayError::Validation(_))));
    }

    #[tokio::test]
    async fn should_delete_timer() {
        let storage = setup().await;
        let timer = Timer::every("Poll", 5);
        storage.create_timer(timer.clone()).await.unwrap();

        storage.delete_timer(timer.id).await.unwrap();

        assert!(storage.get_timer(timer.id).await.unwrap().is_none());
    }
}
