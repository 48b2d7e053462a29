//! `SQLite` implementation of [`ScriptRepository`].
//!
//! The trigger is split into `(trigger_kind, trigger_id)` so that firings can
//! be looked up by index; the guard is stored as JSON.

use std::future::Future;

use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

use homegate_app::ports::ScriptRepository;
use homegate_domain::error::GatewayError;
use homegate_domain::script::{Guard, Script, ScriptTrigger};

use crate::error::StorageError;
use crate::row::{decode_err, parse};
use crate::storage::SqliteStorage;

const EVENT_TRIGGER: &str = "event";
const TIMER_TRIGGER: &str = "timer";

fn trigger_columns(trigger: ScriptTrigger) -> (&'static str, String) {
    match trigger {
        ScriptTrigger::Event(id) => (EVENT_TRIGGER, id.to_string()),
        ScriptTrigger::Timer(id) => (TIMER_TRIGGER, id.to_string()),
    }
}

/// Wrapper for converting database rows into domain [`Script`].
struct Wrapper(Script);

impl<'r> FromRow<'r, SqliteRow> for Wrapper {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let id: String = row.try_get("id")?;
        let trigger_kind: String = row.try_get("trigger_kind")?;
        let trigger_id: String = row.try_get("trigger_id")?;
        let guard: Option<String> = row.try_get("guard")?;
        let device_id: String = row.try_get("device_id")?;

        let trigger = match trigger_kind.as_str() {
            EVENT_TRIGGER => ScriptTrigger::Event(parse(&trigger_id)?),
            TIMER_TRIGGER => ScriptTrigger::Timer(parse(&trigger_id)?),
            other => {
                return Err(sqlx::Error::ColumnDecode {
                    index: "trigger_kind".to_string(),
                    source: format!("unknown trigger {other}").into(),
                });
            }
        };
        let guard = guard
            .map(|json| serde_json::from_str::<Guard>(&json))
            .transpose()
            .map_err(decode_err)?;

        Ok(Self(Script {
            id: parse(&id)?,
            name: row.try_get("name")?,
            trigger,
            guard,
            device_id: parse(&device_id)?,
            command_action: row.try_get("command_action")?,
            enabled: row.try_get("enabled")?,
        }))
    }
}

const INSERT: &str = "INSERT INTO scripts \
    (id, name, trigger_kind, trigger_id, guard, device_id, command_action, enabled) \
    VALUES (?, ?, ?, ?, ?, ?, ?, ?)";
const SELECT_ALL: &str = "SELECT * FROM scripts ORDER BY name";
const SELECT_BY_TRIGGER: &str = "SELECT * FROM scripts WHERE trigger_kind = ? AND trigger_id = ?";

impl ScriptRepository for SqliteStorage {
    fn create_script(
        &self,
        script: Script,
    ) -> impl Future<Output = Result<Script, GatewayError>> + Send {
        let pool = self.pool.clone();
        async move {
            script.validate()?;
            let (trigger_kind, trigger_id) = trigger_columns(script.trigger);
            let guard = script
                .guard
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(StorageError::from)?;
            sqlx::query(INSERT)
                .bind(script.id.to_string())
                .bind(&script.name)
                .bind(trigger_kind)
                .bind(trigger_id)
                .bind(guard)
                .bind(script.device_id.to_string())
                .bind(&script.command_action)
                .bind(script.enabled)
                .execute(&pool)
                .await
                .map_err(StorageError::from)?;

            Ok(script)
        }
    }

    fn list_scripts(&self) -> impl Future<Output = Result<Vec<Script>, GatewayError>> + Send {
        let pool = self.pool.clone();
        async move {
            let rows: Vec<Wrapper> = sqlx::query_as(SELECT_ALL)
                .fetch_all(&pool)
                .await
                .map_err(StorageError::from)?;

            Ok(rows.into_iter().map(|w| w.0).collect())
        }
    }

    fn scripts_for_trigger(
        &self,
        trigger: ScriptTrigger,
    ) -> impl Future<Output = Result<Vec<Script>, GatewayError>> + Send {
        let pool = self.pool.clone();
        async move {
            let (trigger_kind, trigger_id) = trigger_columns(trigger);
            let rows: Vec<Wrapper> = sqlx::query_as(SELECT_BY_TRIGGER)
                .bind(trigger_kind)
                .bind(trigger_id)
                .fetch_all(&pool)
                .await
                .map_err(StorageError::from)?;

            Ok(rows.into_iter().map(|w| w.0).collect())
        }
    }
}
