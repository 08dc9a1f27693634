use async_trait::async_trait;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio::sync::{watch, Mutex};
use tracing::warn;

use crate::scheduler::MoodsProvider;

/// User preferences as the panel stores them. Read-only for the pipeline.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Preferences {
    pub moods: Vec<String>,
    #[serde(rename = "autoFilter")]
    pub auto_filter: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct PreferencesUpdate {
    #[serde(default)]
    pub moods: Option<Vec<String>>,
    #[serde(rename = "autoFilter", default)]
    pub auto_filter: Option<bool>,
}

/// SQLite-backed preference row with change notification.
pub struct PreferenceStore {
    conn: Mutex<Connection>,
    tx: watch::Sender<Preferences>,
}

impl PreferenceStore {
    pub fn open(conn: Connection) -> rusqlite::Result<Self> {
        init_db(&conn)?;
        let prefs = load_or_init_preferences(&conn)?;
        let (tx, _rx) = watch::channel(prefs);
        Ok(Self {
            conn: Mutex::new(conn),
            tx,
        })
    }

    pub async fn get(&self) -> Preferences {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Preferences> {
        self.tx.subscribe()
    }

    /// Applies a partial update, persists it, then notifies subscribers.
    pub async fn update(&self, update: PreferencesUpdate) -> rusqlite::Result<Preferences> {
        let mut prefs = self.get().await;
        if let Some(moods) = update.moods {
            prefs.moods = normalize_moods(moods);
        }
        if let Some(v) = update.auto_filter {
            prefs.auto_filter = v;
        }

        let updated_at = OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default();
        {
            let conn = self.conn.lock().await;
            upsert_preferences(&conn, &prefs, &updated_at)?;
        }
        self.tx.send_replace(prefs.clone());
        Ok(prefs)
    }
}

#[async_trait]
impl MoodsProvider for PreferenceStore {
    async fn selected_moods(&self) -> Vec<String> {
        self.get().await.moods
    }
}

/// Trimmed, lowercased, de-duplicated, first occurrence order kept.
pub fn normalize_moods(raw: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.into_iter()
        .map(|m| m.trim().to_lowercase())
        .filter(|m| !m.is_empty())
        .filter(|m| seen.insert(m.clone()))
        .collect()
}

fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS preferences (
  id INTEGER PRIMARY KEY CHECK (id = 1),
  moods_json TEXT NOT NULL DEFAULT '[]',
  auto_filter INTEGER NOT NULL DEFAULT 0,
  updated_at TEXT NOT NULL
);
"#,
    )
}

fn load_or_init_preferences(conn: &Connection) -> rusqlite::Result<Preferences> {
    if let Some(prefs) = load_preferences(conn)? {
        return Ok(prefs);
    }
    let prefs = Preferences::default();
    let updated_at = OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default();
    upsert_preferences(conn, &prefs, &updated_at)?;
    Ok(prefs)
}

fn load_preferences(conn: &Connection) -> rusqlite::Result<Option<Preferences>> {
    let mut stmt = conn.prepare("SELECT moods_json, auto_filter FROM preferences WHERE id = 1")?;
    match stmt.query_row([], |row| {
        let moods_json: String = row.get(0)?;
        let auto_filter: i64 = row.get(1)?;
        Ok((moods_json, auto_filter != 0))
    }) {
        Ok((moods_json, auto_filter)) => {
            let moods = serde_json::from_str::<Vec<String>>(&moods_json).unwrap_or_else(|err| {
                warn!("stored moods are unreadable, starting empty: {err}");
                Vec::new()
            });
            Ok(Some(Preferences {
                moods: normalize_moods(moods),
                auto_filter,
            }))
        }
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(err) => Err(err),
    }
}

fn upsert_preferences(conn: &Connection, prefs: &Preferences, updated_at: &str) -> rusqlite::Result<()> {
    let moods_json = serde_json::to_string(&prefs.moods).unwrap_or_else(|_| "[]".to_string());
    conn.execute(
        r#"
INSERT INTO preferences (id, moods_json, auto_filter, updated_at)
VALUES (1, ?1, ?2, ?3)
ON CONFLICT(id) DO UPDATE SET
  moods_json=excluded.moods_json,
  auto_filter=excluded.auto_filter,
  updated_at=excluded.updated_at
        "#,
        (moods_json, prefs.auto_filter as i64, updated_at),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn normalize_moods_cleans_and_dedupes() {
        assert_eq!(
            normalize_moods(strings(&[" Anger", "joy", "", "anger", "  "])),
            strings(&["anger", "joy"])
        );
    }

    #[test]
    fn preferences_use_panel_key_names() {
        let p: Preferences = serde_json::from_str(r#"{"moods": ["fear"], "autoFilter": true}"#).unwrap();
        assert_eq!(p.moods, strings(&["fear"]));
        assert!(p.auto_filter);
        let back = serde_json::to_value(&p).unwrap();
        assert_eq!(back["autoFilter"], serde_json::json!(true));
    }

    #[tokio::test]
    async fn fresh_store_starts_empty_and_off() {
        let store = PreferenceStore::open(Connection::open_in_memory().unwrap()).unwrap();
        assert_eq!(store.get().await, Preferences::default());
    }

    #[tokio::test]
    async fn partial_update_persists_and_notifies() {
        let store = PreferenceStore::open(Connection::open_in_memory().unwrap()).unwrap();
        let mut rx = store.subscribe();

        let prefs = store
            .update(PreferencesUpdate {
                moods: Some(strings(&["Anger", "fear"])),
                auto_filter: None,
            })
            .await
            .unwrap();
        assert_eq!(prefs.moods, strings(&["anger", "fear"]));
        assert!(!prefs.auto_filter);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), prefs);

        let prefs = store
            .update(PreferencesUpdate {
                moods: None,
                auto_filter: Some(true),
            })
            .await
            .unwrap();
        assert_eq!(prefs.moods, strings(&["anger", "fear"]));
        assert!(prefs.auto_filter);
        assert_eq!(store.selected_moods().await, strings(&["anger", "fear"]));

        let conn = store.conn.lock().await;
        assert_eq!(load_preferences(&conn).unwrap(), Some(prefs));
    }

    #[test]
    fn existing_row_is_loaded() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        upsert_preferences(
            &conn,
            &Preferences {
                moods: strings(&["sadness"]),
                auto_filter: true,
            },
            "2026-01-01T00:00:00Z",
        )
        .unwrap();
        let loaded = load_or_init_preferences(&conn).unwrap();
        assert_eq!(loaded.moods, strings(&["sadness"]));
        assert!(loaded.auto_filter);
    }
}
