use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use crate::alert::types::Alert;
use crate::error::{AppError, Result};

/// Durable home of the user's alerts. The engine only mirrors it.
pub trait AlertStore: Send + Sync {
    fn load(&self) -> Result<Vec<Alert>>;

    /// Insert or replace by id.
    fn save(&self, alert: &Alert) -> Result<()>;

    /// Returns whether the alert existed.
    fn remove(&self, id: &str) -> Result<bool>;

    fn record_trigger(&self, id: &str, triggered_at: i64) -> Result<()>;
}

fn upsert(alerts: &mut Vec<Alert>, alert: &Alert) {
    match alerts.iter_mut().find(|a| a.id == alert.id) {
        Some(existing) => *existing = alert.clone(),
        None => alerts.push(alert.clone()),
    }
}

fn stamp(alerts: &mut [Alert], id: &str, triggered_at: i64) -> Result<()> {
    let alert = alerts
        .iter_mut()
        .find(|a| a.id == id)
        .ok_or_else(|| AppError::AlertNotFound(id.to_string()))?;
    alert.last_triggered = alert.last_triggered.max(Some(triggered_at));
    Ok(())
}

fn poisoned<T>(_: T) -> AppError {
    AppError::Store("alert store lock poisoned".to_string())
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryAlertStore {
    alerts: Mutex<Vec<Alert>>,
}

impl InMemoryAlertStore {
    pub fn new(alerts: Vec<Alert>) -> Self {
        Self { alerts: Mutex::new(alerts) }
    }
}

impl AlertStore for InMemoryAlertStore {
    fn load(&self) -> Result<Vec<Alert>> {
        Ok(self.alerts.lock().map_err(poisoned)?.clone())
    }

    fn save(&self, alert: &Alert) -> Result<()> {
        let mut alerts = self.alerts.lock().map_err(poisoned)?;
        upsert(&mut alerts, alert);
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<bool> {
        let mut alerts = self.alerts.lock().map_err(poisoned)?;
        let before = alerts.len();
        alerts.retain(|a| a.id != id);
        Ok(alerts.len() != before)
    }

    fn record_trigger(&self, id: &str, triggered_at: i64) -> Result<()> {
        let mut alerts = self.alerts.lock().map_err(poisoned)?;
        stamp(&mut alerts, id, triggered_at)
    }
}

// ---------------------------------------------------------------------------
// JSON file
// ---------------------------------------------------------------------------

/// Alerts kept as a JSON array on disk. A missing file is an empty store.
/// Writes go to a sibling temp file and are renamed into place.
pub struct JsonFileAlertStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileAlertStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Vec<Alert>> {
        match std::fs::read(&self.path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Vec::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, alerts: &[Alert]) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(alerts)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn modify<T>(&self, f: impl FnOnce(&mut Vec<Alert>) -> Result<T>) -> Result<T> {
        let _guard = self.lock.lock().map_err(poisoned)?;
        let mut alerts = self.read()?;
        let out = f(&mut alerts)?;
        self.write(&alerts)?;
        Ok(out)
    }
}

impl AlertStore for JsonFileAlertStore {
    fn load(&self) -> Result<Vec<Alert>> {
        let _guard = self.lock.lock().map_err(poisoned)?;
        let alerts = self.read()?;
        debug!(path = %self.path.display(), count = alerts.len(), "Loaded alerts");
        Ok(alerts)
    }

    fn save(&self, alert: &Alert) -> Result<()> {
        self.modify(|alerts| {
            upsert(alerts, alert);
            Ok(())
        })
    }

    fn remove(&self, id: &str) -> Result<bool> {
        self.modify(|alerts| {
            let before = alerts.len();
            alerts.retain(|a| a.id != id);
            Ok(alerts.len() != before)
        })
    }

    fn record_trigger(&self, id: &str, triggered_at: i64) -> Result<()> {
        self.modify(|alerts| stamp(alerts, id, triggered_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::types::{AlertAction, AlertCondition, ConditionMetric, NotifyChannel, NotifyConfig, Operator};

    fn alert(id: &str) -> Alert {
        Alert {
            id: id.to_string(),
            name: id.to_string(),
            market_id: None,
            conditions: vec![AlertCondition { metric: ConditionMetric::Spread, operator: Operator::Lt, value: 2.0 }],
            actions: vec![AlertAction::Notify(NotifyConfig { message: None, channel: NotifyChannel::Email })],
            is_active: true,
            cooldown_period_minutes: Some(5),
            last_triggered: None,
        }
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("pulse-alerts-{}-{name}.json", std::process::id()))
    }

    #[test]
    fn in_memory_crud() {
        let store = InMemoryAlertStore::default();
        store.save(&alert("a")).unwrap();
        store.save(&alert("b")).unwrap();
        store.record_trigger("a", 100).unwrap();
        store.record_trigger("a", 50).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].last_triggered, Some(100));

        assert!(store.remove("b").unwrap());
        assert!(!store.remove("b").unwrap());
        assert!(matches!(store.record_trigger("b", 1), Err(AppError::AlertNotFound(_))));
    }

    #[test]
    fn json_file_persists_across_instances() {
        let path = temp_path("persist");
        let _ = std::fs::remove_file(&path);

        let store = JsonFileAlertStore::new(&path);
        assert!(store.load().unwrap().is_empty());
        store.save(&alert("a")).unwrap();
        store.record_trigger("a", 1_700_000_000_000).unwrap();

        let reopened = JsonFileAlertStore::new(&path);
        let loaded = reopened.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].last_triggered, Some(1_700_000_000_000));
        assert_eq!(loaded[0].conditions[0].metric, ConditionMetric::Spread);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn json_file_rejects_garbage() {
        let path = temp_path("garbage");
        std::fs::write(&path, b"{not json").unwrap();
        let store = JsonFileAlertStore::new(&path);
        assert!(matches!(store.load(), Err(AppError::Json(_))));
        std::fs::remove_file(&path).unwrap();
    }
}
