use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::alert::actions::{ActionDispatcher, ActionPayload};
use crate::alert::evaluator::{all_passed, evaluate_on_market, MetricSource};
use crate::alert::types::{
    ActionOutcome, Alert, AlertPatch, AlertState, AlertTrigger, ConditionResult, TickOutcome,
};
use crate::error::{AppError, Result};

/// Wall-clock source for cooldown bookkeeping.
pub trait Clock: Send + Sync {
    /// Epoch milliseconds.
    fn now_ms(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// In-memory mirror of the user's alerts plus per-tick evaluation.
///
/// Alerts are evaluated in insertion order. A stopped engine evaluates nothing
/// but still accepts CRUD so the mirror can be synchronized before `start`.
pub struct AlertEngine {
    alerts: Vec<Alert>,
    dispatcher: Box<dyn ActionDispatcher>,
    clock: Arc<dyn Clock>,
    running: bool,
}

impl AlertEngine {
    pub fn new(dispatcher: Box<dyn ActionDispatcher>, clock: Arc<dyn Clock>) -> Self {
        Self {
            alerts: Vec::new(),
            dispatcher,
            clock,
            running: false,
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    pub fn start(&mut self) {
        if !self.running {
            self.running = true;
            info!(alerts = self.alerts.len(), "Alert engine started");
        }
    }

    pub fn stop(&mut self) {
        if self.running {
            self.running = false;
            info!("Alert engine stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Stop and drop every alert.
    pub fn reset(&mut self) {
        self.stop();
        self.alerts.clear();
    }

    // -----------------------------------------------------------------------
    // CRUD
    // -----------------------------------------------------------------------

    /// Insert, or replace in place when the id already exists.
    pub fn add_alert(&mut self, alert: Alert) {
        if let Err(reason) = alert.validate() {
            debug!(alert_id = %alert.id, %reason, "Alert will never trigger");
        }
        match self.alerts.iter_mut().find(|a| a.id == alert.id) {
            Some(existing) => *existing = alert,
            None => self.alerts.push(alert),
        }
    }

    pub fn remove_alert(&mut self, id: &str) -> Option<Alert> {
        let idx = self.alerts.iter().position(|a| a.id == id)?;
        Some(self.alerts.remove(idx))
    }

    pub fn update_alert(&mut self, id: &str, patch: AlertPatch) -> Result<&Alert> {
        let alert = self
            .alerts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| AppError::AlertNotFound(id.to_string()))?;
        patch.apply(alert);
        Ok(alert)
    }

    pub fn get_all_alerts(&self) -> &[Alert] {
        &self.alerts
    }

    pub fn get_alert(&self, id: &str) -> Option<&Alert> {
        self.alerts.iter().find(|a| a.id == id)
    }

    /// Replace the mirror with `alerts` from the store. A trigger recorded here
    /// but not yet persisted wins over an older stored `last_triggered`.
    pub fn replace_all(&mut self, alerts: Vec<Alert>) {
        let previous = std::mem::take(&mut self.alerts);
        for mut alert in alerts {
            let mirrored = previous
                .iter()
                .find(|a| a.id == alert.id)
                .and_then(|a| a.last_triggered);
            alert.last_triggered = alert.last_triggered.max(mirrored);
            self.add_alert(alert);
        }
    }

    pub fn state_of(&self, id: &str) -> Option<AlertState> {
        let now = self.clock.now_ms();
        self.get_alert(id).map(|a| a.state(now))
    }

    // -----------------------------------------------------------------------
    // Evaluation
    // -----------------------------------------------------------------------

    /// Evaluate every armed alert against `source`.
    pub fn evaluate_tick(&mut self, source: &dyn MetricSource) -> TickOutcome {
        self.evaluate(source, None)
    }

    /// Evaluate only alerts that can match `market_id`, against that market.
    pub fn evaluate_market(&mut self, source: &dyn MetricSource, market_id: &str) -> TickOutcome {
        self.evaluate(source, Some(market_id))
    }

    fn evaluate(&mut self, source: &dyn MetricSource, scope: Option<&str>) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        if !self.running {
            return outcome;
        }
        let now = self.clock.now_ms();
        let all_markets = match scope {
            Some(_) => Vec::new(),
            None => source.market_ids(),
        };

        for idx in 0..self.alerts.len() {
            let hit = {
                let alert = &self.alerts[idx];
                if !alert.is_active || !alert.is_evaluable() || alert.in_cooldown(now) {
                    continue;
                }
                let candidates: Vec<&str> = match (alert.market_id.as_deref(), scope) {
                    (Some(own), None) => vec![own],
                    (Some(own), Some(s)) if own == s => vec![own],
                    (Some(_), Some(_)) => continue,
                    (None, Some(s)) => vec![s],
                    (None, None) => all_markets.iter().map(String::as_str).collect(),
                };
                outcome.evaluated += 1;

                // First passing market only: a global alert fires once per tick.
                candidates.into_iter().find_map(|market_id| {
                    let results = evaluate_on_market(alert, source, market_id);
                    all_passed(&results).then(|| (market_id.to_string(), results))
                })
            };

            if let Some((market_id, conditions)) = hit {
                outcome.triggers.push(self.fire(idx, market_id, conditions, now));
            }
        }
        outcome
    }

    fn fire(
        &mut self,
        idx: usize,
        market_id: String,
        conditions: Vec<ConditionResult>,
        now: i64,
    ) -> AlertTrigger {
        // Recorded before dispatch so a failing action cannot re-arm the alert.
        self.alerts[idx].last_triggered = Some(now);
        let alert = &self.alerts[idx];

        let mut actions = Vec::with_capacity(alert.actions.len());
        for action in &alert.actions {
            let payload = ActionPayload {
                alert_id: alert.id.clone(),
                alert_name: alert.name.clone(),
                market_id: market_id.clone(),
                triggered_at: now,
                action: action.clone(),
                conditions: conditions.clone(),
            };
            let error = match self.dispatcher.dispatch(payload) {
                Ok(()) => None,
                Err(e) => {
                    warn!(
                        alert_id = %alert.id,
                        market_id = %market_id,
                        action = action.kind(),
                        error = %e,
                        "Alert action failed"
                    );
                    Some(e.to_string())
                }
            };
            actions.push(ActionOutcome { kind: action.kind(), error });
        }

        info!(
            event = "ALERT_TRIGGERED",
            alert_id = %alert.id,
            alert_name = %alert.name,
            market_id = %market_id,
            actions = actions.len(),
            failed = actions.iter().filter(|a| !a.succeeded()).count(),
            "Alert triggered"
        );

        AlertTrigger {
            alert_id: alert.id.clone(),
            alert_name: alert.name.clone(),
            market_id,
            triggered_at: now,
            conditions,
            actions,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::ManualClock;
    use super::*;
    use crate::alert::actions::test_support::RecordingDispatcher;
    use crate::alert::evaluator::test_support::FixedMetrics;
    use crate::alert::types::{
        AlertAction, AlertCondition, ConditionMetric, NotifyChannel, NotifyConfig, Operator,
        WebhookConfig,
    };
    use crate::types::Outcome;

    const T0: i64 = 1_700_000_000_000;
    const MINUTE: i64 = 60_000;
    const YES: ConditionMetric = ConditionMetric::Price { outcome: Outcome::Yes };

    fn notify() -> AlertAction {
        AlertAction::Notify(NotifyConfig { message: None, channel: NotifyChannel::Browser })
    }

    fn price_alert(id: &str, market_id: Option<&str>, cooldown: Option<u32>) -> Alert {
        Alert {
            id: id.to_string(),
            name: format!("{id} price"),
            market_id: market_id.map(str::to_string),
            conditions: vec![AlertCondition { metric: YES, operator: Operator::Gt, value: 0.7 }],
            actions: vec![notify()],
            is_active: true,
            cooldown_period_minutes: cooldown,
            last_triggered: None,
        }
    }

    fn engine(dispatcher: RecordingDispatcher) -> (AlertEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at(T0));
        let mut engine = AlertEngine::new(Box::new(dispatcher), clock.clone());
        engine.start();
        (engine, clock)
    }

    #[test]
    fn price_alert_fires_once_with_one_notify() {
        let rec = RecordingDispatcher::default();
        let (mut engine, _) = engine(rec.clone());
        engine.add_alert(price_alert("a1", Some("M1"), Some(10)));

        let src = FixedMetrics::default().with("M1", YES, 0.75);
        let out = engine.evaluate_tick(&src);

        assert_eq!(out.evaluated, 1);
        assert_eq!(out.triggers.len(), 1);
        assert_eq!(out.triggers[0].market_id, "M1");
        assert_eq!(out.triggers[0].triggered_at, T0);
        let sent = rec.sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0].action, AlertAction::Notify(_)));
        assert_eq!(engine.get_alert("a1").unwrap().last_triggered, Some(T0));
    }

    #[test]
    fn ten_minute_cooldown() {
        let rec = RecordingDispatcher::default();
        let (mut engine, clock) = engine(rec.clone());
        engine.add_alert(price_alert("a1", Some("M1"), Some(10)));
        let src = FixedMetrics::default().with("M1", YES, 0.9);

        assert_eq!(engine.evaluate_tick(&src).triggers.len(), 1);

        clock.advance(5 * MINUTE);
        assert_eq!(
            engine.state_of("a1"),
            Some(AlertState::CoolingDown { until: T0 + 10 * MINUTE })
        );
        let out = engine.evaluate_tick(&src);
        assert!(out.triggers.is_empty());
        assert_eq!(out.evaluated, 0);

        clock.set(T0 + 10 * MINUTE);
        assert_eq!(engine.state_of("a1"), Some(AlertState::Armed));
        assert_eq!(engine.evaluate_tick(&src).triggers.len(), 1);
        assert_eq!(rec.sent().len(), 2);
    }

    #[test]
    fn no_cooldown_retriggers_every_tick() {
        let rec = RecordingDispatcher::default();
        let (mut engine, clock) = engine(rec.clone());
        engine.add_alert(price_alert("none", Some("M1"), None));
        engine.add_alert(price_alert("zero", Some("M1"), Some(0)));
        let src = FixedMetrics::default().with("M1", YES, 0.9);

        for _ in 0..3 {
            assert_eq!(engine.evaluate_tick(&src).triggers.len(), 2);
            clock.advance(1_000);
        }
        assert_eq!(rec.sent().len(), 6);
    }

    #[test]
    fn failing_action_does_not_block_siblings_or_cooldown() {
        let rec = RecordingDispatcher::failing(&["webhook"]);
        let (mut engine, _) = engine(rec.clone());
        let mut alert = price_alert("a1", Some("M1"), Some(10));
        alert.actions = vec![
            AlertAction::Webhook(WebhookConfig { url: "https://example.com/hook".to_string() }),
            notify(),
        ];
        engine.add_alert(alert);

        let src = FixedMetrics::default().with("M1", YES, 0.9);
        let out = engine.evaluate_tick(&src);

        let actions = &out.triggers[0].actions;
        assert_eq!(actions.len(), 2);
        assert!(!actions[0].succeeded());
        assert!(actions[1].succeeded());
        assert_eq!(rec.sent().len(), 2);
        assert_eq!(engine.get_alert("a1").unwrap().last_triggered, Some(T0));
    }

    #[test]
    fn all_conditions_must_pass() {
        let rec = RecordingDispatcher::default();
        let (mut engine, _) = engine(rec.clone());
        let mut alert = price_alert("a1", Some("M1"), None);
        alert.conditions.push(AlertCondition {
            metric: ConditionMetric::Volume,
            operator: Operator::Gte,
            value: 10_000.0,
        });
        engine.add_alert(alert);

        let mut src = FixedMetrics::default()
            .with("M1", YES, 0.9)
            .with("M1", ConditionMetric::Volume, 5_000.0);
        assert!(engine.evaluate_tick(&src).triggers.is_empty());

        src.set("M1", ConditionMetric::Volume, 10_000.0);
        assert_eq!(engine.evaluate_tick(&src).triggers.len(), 1);
    }

    #[test]
    fn empty_conditions_or_actions_never_trigger() {
        let rec = RecordingDispatcher::default();
        let (mut engine, _) = engine(rec.clone());
        let mut no_conditions = price_alert("c", Some("M1"), None);
        no_conditions.conditions.clear();
        let mut no_actions = price_alert("a", Some("M1"), None);
        no_actions.actions.clear();
        engine.add_alert(no_conditions);
        engine.add_alert(no_actions);

        let src = FixedMetrics::default().with("M1", YES, 0.9);
        let out = engine.evaluate_tick(&src);
        assert!(out.triggers.is_empty());
        assert_eq!(out.evaluated, 0);
        assert!(rec.sent().is_empty());
    }

    #[test]
    fn inactive_alert_is_idle() {
        let rec = RecordingDispatcher::default();
        let (mut engine, _) = engine(rec.clone());
        let mut alert = price_alert("a1", Some("M1"), None);
        alert.is_active = false;
        engine.add_alert(alert);

        let src = FixedMetrics::default().with("M1", YES, 0.9);
        assert!(engine.evaluate_tick(&src).triggers.is_empty());
        assert_eq!(engine.state_of("a1"), Some(AlertState::Idle));
    }

    #[test]
    fn stopped_engine_evaluates_nothing() {
        let rec = RecordingDispatcher::default();
        let (mut engine, _) = engine(rec.clone());
        engine.add_alert(price_alert("a1", Some("M1"), None));
        engine.stop();

        let src = FixedMetrics::default().with("M1", YES, 0.9);
        assert_eq!(engine.evaluate_tick(&src), TickOutcome::default());

        engine.start();
        assert_eq!(engine.evaluate_tick(&src).triggers.len(), 1);

        engine.reset();
        assert!(!engine.is_running());
        assert!(engine.get_all_alerts().is_empty());
    }

    #[test]
    fn global_alert_fires_once_per_tick() {
        let rec = RecordingDispatcher::default();
        let (mut engine, _) = engine(rec.clone());
        engine.add_alert(price_alert("g", None, None));

        let src = FixedMetrics::default()
            .with("A", YES, 0.1)
            .with("B", YES, 0.8)
            .with("C", YES, 0.9);
        let out = engine.evaluate_tick(&src);
        assert_eq!(out.triggers.len(), 1);
        assert_eq!(out.triggers[0].market_id, "B");
        assert_eq!(rec.sent().len(), 1);
    }

    #[test]
    fn evaluate_market_limits_scope() {
        let rec = RecordingDispatcher::default();
        let (mut engine, _) = engine(rec.clone());
        engine.add_alert(price_alert("m1", Some("M1"), None));
        engine.add_alert(price_alert("m2", Some("M2"), None));
        engine.add_alert(price_alert("g", None, None));

        let src = FixedMetrics::default()
            .with("M1", YES, 0.9)
            .with("M2", YES, 0.9);
        let out = engine.evaluate_market(&src, "M2");
        assert_eq!(out.evaluated, 2);
        let ids: Vec<&str> = out.triggers.iter().map(|t| t.alert_id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "g"]);
        assert!(out.triggers.iter().all(|t| t.market_id == "M2"));
    }

    #[test]
    fn crud_and_replace_all() {
        let rec = RecordingDispatcher::default();
        let (mut engine, _) = engine(rec);
        engine.add_alert(price_alert("a1", Some("M1"), Some(10)));
        engine.add_alert(price_alert("a2", Some("M2"), Some(10)));

        let mut renamed = price_alert("a1", Some("M1"), Some(10));
        renamed.name = "renamed".to_string();
        engine.add_alert(renamed);
        assert_eq!(engine.get_all_alerts().len(), 2);
        assert_eq!(engine.get_all_alerts()[0].name, "renamed");

        let updated = engine
            .update_alert("a2", AlertPatch { is_active: Some(false), ..AlertPatch::default() })
            .unwrap();
        assert!(!updated.is_active);
        assert!(matches!(
            engine.update_alert("missing", AlertPatch::default()),
            Err(AppError::AlertNotFound(_))
        ));

        engine
            .update_alert("a1", AlertPatch { last_triggered: Some(Some(T0)), ..AlertPatch::default() })
            .unwrap();
        let mut stale = price_alert("a1", Some("M1"), Some(10));
        stale.last_triggered = Some(T0 - MINUTE);
        let fresh = price_alert("a3", None, None);
        engine.replace_all(vec![stale, fresh]);

        assert_eq!(engine.get_all_alerts().len(), 2);
        assert_eq!(engine.get_alert("a1").unwrap().last_triggered, Some(T0));
        assert!(engine.get_alert("a2").is_none());
        assert!(engine.remove_alert("a3").is_some());
        assert!(engine.remove_alert("a3").is_none());
    }
}
