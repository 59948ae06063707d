use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::alert::types::{AlertAction, ConditionResult, OrderConfig};
use crate::error::ActionError;

/// One action to deliver for a trigger.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionPayload {
    pub alert_id: String,
    pub alert_name: String,
    pub market_id: String,
    pub triggered_at: i64,
    pub action: AlertAction,
    pub conditions: Vec<ConditionResult>,
}

impl ActionPayload {
    /// Default notification text when the action carries none.
    pub fn summary(&self) -> String {
        let conds = self
            .conditions
            .iter()
            .map(|c| match c.current_value {
                Some(v) => format!("{} (now {v})", c.condition),
                None => c.condition.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" AND ");
        format!("{} on {}: {conds}", self.alert_name, self.market_id)
    }
}

/// Hands a triggered action to whatever delivers it. Must not block: the
/// engine calls this inline during a tick.
pub trait ActionDispatcher: Send + Sync {
    fn dispatch(&self, payload: ActionPayload) -> Result<(), ActionError>;
}

fn validate_action(action: &AlertAction) -> Result<(), ActionError> {
    match action {
        AlertAction::Notify(_) => Ok(()),
        AlertAction::Webhook(cfg) => {
            if cfg.url.starts_with("https://") || cfg.url.starts_with("http://") {
                Ok(())
            } else {
                Err(ActionError::InvalidConfig(format!("webhook url {:?}", cfg.url)))
            }
        }
        AlertAction::Order(OrderConfig { size, limit_price, .. }) => {
            if !size.is_finite() || *size <= 0.0 {
                return Err(ActionError::InvalidConfig(format!("order size {size}")));
            }
            match limit_price {
                Some(p) if !(p.is_finite() && *p > 0.0 && *p < 1.0) => {
                    Err(ActionError::InvalidConfig(format!("limit price {p}")))
                }
                _ => Ok(()),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Channel dispatcher
// ---------------------------------------------------------------------------

/// Validates and queues actions for the `ActionWorker`.
pub struct ChannelDispatcher {
    tx: mpsc::Sender<ActionPayload>,
}

impl ChannelDispatcher {
    pub fn new(tx: mpsc::Sender<ActionPayload>) -> Self {
        Self { tx }
    }
}

impl ActionDispatcher for ChannelDispatcher {
    fn dispatch(&self, payload: ActionPayload) -> Result<(), ActionError> {
        validate_action(&payload.action)?;
        self.tx.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ActionError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => ActionError::QueueClosed,
        })
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Drains queued actions off the evaluation path. Notifications and order
/// intents are logged; webhooks are POSTed.
pub struct ActionWorker {
    client: reqwest::Client,
    rx: mpsc::Receiver<ActionPayload>,
}

impl ActionWorker {
    pub fn new(rx: mpsc::Receiver<ActionPayload>, webhook_timeout: Duration) -> crate::error::Result<Self> {
        let client = reqwest::Client::builder().timeout(webhook_timeout).build()?;
        Ok(Self { client, rx })
    }

    pub async fn run(mut self) {
        while let Some(payload) = self.rx.recv().await {
            self.deliver(&payload).await;
        }
        info!("Action queue closed, worker exiting");
    }

    async fn deliver(&self, payload: &ActionPayload) {
        match &payload.action {
            AlertAction::Notify(cfg) => {
                let message = cfg.message.clone().unwrap_or_else(|| payload.summary());
                info!(
                    event = "ALERT_NOTIFY",
                    alert_id = %payload.alert_id,
                    market_id = %payload.market_id,
                    channel = %cfg.channel,
                    "{message}"
                );
            }
            AlertAction::Order(cfg) => {
                info!(
                    event = "ORDER_INTENT",
                    alert_id = %payload.alert_id,
                    market_id = %payload.market_id,
                    outcome = %cfg.outcome,
                    side = %cfg.side,
                    size = cfg.size,
                    limit_price = ?cfg.limit_price,
                    "Order intent"
                );
            }
            AlertAction::Webhook(cfg) => {
                if let Err(e) = send_webhook(&self.client, &cfg.url, payload).await {
                    warn!(
                        alert_id = %payload.alert_id,
                        url = %cfg.url,
                        error = %e,
                        "Webhook delivery failed"
                    );
                }
            }
        }
    }
}

async fn send_webhook(
    client: &reqwest::Client,
    url: &str,
    payload: &ActionPayload,
) -> std::result::Result<(), reqwest::Error> {
    let body = serde_json::json!({
        "text": payload.summary(),
        "alertId": payload.alert_id,
        "alertName": payload.alert_name,
        "marketId": payload.market_id,
        "triggeredAt": payload.triggered_at,
        "conditions": payload.conditions,
    });
    client
        .post(url)
        .json(&body)
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::{Arc, Mutex};

    use super::{ActionDispatcher, ActionPayload};
    use crate::error::ActionError;

    /// Records every payload; fails actions whose kind is in `fail_kinds`.
    #[derive(Clone, Default)]
    pub struct RecordingDispatcher {
        pub sent: Arc<Mutex<Vec<ActionPayload>>>,
        pub fail_kinds: Vec<&'static str>,
    }

    impl RecordingDispatcher {
        pub fn failing(kinds: &[&'static str]) -> Self {
            Self {
                fail_kinds: kinds.to_vec(),
                ..Self::default()
            }
        }

        pub fn sent(&self) -> Vec<ActionPayload> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl ActionDispatcher for RecordingDispatcher {
        fn dispatch(&self, payload: ActionPayload) -> Result<(), ActionError> {
            let kind = payload.action.kind();
            self.sent.lock().unwrap().push(payload);
            if self.fail_kinds.contains(&kind) {
                return Err(ActionError::Rejected(format!("{kind} unavailable")));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::types::{NotifyChannel, NotifyConfig, OrderSide, WebhookConfig};
    use crate::types::Outcome;

    fn payload(action: AlertAction) -> ActionPayload {
        ActionPayload {
            alert_id: "a1".to_string(),
            alert_name: "spike".to_string(),
            market_id: "M1".to_string(),
            triggered_at: 1_700_000_000_000,
            action,
            conditions: Vec::new(),
        }
    }

    fn notify() -> AlertAction {
        AlertAction::Notify(NotifyConfig { message: Some("hi".to_string()), channel: NotifyChannel::Browser })
    }

    #[test]
    fn queue_full_and_closed_are_reported() {
        let (tx, rx) = mpsc::channel(1);
        let d = ChannelDispatcher::new(tx);
        assert!(d.dispatch(payload(notify())).is_ok());
        assert_eq!(d.dispatch(payload(notify())), Err(ActionError::QueueFull));
        drop(rx);
        assert_eq!(d.dispatch(payload(notify())), Err(ActionError::QueueClosed));
    }

    #[test]
    fn rejects_bad_configs_before_queueing() {
        let (tx, mut rx) = mpsc::channel(4);
        let d = ChannelDispatcher::new(tx);
        let bad_hook = AlertAction::Webhook(WebhookConfig { url: "ftp://x".to_string() });
        assert!(matches!(d.dispatch(payload(bad_hook)), Err(ActionError::InvalidConfig(_))));

        let bad_order = AlertAction::Order(OrderConfig {
            outcome: Outcome::Yes,
            side: OrderSide::Buy,
            size: 0.0,
            limit_price: None,
        });
        assert!(matches!(d.dispatch(payload(bad_order)), Err(ActionError::InvalidConfig(_))));

        let bad_limit = AlertAction::Order(OrderConfig {
            outcome: Outcome::No,
            side: OrderSide::Sell,
            size: 10.0,
            limit_price: Some(1.5),
        });
        assert!(matches!(d.dispatch(payload(bad_limit)), Err(ActionError::InvalidConfig(_))));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn summary_lists_conditions() {
        use crate::alert::evaluator::evaluate_condition;
        use crate::alert::types::{AlertCondition, ConditionMetric, Operator};

        let cond = AlertCondition {
            metric: ConditionMetric::Price { outcome: Outcome::Yes },
            operator: Operator::Gt,
            value: 0.7,
        };
        let mut p = payload(notify());
        p.conditions = vec![evaluate_condition(&cond, 0.75)];
        assert_eq!(p.summary(), "spike on M1: price(YES) > 0.7 (now 0.75)");
    }

    #[tokio::test]
    async fn worker_drains_until_closed() {
        let (tx, rx) = mpsc::channel(4);
        let worker = ActionWorker::new(rx, Duration::from_secs(1)).unwrap();
        let d = ChannelDispatcher::new(tx.clone());
        d.dispatch(payload(notify())).unwrap();
        d.dispatch(payload(AlertAction::Order(OrderConfig {
            outcome: Outcome::Yes,
            side: OrderSide::Buy,
            size: 5.0,
            limit_price: Some(0.6),
        })))
        .unwrap();
        drop(d);
        drop(tx);
        tokio::time::timeout(Duration::from_secs(2), worker.run())
            .await
            .expect("worker should exit once the queue closes");
    }
}
