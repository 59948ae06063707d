use serde::{Deserialize, Serialize};

use crate::types::Outcome;

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

/// What a condition measures. Each variant carries only the fields it needs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConditionMetric {
    /// Current probability of `outcome`.
    Price {
        #[serde(default)]
        outcome: Outcome,
    },
    /// Rolling 24h volume.
    Volume,
    /// Resting book size near the mid.
    Depth,
    /// Bid/ask spread as percent of mid.
    Spread,
    /// Signed YES-vs-NO flow imbalance percent.
    Flow,
}

impl std::fmt::Display for ConditionMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConditionMetric::Price { outcome } => write!(f, "price({outcome})"),
            ConditionMetric::Volume => write!(f, "volume"),
            ConditionMetric::Depth => write!(f, "depth"),
            ConditionMetric::Spread => write!(f, "spread"),
            ConditionMetric::Flow => write!(f, "flow"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Lt,
    Gt,
    Lte,
    Gte,
    /// Exact float equality, no epsilon.
    Eq,
}

impl Operator {
    /// `lhs <op> rhs`. Any NaN operand fails.
    pub fn compare(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Operator::Lt => lhs < rhs,
            Operator::Gt => lhs > rhs,
            Operator::Lte => lhs <= rhs,
            Operator::Gte => lhs >= rhs,
            Operator::Eq => lhs == rhs,
        }
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Operator::Lt => "<",
            Operator::Gt => ">",
            Operator::Lte => "<=",
            Operator::Gte => ">=",
            Operator::Eq => "==",
        };
        write!(f, "{s}")
    }
}

/// `{"type":"price","outcome":"YES","operator":"gt","value":0.7}`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertCondition {
    #[serde(flatten)]
    pub metric: ConditionMetric,
    pub operator: Operator,
    pub value: f64,
}

impl std::fmt::Display for AlertCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.metric, self.operator, self.value)
    }
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyChannel {
    #[default]
    Browser,
    Email,
    Telegram,
}

impl std::fmt::Display for NotifyChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NotifyChannel::Browser => "browser",
            NotifyChannel::Email => "email",
            NotifyChannel::Telegram => "telegram",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub channel: NotifyChannel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderConfig {
    #[serde(default)]
    pub outcome: Outcome,
    pub side: OrderSide,
    pub size: f64,
    /// Market order when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
}

/// `{"type":"webhook","config":{"url":"https://..."}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "config", rename_all = "lowercase")]
pub enum AlertAction {
    Notify(NotifyConfig),
    Order(OrderConfig),
    Webhook(WebhookConfig),
}

impl AlertAction {
    pub fn kind(&self) -> &'static str {
        match self {
            AlertAction::Notify(_) => "notify",
            AlertAction::Order(_) => "order",
            AlertAction::Webhook(_) => "webhook",
        }
    }
}

// ---------------------------------------------------------------------------
// Alert
// ---------------------------------------------------------------------------

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    pub name: String,
    /// None = global, evaluated against every market.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_id: Option<String>,
    #[serde(default)]
    pub conditions: Vec<AlertCondition>,
    #[serde(default)]
    pub actions: Vec<AlertAction>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// None or 0 = no cooldown; the alert may fire every tick.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_period_minutes: Option<u32>,
    /// Epoch ms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_triggered: Option<i64>,
}

impl Alert {
    pub fn cooldown_ms(&self) -> Option<i64> {
        match self.cooldown_period_minutes {
            Some(minutes) if minutes > 0 => Some(i64::from(minutes) * 60_000),
            _ => None,
        }
    }

    /// End of the current cooldown, if one is running at `now`.
    pub fn cooldown_until(&self, now: i64) -> Option<i64> {
        let until = self.last_triggered? + self.cooldown_ms()?;
        (now < until).then_some(until)
    }

    pub fn in_cooldown(&self, now: i64) -> bool {
        self.cooldown_until(now).is_some()
    }

    /// An alert without conditions or actions can never fire.
    pub fn is_evaluable(&self) -> bool {
        !self.conditions.is_empty() && !self.actions.is_empty()
    }

    pub fn applies_to(&self, market_id: &str) -> bool {
        self.market_id.as_deref().map_or(true, |m| m == market_id)
    }

    pub fn state(&self, now: i64) -> AlertState {
        if !self.is_active {
            AlertState::Idle
        } else if let Some(until) = self.cooldown_until(now) {
            AlertState::CoolingDown { until }
        } else {
            AlertState::Armed
        }
    }

    /// Rules the upstream store enforces on create; the engine tolerates violations.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("alert id is empty".to_string());
        }
        if self.conditions.is_empty() {
            return Err(format!("alert {} has no conditions", self.id));
        }
        if self.actions.is_empty() {
            return Err(format!("alert {} has no actions", self.id));
        }
        if let Some(c) = self.conditions.iter().find(|c| !c.value.is_finite()) {
            return Err(format!("alert {} has a non-finite threshold: {c}", self.id));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertState {
    /// Inactive; skipped by evaluation.
    Idle,
    /// Evaluated every tick.
    Armed,
    /// Triggered; suppressed until `until` (epoch ms).
    CoolingDown { until: i64 },
}

/// Partial update. `Some(None)` clears an optional field.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertPatch {
    pub name: Option<String>,
    pub market_id: Option<Option<String>>,
    pub conditions: Option<Vec<AlertCondition>>,
    pub actions: Option<Vec<AlertAction>>,
    pub is_active: Option<bool>,
    pub cooldown_period_minutes: Option<Option<u32>>,
    pub last_triggered: Option<Option<i64>>,
}

impl AlertPatch {
    pub fn apply(self, alert: &mut Alert) {
        if let Some(name) = self.name {
            alert.name = name;
        }
        if let Some(market_id) = self.market_id {
            alert.market_id = market_id;
        }
        if let Some(conditions) = self.conditions {
            alert.conditions = conditions;
        }
        if let Some(actions) = self.actions {
            alert.actions = actions;
        }
        if let Some(is_active) = self.is_active {
            alert.is_active = is_active;
        }
        if let Some(cooldown) = self.cooldown_period_minutes {
            alert.cooldown_period_minutes = cooldown;
        }
        if let Some(last) = self.last_triggered {
            alert.last_triggered = last;
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionResult {
    pub condition: AlertCondition,
    pub passed: bool,
    /// None when the metric could not be read.
    pub current_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Dry-run breakdown for one alert.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertTestResult {
    pub would_trigger: bool,
    /// Market the breakdown was computed for; None when no market has data.
    pub market_id: Option<String>,
    pub conditions: Vec<ConditionResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionOutcome {
    pub kind: &'static str,
    /// Delivery error, if the dispatcher rejected the action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertTrigger {
    pub alert_id: String,
    pub alert_name: String,
    pub market_id: String,
    pub triggered_at: i64,
    pub conditions: Vec<ConditionResult>,
    pub actions: Vec<ActionOutcome>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickOutcome {
    /// Alerts that were armed and in scope this tick.
    pub evaluated: usize,
    pub triggers: Vec<AlertTrigger>,
}
