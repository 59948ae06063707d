use crate::alert::types::{Alert, AlertCondition, AlertTestResult, ConditionMetric, ConditionResult};
use crate::error::MetricError;

/// Read-only view of current market metrics used to evaluate conditions.
pub trait MetricSource {
    fn metric(&self, market_id: &str, metric: &ConditionMetric) -> Result<f64, MetricError>;

    /// Markets the source has data for, sorted.
    fn market_ids(&self) -> Vec<String>;
}

/// Compare one condition against a value. Exact equality for `eq`; NaN never passes.
pub fn evaluate_condition(condition: &AlertCondition, current_value: f64) -> ConditionResult {
    let passed = condition.operator.compare(current_value, condition.value);
    let reason = if current_value.is_nan() {
        Some(format!("{} is NaN", condition.metric))
    } else if passed {
        None
    } else {
        Some(format!(
            "{} is {current_value}, needs {} {}",
            condition.metric, condition.operator, condition.value
        ))
    };
    ConditionResult {
        condition: *condition,
        passed,
        current_value: Some(current_value),
        reason,
    }
}

fn unavailable(condition: &AlertCondition, err: MetricError) -> ConditionResult {
    ConditionResult {
        condition: *condition,
        passed: false,
        current_value: None,
        reason: Some(err.to_string()),
    }
}

/// Evaluate every condition of `alert` against one market. No short-circuit,
/// so the breakdown is always complete.
pub fn evaluate_on_market(
    alert: &Alert,
    source: &dyn MetricSource,
    market_id: &str,
) -> Vec<ConditionResult> {
    alert
        .conditions
        .iter()
        .map(|c| match source.metric(market_id, &c.metric) {
            Ok(value) => evaluate_condition(c, value),
            Err(err) => unavailable(c, err),
        })
        .collect()
}

pub fn all_passed(results: &[ConditionResult]) -> bool {
    !results.is_empty() && results.iter().all(|r| r.passed)
}

/// Dry-run `alert` against current data, ignoring cooldown and `is_active`.
///
/// Global alerts report the first market (in id order) where every condition
/// passes, or the first market's breakdown when none does.
pub fn test_alert(alert: &Alert, source: &dyn MetricSource) -> AlertTestResult {
    if let Some(market_id) = alert.market_id.as_deref() {
        let conditions = evaluate_on_market(alert, source, market_id);
        return AlertTestResult {
            would_trigger: all_passed(&conditions),
            market_id: Some(market_id.to_string()),
            conditions,
        };
    }

    let mut first: Option<(String, Vec<ConditionResult>)> = None;
    for market_id in source.market_ids() {
        let conditions = evaluate_on_market(alert, source, &market_id);
        if all_passed(&conditions) {
            return AlertTestResult {
                would_trigger: true,
                market_id: Some(market_id),
                conditions,
            };
        }
        if first.is_none() {
            first = Some((market_id, conditions));
        }
    }

    match first {
        Some((market_id, conditions)) => AlertTestResult {
            would_trigger: false,
            market_id: Some(market_id),
            conditions,
        },
        None => AlertTestResult {
            would_trigger: false,
            market_id: None,
            conditions: Vec::new(),
        },
    }
}
