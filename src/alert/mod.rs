pub mod actions;
pub mod engine;
pub mod evaluator;
pub mod store;
pub mod types;

pub use actions::{ActionDispatcher, ActionPayload, ActionWorker, ChannelDispatcher};
pub use engine::{AlertEngine, Clock, SystemClock};
pub use evaluator::{evaluate_condition, test_alert, MetricSource};
pub use store::{AlertStore, InMemoryAlertStore, JsonFileAlertStore};
pub use types::{Alert, AlertAction, AlertCondition, AlertState, ConditionMetric, Operator};
