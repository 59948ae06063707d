pub mod heat;

pub use heat::{compute_heat_scores, get_severity_band, heat_score};
