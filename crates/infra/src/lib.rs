//! Infrastructure layer: batch orchestration, result caching, KPI sources.

pub mod cache;
pub mod jobs;
pub mod kpi;

use std::any::Any;

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
