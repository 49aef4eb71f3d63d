//! Turning drained entries into service-valid batches.

mod planner;

pub use planner::{plan_batches, Batch, BatchPlan, PlannerLimits};
