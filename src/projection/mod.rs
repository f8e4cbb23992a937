//! Read models over the event log.
//!
//! This module contains:
//! - `timeline`: pure projection of an order's events into a human-readable
//!   timeline
//! - `history`: the aggregate history read model (order number, executions,
//!   derived flags)

pub mod history;
pub mod timeline;

pub use history::{order_number, HistoryProjector, OrderHistory, SagaExecutionSummary};
pub use timeline::{project_timeline, OrderTimeline, TimelineEntry};
