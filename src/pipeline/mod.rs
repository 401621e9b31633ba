//! Ticket and feedback pipelines.
//!
//! Both pipelines take one ticket key, run their steps strictly in order and
//! never share state beyond the collaborators they were built with.

pub mod feedback;
pub mod inflight;
pub mod prompt;
pub mod ticket;
pub mod watermark;

pub use feedback::{FeedbackOutcome, FeedbackPipeline};
pub use inflight::{InFlight, InFlightGuard};
pub use ticket::{TicketPipeline, TicketRun, TicketStage};
