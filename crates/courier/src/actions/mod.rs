//! Mailbox actions module
//!
//! Provides action handlers for read state, stars and sending.

mod handler;

pub use handler::{ActionHandler, LabelChange};
