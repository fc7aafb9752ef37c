//! Dead-letter queue for failed leads.
//!
//! Failed leads are stored with their error so an operator can retry them.
//! Retention is bounded: the oldest entries past `max_entries` move to a
//! poison list, as do leads that keep failing after `max_retries` retries.

mod command;
mod entry;
mod queue;

pub use command::DlqCommand;
pub use entry::{DlqEntry, PushOutcome, RetryAllReport};
pub use queue::{DeadLetterQueue, DlqConfig};
