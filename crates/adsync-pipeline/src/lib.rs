//! Scheduled jobs of the sync service: the batch runner, the token upkeep
//! tasks, the per-platform data pulls and the expiry notifier.

pub mod notify;
pub mod runner;
pub mod tasks;

#[cfg(test)]
mod testing;

pub use notify::{Mailer, NotifyError, NotifyReport, SmtpMailer};
pub use runner::{BatchRunner, RunSummary, WorkItem};
pub use tasks::SyncWindow;
