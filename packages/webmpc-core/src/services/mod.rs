//! Services that drive the daemon link.
//!
//! - [`CommandQueue`] / [`LinkWorker`]: serialize session commands onto the link
//! - [`ChangeNotifier`]: turn `idle` reports into broadcasts

pub mod change_notifier;
pub mod command_queue;

pub use change_notifier::{ChangeNotifier, RefreshPlan};
pub use command_queue::{CommandQueue, CommandReceiver, LinkWorker, Origin, PendingReply};
