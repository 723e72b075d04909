pub mod common;
pub mod completions;
pub mod conflicts;
pub mod enqueue;
pub mod photo;
pub mod queue;
pub mod retry;
pub mod status;
pub mod sync;
pub mod watch;
