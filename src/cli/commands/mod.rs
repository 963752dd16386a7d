pub mod config;
pub mod enqueue;
pub mod queue;
pub mod submit;
pub mod watch;

pub use config::{ConfigCommands, config_command};
pub use enqueue::{ActionCommands, enqueue_command};
pub use queue::{QueueCommands, queue_command};
pub use submit::submit_command;
pub use watch::{WatchArgs, watch_command};
