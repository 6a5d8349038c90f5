mod endpoint;
pub mod msg;

pub use endpoint::{Endpoint, Polled, channel};
pub use msg::{Command, ExploreJob, Reply};

/// The coordinator's end of a worker channel.
pub type CoordinatorEnd = Endpoint<Command, Reply>;

/// The worker's end of the coordinator channel.
pub type WorkerEnd = Endpoint<Reply, Command>;

/// In-flight messages per direction, a worker only ever has one request pending.
pub const CHANNEL_CAPACITY: usize = 1;

/// Creates the channel between the coordinator and one worker.
///
/// # Returns
/// The coordinator's and the worker's ends.
pub fn worker_channel() -> (CoordinatorEnd, WorkerEnd) {
    channel(CHANNEL_CAPACITY)
}
