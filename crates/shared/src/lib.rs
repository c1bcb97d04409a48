pub mod error;
pub mod params;
pub mod settings;
pub mod task;

pub use error::TaskError;
pub use params::{BotType, TaskParams};
pub use task::{PollUpdate, TaskButton, TaskRecord, TaskStatus};
