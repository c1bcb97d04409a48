pub mod actions;
pub mod poller;
pub mod store;
pub mod submit;

pub use actions::ActionDispatcher;
pub use poller::PollingEngine;
pub use store::TaskStore;
pub use submit::SubmissionService;
