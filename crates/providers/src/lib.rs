pub mod chat;
pub mod ernie;
pub mod midjourney;
pub mod qwen;
pub mod sse;
pub mod stability;

pub use chat::{ChatApi, ChatChunk, ChatMessage};
pub use midjourney::{BlendDimensions, MidjourneyClient, Submitted};
pub use stability::StabilityClient;
