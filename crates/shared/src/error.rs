use thiserror::Error;

/// Failure modes for a tracked generation task.
///
/// Every variant ends up in the task record's `error` field; none of them
/// aborts anything beyond the single task that hit it.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The user submitted without the required prompt text.
    #[error("prompt text is required")]
    EmptyPrompt,

    /// A blend submission needs at least one source image.
    #[error("blend requires at least one image")]
    NoBlendImages,

    /// Network-level failure talking to the vendor.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The vendor answered but reported an error.
    #[error("vendor error: {0}")]
    Vendor(String),

    /// Submission never recorded a vendor task id within the grace window.
    #[error("no vendor task id within {0}s of creation")]
    MissingVendorId(u64),
}
