#[cfg(feature = "gemini")]
pub mod client;
pub mod extractor;
pub mod json;
pub mod prompts;
pub mod retry;
pub mod types;

#[cfg(feature = "gemini")]
pub use client::*;
pub use extractor::*;
pub use retry::RetryPolicy;
pub use types::*;
