//! Concrete collaborator implementations.
//!
//! The core only speaks to traits; these modules provide ready-made
//! implementations so a host can assemble a working stack without writing
//! its own transport code.

#[cfg(feature = "openai")]
pub mod openai;

#[cfg(feature = "openai")]
pub use openai::{OpenAiEmbeddings, OpenAiSynthesis};
