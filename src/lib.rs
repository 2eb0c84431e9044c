//! # class-lister
//!
//! Asks a chat model which custom classes each service of a project needs.
//!
//! The project document is a markdown file: the first section describes the
//! project, the second lists the development stack, and every later section
//! whose heading path mentions "services" is sent to the model. Replies are
//! appended to `<stem>_classes.md`; sections already in that file are
//! skipped, so an interrupted run can simply be started again.
//!
//! ## Quick Start
//!
//! ```no_run
//! use class_lister::{Config, Pipeline};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = Config::builder()
//!     .input("project.md")
//!     .output_stem("project")
//!     .api_key(std::env::var("OPENAI_API_KEY")?)
//!     .build()?;
//!
//! Pipeline::new(config)?.run()?.print_summary();
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! 1. **Fragments**: split the document at markdown headings
//! 2. **Results**: read the existing output to find finished sections
//! 3. **Prompt**: render system and user messages from Tera templates
//! 4. **Client**: call the chat API, retrying failed calls
//! 5. **Writer**: append each reply under a `# <section>` heading

#![warn(
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery
)]
#![allow(clippy::module_name_repetitions)]

mod config;
mod constants;
mod error;
mod pipeline;
mod prompt;
mod retry;
mod token;
mod writer;

pub mod client;
pub mod fragment;
pub mod results;

pub use client::{ChatClient, ChatMessage, ChatRequest, OpenAiClient, Role};
pub use config::{Config, ConfigBuilder};
pub use constants::ConstantCatalog;
pub use error::{Error, Result};
pub use fragment::{Fragment, Project};
pub use pipeline::{Pipeline, PipelineStats};
pub use prompt::{Prompt, PromptEngine, PromptParams};
pub use results::{ResultSection, ResultSet};
pub use retry::RetryPolicy;
pub use token::{TokenEstimator, TokenizerKind, completion_budget};

/// Runs a complete class-listing pass with the given configuration.
///
/// # Errors
///
/// Returns an error if:
/// - Configuration is invalid
/// - The project document cannot be read or has fewer than two sections
/// - The output file cannot be written
/// - An API call fails with a non-retryable error, or retries run out
pub fn run(config: Config) -> Result<PipelineStats> {
    Pipeline::new(config)?.run()
}
