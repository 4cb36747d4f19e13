//! Rate-limited LLM dispatch for wiki-forge.
//!
//! This module owns everything between a generation producer and the remote
//! provider:
//!
//! - **KeyPool**: labeled credentials per provider, round-robin rotation,
//!   per-entry cooldowns
//! - **Dispatcher**: executes one outbound call, rotating credentials on
//!   rate-limit signals and waiting out a fully-cooled pool
//! - **Providers**: the `GenerationProvider` seam plus an OpenAI-compatible
//!   chat-completions client
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use wiki_forge::llm::{Credential, Dispatcher, KeyPool, OpenAiProvider};
//! use wiki_forge::llm::providers::{ChatRequest, GenerationProvider, Message};
//!
//! let pool = Arc::new(KeyPool::new("openai", vec![
//!     Credential::new("openai-1", "sk-..."),
//!     Credential::new("openai-2", "sk-..."),
//! ]));
//! let dispatcher = Dispatcher::new(pool);
//! let provider = Arc::new(OpenAiProvider::new());
//!
//! let response = dispatcher
//!     .execute(|credential| {
//!         let provider = Arc::clone(&provider);
//!         let request = ChatRequest::new("gpt-4o", vec![Message::user("Summarize this repo")]);
//!         async move { provider.generate(&credential, request).await }
//!     })
//!     .await?;
//! ```

pub mod dispatcher;
pub mod keypool;
pub mod providers;

pub use dispatcher::{Dispatcher, DEFAULT_COOLDOWN};
pub use keypool::{Credential, KeyPool};
pub use providers::{
    ChatRequest, ChatResponse, GenerationProvider, Message, OpenAiProvider, Usage,
};
