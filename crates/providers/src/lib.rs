//! Completion provider implementations for Afina.
//!
//! All providers implement the `afina_core::Provider` trait.
//! The router selects the provider each model role is bound to.

pub mod openai_compat;
pub mod router;

pub use openai_compat::OpenAiCompatProvider;
pub use router::{ProviderRouter, build_from_config};
