//! LLM provider implementations for NanoClaw.
//!
//! One implementation covers nearly every hosted backend: the
//! OpenAI-compatible chat completions API (OpenRouter, OpenAI, Ollama,
//! vLLM, Together, ...).

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;
