//! Leviathan agent runtime.
//!
//! Turns one customer utterance into a structured answer:
//! 1. **Sentiment** (`gateway`) - language, mood and an English translation
//! 2. **Intent** (`inference`) - remote classifier label
//! 3. **Decision** (`pipeline`) - decision matrix route plus model reasoning
//! 4. **Entities** (`inference`, `history`) - NER spans related to the
//!    conversation so far, only when the route asks for them
//!
//! # Key Types
//!
//! - `AgentRuntime` - wiring from `AppConfig` (see `runtime` module)
//! - `LlmClient` - pluggable chat backend for Ollama and OpenAI-compatible APIs
//! - `InferenceTransport` - HTTP boundary to the intent and NER classifiers
//! - `HistoryStore` - per-session conversation log

pub mod gateway;
pub mod history;
pub mod inference;
pub mod llm;
pub mod pipeline;
pub mod runtime;
