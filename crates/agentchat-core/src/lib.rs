//! # agentchat-core
//!
//! A minimal LLM agent loop over a constrained JSON protocol.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Agent                                │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────┐  ┌──────────────┐  │
//! │  │  Parser/ │  │   Tool   │  │  Buffer  │  │ LlmProvider  │  │
//! │  │Validator │──│ Registry │──│  Memory  │──│  (Strategy)  │  │
//! │  └──────────┘  └──────────┘  └──────────┘  └──────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each iteration calls the provider with the buffered conversation,
//! decodes the leading JSON `{thought, action, answer}` envelope from the
//! raw response, dispatches the named tool if an action was requested,
//! feeds the observation back into the buffer, and loops until an answer
//! or the iteration budget is reached. The `LlmProvider` trait keeps the
//! loop independent of any particular model backend.

pub mod agent;
pub mod error;
pub mod memory;
pub mod message;
pub mod prompt;
pub mod protocol;
pub mod provider;
pub mod tool;

pub use agent::{Agent, AgentBuilder, AgentConfig, AllowAll, PermissionHook, RunOutcome, RunStatus};
pub use error::{AgentError, Result};
pub use memory::{BufferMemory, ChatMemory};
pub use message::{Message, Role};
pub use prompt::FINAL_ANSWER;
pub use protocol::{parse_response, ActionRequest, AgentResponse, ParseError, StatusCode};
pub use provider::{Completion, GenerationOptions, LlmProvider};
pub use tool::{CodeExecutor, DuplicatePolicy, Tool, ToolRegistry, ToolSpec};
