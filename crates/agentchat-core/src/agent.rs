//! Agent Loop
//!
//! The top-level state machine: call the provider with the buffered
//! conversation, append the raw assistant turn, parse the protocol
//! envelope, dispatch the requested tool, feed the observation back, and
//! repeat until an answer arrives or the iteration budget is spent.
//!
//! One logical thread of control per agent: an iteration completes fully
//! before the next begins, and the buffer is owned by the agent alone.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::{AgentError, Result};
use crate::memory::{BufferMemory, ChatMemory};
use crate::message::Message;
use crate::prompt::{render_template, FINAL_ANSWER, SYSTEM_PROMPT_TEMPLATE};
use crate::protocol::{parse_response, ActionRequest, StatusCode};
use crate::provider::{GenerationOptions, LlmProvider};
use crate::tool::{DuplicatePolicy, Tool, ToolRegistry};

/// Observation text used when a tool returns nothing; an empty turn is
/// never left in the conversation.
const EMPTY_OBSERVATION: &str = "no result found the action";

/// Decides whether a requested action may run.
///
/// A denial is a normal terminal outcome, not an error. The console UI
/// that usually sits behind this hook is outside this crate.
pub trait PermissionHook: Send + Sync {
    fn authorize(&self, tool: &str, args: &Map<String, Value>, edit: bool) -> bool;
}

/// Default hook: every action is allowed
pub struct AllowAll;

impl PermissionHook for AllowAll {
    fn authorize(&self, _tool: &str, _args: &Map<String, Value>, _edit: bool) -> bool {
        true
    }
}

/// Agent configuration
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// Agent name, substituted into the system prompt and used for logging
    pub name: String,

    /// Caller-supplied instructions ({{system}} slot of the template)
    pub instructions: String,

    /// Maximum loop iterations before forced termination
    pub max_iterations: usize,

    /// Terminal marker the model is told to include in its final answer
    pub terminal_marker: String,

    /// Generation options passed to the provider
    pub generation: GenerationOptions,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "Agent".into(),
            instructions: String::new(),
            max_iterations: 6,
            terminal_marker: FINAL_ANSWER.into(),
            generation: GenerationOptions::default(),
        }
    }
}

/// Terminal state of one run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    /// The model produced a final answer
    Answered,
    /// The permission hook denied an action
    Forbidden,
    /// An unrecoverable error ended the run
    Errored,
    /// The iteration budget was spent without an answer
    Exhausted,
}

/// Final status and payload of a run
#[derive(Clone, Debug)]
pub struct RunOutcome {
    pub status: RunStatus,
    /// Answer text, denial notice, or error description
    pub message: String,
    /// Iterations consumed
    pub iterations: usize,
}

/// A protocol-driven agent over a chat-completion provider
pub struct Agent {
    provider: Arc<dyn LlmProvider>,
    tools: ToolRegistry,
    memory: Box<dyn ChatMemory>,
    permission: Arc<dyn PermissionHook>,
    system_prompt: String,
    config: AgentConfig,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.config.name)
            .field("tools", &self.tools.len())
            .field("max_iterations", &self.config.max_iterations)
            .finish_non_exhaustive()
    }
}

impl Agent {
    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    /// Run the loop on a user task until a terminal state is reached.
    ///
    /// Only the final status and payload are exposed; intermediate state
    /// stays in the buffer. Provider failures, unregistered tools, and
    /// tool errors all surface as an `Errored` outcome rather than an
    /// `Err` - `Err` is reserved for failures outside the loop's taxonomy.
    pub async fn run(&mut self, task: impl Into<String>) -> Result<RunOutcome> {
        self.memory.add(Message::user(task));

        let mut iterations = 0;
        while iterations < self.config.max_iterations {
            iterations += 1;
            tracing::debug!(agent = %self.config.name, iteration = iterations, "loop iteration");

            let mut context = Vec::with_capacity(self.memory.len() + 1);
            context.push(Message::system(&self.system_prompt));
            context.extend(self.memory.get(None));

            let completion = match self
                .provider
                .complete(&context, &self.config.generation)
                .await
            {
                Ok(completion) => completion,
                Err(err) => {
                    tracing::error!(agent = %self.config.name, error = %err, "provider call failed");
                    return Ok(RunOutcome {
                        status: RunStatus::Errored,
                        message: err.to_string(),
                        iterations,
                    });
                }
            };

            self.memory
                .add(Message::assistant(&completion.content).with_name(&self.config.name));

            let (status, payload) = self.act(&completion.content).await;
            match status {
                StatusCode::Answer => {
                    return Ok(RunOutcome {
                        status: RunStatus::Answered,
                        message: payload,
                        iterations,
                    });
                }
                StatusCode::ActionForbidden => {
                    return Ok(RunOutcome {
                        status: RunStatus::Forbidden,
                        message: payload,
                        iterations,
                    });
                }
                StatusCode::Error => {
                    return Ok(RunOutcome {
                        status: RunStatus::Errored,
                        message: payload,
                        iterations,
                    });
                }
                // Observation feeds the next turn; Thought/None re-prompt
                // without adding one.
                StatusCode::Observation | StatusCode::Thought | StatusCode::None => {}
            }
        }

        Ok(RunOutcome {
            status: RunStatus::Exhausted,
            message: format!(
                "no answer after {} iterations",
                self.config.max_iterations
            ),
            iterations,
        })
    }

    /// Classify one assistant response and carry out its action, if any.
    async fn act(&mut self, raw: &str) -> (StatusCode, String) {
        match parse_response(raw) {
            Ok(response) => {
                if !response.thought.is_empty() {
                    tracing::debug!(agent = %self.config.name, thought = %response.joined_thought());
                }
                if let Some(action) = response.action.as_ref().filter(|a| !a.name.is_empty()) {
                    return self.dispatch(action).await;
                }
                if let Some(answer) = response.answer.as_ref().filter(|a| !a.is_empty()) {
                    return (StatusCode::Answer, answer.clone());
                }
                if !response.thought.is_empty() {
                    return (StatusCode::Thought, response.joined_thought());
                }
                (
                    StatusCode::None,
                    "could not parse a thought, action, or answer from the response".into(),
                )
            }
            Err(err) => {
                // Feed the malformed output and the specific error back to
                // the model so it can correct itself on the next turn.
                tracing::warn!(agent = %self.config.name, error = %err, "malformed response");
                let feedback = format!("{raw}\n{err}");
                self.memory.add(Message::user(&feedback));
                (StatusCode::Observation, feedback)
            }
        }
    }

    /// Resolve, authorize, and invoke a requested tool.
    async fn dispatch(&mut self, action: &ActionRequest) -> (StatusCode, String) {
        if !self.tools.contains(&action.name) {
            return (
                StatusCode::Error,
                format!("the tool '{}' isn't registered", action.name),
            );
        }

        if !self
            .permission
            .authorize(&action.name, &action.args, action.edit)
        {
            return (
                StatusCode::ActionForbidden,
                "action cancelled by the user".into(),
            );
        }

        tracing::debug!(agent = %self.config.name, tool = %action.name, "dispatching tool");
        match self.tools.invoke(&action.name, &action.args).await {
            Ok(observation) => {
                let observation = if observation.is_empty() {
                    EMPTY_OBSERVATION.to_string()
                } else {
                    observation
                };
                self.memory.add(Message::user(&observation));
                (StatusCode::Observation, observation)
            }
            // An error short-circuits the iteration; nothing is fed back.
            Err(err) => (StatusCode::Error, err.to_string()),
        }
    }

    /// The rendered system prompt (template + tool markdown)
    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Read access to the conversation memory
    pub fn memory(&self) -> &dyn ChatMemory {
        self.memory.as_ref()
    }

    /// The tool registry
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Configuration
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }
}

/// Builder for [`Agent`]
pub struct AgentBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    pending_tools: Vec<Arc<dyn Tool>>,
    duplicate_policy: DuplicatePolicy,
    memory: Option<Box<dyn ChatMemory>>,
    permission: Arc<dyn PermissionHook>,
    config: AgentConfig,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            pending_tools: Vec::new(),
            duplicate_policy: DuplicatePolicy::default(),
            memory: None,
            permission: Arc::new(AllowAll),
            config: AgentConfig::default(),
        }
    }

    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn tool<T: Tool + 'static>(mut self, tool: T) -> Self {
        self.pending_tools.push(Arc::new(tool));
        self
    }

    pub fn duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    pub fn memory(mut self, memory: Box<dyn ChatMemory>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Use a bounded FIFO buffer with the given capacity
    pub fn memory_capacity(mut self, capacity: usize) -> Self {
        self.memory = Some(Box::new(BufferMemory::new(capacity)));
        self
    }

    pub fn permission(mut self, hook: Arc<dyn PermissionHook>) -> Self {
        self.permission = hook;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.config.instructions = instructions.into();
        self
    }

    pub fn max_iterations(mut self, max: usize) -> Self {
        self.config.max_iterations = max;
        self
    }

    pub fn terminal_marker(mut self, marker: impl Into<String>) -> Self {
        self.config.terminal_marker = marker.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.generation.model = model.into();
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.config.generation.temperature = temperature;
        self
    }

    /// Register the tools and render the system prompt once.
    pub fn build(self) -> Result<Agent> {
        let provider = self
            .provider
            .ok_or_else(|| AgentError::Config("provider is required".into()))?;

        let mut tools = ToolRegistry::with_policy(self.duplicate_policy);
        for tool in self.pending_tools {
            tools.register_arc(tool)?;
        }

        let mut system_prompt = render_template(
            SYSTEM_PROMPT_TEMPLATE,
            &[
                ("{{name}}", self.config.name.as_str()),
                ("{{system}}", self.config.instructions.as_str()),
                ("{{final}}", self.config.terminal_marker.as_str()),
            ],
        );
        system_prompt.push('\n');
        system_prompt.push_str(&tools.prompt_section());

        Ok(Agent {
            provider,
            tools,
            memory: self.memory.unwrap_or_else(|| Box::new(BufferMemory::default())),
            permission: self.permission,
            system_prompt,
            config: self.config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::message::Role;
    use crate::provider::Completion;
    use crate::tool::{CodeExecutor, ToolSpec};

    /// Provider that replays a fixed script of responses
    struct ScriptedProvider {
        script: Mutex<VecDeque<String>>,
    }

    impl ScriptedProvider {
        fn new(responses: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(responses.iter().map(|s| (*s).to_string()).collect()),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            _messages: &[Message],
            options: &GenerationOptions,
        ) -> Result<Completion> {
            let next = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| AgentError::Provider("script exhausted".into()))?;
            Ok(Completion::text(next, &options.model))
        }
    }

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec::new("echo", ["text"], "Echo the input back.")
        }

        async fn invoke(&self, args: &Map<String, Value>) -> Result<String> {
            Ok(args
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string())
        }
    }

    struct EmptyTool;

    #[async_trait]
    impl Tool for EmptyTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec::new("empty", Vec::<String>::new(), "Returns nothing.")
        }

        async fn invoke(&self, _args: &Map<String, Value>) -> Result<String> {
            Ok(String::new())
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec::new("broken", Vec::<String>::new(), "Always fails.")
        }

        async fn invoke(&self, _args: &Map<String, Value>) -> Result<String> {
            Err(AgentError::ToolExecution("boom".into()))
        }
    }

    struct DenyAll;

    impl PermissionHook for DenyAll {
        fn authorize(&self, _tool: &str, _args: &Map<String, Value>, _edit: bool) -> bool {
            false
        }
    }

    fn agent(provider: Arc<dyn LlmProvider>) -> AgentBuilder {
        Agent::builder().provider(provider).name("TestAgent")
    }

    #[tokio::test]
    async fn test_answer_terminates_run() {
        let provider = ScriptedProvider::new(&[r#"{"answer": "Done. [FINAL]"}"#]);
        let mut agent = agent(provider).terminal_marker("[FINAL]").build().unwrap();

        let outcome = agent.run("do the thing").await.unwrap();
        assert_eq!(outcome.status, RunStatus::Answered);
        assert_eq!(outcome.message, "Done. [FINAL]");
        assert_eq!(outcome.iterations, 1);
    }

    #[tokio::test]
    async fn test_action_then_answer() {
        let provider = ScriptedProvider::new(&[
            r#"{"thought": ["use the echo tool"], "action": {"name": "echo", "args": {"text": "tool output"}}}"#,
            r#"{"answer": "saw: tool output"}"#,
        ]);
        let mut agent = agent(provider).tool(EchoTool).build().unwrap();

        let outcome = agent.run("echo something").await.unwrap();
        assert_eq!(outcome.status, RunStatus::Answered);
        assert_eq!(outcome.iterations, 2);

        // exactly one observation turn, fed back under the user role
        let turns = agent.memory().get(None);
        let observations: Vec<_> = turns
            .iter()
            .filter(|m| m.role == Role::User && m.content == "tool output")
            .collect();
        assert_eq!(observations.len(), 1);
    }

    #[tokio::test]
    async fn test_unregistered_tool_errors_without_buffer_growth() {
        let provider =
            ScriptedProvider::new(&[r#"{"action": {"name": "missing", "args": {}}}"#]);
        let mut agent = agent(provider).tool(EchoTool).build().unwrap();

        let outcome = agent.run("task").await.unwrap();
        assert_eq!(outcome.status, RunStatus::Errored);
        assert!(outcome.message.contains("missing"));

        // the task turn and the assistant turn only; no observation appended
        assert_eq!(agent.memory().len(), 2);
    }

    #[tokio::test]
    async fn test_tool_failure_errors_without_feedback() {
        let provider = ScriptedProvider::new(&[r#"{"action": {"name": "broken", "args": {}}}"#]);
        let mut agent = agent(provider).tool(FailingTool).build().unwrap();

        let outcome = agent.run("task").await.unwrap();
        assert_eq!(outcome.status, RunStatus::Errored);
        assert!(outcome.message.contains("boom"));
        assert_eq!(agent.memory().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_observation_normalized() {
        let provider = ScriptedProvider::new(&[
            r#"{"action": {"name": "empty", "args": {}}}"#,
            r#"{"answer": "ok"}"#,
        ]);
        let mut agent = agent(provider).tool(EmptyTool).build().unwrap();

        let outcome = agent.run("task").await.unwrap();
        assert_eq!(outcome.status, RunStatus::Answered);

        let turns = agent.memory().get(None);
        assert!(turns
            .iter()
            .any(|m| m.content == "no result found the action"));
    }

    #[tokio::test]
    async fn test_forbidden_action() {
        let provider = ScriptedProvider::new(&[r#"{"action": {"name": "echo", "args": {}}}"#]);
        let mut agent = agent(provider)
            .tool(EchoTool)
            .permission(Arc::new(DenyAll))
            .build()
            .unwrap();

        let outcome = agent.run("task").await.unwrap();
        assert_eq!(outcome.status, RunStatus::Forbidden);
        // denial appends no observation
        assert_eq!(agent.memory().len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_response_feeds_back_and_recovers() {
        let provider = ScriptedProvider::new(&["not json", r#"{"answer": "recovered"}"#]);
        let mut agent = agent(provider).build().unwrap();

        let outcome = agent.run("task").await.unwrap();
        assert_eq!(outcome.status, RunStatus::Answered);
        assert_eq!(outcome.message, "recovered");

        // the corrective turn carries the raw content plus the error
        let turns = agent.memory().get(None);
        let corrective = turns
            .iter()
            .find(|m| m.role == Role::User && m.content.contains("not json"))
            .expect("corrective turn present");
        assert!(corrective.content.contains("JSONDecodeError"));
    }

    #[tokio::test]
    async fn test_thought_only_reprompts_without_new_turn() {
        let provider = ScriptedProvider::new(&[
            r#"{"thought": ["still thinking"]}"#,
            r#"{"answer": "done"}"#,
        ]);
        let mut agent = agent(provider).build().unwrap();

        let outcome = agent.run("task").await.unwrap();
        assert_eq!(outcome.status, RunStatus::Answered);
        // task + two assistant turns; the thought added nothing
        assert_eq!(agent.memory().len(), 3);
    }

    #[tokio::test]
    async fn test_budget_exhaustion() {
        let provider = ScriptedProvider::new(&[
            r#"{"thought": ["hmm"]}"#,
            r#"{"thought": ["hmm"]}"#,
            r#"{"thought": ["hmm"]}"#,
            r#"{"thought": ["hmm"]}"#,
        ]);
        let mut agent = agent(provider).max_iterations(3).build().unwrap();

        let outcome = agent.run("task").await.unwrap();
        assert_eq!(outcome.status, RunStatus::Exhausted);
        assert_eq!(outcome.iterations, 3);
    }

    #[tokio::test]
    async fn test_provider_failure_is_errored() {
        // empty script: the first completion call fails
        let provider = ScriptedProvider::new(&[]);
        let mut agent = agent(provider).build().unwrap();

        let outcome = agent.run("task").await.unwrap();
        assert_eq!(outcome.status, RunStatus::Errored);
        assert!(outcome.message.contains("script exhausted"));
    }

    #[tokio::test]
    async fn test_code_executor_end_to_end() {
        let provider = ScriptedProvider::new(&[
            r#"{"action": {"name": "code_executor", "args": {"language": "bash", "code": "echo hi"}}}"#,
            r#"{"answer": "printed hi"}"#,
        ]);
        let mut agent = agent(provider).tool(CodeExecutor).build().unwrap();

        let outcome = agent.run("print hi").await.unwrap();
        assert_eq!(outcome.status, RunStatus::Answered);

        let turns = agent.memory().get(None);
        assert!(turns.iter().any(|m| m.content == "hi\n"));
    }

    #[tokio::test]
    async fn test_system_prompt_renders_name_and_tools() {
        let provider = ScriptedProvider::new(&[]);
        let agent = agent(provider)
            .instructions("You are a Kubernetes engineer.")
            .tool(EchoTool)
            .build()
            .unwrap();

        let prompt = agent.system_prompt();
        assert!(prompt.contains("You are TestAgent."));
        assert!(prompt.contains("You are a Kubernetes engineer."));
        assert!(prompt.contains("### echo"));
        assert!(prompt.contains(FINAL_ANSWER));
    }

    #[test]
    fn test_agent_debug_output() {
        let provider = ScriptedProvider::new(&[]);
        let agent = agent(provider).tool(EchoTool).build().unwrap();

        let rendered = format!("{agent:?}");
        assert!(rendered.contains("TestAgent"));
        assert!(rendered.contains("tools: 1"));
    }

    #[test]
    fn test_builder_requires_provider() {
        let err = Agent::builder().build().unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }

    #[test]
    fn test_builder_strict_duplicates() {
        let provider: Arc<dyn LlmProvider> = ScriptedProvider::new(&[]);
        let err = Agent::builder()
            .provider(provider)
            .duplicate_policy(DuplicatePolicy::Strict)
            .tool(EchoTool)
            .tool(EchoTool)
            .build()
            .unwrap_err();
        assert!(matches!(err, AgentError::DuplicateTool(_)));
    }
}
