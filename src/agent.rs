//! Conversational agent.
//!
//! A structured-chat loop over a [`LanguageModel`]: the model answers every
//! step with one JSON action blob,
//!
//! ```json
//! {"action": "<tool name or Final Answer>", "action_input": ...}
//! ```
//!
//! Tool actions are executed and their output fed back as an observation;
//! `"Final Answer"` ends the turn. A reply without a usable blob is taken as
//! the final answer. At most `max_steps` tools run per turn.
//!
//! The last `memory_window` exchanges are replayed as conversation turns.
//! Every answered turn is appended to the transcript document when one is
//! configured.

use anyhow::Result;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::config::AgentConfig;
use crate::metadata::recover_json_span;
use crate::traits::{DocumentStore, GenerateRequest, LanguageModel, Tool, Turn};

pub const STEP_LIMIT_ANSWER: &str = "Agent stopped due to iteration limit.";

pub fn default_system_prompt(tool_name: &str) -> String {
    format!(
        r#"You are an intelligent assistant specialized in answering user questions using Nostr user profiles. Your primary goal is to provide precise, contextually relevant, and concise answers based on the tools and resources available.

### TOOL
Use the "{tool}" tool to:
- perform semantic similarity searches and retrieve information from Nostr user profiles relevant to the user's query.
- access detailed information about Nostr and/or Damus users when additional context or specifics are required.

### Key Instructions
1. **Response Guidelines**:
   - Clearly explain how the retrieved information addresses the user's query, if applicable.
   - If no relevant information is found, respond with: "I cannot find the answer in the available resources."

2. **Focus and Relevance**:
   - Ensure all responses are directly aligned with the user's question.
   - Avoid including extraneous details or relying solely on internal knowledge."#,
        tool = tool_name
    )
}

/// Tool listing and action-format rules appended to the system prompt.
pub fn tool_instructions(tools: &[Arc<dyn Tool>]) -> String {
    let listing: Vec<String> = tools
        .iter()
        .map(|t| format!("{}: {}, args: {}", t.name(), t.description(), t.parameters_schema()))
        .collect();
    let names: Vec<String> = tools.iter().map(|t| format!("\"{}\"", t.name())).collect();

    format!(
        r#"Respond to the human as helpfully and accurately as possible. You have access to the following tools:

{listing}

Use a json blob to specify a tool by providing an action key (tool name) and an action_input key (tool input).

Valid "action" values: "Final Answer" or {names}

Provide only ONE action per $JSON_BLOB, as shown:

```
{{"action": $TOOL_NAME, "action_input": $INPUT}}
```

Follow this format:

Question: input question to answer
Thought: consider previous and subsequent steps
Action:
```
$JSON_BLOB
```
Observation: action result
... (repeat Thought/Action/Observation N times)
Thought: I know what to respond
Action:
```
{{"action": "Final Answer", "action_input": "Final response to human"}}
```

Begin! Reminder to ALWAYS respond with a valid json blob of a single action. Use tools if necessary. Respond directly if appropriate."#,
        listing = listing.join("\n"),
        names = names.join(", ")
    )
}

#[derive(Debug, Clone, PartialEq)]
pub enum AgentAction {
    Final(String),
    Tool { name: String, input: Value },
}

/// Read the action blob from a model reply. Anything unusable is the final
/// answer verbatim.
pub fn parse_action(reply: &str) -> AgentAction {
    let fallback = || AgentAction::Final(reply.trim().to_string());
    let blob = match recover_json_span(reply) {
        Some(blob) => blob,
        None => return fallback(),
    };
    let action = match blob.get("action").and_then(|a| a.as_str()) {
        Some(a) => a.trim().to_string(),
        None => return fallback(),
    };
    let input = blob.get("action_input").cloned().unwrap_or(Value::Null);

    if action.eq_ignore_ascii_case("final answer") {
        let text = match input {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        };
        AgentAction::Final(text)
    } else {
        AgentAction::Tool {
            name: action,
            input,
        }
    }
}

/// `"\n----\n\n<timestamp>\n\n<message>\n\n<answer>"`
pub fn transcript_entry(timestamp: &str, message: &str, answer: &str) -> String {
    format!(
        "\n-------------------------------\n\n{}\n\n{}\n\n{}",
        timestamp, message, answer
    )
}

pub struct ChatAgent {
    model: Arc<dyn LanguageModel>,
    tools: Vec<Arc<dyn Tool>>,
    system_prompt: String,
    memory_window: usize,
    max_steps: usize,
    memory: Mutex<VecDeque<(String, String)>>,
    history: Option<(Arc<dyn DocumentStore>, String)>,
}

impl ChatAgent {
    pub fn new(model: Arc<dyn LanguageModel>, tools: Vec<Arc<dyn Tool>>, config: &AgentConfig) -> Self {
        let system_prompt = config.system_prompt.clone().unwrap_or_else(|| {
            let tool_name = tools.first().map(|t| t.name().to_string()).unwrap_or_default();
            default_system_prompt(&tool_name)
        });
        Self {
            model,
            tools,
            system_prompt,
            memory_window: config.memory_window,
            max_steps: config.max_steps,
            memory: Mutex::new(VecDeque::new()),
            history: None,
        }
    }

    /// Append every answered turn to `doc_id` in `store`.
    pub fn with_history(mut self, store: Arc<dyn DocumentStore>, doc_id: impl Into<String>) -> Self {
        self.history = Some((store, doc_id.into()));
        self
    }

    /// Answer `message`. Failures come back as an error text, never a panic
    /// or an `Err`.
    pub async fn chat(&self, message: &str) -> String {
        let answer = match self.answer(message).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::error!(error = %format!("{:#}", e), "chat failed");
                return format!("Error processing chat: {:#}", e);
            }
        };

        self.remember(message, &answer);

        if let Some((store, doc_id)) = &self.history {
            let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
            let entry = transcript_entry(&timestamp, message, &answer);
            if let Err(e) = store.append_text(doc_id, &entry).await {
                tracing::warn!(error = %e, "failed to append chat history");
            }
        }

        answer
    }

    /// Forget the conversation so far.
    pub fn clear(&self) {
        self.memory.lock().unwrap().clear();
    }

    pub fn memory_len(&self) -> usize {
        self.memory.lock().unwrap().len()
    }

    fn remember(&self, message: &str, answer: &str) {
        let mut memory = self.memory.lock().unwrap();
        memory.push_back((message.to_string(), answer.to_string()));
        while memory.len() > self.memory_window {
            memory.pop_front();
        }
    }

    fn base_turns(&self, message: &str) -> Vec<Turn> {
        let memory = self.memory.lock().unwrap();
        let mut turns = Vec::with_capacity(memory.len() * 2 + 1);
        for (user, model) in memory.iter() {
            turns.push(Turn::user(user.clone()));
            turns.push(Turn::model(model.clone()));
        }
        turns.push(Turn::user(message.to_string()));
        turns
    }

    async fn answer(&self, message: &str) -> Result<String> {
        let system = format!("{}\n\n{}", self.system_prompt, tool_instructions(&self.tools));
        let mut turns = self.base_turns(message);
        let mut steps = 0;

        loop {
            let request = GenerateRequest {
                system: Some(system.clone()),
                turns: turns.clone(),
                temperature: None,
            };
            let reply = self.model.generate(&request).await?;

            let (name, input) = match parse_action(&reply) {
                AgentAction::Final(answer) => return Ok(answer),
                AgentAction::Tool { name, input } => (name, input),
            };

            if steps >= self.max_steps {
                tracing::warn!(max_steps = self.max_steps, "agent step limit reached");
                return Ok(STEP_LIMIT_ANSWER.to_string());
            }
            steps += 1;

            let observation = self.run_tool(&name, input).await;
            tracing::debug!(tool = %name, step = steps, "tool observation ready");
            turns.push(Turn::model(reply));
            turns.push(Turn::user(format!("Observation: {}", observation)));
        }
    }

    async fn run_tool(&self, name: &str, input: Value) -> String {
        let tool = match self.tools.iter().find(|t| t.name() == name) {
            Some(t) => t,
            None => {
                let names: Vec<&str> = self.tools.iter().map(|t| t.name()).collect();
                return format!("{} is not a valid tool, try one of [{}].", name, names.join(", "));
            }
        };
        match tool.execute(input).await {
            Ok(output) => output,
            Err(e) => format!("Tool error: {:#}", e),
        }
    }
}
