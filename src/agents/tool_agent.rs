//! Agent that answers by calling tools from a registry

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::domain::{AgentCard, AgentSkill, EventSink, Phase, ProgressEvent, Task, TaskExecutor};
use crate::tools::expression::looks_like_expression;
use crate::tools::{ToolError, ToolRegistry, ToolResult};

/// What the agent decided to do with a message
#[derive(Debug, Clone, PartialEq)]
pub enum ToolRequest {
    /// Describe the available tools
    List,
    /// Call one tool with JSON arguments
    Call { tool: String, args: Value },
}

/// Selects a tool by keyword, calls it and reports the result
///
/// A message that starts with a tool name is treated as a direct call, with
/// the rest of the message parsed as the JSON arguments object:
///
/// ```text
/// convert_units {"value": 5, "from_unit": "km", "to_unit": "miles"}
/// ```
pub struct ToolAgent {
    registry: ToolRegistry,
    url: String,
}

impl ToolAgent {
    pub fn new(registry: ToolRegistry, url: impl Into<String>) -> Self {
        Self {
            registry,
            url: url.into(),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Decide which tool a message asks for; `None` if no tool matches
    pub fn parse_request(&self, message: &str) -> ToolResult<Option<ToolRequest>> {
        let trimmed = message.trim();
        let lower = trimmed.to_lowercase();

        if let Some(request) = self.parse_direct_call(trimmed)? {
            return Ok(Some(request));
        }

        if lower.contains("list tools") || lower.contains("what can you do") {
            return Ok(Some(ToolRequest::List));
        }

        let request = if lower.contains("prime") {
            first_integer(trimmed).map(|n| call("is_prime", json!({"number": n})))
        } else if lower.contains("roll") || lower.contains("dice") {
            Some(call("roll_dice", dice_args(&lower)))
        } else if lower.contains("convert") {
            conversion_args(trimmed).map(|args| call("convert_units", args))
        } else if lower.contains("reverse") {
            let text = quoted(trimmed).unwrap_or_else(|| after_keyword(trimmed, "reverse"));
            let by_word = lower.contains("words") || lower.contains("by word");
            Some(call("reverse_text", json!({"text": text, "by_word": by_word})))
        } else if lower.contains("analyze") || lower.contains("analyse") {
            let keyword = if lower.contains("analyze") { "analyze" } else { "analyse" };
            let text = quoted(trimmed).unwrap_or_else(|| after_keyword(trimmed, keyword));
            Some(call("analyze_text", json!({"text": text})))
        } else if lower.contains("time") || lower.contains("date") {
            Some(call("get_current_time", json!({})))
        } else {
            expression_in(trimmed).map(|expression| call("calculate", json!({"expression": expression})))
        };

        Ok(request)
    }

    fn parse_direct_call(&self, message: &str) -> ToolResult<Option<ToolRequest>> {
        let (name, rest) = match message.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (message, ""),
        };
        let json_follows = rest.is_empty() || rest.starts_with('{') || rest.starts_with('[');
        if !json_follows || self.registry.get(name).is_err() {
            return Ok(None);
        }

        let args = if rest.is_empty() {
            json!({})
        } else {
            serde_json::from_str::<Value>(rest)
                .map_err(|e| ToolError::invalid("arguments", e.to_string()))?
        };
        if !args.is_object() {
            return Err(ToolError::invalid("arguments", "expected a JSON object"));
        }
        Ok(Some(call(name, args)))
    }

    /// Reply text for a message
    pub fn process(&self, message: &str) -> ToolResult<String> {
        match self.parse_request(message)? {
            Some(ToolRequest::List) => {
                let lines: Vec<String> = self
                    .registry
                    .list()
                    .iter()
                    .map(|t| {
                        format!(
                            "- {} ({}): {}",
                            t["name"].as_str().unwrap_or_default(),
                            t["category"].as_str().unwrap_or_default(),
                            t["description"].as_str().unwrap_or_default()
                        )
                    })
                    .collect();
                Ok(format!("Available tools:\n{}", lines.join("\n")))
            }
            Some(ToolRequest::Call { tool, args }) => {
                let result = self.registry.call(&tool, &args)?;
                let rendered = serde_json::to_string_pretty(&result)
                    .map_err(|e| ToolError::Execution(e.to_string()))?;
                Ok(format!("Used {}:\n{}", tool, rendered))
            }
            None => Ok(format!(
                "I didn't understand which tool to use for: '{}'\n\nAvailable tools: {}\nTry saying 'list tools' to see what I can do!",
                message,
                self.registry.names().join(", ")
            )),
        }
    }
}

impl Default for ToolAgent {
    fn default() -> Self {
        Self::new(ToolRegistry::with_builtins(), "local://tools")
    }
}

#[async_trait]
impl TaskExecutor for ToolAgent {
    fn card(&self) -> AgentCard {
        let mut card = AgentCard::new(
            "tools",
            "An agent that uses tools for math, text, unit conversion and time",
            self.url.clone(),
        );
        for category in self.registry.categories() {
            let names: Vec<String> = self
                .registry
                .by_category(&category)
                .iter()
                .map(|t| t.name().to_string())
                .collect();
            card = card.with_skill(
                AgentSkill::new(category.clone(), category.clone(), format!("Tools: {}", names.join(", ")))
                    .with_tags(&[category.as_str()]),
            );
        }
        card
    }

    async fn execute(&self, task: Task, sink: EventSink) {
        let thinking = ProgressEvent::status(
            Phase::Thinking,
            "Analyzing your request and selecting appropriate tool...",
        );
        if sink.emit(thinking).await.is_err() {
            return;
        }

        let events = match self.process(&task.instruction) {
            Ok(reply) => vec![
                ProgressEvent::text(reply),
                ProgressEvent::status(Phase::Completed, "Task completed!"),
            ],
            Err(e) => {
                tracing::warn!("Tool call failed for session {}: {}", task.session_id, e);
                vec![ProgressEvent::status(Phase::Failed, format!("Error: {}", e))]
            }
        };
        for event in events {
            if sink.emit(event).await.is_err() {
                return;
            }
        }
    }

    /// Tool calls are synchronous so there is never anything to cancel
    async fn cancel(&self, _session_id: &str) -> bool {
        false
    }
}

fn call(tool: &str, args: Value) -> ToolRequest {
    ToolRequest::Call {
        tool: tool.to_string(),
        args,
    }
}

fn first_integer(text: &str) -> Option<i64> {
    text.split(|c: char| !(c.is_ascii_digit() || c == '-'))
        .find_map(|token| token.parse::<i64>().ok())
}

/// `2d6`, `d20` or nothing
fn dice_args(lower: &str) -> Value {
    let notation = lower.split_whitespace().find_map(|token| {
        let (count, sides) = token.split_once('d')?;
        let sides = sides.trim_end_matches(|c: char| !c.is_ascii_digit()).parse::<i64>().ok()?;
        let count = if count.is_empty() { 1 } else { count.parse::<i64>().ok()? };
        Some((count, sides))
    });
    match notation {
        Some((count, sides)) => json!({"count": count, "sides": sides}),
        None => json!({}),
    }
}

/// `convert 10 km to miles`
fn conversion_args(text: &str) -> Option<Value> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let index = tokens.iter().position(|t| t.parse::<f64>().is_ok())?;
    let value: f64 = tokens[index].parse().ok()?;
    let from_unit = tokens.get(index + 1)?;
    let mut rest = tokens[index + 2..].iter().filter(|t| !t.eq_ignore_ascii_case("to"));
    let to_unit = rest.next()?.trim_end_matches(|c: char| c.is_ascii_punctuation());
    Some(json!({"value": value, "from_unit": from_unit, "to_unit": to_unit}))
}

fn quoted(text: &str) -> Option<String> {
    ['"', '\''].iter().find_map(|&q| {
        let start = text.find(q)?;
        let end = text[start + 1..].find(q)?;
        Some(text[start + 1..start + 1 + end].to_string())
    })
}

fn after_keyword(text: &str, keyword: &str) -> String {
    let lower = text.to_lowercase();
    match lower.find(keyword) {
        Some(index) => text
            .get(index + keyword.len()..)
            .unwrap_or(text)
            .trim_start_matches(|c: char| c.is_alphabetic())
            .trim_start_matches(|c: char| c == ':' || c.is_whitespace())
            .to_string(),
        None => text.to_string(),
    }
}

/// Arithmetic after a lead-in like "calculate" or "what is", or the whole message
fn expression_in(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    let candidate = ["calculate", "compute", "what is", "what's"]
        .iter()
        .find_map(|lead| lower.find(*lead).and_then(|i| text.get(i + lead.len()..)))
        .map(str::to_string)
        .unwrap_or_else(|| text.to_string());
    let candidate = candidate.trim().trim_end_matches(['?', '.', '!']).trim().to_string();
    looks_like_expression(&candidate).then_some(candidate)
}
