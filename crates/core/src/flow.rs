//! Scripted dialogue flows: an ordered list of nodes, one step per user message.

use crate::traits::FlowStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};
use uuid::Uuid;

pub type FlowVariables = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowDefinition {
    #[serde(default)]
    pub nodes: Vec<FlowNode>,
    #[serde(default)]
    pub edges: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowSummary {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowExecution {
    pub session_id: String,
    pub user_input: String,
    pub bot_response: String,
    pub node_type: String,
    pub node_data: Value,
    pub variables: FlowVariables,
}

#[derive(Debug, Clone, Default)]
pub struct FlowState {
    pub current_step: usize,
    pub variables: FlowVariables,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowStep {
    pub response: String,
    pub next_step: Option<usize>,
    /// Variables captured by this step only.
    pub captured: FlowVariables,
    pub node_type: Option<String>,
    pub completed: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct IntentData {
    intent_keywords: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PromptData {
    question: Option<String>,
    variable_name: Option<String>,
    options: Vec<ButtonOption>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ButtonOption {
    label: String,
    value: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ResponseData {
    message: Option<String>,
    variables: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConditionData {
    conditions: Vec<Condition>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Condition {
    operator: String,
    value: String,
}

enum Transition {
    Advance,
    Stay,
}

pub fn execute_step(flow: &FlowDefinition, state: &FlowState, user_input: &str) -> FlowStep {
    let step = state.current_step;
    let Some(node) = flow.nodes.get(step) else {
        return FlowStep {
            response: "Flow completed".to_string(),
            next_step: None,
            captured: FlowVariables::new(),
            node_type: None,
            completed: true,
        };
    };

    let mut captured = FlowVariables::new();
    let input = user_input.to_lowercase();

    let (response, transition) = match node.kind.as_str() {
        "intent" => intent_step(parse_data(&node.data), &input),
        "textInput" => {
            let data: PromptData = parse_data(&node.data);
            let question = data
                .question
                .unwrap_or_else(|| "Please provide your input:".to_string());
            if step == 0 || input.contains("yes") || input.contains("no") {
                (question, Transition::Stay)
            } else {
                let name = data.variable_name.unwrap_or_else(|| "userInput".to_string());
                captured.insert(name, user_input.to_string());
                (
                    format!("Thank you! I've recorded: {user_input}"),
                    Transition::Advance,
                )
            }
        }
        "button" => button_step(parse_data(&node.data), &input, &mut captured),
        "response" => (
            response_message(parse_data(&node.data), &state.variables, user_input),
            Transition::Advance,
        ),
        "condition" => condition_step(parse_data(&node.data), user_input),
        other => {
            debug!(node_type = other, "unknown flow node type");
            ("Unknown node type".to_string(), Transition::Advance)
        }
    };

    let next = match transition {
        Transition::Advance => step + 1,
        Transition::Stay => step,
    };

    FlowStep {
        response,
        next_step: Some(next),
        captured,
        node_type: Some(node.kind.clone()),
        completed: next >= flow.nodes.len(),
    }
}

fn parse_data<T: for<'de> Deserialize<'de> + Default>(data: &Value) -> T {
    if data.is_null() {
        return T::default();
    }
    serde_json::from_value(data.clone()).unwrap_or_else(|error| {
        warn!(%error, "malformed flow node data, using defaults");
        T::default()
    })
}

fn intent_step(data: IntentData, input: &str) -> (String, Transition) {
    let matched = data
        .intent_keywords
        .split(',')
        .map(|keyword| keyword.trim().to_lowercase())
        .filter(|keyword| !keyword.is_empty() && input.contains(keyword.as_str()))
        .collect::<Vec<_>>();

    if matched.is_empty() {
        (
            "I didn't understand that. Could you please rephrase?".to_string(),
            Transition::Stay,
        )
    } else {
        (
            format!("Intent detected: {}", matched.join(", ")),
            Transition::Advance,
        )
    }
}

fn button_step(data: PromptData, input: &str, captured: &mut FlowVariables) -> (String, Transition) {
    let question = data
        .question
        .unwrap_or_else(|| "Please select an option:".to_string());
    if data.options.is_empty() {
        return (question, Transition::Stay);
    }

    let choice = data.options.iter().find(|option| {
        let label = option.label.to_lowercase();
        let value = option.value.to_lowercase();
        (!label.is_empty() && input.contains(&label)) || (!value.is_empty() && input.contains(&value))
    });

    match choice {
        Some(option) => {
            let name = data
                .variable_name
                .unwrap_or_else(|| "userChoice".to_string());
            captured.insert(name, option.value.clone());
            (format!("You selected: {}", option.label), Transition::Advance)
        }
        None => {
            let listed = data
                .options
                .iter()
                .map(|option| format!("• {}", option.label))
                .collect::<Vec<_>>()
                .join("\n");
            (format!("{question}\n\nOptions:\n{listed}"), Transition::Stay)
        }
    }
}

fn response_message(data: ResponseData, known: &FlowVariables, user_input: &str) -> String {
    let mut message = data.message.unwrap_or_else(|| "Thank you!".to_string());

    for name in data.variables.split(',').map(str::trim).filter(|name| !name.is_empty()) {
        let placeholder = format!("{{{name}}}");
        if !message.contains(&placeholder) {
            continue;
        }
        let value = known
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
            .or(Some(user_input).filter(|input| !input.is_empty()))
            .unwrap_or("[value]");
        message = message.replacen(&placeholder, value, 1);
    }

    message
}

fn condition_step(data: ConditionData, user_input: &str) -> (String, Transition) {
    let input = user_input.to_lowercase();
    let met = data.conditions.iter().any(|condition| {
        let expected = condition.value.to_lowercase();
        match condition.operator.as_str() {
            "exists" => !user_input.trim().is_empty(),
            "contains" => input.contains(&expected),
            "equals" => input == expected,
            _ => false,
        }
    });

    if met {
        ("Condition met, proceeding...".to_string(), Transition::Advance)
    } else {
        (
            "Condition not met, please try again.".to_string(),
            Transition::Stay,
        )
    }
}

/// Executes flow steps and keeps an execution log in a [`FlowStore`].
pub struct FlowRunner<F>
where
    F: FlowStore,
{
    store: F,
}

impl<F> FlowRunner<F>
where
    F: FlowStore,
{
    pub fn new(store: F) -> Self {
        Self { store }
    }

    /// Runs one step. A failed log write is reported and otherwise ignored.
    pub async fn run_step(
        &self,
        session_id: &str,
        flow: &FlowDefinition,
        state: &FlowState,
        user_input: &str,
    ) -> FlowStep {
        let step = execute_step(flow, state, user_input);

        if let Some(node) = flow.nodes.get(state.current_step) {
            let execution = FlowExecution {
                session_id: session_id.to_string(),
                user_input: user_input.to_string(),
                bot_response: step.response.clone(),
                node_type: node.kind.clone(),
                node_data: node.data.clone(),
                variables: step.captured.clone(),
            };
            if let Err(error) = self.store.record_flow_execution(execution).await {
                warn!(session_id, %error, "failed to record flow execution");
            }
        }

        step
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn flow(nodes: Value) -> FlowDefinition {
        serde_json::from_value(json!({ "nodes": nodes, "edges": [] })).unwrap()
    }

    fn at(step: usize) -> FlowState {
        FlowState {
            current_step: step,
            variables: FlowVariables::new(),
        }
    }

    #[test]
    fn missing_node_completes_the_flow() {
        let step = execute_step(&flow(json!([])), &at(0), "hello");
        assert_eq!(step.response, "Flow completed");
        assert_eq!(step.next_step, None);
        assert!(step.completed);
    }

    #[test]
    fn intent_node_matches_keywords_case_insensitively() {
        let definition = flow(json!([
            { "type": "intent", "data": { "intentKeywords": "Order, refund , " } },
            { "type": "response", "data": { "message": "ok" } }
        ]));

        let hit = execute_step(&definition, &at(0), "I want a REFUND please");
        assert_eq!(hit.response, "Intent detected: refund");
        assert_eq!(hit.next_step, Some(1));
        assert!(!hit.completed);

        let miss = execute_step(&definition, &at(0), "hello there");
        assert_eq!(miss.next_step, Some(0));
    }

    #[test]
    fn text_input_asks_first_then_records() {
        let definition = flow(json!([
            { "type": "response", "data": {} },
            { "type": "textInput", "data": { "question": "Your email?", "variableName": "email" } }
        ]));

        let ask = execute_step(&definition, &at(1), "yes");
        assert_eq!(ask.response, "Your email?");
        assert_eq!(ask.next_step, Some(1));

        let record = execute_step(&definition, &at(1), "sam@example.com");
        assert_eq!(record.response, "Thank you! I've recorded: sam@example.com");
        assert_eq!(record.captured.get("email").map(String::as_str), Some("sam@example.com"));
        assert!(record.completed);
    }

    #[test]
    fn button_node_lists_options_until_one_matches() {
        let definition = flow(json!([
            { "type": "button", "data": {
                "question": "Pick a size",
                "options": [
                    { "label": "Small", "value": "s" },
                    { "label": "Large", "value": "l" }
                ]
            } }
        ]));

        let listed = execute_step(&definition, &at(0), "medium");
        assert_eq!(listed.response, "Pick a size\n\nOptions:\n• Small\n• Large");
        assert_eq!(listed.next_step, Some(0));

        let chosen = execute_step(&definition, &at(0), "large one");
        assert_eq!(chosen.response, "You selected: Large");
        assert_eq!(chosen.captured.get("userChoice").map(String::as_str), Some("l"));
    }

    #[test]
    fn response_node_fills_placeholders() {
        let definition = flow(json!([
            { "type": "response", "data": {
                "message": "Thanks {name}, we will mail {email}.",
                "variables": "name, email"
            } }
        ]));
        let mut state = at(0);
        state.variables.insert("name".to_string(), "Sam".to_string());

        let step = execute_step(&definition, &state, "sam@example.com");
        assert_eq!(step.response, "Thanks Sam, we will mail sam@example.com.");
    }

    #[test]
    fn condition_node_checks_operators() {
        let definition = flow(json!([
            { "type": "condition", "data": { "conditions": [
                { "field": "answer", "operator": "equals", "value": "Blue" }
            ] } }
        ]));

        assert_eq!(execute_step(&definition, &at(0), "blue").next_step, Some(1));
        let retry = execute_step(&definition, &at(0), "red");
        assert_eq!(retry.response, "Condition not met, please try again.");
        assert_eq!(retry.next_step, Some(0));
    }

    #[test]
    fn unknown_node_type_advances() {
        let step = execute_step(&flow(json!([{ "type": "webhook" }])), &at(0), "x");
        assert_eq!(step.response, "Unknown node type");
        assert_eq!(step.node_type.as_deref(), Some("webhook"));
        assert!(step.completed);
    }
}
