//! Visual editor round trip.
//!
//! The graphical scenario builder is an alternate administrative surface over
//! the same steps and answers. Its node/connection layout is kept as a
//! versioned opaque envelope on the scenario and is never read by gameplay.
//!
//! Saving rebuilds the scenario's steps from "client" nodes ordered top to
//! bottom. Each client node carries its answers inline; older layouts used
//! standalone "answer" nodes linked by connections, which are still accepted.
//! Loading always regenerates nodes from the stored steps and only reuses
//! saved positions and connections.

use std::collections::HashMap;

use log::{info, warn};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};

use crate::trainer::errors::TrainerError;
use crate::trainer::storage::TrainerStore;
use crate::trainer::types::{AnswerDraft, Mood, OpaquePayload, StepDraft};

pub const LAYOUT_VERSION: u32 = 1;

const DEFAULT_NODE_X: f64 = 200.0;
const NODE_Y_START: f64 = 100.0;
const NODE_Y_SPACING: f64 = 200.0;
const LEGACY_CORRECT_POINTS: i32 = 10;
const DEFAULT_CLIENT_LABEL: &str = "Client message";
const DEFAULT_ANSWER_TEXT: &str = "Operator reply";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct LayoutEnvelope {
    version: u32,
    nodes: Vec<Value>,
    connections: Vec<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct NodeAnswer {
    text: Option<String>,
    is_correct: bool,
    is_partial: bool,
    points: i32,
    feedback: String,
    mood_impact: i32,
    knowledge_link: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct EditorNode {
    #[serde(deserialize_with = "node_id")]
    id: String,
    #[serde(rename = "type")]
    kind: String,
    x: f64,
    y: f64,
    label: Option<String>,
    mood: Option<String>,
    client_name: Option<String>,
    answers: Vec<NodeAnswer>,
    // Legacy standalone answer nodes.
    is_correct: bool,
    mood_impact: i32,
    feedback: String,
    knowledge_link: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct EditorConnection {
    #[serde(deserialize_with = "node_id")]
    from_id: String,
    #[serde(deserialize_with = "node_id")]
    to_id: String,
}

/// Editors send node ids as strings or as plain numbers.
fn value_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn node_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(value_id(&Value::deserialize(deserializer)?).unwrap_or_default())
}

/// Layout returned to the editor.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EditorLayout {
    pub nodes: Vec<Value>,
    pub connections: Vec<Value>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct SaveSummary {
    pub steps: usize,
    pub answers: usize,
}

fn step_node_id(step_id: u64) -> String {
    format!("step_{}", step_id)
}

/// Replace the scenario's steps and answers with the ones described by the
/// layout, then store the layout. The old steps are swapped out in one
/// batch, so a node that fails validation leaves them untouched.
pub fn save_layout(
    store: &TrainerStore,
    scenario_id: u64,
    nodes: Vec<Value>,
    connections: Vec<Value>,
) -> Result<SaveSummary, TrainerError> {
    store.get_scenario(scenario_id)?;

    let parsed: Vec<EditorNode> = nodes
        .iter()
        .map(|n| serde_json::from_value(n.clone()))
        .collect::<Result<_, _>>()?;
    let links: Vec<EditorConnection> = connections
        .iter()
        .filter_map(|c| serde_json::from_value(c.clone()).ok())
        .collect();

    let mut client_nodes: Vec<&EditorNode> = parsed.iter().filter(|n| n.kind == "client").collect();
    client_nodes.sort_by(|a, b| a.y.total_cmp(&b.y));

    let mut plan: Vec<(String, StepDraft, Vec<AnswerDraft>)> = Vec::with_capacity(client_nodes.len());
    for node in &client_nodes {
        let message = node.label.as_deref().unwrap_or(DEFAULT_CLIENT_LABEL);
        let step = StepDraft {
            client_message: message.to_string(),
            client_avatar: None,
            client_name: node.client_name.clone(),
            initial_mood: Some(node.mood.as_deref().map_or(Mood::Neutral, Mood::parse_lenient)),
        };
        let mut answers = Vec::with_capacity(node.answers.len());
        for (idx, answer) in node.answers.iter().enumerate() {
            let text = answer.text.as_deref().unwrap_or(DEFAULT_ANSWER_TEXT);
            answers.push(AnswerDraft {
                answer_text: text.to_string(),
                is_correct: answer.is_correct,
                is_partial: answer.is_partial,
                points: answer.points,
                feedback: answer.feedback.clone(),
                mood_impact: answer.mood_impact,
                order_num: idx as i32,
                knowledge_link: answer.knowledge_link.clone(),
            });
        }
        plan.push((node.id.clone(), step, answers));
    }
    for legacy in parsed.iter().filter(|n| n.kind == "answer") {
        let Some(parent) = links.iter().find(|c| c.to_id == legacy.id) else {
            continue;
        };
        let Some((_, _, answers)) = plan.iter_mut().find(|(id, _, _)| *id == parent.from_id) else {
            continue;
        };
        let text = legacy.label.as_deref().unwrap_or(DEFAULT_ANSWER_TEXT);
        answers.push(AnswerDraft {
            answer_text: text.to_string(),
            is_correct: legacy.is_correct,
            is_partial: false,
            points: if legacy.is_correct { LEGACY_CORRECT_POINTS } else { 0 },
            feedback: legacy.feedback.clone(),
            mood_impact: legacy.mood_impact,
            order_num: answers.len() as i32,
            knowledge_link: legacy.knowledge_link.clone(),
        });
    }

    let summary = SaveSummary {
        steps: plan.len(),
        answers: plan.iter().map(|(_, _, answers)| answers.len()).sum(),
    };
    let (node_ids, drafts): (Vec<String>, Vec<_>) = plan
        .into_iter()
        .map(|(node_id, step, answers)| (node_id, (step, answers)))
        .unzip();
    let steps = store.replace_steps(scenario_id, drafts)?;
    let renamed: HashMap<String, String> = node_ids
        .into_iter()
        .zip(steps.iter().map(|step| step_node_id(step.id)))
        .collect();

    let envelope = LayoutEnvelope {
        version: LAYOUT_VERSION,
        nodes: nodes.into_iter().map(|n| rename_node(n, &renamed)).collect(),
        connections: connections
            .into_iter()
            .map(|c| rename_connection(c, &renamed))
            .collect(),
    };
    let payload = OpaquePayload::from_value(&serde_json::to_value(&envelope)?)?;
    store.set_visual_layout(scenario_id, Some(payload))?;
    info!(
        "Visual layout saved for scenario {}: {} steps, {} answers",
        scenario_id, summary.steps, summary.answers
    );
    Ok(summary)
}

/// Saved client nodes are re-keyed to the ids of the steps just created so
/// their positions survive the next load.
fn rename_node(mut node: Value, renamed: &HashMap<String, String>) -> Value {
    if let Some(id) = node.get("id").and_then(value_id) {
        if let Some(new_id) = renamed.get(&id) {
            node["id"] = Value::String(new_id.clone());
        }
    }
    node
}

fn rename_connection(mut connection: Value, renamed: &HashMap<String, String>) -> Value {
    for field in ["fromId", "toId"] {
        if let Some(id) = connection.get(field).and_then(value_id) {
            if let Some(new_id) = renamed.get(&id) {
                connection[field] = Value::String(new_id.clone());
            }
        }
    }
    connection
}

fn saved_envelope(store: &TrainerStore, scenario_id: u64) -> Result<Option<LayoutEnvelope>, TrainerError> {
    let scenario = store.get_scenario(scenario_id)?;
    let Some(payload) = scenario.visual_layout else {
        return Ok(None);
    };
    match serde_json::from_str::<LayoutEnvelope>(payload.as_str()) {
        Ok(envelope) if envelope.version == LAYOUT_VERSION => Ok(Some(envelope)),
        Ok(envelope) => {
            warn!(
                "Ignoring visual layout v{} on scenario {}",
                envelope.version, scenario_id
            );
            Ok(None)
        }
        Err(e) => {
            warn!("Unreadable visual layout on scenario {}: {}", scenario_id, e);
            Ok(None)
        }
    }
}

/// Regenerate editor nodes from the stored steps, reusing saved positions.
pub fn load_layout(store: &TrainerStore, scenario_id: u64) -> Result<EditorLayout, TrainerError> {
    let envelope = saved_envelope(store, scenario_id)?;
    let positions: HashMap<String, (f64, f64)> = envelope
        .as_ref()
        .map(|env| {
            env.nodes
                .iter()
                .filter_map(|n| serde_json::from_value::<EditorNode>(n.clone()).ok())
                .map(|n| (n.id, (n.x, n.y)))
                .collect()
        })
        .unwrap_or_default();

    let mut nodes = Vec::new();
    let mut default_y = NODE_Y_START;
    for step in store.scenario_steps(scenario_id)? {
        let node_id = step_node_id(step.id);
        let (x, y) = positions
            .get(&node_id)
            .copied()
            .unwrap_or((DEFAULT_NODE_X, default_y));
        let answers: Vec<Value> = store
            .step_answers(step.id)?
            .into_iter()
            .map(|a| {
                json!({
                    "id": a.id,
                    "text": a.answer_text,
                    "isCorrect": a.is_correct,
                    "isPartial": a.is_partial,
                    "points": a.points,
                    "feedback": a.feedback,
                    "moodImpact": a.mood_impact,
                    "knowledgeLink": a.knowledge_link,
                })
            })
            .collect();
        nodes.push(json!({
            "id": node_id,
            "type": "client",
            "x": x,
            "y": y,
            "label": step.client_message,
            "mood": step.initial_mood.as_str(),
            "stepId": step.id,
            "stepNum": step.step_num,
            "clientName": step.client_name,
            "answers": answers,
        }));
        default_y += NODE_Y_SPACING;
    }

    Ok(EditorLayout {
        nodes,
        connections: envelope.map(|env| env.connections).unwrap_or_default(),
    })
}
