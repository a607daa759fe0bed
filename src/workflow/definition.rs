/// Workflow definition model, parser and structural validator
///
/// Definitions are authored as JSON text:
///
/// ```json
/// {
///   "name": "Expense approval",
///   "description": "...",
///   "startStepId": "submit",
///   "steps": [{ "id": "submit", "name": "Submit", "type": "manual", "assignedUser": "alice", "isRequired": true }],
///   "transitions": [{ "fromStepId": "submit", "toStepId": "review", "condition": null, "action": "approve" }]
/// }
/// ```
///
/// Parsing never validates; `check_definition` certifies structure before a
/// definition is allowed to drive execution.

use crate::error::WorkflowError;
use petgraph::{
    algo::is_cyclic_directed,
    graph::{DiGraph, NodeIndex},
    visit::Bfs,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

/// Declarative step + transition graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
    #[serde(default)]
    pub transitions: Vec<TransitionDefinition>,
    #[serde(default, alias = "start_step_id")]
    pub start_step_id: String,
}

/// A node of the definition graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// manual, approval, automatic, ...
    #[serde(rename = "type", default)]
    pub step_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "assigned_role")]
    pub assigned_role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "assigned_user")]
    pub assigned_user: Option<String>,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default = "required_by_default", alias = "is_required")]
    pub is_required: bool,
}

fn required_by_default() -> bool {
    true
}

impl StepDefinition {
    pub fn is_automatic(&self) -> bool {
        self.step_type.eq_ignore_ascii_case("automatic")
    }
}

/// A directed edge of the definition graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionDefinition {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(alias = "from_step_id")]
    pub from_step_id: String,
    #[serde(alias = "to_step_id")]
    pub to_step_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Free-form label (approve, reject, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

impl TransitionDefinition {
    /// Whether this transition fires
    ///
    /// Conditions are not evaluated: an empty condition always fires and a
    /// present one is treated as satisfied.
    pub fn is_satisfied(&self) -> bool {
        match self.condition.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(expr) => {
                tracing::debug!(
                    "🔀 Condition '{}' on {} -> {} is not evaluated, treating as satisfied",
                    expr, self.from_step_id, self.to_step_id
                );
                true
            }
        }
    }
}

/// Parse definition text
pub fn parse_definition(text: &str) -> Result<WorkflowDefinition, WorkflowError> {
    serde_json::from_str(text).map_err(|e| {
        tracing::error!("❌ Failed to parse workflow definition: {}", e);
        WorkflowError::MalformedDefinition(e.to_string())
    })
}

/// Serialize a definition back into its text form
pub fn serialize_definition(definition: &WorkflowDefinition) -> Result<String, WorkflowError> {
    serde_json::to_string_pretty(definition)
        .map_err(|e| WorkflowError::MalformedDefinition(format!("Failed to serialize: {}", e)))
}

/// Structural check of a parsed definition, returning the first problem found
pub fn check_definition(definition: &WorkflowDefinition) -> Result<(), String> {
    if definition.name.trim().is_empty() {
        return Err("workflow name is empty".to_string());
    }

    if definition.steps.is_empty() {
        return Err("workflow has no steps".to_string());
    }

    if definition.start_step_id.trim().is_empty() {
        return Err("startStepId is missing".to_string());
    }

    let mut ids = HashSet::new();
    for step in &definition.steps {
        if !ids.insert(step.id.as_str()) {
            return Err(format!("duplicate step id '{}'", step.id));
        }
    }

    if !ids.contains(definition.start_step_id.as_str()) {
        return Err(format!(
            "start step '{}' is not a declared step",
            definition.start_step_id
        ));
    }

    for transition in &definition.transitions {
        for endpoint in [&transition.from_step_id, &transition.to_step_id] {
            if !ids.contains(endpoint.as_str()) {
                return Err(format!(
                    "transition {} -> {} references unknown step '{}'",
                    transition.from_step_id, transition.to_step_id, endpoint
                ));
            }
        }
    }

    Ok(())
}

/// Predicate form of parse + `check_definition`; never fails
pub fn validate_definition(text: &str) -> bool {
    let definition = match parse_definition(text) {
        Ok(definition) => definition,
        Err(_) => return false,
    };

    match check_definition(&definition) {
        Ok(()) => true,
        Err(reason) => {
            tracing::debug!("🔍 Workflow definition '{}' rejected: {}", definition.name, reason);
            false
        }
    }
}

/// Definition plus a petgraph view used for lookups and diagnostics
///
/// Compiling is tolerant: unresolved transitions are kept in the definition but
/// left out of the graph, so the engine can still detect them at run time.
#[derive(Debug, Clone)]
pub struct CompiledDefinition {
    pub definition: WorkflowDefinition,
    graph: DiGraph<String, usize>,
    node_index: HashMap<String, NodeIndex>,
}

impl CompiledDefinition {
    pub fn compile(definition: WorkflowDefinition) -> Self {
        let mut graph = DiGraph::new();
        let mut node_index = HashMap::new();

        for step in &definition.steps {
            if !node_index.contains_key(&step.id) {
                let idx = graph.add_node(step.id.clone());
                node_index.insert(step.id.clone(), idx);
            }
        }

        for (position, transition) in definition.transitions.iter().enumerate() {
            match (
                node_index.get(&transition.from_step_id),
                node_index.get(&transition.to_step_id),
            ) {
                (Some(&from), Some(&to)) => {
                    graph.add_edge(from, to, position);
                }
                _ => tracing::warn!(
                    "⚠️ Transition {} -> {} in '{}' references an unknown step",
                    transition.from_step_id, transition.to_step_id, definition.name
                ),
            }
        }

        let compiled = Self { definition, graph, node_index };

        let unreachable = compiled.unreachable_steps();
        if !unreachable.is_empty() {
            tracing::warn!(
                "⚠️ Workflow '{}' has steps unreachable from '{}': {:?}",
                compiled.definition.name, compiled.definition.start_step_id, unreachable
            );
        }
        if is_cyclic_directed(&compiled.graph) {
            tracing::debug!("🔁 Workflow '{}' contains loops", compiled.definition.name);
        }

        compiled
    }

    pub fn parse(text: &str) -> Result<Self, WorkflowError> {
        Ok(Self::compile(parse_definition(text)?))
    }

    pub fn step(&self, step_id: &str) -> Option<&StepDefinition> {
        self.definition.steps.iter().find(|s| s.id == step_id)
    }

    pub fn start_step(&self) -> Option<&StepDefinition> {
        self.step(&self.definition.start_step_id)
    }

    /// Transitions leaving `step_id`, in declaration order, resolvable or not
    pub fn outgoing(&self, step_id: &str) -> Vec<&TransitionDefinition> {
        self.definition
            .transitions
            .iter()
            .filter(|t| t.from_step_id == step_id)
            .collect()
    }

    /// Declared steps that cannot be reached from the start step
    pub fn unreachable_steps(&self) -> Vec<String> {
        let Some(&start) = self.node_index.get(&self.definition.start_step_id) else {
            return self.definition.steps.iter().map(|s| s.id.clone()).collect();
        };

        let mut visited = HashSet::new();
        let mut bfs = Bfs::new(&self.graph, start);
        while let Some(node) = bfs.next(&self.graph) {
            visited.insert(node);
        }

        self.graph
            .node_indices()
            .filter(|idx| !visited.contains(idx))
            .map(|idx| self.graph[idx].clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approval_text() -> &'static str {
        r#"{
            "name": "Expense approval",
            "description": "Two stage approval",
            "startStepId": "submit",
            "steps": [
                { "id": "submit", "name": "Submit", "type": "manual", "assignedUser": "alice" },
                { "id": "review", "name": "Review", "type": "approval", "assignedRole": "manager",
                  "properties": { "sla_hours": 24 }, "isRequired": false }
            ],
            "transitions": [
                { "id": "t1", "fromStepId": "submit", "toStepId": "review", "condition": "amount > 100", "action": "approve" }
            ]
        }"#
    }

    #[test]
    fn parses_authoring_format() {
        let definition = parse_definition(approval_text()).unwrap();
        assert_eq!(definition.start_step_id, "submit");
        assert_eq!(definition.steps.len(), 2);
        assert!(definition.steps[0].is_required);
        assert!(!definition.steps[1].is_required);
        assert_eq!(definition.steps[1].assigned_role.as_deref(), Some("manager"));
        assert_eq!(definition.steps[1].properties["sla_hours"], 24);
        assert_eq!(definition.transitions[0].action.as_deref(), Some("approve"));
    }

    #[test]
    fn malformed_text_is_an_error_not_a_panic() {
        assert!(matches!(
            parse_definition("{ not json"),
            Err(WorkflowError::MalformedDefinition(_))
        ));
        assert!(!validate_definition("{ not json"));
    }

    #[test]
    fn serialized_definitions_parse_back_identically() {
        let definition = parse_definition(approval_text()).unwrap();
        let text = serialize_definition(&definition).unwrap();
        assert_eq!(parse_definition(&text).unwrap(), definition);
        assert!(validate_definition(&text));
        assert!(text.contains("startStepId"));
    }

    #[test]
    fn structural_rules() {
        let valid = parse_definition(approval_text()).unwrap();
        assert!(check_definition(&valid).is_ok());

        let mut unnamed = valid.clone();
        unnamed.name = "  ".into();
        assert!(check_definition(&unnamed).is_err());

        let mut empty = valid.clone();
        empty.steps.clear();
        empty.transitions.clear();
        assert!(check_definition(&empty).is_err());

        let mut ghost_start = valid.clone();
        ghost_start.start_step_id = "ghost".into();
        assert!(check_definition(&ghost_start).unwrap_err().contains("ghost"));

        let mut no_start = valid.clone();
        no_start.start_step_id.clear();
        assert!(check_definition(&no_start).is_err());

        let mut duplicated = valid.clone();
        duplicated.steps.push(duplicated.steps[0].clone());
        assert!(check_definition(&duplicated).unwrap_err().contains("duplicate"));

        let mut dangling = valid.clone();
        dangling.transitions[0].to_step_id = "nowhere".into();
        assert!(check_definition(&dangling).unwrap_err().contains("nowhere"));
    }

    #[test]
    fn removing_start_step_or_duplicating_ids_fails_validation_after_round_trip() {
        let mut definition = parse_definition(approval_text()).unwrap();
        definition.steps.retain(|s| s.id != "submit");
        definition.transitions.clear();
        assert!(!validate_definition(&serialize_definition(&definition).unwrap()));

        let mut definition = parse_definition(approval_text()).unwrap();
        definition.steps[1].id = "submit".into();
        assert!(!validate_definition(&serialize_definition(&definition).unwrap()));
    }

    #[test]
    fn compiled_definition_lookups() {
        let compiled = CompiledDefinition::parse(approval_text()).unwrap();
        assert_eq!(compiled.start_step().unwrap().name, "Submit");
        assert_eq!(compiled.outgoing("submit").len(), 1);
        assert!(compiled.outgoing("review").is_empty());
        assert!(compiled.unreachable_steps().is_empty());
        assert!(compiled.outgoing("submit")[0].is_satisfied());
    }

    #[test]
    fn unreachable_steps_are_reported() {
        let mut definition = parse_definition(approval_text()).unwrap();
        definition.steps.push(StepDefinition {
            id: "orphan".into(),
            name: "Orphan".into(),
            step_type: "manual".into(),
            assigned_role: None,
            assigned_user: None,
            properties: Map::new(),
            is_required: true,
        });
        let compiled = CompiledDefinition::compile(definition);
        assert_eq!(compiled.unreachable_steps(), vec!["orphan".to_string()]);
    }

    #[test]
    fn compile_tolerates_missing_start_step() {
        let mut definition = parse_definition(approval_text()).unwrap();
        definition.start_step_id = "ghost".into();
        let compiled = CompiledDefinition::compile(definition);
        assert!(compiled.start_step().is_none());
    }
}
