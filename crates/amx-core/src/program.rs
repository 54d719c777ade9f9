use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::registry::Direction;
use crate::schema::NativeType;
use crate::types::{Alert, FailUnexpected, Parameter, TestCaseKind};
use crate::value::Literal;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CompiledMatrix {
    pub name: String,
    pub test_cases: Vec<CompiledTestCase>,
    /// Static names in definition order.
    pub statics: Vec<String>,
    pub alerts: Vec<Alert>,
}

impl CompiledMatrix {
    pub fn action_count(&self) -> usize {
        fn count(nodes: &[ProgramNode]) -> usize {
            nodes
                .iter()
                .map(|node| match node {
                    ProgramNode::Action(_) => 1,
                    ProgramNode::Guard { body, .. } => count(std::slice::from_ref(body.as_ref())),
                    ProgramNode::Loop { body, .. } => count(body),
                    ProgramNode::Conditional {
                        branches,
                        otherwise,
                        ..
                    } => {
                        branches
                            .iter()
                            .map(|branch| count(&branch.body))
                            .sum::<usize>()
                            + otherwise.as_deref().map(count).unwrap_or(0)
                    }
                    ProgramNode::Message(_) | ProgramNode::StaticAssign { .. } => 0,
                })
                .sum()
        }
        self.test_cases.iter().map(|tc| count(&tc.nodes)).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledTestCase {
    pub id: Option<String>,
    pub description: Option<String>,
    pub kind: TestCaseKind,
    pub matrix_order: usize,
    pub execution_order: usize,
    pub add_to_report: bool,
    pub block_reference: Option<String>,
    pub nodes: Vec<ProgramNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum ProgramNode {
    Action(ActionNode),
    Message(MessageRowNode),
    /// Runs `body` only when every required reference executed; otherwise the
    /// row is reported as failed due to dependencies.
    Guard {
        line: usize,
        requires: Vec<String>,
        body: Box<ProgramNode>,
    },
    Loop {
        line: usize,
        count: LoopCount,
        body: Vec<ProgramNode>,
    },
    Conditional {
        line: usize,
        branches: Vec<ConditionalBranch>,
        otherwise: Option<Vec<ProgramNode>>,
        on_failure: ConditionFailurePolicy,
    },
    StaticAssign {
        line: usize,
        name: String,
        value: ValueNode,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoopCount {
    Fixed { count: u64 },
    Expression { expr: ExpressionNode },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    Constant { value: bool },
    Expression { expr: ExpressionNode },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalBranch {
    pub line: usize,
    pub condition: Condition,
    pub body: Vec<ProgramNode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionFailurePolicy {
    #[default]
    AbortTestCase,
    LogAndContinue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum Registration {
    TestCase { name: String },
    Block { block: String, name: String },
    Static { name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionNode {
    pub line: usize,
    pub row_id: Option<String>,
    pub operation: String,
    pub display_name: String,
    pub direction: Direction,
    pub service_name: Option<ValueNode>,
    pub message: Option<MessageNode>,
    pub match_config: Option<MatchConfig>,
    pub registrations: Vec<Registration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRowNode {
    pub line: usize,
    pub row_id: Option<String>,
    pub message: MessageNode,
    pub registrations: Vec<Registration>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MessageNode {
    pub dictionary: Option<String>,
    pub message_type: Option<String>,
    pub direction: Direction,
    pub fields: IndexMap<String, FieldNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldNode {
    Value(ValueNode),
    Filter(FilterNode),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionNode {
    pub source: String,
    pub parameters: Vec<Parameter>,
    pub cast: Option<NativeType>,
    #[serde(default)]
    pub needs_runtime_check: bool,
}

/// Send-direction value construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValueNode {
    Literal { value: Literal },
    Absent,
    Expression { expr: ExpressionNode },
    List { items: Vec<ValueNode> },
    Message { reference: String, message_type: Option<String> },
}

/// Receive-direction matcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterNode {
    NotNull,
    IsNull,
    Regex { pattern: String },
    Equals { value: Literal },
    /// `predicate` expressions test the match subject `x`; the others compare
    /// the actual value with the expression result.
    Expression { expr: ExpressionNode, predicate: bool },
    Collection { items: Vec<FilterNode> },
    Message { reference: String, message_type: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MatchConfig {
    pub precision: BTreeMap<String, f64>,
    pub fail_unexpected: Option<FailUnexpected>,
    pub key_fields: Vec<String>,
    pub side_values: IndexMap<String, String>,
    pub children: Vec<MatchConfigChild>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchConfigChild {
    pub path: String,
    pub config: MatchConfig,
}

impl MatchConfig {
    /// Copies every precision entry and the fail-unexpected policy the node
    /// does not set itself.
    pub fn inherit_from(&mut self, parent: &MatchConfig) {
        for (field, tolerance) in &parent.precision {
            self.precision.entry(field.clone()).or_insert(*tolerance);
        }
        if self.fail_unexpected.is_none() {
            self.fail_unexpected = parent.fail_unexpected;
        }
    }

    pub fn attach_child(&mut self, path: impl Into<String>, mut child: MatchConfig) -> &MatchConfig {
        child.inherit_from(self);
        self.children.push(MatchConfigChild {
            path: path.into(),
            config: child,
        });
        &self.children[self.children.len() - 1].config
    }

    pub fn child(&self, path: &str) -> Option<&MatchConfig> {
        self.children
            .iter()
            .find(|child| child.path == path)
            .map(|child| &child.config)
    }
}

#[cfg(test)]
mod program_tests {
    use super::*;

    #[test]
    fn attached_child_inherits_missing_settings() {
        let mut parent = MatchConfig {
            precision: BTreeMap::from([("A".to_string(), 0.01)]),
            fail_unexpected: Some(FailUnexpected::TagsOnly),
            ..MatchConfig::default()
        };

        parent.attach_child("plain", MatchConfig::default());
        parent.attach_child(
            "override",
            MatchConfig {
                fail_unexpected: Some(FailUnexpected::None),
                ..MatchConfig::default()
            },
        );

        let plain = parent.child("plain").expect("plain child");
        assert_eq!(plain.precision.get("A"), Some(&0.01));
        assert_eq!(plain.fail_unexpected, Some(FailUnexpected::TagsOnly));

        let overridden = parent.child("override").expect("override child");
        assert_eq!(overridden.precision.get("A"), Some(&0.01));
        assert_eq!(overridden.fail_unexpected, Some(FailUnexpected::None));
    }

    #[test]
    fn parent_changes_after_attach_do_not_leak_into_children() {
        let mut parent = MatchConfig {
            precision: BTreeMap::from([("A".to_string(), 0.01)]),
            ..MatchConfig::default()
        };
        parent.attach_child("leg", MatchConfig::default());
        parent.precision.insert("A".to_string(), 5.0);
        parent.precision.insert("B".to_string(), 1.0);
        parent.fail_unexpected = Some(FailUnexpected::TagsAndGroups);

        let leg = parent.child("leg").expect("leg");
        assert_eq!(leg.precision.get("A"), Some(&0.01));
        assert!(!leg.precision.contains_key("B"));
        assert_eq!(leg.fail_unexpected, None);
    }

    #[test]
    fn action_count_walks_nested_scopes() {
        let action = ProgramNode::Action(ActionNode {
            line: 1,
            row_id: None,
            operation: "send".to_string(),
            display_name: "send".to_string(),
            direction: Direction::Send,
            service_name: None,
            message: None,
            match_config: None,
            registrations: Vec::new(),
        });
        let matrix = CompiledMatrix {
            test_cases: vec![CompiledTestCase {
                id: None,
                description: None,
                kind: TestCaseKind::TestCase,
                matrix_order: 0,
                execution_order: 0,
                add_to_report: true,
                block_reference: None,
                nodes: vec![
                    action.clone(),
                    ProgramNode::Loop {
                        line: 2,
                        count: LoopCount::Fixed { count: 2 },
                        body: vec![ProgramNode::Guard {
                            line: 3,
                            requires: vec!["a".to_string()],
                            body: Box::new(action),
                        }],
                    },
                ],
            }],
            ..CompiledMatrix::default()
        };
        assert_eq!(matrix.action_count(), 2);
    }
}
