use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpan {
    pub start: SourceLocation,
    pub end: SourceLocation,
}

impl SourceSpan {
    pub fn synthetic() -> Self {
        Self::at(SourceLocation { line: 1, column: 1 })
    }

    pub fn at(location: SourceLocation) -> Self {
        Self {
            start: location,
            end: location,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Matrix {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestCaseKind {
    #[default]
    TestCase,
    Before,
    After,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub kind: TestCaseKind,
    /// Position among the matrix test cases; assigned by the loader when absent.
    #[serde(default)]
    pub matrix_order: usize,
    #[serde(default)]
    pub execution_order: usize,
    #[serde(default = "default_add_to_report")]
    pub add_to_report: bool,
    /// Name under which rows of this block are additionally registered.
    #[serde(default)]
    pub block_reference: Option<String>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

fn default_add_to_report() -> bool {
    true
}

/// One matrix row.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Action {
    pub line: usize,
    pub id: Option<String>,
    pub action: Option<String>,
    pub reference: Option<String>,
    pub reference_to_filter: Option<String>,
    pub service_name: Option<String>,
    pub dictionary: Option<String>,
    pub message_type: Option<String>,
    pub dependencies: Option<String>,
    pub fail_unexpected: Option<String>,
    pub key_fields: Option<String>,
    pub precision: IndexMap<String, String>,
    pub custom: IndexMap<String, String>,
    pub condition: Option<String>,
    pub count: Option<String>,
    pub static_type: Option<String>,
    pub static_value: Option<String>,
    pub continue_on_failure: Option<bool>,
    pub fields: IndexMap<String, String>,
}

impl Action {
    pub fn control_kind(&self) -> Option<ControlKind> {
        self.action.as_deref().and_then(ControlKind::from_action_name)
    }

    pub fn operation(&self) -> Option<&str> {
        match self.action.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() && self.control_kind().is_none() => Some(name),
            _ => None,
        }
    }

    pub fn is_message_only(&self) -> bool {
        self.action
            .as_deref()
            .map(|name| name.trim().is_empty())
            .unwrap_or(true)
    }

    pub fn dependency_names(&self) -> Vec<String> {
        split_list(self.dependencies.as_deref())
    }

    pub fn key_field_names(&self) -> Vec<String> {
        split_list(self.key_fields.as_deref())
    }

    pub fn reference_name(&self) -> Option<&str> {
        non_empty(self.reference.as_deref())
    }

    pub fn reference_to_filter_name(&self) -> Option<&str> {
        non_empty(self.reference_to_filter.as_deref())
    }

    pub fn location(&self) -> SourceLocation {
        SourceLocation {
            line: self.line,
            column: 0,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlKind {
    BeginLoop,
    EndLoop,
    BeginIf,
    ElseIf,
    Else,
    EndIf,
    DefineStatic,
}

impl ControlKind {
    pub fn from_action_name(name: &str) -> Option<Self> {
        let normalized = name
            .chars()
            .filter(|ch| !ch.is_whitespace() && *ch != '_' && *ch != '-')
            .flat_map(char::to_lowercase)
            .collect::<String>();
        match normalized.as_str() {
            "beginloop" => Some(Self::BeginLoop),
            "endloop" => Some(Self::EndLoop),
            "beginif" => Some(Self::BeginIf),
            "elseif" | "elif" => Some(Self::ElseIf),
            "else" => Some(Self::Else),
            "endif" => Some(Self::EndIf),
            "definestatic" => Some(Self::DefineStatic),
            _ => None,
        }
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            Self::BeginLoop => "begin loop",
            Self::EndLoop => "end loop",
            Self::BeginIf => "begin if",
            Self::ElseIf => "else if",
            Self::Else => "else",
            Self::EndIf => "end if",
            Self::DefineStatic => "define static",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    #[default]
    NotStarted,
    InProgress,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailUnexpected {
    #[default]
    None,
    TagsOnly,
    TagsAndGroups,
}

impl FailUnexpected {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "n" | "no" | "none" => Some(Self::None),
            "y" | "yes" | "tags" | "tags_only" => Some(Self::TagsOnly),
            "a" | "all" | "tags_and_groups" => Some(Self::TagsAndGroups),
            _ => None,
        }
    }
}

/// One segment of a `${row:field[index]:...}` path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSegment {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "{}[{}]", self.name, index),
            None => write!(f, "{}", self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParameterSource {
    Reference {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        block: Option<String>,
        reference: String,
        path: Vec<PathSegment>,
    },
    Static {
        name: String,
        path: Vec<PathSegment>,
    },
    Utility {
        uri: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub source: ParameterSource,
}

/// Cell text plus everything reference resolution learned about it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ValueExpression {
    pub original: String,
    pub rewritten: String,
    pub is_raw_code: bool,
    pub is_reference: bool,
    pub needs_runtime_check: bool,
    pub parameters: Vec<Parameter>,
    pub location: SourceLocation,
    #[serde(skip)]
    pub resolved: bool,
    #[serde(skip)]
    pub failed: bool,
}

impl ValueExpression {
    pub fn new(text: impl Into<String>, location: SourceLocation) -> Self {
        let original = text.into();
        Self {
            rewritten: original.clone(),
            original,
            location,
            ..Self::default()
        }
    }

    pub fn text(&self) -> &str {
        self.rewritten.trim()
    }

    /// Returns the bound name of an existing parameter with the same source.
    pub fn bind(&mut self, prefix: &str, source: ParameterSource) -> String {
        if let Some(existing) = self
            .parameters
            .iter()
            .find(|parameter| parameter.source == source)
        {
            return existing.name.clone();
        }
        let name = format!("{}{}", prefix, self.parameters.len());
        self.parameters.push(Parameter {
            name: name.clone(),
            source,
        });
        name
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => f.write_str("ERROR"),
            Self::Warning => f.write_str("WARNING"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub severity: Severity,
    pub line: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_case: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    pub message: String,
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} line {}", self.severity, self.line)?;
        if let Some(reference) = &self.reference {
            write!(f, " [{}]", reference)?;
        }
        if let Some(column) = &self.column {
            write!(f, " column '{}'", column)?;
        }
        write!(f, ": {}", self.message)
    }
}

#[cfg(test)]
mod types_tests {
    use super::*;

    #[test]
    fn control_keywords_ignore_case_and_spacing() {
        assert_eq!(ControlKind::from_action_name("Begin Loop"), Some(ControlKind::BeginLoop));
        assert_eq!(ControlKind::from_action_name("end_if"), Some(ControlKind::EndIf));
        assert_eq!(ControlKind::from_action_name("ELIF"), Some(ControlKind::ElseIf));
        assert_eq!(
            ControlKind::from_action_name("define-static"),
            Some(ControlKind::DefineStatic)
        );
        assert_eq!(ControlKind::from_action_name("SendMessage"), None);
    }

    #[test]
    fn action_classifies_operation_control_and_message_rows() {
        let send = Action {
            action: Some("send".to_string()),
            ..Action::default()
        };
        assert_eq!(send.operation(), Some("send"));
        assert!(!send.is_message_only());

        let control = Action {
            action: Some("begin if".to_string()),
            ..Action::default()
        };
        assert_eq!(control.operation(), None);
        assert!(!control.is_message_only());

        let message = Action::default();
        assert!(message.is_message_only());
        assert_eq!(message.operation(), None);
    }

    #[test]
    fn list_columns_split_on_commas() {
        let action = Action {
            dependencies: Some(" a, b ,,c".to_string()),
            key_fields: Some("Price".to_string()),
            ..Action::default()
        };
        assert_eq!(action.dependency_names(), vec!["a", "b", "c"]);
        assert_eq!(action.key_field_names(), vec!["Price"]);
    }

    #[test]
    fn fail_unexpected_parses_short_and_long_forms() {
        assert_eq!(FailUnexpected::parse("N"), Some(FailUnexpected::None));
        assert_eq!(FailUnexpected::parse("y"), Some(FailUnexpected::TagsOnly));
        assert_eq!(FailUnexpected::parse("all"), Some(FailUnexpected::TagsAndGroups));
        assert_eq!(FailUnexpected::parse("maybe"), None);
    }

    #[test]
    fn bind_reuses_parameter_for_identical_source() {
        let mut expression = ValueExpression::new("${a} + ${a}", SourceLocation::default());
        let source = ParameterSource::Reference {
            block: None,
            reference: "a".to_string(),
            path: Vec::new(),
        };
        let first = expression.bind("p", source.clone());
        let second = expression.bind("p", source);
        assert_eq!(first, "p0");
        assert_eq!(first, second);
        assert_eq!(expression.parameters.len(), 1);
    }

    #[test]
    fn test_case_defaults_to_reporting() {
        let parsed: TestCase =
            serde_json::from_str(r#"{"actions": []}"#).expect("test case should deserialize");
        assert!(parsed.add_to_report);
        assert_eq!(parsed.kind, TestCaseKind::TestCase);
    }
}
