use std::fmt::Write as _;

use amx_core::{
    ActionNode, CompiledMatrix, Condition, ExpressionNode, FieldNode, FilterNode, LoopCount,
    MatchConfig, MatrixError, MessageNode, ParameterSource, ProgramNode, Registration, ValueNode,
};

/// Turns a compiled matrix into an artifact for a downstream executor.
pub trait Backend {
    fn name(&self) -> &'static str;

    fn render(&self, matrix: &CompiledMatrix) -> Result<String, MatrixError>;
}

pub fn backend_for(name: &str) -> Option<Box<dyn Backend>> {
    match name.trim().to_ascii_lowercase().as_str() {
        "json" => Some(Box::new(JsonBackend)),
        "text" => Some(Box::new(TextBackend::default())),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonBackend;

impl Backend for JsonBackend {
    fn name(&self) -> &'static str {
        "json"
    }

    fn render(&self, matrix: &CompiledMatrix) -> Result<String, MatrixError> {
        serde_json::to_string_pretty(matrix)
            .map_err(|error| MatrixError::new("EMIT_JSON_ERROR", error.to_string()))
    }
}

/// Indented listing, one line per node.
#[derive(Debug, Clone, Copy)]
pub struct TextBackend {
    indent: usize,
}

impl Default for TextBackend {
    fn default() -> Self {
        Self { indent: 2 }
    }
}

impl Backend for TextBackend {
    fn name(&self) -> &'static str {
        "text"
    }

    fn render(&self, matrix: &CompiledMatrix) -> Result<String, MatrixError> {
        let mut out = String::new();
        let name = if matrix.name.is_empty() {
            "<unnamed>"
        } else {
            matrix.name.as_str()
        };
        line(&mut out, 0, &format!("matrix {}", name));
        if !matrix.statics.is_empty() {
            line(&mut out, self.indent, &format!("statics: {}", matrix.statics.join(", ")));
        }
        for test_case in &matrix.test_cases {
            let mut header = format!(
                "{:?} {}",
                test_case.kind,
                test_case.id.as_deref().unwrap_or("<no id>")
            );
            if let Some(block) = &test_case.block_reference {
                let _ = write!(header, " block={}", block);
            }
            if !test_case.add_to_report {
                header.push_str(" (not reported)");
            }
            line(&mut out, self.indent, &header);
            self.nodes(&mut out, 2 * self.indent, &test_case.nodes);
        }
        for alert in &matrix.alerts {
            line(&mut out, 0, &alert.to_string());
        }
        Ok(out)
    }
}

impl TextBackend {
    fn nodes(&self, out: &mut String, depth: usize, nodes: &[ProgramNode]) {
        for node in nodes {
            self.node(out, depth, node);
        }
    }

    fn node(&self, out: &mut String, depth: usize, node: &ProgramNode) {
        let inner = depth + self.indent;
        match node {
            ProgramNode::Action(action) => self.action(out, depth, action),
            ProgramNode::Message(row) => {
                line(
                    out,
                    depth,
                    &format!(
                        "{:>4}: message{}",
                        row.line,
                        registrations(&row.registrations)
                    ),
                );
                self.message(out, inner, &row.message);
            }
            ProgramNode::Guard { line: at, requires, body } => {
                line(out, depth, &format!("{:>4}: requires {}", at, requires.join(", ")));
                self.node(out, inner, body);
            }
            ProgramNode::Loop { line: at, count, body } => {
                let count = match count {
                    LoopCount::Fixed { count } => count.to_string(),
                    LoopCount::Expression { expr } => expression(expr),
                };
                line(out, depth, &format!("{:>4}: loop {}", at, count));
                self.nodes(out, inner, body);
            }
            ProgramNode::Conditional {
                branches,
                otherwise,
                on_failure,
                ..
            } => {
                for (position, branch) in branches.iter().enumerate() {
                    let keyword = if position == 0 { "if" } else { "else if" };
                    let condition = match &branch.condition {
                        Condition::Constant { value } => value.to_string(),
                        Condition::Expression { expr } => expression(expr),
                    };
                    let policy = if position == 0 {
                        format!(" on failure {:?}", on_failure)
                    } else {
                        String::new()
                    };
                    line(
                        out,
                        depth,
                        &format!("{:>4}: {} {}{}", branch.line, keyword, condition, policy),
                    );
                    self.nodes(out, inner, &branch.body);
                }
                if let Some(otherwise) = otherwise {
                    line(out, depth, "      else");
                    self.nodes(out, inner, otherwise);
                }
            }
            ProgramNode::StaticAssign { line: at, name, value } => {
                line(out, depth, &format!("{:>4}: static {} = {}", at, name, value_text(value)));
            }
        }
    }

    fn action(&self, out: &mut String, depth: usize, action: &ActionNode) {
        let mut head = format!(
            "{:>4}: {} ({:?})",
            action.line, action.display_name, action.direction
        );
        if let Some(service) = &action.service_name {
            let _ = write!(head, " via {}", value_text(service));
        }
        head.push_str(&registrations(&action.registrations));
        line(out, depth, &head);

        let inner = depth + self.indent;
        if let Some(message) = &action.message {
            self.message(out, inner, message);
        }
        if let Some(config) = &action.match_config {
            self.match_config(out, inner, "match", config);
        }
    }

    fn message(&self, out: &mut String, depth: usize, message: &MessageNode) {
        if let Some(message_type) = &message.message_type {
            let dictionary = message.dictionary.as_deref().unwrap_or("?");
            line(out, depth, &format!("{}:{}", dictionary, message_type));
        }
        for (name, field) in &message.fields {
            let text = match field {
                FieldNode::Value(value) => format!("{} = {}", name, value_text(value)),
                FieldNode::Filter(filter) => format!("{} ~ {}", name, filter_text(filter)),
            };
            line(out, depth + self.indent, &text);
        }
    }

    fn match_config(&self, out: &mut String, depth: usize, label: &str, config: &MatchConfig) {
        let mut text = label.to_string();
        if let Some(policy) = config.fail_unexpected {
            let _ = write!(text, " fail_unexpected={:?}", policy);
        }
        if !config.key_fields.is_empty() {
            let _ = write!(text, " keys=[{}]", config.key_fields.join(", "));
        }
        for (field, tolerance) in &config.precision {
            let _ = write!(text, " {}\u{b1}{}", field, tolerance);
        }
        line(out, depth, &text);
        for child in &config.children {
            self.match_config(out, depth + self.indent, &child.path, &child.config);
        }
    }
}

fn line(out: &mut String, depth: usize, text: &str) {
    let _ = writeln!(out, "{:depth$}{}", "", text, depth = depth);
}

fn registrations(registrations: &[Registration]) -> String {
    if registrations.is_empty() {
        return String::new();
    }
    let names = registrations
        .iter()
        .map(|registration| match registration {
            Registration::TestCase { name } => name.clone(),
            Registration::Block { block, name } => format!("{}:{}", block, name),
            Registration::Static { name } => format!("%{}", name),
        })
        .collect::<Vec<_>>();
    format!(" -> {}", names.join(", "))
}

fn expression(expr: &ExpressionNode) -> String {
    let mut text = format!("`{}`", expr.source);
    if let Some(cast) = expr.cast {
        let _ = write!(text, " as {}", cast);
    }
    if !expr.parameters.is_empty() {
        let bindings = expr
            .parameters
            .iter()
            .map(|parameter| format!("{}={}", parameter.name, parameter_text(&parameter.source)))
            .collect::<Vec<_>>();
        let _ = write!(text, " where {}", bindings.join(", "));
    }
    if expr.needs_runtime_check {
        text.push_str(" (runtime check)");
    }
    text
}

fn parameter_text(source: &ParameterSource) -> String {
    let path_text = |path: &[amx_core::PathSegment]| {
        path.iter()
            .map(|segment| format!(":{}", segment))
            .collect::<String>()
    };
    match source {
        ParameterSource::Reference {
            block,
            reference,
            path,
        } => match block {
            Some(block) => format!("${{{}:{}{}}}", block, reference, path_text(path)),
            None => format!("${{{}{}}}", reference, path_text(path)),
        },
        ParameterSource::Static { name, path } => format!("%{{{}{}}}", name, path_text(path)),
        ParameterSource::Utility { uri } => uri.clone(),
    }
}

fn value_text(value: &ValueNode) -> String {
    match value {
        ValueNode::Literal { value } => value.to_string(),
        ValueNode::Absent => "<absent>".to_string(),
        ValueNode::Expression { expr } => expression(expr),
        ValueNode::List { items } => format!(
            "[{}]",
            items.iter().map(value_text).collect::<Vec<_>>().join(", ")
        ),
        ValueNode::Message { reference, .. } => format!("<{}>", reference),
    }
}

fn filter_text(filter: &FilterNode) -> String {
    match filter {
        FilterNode::NotNull => "present".to_string(),
        FilterNode::IsNull => "absent".to_string(),
        FilterNode::Regex { pattern } => format!("/{}/", pattern),
        FilterNode::Equals { value } => value.to_string(),
        FilterNode::Expression { expr, predicate: true } => format!("where {}", expression(expr)),
        FilterNode::Expression { expr, .. } => expression(expr),
        FilterNode::Collection { items } => format!(
            "[{}]",
            items.iter().map(filter_text).collect::<Vec<_>>().join(", ")
        ),
        FilterNode::Message { reference, .. } => format!("<{}>", reference),
    }
}

#[cfg(test)]
mod backend_tests {
    use super::*;
    use amx_core::{
        CompiledTestCase, Direction, FailUnexpected, Literal, Parameter, PathSegment, TestCaseKind,
    };
    use indexmap::IndexMap;

    fn sample() -> CompiledMatrix {
        let price = ExpressionNode {
            source: "p0 * 2".to_string(),
            parameters: vec![Parameter {
                name: "p0".to_string(),
                source: ParameterSource::Reference {
                    block: None,
                    reference: "o1".to_string(),
                    path: vec![PathSegment {
                        name: "Price".to_string(),
                        index: None,
                    }],
                },
            }],
            cast: None,
            needs_runtime_check: false,
        };
        let action = ActionNode {
            line: 4,
            row_id: None,
            operation: "FIX:Client.ReceiveExecution".to_string(),
            display_name: "Receive execution".to_string(),
            direction: Direction::Receive,
            service_name: None,
            message: Some(MessageNode {
                dictionary: Some("FIX".to_string()),
                message_type: Some("Execution".to_string()),
                direction: Direction::Receive,
                fields: IndexMap::from([
                    (
                        "Price".to_string(),
                        FieldNode::Filter(FilterNode::Expression {
                            expr: price,
                            predicate: false,
                        }),
                    ),
                    ("OrderID".to_string(), FieldNode::Filter(FilterNode::NotNull)),
                ]),
            }),
            match_config: Some(MatchConfig {
                fail_unexpected: Some(FailUnexpected::TagsOnly),
                ..MatchConfig::default()
            }),
            registrations: vec![Registration::TestCase {
                name: "e1".to_string(),
            }],
        };
        CompiledMatrix {
            name: "orders".to_string(),
            test_cases: vec![CompiledTestCase {
                id: Some("tc1".to_string()),
                description: None,
                kind: TestCaseKind::TestCase,
                matrix_order: 0,
                execution_order: 0,
                add_to_report: true,
                block_reference: None,
                nodes: vec![
                    ProgramNode::StaticAssign {
                        line: 2,
                        name: "limit".to_string(),
                        value: ValueNode::Literal {
                            value: Literal::Int(10),
                        },
                    },
                    ProgramNode::Loop {
                        line: 3,
                        count: LoopCount::Fixed { count: 2 },
                        body: vec![ProgramNode::Action(action)],
                    },
                ],
            }],
            statics: vec!["limit".to_string()],
            alerts: Vec::new(),
        }
    }

    #[test]
    fn json_backend_round_trips_the_program() {
        let rendered = JsonBackend.render(&sample()).expect("json should render");
        let parsed: CompiledMatrix = serde_json::from_str(&rendered).expect("json should parse");
        assert_eq!(parsed, sample());
        assert!(rendered.contains("\"node\": \"loop\""));
    }

    #[test]
    fn text_backend_lists_nodes_with_nesting() {
        let rendered = TextBackend::default().render(&sample()).expect("text should render");
        let lines = rendered.lines().collect::<Vec<_>>();
        assert_eq!(lines[0], "matrix orders");
        assert_eq!(lines[1], "  statics: limit");
        assert!(lines.contains(&"       2: static limit = 10"));
        assert!(lines.contains(&"       3: loop 2"));
        assert!(lines
            .iter()
            .any(|line| line.ends_with("4: Receive execution (Receive) -> e1")));
        assert!(lines
            .iter()
            .any(|line| line.trim() == "Price ~ `p0 * 2` where p0=${o1:Price}"));
        assert!(lines.iter().any(|line| line.trim() == "OrderID ~ present"));
        assert!(lines
            .iter()
            .any(|line| line.trim() == "match fail_unexpected=TagsOnly"));
    }

    #[test]
    fn backends_are_selected_by_name() {
        assert_eq!(backend_for("JSON").map(|backend| backend.name()), Some("json"));
        assert_eq!(backend_for("text").map(|backend| backend.name()), Some("text"));
        assert!(backend_for("yaml").is_none());
    }
}
