use std::sync::OnceLock;

use amx_core::{
    DictionaryProvider, MessageStructure, NativeType, ParameterSource, PathSegment,
    UtilityHandle, UtilityRegistry, ValueExpression,
};
use regex::Regex;
use tracing::trace;

use crate::alerts::{AlertCollector, AlertContext};
use crate::scan::matching_close;

/// Binding the runtime supplies for utility calls.
pub const UTILITY_MANAGER: &str = "um";

/// What a referenced row (or static) produces once it is generated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProducedValue {
    Message {
        dictionary: Option<String>,
        message_type: Option<String>,
    },
    Native(NativeType),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowLookup {
    Unknown,
    NotYetDefined,
    InProgress,
    /// Generation was abandoned, e.g. the row sits on a reference cycle.
    Failed,
    Ready(ProducedValue),
}

/// Names visible to one row: the test case references and the matrix statics.
pub trait ReferenceScope {
    fn lookup_row(&self, reference: &str) -> RowLookup;

    fn lookup_static(&self, name: &str) -> RowLookup;

    fn block_reference(&self) -> Option<&str> {
        None
    }
}

/// Dictionary and action of the row being compiled, for utility lookup.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveTarget<'a> {
    pub dictionary: Option<&'a str>,
    pub action: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Resolution {
    Resolved,
    Failed,
    Recursion,
}

impl Resolution {
    fn merge(self, other: Resolution) -> Resolution {
        self.max(other)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Field,
    Static,
    Function,
}

impl TokenKind {
    fn opener(&self) -> &'static str {
        match self {
            Self::Field => "${",
            Self::Static => "%{",
            Self::Function => "#{",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PathCheck {
    Checked,
    Unchecked,
}

pub struct ExpressionResolver<'a> {
    dictionaries: &'a dyn DictionaryProvider,
    utilities: &'a dyn UtilityRegistry,
}

impl<'a> ExpressionResolver<'a> {
    pub fn new(dictionaries: &'a dyn DictionaryProvider, utilities: &'a dyn UtilityRegistry) -> Self {
        Self {
            dictionaries,
            utilities,
        }
    }

    /// Rewrites every `${...}`, `%{...}` and `#{...}` token of the expression
    /// in place. A second call on the same expression does nothing.
    pub fn resolve(
        &self,
        expression: &mut ValueExpression,
        target: &ResolveTarget<'_>,
        scope: &dyn ReferenceScope,
        context: &AlertContext,
        alerts: &mut AlertCollector,
    ) -> Resolution {
        if expression.resolved {
            return if expression.failed {
                Resolution::Failed
            } else {
                Resolution::Resolved
            };
        }

        let mut outcome = Resolution::Resolved;
        for kind in [TokenKind::Field, TokenKind::Static, TokenKind::Function] {
            outcome = outcome.merge(self.resolve_tokens(
                kind, expression, target, scope, context, alerts,
            ));
            if outcome == Resolution::Recursion {
                break;
            }
        }

        expression.resolved = true;
        expression.failed = outcome != Resolution::Resolved;
        trace!(
            original = %expression.original,
            rewritten = %expression.rewritten,
            parameters = expression.parameters.len(),
            ?outcome,
            "expression resolved"
        );
        outcome
    }

    fn resolve_tokens(
        &self,
        kind: TokenKind,
        expression: &mut ValueExpression,
        target: &ResolveTarget<'_>,
        scope: &dyn ReferenceScope,
        context: &AlertContext,
        alerts: &mut AlertCollector,
    ) -> Resolution {
        let opener = kind.opener();
        let mut outcome = Resolution::Resolved;
        let mut cursor = 0usize;

        while let Some(found) = expression.rewritten[cursor..].find(opener) {
            let start = cursor + found;
            let open_brace = start + 1;
            let Some(close) = matching_close(&expression.rewritten, open_brace) else {
                alerts.error(
                    context,
                    format!(
                        "Unbalanced brackets in \"{}\" after \"{}\".",
                        expression.original, opener
                    ),
                );
                return outcome.merge(Resolution::Failed);
            };

            let body = expression.rewritten[open_brace + 1..close].trim().to_string();
            let bound = match kind {
                TokenKind::Field => self.bind_field_reference(&body, expression, scope, context, alerts),
                TokenKind::Static => self.bind_static_reference(&body, expression, scope, context, alerts),
                TokenKind::Function => self.bind_function_call(&body, expression, target, context, alerts),
            };

            match bound {
                Ok(replacement) => {
                    expression
                        .rewritten
                        .replace_range(start..=close, &replacement);
                    expression.is_reference = true;
                    cursor = start + replacement.len();
                }
                Err(Resolution::Recursion) => return Resolution::Recursion,
                Err(step) => {
                    outcome = outcome.merge(step);
                    cursor = close + 1;
                }
            }
        }

        outcome
    }

    fn bind_field_reference(
        &self,
        body: &str,
        expression: &mut ValueExpression,
        scope: &dyn ReferenceScope,
        context: &AlertContext,
        alerts: &mut AlertCollector,
    ) -> Result<String, Resolution> {
        let segments = parse_reference_path(body).map_err(|message| {
            alerts.error(context, message);
            Resolution::Failed
        })?;

        // `${block:row:field}` addresses a row through its enclosing block.
        let block_hop = segments.len() > 1
            && scope.block_reference() == Some(segments[0].name.as_str())
            && scope.lookup_row(&segments[0].name) == RowLookup::Unknown;
        let (block, head, path) = if block_hop {
            (Some(segments[0].name.clone()), &segments[1], &segments[2..])
        } else {
            (None, &segments[0], &segments[1..])
        };
        if head.index.is_some() {
            alerts.error(
                context,
                format!("Reference \"{}\" cannot be indexed.", head.name),
            );
            return Err(Resolution::Failed);
        }

        let produced = match scope.lookup_row(&head.name) {
            RowLookup::Ready(produced) => produced,
            RowLookup::Unknown => {
                alerts.error(
                    context,
                    format!("Reference \"{}\" is not defined in this test case.", head.name),
                );
                return Err(Resolution::Failed);
            }
            RowLookup::NotYetDefined => {
                alerts.error(
                    context,
                    format!("Reference \"{}\" is not yet defined.", head.name),
                );
                return Err(Resolution::Failed);
            }
            RowLookup::InProgress => {
                alerts.error(
                    context,
                    format!(
                        "Recursion detected: reference \"{}\" is still being generated.",
                        head.name
                    ),
                );
                return Err(Resolution::Recursion);
            }
            RowLookup::Failed => {
                alerts.error(
                    context,
                    format!("Reference \"{}\" could not be generated.", head.name),
                );
                return Err(Resolution::Failed);
            }
        };

        self.check_path(&head.name, &produced, path, expression, context, alerts)?;
        Ok(expression.bind(
            "p",
            ParameterSource::Reference {
                block,
                reference: head.name.clone(),
                path: path.to_vec(),
            },
        ))
    }

    fn bind_static_reference(
        &self,
        body: &str,
        expression: &mut ValueExpression,
        scope: &dyn ReferenceScope,
        context: &AlertContext,
        alerts: &mut AlertCollector,
    ) -> Result<String, Resolution> {
        let segments = parse_reference_path(body).map_err(|message| {
            alerts.error(context, message);
            Resolution::Failed
        })?;
        let (head, path) = (&segments[0], &segments[1..]);
        if head.index.is_some() {
            alerts.error(
                context,
                format!("Static reference \"{}\" cannot be indexed.", head.name),
            );
            return Err(Resolution::Failed);
        }

        let produced = match scope.lookup_static(&head.name) {
            RowLookup::Ready(produced) => produced,
            RowLookup::Unknown => {
                alerts.error(
                    context,
                    format!("Static reference \"{}\" is not defined in this matrix.", head.name),
                );
                return Err(Resolution::Failed);
            }
            RowLookup::NotYetDefined => {
                alerts.error(
                    context,
                    format!("Static reference \"{}\" is not yet defined.", head.name),
                );
                return Err(Resolution::Failed);
            }
            RowLookup::InProgress => {
                alerts.error(
                    context,
                    format!(
                        "Recursion detected: static \"{}\" is still being generated.",
                        head.name
                    ),
                );
                return Err(Resolution::Recursion);
            }
            RowLookup::Failed => {
                alerts.error(
                    context,
                    format!("Static reference \"{}\" could not be generated.", head.name),
                );
                return Err(Resolution::Failed);
            }
        };

        self.check_path(&head.name, &produced, path, expression, context, alerts)?;
        Ok(expression.bind(
            "s",
            ParameterSource::Static {
                name: head.name.clone(),
                path: path.to_vec(),
            },
        ))
    }

    fn bind_function_call(
        &self,
        body: &str,
        expression: &mut ValueExpression,
        target: &ResolveTarget<'_>,
        context: &AlertContext,
        alerts: &mut AlertCollector,
    ) -> Result<String, Resolution> {
        let malformed = |alerts: &mut AlertCollector| {
            alerts.error(
                context,
                format!("Function call \"#{{{}}}\" must have the form name(arguments).", body),
            );
            Resolution::Failed
        };

        let Some(open) = body.find('(') else {
            return Err(malformed(alerts));
        };
        let name = body[..open].trim();
        if !function_name_regex().is_match(name) || matching_close(body, open) != Some(body.len() - 1) {
            return Err(malformed(alerts));
        }
        let arguments = body[open + 1..body.len() - 1].trim();

        let Some(handle) = self.resolve_utility(name, target) else {
            alerts.error(
                context,
                format!("Unresolved utility function \"{}\".", name),
            );
            return Err(Resolution::Failed);
        };

        let bound = expression.bind("f", ParameterSource::Utility { uri: handle.uri });
        expression.is_raw_code = true;
        Ok(if arguments.is_empty() {
            format!("{}({})", bound, UTILITY_MANAGER)
        } else {
            format!("{}({}, {})", bound, UTILITY_MANAGER, arguments)
        })
    }

    /// Qualified uri, then dictionary-local, then action, then global utilities.
    pub fn resolve_utility(&self, name: &str, target: &ResolveTarget<'_>) -> Option<UtilityHandle> {
        if name.contains(':') || name.contains('.') {
            return self.utilities.qualified_utility(name);
        }
        if let Some(uri) = target
            .dictionary
            .and_then(|dictionary| self.dictionaries.dictionary(dictionary))
            .and_then(|dictionary| dictionary.utility(name))
        {
            return Some(UtilityHandle {
                name: name.to_string(),
                uri: uri.to_string(),
            });
        }
        if let Some(handle) = target
            .action
            .and_then(|action| self.utilities.action_utility(action, name))
        {
            return Some(handle);
        }
        self.utilities.global_utility(name)
    }

    fn check_path(
        &self,
        owner: &str,
        produced: &ProducedValue,
        path: &[PathSegment],
        expression: &mut ValueExpression,
        context: &AlertContext,
        alerts: &mut AlertCollector,
    ) -> Result<(), Resolution> {
        match self.validate_path(owner, produced, path) {
            Ok(PathCheck::Checked) => Ok(()),
            Ok(PathCheck::Unchecked) => {
                expression.needs_runtime_check = true;
                alerts.warning(
                    context,
                    format!(
                        "Structure of \"{}\" is unknown; path \"{}\" is checked at runtime.",
                        owner,
                        render_path(path)
                    ),
                );
                Ok(())
            }
            Err(message) => {
                alerts.error(context, message);
                Err(Resolution::Failed)
            }
        }
    }

    fn validate_path(
        &self,
        owner: &str,
        produced: &ProducedValue,
        path: &[PathSegment],
    ) -> Result<PathCheck, String> {
        if path.is_empty() {
            return Ok(PathCheck::Checked);
        }

        let (dictionary_name, message_name) = match produced {
            ProducedValue::Native(native) => {
                return Err(format!(
                    "\"{}\" is a simple {} value and has no field \"{}\".",
                    owner, native, path[0]
                ))
            }
            ProducedValue::Message {
                dictionary: Some(dictionary),
                message_type: Some(message_type),
            } => (dictionary.as_str(), message_type.as_str()),
            ProducedValue::Message { .. } => return Ok(PathCheck::Unchecked),
        };
        let Some(dictionary) = self.dictionaries.dictionary(dictionary_name) else {
            return Ok(PathCheck::Unchecked);
        };
        let Some(mut message) = dictionary.message(message_name) else {
            return Ok(PathCheck::Unchecked);
        };

        for (position, segment) in path.iter().enumerate() {
            let field = lookup_field(message, segment)?;
            let Some(next) = path.get(position + 1) else {
                break;
            };
            let Some(target) = field.complex_message() else {
                return Err(format!(
                    "Field \"{}\" of message \"{}\" is a simple field; cannot access \"{}\".",
                    field.name, message.name, next
                ));
            };
            if field.is_collection && segment.index.is_none() {
                return Err(format!(
                    "Field \"{}\" of message \"{}\" is a collection; an index is required to access \"{}\".",
                    field.name, message.name, next
                ));
            }
            let Some(child) = dictionary.message(target) else {
                return Ok(PathCheck::Unchecked);
            };
            message = child;
        }

        Ok(PathCheck::Checked)
    }
}

fn lookup_field<'m>(
    message: &'m MessageStructure,
    segment: &PathSegment,
) -> Result<&'m amx_core::FieldStructure, String> {
    let Some(field) = message.field(&segment.name) else {
        return Err(format!(
            "Field \"{}\" is not defined in message \"{}\".",
            segment.name, message.name
        ));
    };
    if segment.index.is_some() && !field.is_collection {
        return Err(format!(
            "Field \"{}\" of message \"{}\" is not a collection and cannot be indexed.",
            field.name, message.name
        ));
    }
    Ok(field)
}

fn parse_reference_path(body: &str) -> Result<Vec<PathSegment>, String> {
    if body.is_empty() {
        return Err("Empty reference \"${}\".".to_string());
    }
    body.split(':')
        .map(|raw| {
            let raw = raw.trim();
            let captures = segment_regex()
                .captures(raw)
                .ok_or_else(|| format!("Malformed reference segment \"{}\" in \"{}\".", raw, body))?;
            let index = match captures.get(2) {
                Some(index) => Some(
                    index
                        .as_str()
                        .parse::<usize>()
                        .map_err(|error| format!("Invalid index in \"{}\": {}", raw, error))?,
                ),
                None => None,
            };
            Ok(PathSegment {
                name: captures[1].to_string(),
                index,
            })
        })
        .collect()
}

fn render_path(path: &[PathSegment]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(":")
}

fn segment_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^([A-Za-z_][A-Za-z0-9_\-]*)(?:\[(\d+)\])?$").expect("segment regex")
    })
}

fn function_name_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.:]*$").expect("function name regex"))
}

#[cfg(test)]
mod resolver_tests {
    use super::*;
    use crate::test_support::*;
    use amx_core::{Severity, SourceLocation};

    fn resolve(text: &str, scope: &MapScope) -> (ValueExpression, Resolution, AlertCollector) {
        let dictionaries = dictionaries();
        let registry = registry();
        let resolver = ExpressionResolver::new(&dictionaries, &registry);
        let mut alerts = AlertCollector::default();
        let mut expression = ValueExpression::new(text, SourceLocation::default());
        let outcome = resolver.resolve(
            &mut expression,
            &ResolveTarget {
                dictionary: Some("FIX"),
                action: Some("FIX:Client.SendOrder"),
            },
            scope,
            &AlertContext::at_line(3),
            &mut alerts,
        );
        (expression, outcome, alerts)
    }

    #[test]
    fn literal_text_passes_through_unchanged() {
        let (expression, outcome, alerts) = resolve("plain 5", &MapScope::default());
        assert_eq!(outcome, Resolution::Resolved);
        assert_eq!(expression.rewritten, "plain 5");
        assert!(!expression.is_reference);
        assert!(expression.parameters.is_empty());
        assert!(alerts.is_empty());
    }

    #[test]
    fn field_reference_binds_parameter_and_validates_path() {
        let scope = MapScope::default().with_row("order", order_produced());
        let (expression, outcome, alerts) = resolve("${order:Legs[0]:Price} * 2", &scope);
        assert_eq!(outcome, Resolution::Resolved);
        assert_eq!(expression.rewritten, "p0 * 2");
        assert!(expression.is_reference);
        assert_eq!(expression.parameters.len(), 1);
        match &expression.parameters[0].source {
            ParameterSource::Reference { reference, path, .. } => {
                assert_eq!(reference, "order");
                assert_eq!(path.len(), 2);
                assert_eq!(path[0].index, Some(0));
            }
            other => panic!("unexpected parameter source {:?}", other),
        }
        assert!(alerts.is_empty());
    }

    #[test]
    fn repeated_reference_shares_one_parameter() {
        let scope = MapScope::default().with_row("order", order_produced());
        let (expression, _, _) = resolve("${order:Price} + ${order:Price}", &scope);
        assert_eq!(expression.rewritten, "p0 + p0");
        assert_eq!(expression.parameters.len(), 1);
    }

    #[test]
    fn path_errors_cover_kind_mismatches() {
        let scope = MapScope::default().with_row("order", order_produced());
        let cases = [
            ("${order:Missing}", "is not defined in message"),
            ("${order:Price[1]}", "is not a collection"),
            ("${order:Price:Scale}", "is a simple field"),
            ("${order:Legs:Price}", "an index is required"),
        ];
        for (text, expected) in cases {
            let (_, outcome, alerts) = resolve(text, &scope);
            assert_eq!(outcome, Resolution::Failed, "{}", text);
            let message = &alerts.iter().next().expect("alert").message;
            assert!(message.contains(expected), "{}: {}", text, message);
        }
    }

    #[test]
    fn pending_and_unknown_rows_are_errors() {
        let scope = MapScope::default()
            .with_lookup("later", RowLookup::NotYetDefined)
            .with_lookup("self", RowLookup::InProgress);

        let (expression, outcome, alerts) = resolve("${later}", &scope);
        assert_eq!(outcome, Resolution::Failed);
        assert_eq!(alerts.error_count(), 1);
        assert!(alerts.iter().next().expect("alert").message.contains("not yet defined"));
        assert!(expression.parameters.is_empty());

        let (_, outcome, alerts) = resolve("${self:Price}", &scope);
        assert_eq!(outcome, Resolution::Recursion);
        assert!(alerts.iter().next().expect("alert").message.starts_with("Recursion detected"));

        let (_, outcome, _) = resolve("${ghost}", &scope);
        assert_eq!(outcome, Resolution::Failed);
    }

    #[test]
    fn unknown_structure_is_a_runtime_check_warning() {
        let scope = MapScope::default().with_row(
            "raw",
            ProducedValue::Message {
                dictionary: None,
                message_type: None,
            },
        );
        let (expression, outcome, alerts) = resolve("${raw:Anything}", &scope);
        assert_eq!(outcome, Resolution::Resolved);
        assert!(expression.needs_runtime_check);
        assert_eq!(alerts.count(Severity::Warning), 1);
        assert!(!alerts.has_errors());
    }

    #[test]
    fn static_references_resolve_against_matrix_table() {
        let scope = MapScope::default()
            .with_static("account", ProducedValue::Native(NativeType::String))
            .with_static_lookup("later", RowLookup::NotYetDefined);
        let (expression, outcome, _) = resolve("%{account}", &scope);
        assert_eq!(outcome, Resolution::Resolved);
        assert_eq!(expression.rewritten, "s0");

        let (_, outcome, alerts) = resolve("%{account:Field}", &scope);
        assert_eq!(outcome, Resolution::Failed);
        assert!(alerts.iter().next().expect("alert").message.contains("simple string value"));

        let (_, outcome, _) = resolve("%{later}", &scope);
        assert_eq!(outcome, Resolution::Failed);
    }

    #[test]
    fn function_calls_resolve_in_lookup_order() {
        let scope = MapScope::default().with_row("order", order_produced());

        let (dictionary_local, _, _) = resolve("#{FormatPrice(${order:Price})}", &scope);
        assert_eq!(dictionary_local.rewritten, "f1(um, p0)");
        assert_eq!(
            dictionary_local.parameters[1].source,
            ParameterSource::Utility {
                uri: "FIX:Utils.FormatPrice".to_string()
            }
        );
        assert!(dictionary_local.is_raw_code);

        let (action_local, _, _) = resolve("#{NextId()}", &scope);
        assert_eq!(action_local.rewritten, "f0(um)");
        assert_eq!(
            action_local.parameters[0].source,
            ParameterSource::Utility {
                uri: "FIX:Client.NextId".to_string()
            }
        );

        let (global, _, _) = resolve("#{Now(\"a)\", 1)}", &scope);
        assert_eq!(global.rewritten, "f0(um, \"a)\", 1)");

        let (qualified, outcome, _) = resolve("#{General:Time.Now()}", &scope);
        assert_eq!(outcome, Resolution::Resolved);
        assert_eq!(qualified.rewritten, "f0(um)");
    }

    #[test]
    fn malformed_tokens_are_isolated() {
        let scope = MapScope::default().with_row("order", order_produced());
        let (_, outcome, alerts) = resolve("${order", &scope);
        assert_eq!(outcome, Resolution::Failed);
        assert!(alerts.iter().next().expect("alert").message.contains("Unbalanced"));

        let (expression, outcome, alerts) = resolve("#{Missing()} + ${order:Price}", &scope);
        assert_eq!(outcome, Resolution::Failed);
        assert_eq!(alerts.error_count(), 1);
        assert_eq!(expression.rewritten, "#{Missing()} + p0");

        let (_, outcome, _) = resolve("#{noparens}", &scope);
        assert_eq!(outcome, Resolution::Failed);
    }

    #[test]
    fn block_prefix_addresses_rows_of_the_enclosing_block() {
        let scope = MapScope::default()
            .with_row("order", order_produced())
            .with_block("blk");
        let (expression, outcome, _) = resolve("${blk:order:Price}", &scope);
        assert_eq!(outcome, Resolution::Resolved);
        match &expression.parameters[0].source {
            ParameterSource::Reference { block, reference, .. } => {
                assert_eq!(block.as_deref(), Some("blk"));
                assert_eq!(reference, "order");
            }
            other => panic!("unexpected parameter source {:?}", other),
        }
    }

    #[test]
    fn second_resolution_is_a_no_op() {
        let dictionaries = dictionaries();
        let registry = registry();
        let resolver = ExpressionResolver::new(&dictionaries, &registry);
        let scope = MapScope::default().with_lookup("later", RowLookup::NotYetDefined);
        let mut alerts = AlertCollector::new(false);
        let mut expression = ValueExpression::new("${later} + 1", SourceLocation::default());
        let target = ResolveTarget::default();
        let context = AlertContext::at_line(1);

        let first = resolver.resolve(&mut expression, &target, &scope, &context, &mut alerts);
        let second = resolver.resolve(&mut expression, &target, &scope, &context, &mut alerts);
        assert_eq!(first, Resolution::Failed);
        assert_eq!(second, Resolution::Failed);
        assert_eq!(alerts.len(), 1);

        let scope = MapScope::default().with_row("order", order_produced());
        let mut expression = ValueExpression::new("${order:Price}", SourceLocation::default());
        resolver.resolve(&mut expression, &target, &scope, &context, &mut alerts);
        resolver.resolve(&mut expression, &target, &scope, &context, &mut alerts);
        assert_eq!(expression.parameters.len(), 1);
    }
}
