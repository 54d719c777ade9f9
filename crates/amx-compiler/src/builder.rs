use std::sync::OnceLock;

use amx_core::{
    Direction, EnumStructure, ExpressionNode, FieldNode, FieldStructure, FilterNode, Literal,
    NativeType, Parameter, ValueExpression, ValueNode,
};
use regex::Regex;

use crate::alerts::{AlertCollector, AlertContext};
use crate::scan::{bracketed_inner, list_items, mentions_root_token, replace_bounded};

/// Identifier a receive-side predicate uses for the actual field value.
pub const MATCH_SUBJECT: &str = "x";

const PRESENT: &str = "*";
const ABSENT: &str = "#";

/// The field a cell value is built for.
#[derive(Debug, Clone, Copy)]
pub struct FieldTarget<'a> {
    pub name: &'a str,
    /// `None` when the message structure is unknown.
    pub structure: Option<&'a FieldStructure>,
    pub enumeration: Option<&'a EnumStructure>,
    pub direction: Direction,
}

impl FieldTarget<'_> {
    fn is_receive(&self) -> bool {
        self.direction.is_receive()
    }

    fn native_type(&self) -> Option<NativeType> {
        self.structure.and_then(|structure| structure.native_type)
    }

    fn is_collection(&self) -> bool {
        self.structure.is_some_and(|structure| structure.is_collection)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldPlan {
    Ready(FieldNode),
    /// Complex field: rows that must be compiled first, in cell order.
    SubMessages(Vec<String>),
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
enum Fragment {
    NotNull,
    IsNull,
    Absent,
    Regex(String),
    Literal(Literal),
    Expression { expr: ExpressionNode, predicate: bool },
}

pub struct FilterValueBuilder {
    engine: rhai::Engine,
    check_expressions: bool,
}

impl FilterValueBuilder {
    pub fn new(check_expressions: bool) -> Self {
        Self {
            engine: rhai::Engine::new_raw(),
            check_expressions,
        }
    }

    /// Builds the matcher (receive) or value (send) for one resolved cell.
    pub fn build(
        &self,
        expression: &ValueExpression,
        target: &FieldTarget<'_>,
        context: &AlertContext,
        alerts: &mut AlertCollector,
    ) -> FieldPlan {
        let context = context.with_column(target.name);
        let text = expression.text();

        if text == PRESENT || text == ABSENT {
            return match self.sentinel(text, target, &context, alerts) {
                Some(fragment) => FieldPlan::Ready(into_field(fragment, target.is_receive())),
                None => FieldPlan::Failed,
            };
        }

        if target.structure.is_some_and(FieldStructure::is_complex) {
            return match self.sub_message_references(text, target, &context, alerts) {
                Some(references) => FieldPlan::SubMessages(references),
                None => FieldPlan::Failed,
            };
        }

        if target.is_collection() {
            if let Some(inner) = bracketed_inner(text) {
                return self.collection(inner, expression, target, &context, alerts);
            }
            if !expression.is_reference {
                alerts.error(
                    &context,
                    format!(
                        "Malformed collection value \"{}\" for field \"{}\": expected [item, ...].",
                        text, target.name
                    ),
                );
                return FieldPlan::Failed;
            }
        }

        match self.scalar(text, expression, target, &context, alerts) {
            Some(fragment) => FieldPlan::Ready(into_field(fragment, target.is_receive())),
            None => FieldPlan::Failed,
        }
    }

    /// Wraps already-compiled sub-message rows into the field node.
    pub fn message_field(
        children: Vec<(String, Option<String>)>,
        is_collection: bool,
        direction: Direction,
    ) -> FieldNode {
        if direction.is_receive() {
            let mut items = children
                .into_iter()
                .map(|(reference, message_type)| FilterNode::Message {
                    reference,
                    message_type,
                })
                .collect::<Vec<_>>();
            if !is_collection && items.len() == 1 {
                return FieldNode::Filter(items.remove(0));
            }
            FieldNode::Filter(FilterNode::Collection { items })
        } else {
            let mut items = children
                .into_iter()
                .map(|(reference, message_type)| ValueNode::Message {
                    reference,
                    message_type,
                })
                .collect::<Vec<_>>();
            if !is_collection && items.len() == 1 {
                return FieldNode::Value(items.remove(0));
            }
            FieldNode::Value(ValueNode::List { items })
        }
    }

    /// Expression used outside a message field: loop counts, conditions,
    /// static values and service names.
    pub fn standalone_expression(
        &self,
        expression: &ValueExpression,
        cast: Option<NativeType>,
        context: &AlertContext,
        alerts: &mut AlertCollector,
    ) -> Option<ExpressionNode> {
        let source = expression.text().to_string();
        self.check_syntax(&source, context, alerts)?;
        Some(ExpressionNode {
            source,
            parameters: expression.parameters.clone(),
            cast,
            needs_runtime_check: expression.needs_runtime_check,
        })
    }

    /// A literal when the cell binds nothing, an expression otherwise.
    pub fn standalone_value(
        &self,
        expression: &ValueExpression,
        native: NativeType,
        context: &AlertContext,
        alerts: &mut AlertCollector,
    ) -> Option<ValueNode> {
        if expression.parameters.is_empty() {
            return match cast_literal(expression.text(), native) {
                Ok(value) => Some(ValueNode::Literal { value }),
                Err(reason) => {
                    alerts.error(
                        context,
                        format!("Cannot cast \"{}\" to {}: {}", expression.text(), native, reason),
                    );
                    None
                }
            };
        }
        self.standalone_expression(expression, Some(native), context, alerts)
            .map(|expr| ValueNode::Expression { expr })
    }

    fn sentinel(
        &self,
        text: &str,
        target: &FieldTarget<'_>,
        context: &AlertContext,
        alerts: &mut AlertCollector,
    ) -> Option<Fragment> {
        match (text, target.is_receive()) {
            (PRESENT, true) => Some(Fragment::NotNull),
            (ABSENT, true) => Some(Fragment::IsNull),
            (ABSENT, false) => Some(Fragment::Absent),
            _ => {
                alerts.error(
                    context,
                    format!(
                        "Presence marker \"{}\" for field \"{}\" is only valid when receiving.",
                        text, target.name
                    ),
                );
                None
            }
        }
    }

    fn sub_message_references(
        &self,
        text: &str,
        target: &FieldTarget<'_>,
        context: &AlertContext,
        alerts: &mut AlertCollector,
    ) -> Option<Vec<String>> {
        let Some(items) = bracketed_inner(text).and_then(list_items) else {
            alerts.error(
                context,
                format!(
                    "Complex field \"{}\" expects sub-message syntax [reference, ...], got \"{}\".",
                    target.name, text
                ),
            );
            return None;
        };

        if !target.is_collection() && items.len() != 1 {
            alerts.error(
                context,
                format!(
                    "Field \"{}\" is not a collection and takes exactly one sub-message, got {}.",
                    target.name,
                    items.len()
                ),
            );
            return None;
        }

        let mut references = Vec::with_capacity(items.len());
        for item in items {
            if !reference_name_regex().is_match(item) {
                alerts.error(
                    context,
                    format!(
                        "\"{}\" in field \"{}\" is not a sub-message reference.",
                        item, target.name
                    ),
                );
                return None;
            }
            references.push(item.to_string());
        }
        Some(references)
    }

    fn collection(
        &self,
        inner: &str,
        expression: &ValueExpression,
        target: &FieldTarget<'_>,
        context: &AlertContext,
        alerts: &mut AlertCollector,
    ) -> FieldPlan {
        let Some(items) = list_items(inner) else {
            alerts.error(
                context,
                format!(
                    "Malformed collection value \"[{}]\" for field \"{}\".",
                    inner, target.name
                ),
            );
            return FieldPlan::Failed;
        };

        let mut fragments = Vec::with_capacity(items.len());
        let mut failed = false;
        for item in items {
            if item == ABSENT {
                alerts.error(
                    context,
                    format!("Absence marker cannot appear inside collection field \"{}\".", target.name),
                );
                failed = true;
                continue;
            }
            let built = if item == PRESENT {
                self.sentinel(item, target, context, alerts)
            } else {
                self.scalar(item, expression, target, context, alerts)
            };
            match built {
                Some(fragment) => fragments.push(fragment),
                None => failed = true,
            }
        }
        if failed {
            return FieldPlan::Failed;
        }

        FieldPlan::Ready(if target.is_receive() {
            FieldNode::Filter(FilterNode::Collection {
                items: fragments.into_iter().map(into_filter).collect(),
            })
        } else {
            FieldNode::Value(ValueNode::List {
                items: fragments.into_iter().map(into_value).collect(),
            })
        })
    }

    fn scalar(
        &self,
        item: &str,
        expression: &ValueExpression,
        target: &FieldTarget<'_>,
        context: &AlertContext,
        alerts: &mut AlertCollector,
    ) -> Option<Fragment> {
        let item = item.trim();
        let receive = target.is_receive();

        if let Some(pattern) = regex_pattern(item) {
            if !receive {
                alerts.error(
                    context,
                    format!("Regexp value for field \"{}\" is only valid when receiving.", target.name),
                );
                return None;
            }
            if let Err(error) = Regex::new(pattern) {
                alerts.error(
                    context,
                    format!("Invalid regular expression \"{}\": {}", pattern, error),
                );
                return None;
            }
            return Some(Fragment::Regex(pattern.to_string()));
        }

        let mut text = item.to_string();
        if let Some(enumeration) = target.enumeration {
            if let Some(coded) = enumeration.coded_value(item) {
                text = coded.to_string();
            } else if !enumeration.is_coded_value(item) {
                let substituted = substitute_aliases(item, enumeration);
                let is_code = !bound_parameters(&substituted, expression).is_empty()
                    || (receive && is_predicate(&substituted));
                if !is_code {
                    alerts.error(
                        context,
                        format!(
                            "Unknown alias \"{}\" for enum \"{}\" of field \"{}\".",
                            item, enumeration.name, target.name
                        ),
                    );
                    return None;
                }
                text = substituted;
            }
        }

        let parameters = bound_parameters(&text, expression);
        let predicate = receive && is_predicate(&text);
        if predicate || !parameters.is_empty() {
            self.check_syntax(&text, context, alerts)?;
            return Some(Fragment::Expression {
                expr: ExpressionNode {
                    source: text,
                    parameters,
                    cast: if predicate { None } else { target.native_type() },
                    needs_runtime_check: expression.needs_runtime_check,
                },
                predicate,
            });
        }

        let Some(native) = target.native_type() else {
            return Some(Fragment::Literal(Literal::String(unquote(&text, '"').to_string())));
        };
        match cast_literal(&text, native) {
            Ok(value) => Some(Fragment::Literal(value)),
            Err(reason) => {
                alerts.error(
                    context,
                    format!(
                        "Cannot cast \"{}\" to {} for field \"{}\": {}",
                        text, native, target.name, reason
                    ),
                );
                None
            }
        }
    }

    fn check_syntax(&self, source: &str, context: &AlertContext, alerts: &mut AlertCollector) -> Option<()> {
        if !self.check_expressions {
            return Some(());
        }
        match self.engine.compile_expression(source) {
            Ok(_) => Some(()),
            Err(error) => {
                alerts.error(
                    context,
                    format!("Invalid expression \"{}\": {}", source, error),
                );
                None
            }
        }
    }
}

fn into_field(fragment: Fragment, receive: bool) -> FieldNode {
    if receive {
        FieldNode::Filter(into_filter(fragment))
    } else {
        FieldNode::Value(into_value(fragment))
    }
}

fn into_filter(fragment: Fragment) -> FilterNode {
    match fragment {
        Fragment::NotNull => FilterNode::NotNull,
        Fragment::IsNull | Fragment::Absent => FilterNode::IsNull,
        Fragment::Regex(pattern) => FilterNode::Regex { pattern },
        Fragment::Literal(value) => FilterNode::Equals { value },
        Fragment::Expression { expr, predicate } => FilterNode::Expression { expr, predicate },
    }
}

// Matcher-only fragments never reach here; `sentinel` and `scalar` reject them on send.
fn into_value(fragment: Fragment) -> ValueNode {
    match fragment {
        Fragment::Literal(value) => ValueNode::Literal { value },
        Fragment::Expression { expr, .. } => ValueNode::Expression { expr },
        Fragment::NotNull | Fragment::IsNull | Fragment::Absent | Fragment::Regex(_) => ValueNode::Absent,
    }
}

fn is_predicate(text: &str) -> bool {
    mentions_root_token(text, MATCH_SUBJECT)
}

/// Parameters of the whole cell actually used by `text`.
fn bound_parameters(text: &str, expression: &ValueExpression) -> Vec<Parameter> {
    if expression.parameters.is_empty() {
        return Vec::new();
    }
    expression
        .parameters
        .iter()
        .filter(|parameter| mentions_root_token(text, &parameter.name))
        .cloned()
        .collect()
}

/// Longest aliases first so `BuyMinus` is not split by `Buy`.
fn substitute_aliases(text: &str, enumeration: &EnumStructure) -> String {
    let mut aliases = enumeration.values.iter().collect::<Vec<_>>();
    aliases.sort_by(|left, right| right.0.len().cmp(&left.0.len()));
    aliases
        .into_iter()
        .fold(text.to_string(), |current, (alias, coded)| {
            replace_bounded(&current, alias, &coded_literal(coded, enumeration.native_type))
        })
}

fn coded_literal(coded: &str, native: NativeType) -> String {
    match native {
        NativeType::Char => format!("'{}'", coded),
        NativeType::String => format!("{:?}", coded),
        _ => coded.to_string(),
    }
}

/// `Regexp[...]` -> the pattern between the outer brackets.
fn regex_pattern(text: &str) -> Option<&str> {
    let prefix = text.get(..7)?;
    if !prefix.eq_ignore_ascii_case("regexp[") || !text.ends_with(']') {
        return None;
    }
    Some(&text[7..text.len() - 1])
}

fn unquote(text: &str, quote: char) -> &str {
    text.strip_prefix(quote)
        .and_then(|rest| rest.strip_suffix(quote))
        .filter(|_| text.len() >= 2)
        .unwrap_or(text)
}

pub(crate) fn cast_literal(text: &str, native: NativeType) -> Result<Literal, String> {
    let text = text.trim();
    match native {
        NativeType::Boolean => match text.to_ascii_lowercase().as_str() {
            "true" => Ok(Literal::Bool(true)),
            "false" => Ok(Literal::Bool(false)),
            _ => Err("expected true or false".to_string()),
        },
        NativeType::Byte => text
            .parse::<i8>()
            .map(Literal::Byte)
            .map_err(|error| error.to_string()),
        NativeType::Short => text
            .parse::<i16>()
            .map(|value| Literal::Int(i64::from(value)))
            .map_err(|error| error.to_string()),
        NativeType::Int => text
            .parse::<i32>()
            .map(|value| Literal::Int(i64::from(value)))
            .map_err(|error| error.to_string()),
        NativeType::Long => text
            .parse::<i64>()
            .map(Literal::Int)
            .map_err(|error| error.to_string()),
        NativeType::Float | NativeType::Double => match text.parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(Literal::Float(value)),
            Ok(_) => Err("value is not finite".to_string()),
            Err(error) => Err(error.to_string()),
        },
        NativeType::Decimal => {
            if decimal_regex().is_match(text) {
                Ok(Literal::Decimal(text.trim_start_matches('+').to_string()))
            } else {
                Err("invalid decimal number".to_string())
            }
        }
        NativeType::String => Ok(Literal::String(unquote(text, '"').to_string())),
        NativeType::Char => {
            let inner = unquote(text, '\'');
            let mut chars = inner.chars();
            match (chars.next(), chars.next()) {
                (Some(ch), None) => Ok(Literal::Char(ch)),
                _ => Err("expected exactly one character".to_string()),
            }
        }
        NativeType::Date | NativeType::Time | NativeType::DateTime => Err(format!(
            "{} literals are not supported; use a utility function",
            native
        )),
    }
}

fn decimal_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^[+-]?(\d+(\.\d*)?|\.\d+)([eE][+-]?\d+)?$").expect("decimal regex")
    })
}

fn reference_name_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_\-]*$").expect("reference regex"))
}

#[cfg(test)]
mod builder_tests {
    use super::*;
    use crate::test_support::fix_dictionary;
    use amx_core::{Dictionary, ParameterSource, SourceLocation};

    fn build_for(
        dictionary: &Dictionary,
        message: &str,
        field: &str,
        text: &str,
        direction: Direction,
    ) -> (FieldPlan, AlertCollector) {
        let structure = dictionary
            .message(message)
            .and_then(|message| message.field(field))
            .expect("fixture field");
        let target = FieldTarget {
            name: field,
            structure: Some(structure),
            enumeration: dictionary.enum_for(structure),
            direction,
        };
        let mut alerts = AlertCollector::default();
        let expression = ValueExpression::new(text, SourceLocation::default());
        let plan = FilterValueBuilder::new(true).build(
            &expression,
            &target,
            &AlertContext::at_line(2),
            &mut alerts,
        );
        (plan, alerts)
    }

    fn first_message(alerts: &AlertCollector) -> String {
        alerts.iter().next().map(|alert| alert.message.clone()).unwrap_or_default()
    }

    #[test]
    fn integer_literal_on_send_is_typed() {
        let (plan, alerts) = build_for(&fix_dictionary(), "Order", "Qty", "5", Direction::Send);
        assert_eq!(
            plan,
            FieldPlan::Ready(FieldNode::Value(ValueNode::Literal {
                value: Literal::Int(5)
            }))
        );
        assert!(alerts.is_empty());
    }

    #[test]
    fn bracketed_strings_on_receive_build_equality_collection() {
        let (plan, alerts) = build_for(&fix_dictionary(), "Order", "Tags", "[A,B,C]", Direction::Receive);
        let FieldPlan::Ready(FieldNode::Filter(FilterNode::Collection { items })) = plan else {
            panic!("expected collection filter");
        };
        assert_eq!(items.len(), 3);
        assert_eq!(
            items[2],
            FilterNode::Equals {
                value: Literal::String("C".to_string())
            }
        );
        assert!(alerts.is_empty());
    }

    #[test]
    fn reference_cell_builds_casted_expression() {
        let dictionary = fix_dictionary();
        let structure = dictionary.message("Order").and_then(|m| m.field("Price")).expect("price");
        let mut expression = ValueExpression::new("${row1:Price}", SourceLocation::default());
        let bound = expression.bind(
            "p",
            ParameterSource::Reference {
                block: None,
                reference: "row1".to_string(),
                path: vec![amx_core::PathSegment {
                    name: "Price".to_string(),
                    index: None,
                }],
            },
        );
        expression.rewritten = bound;
        expression.is_reference = true;

        let mut alerts = AlertCollector::default();
        let plan = FilterValueBuilder::new(true).build(
            &expression,
            &FieldTarget {
                name: "Price",
                structure: Some(structure),
                enumeration: None,
                direction: Direction::Send,
            },
            &AlertContext::at_line(1),
            &mut alerts,
        );
        let FieldPlan::Ready(FieldNode::Value(ValueNode::Expression { expr })) = plan else {
            panic!("expected expression value");
        };
        assert_eq!(expr.source, "p0");
        assert_eq!(expr.cast, Some(NativeType::Decimal));
        assert_eq!(expr.parameters.len(), 1);
        assert!(alerts.is_empty());
    }

    #[test]
    fn sentinels_depend_on_direction() {
        let dictionary = fix_dictionary();
        let (not_null, _) = build_for(&dictionary, "Order", "Price", "*", Direction::Receive);
        assert_eq!(not_null, FieldPlan::Ready(FieldNode::Filter(FilterNode::NotNull)));
        let (is_null, _) = build_for(&dictionary, "Order", "Legs", "#", Direction::Receive);
        assert_eq!(is_null, FieldPlan::Ready(FieldNode::Filter(FilterNode::IsNull)));
        let (absent, _) = build_for(&dictionary, "Order", "Price", "#", Direction::Send);
        assert_eq!(absent, FieldPlan::Ready(FieldNode::Value(ValueNode::Absent)));
        let (rejected, alerts) = build_for(&dictionary, "Order", "Price", "*", Direction::Send);
        assert_eq!(rejected, FieldPlan::Failed);
        assert!(first_message(&alerts).contains("only valid when receiving"));
    }

    #[test]
    fn regexp_values_are_validated() {
        let dictionary = fix_dictionary();
        let (plan, _) = build_for(&dictionary, "Order", "ClOrdID", "Regexp[^ord-\\d+$]", Direction::Receive);
        assert_eq!(
            plan,
            FieldPlan::Ready(FieldNode::Filter(FilterNode::Regex {
                pattern: "^ord-\\d+$".to_string()
            }))
        );
        let (plan, alerts) = build_for(&dictionary, "Order", "ClOrdID", "Regexp[(]", Direction::Receive);
        assert_eq!(plan, FieldPlan::Failed);
        assert!(first_message(&alerts).starts_with("Invalid regular expression"));
    }

    #[test]
    fn quoted_match_subject_in_string_field_stays_literal() {
        let dictionary = fix_dictionary();
        let (plan, alerts) = build_for(&dictionary, "Order", "ClOrdID", "\"x marks\"", Direction::Receive);
        assert_eq!(
            plan,
            FieldPlan::Ready(FieldNode::Filter(FilterNode::Equals {
                value: Literal::String("x marks".to_string())
            }))
        );
        assert!(alerts.is_empty());

        let (plan, alerts) = build_for(&dictionary, "Order", "ClOrdID", "x != \"x\"", Direction::Receive);
        let FieldPlan::Ready(FieldNode::Filter(FilterNode::Expression { expr, predicate })) = plan else {
            panic!("expected predicate filter");
        };
        assert!(predicate);
        assert_eq!(expr.source, "x != \"x\"");
        assert!(alerts.is_empty());
    }

    #[test]
    fn predicate_uses_match_subject() {
        let (plan, alerts) = build_for(
            &fix_dictionary(),
            "Execution",
            "Qty",
            "x > 10 && x < 20",
            Direction::Receive,
        );
        let FieldPlan::Ready(FieldNode::Filter(FilterNode::Expression { expr, predicate })) = plan else {
            panic!("expected predicate filter");
        };
        assert!(predicate);
        assert_eq!(expr.cast, None);
        assert!(alerts.is_empty());
    }

    #[test]
    fn bad_expression_syntax_is_reported() {
        let (plan, alerts) = build_for(&fix_dictionary(), "Execution", "Qty", "x > > 1", Direction::Receive);
        assert_eq!(plan, FieldPlan::Failed);
        assert!(first_message(&alerts).starts_with("Invalid expression"));
    }

    #[test]
    fn date_literals_are_rejected() {
        let (plan, alerts) = build_for(&fix_dictionary(), "Order", "TradeDate", "2024-01-01", Direction::Send);
        assert_eq!(plan, FieldPlan::Failed);
        assert!(first_message(&alerts).contains("date literals are not supported"));
    }

    #[test]
    fn numeric_cast_failures_are_errors() {
        let dictionary = fix_dictionary();
        let (plan, alerts) = build_for(&dictionary, "Order", "Qty", "five", Direction::Send);
        assert_eq!(plan, FieldPlan::Failed);
        assert!(first_message(&alerts).starts_with("Cannot cast \"five\" to int"));
        let (plan, _) = build_for(&dictionary, "Order", "Flag", "300", Direction::Send);
        assert_eq!(plan, FieldPlan::Failed);
        let (plan, _) = build_for(&dictionary, "Order", "Price", "1.50", Direction::Send);
        assert_eq!(
            plan,
            FieldPlan::Ready(FieldNode::Value(ValueNode::Literal {
                value: Literal::Decimal("1.50".to_string())
            }))
        );
    }

    #[test]
    fn enum_aliases_resolve_to_coded_values() {
        let dictionary = fix_dictionary();
        let (plan, _) = build_for(&dictionary, "Order", "Side", "Sell", Direction::Send);
        assert_eq!(
            plan,
            FieldPlan::Ready(FieldNode::Value(ValueNode::Literal {
                value: Literal::Char('2')
            }))
        );
        let (plan, _) = build_for(&dictionary, "Order", "Side", "1", Direction::Receive);
        assert_eq!(
            plan,
            FieldPlan::Ready(FieldNode::Filter(FilterNode::Equals {
                value: Literal::Char('1')
            }))
        );

        let (plan, _) = build_for(
            &dictionary,
            "Execution",
            "Side",
            "x == Buy || x == BuyMinus",
            Direction::Receive,
        );
        let FieldPlan::Ready(FieldNode::Filter(FilterNode::Expression { expr, .. })) = plan else {
            panic!("expected predicate filter");
        };
        assert_eq!(expr.source, "x == '1' || x == '3'");

        let (plan, alerts) = build_for(&dictionary, "Order", "Side", "Hold", Direction::Send);
        assert_eq!(plan, FieldPlan::Failed);
        assert!(first_message(&alerts).starts_with("Unknown alias \"Hold\""));
    }

    #[test]
    fn collection_syntax_is_required() {
        let (plan, alerts) = build_for(&fix_dictionary(), "Order", "Tags", "A,B", Direction::Send);
        assert_eq!(plan, FieldPlan::Failed);
        assert!(first_message(&alerts).starts_with("Malformed collection value"));
    }

    #[test]
    fn complex_fields_plan_sub_messages() {
        let dictionary = fix_dictionary();
        let (plan, _) = build_for(&dictionary, "Order", "Legs", "[leg1, leg2]", Direction::Send);
        assert_eq!(
            plan,
            FieldPlan::SubMessages(vec!["leg1".to_string(), "leg2".to_string()])
        );
        let (plan, alerts) = build_for(&dictionary, "Order", "Header", "[h1, h2]", Direction::Send);
        assert_eq!(plan, FieldPlan::Failed);
        assert!(first_message(&alerts).contains("is not a collection"));
        let (plan, _) = build_for(&dictionary, "Order", "Header", "h1", Direction::Send);
        assert_eq!(plan, FieldPlan::Failed);
    }

    #[test]
    fn message_field_shapes_follow_collection_flag() {
        let single = FilterValueBuilder::message_field(
            vec![("h1".to_string(), Some("Header".to_string()))],
            false,
            Direction::Receive,
        );
        assert!(matches!(single, FieldNode::Filter(FilterNode::Message { .. })));
        let list = FilterValueBuilder::message_field(
            vec![("l1".to_string(), None), ("l2".to_string(), None)],
            true,
            Direction::Send,
        );
        let FieldNode::Value(ValueNode::List { items }) = list else {
            panic!("expected list");
        };
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn unknown_structure_keeps_text_literal() {
        let mut alerts = AlertCollector::default();
        let plan = FilterValueBuilder::new(true).build(
            &ValueExpression::new("\"quoted\"", SourceLocation::default()),
            &FieldTarget {
                name: "Free",
                structure: None,
                enumeration: None,
                direction: Direction::Send,
            },
            &AlertContext::default(),
            &mut alerts,
        );
        assert_eq!(
            plan,
            FieldPlan::Ready(FieldNode::Value(ValueNode::Literal {
                value: Literal::String("quoted".to_string())
            }))
        );
    }
}
