use amx_core::{
    Dictionary, EnumStructure, FieldKind, FieldStructure, MatrixError, MessageStructure,
    NativeType, SourceLocation, SourceSpan,
};
use indexmap::IndexMap;
use roxmltree::{Document, Node};
use tracing::debug;

pub fn parse_dictionary_xml(source: &str) -> Result<Dictionary, MatrixError> {
    let document = Document::parse(source)
        .map_err(|error| MatrixError::new("DICT_PARSE_ERROR", error.to_string()))?;

    let root = document.root_element();
    if root.tag_name().name() != "dictionary" {
        return Err(MatrixError::with_span(
            "DICT_ROOT_INVALID",
            format!("Expected <dictionary> root, got <{}>.", root.tag_name().name()),
            node_span(&document, root),
        ));
    }

    let name = required_attr(&document, root, "name")?;
    let mut dictionary = Dictionary::new(name.clone());

    for child in root.children().filter(Node::is_element) {
        match child.tag_name().name() {
            "enum" => {
                let decl = parse_enum(&document, child)?;
                if dictionary.enums.contains_key(&decl.name) {
                    return Err(MatrixError::with_span(
                        "DICT_ENUM_DUPLICATE",
                        format!("Duplicate enum \"{}\".", decl.name),
                        node_span(&document, child),
                    ));
                }
                dictionary.enums.insert(decl.name.clone(), decl);
            }
            "message" => {
                let message = parse_message(&document, child)?;
                if dictionary.messages.contains_key(&message.name) {
                    return Err(MatrixError::with_span(
                        "DICT_MESSAGE_DUPLICATE",
                        format!("Duplicate message \"{}\".", message.name),
                        node_span(&document, child),
                    ));
                }
                dictionary.messages.insert(message.name.clone(), message);
            }
            "utility" => {
                let utility_name = required_attr(&document, child, "name")?;
                let uri = child
                    .attribute("uri")
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{}:{}", name, utility_name));
                dictionary.utilities.insert(utility_name, uri);
            }
            other => {
                return Err(MatrixError::with_span(
                    "DICT_CHILD_INVALID",
                    format!("Unsupported child <{}> under <dictionary>.", other),
                    node_span(&document, child),
                ))
            }
        }
    }

    validate_field_targets(&dictionary)?;
    debug!(
        dictionary = %dictionary.name,
        messages = dictionary.messages.len(),
        enums = dictionary.enums.len(),
        "dictionary loaded"
    );
    Ok(dictionary)
}

fn parse_enum(document: &Document<'_>, node: Node<'_, '_>) -> Result<EnumStructure, MatrixError> {
    let name = required_attr(document, node, "name")?;
    let native_type = parse_native_type(document, node, &required_attr(document, node, "type")?)?;

    let mut values = IndexMap::new();
    for value in node.children().filter(Node::is_element) {
        if value.tag_name().name() != "value" {
            return Err(MatrixError::with_span(
                "DICT_ENUM_CHILD_INVALID",
                format!("Unsupported child <{}> under <enum>.", value.tag_name().name()),
                node_span(document, value),
            ));
        }
        let alias = required_attr(document, value, "alias")?;
        let coded = value.text().unwrap_or_default().trim().to_string();
        if coded.is_empty() {
            return Err(MatrixError::with_span(
                "DICT_ENUM_VALUE_EMPTY",
                format!("Enum \"{}\" alias \"{}\" has no value.", name, alias),
                node_span(document, value),
            ));
        }
        values.insert(alias, coded);
    }

    Ok(EnumStructure {
        name,
        native_type,
        values,
    })
}

fn parse_message(
    document: &Document<'_>,
    node: Node<'_, '_>,
) -> Result<MessageStructure, MatrixError> {
    let mut message = MessageStructure::new(required_attr(document, node, "name")?);

    for field in node.children().filter(Node::is_element) {
        if field.tag_name().name() != "field" {
            return Err(MatrixError::with_span(
                "DICT_MESSAGE_CHILD_INVALID",
                format!("Unsupported child <{}> under <message>.", field.tag_name().name()),
                node_span(document, field),
            ));
        }

        let name = required_attr(document, field, "name")?;
        let is_collection = parse_bool_attr(document, field, "collection")?;
        let structure = match (field.attribute("message"), field.attribute("enum")) {
            (Some(_), Some(_)) => {
                return Err(MatrixError::with_span(
                    "DICT_FIELD_KIND_CONFLICT",
                    format!("Field \"{}\" cannot be both a message and an enum.", name),
                    node_span(document, field),
                ))
            }
            (Some(target), None) => FieldStructure {
                name: name.clone(),
                kind: FieldKind::Complex {
                    message: target.to_string(),
                },
                is_collection,
                native_type: None,
            },
            (None, enum_name) => {
                let native_type =
                    parse_native_type(document, field, &required_attr(document, field, "type")?)?;
                let kind = match enum_name {
                    Some(enum_name) => FieldKind::Enum {
                        name: enum_name.to_string(),
                    },
                    None => FieldKind::Simple,
                };
                FieldStructure {
                    name: name.clone(),
                    kind,
                    is_collection,
                    native_type: Some(native_type),
                }
            }
        };

        if message.fields.contains_key(&name) {
            return Err(MatrixError::with_span(
                "DICT_FIELD_DUPLICATE",
                format!("Duplicate field \"{}\" in message \"{}\".", name, message.name),
                node_span(document, field),
            ));
        }
        message.fields.insert(name, structure);
    }

    Ok(message)
}

fn validate_field_targets(dictionary: &Dictionary) -> Result<(), MatrixError> {
    for message in dictionary.messages.values() {
        for field in message.fields.values() {
            match &field.kind {
                FieldKind::Complex { message: target } if dictionary.message(target).is_none() => {
                    return Err(MatrixError::new(
                        "DICT_MESSAGE_UNKNOWN",
                        format!(
                            "Field \"{}.{}\" references unknown message \"{}\".",
                            message.name, field.name, target
                        ),
                    ));
                }
                FieldKind::Enum { name } if !dictionary.enums.contains_key(name) => {
                    return Err(MatrixError::new(
                        "DICT_ENUM_UNKNOWN",
                        format!(
                            "Field \"{}.{}\" references unknown enum \"{}\".",
                            message.name, field.name, name
                        ),
                    ));
                }
                _ => {}
            }
        }
    }
    Ok(())
}

fn required_attr(
    document: &Document<'_>,
    node: Node<'_, '_>,
    name: &str,
) -> Result<String, MatrixError> {
    match node.attribute(name).map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(MatrixError::with_span(
            "DICT_ATTR_REQUIRED",
            format!(
                "Attribute \"{}\" is required on <{}>.",
                name,
                node.tag_name().name()
            ),
            node_span(document, node),
        )),
    }
}

fn parse_bool_attr(
    document: &Document<'_>,
    node: Node<'_, '_>,
    name: &str,
) -> Result<bool, MatrixError> {
    match node.attribute(name).map(str::trim) {
        None => Ok(false),
        Some("true") => Ok(true),
        Some("false") => Ok(false),
        Some(other) => Err(MatrixError::with_span(
            "DICT_ATTR_BOOL_INVALID",
            format!("Attribute \"{}\" must be true or false, got \"{}\".", name, other),
            node_span(document, node),
        )),
    }
}

fn parse_native_type(
    document: &Document<'_>,
    node: Node<'_, '_>,
    raw: &str,
) -> Result<NativeType, MatrixError> {
    NativeType::parse(raw).ok_or_else(|| {
        MatrixError::with_span(
            "DICT_TYPE_UNKNOWN",
            format!("Unknown native type \"{}\".", raw),
            node_span(document, node),
        )
    })
}

fn node_span(document: &Document<'_>, node: Node<'_, '_>) -> SourceSpan {
    let start_pos = document.text_pos_at(node.range().start);
    let end_pos = document.text_pos_at(node.range().end);
    SourceSpan {
        start: SourceLocation {
            line: start_pos.row as usize,
            column: start_pos.col as usize,
        },
        end: SourceLocation {
            line: end_pos.row as usize,
            column: end_pos.col as usize,
        },
    }
}
