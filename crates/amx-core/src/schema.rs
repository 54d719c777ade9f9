use std::collections::BTreeMap;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NativeType {
    Boolean,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    Decimal,
    String,
    Char,
    Date,
    Time,
    DateTime,
}

impl NativeType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "boolean" | "bool" => Some(Self::Boolean),
            "byte" => Some(Self::Byte),
            "short" => Some(Self::Short),
            "int" | "integer" => Some(Self::Int),
            "long" => Some(Self::Long),
            "float" => Some(Self::Float),
            "double" => Some(Self::Double),
            "decimal" | "bigdecimal" => Some(Self::Decimal),
            "string" => Some(Self::String),
            "char" | "character" => Some(Self::Char),
            "date" | "localdate" => Some(Self::Date),
            "time" | "localtime" => Some(Self::Time),
            "datetime" | "localdatetime" => Some(Self::DateTime),
            _ => None,
        }
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, Self::Date | Self::Time | Self::DateTime)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Byte => "byte",
            Self::Short => "short",
            Self::Int => "int",
            Self::Long => "long",
            Self::Float => "float",
            Self::Double => "double",
            Self::Decimal => "decimal",
            Self::String => "string",
            Self::Char => "char",
            Self::Date => "date",
            Self::Time => "time",
            Self::DateTime => "datetime",
        }
    }
}

impl fmt::Display for NativeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    Simple,
    Enum { name: String },
    Complex { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldStructure {
    pub name: String,
    pub kind: FieldKind,
    pub is_collection: bool,
    /// `None` for complex fields.
    pub native_type: Option<NativeType>,
}

impl FieldStructure {
    pub fn simple(name: impl Into<String>, native_type: NativeType) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Simple,
            is_collection: false,
            native_type: Some(native_type),
        }
    }

    pub fn complex(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Complex {
                message: message.into(),
            },
            is_collection: false,
            native_type: None,
        }
    }

    pub fn collection(mut self) -> Self {
        self.is_collection = true;
        self
    }

    pub fn is_complex(&self) -> bool {
        matches!(self.kind, FieldKind::Complex { .. })
    }

    pub fn complex_message(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::Complex { message } => Some(message.as_str()),
            _ => None,
        }
    }

    /// The same field seen as a single element of its collection.
    pub fn element(&self) -> Self {
        Self {
            is_collection: false,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MessageStructure {
    pub name: String,
    pub fields: IndexMap<String, FieldStructure>,
}

impl MessageStructure {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: IndexMap::new(),
        }
    }

    pub fn with_field(mut self, field: FieldStructure) -> Self {
        self.fields.insert(field.name.clone(), field);
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldStructure> {
        self.fields.get(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumStructure {
    pub name: String,
    pub native_type: NativeType,
    /// alias -> coded value, in declaration order
    pub values: IndexMap<String, String>,
}

impl EnumStructure {
    pub fn coded_value(&self, alias: &str) -> Option<&str> {
        self.values.get(alias).map(String::as_str)
    }

    pub fn is_coded_value(&self, value: &str) -> bool {
        self.values.values().any(|coded| coded == value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Dictionary {
    pub name: String,
    pub messages: IndexMap<String, MessageStructure>,
    pub enums: IndexMap<String, EnumStructure>,
    /// Dictionary-local utility functions: bare name -> qualified uri.
    pub utilities: IndexMap<String, String>,
}

impl Dictionary {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_message(mut self, message: MessageStructure) -> Self {
        self.messages.insert(message.name.clone(), message);
        self
    }

    pub fn with_enum(mut self, decl: EnumStructure) -> Self {
        self.enums.insert(decl.name.clone(), decl);
        self
    }

    pub fn message(&self, name: &str) -> Option<&MessageStructure> {
        self.messages.get(name)
    }

    pub fn enum_for(&self, field: &FieldStructure) -> Option<&EnumStructure> {
        match &field.kind {
            FieldKind::Enum { name } => self.enums.get(name),
            _ => None,
        }
    }

    pub fn utility(&self, name: &str) -> Option<&str> {
        self.utilities.get(name).map(String::as_str)
    }
}

/// Read-only source of dictionaries, keyed by uri.
pub trait DictionaryProvider {
    fn dictionary(&self, uri: &str) -> Option<&Dictionary>;
}

#[derive(Debug, Clone, Default)]
pub struct DictionarySet {
    dictionaries: BTreeMap<String, Dictionary>,
}

impl DictionarySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, dictionary: Dictionary) -> Option<Dictionary> {
        self.dictionaries.insert(dictionary.name.clone(), dictionary)
    }

    pub fn len(&self) -> usize {
        self.dictionaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dictionaries.is_empty()
    }
}

impl FromIterator<Dictionary> for DictionarySet {
    fn from_iter<T: IntoIterator<Item = Dictionary>>(iter: T) -> Self {
        let mut set = Self::new();
        for dictionary in iter {
            set.insert(dictionary);
        }
        set
    }
}

impl DictionaryProvider for DictionarySet {
    fn dictionary(&self, uri: &str) -> Option<&Dictionary> {
        self.dictionaries.get(uri)
    }
}
