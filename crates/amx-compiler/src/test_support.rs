use std::collections::BTreeMap;

use amx_core::{
    Dictionary, DictionarySet, EnumStructure, FieldKind, FieldStructure, MessageStructure,
    NativeType, RegistryDocument, StaticRegistry,
};
use indexmap::IndexMap;

use crate::resolver::{ProducedValue, ReferenceScope, RowLookup};

fn side_field(name: &str) -> FieldStructure {
    FieldStructure {
        name: name.to_string(),
        kind: FieldKind::Enum {
            name: "Side".to_string(),
        },
        is_collection: false,
        native_type: Some(NativeType::Char),
    }
}

pub(crate) fn fix_dictionary() -> Dictionary {
    let side = EnumStructure {
        name: "Side".to_string(),
        native_type: NativeType::Char,
        values: IndexMap::from([
            ("Buy".to_string(), "1".to_string()),
            ("Sell".to_string(), "2".to_string()),
            ("BuyMinus".to_string(), "3".to_string()),
        ]),
    };

    let mut dictionary = Dictionary::new("FIX")
        .with_enum(side)
        .with_message(
            MessageStructure::new("Order")
                .with_field(FieldStructure::simple("ClOrdID", NativeType::String))
                .with_field(FieldStructure::simple("Price", NativeType::Decimal))
                .with_field(FieldStructure::simple("Qty", NativeType::Int))
                .with_field(side_field("Side"))
                .with_field(FieldStructure::simple("Active", NativeType::Boolean))
                .with_field(FieldStructure::simple("Rate", NativeType::Double))
                .with_field(FieldStructure::simple("Flag", NativeType::Byte))
                .with_field(FieldStructure::simple("TradeDate", NativeType::Date))
                .with_field(FieldStructure::simple("Tags", NativeType::String).collection())
                .with_field(FieldStructure::complex("Header", "Header"))
                .with_field(FieldStructure::complex("Legs", "Leg").collection()),
        )
        .with_message(
            MessageStructure::new("Leg")
                .with_field(FieldStructure::simple("Price", NativeType::Decimal))
                .with_field(FieldStructure::simple("Symbol", NativeType::String))
                .with_field(FieldStructure::complex("SubLegs", "Leg").collection()),
        )
        .with_message(
            MessageStructure::new("Header")
                .with_field(FieldStructure::simple("MsgType", NativeType::String))
                .with_field(FieldStructure::simple("SeqNum", NativeType::Int)),
        )
        .with_message(
            MessageStructure::new("Execution")
                .with_field(FieldStructure::simple("OrderID", NativeType::String))
                .with_field(FieldStructure::simple("Price", NativeType::Decimal))
                .with_field(FieldStructure::simple("Qty", NativeType::Int))
                .with_field(side_field("Side"))
                .with_field(FieldStructure::complex("Legs", "Leg").collection()),
        );
    dictionary
        .utilities
        .insert("FormatPrice".to_string(), "FIX:Utils.FormatPrice".to_string());
    dictionary
}

pub(crate) fn dictionaries() -> DictionarySet {
    DictionarySet::from_iter([fix_dictionary()])
}

pub(crate) fn registry() -> StaticRegistry {
    let document: RegistryDocument = serde_json::from_str(
        r#"{
  "actions": [
    {"uri": "FIX:Client.SendOrder", "direction": "send", "message_type": "Order",
     "utilities": [{"name": "NextId", "uri": "FIX:Client.NextId"}]},
    {"uri": "FIX:Client.ReceiveExecution", "display_name": "Receive execution",
     "direction": "receive", "message_type": "Execution"},
    {"uri": "FIX:Client.ReceiveOrder", "direction": "receive", "message_type": "Order"},
    {"uri": "General:Store.SaveValue", "direction": "none", "return_type": "string",
     "produces_static": true},
    {"uri": "General:Util.Sleep", "direction": "none"}
  ],
  "global_utilities": [{"name": "Now", "uri": "General:Time.Now"}]
}"#,
    )
    .expect("registry fixture should deserialize");
    StaticRegistry::from_document(document).expect("registry fixture should load")
}

pub(crate) fn order_produced() -> ProducedValue {
    ProducedValue::Message {
        dictionary: Some("FIX".to_string()),
        message_type: Some("Order".to_string()),
    }
}

/// Hand-built scope for resolver and builder tests.
#[derive(Debug, Default)]
pub(crate) struct MapScope {
    rows: BTreeMap<String, RowLookup>,
    statics: BTreeMap<String, RowLookup>,
    block: Option<String>,
}

impl MapScope {
    pub(crate) fn with_row(self, name: &str, produced: ProducedValue) -> Self {
        self.with_lookup(name, RowLookup::Ready(produced))
    }

    pub(crate) fn with_lookup(mut self, name: &str, lookup: RowLookup) -> Self {
        self.rows.insert(name.to_string(), lookup);
        self
    }

    pub(crate) fn with_static(self, name: &str, produced: ProducedValue) -> Self {
        self.with_static_lookup(name, RowLookup::Ready(produced))
    }

    pub(crate) fn with_static_lookup(mut self, name: &str, lookup: RowLookup) -> Self {
        self.statics.insert(name.to_string(), lookup);
        self
    }

    pub(crate) fn with_block(mut self, block: &str) -> Self {
        self.block = Some(block.to_string());
        self
    }
}

impl ReferenceScope for MapScope {
    fn lookup_row(&self, reference: &str) -> RowLookup {
        self.rows.get(reference).cloned().unwrap_or(RowLookup::Unknown)
    }

    fn lookup_static(&self, name: &str) -> RowLookup {
        self.statics.get(name).cloned().unwrap_or(RowLookup::Unknown)
    }

    fn block_reference(&self) -> Option<&str> {
        self.block.as_deref()
    }
}
