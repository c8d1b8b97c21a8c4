//! Attribute definitions.
//!
//! An [`Attribute`] describes one named property of an entity: its type,
//! constraints, default, nested item or attribute set, and conditional
//! sibling attributes (`ifvalues`). Built-in attributes additionally carry
//! [`Internals`]: the engine hooks that stamp and cross-check them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use xreg_types::Value;

use crate::names::NameCharset;

/// An ordered attribute set, keyed by attribute name.
pub type Attributes = BTreeMap<String, Attribute>;

/// The type of an attribute or item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttrType {
    Any,
    Boolean,
    Decimal,
    Integer,
    UInteger,
    String,
    Timestamp,
    Uri,
    #[serde(rename = "urireference")]
    UriReference,
    #[serde(rename = "uritemplate")]
    UriTemplate,
    Url,
    Xid,
    #[serde(rename = "xidtype")]
    XidType,
    Map,
    Array,
    Object,
}

impl AttrType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Boolean => "boolean",
            Self::Decimal => "decimal",
            Self::Integer => "integer",
            Self::UInteger => "uinteger",
            Self::String => "string",
            Self::Timestamp => "timestamp",
            Self::Uri => "uri",
            Self::UriReference => "urireference",
            Self::UriTemplate => "uritemplate",
            Self::Url => "url",
            Self::Xid => "xid",
            Self::XidType => "xidtype",
            Self::Map => "map",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    pub fn is_scalar(&self) -> bool {
        !matches!(self, Self::Any | Self::Map | Self::Array | Self::Object)
    }
}

impl fmt::Display for AttrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Element description for `map` and `array` attributes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Item {
    #[serde(rename = "type")]
    pub attr_type: AttrType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namecharset: Option<NameCharset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Attributes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<Box<Item>>,
}

impl Item {
    pub fn of(attr_type: AttrType) -> Self {
        Self {
            attr_type,
            target: None,
            namecharset: None,
            attributes: None,
            item: None,
        }
    }
}

/// Sibling attributes activated when an attribute takes a trigger value.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IfValue {
    #[serde(default)]
    pub siblingattributes: Attributes,
}

/// Cross-field check run after an attribute's value is validated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CheckHook {
    /// The id attribute must equal the entity's id.
    IdMatch,
    /// A supplied epoch must equal the committed epoch.
    Epoch,
    /// An xref must address a resource of the same type.
    Xref,
}

/// Value derivation run after an attribute's check.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UpdateHook {
    /// Fill in the entity's id.
    Id,
    /// Bump the epoch once per transaction.
    Epoch,
    /// Preserve or default the creation time.
    CreatedAt,
    /// Stamp the modification time.
    ModifiedAt,
    /// Treat an empty xref as no xref.
    Xref,
}

/// Engine-side properties of an attribute. Never serialized.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Internals {
    pub check: Option<CheckHook>,
    pub update: Option<UpdateHook>,
    /// Still required when the owning Meta is an xref.
    pub xref_required: bool,
}

/// Definition of a single attribute.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub attr_type: AttrType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namecharset: Option<NameCharset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
    /// When `true` (the default) a value outside `enum` is rejected.
    #[serde(default = "default_strict")]
    pub strict: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub readonly: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub immutable: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Attributes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<Box<Item>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ifvalues: BTreeMap<String, IfValue>,
    #[serde(skip)]
    pub internals: Internals,
}

fn default_strict() -> bool {
    true
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl Attribute {
    /// A plain optional attribute of the given type.
    pub fn new(name: impl Into<String>, attr_type: AttrType) -> Self {
        Self {
            name: name.into(),
            attr_type,
            target: None,
            namecharset: None,
            description: None,
            enum_values: None,
            strict: true,
            readonly: false,
            immutable: false,
            required: false,
            default: None,
            attributes: None,
            item: None,
            ifvalues: BTreeMap::new(),
            internals: Internals::default(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    pub fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn with_item(mut self, item: Item) -> Self {
        self.item = Some(Box::new(item));
        self
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = Some(attributes);
        self
    }

    pub fn with_enum<I, V>(mut self, values: I, strict: bool) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.enum_values = Some(values.into_iter().map(Into::into).collect());
        self.strict = strict;
        self
    }

    pub fn with_check(mut self, hook: CheckHook) -> Self {
        self.internals.check = Some(hook);
        self
    }

    pub fn with_update(mut self, hook: UpdateHook) -> Self {
        self.internals.update = Some(hook);
        self
    }

    pub fn xref_required(mut self) -> Self {
        self.internals.xref_required = true;
        self
    }

    /// Charset for names nested under this attribute (objects only).
    pub fn charset(&self) -> NameCharset {
        self.namecharset.unwrap_or_default()
    }

    pub fn is_wildcard(&self) -> bool {
        self.name == "*"
    }
}

/// Build an [`Attributes`] map from a list of definitions.
pub fn attributes_of(list: impl IntoIterator<Item = Attribute>) -> Attributes {
    list.into_iter().map(|a| (a.name.clone(), a)).collect()
}
