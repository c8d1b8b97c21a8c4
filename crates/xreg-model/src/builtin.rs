//! Built-in attribute tables.
//!
//! Every entity level carries a fixed set of registry-defined attributes
//! in addition to whatever the model declares. The tables here are rebuilt
//! on demand; user attributes are merged over them by
//! [`Model`](crate::Model) accessors.

use crate::attribute::{attributes_of, AttrType, Attribute, Attributes, CheckHook, Item, UpdateHook};

/// Attributes the server computes for output. Accepted on input and
/// dropped, never stored.
pub const COMPUTED_ATTRIBUTES: &[&str] = &[
    "self",
    "shortself",
    "xid",
    "metaurl",
    "versionsurl",
    "versionscount",
    "isdefault",
    "defaultversionurl",
];

/// Placeholder ancestor meaning "assign during repair".
pub const TBD_ANCESTOR: &str = "#TBD";

/// Next candidate number for generated version ids (Meta).
pub const NEXT_VERSION_ID: &str = "#nextversionid";
/// Local epoch cached while a Meta is an xref.
pub const CACHED_EPOCH: &str = "#epoch";
/// Local creation time cached while a Meta is an xref.
pub const CACHED_CREATEDAT: &str = "#createdat";
/// Content id of a Version's document body.
pub const CONTENT_ID: &str = "#contentid";

/// Values accepted for Meta `compatibility`.
pub const COMPATIBILITY_VALUES: &[&str] = &[
    "none",
    "backward",
    "backward_transitive",
    "forward",
    "forward_transitive",
    "full",
    "full_transitive",
];

fn id_attribute(name: impl Into<String>) -> Attribute {
    Attribute::new(name, AttrType::String)
        .required()
        .immutable()
        .with_check(CheckHook::IdMatch)
        .with_update(UpdateHook::Id)
}

fn epoch() -> Attribute {
    Attribute::new("epoch", AttrType::UInteger)
        .required()
        .with_check(CheckHook::Epoch)
        .with_update(UpdateHook::Epoch)
}

fn createdat() -> Attribute {
    Attribute::new("createdat", AttrType::Timestamp)
        .required()
        .with_update(UpdateHook::CreatedAt)
}

fn modifiedat() -> Attribute {
    Attribute::new("modifiedat", AttrType::Timestamp)
        .required()
        .with_update(UpdateHook::ModifiedAt)
}

/// name, description, documentation, icon, labels.
fn descriptive() -> Vec<Attribute> {
    vec![
        Attribute::new("name", AttrType::String),
        Attribute::new("description", AttrType::String),
        Attribute::new("documentation", AttrType::Url),
        Attribute::new("icon", AttrType::Url),
        Attribute::new("labels", AttrType::Map).with_item(Item::of(AttrType::String)),
    ]
}

/// Built-in Registry attributes.
pub fn registry_attributes(spec_version: &str) -> Attributes {
    let mut list = vec![
        Attribute::new("specversion", AttrType::String)
            .required()
            .readonly()
            .with_default(spec_version),
        id_attribute("registryid"),
        epoch(),
        createdat(),
        modifiedat(),
    ];
    list.extend(descriptive());
    attributes_of(list)
}

/// Built-in Group attributes.
pub fn group_attributes(singular: &str) -> Attributes {
    let mut list = vec![
        id_attribute(format!("{singular}id")),
        epoch(),
        createdat(),
        modifiedat(),
    ];
    list.extend(descriptive());
    attributes_of(list)
}

/// Built-in Resource attributes. The Resource itself only records its id;
/// everything else lives on its Meta and Versions.
pub fn resource_attributes(singular: &str) -> Attributes {
    attributes_of([id_attribute(format!("{singular}id"))])
}

/// Built-in Meta attributes.
pub fn meta_attributes(singular: &str) -> Attributes {
    let deprecated = attributes_of([
        Attribute::new("effective", AttrType::Timestamp),
        Attribute::new("removal", AttrType::Timestamp),
        Attribute::new("alternative", AttrType::Url),
        Attribute::new("documentation", AttrType::Url),
        Attribute::new("*", AttrType::Any),
    ]);
    attributes_of([
        id_attribute(format!("{singular}id")).xref_required(),
        Attribute::new("xref", AttrType::String)
            .with_check(CheckHook::Xref)
            .with_update(UpdateHook::Xref)
            .xref_required(),
        epoch(),
        createdat(),
        modifiedat(),
        Attribute::new("readonly", AttrType::Boolean).with_default(false),
        Attribute::new("compatibility", AttrType::String)
            .with_enum(COMPATIBILITY_VALUES.iter().copied(), false)
            .with_default("none"),
        Attribute::new("deprecated", AttrType::Object).with_attributes(deprecated),
        Attribute::new("defaultversionid", AttrType::String).required(),
        Attribute::new("defaultversionsticky", AttrType::Boolean).with_default(false),
    ])
}

/// Built-in Version attributes. A Version never carries its Resource's id
/// attribute.
pub fn version_attributes(singular: &str, has_document: bool) -> Attributes {
    let mut list = vec![
        id_attribute("versionid"),
        epoch(),
        createdat(),
        modifiedat(),
        Attribute::new("ancestor", AttrType::String).required(),
        Attribute::new("contenttype", AttrType::String),
    ];
    list.extend(descriptive());
    if has_document {
        list.push(Attribute::new(format!("{singular}url"), AttrType::Url));
        list.push(Attribute::new(format!("{singular}base64"), AttrType::String));
        list.push(Attribute::new(singular, AttrType::Any));
    }
    attributes_of(list)
}
