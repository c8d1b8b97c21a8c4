//! Property-tree validation against an attribute set.
//!
//! [`validate_object`] walks the attribute definitions of one scope in a
//! fixed order: named attributes first (sorted), then siblings activated by
//! `ifvalues`, then the `*` wildcard for whatever keys are left. Each value
//! is type-checked and normalized in place, then the attribute's check and
//! update hooks run. Anything still unclaimed at the end is an unknown
//! attribute.

use std::collections::{HashSet, VecDeque};

use tracing::trace;
use xreg_model::builtin::COMPUTED_ATTRIBUTES;
use xreg_model::names::{is_valid_map_key, validate_attribute_name};
use xreg_model::{AttrType, Attribute, Attributes, Item, Model, NameCharset};
use xreg_types::{is_system_name, Object, PropPath, Problem, ProblemKind, Value};

use crate::hooks::{Hooks, NoHooks};
use crate::scalar::check_scalar;

/// Knobs for one [`validate_object`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ValidateOptions {
    /// The object is an xref'd Meta: defaults are not applied and only
    /// xref-required attributes are required.
    pub xref_mode: bool,
    /// Charset for names matched by the `*` wildcard.
    pub charset: NameCharset,
    /// Drop server-computed attributes (`self`, `xid`, ...) before
    /// validating. Only meaningful at the top of an entity.
    pub strip_computed: bool,
}

impl ValidateOptions {
    /// Options for the top level of an entity object.
    pub fn entity() -> Self {
        Self {
            strip_computed: true,
            ..Self::default()
        }
    }

    pub fn with_xref(mut self, xref_mode: bool) -> Self {
        self.xref_mode = xref_mode;
        self
    }
}

/// Borrowed view of whatever describes a value's type: an attribute or a
/// collection item.
#[derive(Clone, Copy)]
struct TypeRef<'a> {
    attr_type: AttrType,
    target: Option<&'a str>,
    item: Option<&'a Item>,
    attributes: Option<&'a Attributes>,
    charset: NameCharset,
}

impl<'a> From<&'a Attribute> for TypeRef<'a> {
    fn from(attr: &'a Attribute) -> Self {
        Self {
            attr_type: attr.attr_type,
            target: attr.target.as_deref(),
            item: attr.item.as_deref(),
            attributes: attr.attributes.as_ref(),
            charset: attr.charset(),
        }
    }
}

impl<'a> From<&'a Item> for TypeRef<'a> {
    fn from(item: &'a Item) -> Self {
        Self {
            attr_type: item.attr_type,
            target: item.target.as_deref(),
            item: item.item.as_deref(),
            attributes: item.attributes.as_ref(),
            charset: item.namecharset.unwrap_or_default(),
        }
    }
}

fn present(obj: &Object, name: &str) -> bool {
    matches!(obj.get(name), Some(v) if !v.is_null())
}

/// Validate `obj` against `attrs`, normalizing values in place.
///
/// `path` locates `obj` inside its entity (empty for the entity itself)
/// and prefixes every property name reported in a problem.
pub fn validate_object(
    obj: &mut Object,
    attrs: &Attributes,
    path: &PropPath,
    opts: &ValidateOptions,
    model: &Model,
    hooks: &mut dyn Hooks,
) -> Result<(), Problem> {
    if opts.strip_computed {
        for name in COMPUTED_ATTRIBUTES {
            obj.remove(*name);
        }
    }

    let mut queue: VecDeque<&Attribute> = attrs.values().filter(|a| !a.is_wildcard()).collect();
    let mut scheduled: HashSet<&str> = queue.iter().map(|a| a.name.as_str()).collect();
    let mut handled: HashSet<String> = HashSet::new();

    while let Some(attr) = queue.pop_front() {
        let name = attr.name.as_str();
        let apath = path.with_key(name);

        let fixed = attr.readonly || attr.immutable;
        if !present(obj, name) {
            obj.remove(name);
            let kept = if fixed { hooks.committed(name) } else { None };
            match (kept, &attr.default, opts.xref_mode) {
                (Some(value), _, _) => {
                    obj.insert(name.to_string(), value);
                }
                (None, Some(default), false) => {
                    obj.insert(name.to_string(), default.clone());
                }
                _ => {}
            }
        }

        if let Some(value) = obj.get_mut(name) {
            validate_value(value, TypeRef::from(attr), &apath, model)?;
            check_enum(value, attr, &apath)?;

            if let Some(ifv) = attr.ifvalues.get(&value.to_plain_string()) {
                for sibling in ifv.siblingattributes.values() {
                    if !scheduled.insert(sibling.name.as_str()) {
                        return Err(Problem::model_error(format!(
                            "ifvalues sibling {:?} of {apath} is already defined",
                            sibling.name
                        )));
                    }
                    trace!(attribute = %apath, sibling = %sibling.name, "activated ifvalues sibling");
                    queue.push_back(sibling);
                }
            }
        }

        if let Some(hook) = attr.internals.check {
            hooks.check(hook, name, obj)?;
        }
        if let Some(hook) = attr.internals.update {
            hooks.update(hook, name, obj)?;
        }
        if fixed {
            check_unchanged(attr, &apath, obj.get(name), hooks.committed(name))?;
        }

        if attr.required
            && !present(obj, name)
            && (!opts.xref_mode || attr.internals.xref_required)
        {
            return Err(Problem::required_missing(&apath));
        }
        handled.insert(name.to_string());
    }

    let rest: Vec<String> = obj
        .keys()
        .filter(|k| !handled.contains(*k) && !is_system_name(k))
        .cloned()
        .collect();

    match attrs.get("*") {
        Some(wildcard) => {
            for key in rest {
                let kpath = path.with_key(&key);
                validate_attribute_name(&key, opts.charset)
                    .map_err(|e| Problem::invalid_attribute(&kpath, e))?;
                if !present(obj, &key) {
                    obj.remove(&key);
                    continue;
                }
                if let Some(value) = obj.get_mut(&key) {
                    validate_value(value, TypeRef::from(wildcard), &kpath, model)?;
                    check_enum(value, wildcard, &kpath)?;
                }
            }
            Ok(())
        }
        None if !rest.is_empty() => Err(Problem::new(ProblemKind::UnknownAttribute)
            .with_arg("name", path.with_key(&rest[0]))
            .with_arg("list", rest.join(","))),
        None => Ok(()),
    }
}

fn validate_value(value: &mut Value, ty: TypeRef<'_>, path: &PropPath, model: &Model) -> Result<(), Problem> {
    match ty.attr_type {
        AttrType::Any => Ok(()),
        AttrType::Map => {
            let item = ty
                .item
                .ok_or_else(|| Problem::model_error(format!("map {path} has no item")))?;
            let Value::Map(map) = value else {
                return Err(Problem::invalid_attribute(
                    path,
                    format!("must be a map, not {}", value.kind_name()),
                ));
            };
            map.retain(|_, v| !v.is_null());
            for (key, v) in map.iter_mut() {
                let kpath = path.with_key(key);
                if !is_valid_map_key(key) {
                    return Err(Problem::invalid_attribute(&kpath, format!("invalid map key {key:?}")));
                }
                validate_value(v, TypeRef::from(item), &kpath, model)?;
            }
            Ok(())
        }
        AttrType::Array => {
            let item = ty
                .item
                .ok_or_else(|| Problem::model_error(format!("array {path} has no item")))?;
            let Value::Array(list) = value else {
                return Err(Problem::invalid_attribute(
                    path,
                    format!("must be an array, not {}", value.kind_name()),
                ));
            };
            for (idx, v) in list.iter_mut().enumerate() {
                let ipath = path.with_index(idx);
                if v.is_null() {
                    return Err(Problem::invalid_attribute(&ipath, "array elements may not be null"));
                }
                validate_value(v, TypeRef::from(item), &ipath, model)?;
            }
            Ok(())
        }
        AttrType::Object => {
            let Value::Map(map) = value else {
                return Err(Problem::invalid_attribute(
                    path,
                    format!("must be an object, not {}", value.kind_name()),
                ));
            };
            match ty.attributes {
                Some(nested) => {
                    let opts = ValidateOptions {
                        charset: ty.charset,
                        ..ValidateOptions::default()
                    };
                    validate_object(map, nested, path, &opts, model, &mut NoHooks)
                }
                None => {
                    map.retain(|_, v| !v.is_null());
                    for key in map.keys() {
                        validate_attribute_name(key, ty.charset)
                            .map_err(|e| Problem::invalid_attribute(path.with_key(key), e))?;
                    }
                    Ok(())
                }
            }
        }
        scalar => check_scalar(value, scalar, ty.target, path, model),
    }
}

/// A read-only or immutable attribute keeps its committed value.
fn check_unchanged(
    attr: &Attribute,
    path: &PropPath,
    value: Option<&Value>,
    committed: Option<Value>,
) -> Result<(), Problem> {
    match (value, committed) {
        (Some(value), Some(old)) if !value.is_null() && *value != old => {
            let what = if attr.readonly { "read-only" } else { "immutable" };
            Err(Problem::invalid_attribute(path, format!("is {what}"))
                .with_arg("value", old.to_plain_string()))
        }
        _ => Ok(()),
    }
}

fn check_enum(value: &Value, attr: &Attribute, path: &PropPath) -> Result<(), Problem> {
    let Some(values) = &attr.enum_values else {
        return Ok(());
    };
    if !attr.strict {
        return Ok(());
    }
    let text = value.to_plain_string();
    if values.iter().any(|v| v == value || v.to_plain_string() == text) {
        return Ok(());
    }
    let allowed: Vec<String> = values.iter().map(Value::to_plain_string).collect();
    Err(Problem::invalid_attribute(
        path,
        format!("value {text:?} must be one of [{}]", allowed.join(", ")),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use xreg_model::{CheckHook, UpdateHook};
    use xreg_types::value::object_from_json;

    fn model() -> Model {
        Model::from_json(r#"{"groups":{"dirs":{"singular":"dir","resources":{"files":{"singular":"file"}}}}}"#)
            .unwrap()
    }

    fn attrs(json: &str) -> Attributes {
        let text = format!(r#"{{"attributes":{json}}}"#);
        Model::from_json(&text).unwrap().attributes
    }

    fn obj(json: &str) -> Object {
        object_from_json(json).unwrap()
    }

    fn run(o: &mut Object, a: &Attributes) -> Result<(), Problem> {
        validate_object(o, a, &PropPath::root(), &ValidateOptions::default(), &model(), &mut NoHooks)
    }

    // ---------------------------------------------------------------
    // Defaults, required, unknown
    // ---------------------------------------------------------------

    #[test]
    fn defaults_fill_absent_and_null() {
        let a = attrs(r#"{"color":{"type":"string","default":"red"}}"#);
        let mut o = Object::new();
        run(&mut o, &a).unwrap();
        assert_eq!(o["color"], Value::from("red"));

        let mut o = obj(r#"{"color":null}"#);
        run(&mut o, &a).unwrap();
        assert_eq!(o["color"], Value::from("red"));
    }

    #[test]
    fn defaults_suppressed_in_xref_mode() {
        let a = attrs(r#"{"color":{"type":"string","default":"red"}}"#);
        let mut o = Object::new();
        let opts = ValidateOptions::default().with_xref(true);
        validate_object(&mut o, &a, &PropPath::root(), &opts, &model(), &mut NoHooks).unwrap();
        assert!(o.is_empty());
    }

    #[test]
    fn null_without_default_is_removed() {
        let a = attrs(r#"{"color":{"type":"string"}}"#);
        let mut o = obj(r#"{"color":null}"#);
        run(&mut o, &a).unwrap();
        assert!(!o.contains_key("color"));
    }

    #[test]
    fn required_missing_is_reported() {
        let a = attrs(r#"{"owner":{"type":"string","required":true}}"#);
        let err = run(&mut Object::new(), &a).unwrap_err();
        assert_eq!(err.kind, ProblemKind::RequiredAttributeMissing);
        assert_eq!(err.arg("name"), Some("owner"));
    }

    #[test]
    fn required_relaxed_in_xref_mode() {
        let mut a = attrs(r#"{"owner":{"type":"string","required":true}}"#);
        let opts = ValidateOptions::default().with_xref(true);
        validate_object(&mut Object::new(), &a, &PropPath::root(), &opts, &model(), &mut NoHooks).unwrap();

        a.get_mut("owner").unwrap().internals.xref_required = true;
        let err = validate_object(&mut Object::new(), &a, &PropPath::root(), &opts, &model(), &mut NoHooks)
            .unwrap_err();
        assert_eq!(err.kind, ProblemKind::RequiredAttributeMissing);
    }

    #[test]
    fn unknown_attributes_report_first_sorted_and_list() {
        let a = attrs(r#"{"known":{"type":"string"}}"#);
        let mut o = obj(r##"{"zeta":1,"alpha":2,"known":"x","#private":3}"##);
        let err = run(&mut o, &a).unwrap_err();
        assert_eq!(err.kind, ProblemKind::UnknownAttribute);
        assert_eq!(err.arg("name"), Some("alpha"));
        assert_eq!(err.arg("list"), Some("alpha,zeta"));
    }

    #[test]
    fn system_keys_are_never_unknown() {
        let a = Attributes::new();
        let mut o = obj(r##"{"#nextversionid":3}"##);
        run(&mut o, &a).unwrap();
        assert_eq!(o["#nextversionid"], Value::Int(3));
    }

    #[test]
    fn computed_attributes_dropped_at_top() {
        let a = attrs(r#"{"name":{"type":"string"}}"#);
        let mut o = obj(r#"{"name":"n","self":"http://x/","versionscount":3}"#);
        validate_object(&mut o, &a, &PropPath::root(), &ValidateOptions::entity(), &model(), &mut NoHooks)
            .unwrap();
        assert_eq!(o.len(), 1);
    }

    // ---------------------------------------------------------------
    // Wildcard and ifvalues
    // ---------------------------------------------------------------

    #[test]
    fn wildcard_processed_last() {
        let a = attrs(r#"{"size":{"type":"uinteger"},"*":{"type":"string"}}"#);
        // `size` must be checked as uinteger, not as the wildcard's string.
        let mut o = obj(r#"{"size":5,"extra":"x"}"#);
        run(&mut o, &a).unwrap();
        let mut bad = obj(r#"{"size":5,"extra":7}"#);
        let err = run(&mut bad, &a).unwrap_err();
        assert_eq!(err.arg("name"), Some("extra"));
    }

    #[test]
    fn wildcard_enforces_charset() {
        let a = attrs(r#"{"*":{"type":"any"}}"#);
        let mut o = obj(r#"{"BadName":1}"#);
        assert!(run(&mut o, &a).is_err());
        let opts = ValidateOptions {
            charset: NameCharset::Extended,
            ..ValidateOptions::default()
        };
        let mut o = obj(r#"{"BadName":1}"#);
        validate_object(&mut o, &a, &PropPath::root(), &opts, &model(), &mut NoHooks).unwrap();
    }

    #[test]
    fn ifvalues_inject_siblings() {
        let a = attrs(
            r#"{"format":{"type":"string","ifvalues":{
                "avro":{"siblingattributes":{"avroversion":{"type":"string","required":true}}}}}}"#,
        );
        let mut plain = obj(r#"{"format":"json"}"#);
        run(&mut plain, &a).unwrap();

        let mut missing = obj(r#"{"format":"avro"}"#);
        let err = run(&mut missing, &a).unwrap_err();
        assert_eq!(err.kind, ProblemKind::RequiredAttributeMissing);
        assert_eq!(err.arg("name"), Some("avroversion"));

        let mut ok = obj(r#"{"format":"avro","avroversion":"1.11"}"#);
        run(&mut ok, &a).unwrap();

        let mut stray = obj(r#"{"format":"json","avroversion":"1.11"}"#);
        assert_eq!(run(&mut stray, &a).unwrap_err().kind, ProblemKind::UnknownAttribute);
    }

    #[test]
    fn ifvalues_conflict_is_model_error() {
        let a = attrs(
            r#"{"a":{"type":"string","ifvalues":{"x":{"siblingattributes":{"c":{"type":"string"}}}}},
                "b":{"type":"string","ifvalues":{"y":{"siblingattributes":{"c":{"type":"string"}}}}}}"#,
        );
        let mut o = obj(r#"{"a":"x","b":"y"}"#);
        assert_eq!(run(&mut o, &a).unwrap_err().kind, ProblemKind::ModelError);
    }

    // ---------------------------------------------------------------
    // Composites
    // ---------------------------------------------------------------

    #[test]
    fn map_items_validated_with_paths() {
        let a = attrs(r#"{"labels":{"type":"map","item":{"type":"string"}}}"#);
        let mut o = obj(r#"{"labels":{"env":"prod","n":3}}"#);
        let err = run(&mut o, &a).unwrap_err();
        assert_eq!(err.arg("name"), Some("labels.n"));

        let mut o = obj(r#"{"labels":{"env":"prod","gone":null}}"#);
        run(&mut o, &a).unwrap();
        assert_eq!(o["labels"].as_map().unwrap().len(), 1);

        let mut o = obj(r#"{"labels":{"Env":"prod"}}"#);
        assert!(run(&mut o, &a).is_err());
    }

    #[test]
    fn array_items_validated_with_paths() {
        let a = attrs(r#"{"sizes":{"type":"array","item":{"type":"uinteger"}}}"#);
        let mut o = obj(r#"{"sizes":[1, 2.0, -3]}"#);
        let err = run(&mut o, &a).unwrap_err();
        assert_eq!(err.arg("name"), Some("sizes[2]"));

        let mut o = obj(r#"{"sizes":[1, 2.0]}"#);
        run(&mut o, &a).unwrap();
        assert_eq!(o["sizes"], Value::Array(vec![Value::Int(1), Value::Int(2)]));

        let mut o = obj(r#"{"sizes":[1, null]}"#);
        assert!(run(&mut o, &a).is_err());
    }

    #[test]
    fn object_recurses_with_nested_attributes() {
        let a = attrs(
            r#"{"owner":{"type":"object","attributes":{
                "email":{"type":"string","required":true},
                "since":{"type":"timestamp"}}}}"#,
        );
        let mut o = obj(r#"{"owner":{"since":"2024-01-01T00:00:00.000Z"}}"#);
        let err = run(&mut o, &a).unwrap_err();
        assert_eq!(err.arg("name"), Some("owner.email"));

        let mut o = obj(r#"{"owner":{"email":"a@b","since":"2024-01-01T00:00:00.000Z"}}"#);
        run(&mut o, &a).unwrap();
        assert_eq!(
            o["owner"].as_map().unwrap()["since"],
            Value::from("2024-01-01T00:00:00Z")
        );
    }

    #[test]
    fn enum_strict_and_lenient() {
        let strict = attrs(r#"{"level":{"type":"string","enum":["low","high"]}}"#);
        let mut o = obj(r#"{"level":"mid"}"#);
        assert!(run(&mut o, &strict).is_err());

        let lenient = attrs(r#"{"level":{"type":"string","enum":["low","high"],"strict":false}}"#);
        let mut o = obj(r#"{"level":"mid"}"#);
        run(&mut o, &lenient).unwrap();
    }

    // ---------------------------------------------------------------
    // Hooks and idempotence
    // ---------------------------------------------------------------

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
    }

    impl Hooks for Recorder {
        fn check(&mut self, hook: CheckHook, name: &str, _obj: &Object) -> Result<(), Problem> {
            self.calls.push(format!("check:{hook:?}:{name}"));
            Ok(())
        }

        fn update(&mut self, hook: UpdateHook, name: &str, obj: &mut Object) -> Result<(), Problem> {
            self.calls.push(format!("update:{hook:?}:{name}"));
            if hook == UpdateHook::Id {
                obj.insert(name.to_string(), Value::from("d1"));
            }
            Ok(())
        }
    }

    #[test]
    fn hooks_run_check_then_update_before_required() {
        let a = model().find_group("dirs").unwrap().group_attributes();
        let mut o = obj(r#"{"epoch":1,"createdat":"2024-01-01T00:00:00Z","modifiedat":"2024-01-01T00:00:00Z"}"#);
        let mut rec = Recorder::default();
        validate_object(&mut o, &a, &PropPath::root(), &ValidateOptions::entity(), &model(), &mut rec).unwrap();
        assert_eq!(o["dirid"], Value::from("d1"));
        let pos = |s: &str| rec.calls.iter().position(|c| c == s).unwrap();
        assert!(pos("check:IdMatch:dirid") < pos("update:Id:dirid"));
        assert!(rec.calls.contains(&"update:Epoch:epoch".to_string()));
    }

    struct Committed(Object);

    impl Hooks for Committed {
        fn check(&mut self, _hook: CheckHook, _name: &str, _obj: &Object) -> Result<(), Problem> {
            Ok(())
        }

        fn update(&mut self, _hook: UpdateHook, _name: &str, _obj: &mut Object) -> Result<(), Problem> {
            Ok(())
        }

        fn committed(&self, name: &str) -> Option<Value> {
            self.0.get(name).cloned()
        }
    }

    fn run_with(o: &mut Object, a: &Attributes, committed: &str) -> Result<(), Problem> {
        let mut hooks = Committed(obj(committed));
        validate_object(o, a, &PropPath::root(), &ValidateOptions::default(), &model(), &mut hooks)
    }

    #[test]
    fn readonly_and_immutable_keep_committed_value() {
        let a = attrs(
            r#"{"release":{"type":"string","readonly":true,"default":"1.0"},
                "code":{"type":"string","immutable":true}}"#,
        );
        let committed = r#"{"release":"1.0","code":"x"}"#;

        let mut o = obj(r#"{"release":"2.0","code":"x"}"#);
        let err = run_with(&mut o, &a, committed).unwrap_err();
        assert_eq!(err.kind, ProblemKind::InvalidAttribute);
        assert_eq!(err.arg("name"), Some("release"));

        let mut o = obj(r#"{"code":"y"}"#);
        let err = run_with(&mut o, &a, committed).unwrap_err();
        assert_eq!(err.arg("name"), Some("code"));

        let mut o = obj(r#"{"release":"1.0"}"#);
        run_with(&mut o, &a, committed).unwrap();
        assert_eq!(o["code"], Value::from("x"));

        let mut o = obj(r#"{"release":"2.0","code":"y"}"#);
        run_with(&mut o, &a, "{}").unwrap();
    }

    #[test]
    fn validation_is_idempotent() {
        let a = attrs(
            r#"{"color":{"type":"string","default":"red"},
                "when":{"type":"timestamp"},
                "n":{"type":"uinteger"},
                "labels":{"type":"map","item":{"type":"string"}}}"#,
        );
        let mut o = obj(r#"{"when":"2024-05-01T12:00:00+02:00","n":3.0,"labels":{"a":"b","c":null}}"#);
        run(&mut o, &a).unwrap();
        let once = o.clone();
        run(&mut o, &a).unwrap();
        assert_eq!(o, once);
    }
}
