//! Version operations and document bodies.
//!
//! When the resource model has `hasdocument`, a Version may carry a
//! document as `<singular>` (text, or any JSON value), `<singular>base64`,
//! or point at one with `<singular>url`. Bodies live in the store's content
//! table under their BLAKE3 [`ContentId`]; the Version records the id in
//! `#contentid`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tracing::debug;
use xreg_model::builtin::{CONTENT_ID, NEXT_VERSION_ID};
use xreg_model::names::is_valid_id;
use xreg_model::ResourceModel;
use xreg_types::{AddMode, ContentId, EntityType, Object, Problem, ProblemKind, Value};

use crate::ancestry::{version_mode, TBD};
use crate::error::RegistryResult;
use crate::resource::{DefaultVersion, ResourceRef, WriteOptions};
use crate::tx::{user_object, NewEntity, Tx};

/// A document body pulled out of a Version write.
#[derive(Debug)]
enum Document {
    Unchanged,
    Body(Vec<u8>),
    Url,
}

/// Remove the document attributes from `obj` and return what they ask for.
fn take_document(rm: &ResourceModel, obj: &mut Object) -> Result<Document, Problem> {
    if !rm.hasdocument {
        return Ok(Document::Unchanged);
    }
    let singular = rm.singular.as_str();
    let b64_name = format!("{singular}base64");
    let url_name = format!("{singular}url");

    let mut body = match obj.remove(&b64_name) {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(
            BASE64
                .decode(text.as_bytes())
                .map_err(|e| Problem::invalid_attribute(&b64_name, e))?,
        ),
        Some(other) => {
            return Err(Problem::invalid_attribute(
                &b64_name,
                format!("must be a string, not {}", other.kind_name()),
            ))
        }
    };
    match obj.remove(singular) {
        None | Some(Value::Null) => {}
        Some(_) if body.is_some() => {
            return Err(Problem::bad_request(format!(
                "only one of {singular:?} and {b64_name:?} may be given"
            )))
        }
        Some(Value::String(text)) => body = Some(text.into_bytes()),
        Some(other) => {
            if !obj.contains_key("contenttype") {
                obj.insert("contenttype".to_string(), Value::from("application/json"));
            }
            body = Some(serde_json::Value::from(other).to_string().into_bytes());
        }
    }

    let has_url = obj.get(&url_name).is_some_and(|v| !v.is_null());
    match (body, has_url) {
        (Some(_), true) => Err(Problem::bad_request(format!(
            "{url_name:?} may not be combined with a document body"
        ))),
        (Some(bytes), false) => Ok(Document::Body(bytes)),
        (None, true) => Ok(Document::Url),
        (None, false) => Ok(Document::Unchanged),
    }
}

impl Tx {
    /// Create or update one Version, creating its Resource if needed.
    /// Returns the Version id, which is generated when `version_id` is
    /// `None` and `obj` carries no `versionid`.
    pub fn upsert_version(
        &mut self,
        rref: &ResourceRef,
        version_id: Option<&str>,
        obj: Object,
        opts: impl Into<WriteOptions>,
    ) -> RegistryResult<String> {
        let opts = opts.into();
        let rm = self.resource_model(&rref.group_type, &rref.resource_type)?.clone();
        let existed = self.load(&rref.path())?;
        if existed {
            if self.meta_xref(rref)?.is_some() {
                return Err(Problem::bad_request("versions of an xref resource cannot be written")
                    .with_subject(rref.address())
                    .into());
            }
            if self.is_readonly(rref)? {
                return Err(Problem::new(ProblemKind::Readonly).with_subject(rref.address()).into());
            }
        } else {
            if opts.mode == AddMode::Update {
                return Err(Problem::not_found(rref.address()).into());
            }
            self.create_resource(rref, &rm)?;
        }

        let vid = self.write_version(rref, &rm, version_id.map(String::from), obj, opts.mode)?;
        if let Some(request) = &opts.default_version {
            self.apply_default_request(rref, &rm, request, Some(&vid))?;
        }
        self.validate_resource(rref)?;
        if !existed {
            self.touch(&rref.group_path())?;
        }
        Ok(vid)
    }

    /// Stage and save one Version without Resource-wide validation.
    pub(crate) fn write_version(
        &mut self,
        rref: &ResourceRef,
        rm: &ResourceModel,
        version_id: Option<String>,
        obj: Object,
        mode: AddMode,
    ) -> RegistryResult<String> {
        let mut obj = user_object(obj);
        let supplied = version_id.or_else(|| {
            obj.get("versionid")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(String::from)
        });
        let vid = match &supplied {
            Some(vid) => vid.clone(),
            None => self.next_version_id(rref)?,
        };
        if !is_valid_id(&vid) {
            return Err(Problem::invalid_attribute("versionid", format!("invalid id {vid:?}"))
                .with_subject(rref.address())
                .into());
        }
        let path = rref.version_path(&vid);
        let exists = self.lock(&path)?;
        match (mode, exists) {
            (AddMode::Add, true) => {
                return Err(Problem::new(ProblemKind::AlreadyExists)
                    .with_subject(format!("/{path}"))
                    .into())
            }
            (AddMode::Update, false) => return Err(Problem::not_found(format!("/{path}")).into()),
            _ => {}
        }
        if !exists && supplied.is_some() && !rm.setversionid {
            return Err(Problem::new(ProblemKind::SetVersionIdNotAllowed)
                .with_subject(rref.address())
                .into());
        }

        let document = take_document(rm, &mut obj).map_err(|p| p.or_subject(format!("/{path}")))?;
        match document {
            Document::Unchanged => {}
            Document::Url => {
                obj.insert(CONTENT_ID.to_string(), Value::Null);
            }
            Document::Body(bytes) => {
                let id = ContentId::from_bytes(&bytes);
                self.store_mut()?.put_content(id, bytes)?;
                obj.insert(CONTENT_ID.to_string(), Value::from(id.to_hex()));
            }
        }

        let old_content = if exists {
            self.version_content_id(&path)?
        } else {
            None
        };

        if exists {
            let entity = self.entity_mut(&path)?;
            match obj.get("ancestor").map(Value::is_null) {
                Some(true) => {
                    obj.insert("ancestor".to_string(), Value::from(TBD));
                }
                None if !mode.is_merge() => {
                    if let Some(ancestor) = entity.get("ancestor").cloned() {
                        obj.insert("ancestor".to_string(), ancestor);
                    }
                }
                _ => {}
            }
            if mode.is_merge() {
                entity.patch(obj)?;
            } else {
                entity.set_new_object(obj)?;
            }
            self.save_entity(&path)?;
        } else {
            if obj.get("ancestor").map_or(true, Value::is_null) {
                obj.insert("ancestor".to_string(), Value::from(TBD));
            }
            let resource_sid = self.entity_row(&rref.path())?.sid;
            self.create_entity(NewEntity {
                kind: EntityType::Version,
                parent_sid: Some(resource_sid),
                plural: "versions".to_string(),
                uid: vid.clone(),
                path: path.clone(),
                abstract_path: format!("{}/versions", rref.abstract_path()),
                object: obj,
            })?;
            self.save_new(&path)?;
        }

        if let Some(old) = old_content {
            if self.version_content_id(&path)?.as_ref() != Some(&old) {
                self.release_content(vec![old])?;
            }
        }
        debug!(version = %path, created = !exists, "wrote version");
        Ok(vid)
    }

    /// Next free generated Version id, advancing `#nextversionid`.
    fn next_version_id(&mut self, rref: &ResourceRef) -> RegistryResult<String> {
        let meta_path = rref.meta_path();
        let mut next = self
            .entity_mut(&meta_path)?
            .get(NEXT_VERSION_ID)
            .and_then(Value::as_u64)
            .unwrap_or(1)
            .max(1);
        while self.load(&rref.version_path(&next.to_string()))? {
            next += 1;
        }
        self.cached_mut(&meta_path)?
            .just_set(NEXT_VERSION_ID, Value::from_u64(next + 1))?;
        Ok(next.to_string())
    }

    pub(crate) fn version_content_id(&mut self, path: &str) -> RegistryResult<Option<String>> {
        Ok(self
            .entity(path)?
            .and_then(|v| v.get_str(CONTENT_ID))
            .map(String::from))
    }

    /// Delete one Version.
    ///
    /// Its children are reparented first. Deleting the default Version
    /// unpins the default, or pins it to `next_default` when given.
    /// Deleting the last Version deletes the Resource.
    pub fn delete_version(
        &mut self,
        rref: &ResourceRef,
        version_id: &str,
        next_default: Option<&str>,
    ) -> RegistryResult<()> {
        let rm = self.resource_model(&rref.group_type, &rref.resource_type)?.clone();
        let path = rref.version_path(version_id);
        if !self.load(&rref.path())? || !self.lock(&path)? {
            return Err(Problem::not_found(format!("/{path}")).into());
        }
        if self.is_readonly(rref)? {
            return Err(Problem::new(ProblemKind::Readonly).with_subject(rref.address()).into());
        }
        if self.version_rows(rref)?.len() == 1 {
            return self.delete_resource(rref);
        }

        if self.default_version_id(rref)?.as_deref() == Some(version_id) {
            match next_default {
                Some(next) if next != version_id => {
                    self.apply_default_request(rref, &rm, &DefaultVersion::Id(next.to_string()), None)?;
                }
                Some(next) => {
                    return Err(Problem::new(ProblemKind::UnknownId)
                        .with_subject(rref.address())
                        .with_arg("name", "defaultversionid")
                        .with_arg("id", next)
                        .into())
                }
                None => {
                    self.entity_mut(&rref.meta_path())?
                        .just_set("defaultversionsticky", false)?;
                }
            }
        }

        self.remove_version(rref, version_mode(rm.versionmode), version_id)?;
        debug!(version = %path, "deleted version");
        self.validate_resource(rref)
    }

    /// A Version's properties, following an xref.
    pub fn version(&mut self, rref: &ResourceRef, version_id: &str) -> RegistryResult<Option<Object>> {
        self.resource_model(&rref.group_type, &rref.resource_type)?;
        let source = match self.meta_xref(rref)?.and_then(|x| ResourceRef::parse(&x)) {
            Some(target) if target != *rref => target,
            _ => rref.clone(),
        };
        self.get(&source.version_path(version_id))
    }

    /// A Version's document body, if it has one stored.
    pub fn document(&mut self, rref: &ResourceRef, version_id: &str) -> RegistryResult<Option<Vec<u8>>> {
        let Some(hex) = self.version_content_id(&rref.version_path(version_id))? else {
            return Ok(None);
        };
        let id = ContentId::from_hex(&hex).map_err(|e| Problem::model_error(e).with_subject(rref.address()))?;
        Ok(self.store_ref()?.get_content(&id)?)
    }

    /// One Version property. The `<singular>` attribute yields the stored
    /// document as text.
    pub fn version_property(
        &mut self,
        rref: &ResourceRef,
        version_id: &str,
        name: &str,
    ) -> RegistryResult<Option<Value>> {
        let rm = self.resource_model(&rref.group_type, &rref.resource_type)?;
        if rm.hasdocument && name == rm.singular {
            let body = self.document(rref, version_id)?;
            return Ok(body.and_then(|b| String::from_utf8(b).ok()).map(Value::from));
        }
        if name.starts_with('#') {
            return Ok(None);
        }
        Ok(self
            .entity(&rref.version_path(version_id))?
            .and_then(|v| v.get(name))
            .cloned())
    }
}
