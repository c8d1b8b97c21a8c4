//! Group operations.

use xreg_model::names::is_valid_id;
use xreg_types::{AddMode, EntityType, Object, Problem, ProblemKind};

use crate::error::RegistryResult;
use crate::tx::{user_object, NewEntity, Tx};

/// Path of a Group: `dirs/d1`.
pub fn group_path(group_type: &str, group_id: &str) -> String {
    format!("{group_type}/{group_id}")
}

impl Tx {
    /// Create or update a Group. Creating one touches the Registry.
    pub fn upsert_group(&mut self, group_type: &str, id: &str, obj: Object, mode: AddMode) -> RegistryResult<()> {
        let id_attr = self.group_model(group_type)?.id_attribute();
        if !is_valid_id(id) {
            return Err(Problem::invalid_attribute(&id_attr, format!("invalid id {id:?}")).into());
        }
        let path = group_path(group_type, id);
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

        let obj = user_object(obj);
        if exists {
            let entity = self.entity_mut(&path)?;
            if mode.is_merge() {
                entity.patch(obj)?;
            } else {
                entity.set_new_object(obj)?;
            }
            return self.save_entity(&path);
        }

        let registry_sid = self.registry_sid;
        self.create_entity(NewEntity {
            kind: EntityType::Group,
            parent_sid: Some(registry_sid),
            plural: group_type.to_string(),
            uid: id.to_string(),
            path: path.clone(),
            abstract_path: group_type.to_string(),
            object: obj,
        })?;
        self.save_new(&path)?;
        self.touch("")
    }

    /// A Group's properties.
    pub fn group(&mut self, group_type: &str, id: &str) -> RegistryResult<Option<Object>> {
        self.group_model(group_type)?;
        self.get(&group_path(group_type, id))
    }

    /// Ids of every Group of a type, sorted.
    pub fn group_ids(&mut self, group_type: &str) -> RegistryResult<Vec<String>> {
        self.group_model(group_type)?;
        let registry_sid = self.registry_sid;
        let rows = self.store_ref()?.children(registry_sid, group_type)?;
        Ok(rows.into_iter().map(|r| r.uid).collect())
    }

    /// Delete a Group with all its Resources. Touches the Registry.
    pub fn delete_group(&mut self, group_type: &str, id: &str) -> RegistryResult<()> {
        self.group_model(group_type)?;
        let path = group_path(group_type, id);
        if !self.lock(&path)? {
            return Err(Problem::not_found(format!("/{path}")).into());
        }
        let row = self.entity_row(&path)?;
        let content = self.content_under(&row)?;
        self.delete_entity(&path)?;
        self.release_content(content)?;
        self.touch("")
    }
}
