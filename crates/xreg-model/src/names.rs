//! Name charsets.
//!
//! - Group and resource type names (plural and singular): lowercase
//!   letters, digits and `_`, starting with a letter or `_`, at most 58
//!   characters.
//! - Attribute names, `strict`: same alphabet, at most 63 characters.
//! - Attribute names, `extended`: also allows upper case and `.-~:@`.
//! - Entity ids: letters, digits and `_.-~:@`, not starting with a
//!   punctuation character, at most 128 characters.
//! - Map keys: lowercase letters, digits and `_.:-`, starting with a letter
//!   or digit, at most 63 characters.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

static TYPE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z_0-9]{0,57}$").expect("valid regex"));
static STRICT_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z_0-9]{0,62}$").expect("valid regex"));
static EXTENDED_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z_0-9.\-~:@]{0,62}$").expect("valid regex"));
static ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_][a-zA-Z0-9_.\-~:@]{0,127}$").expect("valid regex"));
static MAP_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9_.:\-]{0,62}$").expect("valid regex"));

/// Which alphabet attribute names in a scope may use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NameCharset {
    #[default]
    Strict,
    Extended,
}

impl NameCharset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Extended => "extended",
        }
    }
}

/// Validate a group or resource type name.
pub fn validate_type_name(what: &'static str, name: &str) -> ModelResult<()> {
    if TYPE_NAME.is_match(name) {
        Ok(())
    } else {
        Err(ModelError::InvalidName {
            what,
            name: name.to_string(),
            reason: "must match [a-z_][a-z_0-9]{0,57}".into(),
        })
    }
}

/// Validate an attribute name under the given charset. `*` is always valid.
pub fn validate_attribute_name(name: &str, charset: NameCharset) -> ModelResult<()> {
    if name == "*" {
        return Ok(());
    }
    let (re, pattern) = match charset {
        NameCharset::Strict => (&*STRICT_ATTR, "[a-z_][a-z_0-9]{0,62}"),
        NameCharset::Extended => (&*EXTENDED_ATTR, "[a-zA-Z_][a-zA-Z_0-9.-~:@]{0,62}"),
    };
    if re.is_match(name) {
        Ok(())
    } else {
        Err(ModelError::InvalidName {
            what: "attribute",
            name: name.to_string(),
            reason: format!("must match {pattern}"),
        })
    }
}

/// Returns `true` if `id` is a valid entity id.
pub fn is_valid_id(id: &str) -> bool {
    ID.is_match(id)
}

/// Returns `true` if `key` is a valid map key.
pub fn is_valid_map_key(key: &str) -> bool {
    MAP_KEY.is_match(key)
}
