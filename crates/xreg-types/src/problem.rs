//! Structured user-facing errors.
//!
//! A [`Problem`] is never a bare string: it carries a [`ProblemKind`], the
//! address of the entity it concerns, and named arguments, so callers can
//! act on it programmatically and render it however their wire format
//! requires.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Machine-readable classification of a [`Problem`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemKind {
    InvalidAttribute,
    UnknownAttribute,
    RequiredAttributeMissing,
    MismatchedEpoch,
    MismatchedId,
    UnknownId,
    AncestorCircularReference,
    MultipleRoots,
    Readonly,
    MalformedXref,
    ExtraXrefAttribute,
    ModelError,
    NotFound,
    AlreadyExists,
    UnknownGroupType,
    UnknownResourceType,
    SetDefaultVersionIdNotAllowed,
    SetVersionIdNotAllowed,
    BadRequest,
}

impl ProblemKind {
    /// Stable wire code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidAttribute => "invalid_attribute",
            Self::UnknownAttribute => "unknown_attribute",
            Self::RequiredAttributeMissing => "required_attribute_missing",
            Self::MismatchedEpoch => "mismatched_epoch",
            Self::MismatchedId => "mismatched_id",
            Self::UnknownId => "unknown_id",
            Self::AncestorCircularReference => "ancestor_circular_reference",
            Self::MultipleRoots => "multiple_roots",
            Self::Readonly => "readonly",
            Self::MalformedXref => "malformed_xref",
            Self::ExtraXrefAttribute => "extra_xref_attribute",
            Self::ModelError => "model_error",
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::UnknownGroupType => "unknown_group_type",
            Self::UnknownResourceType => "unknown_resource_type",
            Self::SetDefaultVersionIdNotAllowed => "setdefaultversionid_not_allowed",
            Self::SetVersionIdNotAllowed => "setversionid_not_allowed",
            Self::BadRequest => "bad_request",
        }
    }

    /// Short human-readable title.
    pub fn title(&self) -> &'static str {
        match self {
            Self::InvalidAttribute => "The attribute value is not valid",
            Self::UnknownAttribute => "The attribute is not defined by the model",
            Self::RequiredAttributeMissing => "A required attribute is missing",
            Self::MismatchedEpoch => "The epoch does not match the current value",
            Self::MismatchedId => "The id does not match the entity",
            Self::UnknownId => "The referenced id does not exist",
            Self::AncestorCircularReference => "Version ancestors form a cycle",
            Self::MultipleRoots => "The resource has more than one root version",
            Self::Readonly => "The entity is read-only",
            Self::MalformedXref => "The xref value is not a valid resource reference",
            Self::ExtraXrefAttribute => "Attributes other than xref are not allowed with xref",
            Self::ModelError => "The model is not valid",
            Self::NotFound => "The entity was not found",
            Self::AlreadyExists => "The entity already exists",
            Self::UnknownGroupType => "The group type is not defined by the model",
            Self::UnknownResourceType => "The resource type is not defined by the model",
            Self::SetDefaultVersionIdNotAllowed => "The default version may not be set",
            Self::SetVersionIdNotAllowed => "Version ids may not be chosen by the client",
            Self::BadRequest => "The request is not valid",
        }
    }
}

impl fmt::Display for ProblemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A structured, user-facing error.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub struct Problem {
    pub kind: ProblemKind,
    /// Address of the entity the problem concerns (`/dirs/d1`), empty if
    /// not yet known.
    pub subject: String,
    pub args: BTreeMap<String, String>,
}

impl Problem {
    pub fn new(kind: ProblemKind) -> Self {
        Self {
            kind,
            subject: String::new(),
            args: BTreeMap::new(),
        }
    }

    /// Attach a named argument.
    pub fn with_arg(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.args.insert(name.into(), value.to_string());
        self
    }

    /// Attach the free-form `error_detail` argument.
    pub fn with_detail(self, detail: impl ToString) -> Self {
        self.with_arg("error_detail", detail)
    }

    /// Set the subject.
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Set the subject only if none was recorded yet.
    pub fn or_subject(mut self, subject: impl Into<String>) -> Self {
        if self.subject.is_empty() {
            self.subject = subject.into();
        }
        self
    }

    /// Look up a named argument.
    pub fn arg(&self, name: &str) -> Option<&str> {
        self.args.get(name).map(String::as_str)
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    // ---- common constructors ----

    pub fn invalid_attribute(name: impl ToString, detail: impl ToString) -> Self {
        Self::new(ProblemKind::InvalidAttribute)
            .with_arg("name", name)
            .with_detail(detail)
    }

    pub fn required_missing(name: impl ToString) -> Self {
        Self::new(ProblemKind::RequiredAttributeMissing).with_arg("name", name)
    }

    pub fn model_error(detail: impl ToString) -> Self {
        Self::new(ProblemKind::ModelError).with_detail(detail)
    }

    pub fn not_found(subject: impl Into<String>) -> Self {
        Self::new(ProblemKind::NotFound).with_subject(subject)
    }

    pub fn bad_request(detail: impl ToString) -> Self {
        Self::new(ProblemKind::BadRequest).with_detail(detail)
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind.code())?;
        if !self.subject.is_empty() {
            write!(f, " ({})", self.subject)?;
        }
        write!(f, ": {}", self.kind.title())?;
        if !self.args.is_empty() {
            let args: Vec<String> = self
                .args
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            write!(f, " [{}]", args.join(", "))?;
        }
        Ok(())
    }
}
