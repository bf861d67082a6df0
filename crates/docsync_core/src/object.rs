//! Object instances and their runtime-typed attribute values.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use docsync_codec::Value;

use crate::document::DocumentId;
use crate::error::{CoreError, CoreResult};
use crate::model::AttributeType;

/// Decimal number kept as validated text.
///
/// Accepts an optional sign, digits with an optional fraction, and an
/// optional exponent. `NaN` and infinities are numeric-domain errors.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Decimal(String);

impl Decimal {
    /// Parses decimal text.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NumericDomain`] for NaN or infinity and
    /// [`CoreError::TypeMismatch`] for anything else that is not a decimal.
    pub fn parse(text: &str) -> CoreResult<Self> {
        let lowered = text.trim_start_matches(['+', '-']).to_ascii_lowercase();
        if matches!(lowered.as_str(), "nan" | "inf" | "infinity") {
            return Err(CoreError::NumericDomain {
                attribute: "decimal".to_string(),
                value: text.to_string(),
            });
        }
        if !is_decimal_text(text) {
            return Err(CoreError::type_mismatch("decimal", "decimal text", text));
        }
        Ok(Self(text.to_string()))
    }

    /// Decimal text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_decimal_text(text: &str) -> bool {
    let body = text.strip_prefix(['+', '-']).unwrap_or(text);
    let (mantissa, exponent) = match body.find(['e', 'E']) {
        Some(i) => (&body[..i], Some(&body[i + 1..])),
        None => (body, None),
    };
    let (int_part, frac_part) = match mantissa.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (mantissa, None),
    };
    let digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    let mantissa_ok = digits(int_part)
        && frac_part.map_or(true, digits)
        && !(int_part.is_empty() && frac_part.map_or(true, str::is_empty));
    let exponent_ok = exponent.map_or(true, |e| {
        let e = e.strip_prefix(['+', '-']).unwrap_or(e);
        !e.is_empty() && digits(e)
    });
    mantissa_ok && exponent_ok
}

impl FromStr for Decimal {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A reference to another object by document identifier.
///
/// A reference decoded while its target was not present locally is a
/// placeholder; it resolves on first access through
/// [`crate::Datastore::resolve_ref`]. Equality, ordering and hashing look
/// only at the target, never at the placeholder flag.
#[derive(Debug, Clone)]
pub struct ObjectRef {
    target: DocumentId,
    entity: String,
    placeholder: bool,
}

impl ObjectRef {
    /// A resolved reference.
    pub fn new(target: DocumentId, entity: impl Into<String>) -> Self {
        Self {
            target,
            entity: entity.into(),
            placeholder: false,
        }
    }

    /// A reference whose target was not found at decode time.
    pub fn placeholder(target: DocumentId, entity: impl Into<String>) -> Self {
        Self {
            target,
            entity: entity.into(),
            placeholder: true,
        }
    }

    /// Target document.
    #[must_use]
    pub fn target(&self) -> &DocumentId {
        &self.target
    }

    /// Target entity name.
    #[must_use]
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Whether the target was missing at decode time.
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.target == other.target && self.entity == other.entity
    }
}

impl Eq for ObjectRef {}

impl PartialOrd for ObjectRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ObjectRef {
    fn cmp(&self, other: &Self) -> Ordering {
        self.target
            .cmp(&other.target)
            .then_with(|| self.entity.cmp(&other.entity))
    }
}

impl Hash for ObjectRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.target.hash(state);
        self.entity.hash(state);
    }
}

/// A runtime-typed attribute or relationship value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    /// Boolean.
    Bool(bool),
    /// 16-bit integer.
    Int16(i16),
    /// 32-bit integer.
    Int32(i32),
    /// 64-bit integer.
    Int64(i64),
    /// Single-precision float.
    Float(f32),
    /// Double-precision float.
    Double(f64),
    /// Decimal.
    Decimal(Decimal),
    /// Text.
    String(String),
    /// Timestamp.
    Date(DateTime<Utc>),
    /// Bytes.
    Binary(Vec<u8>),
    /// Application value for a transformable attribute.
    Transformable(Value),
    /// To-one relationship target.
    Reference(ObjectRef),
    /// To-many relationship targets.
    ReferenceSet(BTreeSet<ObjectRef>),
}

impl AttrValue {
    /// Name of the variant, used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "boolean",
            Self::Int16(_) => "int16",
            Self::Int32(_) => "int32",
            Self::Int64(_) => "int64",
            Self::Float(_) => "float",
            Self::Double(_) => "double",
            Self::Decimal(_) => "decimal",
            Self::String(_) => "string",
            Self::Date(_) => "date",
            Self::Binary(_) => "binary",
            Self::Transformable(_) => "transformable",
            Self::Reference(_) => "reference",
            Self::ReferenceSet(_) => "reference set",
        }
    }

    /// Whether the variant carries a value of attribute type `ty`.
    #[must_use]
    pub fn matches(&self, ty: AttributeType) -> bool {
        matches!(
            (self, ty),
            (Self::Bool(_), AttributeType::Boolean)
                | (Self::Int16(_), AttributeType::Int16)
                | (Self::Int32(_), AttributeType::Int32)
                | (Self::Int64(_), AttributeType::Int64)
                | (Self::Float(_), AttributeType::Float)
                | (Self::Double(_), AttributeType::Double)
                | (Self::Decimal(_), AttributeType::Decimal)
                | (Self::String(_), AttributeType::String)
                | (Self::Date(_), AttributeType::Date)
                | (Self::Binary(_), AttributeType::Binary)
                | (Self::Transformable(_), AttributeType::Transformable)
        )
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i16> for AttrValue {
    fn from(n: i16) -> Self {
        Self::Int16(n)
    }
}

impl From<i32> for AttrValue {
    fn from(n: i32) -> Self {
        Self::Int32(n)
    }
}

impl From<i64> for AttrValue {
    fn from(n: i64) -> Self {
        Self::Int64(n)
    }
}

impl From<f32> for AttrValue {
    fn from(f: f32) -> Self {
        Self::Float(f)
    }
}

impl From<f64> for AttrValue {
    fn from(f: f64) -> Self {
        Self::Double(f)
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<DateTime<Utc>> for AttrValue {
    fn from(d: DateTime<Utc>) -> Self {
        Self::Date(d)
    }
}

impl From<Vec<u8>> for AttrValue {
    fn from(b: Vec<u8>) -> Self {
        Self::Binary(b)
    }
}

impl From<Decimal> for AttrValue {
    fn from(d: Decimal) -> Self {
        Self::Decimal(d)
    }
}

impl From<ObjectRef> for AttrValue {
    fn from(r: ObjectRef) -> Self {
        Self::Reference(r)
    }
}

/// An object: entity name, optional identifier and property values.
///
/// Absent properties are nil. Relationship values are references, never
/// owned objects.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectInstance {
    /// Entity name.
    pub entity: String,
    /// Document identifier, once assigned.
    pub id: Option<DocumentId>,
    /// Property values by name.
    pub values: BTreeMap<String, AttrValue>,
}

impl ObjectInstance {
    /// A new instance without identifier.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            id: None,
            values: BTreeMap::new(),
        }
    }

    /// Sets the identifier.
    #[must_use]
    pub fn with_id(mut self, id: DocumentId) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets a property.
    #[must_use]
    pub fn set(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Sets a property in place.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<AttrValue>) {
        self.values.insert(name.into(), value.into());
    }

    /// Clears a property.
    pub fn remove(&mut self, name: &str) -> Option<AttrValue> {
        self.values.remove(name)
    }

    /// Reads a property.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.values.get(name)
    }

    /// Adds a target to a to-many relationship, creating the set if absent.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TypeMismatch`] if the property holds a
    /// non-set value.
    pub fn add_reference(&mut self, relationship: &str, target: ObjectRef) -> CoreResult<()> {
        match self
            .values
            .entry(relationship.to_string())
            .or_insert_with(|| AttrValue::ReferenceSet(BTreeSet::new()))
        {
            AttrValue::ReferenceSet(set) => {
                set.insert(target);
                Ok(())
            }
            other => Err(CoreError::type_mismatch(
                format!("{}.{relationship}", self.entity),
                "reference set",
                other.type_name(),
            )),
        }
    }

    /// Referenced document ids per relationship property.
    pub fn references(&self) -> impl Iterator<Item = (&str, &ObjectRef)> {
        self.values.iter().flat_map(|(name, value)| {
            let refs: Vec<&ObjectRef> = match value {
                AttrValue::Reference(r) => vec![r],
                AttrValue::ReferenceSet(set) => set.iter().collect(),
                _ => Vec::new(),
            };
            refs.into_iter().map(move |r| (name.as_str(), r))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_validation() {
        for ok in ["0", "-1.50", "+3", ".5", "5.", "1e10", "2.5E-3"] {
            assert!(Decimal::parse(ok).is_ok(), "{ok}");
        }
        for bad in ["", "-", ".", "1.2.3", "abc", "1e", "1e+"] {
            assert!(
                matches!(Decimal::parse(bad), Err(CoreError::TypeMismatch { .. })),
                "{bad}"
            );
        }
        for nan in ["NaN", "-inf", "Infinity"] {
            assert!(matches!(
                Decimal::parse(nan),
                Err(CoreError::NumericDomain { .. })
            ));
        }
    }

    #[test]
    fn placeholder_flag_ignored_by_equality() {
        let id = DocumentId::new("abc");
        let resolved = ObjectRef::new(id.clone(), "File");
        let pending = ObjectRef::placeholder(id, "File");
        assert_eq!(resolved, pending);
        assert!(pending.is_placeholder());

        let mut set = BTreeSet::new();
        set.insert(resolved);
        assert!(!set.insert(pending));
    }

    #[test]
    fn add_reference_builds_set_without_duplicates() {
        let mut entry = ObjectInstance::new("Entry");
        let file = ObjectRef::new(DocumentId::new("f1"), "File");
        entry.add_reference("files", file.clone()).unwrap();
        entry.add_reference("files", file).unwrap();
        match entry.get("files") {
            Some(AttrValue::ReferenceSet(set)) => assert_eq!(set.len(), 1),
            other => panic!("unexpected {other:?}"),
        }

        let mut scalar = ObjectInstance::new("Entry").set("files", 1i32);
        assert!(scalar
            .add_reference("files", ObjectRef::new(DocumentId::new("x"), "File"))
            .is_err());
    }

    #[test]
    fn references_iterates_both_cardinalities() {
        let mut entry = ObjectInstance::new("File").set(
            "entry",
            ObjectRef::new(DocumentId::new("e1"), "Entry"),
        );
        entry
            .add_reference("tags", ObjectRef::new(DocumentId::new("t1"), "Tag"))
            .unwrap();
        let refs: Vec<(&str, &str)> = entry
            .references()
            .map(|(rel, r)| (rel, r.target().as_str()))
            .collect();
        assert_eq!(refs, vec![("entry", "e1"), ("tags", "t1")]);
    }

    #[test]
    fn variant_type_matching() {
        assert!(AttrValue::from(1i16).matches(AttributeType::Int16));
        assert!(!AttrValue::from(1i32).matches(AttributeType::Int64));
        assert!(AttrValue::Transformable(Value::Null).matches(AttributeType::Transformable));
    }
}
