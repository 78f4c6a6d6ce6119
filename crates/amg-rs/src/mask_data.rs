//! Batched per-object storage with uniform filter and concatenate.
//!
//! Every field of a [`MaskData`] is indexed by object along its leading axis.
//! Fields are either rectangular arrays ([`ArrayField`]) or ordered sequences
//! of opaque [`Element`]s; any input is normalized to one of the two at
//! ingestion.

use std::collections::BTreeMap;
use std::ops::Index;

use ndarray::{Array, Array1, ArrayD, ArrayView1, ArrayViewD, Axis, Dimension, IxDyn};
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::{AmgError, AmgResult};
use crate::types::{Element, Rle};

/// Numeric field storage. The leading axis is the object axis.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayField {
    Bool(ArrayD<bool>),
    Int(ArrayD<i64>),
    Float(ArrayD<f32>),
}

/// A single named column of a [`MaskData`].
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Array(ArrayField),
    Sequence(Vec<Element>),
}

/// Which items to retain in [`MaskData::filter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Keep {
    /// One flag per item; must match the item count.
    Mask(Vec<bool>),
    /// Item indices in output order. Repeats are allowed.
    Indices(Vec<usize>),
}

impl Keep {
    /// Resolve to explicit indices against a field of length `len`.
    pub fn resolve(&self, len: usize) -> AmgResult<Vec<usize>> {
        match self {
            Keep::Mask(mask) => {
                if mask.len() != len {
                    return Err(AmgError::LengthMismatch {
                        expected: len,
                        got: mask.len(),
                    });
                }
                Ok(mask
                    .iter()
                    .enumerate()
                    .filter_map(|(i, &k)| k.then_some(i))
                    .collect())
            }
            Keep::Indices(indices) => {
                if let Some(&index) = indices.iter().find(|&&i| i >= len) {
                    return Err(AmgError::IndexOutOfBounds { index, len });
                }
                Ok(indices.clone())
            }
        }
    }
}

impl From<Vec<bool>> for Keep {
    fn from(mask: Vec<bool>) -> Self {
        Keep::Mask(mask)
    }
}

impl From<&[bool]> for Keep {
    fn from(mask: &[bool]) -> Self {
        Keep::Mask(mask.to_vec())
    }
}

impl From<Array1<bool>> for Keep {
    fn from(mask: Array1<bool>) -> Self {
        Keep::Mask(mask.to_vec())
    }
}

impl From<ArrayView1<'_, bool>> for Keep {
    fn from(mask: ArrayView1<'_, bool>) -> Self {
        Keep::Mask(mask.to_vec())
    }
}

impl From<Vec<usize>> for Keep {
    fn from(indices: Vec<usize>) -> Self {
        Keep::Indices(indices)
    }
}

impl From<&[usize]> for Keep {
    fn from(indices: &[usize]) -> Self {
        Keep::Indices(indices.to_vec())
    }
}

fn leading_len<A>(arr: &ArrayD<A>) -> usize {
    arr.shape().first().copied().unwrap_or(0)
}

fn select_rows<A: Clone>(arr: &ArrayD<A>, indices: &[usize]) -> AmgResult<ArrayD<A>> {
    let mut shape = arr.shape().to_vec();
    let Some(first) = shape.first_mut() else {
        return Err(AmgError::InvalidInput("array field has no leading axis"));
    };
    *first = indices.len();
    let mut data = Vec::with_capacity(shape.iter().product());
    for &i in indices {
        data.extend(arr.index_axis(Axis(0), i).iter().cloned());
    }
    Ok(ArrayD::from_shape_vec(IxDyn(&shape), data)?)
}

fn concat_rows<A: Clone>(key: &str, a: &ArrayD<A>, b: &ArrayD<A>) -> AmgResult<ArrayD<A>> {
    if a.ndim() == 0 || b.ndim() == 0 {
        return Err(AmgError::InvalidInput("array field has no leading axis"));
    }
    if a.shape()[1..] != b.shape()[1..] {
        return Err(AmgError::ShapeMismatch {
            key: key.to_string(),
            expected: a.shape()[1..].to_vec(),
            got: b.shape()[1..].to_vec(),
        });
    }
    let mut shape = a.shape().to_vec();
    shape[0] += b.shape()[0];
    let data: Vec<A> = a.iter().chain(b.iter()).cloned().collect();
    Ok(ArrayD::from_shape_vec(IxDyn(&shape), data)?)
}

fn nest<A>(view: ArrayViewD<'_, A>, leaf: &impl Fn(&A) -> Value) -> Value {
    if view.ndim() <= 1 {
        Value::Array(view.iter().map(leaf).collect())
    } else {
        Value::Array(view.outer_iter().map(|row| nest(row, leaf)).collect())
    }
}

#[derive(Clone, Copy, PartialEq)]
enum LeafKind {
    Bool,
    Int,
    Float,
}

/// Shape and leaf kind of a rectangular JSON array of numbers or bools.
fn probe_rectangular(items: &[Value]) -> Option<(Vec<usize>, LeafKind)> {
    let mut shape = vec![items.len()];
    let mut cur = items.first()?;
    while let Value::Array(inner) = cur {
        shape.push(inner.len());
        cur = inner.first()?;
    }

    fn walk(
        value: &Value,
        shape: &[usize],
        kind: &mut Option<LeafKind>,
        has_null: &mut bool,
    ) -> bool {
        match (value, shape.split_first()) {
            (Value::Array(items), Some((&n, rest))) => {
                items.len() == n && items.iter().all(|v| walk(v, rest, kind, has_null))
            }
            (Value::Null, None) => {
                *has_null = true;
                true
            }
            (Value::Bool(_), None) => match kind {
                None => {
                    *kind = Some(LeafKind::Bool);
                    true
                }
                Some(k) => *k == LeafKind::Bool,
            },
            (Value::Number(n), None) => {
                let leaf = if n.is_i64() {
                    LeafKind::Int
                } else {
                    LeafKind::Float
                };
                match kind {
                    None => {
                        *kind = Some(leaf);
                        true
                    }
                    Some(LeafKind::Bool) => false,
                    Some(k) => {
                        if leaf == LeafKind::Float {
                            *k = LeafKind::Float;
                        }
                        true
                    }
                }
            }
            _ => false,
        }
    }

    let mut kind = None;
    let mut has_null = false;
    if !items
        .iter()
        .all(|v| walk(v, &shape[1..], &mut kind, &mut has_null))
    {
        return None;
    }
    // `null` is how a non-finite float serializes; it reads back as NaN.
    match (kind?, has_null) {
        (LeafKind::Bool, true) => None,
        (_, true) => Some((shape, LeafKind::Float)),
        (k, false) => Some((shape, k)),
    }
}

fn flatten_leaves<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
    match value {
        Value::Array(items) => items.iter().for_each(|v| flatten_leaves(v, out)),
        leaf => out.push(leaf),
    }
}

impl Field {
    /// Number of items (leading dimension).
    pub fn len(&self) -> usize {
        match self {
            Field::Array(ArrayField::Bool(a)) => leading_len(a),
            Field::Array(ArrayField::Int(a)) => leading_len(a),
            Field::Array(ArrayField::Float(a)) => leading_len(a),
            Field::Sequence(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short name of the storage kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Field::Array(ArrayField::Bool(_)) => "bool array",
            Field::Array(ArrayField::Int(_)) => "int array",
            Field::Array(ArrayField::Float(_)) => "float array",
            Field::Sequence(_) => "sequence",
        }
    }

    fn ndim(&self) -> usize {
        match self {
            Field::Array(ArrayField::Bool(a)) => a.ndim(),
            Field::Array(ArrayField::Int(a)) => a.ndim(),
            Field::Array(ArrayField::Float(a)) => a.ndim(),
            Field::Sequence(_) => 1,
        }
    }

    /// Gather the items at `indices`, in order, into a new field.
    pub fn select(&self, indices: &[usize]) -> AmgResult<Field> {
        let len = self.len();
        if let Some(&index) = indices.iter().find(|&&i| i >= len) {
            return Err(AmgError::IndexOutOfBounds { index, len });
        }
        Ok(match self {
            Field::Array(ArrayField::Bool(a)) => ArrayField::Bool(select_rows(a, indices)?).into(),
            Field::Array(ArrayField::Int(a)) => ArrayField::Int(select_rows(a, indices)?).into(),
            Field::Array(ArrayField::Float(a)) => ArrayField::Float(select_rows(a, indices)?).into(),
            Field::Sequence(items) => {
                Field::Sequence(indices.iter().map(|&i| items[i].clone()).collect())
            }
        })
    }

    /// Append `other`'s items after this field's items.
    pub fn concat(&self, other: &Field) -> AmgResult<Field> {
        self.concat_keyed("", other)
    }

    fn concat_keyed(&self, key: &str, other: &Field) -> AmgResult<Field> {
        Ok(match (self, other) {
            (Field::Array(ArrayField::Bool(a)), Field::Array(ArrayField::Bool(b))) => {
                ArrayField::Bool(concat_rows(key, a, b)?).into()
            }
            (Field::Array(ArrayField::Int(a)), Field::Array(ArrayField::Int(b))) => {
                ArrayField::Int(concat_rows(key, a, b)?).into()
            }
            (Field::Array(ArrayField::Float(a)), Field::Array(ArrayField::Float(b))) => {
                ArrayField::Float(concat_rows(key, a, b)?).into()
            }
            (Field::Sequence(a), Field::Sequence(b)) => {
                Field::Sequence(a.iter().chain(b.iter()).cloned().collect())
            }
            (a, b) => {
                return Err(AmgError::UnsupportedType {
                    key: key.to_string(),
                    kind: format!("cannot concatenate {} onto {}", b.kind(), a.kind()),
                })
            }
        })
    }

    pub fn as_bool(&self) -> Option<&ArrayD<bool>> {
        match self {
            Field::Array(ArrayField::Bool(a)) => Some(a),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<&ArrayD<i64>> {
        match self {
            Field::Array(ArrayField::Int(a)) => Some(a),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<&ArrayD<f32>> {
        match self {
            Field::Array(ArrayField::Float(a)) => Some(a),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Element]> {
        match self {
            Field::Sequence(items) => Some(items),
            _ => None,
        }
    }

    /// Collect the RLE elements of a sequence field. `None` if this is not a
    /// sequence or any element is not an RLE.
    pub fn as_rles(&self) -> Option<Vec<&Rle>> {
        self.as_sequence()?.iter().map(Element::as_rle).collect()
    }

    /// Normalize a JSON value into a field.
    ///
    /// Rectangular arrays of bools or numbers become array fields (`Bool` when
    /// every leaf is a bool, `Int` when every leaf is an integer, `Float`
    /// otherwise). In a numeric array a `null` leaf reads as NaN. Other arrays
    /// become sequences. Non-array values are rejected.
    pub fn from_json(key: &str, value: Value) -> AmgResult<Field> {
        let items = match value {
            Value::Array(items) => items,
            other => {
                return Err(AmgError::UnsupportedType {
                    key: key.to_string(),
                    kind: json_kind(&other).to_string(),
                })
            }
        };

        if let Some((shape, kind)) = probe_rectangular(&items) {
            let mut leaves = Vec::with_capacity(shape.iter().product());
            items.iter().for_each(|v| flatten_leaves(v, &mut leaves));
            let dim = IxDyn(&shape);
            let field = match kind {
                LeafKind::Bool => ArrayField::Bool(ArrayD::from_shape_vec(
                    dim,
                    leaves.iter().map(|v| v.as_bool().unwrap_or(false)).collect(),
                )?),
                LeafKind::Int => ArrayField::Int(ArrayD::from_shape_vec(
                    dim,
                    leaves.iter().map(|v| v.as_i64().unwrap_or(0)).collect(),
                )?),
                LeafKind::Float => ArrayField::Float(ArrayD::from_shape_vec(
                    dim,
                    leaves
                        .iter()
                        .map(|v| v.as_f64().unwrap_or(f64::NAN) as f32)
                        .collect(),
                )?),
            };
            return Ok(field.into());
        }

        Ok(Field::Sequence(items.into_iter().map(Element::from).collect()))
    }

    /// Nested JSON arrays for array fields, a JSON list for sequences.
    ///
    /// Non-finite floats become `null`, which [`Field::from_json`] reads back
    /// as NaN in a float field.
    pub fn to_json(&self) -> Value {
        match self {
            Field::Array(ArrayField::Bool(a)) => nest(a.view(), &|&v| Value::from(v)),
            Field::Array(ArrayField::Int(a)) => nest(a.view(), &|&v| Value::from(v)),
            Field::Array(ArrayField::Float(a)) => nest(a.view(), &|&v| Value::from(v)),
            Field::Sequence(items) => Value::Array(items.iter().map(Element::to_json).collect()),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl From<ArrayField> for Field {
    fn from(a: ArrayField) -> Self {
        Field::Array(a)
    }
}

impl<D: Dimension> From<Array<bool, D>> for Field {
    fn from(a: Array<bool, D>) -> Self {
        ArrayField::Bool(a.into_dyn()).into()
    }
}

impl<D: Dimension> From<Array<i64, D>> for Field {
    fn from(a: Array<i64, D>) -> Self {
        ArrayField::Int(a.into_dyn()).into()
    }
}

impl<D: Dimension> From<Array<f32, D>> for Field {
    fn from(a: Array<f32, D>) -> Self {
        ArrayField::Float(a.into_dyn()).into()
    }
}

impl From<Vec<Element>> for Field {
    fn from(items: Vec<Element>) -> Self {
        Field::Sequence(items)
    }
}

impl From<Vec<Rle>> for Field {
    fn from(rles: Vec<Rle>) -> Self {
        Field::Sequence(rles.into_iter().map(Element::Rle).collect())
    }
}

/// Named per-object fields sharing one leading length.
///
/// The shared length is not checked on every mutation; [`MaskData::validate`]
/// checks it and [`MaskData::filter`] requires it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaskData {
    stats: BTreeMap<String, Field>,
}

impl MaskData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from initial named fields.
    pub fn from_fields<K, F, I>(fields: I) -> AmgResult<Self>
    where
        K: Into<String>,
        F: Into<Field>,
        I: IntoIterator<Item = (K, F)>,
    {
        let mut data = Self::new();
        for (key, field) in fields {
            data.insert(key, field)?;
        }
        Ok(data)
    }

    /// Build from a JSON object mapping field names to values.
    pub fn from_json(value: Value) -> AmgResult<Self> {
        let map = match value {
            Value::Object(map) => map,
            other => {
                return Err(AmgError::UnsupportedType {
                    key: String::new(),
                    kind: format!("expected an object of fields, got {}", json_kind(&other)),
                })
            }
        };
        let mut data = Self::new();
        for (key, v) in map {
            data.insert_json(key, v)?;
        }
        Ok(data)
    }

    /// Set a field, returning the previous value.
    ///
    /// A key keeps the kind it was first assigned with; zero-dimensional arrays
    /// are rejected.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        field: impl Into<Field>,
    ) -> AmgResult<Option<Field>> {
        let key = key.into();
        let field = field.into();
        if field.ndim() == 0 {
            return Err(AmgError::UnsupportedType {
                key,
                kind: "zero-dimensional array".to_string(),
            });
        }
        if let Some(existing) = self.stats.get(&key) {
            if existing.kind() != field.kind() {
                return Err(AmgError::UnsupportedType {
                    kind: format!("field holds a {}, got a {}", existing.kind(), field.kind()),
                    key,
                });
            }
        }
        Ok(self.stats.insert(key, field))
    }

    /// Normalize a JSON value with [`Field::from_json`] and insert it.
    pub fn insert_json(
        &mut self,
        key: impl Into<String>,
        value: Value,
    ) -> AmgResult<Option<Field>> {
        let key = key.into();
        let field = Field::from_json(&key, value)?;
        self.insert(key, field)
    }

    pub fn remove(&mut self, key: &str) -> Option<Field> {
        self.stats.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&Field> {
        self.stats.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.stats.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.stats.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Field)> {
        self.stats.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn num_fields(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    /// Check that every field has the same leading length and return it
    /// (0 for an empty container).
    pub fn validate(&self) -> AmgResult<usize> {
        let mut lens = self.stats.values().map(Field::len);
        let Some(expected) = lens.next() else {
            return Ok(0);
        };
        match lens.find(|&got| got != expected) {
            Some(got) => Err(AmgError::LengthMismatch { expected, got }),
            None => Ok(expected),
        }
    }

    /// Keep the selected items in every field.
    ///
    /// Either all fields are filtered or, on error, none are. Filtering a
    /// container with no fields does nothing.
    pub fn filter(&mut self, keep: impl Into<Keep>) -> AmgResult<()> {
        if self.stats.is_empty() {
            return Ok(());
        }
        let keep = keep.into();
        let n = self.validate()?;
        let indices = keep.resolve(n)?;

        let mut filtered = BTreeMap::new();
        for (key, field) in &self.stats {
            trace!(key = key.as_str(), kind = field.kind(), "filtering field");
            filtered.insert(key.clone(), field.select(&indices)?);
        }
        debug!(
            fields = filtered.len(),
            before = n,
            after = indices.len(),
            "filtered mask data"
        );
        self.stats = filtered;
        Ok(())
    }

    /// Append `other`'s items field by field.
    ///
    /// Fields missing here are copied in from `other`. Either every field is
    /// updated or, on error, none are.
    pub fn cat(&mut self, other: &MaskData) -> AmgResult<()> {
        let mut merged = Vec::with_capacity(other.stats.len());
        for (key, field) in &other.stats {
            let next = match self.stats.get(key) {
                None => field.clone(),
                Some(current) => current.concat_keyed(key, field)?,
            };
            merged.push((key.clone(), next));
        }
        debug!(
            fields = merged.len(),
            added = other.validate().unwrap_or(0),
            "concatenated mask data"
        );
        self.stats.extend(merged);
        Ok(())
    }

    /// JSON object with one entry per field.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.stats
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

impl Index<&str> for MaskData {
    type Output = Field;

    /// Panics if `key` is not present.
    fn index(&self, key: &str) -> &Field {
        match self.stats.get(key) {
            Some(field) => field,
            None => panic!("MaskData has no field '{key}'"),
        }
    }
}
