//! Element types, shapes and port metadata

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Native tensor element type. Discriminants are the wire codes shared with
/// the C wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i32)]
pub enum ElementType {
    F32 = 0,
    I64 = 1,
    I32 = 2,
    U8 = 3,
    F64 = 4,
    I8 = 5,
    U16 = 6,
    I16 = 7,
    U32 = 8,
    U64 = 9,
    /// IEEE half precision, carried in `u16` host containers
    F16 = 10,
    /// bfloat16, carried in `u16` host containers
    BF16 = 11,
}

impl ElementType {
    pub const ALL: [ElementType; 12] = [
        ElementType::F32,
        ElementType::I64,
        ElementType::I32,
        ElementType::U8,
        ElementType::F64,
        ElementType::I8,
        ElementType::U16,
        ElementType::I16,
        ElementType::U32,
        ElementType::U64,
        ElementType::F16,
        ElementType::BF16,
    ];

    /// Size of one element in bytes
    pub fn size(&self) -> usize {
        match self {
            ElementType::U8 | ElementType::I8 => 1,
            ElementType::U16 | ElementType::I16 | ElementType::F16 | ElementType::BF16 => 2,
            ElementType::F32 | ElementType::I32 | ElementType::U32 => 4,
            ElementType::F64 | ElementType::I64 | ElementType::U64 => 8,
        }
    }

    pub fn code(&self) -> i32 {
        *self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.code() == code)
    }

    pub fn is_float(&self) -> bool {
        matches!(
            self,
            ElementType::F32 | ElementType::F64 | ElementType::F16 | ElementType::BF16
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ElementType::F32 => "f32",
            ElementType::I64 => "i64",
            ElementType::I32 => "i32",
            ElementType::U8 => "u8",
            ElementType::F64 => "f64",
            ElementType::I8 => "i8",
            ElementType::U16 => "u16",
            ElementType::I16 => "i16",
            ElementType::U32 => "u32",
            ElementType::U64 => "u64",
            ElementType::F16 => "f16",
            ElementType::BF16 => "bf16",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One axis of a declared port shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dim {
    Fixed(usize),
    Dynamic,
}

impl Dim {
    /// Native port metadata marks unbound axes with a non-positive placeholder.
    pub fn from_native(d: i32) -> Self {
        if d > 0 {
            Dim::Fixed(d as usize)
        } else {
            Dim::Dynamic
        }
    }

    pub fn fixed(&self) -> Option<usize> {
        match self {
            Dim::Fixed(n) => Some(*n),
            Dim::Dynamic => None,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, Dim::Dynamic)
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Fixed(n) => write!(f, "{}", n),
            Dim::Dynamic => f.write_str("?"),
        }
    }
}

/// Declared shape of a port, possibly with dynamic axes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartialShape(Vec<Dim>);

impl PartialShape {
    pub fn new(dims: Vec<Dim>) -> Self {
        Self(dims)
    }

    pub(crate) fn from_native(dims: &[i32]) -> Self {
        Self(dims.iter().map(|&d| Dim::from_native(d)).collect())
    }

    pub fn dims(&self) -> &[Dim] {
        &self.0
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn is_static(&self) -> bool {
        self.0.iter().all(|d| !d.is_dynamic())
    }

    /// The concrete shape, if no axis is dynamic
    pub fn to_shape(&self) -> Option<Shape> {
        self.0
            .iter()
            .map(Dim::fixed)
            .collect::<Option<Vec<_>>>()
            .map(Shape::new)
    }

    /// Resolve dynamic axes with an explicit policy.
    pub fn resolve(&self, policy: &DynamicDimPolicy) -> Result<Shape> {
        policy.resolve(self)
    }
}

impl fmt::Display for PartialShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", d)?;
        }
        f.write_str("]")
    }
}

impl From<&Shape> for PartialShape {
    fn from(shape: &Shape) -> Self {
        Self(shape.dims().iter().map(|&d| Dim::Fixed(d)).collect())
    }
}

/// Concrete tensor shape, most-significant axis first
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Shape(Vec<usize>);

impl Shape {
    pub fn new(dims: Vec<usize>) -> Self {
        Self(dims)
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Product of all dimensions (1 for a scalar). Fails when the product
    /// does not fit in `usize`.
    pub fn element_count(&self) -> Result<usize> {
        if self.0.contains(&0) {
            return Ok(0);
        }
        self.0
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| self.overflow())
    }

    pub fn byte_size(&self, element_type: ElementType) -> Result<usize> {
        self.element_count()?
            .checked_mul(element_type.size())
            .ok_or_else(|| self.overflow())
    }

    fn overflow(&self) -> Error {
        Error::InvalidArgument(format!("shape {} overflows the addressable size", self))
    }

    pub(crate) fn to_native(&self) -> Result<Vec<i32>> {
        self.0
            .iter()
            .map(|&d| {
                i32::try_from(d).map_err(|_| {
                    Error::InvalidArgument(format!("dimension {} exceeds the native range", d))
                })
            })
            .collect()
    }

    pub(crate) fn from_native(dims: &[i32]) -> Self {
        Self(dims.iter().map(|&d| d.max(0) as usize).collect())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Self(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Self(dims.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Self(dims.to_vec())
    }
}

/// Static metadata of one model input or output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    pub name: String,
    pub shape: PartialShape,
    pub element_type: ElementType,
}

/// Addresses a port by name or by declaration index
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortRef {
    Name(String),
    Index(usize),
}

impl From<&str> for PortRef {
    fn from(name: &str) -> Self {
        PortRef::Name(name.to_string())
    }
}

impl From<String> for PortRef {
    fn from(name: String) -> Self {
        PortRef::Name(name)
    }
}

impl From<&String> for PortRef {
    fn from(name: &String) -> Self {
        PortRef::Name(name.clone())
    }
}

impl From<usize> for PortRef {
    fn from(index: usize) -> Self {
        PortRef::Index(index)
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortRef::Name(name) => write!(f, "'{}'", name),
            PortRef::Index(i) => write!(f, "#{}", i),
        }
    }
}

/// How dynamic axes are made concrete before a tensor is built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicDimPolicy {
    /// Size used for a dynamic axis 0
    pub batch: usize,
    /// Size used for any other dynamic axis
    pub default_dim: usize,
    /// Per-axis sizes, taking precedence over the two above
    pub overrides: BTreeMap<usize, usize>,
}

impl Default for DynamicDimPolicy {
    fn default() -> Self {
        Self {
            batch: 1,
            default_dim: 1,
            overrides: BTreeMap::new(),
        }
    }
}

impl DynamicDimPolicy {
    pub fn new(batch: usize, default_dim: usize) -> Self {
        Self {
            batch,
            default_dim,
            overrides: BTreeMap::new(),
        }
    }

    /// Batch of one, every other dynamic axis set to `len` (token sequences)
    pub fn sequence(len: usize) -> Self {
        Self::new(1, len)
    }

    pub fn with_axis(mut self, axis: usize, size: usize) -> Self {
        self.overrides.insert(axis, size);
        self
    }

    pub fn resolve(&self, shape: &PartialShape) -> Result<Shape> {
        shape
            .dims()
            .iter()
            .enumerate()
            .map(|(axis, dim)| {
                let size = match dim {
                    Dim::Fixed(n) => return Ok(*n),
                    Dim::Dynamic => match self.overrides.get(&axis) {
                        Some(&n) => n,
                        None if axis == 0 => self.batch,
                        None => self.default_dim,
                    },
                };
                if size == 0 {
                    return Err(Error::InvalidArgument(format!(
                        "dynamic axis {} of {} resolves to zero",
                        axis, shape
                    )));
                }
                Ok(size)
            })
            .collect::<Result<Vec<_>>>()
            .map(Shape::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_element_type_codes() {
        for t in ElementType::ALL {
            assert_eq!(ElementType::from_code(t.code()), Some(t));
        }
        assert_eq!(ElementType::F32.code(), 0);
        assert_eq!(ElementType::BF16.code(), 11);
        assert_eq!(ElementType::from_code(42), None);
        assert_eq!(ElementType::I64.size(), 8);
        assert_eq!(ElementType::F16.size(), 2);
    }

    #[test]
    fn test_element_type_serde() {
        let t: ElementType = serde_json::from_str("\"bf16\"").unwrap();
        assert_eq!(t, ElementType::BF16);
        assert_eq!(serde_json::to_string(&ElementType::U8).unwrap(), "\"u8\"");
    }

    #[test]
    fn test_partial_shape() {
        let shape = PartialShape::from_native(&[-1, 3, 224, 224]);
        assert!(!shape.is_static());
        assert_eq!(shape.to_string(), "[?,3,224,224]");
        assert_eq!(shape.to_shape(), None);

        let fixed = PartialShape::from_native(&[1, 1000]);
        assert_eq!(fixed.to_shape(), Some(Shape::from([1, 1000])));
    }

    #[test]
    fn test_shape_counts() {
        let shape = Shape::from([1, 3, 224, 224]);
        assert_eq!(shape.element_count().unwrap(), 150_528);
        assert_eq!(shape.byte_size(ElementType::F32).unwrap(), 602_112);
        assert_eq!(Shape::default().element_count().unwrap(), 1);
    }

    #[test]
    fn test_shape_count_overflow() {
        let huge = Shape::from([1usize << 32, 1usize << 32]);
        assert!(matches!(huge.element_count(), Err(Error::InvalidArgument(_))));

        let bytes = Shape::from([usize::MAX / 2]);
        assert_eq!(bytes.element_count().unwrap(), usize::MAX / 2);
        assert!(matches!(
            bytes.byte_size(ElementType::F64),
            Err(Error::InvalidArgument(_))
        ));

        let empty = Shape::from([0, usize::MAX, usize::MAX]);
        assert_eq!(empty.element_count().unwrap(), 0);
        assert_eq!(empty.byte_size(ElementType::F32).unwrap(), 0);
    }

    #[test]
    fn test_policy_resolution() {
        let shape = PartialShape::from_native(&[-1, -1, 768]);
        let resolved = DynamicDimPolicy::sequence(128).resolve(&shape).unwrap();
        assert_eq!(resolved, Shape::from([1, 128, 768]));

        let policy = DynamicDimPolicy::new(4, 16).with_axis(1, 32);
        assert_eq!(policy.resolve(&shape).unwrap(), Shape::from([4, 32, 768]));

        let zero = DynamicDimPolicy::new(0, 1);
        assert!(matches!(
            zero.resolve(&shape),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_policy_from_config() {
        let policy: DynamicDimPolicy =
            serde_json::from_str(r#"{ "batch": 2, "overrides": { "1": 64 } }"#).unwrap();
        assert_eq!(policy.batch, 2);
        assert_eq!(policy.default_dim, 1);
        assert_eq!(policy.overrides.get(&1), Some(&64));
    }

    proptest! {
        #[test]
        fn prop_static_shapes_resolve_unchanged(dims in prop::collection::vec(1usize..64, 0..5)) {
            let shape = Shape::new(dims);
            let partial = PartialShape::from(&shape);
            prop_assert_eq!(DynamicDimPolicy::default().resolve(&partial).unwrap(), shape);
        }

        #[test]
        fn prop_resolved_shapes_are_concrete(
            raw in prop::collection::vec(-1i32..32, 1..6),
            batch in 1usize..8,
            default_dim in 1usize..8,
        ) {
            let partial = PartialShape::from_native(&raw);
            let resolved = DynamicDimPolicy::new(batch, default_dim).resolve(&partial).unwrap();
            prop_assert_eq!(resolved.rank(), raw.len());
            for (axis, (&r, &d)) in raw.iter().zip(resolved.dims()).enumerate() {
                if r > 0 {
                    prop_assert_eq!(d, r as usize);
                } else if axis == 0 {
                    prop_assert_eq!(d, batch);
                } else {
                    prop_assert_eq!(d, default_dim);
                }
            }
            prop_assert_eq!(resolved.element_count().unwrap(), resolved.dims().iter().product::<usize>());
        }
    }
}
