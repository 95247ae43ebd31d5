//! Host-side tensor data
//!
//! [`HostData`] is the closed set of host containers that can be copied into a
//! native tensor. [`Element`] is the matching set of types a tensor can be
//! decoded into.

use libc::c_void;

use crate::error::{Error, Result};
use crate::types::ElementType;

/// Borrowed host buffer of one supported element kind
#[derive(Debug, Clone, Copy)]
pub enum HostData<'a> {
    F32(&'a [f32]),
    F64(&'a [f64]),
    I8(&'a [i8]),
    I16(&'a [i16]),
    I32(&'a [i32]),
    I64(&'a [i64]),
    U8(&'a [u8]),
    U16(&'a [u16]),
    U32(&'a [u32]),
    U64(&'a [u64]),
    /// Raw IEEE half bit patterns
    F16(&'a [u16]),
    /// Raw bfloat16 bit patterns
    BF16(&'a [u16]),
}

impl<'a> HostData<'a> {
    /// Element type the container maps to natively
    pub fn element_type(&self) -> ElementType {
        match self {
            HostData::F32(_) => ElementType::F32,
            HostData::F64(_) => ElementType::F64,
            HostData::I8(_) => ElementType::I8,
            HostData::I16(_) => ElementType::I16,
            HostData::I32(_) => ElementType::I32,
            HostData::I64(_) => ElementType::I64,
            HostData::U8(_) => ElementType::U8,
            HostData::U16(_) => ElementType::U16,
            HostData::U32(_) => ElementType::U32,
            HostData::U64(_) => ElementType::U64,
            HostData::F16(_) => ElementType::F16,
            HostData::BF16(_) => ElementType::BF16,
        }
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        match self {
            HostData::F32(d) => d.len(),
            HostData::F64(d) => d.len(),
            HostData::I8(d) => d.len(),
            HostData::I16(d) => d.len(),
            HostData::I32(d) => d.len(),
            HostData::I64(d) => d.len(),
            HostData::U8(d) => d.len(),
            HostData::U16(d) | HostData::F16(d) | HostData::BF16(d) => d.len(),
            HostData::U32(d) => d.len(),
            HostData::U64(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn as_ptr(&self) -> *const c_void {
        match self {
            HostData::F32(d) => d.as_ptr() as *const c_void,
            HostData::F64(d) => d.as_ptr() as *const c_void,
            HostData::I8(d) => d.as_ptr() as *const c_void,
            HostData::I16(d) => d.as_ptr() as *const c_void,
            HostData::I32(d) => d.as_ptr() as *const c_void,
            HostData::I64(d) => d.as_ptr() as *const c_void,
            HostData::U8(d) => d.as_ptr() as *const c_void,
            HostData::U16(d) | HostData::F16(d) | HostData::BF16(d) => d.as_ptr() as *const c_void,
            HostData::U32(d) => d.as_ptr() as *const c_void,
            HostData::U64(d) => d.as_ptr() as *const c_void,
        }
    }

    /// Whether this container can carry elements of `element_type`.
    ///
    /// `u16` buffers also carry half and bfloat16 bit patterns.
    pub fn accepts(&self, element_type: ElementType) -> bool {
        match self {
            HostData::U16(_) | HostData::F16(_) | HostData::BF16(_) => matches!(
                element_type,
                ElementType::U16 | ElementType::F16 | ElementType::BF16
            ),
            other => other.element_type() == element_type,
        }
    }

    /// Check the container against a requested element type and element count.
    pub(crate) fn check(&self, element_type: ElementType, expected_len: usize) -> Result<()> {
        if !self.accepts(element_type) {
            return Err(Error::UnsupportedType(format!(
                "{} host data cannot be bound as {}",
                self.element_type(),
                element_type
            )));
        }
        if self.len() != expected_len {
            return Err(Error::InvalidTensor {
                message: format!(
                    "data holds {} elements, shape requires {}",
                    self.len(),
                    expected_len
                ),
                code: None,
            });
        }
        Ok(())
    }
}

macro_rules! host_data_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl<'a> From<&'a [$ty]> for HostData<'a> {
                fn from(data: &'a [$ty]) -> Self {
                    HostData::$variant(data)
                }
            }

            impl<'a> From<&'a Vec<$ty>> for HostData<'a> {
                fn from(data: &'a Vec<$ty>) -> Self {
                    HostData::$variant(data.as_slice())
                }
            }

            impl<'a, const N: usize> From<&'a [$ty; N]> for HostData<'a> {
                fn from(data: &'a [$ty; N]) -> Self {
                    HostData::$variant(data.as_slice())
                }
            }
        )*
    };
}

host_data_from! {
    f32 => F32,
    f64 => F64,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
}

mod sealed {
    pub trait Sealed {}
}

/// Host element type a tensor can be decoded into
pub trait Element: sealed::Sealed + Copy + Default + Send + 'static {
    /// Native element types whose bytes decode as `Self`
    const ELEMENT_TYPES: &'static [ElementType];
}

macro_rules! element {
    ($($ty:ty => [$($et:ident),+]),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}
            impl Element for $ty {
                const ELEMENT_TYPES: &'static [ElementType] = &[$(ElementType::$et),+];
            }
        )*
    };
}

element! {
    f32 => [F32],
    f64 => [F64],
    i8 => [I8],
    i16 => [I16],
    i32 => [I32],
    i64 => [I64],
    u8 => [U8],
    u16 => [U16, F16, BF16],
    u32 => [U32],
    u64 => [U64],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_data_mapping() {
        let data = [1.0f32, 2.0, 3.0, 4.0];
        let host = HostData::from(&data);
        assert_eq!(host.element_type(), ElementType::F32);
        assert_eq!(host.len(), 4);
        assert!(host.accepts(ElementType::F32));
        assert!(!host.accepts(ElementType::F64));

        let ids = vec![10i64, 20, 30, 40];
        assert_eq!(HostData::from(&ids).element_type(), ElementType::I64);
    }

    #[test]
    fn test_half_containers() {
        let bits = [0x3c00u16, 0x4000];
        assert!(HostData::F16(&bits).accepts(ElementType::F16));
        assert!(HostData::from(&bits).accepts(ElementType::BF16));
        assert!(!HostData::from(&bits).accepts(ElementType::I16));
    }

    #[test]
    fn test_check() {
        let data = [1u8, 2, 3];
        let host = HostData::from(&data);
        assert!(host.check(ElementType::U8, 3).is_ok());
        assert!(matches!(
            host.check(ElementType::I8, 3),
            Err(Error::UnsupportedType(_))
        ));
        assert!(matches!(
            host.check(ElementType::U8, 4),
            Err(Error::InvalidTensor { .. })
        ));
    }

    #[test]
    fn test_element_types() {
        assert_eq!(<f32 as Element>::ELEMENT_TYPES, &[ElementType::F32]);
        assert!(<u16 as Element>::ELEMENT_TYPES.contains(&ElementType::BF16));
    }
}
