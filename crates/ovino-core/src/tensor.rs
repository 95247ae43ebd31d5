//! Native tensors
//!
//! A [`Tensor`] owns one native buffer. Data is copied in at construction and
//! copied out on every decode; no interior pointer is ever handed out.

use std::mem;
use std::ptr;
use std::sync::Arc;

use libc::c_void;
use tracing::debug;

use crate::data::{Element, HostData};
use crate::error::{Error, ErrorSlot, Result};
use crate::ffi;
use crate::handle::{self, HandleKind, NativeHandle};
use crate::types::{ElementType, Shape};

/// Typed, shaped native buffer
#[derive(Default)]
pub struct Tensor {
    handle: Option<Arc<NativeHandle>>,
}

impl Tensor {
    /// Allocate a zero-initialized tensor.
    pub fn new(element_type: ElementType, shape: impl Into<Shape>) -> Result<Self> {
        let shape = shape.into();
        shape.byte_size(element_type)?;
        let dims = shape.to_native()?;
        let mut err = ErrorSlot::new();
        let ptr = unsafe {
            ffi::openvino_tensor_new(
                element_type.code(),
                dims.as_ptr(),
                dims.len() as i32,
                err.as_mut_ptr(),
            )
        };
        let ptr = err.pointer(ptr, "create tensor").map_err(Error::tensor)?;
        Self::from_raw(ptr, None)
    }

    /// Allocate a tensor and copy `data` into it.
    ///
    /// The host container must match `element_type` (`u16` containers carry
    /// `U16`, `F16` and `BF16`) and hold exactly `shape.element_count()` elements.
    /// Shapes whose byte size overflows `usize` are rejected up front.
    pub fn new_with_data<'a>(
        element_type: ElementType,
        shape: impl Into<Shape>,
        data: impl Into<HostData<'a>>,
    ) -> Result<Self> {
        let shape = shape.into();
        let data = data.into();
        shape.byte_size(element_type)?;
        data.check(element_type, shape.element_count()?)?;
        let dims = shape.to_native()?;
        let mut err = ErrorSlot::new();
        let ptr = unsafe {
            ffi::openvino_tensor_new_with_data(
                element_type.code(),
                dims.as_ptr(),
                dims.len() as i32,
                data.as_ptr(),
                err.as_mut_ptr(),
            )
        };
        let ptr = err.pointer(ptr, "create tensor").map_err(Error::tensor)?;
        Self::from_raw(ptr, None)
    }

    /// Allocate a tensor whose element type follows the host container.
    pub fn from_data<'a>(shape: impl Into<Shape>, data: impl Into<HostData<'a>>) -> Result<Self> {
        let data = data.into();
        Self::new_with_data(data.element_type(), shape, data)
    }

    pub(crate) fn from_raw(ptr: *mut c_void, parent: Option<Arc<NativeHandle>>) -> Result<Self> {
        Ok(Self {
            handle: Some(handle::own(ptr, HandleKind::Tensor, parent)?),
        })
    }

    pub(crate) fn raw(&self) -> Result<*mut c_void> {
        handle::live(&self.handle, HandleKind::Tensor)
    }

    /// Current shape, most-significant axis first
    pub fn shape(&self) -> Result<Shape> {
        let raw = self.raw()?;
        let mut rank = 0i32;
        let mut err = ErrorSlot::new();
        let dims = unsafe { ffi::openvino_tensor_get_shape(raw, &mut rank, err.as_mut_ptr()) };
        err.checked("get tensor shape").map_err(Error::tensor)?;
        if dims.is_null() || rank <= 0 {
            return Ok(Shape::default());
        }
        let shape = Shape::from_native(unsafe { std::slice::from_raw_parts(dims, rank as usize) });
        unsafe { ffi::openvino_tensor_free_shape(dims, rank) };
        Ok(shape)
    }

    /// Reshape in place. The native side rejects shapes whose element count
    /// differs from the current one; the buffer is untouched on failure.
    pub fn set_shape(&mut self, shape: impl Into<Shape>) -> Result<()> {
        let raw = self.raw()?;
        let shape = shape.into();
        let dims = shape.to_native()?;
        let mut err = ErrorSlot::new();
        let ret = unsafe {
            ffi::openvino_tensor_set_shape(raw, dims.as_ptr(), dims.len() as i32, err.as_mut_ptr())
        };
        err.status(ret, "set tensor shape").map_err(Error::tensor)?;
        debug!(shape = %shape, "tensor reshaped");
        Ok(())
    }

    /// Total element count
    pub fn size(&self) -> Result<usize> {
        let raw = self.raw()?;
        let mut err = ErrorSlot::new();
        let size = unsafe { ffi::openvino_tensor_get_size(raw, err.as_mut_ptr()) };
        err.checked("get tensor size").map_err(Error::tensor)?;
        Ok(size.max(0) as usize)
    }

    /// Total size in bytes
    pub fn byte_size(&self) -> Result<usize> {
        let raw = self.raw()?;
        let mut err = ErrorSlot::new();
        let size = unsafe { ffi::openvino_tensor_get_byte_size(raw, err.as_mut_ptr()) };
        err.checked("get tensor byte size").map_err(Error::tensor)?;
        Ok(size.max(0) as usize)
    }

    pub fn element_type(&self) -> Result<ElementType> {
        let raw = self.raw()?;
        let mut err = ErrorSlot::new();
        let code = unsafe { ffi::openvino_tensor_get_element_type(raw, err.as_mut_ptr()) };
        err.checked("get tensor element type").map_err(Error::tensor)?;
        ElementType::from_code(code)
            .ok_or_else(|| Error::UnsupportedType(format!("native element type code {}", code)))
    }

    /// Decoded copy of the buffer.
    ///
    /// Fails with `UnsupportedType` when `T` does not match the tensor's
    /// element type; use [`Tensor::raw_bytes`] to reinterpret deliberately.
    pub fn data<T: Element>(&self) -> Result<Vec<T>> {
        let element_type = self.element_type()?;
        if !T::ELEMENT_TYPES.contains(&element_type) {
            return Err(Error::UnsupportedType(format!(
                "tensor holds {} elements, cannot decode as {}",
                element_type,
                std::any::type_name::<T>()
            )));
        }
        let len = self.size()?;
        let mut out = vec![T::default(); len];
        let copied = self.read_into(out.as_mut_ptr() as *mut c_void, len * mem::size_of::<T>())?;
        out.truncate(copied / mem::size_of::<T>());
        Ok(out)
    }

    /// Copy of the raw buffer bytes, in native byte order
    pub fn raw_bytes(&self) -> Result<Vec<u8>> {
        let len = self.byte_size()?;
        let mut out = vec![0u8; len];
        let copied = self.read_into(out.as_mut_ptr() as *mut c_void, len)?;
        out.truncate(copied);
        Ok(out)
    }

    pub fn data_as_f32(&self) -> Result<Vec<f32>> {
        self.data()
    }

    pub fn data_as_f64(&self) -> Result<Vec<f64>> {
        self.data()
    }

    pub fn data_as_i8(&self) -> Result<Vec<i8>> {
        self.data()
    }

    pub fn data_as_i16(&self) -> Result<Vec<i16>> {
        self.data()
    }

    pub fn data_as_i32(&self) -> Result<Vec<i32>> {
        self.data()
    }

    pub fn data_as_i64(&self) -> Result<Vec<i64>> {
        self.data()
    }

    pub fn data_as_u8(&self) -> Result<Vec<u8>> {
        self.data()
    }

    /// Also returns the bit patterns of `F16` and `BF16` tensors.
    pub fn data_as_u16(&self) -> Result<Vec<u16>> {
        self.data()
    }

    pub fn data_as_u32(&self) -> Result<Vec<u32>> {
        self.data()
    }

    pub fn data_as_u64(&self) -> Result<Vec<u64>> {
        self.data()
    }

    fn read_into(&self, dst: *mut c_void, capacity: usize) -> Result<usize> {
        let raw = self.raw()?;
        let dst = if capacity == 0 { ptr::null_mut() } else { dst };
        let mut err = ErrorSlot::new();
        let copied =
            unsafe { ffi::openvino_tensor_read_data(raw, dst, capacity as i64, err.as_mut_ptr()) };
        err.checked("read tensor data").map_err(Error::tensor)?;
        if copied < 0 {
            return Err(Error::InvalidTensor {
                message: "tensor data could not be read".to_string(),
                code: None,
            });
        }
        Ok(copied as usize)
    }

    /// Release the native buffer. Safe to call repeatedly.
    pub fn destroy(&mut self) {
        self.handle = None;
    }

    pub fn is_released(&self) -> bool {
        self.handle.is_none()
    }
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("Tensor");
        match (self.element_type(), self.shape()) {
            (Ok(element_type), Ok(shape)) => s
                .field("element_type", &element_type)
                .field("shape", &shape.dims()),
            _ => s.field("released", &self.is_released()),
        }
        .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::status;

    #[test]
    fn test_round_trip_f32() {
        let t = Tensor::new_with_data(ElementType::F32, [1, 4], &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(t.data_as_f32().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(t.shape().unwrap(), Shape::from([1, 4]));
    }

    #[test]
    fn test_round_trip_i64() {
        let t = Tensor::new_with_data(ElementType::I64, [1, 4], &[10i64, 20, 30, 40]).unwrap();
        assert_eq!(t.data_as_i64().unwrap(), vec![10, 20, 30, 40]);
        assert_eq!(t.element_type().unwrap(), ElementType::I64);
    }

    #[test]
    fn test_every_container_round_trips() {
        let t = Tensor::from_data([3], &[-1i8, 0, 1]).unwrap();
        assert_eq!(t.data_as_i8().unwrap(), vec![-1, 0, 1]);
        let t = Tensor::from_data([2], &[u64::MAX, 7]).unwrap();
        assert_eq!(t.data_as_u64().unwrap(), vec![u64::MAX, 7]);
        let t = Tensor::from_data([2], &[0.25f64, -8.5]).unwrap();
        assert_eq!(t.data_as_f64().unwrap(), vec![0.25, -8.5]);
        let t = Tensor::from_data([2, 1], &[i16::MIN, 3]).unwrap();
        assert_eq!(t.data_as_i16().unwrap(), vec![i16::MIN, 3]);
        let t = Tensor::from_data([1], &[u32::MAX]).unwrap();
        assert_eq!(t.data_as_u32().unwrap(), vec![u32::MAX]);
        let t = Tensor::from_data([2], &[7i32, -7]).unwrap();
        assert_eq!(t.data_as_i32().unwrap(), vec![7, -7]);
        let t = Tensor::from_data([4], &[0u8, 127, 128, 255]).unwrap();
        assert_eq!(t.data_as_u8().unwrap(), vec![0, 127, 128, 255]);
    }

    #[test]
    fn test_half_precision_bits() {
        let bits = [0x3c00u16, 0xc000];
        let t = Tensor::new_with_data(ElementType::F16, [2], HostData::F16(&bits)).unwrap();
        assert_eq!(t.element_type().unwrap(), ElementType::F16);
        assert_eq!(t.byte_size().unwrap(), 4);
        assert_eq!(t.data_as_u16().unwrap(), bits.to_vec());
    }

    #[test]
    fn test_size_invariant() {
        let t = Tensor::new(ElementType::F32, [1, 3, 224, 224]).unwrap();
        assert_eq!(t.size().unwrap(), 3 * 224 * 224);
        assert_eq!(t.byte_size().unwrap(), t.size().unwrap() * 4);
        assert!(t.data_as_f32().unwrap().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_reshape() {
        let mut t = Tensor::from_data([1, 4], &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        t.set_shape([4, 1]).unwrap();
        assert_eq!(t.shape().unwrap(), Shape::from([4, 1]));
        t.set_shape([2, 2]).unwrap();
        assert_eq!(t.shape().unwrap(), Shape::from([2, 2]));

        let err = t.set_shape([2, 8]).unwrap_err();
        assert!(matches!(err, Error::InvalidTensor { .. }));
        assert_eq!(t.shape().unwrap(), Shape::from([2, 2]));
        assert_eq!(t.data_as_f32().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_overflowing_shape_rejected() {
        let err = Tensor::new(ElementType::F32, [usize::MAX / 2]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        let err = Tensor::new_with_data(ElementType::F32, [1usize << 32, 1usize << 32], &[0.0f32; 4])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));

        // Each dimension fits the native range; only the runtime sees the product.
        let mut t = Tensor::new(ElementType::U8, [4]).unwrap();
        let err = t.set_shape([65536, 65536, 65536, 65536]).unwrap_err();
        assert!(matches!(err, Error::InvalidTensor { .. }));
        assert_eq!(err.code(), Some(status::PARAMETER_MISMATCH));
        assert_eq!(t.shape().unwrap(), Shape::from([4]));
    }

    #[test]
    fn test_decode_type_mismatch() {
        let t = Tensor::from_data([2], &[1i64, 2]).unwrap();
        assert!(matches!(t.data_as_f32(), Err(Error::UnsupportedType(_))));
        let raw = t.raw_bytes().unwrap();
        assert_eq!(raw.len(), 16);
        assert_eq!(&raw[..8], &1i64.to_ne_bytes());
    }

    #[test]
    fn test_container_mismatch() {
        let err = Tensor::new_with_data(ElementType::F64, [2], &[1.0f32, 2.0]).unwrap_err();
        assert!(matches!(err, Error::UnsupportedType(_)));

        let err = Tensor::new_with_data(ElementType::F32, [3], &[1.0f32, 2.0]).unwrap_err();
        assert!(matches!(err, Error::InvalidTensor { .. }));
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let mut never = Tensor::default();
        never.destroy();
        never.destroy();

        let mut t = Tensor::new(ElementType::U8, [8]).unwrap();
        t.destroy();
        t.destroy();
        assert!(t.is_released());
        assert!(matches!(t.size(), Err(Error::Released("tensor"))));
    }
}
