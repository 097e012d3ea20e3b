//! Public scalar, enum and pointer types, and their translation into backend layouts.

use std::ffi::{c_char, c_void};

use nalgebra::Complex;

use crate::status::{Result, SolverError};

/// Which triangle of a symmetric/Hermitian matrix is referenced.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fill {
    Upper = 121,
    Lower = 122,
}

impl Fill {
    pub fn from_raw(raw: i32) -> Result<Self> {
        match raw {
            121 => Ok(Fill::Upper),
            122 => Ok(Fill::Lower),
            other => Err(SolverError::invalid_value(
                "uplo",
                format!("unrecognized fill mode {other}"),
            )),
        }
    }

    /// Parses the LAPACK character spelling used by legacy callers.
    pub fn from_char(raw: c_char) -> Result<Self> {
        match (raw as u8).to_ascii_uppercase() {
            b'U' => Ok(Fill::Upper),
            b'L' => Ok(Fill::Lower),
            other => Err(SolverError::invalid_value(
                "uplo",
                format!("unrecognized fill character {:?}", other as char),
            )),
        }
    }

    pub fn as_char(&self) -> char {
        match self {
            Fill::Upper => 'U',
            Fill::Lower => 'L',
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexBase {
    Zero = 0,
    One = 1,
}

impl IndexBase {
    pub fn from_raw(raw: i32) -> Result<Self> {
        match raw {
            0 => Ok(IndexBase::Zero),
            1 => Ok(IndexBase::One),
            other => Err(SolverError::invalid_value(
                "base",
                format!("unrecognized index base {other}"),
            )),
        }
    }

    pub fn offset(&self) -> i32 {
        *self as i32
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatrixType {
    General = 0,
    Symmetric = 1,
    Hermitian = 2,
    Triangular = 3,
}

impl MatrixType {
    pub fn from_raw(raw: i32) -> Result<Self> {
        match raw {
            0 => Ok(MatrixType::General),
            1 => Ok(MatrixType::Symmetric),
            2 => Ok(MatrixType::Hermitian),
            3 => Ok(MatrixType::Triangular),
            other => Err(SolverError::invalid_value(
                "type",
                format!("unrecognized matrix type {other}"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Precision {
    Single,
    Double,
    ComplexSingle,
    ComplexDouble,
}

impl Precision {
    /// LAPACK precision prefix.
    pub fn prefix(&self) -> char {
        match self {
            Precision::Single => 's',
            Precision::Double => 'd',
            Precision::ComplexSingle => 'c',
            Precision::ComplexDouble => 'z',
        }
    }

    pub fn element_size(&self) -> usize {
        match self {
            Precision::Single => 4,
            Precision::Double => 8,
            Precision::ComplexSingle => 8,
            Precision::ComplexDouble => 16,
        }
    }

    pub fn is_complex(&self) -> bool {
        matches!(self, Precision::ComplexSingle | Precision::ComplexDouble)
    }
}

/// Single-precision complex number in the public ABI layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GpuComplex32 {
    pub x: f32,
    pub y: f32,
}

/// Double-precision complex number in the public ABI layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GpuComplex64 {
    pub x: f64,
    pub y: f64,
}

impl GpuComplex32 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl GpuComplex64 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Complex layout expected by the device libraries (`{x, y}` lanes).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct RocComplex<T> {
    pub x: T,
    pub y: T,
}

const _: () = {
    assert!(std::mem::size_of::<GpuComplex32>() == std::mem::size_of::<RocComplex<f32>>());
    assert!(std::mem::align_of::<GpuComplex32>() == std::mem::align_of::<RocComplex<f32>>());
    assert!(std::mem::size_of::<GpuComplex64>() == std::mem::size_of::<RocComplex<f64>>());
    assert!(std::mem::align_of::<GpuComplex64>() == std::mem::align_of::<RocComplex<f64>>());
    assert!(std::mem::size_of::<GpuComplex32>() == std::mem::size_of::<Complex<f32>>());
    assert!(std::mem::align_of::<GpuComplex32>() == std::mem::align_of::<Complex<f32>>());
    assert!(std::mem::size_of::<GpuComplex64>() == std::mem::size_of::<Complex<f64>>());
    assert!(std::mem::align_of::<GpuComplex64>() == std::mem::align_of::<Complex<f64>>());
};

/// Reinterprets public complex buffers as the device libraries' complex type.
pub(crate) fn complex32_as_roc(ptr: *mut GpuComplex32) -> *mut RocComplex<f32> {
    ptr.cast()
}

pub(crate) fn complex64_as_roc(ptr: *mut GpuComplex64) -> *mut RocComplex<f64> {
    ptr.cast()
}

/// Reinterprets public complex buffers as `nalgebra` complex numbers.
pub(crate) fn complex32_as_native(ptr: *mut GpuComplex32) -> *mut Complex<f32> {
    ptr.cast()
}

pub(crate) fn complex64_as_native(ptr: *mut GpuComplex64) -> *mut Complex<f64> {
    ptr.cast()
}

/// Typed pointer to a buffer of the routine's scalar type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarPtr {
    Single(*mut f32),
    Double(*mut f64),
    ComplexSingle(*mut GpuComplex32),
    ComplexDouble(*mut GpuComplex64),
}

impl ScalarPtr {
    pub fn precision(&self) -> Precision {
        match self {
            ScalarPtr::Single(_) => Precision::Single,
            ScalarPtr::Double(_) => Precision::Double,
            ScalarPtr::ComplexSingle(_) => Precision::ComplexSingle,
            ScalarPtr::ComplexDouble(_) => Precision::ComplexDouble,
        }
    }

    pub fn is_null(&self) -> bool {
        self.as_void().is_null()
    }

    pub fn as_void(&self) -> *mut c_void {
        match *self {
            ScalarPtr::Single(p) => p.cast(),
            ScalarPtr::Double(p) => p.cast(),
            ScalarPtr::ComplexSingle(p) => p.cast(),
            ScalarPtr::ComplexDouble(p) => p.cast(),
        }
    }

    /// Rebuilds a typed pointer of the given precision from an untyped address.
    pub(crate) fn from_void(precision: Precision, ptr: *mut c_void) -> Self {
        match precision {
            Precision::Single => ScalarPtr::Single(ptr.cast()),
            Precision::Double => ScalarPtr::Double(ptr.cast()),
            Precision::ComplexSingle => ScalarPtr::ComplexSingle(ptr.cast()),
            Precision::ComplexDouble => ScalarPtr::ComplexDouble(ptr.cast()),
        }
    }
}

/// Typed pointer to a buffer of the routine's real type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealPtr {
    Single(*mut f32),
    Double(*mut f64),
}

impl RealPtr {
    pub fn is_null(&self) -> bool {
        match *self {
            RealPtr::Single(p) => p.is_null(),
            RealPtr::Double(p) => p.is_null(),
        }
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
    impl Sealed for super::GpuComplex32 {}
    impl Sealed for super::GpuComplex64 {}
}

/// Scalar types accepted by the solver routines.
pub trait Scalar: sealed::Sealed + Copy + Default + Send + Sync + 'static {
    type Real: RealScalar;
    const PRECISION: Precision;

    fn wrap(ptr: *mut Self) -> ScalarPtr;
}

/// Real scalar types (`f32`, `f64`).
pub trait RealScalar: Scalar<Real = Self> + PartialOrd + Into<f64> {
    fn wrap_real(ptr: *mut Self) -> RealPtr;
}

impl Scalar for f32 {
    type Real = f32;
    const PRECISION: Precision = Precision::Single;

    fn wrap(ptr: *mut Self) -> ScalarPtr {
        ScalarPtr::Single(ptr)
    }
}

impl Scalar for f64 {
    type Real = f64;
    const PRECISION: Precision = Precision::Double;

    fn wrap(ptr: *mut Self) -> ScalarPtr {
        ScalarPtr::Double(ptr)
    }
}

impl Scalar for GpuComplex32 {
    type Real = f32;
    const PRECISION: Precision = Precision::ComplexSingle;

    fn wrap(ptr: *mut Self) -> ScalarPtr {
        ScalarPtr::ComplexSingle(ptr)
    }
}

impl Scalar for GpuComplex64 {
    type Real = f64;
    const PRECISION: Precision = Precision::ComplexDouble;

    fn wrap(ptr: *mut Self) -> ScalarPtr {
        ScalarPtr::ComplexDouble(ptr)
    }
}

impl RealScalar for f32 {
    fn wrap_real(ptr: *mut Self) -> RealPtr {
        RealPtr::Single(ptr)
    }
}

impl RealScalar for f64 {
    fn wrap_real(ptr: *mut Self) -> RealPtr {
        RealPtr::Double(ptr)
    }
}

/// Device execution queue bound to a handle. The null stream is the default queue.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Stream(pub *mut c_void);

// SAFETY: a stream is an opaque queue identifier owned by the device runtime.
unsafe impl Send for Stream {}
unsafe impl Sync for Stream {}

impl Stream {
    pub const DEFAULT: Stream = Stream(std::ptr::null_mut());

    pub fn as_ptr(&self) -> *mut c_void {
        self.0
    }
}

impl Default for Stream {
    fn default() -> Self {
        Stream::DEFAULT
    }
}

/// Where a backend expects the buffers it is handed to live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemorySpace {
    Device,
    Host,
}
