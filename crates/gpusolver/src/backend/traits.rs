//! Backend contract definitions.
//!
//! These traits describe what the dispatch layer needs from a dense (LAPACK-style)
//! and a sparse backend. Runtime-loaded device libraries and the host reference
//! implementations both sit behind them, so the facade never knows which one it is
//! talking to.

use std::ffi::c_void;

use crate::status::Result;
use crate::types::{Fill, IndexBase, MatrixType, MemorySpace, Precision, RealPtr, ScalarPtr, Stream};

/// Opaque backend sub-handle owned by a solver handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawContext(pub usize);

/// Opaque, backend-owned sparse matrix descriptor.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatDescr(pub *mut c_void);

// SAFETY: descriptors are plain backend object addresses; access is serialized by callers.
unsafe impl Send for MatDescr {}
unsafe impl Sync for MatDescr {}

impl MatDescr {
    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }
}

/// Scratch memory handed to a dense routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workspace {
    /// The backend allocates whatever it needs.
    Managed,
    /// A caller- or pool-provided buffer in the backend's memory space.
    Provided { ptr: *mut c_void, bytes: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyKind {
    HostToDevice,
    DeviceToHost,
    DeviceToDevice,
}

/// Dense routines that have a workspace query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenseRoutine {
    /// Symmetric/Hermitian reduction to tridiagonal form.
    Sytrd,
    /// Generation of the orthogonal/unitary matrix of a tridiagonal reduction.
    Orgtr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkspaceQuery {
    pub routine: DenseRoutine,
    pub precision: Precision,
    pub fill: Fill,
    pub n: i32,
    pub lda: i32,
}

/// `A = Q T Q^H` reduction in LAPACK storage.
#[derive(Debug, Clone, Copy)]
pub struct SytrdArgs {
    pub fill: Fill,
    pub n: i32,
    pub a: ScalarPtr,
    pub lda: i32,
    pub d: RealPtr,
    pub e: RealPtr,
    pub tau: ScalarPtr,
}

/// Overwrites `a` (holding reflectors from [`SytrdArgs`]) with `Q`.
#[derive(Debug, Clone, Copy)]
pub struct OrgtrArgs {
    pub fill: Fill,
    pub n: i32,
    pub a: ScalarPtr,
    pub lda: i32,
    pub tau: ScalarPtr,
}

/// Cholesky factorization; `info` lives in the backend's memory space.
#[derive(Debug, Clone, Copy)]
pub struct PotrfArgs {
    pub fill: Fill,
    pub n: i32,
    pub a: ScalarPtr,
    pub lda: i32,
    pub info: *mut i32,
}

#[derive(Debug, Clone, Copy)]
pub struct PotrsArgs {
    pub fill: Fill,
    pub n: i32,
    pub nrhs: i32,
    pub a: ScalarPtr,
    pub lda: i32,
    pub b: ScalarPtr,
    pub ldb: i32,
}

#[derive(Debug, Clone, Copy)]
pub struct GeqrfArgs {
    pub m: i32,
    pub n: i32,
    pub a: ScalarPtr,
    pub lda: i32,
    pub tau: ScalarPtr,
}

/// Applies `Q^T` (from [`GeqrfArgs`]) from the left: `C := Q^T C`.
#[derive(Debug, Clone, Copy)]
pub struct OrmqrArgs {
    pub m: i32,
    pub n: i32,
    pub k: i32,
    pub a: ScalarPtr,
    pub lda: i32,
    pub tau: ScalarPtr,
    pub c: ScalarPtr,
    pub ldc: i32,
}

/// Solves `R x = b` in place for an upper-triangular, non-unit `R`.
#[derive(Debug, Clone, Copy)]
pub struct TrsvArgs {
    pub n: i32,
    pub a: ScalarPtr,
    pub lda: i32,
    pub x: ScalarPtr,
}

#[derive(Debug, Clone, Copy)]
pub struct Csr2DenseArgs {
    pub m: i32,
    pub n: i32,
    /// Must equal `row_ptr[m] - base`.
    pub nnz: i32,
    pub descr: MatDescr,
    pub values: ScalarPtr,
    pub row_ptr: *const i32,
    pub col_ind: *const i32,
    pub a: ScalarPtr,
    pub lda: i32,
}

/// Dense LAPACK-style backend.
///
/// Pointer arguments live in [`DenseBackend::memory_space`]. Routines are enqueued
/// on the stream bound to the context and may return before they complete.
pub trait DenseBackend: Send + Sync {
    fn name(&self) -> &str;

    fn memory_space(&self) -> MemorySpace;

    fn create_context(&self, stream: Stream) -> Result<RawContext>;

    fn destroy_context(&self, ctx: RawContext) -> Result<()>;

    fn set_stream(&self, ctx: RawContext, stream: Stream) -> Result<()>;

    /// Scratch bytes the routine needs for the given shape.
    fn workspace_size(&self, ctx: RawContext, query: &WorkspaceQuery) -> Result<usize>;

    /// # Safety
    /// Buffers must be valid for the shapes in `args`.
    unsafe fn sytrd(&self, ctx: RawContext, args: &SytrdArgs, work: Workspace) -> Result<()>;

    /// # Safety
    /// Buffers must be valid for the shapes in `args`.
    unsafe fn orgtr(&self, ctx: RawContext, args: &OrgtrArgs, work: Workspace) -> Result<()>;

    /// # Safety
    /// Buffers must be valid for the shapes in `args`.
    unsafe fn potrf(&self, ctx: RawContext, args: &PotrfArgs) -> Result<()>;

    /// # Safety
    /// Buffers must be valid for the shapes in `args`.
    unsafe fn potrs(&self, ctx: RawContext, args: &PotrsArgs) -> Result<()>;

    /// # Safety
    /// Buffers must be valid for the shapes in `args`.
    unsafe fn geqrf(&self, ctx: RawContext, args: &GeqrfArgs) -> Result<()>;

    /// # Safety
    /// Buffers must be valid for the shapes in `args`.
    unsafe fn ormqr(&self, ctx: RawContext, args: &OrmqrArgs) -> Result<()>;

    /// # Safety
    /// Buffers must be valid for the shapes in `args`.
    unsafe fn trsv(&self, ctx: RawContext, args: &TrsvArgs) -> Result<()>;

    fn alloc(&self, bytes: usize) -> Result<*mut c_void>;

    /// # Safety
    /// `ptr` must come from [`DenseBackend::alloc`] on this backend.
    unsafe fn free(&self, ptr: *mut c_void) -> Result<()>;

    /// # Safety
    /// `dst` and `src` must be valid for `bytes` in the spaces named by `kind`.
    unsafe fn copy(
        &self,
        stream: Stream,
        dst: *mut c_void,
        src: *const c_void,
        bytes: usize,
        kind: CopyKind,
    ) -> Result<()>;

    fn synchronize(&self, stream: Stream) -> Result<()>;
}

/// Sparse backend: matrix descriptors and CSR conversion.
pub trait SparseBackend: Send + Sync {
    fn name(&self) -> &str;

    fn memory_space(&self) -> MemorySpace;

    fn create_context(&self, stream: Stream) -> Result<RawContext>;

    fn destroy_context(&self, ctx: RawContext) -> Result<()>;

    fn set_stream(&self, ctx: RawContext, stream: Stream) -> Result<()>;

    /// New descriptor: general matrix, zero-based indices.
    fn create_mat_descr(&self) -> Result<MatDescr>;

    /// # Safety
    /// `descr` must come from [`SparseBackend::create_mat_descr`] and not be used afterwards.
    unsafe fn destroy_mat_descr(&self, descr: MatDescr) -> Result<()>;

    /// # Safety
    /// `descr` must be a live descriptor of this backend.
    unsafe fn set_index_base(&self, descr: MatDescr, base: IndexBase) -> Result<()>;

    /// # Safety
    /// `descr` must be a live descriptor of this backend.
    unsafe fn index_base(&self, descr: MatDescr) -> Result<IndexBase>;

    /// # Safety
    /// `descr` must be a live descriptor of this backend.
    unsafe fn set_matrix_type(&self, descr: MatDescr, matrix_type: MatrixType) -> Result<()>;

    /// # Safety
    /// `descr` must be a live descriptor of this backend.
    unsafe fn matrix_type(&self, descr: MatDescr) -> Result<MatrixType>;

    /// Expands a CSR matrix into a column-major dense buffer.
    ///
    /// # Safety
    /// Buffers must be valid for the shapes in `args`.
    unsafe fn csr2dense(&self, ctx: RawContext, args: &Csr2DenseArgs) -> Result<()>;
}
