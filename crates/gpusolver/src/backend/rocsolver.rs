//! Dense backend bound at runtime to rocSOLVER.
//!
//! Handle management and workspace control come from rocBLAS and device memory
//! from the HIP runtime; both are reached through the rocSOLVER library handle,
//! which links them.

use std::ffi::c_void;
use std::path::PathBuf;
use std::sync::Arc;

use super::loader::{LibraryLoader, LoadError, LoadedLibrary, bind_symbols, open_first};
use super::traits::*;
use crate::status::{Result, SolverError, Status, status_from_hip, status_from_rocblas};
use crate::types::{
    Fill, MemorySpace, Precision, RealPtr, RocComplex, ScalarPtr, Stream, complex32_as_roc,
    complex64_as_roc,
};

type RocblasHandle = *mut c_void;
type RocblasStatus = i32;
type HipStream = *mut c_void;
type HipError = i32;

const ROCBLAS_OPERATION_NONE: i32 = 111;
const ROCBLAS_OPERATION_TRANSPOSE: i32 = 112;
const ROCBLAS_DIAGONAL_NON_UNIT: i32 = 131;
const ROCBLAS_SIDE_LEFT: i32 = 141;
const ROCBLAS_STATUS_SIZE_INCREASED: RocblasStatus = 9;
const ROCBLAS_STATUS_SIZE_UNCHANGED: RocblasStatus = 10;

const HIP_MEMCPY_HOST_TO_DEVICE: i32 = 1;
const HIP_MEMCPY_DEVICE_TO_HOST: i32 = 2;
const HIP_MEMCPY_DEVICE_TO_DEVICE: i32 = 3;

type FnCreateHandle = unsafe extern "C" fn(*mut RocblasHandle) -> RocblasStatus;
type FnDestroyHandle = unsafe extern "C" fn(RocblasHandle) -> RocblasStatus;
type FnSetStream = unsafe extern "C" fn(RocblasHandle, HipStream) -> RocblasStatus;
type FnStartSizeQuery = unsafe extern "C" fn(RocblasHandle) -> RocblasStatus;
type FnStopSizeQuery = unsafe extern "C" fn(RocblasHandle, *mut usize) -> RocblasStatus;
type FnSetWorkspace = unsafe extern "C" fn(RocblasHandle, *mut c_void, usize) -> RocblasStatus;
type FnSytrd<T, R> =
    unsafe extern "C" fn(RocblasHandle, i32, i32, *mut T, i32, *mut R, *mut R, *mut T) -> RocblasStatus;
type FnOrgtr<T> = unsafe extern "C" fn(RocblasHandle, i32, i32, *mut T, i32, *mut T) -> RocblasStatus;
type FnPotrf<T> =
    unsafe extern "C" fn(RocblasHandle, i32, i32, *mut T, i32, *mut i32) -> RocblasStatus;
type FnPotrs<T> =
    unsafe extern "C" fn(RocblasHandle, i32, i32, i32, *mut T, i32, *mut T, i32) -> RocblasStatus;
type FnGeqrf<T> = unsafe extern "C" fn(RocblasHandle, i32, i32, *mut T, i32, *mut T) -> RocblasStatus;
type FnOrmqr<T> = unsafe extern "C" fn(
    RocblasHandle,
    i32,
    i32,
    i32,
    i32,
    i32,
    *mut T,
    i32,
    *mut T,
    *mut T,
    i32,
) -> RocblasStatus;
type FnTrsv<T> =
    unsafe extern "C" fn(RocblasHandle, i32, i32, i32, i32, *const T, i32, *mut T, i32) -> RocblasStatus;
type FnHipMalloc = unsafe extern "C" fn(*mut *mut c_void, usize) -> HipError;
type FnHipFree = unsafe extern "C" fn(*mut c_void) -> HipError;
type FnHipMemcpyAsync =
    unsafe extern "C" fn(*mut c_void, *const c_void, usize, i32, HipStream) -> HipError;
type FnHipStreamSynchronize = unsafe extern "C" fn(HipStream) -> HipError;

/// Entry points the dense backend must export, all of them or the backend is unusable.
pub const DENSE_SYMBOLS: &[&str] = &[
    "rocblas_create_handle",
    "rocblas_destroy_handle",
    "rocblas_set_stream",
    "rocblas_start_device_memory_size_query",
    "rocblas_stop_device_memory_size_query",
    "rocblas_set_workspace",
    "rocsolver_ssytrd",
    "rocsolver_dsytrd",
    "rocsolver_chetrd",
    "rocsolver_zhetrd",
    "rocsolver_sorgtr",
    "rocsolver_dorgtr",
    "rocsolver_cungtr",
    "rocsolver_zungtr",
    "rocsolver_spotrf",
    "rocsolver_dpotrf",
    "rocsolver_spotrs",
    "rocsolver_dpotrs",
    "rocsolver_sgeqrf",
    "rocsolver_dgeqrf",
    "rocsolver_sormqr",
    "rocsolver_dormqr",
    "rocblas_strsv",
    "rocblas_dtrsv",
    "hipMalloc",
    "hipFree",
    "hipMemcpyAsync",
    "hipStreamSynchronize",
];

struct RocsolverApi {
    create_handle: FnCreateHandle,
    destroy_handle: FnDestroyHandle,
    set_stream: FnSetStream,
    start_size_query: FnStartSizeQuery,
    stop_size_query: FnStopSizeQuery,
    set_workspace: FnSetWorkspace,
    ssytrd: FnSytrd<f32, f32>,
    dsytrd: FnSytrd<f64, f64>,
    chetrd: FnSytrd<RocComplex<f32>, f32>,
    zhetrd: FnSytrd<RocComplex<f64>, f64>,
    sorgtr: FnOrgtr<f32>,
    dorgtr: FnOrgtr<f64>,
    cungtr: FnOrgtr<RocComplex<f32>>,
    zungtr: FnOrgtr<RocComplex<f64>>,
    spotrf: FnPotrf<f32>,
    dpotrf: FnPotrf<f64>,
    spotrs: FnPotrs<f32>,
    dpotrs: FnPotrs<f64>,
    sgeqrf: FnGeqrf<f32>,
    dgeqrf: FnGeqrf<f64>,
    sormqr: FnOrmqr<f32>,
    dormqr: FnOrmqr<f64>,
    strsv: FnTrsv<f32>,
    dtrsv: FnTrsv<f64>,
    hip_malloc: FnHipMalloc,
    hip_free: FnHipFree,
    hip_memcpy_async: FnHipMemcpyAsync,
    hip_stream_synchronize: FnHipStreamSynchronize,
}

/// Dense backend whose routines live in a runtime-loaded rocSOLVER.
pub struct RocsolverBackend {
    library: Arc<dyn LoadedLibrary>,
    api: RocsolverApi,
}

impl RocsolverBackend {
    pub fn load(loader: &dyn LibraryLoader, candidates: &[PathBuf]) -> std::result::Result<Self, LoadError> {
        let library = open_first(loader, candidates)?;
        let table = bind_symbols(library.as_ref(), "rocsolver", DENSE_SYMBOLS)?;
        // SAFETY: every slot is resolved (bind_symbols is all-or-nothing) and the
        // function types mirror the rocBLAS/rocSOLVER/HIP C declarations.
        let api = unsafe {
            RocsolverApi {
                create_handle: table.typed("rocblas_create_handle")?,
                destroy_handle: table.typed("rocblas_destroy_handle")?,
                set_stream: table.typed("rocblas_set_stream")?,
                start_size_query: table.typed("rocblas_start_device_memory_size_query")?,
                stop_size_query: table.typed("rocblas_stop_device_memory_size_query")?,
                set_workspace: table.typed("rocblas_set_workspace")?,
                ssytrd: table.typed("rocsolver_ssytrd")?,
                dsytrd: table.typed("rocsolver_dsytrd")?,
                chetrd: table.typed("rocsolver_chetrd")?,
                zhetrd: table.typed("rocsolver_zhetrd")?,
                sorgtr: table.typed("rocsolver_sorgtr")?,
                dorgtr: table.typed("rocsolver_dorgtr")?,
                cungtr: table.typed("rocsolver_cungtr")?,
                zungtr: table.typed("rocsolver_zungtr")?,
                spotrf: table.typed("rocsolver_spotrf")?,
                dpotrf: table.typed("rocsolver_dpotrf")?,
                spotrs: table.typed("rocsolver_spotrs")?,
                dpotrs: table.typed("rocsolver_dpotrs")?,
                sgeqrf: table.typed("rocsolver_sgeqrf")?,
                dgeqrf: table.typed("rocsolver_dgeqrf")?,
                sormqr: table.typed("rocsolver_sormqr")?,
                dormqr: table.typed("rocsolver_dormqr")?,
                strsv: table.typed("rocblas_strsv")?,
                dtrsv: table.typed("rocblas_dtrsv")?,
                hip_malloc: table.typed("hipMalloc")?,
                hip_free: table.typed("hipFree")?,
                hip_memcpy_async: table.typed("hipMemcpyAsync")?,
                hip_stream_synchronize: table.typed("hipStreamSynchronize")?,
            }
        };
        tracing::info!(
            library = %library.path().display(),
            symbols = table.len(),
            "dense backend bound"
        );
        Ok(Self { library, api })
    }

    pub fn library_path(&self) -> PathBuf {
        self.library.path().to_path_buf()
    }

    pub fn symbol_count(&self) -> usize {
        DENSE_SYMBOLS.len()
    }

    fn set_workspace(&self, handle: RocblasHandle, work: Workspace) -> Result<()> {
        let (ptr, bytes) = match work {
            Workspace::Managed => (std::ptr::null_mut(), 0),
            Workspace::Provided { ptr, bytes } => (ptr, bytes),
        };
        // SAFETY: handle comes from create_context; the buffer is caller-validated.
        check(unsafe { (self.api.set_workspace)(handle, ptr, bytes) }, "rocblas_set_workspace")
    }

    /// Runs `call` in rocBLAS size-query mode and returns the bytes it asked for.
    fn query_size(
        &self,
        handle: RocblasHandle,
        call: impl FnOnce() -> RocblasStatus,
        name: &'static str,
    ) -> Result<usize> {
        // SAFETY: handle comes from create_context.
        check(unsafe { (self.api.start_size_query)(handle) }, "rocblas_start_device_memory_size_query")?;
        let status = call();
        let mut bytes = 0usize;
        // SAFETY: the query was started above on the same handle.
        let stop = unsafe { (self.api.stop_size_query)(handle, &mut bytes) };
        if !matches!(
            status,
            0 | ROCBLAS_STATUS_SIZE_INCREASED | ROCBLAS_STATUS_SIZE_UNCHANGED
        ) {
            check(status, name)?;
        }
        check(stop, "rocblas_stop_device_memory_size_query")?;
        Ok(bytes)
    }
}

fn check(code: RocblasStatus, call: &'static str) -> Result<()> {
    match status_from_rocblas(code) {
        Status::Success => Ok(()),
        status => Err(SolverError::Backend {
            backend: "rocsolver",
            call,
            code,
            status,
        }),
    }
}

fn check_hip(code: HipError, call: &'static str) -> Result<()> {
    match status_from_hip(code) {
        Status::Success => Ok(()),
        status => Err(SolverError::Backend {
            backend: "hip",
            call,
            code,
            status,
        }),
    }
}

fn handle_of(ctx: RawContext) -> RocblasHandle {
    ctx.0 as RocblasHandle
}

fn precision_mismatch(call: &str) -> SolverError {
    SolverError::Internal(format!("{call}: mismatched buffer precisions"))
}

fn real_only(call: &str, precision: Precision) -> SolverError {
    SolverError::NotImplemented(format!("{call} for {precision:?} precision"))
}

impl DenseBackend for RocsolverBackend {
    fn name(&self) -> &str {
        "rocsolver"
    }

    fn memory_space(&self) -> MemorySpace {
        MemorySpace::Device
    }

    fn create_context(&self, stream: Stream) -> Result<RawContext> {
        let mut handle: RocblasHandle = std::ptr::null_mut();
        // SAFETY: create_handle initializes the output handle.
        check(unsafe { (self.api.create_handle)(&mut handle) }, "rocblas_create_handle")?;
        // SAFETY: handle was just created.
        if let Err(err) = check(unsafe { (self.api.set_stream)(handle, stream.as_ptr()) }, "rocblas_set_stream") {
            // SAFETY: the handle is not shared yet.
            unsafe { (self.api.destroy_handle)(handle) };
            return Err(err);
        }
        Ok(RawContext(handle as usize))
    }

    fn destroy_context(&self, ctx: RawContext) -> Result<()> {
        // SAFETY: contexts are destroyed once by their owning handle.
        check(unsafe { (self.api.destroy_handle)(handle_of(ctx)) }, "rocblas_destroy_handle")
    }

    fn set_stream(&self, ctx: RawContext, stream: Stream) -> Result<()> {
        // SAFETY: ctx is a live rocBLAS handle.
        check(unsafe { (self.api.set_stream)(handle_of(ctx), stream.as_ptr()) }, "rocblas_set_stream")
    }

    fn workspace_size(&self, ctx: RawContext, query: &WorkspaceQuery) -> Result<usize> {
        let h = handle_of(ctx);
        let uplo = query.fill as i32;
        let (n, lda) = (query.n, query.lda);
        let null_t = std::ptr::null_mut::<c_void>();
        // SAFETY: in size-query mode rocSOLVER only inspects sizes; pointers are not dereferenced.
        unsafe {
            match (query.routine, query.precision) {
                (DenseRoutine::Sytrd, Precision::Single) => self.query_size(
                    h,
                    || (self.api.ssytrd)(h, uplo, n, null_t.cast(), lda, null_t.cast(), null_t.cast(), null_t.cast()),
                    "rocsolver_ssytrd",
                ),
                (DenseRoutine::Sytrd, Precision::Double) => self.query_size(
                    h,
                    || (self.api.dsytrd)(h, uplo, n, null_t.cast(), lda, null_t.cast(), null_t.cast(), null_t.cast()),
                    "rocsolver_dsytrd",
                ),
                (DenseRoutine::Sytrd, Precision::ComplexSingle) => self.query_size(
                    h,
                    || (self.api.chetrd)(h, uplo, n, null_t.cast(), lda, null_t.cast(), null_t.cast(), null_t.cast()),
                    "rocsolver_chetrd",
                ),
                (DenseRoutine::Sytrd, Precision::ComplexDouble) => self.query_size(
                    h,
                    || (self.api.zhetrd)(h, uplo, n, null_t.cast(), lda, null_t.cast(), null_t.cast(), null_t.cast()),
                    "rocsolver_zhetrd",
                ),
                (DenseRoutine::Orgtr, Precision::Single) => self.query_size(
                    h,
                    || (self.api.sorgtr)(h, uplo, n, null_t.cast(), lda, null_t.cast()),
                    "rocsolver_sorgtr",
                ),
                (DenseRoutine::Orgtr, Precision::Double) => self.query_size(
                    h,
                    || (self.api.dorgtr)(h, uplo, n, null_t.cast(), lda, null_t.cast()),
                    "rocsolver_dorgtr",
                ),
                (DenseRoutine::Orgtr, Precision::ComplexSingle) => self.query_size(
                    h,
                    || (self.api.cungtr)(h, uplo, n, null_t.cast(), lda, null_t.cast()),
                    "rocsolver_cungtr",
                ),
                (DenseRoutine::Orgtr, Precision::ComplexDouble) => self.query_size(
                    h,
                    || (self.api.zungtr)(h, uplo, n, null_t.cast(), lda, null_t.cast()),
                    "rocsolver_zungtr",
                ),
            }
        }
    }

    unsafe fn sytrd(&self, ctx: RawContext, args: &SytrdArgs, work: Workspace) -> Result<()> {
        let h = handle_of(ctx);
        self.set_workspace(h, work)?;
        let uplo = args.fill as i32;
        // SAFETY: buffers validated by the caller; complex buffers are reinterpreted
        // into the layout-compatible rocBLAS complex type.
        unsafe {
            match (args.a, args.d, args.e, args.tau) {
                (ScalarPtr::Single(a), RealPtr::Single(d), RealPtr::Single(e), ScalarPtr::Single(tau)) => {
                    check((self.api.ssytrd)(h, uplo, args.n, a, args.lda, d, e, tau), "rocsolver_ssytrd")
                }
                (ScalarPtr::Double(a), RealPtr::Double(d), RealPtr::Double(e), ScalarPtr::Double(tau)) => {
                    check((self.api.dsytrd)(h, uplo, args.n, a, args.lda, d, e, tau), "rocsolver_dsytrd")
                }
                (
                    ScalarPtr::ComplexSingle(a),
                    RealPtr::Single(d),
                    RealPtr::Single(e),
                    ScalarPtr::ComplexSingle(tau),
                ) => check(
                    (self.api.chetrd)(h, uplo, args.n, complex32_as_roc(a), args.lda, d, e, complex32_as_roc(tau)),
                    "rocsolver_chetrd",
                ),
                (
                    ScalarPtr::ComplexDouble(a),
                    RealPtr::Double(d),
                    RealPtr::Double(e),
                    ScalarPtr::ComplexDouble(tau),
                ) => check(
                    (self.api.zhetrd)(h, uplo, args.n, complex64_as_roc(a), args.lda, d, e, complex64_as_roc(tau)),
                    "rocsolver_zhetrd",
                ),
                _ => Err(precision_mismatch("sytrd")),
            }
        }
    }

    unsafe fn orgtr(&self, ctx: RawContext, args: &OrgtrArgs, work: Workspace) -> Result<()> {
        let h = handle_of(ctx);
        self.set_workspace(h, work)?;
        let uplo = args.fill as i32;
        // SAFETY: see sytrd.
        unsafe {
            match (args.a, args.tau) {
                (ScalarPtr::Single(a), ScalarPtr::Single(tau)) => {
                    check((self.api.sorgtr)(h, uplo, args.n, a, args.lda, tau), "rocsolver_sorgtr")
                }
                (ScalarPtr::Double(a), ScalarPtr::Double(tau)) => {
                    check((self.api.dorgtr)(h, uplo, args.n, a, args.lda, tau), "rocsolver_dorgtr")
                }
                (ScalarPtr::ComplexSingle(a), ScalarPtr::ComplexSingle(tau)) => check(
                    (self.api.cungtr)(h, uplo, args.n, complex32_as_roc(a), args.lda, complex32_as_roc(tau)),
                    "rocsolver_cungtr",
                ),
                (ScalarPtr::ComplexDouble(a), ScalarPtr::ComplexDouble(tau)) => check(
                    (self.api.zungtr)(h, uplo, args.n, complex64_as_roc(a), args.lda, complex64_as_roc(tau)),
                    "rocsolver_zungtr",
                ),
                _ => Err(precision_mismatch("orgtr")),
            }
        }
    }

    unsafe fn potrf(&self, ctx: RawContext, args: &PotrfArgs) -> Result<()> {
        let h = handle_of(ctx);
        self.set_workspace(h, Workspace::Managed)?;
        let uplo = args.fill as i32;
        // SAFETY: buffers validated by the caller.
        unsafe {
            match args.a {
                ScalarPtr::Single(a) => {
                    check((self.api.spotrf)(h, uplo, args.n, a, args.lda, args.info), "rocsolver_spotrf")
                }
                ScalarPtr::Double(a) => {
                    check((self.api.dpotrf)(h, uplo, args.n, a, args.lda, args.info), "rocsolver_dpotrf")
                }
                other => Err(real_only("potrf", other.precision())),
            }
        }
    }

    unsafe fn potrs(&self, ctx: RawContext, args: &PotrsArgs) -> Result<()> {
        let h = handle_of(ctx);
        self.set_workspace(h, Workspace::Managed)?;
        let uplo = args.fill as i32;
        // SAFETY: buffers validated by the caller.
        unsafe {
            match (args.a, args.b) {
                (ScalarPtr::Single(a), ScalarPtr::Single(b)) => check(
                    (self.api.spotrs)(h, uplo, args.n, args.nrhs, a, args.lda, b, args.ldb),
                    "rocsolver_spotrs",
                ),
                (ScalarPtr::Double(a), ScalarPtr::Double(b)) => check(
                    (self.api.dpotrs)(h, uplo, args.n, args.nrhs, a, args.lda, b, args.ldb),
                    "rocsolver_dpotrs",
                ),
                (a, _) if a.precision().is_complex() => Err(real_only("potrs", a.precision())),
                _ => Err(precision_mismatch("potrs")),
            }
        }
    }

    unsafe fn geqrf(&self, ctx: RawContext, args: &GeqrfArgs) -> Result<()> {
        let h = handle_of(ctx);
        self.set_workspace(h, Workspace::Managed)?;
        // SAFETY: buffers validated by the caller.
        unsafe {
            match (args.a, args.tau) {
                (ScalarPtr::Single(a), ScalarPtr::Single(tau)) => {
                    check((self.api.sgeqrf)(h, args.m, args.n, a, args.lda, tau), "rocsolver_sgeqrf")
                }
                (ScalarPtr::Double(a), ScalarPtr::Double(tau)) => {
                    check((self.api.dgeqrf)(h, args.m, args.n, a, args.lda, tau), "rocsolver_dgeqrf")
                }
                (a, _) if a.precision().is_complex() => Err(real_only("geqrf", a.precision())),
                _ => Err(precision_mismatch("geqrf")),
            }
        }
    }

    unsafe fn ormqr(&self, ctx: RawContext, args: &OrmqrArgs) -> Result<()> {
        let h = handle_of(ctx);
        self.set_workspace(h, Workspace::Managed)?;
        // SAFETY: buffers validated by the caller.
        unsafe {
            match (args.a, args.tau, args.c) {
                (ScalarPtr::Single(a), ScalarPtr::Single(tau), ScalarPtr::Single(c)) => check(
                    (self.api.sormqr)(
                        h,
                        ROCBLAS_SIDE_LEFT,
                        ROCBLAS_OPERATION_TRANSPOSE,
                        args.m,
                        args.n,
                        args.k,
                        a,
                        args.lda,
                        tau,
                        c,
                        args.ldc,
                    ),
                    "rocsolver_sormqr",
                ),
                (ScalarPtr::Double(a), ScalarPtr::Double(tau), ScalarPtr::Double(c)) => check(
                    (self.api.dormqr)(
                        h,
                        ROCBLAS_SIDE_LEFT,
                        ROCBLAS_OPERATION_TRANSPOSE,
                        args.m,
                        args.n,
                        args.k,
                        a,
                        args.lda,
                        tau,
                        c,
                        args.ldc,
                    ),
                    "rocsolver_dormqr",
                ),
                (a, _, _) if a.precision().is_complex() => Err(real_only("ormqr", a.precision())),
                _ => Err(precision_mismatch("ormqr")),
            }
        }
    }

    unsafe fn trsv(&self, ctx: RawContext, args: &TrsvArgs) -> Result<()> {
        let h = handle_of(ctx);
        let uplo = Fill::Upper as i32;
        // SAFETY: buffers validated by the caller.
        unsafe {
            match (args.a, args.x) {
                (ScalarPtr::Single(a), ScalarPtr::Single(x)) => check(
                    (self.api.strsv)(
                        h,
                        uplo,
                        ROCBLAS_OPERATION_NONE,
                        ROCBLAS_DIAGONAL_NON_UNIT,
                        args.n,
                        a,
                        args.lda,
                        x,
                        1,
                    ),
                    "rocblas_strsv",
                ),
                (ScalarPtr::Double(a), ScalarPtr::Double(x)) => check(
                    (self.api.dtrsv)(
                        h,
                        uplo,
                        ROCBLAS_OPERATION_NONE,
                        ROCBLAS_DIAGONAL_NON_UNIT,
                        args.n,
                        a,
                        args.lda,
                        x,
                        1,
                    ),
                    "rocblas_dtrsv",
                ),
                (a, _) if a.precision().is_complex() => Err(real_only("trsv", a.precision())),
                _ => Err(precision_mismatch("trsv")),
            }
        }
    }

    fn alloc(&self, bytes: usize) -> Result<*mut c_void> {
        let mut ptr: *mut c_void = std::ptr::null_mut();
        // SAFETY: hipMalloc writes the allocation address on success.
        let code = unsafe { (self.api.hip_malloc)(&mut ptr, bytes) };
        if code != 0 || (ptr.is_null() && bytes > 0) {
            tracing::warn!(bytes, code, "device allocation failed");
            return Err(SolverError::AllocFailed { bytes });
        }
        Ok(ptr)
    }

    unsafe fn free(&self, ptr: *mut c_void) -> Result<()> {
        // SAFETY: ptr came from alloc on this backend.
        check_hip(unsafe { (self.api.hip_free)(ptr) }, "hipFree")
    }

    unsafe fn copy(
        &self,
        stream: Stream,
        dst: *mut c_void,
        src: *const c_void,
        bytes: usize,
        kind: CopyKind,
    ) -> Result<()> {
        let kind = match kind {
            CopyKind::HostToDevice => HIP_MEMCPY_HOST_TO_DEVICE,
            CopyKind::DeviceToHost => HIP_MEMCPY_DEVICE_TO_HOST,
            CopyKind::DeviceToDevice => HIP_MEMCPY_DEVICE_TO_DEVICE,
        };
        // SAFETY: buffers validated by the caller.
        check_hip(
            unsafe { (self.api.hip_memcpy_async)(dst, src, bytes, kind, stream.as_ptr()) },
            "hipMemcpyAsync",
        )
    }

    fn synchronize(&self, stream: Stream) -> Result<()> {
        // SAFETY: stream is the handle's bound stream or the default stream.
        check_hip(
            unsafe { (self.api.hip_stream_synchronize)(stream.as_ptr()) },
            "hipStreamSynchronize",
        )
    }
}
