//! Sparse backend bound at runtime to rocSPARSE.

use std::ffi::c_void;
use std::path::PathBuf;
use std::sync::Arc;

use super::loader::{LibraryLoader, LoadError, LoadedLibrary, bind_symbols, open_first};
use super::traits::*;
use crate::status::{Result, SolverError, Status, status_from_rocsparse};
use crate::types::{IndexBase, MatrixType, MemorySpace, ScalarPtr, Stream};

type RocsparseHandle = *mut c_void;
type RocsparseMatDescr = *mut c_void;
type RocsparseStatus = i32;

type FnCreateHandle = unsafe extern "C" fn(*mut RocsparseHandle) -> RocsparseStatus;
type FnDestroyHandle = unsafe extern "C" fn(RocsparseHandle) -> RocsparseStatus;
type FnSetStream = unsafe extern "C" fn(RocsparseHandle, *mut c_void) -> RocsparseStatus;
type FnCreateMatDescr = unsafe extern "C" fn(*mut RocsparseMatDescr) -> RocsparseStatus;
type FnDestroyMatDescr = unsafe extern "C" fn(RocsparseMatDescr) -> RocsparseStatus;
type FnSetIndexBase = unsafe extern "C" fn(RocsparseMatDescr, i32) -> RocsparseStatus;
type FnGetIndexBase = unsafe extern "C" fn(RocsparseMatDescr) -> i32;
type FnSetMatType = unsafe extern "C" fn(RocsparseMatDescr, i32) -> RocsparseStatus;
type FnGetMatType = unsafe extern "C" fn(RocsparseMatDescr) -> i32;
type FnCsr2Dense<T> = unsafe extern "C" fn(
    RocsparseHandle,
    i32,
    i32,
    RocsparseMatDescr,
    *const T,
    *const i32,
    *const i32,
    *mut T,
    i32,
) -> RocsparseStatus;

pub const SPARSE_SYMBOLS: &[&str] = &[
    "rocsparse_create_handle",
    "rocsparse_destroy_handle",
    "rocsparse_set_stream",
    "rocsparse_create_mat_descr",
    "rocsparse_destroy_mat_descr",
    "rocsparse_set_mat_index_base",
    "rocsparse_get_mat_index_base",
    "rocsparse_set_mat_type",
    "rocsparse_get_mat_type",
    "rocsparse_scsr2dense",
    "rocsparse_dcsr2dense",
];

struct RocsparseApi {
    create_handle: FnCreateHandle,
    destroy_handle: FnDestroyHandle,
    set_stream: FnSetStream,
    create_mat_descr: FnCreateMatDescr,
    destroy_mat_descr: FnDestroyMatDescr,
    set_index_base: FnSetIndexBase,
    get_index_base: FnGetIndexBase,
    set_mat_type: FnSetMatType,
    get_mat_type: FnGetMatType,
    scsr2dense: FnCsr2Dense<f32>,
    dcsr2dense: FnCsr2Dense<f64>,
}

pub struct RocsparseBackend {
    library: Arc<dyn LoadedLibrary>,
    api: RocsparseApi,
}

impl RocsparseBackend {
    pub fn load(loader: &dyn LibraryLoader, candidates: &[PathBuf]) -> std::result::Result<Self, LoadError> {
        let library = open_first(loader, candidates)?;
        let table = bind_symbols(library.as_ref(), "rocsparse", SPARSE_SYMBOLS)?;
        // SAFETY: all slots are resolved and the types mirror the rocSPARSE headers.
        let api = unsafe {
            RocsparseApi {
                create_handle: table.typed("rocsparse_create_handle")?,
                destroy_handle: table.typed("rocsparse_destroy_handle")?,
                set_stream: table.typed("rocsparse_set_stream")?,
                create_mat_descr: table.typed("rocsparse_create_mat_descr")?,
                destroy_mat_descr: table.typed("rocsparse_destroy_mat_descr")?,
                set_index_base: table.typed("rocsparse_set_mat_index_base")?,
                get_index_base: table.typed("rocsparse_get_mat_index_base")?,
                set_mat_type: table.typed("rocsparse_set_mat_type")?,
                get_mat_type: table.typed("rocsparse_get_mat_type")?,
                scsr2dense: table.typed("rocsparse_scsr2dense")?,
                dcsr2dense: table.typed("rocsparse_dcsr2dense")?,
            }
        };
        tracing::info!(
            library = %library.path().display(),
            symbols = table.len(),
            "sparse backend bound"
        );
        Ok(Self { library, api })
    }

    pub fn library_path(&self) -> PathBuf {
        self.library.path().to_path_buf()
    }

    pub fn symbol_count(&self) -> usize {
        SPARSE_SYMBOLS.len()
    }
}

fn check(code: RocsparseStatus, call: &'static str) -> Result<()> {
    match status_from_rocsparse(code) {
        Status::Success => Ok(()),
        status => Err(SolverError::Backend {
            backend: "rocsparse",
            call,
            code,
            status,
        }),
    }
}

fn handle_of(ctx: RawContext) -> RocsparseHandle {
    ctx.0 as RocsparseHandle
}

impl SparseBackend for RocsparseBackend {
    fn name(&self) -> &str {
        "rocsparse"
    }

    fn memory_space(&self) -> MemorySpace {
        MemorySpace::Device
    }

    fn create_context(&self, stream: Stream) -> Result<RawContext> {
        let mut handle: RocsparseHandle = std::ptr::null_mut();
        // SAFETY: create_handle initializes the output handle.
        check(unsafe { (self.api.create_handle)(&mut handle) }, "rocsparse_create_handle")?;
        // SAFETY: handle was just created.
        if let Err(err) = check(unsafe { (self.api.set_stream)(handle, stream.as_ptr()) }, "rocsparse_set_stream") {
            // SAFETY: the handle is not shared yet.
            unsafe { (self.api.destroy_handle)(handle) };
            return Err(err);
        }
        Ok(RawContext(handle as usize))
    }

    fn destroy_context(&self, ctx: RawContext) -> Result<()> {
        // SAFETY: contexts are destroyed once by their owning handle.
        check(unsafe { (self.api.destroy_handle)(handle_of(ctx)) }, "rocsparse_destroy_handle")
    }

    fn set_stream(&self, ctx: RawContext, stream: Stream) -> Result<()> {
        // SAFETY: ctx is a live rocSPARSE handle.
        check(unsafe { (self.api.set_stream)(handle_of(ctx), stream.as_ptr()) }, "rocsparse_set_stream")
    }

    fn create_mat_descr(&self) -> Result<MatDescr> {
        let mut descr: RocsparseMatDescr = std::ptr::null_mut();
        // SAFETY: create_mat_descr initializes the output descriptor.
        check(unsafe { (self.api.create_mat_descr)(&mut descr) }, "rocsparse_create_mat_descr")?;
        Ok(MatDescr(descr))
    }

    unsafe fn destroy_mat_descr(&self, descr: MatDescr) -> Result<()> {
        // SAFETY: caller guarantees a live descriptor.
        check(unsafe { (self.api.destroy_mat_descr)(descr.0) }, "rocsparse_destroy_mat_descr")
    }

    unsafe fn set_index_base(&self, descr: MatDescr, base: IndexBase) -> Result<()> {
        // SAFETY: caller guarantees a live descriptor.
        check(
            unsafe { (self.api.set_index_base)(descr.0, base as i32) },
            "rocsparse_set_mat_index_base",
        )
    }

    unsafe fn index_base(&self, descr: MatDescr) -> Result<IndexBase> {
        // SAFETY: caller guarantees a live descriptor.
        let raw = unsafe { (self.api.get_index_base)(descr.0) };
        IndexBase::from_raw(raw).map_err(|_| {
            SolverError::Internal(format!("rocsparse reported unknown index base {raw}"))
        })
    }

    unsafe fn set_matrix_type(&self, descr: MatDescr, matrix_type: MatrixType) -> Result<()> {
        // SAFETY: caller guarantees a live descriptor.
        check(
            unsafe { (self.api.set_mat_type)(descr.0, matrix_type as i32) },
            "rocsparse_set_mat_type",
        )
    }

    unsafe fn matrix_type(&self, descr: MatDescr) -> Result<MatrixType> {
        // SAFETY: caller guarantees a live descriptor.
        let raw = unsafe { (self.api.get_mat_type)(descr.0) };
        MatrixType::from_raw(raw).map_err(|_| {
            SolverError::Internal(format!("rocsparse reported unknown matrix type {raw}"))
        })
    }

    unsafe fn csr2dense(&self, ctx: RawContext, args: &Csr2DenseArgs) -> Result<()> {
        let h = handle_of(ctx);
        // SAFETY: buffers validated by the caller and resident on the device.
        unsafe {
            match (args.values, args.a) {
                (ScalarPtr::Single(values), ScalarPtr::Single(a)) => check(
                    (self.api.scsr2dense)(
                        h,
                        args.m,
                        args.n,
                        args.descr.0,
                        values,
                        args.row_ptr,
                        args.col_ind,
                        a,
                        args.lda,
                    ),
                    "rocsparse_scsr2dense",
                ),
                (ScalarPtr::Double(values), ScalarPtr::Double(a)) => check(
                    (self.api.dcsr2dense)(
                        h,
                        args.m,
                        args.n,
                        args.descr.0,
                        values,
                        args.row_ptr,
                        args.col_ind,
                        a,
                        args.lda,
                    ),
                    "rocsparse_dcsr2dense",
                ),
                (values, _) if values.precision().is_complex() => Err(SolverError::NotImplemented(
                    format!("csr2dense for {:?} precision", values.precision()),
                )),
                _ => Err(SolverError::Internal(
                    "csr2dense: mismatched buffer precisions".to_string(),
                )),
            }
        }
    }
}
