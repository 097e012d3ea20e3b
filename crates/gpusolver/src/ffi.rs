//! C ABI.
//!
//! Every routine is exported twice: a C spelling taking scalars by value and `uplo`
//! as the integer fill mode, and a legacy Fortran spelling (lower case, trailing
//! underscore) taking every argument by reference and `uplo` as a character. Both
//! run the same implementation.
//!
//! No call unwinds across the boundary: a panic becomes
//! `GPUSOLVER_STATUS_INTERNAL_ERROR`. The message of the last failed call on the
//! current thread is kept for [`gpusolver_get_last_error`].

use std::cell::RefCell;
use std::ffi::{CString, c_char};
use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::backend::MatDescr;
use crate::dense::{self, Uplo};
use crate::handle::{self, Handle, SpHandle};
use crate::sparse::{self, CsrSystem};
use crate::status::{Result, SolverError, Status};
use crate::types::{GpuComplex32, GpuComplex64, IndexBase, MatrixType, Stream};

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(message: String) {
    let message = CString::new(message)
        .unwrap_or_else(|_| c"error message contained a NUL byte".to_owned());
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(message));
}

fn clear_last_error() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

/// Runs one entry point body and converts its outcome into a wire status.
fn guard(entry: &'static str, call: impl FnOnce() -> Result<()>) -> Status {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(())) => {
            clear_last_error();
            Status::Success
        }
        Ok(Err(err)) => {
            tracing::debug!(entry, error = %err, "call failed");
            let status = err.status();
            set_last_error(format!("{entry}: {err}"));
            status
        }
        Err(_) => {
            tracing::error!(entry, "panic caught at the C boundary");
            set_last_error(format!("{entry}: internal panic"));
            Status::InternalError
        }
    }
}

/// Reads a by-reference argument.
///
/// # Safety
/// A non-null `ptr` must be valid for reads.
unsafe fn read<T: Copy>(ptr: *const T, arg: &'static str) -> Result<T> {
    if ptr.is_null() {
        return Err(SolverError::InvalidPointer(arg));
    }
    // SAFETY: non-null; validity is the caller's contract.
    Ok(unsafe { ptr.read() })
}

/// Borrows an output argument.
///
/// # Safety
/// A non-null `ptr` must be valid for writes.
unsafe fn out<'a, T>(ptr: *mut T, arg: &'static str) -> Result<&'a mut T> {
    // SAFETY: validity of a non-null pointer is the caller's contract.
    unsafe { ptr.as_mut() }.ok_or(SolverError::InvalidPointer(arg))
}

/// Returns the static name of a status code.
#[unsafe(no_mangle)]
pub extern "C" fn gpusolver_status_to_string(status: i32) -> *const c_char {
    Status::from_raw(status).map_or(c"GPUSOLVER_STATUS_UNKNOWN".as_ptr(), |status| {
        status.as_ptr()
    })
}

/// Message of the last failed call on this thread, or null after a success. Valid
/// until the next call on the same thread.
#[unsafe(no_mangle)]
pub extern "C" fn gpusolver_get_last_error() -> *const c_char {
    LAST_ERROR.with(|slot| {
        slot.borrow()
            .as_ref()
            .map_or(std::ptr::null(), |message| message.as_ptr())
    })
}

// Dense handles.

/// # Safety
/// `handle` must be null or valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn gpusolver_create(handle: *mut Handle) -> Status {
    guard("gpusolver_create", || {
        // SAFETY: forwarded caller contract.
        *unsafe { out(handle, "handle") }? = handle::create();
        Ok(())
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn gpusolver_destroy(handle: Handle) -> Status {
    guard("gpusolver_destroy", || handle::destroy(handle))
}

#[unsafe(no_mangle)]
pub extern "C" fn gpusolver_set_stream(handle: Handle, stream: Stream) -> Status {
    guard("gpusolver_set_stream", || handle::set_stream(handle, stream))
}

/// # Safety
/// `stream` must be null or valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn gpusolver_get_stream(handle: Handle, stream: *mut Stream) -> Status {
    guard("gpusolver_get_stream", || {
        let bound = handle::get_stream(handle)?;
        // SAFETY: forwarded caller contract.
        *unsafe { out(stream, "stream") }? = bound;
        Ok(())
    })
}

// Sparse handles.

/// # Safety
/// `handle` must be null or valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn gpusolver_sp_create(handle: *mut SpHandle) -> Status {
    guard("gpusolver_sp_create", || {
        // SAFETY: forwarded caller contract.
        *unsafe { out(handle, "handle") }? = handle::sp_create();
        Ok(())
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn gpusolver_sp_destroy(handle: SpHandle) -> Status {
    guard("gpusolver_sp_destroy", || handle::sp_destroy(handle))
}

#[unsafe(no_mangle)]
pub extern "C" fn gpusolver_sp_set_stream(handle: SpHandle, stream: Stream) -> Status {
    guard("gpusolver_sp_set_stream", || handle::sp_set_stream(handle, stream))
}

/// # Safety
/// `stream` must be null or valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn gpusolver_sp_get_stream(handle: SpHandle, stream: *mut Stream) -> Status {
    guard("gpusolver_sp_get_stream", || {
        let bound = handle::sp_get_stream(handle)?;
        // SAFETY: forwarded caller contract.
        *unsafe { out(stream, "stream") }? = bound;
        Ok(())
    })
}

// Matrix descriptors.

/// # Safety
/// `descr` must be null or valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn gpusolver_sp_create_mat_descr(descr: *mut MatDescr) -> Status {
    guard("gpusolver_sp_create_mat_descr", || {
        // SAFETY: forwarded caller contract.
        let slot = unsafe { out(descr, "descrA") }?;
        *slot = sparse::create_mat_descr()?;
        Ok(())
    })
}

/// # Safety
/// `descr` must come from [`gpusolver_sp_create_mat_descr`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn gpusolver_sp_destroy_mat_descr(descr: MatDescr) -> Status {
    // SAFETY: forwarded caller contract.
    guard("gpusolver_sp_destroy_mat_descr", || unsafe {
        sparse::destroy_mat_descr(descr)
    })
}

/// # Safety
/// `descr` must be a live descriptor.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn gpusolver_sp_set_mat_index_base(descr: MatDescr, base: i32) -> Status {
    guard("gpusolver_sp_set_mat_index_base", || {
        let base = IndexBase::from_raw(base)?;
        // SAFETY: forwarded caller contract.
        unsafe { sparse::set_mat_index_base(descr, base) }
    })
}

/// # Safety
/// `descr` must be a live descriptor and `base` null or valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn gpusolver_sp_get_mat_index_base(descr: MatDescr, base: *mut i32) -> Status {
    guard("gpusolver_sp_get_mat_index_base", || {
        // SAFETY: forwarded caller contract.
        let value = unsafe { sparse::get_mat_index_base(descr) }?;
        *unsafe { out(base, "base") }? = value as i32;
        Ok(())
    })
}

/// # Safety
/// `descr` must be a live descriptor.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn gpusolver_sp_set_mat_type(descr: MatDescr, matrix_type: i32) -> Status {
    guard("gpusolver_sp_set_mat_type", || {
        let matrix_type = MatrixType::from_raw(matrix_type)?;
        // SAFETY: forwarded caller contract.
        unsafe { sparse::set_mat_type(descr, matrix_type) }
    })
}

/// # Safety
/// `descr` must be a live descriptor and `matrix_type` null or valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn gpusolver_sp_get_mat_type(descr: MatDescr, matrix_type: *mut i32) -> Status {
    guard("gpusolver_sp_get_mat_type", || {
        // SAFETY: forwarded caller contract.
        let value = unsafe { sparse::get_mat_type(descr) }?;
        *unsafe { out(matrix_type, "type") }? = value as i32;
        Ok(())
    })
}

// Tridiagonal reduction.

macro_rules! sytrd_entry {
    ($c:ident, $c_size:ident, $fortran:ident, $fortran_size:ident, $t:ty, $real:ty) => {
        /// # Safety
        /// `a` must be valid for `lda * n` elements, `d` for `n`, `e` and `tau` for
        /// `n - 1`; a non-null `work` must hold `lwork` elements.
        #[unsafe(no_mangle)]
        #[allow(clippy::too_many_arguments)]
        pub unsafe extern "C" fn $c(
            handle: Handle,
            uplo: i32,
            n: i32,
            a: *mut $t,
            lda: i32,
            d: *mut $real,
            e: *mut $real,
            tau: *mut $t,
            work: *mut $t,
            lwork: i32,
        ) -> Status {
            // SAFETY: forwarded caller contract.
            guard(stringify!($c), || unsafe {
                dense::sytrd_impl::<$t>(handle, Uplo::Raw(uplo), n, a, lda, d, e, tau, work, lwork)
            })
        }

        /// Writes the scratch size, in elements, to `lwork`. `a` is not read.
        ///
        /// # Safety
        /// `lwork` must be null or valid for writes.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn $c_size(
            handle: Handle,
            uplo: i32,
            n: i32,
            _a: *const $t,
            lda: i32,
            lwork: *mut i32,
        ) -> Status {
            guard(stringify!($c_size), || {
                let size = dense::sytrd_buffer_size_impl::<$t>(handle, Uplo::Raw(uplo), n, lda)?;
                // SAFETY: forwarded caller contract.
                *unsafe { out(lwork, "lwork") }? = size;
                Ok(())
            })
        }

        /// # Safety
        /// Scalar arguments must be null or readable; arrays as for the C spelling.
        #[unsafe(no_mangle)]
        #[allow(clippy::too_many_arguments)]
        pub unsafe extern "C" fn $fortran(
            handle: *const Handle,
            uplo: *const c_char,
            n: *const i32,
            a: *mut $t,
            lda: *const i32,
            d: *mut $real,
            e: *mut $real,
            tau: *mut $t,
            work: *mut $t,
            lwork: *const i32,
        ) -> Status {
            // SAFETY: forwarded caller contract.
            guard(stringify!($fortran), || unsafe {
                let handle = read(handle, "handle")?;
                let uplo = Uplo::Char(read(uplo, "uplo")?);
                let (n, lda, lwork) = (read(n, "n")?, read(lda, "lda")?, read(lwork, "lwork")?);
                dense::sytrd_impl::<$t>(handle, uplo, n, a, lda, d, e, tau, work, lwork)
            })
        }

        /// # Safety
        /// Scalar arguments must be null or readable; `lwork` null or writable.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn $fortran_size(
            handle: *const Handle,
            uplo: *const c_char,
            n: *const i32,
            _a: *const $t,
            lda: *const i32,
            lwork: *mut i32,
        ) -> Status {
            // SAFETY: forwarded caller contract.
            guard(stringify!($fortran_size), || unsafe {
                let handle = read(handle, "handle")?;
                let uplo = Uplo::Char(read(uplo, "uplo")?);
                let (n, lda) = (read(n, "n")?, read(lda, "lda")?);
                let size = dense::sytrd_buffer_size_impl::<$t>(handle, uplo, n, lda)?;
                *out(lwork, "lwork")? = size;
                Ok(())
            })
        }
    };
}

sytrd_entry!(
    gpusolver_ssytrd,
    gpusolver_ssytrd_buffer_size,
    gpusolver_ssytrd_,
    gpusolver_ssytrd_buffer_size_,
    f32,
    f32
);
sytrd_entry!(
    gpusolver_dsytrd,
    gpusolver_dsytrd_buffer_size,
    gpusolver_dsytrd_,
    gpusolver_dsytrd_buffer_size_,
    f64,
    f64
);
sytrd_entry!(
    gpusolver_chetrd,
    gpusolver_chetrd_buffer_size,
    gpusolver_chetrd_,
    gpusolver_chetrd_buffer_size_,
    GpuComplex32,
    f32
);
sytrd_entry!(
    gpusolver_zhetrd,
    gpusolver_zhetrd_buffer_size,
    gpusolver_zhetrd_,
    gpusolver_zhetrd_buffer_size_,
    GpuComplex64,
    f64
);

// Generation of Q.

macro_rules! orgtr_entry {
    ($c:ident, $c_size:ident, $fortran:ident, $fortran_size:ident, $t:ty) => {
        /// # Safety
        /// `a` must be valid for `lda * n` elements and `tau` for `n - 1`; a non-null
        /// `work` must hold `lwork` elements.
        #[unsafe(no_mangle)]
        #[allow(clippy::too_many_arguments)]
        pub unsafe extern "C" fn $c(
            handle: Handle,
            uplo: i32,
            n: i32,
            a: *mut $t,
            lda: i32,
            tau: *mut $t,
            work: *mut $t,
            lwork: i32,
        ) -> Status {
            // SAFETY: forwarded caller contract.
            guard(stringify!($c), || unsafe {
                dense::orgtr_impl::<$t>(handle, Uplo::Raw(uplo), n, a, lda, tau, work, lwork)
            })
        }

        /// Writes the scratch size, in elements, to `lwork`. `a` is not read.
        ///
        /// # Safety
        /// `lwork` must be null or valid for writes.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn $c_size(
            handle: Handle,
            uplo: i32,
            n: i32,
            _a: *const $t,
            lda: i32,
            lwork: *mut i32,
        ) -> Status {
            guard(stringify!($c_size), || {
                let size = dense::orgtr_buffer_size_impl::<$t>(handle, Uplo::Raw(uplo), n, lda)?;
                // SAFETY: forwarded caller contract.
                *unsafe { out(lwork, "lwork") }? = size;
                Ok(())
            })
        }

        /// # Safety
        /// Scalar arguments must be null or readable; arrays as for the C spelling.
        #[unsafe(no_mangle)]
        #[allow(clippy::too_many_arguments)]
        pub unsafe extern "C" fn $fortran(
            handle: *const Handle,
            uplo: *const c_char,
            n: *const i32,
            a: *mut $t,
            lda: *const i32,
            tau: *mut $t,
            work: *mut $t,
            lwork: *const i32,
        ) -> Status {
            // SAFETY: forwarded caller contract.
            guard(stringify!($fortran), || unsafe {
                let handle = read(handle, "handle")?;
                let uplo = Uplo::Char(read(uplo, "uplo")?);
                let (n, lda, lwork) = (read(n, "n")?, read(lda, "lda")?, read(lwork, "lwork")?);
                dense::orgtr_impl::<$t>(handle, uplo, n, a, lda, tau, work, lwork)
            })
        }

        /// # Safety
        /// Scalar arguments must be null or readable; `lwork` null or writable.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn $fortran_size(
            handle: *const Handle,
            uplo: *const c_char,
            n: *const i32,
            _a: *const $t,
            lda: *const i32,
            lwork: *mut i32,
        ) -> Status {
            // SAFETY: forwarded caller contract.
            guard(stringify!($fortran_size), || unsafe {
                let handle = read(handle, "handle")?;
                let uplo = Uplo::Char(read(uplo, "uplo")?);
                let (n, lda) = (read(n, "n")?, read(lda, "lda")?);
                let size = dense::orgtr_buffer_size_impl::<$t>(handle, uplo, n, lda)?;
                *out(lwork, "lwork")? = size;
                Ok(())
            })
        }
    };
}

orgtr_entry!(
    gpusolver_sorgtr,
    gpusolver_sorgtr_buffer_size,
    gpusolver_sorgtr_,
    gpusolver_sorgtr_buffer_size_,
    f32
);
orgtr_entry!(
    gpusolver_dorgtr,
    gpusolver_dorgtr_buffer_size,
    gpusolver_dorgtr_,
    gpusolver_dorgtr_buffer_size_,
    f64
);
orgtr_entry!(
    gpusolver_cungtr,
    gpusolver_cungtr_buffer_size,
    gpusolver_cungtr_,
    gpusolver_cungtr_buffer_size_,
    GpuComplex32
);
orgtr_entry!(
    gpusolver_zungtr,
    gpusolver_zungtr_buffer_size,
    gpusolver_zungtr_,
    gpusolver_zungtr_buffer_size_,
    GpuComplex64
);

// Sparse direct solves.

macro_rules! csrlsv_entry {
    ($c:ident, $fortran:ident, $solve:path, $t:ty) => {
        csrlsv_entry!($c, $solve, $t);

        /// # Safety
        /// Scalar arguments must be null or readable; arrays as for the C spelling.
        #[unsafe(no_mangle)]
        #[allow(clippy::too_many_arguments)]
        pub unsafe extern "C" fn $fortran(
            handle: *const SpHandle,
            m: *const i32,
            nnz: *const i32,
            descr: *const MatDescr,
            values: *const $t,
            row_ptr: *const i32,
            col_ind: *const i32,
            b: *const $t,
            tol: *const $t,
            reorder: *const i32,
            x: *mut $t,
            singularity: *mut i32,
        ) -> Status {
            // SAFETY: forwarded caller contract.
            guard(stringify!($fortran), || unsafe {
                let handle = read(handle, "handle")?;
                let sys = CsrSystem {
                    m: read(m, "m")?,
                    nnz: read(nnz, "nnz")?,
                    descr: read(descr, "descrA")?,
                    values,
                    row_ptr,
                    col_ind,
                    b,
                    tol: read(tol, "tol")?,
                    reorder: read(reorder, "reorder")?,
                    x,
                    singularity,
                };
                $solve(handle, &sys)
            })
        }
    };
    ($c:ident, $solve:path, $t:ty) => {
        /// # Safety
        /// `row_ptr` must hold `m + 1` entries, `values`/`col_ind` `nnz`, `b`/`x` `m`;
        /// `singularity` must be writable.
        #[unsafe(no_mangle)]
        #[allow(clippy::too_many_arguments)]
        pub unsafe extern "C" fn $c(
            handle: SpHandle,
            m: i32,
            nnz: i32,
            descr: MatDescr,
            values: *const $t,
            row_ptr: *const i32,
            col_ind: *const i32,
            b: *const $t,
            tol: $t,
            reorder: i32,
            x: *mut $t,
            singularity: *mut i32,
        ) -> Status {
            let sys = CsrSystem {
                m,
                nnz,
                descr,
                values,
                row_ptr,
                col_ind,
                b,
                tol,
                reorder,
                x,
                singularity,
            };
            // SAFETY: forwarded caller contract.
            guard(stringify!($c), || unsafe { $solve(handle, &sys) })
        }
    };
}

csrlsv_entry!(gpusolver_sp_scsrlsvchol, gpusolver_sp_scsrlsvchol_, sparse::csrlsvchol, f32);
csrlsv_entry!(gpusolver_sp_dcsrlsvchol, gpusolver_sp_dcsrlsvchol_, sparse::csrlsvchol, f64);
csrlsv_entry!(
    gpusolver_sp_scsrlsvchol_host,
    gpusolver_sp_scsrlsvchol_host_,
    sparse::csrlsvchol_host,
    f32
);
csrlsv_entry!(
    gpusolver_sp_dcsrlsvchol_host,
    gpusolver_sp_dcsrlsvchol_host_,
    sparse::csrlsvchol_host,
    f64
);
csrlsv_entry!(gpusolver_sp_scsrlsvqr, sparse::csrlsvqr, f32);
csrlsv_entry!(gpusolver_sp_dcsrlsvqr, sparse::csrlsvqr, f64);
