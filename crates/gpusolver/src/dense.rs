//! Dense dispatch facade: tridiagonal reduction and generation of its unitary factor.
//!
//! Every routine runs the same pipeline before touching a backend:
//!
//! 1. the handle must be live;
//! 2. `n >= 0`, `lda >= max(1, n)`, `uplo` recognized, `lwork >= 0`;
//! 3. data pointers non-null when `n > 0` (`n == 0` returns here without touching
//!    anything);
//! 4. the dense backend is resolved, then called on the handle's sub-handle.
//!
//! The `*_buffer_size` queries share steps 1, 2 and 4 and report scratch sizes in
//! elements of the routine's scalar type.

use std::ffi::{c_char, c_void};
use std::sync::Arc;

use crate::backend::{
    DenseBackend, DenseRoutine, OrgtrArgs, RawContext, SytrdArgs, Workspace, WorkspaceQuery,
};
use crate::handle::{Handle, HandleKind, HandleState, with_state};
use crate::status::{Result, SolverError};
use crate::types::{Fill, Precision, RealScalar, Scalar};

/// `uplo` as it arrived at the API boundary; parsed after the size checks.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Uplo {
    Typed(Fill),
    Raw(i32),
    Char(c_char),
}

impl Uplo {
    fn resolve(self) -> Result<Fill> {
        match self {
            Uplo::Typed(fill) => Ok(fill),
            Uplo::Raw(raw) => Fill::from_raw(raw),
            Uplo::Char(raw) => Fill::from_char(raw),
        }
    }
}

fn check_dims(n: i32, lda: i32) -> Result<()> {
    if n < 0 {
        return Err(SolverError::InvalidSize {
            arg: "n",
            value: n.into(),
        });
    }
    if lda < n.max(1) {
        return Err(SolverError::InvalidSize {
            arg: "lda",
            value: lda.into(),
        });
    }
    Ok(())
}

fn check_lwork(lwork: i32) -> Result<()> {
    if lwork < 0 {
        return Err(SolverError::InvalidSize {
            arg: "lwork",
            value: lwork.into(),
        });
    }
    Ok(())
}

fn require<T>(ptr: *const T, arg: &'static str) -> Result<()> {
    if ptr.is_null() {
        return Err(SolverError::InvalidPointer(arg));
    }
    Ok(())
}

fn bytes_to_elements<T: Scalar>(bytes: usize) -> Result<i32> {
    let elements = bytes.div_ceil(T::PRECISION.element_size());
    i32::try_from(elements)
        .map_err(|_| SolverError::Internal(format!("workspace of {bytes} bytes overflows lwork")))
}

/// Picks the scratch for a call: the caller's buffer if it is large enough, or the
/// handle's pool when `work` is null.
fn workspace<T: Scalar>(
    state: &mut HandleState,
    backend: &Arc<dyn DenseBackend>,
    needed: usize,
    work: *mut T,
    lwork: i32,
) -> Result<Workspace> {
    if work.is_null() {
        if needed == 0 {
            return Ok(Workspace::Managed);
        }
        let ptr = state.scratch(backend, needed)?;
        return Ok(Workspace::Provided { ptr, bytes: needed });
    }
    let provided = lwork as usize * T::PRECISION.element_size();
    if provided < needed {
        return Err(SolverError::invalid_value(
            "lwork",
            format!(
                "{lwork} elements provided, {} required",
                needed.div_ceil(T::PRECISION.element_size())
            ),
        ));
    }
    Ok(Workspace::Provided {
        ptr: work.cast::<c_void>(),
        bytes: provided,
    })
}

fn query_bytes(
    state: &mut HandleState,
    routine: DenseRoutine,
    precision: Precision,
    fill: Fill,
    n: i32,
    lda: i32,
) -> Result<(Arc<dyn DenseBackend>, RawContext, usize)> {
    let (backend, ctx) = state.dense()?;
    let query = WorkspaceQuery {
        routine,
        precision,
        fill,
        n,
        lda,
    };
    let bytes = backend.workspace_size(ctx, &query)?;
    Ok((backend, ctx, bytes))
}

#[allow(clippy::too_many_arguments)]
pub(crate) unsafe fn sytrd_impl<T: Scalar>(
    handle: Handle,
    uplo: Uplo,
    n: i32,
    a: *mut T,
    lda: i32,
    d: *mut T::Real,
    e: *mut T::Real,
    tau: *mut T,
    work: *mut T,
    lwork: i32,
) -> Result<()> {
    with_state(handle.0, HandleKind::Dense, |state| {
        check_dims(n, lda)?;
        let fill = uplo.resolve()?;
        check_lwork(lwork)?;
        if n == 0 {
            return Ok(());
        }
        require(a, "A")?;
        require(d, "D")?;
        if n > 1 {
            require(e, "E")?;
            require(tau, "tau")?;
        }
        let (backend, ctx, needed) =
            query_bytes(state, DenseRoutine::Sytrd, T::PRECISION, fill, n, lda)?;
        let work = workspace(state, &backend, needed, work, lwork)?;
        tracing::trace!(
            routine = "sytrd",
            precision = ?T::PRECISION,
            uplo = %fill.as_char(),
            n,
            backend = backend.name(),
            "dispatch"
        );
        let args = SytrdArgs {
            fill,
            n,
            a: T::wrap(a),
            lda,
            d: <T::Real as RealScalar>::wrap_real(d),
            e: <T::Real as RealScalar>::wrap_real(e),
            tau: T::wrap(tau),
        };
        // SAFETY: pointers checked non-null; extents are the caller's contract.
        unsafe { backend.sytrd(ctx, &args, work) }
    })
}

pub(crate) fn sytrd_buffer_size_impl<T: Scalar>(
    handle: Handle,
    uplo: Uplo,
    n: i32,
    lda: i32,
) -> Result<i32> {
    with_state(handle.0, HandleKind::Dense, |state| {
        check_dims(n, lda)?;
        let fill = uplo.resolve()?;
        if n == 0 {
            return Ok(0);
        }
        let (_, _, bytes) = query_bytes(state, DenseRoutine::Sytrd, T::PRECISION, fill, n, lda)?;
        bytes_to_elements::<T>(bytes)
    })
}

#[allow(clippy::too_many_arguments)]
pub(crate) unsafe fn orgtr_impl<T: Scalar>(
    handle: Handle,
    uplo: Uplo,
    n: i32,
    a: *mut T,
    lda: i32,
    tau: *mut T,
    work: *mut T,
    lwork: i32,
) -> Result<()> {
    with_state(handle.0, HandleKind::Dense, |state| {
        check_dims(n, lda)?;
        let fill = uplo.resolve()?;
        check_lwork(lwork)?;
        if n == 0 {
            return Ok(());
        }
        require(a, "A")?;
        if n > 1 {
            require(tau, "tau")?;
        }
        let (backend, ctx, needed) =
            query_bytes(state, DenseRoutine::Orgtr, T::PRECISION, fill, n, lda)?;
        let work = workspace(state, &backend, needed, work, lwork)?;
        tracing::trace!(
            routine = "orgtr",
            precision = ?T::PRECISION,
            uplo = %fill.as_char(),
            n,
            backend = backend.name(),
            "dispatch"
        );
        let args = OrgtrArgs {
            fill,
            n,
            a: T::wrap(a),
            lda,
            tau: T::wrap(tau),
        };
        // SAFETY: pointers checked non-null; extents are the caller's contract.
        unsafe { backend.orgtr(ctx, &args, work) }
    })
}

pub(crate) fn orgtr_buffer_size_impl<T: Scalar>(
    handle: Handle,
    uplo: Uplo,
    n: i32,
    lda: i32,
) -> Result<i32> {
    with_state(handle.0, HandleKind::Dense, |state| {
        check_dims(n, lda)?;
        let fill = uplo.resolve()?;
        if n == 0 {
            return Ok(0);
        }
        let (_, _, bytes) = query_bytes(state, DenseRoutine::Orgtr, T::PRECISION, fill, n, lda)?;
        bytes_to_elements::<T>(bytes)
    })
}

/// Reduces the symmetric (Hermitian for complex `T`) matrix `a` to real tridiagonal
/// form `T = Q^H A Q`, leaving the reflectors that define `Q` in `a`.
///
/// `work` may be null, in which case the handle's scratch pool is used; otherwise it
/// must hold at least [`sytrd_buffer_size`] elements.
///
/// # Safety
/// `a` must be valid for `lda * n` elements, `d` for `n`, and `e`/`tau` for `n - 1`,
/// all in the dense backend's memory space.
#[allow(clippy::too_many_arguments)]
pub unsafe fn sytrd<T: Scalar>(
    handle: Handle,
    uplo: Fill,
    n: i32,
    a: *mut T,
    lda: i32,
    d: *mut T::Real,
    e: *mut T::Real,
    tau: *mut T,
    work: *mut T,
    lwork: i32,
) -> Result<()> {
    // SAFETY: forwarded caller contract.
    unsafe { sytrd_impl(handle, Uplo::Typed(uplo), n, a, lda, d, e, tau, work, lwork) }
}

/// Scratch elements [`sytrd`] needs for this shape.
pub fn sytrd_buffer_size<T: Scalar>(handle: Handle, uplo: Fill, n: i32, lda: i32) -> Result<i32> {
    sytrd_buffer_size_impl::<T>(handle, Uplo::Typed(uplo), n, lda)
}

/// Overwrites the reflectors produced by [`sytrd`] with the explicit `Q`.
///
/// # Safety
/// `a` must be valid for `lda * n` elements and `tau` for `n - 1`, in the dense
/// backend's memory space; a non-null `work` must hold `lwork` elements.
#[allow(clippy::too_many_arguments)]
pub unsafe fn orgtr<T: Scalar>(
    handle: Handle,
    uplo: Fill,
    n: i32,
    a: *mut T,
    lda: i32,
    tau: *mut T,
    work: *mut T,
    lwork: i32,
) -> Result<()> {
    // SAFETY: forwarded caller contract.
    unsafe { orgtr_impl(handle, Uplo::Typed(uplo), n, a, lda, tau, work, lwork) }
}

pub fn orgtr_buffer_size<T: Scalar>(handle: Handle, uplo: Fill, n: i32, lda: i32) -> Result<i32> {
    orgtr_buffer_size_impl::<T>(handle, Uplo::Typed(uplo), n, lda)
}

/// LAPACK spelling of [`sytrd`] for complex precisions.
pub use self::sytrd as hetrd;
/// LAPACK spelling of [`sytrd_buffer_size`] for complex precisions.
pub use self::sytrd_buffer_size as hetrd_buffer_size;
/// LAPACK spelling of [`orgtr`] for complex precisions.
pub use self::orgtr as ungtr;
/// LAPACK spelling of [`orgtr_buffer_size`] for complex precisions.
pub use self::orgtr_buffer_size as ungtr_buffer_size;
