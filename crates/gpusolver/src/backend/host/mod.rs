//! Host reference backends built on nalgebra.
//!
//! They implement the same contracts as the runtime-loaded device libraries but
//! take host pointers, so they report [`MemorySpace::Host`]. The registry only
//! selects them when host fallback is enabled.

pub mod lapack;
mod sparse;

use std::alloc::Layout;
use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use nalgebra::ComplexField;

use super::traits::*;
use crate::status::{Result, SolverError};
use crate::types::{
    MemorySpace, RealPtr, ScalarPtr, Stream, complex32_as_native, complex64_as_native,
};

pub use sparse::HostSparseBackend;

const HOST_ALIGN: usize = 16;

/// Dense backend running the unblocked kernels in [`lapack`] on the calling thread.
#[derive(Default)]
pub struct HostDenseBackend {
    next_context: AtomicUsize,
    allocations: Mutex<HashMap<usize, Layout>>,
}

impl HostDenseBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocations(&self) -> std::sync::MutexGuard<'_, HashMap<usize, Layout>> {
        self.allocations.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("host allocation table lock poisoned; recovering");
            poisoned.into_inner()
        })
    }
}

/// Scratch requirement of the host kernels, in elements.
pub(crate) fn workspace_elements(routine: DenseRoutine, n: usize) -> Result<usize> {
    match routine {
        DenseRoutine::Sytrd => Ok(n),
        DenseRoutine::Orgtr => n.checked_mul(n).ok_or_else(SolverError::size_overflow),
    }
}

fn dim(value: i32) -> usize {
    usize::try_from(value).unwrap_or(0)
}

/// Borrows a column-major buffer of `ld * cols` elements.
///
/// # Safety
/// `ptr` must be valid for that many elements.
unsafe fn matrix<'a, T>(ptr: *mut T, ld: i32, cols: i32) -> &'a mut [T] {
    let len = dim(ld) * dim(cols);
    if len == 0 || ptr.is_null() {
        return &mut [];
    }
    // SAFETY: guaranteed by the caller.
    unsafe { std::slice::from_raw_parts_mut(ptr, len) }
}

/// Scratch of `len` elements: the provided buffer, or a temporary one.
enum Scratch<T> {
    Owned(Vec<T>),
    Provided { ptr: *mut T, len: usize },
}

impl<T: ComplexField + Copy> Scratch<T> {
    fn new(work: Workspace, len: usize) -> Result<Self> {
        match work {
            Workspace::Provided { ptr, bytes } => {
                let needed = len
                    .checked_mul(std::mem::size_of::<T>())
                    .ok_or_else(SolverError::size_overflow)?;
                if bytes < needed || (ptr.is_null() && len > 0) {
                    return Err(SolverError::invalid_value(
                        "work",
                        format!("{bytes} bytes provided, {len} elements required"),
                    ));
                }
                Ok(Scratch::Provided {
                    ptr: ptr.cast(),
                    len,
                })
            }
            Workspace::Managed => Ok(Scratch::Owned(vec![nalgebra::zero::<T>(); len])),
        }
    }

    fn as_mut_slice(&mut self) -> &mut [T] {
        match self {
            Scratch::Owned(buffer) => buffer,
            Scratch::Provided { len: 0, .. } => &mut [],
            // SAFETY: checked against the provided byte count in `new`.
            Scratch::Provided { ptr, len } => unsafe { std::slice::from_raw_parts_mut(*ptr, *len) },
        }
    }
}

unsafe fn sytrd_typed<T: ComplexField + Copy>(
    args: &SytrdArgs,
    a: *mut T,
    d: *mut T::RealField,
    e: *mut T::RealField,
    tau: *mut T,
    work: Workspace,
) -> Result<()> {
    let n = dim(args.n);
    if n == 0 {
        return Ok(());
    }
    let mut scratch = Scratch::<T>::new(work, workspace_elements(DenseRoutine::Sytrd, n)?)?;
    // SAFETY: the facade validated pointers and leading dimensions for `n`.
    unsafe {
        let a = matrix(a, args.lda, args.n);
        let d = matrix(d, 1, args.n);
        let e = matrix(e, 1, args.n - 1);
        let tau = matrix(tau, 1, args.n - 1);
        lapack::sytrd(args.fill, n, a, dim(args.lda), d, e, tau, scratch.as_mut_slice());
    }
    Ok(())
}

unsafe fn orgtr_typed<T: ComplexField + Copy>(
    args: &OrgtrArgs,
    a: *mut T,
    tau: *mut T,
    work: Workspace,
) -> Result<()> {
    let n = dim(args.n);
    if n == 0 {
        return Ok(());
    }
    let mut scratch = Scratch::<T>::new(work, workspace_elements(DenseRoutine::Orgtr, n)?)?;
    // SAFETY: the facade validated pointers and leading dimensions for `n`.
    unsafe {
        let a = matrix(a, args.lda, args.n);
        let tau = matrix(tau, 1, args.n - 1);
        lapack::orgtr(args.fill, n, a, dim(args.lda), tau, scratch.as_mut_slice());
    }
    Ok(())
}

fn mismatch(call: &str) -> SolverError {
    SolverError::Internal(format!("{call}: mismatched buffer precisions"))
}

/// Runs `$body` with `$a` (and the other listed pointers) reinterpreted as the
/// native scalar type matching their shared precision.
macro_rules! with_native {
    ($call:literal, ($($ptr:ident),+), |$($bind:ident),+| $body:expr) => {
        match ($($ptr,)+) {
            ($(ScalarPtr::Single($bind),)+) => $body,
            ($(ScalarPtr::Double($bind),)+) => $body,
            ($(ScalarPtr::ComplexSingle($bind),)+) => {
                $(let $bind = complex32_as_native($bind);)+
                $body
            }
            ($(ScalarPtr::ComplexDouble($bind),)+) => {
                $(let $bind = complex64_as_native($bind);)+
                $body
            }
            _ => Err(mismatch($call)),
        }
    };
}

impl DenseBackend for HostDenseBackend {
    fn name(&self) -> &str {
        "host-lapack"
    }

    fn memory_space(&self) -> MemorySpace {
        MemorySpace::Host
    }

    fn create_context(&self, _stream: Stream) -> Result<RawContext> {
        Ok(RawContext(self.next_context.fetch_add(1, Ordering::Relaxed) + 1))
    }

    fn destroy_context(&self, _ctx: RawContext) -> Result<()> {
        Ok(())
    }

    fn set_stream(&self, _ctx: RawContext, _stream: Stream) -> Result<()> {
        Ok(())
    }

    fn workspace_size(&self, _ctx: RawContext, query: &WorkspaceQuery) -> Result<usize> {
        workspace_elements(query.routine, dim(query.n))?
            .checked_mul(query.precision.element_size())
            .ok_or_else(SolverError::size_overflow)
    }

    unsafe fn sytrd(&self, _ctx: RawContext, args: &SytrdArgs, work: Workspace) -> Result<()> {
        // SAFETY: forwarded caller contract.
        unsafe {
            match (args.a, args.d, args.e, args.tau) {
                (ScalarPtr::Single(a), RealPtr::Single(d), RealPtr::Single(e), ScalarPtr::Single(tau)) => {
                    sytrd_typed(args, a, d, e, tau, work)
                }
                (ScalarPtr::Double(a), RealPtr::Double(d), RealPtr::Double(e), ScalarPtr::Double(tau)) => {
                    sytrd_typed(args, a, d, e, tau, work)
                }
                (
                    ScalarPtr::ComplexSingle(a),
                    RealPtr::Single(d),
                    RealPtr::Single(e),
                    ScalarPtr::ComplexSingle(tau),
                ) => sytrd_typed(args, complex32_as_native(a), d, e, complex32_as_native(tau), work),
                (
                    ScalarPtr::ComplexDouble(a),
                    RealPtr::Double(d),
                    RealPtr::Double(e),
                    ScalarPtr::ComplexDouble(tau),
                ) => sytrd_typed(args, complex64_as_native(a), d, e, complex64_as_native(tau), work),
                _ => Err(mismatch("sytrd")),
            }
        }
    }

    unsafe fn orgtr(&self, _ctx: RawContext, args: &OrgtrArgs, work: Workspace) -> Result<()> {
        let (a, tau) = (args.a, args.tau);
        // SAFETY: forwarded caller contract.
        unsafe { with_native!("orgtr", (a, tau), |a, tau| orgtr_typed(args, a, tau, work)) }
    }

    unsafe fn potrf(&self, _ctx: RawContext, args: &PotrfArgs) -> Result<()> {
        let a = args.a;
        let n = dim(args.n);
        // SAFETY: forwarded caller contract; `info` is a host pointer here.
        unsafe {
            let info = with_native!("potrf", (a), |a| {
                Ok(lapack::potrf(args.fill, n, matrix(a, args.lda, args.n), dim(args.lda)))
            })?;
            if !args.info.is_null() {
                *args.info = info;
            }
        }
        Ok(())
    }

    unsafe fn potrs(&self, _ctx: RawContext, args: &PotrsArgs) -> Result<()> {
        let (a, b) = (args.a, args.b);
        // SAFETY: forwarded caller contract.
        unsafe {
            with_native!("potrs", (a, b), |a, b| {
                lapack::potrs(
                    args.fill,
                    dim(args.n),
                    dim(args.nrhs),
                    matrix(a, args.lda, args.n),
                    dim(args.lda),
                    matrix(b, args.ldb, args.nrhs),
                    dim(args.ldb),
                );
                Ok(())
            })
        }
    }

    unsafe fn geqrf(&self, _ctx: RawContext, args: &GeqrfArgs) -> Result<()> {
        let (a, tau) = (args.a, args.tau);
        let k = args.m.min(args.n);
        // SAFETY: forwarded caller contract.
        unsafe {
            with_native!("geqrf", (a, tau), |a, tau| {
                lapack::geqrf(
                    dim(args.m),
                    dim(args.n),
                    matrix(a, args.lda, args.n),
                    dim(args.lda),
                    matrix(tau, 1, k),
                );
                Ok(())
            })
        }
    }

    unsafe fn ormqr(&self, _ctx: RawContext, args: &OrmqrArgs) -> Result<()> {
        let (a, tau, c) = (args.a, args.tau, args.c);
        // SAFETY: forwarded caller contract.
        unsafe {
            with_native!("ormqr", (a, tau, c), |a, tau, c| {
                lapack::ormqr(
                    dim(args.m),
                    dim(args.n),
                    dim(args.k),
                    matrix(a, args.lda, args.k),
                    dim(args.lda),
                    matrix(tau, 1, args.k),
                    matrix(c, args.ldc, args.n),
                    dim(args.ldc),
                );
                Ok(())
            })
        }
    }

    unsafe fn trsv(&self, _ctx: RawContext, args: &TrsvArgs) -> Result<()> {
        let (a, x) = (args.a, args.x);
        // SAFETY: forwarded caller contract.
        unsafe {
            with_native!("trsv", (a, x), |a, x| {
                lapack::trsv_upper(
                    dim(args.n),
                    matrix(a, args.lda, args.n),
                    dim(args.lda),
                    matrix(x, 1, args.n),
                );
                Ok(())
            })
        }
    }

    fn alloc(&self, bytes: usize) -> Result<*mut c_void> {
        let layout = Layout::from_size_align(bytes.max(1), HOST_ALIGN)
            .map_err(|_| SolverError::AllocFailed { bytes })?;
        // SAFETY: layout has a nonzero size.
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(SolverError::AllocFailed { bytes });
        }
        self.allocations().insert(ptr as usize, layout);
        Ok(ptr.cast())
    }

    unsafe fn free(&self, ptr: *mut c_void) -> Result<()> {
        if ptr.is_null() {
            return Ok(());
        }
        let layout = self.allocations().remove(&(ptr as usize)).ok_or_else(|| {
            SolverError::invalid_value("ptr", "pointer was not allocated by this backend")
        })?;
        // SAFETY: allocated in `alloc` with exactly this layout.
        unsafe { std::alloc::dealloc(ptr.cast(), layout) };
        Ok(())
    }

    unsafe fn copy(
        &self,
        _stream: Stream,
        dst: *mut c_void,
        src: *const c_void,
        bytes: usize,
        _kind: CopyKind,
    ) -> Result<()> {
        if bytes == 0 {
            return Ok(());
        }
        // SAFETY: both buffers are host memory valid for `bytes`.
        unsafe { std::ptr::copy(src.cast::<u8>(), dst.cast::<u8>(), bytes) };
        Ok(())
    }

    fn synchronize(&self, _stream: Stream) -> Result<()> {
        Ok(())
    }
}

impl Drop for HostDenseBackend {
    fn drop(&mut self) {
        let allocations = std::mem::take(
            self.allocations
                .get_mut()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for (ptr, layout) in allocations {
            // SAFETY: every entry is a live allocation made with its layout.
            unsafe { std::alloc::dealloc(ptr as *mut u8, layout) };
        }
    }
}
