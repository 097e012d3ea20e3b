//! Sparse dispatch facade: matrix descriptors and direct CSR solves.
//!
//! A solve expands the CSR matrix into a dense scratch matrix through the sparse
//! backend and factorizes it with the dense backend:
//!
//! ```text
//! CSR ──csr2dense──► A ──potrf──► L L^T ──potrs──► x          (Cholesky)
//!                    A ──geqrf──► Q R ──ormqr, trsv──► x       (QR)
//! ```
//!
//! A zero (or below-tolerance) pivot stops the solve before `x` is written: the
//! pivot row is reported in the descriptor's index base and the call returns
//! [`SolverError::ZeroPivot`]. Otherwise the singularity output is `-1`.

use std::ffi::c_void;
use std::sync::Arc;

use crate::backend::{
    CopyKind, Csr2DenseArgs, DenseBackend, GeqrfArgs, MatDescr, OrmqrArgs, PotrfArgs, PotrsArgs,
    RawContext, SparseBackend, TrsvArgs, registry,
};
use crate::handle::{HandleKind, SpHandle, with_state};
use crate::status::{Result, SolverError};
use crate::types::{Fill, IndexBase, MatrixType, RealScalar, Scalar, Stream};

const STAGING_ALIGN: usize = 16;

fn require<T>(ptr: *const T, arg: &'static str) -> Result<()> {
    if ptr.is_null() {
        return Err(SolverError::InvalidPointer(arg));
    }
    Ok(())
}

fn require_descr(descr: MatDescr) -> Result<()> {
    if descr.is_null() {
        return Err(SolverError::InvalidPointer("descrA"));
    }
    Ok(())
}

/// Creates a matrix descriptor (general, zero-based) on the sparse backend.
pub fn create_mat_descr() -> Result<MatDescr> {
    registry().sparse()?.create_mat_descr()
}

/// # Safety
/// `descr` must come from [`create_mat_descr`] and is invalid afterwards.
pub unsafe fn destroy_mat_descr(descr: MatDescr) -> Result<()> {
    require_descr(descr)?;
    // SAFETY: forwarded caller contract.
    unsafe { registry().sparse()?.destroy_mat_descr(descr) }
}

/// # Safety
/// `descr` must be a live descriptor.
pub unsafe fn set_mat_index_base(descr: MatDescr, base: IndexBase) -> Result<()> {
    require_descr(descr)?;
    // SAFETY: forwarded caller contract.
    unsafe { registry().sparse()?.set_index_base(descr, base) }
}

/// # Safety
/// `descr` must be a live descriptor.
pub unsafe fn get_mat_index_base(descr: MatDescr) -> Result<IndexBase> {
    require_descr(descr)?;
    // SAFETY: forwarded caller contract.
    unsafe { registry().sparse()?.index_base(descr) }
}

/// # Safety
/// `descr` must be a live descriptor.
pub unsafe fn set_mat_type(descr: MatDescr, matrix_type: MatrixType) -> Result<()> {
    require_descr(descr)?;
    // SAFETY: forwarded caller contract.
    unsafe { registry().sparse()?.set_matrix_type(descr, matrix_type) }
}

/// # Safety
/// `descr` must be a live descriptor.
pub unsafe fn get_mat_type(descr: MatDescr) -> Result<MatrixType> {
    require_descr(descr)?;
    // SAFETY: forwarded caller contract.
    unsafe { registry().sparse()?.matrix_type(descr) }
}

/// A square CSR system `A x = b` as passed across the API.
#[derive(Debug, Clone, Copy)]
pub struct CsrSystem<T: RealScalar> {
    pub m: i32,
    pub nnz: i32,
    pub descr: MatDescr,
    pub values: *const T,
    pub row_ptr: *const i32,
    pub col_ind: *const i32,
    pub b: *const T,
    /// Pivots with magnitude at or below this are treated as zero.
    pub tol: T,
    /// Accepted for interface compatibility; `0` or `1`.
    pub reorder: i32,
    pub x: *mut T,
    pub singularity: *mut i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Cholesky,
    Qr,
}

/// Where the caller's arrays live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    /// In the backends' memory space.
    Backend,
    /// In host memory; staged through the handle's scratch.
    Host,
}

/// End of a region of `count` items of `size` bytes starting at `start`, rounded up
/// to the staging alignment.
fn region_end(start: usize, count: usize, size: usize) -> Result<usize> {
    count
        .checked_mul(size)
        .and_then(|bytes| start.checked_add(bytes))
        .and_then(|end| end.checked_next_multiple_of(STAGING_ALIGN))
        .ok_or_else(SolverError::size_overflow)
}

/// Byte offsets of the regions a solve carves out of the handle's scratch.
#[derive(Debug, Clone, Copy)]
struct StagingLayout {
    dense: usize,
    info: usize,
    tau: usize,
    values: usize,
    row_ptr: usize,
    col_ind: usize,
    x: usize,
    total: usize,
}

impl StagingLayout {
    fn new<T: Scalar>(n: usize, nnz: usize, method: Method, placement: Placement) -> Result<Self> {
        let elem = T::PRECISION.element_size();
        let int = std::mem::size_of::<i32>();
        let dense = 0;
        let cells = n.checked_mul(n).ok_or_else(SolverError::size_overflow)?;
        let info = region_end(dense, cells, elem)?;
        let tau = region_end(info, 1, int)?;
        let mut end = match method {
            Method::Cholesky => tau,
            Method::Qr => region_end(tau, n, elem)?,
        };
        let (values, row_ptr, col_ind, x);
        if placement == Placement::Host {
            values = end;
            row_ptr = region_end(values, nnz, elem)?;
            col_ind = region_end(row_ptr, n + 1, int)?;
            x = region_end(col_ind, nnz, int)?;
            end = region_end(x, n, elem)?;
        } else {
            (values, row_ptr, col_ind, x) = (end, end, end, end);
        }
        Ok(Self {
            dense,
            info,
            tau,
            values,
            row_ptr,
            col_ind,
            x,
            total: end,
        })
    }
}

fn validate<T: RealScalar>(sys: &CsrSystem<T>) -> Result<()> {
    if sys.m < 0 {
        return Err(SolverError::InvalidSize {
            arg: "m",
            value: sys.m.into(),
        });
    }
    if sys.nnz < 0 {
        return Err(SolverError::InvalidSize {
            arg: "nnz",
            value: sys.nnz.into(),
        });
    }
    let tol: f64 = sys.tol.into();
    if tol.is_nan() || tol < 0.0 {
        return Err(SolverError::invalid_value("tol", format!("{tol} is negative")));
    }
    if !matches!(sys.reorder, 0 | 1) {
        return Err(SolverError::invalid_value(
            "reorder",
            format!("expected 0 or 1, got {}", sys.reorder),
        ));
    }
    if sys.m == 0 {
        return Ok(());
    }
    require_descr(sys.descr)?;
    require(sys.row_ptr, "csrRowPtrA")?;
    if sys.nnz > 0 {
        require(sys.values, "csrValA")?;
        require(sys.col_ind, "csrColIndA")?;
    }
    require(sys.b, "b")?;
    require(sys.x, "x")?;
    require(sys.singularity, "singularity")?;
    Ok(())
}

/// Borrowed view of the two backends a solve runs on.
struct Backends {
    sparse: Arc<dyn SparseBackend>,
    sparse_ctx: RawContext,
    dense: Arc<dyn DenseBackend>,
    dense_ctx: RawContext,
    stream: Stream,
}

impl Backends {
    /// # Safety
    /// `dst` and `src` must be valid for `bytes` in the spaces `kind` names.
    unsafe fn copy(&self, dst: *mut c_void, src: *const c_void, bytes: usize, kind: CopyKind) -> Result<()> {
        if bytes == 0 {
            return Ok(());
        }
        // SAFETY: forwarded caller contract.
        unsafe { self.dense.copy(self.stream, dst, src, bytes, kind) }
    }

    /// Number of non-zeros `row_ptr` describes, read from `row_ptr[m]`.
    ///
    /// # Safety
    /// `row_ptr` must hold `m + 1` entries, in host memory for [`Placement::Host`] and
    /// in the backend memory space otherwise.
    unsafe fn structure_nnz(
        &self,
        row_ptr: *const i32,
        m: usize,
        base: IndexBase,
        placement: Placement,
    ) -> Result<i64> {
        // SAFETY: `m` is in bounds per the caller.
        let last = unsafe { row_ptr.add(m) };
        let raw = match placement {
            // SAFETY: host pointer, see above.
            Placement::Host => unsafe { last.read_unaligned() },
            Placement::Backend => {
                let mut raw = 0i32;
                // SAFETY: see above.
                unsafe {
                    self.copy(
                        (&mut raw as *mut i32).cast(),
                        last.cast(),
                        std::mem::size_of::<i32>(),
                        CopyKind::DeviceToHost,
                    )?;
                }
                self.dense.synchronize(self.stream)?;
                raw
            }
        };
        Ok(i64::from(raw) - i64::from(base.offset()))
    }

    /// First diagonal index of the `n x n` matrix at `a` whose magnitude is `<= tol`.
    ///
    /// # Safety
    /// `a` must be valid for `n * n` elements in the backend memory space.
    unsafe fn small_pivot<T: RealScalar>(&self, a: *mut T, n: usize, tol: f64) -> Result<Option<usize>> {
        let mut diagonal = vec![T::default(); n];
        for (j, slot) in diagonal.iter_mut().enumerate() {
            // SAFETY: `j * (n + 1) < n * n` for every `j < n`.
            unsafe {
                self.copy(
                    (slot as *mut T).cast(),
                    a.add(j * (n + 1)).cast_const().cast(),
                    std::mem::size_of::<T>(),
                    CopyKind::DeviceToHost,
                )?;
            }
        }
        self.dense.synchronize(self.stream)?;
        Ok(diagonal.iter().position(|value| {
            let magnitude: f64 = (*value).into();
            magnitude.abs() <= tol
        }))
    }
}

/// Runs a direct CSR solve on a sparse handle.
///
/// # Safety
/// The arrays in `sys` must be valid for the extents their sizes describe and live in
/// the memory space named by `placement`.
unsafe fn csrlsv<T: RealScalar>(
    handle: SpHandle,
    method: Method,
    placement: Placement,
    sys: &CsrSystem<T>,
) -> Result<()> {
    with_state(handle.0, HandleKind::Sparse, |state| {
        validate(sys)?;
        if sys.m == 0 {
            return Ok(());
        }
        let (sparse, sparse_ctx) = state.sparse()?;
        // SAFETY: descriptor validated non-null; liveness is the caller's contract.
        let matrix_type = unsafe { sparse.matrix_type(sys.descr) }?;
        if matrix_type != MatrixType::General {
            return Err(SolverError::NotImplemented(format!(
                "direct solve for {matrix_type:?} descriptors"
            )));
        }
        // SAFETY: as above.
        let base = unsafe { sparse.index_base(sys.descr) }?;
        let (dense, dense_ctx) = state.dense()?;
        if sparse.memory_space() != dense.memory_space() {
            return Err(SolverError::ArchMismatch(format!(
                "sparse backend {} uses {:?} memory, dense backend {} uses {:?}",
                sparse.name(),
                sparse.memory_space(),
                dense.name(),
                dense.memory_space()
            )));
        }
        let n = sys.m as usize;
        let nnz = sys.nnz as usize;
        let elem = std::mem::size_of::<T>();
        let layout = StagingLayout::new::<T>(n, nnz, method, placement)?;
        let scratch = state.scratch(&dense, layout.total)?.cast::<u8>();
        let backends = Backends {
            sparse,
            sparse_ctx,
            dense,
            dense_ctx,
            stream: state.stream(),
        };
        let routine = match method {
            Method::Cholesky => "csrlsvchol",
            Method::Qr => "csrlsvqr",
        };
        tracing::trace!(
            routine,
            precision = ?T::PRECISION,
            ?placement,
            n,
            nnz,
            "dispatch"
        );

        // SAFETY: `row_ptr` was checked non-null and holds `m + 1` entries.
        let described = unsafe { backends.structure_nnz(sys.row_ptr, n, base, placement) }?;
        if described != i64::from(sys.nnz) {
            return Err(SolverError::invalid_value(
                "nnz",
                format!("{} given, csrRowPtrA describes {described}", sys.nnz),
            ));
        }

        // SAFETY: every region lies inside the `layout.total` bytes reserved above, and
        // the caller's arrays were checked non-null with the extents given in `sys`.
        unsafe {
            let region = |offset: usize| scratch.add(offset);
            let a = region(layout.dense).cast::<T>();
            let (values, row_ptr, col_ind, x) = match placement {
                Placement::Backend => (sys.values, sys.row_ptr, sys.col_ind, sys.x),
                Placement::Host => {
                    let values = region(layout.values).cast::<T>();
                    let row_ptr = region(layout.row_ptr).cast::<i32>();
                    let col_ind = region(layout.col_ind).cast::<i32>();
                    let x = region(layout.x).cast::<T>();
                    backends.copy(values.cast(), sys.values.cast(), nnz * elem, CopyKind::HostToDevice)?;
                    backends.copy(
                        row_ptr.cast(),
                        sys.row_ptr.cast(),
                        (n + 1) * std::mem::size_of::<i32>(),
                        CopyKind::HostToDevice,
                    )?;
                    backends.copy(
                        col_ind.cast(),
                        sys.col_ind.cast(),
                        nnz * std::mem::size_of::<i32>(),
                        CopyKind::HostToDevice,
                    )?;
                    (values.cast_const(), row_ptr.cast_const(), col_ind.cast_const(), x)
                }
            };

            backends.sparse.csr2dense(
                backends.sparse_ctx,
                &Csr2DenseArgs {
                    m: sys.m,
                    n: sys.m,
                    nnz: sys.nnz,
                    descr: sys.descr,
                    values: T::wrap(values.cast_mut()),
                    row_ptr,
                    col_ind,
                    a: T::wrap(a),
                    lda: sys.m,
                },
            )?;

            let tol: f64 = sys.tol.into();
            let tau = region(layout.tau).cast::<T>();
            let pivot = match method {
                Method::Cholesky => {
                    let info_dev = region(layout.info).cast::<i32>();
                    backends.dense.potrf(
                        backends.dense_ctx,
                        &PotrfArgs {
                            fill: Fill::Lower,
                            n: sys.m,
                            a: T::wrap(a),
                            lda: sys.m,
                            info: info_dev,
                        },
                    )?;
                    let mut info = 0i32;
                    backends.copy(
                        (&mut info as *mut i32).cast(),
                        info_dev.cast_const().cast(),
                        std::mem::size_of::<i32>(),
                        CopyKind::DeviceToHost,
                    )?;
                    backends.dense.synchronize(backends.stream)?;
                    if info > 0 {
                        Some(info as usize - 1)
                    } else {
                        backends.small_pivot(a, n, tol)?
                    }
                }
                Method::Qr => {
                    backends.dense.geqrf(
                        backends.dense_ctx,
                        &GeqrfArgs {
                            m: sys.m,
                            n: sys.m,
                            a: T::wrap(a),
                            lda: sys.m,
                            tau: T::wrap(tau),
                        },
                    )?;
                    backends.small_pivot(a, n, tol)?
                }
            };

            if let Some(row) = pivot {
                *sys.singularity = row as i32 + base.offset();
                tracing::debug!(row, base = base.offset(), "zero pivot");
                return Err(SolverError::ZeroPivot { row });
            }

            let b_kind = match placement {
                Placement::Backend => CopyKind::DeviceToDevice,
                Placement::Host => CopyKind::HostToDevice,
            };
            backends.copy(x.cast(), sys.b.cast(), n * elem, b_kind)?;
            match method {
                Method::Cholesky => backends.dense.potrs(
                    backends.dense_ctx,
                    &PotrsArgs {
                        fill: Fill::Lower,
                        n: sys.m,
                        nrhs: 1,
                        a: T::wrap(a),
                        lda: sys.m,
                        b: T::wrap(x),
                        ldb: sys.m,
                    },
                )?,
                Method::Qr => {
                    backends.dense.ormqr(
                        backends.dense_ctx,
                        &OrmqrArgs {
                            m: sys.m,
                            n: 1,
                            k: sys.m,
                            a: T::wrap(a),
                            lda: sys.m,
                            tau: T::wrap(tau),
                            c: T::wrap(x),
                            ldc: sys.m,
                        },
                    )?;
                    backends.dense.trsv(
                        backends.dense_ctx,
                        &TrsvArgs {
                            n: sys.m,
                            a: T::wrap(a),
                            lda: sys.m,
                            x: T::wrap(x),
                        },
                    )?;
                }
            }
            if placement == Placement::Host {
                backends.copy(sys.x.cast(), x.cast_const().cast(), n * elem, CopyKind::DeviceToHost)?;
                backends.dense.synchronize(backends.stream)?;
            }
            *sys.singularity = -1;
        }
        Ok(())
    })
}

/// Solves `A x = b` by Cholesky factorization; arrays live in the backends' memory
/// space, `singularity` on the host.
///
/// # Safety
/// The arrays in `sys` must be valid for the extents `m` and `nnz` describe.
pub unsafe fn csrlsvchol<T: RealScalar>(handle: SpHandle, sys: &CsrSystem<T>) -> Result<()> {
    // SAFETY: forwarded caller contract.
    unsafe { csrlsv(handle, Method::Cholesky, Placement::Backend, sys) }
}

/// [`csrlsvchol`] with every array in host memory. Synchronizes the handle's stream.
///
/// # Safety
/// The arrays in `sys` must be valid host buffers for the extents `m` and `nnz`
/// describe.
pub unsafe fn csrlsvchol_host<T: RealScalar>(handle: SpHandle, sys: &CsrSystem<T>) -> Result<()> {
    // SAFETY: forwarded caller contract.
    unsafe { csrlsv(handle, Method::Cholesky, Placement::Host, sys) }
}

/// Solves `A x = b` by Householder QR; arrays live in the backends' memory space.
///
/// # Safety
/// The arrays in `sys` must be valid for the extents `m` and `nnz` describe.
pub unsafe fn csrlsvqr<T: RealScalar>(handle: SpHandle, sys: &CsrSystem<T>) -> Result<()> {
    // SAFETY: forwarded caller contract.
    unsafe { csrlsv(handle, Method::Qr, Placement::Backend, sys) }
}
