use std::sync::atomic::{AtomicUsize, Ordering};

use nalgebra_sparse::CsrMatrix;

use crate::backend::traits::*;
use crate::status::{Result, SolverError};
use crate::types::{
    GpuComplex32, GpuComplex64, IndexBase, MatrixType, MemorySpace, ScalarPtr, Stream,
};

#[derive(Debug, Clone, Copy)]
struct HostMatDescr {
    base: IndexBase,
    matrix_type: MatrixType,
}

impl Default for HostMatDescr {
    fn default() -> Self {
        Self {
            base: IndexBase::Zero,
            matrix_type: MatrixType::General,
        }
    }
}

/// Sparse backend holding descriptors as boxed host objects.
#[derive(Default)]
pub struct HostSparseBackend {
    next_context: AtomicUsize,
}

impl HostSparseBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

/// # Safety
/// `descr` must come from [`HostSparseBackend::create_mat_descr`].
unsafe fn descr_mut<'a>(descr: MatDescr) -> Result<&'a mut HostMatDescr> {
    if descr.is_null() {
        return Err(SolverError::InvalidPointer("descr"));
    }
    // SAFETY: guaranteed by the caller.
    Ok(unsafe { &mut *descr.0.cast::<HostMatDescr>() })
}

/// Expands a CSR matrix into the zeroed column-major `dense` buffer.
///
/// # Safety
/// `row_ptr` holds `m + 1` entries, `col_ind`/`values` hold `nnz` entries and
/// `dense` is valid for `lda * n` elements.
#[allow(clippy::too_many_arguments)]
unsafe fn expand<T: nalgebra::Scalar + Copy + Default>(
    m: usize,
    n: usize,
    nnz: usize,
    base: IndexBase,
    values: *const T,
    row_ptr: *const i32,
    col_ind: *const i32,
    dense: *mut T,
    lda: usize,
) -> Result<()> {
    let offset = base.offset();
    // SAFETY: guaranteed by the caller.
    let rows = unsafe { std::slice::from_raw_parts(row_ptr, m + 1) };
    let to_index = |raw: i32, what: &'static str| {
        usize::try_from(raw - offset)
            .map_err(|_| SolverError::invalid_value(what, format!("index {raw} below base {offset}")))
    };
    let offsets = rows
        .iter()
        .map(|&raw| to_index(raw, "row_ptr"))
        .collect::<Result<Vec<_>>>()?;
    if offsets[m] != nnz {
        return Err(SolverError::invalid_value(
            "nnz",
            format!("{nnz} given, row_ptr describes {}", offsets[m]),
        ));
    }
    // SAFETY: guaranteed by the caller.
    let (cols, vals) = unsafe {
        if nnz == 0 {
            (&[][..], &[][..])
        } else {
            (
                std::slice::from_raw_parts(col_ind, nnz),
                std::slice::from_raw_parts(values, nnz),
            )
        }
    };
    let indices = cols
        .iter()
        .map(|&raw| to_index(raw, "col_ind"))
        .collect::<Result<Vec<_>>>()?;
    let csr = CsrMatrix::try_from_csr_data(m, n, offsets, indices, vals.to_vec())
        .map_err(|err| SolverError::invalid_value("csr", err.to_string()))?;

    // SAFETY: guaranteed by the caller.
    let dense = unsafe { std::slice::from_raw_parts_mut(dense, lda * n) };
    dense.fill(T::default());
    for (row, col, value) in csr.triplet_iter() {
        dense[row + col * lda] = *value;
    }
    Ok(())
}

impl SparseBackend for HostSparseBackend {
    fn name(&self) -> &str {
        "host-csr"
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

    fn create_mat_descr(&self) -> Result<MatDescr> {
        let descr = Box::new(HostMatDescr::default());
        Ok(MatDescr(Box::into_raw(descr).cast()))
    }

    unsafe fn destroy_mat_descr(&self, descr: MatDescr) -> Result<()> {
        if descr.is_null() {
            return Err(SolverError::InvalidPointer("descr"));
        }
        // SAFETY: the descriptor was boxed in `create_mat_descr`.
        drop(unsafe { Box::from_raw(descr.0.cast::<HostMatDescr>()) });
        Ok(())
    }

    unsafe fn set_index_base(&self, descr: MatDescr, base: IndexBase) -> Result<()> {
        // SAFETY: forwarded caller contract.
        unsafe { descr_mut(descr) }?.base = base;
        Ok(())
    }

    unsafe fn index_base(&self, descr: MatDescr) -> Result<IndexBase> {
        // SAFETY: forwarded caller contract.
        Ok(unsafe { descr_mut(descr) }?.base)
    }

    unsafe fn set_matrix_type(&self, descr: MatDescr, matrix_type: MatrixType) -> Result<()> {
        // SAFETY: forwarded caller contract.
        unsafe { descr_mut(descr) }?.matrix_type = matrix_type;
        Ok(())
    }

    unsafe fn matrix_type(&self, descr: MatDescr) -> Result<MatrixType> {
        // SAFETY: forwarded caller contract.
        Ok(unsafe { descr_mut(descr) }?.matrix_type)
    }

    unsafe fn csr2dense(&self, _ctx: RawContext, args: &Csr2DenseArgs) -> Result<()> {
        // SAFETY: forwarded caller contract.
        let base = unsafe { descr_mut(args.descr) }?.base;
        let m = usize::try_from(args.m).map_err(|_| SolverError::InvalidSize {
            arg: "m",
            value: args.m.into(),
        })?;
        let n = usize::try_from(args.n).map_err(|_| SolverError::InvalidSize {
            arg: "n",
            value: args.n.into(),
        })?;
        let nnz = usize::try_from(args.nnz).map_err(|_| SolverError::InvalidSize {
            arg: "nnz",
            value: args.nnz.into(),
        })?;
        let lda = usize::try_from(args.lda).unwrap_or(0);
        // SAFETY: forwarded caller contract.
        unsafe {
            match (args.values, args.a) {
                (ScalarPtr::Single(v), ScalarPtr::Single(a)) => {
                    expand::<f32>(m, n, nnz, base, v, args.row_ptr, args.col_ind, a, lda)
                }
                (ScalarPtr::Double(v), ScalarPtr::Double(a)) => {
                    expand::<f64>(m, n, nnz, base, v, args.row_ptr, args.col_ind, a, lda)
                }
                (ScalarPtr::ComplexSingle(v), ScalarPtr::ComplexSingle(a)) => {
                    expand::<GpuComplex32>(m, n, nnz, base, v, args.row_ptr, args.col_ind, a, lda)
                }
                (ScalarPtr::ComplexDouble(v), ScalarPtr::ComplexDouble(a)) => {
                    expand::<GpuComplex64>(m, n, nnz, base, v, args.row_ptr, args.col_ind, a, lda)
                }
                _ => Err(SolverError::Internal(
                    "csr2dense: mismatched buffer precisions".to_string(),
                )),
            }
        }
    }
}
