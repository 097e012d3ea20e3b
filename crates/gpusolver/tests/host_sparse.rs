//! Sparse direct solves end to end on the host reference backends.

use gpusolver::backend::MatDescr;
use gpusolver::ffi::{
    gpusolver_sp_create_mat_descr, gpusolver_sp_dcsrlsvchol, gpusolver_sp_dcsrlsvchol_,
    gpusolver_sp_dcsrlsvchol_host, gpusolver_sp_dcsrlsvqr, gpusolver_sp_destroy_mat_descr,
    gpusolver_sp_get_mat_index_base, gpusolver_sp_scsrlsvqr, gpusolver_sp_set_mat_index_base,
    gpusolver_sp_set_mat_type,
};
use gpusolver::handle;
use gpusolver::sparse::{self, CsrSystem};
use gpusolver::{BackendRegistry, LoaderConfig, SolverError, SpHandle, Status, install};

fn setup() -> SpHandle {
    let _ = install(BackendRegistry::from_config(LoaderConfig::host_only()));
    handle::sp_create()
}

fn descriptor(base: i32) -> MatDescr {
    let mut descr = MatDescr(std::ptr::null_mut());
    unsafe {
        assert_eq!(gpusolver_sp_create_mat_descr(&mut descr), Status::Success);
        assert_eq!(gpusolver_sp_set_mat_index_base(descr, base), Status::Success);
    }
    descr
}

fn release(descr: MatDescr) {
    assert_eq!(unsafe { gpusolver_sp_destroy_mat_descr(descr) }, Status::Success);
}

/// CSR matrix with its right-hand side.
struct System {
    values: Vec<f64>,
    row_ptr: Vec<i32>,
    col_ind: Vec<i32>,
    b: Vec<f64>,
}

impl System {
    /// [[4 1 0] [1 3 1] [0 1 2]] x = b with x = (1, 2, 3).
    fn spd() -> Self {
        Self {
            values: vec![4.0, 1.0, 1.0, 3.0, 1.0, 1.0, 2.0],
            row_ptr: vec![0, 2, 5, 7],
            col_ind: vec![0, 1, 0, 1, 2, 1, 2],
            b: vec![6.0, 10.0, 8.0],
        }
    }

    fn m(&self) -> i32 {
        self.b.len() as i32
    }

    fn nnz(&self) -> i32 {
        self.values.len() as i32
    }
}

fn assert_close(x: &[f64], expected: &[f64]) {
    for (got, want) in x.iter().zip(expected) {
        assert!((got - want).abs() < 1e-12, "{x:?} != {expected:?}");
    }
}

#[test]
fn test_cholesky_solves_spd_system() {
    let h = setup();
    let descr = descriptor(0);
    let sys = System::spd();
    let mut x = vec![0.0; 3];
    let mut singularity = 99;
    let status = unsafe {
        gpusolver_sp_dcsrlsvchol(
            h,
            sys.m(),
            sys.nnz(),
            descr,
            sys.values.as_ptr(),
            sys.row_ptr.as_ptr(),
            sys.col_ind.as_ptr(),
            sys.b.as_ptr(),
            1e-12,
            0,
            x.as_mut_ptr(),
            &mut singularity,
        )
    };
    assert_eq!(status, Status::Success);
    assert_eq!(singularity, -1);
    assert_close(&x, &[1.0, 2.0, 3.0]);
    release(descr);
    handle::sp_destroy(h).expect("destroy");
}

#[test]
fn test_host_and_fortran_spellings_match_device_spelling() {
    let h = setup();
    let descr = descriptor(0);
    let sys = System::spd();
    let (m, nnz, tol, reorder) = (sys.m(), sys.nnz(), 0.0f64, 1);

    let mut host_x = vec![0.0; 3];
    let mut host_singularity = 0;
    let status = unsafe {
        gpusolver_sp_dcsrlsvchol_host(
            h,
            m,
            nnz,
            descr,
            sys.values.as_ptr(),
            sys.row_ptr.as_ptr(),
            sys.col_ind.as_ptr(),
            sys.b.as_ptr(),
            tol,
            reorder,
            host_x.as_mut_ptr(),
            &mut host_singularity,
        )
    };
    assert_eq!(status, Status::Success);

    let mut fortran_x = vec![0.0; 3];
    let mut fortran_singularity = 0;
    let status = unsafe {
        gpusolver_sp_dcsrlsvchol_(
            &h,
            &m,
            &nnz,
            &descr,
            sys.values.as_ptr(),
            sys.row_ptr.as_ptr(),
            sys.col_ind.as_ptr(),
            sys.b.as_ptr(),
            &tol,
            &reorder,
            fortran_x.as_mut_ptr(),
            &mut fortran_singularity,
        )
    };
    assert_eq!(status, Status::Success);
    assert_eq!(host_x, fortran_x);
    assert_eq!(host_singularity, fortran_singularity);
    assert_close(&host_x, &[1.0, 2.0, 3.0]);
    release(descr);
    handle::sp_destroy(h).expect("destroy");
}

#[test]
fn test_zero_pivot_reported_in_one_based_rows() {
    let h = setup();
    let descr = descriptor(1);
    let mut base = -1;
    assert_eq!(
        unsafe { gpusolver_sp_get_mat_index_base(descr, &mut base) },
        Status::Success
    );
    assert_eq!(base, 1);

    // [[1 1 0] [1 1 0] [0 0 1]]: the second pivot vanishes.
    let values = [1.0f64, 1.0, 1.0, 1.0, 1.0];
    let row_ptr = [1, 3, 5, 6];
    let col_ind = [1, 2, 1, 2, 3];
    let b = [1.0f64, 1.0, 1.0];
    let mut x = [7.0f64; 3];
    let mut singularity = -5;
    let status = unsafe {
        gpusolver_sp_dcsrlsvchol(
            h,
            3,
            5,
            descr,
            values.as_ptr(),
            row_ptr.as_ptr(),
            col_ind.as_ptr(),
            b.as_ptr(),
            0.0,
            0,
            x.as_mut_ptr(),
            &mut singularity,
        )
    };
    assert_eq!(status, Status::ZeroPivot);
    assert_eq!(singularity, 2);
    assert_eq!(x, [7.0; 3]);
    release(descr);
    handle::sp_destroy(h).expect("destroy");
}

#[test]
fn test_tolerance_flags_small_pivots() {
    let h = setup();
    let descr = descriptor(0);
    let sys = System::spd();
    let mut x = vec![0.0; 3];
    let mut singularity = 0;
    let system = CsrSystem {
        m: sys.m(),
        nnz: sys.nnz(),
        descr,
        values: sys.values.as_ptr(),
        row_ptr: sys.row_ptr.as_ptr(),
        col_ind: sys.col_ind.as_ptr(),
        b: sys.b.as_ptr(),
        tol: 10.0,
        reorder: 0,
        x: x.as_mut_ptr(),
        singularity: &mut singularity,
    };
    let err = unsafe { sparse::csrlsvchol(h, &system) }.expect_err("L(0,0) = 2 <= 10");
    assert_eq!(err, SolverError::ZeroPivot { row: 0 });
    assert_eq!(singularity, 0);
    assert_eq!(x, [0.0; 3]);
    release(descr);
    handle::sp_destroy(h).expect("destroy");
}

#[test]
fn test_qr_solves_nonsymmetric_system() {
    let h = setup();
    let descr = descriptor(0);
    // [[2 1 0] [0 3 1] [1 0 4]] x = b with x = (1, -1, 2).
    let values = [2.0f64, 1.0, 3.0, 1.0, 1.0, 4.0];
    let row_ptr = [0, 2, 4, 6];
    let col_ind = [0, 1, 1, 2, 0, 2];
    let b = [1.0f64, -1.0, 9.0];
    let mut x = [0.0f64; 3];
    let mut singularity = 0;
    let status = unsafe {
        gpusolver_sp_dcsrlsvqr(
            h,
            3,
            6,
            descr,
            values.as_ptr(),
            row_ptr.as_ptr(),
            col_ind.as_ptr(),
            b.as_ptr(),
            1e-14,
            0,
            x.as_mut_ptr(),
            &mut singularity,
        )
    };
    assert_eq!(status, Status::Success);
    assert_eq!(singularity, -1);
    assert_close(&x, &[1.0, -1.0, 2.0]);
    release(descr);
    handle::sp_destroy(h).expect("destroy");
}

#[test]
fn test_single_precision_qr() {
    let h = setup();
    let descr = descriptor(0);
    let values = [4.0f32, 1.0, 1.0, 3.0, 1.0, 1.0, 2.0];
    let row_ptr = [0, 2, 5, 7];
    let col_ind = [0, 1, 0, 1, 2, 1, 2];
    let b = [6.0f32, 10.0, 8.0];
    let mut x = [0.0f32; 3];
    let mut singularity = 0;
    let status = unsafe {
        gpusolver_sp_scsrlsvqr(
            h,
            3,
            7,
            descr,
            values.as_ptr(),
            row_ptr.as_ptr(),
            col_ind.as_ptr(),
            b.as_ptr(),
            1e-6,
            0,
            x.as_mut_ptr(),
            &mut singularity,
        )
    };
    assert_eq!(status, Status::Success);
    for (got, want) in x.iter().zip([1.0f32, 2.0, 3.0]) {
        assert!((got - want).abs() < 1e-4, "{x:?}");
    }
    release(descr);
    handle::sp_destroy(h).expect("destroy");
}

#[test]
fn test_argument_validation() {
    let h = setup();
    let descr = descriptor(0);
    let sys = System::spd();
    let mut x = vec![0.0; 3];
    let mut singularity = 0;
    let solve = |m: i32, nnz: i32, tol: f64, reorder: i32, x: *mut f64, singularity: *mut i32| unsafe {
        gpusolver_sp_dcsrlsvchol(
            h,
            m,
            nnz,
            descr,
            sys.values.as_ptr(),
            sys.row_ptr.as_ptr(),
            sys.col_ind.as_ptr(),
            sys.b.as_ptr(),
            tol,
            reorder,
            x,
            singularity,
        )
    };
    let (xp, sp) = (x.as_mut_ptr(), &mut singularity as *mut i32);
    assert_eq!(solve(-1, 7, 0.0, 0, xp, sp), Status::InvalidSize);
    assert_eq!(solve(3, -1, 0.0, 0, xp, sp), Status::InvalidSize);
    assert_eq!(solve(3, 7, -1.0, 0, xp, sp), Status::InvalidValue);
    assert_eq!(solve(3, 7, 0.0, 2, xp, sp), Status::InvalidValue);
    assert_eq!(solve(3, 7, 0.0, 0, std::ptr::null_mut(), sp), Status::InvalidPointer);
    assert_eq!(solve(0, 0, 0.0, 0, std::ptr::null_mut(), std::ptr::null_mut()), Status::Success);

    assert_eq!(unsafe { gpusolver_sp_set_mat_type(descr, 1) }, Status::Success);
    assert_eq!(solve(3, 7, 0.0, 0, xp, sp), Status::NotImplemented);
    assert_eq!(unsafe { gpusolver_sp_set_mat_type(descr, 9) }, Status::InvalidValue);
    release(descr);
    handle::sp_destroy(h).expect("destroy");
}

#[test]
fn test_nnz_must_match_row_pointers() {
    let h = setup();
    let descr = descriptor(0);
    let sys = System::spd();
    for host in [false, true] {
        let mut x = [5.0f64; 3];
        let mut singularity = 42;
        let solve = if host {
            gpusolver_sp_dcsrlsvchol_host
        } else {
            gpusolver_sp_dcsrlsvchol
        };
        // row_ptr describes seven non-zeros; only one is claimed.
        let status = unsafe {
            solve(
                h,
                sys.m(),
                1,
                descr,
                sys.values.as_ptr(),
                sys.row_ptr.as_ptr(),
                sys.col_ind.as_ptr(),
                sys.b.as_ptr(),
                0.0,
                0,
                x.as_mut_ptr(),
                &mut singularity,
            )
        };
        assert_eq!(status, Status::InvalidValue, "host = {host}");
        assert_eq!(x, [5.0; 3]);
        assert_eq!(singularity, 42);
    }
    release(descr);
    handle::sp_destroy(h).expect("destroy");
}

#[test]
fn test_oversized_system_fails_to_allocate() {
    let h = setup();
    let descr = descriptor(0);
    let sys = System::spd();
    let mut x = [0.0f64; 3];
    let mut singularity = 0;
    let status = unsafe {
        gpusolver_sp_dcsrlsvchol(
            h,
            2_000_000_000,
            1,
            descr,
            sys.values.as_ptr(),
            sys.row_ptr.as_ptr(),
            sys.col_ind.as_ptr(),
            sys.b.as_ptr(),
            0.0,
            0,
            x.as_mut_ptr(),
            &mut singularity,
        )
    };
    assert_eq!(status, Status::AllocFailed);
    release(descr);
    handle::sp_destroy(h).expect("destroy");
}

#[test]
fn test_dense_handle_is_not_a_sparse_handle() {
    let _ = install(BackendRegistry::from_config(LoaderConfig::host_only()));
    let dense = handle::create();
    let descr = descriptor(0);
    let sys = System::spd();
    let mut x = vec![0.0; 3];
    let mut singularity = 0;
    let status = unsafe {
        gpusolver_sp_dcsrlsvchol(
            SpHandle(dense.0),
            sys.m(),
            sys.nnz(),
            descr,
            sys.values.as_ptr(),
            sys.row_ptr.as_ptr(),
            sys.col_ind.as_ptr(),
            sys.b.as_ptr(),
            0.0,
            0,
            x.as_mut_ptr(),
            &mut singularity,
        )
    };
    assert_eq!(status, Status::InvalidHandle);
    release(descr);
    handle::destroy(dense).expect("destroy");
}
