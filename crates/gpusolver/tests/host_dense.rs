//! Dense routines end to end on the host reference backend.

use gpusolver::dense;
use gpusolver::ffi::{
    gpusolver_dsytrd, gpusolver_dsytrd_, gpusolver_dsytrd_buffer_size,
    gpusolver_dsytrd_buffer_size_, gpusolver_zhetrd, gpusolver_zungtr,
};
use gpusolver::handle;
use gpusolver::{
    BackendRegistry, Fill, GpuComplex64, Handle, LoaderConfig, SolverError, Status, install,
};
use nalgebra::{Complex, DMatrix};

fn setup() -> Handle {
    // Every test installs the same host-only registry; only the first call wins.
    let _ = install(BackendRegistry::from_config(LoaderConfig::host_only()));
    handle::create()
}

/// Deterministic values in [-1, 1).
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> f64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((self.0 >> 11) as f64 / (1u64 << 53) as f64) * 2.0 - 1.0
    }
}

fn random_symmetric(n: usize, seed: u64) -> Vec<f64> {
    let mut rng = Lcg(seed);
    let mut a = vec![0.0; n * n];
    for j in 0..n {
        for i in 0..=j {
            let value = rng.next();
            a[i + j * n] = value;
            a[j + i * n] = value;
        }
    }
    a
}

fn tridiagonal(d: &[f64], e: &[f64]) -> DMatrix<f64> {
    let n = d.len();
    DMatrix::from_fn(n, n, |i, j| {
        if i == j {
            d[i]
        } else if i + 1 == j {
            e[i]
        } else if j + 1 == i {
            e[j]
        } else {
            0.0
        }
    })
}

#[test]
fn test_upper_reduction_of_32x32_matches_tridiagonal_form() {
    let h = setup();
    let n = 32usize;
    let original = random_symmetric(n, 7);
    let mut a = original.clone();
    let mut d = vec![0.0; n];
    let mut e = vec![0.0; n - 1];
    let mut tau = vec![0.0; n - 1];
    unsafe {
        dense::sytrd(
            h,
            Fill::Upper,
            n as i32,
            a.as_mut_ptr(),
            n as i32,
            d.as_mut_ptr(),
            e.as_mut_ptr(),
            tau.as_mut_ptr(),
            std::ptr::null_mut(),
            0,
        )
    }
    .expect("sytrd");

    let lwork = dense::orgtr_buffer_size::<f64>(h, Fill::Upper, n as i32, n as i32).expect("query");
    let mut work = vec![0.0; lwork as usize];
    unsafe {
        dense::orgtr(
            h,
            Fill::Upper,
            n as i32,
            a.as_mut_ptr(),
            n as i32,
            tau.as_mut_ptr(),
            work.as_mut_ptr(),
            lwork,
        )
    }
    .expect("orgtr");

    let q = DMatrix::from_column_slice(n, n, &a);
    let a0 = DMatrix::from_column_slice(n, n, &original);
    let t = tridiagonal(&d, &e);
    let residual = (q.transpose() * &a0 * &q - t).abs().max();
    assert!(residual < 1e-10, "Q^T A Q deviates by {residual}");
    let orthogonality = (q.transpose() * &q - DMatrix::identity(n, n)).abs().max();
    assert!(orthogonality < 1e-12, "Q^T Q deviates by {orthogonality}");
    handle::destroy(h).expect("destroy");
}

#[test]
fn test_hermitian_reduction_through_c_abi() {
    let h = setup();
    let n = 6usize;
    let mut rng = Lcg(11);
    let mut a = vec![GpuComplex64::default(); n * n];
    for j in 0..n {
        a[j + j * n] = GpuComplex64::new(rng.next() * 4.0, 0.0);
        for i in 0..j {
            let (re, im) = (rng.next(), rng.next());
            a[i + j * n] = GpuComplex64::new(re, im);
            a[j + i * n] = GpuComplex64::new(re, -im);
        }
    }
    let a0 = DMatrix::from_fn(n, n, |i, j| Complex::new(a[i + j * n].x, a[i + j * n].y));

    let mut d = vec![0.0; n];
    let mut e = vec![0.0; n - 1];
    let mut tau = vec![GpuComplex64::default(); n - 1];
    let status = unsafe {
        gpusolver_zhetrd(
            h,
            122,
            n as i32,
            a.as_mut_ptr(),
            n as i32,
            d.as_mut_ptr(),
            e.as_mut_ptr(),
            tau.as_mut_ptr(),
            std::ptr::null_mut(),
            0,
        )
    };
    assert_eq!(status, Status::Success);
    let status = unsafe {
        gpusolver_zungtr(
            h,
            122,
            n as i32,
            a.as_mut_ptr(),
            n as i32,
            tau.as_mut_ptr(),
            std::ptr::null_mut(),
            0,
        )
    };
    assert_eq!(status, Status::Success);

    let q = DMatrix::from_fn(n, n, |i, j| Complex::new(a[i + j * n].x, a[i + j * n].y));
    let t = tridiagonal(&d, &e).map(|value| Complex::new(value, 0.0));
    let residual = (q.adjoint() * &a0 * &q - t).map(|z| z.norm()).max();
    assert!(residual < 1e-10, "Q^H A Q deviates by {residual}");
    handle::destroy(h).expect("destroy");
}

#[test]
fn test_negative_order_never_touches_pointers() {
    let h = setup();
    let err = unsafe {
        dense::sytrd::<f64>(
            h,
            Fill::Upper,
            -1,
            std::ptr::null_mut(),
            1,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            0,
        )
    }
    .expect_err("n < 0");
    assert_eq!(err, SolverError::InvalidSize { arg: "n", value: -1 });
    handle::destroy(h).expect("destroy");
}

#[test]
fn test_empty_problem_leaves_outputs_untouched() {
    let h = setup();
    let mut a = [5.0f64];
    let mut d = [6.0f64];
    let status = unsafe {
        gpusolver_dsytrd(
            h,
            121,
            0,
            a.as_mut_ptr(),
            1,
            d.as_mut_ptr(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            0,
        )
    };
    assert_eq!(status, Status::Success);
    assert_eq!((a[0], d[0]), (5.0, 6.0));
    handle::destroy(h).expect("destroy");
}

#[test]
fn test_queried_workspace_suffices_for_both_spellings() {
    let h = setup();
    let n = 9i32;
    let upper = b'U' as std::ffi::c_char;
    let (mut c_lwork, mut f_lwork) = (-1, -1);
    unsafe {
        assert_eq!(
            gpusolver_dsytrd_buffer_size(h, 121, n, std::ptr::null(), n, &mut c_lwork),
            Status::Success
        );
        assert_eq!(
            gpusolver_dsytrd_buffer_size_(&h, &upper, &n, std::ptr::null(), &n, &mut f_lwork),
            Status::Success
        );
    }
    assert_eq!(c_lwork, f_lwork);
    assert_eq!(
        dense::sytrd_buffer_size::<f64>(h, Fill::Upper, n, n).expect("query"),
        c_lwork
    );

    let original = random_symmetric(n as usize, 3);
    let mut outputs = Vec::new();
    for fortran in [false, true] {
        let mut a = original.clone();
        let mut d = vec![0.0; n as usize];
        let mut e = vec![0.0; n as usize - 1];
        let mut tau = vec![0.0; n as usize - 1];
        let mut work = vec![0.0; c_lwork as usize];
        let status = unsafe {
            if fortran {
                gpusolver_dsytrd_(
                    &h,
                    &upper,
                    &n,
                    a.as_mut_ptr(),
                    &n,
                    d.as_mut_ptr(),
                    e.as_mut_ptr(),
                    tau.as_mut_ptr(),
                    work.as_mut_ptr(),
                    &c_lwork,
                )
            } else {
                gpusolver_dsytrd(
                    h,
                    121,
                    n,
                    a.as_mut_ptr(),
                    n,
                    d.as_mut_ptr(),
                    e.as_mut_ptr(),
                    tau.as_mut_ptr(),
                    work.as_mut_ptr(),
                    c_lwork,
                )
            }
        };
        assert_eq!(status, Status::Success);
        outputs.push((a, d, e, tau));
    }
    assert_eq!(outputs[0], outputs[1]);
    handle::destroy(h).expect("destroy");
}
