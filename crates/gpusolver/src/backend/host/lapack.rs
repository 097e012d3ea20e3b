//! Unblocked LAPACK kernels on column-major host buffers.
//!
//! Storage conventions follow the reference LAPACK routines so results are
//! interchangeable with the device libraries: reflectors are kept below (or above)
//! the tridiagonal/triangular part, `tau` holds their scalar factors, and
//! `H(i) = I - tau * v * v^H`.

use nalgebra::{ComplexField, convert, one, zero};
use rayon::prelude::*;

use crate::types::Fill;

/// Panel size from which the Hermitian matrix-vector product runs on the rayon pool.
const PARALLEL_HEMV_MIN: usize = 128;

#[inline]
fn at(lda: usize, row: usize, col: usize) -> usize {
    row + col * lda
}

fn real_part<T: ComplexField + Copy>(value: T) -> T {
    T::from_real(value.real())
}

/// Generates an elementary reflector `H` with `H^H * (alpha; x) = (beta; 0)`.
///
/// Overwrites `x` with `v[1..]` and returns `(beta, tau)`.
fn larfg<T: ComplexField + Copy>(alpha: T, x: &mut [T]) -> (T, T) {
    let xnorm_sq = x
        .iter()
        .fold(zero::<T::RealField>(), |acc, v| acc + v.modulus_squared());
    let alphr = alpha.real();
    let alphi = alpha.imaginary();
    if xnorm_sq == zero::<T::RealField>() && alphi == zero::<T::RealField>() {
        return (alpha, zero());
    }
    let norm = (alphr.clone() * alphr.clone() + alphi.clone() * alphi + xnorm_sq).sqrt();
    let beta_r = if alphr >= zero::<T::RealField>() {
        -norm
    } else {
        norm
    };
    let beta = T::from_real(beta_r.clone());
    let tau = (beta - alpha).unscale(beta_r);
    let scale = one::<T>() / (alpha - beta);
    for v in x.iter_mut() {
        *v *= scale;
    }
    (beta, tau)
}

/// `y = tau * A * v` where `A` is the `m x m` Hermitian block at `(off, off)` and
/// only the `fill` triangle is read.
#[allow(clippy::too_many_arguments)]
fn hemv<T: ComplexField + Copy>(
    fill: Fill,
    a: &[T],
    lda: usize,
    off: usize,
    m: usize,
    tau: T,
    v: &[T],
    y: &mut [T],
) {
    let entry = |r: usize, c: usize| -> T {
        let stored_lower = matches!(fill, Fill::Lower);
        if r == c {
            real_part(a[at(lda, off + r, off + c)])
        } else if (r > c) == stored_lower {
            a[at(lda, off + r, off + c)]
        } else {
            a[at(lda, off + c, off + r)].conjugate()
        }
    };
    let row = |r: usize| -> T {
        let mut acc = zero::<T>();
        for (c, vc) in v.iter().enumerate().take(m) {
            acc += entry(r, c) * *vc;
        }
        tau * acc
    };
    if m >= PARALLEL_HEMV_MIN {
        y[..m].par_iter_mut().enumerate().for_each(|(r, yr)| *yr = row(r));
    } else {
        for (r, yr) in y[..m].iter_mut().enumerate() {
            *yr = row(r);
        }
    }
}

/// `A -= v w^H + w v^H` on the `fill` triangle of the `m x m` block at `(off, off)`.
fn her2<T: ComplexField + Copy>(
    fill: Fill,
    a: &mut [T],
    lda: usize,
    off: usize,
    m: usize,
    v: &[T],
    w: &[T],
) {
    for c in 0..m {
        let rows = match fill {
            Fill::Lower => c..m,
            Fill::Upper => 0..c + 1,
        };
        for r in rows {
            let idx = at(lda, off + r, off + c);
            a[idx] -= v[r] * w[c].conjugate() + w[r] * v[c].conjugate();
            if r == c {
                a[idx] = real_part(a[idx]);
            }
        }
    }
}

fn dotc<T: ComplexField + Copy>(x: &[T], y: &[T]) -> T {
    x.iter()
        .zip(y)
        .fold(zero::<T>(), |acc, (xi, yi)| acc + xi.conjugate() * *yi)
}

/// Reduces a Hermitian (or real symmetric) matrix to real tridiagonal form,
/// `A = Q T Q^H`.
///
/// `work` needs `n` elements.
#[allow(clippy::too_many_arguments)]
pub fn sytrd<T: ComplexField + Copy>(
    fill: Fill,
    n: usize,
    a: &mut [T],
    lda: usize,
    d: &mut [T::RealField],
    e: &mut [T::RealField],
    tau: &mut [T],
    work: &mut [T],
) {
    if n == 0 {
        return;
    }
    let mut v = vec![zero::<T>(); n];
    match fill {
        Fill::Lower => {
            a[0] = real_part(a[0]);
            for i in 0..n - 1 {
                let m = n - i - 1;
                let alpha = a[at(lda, i + 1, i)];
                let col = at(lda, i + 2, i);
                let (beta, taui) = larfg(alpha, &mut a[col..col + m - 1]);
                e[i] = beta.real();
                if taui != zero::<T>() {
                    a[at(lda, i + 1, i)] = one();
                    v[..m].copy_from_slice(&a[at(lda, i + 1, i)..at(lda, i + 1, i) + m]);
                    hemv(fill, a, lda, i + 1, m, taui, &v[..m], work);
                    let alpha2 = -convert::<f64, T>(0.5) * taui * dotc(&work[..m], &v[..m]);
                    for k in 0..m {
                        work[k] += alpha2 * v[k];
                    }
                    her2(fill, a, lda, i + 1, m, &v[..m], &work[..m]);
                } else {
                    let idx = at(lda, i + 1, i + 1);
                    a[idx] = real_part(a[idx]);
                }
                a[at(lda, i + 1, i)] = T::from_real(e[i].clone());
                d[i] = a[at(lda, i, i)].real();
                tau[i] = taui;
            }
            d[n - 1] = a[at(lda, n - 1, n - 1)].real();
        }
        Fill::Upper => {
            let last = at(lda, n - 1, n - 1);
            a[last] = real_part(a[last]);
            for i in (0..n - 1).rev() {
                let m = i + 1;
                let alpha = a[at(lda, i, i + 1)];
                let col = at(lda, 0, i + 1);
                let (beta, taui) = larfg(alpha, &mut a[col..col + i]);
                e[i] = beta.real();
                if taui != zero::<T>() {
                    a[at(lda, i, i + 1)] = one();
                    v[..m].copy_from_slice(&a[col..col + m]);
                    hemv(fill, a, lda, 0, m, taui, &v[..m], work);
                    let alpha2 = -convert::<f64, T>(0.5) * taui * dotc(&work[..m], &v[..m]);
                    for k in 0..m {
                        work[k] += alpha2 * v[k];
                    }
                    her2(fill, a, lda, 0, m, &v[..m], &work[..m]);
                } else {
                    let idx = at(lda, i, i);
                    a[idx] = real_part(a[idx]);
                }
                a[at(lda, i, i + 1)] = T::from_real(e[i].clone());
                d[i + 1] = a[at(lda, i + 1, i + 1)].real();
                tau[i] = taui;
            }
            d[0] = a[0].real();
        }
    }
}

/// Applies `H = I - tau v v^H` from the left to columns `cols` of the `ld`-strided
/// matrix `q`, where `v` is nonzero only on `rows`.
fn apply_reflector_left<T: ComplexField + Copy>(
    q: &mut [T],
    ld: usize,
    rows: std::ops::Range<usize>,
    cols: std::ops::Range<usize>,
    v: &[T],
    tau: T,
) {
    for c in cols {
        let mut s = zero::<T>();
        for r in rows.clone() {
            s += v[r].conjugate() * q[at(ld, r, c)];
        }
        if s == zero::<T>() {
            continue;
        }
        let ts = tau * s;
        for r in rows.clone() {
            q[at(ld, r, c)] -= v[r] * ts;
        }
    }
}

/// Overwrites the reflectors left by [`sytrd`] with the explicit unitary `Q`.
///
/// `work` needs `n * n` elements.
pub fn orgtr<T: ComplexField + Copy>(
    fill: Fill,
    n: usize,
    a: &mut [T],
    lda: usize,
    tau: &[T],
    work: &mut [T],
) {
    if n == 0 {
        return;
    }
    let q = &mut work[..n * n];
    q.fill(zero());
    for k in 0..n {
        q[at(n, k, k)] = one();
    }
    let mut v = vec![zero::<T>(); n];
    match fill {
        Fill::Lower => {
            for i in (0..n - 1).rev() {
                v.fill(zero());
                v[i + 1] = one();
                for r in i + 2..n {
                    v[r] = a[at(lda, r, i)];
                }
                apply_reflector_left(q, n, i + 1..n, 0..n, &v, tau[i]);
            }
        }
        Fill::Upper => {
            for i in 0..n - 1 {
                v.fill(zero());
                for r in 0..i {
                    v[r] = a[at(lda, r, i + 1)];
                }
                v[i] = one();
                apply_reflector_left(q, n, 0..i + 1, 0..n, &v, tau[i]);
            }
        }
    }
    for c in 0..n {
        for r in 0..n {
            a[at(lda, r, c)] = q[at(n, r, c)];
        }
    }
}

/// Cholesky factorization. Returns `0`, or the one-based column at which the
/// leading minor is not positive definite.
pub fn potrf<T: ComplexField + Copy>(fill: Fill, n: usize, a: &mut [T], lda: usize) -> i32 {
    // `get(r, c)` reads the factor's lower-triangular view in either storage.
    let idx = |r: usize, c: usize| match fill {
        Fill::Lower => at(lda, r, c),
        Fill::Upper => at(lda, c, r),
    };
    let load = |a: &[T], r: usize, c: usize| match fill {
        Fill::Lower => a[idx(r, c)],
        Fill::Upper => a[idx(r, c)].conjugate(),
    };
    for j in 0..n {
        let mut ajj = a[idx(j, j)].real();
        for k in 0..j {
            ajj -= load(a, j, k).modulus_squared();
        }
        if !(ajj > zero::<T::RealField>()) {
            a[idx(j, j)] = T::from_real(ajj);
            return (j + 1) as i32;
        }
        let ajj = ajj.sqrt();
        a[idx(j, j)] = T::from_real(ajj.clone());
        for i in j + 1..n {
            let mut s = load(a, i, j);
            for k in 0..j {
                s -= load(a, i, k) * load(a, j, k).conjugate();
            }
            let value = s.unscale(ajj.clone());
            a[idx(i, j)] = match fill {
                Fill::Lower => value,
                Fill::Upper => value.conjugate(),
            };
        }
    }
    0
}

/// Solves `A X = B` with the factor produced by [`potrf`].
pub fn potrs<T: ComplexField + Copy>(
    fill: Fill,
    n: usize,
    nrhs: usize,
    a: &[T],
    lda: usize,
    b: &mut [T],
    ldb: usize,
) {
    let l = |r: usize, c: usize| match fill {
        Fill::Lower => a[at(lda, r, c)],
        Fill::Upper => a[at(lda, c, r)].conjugate(),
    };
    for col in 0..nrhs {
        let x = &mut b[col * ldb..col * ldb + n];
        for i in 0..n {
            let mut s = x[i];
            for k in 0..i {
                s -= l(i, k) * x[k];
            }
            x[i] = s / l(i, i);
        }
        for i in (0..n).rev() {
            let mut s = x[i];
            for k in i + 1..n {
                s -= l(k, i).conjugate() * x[k];
            }
            x[i] = s / l(i, i).conjugate();
        }
    }
}

/// Householder QR factorization `A = Q R`.
pub fn geqrf<T: ComplexField + Copy>(m: usize, n: usize, a: &mut [T], lda: usize, tau: &mut [T]) {
    let k = m.min(n);
    let mut v = vec![zero::<T>(); m];
    for i in 0..k {
        let alpha = a[at(lda, i, i)];
        let start = at(lda, i + 1, i);
        let len = m - i - 1;
        let (beta, taui) = larfg(alpha, &mut a[start..start + len]);
        tau[i] = taui;
        a[at(lda, i, i)] = beta;
        if taui == zero::<T>() {
            continue;
        }
        v.fill(zero());
        v[i] = one();
        v[i + 1..m].copy_from_slice(&a[start..start + len]);
        apply_reflector_left(a, lda, i..m, i + 1..n, &v, taui.conjugate());
    }
}

/// `C := Q^H C` for the `Q` encoded by [`geqrf`].
#[allow(clippy::too_many_arguments)]
pub fn ormqr<T: ComplexField + Copy>(
    m: usize,
    n: usize,
    k: usize,
    a: &[T],
    lda: usize,
    tau: &[T],
    c: &mut [T],
    ldc: usize,
) {
    let mut v = vec![zero::<T>(); m];
    for i in 0..k {
        v.fill(zero());
        v[i] = one();
        for r in i + 1..m {
            v[r] = a[at(lda, r, i)];
        }
        apply_reflector_left(c, ldc, i..m, 0..n, &v, tau[i].conjugate());
    }
}

/// Solves `R x = b` in place; `R` is upper triangular with a non-unit diagonal.
pub fn trsv_upper<T: ComplexField + Copy>(n: usize, a: &[T], lda: usize, x: &mut [T]) {
    for i in (0..n).rev() {
        let mut s = x[i];
        for j in i + 1..n {
            s -= a[at(lda, i, j)] * x[j];
        }
        x[i] = s / a[at(lda, i, i)];
    }
}
