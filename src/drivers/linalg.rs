use ndarray::{Array1, Array2};

const PIVOT_EPS: f64 = 1e-300;

/// Inverse of a square matrix by Gauss-Jordan elimination with partial
/// pivoting. `None` when the matrix is singular.
pub fn invert(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    if n != a.ncols() {
        return None;
    }
    let mut work = a.clone();
    let mut inv = Array2::<f64>::eye(n);
    let scale = a.iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
    if !scale.is_finite() || scale == 0.0 {
        return None;
    }
    for col in 0..n {
        let pivot_row = (col..n)
            .max_by(|&i, &j| work[[i, col]].abs().total_cmp(&work[[j, col]].abs()))?;
        let pivot = work[[pivot_row, col]];
        if pivot.abs() <= PIVOT_EPS.max(scale * 1e-15) {
            return None;
        }
        if pivot_row != col {
            for k in 0..n {
                work.swap([col, k], [pivot_row, k]);
                inv.swap([col, k], [pivot_row, k]);
            }
        }
        for k in 0..n {
            work[[col, k]] /= pivot;
            inv[[col, k]] /= pivot;
        }
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = work[[row, col]];
            if factor == 0.0 {
                continue;
            }
            for k in 0..n {
                work[[row, k]] -= factor * work[[col, k]];
                inv[[row, k]] -= factor * inv[[col, k]];
            }
        }
    }
    Some(inv)
}

/// Solve `a x = b`.
pub fn solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let inv = invert(a)?;
    Some(inv.dot(b))
}
