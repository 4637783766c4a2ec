pub use nalgebra::{DMatrix, DVector};

/// `x * ln(y)` with the convention `0 * ln(0) = 0`
#[inline]
pub fn xlogy(x: f64, y: f64) -> f64 {
    if x == 0.0 {
        0.0
    } else {
        x * y.ln()
    }
}

/// Column means of an n x k matrix as a k-vector
pub fn column_means(x_nk: &DMatrix<f64>) -> DVector<f64> {
    let nn = x_nk.nrows().max(1) as f64;
    x_nk.row_sum().transpose() / nn
}

/// Turn each row of unnormalized log-weights into a probability vector.
///
/// The row maximum is subtracted before exponentiation, so the result
/// does not depend on the magnitude of the inputs:
///
/// $$p_{ik} = \exp(x_{ik} - \max_l x_{il}) / \sum_j \exp(x_{ij} - \max_l x_{il})$$
///
/// A row without a finite maximum carries no information and becomes
/// uniform.
pub fn softmax_rows_inplace(log_nk: &mut DMatrix<f64>) {
    let kk = log_nk.ncols().max(1) as f64;
    for mut row in log_nk.row_iter_mut() {
        let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !max.is_finite() {
            row.fill(1.0 / kk);
            continue;
        }
        row.iter_mut().for_each(|x| *x = (*x - max).exp());
        let denom = row.sum();
        row /= denom;
    }
}
