use tch::{Kind, Tensor};

/// Bandwidth used when fewer than two particles make the median heuristic
/// meaningless (`ln(1) = 0`).
pub const FALLBACK_BANDWIDTH: f64 = 1.0;

/// Floor for the median-heuristic bandwidth. An ensemble whose particles are
/// numerically identical has an all-zero distance matrix, and `h = 0` would
/// turn the exponent into 0/0.
const MIN_BANDWIDTH: f64 = 1e-8;

/// RBF kernel between two stacks of parameter vectors.
///
/// `x` and `y` are `(n, d)`; the result is `(n, n)` with
/// `K[i, j] = exp(-||x_i - y_j||^2 / h)` and `h` picked by the median
/// heuristic `median(||x_i - y_j||^2) / ln(n)`.
///
/// Callers pass `y = x.detach()`: gradients flow into `x` only, which is what
/// splits the Stein update into a driving force (through the detached side)
/// and a repulsive force (through the live side). The bandwidth is computed
/// from detached distances so it acts as a constant.
pub fn rbf(x: &Tensor, y: &Tensor) -> Tensor {
    let (n, d) = x.size2().expect("parameter stack must be 2-dimensional");
    debug_assert_eq!(y.size(), [n, d]);

    // (n, n) squared euclidean distances
    let diff = x.unsqueeze(1) - y.unsqueeze(0);
    let dist_sq = diff
        .square()
        .sum_dim_intlist(Some([-1i64].as_slice()), false, Kind::Float);

    let h = bandwidth(&dist_sq.detach(), n);
    (-dist_sq / h).exp()
}

fn bandwidth(dist_sq: &Tensor, n: i64) -> f64 {
    if n < 2 {
        return FALLBACK_BANDWIDTH;
    }

    let median = dist_sq.median().double_value(&[]);
    (median / (n as f64).ln()).max(MIN_BANDWIDTH)
}
