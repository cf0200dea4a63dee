//! Project a point onto a box intersected with a budget row.
//!
//! Solves:
//!   minimize    0.5 ||x - p||^2
//!   subject to  -1 <= x_i <= 1
//!               x1 + x2 + x3 <= 1
//!
//! for p = [2, 1, -0.5]. The projection lands on the budget row with the
//! first coordinate clipped by its box.

use qp_core::linalg::sparse;
use qp_core::{solve, QpData, Settings, WarmStart};

fn main() {
    let p = [2.0, 1.0, -0.5];
    let n = p.len();

    // 0.5 ||x - p||^2 = 0.5 x^T x - p^T x + const
    let prob = QpData {
        h: sparse::from_triplets(n, n, (0..n).map(|i| (i, i, 1.0))),
        g: p.iter().map(|v| -v).collect(),
        a: sparse::from_triplets(1, n, (0..n).map(|j| (0, j, 1.0))),
        lbx: vec![-1.0; n],
        ubx: vec![1.0; n],
        lba: vec![f64::NEG_INFINITY],
        uba: vec![1.0],
    };

    let settings = Settings::default();

    match solve(&prob, &WarmStart::default(), &settings) {
        Ok(result) => {
            println!("\n=== Projection ===");
            println!("Status: {}", result.status);
            println!("p = {:?}", p);
            println!("x = {:?}", result.x);
            println!("lam_a = {:?}", result.lam_a);
            let budget: f64 = result.x.iter().sum();
            println!("x1 + x2 + x3 = {:.6} (limit 1.0)", budget);
            println!("Iterations: {}", result.info.iters);
        }
        Err(e) => {
            eprintln!("Solver failed: {}", e);
            std::process::exit(1);
        }
    }
}
