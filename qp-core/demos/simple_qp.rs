//! Simple QP example demonstrating the active-set solver.
//!
//! Solves:
//!   minimize    x1^2 + x2^2 - 2 x1 - 4 x2
//!   subject to  x1 <= 0.5, x2 <= 1
//!
//! Optimal solution: x = [0.5, 1], lam_x = [1, 2], objective = -3.75

use qp_core::linalg::sparse;
use qp_core::{solve, QpData, Settings, WarmStart};

fn main() {
    let prob = QpData {
        h: sparse::from_triplets(2, 2, vec![(0, 0, 2.0), (1, 1, 2.0)]),
        g: vec![-2.0, -4.0],
        a: sparse::from_triplets(0, 2, Vec::new()),
        lbx: vec![f64::NEG_INFINITY; 2],
        ubx: vec![0.5, 1.0],
        lba: Vec::new(),
        uba: Vec::new(),
    };

    let settings = Settings::default();

    match solve(&prob, &WarmStart::default(), &settings) {
        Ok(result) => {
            println!("\n=== Solution ===");
            println!("Status: {}", result.status);
            println!("x1 = {:.6}", result.x[0]);
            println!("x2 = {:.6}", result.x[1]);
            println!("lam_x = {:?}", result.lam_x);
            println!("Objective value: {:.6}", result.f);
            println!("Iterations: {}", result.info.iters);
        }
        Err(e) => {
            eprintln!("Solver failed: {}", e);
            std::process::exit(1);
        }
    }
}
