//! End-to-end tests for the active-set QP solver.
//!
//! Each test states the problem in comments, solves it, and checks the
//! solution against hand-computed optima and the optimality conditions
//! (stationarity, feasibility, complementarity).

use qp_core::linalg::sparse::{from_triplets, SparseCsc};
use qp_core::{solve, ActiveSetSolver, QpData, QpError, Settings, SolveStatus, WarmStart};

const INF: f64 = f64::INFINITY;

fn quiet() -> Settings {
    Settings {
        print_iter: false,
        print_header: false,
        ..Default::default()
    }
}

fn mat_vec(a: &SparseCsc, x: &[f64]) -> Vec<f64> {
    let mut y = vec![0.0; a.rows()];
    for (val, (row, col)) in a.iter() {
        y[row] += val * x[col];
    }
    y
}

fn mat_t_vec(a: &SparseCsc, x: &[f64]) -> Vec<f64> {
    let mut y = vec![0.0; a.cols()];
    for (val, (row, col)) in a.iter() {
        y[col] += val * x[row];
    }
    y
}

/// Check stationarity, primal feasibility, and complementarity of a
/// returned solution within `tol`.
fn check_optimality(prob: &QpData, x: &[f64], lam_x: &[f64], lam_a: &[f64], tol: f64) {
    let n = prob.num_vars();
    let m = prob.num_cons();

    // Stationarity: H x + g + A^T lam_a + lam_x = 0.
    let hx = mat_vec(&prob.h, x);
    let at_lam = mat_t_vec(&prob.a, lam_a);
    for i in 0..n {
        let r = hx[i] + prob.g[i] + at_lam[i] + lam_x[i];
        assert!(r.abs() <= tol, "stationarity violated at {}: {}", i, r);
    }

    // Primal feasibility.
    for i in 0..n {
        assert!(x[i] >= prob.lbx[i] - tol, "lbx violated at {}", i);
        assert!(x[i] <= prob.ubx[i] + tol, "ubx violated at {}", i);
    }
    let ax = mat_vec(&prob.a, x);
    for j in 0..m {
        assert!(ax[j] >= prob.lba[j] - tol, "lba violated at {}", j);
        assert!(ax[j] <= prob.uba[j] + tol, "uba violated at {}", j);
    }

    // Complementarity: a signed multiplier pins its bound.
    for i in 0..n {
        if lam_x[i] > tol {
            assert!((x[i] - prob.ubx[i]).abs() <= tol, "upper not active at {}", i);
        } else if lam_x[i] < -tol {
            assert!((x[i] - prob.lbx[i]).abs() <= tol, "lower not active at {}", i);
        }
    }
    for j in 0..m {
        if lam_a[j] > tol {
            assert!((ax[j] - prob.uba[j]).abs() <= tol, "upper not active at {}", j);
        } else if lam_a[j] < -tol {
            assert!((ax[j] - prob.lba[j]).abs() <= tol, "lower not active at {}", j);
        }
    }
}

fn no_constraints(n: usize) -> SparseCsc {
    from_triplets(0, n, Vec::new())
}

#[test]
fn test_unconstrained() {
    // min x1^2 + x2^2 - 2 x1 - 4 x2, no bounds, no constraints.
    // Optimal: x = [1, 2], f = -5, all multipliers zero.
    let prob = QpData {
        h: from_triplets(2, 2, vec![(0, 0, 2.0), (1, 1, 2.0)]),
        g: vec![-2.0, -4.0],
        a: no_constraints(2),
        lbx: vec![-INF; 2],
        ubx: vec![INF; 2],
        lba: Vec::new(),
        uba: Vec::new(),
    };

    let result = solve(&prob, &WarmStart::default(), &quiet()).unwrap();

    assert_eq!(result.status, SolveStatus::Optimal);
    assert!((result.x[0] - 1.0).abs() < 1e-9);
    assert!((result.x[1] - 2.0).abs() < 1e-9);
    assert!((result.f - (-5.0)).abs() < 1e-9);
    assert!(result.lam_x.iter().all(|&l| l == 0.0));
    assert!(result.info.iters <= 2, "took {} iterations", result.info.iters);
    check_optimality(&prob, &result.x, &result.lam_x, &result.lam_a, 1e-8);
}

#[test]
fn test_box_constrained() {
    // Same objective with upper bounds [0.5, 1]: both bounds go active.
    // Optimal: x = [0.5, 1], lam_x = [1, 2], f = -3.75.
    let prob = QpData {
        h: from_triplets(2, 2, vec![(0, 0, 2.0), (1, 1, 2.0)]),
        g: vec![-2.0, -4.0],
        a: no_constraints(2),
        lbx: vec![-INF; 2],
        ubx: vec![0.5, 1.0],
        lba: Vec::new(),
        uba: Vec::new(),
    };

    let result = solve(&prob, &WarmStart::default(), &quiet()).unwrap();

    assert_eq!(result.status, SolveStatus::Optimal);
    assert!((result.x[0] - 0.5).abs() < 1e-6, "x = {:?}", result.x);
    assert!((result.x[1] - 1.0).abs() < 1e-6, "x = {:?}", result.x);
    assert!((result.lam_x[0] - 1.0).abs() < 1e-6, "lam_x = {:?}", result.lam_x);
    assert!((result.lam_x[1] - 2.0).abs() < 1e-6, "lam_x = {:?}", result.lam_x);
    assert!((result.f - (-3.75)).abs() < 1e-6);
    check_optimality(&prob, &result.x, &result.lam_x, &result.lam_a, 1e-6);
}

#[test]
fn test_equality_constrained() {
    // min 0.5 (x1^2 + x2^2) s.t. x1 + x2 = 1.
    // Optimal: x = [0.5, 0.5], lam_a = [-0.5], f = 0.25.
    let prob = QpData {
        h: from_triplets(2, 2, vec![(0, 0, 1.0), (1, 1, 1.0)]),
        g: vec![0.0, 0.0],
        a: from_triplets(1, 2, vec![(0, 0, 1.0), (0, 1, 1.0)]),
        lbx: vec![-INF; 2],
        ubx: vec![INF; 2],
        lba: vec![1.0],
        uba: vec![1.0],
    };

    let result = solve(&prob, &WarmStart::default(), &quiet()).unwrap();

    assert_eq!(result.status, SolveStatus::Optimal);
    assert!((result.x[0] - 0.5).abs() < 1e-9, "x = {:?}", result.x);
    assert!((result.x[1] - 0.5).abs() < 1e-9, "x = {:?}", result.x);
    assert!((result.lam_a[0] - (-0.5)).abs() < 1e-9, "lam_a = {:?}", result.lam_a);
    assert!((result.f - 0.25).abs() < 1e-9);
    check_optimality(&prob, &result.x, &result.lam_x, &result.lam_a, 1e-8);
}

#[test]
fn test_redundant_rows_singular_repair() {
    // min 0.5 ||x||^2, n = 3, with the same row x1 + x2 + x3 <= 0 three
    // times, all warm-started active. The working set is rank deficient;
    // the solver has to walk null-space directions, drop the redundant
    // multipliers one by one, and still reach x = 0.
    let row = |r: usize| vec![(r, 0, 1.0), (r, 1, 1.0), (r, 2, 1.0)];
    let prob = QpData {
        h: from_triplets(3, 3, vec![(0, 0, 1.0), (1, 1, 1.0), (2, 2, 1.0)]),
        g: vec![0.0; 3],
        a: from_triplets(3, 3, [row(0), row(1), row(2)].concat()),
        lbx: vec![-INF; 3],
        ubx: vec![INF; 3],
        lba: vec![-INF; 3],
        uba: vec![0.0; 3],
    };
    let warm = WarmStart {
        x0: None,
        lam_x0: None,
        lam_a0: Some(vec![1.0, 1.0, 1.0]),
    };

    let result = solve(&prob, &warm, &quiet()).unwrap();

    assert_eq!(result.status, SolveStatus::Optimal);
    assert!(result.info.iters < 50, "took {} iterations", result.info.iters);
    for (i, &xi) in result.x.iter().enumerate() {
        assert!(xi.abs() < 1e-8, "x[{}] = {}", i, xi);
    }
    check_optimality(&prob, &result.x, &result.lam_x, &result.lam_a, 1e-8);
}

#[test]
fn test_redundant_equalities_terminate() {
    // The same redundant row as a hard equality cannot be dropped from
    // the working set, so the rank repair has nowhere to go. The solver
    // must still terminate cleanly with the best iterate instead of
    // looping.
    let row = |r: usize| vec![(r, 0, 1.0), (r, 1, 1.0), (r, 2, 1.0)];
    let prob = QpData {
        h: from_triplets(3, 3, vec![(0, 0, 1.0), (1, 1, 1.0), (2, 2, 1.0)]),
        g: vec![0.0; 3],
        a: from_triplets(3, 3, [row(0), row(1), row(2)].concat()),
        lbx: vec![-INF; 3],
        ubx: vec![INF; 3],
        lba: vec![0.0; 3],
        uba: vec![0.0; 3],
    };

    let result = solve(&prob, &WarmStart::default(), &quiet()).unwrap();

    assert_eq!(result.status, SolveStatus::StepFailure);
    assert!(result.x.iter().all(|x| x.is_finite()));
    assert!(result.info.iters < 10);
}

#[test]
fn test_warm_start_resolve() {
    // Re-solving from the returned solution must terminate after a single
    // pass with the identical answer.
    let prob = QpData {
        h: from_triplets(2, 2, vec![(0, 0, 2.0), (1, 1, 2.0)]),
        g: vec![-2.0, -4.0],
        a: no_constraints(2),
        lbx: vec![-INF; 2],
        ubx: vec![0.5, 1.0],
        lba: Vec::new(),
        uba: Vec::new(),
    };

    let mut solver = ActiveSetSolver::new(&prob, quiet()).unwrap();
    let first = solver.solve(&prob, &WarmStart::default()).unwrap();
    assert_eq!(first.status, SolveStatus::Optimal);

    let warm = WarmStart {
        x0: Some(first.x.clone()),
        lam_x0: Some(first.lam_x.clone()),
        lam_a0: Some(first.lam_a.clone()),
    };
    let second = solver.solve(&prob, &warm).unwrap();

    assert_eq!(second.status, SolveStatus::Optimal);
    assert!(second.info.iters <= 1, "took {} iterations", second.info.iters);
    for i in 0..2 {
        assert!((second.x[i] - first.x[i]).abs() < 1e-12);
        assert!((second.lam_x[i] - first.lam_x[i]).abs() < 1e-12);
    }
    assert!((second.f - first.f).abs() < 1e-12);
}

#[test]
fn test_infeasible_bounds_fail_setup() {
    // lbx > ubx must fail before any iteration.
    let prob = QpData {
        h: from_triplets(1, 1, vec![(0, 0, 1.0)]),
        g: vec![0.0],
        a: no_constraints(1),
        lbx: vec![1.0],
        ubx: vec![0.0],
        lba: Vec::new(),
        uba: Vec::new(),
    };

    match solve(&prob, &WarmStart::default(), &quiet()) {
        Err(QpError::InfeasibleBounds { index: 0, .. }) => {}
        other => panic!("expected setup failure, got {:?}", other.map(|r| r.status)),
    }
}

#[test]
fn test_resolve_rejects_different_sparsity() {
    // A solver instance is tied to the structure it analyzed.
    let prob = QpData {
        h: from_triplets(2, 2, vec![(0, 0, 1.0), (1, 1, 1.0)]),
        g: vec![0.0, 0.0],
        a: no_constraints(2),
        lbx: vec![-1.0; 2],
        ubx: vec![1.0; 2],
        lba: Vec::new(),
        uba: Vec::new(),
    };
    let mut solver = ActiveSetSolver::new(&prob, quiet()).unwrap();
    solver.solve(&prob, &WarmStart::default()).unwrap();

    let mut denser = prob.clone();
    denser.h = from_triplets(
        2,
        2,
        vec![(0, 0, 1.0), (0, 1, 0.5), (1, 0, 0.5), (1, 1, 1.0)],
    );
    assert!(matches!(
        solver.solve(&denser, &WarmStart::default()),
        Err(QpError::PatternMismatch)
    ));
}

#[test]
fn test_mixed_bounds_and_constraints() {
    // min 0.5 x^T x + g^T x with a box on x and one coupling row.
    //   -1 <= x_i <= 1,  0 <= x1 + x2 <= 0.4
    // The unconstrained minimizer [2, -0.5] violates both the box and the
    // row; the optimum is x = [1, -0.6] with the box on x1 and the row
    // both active.
    let prob = QpData {
        h: from_triplets(2, 2, vec![(0, 0, 1.0), (1, 1, 1.0)]),
        g: vec![-2.0, 0.5],
        a: from_triplets(1, 2, vec![(0, 0, 1.0), (0, 1, 1.0)]),
        lbx: vec![-1.0; 2],
        ubx: vec![1.0; 2],
        lba: vec![0.0],
        uba: vec![0.4],
    };

    let result = solve(&prob, &WarmStart::default(), &quiet()).unwrap();

    assert_eq!(result.status, SolveStatus::Optimal);
    check_optimality(&prob, &result.x, &result.lam_x, &result.lam_a, 1e-6);
    assert!((result.x[0] - 1.0).abs() < 1e-6, "x = {:?}", result.x);
    assert!((result.x[1] - (-0.6)).abs() < 1e-6, "x = {:?}", result.x);
}

#[test]
fn test_random_box_qps() {
    // A small battery of strictly convex box QPs with deterministic
    // seeds; every solve must satisfy the optimality conditions.
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    for seed in 0..10 {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let n = 5;
        let h = from_triplets(
            n,
            n,
            (0..n).map(|i| (i, i, rng.gen_range(1.0..3.0))),
        );
        let g: Vec<f64> = (0..n).map(|_| rng.gen_range(-2.0..2.0)).collect();
        let lbx: Vec<f64> = (0..n).map(|_| rng.gen_range(-1.0..0.0)).collect();
        let ubx: Vec<f64> = (0..n).map(|_| rng.gen_range(0.0..1.0)).collect();
        let prob = QpData {
            h,
            g,
            a: no_constraints(n),
            lbx,
            ubx,
            lba: Vec::new(),
            uba: Vec::new(),
        };

        let result = solve(&prob, &WarmStart::default(), &quiet()).unwrap();
        assert_eq!(result.status, SolveStatus::Optimal, "seed {}", seed);
        check_optimality(&prob, &result.x, &result.lam_x, &result.lam_a, 1e-6);
    }
}

#[test]
fn test_random_constrained_qps() {
    // Identity Hessian, random costs, and two disjoint coupling rows.
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    for seed in 0..10 {
        let mut rng = ChaCha8Rng::seed_from_u64(100 + seed);
        let n = 4;
        let h = from_triplets(n, n, (0..n).map(|i| (i, i, 1.0)));
        let g: Vec<f64> = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let a = from_triplets(
            2,
            n,
            vec![(0, 0, 1.0), (0, 1, 1.0), (1, 2, 1.0), (1, 3, -1.0)],
        );
        let lba: Vec<f64> = (0..2).map(|_| rng.gen_range(-0.5..0.0)).collect();
        let uba: Vec<f64> = lba.iter().map(|l| l + 1.0).collect();
        let prob = QpData {
            h,
            g,
            a,
            lbx: vec![-INF; n],
            ubx: vec![INF; n],
            lba,
            uba,
        };

        let result = solve(&prob, &WarmStart::default(), &quiet()).unwrap();
        assert_eq!(result.status, SolveStatus::Optimal, "seed {}", seed);
        check_optimality(&prob, &result.x, &result.lam_x, &result.lam_a, 1e-6);
    }
}

#[test]
fn test_qr_roundtrip_random_rhs() {
    // Factorize a fixed sparse matrix and verify K (K^-1 b) = b for
    // random right-hand sides, both plain and transposed.
    use qp_core::linalg::qr::SparseQr;
    use qp_core::linalg::sparse::CscPattern;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    let mat = from_triplets(
        5,
        5,
        vec![
            (0, 0, 2.0),
            (1, 0, -1.0),
            (1, 1, 3.0),
            (2, 2, 1.5),
            (0, 2, 0.5),
            (3, 1, 1.0),
            (3, 3, 2.5),
            (4, 3, -0.5),
            (4, 4, 1.0),
            (2, 4, 0.25),
        ],
    );
    let sp = CscPattern::from_mat(&mat);
    let mut qr = SparseQr::new(&sp).unwrap();
    qr.factorize(mat.data()).unwrap();

    let mut rng = ChaCha8Rng::seed_from_u64(42);
    for _ in 0..20 {
        let b: Vec<f64> = (0..5).map(|_| rng.gen_range(-10.0..10.0)).collect();
        let norm_b = b.iter().fold(0.0_f64, |acc, &v| acc.max(v.abs()));
        for &transposed in &[false, true] {
            let mut x = b.clone();
            qr.solve(&mut x, transposed);
            // Multiply back.
            let mut kx = vec![0.0; 5];
            for (val, (row, col)) in mat.iter() {
                if transposed {
                    kx[col] += val * x[row];
                } else {
                    kx[row] += val * x[col];
                }
            }
            for i in 0..5 {
                assert!(
                    (kx[i] - b[i]).abs() <= 1e-9 * norm_b.max(1.0),
                    "roundtrip residual {} at {} (transposed: {})",
                    kx[i] - b[i],
                    i,
                    transposed
                );
            }
        }
    }
}

#[test]
fn test_iteration_log_smoke() {
    // Exercise the banner and the per-iteration table; output goes to
    // stderr and is only visible with --nocapture.
    let prob = QpData {
        h: from_triplets(2, 2, vec![(0, 0, 2.0), (1, 1, 2.0)]),
        g: vec![-2.0, -4.0],
        a: no_constraints(2),
        lbx: vec![-INF; 2],
        ubx: vec![0.5, 1.0],
        lba: Vec::new(),
        uba: Vec::new(),
    };
    let settings = Settings::default();
    let result = solve(&prob, &WarmStart::default(), &settings).unwrap();
    assert_eq!(result.status, SolveStatus::Optimal);
}
