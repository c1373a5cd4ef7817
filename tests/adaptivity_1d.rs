use hp_adapt::adapt::config::{CandidateErrorModel, ErrorMode};
use hp_adapt::adapt::driver::SolverError;
use hp_adapt::domain::line::BoundarySide;
use hp_adapt::domain::mesh::space::{Point, V2D};
use hp_adapt::{
    AdaptiveSpace, AdaptivityConfig, AdaptivityDriver, ExactSolution, LineDomain, Solution,
    Termination,
};

use std::sync::Arc;

fn exact(
    value: fn(&Point) -> f64,
    gradient: fn(&Point) -> V2D,
) -> Arc<dyn Solution> {
    Arc::new(ExactSolution::new(value, gradient))
}

/// A "solver" which returns the exact solution regardless of the Space
fn exact_solver(
    u: Arc<dyn Solution>,
) -> impl FnMut(&LineDomain) -> Result<Vec<Arc<dyn Solution>>, SolverError> {
    move |_: &LineDomain| Ok(vec![u.clone()])
}

#[test]
fn parabola_golden_run() {
    let u = exact(|p| p.x * p.x, |p| V2D::from([2.0 * p.x, 0.0]));
    let config = AdaptivityConfig::from_json_str(
        r#"{
            "THRESHOLD": 0.3,
            "CAND_LIST": "HP_ANISO",
            "CONV_EXP": 1.0,
            "ERR_STOP": 0.001,
            "NDOF_STOP": 60000,
            "MESH_REGULARITY": -1
        }"#,
    )
    .unwrap();

    let driver = AdaptivityDriver::new(config).unwrap();
    let line = LineDomain::uniform(0.0, 1.0, 4, 1).unwrap();
    let state = driver.run(line, &mut exact_solver(u)).unwrap();

    assert_eq!(state.termination, Some(Termination::Converged));
    assert_eq!(state.history.len(), 2);

    let first = &state.history[0];
    assert_eq!(first.ndof_coarse, 5);
    assert_eq!(first.ndof_reference, 8 * 2 + 1);
    assert_eq!(first.marked, 4);
    assert_eq!(first.refined, 4);
    assert_eq!(first.skipped, 0);
    assert!(first.err_est > 1.0);

    let second = &state.history[1];
    assert_eq!(second.ndof_coarse, 9);
    assert!(second.err_est < 1e-3);

    // every Interval was p-refined
    assert_eq!(state.space.active_elems(), vec![0, 1, 2, 3]);
    assert!(state.space.active().all(|elem| elem.order == 2));
}

#[test]
fn kink_is_resolved_by_a_split() {
    let u = exact(
        |p| (p.x - 0.5).abs(),
        |p| V2D::from([if p.x < 0.5 { -1.0 } else { 1.0 }, 0.0]),
    );
    let config = AdaptivityConfig {
        candidate_error: CandidateErrorModel::Projection,
        err_stop: 1e-6,
        ..Default::default()
    };

    let driver = AdaptivityDriver::new(config).unwrap();
    let line = LineDomain::uniform(0.0, 1.0, 3, 1).unwrap();
    let state = driver.run(line, &mut exact_solver(u)).unwrap();

    assert_eq!(state.termination, Some(Termination::Converged));
    assert_eq!(state.iteration, 2);
    assert_eq!(state.history[0].marked, 1);

    // only the middle Interval was split, at the kink
    let mut breakpoints: Vec<f64> = state.space.active().map(|elem| elem.x[0]).collect();
    breakpoints.sort_by(f64::total_cmp);
    assert_eq!(breakpoints.len(), 4);
    assert!((breakpoints[2] - 0.5).abs() < 1e-14);
    assert!(state.space.active().all(|elem| elem.order == 1));
}

#[test]
fn dofs_grow_monotonically_until_the_budget_is_spent() {
    let u = exact(
        |p| (8.0 * p.x).sin() * p.x,
        |p| V2D::from([8.0 * (8.0 * p.x).cos() * p.x + (8.0 * p.x).sin(), 0.0]),
    );
    let config = AdaptivityConfig {
        err_stop: 1e-9,
        ndof_stop: 40,
        ..Default::default()
    };

    let driver = AdaptivityDriver::new(config).unwrap();
    let mut line = LineDomain::uniform(0.0, 1.0, 2, 1).unwrap();
    line.refine_towards_boundary(BoundarySide::Right, 2).unwrap();
    let state = driver.run(line, &mut exact_solver(u)).unwrap();

    assert_eq!(state.termination, Some(Termination::DofBudgetExhausted));
    assert!(state.space.num_dofs() >= 40);
    assert!(state
        .history
        .windows(2)
        .all(|pair| pair[0].ndof_coarse <= pair[1].ndof_coarse));
    assert!(state
        .history
        .iter()
        .enumerate()
        .all(|(idx, record)| record.iteration == idx + 1));
}

#[test]
fn exact_error_matches_the_estimate_for_exact_references() {
    let u = exact(|p| p.x.exp(), |p| V2D::from([p.x.exp(), 0.0]));
    let config = AdaptivityConfig {
        err_stop: 1e-4,
        error_mode: ErrorMode::Absolute,
        max_iterations: 4,
        ..Default::default()
    };

    let driver = AdaptivityDriver::new(config)
        .unwrap()
        .with_exact_solutions(vec![u.clone()]);
    let mut line = LineDomain::uniform(0.0, 1.0, 2, 1).unwrap();
    line.refine_all_elements().unwrap();
    let state = driver.run(line, &mut exact_solver(u)).unwrap();

    for record in state.history.iter() {
        let err_exact = record.err_exact.unwrap();
        assert!((err_exact - record.err_est).abs() <= 1e-12 * record.err_est.max(1.0));
    }
    assert!(state.last_record().unwrap().err_est < state.history[0].err_est);
}

#[test]
fn configuration_from_file() {
    let path = std::env::temp_dir().join(format!("hp_adapt_config_{}.json", std::process::id()));
    std::fs::write(
        &path,
        r#"{ "THRESHOLD": 0.6, "CAND_LIST": "P_ISO", "ERR_STOP": 0.5, "MAX_ADAPT_NUM": 3 }"#,
    )
    .unwrap();

    let config = AdaptivityConfig::from_file(path.to_string_lossy()).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(config.threshold, 0.6);
    assert_eq!(config.max_iterations, 3);

    let u = exact(|p| p.x.sin(), |p| V2D::from([p.x.cos(), 0.0]));
    let driver = AdaptivityDriver::new(config).unwrap();
    let state = driver
        .run(LineDomain::uniform(0.0, 3.0, 3, 1).unwrap(), &mut exact_solver(u))
        .unwrap();
    assert!(state.iteration <= 3);
    assert!(state.termination.is_some());
}
