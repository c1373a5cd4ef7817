use hp_adapt::adapt::config::{MarkingStrategy, NormKind};
use hp_adapt::adapt::error_calc::ErrorCalculator;
use hp_adapt::adapt::StoppingCriterion;
use hp_adapt::domain::mesh::space::{Point, V2D};
use hp_adapt::{AdaptiveSpace, Domain, ExactSolution, LineDomain, Mesh, PiecewisePolynomial, Solution};

use proptest::prelude::*;
use std::sync::Arc;

/// `Σ c_k x^k`
fn polynomial(coefficients: Vec<f64>) -> Arc<dyn Solution> {
    let derivative: Vec<f64> = coefficients
        .iter()
        .enumerate()
        .skip(1)
        .map(|(k, c)| k as f64 * c)
        .collect();
    let eval = |c: &[f64], x: f64| c.iter().rev().fold(0.0, |acc, c| acc * x + c);

    Arc::new(ExactSolution::new(
        move |p: &Point| eval(coefficients.as_slice(), p.x),
        move |p: &Point| V2D::from([eval(derivative.as_slice(), p.x), 0.0]),
    ))
}

fn norms() -> impl Strategy<Value = NormKind> {
    prop_oneof![Just(NormKind::L2), Just(NormKind::H1Seminorm), Just(NormKind::H1)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn element_errors_add_up_to_the_total(
        n in 1..8_usize,
        p in 1..4_u8,
        coefficients in prop::collection::vec(-2.0..2.0_f64, 1..7),
        norm in norms(),
    ) {
        let coarse = LineDomain::uniform(-1.0, 2.0, n, p).unwrap();
        let reference = coarse.reference_space(true, 1).unwrap();
        let u = polynomial(coefficients);
        let projection = PiecewisePolynomial::project_onto(&coarse, &reference, u.as_ref(), norm, 3).unwrap();
        let coarse_solution: Arc<dyn Solution> = Arc::new(projection);

        let calc = ErrorCalculator { norm, ..Default::default() };
        let table = calc.calculate_errors(&coarse, &reference, &[coarse_solution], &[u], false).unwrap();

        prop_assert_eq!(table.len(), n);
        prop_assert!(table.elem_errors().iter().all(|(_, e)| *e >= 0.0));
        let sum_of_squares: f64 = table.elem_errors().iter().map(|(_, e)| e * e).sum();
        prop_assert!((sum_of_squares.sqrt() - table.total()).abs() <= 1e-12 * table.total().max(1.0));
    }

    #[test]
    fn identical_solutions_mark_nothing(
        n in 1..5_usize,
        coefficients in prop::collection::vec(-2.0..2.0_f64, 1..5),
        threshold in 0.05..=1.0_f64,
    ) {
        let coarse = Domain::from_mesh(Mesh::rectangle([0.0, 1.0], [0.0, 2.0], n, 2).unwrap());
        let reference = coarse.reference_space(true, 1).unwrap();
        let u = polynomial(coefficients);

        let table = ErrorCalculator::default()
            .calculate_errors(&coarse, &reference, &[u.clone()], &[u], true)
            .unwrap();
        prop_assert_eq!(table.total(), 0.0);

        for strategy in [MarkingStrategy::Cumulative, MarkingStrategy::RelativeToMax, MarkingStrategy::Absolute] {
            prop_assert!(StoppingCriterion::new(strategy, threshold).mark_elements(&table).is_empty());
        }
    }
}

#[test]
fn estimates_shrink_under_refinement() {
    let u = polynomial(vec![0.0, 0.0, 0.0, 1.0, -0.5]);

    let errors: Vec<f64> = (1..=4)
        .map(|p| {
            let coarse = LineDomain::uniform(0.0, 1.0, 3, p).unwrap();
            let reference = coarse.reference_space(true, 1).unwrap();
            let projection =
                PiecewisePolynomial::project_onto(&coarse, &reference, u.as_ref(), NormKind::H1, 3)
                    .unwrap();
            let coarse_solution: Arc<dyn Solution> = Arc::new(projection);

            ErrorCalculator::default()
                .calculate_errors(&coarse, &reference, &[coarse_solution], &[u.clone()], true)
                .unwrap()
                .total()
        })
        .collect();

    assert!(errors.windows(2).all(|pair| pair[1] < pair[0]));
    // a quartic is captured exactly by p = 4
    assert!(errors[3] < 1e-10);
}
