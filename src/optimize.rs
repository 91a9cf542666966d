//! Derivative-free minimization used by the built-in estimator.

#[derive(Debug, Clone, Copy)]
pub struct NelderMeadConfig {
    pub max_iter: usize,
    /// Relative spread of objective values across the simplex at which the
    /// search is considered converged.
    pub tolerance: f64,
    pub initial_step: f64,
}

impl Default for NelderMeadConfig {
    fn default() -> Self {
        Self {
            max_iter: 5000,
            tolerance: 1e-10,
            initial_step: 0.1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NelderMeadResult {
    pub optimal_point: Vec<f64>,
    pub optimal_value: f64,
    pub iterations: usize,
    pub converged: bool,
}

const REFLECTION: f64 = 1.0;
const EXPANSION: f64 = 2.0;
const CONTRACTION: f64 = 0.5;
const SHRINK: f64 = 0.5;

/// Minimizes `objective` starting from `initial`. Non-finite objective values
/// are treated as +infinity so the simplex moves away from them.
pub fn nelder_mead<F>(objective: F, initial: &[f64], config: NelderMeadConfig) -> NelderMeadResult
where
    F: Fn(&[f64]) -> f64,
{
    let eval = |x: &[f64]| {
        let v = objective(x);
        if v.is_finite() {
            v
        } else {
            f64::INFINITY
        }
    };

    let n = initial.len();
    if n == 0 {
        return NelderMeadResult {
            optimal_point: Vec::new(),
            optimal_value: eval(initial),
            iterations: 0,
            converged: true,
        };
    }

    let mut simplex: Vec<Vec<f64>> = Vec::with_capacity(n + 1);
    simplex.push(initial.to_vec());
    for i in 0..n {
        let mut vertex = initial.to_vec();
        vertex[i] += if vertex[i].abs() > 1e-8 {
            config.initial_step * vertex[i].abs().max(1.0)
        } else {
            config.initial_step
        };
        simplex.push(vertex);
    }
    let mut values: Vec<f64> = simplex.iter().map(|v| eval(v)).collect();

    let mut iterations = 0;
    let mut converged = false;

    while iterations < config.max_iter {
        order_simplex(&mut simplex, &mut values);

        let best = values[0];
        let worst = values[n];
        if best.is_finite() && (worst - best).abs() <= config.tolerance * (1.0 + best.abs()) {
            converged = true;
            break;
        }

        iterations += 1;

        let centroid: Vec<f64> = (0..n)
            .map(|j| simplex[..n].iter().map(|v| v[j]).sum::<f64>() / n as f64)
            .collect();

        let reflected = along(&centroid, &simplex[n], -REFLECTION);
        let f_reflected = eval(&reflected);

        if f_reflected < values[0] {
            let expanded = along(&centroid, &simplex[n], -EXPANSION);
            let f_expanded = eval(&expanded);
            if f_expanded < f_reflected {
                simplex[n] = expanded;
                values[n] = f_expanded;
            } else {
                simplex[n] = reflected;
                values[n] = f_reflected;
            }
            continue;
        }

        if f_reflected < values[n - 1] {
            simplex[n] = reflected;
            values[n] = f_reflected;
            continue;
        }

        let (contracted, f_contracted) = if f_reflected < values[n] {
            let point = along(&centroid, &simplex[n], -CONTRACTION);
            let value = eval(&point);
            (point, value)
        } else {
            let point = along(&centroid, &simplex[n], CONTRACTION);
            let value = eval(&point);
            (point, value)
        };

        if f_contracted < values[n].min(f_reflected) {
            simplex[n] = contracted;
            values[n] = f_contracted;
            continue;
        }

        let best_vertex = simplex[0].clone();
        for i in 1..=n {
            for j in 0..n {
                simplex[i][j] = best_vertex[j] + SHRINK * (simplex[i][j] - best_vertex[j]);
            }
            values[i] = eval(&simplex[i]);
        }
    }

    order_simplex(&mut simplex, &mut values);

    NelderMeadResult {
        optimal_point: simplex.swap_remove(0),
        optimal_value: values[0],
        iterations,
        converged,
    }
}

/// `centroid + coef * (vertex - centroid)`
fn along(centroid: &[f64], vertex: &[f64], coef: f64) -> Vec<f64> {
    centroid
        .iter()
        .zip(vertex)
        .map(|(c, v)| c + coef * (v - c))
        .collect()
}

fn order_simplex(simplex: &mut Vec<Vec<f64>>, values: &mut Vec<f64>) {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    *simplex = order.iter().map(|&i| simplex[i].clone()).collect();
    *values = order.iter().map(|&i| values[i]).collect();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quadratic_minimum() {
        let result = nelder_mead(
            |x| (x[0] - 3.0).powi(2) + (x[1] + 1.0).powi(2),
            &[0.0, 0.0],
            NelderMeadConfig::default(),
        );

        assert!(result.converged);
        assert!((result.optimal_point[0] - 3.0).abs() < 1e-3);
        assert!((result.optimal_point[1] + 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_rosenbrock() {
        let result = nelder_mead(
            |x| (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0] * x[0]).powi(2),
            &[-1.2, 1.0],
            NelderMeadConfig {
                max_iter: 10_000,
                tolerance: 1e-12,
                ..Default::default()
            },
        );

        assert!(result.converged);
        assert!((result.optimal_point[0] - 1.0).abs() < 1e-2);
        assert!((result.optimal_point[1] - 1.0).abs() < 1e-2);
    }

    #[test]
    fn test_non_finite_regions_avoided() {
        let result = nelder_mead(
            |x| if x[0] < 0.0 { f64::NAN } else { (x[0] - 0.5).powi(2) },
            &[0.05],
            NelderMeadConfig::default(),
        );
        assert!(result.optimal_value.is_finite());
        assert!((result.optimal_point[0] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_iteration_budget() {
        let result = nelder_mead(
            |x| (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0] * x[0]).powi(2),
            &[-1.2, 1.0],
            NelderMeadConfig {
                max_iter: 3,
                ..Default::default()
            },
        );
        assert!(!result.converged);
        assert_eq!(result.iterations, 3);
    }

    #[test]
    fn test_zero_dimensional() {
        let result = nelder_mead(|_| 4.0, &[], NelderMeadConfig::default());
        assert!(result.converged);
        assert_eq!(result.optimal_value, 4.0);
    }
}
