//! Derivative-free minimisation (Nelder–Mead simplex)

const REFLECT: f64 = 1.0;
const EXPAND: f64 = 2.0;
const CONTRACT: f64 = 0.5;
const SHRINK: f64 = 0.5;

/// Minimum found by [`nelder_mead`].
#[derive(Debug, Clone)]
pub struct Minimum {
    pub point: Vec<f64>,
    pub value: f64,
    pub iterations: usize,
}

fn evaluate<F: Fn(&[f64]) -> f64>(f: &F, x: &[f64]) -> f64 {
    let value = f(x);
    if value.is_finite() { value } else { f64::INFINITY }
}

/// `a + t * (b - a)`, component-wise.
fn towards(a: &[f64], b: &[f64], t: f64) -> Vec<f64> {
    a.iter().zip(b).map(|(a, b)| a + t * (b - a)).collect()
}

/// Minimise `f` starting from `start`, with an initial simplex offset by `steps` along each axis.
///
/// Non-finite objective values are treated as `+inf`. Stops after `max_iterations`
/// or once the simplex values agree to within `tolerance`.
pub fn nelder_mead<F>(f: F, start: &[f64], steps: &[f64], max_iterations: usize, tolerance: f64) -> Minimum
where
    F: Fn(&[f64]) -> f64,
{
    let n = start.len();
    if n == 0 {
        return Minimum {
            point: Vec::new(),
            value: evaluate(&f, start),
            iterations: 0,
        };
    }

    let mut simplex: Vec<(Vec<f64>, f64)> = Vec::with_capacity(n + 1);
    simplex.push((start.to_vec(), evaluate(&f, start)));
    for axis in 0..n {
        let mut vertex = start.to_vec();
        vertex[axis] += steps.get(axis).copied().unwrap_or(0.1);
        let value = evaluate(&f, &vertex);
        simplex.push((vertex, value));
    }

    let mut iterations = 0;
    while iterations < max_iterations {
        iterations += 1;
        simplex.sort_by(|a, b| a.1.total_cmp(&b.1));

        let best = simplex[0].1;
        let worst = simplex[n].1;
        if (worst - best).abs() <= tolerance * (1.0 + best.abs()) {
            break;
        }

        let mut centroid = vec![0.0; n];
        for (vertex, _) in &simplex[..n] {
            for (c, v) in centroid.iter_mut().zip(vertex) {
                *c += v / n as f64;
            }
        }

        let reflected = towards(&centroid, &simplex[n].0, -REFLECT);
        let reflected_value = evaluate(&f, &reflected);

        if reflected_value < best {
            let expanded = towards(&centroid, &simplex[n].0, -EXPAND);
            let expanded_value = evaluate(&f, &expanded);
            simplex[n] = if expanded_value < reflected_value {
                (expanded, expanded_value)
            } else {
                (reflected, reflected_value)
            };
            continue;
        }
        if reflected_value < simplex[n - 1].1 {
            simplex[n] = (reflected, reflected_value);
            continue;
        }

        // Contract towards the better of the worst vertex and its reflection
        let (outside, target) = if reflected_value < worst {
            (true, reflected.as_slice())
        } else {
            (false, simplex[n].0.as_slice())
        };
        let contracted = towards(&centroid, target, CONTRACT);
        let contracted_value = evaluate(&f, &contracted);
        let accept = if outside {
            contracted_value <= reflected_value
        } else {
            contracted_value < worst
        };
        if accept {
            simplex[n] = (contracted, contracted_value);
            continue;
        }

        let anchor = simplex[0].0.clone();
        for (vertex, value) in simplex.iter_mut().skip(1) {
            *vertex = towards(&anchor, vertex, SHRINK);
            *value = evaluate(&f, vertex);
        }
    }

    simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
    let (point, value) = simplex.swap_remove(0);
    Minimum {
        point,
        value,
        iterations,
    }
}
