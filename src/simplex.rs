use thiserror::Error;

const EPS: f64 = 1e-9;

#[derive(Debug, Error, PartialEq)]
pub enum LpError {
    #[error("constraint {row} has {got} coefficients, expected {expected}")]
    DimensionMismatch {
        row: usize,
        got: usize,
        expected: usize,
    },
    #[error("constraint {row} has negative bound {bound}")]
    NegativeBound { row: usize, bound: f64 },
    #[error("objective is unbounded")]
    Unbounded,
    #[error("no optimum after {0} pivots")]
    IterationLimit(usize),
}

#[derive(Debug, Clone, Default)]
pub struct LinearProgram {
    pub objective: Vec<f64>,
    pub constraints: Vec<Vec<f64>>,
    pub bounds: Vec<f64>,
}

impl LinearProgram {
    pub fn new(objective: Vec<f64>) -> Self {
        Self {
            objective,
            ..Self::default()
        }
    }

    /// Adds `coefficients · x <= bound`.
    pub fn constrain(&mut self, coefficients: Vec<f64>, bound: f64) {
        self.constraints.push(coefficients);
        self.bounds.push(bound);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LpSolution {
    pub value: f64,
    pub x: Vec<f64>,
}

/// Maximises `c·x` subject to `A x <= b` and `x >= 0`. Bounds must be non-negative.
pub fn maximize(lp: &LinearProgram) -> Result<LpSolution, LpError> {
    let n = lp.objective.len();
    let m = lp.constraints.len();
    for (row, coefficients) in lp.constraints.iter().enumerate() {
        if coefficients.len() != n {
            return Err(LpError::DimensionMismatch {
                row,
                got: coefficients.len(),
                expected: n,
            });
        }
        let bound = lp.bounds.get(row).copied().unwrap_or(0.0);
        if bound < -EPS {
            return Err(LpError::NegativeBound { row, bound });
        }
    }

    // Columns: n decision variables, m slacks, then the right-hand side.
    let width = n + m + 1;
    let rhs = n + m;
    let mut tableau = vec![vec![0.0; width]; m + 1];
    for (i, coefficients) in lp.constraints.iter().enumerate() {
        tableau[i][..n].copy_from_slice(coefficients);
        tableau[i][n + i] = 1.0;
        tableau[i][rhs] = lp.bounds.get(i).copied().unwrap_or(0.0).max(0.0);
    }
    for (j, c) in lp.objective.iter().enumerate() {
        tableau[m][j] = -c;
    }
    let mut basis = (n..n + m).collect::<Vec<_>>();

    let max_pivots = 50 * (n + m + 1);
    for _ in 0..max_pivots {
        let Some(entering) = (0..n + m).find(|&j| tableau[m][j] < -EPS) else {
            let mut x = vec![0.0; n];
            for (i, &var) in basis.iter().enumerate() {
                if var < n {
                    x[var] = tableau[i][rhs];
                }
            }
            return Ok(LpSolution {
                value: tableau[m][rhs],
                x,
            });
        };

        let mut leaving: Option<(usize, f64)> = None;
        for i in 0..m {
            let coef = tableau[i][entering];
            if coef <= EPS {
                continue;
            }
            let ratio = tableau[i][rhs] / coef;
            leaving = match leaving {
                None => Some((i, ratio)),
                Some((best, best_ratio)) => {
                    if ratio < best_ratio - EPS
                        || ((ratio - best_ratio).abs() <= EPS && basis[i] < basis[best])
                    {
                        Some((i, ratio))
                    } else {
                        Some((best, best_ratio))
                    }
                }
            };
        }
        let Some((pivot_row, _)) = leaving else {
            return Err(LpError::Unbounded);
        };

        pivot(&mut tableau, pivot_row, entering);
        basis[pivot_row] = entering;
    }
    Err(LpError::IterationLimit(max_pivots))
}

fn pivot(tableau: &mut [Vec<f64>], pivot_row: usize, col: usize) {
    let factor = tableau[pivot_row][col];
    for v in tableau[pivot_row].iter_mut() {
        *v /= factor;
    }
    let pivot_values = tableau[pivot_row].clone();
    for (i, row) in tableau.iter_mut().enumerate() {
        if i == pivot_row {
            continue;
        }
        let scale = row[col];
        if scale.abs() <= f64::EPSILON {
            continue;
        }
        for (v, p) in row.iter_mut().zip(&pivot_values) {
            *v -= scale * p;
        }
    }
}
