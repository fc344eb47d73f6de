//! Algebraic connectivity of small similarity graphs.
//!
//! Audited neighborhoods are tiny (tens of vectors), so the Laplacian
//! spectrum is computed on the host with the cyclic Jacobi method.

use grainvdb_cuda::cpu::kernels::cosine;

const JACOBI_MAX_SWEEPS: usize = 64;
const JACOBI_TOLERANCE: f64 = 1e-12;

/// Dense symmetric matrix in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct SymmetricMatrix {
    n: usize,
    data: Vec<f64>,
}

impl SymmetricMatrix {
    pub fn zeros(n: usize) -> Self {
        Self {
            n,
            data: vec![0.0; n * n],
        }
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.n
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.n + j]
    }

    #[inline]
    fn set(&mut self, i: usize, j: usize, value: f64) {
        self.data[i * self.n + j] = value;
    }

    /// Set `(i, j)` and `(j, i)`.
    pub fn set_symmetric(&mut self, i: usize, j: usize, value: f64) {
        self.set(i, j, value);
        self.set(j, i, value);
    }

    fn off_diagonal_norm(&self) -> f64 {
        let mut sum = 0.0;
        for i in 0..self.n {
            for j in (i + 1)..self.n {
                sum += self.get(i, j).powi(2);
            }
        }
        sum.sqrt()
    }

    /// Eigenvalues in ascending order (cyclic Jacobi rotations).
    pub fn eigenvalues(&self) -> Vec<f64> {
        let n = self.n;
        let mut a = self.clone();

        for _ in 0..JACOBI_MAX_SWEEPS {
            if a.off_diagonal_norm() < JACOBI_TOLERANCE {
                break;
            }
            for p in 0..n {
                for q in (p + 1)..n {
                    let apq = a.get(p, q);
                    if apq.abs() < f64::MIN_POSITIVE {
                        continue;
                    }
                    let app = a.get(p, p);
                    let aqq = a.get(q, q);
                    let theta = (aqq - app) / (2.0 * apq);
                    let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                    let c = 1.0 / (t * t + 1.0).sqrt();
                    let s = t * c;

                    for k in 0..n {
                        let akp = a.get(k, p);
                        let akq = a.get(k, q);
                        a.set(k, p, c * akp - s * akq);
                        a.set(k, q, s * akp + c * akq);
                    }
                    for k in 0..n {
                        let apk = a.get(p, k);
                        let aqk = a.get(q, k);
                        a.set(p, k, c * apk - s * aqk);
                        a.set(q, k, s * apk + c * aqk);
                    }
                }
            }
        }

        let mut values: Vec<f64> = (0..n).map(|i| a.get(i, i)).collect();
        values.sort_by(|x, y| x.total_cmp(y));
        values
    }
}

/// Graph Laplacian of the vectors whose pairwise cosine exceeds `threshold`.
pub fn threshold_laplacian(vectors: &[Vec<f32>], threshold: f32) -> SymmetricMatrix {
    let n = vectors.len();
    let mut laplacian = SymmetricMatrix::zeros(n);
    let mut degree = vec![0.0f64; n];
    for i in 0..n {
        for j in (i + 1)..n {
            if cosine(&vectors[i], &vectors[j]) > threshold {
                laplacian.set_symmetric(i, j, -1.0);
                degree[i] += 1.0;
                degree[j] += 1.0;
            }
        }
    }
    for (i, d) in degree.into_iter().enumerate() {
        laplacian.set(i, i, d);
    }
    laplacian
}

/// Fiedler value (second smallest Laplacian eigenvalue).
///
/// Zero when the thresholded graph is disconnected; grows with how tightly
/// the set hangs together. Fewer than two vectors are trivially connected
/// and yield 1.0.
pub fn algebraic_connectivity(vectors: &[Vec<f32>], threshold: f32) -> f64 {
    if vectors.len() < 2 {
        return 1.0;
    }
    let eigenvalues = threshold_laplacian(vectors, threshold).eigenvalues();
    eigenvalues.get(1).copied().unwrap_or(0.0).max(0.0)
}
