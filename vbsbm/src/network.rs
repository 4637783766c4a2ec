//! Sparse network data: adjacency `Y`, observation mask `R`, and dyadic
//! covariates.
//!
//! Inputs are canonicalized once, at construction:
//! * the diagonal is dropped (a dyad is a pair of distinct nodes);
//! * for undirected networks each matrix is symmetrized by union, so the
//!   caller may supply either triangle or both.
//!
//! Downstream code can therefore rely on `Y ⊆ R` and, for undirected
//! networks, on symmetric storage.

use crate::error::{check_len, check_shape, SbmError};

use matrix_util::traits::SparseGraphOps;
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CscMatrix;
use ndarray::{s, Array3, ArrayView1};

/// Whether `i -> j` and `j -> i` are modelled independently
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// `Y(i,j)` and `Y(j,i)` are separate observations
    Directed,
    /// One observation per unordered pair
    Undirected,
}

/// An observed dyad and its edge value `Y(i,j)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObservedDyad {
    /// Row (sender) node; the larger index for undirected networks
    pub i: usize,
    /// Column (receiver) node
    pub j: usize,
    /// `1.0` for an edge, `0.0` for an observed non-edge
    pub y: f64,
}

/// Validated `(Y, R)` pair over `n` nodes
#[derive(Debug, Clone)]
pub struct SparseNetwork {
    y_nn: CscMatrix<f64>,
    r_nn: CscMatrix<f64>,
    direction: Direction,
}

impl SparseNetwork {
    /// Directed network: every stored `(i, j)` of `R` is an ordered dyad.
    ///
    /// * `y_nn` - adjacency, `Y(i,j) = 1` for an edge `i -> j`
    /// * `r_nn` - observation mask, `R(i,j) = 1` if `i -> j` was observed
    pub fn directed(y_nn: &CscMatrix<f64>, r_nn: &CscMatrix<f64>) -> anyhow::Result<Self> {
        Self::new(y_nn, r_nn, Direction::Directed)
    }

    /// Undirected network: `{i, j}` is present if either orientation is
    /// stored.
    pub fn undirected(y_nn: &CscMatrix<f64>, r_nn: &CscMatrix<f64>) -> anyhow::Result<Self> {
        Self::new(y_nn, r_nn, Direction::Undirected)
    }

    /// Fully observed network: `R` covers every dyad of distinct nodes.
    pub fn fully_observed(y_nn: &CscMatrix<f64>, direction: Direction) -> anyhow::Result<Self> {
        let nn = y_nn.nrows();
        let mut coo = nalgebra_sparse::CooMatrix::new(nn, nn);
        for j in 0..nn {
            for i in 0..nn {
                if i != j {
                    coo.push(i, j, 1.0);
                }
            }
        }
        Self::new(y_nn, &CscMatrix::from(&coo), direction)
    }

    /// Validate and canonicalize `y_nn` (edges) against `r_nn` (observed
    /// dyads).
    ///
    /// Both must be square of the same size and every edge must be
    /// observed. Self-loops are dropped. Undirected inputs are
    /// symmetrized by union, so either triangle or both may be given.
    pub fn new(
        y_nn: &CscMatrix<f64>,
        r_nn: &CscMatrix<f64>,
        direction: Direction,
    ) -> anyhow::Result<Self> {
        let nn = y_nn.nrows();
        if y_nn.ncols() != nn {
            return Err(SbmError::InvalidNetwork(format!(
                "adjacency must be square, got {} x {}",
                nn,
                y_nn.ncols()
            ))
            .into());
        }
        check_shape("observation mask", (nn, nn), (r_nn.nrows(), r_nn.ncols()))?;

        let (y_nn, r_nn) = match direction {
            Direction::Directed => (y_nn.without_diagonal(), r_nn.without_diagonal()),
            Direction::Undirected => (
                y_nn.without_diagonal().symmetrize_union(),
                r_nn.without_diagonal().symmetrize_union(),
            ),
        };

        if !y_nn.support_subset_of(&r_nn) {
            return Err(SbmError::InvalidNetwork(
                "edges must be a subset of the observed dyads".into(),
            )
            .into());
        }

        Ok(SparseNetwork {
            y_nn,
            r_nn,
            direction,
        })
    }

    /// Number of nodes `n`
    pub fn num_nodes(&self) -> usize {
        self.y_nn.nrows()
    }

    /// `true` for [`Direction::Directed`]
    pub fn is_directed(&self) -> bool {
        self.direction == Direction::Directed
    }

    /// Canonical adjacency
    pub fn adjacency(&self) -> &CscMatrix<f64> {
        &self.y_nn
    }

    /// Canonical observation mask
    pub fn observed(&self) -> &CscMatrix<f64> {
        &self.r_nn
    }

    /// Dyads that carry likelihood terms, each counted once: all stored
    /// entries of `R` for directed networks, `row > column` for
    /// undirected ones.
    pub fn observed_dyads(&self) -> Vec<ObservedDyad> {
        let undirected = !self.is_directed();
        self.r_nn
            .triplet_iter()
            .filter(|&(i, j, _)| !undirected || i > j)
            .map(|(i, j, _)| ObservedDyad {
                i,
                j,
                y: self.y_nn.value_at(i, j),
            })
            .collect()
    }

    /// Fail unless `z_nk` has one row per node
    pub(crate) fn check_membership(&self, z_nk: &DMatrix<f64>) -> anyhow::Result<()> {
        check_len("membership rows", self.num_nodes(), z_nk.nrows())
    }
}

/// Dyadic covariate tensor `X` (n x n x p)
#[derive(Debug, Clone)]
pub struct DyadCovariates {
    x_nnp: Array3<f64>,
}

impl DyadCovariates {
    /// Wrap an `n x n x p` tensor; fails unless the first two axes agree
    pub fn new(x_nnp: Array3<f64>) -> anyhow::Result<Self> {
        let (n1, n2, _) = x_nnp.dim();
        if n1 != n2 {
            return Err(SbmError::ShapeMismatch {
                context: "dyadic covariates",
                expected: (n1, n1),
                found: (n1, n2),
            }
            .into());
        }
        Ok(DyadCovariates { x_nnp })
    }

    /// Number of nodes `n`
    pub fn num_nodes(&self) -> usize {
        self.x_nnp.dim().0
    }

    /// Number of covariates `p`
    pub fn num_covariates(&self) -> usize {
        self.x_nnp.dim().2
    }

    /// Covariate vector `X(i, j, ·)`
    pub fn features(&self, i: usize, j: usize) -> ArrayView1<'_, f64> {
        self.x_nnp.slice(s![i, j, ..])
    }

    /// Linear predictor `M(i,j) = β · X(i,j,·)` for every dyad
    pub fn linear_predictor(&self, beta_p: &DVector<f64>) -> anyhow::Result<DMatrix<f64>> {
        check_len("covariate effects", self.num_covariates(), beta_p.len())?;
        let nn = self.num_nodes();
        Ok(DMatrix::from_fn(nn, nn, |i, j| {
            self.features(i, j)
                .iter()
                .zip(beta_p.iter())
                .map(|(x, b)| x * b)
                .sum::<f64>()
        }))
    }

    pub(crate) fn check_network(&self, net: &SparseNetwork) -> anyhow::Result<()> {
        check_len("covariate nodes", net.num_nodes(), self.num_nodes())
    }
}
