use crate::traits::*;

use nalgebra::DMatrix;
use nalgebra_sparse::{CooMatrix, CscMatrix, SparseEntry};
use std::collections::HashMap;

impl MatTriplets for CscMatrix<f64> {
    type Mat = Self;
    type Scalar = f64;

    fn from_nonzero_triplets<I>(
        nrow: usize,
        ncol: usize,
        triplets: Vec<(I, I, Self::Scalar)>,
    ) -> anyhow::Result<Self::Mat>
    where
        I: TryInto<usize> + Copy,
        <I as TryInto<usize>>::Error: std::fmt::Debug,
    {
        let mut coo = CooMatrix::new(nrow, ncol);
        for (ii, jj, x_ij) in triplets {
            let ii: usize = ii
                .try_into()
                .map_err(|e| anyhow::anyhow!("invalid row index: {:?}", e))?;
            let jj: usize = jj
                .try_into()
                .map_err(|e| anyhow::anyhow!("invalid column index: {:?}", e))?;
            if ii >= nrow || jj >= ncol {
                anyhow::bail!(
                    "triplet ({}, {}) out of bounds for {} x {} matrix",
                    ii,
                    jj,
                    nrow,
                    ncol
                );
            }
            coo.push(ii, jj, x_ij);
        }
        Ok(CscMatrix::from(&coo))
    }

    fn to_nonzero_triplets(
        &self,
    ) -> anyhow::Result<(usize, usize, Vec<(usize, usize, Self::Scalar)>)> {
        let triplets = self
            .triplet_iter()
            .filter(|&(_, _, &x_ij)| x_ij != 0.0)
            .map(|(i, j, &x_ij)| (i, j, x_ij))
            .collect();
        Ok((self.nrows(), self.ncols(), triplets))
    }
}

impl SparseGraphOps for CscMatrix<f64> {
    type Mat = Self;
    type Scalar = f64;

    fn without_diagonal(&self) -> Self::Mat {
        let mut coo = CooMatrix::new(self.nrows(), self.ncols());
        for (i, j, &x_ij) in self.triplet_iter() {
            if i != j {
                coo.push(i, j, x_ij);
            }
        }
        CscMatrix::from(&coo)
    }

    fn symmetrize_union(&self) -> Self::Mat {
        // unordered pair (hi, lo) -> value
        let mut pairs: HashMap<(usize, usize), f64> = HashMap::with_capacity(self.nnz());
        for (i, j, &x_ij) in self.triplet_iter() {
            let key = if i >= j { (i, j) } else { (j, i) };
            let slot = pairs.entry(key).or_insert(x_ij);
            if x_ij > *slot {
                *slot = x_ij;
            }
        }

        let mut coo = CooMatrix::new(self.nrows(), self.ncols());
        for ((hi, lo), x) in pairs {
            coo.push(hi, lo, x);
            if hi != lo {
                coo.push(lo, hi, x);
            }
        }
        CscMatrix::from(&coo)
    }

    fn support_subset_of(&self, other: &Self::Mat) -> bool {
        if self.nrows() != other.nrows() || self.ncols() != other.ncols() {
            return false;
        }
        self.triplet_iter()
            .all(|(i, j, _)| matches!(other.get_entry(i, j), Some(SparseEntry::NonZero(_))))
    }

    fn value_at(&self, i: usize, j: usize) -> Self::Scalar {
        match self.get_entry(i, j) {
            Some(SparseEntry::NonZero(&x)) => x,
            _ => 0.0,
        }
    }

    fn sandwich(&self, z_nk: &DMatrix<Self::Scalar>) -> anyhow::Result<DMatrix<Self::Scalar>> {
        if self.nrows() != z_nk.nrows() || self.ncols() != z_nk.nrows() {
            anyhow::bail!(
                "sandwich: {} x {} sparse matrix incompatible with {} x {} membership",
                self.nrows(),
                self.ncols(),
                z_nk.nrows(),
                z_nk.ncols()
            );
        }
        let az_nk: DMatrix<f64> = self * z_nk;
        Ok(z_nk.transpose() * az_nk)
    }
}
