//! Flatten a fixed tuple of matrix / vector blocks into one parameter
//! vector for the optimizer, and view the blocks back out of it.
//!
//! The layout is an ordered table of `(shape, offset)` pairs. Blocks are
//! laid out back to back in declaration order; matrices are stored
//! column-major, the native order of `nalgebra`.
//!
//! ```text
//! | block 0 ............ | block 1 .... | ... |
//! 0                      size(0)        size(0)+size(1)
//! ```

use crate::error::{check_len, check_shape};

use nalgebra::{DMatrix, DMatrixView, DMatrixViewMut, DVector, DVectorView, DVectorViewMut};

/// Shape of one packed block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockShape {
    /// Dense matrix, packed column-major
    Matrix {
        /// Row count
        nrows: usize,
        /// Column count
        ncols: usize,
    },
    /// Dense vector
    Vector {
        /// Element count
        len: usize,
    },
}

impl BlockShape {
    /// Shape of an existing matrix
    pub fn matrix_of(x: &DMatrix<f64>) -> Self {
        BlockShape::Matrix {
            nrows: x.nrows(),
            ncols: x.ncols(),
        }
    }

    /// Shape of an existing vector
    pub fn vector_of(x: &DVector<f64>) -> Self {
        BlockShape::Vector { len: x.len() }
    }

    /// Number of scalars in the block
    pub fn size(&self) -> usize {
        match *self {
            BlockShape::Matrix { nrows, ncols } => nrows * ncols,
            BlockShape::Vector { len } => len,
        }
    }
}

/// Offset table for a tuple of blocks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackLayout {
    blocks: Vec<(BlockShape, usize)>,
    packed_size: usize,
}

impl PackLayout {
    /// Lay `shapes` out back to back, in order
    pub fn new(shapes: &[BlockShape]) -> Self {
        let mut offset = 0;
        let blocks = shapes
            .iter()
            .map(|&shape| {
                let entry = (shape, offset);
                offset += shape.size();
                entry
            })
            .collect();
        PackLayout {
            blocks,
            packed_size: offset,
        }
    }

    /// Total number of scalars over all blocks
    pub fn packed_size(&self) -> usize {
        self.packed_size
    }

    /// Scalar range `[start, end)` of block `id`
    pub fn range(&self, id: usize) -> anyhow::Result<std::ops::Range<usize>> {
        let (shape, offset) = self.block(id)?;
        Ok(offset..offset + shape.size())
    }

    /// Zero-filled buffer of length [`Self::packed_size`]
    pub fn zeros(&self) -> Vec<f64> {
        vec![0.0; self.packed_size]
    }

    /// Read-only view of matrix block `id` inside `buf`
    pub fn matrix_view<'a>(&self, id: usize, buf: &'a [f64]) -> anyhow::Result<DMatrixView<'a, f64>> {
        let (nrows, ncols) = self.matrix_dims(id)?;
        let range = self.checked_range(id, buf.len())?;
        Ok(DMatrixView::from_slice(&buf[range], nrows, ncols))
    }

    /// Writable view of matrix block `id` inside `buf`
    pub fn matrix_view_mut<'a>(
        &self,
        id: usize,
        buf: &'a mut [f64],
    ) -> anyhow::Result<DMatrixViewMut<'a, f64>> {
        let (nrows, ncols) = self.matrix_dims(id)?;
        let range = self.checked_range(id, buf.len())?;
        Ok(DMatrixViewMut::from_slice(&mut buf[range], nrows, ncols))
    }

    /// Read-only view of vector block `id` inside `buf`
    pub fn vector_view<'a>(&self, id: usize, buf: &'a [f64]) -> anyhow::Result<DVectorView<'a, f64>> {
        let len = self.vector_len(id)?;
        let range = self.checked_range(id, buf.len())?;
        Ok(DVectorView::from_slice(&buf[range], len))
    }

    /// Writable view of vector block `id` inside `buf`
    pub fn vector_view_mut<'a>(
        &self,
        id: usize,
        buf: &'a mut [f64],
    ) -> anyhow::Result<DVectorViewMut<'a, f64>> {
        let len = self.vector_len(id)?;
        let range = self.checked_range(id, buf.len())?;
        Ok(DVectorViewMut::from_slice(&mut buf[range], len))
    }

    /// Owned copy of a matrix block
    pub fn copy_matrix(&self, id: usize, buf: &[f64]) -> anyhow::Result<DMatrix<f64>> {
        Ok(self.matrix_view(id, buf)?.into_owned())
    }

    /// Owned copy of a vector block
    pub fn copy_vector(&self, id: usize, buf: &[f64]) -> anyhow::Result<DVector<f64>> {
        Ok(self.vector_view(id, buf)?.into_owned())
    }

    /// Write `value` into matrix block `id`
    pub fn put_matrix(&self, id: usize, buf: &mut [f64], value: &DMatrix<f64>) -> anyhow::Result<()> {
        let dims = self.matrix_dims(id)?;
        check_shape("packed matrix block", dims, value.shape())?;
        self.matrix_view_mut(id, buf)?.copy_from(value);
        Ok(())
    }

    /// Write `value` into vector block `id`
    pub fn put_vector(&self, id: usize, buf: &mut [f64], value: &DVector<f64>) -> anyhow::Result<()> {
        check_len("packed vector block", self.vector_len(id)?, value.len())?;
        self.vector_view_mut(id, buf)?.copy_from(value);
        Ok(())
    }

    ///////////////////////
    // internal helpers  //
    ///////////////////////

    fn block(&self, id: usize) -> anyhow::Result<(BlockShape, usize)> {
        self.blocks.get(id).copied().ok_or_else(|| {
            anyhow::anyhow!("block {} out of range ({} blocks)", id, self.blocks.len())
        })
    }

    fn matrix_dims(&self, id: usize) -> anyhow::Result<(usize, usize)> {
        match self.block(id)?.0 {
            BlockShape::Matrix { nrows, ncols } => Ok((nrows, ncols)),
            BlockShape::Vector { .. } => anyhow::bail!("block {} is a vector, not a matrix", id),
        }
    }

    fn vector_len(&self, id: usize) -> anyhow::Result<usize> {
        match self.block(id)?.0 {
            BlockShape::Vector { len } => Ok(len),
            BlockShape::Matrix { .. } => anyhow::bail!("block {} is a matrix, not a vector", id),
        }
    }

    fn checked_range(&self, id: usize, buf_len: usize) -> anyhow::Result<std::ops::Range<usize>> {
        check_len("packed parameter buffer", self.packed_size, buf_len)?;
        self.range(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GAMMA_ID: usize = 0;
    const BETA_ID: usize = 1;

    fn gamma_beta() -> (DMatrix<f64>, DVector<f64>) {
        let gamma = DMatrix::from_row_slice(2, 3, &[0.1, -2.5, 1e-300, 3.0, f64::MIN_POSITIVE, -0.0]);
        let beta = DVector::from_vec(vec![1.0 / 3.0, -7.25]);
        (gamma, beta)
    }

    #[test]
    fn test_offsets_are_contiguous() {
        let (gamma, beta) = gamma_beta();
        let layout = PackLayout::new(&[BlockShape::matrix_of(&gamma), BlockShape::vector_of(&beta)]);
        assert_eq!(layout.packed_size(), 8);
        assert_eq!(layout.range(GAMMA_ID).unwrap(), 0..6);
        assert_eq!(layout.range(BETA_ID).unwrap(), 6..8);
        assert!(layout.range(2).is_err());
    }

    #[test]
    fn test_pack_unpack_is_bit_identical() {
        let (gamma, beta) = gamma_beta();
        let layout = PackLayout::new(&[BlockShape::matrix_of(&gamma), BlockShape::vector_of(&beta)]);

        let mut buf = layout.zeros();
        layout.put_matrix(GAMMA_ID, &mut buf, &gamma).unwrap();
        layout.put_vector(BETA_ID, &mut buf, &beta).unwrap();

        let gamma2 = layout.copy_matrix(GAMMA_ID, &buf).unwrap();
        let beta2 = layout.copy_vector(BETA_ID, &buf).unwrap();
        for (a, b) in gamma.iter().zip(gamma2.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
        for (a, b) in beta.iter().zip(beta2.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_views_do_not_alias() {
        let (gamma, beta) = gamma_beta();
        let layout = PackLayout::new(&[BlockShape::matrix_of(&gamma), BlockShape::vector_of(&beta)]);
        let mut buf = layout.zeros();
        layout.put_vector(BETA_ID, &mut buf, &beta).unwrap();

        layout.matrix_view_mut(GAMMA_ID, &mut buf).unwrap().fill(9.0);
        assert_eq!(layout.copy_vector(BETA_ID, &buf).unwrap(), beta);
        assert!(buf[..6].iter().all(|&x| x == 9.0));
    }

    #[test]
    fn test_wrong_block_kind_and_sizes() {
        let (gamma, beta) = gamma_beta();
        let layout = PackLayout::new(&[BlockShape::matrix_of(&gamma), BlockShape::vector_of(&beta)]);
        let buf = layout.zeros();
        assert!(layout.vector_view(GAMMA_ID, &buf).is_err());
        assert!(layout.matrix_view(BETA_ID, &buf).is_err());
        assert!(layout.matrix_view(GAMMA_ID, &buf[..5]).is_err());

        let mut buf = layout.zeros();
        let wrong = DMatrix::<f64>::zeros(3, 2);
        assert!(layout.put_matrix(GAMMA_ID, &mut buf, &wrong).is_err());
    }
}
