use nalgebra::DMatrix;

/// Convert to and from the vector of triplets
pub trait MatTriplets {
    type Mat;
    type Scalar;

    fn from_nonzero_triplets<I>(
        nrow: usize,
        ncol: usize,
        triplets: Vec<(I, I, Self::Scalar)>,
    ) -> anyhow::Result<Self::Mat>
    where
        I: TryInto<usize> + Copy,
        <I as TryInto<usize>>::Error: std::fmt::Debug;

    fn to_nonzero_triplets(
        &self,
    ) -> anyhow::Result<(usize, usize, Vec<(usize, usize, Self::Scalar)>)>;
}

/// Structural operations on a square sparse adjacency (or observation
/// mask) matrix, where the entry `(i, j)` stands for the dyad `i -> j`.
pub trait SparseGraphOps {
    type Mat;
    type Scalar;

    /// Copy of the matrix without the diagonal (self-loops)
    fn without_diagonal(&self) -> Self::Mat;

    /// Symmetric copy: `{i,j}` is stored in both directions if either
    /// `(i,j)` or `(j,i)` is stored. Coinciding entries keep the larger
    /// value.
    fn symmetrize_union(&self) -> Self::Mat;

    /// Whether every stored entry of `self` is also stored in `other`
    fn support_subset_of(&self, other: &Self::Mat) -> bool;

    /// Value at `(i, j)`, zero if not stored
    fn value_at(&self, i: usize, j: usize) -> Self::Scalar;

    /// Quadratic form `Zᵗ A Z` for a dense membership matrix `Z` (n x k)
    fn sandwich(&self, z_nk: &DMatrix<Self::Scalar>) -> anyhow::Result<DMatrix<Self::Scalar>>;
}
