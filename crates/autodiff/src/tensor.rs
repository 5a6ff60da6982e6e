use std::{
    fmt, ops,
    rc::Rc,
    sync::atomic::{AtomicUsize, Ordering},
};

use ndarray::{Array2, ShapeError, s};

use crate::{function::Function, linalg, mode, op::Op};

/// Identifies a node in the computation graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    fn next() -> Self {
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

pub(crate) struct Node {
    id: NodeId,
    value: Array2<f64>,
    requires_grad: bool,
    op: Option<Op>,
}

/// A rank-2 tensor that may take part in a computation graph.
///
/// Cloning is cheap and shares the underlying node. Tensors are immutable:
/// every operation returns a new tensor, and "updating" a parameter means
/// replacing it with a new leaf.
///
/// Operations follow the `ndarray` convention and panic on shape mismatches.
/// Element-wise binary operations broadcast an operand whose rows or columns
/// equal one.
#[derive(Clone)]
pub struct Tensor(Rc<Node>);

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape())
            .field("requires_grad", &self.requires_grad())
            .field("value", &self.0.value)
            .finish()
    }
}

// --- Construction ---

impl Tensor {
    /// Creates a constant tensor.
    #[must_use]
    pub fn new(value: Array2<f64>) -> Self {
        Self::leaf(value, false)
    }

    /// Creates a leaf tensor that gradients are computed for.
    #[must_use]
    pub fn variable(value: Array2<f64>) -> Self {
        Self::leaf(value, true)
    }

    /// Creates a 1×1 constant.
    #[must_use]
    pub fn scalar(value: f64) -> Self {
        Self::new(Array2::from_elem((1, 1), value))
    }

    #[must_use]
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self::new(Array2::zeros((rows, cols)))
    }

    #[must_use]
    pub fn ones(rows: usize, cols: usize) -> Self {
        Self::new(Array2::ones((rows, cols)))
    }

    /// Creates a constant from row-major data.
    ///
    /// # Errors
    ///
    /// Returns an error if `data.len() != rows * cols`.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self, ShapeError> {
        Array2::from_shape_vec((rows, cols), data).map(Self::new)
    }

    /// Creates a node whose gradient is supplied by a custom rule.
    ///
    /// The node records `inputs` as its parents. A reverse-mode sweep that
    /// reaches it calls `rule` instead of differentiating how `value` was
    /// produced.
    #[must_use]
    pub fn from_function(value: Array2<f64>, inputs: Vec<Tensor>, rule: Rc<dyn Function>) -> Self {
        Self::from_op(value, Op::Function { inputs, rule })
    }

    fn leaf(value: Array2<f64>, requires_grad: bool) -> Self {
        Self(Rc::new(Node {
            id: NodeId::next(),
            value,
            requires_grad,
            op: None,
        }))
    }

    pub(crate) fn from_op(value: Array2<f64>, op: Op) -> Self {
        let requires_grad =
            mode::is_grad_enabled() && op.parents().iter().any(|parent| parent.requires_grad());

        Self(Rc::new(Node {
            id: NodeId::next(),
            value,
            requires_grad,
            op: requires_grad.then_some(op),
        }))
    }
}

// --- Accessors ---

impl Tensor {
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.0.id
    }

    #[must_use]
    pub fn value(&self) -> &Array2<f64> {
        &self.0.value
    }

    /// Returns `(rows, cols)`.
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        self.0.value.dim()
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        self.0.value.nrows()
    }

    #[must_use]
    pub fn cols(&self) -> usize {
        self.0.value.ncols()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.value.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.value.is_empty()
    }

    /// Returns `true` if gradients flow into this tensor.
    #[must_use]
    pub fn requires_grad(&self) -> bool {
        self.0.requires_grad
    }

    /// Returns `true` if the tensor has no recorded parents.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.0.op.is_none()
    }

    pub(crate) fn op(&self) -> Option<&Op> {
        self.0.op.as_ref()
    }

    /// Returns the single element of a 1×1 tensor.
    ///
    /// # Panics
    ///
    /// Panics if the tensor is empty.
    #[must_use]
    pub fn item(&self) -> f64 {
        self.0.value[[0, 0]]
    }

    /// Returns the values in row-major order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<f64> {
        self.0.value.iter().copied().collect()
    }

    /// Returns a constant with the same value.
    #[must_use]
    pub fn detach(&self) -> Tensor {
        Self::new(self.0.value.clone())
    }

    /// Returns a fresh leaf with the same value that gradients are computed for.
    #[must_use]
    pub fn to_variable(&self) -> Tensor {
        Self::variable(self.0.value.clone())
    }

    /// Returns `true` if every element is finite.
    #[must_use]
    pub fn all_finite(&self) -> bool {
        self.0.value.iter().all(|v| v.is_finite())
    }
}

// --- Element-wise arithmetic ---

impl Tensor {
    #[must_use]
    pub fn add(&self, other: &Tensor) -> Tensor {
        let (a, b) = broadcast_pair(self, other, "add");
        Self::from_op(&a.0.value + &b.0.value, Op::Add(a, b))
    }

    #[must_use]
    pub fn sub(&self, other: &Tensor) -> Tensor {
        let (a, b) = broadcast_pair(self, other, "sub");
        Self::from_op(&a.0.value - &b.0.value, Op::Sub(a, b))
    }

    #[must_use]
    pub fn mul(&self, other: &Tensor) -> Tensor {
        let (a, b) = broadcast_pair(self, other, "mul");
        Self::from_op(&a.0.value * &b.0.value, Op::Mul(a, b))
    }

    #[must_use]
    pub fn div(&self, other: &Tensor) -> Tensor {
        self.mul(&other.recip())
    }

    #[must_use]
    pub fn neg(&self) -> Tensor {
        Self::from_op(-&self.0.value, Op::Neg(self.clone()))
    }

    /// Multiplies every element by a constant.
    #[must_use]
    pub fn scale(&self, factor: f64) -> Tensor {
        Self::from_op(&self.0.value * factor, Op::Scale(self.clone(), factor))
    }

    /// Adds a constant to every element.
    #[must_use]
    pub fn add_scalar(&self, offset: f64) -> Tensor {
        Self::from_op(&self.0.value + offset, Op::AddScalar(self.clone()))
    }

    #[must_use]
    pub fn square(&self) -> Tensor {
        self.mul(self)
    }

    #[must_use]
    pub fn tanh(&self) -> Tensor {
        Self::from_op(self.0.value.mapv(f64::tanh), Op::Tanh(self.clone()))
    }

    #[must_use]
    pub fn exp(&self) -> Tensor {
        Self::from_op(self.0.value.mapv(f64::exp), Op::Exp(self.clone()))
    }

    #[must_use]
    pub fn ln(&self) -> Tensor {
        Self::from_op(self.0.value.mapv(f64::ln), Op::Ln(self.clone()))
    }

    #[must_use]
    pub fn recip(&self) -> Tensor {
        Self::from_op(self.0.value.mapv(f64::recip), Op::Recip(self.clone()))
    }

    #[must_use]
    pub fn sigmoid(&self) -> Tensor {
        Self::from_op(self.0.value.mapv(sigmoid), Op::Sigmoid(self.clone()))
    }

    /// Computes `ln(1 + exp(x))` without overflow for large `x`.
    #[must_use]
    pub fn softplus(&self) -> Tensor {
        Self::from_op(self.0.value.mapv(softplus), Op::Softplus(self.clone()))
    }
}

// --- Linear algebra ---

impl Tensor {
    /// Matrix product.
    ///
    /// # Panics
    ///
    /// Panics if `self.cols() != other.rows()`.
    #[must_use]
    pub fn matmul(&self, other: &Tensor) -> Tensor {
        assert_eq!(
            self.cols(),
            other.rows(),
            "matmul: cannot multiply {:?} by {:?}",
            self.shape(),
            other.shape()
        );
        Self::from_op(
            self.0.value.dot(&other.0.value),
            Op::MatMul(self.clone(), other.clone()),
        )
    }

    /// Transpose.
    #[must_use]
    pub fn t(&self) -> Tensor {
        Self::from_op(self.0.value.t().to_owned(), Op::Transpose(self.clone()))
    }

    /// Moore–Penrose pseudoinverse.
    ///
    /// Singular values below `1e-15 · σ_max` are dropped, so singular inputs
    /// silently yield the least-squares inverse.
    #[must_use]
    pub fn pinv(&self) -> Tensor {
        Self::from_op(linalg::pinv(&self.0.value), Op::Pinv(self.clone()))
    }
}

// --- Reductions and broadcasting ---

impl Tensor {
    /// Sums every element into a 1×1 tensor.
    #[must_use]
    pub fn sum(&self) -> Tensor {
        let total = Array2::from_elem((1, 1), self.0.value.sum());
        Self::from_op(total, Op::Sum(self.clone()))
    }

    /// Sums over rows, producing a `1 × cols` tensor.
    #[must_use]
    pub fn sum_rows(&self) -> Tensor {
        let value = self.0.value.sum_axis(ndarray::Axis(0)).insert_axis(ndarray::Axis(0));
        Self::from_op(value, Op::SumRows(self.clone()))
    }

    /// Sums over columns, producing a `rows × 1` tensor.
    #[must_use]
    pub fn sum_cols(&self) -> Tensor {
        let value = self.0.value.sum_axis(ndarray::Axis(1)).insert_axis(ndarray::Axis(1));
        Self::from_op(value, Op::SumCols(self.clone()))
    }

    /// Averages every element into a 1×1 tensor.
    #[must_use]
    pub fn mean(&self) -> Tensor {
        let count = self.len().max(1) as f64;
        self.sum().scale(1.0 / count)
    }

    /// Repeats rows and/or columns of length one up to `(rows, cols)`.
    ///
    /// # Panics
    ///
    /// Panics if a dimension is neither one nor equal to the target.
    #[must_use]
    pub fn broadcast_to(&self, rows: usize, cols: usize) -> Tensor {
        let (r, c) = self.shape();
        if (r, c) == (rows, cols) {
            return self.clone();
        }
        assert!(
            (r == rows || r == 1) && (c == cols || c == 1),
            "broadcast: cannot broadcast {:?} to {:?}",
            (r, c),
            (rows, cols)
        );

        let source = &self.0.value;
        let value = Array2::from_shape_fn((rows, cols), |(i, j)| {
            source[[if r == 1 { 0 } else { i }, if c == 1 { 0 } else { j }]]
        });
        Self::from_op(value, Op::Broadcast(self.clone()))
    }
}

// --- Slicing and concatenation ---

impl Tensor {
    /// Extracts the block starting at `(row, col)` with the given extent.
    ///
    /// # Panics
    ///
    /// Panics if the block exceeds the tensor.
    #[must_use]
    pub fn slice(&self, row: usize, rows: usize, col: usize, cols: usize) -> Tensor {
        assert!(
            row + rows <= self.rows() && col + cols <= self.cols(),
            "slice: block {:?}+{:?} exceeds shape {:?}",
            (row, col),
            (rows, cols),
            self.shape()
        );
        let value = self
            .0
            .value
            .slice(s![row..row + rows, col..col + cols])
            .to_owned();
        Self::from_op(value, Op::Slice {
            input: self.clone(),
            row,
            col,
        })
    }

    #[must_use]
    pub fn slice_rows(&self, start: usize, len: usize) -> Tensor {
        self.slice(start, len, 0, self.cols())
    }

    #[must_use]
    pub fn slice_cols(&self, start: usize, len: usize) -> Tensor {
        self.slice(0, self.rows(), start, len)
    }

    /// Embeds the tensor into a zero tensor of shape `(rows, cols)` at `(row, col)`.
    pub(crate) fn pad(&self, row: usize, col: usize, rows: usize, cols: usize) -> Tensor {
        let mut value = Array2::zeros((rows, cols));
        value
            .slice_mut(s![row..row + self.rows(), col..col + self.cols()])
            .assign(&self.0.value);
        Self::from_op(value, Op::Pad {
            input: self.clone(),
            row,
            col,
        })
    }

    /// Stacks tensors with equal column counts on top of each other.
    ///
    /// # Panics
    ///
    /// Panics if `parts` is empty or the column counts differ.
    #[must_use]
    pub fn concat_rows(parts: &[Tensor]) -> Tensor {
        assert!(!parts.is_empty(), "concat_rows: no tensors to concatenate");
        let cols = parts[0].cols();
        assert!(
            parts.iter().all(|p| p.cols() == cols),
            "concat_rows: column counts differ"
        );

        let rows = parts.iter().map(Tensor::rows).sum();
        let mut value = Array2::zeros((rows, cols));
        let mut offset = 0;
        for part in parts {
            value
                .slice_mut(s![offset..offset + part.rows(), ..])
                .assign(&part.0.value);
            offset += part.rows();
        }
        Self::from_op(value, Op::ConcatRows(parts.to_vec()))
    }

    /// Places tensors with equal row counts side by side.
    ///
    /// # Panics
    ///
    /// Panics if `parts` is empty or the row counts differ.
    #[must_use]
    pub fn concat_cols(parts: &[Tensor]) -> Tensor {
        assert!(!parts.is_empty(), "concat_cols: no tensors to concatenate");
        let rows = parts[0].rows();
        assert!(
            parts.iter().all(|p| p.rows() == rows),
            "concat_cols: row counts differ"
        );

        let cols = parts.iter().map(Tensor::cols).sum();
        let mut value = Array2::zeros((rows, cols));
        let mut offset = 0;
        for part in parts {
            value
                .slice_mut(s![.., offset..offset + part.cols()])
                .assign(&part.0.value);
            offset += part.cols();
        }
        Self::from_op(value, Op::ConcatCols(parts.to_vec()))
    }
}

/// Broadcasts both operands to a common shape.
fn broadcast_pair(a: &Tensor, b: &Tensor, name: &str) -> (Tensor, Tensor) {
    let (ar, ac) = a.shape();
    let (br, bc) = b.shape();
    if (ar, ac) == (br, bc) {
        return (a.clone(), b.clone());
    }

    let rows = common_dim(ar, br)
        .unwrap_or_else(|| panic!("{name}: incompatible shapes {:?} and {:?}", (ar, ac), (br, bc)));
    let cols = common_dim(ac, bc)
        .unwrap_or_else(|| panic!("{name}: incompatible shapes {:?} and {:?}", (ar, ac), (br, bc)));

    (a.broadcast_to(rows, cols), b.broadcast_to(rows, cols))
}

fn common_dim(a: usize, b: usize) -> Option<usize> {
    match (a, b) {
        _ if a == b => Some(a),
        (1, _) => Some(b),
        (_, 1) => Some(a),
        _ => None,
    }
}

fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

fn softplus(x: f64) -> f64 {
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}

// --- Operator overloads ---

impl ops::Add for &Tensor {
    type Output = Tensor;

    fn add(self, rhs: &Tensor) -> Tensor {
        Tensor::add(self, rhs)
    }
}

impl ops::Sub for &Tensor {
    type Output = Tensor;

    fn sub(self, rhs: &Tensor) -> Tensor {
        Tensor::sub(self, rhs)
    }
}

impl ops::Mul for &Tensor {
    type Output = Tensor;

    fn mul(self, rhs: &Tensor) -> Tensor {
        Tensor::mul(self, rhs)
    }
}

impl ops::Mul<f64> for &Tensor {
    type Output = Tensor;

    fn mul(self, rhs: f64) -> Tensor {
        self.scale(rhs)
    }
}

impl ops::Neg for &Tensor {
    type Output = Tensor;

    fn neg(self) -> Tensor {
        Tensor::neg(self)
    }
}
