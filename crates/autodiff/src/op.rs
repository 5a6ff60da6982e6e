use std::rc::Rc;

use crate::{Error, Function, Tensor};

/// How a non-leaf tensor was produced.
///
/// Backward rules are written in terms of tensor operations, so running them
/// with recording enabled yields a differentiable graph of the gradient.
pub(crate) enum Op {
    Add(Tensor, Tensor),
    Sub(Tensor, Tensor),
    Mul(Tensor, Tensor),
    Neg(Tensor),
    Scale(Tensor, f64),
    AddScalar(Tensor),
    MatMul(Tensor, Tensor),
    Transpose(Tensor),
    Tanh(Tensor),
    Exp(Tensor),
    Ln(Tensor),
    Recip(Tensor),
    Sigmoid(Tensor),
    Softplus(Tensor),
    Sum(Tensor),
    SumRows(Tensor),
    SumCols(Tensor),
    Broadcast(Tensor),
    Slice {
        input: Tensor,
        row: usize,
        col: usize,
    },
    Pad {
        input: Tensor,
        row: usize,
        col: usize,
    },
    ConcatRows(Vec<Tensor>),
    ConcatCols(Vec<Tensor>),
    Pinv(Tensor),
    Function {
        inputs: Vec<Tensor>,
        rule: Rc<dyn Function>,
    },
}

impl Op {
    /// Returns the operands in the order [`Op::backward`] reports gradients.
    pub(crate) fn parents(&self) -> Vec<&Tensor> {
        match self {
            Op::Add(a, b) | Op::Sub(a, b) | Op::Mul(a, b) | Op::MatMul(a, b) => vec![a, b],
            Op::Neg(a)
            | Op::Scale(a, _)
            | Op::AddScalar(a)
            | Op::Transpose(a)
            | Op::Tanh(a)
            | Op::Exp(a)
            | Op::Ln(a)
            | Op::Recip(a)
            | Op::Sigmoid(a)
            | Op::Softplus(a)
            | Op::Sum(a)
            | Op::SumRows(a)
            | Op::SumCols(a)
            | Op::Broadcast(a)
            | Op::Pinv(a)
            | Op::Slice { input: a, .. }
            | Op::Pad { input: a, .. } => vec![a],
            Op::ConcatRows(parts) | Op::ConcatCols(parts) => parts.iter().collect(),
            Op::Function { inputs, .. } => inputs.iter().collect(),
        }
    }

    /// Maps the gradient of `output` to one gradient per parent.
    pub(crate) fn backward(&self, output: &Tensor, grad: &Tensor) -> Result<Vec<Tensor>, Error> {
        let grads = match self {
            Op::Add(..) => vec![grad.clone(), grad.clone()],
            Op::Sub(..) => vec![grad.clone(), grad.neg()],
            Op::Mul(a, b) => vec![grad.mul(b), grad.mul(a)],
            Op::Neg(_) => vec![grad.neg()],
            Op::Scale(_, factor) => vec![grad.scale(*factor)],
            Op::AddScalar(_) => vec![grad.clone()],
            Op::MatMul(a, b) => vec![grad.matmul(&b.t()), a.t().matmul(grad)],
            Op::Transpose(_) => vec![grad.t()],
            Op::Tanh(_) => vec![grad.mul(&output.square().neg().add_scalar(1.0))],
            Op::Exp(_) => vec![grad.mul(output)],
            Op::Ln(a) => vec![grad.mul(&a.recip())],
            Op::Recip(_) => vec![grad.mul(&output.square()).neg()],
            Op::Sigmoid(_) => vec![grad.mul(&output.mul(&output.neg().add_scalar(1.0)))],
            Op::Softplus(a) => vec![grad.mul(&a.sigmoid())],
            Op::Sum(a) | Op::SumRows(a) | Op::SumCols(a) => {
                vec![grad.broadcast_to(a.rows(), a.cols())]
            }
            Op::Broadcast(a) => vec![reduce_to(grad, a.shape())],
            Op::Slice { input, row, col } => {
                vec![grad.pad(*row, *col, input.rows(), input.cols())]
            }
            Op::Pad { input, row, col } => {
                vec![grad.slice(*row, input.rows(), *col, input.cols())]
            }
            Op::ConcatRows(parts) => {
                let mut offset = 0;
                parts
                    .iter()
                    .map(|part| {
                        let piece = grad.slice_rows(offset, part.rows());
                        offset += part.rows();
                        piece
                    })
                    .collect()
            }
            Op::ConcatCols(parts) => {
                let mut offset = 0;
                parts
                    .iter()
                    .map(|part| {
                        let piece = grad.slice_cols(offset, part.cols());
                        offset += part.cols();
                        piece
                    })
                    .collect()
            }
            Op::Pinv(a) => vec![pinv_backward(a, output, grad)],
            Op::Function { inputs, rule } => {
                let name = rule.name();
                let grads = rule
                    .backward(grad)
                    .map_err(|source| Error::Function { name, source })?;

                if grads.len() != inputs.len() {
                    return Err(Error::FunctionArity {
                        name,
                        expected: inputs.len(),
                        found: grads.len(),
                    });
                }
                for (index, (input, g)) in inputs.iter().zip(&grads).enumerate() {
                    if input.shape() != g.shape() {
                        return Err(Error::FunctionGradientShape {
                            name,
                            index,
                            expected: input.shape(),
                            found: g.shape(),
                        });
                    }
                }
                grads
            }
        };
        Ok(grads)
    }
}

/// Sums a broadcast gradient back down to the operand's shape.
fn reduce_to(grad: &Tensor, (rows, cols): (usize, usize)) -> Tensor {
    let mut reduced = grad.clone();
    if rows == 1 && reduced.rows() != 1 {
        reduced = reduced.sum_rows();
    }
    if cols == 1 && reduced.cols() != 1 {
        reduced = reduced.sum_cols();
    }
    reduced
}

/// Gradient of the pseudoinverse `p = pinv(a)`.
///
/// Valid where the rank of `a` is locally constant. Intermediate products are
/// arranged to keep matrices at the smaller of the two dimensions.
fn pinv_backward(a: &Tensor, p: &Tensor, grad: &Tensor) -> Tensor {
    let (m, n) = a.shape();
    let pt = p.t();
    let gt = grad.t();

    if m <= n {
        let k = gt.matmul(p);
        let kpt = k.matmul(&pt);
        p.matmul(&k)
            .t()
            .neg()
            .add(&kpt)
            .sub(&a.matmul(p).matmul(&kpt))
            .add(&pt.matmul(p).matmul(&gt.sub(&k.matmul(a))))
    } else {
        let k = p.matmul(&gt);
        let ptk = pt.matmul(&k);
        k.matmul(p)
            .t()
            .neg()
            .add(&gt.sub(&a.matmul(&k)).matmul(p).matmul(&pt))
            .add(&ptk)
            .sub(&ptk.matmul(p).matmul(a))
    }
}
