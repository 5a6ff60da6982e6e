use std::collections::{HashMap, HashSet};

use crate::{Error, NodeId, Tensor, enable_grad, no_grad};

/// Computes the gradient of a 1×1 `output` with respect to each of `inputs`.
///
/// Equivalent to [`vjp`] with a cotangent of one.
///
/// # Errors
///
/// Returns [`Error::NotScalar`] if `output` is not 1×1, or any error raised
/// by a custom backward rule.
pub fn grad(output: &Tensor, inputs: &[Tensor], create_graph: bool) -> Result<Vec<Tensor>, Error> {
    let (rows, cols) = output.shape();
    if (rows, cols) != (1, 1) {
        return Err(Error::NotScalar { rows, cols });
    }
    vjp(output, &Tensor::ones(1, 1), inputs, create_graph)
}

/// Computes the vector–Jacobian product `cotangentᵀ · ∂output/∂input` for
/// each of `inputs`.
///
/// The sweep stops at the requested inputs: if one input lies upstream of
/// another, only paths that avoid the downstream input contribute to its
/// gradient. Inputs the output does not depend on get zeros.
///
/// With `create_graph = true` the sweep itself is recorded, so the returned
/// gradients can be differentiated again. Otherwise they are constants.
///
/// # Errors
///
/// Returns [`Error::CotangentShape`] if the cotangent does not match the
/// output, or any error raised by a custom backward rule.
pub fn vjp(
    output: &Tensor,
    cotangent: &Tensor,
    inputs: &[Tensor],
    create_graph: bool,
) -> Result<Vec<Tensor>, Error> {
    if cotangent.shape() != output.shape() {
        return Err(Error::CotangentShape {
            expected: output.shape(),
            found: cotangent.shape(),
        });
    }

    if create_graph {
        enable_grad(|| sweep(output, cotangent, inputs))
    } else {
        no_grad(|| sweep(output, cotangent, inputs))
    }
}

fn sweep(output: &Tensor, cotangent: &Tensor, inputs: &[Tensor]) -> Result<Vec<Tensor>, Error> {
    let targets: HashSet<NodeId> = inputs.iter().map(Tensor::id).collect();
    let order = topological_order(output, &targets);
    let relevant = relevant_nodes(&order, &targets);

    let mut grads: HashMap<NodeId, Tensor> = HashMap::new();
    grads.insert(output.id(), cotangent.clone());

    for node in order.iter().rev() {
        if targets.contains(&node.id()) || !relevant.contains(&node.id()) {
            continue;
        }
        let Some(op) = node.op() else {
            continue;
        };
        let Some(grad) = grads.remove(&node.id()) else {
            continue;
        };

        let parent_grads = op.backward(node, &grad)?;
        for (parent, parent_grad) in op.parents().into_iter().zip(parent_grads) {
            if !relevant.contains(&parent.id()) {
                continue;
            }
            grads
                .entry(parent.id())
                .and_modify(|total| *total = total.add(&parent_grad))
                .or_insert(parent_grad);
        }
    }

    Ok(inputs
        .iter()
        .map(|input| {
            grads
                .get(&input.id())
                .cloned()
                .unwrap_or_else(|| Tensor::zeros(input.rows(), input.cols()))
        })
        .collect())
}

/// Returns the nodes reachable from `output`, parents before children.
///
/// Traversal does not continue past targets or into nodes that do not
/// require gradients.
fn topological_order(output: &Tensor, targets: &HashSet<NodeId>) -> Vec<Tensor> {
    let mut order = Vec::new();
    let mut visited = HashSet::new();
    let mut stack = vec![(output.clone(), false)];

    while let Some((node, expanded)) = stack.pop() {
        if expanded {
            order.push(node);
            continue;
        }
        if !visited.insert(node.id()) {
            continue;
        }

        stack.push((node.clone(), true));
        if targets.contains(&node.id()) {
            continue;
        }
        if let Some(op) = node.op() {
            for parent in op.parents() {
                if parent.requires_grad() && !visited.contains(&parent.id()) {
                    stack.push((parent.clone(), false));
                }
            }
        }
    }

    order
}

/// Returns the nodes that lie on a path from a target to the output.
fn relevant_nodes(order: &[Tensor], targets: &HashSet<NodeId>) -> HashSet<NodeId> {
    let mut relevant = HashSet::new();
    for node in order {
        let is_relevant = targets.contains(&node.id())
            || node.op().is_some_and(|op| {
                op.parents()
                    .iter()
                    .any(|parent| relevant.contains(&parent.id()))
            });
        if is_relevant {
            relevant.insert(node.id());
        }
    }
    relevant
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use approx::assert_relative_eq;
    use ndarray::{Array2, array};

    use super::*;
    use crate::{BoxError, Function};

    #[test]
    fn polynomial_gradient() {
        // y = sum(x³ + 2x), dy/dx = 3x² + 2
        let x = Tensor::variable(array![[1.0, -2.0, 0.5]]);
        let y = x.mul(&x).mul(&x).add(&x.scale(2.0)).sum();

        let [dx] = grad(&y, &[x.clone()], false).unwrap().try_into().unwrap();

        assert_relative_eq!(dx.value()[[0, 0]], 5.0);
        assert_relative_eq!(dx.value()[[0, 1]], 14.0);
        assert_relative_eq!(dx.value()[[0, 2]], 2.75);
        assert!(!dx.requires_grad());
    }

    #[test]
    fn matmul_and_tanh_gradients() {
        // y = sum(tanh(x W)), dy/dW = xᵀ (1 - tanh²(x W))
        let x = Tensor::new(array![[1.0, 2.0]]);
        let w = Tensor::variable(array![[0.1, -0.2], [0.3, 0.05]]);
        let y = x.matmul(&w).tanh().sum();

        let [dw] = grad(&y, &[w.clone()], false).unwrap().try_into().unwrap();

        let h = x.value().dot(w.value()).mapv(f64::tanh);
        for i in 0..2 {
            for j in 0..2 {
                let expected = x.value()[[0, i]] * (1.0 - h[[0, j]].powi(2));
                assert_relative_eq!(dw.value()[[i, j]], expected, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn broadcast_gradients_are_reduced() {
        let x = Tensor::new(array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]);
        let bias = Tensor::variable(array![[0.0, 0.0]]);
        let scale = Tensor::variable(array![[2.0]]);
        let y = x.add(&bias).mul(&scale).sum();

        let grads = grad(&y, &[bias.clone(), scale.clone()], false).unwrap();

        assert_eq!(grads[0].value(), &array![[6.0, 6.0]]);
        assert_relative_eq!(grads[1].item(), 21.0);
    }

    #[test]
    fn second_derivative_with_create_graph() {
        // y = x⁴, y' = 4x³, y'' = 12x²
        let x = Tensor::variable(array![[1.5]]);
        let y = x.square().square().sum();

        let [dy] = grad(&y, &[x.clone()], true).unwrap().try_into().unwrap();
        assert!(dy.requires_grad());
        assert_relative_eq!(dy.item(), 4.0 * 1.5_f64.powi(3), epsilon = 1e-12);

        let [d2y] = grad(&dy.sum(), &[x.clone()], false).unwrap().try_into().unwrap();
        assert_relative_eq!(d2y.item(), 12.0 * 1.5_f64.powi(2), epsilon = 1e-12);
    }

    #[test]
    fn third_derivative_through_tanh() {
        // y = tanh(x), y''' = -2 sech²(x) (1 - 3 tanh²(x))
        let x = Tensor::variable(array![[0.3]]);
        let y = x.tanh().sum();

        let [d1] = grad(&y, &[x.clone()], true).unwrap().try_into().unwrap();
        let [d2] = grad(&d1.sum(), &[x.clone()], true).unwrap().try_into().unwrap();
        let [d3] = grad(&d2.sum(), &[x.clone()], false).unwrap().try_into().unwrap();

        let t = 0.3_f64.tanh();
        let expected = -2.0 * (1.0 - t * t) * (1.0 - 3.0 * t * t);
        assert_relative_eq!(d3.item(), expected, epsilon = 1e-12);
    }

    #[test]
    fn sweep_stops_at_requested_inputs() {
        let x = Tensor::variable(array![[2.0]]);
        let h = x.scale(3.0);
        let y = h.square().sum();

        let grads = grad(&y, &[h.clone(), x.clone()], false).unwrap();

        assert_relative_eq!(grads[0].item(), 12.0);
        assert_relative_eq!(grads[1].item(), 0.0);
    }

    #[test]
    fn unrelated_inputs_get_zeros() {
        let x = Tensor::variable(array![[1.0, 2.0]]);
        let unused = Tensor::variable(Array2::ones((2, 3)));
        let y = x.sum();

        let grads = grad(&y, &[x, unused], false).unwrap();

        assert_eq!(grads[1].value(), &Array2::<f64>::zeros((2, 3)));
    }

    #[test]
    fn vjp_with_matrix_cotangent() {
        let x = Tensor::variable(array![[1.0, 2.0], [3.0, 4.0]]);
        let y = x.exp();
        let v = Tensor::new(array![[1.0, 0.0], [0.0, 2.0]]);

        let [dx] = vjp(&y, &v, &[x.clone()], false).unwrap().try_into().unwrap();

        assert_relative_eq!(dx.value()[[0, 0]], 1f64.exp());
        assert_relative_eq!(dx.value()[[0, 1]], 0.0);
        assert_relative_eq!(dx.value()[[1, 1]], 2.0 * 4f64.exp());
    }

    #[test]
    fn shape_errors() {
        let x = Tensor::variable(array![[1.0, 2.0]]);

        assert!(matches!(
            grad(&x, &[x.clone()], false),
            Err(Error::NotScalar { rows: 1, cols: 2 })
        ));
        assert!(matches!(
            vjp(&x, &Tensor::scalar(1.0), &[x.clone()], false),
            Err(Error::CotangentShape { .. })
        ));
    }

    #[test]
    fn pinv_gradient_matches_finite_differences() {
        let wide = array![[2.0, 0.5, -1.0], [0.3, 1.5, 0.7]];
        let tall = wide.t().to_owned();

        for value in [wide, tall] {
            // Weights shaped like pinv(a).
            let weights = Array2::from_shape_fn((value.ncols(), value.nrows()), |(i, j)| {
                1.0 + 0.5 * i as f64 - 0.75 * j as f64
            });
            let loss = |m: &Array2<f64>| (&crate::linalg::pinv(m) * &weights).sum();

            let a = Tensor::variable(value.clone());
            let y = a.pinv().mul(&Tensor::new(weights.clone())).sum();
            let [da] = grad(&y, &[a.clone()], false).unwrap().try_into().unwrap();

            let eps = 1e-6;
            for i in 0..value.nrows() {
                for j in 0..value.ncols() {
                    let mut plus = value.clone();
                    let mut minus = value.clone();
                    plus[[i, j]] += eps;
                    minus[[i, j]] -= eps;
                    let fd = (loss(&plus) - loss(&minus)) / (2.0 * eps);
                    assert_relative_eq!(da.value()[[i, j]], fd, epsilon = 1e-6);
                }
            }
        }
    }

    #[test]
    fn no_grad_blocks_recording() {
        let x = Tensor::variable(array![[1.0]]);
        let y = no_grad(|| x.square().sum());

        assert!(!y.requires_grad());
        let [dx] = grad(&y, &[x], false).unwrap().try_into().unwrap();
        assert_relative_eq!(dx.item(), 0.0);
    }

    #[test]
    fn custom_function_rule() {
        let x = Tensor::variable(array![[1.0, 2.0]]);
        let value = x.value().mapv(|v| v * 10.0);
        let y = Tensor::from_function(value, vec![x.clone()], Rc::new(TimesTen));

        let [dx] = grad(&y.sum(), &[x], false).unwrap().try_into().unwrap();

        assert_eq!(dx.value(), &array![[10.0, 10.0]]);
    }

    #[test]
    fn custom_function_arity_is_checked() {
        let x = Tensor::variable(array![[1.0]]);
        let y = Tensor::from_function(x.value().clone(), vec![x.clone(), x.clone()], Rc::new(TimesTen));

        assert!(matches!(
            grad(&y.sum(), &[x], false),
            Err(Error::FunctionArity {
                name: "times_ten",
                expected: 2,
                found: 1
            })
        ));
    }

    // --- Test fixtures ---

    struct TimesTen;

    impl Function for TimesTen {
        fn name(&self) -> &'static str {
            "times_ten"
        }

        fn backward(&self, grad_output: &Tensor) -> Result<Vec<Tensor>, BoxError> {
            Ok(vec![grad_output.scale(10.0)])
        }
    }
}
