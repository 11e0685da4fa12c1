use graph::{Graph, traversal};

use crate::{
    compute::{Activation, GraphUpdate, MessageFn, NodeUpdateFn, ReduceFn},
    storage::{Result, StoreErr, Tensor},
};

/// A dense snapshot of an entry's first `num_nodes` rows.
#[derive(Debug, Clone, Copy)]
pub struct Rows<'a> {
    pub cols: usize,
    pub values: &'a [f64],
}

impl<'a> Rows<'a> {
    fn row(&self, i: usize) -> &'a [f64] {
        &self.values[i * self.cols..(i + 1) * self.cols]
    }
}

/// The row length `update` produces from rows of `cols` values.
///
/// # Returns
/// A `SchemaMismatch` if a parameter's shape doesn't fit, or a
/// `MalformedDescriptor` if a parameter wasn't attached.
pub fn output_cols(update: &GraphUpdate, cols: usize) -> Result<usize> {
    let NodeUpdateFn::Linear { weight, bias, .. } = &update.update else {
        return Ok(cols);
    };

    let name = &weight.name;
    let weight = attached(name, weight.value.as_ref())?;
    if weight.rows() != cols {
        let reason = format!("expected {cols} rows, got {}", weight.rows());
        return StoreErr::mismatch(name, reason);
    }

    if let Some(bias) = bias {
        let name = &bias.name;
        let bias = attached(name, bias.value.as_ref())?;
        if bias.rows() * bias.cols() != weight.cols() {
            let reason = format!("expected {} values, got {}", weight.cols(), bias.rows() * bias.cols());
            return StoreErr::mismatch(name, reason);
        }
    }

    Ok(weight.cols())
}

fn attached<'a>(name: &str, value: Option<&'a Tensor>) -> Result<&'a Tensor> {
    value.ok_or_else(|| StoreErr::MalformedDescriptor(format!("parameter {name:?} is not attached")))
}

/// Runs `update` over every node of `graph`.
///
/// # Arguments
/// * `graph` - The graph whose neighborhoods are aggregated.
/// * `update` - The descriptor, its parameters already attached.
/// * `field` - The rows of the message's `field`.
/// * `other` - The rows of the message's `other`, for `SubSrc`.
///
/// # Returns
/// The new rows of every node, `num_nodes * output_cols` values.
pub fn full_graph(
    graph: &Graph,
    update: &GraphUpdate,
    field: Rows<'_>,
    other: Option<Rows<'_>>,
) -> Result<Vec<f64>> {
    let cols = field.cols;
    let out_cols = output_cols(update, cols)?;

    if let (MessageFn::SubSrc { other: name, .. }, Some(other)) = (&update.message, other) {
        if other.cols != cols {
            let reason = format!("expected rows of {cols} values, got {}", other.cols);
            return StoreErr::mismatch(name, reason);
        }
    }

    let linear = match &update.update {
        NodeUpdateFn::Linear {
            weight,
            bias,
            activation,
        } => Some((
            weight.value.as_ref().map(Tensor::to_f64).unwrap_or_default(),
            bias.as_ref()
                .and_then(|b| b.value.as_ref())
                .map(Tensor::to_f64),
            *activation,
        )),
        _ => None,
    };

    let rows = traversal::par_map_neighborhoods(graph, update.direction, |_, neighbors| {
        let mut acc = vec![0.; cols];
        let mut msg = vec![0.; cols];

        for (i, &nbr) in neighbors.nodes().iter().enumerate() {
            let nbr = nbr as usize;
            let other_row = other.map(|o| o.row(nbr));
            update.message.apply(field.row(nbr), other_row, &mut msg);

            match update.reduce {
                ReduceFn::Sum | ReduceFn::Mean => {
                    acc.iter_mut().zip(&msg).for_each(|(a, m)| *a += m);
                }
                _ if i == 0 => acc.copy_from_slice(&msg),
                ReduceFn::Max => acc.iter_mut().zip(&msg).for_each(|(a, &m)| *a = a.max(m)),
                ReduceFn::Min => acc.iter_mut().zip(&msg).for_each(|(a, &m)| *a = a.min(m)),
            }
        }

        let degree = neighbors.len();
        if update.reduce == ReduceFn::Mean && degree > 0 {
            acc.iter_mut().for_each(|a| *a /= degree as f64);
        }

        match (&update.update, &linear) {
            (NodeUpdateFn::Identity, _) => acc,
            (NodeUpdateFn::Scale { factor }, _) => acc.into_iter().map(|a| a * factor).collect(),
            (NodeUpdateFn::DegreeNorm, _) => {
                let norm = 1. / degree.max(1) as f64;
                acc.into_iter().map(|a| a * norm).collect()
            }
            (NodeUpdateFn::Linear { .. }, Some((weight, bias, activation))) => {
                linear_row(&acc, weight, bias.as_deref(), *activation, out_cols)
            }
            (NodeUpdateFn::Linear { .. }, None) => unreachable!("linear parameters are collected above"),
        }
    });

    Ok(rows.concat())
}

fn linear_row(
    h: &[f64],
    weight: &[f64],
    bias: Option<&[f64]>,
    activation: Option<Activation>,
    out_cols: usize,
) -> Vec<f64> {
    let mut out = bias.map_or_else(|| vec![0.; out_cols], <[f64]>::to_vec);

    for (x, w_row) in h.iter().zip(weight.chunks_exact(out_cols)) {
        out.iter_mut().zip(w_row).for_each(|(o, w)| *o += x * w);
    }

    if let Some(activation) = activation {
        out.iter_mut().for_each(|o| *o = activation.apply(*o));
    }

    out
}
