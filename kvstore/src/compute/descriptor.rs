//! The vocabulary of full-graph updates.
//!
//! A `GraphUpdate` is plain data: it names the entries it reads and writes and
//! picks from a closed set of message, reduce and update functions, so it can
//! be shipped as JSON and checked before it runs.

use graph::Direction;
use serde::{Deserialize, Serialize};

use crate::storage::{Result, StoreErr, Tensor};

/// Computes the message a neighbor sends, from the neighbor's own rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageFn {
    /// The neighbor's row of `field`.
    CopySrc { field: String },
    /// The neighbor's row of `field` times `factor`.
    ScaleSrc { field: String, factor: f64 },
    /// The neighbor's row of `field` minus its row of `other`.
    SubSrc { field: String, other: String },
}

impl MessageFn {
    /// The entry every message reads from.
    pub fn field(&self) -> &str {
        match self {
            Self::CopySrc { field } | Self::ScaleSrc { field, .. } | Self::SubSrc { field, .. } => {
                field
            }
        }
    }

    /// The second entry read by `SubSrc`.
    pub fn other(&self) -> Option<&str> {
        match self {
            Self::SubSrc { other, .. } => Some(other),
            _ => None,
        }
    }

    /// Writes the message of a neighbor into `out`.
    ///
    /// # Arguments
    /// * `src` - The neighbor's row of `field`.
    /// * `other` - The neighbor's row of `other`, only used by `SubSrc`.
    /// * `out` - The message buffer, as long as `src`.
    pub(crate) fn apply(&self, src: &[f64], other: Option<&[f64]>, out: &mut [f64]) {
        match (self, other) {
            (Self::CopySrc { .. }, _) => out.copy_from_slice(src),
            (Self::ScaleSrc { factor, .. }, _) => {
                out.iter_mut().zip(src).for_each(|(o, s)| *o = s * factor);
            }
            (Self::SubSrc { .. }, Some(other)) => {
                out.iter_mut()
                    .zip(src.iter().zip(other))
                    .for_each(|(o, (s, t))| *o = s - t);
            }
            (Self::SubSrc { .. }, None) => out.copy_from_slice(src),
        }
    }
}

/// Combines the messages a node received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReduceFn {
    Sum,
    Mean,
    Max,
    Min,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Relu,
    Sigmoid,
    Tanh,
}

impl Activation {
    pub fn apply(self, x: f64) -> f64 {
        match self {
            Self::Relu => x.max(0.),
            Self::Sigmoid => 1. / (1. + (-x).exp()),
            Self::Tanh => x.tanh(),
        }
    }
}

/// A named parameter tensor of a descriptor.
///
/// When `value` is set the tensor travels inline and is stored under `name`
/// before the update runs, otherwise it is read from the entry `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Tensor>,
}

impl Param {
    /// A parameter that refers to an existing entry.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    /// A parameter carrying its own value.
    pub fn inline(name: impl Into<String>, value: Tensor) -> Self {
        Self {
            name: name.into(),
            value: Some(value),
        }
    }
}

/// Transforms a node's reduced messages into its new row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeUpdateFn {
    Identity,
    Scale {
        factor: f64,
    },
    /// Multiplies by `1 / max(degree, 1)`, degree in the update's direction.
    DegreeNorm,
    /// `activation(h * weight + bias)` with `weight` shaped `(in, out)` and
    /// `bias` holding `out` values.
    Linear {
        weight: Param,
        #[serde(default)]
        bias: Option<Param>,
        #[serde(default)]
        activation: Option<Activation>,
    },
}

/// One full-graph message passing step.
///
/// Every node gathers `message` from its neighbors in `direction`, combines
/// them with `reduce`, transforms the result with `update` and the outcome
/// overwrites the node's row of `out`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphUpdate {
    pub message: MessageFn,
    pub reduce: ReduceFn,
    pub update: NodeUpdateFn,
    #[serde(default)]
    pub direction: Direction,
    pub out: String,
}

impl GraphUpdate {
    /// The parameters of the update, in a stable order.
    pub fn params(&self) -> Vec<&Param> {
        match &self.update {
            NodeUpdateFn::Linear { weight, bias, .. } => {
                std::iter::once(weight).chain(bias.as_ref()).collect()
            }
            _ => Vec::new(),
        }
    }

    pub(crate) fn params_mut(&mut self) -> Vec<&mut Param> {
        match &mut self.update {
            NodeUpdateFn::Linear { weight, bias, .. } => {
                std::iter::once(weight).chain(bias.as_mut()).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Takes every inline parameter value out of the descriptor.
    ///
    /// # Returns
    /// The `(name, value)` pairs that have to be stored before the update runs.
    pub fn detach(&mut self) -> Vec<(String, Tensor)> {
        self.params_mut()
            .into_iter()
            .filter_map(|param| Some((param.name.clone(), param.value.take()?)))
            .collect()
    }

    /// Whether no parameter carries an inline value.
    pub fn is_detached(&self) -> bool {
        self.params().iter().all(|param| param.value.is_none())
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| StoreErr::MalformedDescriptor(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| StoreErr::MalformedDescriptor(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear() -> GraphUpdate {
        GraphUpdate {
            message: MessageFn::CopySrc {
                field: "h".into(),
            },
            reduce: ReduceFn::Mean,
            update: NodeUpdateFn::Linear {
                weight: Param::inline("w", Tensor::from_f32(2, 1, vec![1., 2.])),
                bias: Some(Param::named("b")),
                activation: Some(Activation::Relu),
            },
            direction: Direction::In,
            out: "h2".into(),
        }
    }

    #[test]
    fn test_detach_takes_inline_values_only() {
        let mut update = linear();
        assert!(!update.is_detached());

        let detached = update.detach();
        assert_eq!(detached.len(), 1);
        assert_eq!(detached[0].0, "w");
        assert!(update.is_detached());

        let names: Vec<_> = update.params().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["w", "b"]);
    }

    #[test]
    fn test_json_shape() {
        let mut update = linear();
        update.detach();

        let json = update.to_json().unwrap();
        assert!(json.contains(r#""message":{"kind":"copy_src","field":"h"}"#));
        assert!(json.contains(r#""weight":{"name":"w"}"#));
        assert!(json.contains(r#""direction":"in""#));
        assert_eq!(GraphUpdate::from_json(&json).unwrap(), update);
    }

    #[test]
    fn test_direction_defaults_to_in() {
        let json = r#"{
            "message": {"kind": "scale_src", "field": "x", "factor": 0.5},
            "reduce": "max",
            "update": {"kind": "degree_norm"},
            "out": "y"
        }"#;

        let update = GraphUpdate::from_json(json).unwrap();
        assert_eq!(update.direction, Direction::In);
        assert_eq!(update.update, NodeUpdateFn::DegreeNorm);
    }

    #[test]
    fn test_garbage_is_malformed() {
        let err = GraphUpdate::from_json(r#"{"message": 3}"#).unwrap_err();
        assert!(matches!(err, StoreErr::MalformedDescriptor(_)));
    }

    #[test]
    fn test_messages() {
        let mut out = [0.; 2];

        MessageFn::ScaleSrc {
            field: "x".into(),
            factor: 2.,
        }
        .apply(&[1., 3.], None, &mut out);
        assert_eq!(out, [2., 6.]);

        MessageFn::SubSrc {
            field: "x".into(),
            other: "y".into(),
        }
        .apply(&[1., 3.], Some(&[0.5, 4.]), &mut out);
        assert_eq!(out, [0.5, -1.]);
    }
}
