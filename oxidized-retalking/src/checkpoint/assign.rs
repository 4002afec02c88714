use std::collections::BTreeSet;
use std::sync::PoisonError;

use candle_core::Shape;
use serde::{Deserialize, Serialize};
use snafu::{ensure, ResultExt, Snafu};

use crate::checkpoint::raw::StateDict;
use crate::model::StateDictModel;

/// How checkpoint parameters are matched against model parameters.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentMode {
    /// Checkpoint and model must have exactly the same parameters.
    Strict,

    /// Only parameters present in both the checkpoint and the model are
    /// assigned, other parameters are ignored.
    ///
    /// This allows loading the checkpoint of a network into a larger
    /// model that wraps it.
    #[default]
    Partial,
}

/// Parameter assignment errors.
#[derive(Debug, Snafu)]
pub enum AssignError {
    #[snafu(display("Cannot copy checkpoint tensor to parameter: {name}"))]
    CopyParameter {
        source: candle_core::Error,
        name: String,
    },

    #[snafu(display("Model parameters missing from checkpoint: {}", names.join(", ")))]
    MissingParameters { names: Vec<String> },

    #[snafu(display(
        "Shape mismatch for {name}, expected: {expected:?}, got: {got:?}"
    ))]
    ShapeMismatch {
        name: String,
        expected: Shape,
        got: Shape,
    },

    #[snafu(display("Checkpoint parameters not in model: {}", names.join(", ")))]
    UnexpectedParameters { names: Vec<String> },
}

/// Summary of a parameter assignment.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AssignReport {
    assigned: Vec<String>,
    missing: Vec<String>,
    unexpected: Vec<String>,
}

impl AssignReport {
    /// Parameters that were assigned from the checkpoint.
    pub fn assigned(&self) -> &[String] {
        &self.assigned
    }

    /// Model parameters that were not in the checkpoint.
    pub fn missing(&self) -> &[String] {
        &self.missing
    }

    /// Checkpoint parameters that are not in the model.
    pub fn unexpected(&self) -> &[String] {
        &self.unexpected
    }
}

/// Assign checkpoint parameters to a model.
///
/// Tensors are converted to the device and data type of the parameter
/// they are assigned to. The shapes of all matching parameters are
/// verified before any parameter is modified.
///
/// * `model` - The model to assign parameters to.
/// * `state_dict` - Checkpoint parameters with model parameter names.
/// * `mode` - Whether non-matching parameters are an error.
pub fn assign<M>(
    model: &M,
    state_dict: &StateDict,
    mode: AssignmentMode,
) -> Result<AssignReport, AssignError>
where
    M: StateDictModel + ?Sized,
{
    let vars = model
        .var_map()
        .data()
        .lock()
        .unwrap_or_else(PoisonError::into_inner);

    let model_names = vars.keys().map(String::as_str).collect::<BTreeSet<_>>();
    let checkpoint_names = state_dict.keys().map(String::as_str).collect::<BTreeSet<_>>();

    let report = AssignReport {
        assigned: to_strings(model_names.intersection(&checkpoint_names)),
        missing: to_strings(model_names.difference(&checkpoint_names)),
        unexpected: to_strings(checkpoint_names.difference(&model_names)),
    };

    if mode == AssignmentMode::Strict {
        ensure!(
            report.missing.is_empty(),
            MissingParametersSnafu {
                names: report.missing.clone()
            }
        );
        ensure!(
            report.unexpected.is_empty(),
            UnexpectedParametersSnafu {
                names: report.unexpected.clone()
            }
        );
    }

    for name in &report.assigned {
        let (var, tensor) = (&vars[name], &state_dict[name]);
        ensure!(
            var.shape() == tensor.shape(),
            ShapeMismatchSnafu {
                name,
                expected: var.shape().clone(),
                got: tensor.shape().clone(),
            }
        );
    }

    for name in &report.assigned {
        let var = &vars[name];
        let value = state_dict[name]
            .to_device(var.device())
            .and_then(|tensor| tensor.to_dtype(var.dtype()))
            .context(CopyParameterSnafu { name })?;
        var.set(&value).context(CopyParameterSnafu { name })?;
    }

    Ok(report)
}

fn to_strings<'a, 'b: 'a>(names: impl Iterator<Item = &'a &'b str>) -> Vec<String> {
    names.map(|name| name.to_string()).collect()
}
