use std::path::Path;

use ndarray::Array4;
use ort::value::Tensor;
use tracing::{span, trace, Level};

use super::model::{first_input_name, first_output_name, initialize_model, Session};
use crate::error::{Error, Result};

pub trait AgeClassifier: Send {
    /// Probability that the face in `input` (1 x side x side x 3, values in
    /// [0, 1]) belongs to an adult.
    fn predict(&mut self, input: &Array4<f32>) -> Result<f32>;
}

pub struct OnnxAgeClassifier {
    model: Session,
    input_name: String,
    output_name: String,
}

impl OnnxAgeClassifier {
    pub fn new(path: &Path, threads: usize) -> Result<OnnxAgeClassifier> {
        let model = initialize_model(path, threads)?;
        Ok(OnnxAgeClassifier {
            input_name: first_input_name(&model)?,
            output_name: first_output_name(&model)?,
            model,
        })
    }
}

impl AgeClassifier for OnnxAgeClassifier {
    fn predict(&mut self, input: &Array4<f32>) -> Result<f32> {
        let span = span!(Level::DEBUG, "age_classifier");
        let _guard = span.enter();

        let tensor = Tensor::from_array(input.clone()).map_err(Error::model)?;
        let outputs = self
            .model
            .run(ort::inputs![self.input_name.as_str() => tensor].map_err(Error::model)?)
            .map_err(Error::model)?;
        let output = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(Error::model)?;

        let values: Vec<f32> = output.iter().copied().collect();
        trace!("Raw age output {values:?}");

        adult_probability(&values)
    }
}

/// Accepts either a single sigmoid output or a `[child, adult]` softmax pair.
pub(crate) fn adult_probability(values: &[f32]) -> Result<f32> {
    let p = match values {
        [p] => *p,
        [_, adult] => *adult,
        _ => {
            return Err(Error::ModelInvocation(format!(
                "expected 1 or 2 age outputs, got {}",
                values.len()
            )));
        }
    };

    if !p.is_finite() {
        return Err(Error::ModelInvocation(format!("age output is not a number: {p}")));
    }

    Ok(p.clamp(0., 1.))
}
