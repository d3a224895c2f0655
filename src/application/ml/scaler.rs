use crate::domain::errors::{MlError, MlResult};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Fitted per-column standardization parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerParams {
    pub mean: Array1<f64>,
    pub scale: Array1<f64>,
}

/// Zero-mean, unit-variance feature scaling fitted on training rows only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    params: Option<ScalerParams>,
}

impl StandardScaler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_fitted(&self) -> bool {
        self.params.is_some()
    }

    pub fn params(&self) -> Option<&ScalerParams> {
        self.params.as_ref()
    }

    pub fn n_features(&self) -> Option<usize> {
        self.params.as_ref().map(|p| p.mean.len())
    }

    /// Fitted parameters must have matching widths and finite, positive scales.
    pub(crate) fn validate(&self) -> Result<(), String> {
        let params = self.params.as_ref().ok_or("scaler is not fitted")?;
        if params.mean.len() != params.scale.len() {
            return Err(format!(
                "scaler has {} means and {} scales",
                params.mean.len(),
                params.scale.len()
            ));
        }
        if params.mean.iter().any(|m| !m.is_finite()) {
            return Err("scaler mean is not finite".to_string());
        }
        if params.scale.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
            return Err("scaler scale must be finite and positive".to_string());
        }
        Ok(())
    }

    /// Computes column means and population standard deviations.
    /// Constant columns get a scale of 1 so they map to 0.
    pub fn fit(&mut self, x: &Array2<f64>) -> MlResult<()> {
        let mean = x
            .mean_axis(Axis(0))
            .ok_or(MlError::InsufficientData {
                rows: 0,
                required: 1,
            })?;
        let scale = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > f64::EPSILON { s } else { 1.0 });

        self.params = Some(ScalerParams { mean, scale });
        Ok(())
    }

    pub fn transform(&self, x: &Array2<f64>) -> MlResult<Array2<f64>> {
        let params = self.params.as_ref().ok_or(MlError::NotFitted)?;
        if x.ncols() != params.mean.len() {
            return Err(MlError::shape(format!(
                "scaler fitted on {} features, got {}",
                params.mean.len(),
                x.ncols()
            )));
        }
        Ok((x - &params.mean) / &params.scale)
    }

    pub fn fit_transform(&mut self, x: &Array2<f64>) -> MlResult<Array2<f64>> {
        self.fit(x)?;
        self.transform(x)
    }
}
