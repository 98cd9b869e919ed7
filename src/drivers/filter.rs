use ndarray::{Array1, Array2};

use crate::drivers::linalg;
use crate::drivers::{AnalysisError, ChannelSeries};

#[derive(Clone, Debug)]
pub struct SavitzkyGolay {
    window: usize,
    order: usize,
    /// Row `k` holds the weights that evaluate the window polynomial at
    /// window position `k`.
    weights: Array2<f64>,
}

impl SavitzkyGolay {
    pub fn new(window: usize, order: usize) -> Result<Self, AnalysisError> {
        if window % 2 == 0 {
            return Err(AnalysisError::invalid(format!(
                "smoothing window must be odd, got {window}"
            )));
        }
        if order >= window {
            return Err(AnalysisError::invalid(format!(
                "polynomial order {order} must be below window {window}"
            )));
        }
        let weights = evaluation_weights(window, order).ok_or_else(|| {
            AnalysisError::invalid(format!(
                "window {window} / order {order} gives a singular fit"
            ))
        })?;
        Ok(Self {
            window,
            order,
            weights,
        })
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn smooth(&self, data: &[f64]) -> Result<Vec<f64>, AnalysisError> {
        let n = data.len();
        if self.window > n {
            return Err(AnalysisError::invalid(format!(
                "smoothing window {} exceeds series length {n}",
                self.window
            )));
        }
        let half = self.window / 2;
        let centre = self.weights.row(half);
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            let value = if i < half {
                dot(self.weights.row(i), &data[..self.window])
            } else if i + half >= n {
                let start = n - self.window;
                dot(self.weights.row(i - start), &data[start..])
            } else {
                dot(centre, &data[i - half..=i + half])
            };
            out.push(value);
        }
        Ok(out)
    }

    /// Smoothed copy of `series`; the input is left untouched.
    pub fn smooth_series(&self, series: &ChannelSeries) -> Result<ChannelSeries, AnalysisError> {
        series.with_values(self.smooth(series.values())?)
    }
}

fn dot(weights: ndarray::ArrayView1<'_, f64>, data: &[f64]) -> f64 {
    weights.iter().zip(data).map(|(w, x)| w * x).sum()
}

/// `E = V (VᵀV)⁻¹ Vᵀ` for the Vandermonde matrix `V` of the window
/// positions, scaled to [-1, 1] to keep the normal matrix conditioned.
fn evaluation_weights(window: usize, order: usize) -> Option<Array2<f64>> {
    let half = (window / 2).max(1) as f64;
    let positions = Array1::from_iter((0..window).map(|k| (k as f64 - (window / 2) as f64) / half));
    let cols = order + 1;
    let vander = Array2::from_shape_fn((window, cols), |(r, c)| positions[r].powi(c as i32));
    let normal = vander.t().dot(&vander);
    let inv = linalg::invert(&normal)?;
    Some(vander.dot(&inv).dot(&vander.t()))
}
