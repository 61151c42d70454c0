//! Whole-model gradient operations.
//!
//! Burn keeps gradients in a [`GradientsParams`] keyed by parameter id. These
//! helpers walk a module's float parameters with a [`ModuleVisitor`] and
//! rewrite the matching gradients in place.

use std::marker::PhantomData;

use burn::module::{AutodiffModule, ModuleVisitor, ParamId};
use burn::optim::GradientsParams;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;

use crate::error::{Result, TrainError};

use super::distributed::Collective;

/// Added to the norm before dividing.
const CLIP_EPSILON: f32 = 1e-6;

struct NormVisitor<'a, B: AutodiffBackend> {
    grads: &'a GradientsParams,
    sum_sq: f64,
    _backend: PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for NormVisitor<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.get::<B::InnerBackend, D>(id) {
            let sq: f32 = (grad.clone() * grad).sum().into_scalar().elem();
            self.sum_sq += sq as f64;
        }
    }
}

struct ScaleVisitor<'a, B: AutodiffBackend> {
    grads: &'a mut GradientsParams,
    factor: f32,
    _backend: PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for ScaleVisitor<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.remove::<B::InnerBackend, D>(id) {
            self.grads
                .register::<B::InnerBackend, D>(id, grad.mul_scalar(self.factor));
        }
    }
}

struct AllReduceVisitor<'a, B: AutodiffBackend> {
    grads: &'a mut GradientsParams,
    collective: &'a dyn Collective,
    error: Option<TrainError>,
    _backend: PhantomData<B>,
}

impl<B: AutodiffBackend> AllReduceVisitor<'_, B> {
    fn reduce<const D: usize>(&mut self, id: ParamId, tensor: &Tensor<B, D>) -> Result<()> {
        // Every worker reduces every parameter, so a gradient missing locally
        // contributes zeros instead of skipping the collective.
        let grad = match self.grads.remove::<B::InnerBackend, D>(id) {
            Some(grad) => grad,
            None => tensor.clone().inner().zeros_like(),
        };
        let dims = grad.dims();
        let device = grad.device();
        let mut values = grad
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(TrainError::tensor)?;

        self.collective.all_reduce_mean(&mut values)?;

        let reduced = Tensor::<B::InnerBackend, D>::from_data(TensorData::new(values, dims), &device);
        self.grads.register::<B::InnerBackend, D>(id, reduced);
        Ok(())
    }
}

impl<B: AutodiffBackend> ModuleVisitor<B> for AllReduceVisitor<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, tensor: &Tensor<B, D>) {
        if self.error.is_some() {
            return;
        }
        if let Err(err) = self.reduce(id, tensor) {
            self.error = Some(err);
        }
    }
}

/// Global L2 norm of all gradients of `module`.
pub fn grad_norm<B: AutodiffBackend, M: AutodiffModule<B>>(module: &M, grads: &GradientsParams) -> f32 {
    let mut visitor = NormVisitor::<B> {
        grads,
        sum_sq: 0.0,
        _backend: PhantomData,
    };
    module.visit(&mut visitor);
    visitor.sum_sq.sqrt() as f32
}

/// Multiply every gradient of `module` by `factor`.
pub fn scale_grads<B: AutodiffBackend, M: AutodiffModule<B>>(
    module: &M,
    grads: &mut GradientsParams,
    factor: f32,
) {
    let mut visitor = ScaleVisitor::<B> {
        grads,
        factor,
        _backend: PhantomData,
    };
    module.visit(&mut visitor);
}

/// Clip the global gradient norm to `max_norm`.
///
/// Returns the norm before clipping. Gradients are left untouched when the
/// norm is within bounds or not finite.
pub fn clip_grad_norm<B: AutodiffBackend, M: AutodiffModule<B>>(
    module: &M,
    grads: &mut GradientsParams,
    max_norm: f32,
) -> f32 {
    let norm = grad_norm::<B, M>(module, grads);
    if norm.is_finite() && norm > max_norm {
        scale_grads::<B, M>(module, grads, max_norm / (norm + CLIP_EPSILON));
    }
    norm
}

/// Average every gradient of `module` across the workers of `collective`.
pub fn all_reduce_grads<B: AutodiffBackend, M: AutodiffModule<B>>(
    module: &M,
    grads: &mut GradientsParams,
    collective: &dyn Collective,
) -> Result<()> {
    let mut visitor = AllReduceVisitor::<B> {
        grads,
        collective,
        error: None,
        _backend: PhantomData,
    };
    module.visit(&mut visitor);
    visitor.error.map_or(Ok(()), Err)
}
