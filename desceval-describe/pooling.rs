//! Combining descriptors across support scales or across descriptor functions.

use std::sync::Arc;

use desceval_core::{Descriptor, Patch, PoolingStage};

use crate::descriptor::{l2_normalize, DescriptorFunction};

/// How descriptors of one keypoint are pooled before matching
#[derive(Debug, Clone, PartialEq)]
pub enum Pooling {
    None,
    /// Sum descriptors computed at `scales` times the sampler's support.
    /// A keypoint is kept only when every scale yields a patch.
    DomainSize {
        scales: Vec<f32>,
        normalization: PoolingStage,
    },
}

impl Pooling {
    pub fn name(&self) -> &'static str {
        match self {
            Pooling::None => "none",
            Pooling::DomainSize { .. } => "domain-size",
        }
    }
}

/// RootSIFT-style rooting: L1 normalization, then a signed square root.
///
/// The result has unit L2 norm unless the input is all zeros.
pub fn root_descriptor(values: &mut [f32]) {
    let l1 = values.iter().map(|v| v.abs()).sum::<f32>();
    if l1 <= f32::EPSILON {
        return;
    }
    for v in values.iter_mut() {
        let scaled = *v / l1;
        *v = scaled.signum() * scaled.abs().sqrt();
    }
}

/// Sum of per-scale descriptors with the configured normalization and rooting
pub(crate) fn pool_domain_size(
    per_scale: Vec<Descriptor>,
    normalization: PoolingStage,
    rooting: Option<PoolingStage>,
) -> Descriptor {
    let dim = per_scale.first().map_or(0, Vec::len);
    let mut sum = vec![0.0f32; dim];
    for mut d in per_scale {
        if normalization == PoolingStage::BeforePooling {
            l2_normalize(&mut d);
        }
        if rooting == Some(PoolingStage::BeforePooling) {
            root_descriptor(&mut d);
        }
        for (acc, v) in sum.iter_mut().zip(&d) {
            *acc += v;
        }
    }
    if rooting == Some(PoolingStage::AfterPooling) {
        root_descriptor(&mut sum);
    }
    l2_normalize(&mut sum);
    sum
}

/// Concatenation of two descriptor functions on the same patch, renormalized
pub struct StackedDescriptor {
    id: String,
    primary: Arc<dyn DescriptorFunction>,
    secondary: Arc<dyn DescriptorFunction>,
}

impl StackedDescriptor {
    pub fn new(primary: Arc<dyn DescriptorFunction>, secondary: Arc<dyn DescriptorFunction>) -> Self {
        Self {
            id: format!("{}+{}", primary.id(), secondary.id()),
            primary,
            secondary,
        }
    }
}

impl DescriptorFunction for StackedDescriptor {
    fn id(&self) -> &str {
        &self.id
    }

    fn dimension(&self) -> usize {
        self.primary.dimension() + self.secondary.dimension()
    }

    fn compute(&self, patch: &Patch) -> Descriptor {
        let mut out = self.primary.compute(patch);
        out.extend(self.secondary.compute(patch));
        l2_normalize(&mut out);
        out
    }
}

impl std::fmt::Debug for StackedDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackedDescriptor").field("id", &self.id).finish()
    }
}
