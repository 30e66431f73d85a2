//! Concrete host bindings for the traits `kepler-core` consumes:
//! [`kepler_core::informer::ResourceInformer`] and
//! [`kepler_core::activity::KernelSampler`].

pub mod informer;
pub mod sampler;
