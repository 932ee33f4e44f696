//! Feature preprocessing applied before scoring

mod scaler;

pub use scaler::{ScaleTransform, ScalerType};
