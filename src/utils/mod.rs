pub mod batch;
pub mod horizon;
pub mod normalize;
