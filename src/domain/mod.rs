// Domain layer: pipeline state and ports (interfaces).

pub mod model;
pub mod ports;
