// Domain layer: core models, the tree layout and ports (interfaces).

pub mod layout;
pub mod model;
pub mod ports;
