// Domain layer: dataset records and the ports (interfaces) pipelines are written against.

pub mod model;
pub mod ports;
