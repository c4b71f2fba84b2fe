pub mod dataplane_port;
pub mod metrics_port;
