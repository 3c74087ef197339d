//! ingress-operator: connects host cluster ingress controllers with guest
//! cluster workloads on a multi-tenant Kubernetes host cluster.

pub mod bootstrap;
pub mod client;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod finalizer;
pub mod health;
pub mod key;
pub mod metrics;
pub mod reconciler;
pub mod resource;

pub use config::OperatorConfig;
pub use crd::IngressConfig;
