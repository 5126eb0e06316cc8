//! Bestie Kubernetes Operator
//!
//! This crate provides a Kubernetes operator that deploys and maintains the
//! Bestie pet adoption application: its PostgreSQL database and seed job,
//! the application Deployment, a Service, a HorizontalPodAutoscaler and an
//! OpenShift Route or an Ingress, depending on what the cluster serves.
//!
//! # Custom Resource Definitions
//!
//! - **Bestie**: one application instance, with its size and version
//!
//! # Example
//!
//! ```yaml
//! apiVersion: pets.bestie.com/v1
//! kind: Bestie
//! metadata:
//!   name: bestie
//! spec:
//!   size: 3
//!   version: "1.3"
//!   maxReplicas: 10
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod controller;
pub mod crd;
pub mod discovery;
pub mod error;
pub mod resources;
pub mod telemetry;
pub mod testing;

pub use crd::{Bestie, BestieSpec, BestieStatus};
pub use error::{OperatorError, OperatorResult};
