//! Custom Resource Definitions used by the Bestie operator.
//!
//! - [`Bestie`]: the desired state the operator converges toward
//! - [`Route`]: OpenShift external exposure, managed when the API is served
//! - [`PostgresCluster`]: the application database, managed through Crunchy PGO

mod bestie;
mod postgres;
mod route;

pub use bestie::{Bestie, BestieSpec, BestieStatus, DEFAULT_IMAGE, DEFAULT_VERSION};
pub use postgres::{
    PostgresCluster, PostgresClusterSpec, PostgresClusterStatus, PostgresInstanceSet,
    PostgresInstanceSetStatus, PostgresUser,
};
pub use route::{
    ROUTE_GROUP, ROUTE_VERSION, Route, RoutePort, RouteSpec, RouteTargetReference, TlsConfig,
};
