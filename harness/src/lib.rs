/*!

This library provides the building blocks of the ZITADEL chart acceptance tests: a namespace per
test, Helm and kubectl drivers, a database fixture, the chart installer, polling primitives, and
checks against rendered manifests and the resulting Kubernetes objects, HTTP and gRPC endpoints, and the login UI.

Tests connect once with [`Cluster::connect`], then create an [`Env`] per test (or use
[`with_namespace`]) which owns a fresh namespace that is deleted when the test passes and kept for
debugging when it fails.

!*/

#![deny(
    clippy::expect_used,
    clippy::get_unwrap,
    clippy::panic,
    clippy::panic_in_result_fn,
    clippy::panicking_unwrap,
    clippy::unwrap_in_result,
    clippy::unwrap_used
)]

pub use cluster::Cluster;
pub use database::{install_database, install_postgres, DatabaseChart, PostgresOptions, COCKROACH, POSTGRES};
pub use env::{with_namespace, Env, Outcome};
pub use error::{Error, Result};
pub use helm::{Helm, HelmOptions};
pub use http_status::{AllowNotFound, HttpStatusCode};
pub use kubectl::{Kubectl, KubectlOptions, Tunnel};
pub use settings::Settings;
pub use values::HelmValues;
pub use wait::{await_all, eventually, retry, Await, Budget};
pub use zitadel::{api_base_url, InstallOptions, MachineUser, ZitadelInstall};

pub mod accessibility;
pub mod assertions;
pub mod auth;
pub mod browser;
mod cluster;
mod command;
pub mod constants;
pub mod database;
pub mod docs;
mod env;
mod error;
pub mod grpc;
pub mod helm;
pub mod http;
mod http_status;
mod kubectl;
pub mod manifests;
pub mod naming;
pub mod readiness;
pub mod schema;
pub mod secrets;
mod settings;
pub mod uninstall;
mod values;
pub mod wait;
pub mod zitadel;
