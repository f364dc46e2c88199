//! Descriptor assembly for Ceph manager daemons
//!
//! Given the desired state of a Ceph cluster, this crate produces the
//! Kubernetes objects that run its managers: one single replica
//! [`Deployment`](k8s_openapi::api::apps::v1::Deployment) per manager, the
//! services in front of the active one, and the parameters of the shipped
//! Prometheus alert rules.
//!
//! Everything here is a pure function of its inputs. Creating, updating and
//! watching the produced objects is left to the caller.
//!
//! ```no_run
//! use rook_mgr::{ClusterInfo, ClusterSpec, MgrAssembler};
//!
//! # fn doc(spec: ClusterSpec, info: ClusterInfo) -> rook_mgr::Result<()> {
//! let assembler = MgrAssembler::new(&spec, &info);
//! for deployment in assembler.deployments()? {
//!     println!("{}", serde_yaml::to_string(&deployment).unwrap());
//! }
//! # Ok(())
//! # }
//! ```
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(unsafe_code)]

pub mod alerts;
pub use alerts::{parameterize_alert_rules, AlertRuleOverride, AlertRuleSet};

mod assembler;
pub use assembler::{index_to_name, MgrAssembler};

pub mod cluster;
pub use cluster::{ClusterInfo, ClusterSpec};

pub mod config;
pub use config::MgrConfig;

pub mod container;

mod deployment;

pub mod labels;

pub mod network;

pub mod placement;

pub mod pod;

mod resource;
pub use resource::{OwnerInfo, Resource, ResourceExt};

mod service;
pub use service::SERVICE_METRICS_PORT_NAME;

mod error;
pub use error::Error;

/// Convenient alias for `Result<T, Error>`
pub type Result<T, E = Error> = std::result::Result<T, E>;
