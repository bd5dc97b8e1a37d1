// src/lib.rs
pub use authz::{Authorizer, AuthorizerRegistry, AuthzDecision, AuthzMode, new_authorizer};
pub use error::{AuthzError, ErrorKind};
pub use interceptor::{AuthContext, InboundCall, Interceptor};
pub use pdp::{JustInTimePdp, PolicyDecisionPoint};
pub use service::{AuthorizationService, RequestScope};

pub mod authz;
pub mod cache;
pub mod config;
pub mod error;
pub mod identifier;
pub mod interceptor;
pub mod metrics;
pub mod pdp;
pub mod resolver;
pub mod service;
pub mod store;
pub mod timers;
pub mod token;
pub mod types;
pub mod validation;
