//! Payment Service Library
//!
//! This library acts as the core of the Payment Service, exporting the necessary modules
//! for the application binary and integration tests.
//!
//! # Modules
//!
//! * `api` - Contains the API interfaces (HTTP/gRPC and the gateway callback listener).
//! * `config` - Environment-driven configuration.
//! * `domain` - Contains the domain entities, group-state computation and business rules.
//! * `infrastructure` - Contains the concrete implementations of repositories, the EPX
//!   gateway adapter and the resilience primitives.
//! * `jobs` - Background maintenance jobs.
//! * `use_cases` - Contains the application business logic and workflows.

pub mod api;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod jobs;
pub mod use_cases;
