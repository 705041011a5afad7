pub mod gateways;
pub mod persistence;
pub mod resilience;
pub mod secrets;
