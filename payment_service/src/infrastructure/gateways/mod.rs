pub mod epx;
pub mod fake_gateway;
