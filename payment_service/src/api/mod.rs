pub mod callback_routes;
pub mod dto;
pub mod error;
pub mod grpc_service;
pub mod http_routes;
pub mod response;

pub mod proto {
    pub mod payment {
        tonic::include_proto!("payment");
    }
}
