use dotenvy::dotenv;
use payment_service::{
    api::{
        callback_routes::{self, CallbackState},
        grpc_service::PaymentGrpcService,
        http_routes::{routes, AppState},
        proto::payment::payment_service_server::PaymentServiceServer,
    },
    config::AppConfig,
    domain::gateways::CardGateway,
    infrastructure::{
        gateways::{
            epx::{EpxConfig, EpxGateway},
            fake_gateway::FakeCardGateway,
        },
        persistence::{
            idempotency_repository::PostgresIdempotencyRepository,
            merchant_repository::PostgresMerchantRepository,
            payment_method_repository::PostgresPaymentMethodRepository,
            transaction_repository::PostgresTransactionRepository,
        },
        resilience::{circuit_breaker::CircuitBreaker, rate_limit::GatewayRateLimiter},
        secrets::EnvSecretStore,
    },
    jobs::idempotency_maintenance::IdempotencyMaintenanceJob,
    use_cases::{
        authorize::AuthorizeUseCase,
        capture::CaptureUseCase,
        get_transaction::GetTransactionUseCase,
        idempotency::{IdempotencyConfig, IdempotencyCoordinator},
        list_transactions::ListTransactionsUseCase,
        process_callback::ProcessCallbackUseCase,
        refund::RefundUseCase,
        register_payment_method::RegisterPaymentMethodUseCase,
        remove_payment_method::RemovePaymentMethodUseCase,
        sale::SaleUseCase,
        update_payment_method::UpdatePaymentMethodUseCase,
        update_transaction_metadata::UpdateTransactionMetadataUseCase,
        void_transaction::VoidTransactionUseCase,
    },
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        payment_service::api::http_routes::authorize_transaction,
        payment_service::api::http_routes::sale_transaction,
        payment_service::api::http_routes::capture_transaction,
        payment_service::api::http_routes::void_transaction,
        payment_service::api::http_routes::refund_transaction,
        payment_service::api::http_routes::get_transaction_details,
        payment_service::api::http_routes::list_transactions,
        payment_service::api::http_routes::register_payment_method,
        payment_service::api::http_routes::update_payment_method,
        payment_service::api::http_routes::remove_payment_method,
        payment_service::api::http_routes::update_transaction_metadata
    ),
    components(schemas(
        payment_service::api::http_routes::ChargeRequest,
        payment_service::api::http_routes::CaptureRequest,
        payment_service::api::http_routes::VoidRequest,
        payment_service::api::http_routes::RefundRequest,
        payment_service::api::http_routes::RegisterPaymentMethodRequest,
        payment_service::api::http_routes::UpdatePaymentMethodRequest,
        payment_service::api::http_routes::UpdateTransactionMetadataRequest,
        payment_service::api::dto::TransactionDto,
        payment_service::api::dto::PaymentMethodDto,
        payment_service::api::response::ApiResponse<serde_json::Value>
    ))
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Cargar variables de entorno
    dotenv().ok();

    // 2. Configurar Logging/Tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting Payment Service...");

    // 3. Cargar configuración y conectar a la base de datos
    let config = AppConfig::from_env()?;
    let pool = PgPoolOptions::new()
        .max_connections(config.db_pool_size)
        .connect(&config.database_url)
        .await?;

    info!("Connected to Database");

    // 4. Instanciar Dependencias (Infraestructura)
    let merchant_repo = Arc::new(PostgresMerchantRepository::new(pool.clone()));
    let payment_method_repo = Arc::new(PostgresPaymentMethodRepository::new(pool.clone()));
    let transaction_repo = Arc::new(PostgresTransactionRepository::new(pool.clone()));
    let idempotency_repo = Arc::new(PostgresIdempotencyRepository::new(pool.clone()));
    let secret_store = Arc::new(EnvSecretStore::new());

    // Singletons de resiliencia: una instancia por gateway destino,
    // compartida por todos los workers
    let breaker = Arc::new(CircuitBreaker::new(config.breaker_config()));
    let limiter = if config.rate_limit_rps > 0 {
        Some(Arc::new(GatewayRateLimiter::new(
            config.rate_limit_rps,
            config.rate_limit_rps,
        )))
    } else {
        None
    };

    let card_gateway: Arc<dyn CardGateway> = if config.use_fake_gateway {
        info!("Using FakeCardGateway (USE_FAKE_GATEWAY=true)");
        Arc::new(FakeCardGateway::new())
    } else {
        Arc::new(EpxGateway::new(
            EpxConfig {
                base_url: config.gateway_base_url.clone(),
                timeout: config.gateway_timeout,
                retry: config.retry_config(),
                response_size_cap: config.response_size_cap,
            },
            breaker.clone(),
            limiter,
        )?)
    };

    // 5. Instanciar Casos de Uso
    let idempotency = IdempotencyCoordinator::new(
        idempotency_repo.clone(),
        IdempotencyConfig {
            stale_after: config.idempotency_stale_after,
            ..Default::default()
        },
    );

    let authorize_use_case = AuthorizeUseCase::new(
        merchant_repo.clone(),
        payment_method_repo.clone(),
        transaction_repo.clone(),
        card_gateway.clone(),
        idempotency.clone(),
    );
    let sale_use_case = SaleUseCase::new(
        merchant_repo.clone(),
        payment_method_repo.clone(),
        transaction_repo.clone(),
        card_gateway.clone(),
        idempotency.clone(),
    );
    let capture_use_case = CaptureUseCase::new(
        merchant_repo.clone(),
        transaction_repo.clone(),
        card_gateway.clone(),
        idempotency.clone(),
    );
    let void_use_case = VoidTransactionUseCase::new(
        merchant_repo.clone(),
        transaction_repo.clone(),
        card_gateway.clone(),
        idempotency.clone(),
    );
    let refund_use_case = RefundUseCase::new(
        merchant_repo.clone(),
        transaction_repo.clone(),
        card_gateway.clone(),
        idempotency.clone(),
    );
    let get_transaction_use_case = GetTransactionUseCase::new(transaction_repo.clone());
    let list_transactions_use_case = ListTransactionsUseCase::new(transaction_repo.clone());
    let register_payment_method_use_case = RegisterPaymentMethodUseCase::new(
        merchant_repo.clone(),
        payment_method_repo.clone(),
        card_gateway.clone(),
    );
    let update_payment_method_use_case =
        UpdatePaymentMethodUseCase::new(payment_method_repo.clone());
    let remove_payment_method_use_case =
        RemovePaymentMethodUseCase::new(payment_method_repo.clone());
    let update_transaction_metadata_use_case =
        UpdateTransactionMetadataUseCase::new(transaction_repo.clone());
    let process_callback_use_case = ProcessCallbackUseCase::new(
        merchant_repo.clone(),
        transaction_repo.clone(),
        secret_store,
    );

    // 6. Configurar Servidor gRPC (binario + grpc-web para navegadores)
    let grpc_addr = format!("{}:{}", config.http_host, config.grpc_port).parse()?;
    let grpc_service = PaymentGrpcService::new(
        authorize_use_case.clone(),
        sale_use_case.clone(),
        capture_use_case.clone(),
        void_use_case.clone(),
        refund_use_case.clone(),
        get_transaction_use_case.clone(),
        list_transactions_use_case.clone(),
    );

    info!("gRPC Server listening on {}", grpc_addr);

    tokio::spawn(async move {
        if let Err(e) = tonic::transport::Server::builder()
            .accept_http1(true)
            .layer(tonic_web::GrpcWebLayer::new())
            .add_service(PaymentServiceServer::new(grpc_service))
            .serve(grpc_addr)
            .await
        {
            tracing::error!("gRPC server error: {}", e);
        }
    });

    // 7. Listener secundario: callback del hosted-form + endpoints de jobs
    let maintenance_job = Arc::new(IdempotencyMaintenanceJob::new(
        idempotency_repo.clone(),
        config.idempotency_retention,
        config.idempotency_stale_after,
    ));

    let callback_state = Arc::new(CallbackState {
        process_callback_use_case,
        maintenance_job: maintenance_job.clone(),
    });
    let callback_addr = format!("{}:{}", config.http_host, config.callback_port);
    let callback_app = callback_routes::routes(callback_state);

    info!("Callback listener on {}", callback_addr);

    let callback_listener = tokio::net::TcpListener::bind(&callback_addr).await?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(callback_listener, callback_app).await {
            tracing::error!("callback server error: {}", e);
        }
    });

    // 8. Iniciar Background Jobs (Procesos en Segundo Plano)
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        info!("Background Job Scheduler started");
        loop {
            interval.tick().await;
            maintenance_job.run().await;
        }
    });

    // 9. Configurar Estado de la App Axum y servir HTTP
    let app_state = Arc::new(AppState {
        authorize_use_case,
        sale_use_case,
        capture_use_case,
        void_use_case,
        refund_use_case,
        get_transaction_use_case,
        list_transactions_use_case,
        register_payment_method_use_case,
        update_payment_method_use_case,
        remove_payment_method_use_case,
        update_transaction_metadata_use_case,
        db_pool: pool,
    });

    let app = routes(app_state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    let addr = format!("{}:{}", config.http_host, config.http_port);
    info!("HTTP Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
