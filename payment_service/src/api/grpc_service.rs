use rust_decimal::Decimal;
use tonic::{Request, Response, Status};
use uuid::Uuid;

use crate::api::error::to_grpc_status;
use crate::api::proto::payment::payment_service_server::PaymentService;
use crate::api::proto::payment::{
    CaptureRequest, ChargeRequest, GetTransactionRequest, ListTransactionsRequest,
    ListTransactionsReply, RefundRequest, TransactionReply, VoidRequest,
};
use crate::domain::entities::{Transaction, TransactionStatus, TransactionType};
use crate::use_cases::authorize::AuthorizeUseCase;
use crate::use_cases::capture::{CaptureCommand, CaptureUseCase};
use crate::use_cases::charge::ChargeCommand;
use crate::use_cases::get_transaction::GetTransactionUseCase;
use crate::use_cases::list_transactions::{ListTransactionsQuery, ListTransactionsUseCase};
use crate::use_cases::refund::{RefundCommand, RefundUseCase};
use crate::use_cases::sale::SaleUseCase;
use crate::use_cases::void_transaction::{VoidCommand, VoidTransactionUseCase};

// Servicio gRPC: la misma superficie de ciclo de vida que la API JSON,
// para los llamadores binarios (y, vía tonic-web, para navegadores).
pub struct PaymentGrpcService {
    authorize_use_case: AuthorizeUseCase,
    sale_use_case: SaleUseCase,
    capture_use_case: CaptureUseCase,
    void_use_case: VoidTransactionUseCase,
    refund_use_case: RefundUseCase,
    get_transaction_use_case: GetTransactionUseCase,
    list_transactions_use_case: ListTransactionsUseCase,
}

impl PaymentGrpcService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        authorize_use_case: AuthorizeUseCase,
        sale_use_case: SaleUseCase,
        capture_use_case: CaptureUseCase,
        void_use_case: VoidTransactionUseCase,
        refund_use_case: RefundUseCase,
        get_transaction_use_case: GetTransactionUseCase,
        list_transactions_use_case: ListTransactionsUseCase,
    ) -> Self {
        Self {
            authorize_use_case,
            sale_use_case,
            capture_use_case,
            void_use_case,
            refund_use_case,
            get_transaction_use_case,
            list_transactions_use_case,
        }
    }
}

fn opt(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn parse_uuid(value: &str, field: &str) -> Result<Uuid, Status> {
    Uuid::parse_str(value)
        .map_err(|_| Status::invalid_argument(format!("{} must be a UUID", field)))
}

fn parse_amount(value: &str, field: &str) -> Result<Decimal, Status> {
    Decimal::from_str_exact(value.trim())
        .map_err(|_| Status::invalid_argument(format!("{} must be a decimal string", field)))
}

fn parse_metadata(value: String) -> Result<Option<serde_json::Value>, Status> {
    match opt(value) {
        None => Ok(None),
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|_| Status::invalid_argument("metadata_json must be valid JSON")),
    }
}

fn charge_command(request: ChargeRequest) -> Result<ChargeCommand, Status> {
    let payment_method_id = match opt(request.payment_method_id) {
        Some(id) => Some(parse_uuid(&id, "payment_method_id")?),
        None => None,
    };
    Ok(ChargeCommand {
        merchant_id: parse_uuid(&request.merchant_id, "merchant_id")?,
        amount: parse_amount(&request.amount, "amount")?,
        currency: request.currency,
        payment_method_id,
        payment_token: opt(request.payment_token),
        billing_zip: opt(request.billing_zip),
        customer_id: opt(request.customer_id),
        metadata: parse_metadata(request.metadata_json)?,
        idempotency_key: request.idempotency_key,
    })
}

fn to_reply(transaction: &Transaction) -> TransactionReply {
    TransactionReply {
        id: transaction.id().to_string(),
        merchant_id: transaction.merchant_id().to_string(),
        customer_id: transaction.customer_id().unwrap_or("").to_string(),
        payment_method_id: transaction
            .payment_method_id()
            .map(|id| id.to_string())
            .unwrap_or_default(),
        parent_transaction_id: transaction
            .parent_transaction_id()
            .map(|id| id.to_string())
            .unwrap_or_default(),
        amount: transaction
            .amount()
            .to_decimal(transaction.currency())
            .to_string(),
        currency: transaction.currency().code().to_string(),
        transaction_type: format!("{:?}", transaction.transaction_type()),
        status: format!("{:?}", transaction.status()),
        is_approved: transaction.is_approved(),
        gateway_token: transaction.gateway_token().unwrap_or("").to_string(),
        auth_code: transaction.auth_code().unwrap_or("").to_string(),
        avs_result: transaction.avs_result().unwrap_or("").to_string(),
        cvv_result: transaction.cvv_result().unwrap_or("").to_string(),
        response_text: transaction.response_text().unwrap_or("").to_string(),
        idempotency_key: transaction.idempotency_key().unwrap_or("").to_string(),
        metadata_json: transaction.metadata().to_string(),
        created_at: transaction.created_at().to_rfc3339(),
    }
}

// Una fila ERROR se persistió con desenlace desconocido: el RPC la reporta
// como Unavailable llevando el id para que el cliente pueda consultarla.
fn reply_or_unavailable(transaction: Transaction) -> Result<Response<TransactionReply>, Status> {
    if transaction.status() == TransactionStatus::ERROR {
        return Err(Status::unavailable(format!(
            "gateway outcome unknown; error row recorded as {}",
            transaction.id()
        )));
    }
    Ok(Response::new(to_reply(&transaction)))
}

#[tonic::async_trait]
impl PaymentService for PaymentGrpcService {
    async fn authorize(
        &self,
        request: Request<ChargeRequest>,
    ) -> Result<Response<TransactionReply>, Status> {
        let command = charge_command(request.into_inner())?;
        let transaction = self
            .authorize_use_case
            .execute(command)
            .await
            .map_err(to_grpc_status)?;
        reply_or_unavailable(transaction)
    }

    async fn sale(
        &self,
        request: Request<ChargeRequest>,
    ) -> Result<Response<TransactionReply>, Status> {
        let command = charge_command(request.into_inner())?;
        let transaction = self
            .sale_use_case
            .execute(command)
            .await
            .map_err(to_grpc_status)?;
        reply_or_unavailable(transaction)
    }

    async fn capture(
        &self,
        request: Request<CaptureRequest>,
    ) -> Result<Response<TransactionReply>, Status> {
        let request = request.into_inner();
        let amount = match opt(request.amount) {
            Some(raw) => Some(parse_amount(&raw, "amount")?),
            None => None,
        };
        let transaction = self
            .capture_use_case
            .execute(CaptureCommand {
                merchant_id: parse_uuid(&request.merchant_id, "merchant_id")?,
                parent_transaction_id: parse_uuid(
                    &request.parent_transaction_id,
                    "parent_transaction_id",
                )?,
                amount,
                metadata: None,
                idempotency_key: request.idempotency_key,
            })
            .await
            .map_err(to_grpc_status)?;
        reply_or_unavailable(transaction)
    }

    async fn void(
        &self,
        request: Request<VoidRequest>,
    ) -> Result<Response<TransactionReply>, Status> {
        let request = request.into_inner();
        let transaction = self
            .void_use_case
            .execute(VoidCommand {
                merchant_id: parse_uuid(&request.merchant_id, "merchant_id")?,
                transaction_id: parse_uuid(&request.transaction_id, "transaction_id")?,
                metadata: None,
                idempotency_key: request.idempotency_key,
            })
            .await
            .map_err(to_grpc_status)?;
        reply_or_unavailable(transaction)
    }

    async fn refund(
        &self,
        request: Request<RefundRequest>,
    ) -> Result<Response<TransactionReply>, Status> {
        let request = request.into_inner();
        let amount = match opt(request.amount) {
            Some(raw) => Some(parse_amount(&raw, "amount")?),
            None => None,
        };
        let transaction = self
            .refund_use_case
            .execute(RefundCommand {
                merchant_id: parse_uuid(&request.merchant_id, "merchant_id")?,
                transaction_id: parse_uuid(&request.transaction_id, "transaction_id")?,
                amount,
                reason: opt(request.reason),
                metadata: None,
                idempotency_key: request.idempotency_key,
            })
            .await
            .map_err(to_grpc_status)?;
        reply_or_unavailable(transaction)
    }

    async fn get_transaction(
        &self,
        request: Request<GetTransactionRequest>,
    ) -> Result<Response<TransactionReply>, Status> {
        let request = request.into_inner();
        let transaction = self
            .get_transaction_use_case
            .execute(
                parse_uuid(&request.merchant_id, "merchant_id")?,
                parse_uuid(&request.transaction_id, "transaction_id")?,
            )
            .await
            .map_err(to_grpc_status)?;
        Ok(Response::new(to_reply(&transaction)))
    }

    async fn list_transactions(
        &self,
        request: Request<ListTransactionsRequest>,
    ) -> Result<Response<ListTransactionsReply>, Status> {
        let request = request.into_inner();

        let status = match opt(request.status) {
            None => None,
            Some(raw) => Some(match raw.to_uppercase().as_str() {
                "PENDING" => TransactionStatus::PENDING,
                "APPROVED" => TransactionStatus::APPROVED,
                "DECLINED" => TransactionStatus::DECLINED,
                "ERROR" => TransactionStatus::ERROR,
                other => {
                    return Err(Status::invalid_argument(format!(
                        "unknown status '{}'",
                        other
                    )))
                }
            }),
        };
        let transaction_type = match opt(request.transaction_type) {
            None => None,
            Some(raw) => Some(match raw.to_uppercase().as_str() {
                "AUTH" => TransactionType::AUTH,
                "CAPTURE" => TransactionType::CAPTURE,
                "SALE" => TransactionType::SALE,
                "REFUND" => TransactionType::REFUND,
                "VOID" => TransactionType::VOID,
                other => {
                    return Err(Status::invalid_argument(format!(
                        "unknown transaction type '{}'",
                        other
                    )))
                }
            }),
        };
        let group_root = match opt(request.group_root) {
            Some(raw) => Some(parse_uuid(&raw, "group_root")?),
            None => None,
        };

        let transactions = self
            .list_transactions_use_case
            .execute(
                parse_uuid(&request.merchant_id, "merchant_id")?,
                ListTransactionsQuery {
                    customer_id: opt(request.customer_id),
                    group_root,
                    status,
                    transaction_type,
                    limit: if request.limit > 0 {
                        Some(request.limit)
                    } else {
                        None
                    },
                    offset: if request.offset > 0 {
                        Some(request.offset)
                    } else {
                        None
                    },
                },
            )
            .await
            .map_err(to_grpc_status)?;

        Ok(Response::new(ListTransactionsReply {
            transactions: transactions.iter().map(to_reply).collect(),
        }))
    }
}
