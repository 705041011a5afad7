pub mod authorize;
pub mod capture;
pub mod charge;
pub mod get_transaction;
pub mod idempotency;
pub mod list_transactions;
pub mod process_callback;
pub mod refund;
pub mod register_payment_method;
pub mod remove_payment_method;
pub mod sale;
pub mod update_payment_method;
pub mod update_transaction_metadata;
pub mod void_transaction;

#[cfg(test)]
pub(crate) mod test_support;
