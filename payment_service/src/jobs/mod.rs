pub mod idempotency_maintenance;
