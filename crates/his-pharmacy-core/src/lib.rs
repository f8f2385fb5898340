//! HIS Pharmacy Core Library
//!
//! Pharmacy inventory, dispensing and billing reconciliation for a hospital information
//! system, on a single SQLite database.
//!
//! # Architecture
//!
//! ```text
//!  Goods receipt ──► Inventory Ledger ◄── adjustments / returns / write-offs / recalls
//!                          │  (batches + append-only stock transactions)
//!                          ▼
//!  Prescription ──► Dispensing Engine ── FEFO batch choice, atomic deduction
//!                          │
//!                          ▼
//!  Lab / Radiology / OT / Admissions / Visits ──► Billing Aggregator ──► Bills
//!                                                  (pending charges)      (items, payments)
//! ```
//!
//! # Core Principle
//!
//! **Stock and money never drift.** Every stock movement is a ledger entry, every dispense
//! is all-or-nothing, and every clinical service is billed at most once.
//!
//! # Modules
//!
//! - [`db`]: SQLite database layer
//! - [`models`]: Domain types (Medicine, MedicineBatch, Prescription, Bill, etc.)
//! - [`inventory`]: Inventory ledger
//! - [`dispense`]: Dispensing engine
//! - [`billing`]: Pending charge discovery and bill maintenance
//! - [`export`]: Statement and pending-charge export
//! - [`config`]: Runtime configuration
//! - [`error`]: Caller-facing error taxonomy

pub mod billing;
pub mod config;
pub mod db;
pub mod dispense;
pub mod error;
pub mod export;
pub mod inventory;
pub mod models;

// Re-export commonly used types
pub use billing::{BillManager, BillingAggregator};
pub use config::CoreConfig;
pub use db::Database;
pub use dispense::Dispenser;
pub use error::{CoreError, CoreResult};
pub use export::{BillStatement, PendingChargesExport, StatementExporter};
pub use inventory::InventoryLedger;
pub use models::{
    Bill, BillItem, BillStatus, DispenseRecord, DispenseRequest, Medicine, MedicineBatch,
    PatientPending, PendingItem, Prescription, PrescriptionStatus, ServiceRef, ServiceType,
    StockTransaction, TransactionType,
};

// UniFFI setup - using proc macros
uniffi::setup_scaffolding!();

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;

// =========================================================================
// FFI Error Type
// =========================================================================

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum HisError {
    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("No eligible batch: {0}")]
    NoEligibleBatch(String),

    #[error("Ineligible batch: {0}")]
    IneligibleBatch(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Over-dispense: {0}")]
    OverDispense(String),

    #[error("Duplicate bill item: {0}")]
    DuplicateBillItem(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<CoreError> for HisError {
    fn from(e: CoreError) -> Self {
        let message = e.to_string();
        match e {
            CoreError::InsufficientStock { .. } => HisError::InsufficientStock(message),
            CoreError::NoEligibleBatch { .. } => HisError::NoEligibleBatch(message),
            CoreError::IneligibleBatch { .. } => HisError::IneligibleBatch(message),
            CoreError::InvalidState(_) => HisError::InvalidState(message),
            CoreError::OverDispense { .. } => HisError::OverDispense(message),
            CoreError::DuplicateBillItem { .. } => HisError::DuplicateBillItem(message),
            CoreError::NotFound(_) => HisError::NotFound(message),
            CoreError::Unauthorized(_) => HisError::Unauthorized(message),
            CoreError::InvalidInput(_) => HisError::InvalidInput(message),
            CoreError::Database(_) => HisError::DatabaseError(message),
        }
    }
}

impl From<db::DbError> for HisError {
    fn from(e: db::DbError) -> Self {
        HisError::DatabaseError(e.to_string())
    }
}

impl From<serde_json::Error> for HisError {
    fn from(e: serde_json::Error) -> Self {
        HisError::SerializationError(e.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for HisError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        HisError::DatabaseError(format!("Lock poisoned: {}", e))
    }
}

fn parse_decimal(field: &str, value: &str) -> Result<Decimal, HisError> {
    Decimal::from_str(value.trim())
        .map_err(|e| HisError::InvalidInput(format!("{} '{}': {}", field, value, e)))
}

fn parse_date(field: &str, value: &str) -> Result<NaiveDate, HisError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|e| HisError::InvalidInput(format!("{} '{}': {}", field, value, e)))
}

fn parse_as_of(as_of: Option<String>) -> Result<NaiveDate, HisError> {
    match as_of {
        Some(date) => parse_date("as_of", &date),
        None => Ok(Utc::now().date_naive()),
    }
}

// =========================================================================
// Factory Functions (exported to FFI)
// =========================================================================

/// Open or create a database at the given path.
#[uniffi::export]
pub fn open_database(path: String) -> Result<Arc<HisPharmacyCore>, HisError> {
    let db = Database::open(&path)?;
    Ok(HisPharmacyCore::wrap(db))
}

/// Open or create a database with a JSON configuration document.
#[uniffi::export]
pub fn open_database_with_config(
    path: String,
    config_json: String,
) -> Result<Arc<HisPharmacyCore>, HisError> {
    let config = CoreConfig::from_json_str(&config_json)?;
    let db = Database::open_with_config(&path, config)?;
    Ok(HisPharmacyCore::wrap(db))
}

/// Create an in-memory database (for testing).
#[uniffi::export]
pub fn open_database_in_memory() -> Result<Arc<HisPharmacyCore>, HisError> {
    let db = Database::open_in_memory()?;
    Ok(HisPharmacyCore::wrap(db))
}

// =========================================================================
// Main API Object
// =========================================================================

/// Thread-safe database wrapper for FFI.
#[derive(uniffi::Object)]
pub struct HisPharmacyCore {
    db: Arc<Mutex<Database>>,
}

impl HisPharmacyCore {
    fn wrap(db: Database) -> Arc<Self> {
        Arc::new(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }
}

#[uniffi::export]
impl HisPharmacyCore {
    // =========================================================================
    // Collaborator Records
    // =========================================================================

    /// Register a patient, returning its id.
    pub fn register_patient(&self, name: String) -> Result<i64, HisError> {
        let db = self.db.lock()?;
        Ok(db.insert_patient(&name)?.patient_id)
    }

    /// Register a staff member. `fee` is the consultation fee of a doctor.
    pub fn register_staff(
        &self,
        name: String,
        role: String,
        fee: Option<String>,
    ) -> Result<i64, HisError> {
        let role = models::StaffRole::parse(&role)
            .ok_or_else(|| HisError::InvalidInput(format!("unknown staff role '{}'", role)))?;
        let fee = fee.map(|f| parse_decimal("fee", &f)).transpose()?;
        let db = self.db.lock()?;
        Ok(db.insert_staff(&name, role, fee)?.staff_id)
    }

    /// Open a visit, returning its id.
    pub fn open_visit(
        &self,
        patient_id: i64,
        doctor_id: Option<i64>,
        visit_date: String,
    ) -> Result<i64, HisError> {
        let visit_date = parse_date("visit_date", &visit_date)?;
        let db = self.db.lock()?;
        Ok(db.insert_visit(patient_id, doctor_id, visit_date)?.visit_id)
    }

    // =========================================================================
    // Inventory Operations
    // =========================================================================

    /// Register a medicine.
    pub fn create_medicine(&self, medicine: FfiNewMedicine) -> Result<FfiMedicine, HisError> {
        let db = self.db.lock()?;
        let created = InventoryLedger::new(&db).create_medicine(&medicine.into())?;
        Ok(created.into())
    }

    /// Receive a batch into stock.
    pub fn receive_stock(&self, receipt: FfiStockReceipt) -> Result<FfiBatch, HisError> {
        let receipt = models::StockReceipt {
            medicine_id: receipt.medicine_id,
            batch_number: receipt.batch_number,
            expiry_date: parse_date("expiry_date", &receipt.expiry_date)?,
            received_qty: receipt.received_qty,
            purchase_price: parse_decimal("purchase_price", &receipt.purchase_price)?,
            unit_price: parse_decimal("unit_price", &receipt.unit_price)?,
            received_by: receipt.received_by,
            reference: receipt.reference,
        };
        let db = self.db.lock()?;
        let batch = InventoryLedger::new(&db).receive(&receipt)?;
        Ok(batch.into())
    }

    /// Move stock on a batch. `transaction_type` is one of PURCHASE, DISPENSE, RETURN,
    /// ADJUSTMENT or EXPIRED.
    pub fn adjust_stock(
        &self,
        batch_id: i64,
        delta: i64,
        transaction_type: String,
        actor_id: i64,
        reference: Option<String>,
        notes: Option<String>,
    ) -> Result<FfiStockTransaction, HisError> {
        let transaction_type = TransactionType::parse(&transaction_type).ok_or_else(|| {
            HisError::InvalidInput(format!("unknown transaction type '{}'", transaction_type))
        })?;
        let db = self.db.lock()?;
        let transaction = InventoryLedger::new(&db).adjust(&models::StockAdjustment {
            batch_id,
            delta,
            transaction_type,
            actor_id,
            reference,
            notes,
        })?;
        Ok(transaction.into())
    }

    /// Recall a batch.
    pub fn recall_batch(&self, batch_id: i64, reason: String) -> Result<FfiBatch, HisError> {
        let db = self.db.lock()?;
        let batch = InventoryLedger::new(&db).recall_batch(batch_id, &reason)?;
        Ok(batch.into())
    }

    /// Medicines below their reorder level.
    pub fn low_stock(&self) -> Result<Vec<FfiMedicineStock>, HisError> {
        let db = self.db.lock()?;
        let low = InventoryLedger::new(&db).low_stock()?;
        Ok(low.into_iter().map(|m| m.into()).collect())
    }

    /// Inventory statistics as of a date (`YYYY-MM-DD`, defaults to today).
    pub fn inventory_stats(&self, as_of: Option<String>) -> Result<FfiInventoryStats, HisError> {
        let as_of = parse_as_of(as_of)?;
        let db = self.db.lock()?;
        let stats = InventoryLedger::new(&db).inventory_stats(as_of)?;
        Ok(stats.into())
    }

    // =========================================================================
    // Dispensing Operations
    // =========================================================================

    /// Write a prescription.
    pub fn create_prescription(
        &self,
        visit_id: i64,
        medicine_id: i64,
        dosage_per_day: i64,
        duration: i64,
    ) -> Result<FfiPrescription, HisError> {
        let db = self.db.lock()?;
        let prescription = Dispenser::new(&db).create_prescription(&models::NewPrescription {
            visit_id,
            medicine_id,
            dosage_per_day,
            duration,
        })?;
        Ok(prescription.into())
    }

    /// Dispense against a prescription.
    pub fn dispense(&self, request: FfiDispenseRequest) -> Result<FfiDispenseRecord, HisError> {
        let db = self.db.lock()?;
        let record = Dispenser::new(&db).dispense(&DispenseRequest {
            prescription_id: request.prescription_id,
            quantity: request.quantity,
            batch_id: request.batch_id,
            actor_id: request.actor_id,
            notes: request.notes,
        })?;
        Ok(record.into())
    }

    // =========================================================================
    // Billing Operations
    // =========================================================================

    /// Unbilled charges per patient as JSON.
    pub fn pending_items_json(&self, patient_id: Option<i64>) -> Result<String, HisError> {
        let db = self.db.lock()?;
        let pending = BillingAggregator::new(&db).pending_items(patient_id)?;
        Ok(serde_json::to_string_pretty(&pending)?)
    }

    /// Open the bill of a visit.
    pub fn create_bill(&self, visit_id: i64) -> Result<FfiBill, HisError> {
        let db = self.db.lock()?;
        let bill = BillManager::new(&db).create_bill(visit_id)?;
        Ok(bill.into())
    }

    /// Charge a service on a bill.
    pub fn add_bill_item(
        &self,
        bill_id: i64,
        service_type: String,
        service_ref_id: i64,
        amount: String,
    ) -> Result<FfiBillItem, HisError> {
        let service_type = ServiceType::parse(&service_type).ok_or_else(|| {
            HisError::InvalidInput(format!("unknown service type '{}'", service_type))
        })?;
        let amount = parse_decimal("amount", &amount)?;
        let db = self.db.lock()?;
        let item = BillManager::new(&db).add_bill_item(
            bill_id,
            ServiceRef::new(service_type, service_ref_id),
            amount,
        )?;
        Ok(item.into())
    }

    /// Remove a bill item and return the updated bill.
    pub fn delete_bill_item(&self, bill_item_id: i64) -> Result<FfiBill, HisError> {
        let db = self.db.lock()?;
        let bill = BillManager::new(&db).delete_bill_item(bill_item_id)?;
        Ok(bill.into())
    }

    /// Issue a draft bill for payment.
    pub fn finalize_bill(&self, bill_id: i64) -> Result<FfiBill, HisError> {
        let db = self.db.lock()?;
        let bill = BillManager::new(&db).finalize_bill(bill_id)?;
        Ok(bill.into())
    }

    /// Record a payment.
    pub fn record_payment(&self, bill_id: i64, amount: String) -> Result<FfiBill, HisError> {
        let amount = parse_decimal("amount", &amount)?;
        let db = self.db.lock()?;
        let bill = BillManager::new(&db).record_payment(bill_id, amount)?;
        Ok(bill.into())
    }

    // =========================================================================
    // Export Operations
    // =========================================================================

    /// Export a bill statement as JSON.
    pub fn export_statement_json(&self, bill_id: i64) -> Result<String, HisError> {
        let db = self.db.lock()?;
        let statement = StatementExporter::new(&db).statement(bill_id)?;
        Ok(statement.to_json()?)
    }

    /// Export a bill statement as CSV.
    pub fn export_statement_csv(&self, bill_id: i64) -> Result<String, HisError> {
        let db = self.db.lock()?;
        let statement = StatementExporter::new(&db).statement(bill_id)?;
        Ok(statement.to_csv())
    }

    /// Export pending charges as CSV.
    pub fn export_pending_csv(&self, patient_id: Option<i64>) -> Result<String, HisError> {
        let db = self.db.lock()?;
        let export = StatementExporter::new(&db).pending_charges(patient_id)?;
        Ok(export.to_csv())
    }
}

// =========================================================================
// FFI Types
// =========================================================================

/// FFI-safe new medicine.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiNewMedicine {
    pub name: String,
    pub generic_name: Option<String>,
    pub category: Option<String>,
    pub manufacturer: Option<String>,
    pub reorder_level: i64,
}

impl From<FfiNewMedicine> for models::NewMedicine {
    fn from(medicine: FfiNewMedicine) -> Self {
        models::NewMedicine {
            name: medicine.name,
            generic_name: medicine.generic_name,
            category: medicine.category,
            manufacturer: medicine.manufacturer,
            reorder_level: medicine.reorder_level,
        }
    }
}

/// FFI-safe medicine.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiMedicine {
    pub medicine_id: i64,
    pub name: String,
    pub generic_name: Option<String>,
    pub category: Option<String>,
    pub manufacturer: Option<String>,
    pub reorder_level: i64,
}

impl From<Medicine> for FfiMedicine {
    fn from(medicine: Medicine) -> Self {
        Self {
            medicine_id: medicine.medicine_id,
            name: medicine.name,
            generic_name: medicine.generic_name,
            category: medicine.category,
            manufacturer: medicine.manufacturer,
            reorder_level: medicine.reorder_level,
        }
    }
}

/// FFI-safe stock receipt. Dates are `YYYY-MM-DD`, prices decimal strings.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiStockReceipt {
    pub medicine_id: i64,
    pub batch_number: String,
    pub expiry_date: String,
    pub received_qty: i64,
    pub purchase_price: String,
    pub unit_price: String,
    pub received_by: i64,
    pub reference: Option<String>,
}

/// FFI-safe batch.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiBatch {
    pub batch_id: i64,
    pub medicine_id: i64,
    pub batch_number: String,
    pub expiry_date: String,
    pub stock_qty: i64,
    pub received_qty: i64,
    pub unit_price: String,
    pub is_recalled: bool,
}

impl From<MedicineBatch> for FfiBatch {
    fn from(batch: MedicineBatch) -> Self {
        Self {
            batch_id: batch.batch_id,
            medicine_id: batch.medicine_id,
            batch_number: batch.batch_number,
            expiry_date: batch.expiry_date.to_string(),
            stock_qty: batch.stock_qty,
            received_qty: batch.received_qty,
            unit_price: batch.unit_price.to_string(),
            is_recalled: batch.is_recalled,
        }
    }
}

/// FFI-safe stock transaction.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiStockTransaction {
    pub transaction_id: i64,
    pub batch_id: i64,
    pub transaction_type: String,
    pub quantity: i64,
    pub reference_id: Option<String>,
    pub performed_by: i64,
    pub timestamp: String,
}

impl From<StockTransaction> for FfiStockTransaction {
    fn from(transaction: StockTransaction) -> Self {
        Self {
            transaction_id: transaction.transaction_id,
            batch_id: transaction.batch_id,
            transaction_type: transaction.transaction_type.as_str().to_string(),
            quantity: transaction.quantity,
            reference_id: transaction.reference_id,
            performed_by: transaction.performed_by,
            timestamp: transaction.timestamp.to_rfc3339(),
        }
    }
}

/// FFI-safe medicine with stock figures.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiMedicineStock {
    pub medicine_id: i64,
    pub name: String,
    pub total_stock: i64,
    pub reorder_level: i64,
    pub status: String,
}

impl From<models::MedicineStock> for FfiMedicineStock {
    fn from(stock: models::MedicineStock) -> Self {
        let status = match stock.status {
            models::StockStatus::OutOfStock => "OUT_OF_STOCK",
            models::StockStatus::Low => "LOW",
            models::StockStatus::Adequate => "ADEQUATE",
        };
        Self {
            medicine_id: stock.medicine.medicine_id,
            name: stock.medicine.name,
            total_stock: stock.total_stock,
            reorder_level: stock.medicine.reorder_level,
            status: status.to_string(),
        }
    }
}

/// FFI-safe inventory statistics.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiInventoryStats {
    pub total_medicines: i64,
    pub active_batches: i64,
    pub low_stock_count: i64,
    pub expired_count: i64,
    pub expiring_soon_count: i64,
    pub inventory_valuation: String,
}

impl From<models::InventoryStats> for FfiInventoryStats {
    fn from(stats: models::InventoryStats) -> Self {
        Self {
            total_medicines: stats.total_medicines,
            active_batches: stats.active_batches,
            low_stock_count: stats.low_stock_count,
            expired_count: stats.expired_count,
            expiring_soon_count: stats.expiring_soon_count,
            inventory_valuation: stats.inventory_valuation.to_string(),
        }
    }
}

/// FFI-safe prescription.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPrescription {
    pub prescription_id: i64,
    pub visit_id: i64,
    pub medicine_id: i64,
    pub dosage_per_day: i64,
    pub duration: i64,
    pub quantity: i64,
    pub status: String,
}

impl From<Prescription> for FfiPrescription {
    fn from(prescription: Prescription) -> Self {
        Self {
            quantity: prescription.quantity(),
            prescription_id: prescription.prescription_id,
            visit_id: prescription.visit_id,
            medicine_id: prescription.medicine_id,
            dosage_per_day: prescription.dosage_per_day,
            duration: prescription.duration,
            status: prescription.status.as_str().to_string(),
        }
    }
}

/// FFI-safe dispense request.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiDispenseRequest {
    pub prescription_id: i64,
    pub quantity: Option<i64>,
    pub batch_id: Option<i64>,
    pub actor_id: i64,
    pub notes: Option<String>,
}

/// FFI-safe dispense outcome.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiDispenseRecord {
    pub dispense_id: i64,
    pub prescription_id: i64,
    pub batch_id: Option<i64>,
    pub batch_number: String,
    pub quantity_dispensed: i64,
    pub status: String,
    pub total_dispensed: i64,
    pub remaining: i64,
}

impl From<DispenseRecord> for FfiDispenseRecord {
    fn from(record: DispenseRecord) -> Self {
        Self {
            dispense_id: record.dispense.dispense_id,
            prescription_id: record.dispense.prescription_id,
            batch_id: record.dispense.batch_id,
            batch_number: record.batch_number,
            quantity_dispensed: record.dispense.quantity_dispensed,
            status: record.status.as_str().to_string(),
            total_dispensed: record.total_dispensed,
            remaining: record.remaining,
        }
    }
}

/// FFI-safe bill.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiBill {
    pub bill_id: i64,
    pub visit_id: i64,
    pub total_amount: String,
    pub paid_amount: String,
    pub balance_due: String,
    pub status: String,
}

impl From<Bill> for FfiBill {
    fn from(bill: Bill) -> Self {
        Self {
            balance_due: bill.balance_due().to_string(),
            bill_id: bill.bill_id,
            visit_id: bill.visit_id,
            total_amount: bill.total_amount.to_string(),
            paid_amount: bill.paid_amount.to_string(),
            status: bill.status.as_str().to_string(),
        }
    }
}

/// FFI-safe bill item.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiBillItem {
    pub bill_item_id: i64,
    pub bill_id: i64,
    pub service_type: String,
    pub service_ref_id: i64,
    pub amount: String,
}

impl From<BillItem> for FfiBillItem {
    fn from(item: BillItem) -> Self {
        Self {
            bill_item_id: item.bill_item_id,
            bill_id: item.bill_id,
            service_type: item.service.service_type().as_str().to_string(),
            service_ref_id: item.service.ref_id(),
            amount: item.amount.to_string(),
        }
    }
}
