//! Inventory ledger.
//!
//! Batches hold a cached `stock_qty`; the append-only `stock_transactions` table is the
//! source of truth. Every stock movement goes through [`apply_adjustment`], which moves
//! the cached quantity with a bounded compare-and-swap and appends the matching ledger
//! entry on the same connection, so callers that already hold a write transaction (the
//! dispensing engine) get both or neither.

use chrono::{Duration, NaiveDate, Utc};
use rusqlite::Connection;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::db::{self, Database};
use crate::error::{CoreError, CoreResult};
use crate::models::{
    BatchTrace, ExpiryReport, InventoryStats, Medicine, MedicineBatch, MedicineStock, NewMedicine,
    StockAdjustment, StockReceipt, StockStatus, StockTransaction, TransactionType,
};

/// Inventory ledger manager.
pub struct InventoryLedger<'a> {
    db: &'a Database,
}

impl<'a> InventoryLedger<'a> {
    /// Create a new ledger manager.
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    // =========================================================================
    // Medicines
    // =========================================================================

    /// Register a medicine in the formulary.
    pub fn create_medicine(&self, medicine: &NewMedicine) -> CoreResult<Medicine> {
        if medicine.name.trim().is_empty() {
            return Err(CoreError::InvalidInput("Medicine name is required".into()));
        }
        if medicine.reorder_level < 0 {
            return Err(CoreError::InvalidInput(
                "Reorder level cannot be negative".into(),
            ));
        }
        let created = db::insert_medicine(self.db.conn(), medicine)?;
        info!(medicine_id = created.medicine_id, name = %created.name, "medicine registered");
        Ok(created)
    }

    /// Get a medicine or fail with `NotFound`.
    pub fn medicine(&self, medicine_id: i64) -> CoreResult<Medicine> {
        self.db
            .get_medicine(medicine_id)?
            .ok_or_else(|| CoreError::NotFound(format!("Medicine {}", medicine_id)))
    }

    /// Get a batch or fail with `NotFound`.
    pub fn batch(&self, batch_id: i64) -> CoreResult<MedicineBatch> {
        self.db
            .get_batch(batch_id)?
            .ok_or_else(|| CoreError::NotFound(format!("Batch {}", batch_id)))
    }

    // =========================================================================
    // Stock movements
    // =========================================================================

    /// Receive a new batch: creates it with `stock_qty = received_qty` and books a
    /// PURCHASE transaction of `+received_qty`.
    pub fn receive(&self, receipt: &StockReceipt) -> CoreResult<MedicineBatch> {
        if receipt.received_qty <= 0 {
            return Err(CoreError::InvalidInput(
                "Received quantity must be positive".into(),
            ));
        }
        if receipt.batch_number.trim().is_empty() {
            return Err(CoreError::InvalidInput("Batch number is required".into()));
        }
        if receipt.unit_price < Decimal::ZERO || receipt.purchase_price < Decimal::ZERO {
            return Err(CoreError::InvalidInput("Prices cannot be negative".into()));
        }

        let tx = self.db.write_transaction()?;
        if db::select_medicine(&tx, receipt.medicine_id)?.is_none() {
            return Err(CoreError::NotFound(format!(
                "Medicine {}",
                receipt.medicine_id
            )));
        }

        let batch = db::insert_batch(&tx, receipt, Utc::now())?;
        db::insert_stock_transaction(
            &tx,
            batch.batch_id,
            TransactionType::Purchase,
            receipt.received_qty,
            receipt.reference.as_deref(),
            receipt.received_by,
            None,
        )?;
        tx.commit()?;

        info!(
            batch_id = batch.batch_id,
            medicine_id = batch.medicine_id,
            batch_number = %batch.batch_number,
            quantity = batch.received_qty,
            "stock received"
        );
        Ok(batch)
    }

    /// Apply a signed stock movement to one batch and append its ledger entry.
    pub fn adjust(&self, adjustment: &StockAdjustment) -> CoreResult<StockTransaction> {
        let tx = self.db.write_transaction()?;
        let transaction = apply_adjustment(&tx, adjustment)?;
        tx.commit()?;
        Ok(transaction)
    }

    /// Put units returned by a patient back on their batch.
    pub fn return_stock(
        &self,
        batch_id: i64,
        quantity: i64,
        actor_id: i64,
        reference: Option<&str>,
    ) -> CoreResult<StockTransaction> {
        self.adjust(&StockAdjustment {
            batch_id,
            delta: quantity,
            transaction_type: TransactionType::Return,
            actor_id,
            reference: reference.map(str::to_string),
            notes: None,
        })
    }

    /// Discard expired or damaged units from a batch.
    pub fn write_off_expired(
        &self,
        batch_id: i64,
        quantity: i64,
        actor_id: i64,
        notes: Option<&str>,
    ) -> CoreResult<StockTransaction> {
        self.adjust(&StockAdjustment {
            batch_id,
            delta: -quantity,
            transaction_type: TransactionType::Expired,
            actor_id,
            reference: None,
            notes: notes.map(str::to_string),
        })
    }

    /// Flag a batch as recalled. Recalled batches leave `total_stock` and are never
    /// eligible for dispensing.
    pub fn recall_batch(&self, batch_id: i64, reason: &str) -> CoreResult<MedicineBatch> {
        if reason.trim().is_empty() {
            return Err(CoreError::InvalidInput("Recall reason is required".into()));
        }
        let tx = self.db.write_transaction()?;
        if !db::mark_batch_recalled(&tx, batch_id, reason)? {
            return Err(CoreError::NotFound(format!("Batch {}", batch_id)));
        }
        let batch = db::select_batch(&tx, batch_id)?
            .ok_or_else(|| CoreError::NotFound(format!("Batch {}", batch_id)))?;
        tx.commit()?;

        warn!(batch_id, batch_number = %batch.batch_number, reason, "batch recalled");
        Ok(batch)
    }

    // =========================================================================
    // Stock queries
    // =========================================================================

    /// Sum of `stock_qty` over the medicine's non-recalled batches.
    pub fn total_stock(&self, medicine_id: i64) -> CoreResult<i64> {
        self.medicine(medicine_id)?;
        Ok(db::select_total_stock(self.db.conn(), medicine_id)?)
    }

    /// A medicine with its derived stock figures.
    pub fn medicine_stock(&self, medicine_id: i64) -> CoreResult<MedicineStock> {
        let medicine = self.medicine(medicine_id)?;
        self.stock_of(medicine)
    }

    /// Out of stock, low or adequate.
    pub fn stock_status(&self, medicine_id: i64) -> CoreResult<StockStatus> {
        Ok(self.medicine_stock(medicine_id)?.status)
    }

    /// Medicines whose total stock is below their reorder level.
    pub fn low_stock(&self) -> CoreResult<Vec<MedicineStock>> {
        let mut low = Vec::new();
        for medicine in self.db.list_medicines()? {
            let stock = self.stock_of(medicine)?;
            if stock.is_low_stock() {
                low.push(stock);
            }
        }
        Ok(low)
    }

    /// Batches that can satisfy `quantity` on `as_of`, earliest expiry first.
    ///
    /// Fails with `NoEligibleBatch` when none qualify.
    pub fn eligible_batches(
        &self,
        medicine_id: i64,
        quantity: i64,
        as_of: NaiveDate,
    ) -> CoreResult<Vec<MedicineBatch>> {
        let batches = db::select_eligible_batches(self.db.conn(), medicine_id, quantity, as_of)?;
        if batches.is_empty() {
            return Err(CoreError::NoEligibleBatch {
                medicine_id,
                quantity,
            });
        }
        Ok(batches)
    }

    // =========================================================================
    // Reports
    // =========================================================================

    /// Expired batches and batches expiring within the configured warning window.
    pub fn expiry_report(&self, as_of: NaiveDate) -> CoreResult<ExpiryReport> {
        let window_days = self.db.config().expiry_warning_days;
        // Windows past the calendar's end cover every batch
        let horizon = Duration::try_days(window_days)
            .and_then(|window| as_of.checked_add_signed(window))
            .unwrap_or(NaiveDate::MAX);

        let (mut expired, mut expiring_soon) = (Vec::new(), Vec::new());
        for batch in self.db.list_all_batches()? {
            if batch.is_expired(as_of) {
                expired.push(batch);
            } else if batch.expiry_date <= horizon {
                expiring_soon.push(batch);
            }
        }

        Ok(ExpiryReport {
            as_of,
            window_days,
            expired,
            expiring_soon,
        })
    }

    /// Aggregate pharmacy figures as of a date.
    pub fn inventory_stats(&self, as_of: NaiveDate) -> CoreResult<InventoryStats> {
        let medicines = self.db.list_medicines()?;
        let total_medicines = medicines.len() as i64;
        let mut low_stock_count = 0;
        for medicine in medicines {
            if self.stock_of(medicine)?.is_low_stock() {
                low_stock_count += 1;
            }
        }

        let report = self.expiry_report(as_of)?;
        let batches = self.db.list_all_batches()?;
        let inventory_valuation = batches.iter().map(MedicineBatch::valuation).sum();

        Ok(InventoryStats {
            total_medicines,
            active_batches: batches.len() as i64,
            low_stock_count,
            expired_count: report.expired.len() as i64,
            expiring_soon_count: report.expiring_soon.len() as i64,
            inventory_valuation,
        })
    }

    /// Every patient who received units from a batch.
    pub fn batch_traceability(&self, batch_id: i64) -> CoreResult<BatchTrace> {
        let batch = self.batch(batch_id)?;
        let medicine = self.medicine(batch.medicine_id)?;
        Ok(BatchTrace {
            batch_id,
            batch_number: batch.batch_number,
            medicine: medicine.name,
            patients_affected: self.db.list_batch_recipients(batch_id)?,
        })
    }

    /// Ledger entries for a batch, oldest first.
    pub fn transactions_for_batch(&self, batch_id: i64) -> CoreResult<Vec<StockTransaction>> {
        self.batch(batch_id)?;
        Ok(self.db.list_transactions_for_batch(batch_id)?)
    }

    /// Whether the cached `stock_qty` equals the sum of the batch's ledger entries.
    pub fn verify_batch_ledger(&self, batch_id: i64) -> CoreResult<bool> {
        let batch = self.batch(batch_id)?;
        let balance = self.db.ledger_balance(batch_id)?;
        if balance != batch.stock_qty {
            warn!(
                batch_id,
                stock_qty = batch.stock_qty,
                ledger_balance = balance,
                "stock cache disagrees with ledger"
            );
        }
        Ok(balance == batch.stock_qty)
    }

    fn stock_of(&self, medicine: Medicine) -> CoreResult<MedicineStock> {
        let total_stock = db::select_total_stock(self.db.conn(), medicine.medicine_id)?;
        let status = StockStatus::classify(total_stock, medicine.reorder_level);
        Ok(MedicineStock {
            medicine,
            total_stock,
            status,
        })
    }
}

/// Move stock on one batch and record the movement.
///
/// Runs on the caller's connection; callers wrap it in a write transaction.
pub(crate) fn apply_adjustment(
    conn: &Connection,
    adjustment: &StockAdjustment,
) -> CoreResult<StockTransaction> {
    let StockAdjustment {
        batch_id,
        delta,
        transaction_type,
        actor_id,
        ..
    } = *adjustment;

    if !transaction_type.accepts_delta(delta) {
        return Err(CoreError::InvalidInput(format!(
            "{} cannot move stock by {}",
            transaction_type.as_str(),
            delta
        )));
    }

    if !db::apply_stock_delta(conn, batch_id, delta)? {
        // The guarded update matched nothing: find out why
        let batch = db::select_batch(conn, batch_id)?
            .ok_or_else(|| CoreError::NotFound(format!("Batch {}", batch_id)))?;
        if batch.stock_qty + delta < 0 {
            return Err(CoreError::InsufficientStock {
                batch_id,
                available: batch.stock_qty,
                required: -delta,
            });
        }
        return Err(CoreError::InvalidInput(format!(
            "Batch {} would exceed its received quantity of {}",
            batch_id, batch.received_qty
        )));
    }

    let transaction = db::insert_stock_transaction(
        conn,
        batch_id,
        transaction_type,
        delta,
        adjustment.reference.as_deref(),
        actor_id,
        adjustment.notes.as_deref(),
    )?;

    debug!(
        batch_id,
        delta,
        transaction_type = transaction_type.as_str(),
        transaction_id = transaction.transaction_id,
        "stock adjusted"
    );
    Ok(transaction)
}
