//! Inventory models: medicines, receipt batches and the stock ledger.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Days after which a batch scores full health.
const FULL_HEALTH_DAYS: i64 = 365;

/// A medicine in the formulary. Stock lives on its batches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Medicine {
    pub medicine_id: i64,
    pub name: String,
    pub generic_name: Option<String>,
    /// e.g. Antibiotic, Analgesic
    pub category: Option<String>,
    pub manufacturer: Option<String>,
    /// Total stock below this raises a low-stock alert
    pub reorder_level: i64,
}

/// Input for registering a medicine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewMedicine {
    pub name: String,
    pub generic_name: Option<String>,
    pub category: Option<String>,
    pub manufacturer: Option<String>,
    pub reorder_level: i64,
}

impl NewMedicine {
    /// Medicine with a name and the default reorder level.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            generic_name: None,
            category: None,
            manufacturer: None,
            reorder_level: 10,
        }
    }
}

/// A receipt lot of a medicine with its own expiry and price.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MedicineBatch {
    pub batch_id: i64,
    pub medicine_id: i64,
    pub batch_number: String,
    pub expiry_date: NaiveDate,
    /// Cached projection of the transaction ledger
    pub stock_qty: i64,
    pub received_qty: i64,
    pub purchase_price: Decimal,
    /// Selling price per unit
    pub unit_price: Decimal,
    pub is_recalled: bool,
    pub recall_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl MedicineBatch {
    /// Expired batches have an expiry date strictly before `as_of`.
    pub fn is_expired(&self, as_of: NaiveDate) -> bool {
        self.expiry_date < as_of
    }

    /// Signed days until expiry; negative once expired.
    pub fn days_to_expiry(&self, as_of: NaiveDate) -> i64 {
        (self.expiry_date - as_of).num_days()
    }

    /// 0 when expired, 100 beyond a year of shelf life, linear in between.
    pub fn health_score(&self, as_of: NaiveDate) -> u8 {
        let days = self.days_to_expiry(as_of);
        if days < 0 {
            0
        } else if days > FULL_HEALTH_DAYS {
            100
        } else {
            (days * 100 / FULL_HEALTH_DAYS) as u8
        }
    }

    /// Stock value at selling price.
    pub fn valuation(&self) -> Decimal {
        Decimal::from(self.stock_qty) * self.unit_price
    }

    /// Whether this batch can satisfy `quantity` units on `as_of` under FEFO rules.
    pub fn is_eligible(&self, quantity: i64, as_of: NaiveDate) -> bool {
        !self.is_recalled && self.expiry_date > as_of && self.stock_qty >= quantity
    }
}

/// Input for receiving a new batch into stock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StockReceipt {
    pub medicine_id: i64,
    pub batch_number: String,
    pub expiry_date: NaiveDate,
    pub received_qty: i64,
    pub purchase_price: Decimal,
    pub unit_price: Decimal,
    /// Staff member booking the goods receipt
    pub received_by: i64,
    /// GRN or supplier invoice reference
    pub reference: Option<String>,
}

/// Kind of stock movement.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    /// Purchase / goods receipt
    Purchase,
    /// Issued to a patient
    Dispense,
    /// Returned by a patient
    Return,
    /// Manual stock correction
    Adjustment,
    /// Expired or discarded
    Expired,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Purchase => "PURCHASE",
            TransactionType::Dispense => "DISPENSE",
            TransactionType::Return => "RETURN",
            TransactionType::Adjustment => "ADJUSTMENT",
            TransactionType::Expired => "EXPIRED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PURCHASE" => Some(TransactionType::Purchase),
            "DISPENSE" => Some(TransactionType::Dispense),
            "RETURN" => Some(TransactionType::Return),
            "ADJUSTMENT" => Some(TransactionType::Adjustment),
            "EXPIRED" => Some(TransactionType::Expired),
            _ => None,
        }
    }

    /// Whether a delta of this sign is meaningful for the type.
    /// Adjustments may go either way.
    pub fn accepts_delta(&self, delta: i64) -> bool {
        match self {
            TransactionType::Purchase | TransactionType::Return => delta > 0,
            TransactionType::Dispense | TransactionType::Expired => delta < 0,
            TransactionType::Adjustment => delta != 0,
        }
    }
}

/// Immutable audit record of one stock movement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StockTransaction {
    pub transaction_id: i64,
    pub batch_id: i64,
    pub transaction_type: TransactionType,
    /// Positive for incoming, negative for outgoing
    pub quantity: i64,
    /// Originating event, e.g. `Presc-12` or a GRN number
    pub reference_id: Option<String>,
    pub performed_by: i64,
    pub notes: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A request to move stock on one batch through the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StockAdjustment {
    pub batch_id: i64,
    pub delta: i64,
    pub transaction_type: TransactionType,
    pub actor_id: i64,
    pub reference: Option<String>,
    pub notes: Option<String>,
}

/// Stock level classification shown on the inventory screen.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StockStatus {
    OutOfStock,
    Low,
    Adequate,
}

impl StockStatus {
    pub fn classify(total_stock: i64, reorder_level: i64) -> Self {
        if total_stock == 0 {
            StockStatus::OutOfStock
        } else if total_stock < reorder_level {
            StockStatus::Low
        } else {
            StockStatus::Adequate
        }
    }
}

/// A medicine together with its derived stock figures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MedicineStock {
    pub medicine: Medicine,
    pub total_stock: i64,
    pub status: StockStatus,
}

impl MedicineStock {
    pub fn is_low_stock(&self) -> bool {
        self.total_stock < self.medicine.reorder_level
    }
}

/// Expired and soon-to-expire batches as of a date.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExpiryReport {
    pub as_of: NaiveDate,
    pub window_days: i64,
    pub expired: Vec<MedicineBatch>,
    pub expiring_soon: Vec<MedicineBatch>,
}

/// Aggregate pharmacy statistics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InventoryStats {
    pub total_medicines: i64,
    pub active_batches: i64,
    pub low_stock_count: i64,
    pub expired_count: i64,
    pub expiring_soon_count: i64,
    pub inventory_valuation: Decimal,
}

/// One patient who received units from a batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraceEntry {
    pub patient_id: i64,
    pub patient_name: String,
    pub prescription_id: i64,
    pub dispensed_at: DateTime<Utc>,
    pub quantity: i64,
}

/// Recall traceability for a batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchTrace {
    pub batch_id: i64,
    pub batch_number: String,
    pub medicine: String,
    pub patients_affected: Vec<TraceEntry>,
}
