//! Prescription and dispense models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prescription fulfilment status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrescriptionStatus {
    /// Nothing dispensed yet
    Pending,
    /// Some but not all units dispensed
    PartiallyDispensed,
    /// Fully dispensed (terminal)
    Dispensed,
    /// Cancelled before any dispense (terminal)
    Cancelled,
}

impl PrescriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrescriptionStatus::Pending => "PENDING",
            PrescriptionStatus::PartiallyDispensed => "PARTIALLY_DISPENSED",
            PrescriptionStatus::Dispensed => "DISPENSED",
            PrescriptionStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(PrescriptionStatus::Pending),
            "PARTIALLY_DISPENSED" => Some(PrescriptionStatus::PartiallyDispensed),
            "DISPENSED" => Some(PrescriptionStatus::Dispensed),
            "CANCELLED" => Some(PrescriptionStatus::Cancelled),
            _ => None,
        }
    }

    /// Whether more units may still be dispensed.
    pub fn accepts_dispense(&self) -> bool {
        matches!(
            self,
            PrescriptionStatus::Pending | PrescriptionStatus::PartiallyDispensed
        )
    }

    /// Status after `dispensed` of `prescribed` units have been issued.
    pub fn after_dispense(dispensed: i64, prescribed: i64) -> Self {
        if dispensed >= prescribed {
            PrescriptionStatus::Dispensed
        } else {
            PrescriptionStatus::PartiallyDispensed
        }
    }
}

/// A clinical order for a medicine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prescription {
    pub prescription_id: i64,
    pub visit_id: i64,
    pub medicine_id: i64,
    pub dosage_per_day: i64,
    /// Days
    pub duration: i64,
    pub status: PrescriptionStatus,
    pub created_at: DateTime<Utc>,
    /// Latest dispense event
    pub dispensed_at: Option<DateTime<Utc>>,
    pub dispensed_by: Option<i64>,
}

impl Prescription {
    /// Units prescribed. Derived, never stored.
    pub fn quantity(&self) -> i64 {
        self.dosage_per_day.saturating_mul(self.duration)
    }
}

/// Input for writing a prescription.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewPrescription {
    pub visit_id: i64,
    pub medicine_id: i64,
    pub dosage_per_day: i64,
    pub duration: i64,
}

/// One fulfilment event against one batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrescriptionDispense {
    pub dispense_id: i64,
    pub prescription_id: i64,
    pub medicine_id: i64,
    /// `None` only on legacy rows recorded before batch tracking
    pub batch_id: Option<i64>,
    pub quantity_dispensed: i64,
    pub dispensed_by: i64,
    pub dispensed_at: DateTime<Utc>,
    pub notes: Option<String>,
}

/// A dispense request from the pharmacy counter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispenseRequest {
    pub prescription_id: i64,
    /// Defaults to everything still undispensed
    pub quantity: Option<i64>,
    /// Defaults to FEFO auto-selection
    pub batch_id: Option<i64>,
    pub actor_id: i64,
    pub notes: Option<String>,
}

impl DispenseRequest {
    /// Dispense the remaining quantity from the FEFO batch.
    pub fn remaining(prescription_id: i64, actor_id: i64) -> Self {
        Self {
            prescription_id,
            quantity: None,
            batch_id: None,
            actor_id,
            notes: None,
        }
    }

    pub fn with_quantity(mut self, quantity: i64) -> Self {
        self.quantity = Some(quantity);
        self
    }

    pub fn from_batch(mut self, batch_id: i64) -> Self {
        self.batch_id = Some(batch_id);
        self
    }
}

/// Outcome of a successful dispense.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispenseRecord {
    pub dispense: PrescriptionDispense,
    pub batch_number: String,
    pub status: PrescriptionStatus,
    pub total_dispensed: i64,
    pub remaining: i64,
}
