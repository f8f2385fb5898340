//! Billing models.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Category of a billable service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceType {
    Consultation,
    LabTest,
    RadiologyTest,
    Operation,
    Bed,
    Pharmacy,
    OtConsumable,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Consultation => "CONSULTATION",
            ServiceType::LabTest => "LAB_TEST",
            ServiceType::RadiologyTest => "RADIOLOGY_TEST",
            ServiceType::Operation => "OPERATION",
            ServiceType::Bed => "BED",
            ServiceType::Pharmacy => "PHARMACY",
            ServiceType::OtConsumable => "OT_CONSUMABLE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CONSULTATION" => Some(ServiceType::Consultation),
            "LAB_TEST" => Some(ServiceType::LabTest),
            "RADIOLOGY_TEST" => Some(ServiceType::RadiologyTest),
            "OPERATION" => Some(ServiceType::Operation),
            "BED" => Some(ServiceType::Bed),
            "PHARMACY" => Some(ServiceType::Pharmacy),
            "OT_CONSUMABLE" => Some(ServiceType::OtConsumable),
            _ => None,
        }
    }
}

/// Reference to the clinical record a charge comes from.
///
/// Each id lives in the originating service's own id space: a lab test id, an admission
/// id, a visit id for consultations, a consumable's embedded id. It is deliberately not a
/// foreign key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(tag = "type", content = "id", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceRef {
    /// Visit id
    Consultation(i64),
    LabTest(i64),
    RadiologyTest(i64),
    Operation(i64),
    /// Admission id
    Bed(i64),
    /// Prescription id
    Pharmacy(i64),
    /// Consumable id embedded in an operation's consumable list
    OtConsumable(i64),
}

impl ServiceRef {
    pub fn new(service_type: ServiceType, ref_id: i64) -> Self {
        match service_type {
            ServiceType::Consultation => ServiceRef::Consultation(ref_id),
            ServiceType::LabTest => ServiceRef::LabTest(ref_id),
            ServiceType::RadiologyTest => ServiceRef::RadiologyTest(ref_id),
            ServiceType::Operation => ServiceRef::Operation(ref_id),
            ServiceType::Bed => ServiceRef::Bed(ref_id),
            ServiceType::Pharmacy => ServiceRef::Pharmacy(ref_id),
            ServiceType::OtConsumable => ServiceRef::OtConsumable(ref_id),
        }
    }

    pub fn service_type(&self) -> ServiceType {
        match self {
            ServiceRef::Consultation(_) => ServiceType::Consultation,
            ServiceRef::LabTest(_) => ServiceType::LabTest,
            ServiceRef::RadiologyTest(_) => ServiceType::RadiologyTest,
            ServiceRef::Operation(_) => ServiceType::Operation,
            ServiceRef::Bed(_) => ServiceType::Bed,
            ServiceRef::Pharmacy(_) => ServiceType::Pharmacy,
            ServiceRef::OtConsumable(_) => ServiceType::OtConsumable,
        }
    }

    pub fn ref_id(&self) -> i64 {
        match *self {
            ServiceRef::Consultation(id)
            | ServiceRef::LabTest(id)
            | ServiceRef::RadiologyTest(id)
            | ServiceRef::Operation(id)
            | ServiceRef::Bed(id)
            | ServiceRef::Pharmacy(id)
            | ServiceRef::OtConsumable(id) => id,
        }
    }
}

impl fmt::Display for ServiceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.service_type().as_str(), self.ref_id())
    }
}

/// Bill payment status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillStatus {
    /// Items still being added
    Draft,
    NotPaid,
    PartiallyPaid,
    Paid,
    Cancelled,
}

impl BillStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillStatus::Draft => "DRAFT",
            BillStatus::NotPaid => "NOT_PAID",
            BillStatus::PartiallyPaid => "PARTIALLY_PAID",
            BillStatus::Paid => "PAID",
            BillStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DRAFT" => Some(BillStatus::Draft),
            "NOT_PAID" => Some(BillStatus::NotPaid),
            "PARTIALLY_PAID" => Some(BillStatus::PartiallyPaid),
            "PAID" => Some(BillStatus::Paid),
            "CANCELLED" => Some(BillStatus::Cancelled),
            _ => None,
        }
    }

    /// Payment status implied by the amounts on an issued bill.
    pub fn from_amounts(total: Decimal, paid: Decimal) -> Self {
        if paid <= Decimal::ZERO {
            // A zero-total bill owes nothing
            if total <= Decimal::ZERO {
                BillStatus::Paid
            } else {
                BillStatus::NotPaid
            }
        } else if paid >= total {
            BillStatus::Paid
        } else {
            BillStatus::PartiallyPaid
        }
    }
}

/// One bill per visit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bill {
    pub bill_id: i64,
    pub visit_id: i64,
    /// Sum of the bill's item amounts, maintained on every item mutation
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub status: BillStatus,
    pub created_at: DateTime<Utc>,
}

impl Bill {
    pub fn balance_due(&self) -> Decimal {
        (self.total_amount - self.paid_amount).max(Decimal::ZERO)
    }
}

/// One charge line on a bill.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BillItem {
    pub bill_item_id: i64,
    pub bill_id: i64,
    pub visit_id: i64,
    pub service: ServiceRef,
    pub amount: Decimal,
}

/// A completed service not yet reflected in any bill.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PendingItem {
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    pub id: i64,
    pub name: String,
    pub price: Decimal,
    pub date: Option<NaiveDate>,
    pub visit_id: i64,
}

impl PendingItem {
    pub fn service(&self) -> ServiceRef {
        ServiceRef::new(self.service_type, self.id)
    }
}

/// Unbilled charges for one patient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatientPending {
    pub patient_id: i64,
    pub patient_name: String,
    pub items: Vec<PendingItem>,
    pub total_amount: Decimal,
}
