//! Records owned by the clinical subsystems.
//!
//! The core never mutates these beyond what collaborators feed it; it only reads the
//! fields it needs to decide whether a service is billable and what it costs.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A registered patient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Patient {
    pub patient_id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Staff role, used to authorize dispense actors.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StaffRole {
    Admin,
    Doctor,
    Reception,
    Nurse,
    LabTech,
    Billing,
    Pharmacist,
    Support,
}

impl StaffRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            StaffRole::Admin => "ADMIN",
            StaffRole::Doctor => "DOCTOR",
            StaffRole::Reception => "RECEPTION",
            StaffRole::Nurse => "NURSE",
            StaffRole::LabTech => "LAB_TECH",
            StaffRole::Billing => "BILLING",
            StaffRole::Pharmacist => "PHARMACIST",
            StaffRole::Support => "SUPPORT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ADMIN" => Some(StaffRole::Admin),
            "DOCTOR" => Some(StaffRole::Doctor),
            "RECEPTION" => Some(StaffRole::Reception),
            "NURSE" => Some(StaffRole::Nurse),
            "LAB_TECH" => Some(StaffRole::LabTech),
            "BILLING" => Some(StaffRole::Billing),
            "PHARMACIST" => Some(StaffRole::Pharmacist),
            "SUPPORT" => Some(StaffRole::Support),
            _ => None,
        }
    }
}

/// A staff member acting on the ledger or providing a billable consultation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Staff {
    pub staff_id: i64,
    pub name: String,
    pub role: StaffRole,
    /// Consultation fee, doctors only
    pub fee: Option<Decimal>,
}

/// Visit status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VisitStatus {
    Active,
    Completed,
    Cancelled,
    OnHold,
}

impl VisitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisitStatus::Active => "ACTIVE",
            VisitStatus::Completed => "COMPLETED",
            VisitStatus::Cancelled => "CANCELLED",
            VisitStatus::OnHold => "ON_HOLD",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(VisitStatus::Active),
            "COMPLETED" => Some(VisitStatus::Completed),
            "CANCELLED" => Some(VisitStatus::Cancelled),
            // Older clients write the hyphenated form
            "ON_HOLD" | "ON-HOLD" => Some(VisitStatus::OnHold),
            _ => None,
        }
    }
}

/// A patient visit. Bills and prescriptions hang off visits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Visit {
    pub visit_id: i64,
    pub patient_id: i64,
    pub doctor_id: Option<i64>,
    pub visit_date: NaiveDate,
    pub status: VisitStatus,
}

/// Progress of an ordered clinical service (lab, radiology, operation).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceStatus {
    Ordered,
    SampleCollected,
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
    Postponed,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Ordered => "ORDERED",
            ServiceStatus::SampleCollected => "SAMPLE_COLLECTED",
            ServiceStatus::Scheduled => "SCHEDULED",
            ServiceStatus::InProgress => "IN_PROGRESS",
            ServiceStatus::Completed => "COMPLETED",
            ServiceStatus::Cancelled => "CANCELLED",
            ServiceStatus::Postponed => "POSTPONED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ORDERED" => Some(ServiceStatus::Ordered),
            "SAMPLE_COLLECTED" => Some(ServiceStatus::SampleCollected),
            "SCHEDULED" => Some(ServiceStatus::Scheduled),
            "IN_PROGRESS" => Some(ServiceStatus::InProgress),
            "COMPLETED" => Some(ServiceStatus::Completed),
            "CANCELLED" => Some(ServiceStatus::Cancelled),
            "POSTPONED" => Some(ServiceStatus::Postponed),
            _ => None,
        }
    }
}

/// A lab or radiology investigation. Both share one shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Investigation {
    pub id: i64,
    pub visit_id: i64,
    /// Test name or scan type
    pub name: String,
    pub status: ServiceStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub price: Decimal,
}

/// One consumable used during an operation, billed individually.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Consumable {
    /// Client-generated id; consumables without one cannot be tracked for billing
    #[serde(default)]
    pub id: Option<i64>,
    pub item: String,
    #[serde(default)]
    pub price: Decimal,
}

/// A surgical operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Operation {
    pub operation_id: i64,
    pub visit_id: i64,
    pub operation_name: String,
    pub status: ServiceStatus,
    pub performed_at: Option<DateTime<Utc>>,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub price: Decimal,
    pub consumables: Vec<Consumable>,
}

/// An inpatient admission. Bed charges accrue per day until discharge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Admission {
    pub admission_id: i64,
    pub visit_id: i64,
    pub admission_date: DateTime<Utc>,
    pub discharge_date: Option<DateTime<Utc>>,
    pub bed_price: Decimal,
}

impl Admission {
    /// Billable days: whole days between admission and discharge, at least one.
    pub fn billable_days(&self) -> Option<i64> {
        let discharge = self.discharge_date?;
        Some((discharge - self.admission_date).num_days().max(1))
    }
}
