//! Dispensing engine.
//!
//! Resolves a prescription against stock, deducts it through the inventory ledger and
//! records provenance. A dispense is one `BEGIN IMMEDIATE` transaction: the status and
//! remaining-quantity checks, the batch choice, the stock deduction, the dispense row
//! and the prescription status update all commit together or not at all.

use chrono::{NaiveDate, Utc};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::db::{self, Database};
use crate::error::{CoreError, CoreResult};
use crate::inventory::apply_adjustment;
use crate::models::{
    DispenseRecord, DispenseRequest, MedicineBatch, NewPrescription, Prescription,
    PrescriptionStatus, StaffRole, StockAdjustment, TransactionType,
};

/// Stock transaction reference for a prescription's dispenses.
pub fn dispense_reference(prescription_id: i64) -> String {
    format!("Presc-{}", prescription_id)
}

/// Dispensing engine.
pub struct Dispenser<'a> {
    db: &'a Database,
    as_of: Option<NaiveDate>,
}

impl<'a> Dispenser<'a> {
    /// Create a dispenser that judges expiry against today's date.
    pub fn new(db: &'a Database) -> Self {
        Self { db, as_of: None }
    }

    /// Judge batch expiry against a fixed date instead of today.
    pub fn as_of(mut self, date: NaiveDate) -> Self {
        self.as_of = Some(date);
        self
    }

    fn today(&self) -> NaiveDate {
        self.as_of.unwrap_or_else(|| Utc::now().date_naive())
    }

    /// Write a prescription. Quantity is derived from dosage and duration.
    pub fn create_prescription(&self, prescription: &NewPrescription) -> CoreResult<Prescription> {
        if prescription.dosage_per_day <= 0 || prescription.duration <= 0 {
            return Err(CoreError::InvalidInput(
                "Dosage per day and duration must be positive".into(),
            ));
        }
        if prescription
            .dosage_per_day
            .checked_mul(prescription.duration)
            .is_none()
        {
            return Err(CoreError::InvalidInput(format!(
                "Prescribed quantity {} x {} is out of range",
                prescription.dosage_per_day, prescription.duration
            )));
        }
        let tx = self.db.write_transaction()?;
        if db::select_visit(&tx, prescription.visit_id)?.is_none() {
            return Err(CoreError::NotFound(format!("Visit {}", prescription.visit_id)));
        }
        if db::select_medicine(&tx, prescription.medicine_id)?.is_none() {
            return Err(CoreError::NotFound(format!(
                "Medicine {}",
                prescription.medicine_id
            )));
        }
        let created = db::insert_prescription(&tx, prescription)?;
        tx.commit()?;

        info!(
            prescription_id = created.prescription_id,
            medicine_id = created.medicine_id,
            quantity = created.quantity(),
            "prescription created"
        );
        Ok(created)
    }

    /// Cancel a prescription nothing has been dispensed against.
    pub fn cancel_prescription(&self, prescription_id: i64) -> CoreResult<Prescription> {
        let tx = self.db.write_transaction()?;
        let mut prescription = load_prescription(&tx, prescription_id)?;
        if prescription.status != PrescriptionStatus::Pending {
            return Err(CoreError::InvalidState(format!(
                "Prescription {} is {} and cannot be cancelled",
                prescription_id,
                prescription.status.as_str()
            )));
        }
        db::set_prescription_status(&tx, prescription_id, PrescriptionStatus::Cancelled)?;
        tx.commit()?;

        prescription.status = PrescriptionStatus::Cancelled;
        info!(prescription_id, "prescription cancelled");
        Ok(prescription)
    }

    /// Prescriptions awaiting their first dispense, newest first.
    pub fn pending_prescriptions(&self) -> CoreResult<Vec<Prescription>> {
        Ok(self.db.list_pending_prescriptions()?)
    }

    /// Units of a prescription not yet dispensed.
    pub fn remaining_quantity(&self, prescription_id: i64) -> CoreResult<i64> {
        let prescription = load_prescription(self.db.conn(), prescription_id)?;
        let dispensed = db::sum_dispensed(self.db.conn(), prescription_id)?;
        Ok(prescription.quantity() - dispensed)
    }

    /// Issue medicine against a prescription.
    ///
    /// Without an explicit batch the earliest-expiring eligible batch is used.
    pub fn dispense(&self, request: &DispenseRequest) -> CoreResult<DispenseRecord> {
        let as_of = self.today();
        let tx = self.db.write_transaction()?;

        let prescription = load_prescription(&tx, request.prescription_id)?;
        if !prescription.status.accepts_dispense() {
            return Err(CoreError::InvalidState(format!(
                "Prescription {} is already {}",
                prescription.prescription_id,
                prescription.status.as_str()
            )));
        }

        let actor = db::select_staff(&tx, request.actor_id)?
            .ok_or_else(|| CoreError::NotFound(format!("Staff {}", request.actor_id)))?;
        if self.db.config().require_pharmacist && actor.role != StaffRole::Pharmacist {
            warn!(
                staff_id = actor.staff_id,
                role = actor.role.as_str(),
                "dispense refused for non-pharmacist"
            );
            return Err(CoreError::Unauthorized(format!(
                "{} does not hold the pharmacist role",
                actor.name
            )));
        }

        let prescribed = prescription.quantity();
        let already_dispensed = db::sum_dispensed(&tx, prescription.prescription_id)?;
        let remaining = prescribed - already_dispensed;
        let quantity = request.quantity.unwrap_or(remaining);
        if quantity <= 0 {
            return Err(CoreError::InvalidInput(
                "Dispense quantity must be positive".into(),
            ));
        }
        if quantity > remaining {
            return Err(CoreError::OverDispense {
                requested: quantity,
                remaining,
            });
        }

        let batch = match request.batch_id {
            Some(batch_id) => resolve_chosen_batch(&tx, &prescription, batch_id, quantity, as_of)?,
            None => resolve_fefo_batch(&tx, &prescription, quantity, as_of)?,
        };

        apply_adjustment(
            &tx,
            &StockAdjustment {
                batch_id: batch.batch_id,
                delta: -quantity,
                transaction_type: TransactionType::Dispense,
                actor_id: actor.staff_id,
                reference: Some(dispense_reference(prescription.prescription_id)),
                notes: request.notes.clone(),
            },
        )?;

        let dispensed_at = Utc::now();
        let dispense = db::insert_dispense(
            &tx,
            prescription.prescription_id,
            prescription.medicine_id,
            Some(batch.batch_id),
            quantity,
            actor.staff_id,
            dispensed_at,
            request.notes.as_deref(),
        )?;

        let total_dispensed = already_dispensed + quantity;
        let status = PrescriptionStatus::after_dispense(total_dispensed, prescribed);
        db::mark_prescription_dispensed(
            &tx,
            prescription.prescription_id,
            status,
            dispensed_at,
            actor.staff_id,
        )?;
        tx.commit()?;

        info!(
            prescription_id = prescription.prescription_id,
            batch_id = batch.batch_id,
            quantity,
            status = status.as_str(),
            "medicine dispensed"
        );

        Ok(DispenseRecord {
            dispense,
            batch_number: batch.batch_number,
            status,
            total_dispensed,
            remaining: prescribed - total_dispensed,
        })
    }
}

fn load_prescription(conn: &Connection, prescription_id: i64) -> CoreResult<Prescription> {
    db::select_prescription(conn, prescription_id)?
        .ok_or_else(|| CoreError::NotFound(format!("Prescription {}", prescription_id)))
}

fn resolve_fefo_batch(
    conn: &Connection,
    prescription: &Prescription,
    quantity: i64,
    as_of: NaiveDate,
) -> CoreResult<MedicineBatch> {
    db::select_eligible_batches(conn, prescription.medicine_id, quantity, as_of)?
        .into_iter()
        .next()
        .ok_or(CoreError::NoEligibleBatch {
            medicine_id: prescription.medicine_id,
            quantity,
        })
}

fn resolve_chosen_batch(
    conn: &Connection,
    prescription: &Prescription,
    batch_id: i64,
    quantity: i64,
    as_of: NaiveDate,
) -> CoreResult<MedicineBatch> {
    let batch = db::select_batch(conn, batch_id)?
        .ok_or_else(|| CoreError::NotFound(format!("Batch {}", batch_id)))?;

    let ineligible = |reason: String| CoreError::IneligibleBatch { batch_id, reason };
    if batch.medicine_id != prescription.medicine_id {
        return Err(ineligible(format!(
            "belongs to medicine {}, prescription is for medicine {}",
            batch.medicine_id, prescription.medicine_id
        )));
    }
    if batch.is_recalled {
        return Err(ineligible(format!(
            "recalled ({})",
            batch.recall_reason.as_deref().unwrap_or("no reason given")
        )));
    }
    if batch.expiry_date <= as_of {
        return Err(ineligible(format!("expired on {}", batch.expiry_date)));
    }
    if batch.stock_qty < quantity {
        return Err(CoreError::InsufficientStock {
            batch_id,
            available: batch.stock_qty,
            required: quantity,
        });
    }
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::inventory::InventoryLedger;
    use crate::models::{NewMedicine, StockReceipt};
    use rust_decimal::Decimal;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    struct Fixture {
        db: Database,
        visit_id: i64,
        medicine_id: i64,
        pharmacist_id: i64,
        nurse_id: i64,
    }

    fn setup_with(config: CoreConfig) -> Fixture {
        let db = Database::open_in_memory_with_config(config).unwrap();
        let patient = db.insert_patient("Meera").unwrap();
        let pharmacist = db.insert_staff("Pat", StaffRole::Pharmacist, None).unwrap();
        let nurse = db.insert_staff("Nina", StaffRole::Nurse, None).unwrap();
        let visit = db
            .insert_visit(patient.patient_id, None, date("2024-12-20"))
            .unwrap();
        let medicine = InventoryLedger::new(&db)
            .create_medicine(&NewMedicine::named("Cetirizine 10mg"))
            .unwrap();
        Fixture {
            db,
            visit_id: visit.visit_id,
            medicine_id: medicine.medicine_id,
            pharmacist_id: pharmacist.staff_id,
            nurse_id: nurse.staff_id,
        }
    }

    fn setup() -> Fixture {
        setup_with(CoreConfig::default())
    }

    fn stock(f: &Fixture, number: &str, expiry: &str, qty: i64) -> MedicineBatch {
        InventoryLedger::new(&f.db)
            .receive(&StockReceipt {
                medicine_id: f.medicine_id,
                batch_number: number.into(),
                expiry_date: date(expiry),
                received_qty: qty,
                purchase_price: Decimal::ONE,
                unit_price: Decimal::new(250, 2),
                received_by: f.pharmacist_id,
                reference: None,
            })
            .unwrap()
    }

    fn prescribe(f: &Fixture, dosage_per_day: i64, duration: i64) -> Prescription {
        Dispenser::new(&f.db)
            .create_prescription(&NewPrescription {
                visit_id: f.visit_id,
                medicine_id: f.medicine_id,
                dosage_per_day,
                duration,
            })
            .unwrap()
    }

    #[test]
    fn test_fefo_selects_earliest_expiry() {
        let f = setup();
        let early = stock(&f, "JAN", "2025-01-01", 5);
        let late = stock(&f, "JUN", "2025-06-01", 5);
        let prescription = prescribe(&f, 1, 3);

        let record = Dispenser::new(&f.db)
            .as_of(date("2024-12-31"))
            .dispense(&DispenseRequest::remaining(prescription.prescription_id, f.pharmacist_id))
            .unwrap();

        assert_eq!(record.dispense.batch_id, Some(early.batch_id));
        assert_eq!(record.batch_number, "JAN");
        assert_eq!(record.status, PrescriptionStatus::Dispensed);
        assert_eq!(f.db.get_batch(early.batch_id).unwrap().unwrap().stock_qty, 2);
        assert_eq!(f.db.get_batch(late.batch_id).unwrap().unwrap().stock_qty, 5);

        let transactions = f.db.list_transactions_for_batch(early.batch_id).unwrap();
        let last = transactions.last().unwrap();
        assert_eq!(last.transaction_type, TransactionType::Dispense);
        assert_eq!(last.quantity, -3);
        assert_eq!(last.reference_id.as_deref(), Some("Presc-1"));
    }

    #[test]
    fn test_partial_then_full_dispense() {
        let f = setup();
        stock(&f, "B1", "2026-06-01", 100);
        let prescription = prescribe(&f, 3, 10);
        let dispenser = Dispenser::new(&f.db).as_of(date("2025-01-01"));
        let request =
            DispenseRequest::remaining(prescription.prescription_id, f.pharmacist_id).with_quantity(10);

        dispenser.dispense(&request).unwrap();
        let second = dispenser.dispense(&request).unwrap();
        assert_eq!(second.status, PrescriptionStatus::PartiallyDispensed);
        assert_eq!(second.total_dispensed, 20);
        assert_eq!(second.remaining, 10);
        assert_eq!(dispenser.remaining_quantity(prescription.prescription_id).unwrap(), 10);

        let last = dispenser.dispense(&request).unwrap();
        assert_eq!(last.status, PrescriptionStatus::Dispensed);
        assert_eq!(last.remaining, 0);

        let stored = f.db.get_prescription(prescription.prescription_id).unwrap().unwrap();
        assert_eq!(stored.status, PrescriptionStatus::Dispensed);
        assert_eq!(stored.dispensed_by, Some(f.pharmacist_id));
        assert_eq!(stored.dispensed_at, Some(last.dispense.dispensed_at));

        let again = dispenser.dispense(&request);
        assert!(matches!(again, Err(CoreError::InvalidState(_))));
    }

    #[test]
    fn test_over_dispense_rejected() {
        let f = setup();
        stock(&f, "B1", "2026-06-01", 100);
        let prescription = prescribe(&f, 2, 5);

        let result = Dispenser::new(&f.db).as_of(date("2025-01-01")).dispense(
            &DispenseRequest::remaining(prescription.prescription_id, f.pharmacist_id).with_quantity(11),
        );
        assert!(matches!(
            result,
            Err(CoreError::OverDispense {
                requested: 11,
                remaining: 10
            })
        ));
    }

    #[test]
    fn test_insufficient_chosen_batch_leaves_stock() {
        let f = setup();
        let batch = stock(&f, "SMALL", "2026-06-01", 5);
        let prescription = prescribe(&f, 1, 10);

        let result = Dispenser::new(&f.db).as_of(date("2025-01-01")).dispense(
            &DispenseRequest::remaining(prescription.prescription_id, f.pharmacist_id)
                .with_quantity(10)
                .from_batch(batch.batch_id),
        );
        assert!(matches!(
            result,
            Err(CoreError::InsufficientStock {
                available: 5,
                required: 10,
                ..
            })
        ));
        assert_eq!(f.db.get_batch(batch.batch_id).unwrap().unwrap().stock_qty, 5);
        assert!(f.db.list_dispenses(prescription.prescription_id).unwrap().is_empty());
        assert_eq!(
            f.db.get_prescription(prescription.prescription_id).unwrap().unwrap().status,
            PrescriptionStatus::Pending
        );
    }

    #[test]
    fn test_chosen_batch_must_be_eligible() {
        let f = setup();
        let expired = stock(&f, "OLD", "2024-06-01", 50);
        let recalled = stock(&f, "BAD", "2026-06-01", 50);
        InventoryLedger::new(&f.db)
            .recall_batch(recalled.batch_id, "Contamination")
            .unwrap();
        let prescription = prescribe(&f, 1, 5);
        let dispenser = Dispenser::new(&f.db).as_of(date("2025-01-01"));

        for batch_id in [expired.batch_id, recalled.batch_id] {
            let result = dispenser.dispense(
                &DispenseRequest::remaining(prescription.prescription_id, f.pharmacist_id)
                    .from_batch(batch_id),
            );
            assert!(matches!(result, Err(CoreError::IneligibleBatch { .. })));
        }

        let none = dispenser.dispense(&DispenseRequest::remaining(
            prescription.prescription_id,
            f.pharmacist_id,
        ));
        assert!(matches!(none, Err(CoreError::NoEligibleBatch { .. })));
    }

    #[test]
    fn test_pharmacist_role_enforced() {
        let f = setup();
        stock(&f, "B1", "2026-06-01", 10);
        let prescription = prescribe(&f, 1, 2);
        let request = DispenseRequest::remaining(prescription.prescription_id, f.nurse_id);

        let result = Dispenser::new(&f.db).as_of(date("2025-01-01")).dispense(&request);
        assert!(matches!(result, Err(CoreError::Unauthorized(_))));

        let relaxed = setup_with(CoreConfig {
            require_pharmacist: false,
            ..CoreConfig::default()
        });
        stock(&relaxed, "B1", "2026-06-01", 10);
        let prescription = prescribe(&relaxed, 1, 2);
        let request = DispenseRequest::remaining(prescription.prescription_id, relaxed.nurse_id);
        assert!(Dispenser::new(&relaxed.db)
            .as_of(date("2025-01-01"))
            .dispense(&request)
            .is_ok());
    }

    #[test]
    fn test_cancel_only_pending() {
        let f = setup();
        stock(&f, "B1", "2026-06-01", 10);
        let dispenser = Dispenser::new(&f.db).as_of(date("2025-01-01"));

        let untouched = prescribe(&f, 1, 2);
        let cancelled = dispenser.cancel_prescription(untouched.prescription_id).unwrap();
        assert_eq!(cancelled.status, PrescriptionStatus::Cancelled);
        let result = dispenser.dispense(&DispenseRequest::remaining(
            untouched.prescription_id,
            f.pharmacist_id,
        ));
        assert!(matches!(result, Err(CoreError::InvalidState(_))));

        let started = prescribe(&f, 1, 4);
        dispenser
            .dispense(
                &DispenseRequest::remaining(started.prescription_id, f.pharmacist_id).with_quantity(1),
            )
            .unwrap();
        assert!(matches!(
            dispenser.cancel_prescription(started.prescription_id),
            Err(CoreError::InvalidState(_))
        ));
        assert!(dispenser.pending_prescriptions().unwrap().is_empty());
    }

    #[test]
    fn test_create_prescription_validates() {
        let f = setup();
        let dispenser = Dispenser::new(&f.db);
        let bad_dose = dispenser.create_prescription(&NewPrescription {
            visit_id: f.visit_id,
            medicine_id: f.medicine_id,
            dosage_per_day: 0,
            duration: 5,
        });
        assert!(matches!(bad_dose, Err(CoreError::InvalidInput(_))));

        let unknown = dispenser.create_prescription(&NewPrescription {
            visit_id: f.visit_id,
            medicine_id: 77,
            dosage_per_day: 1,
            duration: 5,
        });
        assert!(matches!(unknown, Err(CoreError::NotFound(_))));
    }

    #[test]
    fn test_create_prescription_rejects_quantity_overflow() {
        let f = setup();
        let dispenser = Dispenser::new(&f.db);
        let huge = dispenser.create_prescription(&NewPrescription {
            visit_id: f.visit_id,
            medicine_id: f.medicine_id,
            dosage_per_day: 1 << 32,
            duration: 1 << 32,
        });
        assert!(matches!(huge, Err(CoreError::InvalidInput(_))));
        assert!(dispenser.pending_prescriptions().unwrap().is_empty());
    }
}
