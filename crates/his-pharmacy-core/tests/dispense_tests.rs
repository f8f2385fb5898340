//! Dispensing integration tests.

use std::sync::{Arc, Barrier};
use std::thread;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use his_pharmacy_core::db::Database;
use his_pharmacy_core::models::{
    DispenseRequest, NewMedicine, NewPrescription, PrescriptionStatus, StaffRole, StockReceipt,
    TransactionType,
};
use his_pharmacy_core::{CoreError, Dispenser, InventoryLedger};

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

struct Pharmacy {
    visit_id: i64,
    medicine_id: i64,
    pharmacist_id: i64,
}

fn seed(db: &Database) -> Pharmacy {
    let patient = db.insert_patient("Kavya Iyer").unwrap();
    let pharmacist = db
        .insert_staff("Suresh", StaffRole::Pharmacist, None)
        .unwrap();
    let visit = db
        .insert_visit(patient.patient_id, None, date("2025-03-01"))
        .unwrap();
    let medicine = InventoryLedger::new(db)
        .create_medicine(&NewMedicine::named("Amoxicillin 500mg"))
        .unwrap();
    Pharmacy {
        visit_id: visit.visit_id,
        medicine_id: medicine.medicine_id,
        pharmacist_id: pharmacist.staff_id,
    }
}

fn receive(db: &Database, p: &Pharmacy, number: &str, expiry: &str, qty: i64) -> i64 {
    InventoryLedger::new(db)
        .receive(&StockReceipt {
            medicine_id: p.medicine_id,
            batch_number: number.to_string(),
            expiry_date: date(expiry),
            received_qty: qty,
            purchase_price: Decimal::new(150, 2),
            unit_price: Decimal::new(300, 2),
            received_by: p.pharmacist_id,
            reference: Some(format!("GRN-{}", number)),
        })
        .unwrap()
        .batch_id
}

fn prescribe(db: &Database, p: &Pharmacy, dosage_per_day: i64, duration: i64) -> i64 {
    Dispenser::new(db)
        .create_prescription(&NewPrescription {
            visit_id: p.visit_id,
            medicine_id: p.medicine_id,
            dosage_per_day,
            duration,
        })
        .unwrap()
        .prescription_id
}

#[test]
fn test_fefo_skips_expired_and_short_batches() {
    let db = Database::open_in_memory().unwrap();
    let p = seed(&db);
    let expired = receive(&db, &p, "OLD", "2025-02-28", 50);
    let short = receive(&db, &p, "SHORT", "2025-04-01", 3);
    let good = receive(&db, &p, "GOOD", "2025-09-01", 40);
    let later = receive(&db, &p, "LATER", "2026-01-01", 40);

    let prescription_id = prescribe(&db, &p, 2, 5);
    let record = Dispenser::new(&db)
        .as_of(date("2025-03-01"))
        .dispense(&DispenseRequest::remaining(prescription_id, p.pharmacist_id))
        .unwrap();

    assert_eq!(record.dispense.batch_id, Some(good));
    assert_eq!(record.dispense.quantity_dispensed, 10);
    assert_eq!(db.get_batch(good).unwrap().unwrap().stock_qty, 30);
    for untouched in [expired, short, later] {
        let batch = db.get_batch(untouched).unwrap().unwrap();
        assert_eq!(batch.stock_qty, batch.received_qty);
    }
}

#[test]
fn test_no_eligible_batch_leaves_no_trace() {
    let db = Database::open_in_memory().unwrap();
    let p = seed(&db);
    let batch_id = receive(&db, &p, "B1", "2025-12-31", 4);
    let prescription_id = prescribe(&db, &p, 1, 5);

    let err = Dispenser::new(&db)
        .as_of(date("2025-03-01"))
        .dispense(&DispenseRequest::remaining(prescription_id, p.pharmacist_id))
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::NoEligibleBatch { quantity: 5, .. }
    ));

    assert_eq!(db.get_batch(batch_id).unwrap().unwrap().stock_qty, 4);
    assert!(db.list_dispenses(prescription_id).unwrap().is_empty());
    assert_eq!(db.list_transactions_for_batch(batch_id).unwrap().len(), 1);
    let prescription = db.get_prescription(prescription_id).unwrap().unwrap();
    assert_eq!(prescription.status, PrescriptionStatus::Pending);
}

#[test]
fn test_split_dispense_across_batches() {
    let db = Database::open_in_memory().unwrap();
    let p = seed(&db);
    let first = receive(&db, &p, "A", "2025-06-01", 6);
    let second = receive(&db, &p, "B", "2025-08-01", 20);
    let prescription_id = prescribe(&db, &p, 2, 7);
    let dispenser = Dispenser::new(&db).as_of(date("2025-03-01"));

    // The earliest batch cannot cover all 14 units, so the counter splits by hand
    let partial = dispenser
        .dispense(
            &DispenseRequest::remaining(prescription_id, p.pharmacist_id)
                .with_quantity(6)
                .from_batch(first),
        )
        .unwrap();
    assert_eq!(partial.status, PrescriptionStatus::PartiallyDispensed);
    assert_eq!(partial.remaining, 8);

    let rest = dispenser
        .dispense(&DispenseRequest::remaining(prescription_id, p.pharmacist_id))
        .unwrap();
    assert_eq!(rest.dispense.batch_id, Some(second));
    assert_eq!(rest.status, PrescriptionStatus::Dispensed);
    assert_eq!(db.total_dispensed(prescription_id).unwrap(), 14);

    let err = dispenser
        .dispense(&DispenseRequest::remaining(prescription_id, p.pharmacist_id).with_quantity(1))
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidState(_)));
}

#[test]
fn test_recall_traces_dispensed_patients() {
    let db = Database::open_in_memory().unwrap();
    let p = seed(&db);
    let batch_id = receive(&db, &p, "R-77", "2026-01-01", 30);
    let prescription_id = prescribe(&db, &p, 1, 10);
    Dispenser::new(&db)
        .as_of(date("2025-03-01"))
        .dispense(&DispenseRequest::remaining(prescription_id, p.pharmacist_id))
        .unwrap();

    let ledger = InventoryLedger::new(&db);
    let recalled = ledger.recall_batch(batch_id, "Contamination notice").unwrap();
    assert!(recalled.is_recalled);

    let trace = ledger.batch_traceability(batch_id).unwrap();
    assert_eq!(trace.batch_number, "R-77");
    assert_eq!(trace.patients_affected.len(), 1);
    assert_eq!(trace.patients_affected[0].patient_name, "Kavya Iyer");
    assert_eq!(trace.patients_affected[0].quantity, 10);

    // Recalled stock is invisible to FEFO
    let next = prescribe(&db, &p, 1, 1);
    let err = Dispenser::new(&db)
        .as_of(date("2025-03-01"))
        .dispense(&DispenseRequest::remaining(next, p.pharmacist_id))
        .unwrap_err();
    assert!(matches!(err, CoreError::NoEligibleBatch { .. }));
}

#[test]
fn test_ledger_matches_cached_stock_after_dispenses() {
    let db = Database::open_in_memory().unwrap();
    let p = seed(&db);
    let batch_id = receive(&db, &p, "L1", "2026-01-01", 25);
    let dispenser = Dispenser::new(&db).as_of(date("2025-03-01"));
    for _ in 0..3 {
        let prescription_id = prescribe(&db, &p, 1, 4);
        dispenser
            .dispense(&DispenseRequest::remaining(prescription_id, p.pharmacist_id))
            .unwrap();
    }

    let ledger = InventoryLedger::new(&db);
    assert!(ledger.verify_batch_ledger(batch_id).unwrap());
    assert_eq!(db.ledger_balance(batch_id).unwrap(), 13);

    let transactions = ledger.transactions_for_batch(batch_id).unwrap();
    assert_eq!(transactions[0].transaction_type, TransactionType::Purchase);
    assert!(transactions[1..]
        .iter()
        .all(|t| t.transaction_type == TransactionType::Dispense && t.quantity == -4));
}

#[test]
fn test_concurrent_dispenses_never_oversell() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pharmacy.db");

    const WORKERS: usize = 8;
    let (batch_id, pharmacist_id, prescriptions) = {
        let db = Database::open(&path).unwrap();
        let p = seed(&db);
        let batch_id = receive(&db, &p, "RACE", "2099-01-01", 10);
        let prescriptions: Vec<i64> = (0..WORKERS).map(|_| prescribe(&db, &p, 1, 2)).collect();
        (batch_id, p.pharmacist_id, prescriptions)
    };

    let barrier = Arc::new(Barrier::new(WORKERS));
    let handles: Vec<_> = prescriptions
        .into_iter()
        .map(|prescription_id| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let db = Database::open(&path).unwrap();
                barrier.wait();
                Dispenser::new(&db)
                    .dispense(&DispenseRequest::remaining(prescription_id, pharmacist_id))
                    .map(|record| record.dispense.quantity_dispensed)
            })
        })
        .collect();

    let mut dispensed = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.join().unwrap() {
            Ok(quantity) => dispensed += quantity,
            Err(CoreError::NoEligibleBatch { .. }) => rejected += 1,
            Err(other) => panic!("unexpected dispense failure: {}", other),
        }
    }

    assert_eq!(dispensed, 10);
    assert_eq!(rejected, 3);

    let db = Database::open(&path).unwrap();
    let batch = db.get_batch(batch_id).unwrap().unwrap();
    assert_eq!(batch.stock_qty, 0);
    assert!(InventoryLedger::new(&db).verify_batch_ledger(batch_id).unwrap());
}
