//! Billing reconciliation integration tests.

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;

use his_pharmacy_core::db::{Database, InvestigationKind};
use his_pharmacy_core::models::{
    BillStatus, Consumable, DispenseRequest, NewMedicine, NewPrescription, ServiceRef,
    ServiceStatus, ServiceType, StaffRole, StockReceipt,
};
use his_pharmacy_core::{
    BillManager, BillingAggregator, CoreError, Dispenser, InventoryLedger, StatementExporter,
};

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

struct Ward {
    db: Database,
    patient_id: i64,
    visit_id: i64,
}

/// One visit touching every billable service.
fn ward_with_services() -> Ward {
    let db = Database::open_in_memory().unwrap();
    let patient = db.insert_patient("Arjun Menon").unwrap();
    let doctor = db
        .insert_staff("Rao", StaffRole::Doctor, Some(Decimal::new(500, 0)))
        .unwrap();
    let pharmacist = db
        .insert_staff("Suresh", StaffRole::Pharmacist, None)
        .unwrap();
    let visit = db
        .insert_visit(patient.patient_id, Some(doctor.staff_id), date("2025-03-01"))
        .unwrap();

    let lab = db
        .insert_investigation(InvestigationKind::Lab, visit.visit_id, "CBC", Decimal::new(10000, 2))
        .unwrap();
    db.update_investigation_status(InvestigationKind::Lab, lab.id, ServiceStatus::Completed, None)
        .unwrap();
    // Still ordered, not billable
    db.insert_investigation(
        InvestigationKind::Radiology,
        visit.visit_id,
        "Chest X-Ray",
        Decimal::new(80000, 2),
    )
    .unwrap();

    let operation = db
        .insert_operation(visit.visit_id, "Appendectomy", Decimal::new(20000, 0), None)
        .unwrap();
    db.set_operation_consumables(
        operation.operation_id,
        &[
            Consumable {
                id: Some(1_740_000_000_001),
                item: "Surgical gauze".into(),
                price: Decimal::new(5000, 2),
            },
            Consumable {
                id: None,
                item: "Untracked swab".into(),
                price: Decimal::new(1000, 2),
            },
        ],
    )
    .unwrap();
    db.update_operation_status(operation.operation_id, ServiceStatus::Completed, None)
        .unwrap();

    let admitted = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
    let admission = db
        .insert_admission(visit.visit_id, admitted, Decimal::new(1500, 0))
        .unwrap();
    db.discharge_admission(admission.admission_id, admitted + Duration::hours(80))
        .unwrap();

    let ledger = InventoryLedger::new(&db);
    let medicine = ledger
        .create_medicine(&NewMedicine::named("Pantoprazole 40mg"))
        .unwrap();
    ledger
        .receive(&StockReceipt {
            medicine_id: medicine.medicine_id,
            batch_number: "PX-1".into(),
            expiry_date: date("2026-06-30"),
            received_qty: 100,
            purchase_price: Decimal::new(120, 2),
            unit_price: Decimal::new(250, 2),
            received_by: pharmacist.staff_id,
            reference: None,
        })
        .unwrap();
    let dispenser = Dispenser::new(&db).as_of(date("2025-03-01"));
    let prescription = dispenser
        .create_prescription(&NewPrescription {
            visit_id: visit.visit_id,
            medicine_id: medicine.medicine_id,
            dosage_per_day: 2,
            duration: 5,
        })
        .unwrap();
    dispenser
        .dispense(&DispenseRequest::remaining(
            prescription.prescription_id,
            pharmacist.staff_id,
        ))
        .unwrap();

    Ward {
        db,
        patient_id: patient.patient_id,
        visit_id: visit.visit_id,
    }
}

#[test]
fn test_pending_items_cover_every_service() {
    let ward = ward_with_services();
    let pending = BillingAggregator::new(&ward.db)
        .pending_items(Some(ward.patient_id))
        .unwrap();

    assert_eq!(pending.len(), 1);
    let patient = &pending[0];
    assert_eq!(patient.patient_name, "Arjun Menon");

    let summary: Vec<(ServiceType, &str, Decimal)> = patient
        .items
        .iter()
        .map(|item| (item.service_type, item.name.as_str(), item.price))
        .collect();
    assert_eq!(
        summary,
        vec![
            (ServiceType::LabTest, "CBC", Decimal::new(100, 0)),
            (ServiceType::Operation, "Appendectomy", Decimal::new(20000, 0)),
            (
                ServiceType::OtConsumable,
                "OT Consumable: Surgical gauze",
                Decimal::new(50, 0)
            ),
            (ServiceType::Pharmacy, "Pantoprazole 40mg (x10)", Decimal::new(25, 0)),
            (ServiceType::Bed, "Bed Charge (3 days)", Decimal::new(4500, 0)),
            (ServiceType::Consultation, "Dr. Rao Consultation", Decimal::new(500, 0)),
        ]
    );
    assert_eq!(patient.total_amount, Decimal::new(25175, 0));
}

#[test]
fn test_completed_radiology_becomes_pending() {
    let ward = ward_with_services();
    let aggregator = BillingAggregator::new(&ward.db);
    ward.db
        .update_investigation_status(InvestigationKind::Radiology, 1, ServiceStatus::Completed, None)
        .unwrap();

    let pending = aggregator.pending_for_patient(ward.patient_id).unwrap().unwrap();
    let types: Vec<ServiceType> = pending.items.iter().map(|item| item.service_type).collect();
    assert_eq!(&types[..3], &[ServiceType::LabTest, ServiceType::RadiologyTest, ServiceType::Operation]);
    let scan = &pending.items[1];
    assert_eq!(scan.name, "Chest X-Ray");
    assert_eq!(scan.price, Decimal::new(800, 0));
    assert_eq!(scan.visit_id, ward.visit_id);
    assert_eq!(pending.total_amount, Decimal::new(25975, 0));
}

#[test]
fn test_pending_items_repeatable_without_writes() {
    let ward = ward_with_services();
    let aggregator = BillingAggregator::new(&ward.db);

    let first = serde_json::to_string(&aggregator.pending_items(None).unwrap()).unwrap();
    let second = serde_json::to_string(&aggregator.pending_items(None).unwrap()).unwrap();
    assert_eq!(first, second);

    // Billing one item changes the result, and it is stable again afterwards
    let bills = BillManager::new(&ward.db);
    let bill = bills.create_bill(ward.visit_id).unwrap();
    bills
        .add_bill_item(bill.bill_id, ServiceRef::LabTest(1), Decimal::new(100, 0))
        .unwrap();
    let third = serde_json::to_string(&aggregator.pending_items(None).unwrap()).unwrap();
    assert_ne!(first, third);
    let fourth = serde_json::to_string(&aggregator.pending_items(None).unwrap()).unwrap();
    assert_eq!(third, fourth);
}

#[test]
fn test_cancelled_bill_releases_charges() {
    let ward = ward_with_services();
    let aggregator = BillingAggregator::new(&ward.db);
    let bills = BillManager::new(&ward.db);

    let bill = bills.create_bill(ward.visit_id).unwrap();
    bills
        .add_bill_item(bill.bill_id, ServiceRef::Bed(1), Decimal::new(4500, 0))
        .unwrap();
    bills.cancel_bill(bill.bill_id).unwrap();

    let pending = aggregator.pending_for_patient(ward.patient_id).unwrap().unwrap();
    let bed = pending
        .items
        .iter()
        .find(|item| item.service() == ServiceRef::Bed(1))
        .unwrap();

    let replacement = bills.create_bill(ward.visit_id).unwrap();
    bills.bill_pending_item(replacement.bill_id, bed).unwrap();
    assert_eq!(
        bills.bill(replacement.bill_id).unwrap().total_amount,
        Decimal::new(4500, 0)
    );
}

#[test]
fn test_full_billing_cycle() {
    let ward = ward_with_services();
    let aggregator = BillingAggregator::new(&ward.db);
    let bills = BillManager::new(&ward.db);

    let bill = bills.create_bill(ward.visit_id).unwrap();
    assert_eq!(bill.status, BillStatus::Draft);

    let pending = aggregator.pending_for_patient(ward.patient_id).unwrap().unwrap();
    for item in &pending.items {
        bills.bill_pending_item(bill.bill_id, item).unwrap();
    }
    assert!(aggregator.pending_for_patient(ward.patient_id).unwrap().is_none());

    let bill = bills.finalize_bill(bill.bill_id).unwrap();
    assert_eq!(bill.status, BillStatus::NotPaid);
    assert_eq!(bill.total_amount, Decimal::new(25175, 0));

    let bill = bills
        .record_payment(bill.bill_id, Decimal::new(10000, 0))
        .unwrap();
    assert_eq!(bill.status, BillStatus::PartiallyPaid);
    assert_eq!(bill.balance_due(), Decimal::new(15175, 0));

    let bill = bills
        .record_payment(bill.bill_id, Decimal::new(15175, 0))
        .unwrap();
    assert_eq!(bill.status, BillStatus::Paid);
    assert_eq!(bill.balance_due(), Decimal::ZERO);

    let statement = StatementExporter::new(&ward.db)
        .statement(bill.bill_id)
        .unwrap();
    assert_eq!(statement.line_items.len(), 6);
    assert_eq!(statement.metadata.patient_name, "Arjun Menon");
}

#[test]
fn test_service_billed_at_most_once() {
    let ward = ward_with_services();
    let bills = BillManager::new(&ward.db);
    let bill = bills.create_bill(ward.visit_id).unwrap();

    bills
        .add_bill_item(bill.bill_id, ServiceRef::Consultation(ward.visit_id), Decimal::new(500, 0))
        .unwrap();
    let err = bills
        .add_bill_item(bill.bill_id, ServiceRef::Consultation(ward.visit_id), Decimal::new(450, 0))
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::DuplicateBillItem {
            service: ServiceRef::Consultation(_)
        }
    ));

    // The failed insert left the total alone
    assert_eq!(bills.bill(bill.bill_id).unwrap().total_amount, Decimal::new(500, 0));

    // A second bill for the same visit is refused
    assert!(matches!(
        bills.create_bill(ward.visit_id),
        Err(CoreError::InvalidState(_))
    ));
}

#[test]
fn test_deleted_item_becomes_pending_again() {
    let ward = ward_with_services();
    let aggregator = BillingAggregator::new(&ward.db);
    let bills = BillManager::new(&ward.db);
    let bill = bills.create_bill(ward.visit_id).unwrap();

    let bed = bills
        .add_bill_item(bill.bill_id, ServiceRef::Bed(1), Decimal::new(4500, 0))
        .unwrap();
    let still_pending = aggregator.pending_for_patient(ward.patient_id).unwrap().unwrap();
    assert!(still_pending
        .items
        .iter()
        .all(|item| item.service_type != ServiceType::Bed));

    let bill = bills.delete_bill_item(bed.bill_item_id).unwrap();
    assert_eq!(bill.total_amount, Decimal::ZERO);

    let pending = aggregator.pending_for_patient(ward.patient_id).unwrap().unwrap();
    assert!(pending
        .items
        .iter()
        .any(|item| item.service() == ServiceRef::Bed(1)));
}

#[test]
fn test_paid_bill_reopens_when_item_added() {
    let ward = ward_with_services();
    let bills = BillManager::new(&ward.db);
    let bill = bills.create_bill(ward.visit_id).unwrap();
    bills
        .add_bill_item(bill.bill_id, ServiceRef::LabTest(1), Decimal::new(100, 0))
        .unwrap();
    bills.finalize_bill(bill.bill_id).unwrap();
    let bill = bills.record_payment(bill.bill_id, Decimal::new(100, 0)).unwrap();
    assert_eq!(bill.status, BillStatus::Paid);

    bills
        .add_bill_item(bill.bill_id, ServiceRef::Bed(1), Decimal::new(4500, 0))
        .unwrap();
    let bill = bills.bill(bill.bill_id).unwrap();
    assert_eq!(bill.status, BillStatus::PartiallyPaid);
    assert_eq!(bill.balance_due(), Decimal::new(4500, 0));
}

#[test]
fn test_pending_export_csv() {
    let ward = ward_with_services();
    let export = StatementExporter::new(&ward.db).pending_charges(None).unwrap();
    assert_eq!(export.total_items, 6);
    assert_eq!(export.total_amount, Decimal::new(25175, 0));

    let csv = export.to_csv();
    assert_eq!(csv.lines().count(), 7);
    assert!(csv.contains("CONSULTATION"));
    assert!(csv.contains("Bed Charge (3 days)"));
}
