//! Pending charge discovery.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use tracing::{debug, warn};

use super::round_money;
use crate::db::{Database, InvestigationKind, PatientRecord};
use crate::error::CoreResult;
use crate::models::{PatientPending, PendingItem, ServiceType};

/// Per-patient accumulator, keyed by patient id for a stable output order.
#[derive(Default)]
struct PendingLedger {
    patients: BTreeMap<i64, PatientPending>,
}

impl PendingLedger {
    fn add<T>(&mut self, owner: &PatientRecord<T>, item: PendingItem) {
        let entry = self
            .patients
            .entry(owner.patient_id)
            .or_insert_with(|| PatientPending {
                patient_id: owner.patient_id,
                patient_name: owner.patient_name.clone(),
                items: Vec::new(),
                total_amount: Decimal::ZERO,
            });
        entry.total_amount += item.price;
        entry.items.push(item);
    }

    fn into_vec(self) -> Vec<PatientPending> {
        self.patients.into_values().collect()
    }
}

/// Billing aggregator.
pub struct BillingAggregator<'a> {
    db: &'a Database,
}

impl<'a> BillingAggregator<'a> {
    /// Create a new aggregator.
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Unbilled charges per patient, for one patient or all of them.
    ///
    /// Read-only: running it twice with no writes in between yields the same result.
    pub fn pending_items(&self, patient_id: Option<i64>) -> CoreResult<Vec<PatientPending>> {
        let mut ledger = PendingLedger::default();

        self.collect_investigations(&mut ledger, InvestigationKind::Lab, patient_id)?;
        self.collect_investigations(&mut ledger, InvestigationKind::Radiology, patient_id)?;
        self.collect_operations(&mut ledger, patient_id)?;
        self.collect_pharmacy(&mut ledger, patient_id)?;
        self.collect_beds(&mut ledger, patient_id)?;
        self.collect_consultations(&mut ledger, patient_id)?;

        let pending = ledger.into_vec();
        debug!(
            patients = pending.len(),
            items = pending.iter().map(|p| p.items.len()).sum::<usize>(),
            "pending charges collected"
        );
        Ok(pending)
    }

    /// Pending charges of a single patient, if any.
    pub fn pending_for_patient(&self, patient_id: i64) -> CoreResult<Option<PatientPending>> {
        Ok(self.pending_items(Some(patient_id))?.into_iter().next())
    }

    fn collect_investigations(
        &self,
        ledger: &mut PendingLedger,
        kind: InvestigationKind,
        patient_id: Option<i64>,
    ) -> CoreResult<()> {
        let service_type = match kind {
            InvestigationKind::Lab => ServiceType::LabTest,
            InvestigationKind::Radiology => ServiceType::RadiologyTest,
        };
        let billed = self.db.billed_ref_ids(service_type)?;

        for test in self.db.list_completed_investigations(kind, patient_id)? {
            if billed.contains(&test.record.id) {
                continue;
            }
            let item = PendingItem {
                service_type,
                id: test.record.id,
                name: test.record.name.clone(),
                price: test.record.price,
                date: test.record.completed_at.map(|at| at.date_naive()),
                visit_id: test.record.visit_id,
            };
            ledger.add(&test, item);
        }
        Ok(())
    }

    fn collect_operations(
        &self,
        ledger: &mut PendingLedger,
        patient_id: Option<i64>,
    ) -> CoreResult<()> {
        let billed_operations = self.db.billed_ref_ids(ServiceType::Operation)?;
        let billed_consumables = self.db.billed_ref_ids(ServiceType::OtConsumable)?;

        for operation in self.db.list_completed_operations(patient_id)? {
            let op = &operation.record;
            if !billed_operations.contains(&op.operation_id) {
                let item = PendingItem {
                    service_type: ServiceType::Operation,
                    id: op.operation_id,
                    name: op.operation_name.clone(),
                    price: op.price,
                    date: op.performed_at.map(|at| at.date_naive()),
                    visit_id: op.visit_id,
                };
                ledger.add(&operation, item);
            }

            let date = op.performed_at.or(op.scheduled_time).map(|at| at.date_naive());
            for consumable in &op.consumables {
                let Some(consumable_id) = consumable.id else {
                    warn!(
                        operation_id = op.operation_id,
                        item = %consumable.item,
                        "consumable without id cannot be tracked for billing"
                    );
                    continue;
                };
                if billed_consumables.contains(&consumable_id) {
                    continue;
                }
                let item = PendingItem {
                    service_type: ServiceType::OtConsumable,
                    id: consumable_id,
                    name: format!("OT Consumable: {}", consumable.item),
                    price: consumable.price,
                    date,
                    visit_id: op.visit_id,
                };
                ledger.add(&operation, item);
            }
        }
        Ok(())
    }

    fn collect_pharmacy(&self, ledger: &mut PendingLedger, patient_id: Option<i64>) -> CoreResult<()> {
        let billed = self.db.billed_ref_ids(ServiceType::Pharmacy)?;

        for charge in self.db.list_billable_prescriptions(patient_id)? {
            let prescription = &charge.record.prescription;
            if billed.contains(&prescription.prescription_id) {
                continue;
            }
            let price = self.pharmacy_cost(
                prescription.prescription_id,
                prescription.medicine_id,
                prescription.quantity(),
            )?;
            let item = PendingItem {
                service_type: ServiceType::Pharmacy,
                id: prescription.prescription_id,
                name: format!("{} (x{})", charge.record.medicine_name, prescription.quantity()),
                price,
                date: Some(charge.record.visit_date),
                visit_id: prescription.visit_id,
            };
            ledger.add(&charge, item);
        }
        Ok(())
    }

    /// Dispensed units at their batch price; before any dispense, the prescribed
    /// quantity at the average price of in-stock batches; zero without stock.
    fn pharmacy_cost(&self, prescription_id: i64, medicine_id: i64, quantity: i64) -> CoreResult<Decimal> {
        let lines = self.db.list_dispense_lines(prescription_id)?;
        if !lines.is_empty() {
            // Legacy dispenses without a batch carry no price
            let cost = lines
                .iter()
                .map(|line| Decimal::from(line.quantity) * line.unit_price.unwrap_or(Decimal::ZERO))
                .sum();
            return Ok(cost);
        }

        let prices = self.db.list_in_stock_unit_prices(medicine_id)?;
        if prices.is_empty() {
            return Ok(Decimal::ZERO);
        }
        let average = prices.iter().copied().sum::<Decimal>() / Decimal::from(prices.len());
        Ok(round_money(
            Decimal::from(quantity) * average,
            self.db.config().money_scale,
        ))
    }

    fn collect_beds(&self, ledger: &mut PendingLedger, patient_id: Option<i64>) -> CoreResult<()> {
        let billed = self.db.billed_ref_ids(ServiceType::Bed)?;

        for admission in self.db.list_discharged_admissions(patient_id)? {
            let adm = &admission.record;
            if billed.contains(&adm.admission_id) {
                continue;
            }
            let Some(days) = adm.billable_days() else {
                continue;
            };
            let item = PendingItem {
                service_type: ServiceType::Bed,
                id: adm.admission_id,
                name: format!("Bed Charge ({} days)", days),
                price: round_money(
                    Decimal::from(days) * adm.bed_price,
                    self.db.config().money_scale,
                ),
                date: adm.discharge_date.map(|at| at.date_naive()),
                visit_id: adm.visit_id,
            };
            ledger.add(&admission, item);
        }
        Ok(())
    }

    fn collect_consultations(
        &self,
        ledger: &mut PendingLedger,
        patient_id: Option<i64>,
    ) -> CoreResult<()> {
        let billed = self.db.billed_ref_ids(ServiceType::Consultation)?;

        for visit in self.db.list_fee_bearing_visits(patient_id)? {
            let consultation = &visit.record;
            if billed.contains(&consultation.visit.visit_id) || consultation.fee <= Decimal::ZERO {
                continue;
            }
            let item = PendingItem {
                service_type: ServiceType::Consultation,
                id: consultation.visit.visit_id,
                name: format!("Dr. {} Consultation", consultation.doctor_name),
                price: consultation.fee,
                date: Some(consultation.visit.visit_date),
                visit_id: consultation.visit.visit_id,
            };
            ledger.add(&visit, item);
        }
        Ok(())
    }
}
