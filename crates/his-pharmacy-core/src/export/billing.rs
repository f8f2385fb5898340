//! Bill statements and pending-charge exports for the billing desk.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::billing::{BillManager, BillingAggregator};
use crate::db::Database;
use crate::error::{CoreError, CoreResult};
use crate::models::{Bill, BillItem, BillStatus, PatientPending, ServiceType};

/// A bill with its charge lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillStatement {
    pub metadata: StatementMetadata,
    pub line_items: Vec<StatementLine>,
}

/// Statement header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementMetadata {
    pub bill_id: i64,
    pub visit_id: i64,
    pub patient_id: i64,
    pub patient_name: String,
    pub status: BillStatus,
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub balance_due: Decimal,
    pub created_at: DateTime<Utc>,
    pub exported_at: DateTime<Utc>,
}

/// One charge on a statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementLine {
    pub bill_item_id: i64,
    pub service_type: ServiceType,
    pub service_ref_id: i64,
    pub visit_id: i64,
    pub amount: Decimal,
}

impl From<&BillItem> for StatementLine {
    fn from(item: &BillItem) -> Self {
        Self {
            bill_item_id: item.bill_item_id,
            service_type: item.service.service_type(),
            service_ref_id: item.service.ref_id(),
            visit_id: item.visit_id,
            amount: item.amount,
        }
    }
}

impl BillStatement {
    /// Build a statement for a bill and its items.
    pub fn new(bill: &Bill, items: &[BillItem], patient_id: i64, patient_name: &str) -> Self {
        Self {
            metadata: StatementMetadata {
                bill_id: bill.bill_id,
                visit_id: bill.visit_id,
                patient_id,
                patient_name: patient_name.to_string(),
                status: bill.status,
                total_amount: bill.total_amount,
                paid_amount: bill.paid_amount,
                balance_due: bill.balance_due(),
                created_at: bill.created_at,
                exported_at: Utc::now(),
            },
            line_items: items.iter().map(StatementLine::from).collect(),
        }
    }

    /// Export to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Export to CSV, one row per charge.
    pub fn to_csv(&self) -> String {
        let mut csv = String::new();
        csv.push_str("bill_id,visit_id,patient_id,patient_name,status,service_type,service_ref_id,amount\n");

        for line in &self.line_items {
            csv.push_str(&format!(
                "{},{},{},{},{},{},{},{}\n",
                self.metadata.bill_id,
                line.visit_id,
                self.metadata.patient_id,
                escape_csv(&self.metadata.patient_name),
                self.metadata.status.as_str(),
                line.service_type.as_str(),
                line.service_ref_id,
                line.amount,
            ));
        }

        csv
    }
}

/// Unbilled charges across patients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingChargesExport {
    pub exported_at: DateTime<Utc>,
    pub patients: Vec<PatientPending>,
    pub total_items: usize,
    pub total_amount: Decimal,
}

impl PendingChargesExport {
    /// Wrap aggregator output with export totals.
    pub fn new(patients: Vec<PatientPending>) -> Self {
        let total_items = patients.iter().map(|p| p.items.len()).sum();
        let total_amount = patients.iter().map(|p| p.total_amount).sum();
        Self {
            exported_at: Utc::now(),
            patients,
            total_items,
            total_amount,
        }
    }

    /// Export to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Export to CSV, one row per pending item.
    pub fn to_csv(&self) -> String {
        let mut csv = String::new();
        csv.push_str("patient_id,patient_name,type,id,name,price,date,visit_id\n");

        for patient in &self.patients {
            for item in &patient.items {
                csv.push_str(&format!(
                    "{},{},{},{},{},{},{},{}\n",
                    patient.patient_id,
                    escape_csv(&patient.patient_name),
                    item.service_type.as_str(),
                    item.id,
                    escape_csv(&item.name),
                    item.price,
                    item.date.as_ref().map(NaiveDate::to_string).unwrap_or_default(),
                    item.visit_id,
                ));
            }
        }

        csv
    }
}

/// Statement exporter.
pub struct StatementExporter<'a> {
    db: &'a Database,
}

impl<'a> StatementExporter<'a> {
    /// Create a new exporter.
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Statement of one bill.
    pub fn statement(&self, bill_id: i64) -> CoreResult<BillStatement> {
        let bills = BillManager::new(self.db);
        let bill = bills.bill(bill_id)?;
        let items = bills.items(bill_id)?;

        let visit = self
            .db
            .get_visit(bill.visit_id)?
            .ok_or_else(|| CoreError::NotFound(format!("Visit {}", bill.visit_id)))?;
        let patient = self
            .db
            .get_patient(visit.patient_id)?
            .ok_or_else(|| CoreError::NotFound(format!("Patient {}", visit.patient_id)))?;

        Ok(BillStatement::new(&bill, &items, patient.patient_id, &patient.name))
    }

    /// Pending charges for one patient or all of them.
    pub fn pending_charges(&self, patient_id: Option<i64>) -> CoreResult<PendingChargesExport> {
        let pending = BillingAggregator::new(self.db).pending_items(patient_id)?;
        Ok(PendingChargesExport::new(pending))
    }
}

/// Escape a string for CSV output.
fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PendingItem, ServiceRef};

    fn setup() -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        let patient = db.insert_patient("D'Souza, Maria").unwrap();
        let visit = db
            .insert_visit(patient.patient_id, None, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap())
            .unwrap();
        (db, visit.visit_id)
    }

    #[test]
    fn test_statement_export() {
        let (db, visit_id) = setup();
        let bills = BillManager::new(&db);
        let bill = bills.create_bill(visit_id).unwrap();
        bills
            .add_bill_item(bill.bill_id, ServiceRef::LabTest(11), Decimal::new(10000, 2))
            .unwrap();
        bills
            .add_bill_item(bill.bill_id, ServiceRef::Bed(3), Decimal::new(25050, 2))
            .unwrap();

        let statement = StatementExporter::new(&db).statement(bill.bill_id).unwrap();
        assert_eq!(statement.metadata.total_amount, Decimal::new(35050, 2));
        assert_eq!(statement.metadata.balance_due, Decimal::new(35050, 2));
        assert_eq!(statement.line_items.len(), 2);

        let csv = statement.to_csv();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3); // Header + 2 items
        assert!(lines[1].contains("\"D'Souza, Maria\""));
        assert!(lines[1].contains("LAB_TEST,11,100.00"));
        assert!(lines[2].contains("BED,3,250.50"));

        let json = statement.to_json().unwrap();
        assert!(json.contains("\"BED\""));
        assert!(json.contains("\"balance_due\": \"350.50\""));
    }

    #[test]
    fn test_missing_bill() {
        let (db, _) = setup();
        assert!(matches!(
            StatementExporter::new(&db).statement(7),
            Err(CoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_pending_charges_csv() {
        let export = PendingChargesExport::new(vec![PatientPending {
            patient_id: 1,
            patient_name: "Asha".into(),
            items: vec![PendingItem {
                service_type: ServiceType::Pharmacy,
                id: 5,
                name: "Paracetamol, 500mg (x10)".into(),
                price: Decimal::new(2500, 2),
                date: NaiveDate::from_ymd_opt(2024, 2, 1),
                visit_id: 2,
            }],
            total_amount: Decimal::new(2500, 2),
        }]);

        assert_eq!(export.total_items, 1);
        assert_eq!(export.total_amount, Decimal::new(2500, 2));
        let csv = export.to_csv();
        assert!(csv.contains("1,Asha,PHARMACY,5,\"Paracetamol, 500mg (x10)\",25.00,2024-02-01,2"));
    }

    #[test]
    fn test_csv_escaping() {
        assert_eq!(escape_csv("simple"), "simple");
        assert_eq!(escape_csv("with,comma"), "\"with,comma\"");
        assert_eq!(escape_csv("with\"quote"), "\"with\"\"quote\"");
    }
}
