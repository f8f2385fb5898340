//! Prescription and dispense database operations.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;

use super::{enum_column, optional_decimal_column, Database, DbResult, PatientRecord};
use crate::models::{NewPrescription, Prescription, PrescriptionDispense, PrescriptionStatus};

const PRESCRIPTION_COLUMNS: &str = r#"
    r.prescription_id, r.visit_id, r.medicine_id, r.dosage_per_day, r.duration,
    r.status, r.created_at, r.dispensed_at, r.dispensed_by
"#;

/// A prescription with the names billing shows for it.
#[derive(Debug, Clone, PartialEq)]
pub struct PrescriptionCharge {
    pub prescription: Prescription,
    pub medicine_name: String,
    pub visit_date: NaiveDate,
}

/// One dispense line priced at its batch. `unit_price` is `None` for legacy rows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispenseLine {
    pub quantity: i64,
    pub unit_price: Option<Decimal>,
}

impl Database {
    /// Get a prescription by ID.
    pub fn get_prescription(&self, prescription_id: i64) -> DbResult<Option<Prescription>> {
        select_prescription(&self.conn, prescription_id)
    }

    /// Prescriptions still awaiting their first dispense, newest first.
    pub fn list_pending_prescriptions(&self) -> DbResult<Vec<Prescription>> {
        let sql = format!(
            "SELECT {} FROM prescriptions r WHERE r.status = 'PENDING' ORDER BY r.created_at DESC, r.prescription_id DESC",
            PRESCRIPTION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], prescription_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Dispense events of a prescription, oldest first.
    pub fn list_dispenses(&self, prescription_id: i64) -> DbResult<Vec<PrescriptionDispense>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT dispense_id, prescription_id, medicine_id, batch_id, quantity_dispensed,
                   dispensed_by, dispensed_at, notes
            FROM prescription_dispenses
            WHERE prescription_id = ?
            ORDER BY dispense_id
            "#,
        )?;
        let rows = stmt.query_map([prescription_id], |row| {
            Ok(PrescriptionDispense {
                dispense_id: row.get(0)?,
                prescription_id: row.get(1)?,
                medicine_id: row.get(2)?,
                batch_id: row.get(3)?,
                quantity_dispensed: row.get(4)?,
                dispensed_by: row.get(5)?,
                dispensed_at: row.get(6)?,
                notes: row.get(7)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Total units issued against a prescription.
    pub fn total_dispensed(&self, prescription_id: i64) -> DbResult<i64> {
        sum_dispensed(&self.conn, prescription_id)
    }

    /// Non-cancelled prescriptions with patient, medicine and visit date, oldest first.
    pub fn list_billable_prescriptions(
        &self,
        patient_id: Option<i64>,
    ) -> DbResult<Vec<PatientRecord<PrescriptionCharge>>> {
        let sql = format!(
            r#"
            SELECT {}, v.patient_id, p.name, m.name, v.visit_date
            FROM prescriptions r
            JOIN visits v ON v.visit_id = r.visit_id
            JOIN patients p ON p.patient_id = v.patient_id
            JOIN medicines m ON m.medicine_id = r.medicine_id
            WHERE r.status != 'CANCELLED'
              AND (?1 IS NULL OR v.patient_id = ?1)
            ORDER BY r.prescription_id
            "#,
            PRESCRIPTION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([patient_id], |row| {
            Ok(PatientRecord {
                patient_id: row.get(9)?,
                patient_name: row.get(10)?,
                record: PrescriptionCharge {
                    prescription: prescription_from_row(row)?,
                    medicine_name: row.get(11)?,
                    visit_date: row.get(12)?,
                },
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Dispense quantities of a prescription with the unit price of the batch each came from.
    pub fn list_dispense_lines(&self, prescription_id: i64) -> DbResult<Vec<DispenseLine>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT d.quantity_dispensed, b.unit_price
            FROM prescription_dispenses d
            LEFT JOIN medicine_batches b ON b.batch_id = d.batch_id
            WHERE d.prescription_id = ?
            ORDER BY d.dispense_id
            "#,
        )?;
        let rows = stmt.query_map([prescription_id], |row| {
            Ok(DispenseLine {
                quantity: row.get(0)?,
                unit_price: optional_decimal_column(row, 1)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

pub(crate) fn insert_prescription(
    conn: &Connection,
    prescription: &NewPrescription,
) -> DbResult<Prescription> {
    let created_at = Utc::now();
    conn.execute(
        r#"
        INSERT INTO prescriptions (visit_id, medicine_id, dosage_per_day, duration, status, created_at)
        VALUES (?1, ?2, ?3, ?4, 'PENDING', ?5)
        "#,
        params![
            prescription.visit_id,
            prescription.medicine_id,
            prescription.dosage_per_day,
            prescription.duration,
            created_at,
        ],
    )?;
    Ok(Prescription {
        prescription_id: conn.last_insert_rowid(),
        visit_id: prescription.visit_id,
        medicine_id: prescription.medicine_id,
        dosage_per_day: prescription.dosage_per_day,
        duration: prescription.duration,
        status: PrescriptionStatus::Pending,
        created_at,
        dispensed_at: None,
        dispensed_by: None,
    })
}

pub(crate) fn select_prescription(
    conn: &Connection,
    prescription_id: i64,
) -> DbResult<Option<Prescription>> {
    let sql = format!(
        "SELECT {} FROM prescriptions r WHERE r.prescription_id = ?",
        PRESCRIPTION_COLUMNS
    );
    conn.query_row(&sql, [prescription_id], prescription_from_row)
        .optional()
        .map_err(Into::into)
}

pub(crate) fn sum_dispensed(conn: &Connection, prescription_id: i64) -> DbResult<i64> {
    let total: i64 = conn.query_row(
        "SELECT COALESCE(SUM(quantity_dispensed), 0) FROM prescription_dispenses WHERE prescription_id = ?",
        [prescription_id],
        |row| row.get(0),
    )?;
    Ok(total)
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn insert_dispense(
    conn: &Connection,
    prescription_id: i64,
    medicine_id: i64,
    batch_id: Option<i64>,
    quantity: i64,
    dispensed_by: i64,
    dispensed_at: DateTime<Utc>,
    notes: Option<&str>,
) -> DbResult<PrescriptionDispense> {
    conn.execute(
        r#"
        INSERT INTO prescription_dispenses (
            prescription_id, medicine_id, batch_id, quantity_dispensed,
            dispensed_by, dispensed_at, notes
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
        params![
            prescription_id,
            medicine_id,
            batch_id,
            quantity,
            dispensed_by,
            dispensed_at,
            notes,
        ],
    )?;
    Ok(PrescriptionDispense {
        dispense_id: conn.last_insert_rowid(),
        prescription_id,
        medicine_id,
        batch_id,
        quantity_dispensed: quantity,
        dispensed_by,
        dispensed_at,
        notes: notes.map(str::to_string),
    })
}

/// Record the latest dispense event on the prescription.
pub(crate) fn mark_prescription_dispensed(
    conn: &Connection,
    prescription_id: i64,
    status: PrescriptionStatus,
    dispensed_at: DateTime<Utc>,
    dispensed_by: i64,
) -> DbResult<bool> {
    let rows_affected = conn.execute(
        "UPDATE prescriptions SET status = ?1, dispensed_at = ?2, dispensed_by = ?3 WHERE prescription_id = ?4",
        params![status.as_str(), dispensed_at, dispensed_by, prescription_id],
    )?;
    Ok(rows_affected > 0)
}

pub(crate) fn set_prescription_status(
    conn: &Connection,
    prescription_id: i64,
    status: PrescriptionStatus,
) -> DbResult<bool> {
    let rows_affected = conn.execute(
        "UPDATE prescriptions SET status = ?1 WHERE prescription_id = ?2",
        params![status.as_str(), prescription_id],
    )?;
    Ok(rows_affected > 0)
}

fn prescription_from_row(row: &Row<'_>) -> rusqlite::Result<Prescription> {
    Ok(Prescription {
        prescription_id: row.get(0)?,
        visit_id: row.get(1)?,
        medicine_id: row.get(2)?,
        dosage_per_day: row.get(3)?,
        duration: row.get(4)?,
        status: enum_column(row, 5, PrescriptionStatus::parse)?,
        created_at: row.get(6)?,
        dispensed_at: row.get(7)?,
        dispensed_by: row.get(8)?,
    })
}
