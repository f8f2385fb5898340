//! Clinical collaborator records.
//!
//! Patients, staff, visits and the completed services that feed billing are owned by
//! other subsystems. These functions are the narrow write surface those subsystems use
//! and the read queries the billing aggregator runs.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension, Row};
use rust_decimal::Decimal;

use super::{decimal_column, enum_column, optional_decimal_column, Database, DbError, DbResult};
use crate::models::{
    Admission, Consumable, Investigation, Operation, Patient, ServiceStatus, Staff, StaffRole,
    Visit, VisitStatus,
};

/// Which investigation table a record lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvestigationKind {
    Lab,
    Radiology,
}

impl InvestigationKind {
    fn table(&self) -> &'static str {
        match self {
            InvestigationKind::Lab => "lab_tests",
            InvestigationKind::Radiology => "radiology_tests",
        }
    }

    fn id_column(&self) -> &'static str {
        match self {
            InvestigationKind::Lab => "lab_test_id",
            InvestigationKind::Radiology => "radiology_test_id",
        }
    }

    fn name_column(&self) -> &'static str {
        match self {
            InvestigationKind::Lab => "test_name",
            InvestigationKind::Radiology => "scan_type",
        }
    }
}

/// A clinical record together with the patient it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct PatientRecord<T> {
    pub patient_id: i64,
    pub patient_name: String,
    pub record: T,
}

/// A visit whose doctor charges a consultation fee.
#[derive(Debug, Clone, PartialEq)]
pub struct Consultation {
    pub visit: Visit,
    pub doctor_name: String,
    pub fee: Decimal,
}

impl Database {
    // =========================================================================
    // Patients and staff
    // =========================================================================

    /// Register a patient.
    pub fn insert_patient(&self, name: &str) -> DbResult<Patient> {
        let created_at = Utc::now();
        self.conn.execute(
            "INSERT INTO patients (name, created_at) VALUES (?1, ?2)",
            params![name, created_at],
        )?;
        Ok(Patient {
            patient_id: self.conn.last_insert_rowid(),
            name: name.to_string(),
            created_at,
        })
    }

    /// Get a patient by ID.
    pub fn get_patient(&self, patient_id: i64) -> DbResult<Option<Patient>> {
        self.conn
            .query_row(
                "SELECT patient_id, name, created_at FROM patients WHERE patient_id = ?",
                [patient_id],
                |row| {
                    Ok(Patient {
                        patient_id: row.get(0)?,
                        name: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    /// Register a staff member. Only doctors may carry a consultation fee.
    pub fn insert_staff(&self, name: &str, role: StaffRole, fee: Option<Decimal>) -> DbResult<Staff> {
        if fee.is_some() && role != StaffRole::Doctor {
            return Err(DbError::Constraint("Only doctors can have a fee".into()));
        }
        self.conn.execute(
            "INSERT INTO staff (name, role, fee) VALUES (?1, ?2, ?3)",
            params![name, role.as_str(), fee.map(|f| f.to_string())],
        )?;
        Ok(Staff {
            staff_id: self.conn.last_insert_rowid(),
            name: name.to_string(),
            role,
            fee,
        })
    }

    /// Get a staff member by ID.
    pub fn get_staff(&self, staff_id: i64) -> DbResult<Option<Staff>> {
        select_staff(&self.conn, staff_id)
    }

    // =========================================================================
    // Visits
    // =========================================================================

    /// Open a visit for a patient.
    pub fn insert_visit(
        &self,
        patient_id: i64,
        doctor_id: Option<i64>,
        visit_date: NaiveDate,
    ) -> DbResult<Visit> {
        self.conn.execute(
            "INSERT INTO visits (patient_id, doctor_id, visit_date, status) VALUES (?1, ?2, ?3, 'ACTIVE')",
            params![patient_id, doctor_id, visit_date],
        )?;
        Ok(Visit {
            visit_id: self.conn.last_insert_rowid(),
            patient_id,
            doctor_id,
            visit_date,
            status: VisitStatus::Active,
        })
    }

    /// Get a visit by ID.
    pub fn get_visit(&self, visit_id: i64) -> DbResult<Option<Visit>> {
        select_visit(&self.conn, visit_id)
    }

    /// Update visit status.
    pub fn set_visit_status(&self, visit_id: i64, status: VisitStatus) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE visits SET status = ?1 WHERE visit_id = ?2",
            params![status.as_str(), visit_id],
        )?;
        Ok(rows_affected > 0)
    }

    /// Non-cancelled visits whose doctor has a consultation fee, oldest first.
    pub fn list_fee_bearing_visits(
        &self,
        patient_id: Option<i64>,
    ) -> DbResult<Vec<PatientRecord<Consultation>>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT v.visit_id, v.patient_id, v.doctor_id, v.visit_date, v.status,
                   p.name, s.name, s.fee
            FROM visits v
            JOIN patients p ON p.patient_id = v.patient_id
            JOIN staff s ON s.staff_id = v.doctor_id
            WHERE v.status != 'CANCELLED'
              AND s.fee IS NOT NULL
              AND (?1 IS NULL OR v.patient_id = ?1)
            ORDER BY v.visit_id
            "#,
        )?;

        let rows = stmt.query_map([patient_id], |row| {
            let visit = visit_from_row(row)?;
            Ok(PatientRecord {
                patient_id: visit.patient_id,
                patient_name: row.get(5)?,
                record: Consultation {
                    visit,
                    doctor_name: row.get(6)?,
                    fee: decimal_column(row, 7)?,
                },
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // =========================================================================
    // Lab and radiology
    // =========================================================================

    /// Order a lab test or radiology scan.
    pub fn insert_investigation(
        &self,
        kind: InvestigationKind,
        visit_id: i64,
        name: &str,
        price: Decimal,
    ) -> DbResult<Investigation> {
        let sql = format!(
            "INSERT INTO {} (visit_id, {}, status, price) VALUES (?1, ?2, 'ORDERED', ?3)",
            kind.table(),
            kind.name_column()
        );
        self.conn
            .execute(&sql, params![visit_id, name, price.to_string()])?;
        Ok(Investigation {
            id: self.conn.last_insert_rowid(),
            visit_id,
            name: name.to_string(),
            status: ServiceStatus::Ordered,
            completed_at: None,
            price,
        })
    }

    /// Move an investigation to a new status. Completing stamps `completed_at`.
    pub fn update_investigation_status(
        &self,
        kind: InvestigationKind,
        id: i64,
        status: ServiceStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> DbResult<bool> {
        let completed_at = match status {
            ServiceStatus::Completed => Some(completed_at.unwrap_or_else(Utc::now)),
            _ => completed_at,
        };
        let sql = format!(
            "UPDATE {} SET status = ?1, completed_at = ?2 WHERE {} = ?3",
            kind.table(),
            kind.id_column()
        );
        let rows_affected = self
            .conn
            .execute(&sql, params![status.as_str(), completed_at, id])?;
        Ok(rows_affected > 0)
    }

    /// Completed investigations of one kind, oldest first.
    pub fn list_completed_investigations(
        &self,
        kind: InvestigationKind,
        patient_id: Option<i64>,
    ) -> DbResult<Vec<PatientRecord<Investigation>>> {
        let sql = format!(
            r#"
            SELECT t.{id}, t.visit_id, t.{name}, t.status, t.completed_at, t.price,
                   v.patient_id, p.name
            FROM {table} t
            JOIN visits v ON v.visit_id = t.visit_id
            JOIN patients p ON p.patient_id = v.patient_id
            WHERE t.status = 'COMPLETED'
              AND (?1 IS NULL OR v.patient_id = ?1)
            ORDER BY t.{id}
            "#,
            id = kind.id_column(),
            name = kind.name_column(),
            table = kind.table(),
        );
        let mut stmt = self.conn.prepare(&sql)?;

        let rows = stmt.query_map([patient_id], |row| {
            Ok(PatientRecord {
                patient_id: row.get(6)?,
                patient_name: row.get(7)?,
                record: Investigation {
                    id: row.get(0)?,
                    visit_id: row.get(1)?,
                    name: row.get(2)?,
                    status: enum_column(row, 3, ServiceStatus::parse)?,
                    completed_at: row.get(4)?,
                    price: decimal_column(row, 5)?,
                },
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Schedule an operation.
    pub fn insert_operation(
        &self,
        visit_id: i64,
        operation_name: &str,
        price: Decimal,
        scheduled_time: Option<DateTime<Utc>>,
    ) -> DbResult<Operation> {
        self.conn.execute(
            r#"
            INSERT INTO operations (visit_id, operation_name, status, scheduled_time, price, consumables)
            VALUES (?1, ?2, 'SCHEDULED', ?3, ?4, '[]')
            "#,
            params![visit_id, operation_name, scheduled_time, price.to_string()],
        )?;
        Ok(Operation {
            operation_id: self.conn.last_insert_rowid(),
            visit_id,
            operation_name: operation_name.to_string(),
            status: ServiceStatus::Scheduled,
            performed_at: None,
            scheduled_time,
            price,
            consumables: Vec::new(),
        })
    }

    /// Replace the consumables recorded for an operation.
    pub fn set_operation_consumables(
        &self,
        operation_id: i64,
        consumables: &[Consumable],
    ) -> DbResult<bool> {
        let consumables_json = serde_json::to_string(consumables)?;
        let rows_affected = self.conn.execute(
            "UPDATE operations SET consumables = ?1 WHERE operation_id = ?2",
            params![consumables_json, operation_id],
        )?;
        Ok(rows_affected > 0)
    }

    /// Move an operation to a new status. Completing stamps `performed_at`.
    pub fn update_operation_status(
        &self,
        operation_id: i64,
        status: ServiceStatus,
        performed_at: Option<DateTime<Utc>>,
    ) -> DbResult<bool> {
        let performed_at = match status {
            ServiceStatus::Completed => Some(performed_at.unwrap_or_else(Utc::now)),
            _ => performed_at,
        };
        let rows_affected = self.conn.execute(
            "UPDATE operations SET status = ?1, performed_at = ?2 WHERE operation_id = ?3",
            params![status.as_str(), performed_at, operation_id],
        )?;
        Ok(rows_affected > 0)
    }

    /// Completed operations, oldest first.
    pub fn list_completed_operations(
        &self,
        patient_id: Option<i64>,
    ) -> DbResult<Vec<PatientRecord<Operation>>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT o.operation_id, o.visit_id, o.operation_name, o.status, o.performed_at,
                   o.scheduled_time, o.price, o.consumables, v.patient_id, p.name
            FROM operations o
            JOIN visits v ON v.visit_id = o.visit_id
            JOIN patients p ON p.patient_id = v.patient_id
            WHERE o.status = 'COMPLETED'
              AND (?1 IS NULL OR v.patient_id = ?1)
            ORDER BY o.operation_id
            "#,
        )?;

        let rows = stmt.query_map([patient_id], |row| {
            Ok(OperationRow {
                operation_id: row.get(0)?,
                visit_id: row.get(1)?,
                operation_name: row.get(2)?,
                status: enum_column(row, 3, ServiceStatus::parse)?,
                performed_at: row.get(4)?,
                scheduled_time: row.get(5)?,
                price: decimal_column(row, 6)?,
                consumables: row.get(7)?,
                patient_id: row.get(8)?,
                patient_name: row.get(9)?,
            })
        })?;

        let mut operations = Vec::new();
        for row in rows {
            operations.push(row?.try_into()?);
        }
        Ok(operations)
    }

    // =========================================================================
    // Admissions
    // =========================================================================

    /// Admit a patient on a visit.
    pub fn insert_admission(
        &self,
        visit_id: i64,
        admission_date: DateTime<Utc>,
        bed_price: Decimal,
    ) -> DbResult<Admission> {
        self.conn.execute(
            "INSERT INTO admissions (visit_id, admission_date, bed_price) VALUES (?1, ?2, ?3)",
            params![visit_id, admission_date, bed_price.to_string()],
        )?;
        Ok(Admission {
            admission_id: self.conn.last_insert_rowid(),
            visit_id,
            admission_date,
            discharge_date: None,
            bed_price,
        })
    }

    /// Record discharge.
    pub fn discharge_admission(
        &self,
        admission_id: i64,
        discharge_date: DateTime<Utc>,
    ) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE admissions SET discharge_date = ?1 WHERE admission_id = ?2",
            params![discharge_date, admission_id],
        )?;
        Ok(rows_affected > 0)
    }

    /// Discharged admissions, oldest first.
    pub fn list_discharged_admissions(
        &self,
        patient_id: Option<i64>,
    ) -> DbResult<Vec<PatientRecord<Admission>>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT a.admission_id, a.visit_id, a.admission_date, a.discharge_date, a.bed_price,
                   v.patient_id, p.name
            FROM admissions a
            JOIN visits v ON v.visit_id = a.visit_id
            JOIN patients p ON p.patient_id = v.patient_id
            WHERE a.discharge_date IS NOT NULL
              AND (?1 IS NULL OR v.patient_id = ?1)
            ORDER BY a.admission_id
            "#,
        )?;

        let rows = stmt.query_map([patient_id], |row| {
            Ok(PatientRecord {
                patient_id: row.get(5)?,
                patient_name: row.get(6)?,
                record: Admission {
                    admission_id: row.get(0)?,
                    visit_id: row.get(1)?,
                    admission_date: row.get(2)?,
                    discharge_date: row.get(3)?,
                    bed_price: decimal_column(row, 4)?,
                },
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

pub(crate) fn select_staff(
    conn: &rusqlite::Connection,
    staff_id: i64,
) -> DbResult<Option<Staff>> {
    conn.query_row(
        "SELECT staff_id, name, role, fee FROM staff WHERE staff_id = ?",
        [staff_id],
        |row| {
            Ok(Staff {
                staff_id: row.get(0)?,
                name: row.get(1)?,
                role: enum_column(row, 2, StaffRole::parse)?,
                fee: optional_decimal_column(row, 3)?,
            })
        },
    )
    .optional()
    .map_err(Into::into)
}

pub(crate) fn select_visit(conn: &rusqlite::Connection, visit_id: i64) -> DbResult<Option<Visit>> {
    conn.query_row(
        "SELECT visit_id, patient_id, doctor_id, visit_date, status FROM visits WHERE visit_id = ?",
        [visit_id],
        visit_from_row,
    )
    .optional()
    .map_err(Into::into)
}

fn visit_from_row(row: &Row<'_>) -> rusqlite::Result<Visit> {
    Ok(Visit {
        visit_id: row.get(0)?,
        patient_id: row.get(1)?,
        doctor_id: row.get(2)?,
        visit_date: row.get(3)?,
        status: enum_column(row, 4, VisitStatus::parse)?,
    })
}

/// Intermediate row struct for operations (consumables stored as JSON).
struct OperationRow {
    operation_id: i64,
    visit_id: i64,
    operation_name: String,
    status: ServiceStatus,
    performed_at: Option<DateTime<Utc>>,
    scheduled_time: Option<DateTime<Utc>>,
    price: Decimal,
    consumables: String,
    patient_id: i64,
    patient_name: String,
}

impl TryFrom<OperationRow> for PatientRecord<Operation> {
    type Error = DbError;

    fn try_from(row: OperationRow) -> Result<Self, Self::Error> {
        let consumables: Vec<Consumable> = serde_json::from_str(&row.consumables)?;

        Ok(PatientRecord {
            patient_id: row.patient_id,
            patient_name: row.patient_name,
            record: Operation {
                operation_id: row.operation_id,
                visit_id: row.visit_id,
                operation_name: row.operation_name,
                status: row.status,
                performed_at: row.performed_at,
                scheduled_time: row.scheduled_time,
                price: row.price,
                consumables,
            },
        })
    }
}
