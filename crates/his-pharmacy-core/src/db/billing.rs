//! Bill and bill item database operations.

use std::collections::HashSet;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;

use super::{decimal_column, enum_column, is_unique_violation, Database, DbError, DbResult};
use crate::models::{Bill, BillItem, BillStatus, ServiceRef, ServiceType};

impl Database {
    /// Get a bill by ID.
    pub fn get_bill(&self, bill_id: i64) -> DbResult<Option<Bill>> {
        select_bill(&self.conn, bill_id)
    }

    /// Get the live bill of a visit, falling back to its latest cancelled one.
    pub fn get_bill_for_visit(&self, visit_id: i64) -> DbResult<Option<Bill>> {
        self.conn
            .query_row(
                r#"
                SELECT bill_id, visit_id, total_amount, paid_amount, status, created_at
                FROM bills
                WHERE visit_id = ?
                ORDER BY status = 'CANCELLED', bill_id DESC
                LIMIT 1
                "#,
                [visit_id],
                bill_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Items on a bill in insertion order.
    pub fn list_bill_items(&self, bill_id: i64) -> DbResult<Vec<BillItem>> {
        select_bill_items(&self.conn, bill_id)
    }

    /// Reference ids already billed under a service type.
    pub fn billed_ref_ids(&self, service_type: ServiceType) -> DbResult<HashSet<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT service_ref_id FROM bill_items WHERE service_type = ?")?;
        let rows = stmt.query_map([service_type.as_str()], |row| row.get(0))?;
        rows.collect::<Result<HashSet<i64>, _>>().map_err(Into::into)
    }
}

pub(crate) fn insert_bill(conn: &Connection, visit_id: i64) -> DbResult<Bill> {
    let created_at = Utc::now();
    conn.execute(
        r#"
        INSERT INTO bills (visit_id, total_amount, paid_amount, status, created_at)
        VALUES (?1, '0', '0', 'DRAFT', ?2)
        "#,
        params![visit_id, created_at],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            DbError::Constraint(format!("Visit {} already has a bill", visit_id))
        } else {
            e.into()
        }
    })?;
    Ok(Bill {
        bill_id: conn.last_insert_rowid(),
        visit_id,
        total_amount: Decimal::ZERO,
        paid_amount: Decimal::ZERO,
        status: BillStatus::Draft,
        created_at,
    })
}

pub(crate) fn select_bill(conn: &Connection, bill_id: i64) -> DbResult<Option<Bill>> {
    conn.query_row(
        r#"
        SELECT bill_id, visit_id, total_amount, paid_amount, status, created_at
        FROM bills
        WHERE bill_id = ?
        "#,
        [bill_id],
        bill_from_row,
    )
    .optional()
    .map_err(Into::into)
}

pub(crate) fn select_bill_items(conn: &Connection, bill_id: i64) -> DbResult<Vec<BillItem>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT bill_item_id, bill_id, visit_id, service_type, service_ref_id, amount
        FROM bill_items
        WHERE bill_id = ?
        ORDER BY bill_item_id
        "#,
    )?;
    let rows = stmt.query_map([bill_id], bill_item_from_row)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

pub(crate) fn select_bill_item(conn: &Connection, bill_item_id: i64) -> DbResult<Option<BillItem>> {
    conn.query_row(
        r#"
        SELECT bill_item_id, bill_id, visit_id, service_type, service_ref_id, amount
        FROM bill_items
        WHERE bill_item_id = ?
        "#,
        [bill_item_id],
        bill_item_from_row,
    )
    .optional()
    .map_err(Into::into)
}

/// Insert a charge line. Returns `Ok(None)` when the service is already billed.
pub(crate) fn insert_bill_item(
    conn: &Connection,
    bill_id: i64,
    visit_id: i64,
    service: ServiceRef,
    amount: Decimal,
) -> DbResult<Option<BillItem>> {
    let result = conn.execute(
        r#"
        INSERT INTO bill_items (bill_id, visit_id, service_type, service_ref_id, amount)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![
            bill_id,
            visit_id,
            service.service_type().as_str(),
            service.ref_id(),
            amount.to_string(),
        ],
    );
    match result {
        Ok(_) => Ok(Some(BillItem {
            bill_item_id: conn.last_insert_rowid(),
            bill_id,
            visit_id,
            service,
            amount,
        })),
        Err(e) if is_unique_violation(&e) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn update_bill_item_amount(
    conn: &Connection,
    bill_item_id: i64,
    amount: Decimal,
) -> DbResult<bool> {
    let rows_affected = conn.execute(
        "UPDATE bill_items SET amount = ?1 WHERE bill_item_id = ?2",
        params![amount.to_string(), bill_item_id],
    )?;
    Ok(rows_affected > 0)
}

pub(crate) fn delete_bill_item(conn: &Connection, bill_item_id: i64) -> DbResult<bool> {
    let rows_affected = conn.execute("DELETE FROM bill_items WHERE bill_item_id = ?", [bill_item_id])?;
    Ok(rows_affected > 0)
}

/// Remove every item of a bill, releasing their services for billing elsewhere.
pub(crate) fn delete_bill_items(conn: &Connection, bill_id: i64) -> DbResult<usize> {
    Ok(conn.execute("DELETE FROM bill_items WHERE bill_id = ?", [bill_id])?)
}

/// Persist the derived amounts and status of a bill.
pub(crate) fn update_bill_amounts(
    conn: &Connection,
    bill_id: i64,
    total_amount: Decimal,
    paid_amount: Decimal,
    status: BillStatus,
) -> DbResult<bool> {
    let rows_affected = conn.execute(
        "UPDATE bills SET total_amount = ?1, paid_amount = ?2, status = ?3 WHERE bill_id = ?4",
        params![
            total_amount.to_string(),
            paid_amount.to_string(),
            status.as_str(),
            bill_id,
        ],
    )?;
    Ok(rows_affected > 0)
}

fn bill_from_row(row: &Row<'_>) -> rusqlite::Result<Bill> {
    Ok(Bill {
        bill_id: row.get(0)?,
        visit_id: row.get(1)?,
        total_amount: decimal_column(row, 2)?,
        paid_amount: decimal_column(row, 3)?,
        status: enum_column(row, 4, BillStatus::parse)?,
        created_at: row.get(5)?,
    })
}

fn bill_item_from_row(row: &Row<'_>) -> rusqlite::Result<BillItem> {
    let service_type = enum_column(row, 3, ServiceType::parse)?;
    Ok(BillItem {
        bill_item_id: row.get(0)?,
        bill_id: row.get(1)?,
        visit_id: row.get(2)?,
        service: ServiceRef::new(service_type, row.get(4)?),
        amount: decimal_column(row, 5)?,
    })
}
