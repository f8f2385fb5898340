//! Medicine, batch and stock transaction database operations.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;

use super::{decimal_column, enum_column, Database, DbResult};
use crate::models::{
    Medicine, MedicineBatch, NewMedicine, StockReceipt, StockTransaction, TraceEntry,
    TransactionType,
};

const BATCH_COLUMNS: &str = r#"
    batch_id, medicine_id, batch_number, expiry_date, stock_qty, received_qty,
    purchase_price, unit_price, is_recalled, recall_reason, created_at
"#;

impl Database {
    /// Get a medicine by ID.
    pub fn get_medicine(&self, medicine_id: i64) -> DbResult<Option<Medicine>> {
        select_medicine(&self.conn, medicine_id)
    }

    /// List all medicines by name.
    pub fn list_medicines(&self) -> DbResult<Vec<Medicine>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT medicine_id, name, generic_name, category, manufacturer, reorder_level
            FROM medicines
            ORDER BY name, medicine_id
            "#,
        )?;
        let rows = stmt.query_map([], medicine_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Get a batch by ID.
    pub fn get_batch(&self, batch_id: i64) -> DbResult<Option<MedicineBatch>> {
        select_batch(&self.conn, batch_id)
    }

    /// Every batch in FEFO order.
    pub fn list_all_batches(&self) -> DbResult<Vec<MedicineBatch>> {
        let sql = format!(
            "SELECT {} FROM medicine_batches ORDER BY expiry_date, batch_id",
            BATCH_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], batch_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Unit prices of a medicine's non-recalled batches that still hold stock.
    pub fn list_in_stock_unit_prices(&self, medicine_id: i64) -> DbResult<Vec<Decimal>> {
        let mut stmt = self.conn.prepare(
            "SELECT unit_price FROM medicine_batches WHERE medicine_id = ? AND stock_qty > 0 AND is_recalled = 0 ORDER BY batch_id",
        )?;
        let rows = stmt.query_map([medicine_id], |row| decimal_column(row, 0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Ledger entries for a batch, oldest first.
    pub fn list_transactions_for_batch(&self, batch_id: i64) -> DbResult<Vec<StockTransaction>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT transaction_id, batch_id, transaction_type, quantity, reference_id,
                   performed_by, notes, timestamp
            FROM stock_transactions
            WHERE batch_id = ?
            ORDER BY transaction_id
            "#,
        )?;
        let rows = stmt.query_map([batch_id], |row| {
            Ok(StockTransaction {
                transaction_id: row.get(0)?,
                batch_id: row.get(1)?,
                transaction_type: enum_column(row, 2, TransactionType::parse)?,
                quantity: row.get(3)?,
                reference_id: row.get(4)?,
                performed_by: row.get(5)?,
                notes: row.get(6)?,
                timestamp: row.get(7)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Net quantity recorded in the ledger for a batch.
    pub fn ledger_balance(&self, batch_id: i64) -> DbResult<i64> {
        let balance: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(quantity), 0) FROM stock_transactions WHERE batch_id = ?",
            [batch_id],
            |row| row.get(0),
        )?;
        Ok(balance)
    }

    /// Patients who received units from a batch, in dispense order.
    pub fn list_batch_recipients(&self, batch_id: i64) -> DbResult<Vec<TraceEntry>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT p.patient_id, p.name, d.prescription_id, d.dispensed_at, d.quantity_dispensed
            FROM prescription_dispenses d
            JOIN prescriptions r ON r.prescription_id = d.prescription_id
            JOIN visits v ON v.visit_id = r.visit_id
            JOIN patients p ON p.patient_id = v.patient_id
            WHERE d.batch_id = ?
            ORDER BY d.dispense_id
            "#,
        )?;
        let rows = stmt.query_map([batch_id], |row| {
            Ok(TraceEntry {
                patient_id: row.get(0)?,
                patient_name: row.get(1)?,
                prescription_id: row.get(2)?,
                dispensed_at: row.get(3)?,
                quantity: row.get(4)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

pub(crate) fn insert_medicine(conn: &Connection, medicine: &NewMedicine) -> DbResult<Medicine> {
    conn.execute(
        r#"
        INSERT INTO medicines (name, generic_name, category, manufacturer, reorder_level)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![
            medicine.name,
            medicine.generic_name,
            medicine.category,
            medicine.manufacturer,
            medicine.reorder_level,
        ],
    )?;
    Ok(Medicine {
        medicine_id: conn.last_insert_rowid(),
        name: medicine.name.clone(),
        generic_name: medicine.generic_name.clone(),
        category: medicine.category.clone(),
        manufacturer: medicine.manufacturer.clone(),
        reorder_level: medicine.reorder_level,
    })
}

pub(crate) fn select_medicine(conn: &Connection, medicine_id: i64) -> DbResult<Option<Medicine>> {
    conn.query_row(
        r#"
        SELECT medicine_id, name, generic_name, category, manufacturer, reorder_level
        FROM medicines
        WHERE medicine_id = ?
        "#,
        [medicine_id],
        medicine_from_row,
    )
    .optional()
    .map_err(Into::into)
}

pub(crate) fn insert_batch(
    conn: &Connection,
    receipt: &StockReceipt,
    created_at: DateTime<Utc>,
) -> DbResult<MedicineBatch> {
    conn.execute(
        r#"
        INSERT INTO medicine_batches (
            medicine_id, batch_number, expiry_date, stock_qty, received_qty,
            purchase_price, unit_price, is_recalled, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?4, ?5, ?6, 0, ?7)
        "#,
        params![
            receipt.medicine_id,
            receipt.batch_number,
            receipt.expiry_date,
            receipt.received_qty,
            receipt.purchase_price.to_string(),
            receipt.unit_price.to_string(),
            created_at,
        ],
    )?;
    Ok(MedicineBatch {
        batch_id: conn.last_insert_rowid(),
        medicine_id: receipt.medicine_id,
        batch_number: receipt.batch_number.clone(),
        expiry_date: receipt.expiry_date,
        stock_qty: receipt.received_qty,
        received_qty: receipt.received_qty,
        purchase_price: receipt.purchase_price,
        unit_price: receipt.unit_price,
        is_recalled: false,
        recall_reason: None,
        created_at,
    })
}

pub(crate) fn select_batch(conn: &Connection, batch_id: i64) -> DbResult<Option<MedicineBatch>> {
    let sql = format!("SELECT {} FROM medicine_batches WHERE batch_id = ?", BATCH_COLUMNS);
    conn.query_row(&sql, [batch_id], batch_from_row)
        .optional()
        .map_err(Into::into)
}

/// Non-recalled, unexpired batches holding at least `quantity`, earliest expiry first.
pub(crate) fn select_eligible_batches(
    conn: &Connection,
    medicine_id: i64,
    quantity: i64,
    as_of: NaiveDate,
) -> DbResult<Vec<MedicineBatch>> {
    let sql = format!(
        r#"
        SELECT {} FROM medicine_batches
        WHERE medicine_id = ?1
          AND stock_qty >= ?2
          AND expiry_date > ?3
          AND is_recalled = 0
        ORDER BY expiry_date ASC, batch_id ASC
        "#,
        BATCH_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![medicine_id, quantity, as_of], batch_from_row)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

/// Sum of stock over a medicine's non-recalled batches.
pub(crate) fn select_total_stock(conn: &Connection, medicine_id: i64) -> DbResult<i64> {
    let total: i64 = conn.query_row(
        "SELECT COALESCE(SUM(stock_qty), 0) FROM medicine_batches WHERE medicine_id = ? AND is_recalled = 0",
        [medicine_id],
        |row| row.get(0),
    )?;
    Ok(total)
}

/// Compare-and-swap on `stock_qty`: applies `delta` only if the result stays within
/// `[0, received_qty]`. Returns whether the row was updated.
pub(crate) fn apply_stock_delta(conn: &Connection, batch_id: i64, delta: i64) -> DbResult<bool> {
    let rows_affected = conn.execute(
        r#"
        UPDATE medicine_batches
        SET stock_qty = stock_qty + ?1
        WHERE batch_id = ?2
          AND stock_qty + ?1 >= 0
          AND stock_qty + ?1 <= received_qty
        "#,
        params![delta, batch_id],
    )?;
    Ok(rows_affected > 0)
}

/// Append a ledger entry.
pub(crate) fn insert_stock_transaction(
    conn: &Connection,
    batch_id: i64,
    transaction_type: TransactionType,
    quantity: i64,
    reference_id: Option<&str>,
    performed_by: i64,
    notes: Option<&str>,
) -> DbResult<StockTransaction> {
    let timestamp = Utc::now();
    conn.execute(
        r#"
        INSERT INTO stock_transactions (
            batch_id, transaction_type, quantity, reference_id, performed_by, notes, timestamp
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
        params![
            batch_id,
            transaction_type.as_str(),
            quantity,
            reference_id,
            performed_by,
            notes,
            timestamp,
        ],
    )?;
    Ok(StockTransaction {
        transaction_id: conn.last_insert_rowid(),
        batch_id,
        transaction_type,
        quantity,
        reference_id: reference_id.map(str::to_string),
        performed_by,
        notes: notes.map(str::to_string),
        timestamp,
    })
}

pub(crate) fn mark_batch_recalled(conn: &Connection, batch_id: i64, reason: &str) -> DbResult<bool> {
    let rows_affected = conn.execute(
        "UPDATE medicine_batches SET is_recalled = 1, recall_reason = ?1 WHERE batch_id = ?2",
        params![reason, batch_id],
    )?;
    Ok(rows_affected > 0)
}

fn medicine_from_row(row: &Row<'_>) -> rusqlite::Result<Medicine> {
    Ok(Medicine {
        medicine_id: row.get(0)?,
        name: row.get(1)?,
        generic_name: row.get(2)?,
        category: row.get(3)?,
        manufacturer: row.get(4)?,
        reorder_level: row.get(5)?,
    })
}

pub(crate) fn batch_from_row(row: &Row<'_>) -> rusqlite::Result<MedicineBatch> {
    Ok(MedicineBatch {
        batch_id: row.get(0)?,
        medicine_id: row.get(1)?,
        batch_number: row.get(2)?,
        expiry_date: row.get(3)?,
        stock_qty: row.get(4)?,
        received_qty: row.get(5)?,
        purchase_price: decimal_column(row, 6)?,
        unit_price: decimal_column(row, 7)?,
        is_recalled: row.get(8)?,
        recall_reason: row.get(9)?,
        created_at: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_db() -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        let medicine = insert_medicine(db.conn(), &NewMedicine::named("Paracetamol 500mg")).unwrap();
        (db, medicine.medicine_id)
    }

    fn receipt(medicine_id: i64, number: &str, expiry: &str, qty: i64) -> StockReceipt {
        StockReceipt {
            medicine_id,
            batch_number: number.into(),
            expiry_date: NaiveDate::parse_from_str(expiry, "%Y-%m-%d").unwrap(),
            received_qty: qty,
            purchase_price: Decimal::new(100, 2),
            unit_price: Decimal::new(150, 2),
            received_by: 1,
            reference: None,
        }
    }

    #[test]
    fn test_insert_and_get_batch() {
        let (db, medicine_id) = setup_db();
        let batch = insert_batch(db.conn(), &receipt(medicine_id, "PCM-01", "2026-03-31", 100), Utc::now())
            .unwrap();

        let fetched = db.get_batch(batch.batch_id).unwrap().unwrap();
        assert_eq!(fetched.batch_number, "PCM-01");
        assert_eq!(fetched.stock_qty, 100);
        assert_eq!(fetched.unit_price, Decimal::new(150, 2));
        assert!(!fetched.is_recalled);
    }

    #[test]
    fn test_stock_delta_is_bounded() {
        let (db, medicine_id) = setup_db();
        let batch = insert_batch(db.conn(), &receipt(medicine_id, "PCM-01", "2026-03-31", 10), Utc::now())
            .unwrap();

        assert!(!apply_stock_delta(db.conn(), batch.batch_id, -11).unwrap());
        assert!(apply_stock_delta(db.conn(), batch.batch_id, -10).unwrap());
        assert!(!apply_stock_delta(db.conn(), batch.batch_id, 11).unwrap());
        assert!(apply_stock_delta(db.conn(), batch.batch_id, 10).unwrap());
        assert_eq!(db.get_batch(batch.batch_id).unwrap().unwrap().stock_qty, 10);
    }

    #[test]
    fn test_eligible_batches_tie_break_on_id() {
        let (db, medicine_id) = setup_db();
        let first = insert_batch(db.conn(), &receipt(medicine_id, "A", "2026-03-31", 10), Utc::now()).unwrap();
        let second = insert_batch(db.conn(), &receipt(medicine_id, "B", "2026-03-31", 10), Utc::now()).unwrap();

        let as_of = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let eligible = select_eligible_batches(db.conn(), medicine_id, 5, as_of).unwrap();
        assert_eq!(
            eligible.iter().map(|b| b.batch_id).collect::<Vec<_>>(),
            vec![first.batch_id, second.batch_id]
        );
    }

    #[test]
    fn test_total_stock_skips_recalled() {
        let (db, medicine_id) = setup_db();
        insert_batch(db.conn(), &receipt(medicine_id, "A", "2026-03-31", 10), Utc::now()).unwrap();
        let recalled = insert_batch(db.conn(), &receipt(medicine_id, "B", "2026-03-31", 7), Utc::now()).unwrap();
        assert_eq!(select_total_stock(db.conn(), medicine_id).unwrap(), 17);

        mark_batch_recalled(db.conn(), recalled.batch_id, "Contamination").unwrap();
        assert_eq!(select_total_stock(db.conn(), medicine_id).unwrap(), 10);
    }
}
