//! Bills, bill items and payments.

use rusqlite::Connection;
use rust_decimal::Decimal;
use tracing::info;

use crate::db::{self, Database, DbError};
use crate::error::{CoreError, CoreResult};
use crate::models::{Bill, BillItem, BillStatus, PendingItem, ServiceRef};

/// Bill manager.
pub struct BillManager<'a> {
    db: &'a Database,
}

impl<'a> BillManager<'a> {
    /// Create a new bill manager.
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Get a bill or fail with `NotFound`.
    pub fn bill(&self, bill_id: i64) -> CoreResult<Bill> {
        load_bill(self.db.conn(), bill_id)
    }

    /// Items on a bill in insertion order.
    pub fn items(&self, bill_id: i64) -> CoreResult<Vec<BillItem>> {
        load_bill(self.db.conn(), bill_id)?;
        Ok(self.db.list_bill_items(bill_id)?)
    }

    /// Open the DRAFT bill of a visit.
    pub fn create_bill(&self, visit_id: i64) -> CoreResult<Bill> {
        let tx = self.db.write_transaction()?;
        if db::select_visit(&tx, visit_id)?.is_none() {
            return Err(CoreError::NotFound(format!("Visit {}", visit_id)));
        }
        let bill = db::insert_bill(&tx, visit_id).map_err(|e| match e {
            DbError::Constraint(message) => CoreError::InvalidState(message),
            other => other.into(),
        })?;
        tx.commit()?;

        info!(bill_id = bill.bill_id, visit_id, "bill opened");
        Ok(bill)
    }

    /// Charge a service on a bill.
    pub fn add_bill_item(
        &self,
        bill_id: i64,
        service: ServiceRef,
        amount: Decimal,
    ) -> CoreResult<BillItem> {
        self.insert_item(bill_id, None, service, amount)
    }

    /// Turn a discovered pending item into a bill item at its computed price.
    pub fn bill_pending_item(&self, bill_id: i64, item: &PendingItem) -> CoreResult<BillItem> {
        self.insert_item(bill_id, Some(item.visit_id), item.service(), item.price)
    }

    /// Change the amount of a bill item.
    pub fn update_bill_item_amount(&self, bill_item_id: i64, amount: Decimal) -> CoreResult<BillItem> {
        check_amount(amount)?;
        let tx = self.db.write_transaction()?;
        let mut item = load_item(&tx, bill_item_id)?;
        let bill = load_open_bill(&tx, item.bill_id)?;

        db::update_bill_item_amount(&tx, bill_item_id, amount)?;
        let bill = recompute_totals(&tx, &bill)?;
        tx.commit()?;

        info!(
            bill_item_id,
            bill_id = bill.bill_id,
            previous = %item.amount,
            amount = %amount,
            total = %bill.total_amount,
            "bill item amount changed"
        );
        item.amount = amount;
        Ok(item)
    }

    /// Remove a bill item. The service becomes pending again.
    pub fn delete_bill_item(&self, bill_item_id: i64) -> CoreResult<Bill> {
        let tx = self.db.write_transaction()?;
        let item = load_item(&tx, bill_item_id)?;
        let bill = load_open_bill(&tx, item.bill_id)?;

        db::delete_bill_item(&tx, bill_item_id)?;
        let bill = recompute_totals(&tx, &bill)?;
        tx.commit()?;

        info!(
            bill_item_id,
            bill_id = bill.bill_id,
            service = %item.service,
            total = %bill.total_amount,
            "bill item deleted"
        );
        Ok(bill)
    }

    /// Issue a DRAFT bill for payment.
    pub fn finalize_bill(&self, bill_id: i64) -> CoreResult<Bill> {
        let tx = self.db.write_transaction()?;
        let mut bill = load_bill(&tx, bill_id)?;
        if bill.status != BillStatus::Draft {
            return Err(CoreError::InvalidState(format!(
                "Bill {} is {}, only DRAFT bills can be finalized",
                bill_id,
                bill.status.as_str()
            )));
        }
        bill.status = BillStatus::from_amounts(bill.total_amount, bill.paid_amount);
        db::update_bill_amounts(&tx, bill_id, bill.total_amount, bill.paid_amount, bill.status)?;
        tx.commit()?;

        info!(bill_id, total = %bill.total_amount, status = bill.status.as_str(), "bill finalized");
        Ok(bill)
    }

    /// Cancel a bill that has taken no payment.
    ///
    /// Its items are removed so their services become pending again, and the visit may
    /// open a new bill.
    pub fn cancel_bill(&self, bill_id: i64) -> CoreResult<Bill> {
        let tx = self.db.write_transaction()?;
        let mut bill = load_open_bill(&tx, bill_id)?;
        if bill.paid_amount > Decimal::ZERO {
            return Err(CoreError::InvalidState(format!(
                "Bill {} has payments of {} and cannot be cancelled",
                bill_id, bill.paid_amount
            )));
        }
        let released = db::delete_bill_items(&tx, bill_id)?;
        bill.total_amount = Decimal::ZERO;
        bill.status = BillStatus::Cancelled;
        db::update_bill_amounts(&tx, bill_id, bill.total_amount, bill.paid_amount, bill.status)?;
        tx.commit()?;

        info!(bill_id, released, "bill cancelled");
        Ok(bill)
    }

    /// Record a payment against an issued bill.
    pub fn record_payment(&self, bill_id: i64, amount: Decimal) -> CoreResult<Bill> {
        if amount <= Decimal::ZERO {
            return Err(CoreError::InvalidInput(
                "Payment amount must be positive".into(),
            ));
        }
        let tx = self.db.write_transaction()?;
        let mut bill = load_bill(&tx, bill_id)?;
        match bill.status {
            BillStatus::Draft | BillStatus::Cancelled => {
                return Err(CoreError::InvalidState(format!(
                    "Bill {} is {} and cannot take payments",
                    bill_id,
                    bill.status.as_str()
                )));
            }
            BillStatus::NotPaid | BillStatus::PartiallyPaid | BillStatus::Paid => {}
        }

        bill.paid_amount += amount;
        bill.status = BillStatus::from_amounts(bill.total_amount, bill.paid_amount);
        db::update_bill_amounts(&tx, bill_id, bill.total_amount, bill.paid_amount, bill.status)?;
        tx.commit()?;

        info!(
            bill_id,
            amount = %amount,
            paid = %bill.paid_amount,
            status = bill.status.as_str(),
            "payment recorded"
        );
        Ok(bill)
    }

    fn insert_item(
        &self,
        bill_id: i64,
        visit_id: Option<i64>,
        service: ServiceRef,
        amount: Decimal,
    ) -> CoreResult<BillItem> {
        check_amount(amount)?;
        let tx = self.db.write_transaction()?;
        let bill = load_open_bill(&tx, bill_id)?;

        let visit_id = visit_id.unwrap_or(bill.visit_id);
        let item = db::insert_bill_item(&tx, bill_id, visit_id, service, amount)?
            .ok_or(CoreError::DuplicateBillItem { service })?;
        let bill = recompute_totals(&tx, &bill)?;
        tx.commit()?;

        info!(
            bill_id,
            bill_item_id = item.bill_item_id,
            service = %service,
            amount = %amount,
            total = %bill.total_amount,
            "bill item added"
        );
        Ok(item)
    }
}

fn check_amount(amount: Decimal) -> CoreResult<()> {
    if amount < Decimal::ZERO {
        return Err(CoreError::InvalidInput(
            "Bill item amount cannot be negative".into(),
        ));
    }
    Ok(())
}

fn load_bill(conn: &Connection, bill_id: i64) -> CoreResult<Bill> {
    db::select_bill(conn, bill_id)?
        .ok_or_else(|| CoreError::NotFound(format!("Bill {}", bill_id)))
}

/// Load a bill that still accepts item changes.
fn load_open_bill(conn: &Connection, bill_id: i64) -> CoreResult<Bill> {
    let bill = load_bill(conn, bill_id)?;
    if bill.status == BillStatus::Cancelled {
        return Err(CoreError::InvalidState(format!(
            "Bill {} is cancelled",
            bill_id
        )));
    }
    Ok(bill)
}

fn load_item(conn: &Connection, bill_item_id: i64) -> CoreResult<BillItem> {
    db::select_bill_item(conn, bill_item_id)?
        .ok_or_else(|| CoreError::NotFound(format!("Bill item {}", bill_item_id)))
}

/// Recompute a bill's total from its current items and persist it. Issued bills also
/// have their payment status re-derived.
fn recompute_totals(conn: &Connection, bill: &Bill) -> CoreResult<Bill> {
    let total_amount: Decimal = db::select_bill_items(conn, bill.bill_id)?
        .iter()
        .map(|item| item.amount)
        .sum();
    let status = match bill.status {
        BillStatus::Draft | BillStatus::Cancelled => bill.status,
        _ => BillStatus::from_amounts(total_amount, bill.paid_amount),
    };
    db::update_bill_amounts(conn, bill.bill_id, total_amount, bill.paid_amount, status)?;

    Ok(Bill {
        total_amount,
        status,
        ..bill.clone()
    })
}
