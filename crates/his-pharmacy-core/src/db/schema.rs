//! SQLite schema definition.

/// Complete database schema for the pharmacy and billing core.
pub const SCHEMA: &str = r#"
-- Enable foreign keys
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Clinical collaborator records (fed by external subsystems)
-- ============================================================================

CREATE TABLE IF NOT EXISTS patients (
    patient_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS staff (
    staff_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    role TEXT NOT NULL,                          -- DOCTOR, PHARMACIST, NURSE, ...
    fee TEXT                                     -- decimal, doctors only
);

CREATE TABLE IF NOT EXISTS visits (
    visit_id INTEGER PRIMARY KEY AUTOINCREMENT,
    patient_id INTEGER NOT NULL REFERENCES patients(patient_id),
    doctor_id INTEGER REFERENCES staff(staff_id),
    visit_date TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'ACTIVE'
);

CREATE INDEX IF NOT EXISTS idx_visits_patient ON visits(patient_id);

CREATE TABLE IF NOT EXISTS lab_tests (
    lab_test_id INTEGER PRIMARY KEY AUTOINCREMENT,
    visit_id INTEGER NOT NULL REFERENCES visits(visit_id),
    test_name TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'ORDERED',
    completed_at TEXT,
    price TEXT NOT NULL DEFAULT '0'
);

CREATE TABLE IF NOT EXISTS radiology_tests (
    radiology_test_id INTEGER PRIMARY KEY AUTOINCREMENT,
    visit_id INTEGER NOT NULL REFERENCES visits(visit_id),
    scan_type TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'ORDERED',
    completed_at TEXT,
    price TEXT NOT NULL DEFAULT '0'
);

CREATE TABLE IF NOT EXISTS operations (
    operation_id INTEGER PRIMARY KEY AUTOINCREMENT,
    visit_id INTEGER NOT NULL REFERENCES visits(visit_id),
    operation_name TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'SCHEDULED',
    performed_at TEXT,
    scheduled_time TEXT,
    price TEXT NOT NULL DEFAULT '0',
    consumables TEXT NOT NULL DEFAULT '[]'       -- JSON array of consumables
);

CREATE TABLE IF NOT EXISTS admissions (
    admission_id INTEGER PRIMARY KEY AUTOINCREMENT,
    visit_id INTEGER NOT NULL REFERENCES visits(visit_id),
    admission_date TEXT NOT NULL,
    discharge_date TEXT,
    bed_price TEXT NOT NULL DEFAULT '0'
);

-- ============================================================================
-- Inventory Ledger
-- ============================================================================

CREATE TABLE IF NOT EXISTS medicines (
    medicine_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    generic_name TEXT,
    category TEXT,
    manufacturer TEXT,
    reorder_level INTEGER NOT NULL DEFAULT 10 CHECK (reorder_level >= 0)
);

CREATE INDEX IF NOT EXISTS idx_medicines_name ON medicines(name);

CREATE TABLE IF NOT EXISTS medicine_batches (
    batch_id INTEGER PRIMARY KEY AUTOINCREMENT,
    medicine_id INTEGER NOT NULL REFERENCES medicines(medicine_id),
    batch_number TEXT NOT NULL,
    expiry_date TEXT NOT NULL,                   -- YYYY-MM-DD, sorts lexically
    stock_qty INTEGER NOT NULL,
    received_qty INTEGER NOT NULL,
    purchase_price TEXT NOT NULL DEFAULT '0',
    unit_price TEXT NOT NULL,
    is_recalled INTEGER NOT NULL DEFAULT 0,
    recall_reason TEXT,
    created_at TEXT NOT NULL,
    CHECK (received_qty >= 0),
    CHECK (stock_qty >= 0 AND stock_qty <= received_qty)
);

-- FEFO selection walks this index
CREATE INDEX IF NOT EXISTS idx_batches_fefo ON medicine_batches(medicine_id, expiry_date, batch_id);

-- Append-only: no UPDATE or DELETE is ever issued against this table
CREATE TABLE IF NOT EXISTS stock_transactions (
    transaction_id INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_id INTEGER NOT NULL REFERENCES medicine_batches(batch_id),
    transaction_type TEXT NOT NULL
        CHECK (transaction_type IN ('PURCHASE', 'DISPENSE', 'RETURN', 'ADJUSTMENT', 'EXPIRED')),
    quantity INTEGER NOT NULL,                   -- positive incoming, negative outgoing
    reference_id TEXT,
    performed_by INTEGER NOT NULL REFERENCES staff(staff_id),
    notes TEXT,
    timestamp TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_transactions_batch ON stock_transactions(batch_id);

CREATE TRIGGER IF NOT EXISTS stock_transactions_no_update BEFORE UPDATE ON stock_transactions
BEGIN
    SELECT RAISE(ABORT, 'Stock transactions are immutable');
END;

CREATE TRIGGER IF NOT EXISTS stock_transactions_no_delete BEFORE DELETE ON stock_transactions
BEGIN
    SELECT RAISE(ABORT, 'Stock transactions are immutable');
END;

-- ============================================================================
-- Prescriptions and Dispensing
-- ============================================================================

CREATE TABLE IF NOT EXISTS prescriptions (
    prescription_id INTEGER PRIMARY KEY AUTOINCREMENT,
    visit_id INTEGER NOT NULL REFERENCES visits(visit_id),
    medicine_id INTEGER NOT NULL REFERENCES medicines(medicine_id),
    dosage_per_day INTEGER NOT NULL CHECK (dosage_per_day > 0),
    duration INTEGER NOT NULL CHECK (duration > 0),
    status TEXT NOT NULL DEFAULT 'PENDING',
    created_at TEXT NOT NULL,
    dispensed_at TEXT,
    dispensed_by INTEGER REFERENCES staff(staff_id)
);

CREATE INDEX IF NOT EXISTS idx_prescriptions_status ON prescriptions(status);

CREATE TABLE IF NOT EXISTS prescription_dispenses (
    dispense_id INTEGER PRIMARY KEY AUTOINCREMENT,
    prescription_id INTEGER NOT NULL REFERENCES prescriptions(prescription_id),
    medicine_id INTEGER NOT NULL REFERENCES medicines(medicine_id),
    batch_id INTEGER REFERENCES medicine_batches(batch_id),  -- NULL for legacy rows
    quantity_dispensed INTEGER NOT NULL CHECK (quantity_dispensed > 0),
    dispensed_by INTEGER NOT NULL REFERENCES staff(staff_id),
    dispensed_at TEXT NOT NULL,
    notes TEXT
);

CREATE INDEX IF NOT EXISTS idx_dispenses_prescription ON prescription_dispenses(prescription_id);
CREATE INDEX IF NOT EXISTS idx_dispenses_batch ON prescription_dispenses(batch_id);

-- ============================================================================
-- Billing
-- ============================================================================

CREATE TABLE IF NOT EXISTS bills (
    bill_id INTEGER PRIMARY KEY AUTOINCREMENT,
    visit_id INTEGER NOT NULL REFERENCES visits(visit_id),
    total_amount TEXT NOT NULL DEFAULT '0',
    paid_amount TEXT NOT NULL DEFAULT '0',
    status TEXT NOT NULL DEFAULT 'DRAFT'
        CHECK (status IN ('DRAFT', 'NOT_PAID', 'PARTIALLY_PAID', 'PAID', 'CANCELLED')),
    created_at TEXT NOT NULL
);

-- One live bill per visit; cancelled bills step aside
CREATE UNIQUE INDEX IF NOT EXISTS idx_bills_live_visit ON bills(visit_id) WHERE status != 'CANCELLED';

-- service_ref_id points into the originating service's own id space, not a FK
CREATE TABLE IF NOT EXISTS bill_items (
    bill_item_id INTEGER PRIMARY KEY AUTOINCREMENT,
    bill_id INTEGER NOT NULL REFERENCES bills(bill_id) ON DELETE CASCADE,
    visit_id INTEGER NOT NULL REFERENCES visits(visit_id),
    service_type TEXT NOT NULL
        CHECK (service_type IN ('CONSULTATION', 'LAB_TEST', 'RADIOLOGY_TEST', 'OPERATION',
                                'BED', 'PHARMACY', 'OT_CONSUMABLE')),
    service_ref_id INTEGER NOT NULL,
    amount TEXT NOT NULL,
    UNIQUE (service_type, service_ref_id)
);

CREATE INDEX IF NOT EXISTS idx_bill_items_bill ON bill_items(bill_id);
"#;
