//! Update visibility across connections

use mallard::execution::operators::TableScan;
use mallard::storage::DataTable;
use mallard::{Config, Connection, Database, Error, LogicalType, Value};
use std::sync::Arc;

fn setup() -> (Database, Arc<DataTable>) {
    let db = Database::with_config(Config::default().with_threads(2)).unwrap();
    let table = db
        .create_table(vec![LogicalType::Integer, LogicalType::BigInt])
        .unwrap();
    let rows: Vec<Vec<Value>> = (0..3000)
        .map(|i| vec![Value::Integer(i), Value::BigInt(i as i64 * 2)])
        .collect();
    db.connect().append(&table, &rows).unwrap();
    (db, table)
}

fn read(conn: &mut Connection, table: &Arc<DataTable>, row: usize) -> Value {
    let scan = TableScan::new(Arc::clone(table), vec![0, 1], vec![]).unwrap();
    let result = conn.query(Arc::new(scan)).unwrap();
    assert_eq!(result.row_count(), 3000);
    result.get_value(1, row)
}

#[test]
fn test_uncommitted_update_is_private() {
    let (db, table) = setup();
    let mut writer = db.connect();
    let mut reader = db.connect();

    writer.begin().unwrap();
    writer
        .update(&table, 1, &[5, 2048], &[Value::BigInt(-1), Value::BigInt(-2)])
        .unwrap();
    assert_eq!(read(&mut writer, &table, 5), Value::BigInt(-1));
    assert_eq!(read(&mut writer, &table, 2048), Value::BigInt(-2));
    assert_eq!(read(&mut reader, &table, 5), Value::BigInt(10));
    assert_eq!(read(&mut reader, &table, 2048), Value::BigInt(4096));

    writer.commit().unwrap();
    assert_eq!(read(&mut reader, &table, 5), Value::BigInt(-1));
    assert_eq!(read(&mut reader, &table, 2048), Value::BigInt(-2));
}

#[test]
fn test_rollback_restores_values() {
    let (db, table) = setup();
    let mut writer = db.connect();
    writer.begin().unwrap();
    writer.update(&table, 1, &[7], &[Value::Null]).unwrap();
    assert_eq!(read(&mut writer, &table, 7), Value::Null);
    writer.rollback().unwrap();

    let mut reader = db.connect();
    assert_eq!(read(&mut reader, &table, 7), Value::BigInt(14));
    assert_eq!(read(&mut writer, &table, 7), Value::BigInt(14));
}

#[test]
fn test_snapshot_ignores_later_commit() {
    let (db, table) = setup();
    let mut reader = db.connect();
    reader.begin().unwrap();
    assert_eq!(read(&mut reader, &table, 1), Value::BigInt(2));

    let mut writer = db.connect();
    writer.update(&table, 1, &[1], &[Value::BigInt(100)]).unwrap();

    assert_eq!(read(&mut reader, &table, 1), Value::BigInt(2));
    reader.commit().unwrap();
    assert_eq!(read(&mut reader, &table, 1), Value::BigInt(100));
}

#[test]
fn test_concurrent_update_conflicts() {
    let (db, table) = setup();
    let mut first = db.connect();
    let mut second = db.connect();
    first.begin().unwrap();
    first.update(&table, 1, &[3], &[Value::BigInt(30)]).unwrap();

    let conflict = second.update(&table, 1, &[3], &[Value::BigInt(31)]);
    assert!(matches!(conflict, Err(Error::WriteConflict(3))));
    // the failed statement rolled back its own transaction
    assert!(second.client().active_transaction().is_none());

    // a different row of the same vector does not conflict
    second.update(&table, 1, &[4], &[Value::BigInt(41)]).unwrap();
    first.commit().unwrap();
    assert_eq!(read(&mut second, &table, 3), Value::BigInt(30));
    assert_eq!(read(&mut second, &table, 4), Value::BigInt(41));
}
