//! Whole plans executed through a connection

use mallard::common::{ComparisonType, OrderType};
use mallard::execution::aggregate::{AggregateExpression, AggregateFunction};
use mallard::execution::operators::{
    HashAggregate, HashJoin, JoinCondition, JoinType, Order, Projection, SimpleAggregate,
    TableScan,
};
use mallard::execution::{ArithmeticOp, Executor, Expression, PhysicalOperator};
use mallard::storage::{DataTable, TableFilter};
use mallard::{Config, Database, Error, LogicalType, Value};
use std::sync::Arc;
use std::time::Duration;

const ROWS: i32 = 100_000;

fn database(threads: usize) -> Database {
    let config = Config::default()
        .with_threads(threads)
        .with_task_timeout(Duration::from_millis(5));
    Database::with_config(config).unwrap()
}

fn int_rows(values: impl Iterator<Item = i32>) -> Vec<Vec<Value>> {
    values.map(|v| vec![Value::Integer(v)]).collect()
}

fn numbers(db: &Database) -> Arc<DataTable> {
    let table = db.create_table(vec![LogicalType::Integer]).unwrap();
    db.connect().append(&table, &int_rows(0..ROWS)).unwrap();
    table
}

fn sum_and_count(child: Arc<dyn PhysicalOperator>) -> Arc<dyn PhysicalOperator> {
    Arc::new(SimpleAggregate::new(
        child,
        vec![
            AggregateExpression::new(
                AggregateFunction::Sum,
                Expression::column(0, LogicalType::Integer),
            ),
            AggregateExpression::count_star(),
        ],
    ))
}

#[test]
fn test_parallel_scan_aggregate() {
    let db = database(4);
    let table = numbers(&db);
    assert!(table.max_threads() > 1);

    let scan = Arc::new(TableScan::new(Arc::clone(&table), vec![0], vec![]).unwrap());
    let plan = sum_and_count(scan);
    let mut conn = db.connect();
    let mut executor = Executor::new(Arc::clone(conn.client()));
    executor.initialize(Arc::clone(&plan)).unwrap();
    assert_eq!(executor.pipelines().len(), 1);
    assert_eq!(executor.pipelines()[0].total_tasks(), 4);
    executor.reset();
    conn.client().commit().unwrap();

    let result = conn.query(plan).unwrap();
    let expected = (ROWS as i128) * (ROWS as i128 - 1) / 2;
    assert_eq!(result.rows(), vec![vec![Value::HugeInt(expected), Value::BigInt(ROWS as i64)]]);
}

#[test]
fn test_parallel_matches_single_thread() {
    let filters = || {
        vec![
            TableFilter::new(0, ComparisonType::GreaterThanOrEqual, 25_000),
            TableFilter::new(0, ComparisonType::LessThan, 75_000),
        ]
    };
    let mut results = Vec::new();
    for threads in [1, 4] {
        let db = database(threads);
        let table = numbers(&db);
        let scan = Arc::new(TableScan::new(table, vec![0], filters()).unwrap());
        let result = db.connect().query(sum_and_count(scan)).unwrap();
        results.push(result.rows());
    }
    assert_eq!(results[0], results[1]);
    assert_eq!(results[0][0][1], Value::BigInt(50_000));
}

#[test]
fn test_join_then_group_by() {
    let db = database(3);
    let orders = db
        .create_table(vec![LogicalType::Integer, LogicalType::Integer])
        .unwrap();
    let customers = db
        .create_table(vec![LogicalType::Integer, LogicalType::Integer])
        .unwrap();
    let mut conn = db.connect();
    // orders reference customers 0..1200 five times each; only 0..1000 exist
    let order_rows: Vec<Vec<Value>> = (0..6000)
        .map(|i| vec![Value::Integer(i / 5), Value::Integer(10)])
        .collect();
    conn.append(&orders, &order_rows).unwrap();
    let customer_rows: Vec<Vec<Value>> = (0..1000)
        .map(|i| vec![Value::Integer(i), Value::Integer(i % 3)])
        .collect();
    conn.append(&customers, &customer_rows).unwrap();

    let join = HashJoin::new(
        Arc::new(TableScan::new(orders, vec![0, 1], vec![]).unwrap()),
        Arc::new(TableScan::new(customers, vec![0, 1], vec![]).unwrap()),
        vec![JoinCondition::new(0, 0)],
        JoinType::Inner,
    )
    .unwrap();
    let aggregate = HashAggregate::new(
        Arc::new(join),
        vec![Expression::column(3, LogicalType::Integer)],
        vec![
            AggregateExpression::new(
                AggregateFunction::Sum,
                Expression::column(1, LogicalType::Integer),
            ),
            AggregateExpression::count_star(),
        ],
    );
    let order = Order::new(Arc::new(aggregate), vec![(0, OrderType::Ascending)]).unwrap();

    let result = conn.query(Arc::new(order)).unwrap();
    // region 0 holds 334 of the matched customers, regions 1 and 2 hold 333
    assert_eq!(
        result.rows(),
        vec![
            vec![Value::Integer(0), Value::HugeInt(334 * 50), Value::BigInt(334 * 5)],
            vec![Value::Integer(1), Value::HugeInt(333 * 50), Value::BigInt(333 * 5)],
            vec![Value::Integer(2), Value::HugeInt(333 * 50), Value::BigInt(333 * 5)],
        ]
    );
}

#[test]
fn test_task_error_fails_query() {
    let db = database(4);
    let table = db.create_table(vec![LogicalType::Integer]).unwrap();
    let mut conn = db.connect();
    let mut rows = int_rows(0..ROWS);
    rows[77_777] = vec![Value::Integer(i32::MAX)];
    conn.append(&table, &rows).unwrap();

    let doubled = Projection::new(
        Arc::new(TableScan::new(Arc::clone(&table), vec![0], vec![]).unwrap()),
        vec![Expression::arithmetic(
            ArithmeticOp::Multiply,
            Expression::column(0, LogicalType::Integer),
            Expression::constant(2),
        )],
    );
    let error = conn.query(sum_and_count(Arc::new(doubled))).unwrap_err();
    match error {
        Error::Execution(message) => assert!(message.contains("Overflow"), "{}", message),
        other => panic!("unexpected error {:?}", other),
    }
    assert!(conn.client().active_transaction().is_none());

    // the connection stays usable
    let scan = Arc::new(TableScan::new(table, vec![0], vec![]).unwrap());
    let result = conn.query(sum_and_count(scan)).unwrap();
    assert_eq!(result.get_value(1, 0), Value::BigInt(ROWS as i64));
}
