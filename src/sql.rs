use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::BookingRequest;
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertResource(Resource),
    InsertService(Service),
    /// A public booking: `INSERT INTO appointments`.
    InsertAppointment(BookingRequest),
    SelectSlots {
        resource_id: Ulid,
        service_id: Ulid,
        date: String,
    },
    SelectAppointments {
        resource_id: Ulid,
        date: String,
    },
    CancelAppointment {
        id: Ulid,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(first) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match first {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

const RESOURCE_COLUMNS: &[&str] = &["id", "name", "availability"];
const SERVICE_COLUMNS: &[&str] = &["id", "name", "duration", "price"];
const APPOINTMENT_COLUMNS: &[&str] = &[
    "resource_id",
    "service_id",
    "day",
    "start_time",
    "client_name",
    "client_email",
    "client_phone",
];

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let expected = match table.as_str() {
        "resources" => RESOURCE_COLUMNS,
        "services" => SERVICE_COLUMNS,
        "appointments" => APPOINTMENT_COLUMNS,
        _ => return Err(SqlError::UnknownTable(table)),
    };
    let values = arrange_values(expected, &insert.columns, extract_insert_values(insert)?)?;

    match table.as_str() {
        "resources" => {
            if values.is_empty() {
                return Err(SqlError::WrongArity("resources", 1, 0));
            }
            let name = values.get(1).map(parse_string_or_null).transpose()?.flatten();
            let availability = match values.get(2).map(parse_string_or_null).transpose()?.flatten() {
                Some(json) => Some(
                    serde_json::from_str::<WeeklyAvailability>(&json)
                        .map_err(|e| SqlError::Parse(format!("bad availability: {e}")))?,
                ),
                None => None,
            };
            Ok(Command::InsertResource(Resource {
                id: parse_ulid(&values[0])?,
                name,
                availability,
            }))
        }
        "services" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("services", 4, values.len()));
            }
            Ok(Command::InsertService(Service {
                id: parse_ulid(&values[0])?,
                name: parse_string_or_null(&values[1])?,
                duration_minutes: parse_u32(&values[2])?,
                price: parse_i64(&values[3])?,
            }))
        }
        "appointments" => {
            if values.len() < 6 {
                return Err(SqlError::WrongArity("appointments", 6, values.len()));
            }
            Ok(Command::InsertAppointment(BookingRequest {
                resource_id: parse_ulid(&values[0])?,
                service_id: parse_ulid(&values[1])?,
                date: parse_string(&values[2])?,
                start_time: parse_string(&values[3])?,
                client_name: parse_string(&values[4])?,
                client_email: parse_string(&values[5])?,
                client_phone: values.get(6).map(parse_string_or_null).transpose()?.flatten(),
            }))
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "appointments" => Ok(Command::CancelAppointment { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Equality filters of a `WHERE a = .. AND b = ..` clause.
#[derive(Default)]
struct Filters {
    resource_id: Option<Ulid>,
    service_id: Option<Ulid>,
    date: Option<String>,
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        extract_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "slots" => Ok(Command::SelectSlots {
            resource_id: filters.resource_id.ok_or(SqlError::MissingFilter("resource_id"))?,
            service_id: filters.service_id.ok_or(SqlError::MissingFilter("service_id"))?,
            date: filters.date.ok_or(SqlError::MissingFilter("day"))?,
        }),
        "appointments" => Ok(Command::SelectAppointments {
            resource_id: filters.resource_id.ok_or(SqlError::MissingFilter("resource_id"))?,
            date: filters.date.ok_or(SqlError::MissingFilter("day"))?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn extract_filters(expr: &Expr, filters: &mut Filters) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op: ast::BinaryOperator::And, right } => {
            extract_filters(left, filters)?;
            extract_filters(right, filters)?;
        }
        Expr::BinaryOp { left, op: ast::BinaryOperator::Eq, right } => {
            match expr_column_name(left).as_deref() {
                Some("resource_id") => filters.resource_id = Some(parse_ulid(right)?),
                Some("service_id") => filters.service_id = Some(parse_ulid(right)?),
                Some("day") => filters.date = Some(parse_string(right)?),
                Some(other) => return Err(SqlError::Unsupported(format!("filter on {other}"))),
                None => return Err(SqlError::Unsupported("filter must name a column".into())),
            }
        }
        Expr::Nested(inner) => extract_filters(inner, filters)?,
        _ => return Err(SqlError::Unsupported(format!("filter {expr}"))),
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

/// First row of an `INSERT .. VALUES`. Extra rows are rejected.
fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

/// Put the row into the table's canonical column order. Without a column
/// list the values are already positional; unnamed columns become NULL.
fn arrange_values(
    expected: &[&str],
    columns: &[ast::Ident],
    values: Vec<Expr>,
) -> Result<Vec<Expr>, SqlError> {
    if columns.is_empty() {
        return Ok(values);
    }
    if columns.len() != values.len() {
        return Err(SqlError::Parse(format!(
            "{} columns but {} values",
            columns.len(),
            values.len()
        )));
    }

    let mut arranged = vec![Expr::Value(Value::Null.with_empty_span()); expected.len()];
    let mut seen = vec![false; expected.len()];
    for (column, value) in columns.iter().zip(values) {
        let name = column.value.to_lowercase();
        let Some(i) = expected.iter().position(|c| *c == name) else {
            return Err(SqlError::Parse(format!("unknown column: {name}")));
        };
        if std::mem::replace(&mut seen[i], true) {
            return Err(SqlError::Parse(format!("duplicate column: {name}")));
        }
        arranged[i] = value;
    }
    Ok(arranged)
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => parse_ulid(right),
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    parse_string_or_null(expr)?.ok_or_else(|| SqlError::Parse("unexpected NULL".into()))
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) => Ok(Some(s.clone())),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of range")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
