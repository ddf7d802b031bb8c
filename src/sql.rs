use chrono::{NaiveDate, Weekday};
use sqlparser::ast::{
    self, AssignmentTarget, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr, Statement,
    TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertTable {
        table: Table,
    },
    UpdateTable {
        id: Ulid,
        update: TableUpdate,
    },
    DeleteTable {
        id: Ulid,
    },
    SelectTables {
        active_only: bool,
    },
    InsertReservation {
        reservation: NewReservation,
    },
    /// Staff status change.
    UpdateReservationStatus {
        id: Ulid,
        status: ReservationStatus,
    },
    /// Guest cancellation, subject to the notice window.
    CancelReservation {
        id: Ulid,
    },
    SelectReservation {
        id: Ulid,
    },
    SelectReservations {
        date: NaiveDate,
        include_cancelled: bool,
    },
    SelectAvailability {
        date: NaiveDate,
        party_size: u32,
    },
    SelectBookableDates,
    SelectSettings,
    UpdateSettings {
        patch: SettingsPatch,
    },
    InsertExceptionDate {
        exception: ExceptionDate,
    },
    DeleteExceptionDate {
        date: NaiveDate,
    },
    SelectExceptionDates {
        from: Option<NaiveDate>,
    },
    Listen {
        channel: String,
    },
    Unlisten {
        channel: String,
    },
    UnlistenAll,
}

impl Command {
    /// Catalog, policy and status changes are staff-only.
    pub fn requires_admin(&self) -> bool {
        matches!(
            self,
            Command::InsertTable { .. }
                | Command::UpdateTable { .. }
                | Command::DeleteTable { .. }
                | Command::UpdateReservationStatus { .. }
                | Command::UpdateSettings { .. }
                | Command::InsertExceptionDate { .. }
                | Command::DeleteExceptionDate { .. }
        )
    }
}

const TABLE_COLUMNS: &[&str] = &["id", "table_number", "seats", "is_active", "available_hours"];
const RESERVATION_COLUMNS: &[&str] = &[
    "id",
    "table_id",
    "reservation_date",
    "reservation_time",
    "guests_count",
    "guest_name",
];
const EXCEPTION_COLUMNS: &[&str] = &["exception_date", "type", "reason"];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    let upper = trimmed.to_uppercase();
    if upper.starts_with("LISTEN ") {
        let channel = channel_name(&trimmed[7..]);
        return Ok(Command::Listen { channel });
    }
    if upper == "UNLISTEN *" {
        return Ok(Command::UnlistenAll);
    }
    if upper.starts_with("UNLISTEN ") {
        let channel = channel_name(&trimmed[9..]);
        return Ok(Command::Unlisten { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// The relation a SELECT reads from, if `sql` is one. Works on statements
/// that still carry `$n` placeholders.
pub fn select_target(sql: &str) -> Option<String> {
    let stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql).ok()?;
    match stmts.first()? {
        Statement::Query(query) => match query.body.as_ref() {
            SetExpr::Select(select) => table_factor_name(&select.from.first()?.relation).ok(),
            _ => None,
        },
        _ => None,
    }
}

fn channel_name(raw: &str) -> String {
    raw.trim().trim_matches('"').to_string()
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    match table.as_str() {
        "tables" => {
            let row = Row::from_insert(insert, TABLE_COLUMNS)?;
            Ok(Command::InsertTable {
                table: Table {
                    id: parse_ulid(row.require("id")?)?,
                    table_number: parse_u32(row.require("table_number")?)?,
                    seats: parse_u32(row.require("seats")?)?,
                    is_active: row.get("is_active").map(parse_bool).transpose()?.unwrap_or(true),
                    available_hours: row
                        .get("available_hours")
                        .map(parse_hours)
                        .transpose()?
                        .unwrap_or_default(),
                },
            })
        }
        "reservations" => {
            let row = Row::from_insert(insert, RESERVATION_COLUMNS)?;
            Ok(Command::InsertReservation {
                reservation: NewReservation {
                    id: parse_ulid(row.require("id")?)?,
                    table_id: row.get("table_id").map(parse_ulid_or_null).transpose()?.flatten(),
                    reservation_date: parse_date(row.require("reservation_date")?)?,
                    reservation_time: parse_time(row.require("reservation_time")?)?,
                    guests_count: parse_u32(row.require("guests_count")?)?,
                    guest_name: row.get("guest_name").map(parse_string_or_null).transpose()?.flatten(),
                },
            })
        }
        "exception_dates" => {
            let row = Row::from_insert(insert, EXCEPTION_COLUMNS)?;
            let kind = parse_string(row.require("type")?)?;
            Ok(Command::InsertExceptionDate {
                exception: ExceptionDate {
                    date: parse_date(row.require("exception_date")?)?,
                    kind: kind.parse().map_err(SqlError::Parse)?,
                    reason: row.get("reason").map(parse_string_or_null).transpose()?.flatten(),
                },
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// One VALUES row keyed by column name. Without a column list the values
/// follow the relation's canonical column order.
struct Row {
    columns: Vec<String>,
    values: Vec<Expr>,
}

impl Row {
    fn from_insert(insert: &ast::Insert, canonical: &[&str]) -> Result<Self, SqlError> {
        let values = extract_insert_values(insert)?;
        let columns: Vec<String> = if insert.columns.is_empty() {
            canonical.iter().take(values.len()).map(|c| c.to_string()).collect()
        } else {
            insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
        };
        if columns.len() != values.len() {
            return Err(SqlError::WrongArity("VALUES", columns.len(), values.len()));
        }
        if let Some(unknown) = columns.iter().find(|c| !canonical.contains(&c.as_str())) {
            return Err(SqlError::UnknownColumn(unknown.clone()));
        }
        Ok(Self { columns, values })
    }

    fn get(&self, column: &str) -> Option<&Expr> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }

    fn require(&self, column: &'static str) -> Result<&Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingColumn(column))
    }
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let mut changes = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name)
                .ok_or_else(|| SqlError::Parse("empty column name".into()))?,
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()));
            }
        };
        changes.push((column, &assignment.value));
    }

    match table.as_str() {
        "tables" => {
            let id = extract_where_id(selection)?;
            let mut update = TableUpdate::default();
            for (column, value) in changes {
                match column.as_str() {
                    "table_number" => update.table_number = Some(parse_u32(value)?),
                    "seats" => update.seats = Some(parse_u32(value)?),
                    "is_active" => update.is_active = Some(parse_bool(value)?),
                    "available_hours" => update.available_hours = Some(parse_hours(value)?),
                    _ => return Err(SqlError::UnknownColumn(column)),
                }
            }
            Ok(Command::UpdateTable { id, update })
        }
        "reservations" => {
            let id = extract_where_id(selection)?;
            let mut status: Option<ReservationStatus> = None;
            for (column, value) in changes {
                match column.as_str() {
                    "status" => {
                        status = Some(parse_string(value)?.parse().map_err(SqlError::Parse)?)
                    }
                    _ => return Err(SqlError::UnknownColumn(column)),
                }
            }
            Ok(Command::UpdateReservationStatus {
                id,
                status: status.ok_or(SqlError::MissingColumn("status"))?,
            })
        }
        "settings" => {
            let mut patch = SettingsPatch::default();
            for (column, value) in changes {
                if let Some(day) = weekday_column(&column) {
                    patch.days.push((day, parse_bool(value)?));
                    continue;
                }
                match column.as_str() {
                    "advance_booking_days" => patch.advance_booking_days = Some(parse_u32(value)?),
                    "max_reservations_per_slot" => {
                        patch.max_reservations_per_slot = Some(parse_u32(value)?)
                    }
                    _ => return Err(SqlError::UnknownColumn(column)),
                }
            }
            Ok(Command::UpdateSettings { patch })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn weekday_column(column: &str) -> Option<Weekday> {
    match column {
        "monday" => Some(Weekday::Mon),
        "tuesday" => Some(Weekday::Tue),
        "wednesday" => Some(Weekday::Wed),
        "thursday" => Some(Weekday::Thu),
        "friday" => Some(Weekday::Fri),
        "saturday" => Some(Weekday::Sat),
        "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;

    match table.as_str() {
        "tables" => Ok(Command::DeleteTable {
            id: extract_where_id(&delete.selection)?,
        }),
        "reservations" => Ok(Command::CancelReservation {
            id: extract_where_id(&delete.selection)?,
        }),
        "exception_dates" => {
            let filters = collect_where(&delete.selection)?;
            let date = find_filter(&filters, "exception_date", BinaryOperator::Eq)
                .ok_or(SqlError::MissingFilter("exception_date"))?;
            Ok(Command::DeleteExceptionDate {
                date: parse_date(date)?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let filters = collect_where(&select.selection)?;

    match table.as_str() {
        "tables" => {
            let active_only = find_filter(&filters, "is_active", BinaryOperator::Eq)
                .map(parse_bool)
                .transpose()?
                .unwrap_or(false);
            Ok(Command::SelectTables { active_only })
        }
        "reservations" => {
            if let Some(id) = find_filter(&filters, "id", BinaryOperator::Eq) {
                return Ok(Command::SelectReservation { id: parse_ulid(id)? });
            }
            let date = find_filter(&filters, "reservation_date", BinaryOperator::Eq)
                .ok_or(SqlError::MissingFilter("reservation_date"))?;
            let include_cancelled = find_filter(&filters, "include_cancelled", BinaryOperator::Eq)
                .map(parse_bool)
                .transpose()?
                .unwrap_or(false);
            Ok(Command::SelectReservations {
                date: parse_date(date)?,
                include_cancelled,
            })
        }
        "availability" => {
            let date = find_filter(&filters, "reservation_date", BinaryOperator::Eq)
                .ok_or(SqlError::MissingFilter("reservation_date"))?;
            let party_size = find_filter(&filters, "party_size", BinaryOperator::Eq)
                .ok_or(SqlError::MissingFilter("party_size"))?;
            Ok(Command::SelectAvailability {
                date: parse_date(date)?,
                party_size: parse_u32(party_size)?,
            })
        }
        "bookable_dates" => Ok(Command::SelectBookableDates),
        "settings" => Ok(Command::SelectSettings),
        "exception_dates" => {
            let from = find_filter(&filters, "exception_date", BinaryOperator::GtEq)
                .map(parse_date)
                .transpose()?;
            Ok(Command::SelectExceptionDates { from })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `column <op> value` conjuncts of a WHERE clause.
struct Filter<'a> {
    column: String,
    op: BinaryOperator,
    value: &'a Expr,
}

fn collect_where(selection: &Option<Expr>) -> Result<Vec<Filter<'_>>, SqlError> {
    let mut filters = Vec::new();
    if let Some(expr) = selection {
        collect_filters(expr, &mut filters)?;
    }
    Ok(filters)
}

fn collect_filters<'a>(expr: &'a Expr, out: &mut Vec<Filter<'a>>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_filters(inner, out),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            collect_filters(left, out)?;
            collect_filters(right, out)
        }
        Expr::BinaryOp { left, op, right } => {
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter: {expr}")))?;
            out.push(Filter {
                column,
                op: op.clone(),
                value: right,
            });
            Ok(())
        }
        _ => Err(SqlError::Unsupported(format!("filter: {expr}"))),
    }
}

fn find_filter<'a>(filters: &[Filter<'a>], column: &str, op: BinaryOperator) -> Option<&'a Expr> {
    filters
        .iter()
        .find(|f| f.column == column && f.op == op)
        .map(|f| f.value)
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
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
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

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::Eq,
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

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_string(expr).map(Some)
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_ulid(expr).map(Some)
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .trim()
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of range")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        Some(value) => Err(SqlError::Parse(format!("expected bool, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

fn parse_time(expr: &Expr) -> Result<SlotTime, SqlError> {
    parse_string(expr)?.parse().map_err(SqlError::Parse)
}

/// `ARRAY['19:00', '19:30']`, `'{19:00,19:30}'` or `'19:00,19:30'`.
fn parse_hours(expr: &Expr) -> Result<Vec<SlotTime>, SqlError> {
    if let Expr::Array(array) = expr {
        return array.elem.iter().map(parse_time).collect();
    }
    if is_null(expr) {
        return Ok(Vec::new());
    }
    let s = parse_string(expr)?;
    s.trim()
        .trim_start_matches('{')
        .trim_end_matches('}')
        .split(',')
        .map(|part| part.trim().trim_matches('"'))
        .filter(|part| !part.is_empty())
        .map(|part| part.parse().map_err(SqlError::Parse))
        .collect()
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
