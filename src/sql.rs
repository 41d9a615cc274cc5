use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    SetDailyLimit {
        date: NaiveDate,
        ceiling: Ceiling,
        limit: i64,
    },
    ClearDailyLimit {
        date: NaiveDate,
        ceiling: Ceiling,
    },
    SetHourSet {
        date: NaiveDate,
        hours: Vec<SlotTime>,
    },
    ClearHourSet {
        date: NaiveDate,
    },
    SetHourAllocation {
        date: NaiveDate,
        percentages: HourAllocation,
    },
    ClearHourAllocation {
        date: NaiveDate,
    },
    SaveHourConfiguration {
        date: NaiveDate,
        config: HourConfiguration,
    },
    ClearHourConfiguration {
        date: NaiveDate,
    },
    SetDayOpen {
        date: NaiveDate,
        is_open: bool,
    },
    ClearDayOverride {
        date: NaiveDate,
    },
    InsertBooking {
        booking: Booking,
    },
    BatchInsertBookings {
        bookings: Vec<Booking>,
    },
    CancelBooking {
        id: Ulid,
    },
    AppendModification {
        booking_id: Ulid,
        field: String,
        old_value: String,
        new_value: String,
    },
    SelectBookings {
        date: Option<NaiveDate>,
    },
    SelectSlots {
        date: NaiveDate,
    },
    SelectAvailableSlots {
        date: NaiveDate,
        party_size: u32,
    },
    SelectDateFeasibility {
        date: NaiveDate,
        party_size: Option<u32>,
        requested_time: Option<String>,
        booking_id: Option<Ulid>,
    },
    SelectModificationEligibility {
        booking_id: Ulid,
    },
    SelectPartySizeChange {
        date: NaiveDate,
        current_party_size: u32,
        new_party_size: u32,
        booking_id: Ulid,
    },
    SelectBookingWindow {
        days: Option<u32>,
    },
    SelectMonthGrid {
        year: i32,
        month: u32,
    },
    SelectHourPercentages {
        date: NaiveDate,
    },
    SelectDayStatus {
        date: NaiveDate,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── Column sets ───────────────────────────────────────────────

/// Positional column order used when an INSERT omits its column list.
fn default_columns(table: &str) -> Option<&'static [&'static str]> {
    Some(match table {
        "daily_limits" | "modification_limits" => &["date", "daily_limit"],
        "opening_hours" => &["date", "hours"],
        "hour_allocations" => &["date", "percentages"],
        "hour_configurations" => &["date", "config"],
        "day_overrides" => &["date", "is_open"],
        "bookings" => &["id", "date", "time", "party_size", "status"],
        "modification_history" => &["booking_id", "field", "old_value", "new_value"],
        _ => return None,
    })
}

fn ceiling_for(table: &str) -> Option<Ceiling> {
    match table {
        "daily_limits" => Some(Ceiling::Booking),
        "modification_limits" => Some(Ceiling::Modification),
        _ => None,
    }
}

/// Named values of one INSERT row or one WHERE clause.
struct Fields {
    values: HashMap<String, Expr>,
}

impl Fields {
    fn required(&self, col: &'static str) -> Result<&Expr, SqlError> {
        match self.values.get(col) {
            Some(expr) if !is_null(expr) => Ok(expr),
            _ => Err(SqlError::MissingFilter(col)),
        }
    }

    fn optional(&self, col: &str) -> Option<&Expr> {
        self.values.get(col).filter(|e| !is_null(e))
    }
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let columns = default_columns(&table).ok_or_else(|| SqlError::UnknownTable(table.clone()))?;
    let rows = extract_all_insert_rows(insert)?;
    let named: Vec<String> = insert.columns.iter().map(|c| c.value.to_lowercase()).collect();

    let mut all = Vec::with_capacity(rows.len());
    for row in rows {
        let names: Vec<String> = if named.is_empty() {
            columns.iter().map(|c| c.to_string()).collect()
        } else {
            named.clone()
        };
        if row.len() > names.len() {
            return Err(SqlError::WrongArity(table.clone(), names.len(), row.len()));
        }
        all.push(Fields {
            values: names.into_iter().zip(row).collect(),
        });
    }

    if table == "bookings" {
        let mut bookings = Vec::with_capacity(all.len());
        for (i, row) in all.iter().enumerate() {
            bookings.push(booking_from(row).map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?);
        }
        return Ok(if bookings.len() == 1 {
            Command::InsertBooking {
                booking: bookings.remove(0),
            }
        } else {
            Command::BatchInsertBookings { bookings }
        });
    }

    if all.len() != 1 {
        return Err(SqlError::Unsupported(format!("multi-row INSERT into {table}")));
    }
    let row = &all[0];

    if let Some(ceiling) = ceiling_for(&table) {
        return Ok(Command::SetDailyLimit {
            date: parse_date(row.required("date")?)?,
            ceiling,
            limit: parse_i64_expr(row.required("daily_limit")?)?,
        });
    }

    match table.as_str() {
        "opening_hours" => Ok(Command::SetHourSet {
            date: parse_date(row.required("date")?)?,
            hours: parse_hours(row.required("hours")?)?,
        }),
        "hour_allocations" => Ok(Command::SetHourAllocation {
            date: parse_date(row.required("date")?)?,
            percentages: parse_json(row.required("percentages")?)?,
        }),
        "hour_configurations" => {
            let stored: BTreeMap<SlotTime, StoredSlot> = parse_json(row.required("config")?)?;
            Ok(Command::SaveHourConfiguration {
                date: parse_date(row.required("date")?)?,
                config: stored.into_iter().map(|(k, v)| (k, v.into())).collect(),
            })
        }
        "day_overrides" => Ok(Command::SetDayOpen {
            date: parse_date(row.required("date")?)?,
            is_open: parse_bool(row.required("is_open")?)?,
        }),
        "modification_history" => Ok(Command::AppendModification {
            booking_id: parse_ulid_expr(row.required("booking_id")?)?,
            field: parse_string(row.required("field")?)?,
            old_value: parse_string(row.required("old_value")?)?,
            new_value: parse_string(row.required("new_value")?)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn booking_from(row: &Fields) -> Result<Booking, SqlError> {
    let status = match row.optional("status") {
        Some(expr) => parse_string(expr)?.parse().map_err(SqlError::Parse)?,
        None => BookingStatus::Confirmed,
    };
    Ok(Booking {
        id: parse_ulid_expr(row.required("id")?)?,
        date: parse_date(row.required("date")?)?,
        time: parse_slot(row.required("time")?)?,
        party_size: parse_u32(row.required("party_size")?)?,
        status,
    })
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = where_filters(delete.selection.as_ref())?;

    if table == "bookings" {
        return Ok(Command::CancelBooking {
            id: parse_ulid_expr(filters.required("id")?)?,
        });
    }

    let date = parse_date(filters.required("date")?)?;
    if let Some(ceiling) = ceiling_for(&table) {
        return Ok(Command::ClearDailyLimit { date, ceiling });
    }
    match table.as_str() {
        "opening_hours" => Ok(Command::ClearHourSet { date }),
        "hour_allocations" => Ok(Command::ClearHourAllocation { date }),
        "hour_configurations" => Ok(Command::ClearHourConfiguration { date }),
        "day_overrides" => Ok(Command::ClearDayOverride { date }),
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
    let f = where_filters(select.selection.as_ref())?;

    match table.as_str() {
        "bookings" => Ok(Command::SelectBookings {
            date: f.optional("date").map(parse_date).transpose()?,
        }),
        "slots" => Ok(Command::SelectSlots {
            date: parse_date(f.required("date")?)?,
        }),
        "available_slots" => Ok(Command::SelectAvailableSlots {
            date: parse_date(f.required("date")?)?,
            party_size: parse_u32(f.required("party_size")?)?,
        }),
        "date_feasibility" => Ok(Command::SelectDateFeasibility {
            date: parse_date(f.required("date")?)?,
            party_size: f.optional("party_size").map(parse_u32).transpose()?,
            requested_time: f.optional("requested_time").map(parse_string).transpose()?,
            booking_id: f.optional("booking_id").map(parse_ulid_expr).transpose()?,
        }),
        "modification_eligibility" => Ok(Command::SelectModificationEligibility {
            booking_id: parse_ulid_expr(f.required("booking_id")?)?,
        }),
        "party_size_change" => Ok(Command::SelectPartySizeChange {
            date: parse_date(f.required("date")?)?,
            current_party_size: parse_u32(f.required("current_party_size")?)?,
            new_party_size: parse_u32(f.required("new_party_size")?)?,
            booking_id: parse_ulid_expr(f.required("booking_id")?)?,
        }),
        "booking_window" => Ok(Command::SelectBookingWindow {
            days: f.optional("days").map(parse_u32).transpose()?,
        }),
        "month_grid" => Ok(Command::SelectMonthGrid {
            year: i32::try_from(parse_i64_expr(f.required("year")?)?)
                .map_err(|_| SqlError::Parse("year out of range".into()))?,
            month: parse_u32(f.required("month")?)?,
        }),
        "hour_percentages" => Ok(Command::SelectHourPercentages {
            date: parse_date(f.required("date")?)?,
        }),
        "day_status" => Ok(Command::SelectDayStatus {
            date: parse_date(f.required("date")?)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Collect `col = value` terms joined by AND.
fn where_filters(selection: Option<&Expr>) -> Result<Fields, SqlError> {
    let mut values = HashMap::new();
    if let Some(expr) = selection {
        collect_equalities(expr, &mut values)?;
    }
    Ok(Fields { values })
}

fn collect_equalities(expr: &Expr, out: &mut HashMap<String, Expr>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_equalities(inner, out),
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_equalities(left, out)?;
                collect_equalities(right, out)
            }
            ast::BinaryOperator::Eq => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
                out.insert(col, right.as_ref().clone());
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("operator {other}"))),
        },
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
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

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
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
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

fn parse_slot(expr: &Expr) -> Result<SlotTime, SqlError> {
    let s = parse_string(expr)?;
    SlotTime::parse(&s).map_err(|e| SqlError::Parse(e.to_string()))
}

/// A JSON array (`'["13:30","14:00"]'`) or a comma list (`'13:30,14:00'`).
fn parse_hours(expr: &Expr) -> Result<Vec<SlotTime>, SqlError> {
    let s = parse_string(expr)?;
    let raw: Vec<String> = if s.trim_start().starts_with('[') {
        serde_json::from_str(&s).map_err(|e| SqlError::Parse(format!("bad hours: {e}")))?
    } else {
        s.split(',').map(|h| h.trim().to_string()).filter(|h| !h.is_empty()).collect()
    };
    raw.iter()
        .map(|h| SlotTime::parse(h).map_err(|e| SqlError::Parse(e.to_string())))
        .collect()
}

fn parse_json<T: serde::de::DeserializeOwned>(expr: &Expr) -> Result<T, SqlError> {
    let s = parse_string(expr)?;
    serde_json::from_str(&s).map_err(|e| SqlError::Parse(format!("bad JSON: {e}")))
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .trim()
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("{0}: expected {1} values, got {2}")]
    WrongArity(String, usize, usize),
    #[error("missing value: {0}")]
    MissingFilter(&'static str),
}
