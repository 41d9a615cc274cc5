use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::TablecapAuthSource;
use crate::engine::{Engine, EngineError, FeasibilityRequest};
use crate::observability;
use crate::sql::{self, Command};
use crate::tenant::TenantManager;

pub struct TablecapHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<TablecapQueryParser>,
}

impl TablecapHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(TablecapQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    /// Parse, execute and record RED metrics for one statement.
    async fn run(&self, engine: &Engine, query: &str) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let start = Instant::now();
        let result = self.execute_command(engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        let response = match cmd {
            // ── Writes ───────────────────────────────────────
            Command::SetDailyLimit { date, ceiling, limit } => {
                engine.set_daily_limit(date, ceiling, limit).await.map_err(engine_err)?;
                inserted(1)
            }
            Command::ClearDailyLimit { date, ceiling } => {
                engine.clear_daily_limit(date, ceiling).await.map_err(engine_err)?;
                deleted()
            }
            Command::SetHourSet { date, hours } => {
                engine.set_hour_set(date, &hours).await.map_err(engine_err)?;
                inserted(1)
            }
            Command::ClearHourSet { date } => {
                engine.clear_hour_set(date).await.map_err(engine_err)?;
                deleted()
            }
            Command::SetHourAllocation { date, percentages } => {
                engine
                    .set_hour_allocation(date, &percentages)
                    .await
                    .map_err(engine_err)?;
                inserted(1)
            }
            Command::ClearHourAllocation { date } => {
                engine.clear_hour_allocation(date).await.map_err(engine_err)?;
                deleted()
            }
            Command::SaveHourConfiguration { date, config } => {
                engine
                    .save_hour_configuration(date, &config)
                    .await
                    .map_err(engine_err)?;
                inserted(1)
            }
            Command::ClearHourConfiguration { date } => {
                engine.clear_hour_configuration(date).await.map_err(engine_err)?;
                deleted()
            }
            Command::SetDayOpen { date, is_open } => {
                engine.set_day_open(date, is_open).await.map_err(engine_err)?;
                inserted(1)
            }
            Command::ClearDayOverride { date } => {
                engine.clear_day_override(date).await.map_err(engine_err)?;
                deleted()
            }
            Command::InsertBooking { booking } => {
                engine.record_booking(booking).await.map_err(engine_err)?;
                inserted(1)
            }
            Command::BatchInsertBookings { bookings } => {
                let count = engine
                    .batch_record_bookings(bookings)
                    .await
                    .map_err(engine_err)?;
                inserted(count)
            }
            Command::CancelBooking { id } => {
                engine.cancel_booking(id).await.map_err(engine_err)?;
                deleted()
            }
            Command::AppendModification {
                booking_id,
                field,
                old_value,
                new_value,
            } => {
                engine
                    .append_modification(booking_id, field, old_value, new_value)
                    .await
                    .map_err(engine_err)?;
                inserted(1)
            }

            // ── Reads ────────────────────────────────────────
            Command::SelectBookings { date } => {
                let bookings = engine.list_bookings(date);
                rows(schema_for("bookings"), bookings, |enc, b| {
                    enc.encode_field(&b.id.to_string())?;
                    enc.encode_field(&b.date.to_string())?;
                    enc.encode_field(&b.time.to_string())?;
                    enc.encode_field(&i64::from(b.party_size))?;
                    enc.encode_field(&b.status.as_str().to_string())
                })
            }
            Command::SelectSlots { date } => {
                let slots = engine.slots(date).await.map_err(engine_err)?;
                rows(schema_for("slots"), slots.into_iter().collect::<Vec<(_, _)>>(), |enc, (time, r)| {
                    enc.encode_field(&time.to_string())?;
                    enc.encode_field(&r.status.as_str().to_string())?;
                    enc.encode_field(&r.remaining)?;
                    enc.encode_field(&r.total)?;
                    enc.encode_field(&r.booked)?;
                    enc.encode_field(&r.allocation_percentage)?;
                    enc.encode_field(&r.completion_percentage)?;
                    enc.encode_field(&r.closed)
                })
            }
            Command::SelectAvailableSlots { date, party_size } => {
                let slots = engine
                    .available_slots(date, party_size)
                    .await
                    .map_err(engine_err)?;
                rows(schema_for("available_slots"), slots, |enc, s| {
                    enc.encode_field(&s.time.to_string())?;
                    enc.encode_field(&s.remaining)?;
                    enc.encode_field(&s.total)?;
                    enc.encode_field(&s.booked)?;
                    enc.encode_field(&s.status.as_str().to_string())
                })
            }
            Command::SelectDateFeasibility {
                date,
                party_size,
                requested_time,
                booking_id,
            } => {
                let req = FeasibilityRequest {
                    date,
                    party_size,
                    current_time: requested_time,
                    exclude_booking_id: booking_id,
                };
                let v = engine.date_feasibility(&req).await.map_err(engine_err)?;
                let slots: Vec<String> = v.available_slots.iter().map(|s| s.time.to_string()).collect();
                rows(schema_for("date_feasibility"), vec![v], move |enc, v| {
                    enc.encode_field(&v.date.to_string())?;
                    enc.encode_field(&v.feasible)?;
                    enc.encode_field(&v.reason.map(|r| r.as_str().to_string()))?;
                    enc.encode_field(&v.current_time_available)?;
                    enc.encode_field(&slots.join(","))?;
                    enc.encode_field(&v.formatted_slots)?;
                    enc.encode_field(&v.days_until)?;
                    enc.encode_field(&v.is_explicitly_opened)?;
                    enc.encode_field(&v.daily_limit)?;
                    enc.encode_field(&v.current_total)
                })
            }
            Command::SelectModificationEligibility { booking_id } => {
                let v = engine
                    .modification_eligibility(booking_id)
                    .await
                    .map_err(engine_err)?;
                rows(schema_for("modification_eligibility"), vec![v], |enc, v| {
                    enc.encode_field(&booking_id.to_string())?;
                    enc.encode_field(&v.modifiable)?;
                    enc.encode_field(&v.reason.map(|r| r.as_str().to_string()))?;
                    enc.encode_field(&v.modifications_remaining.map(i64::from))?;
                    enc.encode_field(&v.hours_until_reservation)
                })
            }
            Command::SelectPartySizeChange {
                date,
                current_party_size,
                new_party_size,
                booking_id,
            } => {
                let v = engine
                    .party_size_change(date, current_party_size, new_party_size, booking_id)
                    .await
                    .map_err(engine_err)?;
                rows(schema_for("party_size_change"), vec![v], |enc, v| {
                    enc.encode_field(&v.accepted)?;
                    enc.encode_field(&v.reason.map(|r| r.as_str().to_string()))?;
                    enc.encode_field(&v.daily_limit)?;
                    enc.encode_field(&v.current_total)?;
                    enc.encode_field(&v.new_total)?;
                    enc.encode_field(&v.people_difference)?;
                    enc.encode_field(&v.spots_remaining)
                })
            }
            Command::SelectBookingWindow { days } => {
                let window = engine.booking_window(days).await.map_err(engine_err)?;
                rows(schema_for("booking_window"), window.days, |enc, d| {
                    enc.encode_field(&d.date.to_string())?;
                    enc.encode_field(&d.available)?;
                    enc.encode_field(&d.reason.map(|r| r.as_str().to_string()))?;
                    enc.encode_field(&d.free_seats)?;
                    enc.encode_field(&d.total_capacity)?;
                    enc.encode_field(&d.booked)?;
                    enc.encode_field(&d.occupancy_percentage)
                })
            }
            Command::SelectMonthGrid { year, month } => {
                let grid = engine.month_grid(year, month).await.map_err(engine_err)?;
                rows(schema_for("month_grid"), grid.days.clone(), |enc, d| {
                    enc.encode_field(&d.date.to_string())?;
                    enc.encode_field(&i64::from(d.booking_count))?;
                    enc.encode_field(&d.total_people)?;
                    enc.encode_field(&d.limit)?;
                    enc.encode_field(&d.free_seats)?;
                    enc.encode_field(&d.is_open)
                })
            }
            Command::SelectHourPercentages { date } => {
                let report = engine.hour_percentages(date).await.map_err(engine_err)?;
                let per_slot: Vec<_> = report
                    .active_hours
                    .iter()
                    .map(|h| {
                        (
                            h.to_string(),
                            report.percentages.get(h).copied().unwrap_or(0.0),
                            report.booked_by_slot.get(h).copied().unwrap_or(0),
                            report.capacity_by_slot.get(h).copied().unwrap_or(0),
                            report.completion_by_slot.get(h).copied().unwrap_or(0.0),
                        )
                    })
                    .collect();
                let (limit, people) = (report.daily_limit, report.total_people);
                rows(schema_for("hour_percentages"), per_slot, move |enc, (time, pct, booked, cap, done)| {
                    enc.encode_field(&time)?;
                    enc.encode_field(&pct)?;
                    enc.encode_field(&booked)?;
                    enc.encode_field(&cap)?;
                    enc.encode_field(&done)?;
                    enc.encode_field(&limit)?;
                    enc.encode_field(&people)
                })
            }
            Command::SelectDayStatus { date } => {
                let s = engine.day_status(date).await.map_err(engine_err)?;
                rows(schema_for("day_status"), vec![s], |enc, s| {
                    enc.encode_field(&s.date.to_string())?;
                    enc.encode_field(&s.weekday.to_string())?;
                    enc.encode_field(&s.is_open)?;
                    enc.encode_field(&s.is_default_closed_day)?;
                    enc.encode_field(&s.explicit_override)
                })
            }
        };
        Ok(vec![response])
    }
}

fn inserted(count: usize) -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(count))
}

fn deleted() -> Response {
    Response::Execution(Tag::new("DELETE").with_rows(1))
}

/// Encode `items` into a text-format result set.
fn rows<T>(
    schema: Vec<FieldInfo>,
    items: Vec<T>,
    encode: impl Fn(&mut DataRowEncoder, T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<_>> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

/// Column layout of each readable table. Empty for writes and unknown tables.
fn schema_for(table: &str) -> Vec<FieldInfo> {
    use Type as T;
    let cols: Vec<(&str, Type)> = match table {
        "bookings" => vec![
            ("id", T::VARCHAR),
            ("date", T::VARCHAR),
            ("time", T::VARCHAR),
            ("party_size", T::INT8),
            ("status", T::VARCHAR),
        ],
        "slots" => vec![
            ("time", T::VARCHAR),
            ("status", T::VARCHAR),
            ("remaining", T::INT8),
            ("total", T::INT8),
            ("booked", T::INT8),
            ("allocation_percentage", T::FLOAT8),
            ("completion_percentage", T::FLOAT8),
            ("closed", T::BOOL),
        ],
        "available_slots" => vec![
            ("time", T::VARCHAR),
            ("remaining", T::INT8),
            ("total", T::INT8),
            ("booked", T::INT8),
            ("status", T::VARCHAR),
        ],
        "date_feasibility" => vec![
            ("date", T::VARCHAR),
            ("feasible", T::BOOL),
            ("reason", T::VARCHAR),
            ("current_time_available", T::BOOL),
            ("available_slots", T::VARCHAR),
            ("formatted_slots", T::VARCHAR),
            ("days_until", T::INT8),
            ("is_explicitly_opened", T::BOOL),
            ("daily_limit", T::INT8),
            ("current_total", T::INT8),
        ],
        "modification_eligibility" => vec![
            ("booking_id", T::VARCHAR),
            ("modifiable", T::BOOL),
            ("reason", T::VARCHAR),
            ("modifications_remaining", T::INT8),
            ("hours_until_reservation", T::INT8),
        ],
        "party_size_change" => vec![
            ("accepted", T::BOOL),
            ("reason", T::VARCHAR),
            ("daily_limit", T::INT8),
            ("current_total", T::INT8),
            ("new_total", T::INT8),
            ("people_difference", T::INT8),
            ("spots_remaining", T::INT8),
        ],
        "booking_window" => vec![
            ("date", T::VARCHAR),
            ("available", T::BOOL),
            ("reason", T::VARCHAR),
            ("free_seats", T::INT8),
            ("total_capacity", T::INT8),
            ("booked", T::INT8),
            ("occupancy_percentage", T::FLOAT8),
        ],
        "month_grid" => vec![
            ("date", T::VARCHAR),
            ("booking_count", T::INT8),
            ("total_people", T::INT8),
            ("daily_limit", T::INT8),
            ("free_seats", T::INT8),
            ("is_open", T::BOOL),
        ],
        "hour_percentages" => vec![
            ("time", T::VARCHAR),
            ("percentage", T::FLOAT8),
            ("booked", T::INT8),
            ("capacity", T::INT8),
            ("completion", T::FLOAT8),
            ("daily_limit", T::INT8),
            ("total_people", T::INT8),
        ],
        "day_status" => vec![
            ("date", T::VARCHAR),
            ("weekday", T::VARCHAR),
            ("is_open", T::BOOL),
            ("is_default_closed_day", T::BOOL),
            ("explicit_override", T::BOOL),
        ],
        _ => vec![],
    };
    cols.into_iter().map(|(name, ty)| field(name, ty)).collect()
}

/// Table named after `FROM` in a SELECT, lowercased.
fn select_table(sql: &str) -> Option<String> {
    let lower = sql.to_lowercase();
    let mut words = lower.split_whitespace();
    if words.next()? != "select" {
        return None;
    }
    words
        .skip_while(|w| *w != "from")
        .nth(1)
        .map(|t| t.trim_end_matches(';').to_string())
}

fn statement_schema(sql: &str) -> Vec<FieldInfo> {
    select_table(sql).map(|t| schema_for(&t)).unwrap_or_default()
}

#[async_trait]
impl SimpleQueryHandler for TablecapHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        self.run(&engine, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct TablecapQueryParser;

#[async_trait]
impl QueryParser for TablecapQueryParser {
    type Statement = String;

    async fn parse_sql<C>(&self, _client: &C, sql: &str, _types: &[Option<Type>]) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(&self, stmt: &String, _column_format: Option<&Format>) -> PgWireResult<Vec<FieldInfo>> {
        Ok(statement_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for TablecapHandler {
    type Statement = String;
    type QueryParser = TablecapQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        let mut responses = self.run(&engine, &sql).await?;
        Ok(responses.remove(0))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            statement_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(statement_schema(
            &target.statement.statement,
        )))
    }
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Inline bound text parameters as quoted literals.
fn substitute_params(portal: &Portal<String>) -> String {
    inline_params(&portal.statement.statement, &portal.parameters)
}

/// Replace each `$N` in one left-to-right pass over `sql`. Inlined values are
/// never rescanned. Placeholders without a bound value are left as written.
fn inline_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let mut end = start + 1;
        while let Some(&(i, d)) = chars.peek() {
            if !d.is_ascii_digit() {
                break;
            }
            end = i + 1;
            chars.next();
        }
        let placeholder = &sql[start..end];
        let bound = placeholder[1..]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| params.get(i));
        match bound {
            Some(Some(bytes)) => {
                let text = String::from_utf8_lossy(bytes.as_ref()).replace('\'', "''");
                out.push('\'');
                out.push_str(&text);
                out.push('\'');
            }
            Some(None) => out.push_str("NULL"),
            None => out.push_str(placeholder),
        }
    }
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct TablecapFactory {
    handler: Arc<TablecapHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<TablecapAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl TablecapFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        Self {
            handler: Arc::new(TablecapHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                TablecapAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for TablecapFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client socket until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(TablecapFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: EngineError) -> PgWireError {
    let code = match e {
        EngineError::Store(_) => "58000",
        _ => "P0001",
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
