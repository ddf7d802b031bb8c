use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::{stream, Sink, SinkExt};
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
use pgwire::messages::response::NotificationResponse;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{broadcast, Mutex};

use crate::auth::CoversAuthSource;
use crate::engine::{Engine, EngineError};
use crate::limits::MAX_LISTEN_CHANNELS;
use crate::model::*;
use crate::notify::Channel;
use crate::observability::{self, command_label};
use crate::sql::{self, Command};
use crate::tenant::TenantManager;

struct Subscription {
    channel: Channel,
    rx: broadcast::Receiver<Event>,
}

/// Per-connection handler. LISTEN state lives here, so it is dropped with
/// the connection.
pub struct CoversHandler {
    tenant_manager: Arc<TenantManager>,
    auth: CoversAuthSource,
    query_parser: Arc<CoversQueryParser>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl CoversHandler {
    pub fn new(tenant_manager: Arc<TenantManager>, auth: CoversAuthSource) -> Self {
        Self {
            tenant_manager,
            auth,
            query_parser: Arc::new(CoversQueryParser),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager
            .get_or_create(&db)
            .map_err(|e| user_error("08006", format!("tenant error: {e}")))
    }

    /// Parse, authorize, execute, then flush any notifications that queued up
    /// for this connection, including ones caused by the command itself.
    async fn run<C>(&self, client: &mut C, query: &str) -> PgWireResult<Response>
    where
        C: ClientInfo + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = command_label(&cmd);

        let user = client.metadata().get("user").map(String::as_str);
        if cmd.requires_admin() && !self.auth.is_admin(user) {
            metrics::counter!(observability::PERMISSION_DENIED_TOTAL, "command" => label)
                .increment(1);
            return Err(user_error(
                "42501",
                format!("permission denied: {label} requires the admin user"),
            ));
        }

        let started = Instant::now();
        let result = self.execute_command(&engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());

        self.deliver_notifications(client).await?;
        result
    }

    async fn deliver_notifications<C>(&self, client: &mut C) -> PgWireResult<()>
    where
        C: Sink<PgWireBackendMessage> + Unpin + Send,
        PgWireError: From<C::Error>,
    {
        let pending = {
            let mut subscriptions = self.subscriptions.lock().await;
            let mut pending = Vec::new();
            for sub in subscriptions.iter_mut() {
                loop {
                    match sub.rx.try_recv() {
                        Ok(event) => pending.push((sub.channel, event)),
                        Err(TryRecvError::Lagged(n)) => {
                            tracing::warn!("listener on {} fell behind, {n} notifications dropped", sub.channel);
                        }
                        Err(TryRecvError::Empty | TryRecvError::Closed) => break,
                    }
                }
            }
            pending
        };

        let pid = std::process::id() as i32;
        for (channel, event) in pending {
            let payload =
                serde_json::to_string(&event).map_err(|e| PgWireError::ApiError(Box::new(e)))?;
            client
                .send(PgWireBackendMessage::NotificationResponse(NotificationResponse::new(
                    pid,
                    channel.to_string(),
                    payload,
                )))
                .await?;
        }
        Ok(())
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Response> {
        match cmd {
            Command::InsertTable { table } => {
                engine.create_table(table).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateTable { id, update } => {
                engine.update_table(id, update).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteTable { id } => {
                engine.delete_table(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectTables { active_only } => {
                let tables = if active_only {
                    engine.list_active_tables()
                } else {
                    engine.list_tables()
                };
                Ok(rows_response(tables_schema(), tables, encode_table))
            }
            Command::InsertReservation { reservation } => {
                engine
                    .create_reservation(reservation, engine.today())
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateReservationStatus { id, status } => {
                engine
                    .update_reservation_status(id, status)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::CancelReservation { id } => {
                let now = chrono::Utc::now().timestamp_millis();
                engine.cancel_reservation(id, now).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectReservation { id } => {
                let found: Vec<Reservation> = engine.get_reservation(&id).await.into_iter().collect();
                Ok(rows_response(reservations_schema(), found, encode_reservation))
            }
            Command::SelectReservations {
                date,
                include_cancelled,
            } => {
                let reservations = engine.list_reservations(date, include_cancelled).await;
                Ok(rows_response(reservations_schema(), reservations, encode_reservation))
            }
            Command::SelectAvailability { date, party_size } => {
                let availability = engine
                    .availability_for(date, party_size, engine.today())
                    .await
                    .map_err(engine_err)?;
                Ok(rows_response(availability_schema(), availability, encode_availability))
            }
            Command::SelectBookableDates => {
                let dates = engine.bookable_dates(engine.today()).await;
                Ok(rows_response(bookable_dates_schema(), dates, |encoder, date| {
                    encoder.encode_field(&date.to_string())
                }))
            }
            Command::SelectSettings => {
                let settings = engine.get_reservation_settings().await;
                Ok(rows_response(settings_schema(), vec![settings], encode_settings))
            }
            Command::UpdateSettings { patch } => {
                engine.patch_settings(&patch).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::InsertExceptionDate { exception } => {
                engine
                    .set_exception_date(exception, engine.today())
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::DeleteExceptionDate { date } => {
                engine.remove_exception_date(date).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectExceptionDates { from } => {
                let exceptions = engine
                    .list_exception_dates(from.unwrap_or_else(|| engine.today()))
                    .await;
                Ok(rows_response(exception_dates_schema(), exceptions, encode_exception))
            }
            Command::Listen { channel } => {
                let parsed = Channel::parse(&channel).ok_or_else(|| {
                    user_error(
                        "42000",
                        format!(
                            "invalid channel: {channel} (expected tables, settings, exception_dates or reservations_YYYY-MM-DD)"
                        ),
                    )
                })?;
                let mut subscriptions = self.subscriptions.lock().await;
                if subscriptions.iter().any(|s| s.channel == parsed) {
                    return Ok(Response::Execution(Tag::new("LISTEN")));
                }
                if subscriptions.len() >= MAX_LISTEN_CHANNELS {
                    return Err(user_error(
                        "54000",
                        format!("too many LISTEN channels (max {MAX_LISTEN_CHANNELS})"),
                    ));
                }
                subscriptions.push(Subscription {
                    channel: parsed,
                    rx: engine.notify.subscribe(parsed),
                });
                Ok(Response::Execution(Tag::new("LISTEN")))
            }
            Command::Unlisten { channel } => {
                if let Some(parsed) = Channel::parse(&channel) {
                    self.subscriptions.lock().await.retain(|s| s.channel != parsed);
                }
                Ok(Response::Execution(Tag::new("UNLISTEN")))
            }
            Command::UnlistenAll => {
                self.subscriptions.lock().await.clear();
                Ok(Response::Execution(Tag::new("UNLISTEN")))
            }
        }
    }
}

// ── Result schemas ───────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn tables_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("table_number", Type::INT8),
        field("seats", Type::INT8),
        field("is_active", Type::BOOL),
        field("available_hours", Type::VARCHAR),
    ]
}

fn reservations_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("table_id", Type::VARCHAR),
        field("reservation_date", Type::VARCHAR),
        field("reservation_time", Type::VARCHAR),
        field("guests_count", Type::INT8),
        field("guest_name", Type::VARCHAR),
        field("status", Type::VARCHAR),
        field("created_at", Type::INT8),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        field("table_id", Type::VARCHAR),
        field("table_number", Type::INT8),
        field("seats", Type::INT8),
        field("available_slots", Type::VARCHAR),
    ]
}

fn bookable_dates_schema() -> Vec<FieldInfo> {
    vec![field("reservation_date", Type::VARCHAR)]
}

fn settings_schema() -> Vec<FieldInfo> {
    let mut schema: Vec<FieldInfo> = [
        "monday",
        "tuesday",
        "wednesday",
        "thursday",
        "friday",
        "saturday",
        "sunday",
    ]
    .into_iter()
    .map(|day| field(day, Type::BOOL))
    .collect();
    schema.push(field("advance_booking_days", Type::INT8));
    schema.push(field("max_reservations_per_slot", Type::INT8));
    schema
}

fn exception_dates_schema() -> Vec<FieldInfo> {
    vec![
        field("exception_date", Type::VARCHAR),
        field("type", Type::VARCHAR),
        field("reason", Type::VARCHAR),
    ]
}

/// Row description for a SELECT against `target`, used by Describe before
/// any parameters are bound.
fn schema_for(target: &str) -> Vec<FieldInfo> {
    match target {
        "tables" => tables_schema(),
        "reservations" => reservations_schema(),
        "availability" => availability_schema(),
        "bookable_dates" => bookable_dates_schema(),
        "settings" => settings_schema(),
        "exception_dates" => exception_dates_schema(),
        _ => vec![],
    }
}

fn statement_schema(sql: &str) -> Vec<FieldInfo> {
    sql::select_target(sql)
        .map(|target| schema_for(&target))
        .unwrap_or_default()
}

// ── Row encoding ─────────────────────────────────────────────────

fn rows_response<T>(
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

fn join_times(times: &[SlotTime]) -> String {
    times
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn encode_table(encoder: &mut DataRowEncoder, table: Table) -> PgWireResult<()> {
    encoder.encode_field(&table.id.to_string())?;
    encoder.encode_field(&(table.table_number as i64))?;
    encoder.encode_field(&(table.seats as i64))?;
    encoder.encode_field(&table.is_active)?;
    encoder.encode_field(&join_times(&table.available_hours))
}

fn encode_reservation(encoder: &mut DataRowEncoder, r: Reservation) -> PgWireResult<()> {
    encoder.encode_field(&r.id.to_string())?;
    encoder.encode_field(&r.table_id.map(|id| id.to_string()))?;
    encoder.encode_field(&r.reservation_date.to_string())?;
    encoder.encode_field(&r.reservation_time.to_string())?;
    encoder.encode_field(&(r.guests_count as i64))?;
    encoder.encode_field(&r.guest_name)?;
    encoder.encode_field(&r.status.to_string())?;
    encoder.encode_field(&r.created_at)
}

fn encode_availability(encoder: &mut DataRowEncoder, a: TableAvailability) -> PgWireResult<()> {
    encoder.encode_field(&a.table_id.to_string())?;
    encoder.encode_field(&(a.table_number as i64))?;
    encoder.encode_field(&(a.seats as i64))?;
    encoder.encode_field(&join_times(&a.available_slots))
}

fn encode_settings(encoder: &mut DataRowEncoder, s: ReservationSettings) -> PgWireResult<()> {
    let days = s.days_available;
    for open in [
        days.monday,
        days.tuesday,
        days.wednesday,
        days.thursday,
        days.friday,
        days.saturday,
        days.sunday,
    ] {
        encoder.encode_field(&open)?;
    }
    encoder.encode_field(&(s.advance_booking_days as i64))?;
    encoder.encode_field(&(s.max_reservations_per_slot as i64))
}

fn encode_exception(encoder: &mut DataRowEncoder, e: ExceptionDate) -> PgWireResult<()> {
    encoder.encode_field(&e.date.to_string())?;
    encoder.encode_field(&e.kind.to_string())?;
    encoder.encode_field(&e.reason)
}

#[async_trait]
impl SimpleQueryHandler for CoversHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(client, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct CoversQueryParser;

#[async_trait]
impl QueryParser for CoversQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(statement_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for CoversHandler {
    type Statement = String;
    type QueryParser = CoversQueryParser;

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
        let sql = substitute_params(&portal.statement.statement, &portal.parameters);
        self.run(client, &sql).await
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

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if let Ok(n) = sql[start..i].parse::<usize>() {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... with bound values as quoted text literals.
/// One left-to-right pass over the statement text: bound values are never
/// rescanned, and `$n` inside a quoted literal stays as written.
fn substitute_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut in_literal = false;
    let mut rest = sql;
    while let Some(c) = rest.chars().next() {
        if c == '\'' {
            in_literal = !in_literal;
        }
        let bound = if c == '$' && !in_literal {
            let digits = rest[1..].bytes().take_while(u8::is_ascii_digit).count();
            rest[1..1 + digits]
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| params.get(i))
                .map(|param| (param, 1 + digits))
        } else {
            None
        };
        match bound {
            Some((Some(bytes), len)) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                result.push('\'');
                result.push_str(&text.replace('\'', "''"));
                result.push('\'');
                rest = &rest[len..];
            }
            Some((None, len)) => {
                result.push_str("NULL");
                rest = &rest[len..];
            }
            None => {
                result.push(c);
                rest = &rest[c.len_utf8()..];
            }
        }
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct CoversFactory {
    handler: Arc<CoversHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<CoversAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl CoversFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, auth: CoversAuthSource) -> Self {
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(CoversHandler::new(tenant_manager, auth.clone())),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for CoversFactory {
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

/// Serve one client connection until it closes. Each connection gets its own
/// handler so LISTEN subscriptions never leak between clients.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    auth: CoversAuthSource,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = CoversFactory::new(tenant_manager, auth);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

/// SQLSTATE for an engine rejection. Conflicts use unique_violation so
/// clients can tell "pick another slot" apart from bad input.
fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::SlotConflict { .. }
        | EngineError::SlotCapReached { .. }
        | EngineError::AlreadyExists(_)
        | EngineError::TableNumberTaken(_) => "23505",
        EngineError::InvalidInput(_)
        | EngineError::DayUnavailable(_)
        | EngineError::LimitExceeded(_) => "22023",
        EngineError::NotFound(_) | EngineError::ExceptionDateNotFound(_) => "P0002",
        EngineError::WalError(_) => "58030",
        EngineError::InvalidTransition { .. } | EngineError::CancellationWindowClosed => "P0001",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ulid::Ulid;

    #[test]
    fn count_params_takes_highest_index() {
        assert_eq!(count_params("SELECT * FROM settings"), 0);
        assert_eq!(
            count_params("SELECT * FROM availability WHERE reservation_date = $1 AND party_size = $2"),
            2
        );
        assert_eq!(count_params("INSERT INTO t VALUES ($2, $1, $10)"), 10);
        assert_eq!(count_params("SELECT '$' FROM tables"), 0);
    }

    #[test]
    fn substitute_params_quotes_and_escapes() {
        let params: Vec<Option<&[u8]>> = vec![Some(&b"2026-10-20"[..]), Some(&b"O'Brien"[..]), None];
        let sql = substitute_params("VALUES ($1, $2, $3)", &params);
        assert_eq!(sql, "VALUES ('2026-10-20', 'O''Brien', NULL)");
    }

    #[test]
    fn substitute_params_handles_double_digit_indexes() {
        let params: Vec<_> = (1..=10)
            .map(|n: u32| Some(n.to_string().into_bytes()))
            .collect();
        let sql = substitute_params("$1 $10", &params);
        assert_eq!(sql, "'1' '10'");
    }

    #[test]
    fn bound_values_are_not_rescanned() {
        let params: Vec<Option<&[u8]>> =
            vec![Some(&b"01ARZ3NDEKTSV4RRFFQ69G5FAV"[..]), Some(&b"x$1"[..])];
        let sql = substitute_params("VALUES ($1, $2)", &params);
        assert_eq!(sql, "VALUES ('01ARZ3NDEKTSV4RRFFQ69G5FAV', 'x$1')");
    }

    #[test]
    fn placeholders_inside_literals_and_unbound_are_kept() {
        let params: Vec<Option<&[u8]>> = vec![Some(&b"a"[..])];
        assert_eq!(substitute_params("SELECT '$1', $1, $2", &params), "SELECT '$1', 'a', $2");
        assert_eq!(substitute_params("SELECT $", &params), "SELECT $");
    }

    #[test]
    fn conflicts_map_to_unique_violation() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 20).unwrap();
        let time = SlotTime::parse("19:00").unwrap();
        let conflict = EngineError::SlotConflict {
            table_id: Ulid::new(),
            date,
            time,
        };
        assert_eq!(sqlstate(&conflict), "23505");
        assert_eq!(sqlstate(&EngineError::SlotCapReached { date, time, cap: 1 }), "23505");
        assert_eq!(sqlstate(&EngineError::TableNumberTaken(4)), "23505");
        assert_eq!(sqlstate(&EngineError::DayUnavailable(date)), "22023");
        assert_eq!(sqlstate(&EngineError::NotFound(Ulid::new())), "P0002");
        assert_eq!(sqlstate(&EngineError::CancellationWindowClosed), "P0001");
    }

    #[test]
    fn describe_schemas_follow_select_target() {
        let names = |sql: &str| -> Vec<String> {
            statement_schema(sql)
                .iter()
                .map(|f| f.name().to_string())
                .collect()
        };
        assert_eq!(
            names("SELECT * FROM availability WHERE reservation_date = $1 AND party_size = $2"),
            vec!["table_id", "table_number", "seats", "available_slots"]
        );
        assert_eq!(names("SELECT * FROM settings").len(), 9);
        assert_eq!(names("SELECT * FROM exception_dates")[1], "type");
        assert!(names("INSERT INTO tables (id) VALUES ($1)").is_empty());
        assert!(names("SELECT * FROM nowhere").is_empty());
    }

    #[test]
    fn hours_render_comma_joined() {
        let hours = vec![SlotTime::parse("19:00").unwrap(), SlotTime::parse("21:30").unwrap()];
        assert_eq!(join_times(&hours), "19:00,21:30");
        assert_eq!(join_times(&[]), "");
    }
}
