use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{AuthSource, DefaultServerParameterProvider, LoginInfo, Password, StartupHandler};
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

use crate::engine::EngineError;
use crate::model::*;
use crate::observability::{QUERIES_TOTAL, QUERY_DURATION_SECONDS, command_label};
use crate::sql::{self, Command, SqlError};
use crate::tenant::{Tenant, TenantManager};

pub struct SalonHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<SalonQueryParser>,
}

impl SalonHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(SalonQueryParser),
        }
    }

    fn resolve_tenant<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Tenant>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager
            .get_or_create(&db)
            .map_err(|e| user_error("08006", format!("tenant error: {e}")))
    }

    /// Run one command, recording its latency and outcome.
    async fn execute(&self, tenant: &Tenant, cmd: Command) -> PgWireResult<Response> {
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(tenant, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, tenant: &Tenant, cmd: Command) -> PgWireResult<Response> {
        let Tenant { id, store, engine } = tenant;
        match cmd {
            Command::InsertResource(resource) => {
                store
                    .upsert_resource(id, resource)
                    .await
                    .map_err(|e| engine_err(e.into()))?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::InsertService(service) => {
                store
                    .upsert_service(id, service)
                    .await
                    .map_err(|e| engine_err(e.into()))?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::InsertAppointment(req) => {
                let appointment = engine.create_booking(id, req).await.map_err(engine_err)?;
                appointment_rows(vec![appointment])
            }
            Command::SelectSlots { resource_id, service_id, date } => {
                let slots = engine
                    .get_available_slots(id, resource_id, service_id, &date)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(slots_schema());
                let rows: Vec<PgWireResult<_>> = slots
                    .into_iter()
                    .map(|slot| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&slot.to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectAppointments { resource_id, date } => {
                let appointments = engine
                    .list_appointments(id, resource_id, &date)
                    .await
                    .map_err(engine_err)?;
                appointment_rows(appointments)
            }
            Command::CancelAppointment { id: appointment_id } => {
                engine.cancel(id, appointment_id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
        }
    }
}

fn slots_schema() -> Vec<FieldInfo> {
    vec![FieldInfo::new("start_time".into(), None, None, Type::VARCHAR, FieldFormat::Text)]
}

fn appointments_schema() -> Vec<FieldInfo> {
    let text = |name: &str| FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text);
    vec![
        text("id"),
        text("resource_id"),
        text("service_id"),
        text("client_id"),
        text("day"),
        text("start_time"),
        text("end_time"),
        text("status"),
        FieldInfo::new("price".into(), None, None, Type::INT8, FieldFormat::Text),
    ]
}

fn appointment_rows(appointments: Vec<Appointment>) -> PgWireResult<Response> {
    let schema = Arc::new(appointments_schema());
    let rows: Vec<PgWireResult<_>> = appointments
        .into_iter()
        .map(|a| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&a.id.to_string())?;
            encoder.encode_field(&a.resource_id.to_string())?;
            encoder.encode_field(&a.service_id.to_string())?;
            encoder.encode_field(&a.client_id.map(|c| c.to_string()))?;
            encoder.encode_field(&a.date.to_string())?;
            encoder.encode_field(&a.start.to_string())?;
            encoder.encode_field(&a.end.to_string())?;
            encoder.encode_field(&a.status.as_str())?;
            encoder.encode_field(&a.price)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

/// Result columns a statement will produce, judged from its text.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if upper.contains("SELECT") && upper.contains("SLOTS") {
        slots_schema()
    } else if upper.contains("APPOINTMENTS") && !upper.trim_start().starts_with("DELETE") {
        appointments_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for SalonHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let tenant = self.resolve_tenant(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        Ok(vec![self.execute(&tenant, cmd).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SalonQueryParser;

#[async_trait]
impl QueryParser for SalonQueryParser {
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

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for SalonHandler {
    type Statement = String;
    type QueryParser = SalonQueryParser;

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
        let tenant = self.resolve_tenant(client)?;
        let sql = substitute_params(&portal.statement.statement, &portal.parameters);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        self.execute(&tenant, cmd).await
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
        Ok(DescribeStatementResponse::new(param_types, result_schema(&target.statement)))
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
        Ok(DescribePortalResponse::new(result_schema(&target.statement.statement)))
    }
}

/// Highest `$N` placeholder in the SQL string.
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

/// Inline text-format parameters as quoted literals in one left-to-right
/// pass. Inlined values are never rescanned, and `$N` past the bound
/// parameters is left as written.
fn substitute_params(sql: &str, params: &[Option<Bytes>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut rest = sql;
    while let Some(pos) = rest.find('$') {
        result.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        let param = after[..digits]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| params.get(i));
        match param {
            Some(Some(bytes)) => {
                result.push('\'');
                result.push_str(&String::from_utf8_lossy(bytes).replace('\'', "''"));
                result.push('\'');
            }
            Some(None) => result.push_str("NULL"),
            None => {
                result.push('$');
                result.push_str(&after[..digits]);
            }
        }
        rest = &after[digits..];
    }
    result.push_str(rest);
    result
}

// ── Auth ─────────────────────────────────────────────────────────

/// Single shared password for every tenant.
#[derive(Debug)]
pub struct PasswordAuthSource {
    password: String,
}

impl PasswordAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for PasswordAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

// ── Factory ──────────────────────────────────────────────────────

pub struct SalonFactory {
    handler: Arc<SalonHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<PasswordAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl SalonFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        Self {
            handler: Arc::new(SalonHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                PasswordAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SalonFactory {
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

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(SalonFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

/// SQLSTATE for each engine failure class.
fn engine_sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::NotFound { .. } => "P0002",
        EngineError::Validation(_) => "22023",
        EngineError::Conflict(_) => "23P01",
        EngineError::Store(_) => "58000",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(engine_sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn count_params_finds_highest() {
        assert_eq!(count_params("SELECT * FROM slots"), 0);
        assert_eq!(count_params("SELECT * FROM slots WHERE resource_id = $1 AND day = $3"), 3);
        assert_eq!(count_params("price $ 10"), 0);
    }

    #[test]
    fn substitute_quotes_and_nulls() {
        let params = vec![
            Some(Bytes::from_static(b"O'Brien")),
            None,
        ];
        let sql = substitute_params("VALUES ($1, $2)", &params);
        assert_eq!(sql, "VALUES ('O''Brien', NULL)");
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        let params = vec![
            Some(Bytes::from_static(b"01ARZ3NDEKTSV4RRFFQ69G5FAV")),
            Some(Bytes::from_static(b"Pay $1 deposit")),
        ];
        let sql = substitute_params("VALUES ($1, $2)", &params);
        assert_eq!(sql, "VALUES ('01ARZ3NDEKTSV4RRFFQ69G5FAV', 'Pay $1 deposit')");
    }

    #[test]
    fn substitute_handles_wide_indices_and_stray_dollars() {
        let params: Vec<Option<Bytes>> =
            (1..=10).map(|i| Some(Bytes::from(format!("v{i}")))).collect();
        assert_eq!(substitute_params("($10, $1)", &params), "('v10', 'v1')");
        assert_eq!(substitute_params("price $ 5 and $11", &params), "price $ 5 and $11");
    }

    #[test]
    fn schema_follows_statement() {
        assert_eq!(result_schema("SELECT * FROM slots WHERE day = '2024-06-03'").len(), 1);
        assert_eq!(result_schema("select * from appointments where day = $1").len(), 9);
        assert_eq!(result_schema("INSERT INTO appointments VALUES ($1)").len(), 9);
        assert!(result_schema("DELETE FROM appointments WHERE id = $1").is_empty());
        assert!(result_schema("INSERT INTO services VALUES ($1)").is_empty());
    }

    #[test]
    fn sqlstate_per_error_class() {
        assert_eq!(engine_sqlstate(&EngineError::Conflict(Ulid::new())), "23P01");
        assert_eq!(engine_sqlstate(&EngineError::validation("bad")), "22023");
        assert_eq!(
            engine_sqlstate(&EngineError::NotFound { entity: "resource", id: "x".into() }),
            "P0002"
        );
        assert_eq!(engine_sqlstate(&EngineError::Store("disk".into())), "58000");
    }
}
