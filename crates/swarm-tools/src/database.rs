//! Database-class tools (§4.4): `query` and `execute` against a local
//! SQLite database. Arguments are always bound as parameters — `sql` may
//! only contain `?` placeholders, and `params` supplies the values; there
//! is no code path that formats a caller-supplied value directly into the
//! SQL text, so literal-substitution arguments have nothing to exploit.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;

use swarm_core::{
    Error, PropertySchema, Tool, ToolClass, ToolContext, ToolDefinition, ToolOutput,
    ToolParameters, ToolPolicy,
};

const DEFAULT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);
pub const DEFAULT_ROW_CAP: usize = 1000;

pub struct DatabaseHandle {
    conn: Arc<Mutex<Connection>>,
}

impl DatabaseHandle {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::storage(format!("failed to create directory: {e}")))?;
        }
        let conn = Connection::open(&path).map_err(|e| Error::storage(format!("failed to open database: {e}")))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory().map_err(|e| Error::storage(format!("failed to open in-memory database: {e}")))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn json_to_sql(value: &JsonValue) -> Result<SqlValue, Error> {
    match value {
        JsonValue::Null => Ok(SqlValue::Null),
        JsonValue::Bool(b) => Ok(SqlValue::Integer(if *b { 1 } else { 0 })),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(SqlValue::Integer(i))
            } else if let Some(f) = n.as_f64() {
                Ok(SqlValue::Real(f))
            } else {
                Err(Error::bad_request(format!("unsupported numeric parameter: {n}")))
            }
        }
        JsonValue::String(s) => Ok(SqlValue::Text(s.clone())),
        other => Err(Error::bad_request(format!("unsupported parameter type: {other}"))),
    }
}

fn sql_to_json(value: ValueRef<'_>) -> JsonValue {
    match value {
        ValueRef::Null => JsonValue::Null,
        ValueRef::Integer(i) => JsonValue::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f).map(JsonValue::Number).unwrap_or(JsonValue::Null),
        ValueRef::Text(t) => JsonValue::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => JsonValue::String(format!("<{} bytes>", b.len())),
    }
}

// =============================================================================
// query
// =============================================================================

pub struct QueryTool {
    db: Arc<DatabaseHandle>,
    row_cap: usize,
}

impl QueryTool {
    pub fn new(db: Arc<DatabaseHandle>) -> Self {
        Self { db, row_cap: DEFAULT_ROW_CAP }
    }

    pub fn with_row_cap(mut self, cap: usize) -> Self {
        self.row_cap = cap;
        self
    }
}

#[derive(Deserialize)]
struct QueryArgs {
    sql: String,
    #[serde(default)]
    params: Vec<JsonValue>,
}

#[async_trait]
impl Tool for QueryTool {
    fn name(&self) -> &str {
        "query"
    }

    fn description(&self) -> &str {
        "Run a read-only parameterized SQL query and return rows as JSON."
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description()).with_parameters(
            ToolParameters::new()
                .add_property("sql", PropertySchema::string("SQL with ? placeholders"), true)
                .add_property(
                    "params",
                    PropertySchema::array("Parameter values bound to each ? placeholder, in order", PropertySchema::string("value")),
                    false,
                ),
        )
    }

    fn policy(&self) -> ToolPolicy {
        ToolPolicy::new(ToolClass::Database, DEFAULT_TIMEOUT).with_row_cap(self.row_cap)
    }

    async fn execute(&self, arguments: JsonValue, _ctx: &ToolContext) -> Result<ToolOutput, Error> {
        let args: QueryArgs =
            serde_json::from_value(arguments).map_err(|e| Error::tool("query", format!("invalid arguments: {e}")))?;

        let bound = args.params.iter().map(json_to_sql).collect::<Result<Vec<_>, _>>()?;
        let row_cap = self.row_cap;

        let conn = self.db.conn.lock().await;
        let mut stmt = conn.prepare(&args.sql).map_err(|e| Error::tool("query", format!("invalid SQL: {e}")))?;
        let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

        let rows = stmt
            .query_map(rusqlite::params_from_iter(bound.iter()), |row| {
                let mut map = serde_json::Map::new();
                for (i, name) in column_names.iter().enumerate() {
                    map.insert(name.clone(), sql_to_json(row.get_ref(i)?));
                }
                Ok(JsonValue::Object(map))
            })
            .map_err(|e| Error::tool("query", format!("query failed: {e}")))?;

        let mut results = Vec::new();
        for row in rows {
            if results.len() >= row_cap {
                break;
            }
            results.push(row.map_err(|e| Error::tool("query", format!("failed to read row: {e}")))?);
        }

        Ok(ToolOutput::success(
            serde_json::to_string(&results).map_err(|e| Error::serialization(e.to_string()))?,
        ))
    }
}

// =============================================================================
// execute
// =============================================================================

pub struct ExecuteTool {
    db: Arc<DatabaseHandle>,
}

impl ExecuteTool {
    pub fn new(db: Arc<DatabaseHandle>) -> Self {
        Self { db }
    }
}

#[derive(Deserialize)]
struct ExecuteArgs {
    sql: String,
    #[serde(default)]
    params: Vec<JsonValue>,
}

#[async_trait]
impl Tool for ExecuteTool {
    fn name(&self) -> &str {
        "execute"
    }

    fn description(&self) -> &str {
        "Run a parameterized SQL statement that mutates data (insert/update/delete/ddl)."
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description()).with_parameters(
            ToolParameters::new()
                .add_property("sql", PropertySchema::string("SQL with ? placeholders"), true)
                .add_property(
                    "params",
                    PropertySchema::array("Parameter values bound to each ? placeholder, in order", PropertySchema::string("value")),
                    false,
                ),
        )
    }

    fn policy(&self) -> ToolPolicy {
        ToolPolicy::new(ToolClass::Database, DEFAULT_TIMEOUT)
    }

    async fn execute(&self, arguments: JsonValue, _ctx: &ToolContext) -> Result<ToolOutput, Error> {
        let args: ExecuteArgs =
            serde_json::from_value(arguments).map_err(|e| Error::tool("execute", format!("invalid arguments: {e}")))?;

        let bound = args.params.iter().map(json_to_sql).collect::<Result<Vec<_>, _>>()?;

        let conn = self.db.conn.lock().await;
        let affected = conn
            .execute(&args.sql, rusqlite::params_from_iter(bound.iter()))
            .map_err(|e| Error::tool("execute", format!("statement failed: {e}")))?;

        Ok(ToolOutput::success(format!("{affected} row(s) affected")))
    }
}

pub fn create_database_tools(db: Arc<DatabaseHandle>, row_cap: usize) -> Vec<Box<dyn Tool>> {
    vec![
        Box::new(QueryTool::new(db.clone()).with_row_cap(row_cap)),
        Box::new(ExecuteTool::new(db)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ToolContext {
        ToolContext::new("agent-1", "task-1")
    }

    async fn fresh_db() -> Arc<DatabaseHandle> {
        let db = Arc::new(DatabaseHandle::in_memory().unwrap());
        {
            let conn = db.conn.lock().await;
            conn.execute("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT)", []).unwrap();
        }
        db
    }

    #[tokio::test]
    async fn test_execute_then_query_round_trip() {
        let db = fresh_db().await;
        let execute_tool = ExecuteTool::new(db.clone());
        execute_tool
            .execute(serde_json::json!({"sql": "INSERT INTO notes (body) VALUES (?)", "params": ["hello"]}), &ctx())
            .await
            .unwrap();

        let query_tool = QueryTool::new(db);
        let result = query_tool
            .execute(serde_json::json!({"sql": "SELECT body FROM notes", "params": []}), &ctx())
            .await
            .unwrap();
        assert!(result.content.contains("hello"));
    }

    #[tokio::test]
    async fn test_query_respects_row_cap() {
        let db = fresh_db().await;
        let execute_tool = ExecuteTool::new(db.clone());
        for i in 0..5 {
            execute_tool
                .execute(serde_json::json!({"sql": "INSERT INTO notes (body) VALUES (?)", "params": [format!("n{i}")]}), &ctx())
                .await
                .unwrap();
        }

        let query_tool = QueryTool::new(db).with_row_cap(2);
        let result = query_tool
            .execute(serde_json::json!({"sql": "SELECT body FROM notes", "params": []}), &ctx())
            .await
            .unwrap();
        let parsed: Vec<JsonValue> = serde_json::from_str(&result.content).unwrap();
        assert_eq!(parsed.len(), 2);
    }
}
