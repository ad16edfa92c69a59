use clap::Parser;
use colored::*;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::cli::{CliArgs, Commands, OutputFormat, OutputFormatter};
use crate::engine::{describe_plan, require_streaming, ExecContext, Limit, Primitive, Route, RouteOpcode};
use crate::semantics::{self, SemTable};
use crate::sql::{
    Expr, ExprKind, InsertRows, Literal, SelectExpr, SelectStatement, SimpleTableExpr, Statement, StatementParser, TableExpr,
};
use crate::utils::config::EngineConfig;
use crate::utils::error::{GateError, GateResult};
use crate::utils::logging::init_logging;
use crate::utils::types::{BindVars, ColumnMetadata, DataType, PlanValue, QueryResult, Row, Value};
use crate::vcursor::{collect_stream, MockVcursor};
use crate::vschema::{Keyspace, VSchema};

/// Canned result one shard returns for every query it receives
#[derive(Debug, Clone, Deserialize)]
pub struct ShardFixture {
    #[serde(default)]
    pub columns: Vec<FixtureColumn>,
    #[serde(default)]
    pub rows: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FixtureColumn {
    pub name: String,
    #[serde(rename = "type", default = "default_fixture_type")]
    pub data_type: DataType,
}

fn default_fixture_type() -> DataType {
    DataType::Text
}

impl ShardFixture {
    pub fn to_result(&self) -> QueryResult {
        let mut result = QueryResult::with_columns(
            self.columns
                .iter()
                .map(|col| ColumnMetadata::new(&col.name, col.data_type))
                .collect(),
        );
        result.rows = self
            .rows
            .iter()
            .map(|cells| Row::new(cells.iter().map(Value::from_json).collect()))
            .collect();
        result
    }
}

/// Fixtures by keyspace, then by shard name
pub type ShardFixtures = BTreeMap<String, BTreeMap<String, ShardFixture>>;

pub fn load_fixtures(path: impl AsRef<Path>) -> GateResult<ShardFixtures> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .map_err(|e| GateError::Configuration(format!("failed to read fixtures {}: {}", path.display(), e)))?;
    serde_json::from_str(&content).map_err(|e| GateError::Configuration(format!("failed to parse fixtures: {}", e)))
}

/// One column reference of an analyzed statement
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnBinding {
    pub column: String,
    /// Visible names of the tables the column resolves to, following derived tables
    pub tables: Vec<String>,
    pub data_type: Option<DataType>,
}

/// What the analyzer learned about a statement
#[derive(Debug, Clone)]
pub struct StatementAnalysis {
    pub tables: Vec<String>,
    pub columns: Vec<ColumnBinding>,
    pub not_single_route: Option<String>,
    pub not_unsharded: Option<String>,
}

impl StatementAnalysis {
    fn from_sem_table(statement: &Statement, sem: &SemTable) -> Self {
        let table_name = |offset: usize| {
            sem.tables()
                .get(offset)
                .and_then(|info| info.visible_name())
                .map(|name| name.to_string())
                .unwrap_or_else(|| format!("<table {}>", offset))
        };
        let tables = (0..sem.tables().len()).map(table_name).collect();
        let columns = column_exprs(statement)
            .into_iter()
            .map(|expr| ColumnBinding {
                column: expr.to_string(),
                tables: sem.recursive_deps(expr).iter().map(table_name).collect(),
                data_type: sem.type_for(expr),
            })
            .collect();
        Self {
            tables,
            columns,
            not_single_route: sem.not_single_route_err().map(|e| e.to_string()),
            not_unsharded: sem.not_unsharded_err().map(|e| e.to_string()),
        }
    }

    pub fn render(&self) -> String {
        let mut output = String::new();
        output.push_str(&format!("{}\n", "Tables:".bold()));
        for (offset, table) in self.tables.iter().enumerate() {
            output.push_str(&format!("  {} {}\n", format!("[{}]", offset).dimmed(), table.cyan().bold()));
        }

        output.push_str(&format!("\n{}\n", "Columns:".bold()));
        if self.columns.is_empty() {
            output.push_str(&format!("  {}\n", "none".dimmed()));
        }
        for binding in &self.columns {
            let data_type = binding
                .data_type
                .map(|t| t.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            output.push_str(&format!(
                "  {} {} -> {} {}\n",
                "•".green(),
                binding.column.cyan(),
                binding.tables.join(", ").yellow(),
                data_type.blue()
            ));
        }

        for (label, err) in [
            ("Not single route:", &self.not_single_route),
            ("Needs unsharded keyspace:", &self.not_unsharded),
        ] {
            if let Some(err) = err {
                output.push_str(&format!("\n{} {}\n", label.magenta().bold(), err));
            }
        }
        output
    }
}

/// Column references of a statement, each SELECT block before the subqueries and derived tables it contains
fn column_exprs(statement: &Statement) -> Vec<&Expr> {
    let mut roots: Vec<&Expr> = Vec::new();
    let mut pending: Vec<&SelectStatement> = Vec::new();
    match statement {
        Statement::Select(select) => pending.push(select),
        Statement::Insert(insert) => match &insert.rows {
            InsertRows::Values(rows) => roots.extend(rows.iter().flatten()),
            InsertRows::Select(select) => pending.push(select),
        },
        Statement::Update(update) => {
            roots.extend(update.assignments.iter().map(|a| &a.expr));
            roots.extend(update.where_clause.iter());
            roots.extend(update.order_by.iter().map(|o| &o.expr));
        }
        Statement::Delete(delete) => {
            roots.extend(delete.where_clause.iter());
            roots.extend(delete.order_by.iter().map(|o| &o.expr));
        }
    }

    let mut columns = Vec::new();
    let mut next = 0;
    loop {
        if let Some(select) = pending.pop() {
            push_select_exprs(select, &mut roots, &mut pending);
            continue;
        }
        let Some(root) = roots.get(next).copied() else {
            break;
        };
        next += 1;
        root.walk(&mut |expr| {
            if let ExprKind::Column(_) = expr.kind {
                columns.push(expr);
            }
            if let Some(subquery) = expr.subquery_statement() {
                pending.push(subquery);
            }
            true
        });
    }
    columns
}

fn push_select_exprs<'a>(
    statement: &'a SelectStatement,
    roots: &mut Vec<&'a Expr>,
    pending: &mut Vec<&'a SelectStatement>,
) {
    match statement {
        SelectStatement::Select(select) => {
            roots.extend(select.projection.iter().filter_map(|expr| match expr {
                SelectExpr::Aliased(aliased) => Some(&aliased.expr),
                SelectExpr::Star(_) => None,
            }));
            for table_expr in &select.from {
                push_table_exprs(table_expr, roots, pending);
            }
            roots.extend(select.where_clause.iter());
            roots.extend(select.group_by.iter());
            roots.extend(select.having.iter());
            roots.extend(select.order_by.iter().map(|o| &o.expr));
        }
        SelectStatement::Union(union) => {
            push_select_exprs(&union.left, roots, pending);
            push_select_exprs(&union.right, roots, pending);
            roots.extend(union.order_by.iter().map(|o| &o.expr));
        }
    }
}

/// Join conditions become roots, derived tables are walked later
fn push_table_exprs<'a>(
    table_expr: &'a TableExpr,
    roots: &mut Vec<&'a Expr>,
    pending: &mut Vec<&'a SelectStatement>,
) {
    match table_expr {
        TableExpr::Aliased(aliased) => {
            if let SimpleTableExpr::Derived(subquery) = &aliased.expr {
                pending.push(subquery);
            }
        }
        TableExpr::Join(join) => {
            push_table_exprs(&join.left, roots, pending);
            push_table_exprs(&join.right, roots, pending);
            roots.extend(join.condition.on.iter());
        }
        TableExpr::Paren(exprs) => {
            for expr in exprs {
                push_table_exprs(expr, roots, pending);
            }
        }
    }
}

fn literal_count(expr: &Expr) -> Option<i64> {
    match &expr.kind {
        ExprKind::Literal(Literal::Integer(n)) => Some(*n),
        _ => None,
    }
}

/// Main CLI runner that handles command execution
pub struct CliRunner {
    config: EngineConfig,
    parser: StatementParser,
}

impl CliRunner {
    pub fn new(config: EngineConfig) -> GateResult<Self> {
        Ok(Self {
            config,
            parser: StatementParser::new()?,
        })
    }

    /// Runner over the given configuration file, or the default two-keyspace topology
    pub fn from_config_path(path: Option<&str>) -> GateResult<Self> {
        let config = match path {
            Some(path) => EngineConfig::load(path)?,
            None => EngineConfig::default(),
        };
        Self::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Parse and analyze a statement against a vschema
    pub fn analyze(&self, sql: &str, vschema: &VSchema, keyspace: Option<&str>) -> GateResult<StatementAnalysis> {
        let mut statement = self.parser.parse(sql)?;
        let sem = semantics::analyze(&mut statement, keyspace, vschema)?;
        debug!(tables = sem.tables().len(), "analysis complete");
        Ok(StatementAnalysis::from_sem_table(&statement, &sem))
    }

    fn keyspace(&self, name: &str) -> GateResult<Arc<Keyspace>> {
        let topology = self
            .config
            .topology
            .keyspaces
            .get(name)
            .ok_or_else(|| GateError::Configuration(format!("keyspace '{}' is not in the topology", name)))?;
        Ok(Arc::new(Keyspace {
            name: name.to_string(),
            sharded: topology.sharded,
        }))
    }

    /// Build the plan for a SELECT: a Route over every shard of the keyspace,
    /// under a Limit when the statement carries a literal LIMIT
    pub fn plan_query(&self, sql: &str, keyspace: &str) -> GateResult<Box<dyn Primitive>> {
        let statement = match self.parser.parse(sql)? {
            Statement::Select(select) => select,
            _ => return Err(GateError::unsupported("query command", "DML statements")),
        };
        let keyspace = self.keyspace(keyspace)?;
        let opcode = if keyspace.sharded {
            RouteOpcode::Scatter
        } else {
            RouteOpcode::Unsharded
        };
        let query = statement.to_string();
        let route: Box<dyn Primitive> = Box::new(Route::new(opcode, keyspace, &query, &query));

        let limit = match &statement {
            SelectStatement::Select(select) => select.limit.as_ref(),
            SelectStatement::Union(union) => union.limit.as_ref(),
        };
        let Some(limit) = limit else {
            return Ok(route);
        };
        match (literal_count(&limit.count), limit.offset.as_ref().map(literal_count)) {
            (Some(count), None) => Ok(Box::new(Limit::new(PlanValue::Value(Value::Integer(count)), route))),
            (Some(count), Some(Some(offset))) => Ok(Box::new(
                Limit::new(PlanValue::Value(Value::Integer(count)), route)
                    .with_offset(PlanValue::Value(Value::Integer(offset))),
            )),
            _ => Ok(route),
        }
    }

    /// Mock topology with every fixture installed
    pub fn vcursor(&self, fixtures: Option<&ShardFixtures>) -> GateResult<MockVcursor> {
        let vcursor = MockVcursor::from_config(&self.config)?;
        for (keyspace, shards) in fixtures.into_iter().flatten() {
            for (shard, fixture) in shards {
                vcursor.set_shard_result(keyspace, shard, fixture.to_result());
            }
        }
        Ok(vcursor)
    }

    /// Execute a SELECT over the mock topology and return its rows
    pub async fn run_query(
        &self,
        sql: &str,
        keyspace: &str,
        fixtures: Option<&ShardFixtures>,
        stream: bool,
        verbose: bool,
    ) -> GateResult<QueryResult> {
        let plan = self.plan_query(sql, keyspace)?;
        if verbose {
            eprintln!("{}", OutputFormatter::format_info("Plan:"));
            eprint!("{}", describe_plan(plan.as_ref()));
        }

        let vcursor = self.vcursor(fixtures)?;
        let ctx = ExecContext::from_config(&self.config.execution).read_only();
        let started = Instant::now();
        let mut result = if stream {
            let mut rows = require_streaming(plan.as_ref())?
                .stream_execute(&ctx, &vcursor, &BindVars::new(), true)
                .await?;
            let collected = collect_stream(&mut rows, true).await;
            rows.close().await?;
            collected?
        } else {
            plan.execute(&ctx, &vcursor, &BindVars::new(), true).await?
        };
        result.execution_time = started.elapsed();
        info!(request_id = ctx.request_id, rows = result.row_count(), "query complete");

        if verbose {
            for query in vcursor.executed_sql().await {
                eprintln!("{}", OutputFormatter::format_info(&format!("Sent {}", query)));
            }
        }
        Ok(result)
    }

    pub async fn execute_query(
        &self,
        sql: &str,
        keyspace: &str,
        fixtures: Option<&ShardFixtures>,
        format: &OutputFormat,
        stream: bool,
        verbose: bool,
    ) -> GateResult<String> {
        let result = self.run_query(sql, keyspace, fixtures, stream, verbose).await?;
        Ok(OutputFormatter::format_result(&result, format))
    }

    /// List keyspaces with their shards, and the tables the vschema gives each keyspace
    pub fn describe_topology(&self, vschema: Option<&VSchema>) -> String {
        let keyspaces = &self.config.topology.keyspaces;
        if keyspaces.is_empty() {
            return OutputFormatter::format_info("No keyspaces are configured.");
        }

        let mut output = String::new();
        output.push_str(&format!("{}\n", "Keyspaces:".bold()));
        for (name, topology) in keyspaces {
            let kind = if topology.sharded { "sharded".yellow() } else { "unsharded".green() };
            output.push_str(&format!("  {} {} ({})\n", "•".green(), name.cyan().bold(), kind));
            output.push_str(&format!("    Shards: {}\n", topology.shards.join(", ")));

            let Some(schema) = vschema.and_then(|v| v.keyspace(name)) else {
                continue;
            };
            for (table_name, table) in &schema.tables {
                let vindex = table
                    .primary_vindex()
                    .map(|cv| format!(" by {}({})", cv.name(), cv.columns.join(", ")))
                    .unwrap_or_default();
                output.push_str(&format!("    {} {}{}\n", "-".dimmed(), table_name, vindex.blue()));
            }
        }
        output
    }
}

fn report<T>(result: GateResult<T>, print: impl FnOnce(T)) -> anyhow::Result<()> {
    match result {
        Ok(value) => {
            print(value);
            Ok(())
        }
        Err(e) => {
            eprintln!("{}", OutputFormatter::format_error(&e));
            std::process::exit(1);
        }
    }
}

/// Main entry point for CLI execution
pub async fn run_cli() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(&args.log_level);

    match args.command {
        Commands::Analyze { sql, vschema, keyspace } => {
            let analysis = CliRunner::from_config_path(None).and_then(|runner| {
                let vschema = match vschema {
                    Some(path) => VSchema::load(path)?,
                    None => VSchema::new(),
                };
                runner.analyze(&sql, &vschema, keyspace.as_deref())
            });
            report(analysis, |analysis| print!("{}", analysis.render()))
        }
        Commands::Query {
            sql,
            keyspace,
            format,
            config,
            fixtures,
            stream,
            verbose,
        } => {
            let runner = match CliRunner::from_config_path(config.as_deref()) {
                Ok(runner) => runner,
                Err(e) => return report(Err::<(), _>(e), |_| {}),
            };
            let fixtures = match fixtures.map(load_fixtures).transpose() {
                Ok(fixtures) => fixtures,
                Err(e) => return report(Err::<(), _>(e), |_| {}),
            };
            let output = runner
                .execute_query(&sql, &keyspace, fixtures.as_ref(), &format, stream, verbose)
                .await;
            report(output, |output| println!("{}", output))
        }
        Commands::Topology { config, vschema } => {
            let output = CliRunner::from_config_path(config.as_deref()).and_then(|runner| {
                let vschema = vschema.map(VSchema::load).transpose()?;
                Ok(runner.describe_topology(vschema.as_ref()))
            });
            report(output, |output| print!("{}", output))
        }
    }
}
