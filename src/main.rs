//! Contract runner CLI.
//!
//! Assembles a contract file, runs one contract against an in-memory ledger
//! and prints the remaining budget, the environment and the rollback journal.
//!
//! # Usage
//! ```text
//! ledger <file.asm> <contract> [OPTIONS]
//! ```
//!
//! # Options
//! - `--param <name=value>`: Transaction parameter, repeatable
//! - `--table <name:col,col>`: Create a ledger table keyed by `id`, repeatable
//! - `--cost <n>`: Cost ceiling (overrides `LEDGER_COST_LIMIT`)
//! - `--state <n>`: State used to qualify bare contract names
//! - `--block <n>`: Block the writes belong to (defaults to 1)

use chrono::Utc;
use ledger::config::VmConfig;
use ledger::ledger::{BlockData, StateWriter};
use ledger::storage::memory_storage::MemoryStorage;
use ledger::storage::statement::SqlValue;
use ledger::storage::storage_trait::{ROLLBACK_TABLE, ROLLBACK_TX_TABLE, TableSchema};
use ledger::types::hash::Hash;
use ledger::virtual_machine::assembler::{assemble_source, render_diagnostic};
use ledger::virtual_machine::extend::{Extend, Session, Tracer};
use ledger::virtual_machine::object::Object;
use ledger::virtual_machine::value::{Value, ValueType};
use ledger::virtual_machine::vm::VM;
use ledger::{debug, error, info};
use std::env;
use std::fs;
use std::process;
use std::sync::Arc;

/// Parsed command line.
struct Options {
    file: String,
    contract: String,
    params: Vec<(String, String)>,
    tables: Vec<(String, Vec<String>)>,
    cost: Option<i64>,
    state: Option<u32>,
    block: i64,
}

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 3 || args[1] == "--help" || args[1] == "-h" {
        print_usage(&args[0]);
        let help = args.get(1).is_some_and(|a| a == "--help" || a == "-h");
        process::exit(if help { 0 } else { 1 });
    }

    let options = parse_args(&args).unwrap_or_else(|e| {
        error!("{e}");
        print_usage(&args[0]);
        process::exit(1)
    });

    let source = fs::read_to_string(&options.file).unwrap_or_else(|e| {
        error!("{}: {e}", options.file);
        process::exit(1)
    });

    let mut config = VmConfig::from_env();
    if let Some(cost) = options.cost {
        config = config.with_cost_limit(cost);
    }
    let mut vm = VM::with_config(config);
    let contracts = assemble_source(&mut vm, &source).unwrap_or_else(|e| {
        eprint!("{}", render_diagnostic(&options.file, &source, &e));
        process::exit(1)
    });
    info!("loaded {} contract(s) from {}", contracts.len(), options.file);

    let storage = Arc::new(MemoryStorage::new());
    for (table, columns) in &options.tables {
        let schema = columns
            .iter()
            .fold(TableSchema::new("id"), |schema, column| schema.column(column));
        storage.create_table(table, schema).unwrap_or_else(|e| {
            error!("{e}");
            process::exit(1)
        });
    }

    let writer = StateWriter::new(storage.clone())
        .with_block(BlockData {
            block_id: options.block,
            time: Utc::now().timestamp(),
        })
        .with_tx_hash(Hash::digest(source.as_bytes()));
    let tracer: Tracer = Arc::new(|_: &dyn Session, name: &str| {
        if name.is_empty() {
            debug!("contract returned");
        } else {
            debug!("entering {name}");
        }
    });
    let mut extend = Extend::new().with_session(Arc::new(writer)).with_tracer(tracer);
    if let Some(state) = options.state {
        extend = extend.with_state(state);
    }

    let (names, values) = match typed_params(&vm, &options) {
        Ok(params) => params,
        Err(e) => {
            error!("{e}");
            process::exit(1)
        }
    };

    match vm.run_contract(&mut extend, &options.contract, &names, values) {
        Ok(left) => println!("cost left: {left}"),
        Err(e) => {
            error!("{}: {e}", options.contract);
            process::exit(1)
        }
    }

    let mut env: Vec<_> = extend.values.iter().collect();
    env.sort_by(|a, b| a.0.cmp(b.0));
    println!("environment:");
    for (name, value) in env {
        println!("  {name} = {value}");
    }

    for table in [ROLLBACK_TABLE, ROLLBACK_TX_TABLE] {
        println!("{table}:");
        for row in storage.rows(table).unwrap_or_default() {
            let cells: Vec<String> = row
                .iter()
                .map(|(column, value)| format!("{column}={}", display_cell(value)))
                .collect();
            println!("  {}", cells.join(" "));
        }
    }
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut options = Options {
        file: args[1].clone(),
        contract: args[2].clone(),
        params: Vec::new(),
        tables: Vec::new(),
        cost: None,
        state: None,
        block: 1,
    };

    let mut i = 3;
    while i < args.len() {
        let flag = args[i].as_str();
        let value = args
            .get(i + 1)
            .ok_or_else(|| format!("{flag} requires an argument"))?;
        match flag {
            "--param" => {
                let (name, v) = value
                    .split_once('=')
                    .ok_or_else(|| format!("expected name=value, got {value}"))?;
                options.params.push((name.to_string(), v.to_string()));
            }
            "--table" => {
                let (name, columns) = value.split_once(':').unwrap_or((value.as_str(), ""));
                let columns = columns
                    .split(',')
                    .filter(|c| !c.is_empty())
                    .map(str::to_string)
                    .collect();
                options.tables.push((name.to_string(), columns));
            }
            "--cost" => {
                options.cost = Some(value.parse().map_err(|_| format!("invalid cost: {value}"))?);
            }
            "--state" => {
                options.state = Some(value.parse().map_err(|_| format!("invalid state: {value}"))?);
            }
            "--block" => {
                options.block = value.parse().map_err(|_| format!("invalid block: {value}"))?;
            }
            other => return Err(format!("unexpected argument: {other}")),
        }
        i += 2;
    }
    Ok(options)
}

/// Converts `--param` values to the types the contract declares.
fn typed_params(vm: &VM, options: &Options) -> Result<(String, Vec<Value>), String> {
    if options.params.is_empty() {
        return Ok((String::new(), vec![Value::Str(String::new())]));
    }
    let fields = match options.state {
        Some(state) => vm.resolve_in_state(&options.contract, state),
        None => vm.resolve(&options.contract),
    }
    .and_then(Object::block)
    .and_then(|id| vm.block(id).contract())
    .map(|meta| meta.tx.clone())
    .unwrap_or_default();

    let mut names = Vec::with_capacity(options.params.len());
    let mut values = Vec::with_capacity(options.params.len());
    for (name, raw) in &options.params {
        let ty = fields
            .iter()
            .find(|f| &f.name == name)
            .map(|f| f.ty)
            .unwrap_or(ValueType::Str);
        let value = match ty {
            ValueType::Int => Value::Int(raw.parse().map_err(|_| format!("{name}: invalid int {raw}"))?),
            ValueType::Bool => Value::Bool(raw.parse().map_err(|_| format!("{name}: invalid bool {raw}"))?),
            ValueType::Bytes => Value::Bytes(hex::decode(raw).map_err(|e| format!("{name}: {e}"))?),
            _ => Value::Str(raw.clone()),
        };
        names.push(name.as_str());
        values.push(value);
    }
    Ok((names.join(","), values))
}

fn display_cell(value: &SqlValue) -> String {
    match value {
        SqlValue::Bytes(b) => hex::encode(b),
        SqlValue::Null => "NULL".to_string(),
        other => other.render(),
    }
}

const USAGE: &str = "\
Ledger contract runner

USAGE:
    {program} <file.asm> <contract> [OPTIONS]

ARGS:
    <file.asm>     Assembly source defining the contracts
    <contract>     Contract to run, bare or state-qualified (@1Name)

OPTIONS:
    --param <name=value>     Transaction parameter (repeatable)
    --table <name:col,col>   Create a ledger table keyed by id (repeatable)
    --cost <n>               Cost ceiling
    --state <n>              State used to qualify bare contract names
    --block <n>              Block the writes belong to (default 1)
    -h, --help               Print this help message

ENVIRONMENT:
    LEDGER_LOG                    Log level (debug, info, warn, error)
    LEDGER_COST_LIMIT             Default cost ceiling
    LEDGER_MAX_CALL_DEPTH         Maximum nesting of function calls
    LEDGER_REJECT_NON_CALLABLE    Reject non-function natives (true/false)

EXAMPLES:
    {program} transfer.asm @1Transfer --table accounts:balance --param Amount=5
";

/// Prints usage information to stderr.
fn print_usage(program: &str) {
    eprintln!("{}", USAGE.replace("{program}", program));
}
