use std::path::{Path, PathBuf};
use tablekv::config::TableConfig;
use tablekv::descriptor::TableDescriptor;
use tablekv::schema::{DEFAULT_KEY_TYPE, DEFAULT_VALUE_TYPE, create_table_sql};
use tablekv::statements::Statements;

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        return Err("missing command".into());
    }
    match args[1].as_str() {
        "ddl" => cmd_ddl(&args[2..]),
        "render" => cmd_render(&args[2..]),
        "check" => cmd_check(&args[2..]),
        other => {
            print_usage();
            Err(format!("unknown top-level command: {other}"))
        }
    }
}

fn cmd_ddl(args: &[String]) -> Result<(), String> {
    let descriptor = load_descriptor(args)?;
    let key_type = parse_flag_value(args, "--key-type").unwrap_or_else(|| DEFAULT_KEY_TYPE.into());
    let value_type =
        parse_flag_value(args, "--value-type").unwrap_or_else(|| DEFAULT_VALUE_TYPE.into());
    let sql = create_table_sql(&descriptor, &key_type, &value_type).map_err(|e| e.to_string())?;
    if let Some(db) = parse_flag_value(args, "--apply") {
        apply_ddl(&PathBuf::from(db), &sql)?;
    }
    println!("{sql};");
    Ok(())
}

fn cmd_render(args: &[String]) -> Result<(), String> {
    let descriptor = load_descriptor(args)?;
    let template = parse_flag_value(args, "--template").ok_or("--template is required")?;
    let strict = !has_flag(args, "--lenient");
    let sql = descriptor
        .render(&template, strict)
        .map_err(|e| e.to_string())?;
    println!("{sql}");
    Ok(())
}

fn cmd_check(args: &[String]) -> Result<(), String> {
    let descriptor = load_descriptor(args)?;
    let statements = Statements::render(&descriptor).map_err(|e| e.to_string())?;
    println!(
        "table={} key={} value={} version={} created={} updated={}",
        descriptor.table(),
        descriptor.key_column(),
        descriptor.value_column(),
        descriptor.version_column(),
        descriptor.created_column(),
        descriptor.updated_column(),
    );
    println!("insert: {}", statements.insert);
    println!("swap:   {}", statements.swap);
    println!("remove: {}", statements.remove);
    if let Some(db) = parse_flag_value(args, "--db") {
        query_table(&PathBuf::from(db), descriptor)?;
        println!("lookup: ok");
    }
    Ok(())
}

fn load_descriptor(args: &[String]) -> Result<TableDescriptor, String> {
    let path = parse_flag_value(args, "--config").ok_or("--config is required")?;
    let config = TableConfig::from_path(&path).map_err(|e| format!("{path}: {e}"))?;
    TableDescriptor::new(config).map_err(|e| e.to_string())
}

#[cfg(feature = "sqlite")]
fn apply_ddl(db: &Path, sql: &str) -> Result<(), String> {
    let conn = rusqlite::Connection::open(db).map_err(|e| format!("open {}: {e}", db.display()))?;
    conn.execute_batch(sql)
        .map_err(|e| format!("apply ddl to {}: {e}", db.display()))
}

#[cfg(not(feature = "sqlite"))]
fn apply_ddl(_db: &Path, _sql: &str) -> Result<(), String> {
    Err("--apply requires the sqlite feature".into())
}

/// Runs a point lookup so a missing table or column surfaces as an error.
#[cfg(feature = "sqlite")]
fn query_table(db: &Path, descriptor: TableDescriptor) -> Result<(), String> {
    use tablekv::{ConnectionSource, KvRead, KvTable, SqliteFileSource};

    let source = SqliteFileSource::new(db).read_only(true);
    let mut conn = source.acquire().map_err(|e| e.to_string())?;
    let table = KvTable::<String, String>::new(descriptor).map_err(|e| e.to_string())?;
    table
        .reader()
        .contains(&mut conn, &String::new())
        .map(|_| ())
        .map_err(|e| format!("lookup on {}: {e}", source.describe()))
}

#[cfg(not(feature = "sqlite"))]
fn query_table(_db: &Path, _descriptor: TableDescriptor) -> Result<(), String> {
    Err("--db requires the sqlite feature".into())
}

fn parse_flag_value(args: &[String], flag: &str) -> Option<String> {
    for idx in 0..args.len() {
        if args[idx] == flag {
            return args.get(idx + 1).cloned();
        }
    }
    None
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|arg| arg == flag)
}

fn print_usage() {
    eprintln!("usage:");
    eprintln!(
        "  tablekv ddl --config <table.json> [--key-type <type>] [--value-type <type>] [--apply <db>]"
    );
    eprintln!("  tablekv render --config <table.json> --template <text> [--lenient]");
    eprintln!("  tablekv check --config <table.json> [--db <db>]");
}
