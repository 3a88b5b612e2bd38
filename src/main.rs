use clap::{Parser, Subcommand};
use csv::ReaderBuilder;
use prettytable::{Cell, Row, Table};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use heapdb::{
    BufferPool, Catalog, CatalogError, ConfigError, Field, FieldDesc, LogFile, PageId,
    Permissions, StorageConfig, StorageError, TransactionId, Tuple, TupleDesc, TupleError,
    TupleResult,
};

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Tuple(#[from] TupleError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, Parser)]
#[command(name = "heapdb", version, about = "Heap-file tables behind a write-ahead buffer pool")]
struct Cli {
    /// JSON storage configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the catalog, table files and log
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Buffer pool capacity in pages
    #[arg(long, global = true)]
    pool_pages: Option<usize>,

    /// Page size in bytes for newly created tables
    #[arg(long, global = true)]
    page_size: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a table from `name:type` field specs (int, float, char(n); `?` suffix = nullable)
    Create {
        table: String,
        #[arg(required = true)]
        fields: Vec<FieldDesc>,
    },
    /// Bulk load rows from a CSV file
    Import {
        table: String,
        csv: PathBuf,
        #[arg(long, default_value_t = ',')]
        delimiter: char,
        /// Skip the first line
        #[arg(long)]
        header: bool,
    },
    /// Print every row of a table
    Scan { table: String },
    /// Show page and free-slot statistics for a table
    Stat { table: String },
    /// Delete the row stored at `page`/`slot`
    Delete { table: String, page: u32, slot: usize },
    /// Dump the write-ahead log
    Log,
}

struct Engine {
    config: StorageConfig,
    catalog: Arc<Catalog>,
    wal: Arc<LogFile>,
    pool: BufferPool,
}

impl Engine {
    fn open(config: StorageConfig) -> Result<Self, CliError> {
        if config.pool_pages == 0 {
            return Err(CliError::InvalidArgument(
                "pool_pages must be at least 1".to_string(),
            ));
        }
        std::fs::create_dir_all(&config.data_dir)?;

        let catalog = Arc::new(Catalog::open(&config.data_dir)?);
        let wal = Arc::new(LogFile::open(config.log_path())?);
        let pool = BufferPool::with_capacity(Arc::clone(&catalog), wal.clone(), config.pool_pages);
        info!(
            data_dir = %config.data_dir.display(),
            pool_pages = config.pool_pages,
            tables = catalog.table_ids().len(),
            "storage opened"
        );

        Ok(Self {
            config,
            catalog,
            wal,
            pool,
        })
    }

    fn create(&self, table: &str, fields: Vec<FieldDesc>) -> Result<(), CliError> {
        let path = self.config.data_dir.join(format!("{}.dat", table));
        let desc = TupleDesc::new(fields);
        let tuple_size = desc.tuple_size();
        let table_id = self
            .catalog
            .create_table(table, path, desc, self.config.page_size)?;
        self.catalog.save(&self.config.data_dir)?;

        println!(
            "Created {} as {} ({} bytes per tuple)",
            table, table_id, tuple_size
        );
        Ok(())
    }

    fn import(
        &self,
        table: &str,
        csv: &Path,
        delimiter: char,
        header: bool,
    ) -> Result<(), CliError> {
        if !delimiter.is_ascii() {
            return Err(CliError::InvalidArgument(format!(
                "delimiter '{}' is not a single byte",
                delimiter
            )));
        }

        let table_id = self.catalog.lookup(table)?;
        let desc = Arc::clone(self.catalog.database_file(table_id)?.tuple_desc());
        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter as u8)
            .has_headers(header)
            .flexible(true)
            .from_path(csv)?;

        let txn = TransactionId::next();
        let mut inserted = 0usize;
        for record in reader.records() {
            let record = record?;
            let fields = record
                .iter()
                .zip(desc.fields())
                .map(|(text, field)| Field::parse(text, field.field_type))
                .collect::<TupleResult<Vec<_>>>()?;

            let mut tuple = Tuple::new(fields);
            self.pool.insert_tuple(txn, table_id, &mut tuple)?;
            inserted += 1;

            // dirty pages cannot be evicted, so write them out before the pool fills up
            if self.pool.dirty_pages(txn).len() >= self.pool.capacity() {
                self.pool.flush_pages(txn)?;
            }
        }

        self.pool.flush_all_pages()?;
        self.pool.transaction_complete(txn, true)?;
        println!("Imported {} rows into {}", inserted, table);
        Ok(())
    }

    fn scan(&self, table: &str) -> Result<(), CliError> {
        let table_id = self.catalog.lookup(table)?;
        let file = self.catalog.database_file(table_id)?;
        let txn = TransactionId::next();

        let mut view = Table::new();
        let mut titles = vec![Cell::new("rid")];
        titles.extend(file.tuple_desc().fields().iter().map(|f| Cell::new(&f.name)));
        view.set_titles(Row::new(titles));

        let mut rows = 0usize;
        for tuple in file.iter(&self.pool, txn) {
            let tuple = tuple?;
            let rid = tuple
                .record_id()
                .map(|rid| rid.to_string())
                .unwrap_or_default();
            let mut cells = vec![Cell::new(&rid)];
            cells.extend(tuple.fields().iter().map(|f| Cell::new(&f.to_string())));
            view.add_row(Row::new(cells));
            rows += 1;
        }
        self.pool.transaction_complete(txn, true)?;

        view.printstd();
        println!("{} rows", rows);
        Ok(())
    }

    fn stat(&self, table: &str) -> Result<(), CliError> {
        let table_id = self.catalog.lookup(table)?;
        let file = self.catalog.database_file(table_id)?;

        println!("table:          {} ({})", table, table_id);
        println!("file:           {}", file.path().display());
        println!("page size:      {}", file.page_size());
        println!("tuple size:     {}", file.tuple_desc().tuple_size());
        println!("slots per page: {}", file.slots_per_page());
        println!("pages:          {}", file.num_pages()?);

        let mut view = Table::new();
        view.set_titles(Row::new(vec![Cell::new("page"), Cell::new("free slots")]));
        for (page, free) in file.free_slot_directory() {
            view.add_row(Row::new(vec![
                Cell::new(&page.to_string()),
                Cell::new(if free { "yes" } else { "no" }),
            ]));
        }
        view.printstd();
        Ok(())
    }

    fn delete(&self, table: &str, page: u32, slot: usize) -> Result<(), CliError> {
        let table_id = self.catalog.lookup(table)?;
        let txn = TransactionId::next();

        let pid = PageId::new(table_id, page);
        let tuple = self
            .pool
            .get_page(txn, pid, Permissions::ReadOnly)?
            .read()
            .tuple(slot)?;
        self.pool.delete_tuple(txn, &tuple)?;
        self.pool.flush_pages(txn)?;
        self.pool.transaction_complete(txn, true)?;

        println!("Deleted {}", pid);
        Ok(())
    }

    fn dump_log(&self) -> Result<(), CliError> {
        let mut view = Table::new();
        view.set_titles(Row::new(vec![
            Cell::new("txn"),
            Cell::new("table"),
            Cell::new("page"),
            Cell::new("bytes changed"),
        ]));

        for record in self.wal.records()? {
            let table = self
                .catalog
                .table_name(record.page_id.table_id())
                .unwrap_or_else(|| record.page_id.table_id().to_string());
            let changed = record
                .before
                .iter()
                .zip(&record.after)
                .filter(|(b, a)| b != a)
                .count();
            view.add_row(Row::new(vec![
                Cell::new(&record.txn.to_string()),
                Cell::new(&table),
                Cell::new(&record.page_id.page_number().to_string()),
                Cell::new(&changed.to_string()),
            ]));
        }
        view.printstd();
        Ok(())
    }
}

fn load_config(cli: &Cli) -> Result<StorageConfig, CliError> {
    let mut config = match &cli.config {
        Some(path) => StorageConfig::load(path)?,
        None => StorageConfig::default(),
    };
    if let Some(data_dir) = &cli.data_dir {
        config.data_dir = data_dir.clone();
    }
    if let Some(pool_pages) = cli.pool_pages {
        config.pool_pages = pool_pages;
    }
    if let Some(page_size) = cli.page_size {
        config.page_size = page_size;
    }
    Ok(config)
}

fn run(cli: Cli) -> Result<(), CliError> {
    let engine = Engine::open(load_config(&cli)?)?;
    match cli.command {
        Command::Create { table, fields } => engine.create(&table, fields),
        Command::Import {
            table,
            csv,
            delimiter,
            header,
        } => engine.import(&table, &csv, delimiter, header),
        Command::Scan { table } => engine.scan(&table),
        Command::Stat { table } => engine.stat(&table),
        Command::Delete { table, page, slot } => engine.delete(&table, page, slot),
        Command::Log => engine.dump_log(),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
