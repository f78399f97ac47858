use std::sync::Arc;

use chrono::{DateTime, Utc};

use widecol_api::query::Query;
use widecol_api::row::{Row, split_column};
use widecol_api::value::ValueType;
use widecol_engine::{EngineConfig, EngineError, ScanEngine, TableCache, TypeRegistry};
use widecol_store_memory::MemoryStore;

use crate::config::BrowseArgs;
use crate::error::CliError;

const TABLE: &str = "people";

pub async fn run(config_path: Option<&str>, args: BrowseArgs) -> Result<(), CliError> {
    let config = match config_path {
        Some(path) => {
            let config = EngineConfig::load(path)?;
            tracing::info!(config = %path, "loaded config");
            config
        }
        None => EngineConfig::default(),
    };
    let page_size = args.page_size.unwrap_or(config.page_size);
    if page_size == 0 {
        return Err(CliError::Args("page size must be positive".to_string()));
    }

    let registry = config.registry()?;
    let store = Arc::new(MemoryStore::new());
    seed(&store, &registry, args.rows);

    let mut types = config.column_types(&registry)?;
    for (column, value_type) in [
        ("key", ValueType::Integer),
        ("d:age", ValueType::Short),
        ("d:joined", registry.resolve("DateTime")?),
    ] {
        if !types.is_explicit(column) {
            types.set(column, value_type);
        }
    }

    let registry = Arc::new(registry);
    let mut engine = ScanEngine::new(
        Arc::new(TableCache::new(store)),
        TABLE,
        registry.clone(),
        types,
    )
    .with_caching(config.scan_caching);

    if let Some(query) = build_query(&args, &registry)? {
        engine.set_query(Some(query))?;
    }

    println!("columns: {}", engine.columns(config.column_sample_size)?.join(", "));

    // Forward.
    for _ in 0..args.pages {
        let before = engine.page_index();
        match before {
            None => engine.current_page(page_size)?,
            Some(_) => engine.next_page(page_size)?,
        };
        if before.is_some() && engine.page_index() == before {
            println!("-- end of table --");
            break;
        }
        print_page(engine.page_index().unwrap_or_default(), engine.rows());
        for issue in engine.diagnostics() {
            println!("   ! {issue}");
        }
    }

    // And back.
    while engine.has_previous() {
        engine.prev_page();
        let rows = engine.rows();
        let (first, last) = (rows.first(), rows.last());
        println!(
            "back to page {}: {} .. {}",
            engine.page_index().unwrap_or_default(),
            first.map(|r| r.key().formatted()).unwrap_or_default(),
            last.map(|r| r.key().formatted()).unwrap_or_default(),
        );
    }

    count_rows(&engine).await
}

/// Count on a blocking worker; Ctrl+C stops the count.
async fn count_rows(engine: &ScanEngine) -> Result<(), CliError> {
    let counter = engine.row_counter();
    let token = counter.cancel_token().clone();
    let mut task = tokio::task::spawn_blocking(move || counter.count());

    let result = tokio::select! {
        joined = &mut task => joined?,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("interrupt received, cancelling row count");
            token.cancel();
            task.await?
        }
    };

    match result {
        Ok(count) => println!("rows: {count}"),
        Err(EngineError::Cancelled) => println!("rows: (cancelled)"),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn build_query(args: &BrowseArgs, registry: &TypeRegistry) -> Result<Option<Query>, CliError> {
    let Some(column) = &args.filter_column else {
        return Ok(None);
    };
    let (family, qualifier) = split_column(column).ok_or_else(|| {
        CliError::Args(format!("filter column '{column}' must be family:qualifier"))
    })?;

    let mut builder = Query::builder().family(family).column(qualifier);
    if let (Some(operator), Some(word)) = (args.operator, &args.word) {
        let word_type = registry.resolve(&args.word_type)?;
        builder = builder.word(operator, word_type, word);
    }
    Ok(Some(builder.build()?))
}

/// Demo rows: Integer keys `1..=rows`, a name, an age, a join date and an
/// event timestamp.
fn seed(store: &MemoryStore, registry: &TypeRegistry, rows: u32) {
    let table = store.create_table(TABLE, &["d"]);
    for i in 1..=rows {
        let key = (i as i32).to_be_bytes();
        let joined = DateTime::<Utc>::from_timestamp(1_600_000_000 + i64::from(i) * 86_400, 0)
            .unwrap_or_default()
            .format(registry.date_format().as_str())
            .to_string();
        table.put(&key, "d", "name", format!("person-{i}").as_bytes());
        table.put(&key, "d", "age", &((18 + i % 60) as i16).to_be_bytes());
        table.put(&key, "d", "joined", joined.as_bytes());
        if i % 3 == 0 {
            table.put(&key, "d", "eventTimestamp", &(i64::from(i) * 1_000).to_be_bytes());
        }
    }
    tracing::info!(table = TABLE, rows, "seeded demo table");
}

fn print_page(index: usize, rows: &[Row]) {
    println!("== page {index} ({} rows) ==", rows.len());
    for row in rows {
        let cells: Vec<String> = row
            .cells()
            .map(|c| format!("{}={}", c.qualifier(), c.value))
            .collect();
        println!("{:>6}  {}", row.key().formatted(), cells.join("  "));
    }
}
