//! Event capture for market runs.
//!
//! A `tracing` subscriber turns every info-level event into one row of a table
//! named after the event's target (`order`, `trade`, `tick`, `transition`).
//! Columns appear the first time a field is seen and are padded with defaults
//! for rows that lack them. Tables convert to polars DataFrames and can be
//! written out as parquet.
//!
//! ```ignore
//! let ((), log) = instrument::capture(|| world.run(50).unwrap());
//! let ticks = log.table("tick").unwrap().to_dataframe()?;
//! let prices = instrument::price_series(&ticks)?;
//! ```

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use polars::prelude::*;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Record};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Id, Metadata, Subscriber};

pub const ORDER_TABLE: &str = "order";
pub const TRADE_TABLE: &str = "trade";
pub const TICK_TABLE: &str = "tick";
pub const TRANSITION_TABLE: &str = "transition";

// ============================================================================
// Tables
// ============================================================================

/// One typed column.
#[derive(Debug, Clone, PartialEq)]
pub enum Values {
    U64(Vec<u64>),
    I64(Vec<i64>),
    F64(Vec<f64>),
    Bool(Vec<bool>),
    Str(Vec<String>),
}

impl Values {
    pub fn len(&self) -> usize {
        match self {
            Values::U64(v) => v.len(),
            Values::I64(v) => v.len(),
            Values::F64(v) => v.len(),
            Values::Bool(v) => v.len(),
            Values::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Extend with defaults up to `rows` entries.
    fn pad_to(&mut self, rows: usize) {
        let missing = rows.saturating_sub(self.len());
        if missing == 0 {
            return;
        }
        match self {
            Values::U64(v) => v.extend(std::iter::repeat_n(0, missing)),
            Values::I64(v) => v.extend(std::iter::repeat_n(0, missing)),
            Values::F64(v) => v.extend(std::iter::repeat_n(0.0, missing)),
            Values::Bool(v) => v.extend(std::iter::repeat_n(false, missing)),
            Values::Str(v) => v.extend(std::iter::repeat_n(String::new(), missing)),
        }
    }

    fn to_column(&self, name: &str) -> Column {
        match self {
            Values::U64(v) => Column::new(name.into(), v),
            Values::I64(v) => Column::new(name.into(), v),
            Values::F64(v) => Column::new(name.into(), v),
            Values::Bool(v) => Column::new(name.into(), v),
            Values::Str(v) => Column::new(name.into(), v),
        }
    }
}

/// Rows of one event target. Columns are kept in name order.
#[derive(Debug, Clone, Default)]
pub struct EventTable {
    columns: BTreeMap<String, Values>,
    rows: usize,
}

impl EventTable {
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn column(&self, name: &str) -> Option<&Values> {
        self.columns.get(name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    fn finish_row(&mut self) {
        self.rows += 1;
        for values in self.columns.values_mut() {
            values.pad_to(self.rows);
        }
    }

    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        DataFrame::new(
            self.columns
                .iter()
                .map(|(name, values)| values.to_column(name))
                .collect(),
        )
    }
}

/// Everything captured on this thread, keyed by target.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    tables: BTreeMap<String, EventTable>,
}

impl EventLog {
    pub fn table(&self, target: &str) -> Option<&EventTable> {
        self.tables.get(target)
    }

    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Tables that fail to convert are skipped.
    pub fn to_dataframes(&self) -> HashMap<String, DataFrame> {
        self.tables
            .iter()
            .filter_map(|(name, table)| table.to_dataframe().ok().map(|df| (name.clone(), df)))
            .collect()
    }
}

thread_local! {
    static LOG: RefCell<EventLog> = RefCell::default();
}

/// Take everything captured on this thread, leaving it empty.
pub fn take() -> EventLog {
    LOG.with(|log| std::mem::take(&mut *log.borrow_mut()))
}

/// Discard everything captured on this thread.
pub fn reset() {
    LOG.with(|log| *log.borrow_mut() = EventLog::default());
}

// ============================================================================
// Subscriber
// ============================================================================

/// One recorded field value.
#[derive(Debug, Clone, PartialEq)]
enum Cell {
    U64(u64),
    I64(i64),
    F64(f64),
    Bool(bool),
    Str(String),
}

impl Cell {
    /// Empty column of this cell's type, back-filled to `rows`.
    fn column(&self, rows: usize) -> Values {
        let mut values = match self {
            Cell::U64(_) => Values::U64(Vec::new()),
            Cell::I64(_) => Values::I64(Vec::new()),
            Cell::F64(_) => Values::F64(Vec::new()),
            Cell::Bool(_) => Values::Bool(Vec::new()),
            Cell::Str(_) => Values::Str(Vec::new()),
        };
        values.pad_to(rows);
        values
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::U64(x) => Some(*x as f64),
            Cell::I64(x) => Some(*x as f64),
            Cell::F64(x) => Some(*x),
            Cell::Bool(_) | Cell::Str(_) => None,
        }
    }

    fn into_string(self) -> String {
        match self {
            Cell::U64(x) => x.to_string(),
            Cell::I64(x) => x.to_string(),
            Cell::F64(x) => x.to_string(),
            Cell::Bool(x) => x.to_string(),
            Cell::Str(x) => x,
        }
    }
}

impl Values {
    fn is_numeric(&self) -> bool {
        matches!(self, Values::U64(_) | Values::I64(_) | Values::F64(_))
    }

    fn holds(&self, cell: &Cell) -> bool {
        matches!(
            (self, cell),
            (Values::U64(_), Cell::U64(_))
                | (Values::I64(_), Cell::I64(_))
                | (Values::F64(_), Cell::F64(_))
                | (Values::Bool(_), Cell::Bool(_))
                | (Values::Str(_), Cell::Str(_))
        )
    }

    /// Re-type the column so `cell` fits: mixed numbers become F64, anything else Str.
    fn widen_for(&mut self, cell: &Cell) {
        let widened = if self.is_numeric() && cell.as_f64().is_some() {
            Values::F64(match self {
                Values::U64(v) => v.iter().map(|&x| x as f64).collect(),
                Values::I64(v) => v.iter().map(|&x| x as f64).collect(),
                Values::F64(v) => std::mem::take(v),
                Values::Bool(_) | Values::Str(_) => Vec::new(),
            })
        } else {
            Values::Str(match self {
                Values::U64(v) => v.iter().map(u64::to_string).collect(),
                Values::I64(v) => v.iter().map(i64::to_string).collect(),
                Values::F64(v) => v.iter().map(f64::to_string).collect(),
                Values::Bool(v) => v.iter().map(bool::to_string).collect(),
                Values::Str(v) => std::mem::take(v),
            })
        };
        *self = widened;
    }

    fn push(&mut self, cell: Cell) {
        if !self.holds(&cell) {
            self.widen_for(&cell);
        }
        match (self, cell) {
            (Values::U64(v), Cell::U64(x)) => v.push(x),
            (Values::I64(v), Cell::I64(x)) => v.push(x),
            (Values::Bool(v), Cell::Bool(x)) => v.push(x),
            (Values::F64(v), cell) => v.push(cell.as_f64().unwrap_or_default()),
            (Values::Str(v), cell) => v.push(cell.into_string()),
            // widen_for leaves no other pairing
            _ => {}
        }
    }
}

/// Writes one event's fields into the current row.
struct RowVisitor<'a> {
    table: &'a mut EventTable,
}

impl RowVisitor<'_> {
    /// Column for `field` is created and back-filled on first sight.
    fn push(&mut self, field: &Field, cell: Cell) {
        let rows = self.table.rows;
        self.table
            .columns
            .entry(field.name().to_string())
            .or_insert_with(|| cell.column(rows))
            .push(cell);
    }
}

impl Visit for RowVisitor<'_> {
    fn record_u64(&mut self, field: &Field, value: u64) {
        self.push(field, Cell::U64(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.push(field, Cell::I64(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.push(field, Cell::F64(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.push(field, Cell::Bool(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.push(field, Cell::Str(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.push(field, Cell::Str(format!("{value:?}")));
    }
}

/// Collects info-level events into per-target tables. Spans are ignored.
pub struct MarketSubscriber;

impl Subscriber for MarketSubscriber {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.is_event() && *metadata.level() <= tracing::Level::INFO
    }

    fn new_span(&self, _span: &Attributes<'_>) -> Id {
        Id::from_u64(1)
    }

    fn record(&self, _span: &Id, _values: &Record<'_>) {}

    fn record_follows_from(&self, _span: &Id, _follows: &Id) {}

    fn event(&self, event: &Event<'_>) {
        let target = event.metadata().target().to_string();
        LOG.with(|log| {
            let mut log = log.borrow_mut();
            let table = log.tables.entry(target).or_default();
            event.record(&mut RowVisitor { table: &mut *table });
            table.finish_row();
        });
    }

    fn enter(&self, _span: &Id) {}

    fn exit(&self, _span: &Id) {}
}

/// Run `f` with a thread-scoped subscriber and return what it emitted.
pub fn capture<R>(f: impl FnOnce() -> R) -> (R, EventLog) {
    reset();
    let result = tracing::subscriber::with_default(MarketSubscriber, f);
    (result, take())
}

// ============================================================================
// Market views
// ============================================================================

pub fn f64_column(df: &DataFrame, name: &str) -> PolarsResult<Vec<f64>> {
    Ok(df.column(name)?.f64()?.into_no_null_iter().collect())
}

pub fn u64_column(df: &DataFrame, name: &str) -> PolarsResult<Vec<u64>> {
    Ok(df.column(name)?.u64()?.into_no_null_iter().collect())
}

fn sorted_by_tick(df: &DataFrame) -> PolarsResult<DataFrame> {
    df.clone().lazy().sort(["tick"], Default::default()).collect()
}

/// Clearing price per tick from the `tick` table.
pub fn price_series(ticks: &DataFrame) -> PolarsResult<Vec<f64>> {
    f64_column(&sorted_by_tick(ticks)?, "price")
}

/// Traded volume per tick from the `tick` table.
pub fn volume_series(ticks: &DataFrame) -> PolarsResult<Vec<u64>> {
    u64_column(&sorted_by_tick(ticks)?, "volume")
}

/// Quantity traded per tick and side from the `trade` table.
pub fn traded_by_side(trades: &DataFrame) -> PolarsResult<DataFrame> {
    trades
        .clone()
        .lazy()
        .group_by([col("tick"), col("side")])
        .agg([col("quantity").sum().alias("quantity")])
        .sort(["tick", "side"], Default::default())
        .collect()
}

// ============================================================================
// Parquet output
// ============================================================================

fn io_error(e: std::io::Error) -> PolarsError {
    PolarsError::IO {
        error: e.into(),
        msg: None,
    }
}

/// Write each frame to `{dir}/{name}.parquet`.
pub fn save_parquet(dfs: &mut HashMap<String, DataFrame>, dir: &Path) -> PolarsResult<()> {
    std::fs::create_dir_all(dir).map_err(io_error)?;
    for (name, df) in dfs.iter_mut() {
        let file = std::fs::File::create(dir.join(format!("{name}.parquet"))).map_err(io_error)?;
        ParquetWriter::new(file).finish(df)?;
    }
    Ok(())
}

/// Directory-safe form of a run name.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .take(60)
        .collect()
}

/// First `{parent}/{name}`, `{parent}/{name}_2`, ... that does not exist yet.
fn fresh_run_dir(parent: &Path, name: &str) -> PathBuf {
    let base = sanitize(name);
    let mut dir = parent.join(&base);
    let mut n = 2;
    while dir.exists() {
        dir = parent.join(format!("{base}_{n}"));
        n += 1;
    }
    dir
}

/// Captures this thread's events for as long as it lives and writes them as
/// parquet when dropped.
///
/// `get` drains the captured tables for in-test analysis; whatever was drained
/// (or is still pending) is written on drop, followed by a `_ready` sentinel.
pub struct ScopedRecorder {
    run_dir: PathBuf,
    dfs: Option<HashMap<String, DataFrame>>,
    _guard: DefaultGuard,
}

impl ScopedRecorder {
    pub fn new(parent: impl AsRef<Path>, name: &str) -> Self {
        reset();
        Self {
            run_dir: fresh_run_dir(parent.as_ref(), name),
            dfs: None,
            _guard: tracing::subscriber::set_default(MarketSubscriber),
        }
    }

    pub fn get(&mut self) -> &HashMap<String, DataFrame> {
        self.dfs.get_or_insert_with(|| take().to_dataframes())
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }
}

impl Drop for ScopedRecorder {
    fn drop(&mut self) {
        let mut dfs = self.dfs.take().unwrap_or_else(|| take().to_dataframes());
        if dfs.is_empty() {
            return;
        }
        if let Err(e) = save_parquet(&mut dfs, &self.run_dir) {
            eprintln!("ScopedRecorder: failed to write {}: {e}", self.run_dir.display());
            return;
        }
        if let Err(e) = std::fs::File::create(self.run_dir.join("_ready")) {
            eprintln!("ScopedRecorder: failed to write _ready sentinel: {e}");
        }
    }
}
