use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use facetlab_store::{
    Aggregate, AggregateOp, DataRow, Dataset, FilterId, Filter, Grouping, Limits, MemoryBackend,
    open_dataset,
};
use serde_json::Value;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Scan(args) => scan(args).await,
        Command::Group(args) => group(args).await,
        Command::Compare(args) => compare(args).await,
    }
}

#[derive(Parser)]
#[command(author, version, about = "Developer utilities for facetlab datasets")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Infer facets from a JSON dataset and print them.
    Scan(ScanArgs),
    /// Run one group-by over a JSON dataset and print the rows.
    Group(GroupArgs),
    /// Run the same group-by on the memory backend and a datastore and diff the rows.
    Compare(CompareArgs),
}

#[derive(Parser)]
struct ScanArgs {
    /// JSON array (or one object per line) of records.
    #[arg(long)]
    input: PathBuf,
    /// Directory holding facetlab.json; the memory backend is used when absent.
    #[arg(long)]
    datastore: Option<PathBuf>,
}

#[derive(Args, Clone)]
struct FilterArgs {
    /// Accessor of a facet to partition on; repeat for more dimensions.
    #[arg(long = "facet", required = true)]
    facets: Vec<String>,
    /// Grouping applied to interval facets.
    #[arg(long, value_enum, default_value_t = GroupingArg::FixedN)]
    grouping: GroupingArg,
    /// Bin count or bin size, depending on the grouping.
    #[arg(long, default_value_t = 20.0)]
    param: f64,
    /// Facets to sum per group.
    #[arg(long)]
    sum: Vec<String>,
    /// Facets to average per group.
    #[arg(long)]
    avg: Vec<String>,
}

#[derive(Parser)]
struct GroupArgs {
    #[arg(long)]
    input: PathBuf,
    #[arg(long)]
    datastore: Option<PathBuf>,
    #[command(flatten)]
    filter: FilterArgs,
}

#[derive(Parser)]
struct CompareArgs {
    #[arg(long)]
    input: PathBuf,
    /// Datastore to compare against the memory backend.
    #[arg(long)]
    datastore: PathBuf,
    /// Largest tolerated difference between aggregates.
    #[arg(long, default_value_t = 1e-9)]
    tolerance: f64,
    #[command(flatten)]
    filter: FilterArgs,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum GroupingArg {
    FixedN,
    FixedSize,
    FixedSizeCentered,
    Log,
}

impl From<GroupingArg> for Grouping {
    fn from(value: GroupingArg) -> Self {
        match value {
            GroupingArg::FixedN => Grouping::FixedN,
            GroupingArg::FixedSize => Grouping::FixedSize,
            GroupingArg::FixedSizeCentered => Grouping::FixedSizeCentered,
            GroupingArg::Log => Grouping::Log,
        }
    }
}

fn load_records(path: &Path) -> Result<Vec<Value>> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    if let Ok(Value::Array(records)) = serde_json::from_str::<Value>(&raw) {
        return Ok(records);
    }
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(at, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("{}: line {} is not JSON", path.display(), at + 1))
        })
        .collect()
}

async fn open(datastore: Option<&Path>) -> Result<Dataset> {
    match datastore {
        Some(dir) => open_dataset(dir)
            .await
            .map_err(|err| anyhow!(err.to_string())),
        None => Ok(Dataset::new(Box::new(MemoryBackend::new(Limits::default())))),
    }
}

async fn load(datastore: Option<&Path>, input: &Path) -> Result<Dataset> {
    let records = load_records(input)?;
    let mut dataset = open(datastore).await?;
    dataset
        .ingest(records)
        .await
        .map_err(|err| anyhow!(err.to_string()))?;
    dataset
        .scan_data()
        .await
        .map_err(|err| anyhow!(err.to_string()))?;
    Ok(dataset)
}

async fn scan(args: ScanArgs) -> Result<()> {
    let dataset = load(args.datastore.as_deref(), &args.input).await?;
    for facet in dataset.facets().iter() {
        println!(
            "{:<24} {:<11} {}",
            facet.accessor,
            facet.kind.as_str(),
            facet.description
        );
    }
    println!("{} facets via {}", dataset.facets().len(), dataset.backend_name());
    Ok(())
}

async fn build_filter(dataset: &mut Dataset, args: &FilterArgs) -> Result<FilterId> {
    let count = args.facets.len();
    let id = dataset.add_filter(Filter::new("xtask", count, count));
    for accessor in &args.facets {
        let facet = dataset
            .facet_by_accessor(accessor)
            .ok_or_else(|| anyhow!("unknown facet '{accessor}'"))?;
        let (facet_id, interval) = (facet.id, facet.kind.is_interval());
        let rank = dataset
            .add_partition(id, facet_id)
            .await
            .map_err(|err| anyhow!(err.to_string()))?;
        if interval {
            dataset
                .set_partition_grouping(id, rank, args.grouping.into(), args.param)
                .map_err(|err| anyhow!(err.to_string()))?;
        }
    }
    dataset
        .add_aggregate(id, Aggregate::count())
        .map_err(|err| anyhow!(err.to_string()))?;
    let measures = args
        .sum
        .iter()
        .map(|accessor| (accessor, AggregateOp::Sum))
        .chain(args.avg.iter().map(|accessor| (accessor, AggregateOp::Avg)));
    for (accessor, operation) in measures {
        let facet = dataset
            .facet_by_accessor(accessor)
            .ok_or_else(|| anyhow!("unknown facet '{accessor}'"))?;
        let aggregate = Aggregate::over(facet.id, operation);
        dataset
            .add_aggregate(id, aggregate)
            .map_err(|err| anyhow!(err.to_string()))?;
    }
    dataset.settle().await;
    Ok(id)
}

async fn grouped_rows(
    datastore: Option<&Path>,
    input: &Path,
    args: &FilterArgs,
) -> Result<Vec<DataRow>> {
    let mut dataset = load(datastore, input).await?;
    let id = build_filter(&mut dataset, args).await?;
    let filter = dataset
        .filter(id)
        .ok_or_else(|| anyhow!("filter vanished"))?;
    Ok(filter.data())
}

async fn group(args: GroupArgs) -> Result<()> {
    let rows = grouped_rows(args.datastore.as_deref(), &args.input, &args.filter).await?;
    for row in &rows {
        println!("{}", serde_json::to_string(row)?);
    }
    Ok(())
}

/// Rows keyed by composite key; category order differs between backends.
fn by_key(rows: Vec<DataRow>) -> Vec<(String, Vec<Option<f64>>)> {
    let mut keyed: Vec<_> = rows
        .into_iter()
        .map(|row| (row.key(), row.aggregates))
        .collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    keyed
}

fn differences(
    left: &[(String, Vec<Option<f64>>)],
    right: &[(String, Vec<Option<f64>>)],
    tolerance: f64,
) -> Vec<String> {
    let mut found = Vec::new();
    for (key, values) in left {
        match right.iter().find(|(other, _)| other == key) {
            None => found.push(format!("{key}: only in memory")),
            Some((_, other)) => {
                let same = values.len() == other.len()
                    && values.iter().zip(other).all(|pair| match pair {
                        (Some(a), Some(b)) => (a - b).abs() <= tolerance,
                        (a, b) => a == b,
                    });
                if !same {
                    found.push(format!("{key}: {values:?} vs {other:?}"));
                }
            }
        }
    }
    for (key, _) in right {
        if !left.iter().any(|(other, _)| other == key) {
            found.push(format!("{key}: only in datastore"));
        }
    }
    found
}

async fn compare(args: CompareArgs) -> Result<()> {
    let memory = by_key(grouped_rows(None, &args.input, &args.filter).await?);
    let stored = by_key(grouped_rows(Some(&args.datastore), &args.input, &args.filter).await?);
    let found = differences(&memory, &stored, args.tolerance);
    if found.is_empty() {
        println!("{} rows match", memory.len());
        return Ok(());
    }
    for line in &found {
        println!("{line}");
    }
    bail!("{} rows differ", found.len())
}
