use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use bark_containers::config::Config;
use bark_containers::containers::{
    MergingCollection, MessagesCollection, RangesManagingCollection, SimpleMergingCollection,
};
use bark_containers::feed::fill_collection;
use bark_containers::filter::ActiveFilter;
use bark_containers::sources::LogSource;
use bark_containers::sources::file::FileSource;

const USAGE: &str = "Usage: bark-merge [--from N] [--to N] [--grep PATTERN] [--regex] <file>...";

#[derive(Debug, PartialEq)]
struct Args {
    from: u64,
    to: u64,
    grep: Option<String>,
    regex: bool,
    files: Vec<PathBuf>,
}

impl Args {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self> {
        let mut parsed = Args {
            from: 0,
            to: u64::MAX,
            grep: None,
            regex: false,
            files: Vec::new(),
        };
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--from" => parsed.from = position_arg(&arg, args.next())?,
                "--to" => parsed.to = position_arg(&arg, args.next())?,
                "--grep" => parsed.grep = Some(args.next().context("--grep needs a pattern")?),
                "--regex" => parsed.regex = true,
                flag if flag.starts_with("--") => bail!("unknown option {flag}"),
                _ => parsed.files.push(PathBuf::from(arg)),
            }
        }
        if parsed.files.is_empty() {
            bail!("no input files");
        }
        if parsed.from > parsed.to {
            bail!("--from {} is past --to {}", parsed.from, parsed.to);
        }
        Ok(parsed)
    }
}

fn position_arg(flag: &str, value: Option<String>) -> Result<u64> {
    let value = value.with_context(|| format!("{flag} needs a byte offset"))?;
    value
        .parse()
        .with_context(|| format!("{flag}: {value:?} is not a byte offset"))
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = match Args::parse(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}");
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    };

    let config = Config::load()?;
    init_tracing(&config);

    let filter = args
        .grep
        .map(|pattern| ActiveFilter::new(pattern, args.regex))
        .transpose()?;
    if let Some(filter) = &filter {
        debug!(pattern = %filter.pattern, regex = filter.is_regex(), "filtering output");
    }

    let mut names = Vec::with_capacity(args.files.len());
    let mut collections = Vec::with_capacity(args.files.len());
    for path in args.files {
        let source = FileSource::from_config(path, &config);
        let mut collection = RangesManagingCollection::with_priority(config.active_priority);
        collection.set_active_range(args.from, args.to)?;
        let stats = fill_collection(&mut collection, &source, config.ignore_message_time_for_hash).await?;
        info!(source = %source.name(), ?stats, messages = collection.count(), "loaded");
        names.push(source.name());
        collections.push(collection);
    }

    let merged = SimpleMergingCollection::new(
        collections
            .iter()
            .map(|c| c as &dyn MessagesCollection)
            .collect(),
    );

    let mut out = BufWriter::new(io::stdout().lock());
    for entry in merged.forward_entries(0, merged.count()) {
        let message = entry.message.message;
        if filter.as_ref().is_some_and(|f| !f.matches(message)) {
            continue;
        }
        if let Err(e) = writeln!(out, "{}\t{}", names[entry.source], message.text) {
            if e.kind() == io::ErrorKind::BrokenPipe {
                return Ok(());
            }
            return Err(e.into());
        }
    }
    out.flush().or_else(|e| match e.kind() {
        io::ErrorKind::BrokenPipe => Ok(()),
        _ => Err(e),
    })?;
    Ok(())
}
