use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::log_level::LogLevel;
use crate::record::Record;
use crate::scanner::ScanOptions;
use crate::store::CountStore;
use crate::tree::PathTree;

mod export;
mod log_level;
mod record;
mod scanner;
mod store;
mod tree;
mod ui;

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

#[derive(clap::Parser, Debug)]
#[command(
    version,
    about = "Count @todo markers in a source tree and browse the counts per directory.",
    long_about = "Count @todo markers in a source tree and browse the counts per directory. \
                  Each directory shows the total of everything beneath it."
)]
#[command(flatten_help = true)]
pub struct Args {
    /// Source directory to scan. Without it, counts are loaded from --store.
    #[arg()]
    path: Option<PathBuf>,

    /// SQLite file holding the counts. Written after a scan, read otherwise.
    #[arg(long)]
    store: Option<PathBuf>,

    /// Text that marks a line as one @todo.
    #[arg(long, default_value = "* @todo")]
    marker: String,

    /// File extension to scan. Can be repeated.
    #[arg(long = "extension", default_value = "cpp")]
    extensions: Vec<String>,

    /// Path separator used in stored and scanned paths.
    #[arg(long, default_value_t = '/')]
    separator: char,

    /// Sort files and directories by name instead of discovery order.
    #[arg(long)]
    sort: bool,

    /// Report and skip records that conflict with the tree instead of failing.
    #[arg(long)]
    skip_conflicts: bool,

    #[arg(long)]
    dump_json: bool,

    #[arg(long)]
    no_serve: bool,

    /// Address the web page is served on.
    #[arg(long, default_value = "127.0.0.1:3000")]
    addr: String,

    #[arg(long, short, default_value = "info", value_enum)]
    log_level: LogLevel,
}

fn main() -> Result<()> {
    let args = <Args as clap::Parser>::parse();
    setup_tracing(&args.log_level);
    debug!("Parsed CLI arguments: {args:?}");

    let records = collect_records(&args)?;
    let tree = build_tree(&records, args.separator, args.skip_conflicts)?;
    if tree.is_empty() {
        warn!("No @todo found");
    } else {
        info!("{} @todo in {} files", tree.total(), tree.len());
    }

    if args.dump_json {
        let export = tree.to_export_tree();
        let export = if args.sort { export.sorted() } else { export };
        println!("{}", serde_json::to_string_pretty(&export)?);
    }

    if !args.no_serve {
        // Serve the UI (localhost web page).
        ui::serve(
            tree,
            &ui::UiConfig {
                addr: args.addr,
                sort: args.sort,
            },
        )?;
    }

    Ok(())
}

fn setup_tracing(level: &LogLevel) {
    if let Some(level) = level.to_tracing_level() {
        tracing_subscriber::fmt()
            .with_max_level(level)
            .without_time()
            .compact()
            .init();
    }
}

/// Scans the source directory when one is given, saving the result to the
/// store if there is one. Otherwise reads the last saved scan.
fn collect_records(args: &Args) -> Result<Vec<Record>> {
    match (&args.path, &args.store) {
        (Some(path), store) => {
            info!("Scanning {path:?}, please wait");
            let options = ScanOptions {
                marker: args.marker.clone(),
                extensions: args.extensions.clone(),
                separator: args.separator,
            };
            let records = scanner::scan(path, &options)?;
            if let Some(store) = store {
                CountStore::open(store)?.save(&records)?;
                info!("Saved {} records to {store:?}", records.len());
            }
            Ok(records)
        }
        (None, Some(store)) => Ok(CountStore::open(store)?.load()?),
        (None, None) => {
            Err("nothing to do: pass a source directory, --store, or both".into())
        }
    }
}

fn build_tree(records: &[Record], separator: char, skip_conflicts: bool) -> Result<PathTree> {
    let mut tree = PathTree::new(separator);
    if skip_conflicts {
        for (record, err) in tree.insert_all_skipping_conflicts(records) {
            warn!("Skipping {:?} ({}): {err}", record.path, record.count);
        }
    } else {
        tree.insert_all(records)?;
    }
    Ok(tree)
}
