//! pagerdb - inspect and modify a slotted page file from the command line

use anyhow::{Context, Result};
use clap::{Parser as ClapParser, Subcommand};
use log::info;
use pagerdb::access::RecordHeap;
use pagerdb::storage::{
    BufferPoolConfig, BufferPoolManager, PageId, PageManager, RecordId, ReplacerKind,
};
use rand::Rng;
use std::path::PathBuf;

/// pagerdb - a slotted page store with a buffer pool
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Page file to operate on
    #[arg(short = 'D', long, default_value = "./pagerdb.db")]
    db: PathBuf,

    /// Number of buffer pool frames
    #[arg(short, long, default_value = "64")]
    pool_size: usize,

    /// Replacement policy (lru or clock)
    #[arg(short, long, default_value = "lru")]
    replacer: ReplacerKind,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Append a record
    Insert { data: String },
    /// Print a record
    Get { page: u32, slot: u16 },
    /// Delete a record
    Delete { page: u32, slot: u16 },
    /// Reset a page to empty and mark it reusable
    DropPage { page: u32 },
    /// Print every page header and its records
    Dump,
    /// Append random records
    Fill {
        #[arg(short, long, default_value = "100")]
        count: usize,
        #[arg(long, default_value = "8")]
        min_size: usize,
        #[arg(long, default_value = "256")]
        max_size: usize,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let page_manager = PageManager::open_or_create(&args.db)
        .with_context(|| format!("Failed to open page file {}", args.db.display()))?;
    info!(
        "Opened {} ({} pages, {} free)",
        args.db.display(),
        page_manager.page_count(),
        page_manager.free_page_count()
    );

    let config = BufferPoolConfig::new(args.pool_size).with_replacer(args.replacer);
    let pool = BufferPoolManager::from_config(page_manager, &config)
        .context("Invalid buffer pool configuration")?;

    run(&pool, args.command)?;

    pool.flush_all().context("Failed to flush buffer pool")?;
    Ok(())
}

fn run(pool: &BufferPoolManager, command: Command) -> Result<()> {
    match command {
        Command::Insert { data } => {
            let mut heap = open_heap(pool);
            let rid = heap.insert(data.as_bytes())?;
            println!("inserted {}", rid);
        }
        Command::Get { page, slot } => {
            let heap = open_heap(pool);
            let rid = RecordId::new(PageId(page), slot);
            match heap.get(rid)? {
                Some(data) => println!("{}", String::from_utf8_lossy(&data)),
                None => println!("record {} not found", rid),
            }
        }
        Command::Delete { page, slot } => {
            let mut heap = open_heap(pool);
            let rid = RecordId::new(PageId(page), slot);
            heap.delete(rid)?;
            println!("deleted {}", rid);
        }
        Command::DropPage { page } => {
            pool.delete_page(PageId(page))?;
            println!("dropped page {}", page);
        }
        Command::Dump => dump(pool)?,
        Command::Fill {
            count,
            min_size,
            max_size,
        } => {
            anyhow::ensure!(min_size <= max_size, "--min-size must not exceed --max-size");
            let mut heap = open_heap(pool);
            let mut rng = rand::thread_rng();
            for _ in 0..count {
                let len = rng.gen_range(min_size..=max_size);
                let record: Vec<u8> = (0..len).map(|_| rng.gen_range(b'a'..=b'z')).collect();
                heap.insert(&record)?;
            }
            println!("inserted {} records over {} pages", count, heap.page_ids().len());
        }
    }
    Ok(())
}

/// Every page in the file that still holds a record belongs to the heap.
fn open_heap(pool: &BufferPoolManager) -> RecordHeap {
    let pages: Vec<PageId> = pool.with_page_manager(|pm| {
        (0..pm.page_count() as u32)
            .map(PageId)
            .filter(|&page_id| pm.header(page_id).is_some_and(|h| !h.is_free()))
            .collect()
    });
    RecordHeap::with_pages(pool.clone(), pages)
}

fn dump(pool: &BufferPoolManager) -> Result<()> {
    let page_count = pool.with_page_manager(|pm| pm.page_count());
    for page_id in (0..page_count as u32).map(PageId) {
        let guard = pool.fetch_guarded(page_id)?;
        let page = guard.read();
        println!("{}", page);
        for rid in page.record_ids() {
            let data = page.get_record(rid)?;
            println!("  {} {}", rid, String::from_utf8_lossy(&data));
        }
    }
    Ok(())
}
