//! The test tool for checking the use of one dataset by several
//! processes: writers append blocks of records whose counter field grows
//! by one per record, readers check that every window they observe is
//! consecutive. Broken counters mean a torn commit.

use std::io::Write;
use std::sync::Once;
use std::time::Duration;

use log::{error, info};
use rand::Rng;
use structopt::StructOpt;

use ouroboros_db::{CounterRecord, DbError, DbResult, ErrorKind, Index2, TreeDataset};

const RET_OK: i32 = 0;
const RET_ERROR: i32 = 1;
const RET_FAIL: i32 = 2;
const RET_LOCK_RD: i32 = 3;
const RET_LOCK_WR: i32 = 4;
const RET_LOCK_CR: i32 = 5;

static INIT: Once = Once::new();

fn init_log() {
    INIT.call_once(|| {
        let mut builder = env_logger::Builder::from_default_env();
        builder
            .format(|buf, record| {
                writeln!(
                    buf,
                    "[{} - {}] [{}:{}] {}",
                    record.level(),
                    record.target(),
                    record.file().unwrap_or("?"),
                    record.line().unwrap_or(0),
                    record.args()
                )
            })
            .init();
    });
}

#[derive(StructOpt)]
#[structopt(
    name = "worker_transaction",
    about = "concurrent counter-law checker over one dataset"
)]
struct Opt {
    /// The name of the dataset.
    #[structopt(short = "n", long = "name", default_value = "worker")]
    name: String,

    /// The count of tables in the dataset.
    #[structopt(short = "t", long = "tables", default_value = "4")]
    tbl_count: u32,

    /// The count of records in a table.
    #[structopt(short = "r", long = "records", default_value = "1000")]
    rec_count: u32,

    /// How many read/write iterations to run.
    #[structopt(short = "i", long = "iterations", default_value = "100")]
    iterations: u32,

    /// The key of the table to work on.
    #[structopt(short = "k", long = "key", default_value = "0")]
    key: u64,

    /// Write blocks of records instead of reading.
    #[structopt(short = "w", long = "writer")]
    writer: bool,

    /// Wrap every block in a dataset transaction.
    #[structopt(short = "s", long = "transaction")]
    transaction: bool,

    /// Verify the tree structure on every iteration.
    #[structopt(short = "f", long = "full")]
    full: bool,

    /// Randomly cancel some write blocks to exercise rollback.
    #[structopt(short = "e", long = "errors")]
    inject: bool,

    /// Pause between iterations, in milliseconds.
    #[structopt(short = "p", long = "pause", default_value = "0")]
    pause: u64,
}

type Dataset = TreeDataset<CounterRecord, Index2>;

fn lock_exit(e: &DbError, code: i32) -> i32 {
    if e.kind() == ErrorKind::Lock {
        code
    } else {
        e.show_backtrace();
        RET_ERROR
    }
}

fn open_dataset(opt: &Opt) -> Result<Dataset, i32> {
    let dataset = Dataset::open_or_create(&opt.name, opt.tbl_count, opt.rec_count, 1)
        .map_err(|e| {
            error!("open failed: {}", e);
            lock_exit(&e, RET_LOCK_CR)
        })?;
    if !dataset.table_exists(opt.key) {
        match dataset.add_table(opt.key) {
            Ok(_) => {}
            // another worker may have added it in between
            Err(ref e) if dataset.table_exists(opt.key) => {
                info!("table {} appeared concurrently: {}", opt.key, e)
            }
            Err(e) => {
                error!("add_table failed: {}", e);
                return Err(lock_exit(&e, RET_LOCK_CR));
            }
        }
    }
    Ok(dataset)
}

fn write_block(dataset: &Dataset, opt: &Opt, rng: &mut impl Rng) -> DbResult<bool> {
    let transaction = if opt.transaction {
        Some(dataset.transaction()?)
    } else {
        None
    };

    let session = dataset.session_wr(opt.key)?;
    let next = {
        let table = session.get();
        match table.read_back()? {
            Some(last) => last.field2 + 1,
            None => 0,
        }
    };

    let block = rng.gen_range(1, 9);
    {
        let mut table = session.get_mut();
        for at in 0..block {
            let record = CounterRecord::new(
                rng.gen_range(0, 1000),
                next + at,
                at as f32,
                block,
            );
            table.add(&record)?;
        }
        if opt.full {
            table.verify()?;
        }
    }

    let cancel = opt.inject && rng.gen_range(0, 10) == 0;
    if cancel {
        session.cancel()?;
        if let Some(transaction) = transaction {
            transaction.cancel()?;
        }
    } else {
        session.stop()?;
        if let Some(transaction) = transaction {
            transaction.stop()?;
        }
    }
    Ok(cancel)
}

fn read_block(dataset: &Dataset, opt: &Opt) -> DbResult<bool> {
    let session = dataset.session_rd(opt.key)?;
    let table = session.get();
    let count = table.count();
    if count == 0 {
        return Ok(true);
    }
    let records = table.read_list(table.beg_pos(), count)?;
    drop(table);
    if opt.full {
        session.get_mut().verify()?;
    }
    session.stop()?;

    // the counter field of each record is one greater than the previous
    for pair in records.windows(2) {
        if pair[1].field2 != pair[0].field2 + 1 {
            error!(
                "counter law broken: {} follows {}",
                pair[1].field2, pair[0].field2
            );
            return Ok(false);
        }
    }
    Ok(true)
}

fn run(opt: &Opt) -> i32 {
    let dataset = match open_dataset(opt) {
        Ok(dataset) => dataset,
        Err(code) => return code,
    };
    let mut rng = rand::thread_rng();
    let mut canceled = 0;

    for iteration in 0..opt.iterations {
        if opt.writer {
            match write_block(&dataset, opt, &mut rng) {
                Ok(true) => canceled += 1,
                Ok(false) => {}
                Err(e) => {
                    error!("iteration {}: {}", iteration, e);
                    return lock_exit(&e, RET_LOCK_WR);
                }
            }
        } else {
            match read_block(&dataset, opt) {
                Ok(true) => {}
                Ok(false) => return RET_FAIL,
                Err(e) => {
                    error!("iteration {}: {}", iteration, e);
                    return lock_exit(&e, RET_LOCK_RD);
                }
            }
        }
        if opt.pause > 0 {
            std::thread::sleep(Duration::from_millis(opt.pause));
        }
    }

    info!(
        "{} finished {} iterations ({} canceled)",
        if opt.writer { "writer" } else { "reader" },
        opt.iterations,
        canceled
    );
    RET_OK
}

fn main() {
    init_log();
    let opt = Opt::from_args();
    std::process::exit(run(&opt));
}
