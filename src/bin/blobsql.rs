//! blobsql
//!
//! Driver for single-blob SQLite databases. `populate` fills a blob with
//! the synthetic segment table and times the reference queries, `export`
//! copies the database out through the backup API, `inspect` prints the
//! on-blob header and layout and `init` writes an empty blob over whatever
//! the medium held.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use rusqlite::{params, Connection, DatabaseName};
use sbvfs::layout::{self, Layout, BLOB_SIZE, SIZE_WORD_LEN, TRAILER_LEN};
use sbvfs::{blob, device, open_connection, register, BlockDevice, FileDevice, VfsConfig};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "blobsql")]
#[command(about = "Run SQLite inside a single fixed-size blob")]
struct Args {
    /// VFS config file (TOML); defaults to name = "HB_SQL"
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create segTable, insert rows and time the reference queries
    Populate {
        /// Blob file or raw volume (e.g. \\.\H:)
        blob: PathBuf,

        /// Rows to insert
        #[arg(short = 'n', long, default_value = "20000")]
        rows: u32,

        /// Rows per transaction
        #[arg(short = 'b', long, default_value = "1000")]
        batch: u32,
    },
    /// Copy the database out of a blob into an ordinary SQLite file
    Export {
        /// Blob file or raw volume
        blob: PathBuf,

        /// Destination database file
        dest: PathBuf,
    },
    /// Zero the header and journal blocks so the medium opens as an empty blob
    Init {
        /// Blob file or raw volume
        blob: PathBuf,

        /// Required: existing data on the medium becomes unreachable
        #[arg(long)]
        force: bool,
    },
    /// Print the header, trailer and recovered layout of a blob
    Inspect {
        /// Blob file
        blob: PathBuf,

        #[arg(short = 'f', long, value_enum, default_value = "text")]
        format: Format,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Text,
    Json,
}

const CREATE_SEG_TABLE: &str = "CREATE TABLE IF NOT EXISTS segTable(devNo int1, partion int1, \
     fileNo int2, channel int1, storeType int, startTime int, stopTime int, dataSize int, \
     idxAmount int, idxIAmount int, segPos int, segAttr int1, packSerial int1)";

const INSERT_SEG: &str = "INSERT INTO segTable VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?)";

const REFERENCE_QUERIES: [&str; 4] = [
    "SELECT * FROM segTable",
    "SELECT * FROM segTable WHERE channel == 11",
    "SELECT * FROM segTable WHERE channel == 11 AND idxAmount >= 50",
    "SELECT fileNo, channel, startTime, stopTime, dataSize FROM segTable WHERE channel < 16",
];

/// One synthetic recording segment
struct Segment {
    dev_no: i64,
    partion: i64,
    file_no: i64,
    channel: i64,
    store_type: i64,
    start_time: i64,
    stop_time: i64,
    data_size: i64,
    idx_amount: i64,
    idx_i_amount: i64,
    seg_pos: i64,
    seg_attr: i64,
    pack_serial: i64,
}

impl Segment {
    /// Row `i`; `seg_pos` is the running total of data sizes before it
    fn generate(i: i64, seg_pos: i64) -> Self {
        let start_time = 0x112233 + i * 100;
        let data_size = 1024 * 1024 + (i % 100) * 197 + i;
        let idx_amount = (i % 7) * 13 + i % 19;
        Segment {
            dev_no: i % 2,
            partion: i / 1024 % 2,
            file_no: i / 32 % 1024,
            channel: i % 32,
            store_type: i & 0xf,
            start_time,
            stop_time: start_time + 99,
            data_size,
            idx_amount,
            idx_i_amount: idx_amount / 25,
            seg_pos: seg_pos + data_size,
            seg_attr: i * 7 % 2,
            pack_serial: i * 17 % 2,
        }
    }
}

fn populate(conn: &mut Connection, rows: u32, batch: u32) -> anyhow::Result<()> {
    let started = Instant::now();
    conn.execute_batch(CREATE_SEG_TABLE)
        .context("creating segTable")?;
    info!(elapsed_ms = started.elapsed().as_millis() as u64, "segTable ready");

    let started = Instant::now();
    let mut seg_pos = 0i64;
    let mut inserted = 0u32;
    while inserted < rows {
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(INSERT_SEG)?;
            for i in inserted..rows.min(inserted + batch.max(1)) {
                let seg = Segment::generate(i64::from(i), seg_pos);
                seg_pos = seg.seg_pos;
                stmt.execute(params![
                    seg.dev_no,
                    seg.partion,
                    seg.file_no,
                    seg.channel,
                    seg.store_type,
                    seg.start_time,
                    seg.stop_time,
                    seg.data_size,
                    seg.idx_amount,
                    seg.idx_i_amount,
                    seg.seg_pos,
                    seg.seg_attr,
                    seg.pack_serial,
                ])
                .with_context(|| format!("inserting row {}", i))?;
            }
        }
        tx.commit()?;
        inserted = rows.min(inserted + batch.max(1));
    }
    info!(rows, elapsed_ms = started.elapsed().as_millis() as u64, "rows inserted");

    for sql in REFERENCE_QUERIES {
        let started = Instant::now();
        let mut stmt = conn.prepare(sql)?;
        let mut result = stmt.query([])?;
        let mut count = 0u64;
        while result.next()?.is_some() {
            count += 1;
        }
        info!(sql, count, elapsed_ms = started.elapsed().as_millis() as u64, "query done");
    }

    Ok(())
}

#[derive(Serialize)]
struct Inspection {
    device: String,
    sector_size: u32,
    sector_count: u64,
    header: String,
    trailer: String,
    journal_present: bool,
    layout: Layout,
    free_gap: u64,
    max_database_len: u64,
}

fn inspect(path: &Path) -> anyhow::Result<Inspection> {
    let name = path.to_str().context("blob path is not valid UTF-8")?;
    if !path.exists() {
        bail!("{} does not exist", name);
    }

    let mut device = FileDevice::open(name)?;
    let len = device.len();
    if len < 2 * layout::BLOCK {
        bail!("{} is {} bytes, too small to hold a blob", name, len);
    }
    let blob_len = len.min(BLOB_SIZE);
    let mut header = [0u8; SIZE_WORD_LEN];
    device.read_at(&mut header, 0)?;
    let mut trailer = [0u8; TRAILER_LEN];
    device.read_at(&mut trailer, layout::trailer_offset(blob_len))?;

    let recovered = Layout::recover(blob_len, header, trailer)?;
    let inspection = Inspection {
        device: name.to_string(),
        sector_size: device.sector_size(),
        sector_count: device.sector_count(),
        header: hex(&header),
        trailer: hex(&trailer),
        journal_present: layout::trailer_marks_journal(trailer),
        layout: recovered,
        free_gap: recovered.free_gap(),
        max_database_len: layout::max_database_len(blob_len),
    };
    Box::new(device).close()?;
    Ok(inspection)
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => VfsConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => VfsConfig::default(),
    };

    match args.command {
        Command::Populate { blob, rows, batch } => {
            register(&config)?;
            info!(vfs = %config.name, blob = %blob.display(), "opening blob");

            let started = Instant::now();
            let mut conn = open_connection(&blob, &config.name)?;
            populate(&mut conn, rows, batch)?;
            drop(conn);
            info!(elapsed_ms = started.elapsed().as_millis() as u64, "populate finished");
        }
        Command::Export { blob, dest } => {
            register(&config)?;
            let started = Instant::now();
            let conn = open_connection(&blob, &config.name)?;
            conn.backup(DatabaseName::Main, &dest, None)
                .with_context(|| format!("exporting to {}", dest.display()))?;
            info!(
                dest = %dest.display(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "export finished"
            );
        }
        Command::Init { blob, force } => {
            if !force {
                bail!("init discards the contents of {}; pass --force", blob.display());
            }
            let name = blob.to_str().context("blob path is not valid UTF-8")?;
            let mut medium = device::open(name)?;
            let layout = blob::initialize(name, medium.as_mut())?;
            medium.close()?;
            info!(blob = name, blob_len = layout.blob_len, "empty blob written");
        }
        Command::Inspect { blob, format } => {
            let inspection = inspect(&blob)?;
            match format {
                Format::Json => println!("{}", serde_json::to_string_pretty(&inspection)?),
                Format::Text => {
                    println!("device:        {}", inspection.device);
                    println!(
                        "geometry:      {} sectors of {} bytes",
                        inspection.sector_count, inspection.sector_size
                    );
                    println!("header:        {}", inspection.header);
                    println!("trailer:       {}", inspection.trailer);
                    println!("blob size:     {}", inspection.layout.blob_len);
                    println!("database size: {}", inspection.layout.database_len);
                    println!(
                        "journal:       {}",
                        if inspection.journal_present { "present" } else { "none" }
                    );
                    println!("free gap:      {}", inspection.free_gap);
                    println!("database cap:  {}", inspection.max_database_len);
                }
            }
        }
    }

    Ok(())
}
