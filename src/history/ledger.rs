use anyhow::{anyhow, Context, Result};
use arrow::{
    array::{Array, ArrayRef},
    datatypes::Schema as ArrowSchema,
    record_batch::RecordBatch,
};
use chrono::{NaiveDate, Utc};
use glob::glob;
use parquet::{
    arrow::{arrow_reader::ParquetRecordBatchReaderBuilder, ArrowWriter},
    basic::Compression,
    file::properties::WriterProperties,
};
use std::{
    fs::{self, File},
    io::BufWriter,
    marker::PhantomData,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::debug;

const CONSOLIDATED: &str = "consolidated.parquet";

/// A row type stored in a [`Ledger`].
pub trait LedgerRow: Sized {
    /// Hive partition the row is filed under.
    fn partition_date(&self) -> NaiveDate;
    fn schema() -> ArrowSchema;
    /// One-row column arrays matching `schema()`.
    fn to_arrays(&self) -> Vec<ArrayRef>;
    /// File-name stem; unique per row.
    fn unique_key(&self) -> String;
    /// Decode every row of a batch written with `schema()`.
    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>>;
}

/// Downcast the named column, failing on a missing column or wrong type.
pub fn column<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .ok_or_else(|| anyhow!("ledger batch has no `{}` column", name))?
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| anyhow!("ledger column `{}` has an unexpected type", name))
}

/// Append-only Parquet table, hive-partitioned as `<table>/date=YYYYMMDD/`.
pub struct Ledger<R: LedgerRow> {
    table_dir: PathBuf,
    schema: Arc<ArrowSchema>,
    _marker: PhantomData<R>,
}

impl<R: LedgerRow> Ledger<R> {
    pub fn open(base_dir: &Path, table: &str) -> Result<Self> {
        let table_dir = base_dir.join(table);
        fs::create_dir_all(&table_dir)
            .with_context(|| format!("could not create `{}`", table_dir.display()))?;
        Ok(Self {
            table_dir,
            schema: Arc::new(R::schema()),
            _marker: PhantomData,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.table_dir
    }

    fn props() -> WriterProperties {
        WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build()
    }

    /// Write `row` as its own file: temp name first, then rename.
    pub fn append(&self, row: &R) -> Result<PathBuf> {
        let partition = format!("date={}", row.partition_date().format("%Y%m%d"));
        let dir = self.table_dir.join(partition);
        fs::create_dir_all(&dir)?;

        let fname = format!("{}---{}.parquet", row.unique_key(), Utc::now().timestamp_micros());
        let tmp = dir.join(format!("{}.tmp", fname));
        let final_path = dir.join(&fname);

        let batch = RecordBatch::try_new(self.schema.clone(), row.to_arrays())
            .context("building ledger record batch")?;
        let file = File::create(&tmp)
            .with_context(|| format!("creating `{}`", tmp.display()))?;
        let mut writer =
            ArrowWriter::try_new(BufWriter::new(file), self.schema.clone(), Some(Self::props()))?;
        writer.write(&batch)?;
        writer.close()?;
        fs::rename(&tmp, &final_path)?;
        debug!(path = %final_path.display(), "ledger row written");
        Ok(final_path)
    }

    fn files(&self, partition_glob: &str) -> Result<Vec<PathBuf>> {
        let pattern = format!("{}/{}/*.parquet", self.table_dir.display(), partition_glob);
        let mut files: Vec<PathBuf> = glob(&pattern)?.filter_map(Result::ok).collect();
        files.sort();
        Ok(files)
    }

    fn read_file(path: &Path) -> Result<Vec<R>> {
        let file =
            File::open(path).with_context(|| format!("failed to open `{}`", path.display()))?;
        let mut reader = ParquetRecordBatchReaderBuilder::try_new(file)?
            .with_batch_size(1024)
            .build()?;
        let mut rows = Vec::new();
        while let Some(batch) = reader.next().transpose()? {
            rows.extend(R::from_batch(&batch)?);
        }
        Ok(rows)
    }

    /// Every row in every partition.
    pub fn load_all(&self) -> Result<Vec<R>> {
        let mut rows = Vec::new();
        for path in self.files("date=*")? {
            rows.extend(
                Self::read_file(&path)
                    .with_context(|| format!("reading ledger file `{}`", path.display()))?,
            );
        }
        Ok(rows)
    }

    /// Fold each partition's files into one `consolidated.parquet`.
    /// Returns the number of files removed.
    pub fn vacuum(&self) -> Result<usize> {
        let mut removed = 0;
        for part in fs::read_dir(&self.table_dir)? {
            let part = part?;
            if !part.file_type()?.is_dir() {
                continue;
            }
            let dir = part.path();
            let files = glob(&format!("{}/*.parquet", dir.display()))?
                .filter_map(Result::ok)
                .collect::<Vec<_>>();
            if files.len() < 2 {
                continue;
            }

            let tmp = dir.join(format!("{}.tmp", CONSOLIDATED));
            let file = File::create(&tmp)?;
            let mut writer = ArrowWriter::try_new(
                BufWriter::new(file),
                self.schema.clone(),
                Some(Self::props()),
            )?;
            for p in &files {
                let f = File::open(p)?;
                let mut reader = ParquetRecordBatchReaderBuilder::try_new(f)?
                    .with_batch_size(1024)
                    .build()?;
                while let Some(batch) = reader.next().transpose()? {
                    writer.write(&batch)?;
                }
            }
            writer.close()?;
            fs::rename(&tmp, dir.join(CONSOLIDATED))?;

            for p in files {
                if p.file_name().and_then(|n| n.to_str()) != Some(CONSOLIDATED) {
                    fs::remove_file(&p)?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}
