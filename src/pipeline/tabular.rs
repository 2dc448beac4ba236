//! Uniform row access over the tabular formats an upload may arrive in.
//!
//! CSV/TSV are streamed record by record from the underlying reader. XLSX is
//! streamed cell by cell with calamine's worksheet cell reader on a dedicated
//! thread, handing rows over a bounded channel so at most `SHEET_ROW_BUFFER`
//! decoded rows are held at once. XLS and ODS have no streaming reader in
//! calamine and are decoded a worksheet at a time.

use calamine::{open_workbook_from_rs, Data, DataRef, Ods, Range, Reader, Xls, Xlsx};
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::thread;

use crate::errors::{DataSetError, DataSetResult};

/// Decoded spreadsheet rows buffered ahead of the consumer
const SHEET_ROW_BUFFER: usize = 256;

/// Tabular formats accepted for upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Tsv,
    Xlsx,
    Xls,
    Ods,
}

impl FileFormat {
    pub fn from_extension(filename: &str) -> Option<Self> {
        let extension = Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())?
            .to_lowercase();
        match extension.as_str() {
            "csv" => Some(FileFormat::Csv),
            "tsv" | "tab" => Some(FileFormat::Tsv),
            "xlsx" | "xlsm" => Some(FileFormat::Xlsx),
            "xls" => Some(FileFormat::Xls),
            "ods" => Some(FileFormat::Ods),
            _ => None,
        }
    }

    pub fn is_spreadsheet(&self) -> bool {
        matches!(self, FileFormat::Xlsx | FileFormat::Xls | FileFormat::Ods)
    }

    fn delimiter(&self) -> u8 {
        match self {
            FileFormat::Tsv => b'\t',
            _ => b',',
        }
    }
}

impl AsRef<str> for FileFormat {
    fn as_ref(&self) -> &str {
        match self {
            FileFormat::Csv => "csv",
            FileFormat::Tsv => "tsv",
            FileFormat::Xlsx => "xlsx",
            FileFormat::Xls => "xls",
            FileFormat::Ods => "ods",
        }
    }
}

#[derive(Debug, Clone)]
enum Source {
    Path(PathBuf),
    Bytes(Arc<[u8]>),
}

/// An uploaded tabular file: where its bytes are and how to read them
#[derive(Debug, Clone)]
pub struct TabularFile {
    filename: String,
    format: FileFormat,
    source: Source,
}

impl TabularFile {
    /// Reference a file on disk; the format comes from its extension
    pub fn from_path(path: impl Into<PathBuf>) -> DataSetResult<Self> {
        let path = path.into();
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
            .to_string();
        let format = FileFormat::from_extension(&filename)
            .ok_or_else(|| DataSetError::UnsupportedFormat(filename.clone()))?;
        Ok(Self {
            filename,
            format,
            source: Source::Path(path),
        })
    }

    /// Wrap an in-memory upload; the format comes from `filename`'s extension
    pub fn from_bytes(filename: impl Into<String>, data: Vec<u8>) -> DataSetResult<Self> {
        let filename = filename.into();
        let format = FileFormat::from_extension(&filename)
            .ok_or_else(|| DataSetError::UnsupportedFormat(filename.clone()))?;
        Ok(Self {
            filename,
            format,
            source: Source::Bytes(Arc::from(data)),
        })
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    /// Open a fresh row reader positioned at the first row (the header row)
    pub fn rows(&self) -> DataSetResult<RowReader> {
        match (self.format, &self.source) {
            (FileFormat::Xlsx, Source::Path(path)) => stream_xlsx(BufReader::new(File::open(path)?)),
            (FileFormat::Xlsx, Source::Bytes(data)) => stream_xlsx(Cursor::new(Arc::clone(data))),
            (FileFormat::Xls | FileFormat::Ods, _) => Ok(RowReader::Sheet {
                range: self.first_sheet()?,
                next_row: 0,
            }),
            (FileFormat::Csv | FileFormat::Tsv, _) => self.delimited_rows(),
        }
    }

    fn delimited_rows(&self) -> DataSetResult<RowReader> {
        let reader: Box<dyn Read + Send> = match &self.source {
            Source::Path(path) => Box::new(BufReader::new(File::open(path)?)),
            Source::Bytes(data) => Box::new(Cursor::new(Arc::clone(data))),
        };
        let records = csv::ReaderBuilder::new()
            .delimiter(self.format.delimiter())
            .has_headers(false)
            .flexible(true)
            .from_reader(reader)
            .into_records();
        Ok(RowReader::Delimited {
            records,
            line: 0,
        })
    }

    fn first_sheet(&self) -> DataSetResult<Range<Data>> {
        match &self.source {
            Source::Path(path) => {
                let file = BufReader::new(File::open(path)?);
                self.open_sheet(file)
            }
            Source::Bytes(data) => self.open_sheet(Cursor::new(&data[..])),
        }
    }

    fn open_sheet<RS: Read + Seek>(&self, reader: RS) -> DataSetResult<Range<Data>> {
        match self.format {
            FileFormat::Xls => first_sheet_of::<RS, Xls<RS>>(open_workbook_from_rs(reader)),
            FileFormat::Ods => first_sheet_of::<RS, Ods<RS>>(open_workbook_from_rs(reader)),
            FileFormat::Xlsx | FileFormat::Csv | FileFormat::Tsv => Err(
                DataSetError::UnreadableFile(format!("{} is not read as a whole sheet", self.filename)),
            ),
        }
    }
}

fn first_sheet_of<RS, R>(workbook: Result<R, R::Error>) -> DataSetResult<Range<Data>>
where
    RS: Read + Seek,
    R: Reader<RS>,
    R::Error: std::fmt::Display,
{
    let mut workbook = workbook.map_err(unreadable_workbook)?;
    let sheet_name = first_sheet_name::<RS, R>(&workbook)?;
    workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| unreadable_sheet(&sheet_name, e))
}

fn first_sheet_name<RS: Read + Seek, R: Reader<RS>>(workbook: &R) -> DataSetResult<String> {
    workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| DataSetError::EmptyFile("workbook has no sheets".to_string()))
}

fn unreadable_workbook(e: impl std::fmt::Display) -> DataSetError {
    DataSetError::UnreadableFile(format!("Failed to open workbook: {}", e))
}

fn unreadable_sheet(sheet_name: &str, e: impl std::fmt::Display) -> DataSetError {
    DataSetError::UnreadableFile(format!("Failed to read sheet '{}': {}", sheet_name, e))
}

/// Start a thread that walks the first worksheet of an XLSX workbook cell by
/// cell. Returns once the sheet is open, so a broken workbook fails here
/// rather than on the first row.
fn stream_xlsx<RS>(reader: RS) -> DataSetResult<RowReader>
where
    RS: Read + Seek + Send + 'static,
{
    let (ready_tx, ready_rx) = sync_channel(1);
    let (row_tx, row_rx) = sync_channel(SHEET_ROW_BUFFER);
    thread::Builder::new()
        .name("xlsx-rows".to_string())
        .spawn(move || read_xlsx_rows(reader, ready_tx, row_tx))?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(RowReader::XlsxCells { rows: row_rx }),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(DataSetError::UnreadableFile(
            "spreadsheet reader stopped before the sheet was opened".to_string(),
        )),
    }
}

fn read_xlsx_rows<RS: Read + Seek>(
    reader: RS,
    ready: SyncSender<DataSetResult<()>>,
    rows: SyncSender<Result<SourceRow, UnreadableRow>>,
) {
    let mut workbook: Xlsx<RS> = match open_workbook_from_rs(reader) {
        Ok(workbook) => workbook,
        Err(e) => {
            let _ = ready.send(Err(unreadable_workbook(e)));
            return;
        }
    };
    let sheet_name = match first_sheet_name::<RS, Xlsx<RS>>(&workbook) {
        Ok(name) => name,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let mut cells = match workbook.worksheet_cells_reader(&sheet_name) {
        Ok(cells) => cells,
        Err(e) => {
            let _ = ready.send(Err(unreadable_sheet(&sheet_name, e)));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        return;
    }

    // A failed send means the consumer dropped its reader
    let mut assembler = RowAssembler::default();
    loop {
        match cells.next_cell() {
            Ok(Some(cell)) => {
                let (row, col) = cell.get_position();
                let value = Cell::from_sheet_ref(cell.get_value());
                if let Some(done) = assembler.push(row, col, value) {
                    if rows.send(Ok(done)).is_err() {
                        return;
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                let number = assembler.next_number();
                let _ = rows.send(Err(UnreadableRow {
                    number,
                    reason: e.to_string(),
                }));
                return;
            }
        }
    }
    if let Some(last) = assembler.finish() {
        let _ = rows.send(Ok(last));
    }
}

/// Groups a row-major stream of spreadsheet cells into rows.
///
/// Cells keep their absolute column position, so every row of a sheet lines
/// up with its header. Empty cells are dropped; a row with no content is
/// never emitted.
#[derive(Debug, Default)]
struct RowAssembler {
    pending: Option<SourceRow>,
    last_number: usize,
}

impl RowAssembler {
    /// Add a cell at zero-based `(row, col)`; returns the previous row once a
    /// cell from a later row arrives.
    fn push(&mut self, row: u32, col: u32, cell: Cell) -> Option<SourceRow> {
        if cell.is_empty() {
            return None;
        }
        let number = row as usize + 1;
        let completed = if self.pending.as_ref().is_some_and(|row| row.number != number) {
            self.pending.take()
        } else {
            None
        };
        self.last_number = number;

        let current = self.pending.get_or_insert_with(|| SourceRow {
            number,
            cells: Vec::new(),
        });
        let col = col as usize;
        if current.cells.len() <= col {
            current.cells.resize(col + 1, Cell::Empty);
        }
        current.cells[col] = cell;
        completed
    }

    /// Row number to blame for a decode error at the current position
    fn next_number(&self) -> usize {
        self.last_number.max(1)
    }

    fn finish(self) -> Option<SourceRow> {
        self.pending
    }
}

/// One cell as read from the source file
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    /// The source marked this cell as an error (e.g. a spreadsheet `#DIV/0!`)
    Invalid(String),
}

impl Cell {
    fn from_text(value: &str) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            Cell::Empty
        } else {
            Cell::Text(trimmed.to_string())
        }
    }

    fn from_sheet(value: &Data) -> Self {
        match value {
            Data::Empty => Cell::Empty,
            Data::String(s) => Cell::from_text(s),
            Data::Int(i) => Cell::Text(i.to_string()),
            Data::Float(f) => Cell::Text(f.to_string()),
            Data::Bool(b) => Cell::Text(b.to_string()),
            Data::DateTime(dt) => match dt.as_datetime() {
                Some(datetime) => Cell::Text(datetime.to_string()),
                None => Cell::Text(dt.as_f64().to_string()),
            },
            Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::from_text(s),
            Data::Error(e) => Cell::Invalid(e.to_string()),
        }
    }

    fn from_sheet_ref(value: &DataRef<'_>) -> Self {
        match value {
            DataRef::Empty => Cell::Empty,
            DataRef::String(s) => Cell::from_text(s),
            DataRef::SharedString(s) => Cell::from_text(s),
            DataRef::Int(i) => Cell::Text(i.to_string()),
            DataRef::Float(f) => Cell::Text(f.to_string()),
            DataRef::Bool(b) => Cell::Text(b.to_string()),
            DataRef::DateTime(dt) => match dt.as_datetime() {
                Some(datetime) => Cell::Text(datetime.to_string()),
                None => Cell::Text(dt.as_f64().to_string()),
            },
            DataRef::DateTimeIso(s) | DataRef::DurationIso(s) => Cell::from_text(s),
            DataRef::Error(e) => Cell::Invalid(e.to_string()),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Cell::Empty)
    }

    /// Text content, if the cell has any
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// A row of cells together with its 1-based position in the file
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRow {
    pub number: usize,
    pub cells: Vec<Cell>,
}

/// A row that could not be decoded at all
#[derive(Debug, Clone, PartialEq)]
pub struct UnreadableRow {
    pub number: usize,
    pub reason: String,
}

/// Sequential reader over the rows of a [`TabularFile`]
pub enum RowReader {
    Delimited {
        records: csv::StringRecordsIntoIter<Box<dyn Read + Send>>,
        line: usize,
    },
    XlsxCells {
        rows: Receiver<Result<SourceRow, UnreadableRow>>,
    },
    /// A fully decoded XLS or ODS worksheet
    Sheet {
        range: Range<Data>,
        next_row: usize,
    },
}

impl RowReader {
    /// Read the next row; `None` at end of file.
    pub fn next_row(&mut self) -> Option<Result<SourceRow, UnreadableRow>> {
        match self {
            RowReader::Delimited { records, line } => {
                let record = records.next()?;
                *line += 1;
                // A quoted cell may span lines; number by the line the record starts on
                let fallback = *line;
                let start_line =
                    |position: Option<&csv::Position>| position.map_or(fallback, |p| p.line() as usize);
                Some(match record {
                    Ok(record) => Ok(SourceRow {
                        number: start_line(record.position()),
                        cells: record.iter().map(Cell::from_text).collect(),
                    }),
                    Err(e) => Err(UnreadableRow {
                        number: start_line(e.position()),
                        reason: e.to_string(),
                    }),
                })
            }
            RowReader::XlsxCells { rows } => rows.recv().ok(),
            RowReader::Sheet { range, next_row } => {
                if *next_row >= range.height() {
                    return None;
                }
                let row = *next_row;
                *next_row += 1;
                // The range starts at the first used cell, not necessarily A1
                let first_row = range.start().map(|(r, _)| r as usize).unwrap_or(0);
                let cells = (0..range.width())
                    .map(|col| range.get((row, col)).map(Cell::from_sheet).unwrap_or(Cell::Empty))
                    .collect();
                Some(Ok(SourceRow {
                    number: first_row + row + 1,
                    cells,
                }))
            }
        }
    }

    /// Read up to `size` rows. An empty vector means the file is exhausted.
    pub fn next_chunk(&mut self, size: usize) -> Vec<Result<SourceRow, UnreadableRow>> {
        let mut chunk = Vec::with_capacity(size.min(4096));
        while chunk.len() < size {
            match self.next_row() {
                Some(row) => chunk.push(row),
                None => break,
            }
        }
        chunk
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(FileFormat::from_extension("a.CSV"), Some(FileFormat::Csv));
        assert_eq!(FileFormat::from_extension("a.tsv"), Some(FileFormat::Tsv));
        assert_eq!(FileFormat::from_extension("book.xlsx"), Some(FileFormat::Xlsx));
        assert_eq!(FileFormat::from_extension("old.xls"), Some(FileFormat::Xls));
        assert_eq!(FileFormat::from_extension("calc.ods"), Some(FileFormat::Ods));
        assert_eq!(FileFormat::from_extension("notes.txt"), None);
        assert_eq!(FileFormat::from_extension("no_extension"), None);
    }

    #[test]
    fn test_unsupported_upload_is_rejected() {
        let err = TabularFile::from_bytes("notes.txt", b"hello".to_vec()).unwrap_err();
        assert!(matches!(err, DataSetError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_csv_rows_are_numbered_from_one() {
        let file = TabularFile::from_bytes("a.csv", b"name,age\nAda,36\n  ,\n".to_vec()).unwrap();
        let mut rows = file.rows().unwrap();

        let header = rows.next_row().unwrap().unwrap();
        assert_eq!(header.number, 1);
        assert_eq!(
            header.cells,
            vec![Cell::Text("name".into()), Cell::Text("age".into())]
        );

        let first = rows.next_row().unwrap().unwrap();
        assert_eq!(first.number, 2);

        let blank = rows.next_row().unwrap().unwrap();
        assert!(blank.cells.iter().all(Cell::is_empty));
        assert!(rows.next_row().is_none());
    }

    #[test]
    fn test_tsv_uses_tab_delimiter() {
        let file = TabularFile::from_bytes("a.tsv", b"a\tb\n1\t2\n".to_vec()).unwrap();
        let mut rows = file.rows().unwrap();
        let header = rows.next_row().unwrap().unwrap();
        assert_eq!(header.cells.len(), 2);
    }

    #[test]
    fn test_next_chunk_respects_size() {
        let mut body = String::from("n\n");
        for i in 0..25 {
            body.push_str(&format!("{}\n", i));
        }
        let file = TabularFile::from_bytes("n.csv", body.into_bytes()).unwrap();
        let mut rows = file.rows().unwrap();
        rows.next_row();

        assert_eq!(rows.next_chunk(10).len(), 10);
        assert_eq!(rows.next_chunk(10).len(), 10);
        assert_eq!(rows.next_chunk(10).len(), 5);
        assert!(rows.next_chunk(10).is_empty());
    }

    #[test]
    fn test_multiline_cell_keeps_physical_line_numbers() {
        let file = TabularFile::from_bytes(
            "notes.csv",
            b"name,notes\nA,\"one\ntwo\nthree\"\nB,short\n".to_vec(),
        )
        .unwrap();
        let mut rows = file.rows().unwrap();

        assert_eq!(rows.next_row().unwrap().unwrap().number, 1);
        let quoted = rows.next_row().unwrap().unwrap();
        assert_eq!(quoted.number, 2);
        assert_eq!(quoted.cells[1], Cell::Text("one\ntwo\nthree".into()));
        assert_eq!(rows.next_row().unwrap().unwrap().number, 5);
        assert!(rows.next_row().is_none());
    }

    fn xlsx_bytes(build: impl FnOnce(&mut rust_xlsxwriter::Worksheet)) -> Vec<u8> {
        let mut workbook = rust_xlsxwriter::Workbook::new();
        build(workbook.add_worksheet());
        workbook.save_to_buffer().unwrap()
    }

    #[test]
    fn test_xlsx_rows_keep_sheet_numbers_and_columns() {
        let data = xlsx_bytes(|sheet| {
            sheet.write_string(0, 0, "Name").unwrap();
            sheet.write_string(0, 1, "Lat").unwrap();
            sheet.write_string(1, 0, "Kibera").unwrap();
            sheet.write_number(1, 1, -1.3133).unwrap();
            sheet.write_number(3, 1, -1.5).unwrap();
        });
        let file = TabularFile::from_bytes("sites.xlsx", data).unwrap();
        let mut rows = file.rows().unwrap();
        assert!(matches!(rows, RowReader::XlsxCells { .. }));

        let header = rows.next_row().unwrap().unwrap();
        assert_eq!(header.number, 1);
        assert_eq!(
            header.cells,
            vec![Cell::Text("Name".into()), Cell::Text("Lat".into())]
        );
        let first = rows.next_row().unwrap().unwrap();
        assert_eq!(first.number, 2);
        assert_eq!(first.cells[1], Cell::Text("-1.3133".into()));

        // Row 3 is blank and never produced; row 4 only has its second column
        let sparse = rows.next_row().unwrap().unwrap();
        assert_eq!(sparse.number, 4);
        assert_eq!(sparse.cells, vec![Cell::Empty, Cell::Text("-1.5".into())]);
        assert!(rows.next_row().is_none());
    }

    #[test]
    fn test_xlsx_chunks_past_the_row_buffer() {
        let total = SHEET_ROW_BUFFER * 2 + 50;
        let data = xlsx_bytes(|sheet| {
            sheet.write_string(0, 0, "n").unwrap();
            for i in 1..=total {
                sheet.write_string(i as u32, 0, format!("row {}", i)).unwrap();
            }
        });
        let file = TabularFile::from_bytes("many.xlsx", data).unwrap();
        let mut rows = file.rows().unwrap();
        rows.next_row();

        assert_eq!(rows.next_chunk(SHEET_ROW_BUFFER).len(), SHEET_ROW_BUFFER);
        assert_eq!(rows.next_chunk(SHEET_ROW_BUFFER).len(), SHEET_ROW_BUFFER);
        let tail = rows.next_chunk(SHEET_ROW_BUFFER);
        assert_eq!(tail.len(), 50);
        assert_eq!(tail.last().unwrap().as_ref().unwrap().number, total + 1);
        assert!(rows.next_chunk(SHEET_ROW_BUFFER).is_empty());
    }

    #[test]
    fn test_dropping_xlsx_reader_early_releases_producer() {
        let data = xlsx_bytes(|sheet| {
            for i in 0..(SHEET_ROW_BUFFER as u32 * 4) {
                sheet.write_string(i, 0, "x").unwrap();
            }
        });
        let file = TabularFile::from_bytes("big.xlsx", data).unwrap();

        // Header pass only, as the header extractor does
        let mut rows = file.rows().unwrap();
        assert_eq!(rows.next_row().unwrap().unwrap().number, 1);
        drop(rows);

        let mut again = file.rows().unwrap();
        assert_eq!(again.next_chunk(10).len(), 10);
    }

    #[test]
    fn test_garbage_spreadsheet_is_unreadable() {
        let file = TabularFile::from_bytes("broken.xlsx", b"definitely not a zip".to_vec()).unwrap();
        match file.rows() {
            Err(DataSetError::UnreadableFile(_)) => {}
            other => panic!("expected unreadable file, got {:?}", other.map(|_| ())),
        }
    }
}
