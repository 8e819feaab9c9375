//! JSON dump import (§4.8).
//!
//! A hand-written recursive-descent parser over an 8 KiB-buffered byte
//! stream. Unlike `serde_json`, it never materializes the whole document:
//! each entry is handed to a sink (`TreeSink` builds a `Tree` incrementally,
//! `WriterSink` re-emits the dump through `export::JsonExporter` for
//! dump-to-dump conversion) as soon as it is parsed. It does not require
//! valid UTF-8 anywhere in the byte stream — string content is copied
//! through verbatim except for the handful of JSON escapes it understands.

use crate::error::{Result, RsduError};
use crate::export::{DumpMetadata, JsonExporter};
use crate::model::{Entry, EntryId, EntryKind, ExcludeReason, Ext, FileFlags, LinkInfo, Tree};
use crate::scanner::ScanObserver;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;

const BUF_SIZE: usize = 8192;
const TICK_EVERY: u64 = 1024;

/// Buffered byte reader tracking line/byte position for diagnostics, the
/// way §4.8 requires failures to be reported.
struct ByteReader<R: Read> {
    inner: R,
    buf: [u8; BUF_SIZE],
    pos: usize,
    len: usize,
    line: u64,
    byte_offset: u64,
    eof: bool,
}

impl<R: Read> ByteReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            buf: [0u8; BUF_SIZE],
            pos: 0,
            len: 0,
            line: 1,
            byte_offset: 0,
            eof: false,
        }
    }

    fn fill(&mut self) -> Result<()> {
        if self.pos < self.len || self.eof {
            return Ok(());
        }
        let n = self
            .inner
            .read(&mut self.buf)
            .map_err(|e| RsduError::ImportError(format!("read error: {}", e)))?;
        self.pos = 0;
        self.len = n;
        if n == 0 {
            self.eof = true;
        }
        Ok(())
    }

    /// Look at the next byte without consuming it; `None` at EOF.
    fn peek(&mut self) -> Result<Option<u8>> {
        self.fill()?;
        if self.pos < self.len {
            Ok(Some(self.buf[self.pos]))
        } else {
            Ok(None)
        }
    }

    fn bump(&mut self) -> Result<Option<u8>> {
        let b = self.peek()?;
        if let Some(b) = b {
            self.pos += 1;
            self.byte_offset += 1;
            if b == b'\n' {
                self.line += 1;
            }
        }
        Ok(b)
    }

    fn skip_ws(&mut self) -> Result<()> {
        while let Some(b) = self.peek()? {
            if b == b' ' || b == b'\t' || b == b'\n' || b == b'\r' {
                self.bump()?;
            } else {
                break;
            }
        }
        Ok(())
    }

    fn err(&self, msg: impl Into<String>) -> RsduError {
        RsduError::ImportError(format!(
            "{}:{}: {}",
            self.line,
            self.byte_offset,
            msg.into()
        ))
    }

    fn expect(&mut self, want: u8) -> Result<()> {
        match self.bump()? {
            Some(b) if b == want => Ok(()),
            Some(b) => Err(self.err(format!(
                "expected '{}', found '{}'",
                want as char, b as char
            ))),
            None => Err(self.err(format!("expected '{}', found EOF", want as char))),
        }
    }

    fn peek_nonws(&mut self) -> Result<Option<u8>> {
        self.skip_ws()?;
        self.peek()
    }
}

/// A JSON value produced (or discarded) while parsing; only the variants
/// `skip_value` and the permissive numeric parser actually need.
enum Number {
    Int(i64),
    UInt(u64),
}

fn parse<R: Read>(r: &mut ByteReader<R>) -> Result<Number> {
    let mut neg = false;
    if r.peek()? == Some(b'-') {
        neg = true;
        r.bump()?;
    }
    let mut value: u64 = 0;
    let mut saw_digit = false;
    while let Some(b) = r.peek()? {
        if b.is_ascii_digit() {
            saw_digit = true;
            value = value.saturating_mul(10).saturating_add((b - b'0') as u64);
            r.bump()?;
        } else {
            break;
        }
    }
    if !saw_digit {
        return Err(r.err("expected a digit"));
    }
    // Fractional part and exponent are permitted but discarded — the only
    // consumer that cares, `mtime`, is specified to skip them (§4.8).
    if r.peek()? == Some(b'.') {
        r.bump()?;
        while let Some(b) = r.peek()? {
            if b.is_ascii_digit() {
                r.bump()?;
            } else {
                break;
            }
        }
    }
    if matches!(r.peek()?, Some(b'e') | Some(b'E')) {
        r.bump()?;
        if matches!(r.peek()?, Some(b'+') | Some(b'-')) {
            r.bump()?;
        }
        while let Some(b) = r.peek()? {
            if b.is_ascii_digit() {
                r.bump()?;
            } else {
                break;
            }
        }
    }
    if neg {
        Ok(Number::Int(-(value as i64)))
    } else {
        Ok(Number::UInt(value))
    }
}

/// Parse a JSON string's content into raw bytes, accepting (and passing
/// through verbatim) any byte `>= 0x20` other than `"` and `\` — including
/// non-UTF-8 bytes, per §4.8's explicit non-validation contract.
fn parse_string<R: Read>(r: &mut ByteReader<R>) -> Result<Vec<u8>> {
    r.expect(b'"')?;
    let mut out = Vec::new();
    loop {
        let b = r.bump()?.ok_or_else(|| r.err("unterminated string"))?;
        match b {
            b'"' => return Ok(out),
            b'\\' => {
                let esc = r.bump()?.ok_or_else(|| r.err("unterminated escape"))?;
                match esc {
                    b'"' => out.push(b'"'),
                    b'\\' => out.push(b'\\'),
                    b'/' => out.push(b'/'),
                    b'n' => out.push(b'\n'),
                    b't' => out.push(b'\t'),
                    b'r' => out.push(b'\r'),
                    b'b' => out.push(0x08),
                    b'f' => out.push(0x0c),
                    b'u' => {
                        let mut code: u32 = 0;
                        for _ in 0..4 {
                            let h = r.bump()?.ok_or_else(|| r.err("truncated \\u escape"))?;
                            let digit = (h as char)
                                .to_digit(16)
                                .ok_or_else(|| r.err("invalid hex digit in \\u escape"))?;
                            code = code * 16 + digit;
                        }
                        // Lax: re-encode as UTF-8 when representable, else
                        // drop to the replacement byte rather than fail
                        // the whole import over a single display glyph.
                        if let Some(c) = char::from_u32(code) {
                            let mut buf = [0u8; 4];
                            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                        } else {
                            out.push(b'?');
                        }
                    }
                    other => return Err(r.err(format!("unknown escape '\\{}'", other as char))),
                }
            }
            b if b < 0x20 => return Err(r.err("unescaped control byte in string")),
            b => out.push(b),
        }
    }
}

/// Consume and discard one JSON value of any shape — how unknown object
/// keys stay forward-compatible (§4.8).
fn skip_value<R: Read>(r: &mut ByteReader<R>) -> Result<()> {
    match r.peek_nonws()?.ok_or_else(|| r.err("expected a value"))? {
        b'"' => {
            parse_string(r)?;
        }
        b'{' => {
            r.bump()?;
            if r.peek_nonws()? == Some(b'}') {
                r.bump()?;
                return Ok(());
            }
            loop {
                r.skip_ws()?;
                parse_string(r)?;
                r.skip_ws()?;
                r.expect(b':')?;
                skip_value(r)?;
                r.skip_ws()?;
                match r.bump()? {
                    Some(b',') => continue,
                    Some(b'}') => break,
                    _ => return Err(r.err("expected ',' or '}' in object")),
                }
            }
        }
        b'[' => {
            r.bump()?;
            if r.peek_nonws()? == Some(b']') {
                r.bump()?;
                return Ok(());
            }
            loop {
                r.skip_ws()?;
                skip_value(r)?;
                r.skip_ws()?;
                match r.bump()? {
                    Some(b',') => continue,
                    Some(b']') => break,
                    _ => return Err(r.err("expected ',' or ']' in array")),
                }
            }
        }
        b't' => expect_literal(r, b"true"),
        b'f' => expect_literal(r, b"false"),
        b'n' => expect_literal(r, b"null"),
        _ => {
            parse(r)?;
            Ok(())
        }
    }
}

fn expect_literal<R: Read>(r: &mut ByteReader<R>, lit: &[u8]) -> Result<()> {
    for &want in lit {
        r.expect(want)?;
    }
    Ok(())
}

fn excluded_from_str(s: &[u8]) -> ExcludeReason {
    match s {
        b"othfs" => ExcludeReason::OtherFs,
        b"kernfs" => ExcludeReason::KernFs,
        // Unknown values, and the legacy `frmlnk` tag, default to pattern
        // exclusion per §4.8.
        _ => ExcludeReason::Pattern,
    }
}

/// Every key an entry object (dir header, file, link, or special) may
/// carry, parsed generically; the caller decides which fields apply to
/// the kind of node it is building.
#[derive(Default)]
struct ParsedObj {
    name: Option<Vec<u8>>,
    asize: u64,
    dsize: u64,
    dev: Option<u64>,
    ino: Option<u64>,
    hlnkc: bool,
    nlink: Option<u32>,
    notreg: bool,
    read_error: bool,
    excluded: Option<ExcludeReason>,
    uid: Option<u32>,
    gid: Option<u32>,
    mode: Option<u32>,
    mtime: Option<i64>,
}

fn parse_object<R: Read>(r: &mut ByteReader<R>) -> Result<ParsedObj> {
    r.skip_ws()?;
    r.expect(b'{')?;
    let mut obj = ParsedObj::default();
    r.skip_ws()?;
    if r.peek()? == Some(b'}') {
        r.bump()?;
        return Err(r.err("missing mandatory 'name' key"));
    }
    loop {
        r.skip_ws()?;
        let key = parse_string(r)?;
        r.skip_ws()?;
        r.expect(b':')?;
        r.skip_ws()?;
        match key.as_slice() {
            b"name" => {
                if obj.name.is_some() {
                    return Err(r.err("duplicate 'name' key"));
                }
                obj.name = Some(parse_string(r)?);
            }
            b"asize" => obj.asize = parse_u64(r)?,
            b"dsize" => obj.dsize = parse_u64(r)?,
            b"dev" => obj.dev = Some(parse_u64(r)?),
            b"ino" => obj.ino = Some(parse_u64(r)?),
            b"hlnkc" => obj.hlnkc = parse_bool(r)?,
            b"nlink" => obj.nlink = Some(parse_u64(r)? as u32),
            b"notreg" => obj.notreg = parse_bool(r)?,
            b"read_error" => obj.read_error = parse_bool(r)?,
            b"excluded" => {
                let v = parse_string(r)?;
                obj.excluded = Some(excluded_from_str(&v));
            }
            b"uid" => obj.uid = Some(parse_u64(r)? as u32),
            b"gid" => obj.gid = Some(parse_u64(r)? as u32),
            b"mode" => obj.mode = Some(parse_u64(r)? as u32),
            b"mtime" => obj.mtime = Some(parse_i64(r)?),
            _ => skip_value(r)?,
        }
        r.skip_ws()?;
        match r.bump()? {
            Some(b',') => continue,
            Some(b'}') => break,
            _ => return Err(r.err("expected ',' or '}' in object")),
        }
    }
    if obj.name.is_none() {
        return Err(r.err("missing mandatory 'name' key"));
    }
    Ok(obj)
}

fn parse_u64<R: Read>(r: &mut ByteReader<R>) -> Result<u64> {
    match parse(r)? {
        Number::UInt(v) => Ok(v),
        Number::Int(v) => Ok(v.max(0) as u64),
    }
}

fn parse_i64<R: Read>(r: &mut ByteReader<R>) -> Result<i64> {
    match parse(r)? {
        Number::UInt(v) => Ok(v as i64),
        Number::Int(v) => Ok(v),
    }
}

fn parse_bool<R: Read>(r: &mut ByteReader<R>) -> Result<bool> {
    match r.peek_nonws()? {
        Some(b't') => {
            expect_literal(r, b"true")?;
            Ok(true)
        }
        Some(b'f') => {
            expect_literal(r, b"false")?;
            Ok(false)
        }
        _ => Err(r.err("expected a boolean")),
    }
}

fn ext_from_obj(obj: &ParsedObj) -> Option<Ext> {
    if obj.uid.is_none() && obj.gid.is_none() && obj.mode.is_none() && obj.mtime.is_none() {
        return None;
    }
    let mtime = obj
        .mtime
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .unwrap_or_else(|| DateTime::<Utc>::from_timestamp(0, 0).unwrap());
    Some(Ext {
        uid: obj.uid.unwrap_or(0),
        gid: obj.gid.unwrap_or(0),
        mode: obj.mode.unwrap_or(0),
        mtime,
    })
}

fn file_flags_from_obj(obj: &ParsedObj) -> FileFlags {
    FileFlags {
        notreg: obj.notreg,
        other_fs: matches!(obj.excluded, Some(ExcludeReason::OtherFs)),
        kernfs: matches!(obj.excluded, Some(ExcludeReason::KernFs)),
        excluded: obj.excluded,
        err: obj.read_error,
    }
}

/// Where parsed entries land — a `Tree` under construction, or a
/// pass-through dump writer (§4.8 "may optionally write the parsed tree
/// through to a file sink").
trait ImportSink {
    fn open_dir(&mut self, parent_dev: u64, obj: &ParsedObj) -> Result<u64>;
    fn close_dir(&mut self) -> Result<()>;
    fn leaf(&mut self, parent_dev: u64, obj: &ParsedObj) -> Result<()>;
}

struct TreeSink {
    tree: Tree,
    dir_stack: Vec<EntryId>,
    link_table: HashMap<(u64, u64), LinkBucket>,
}

struct LinkBucket {
    nlink: u32,
    size: u64,
    blocks: u64,
    occurrences: Vec<EntryId>,
}

impl TreeSink {
    fn new() -> Self {
        Self {
            tree: Tree::new(Vec::new(), 0),
            dir_stack: Vec::new(),
            link_table: HashMap::new(),
        }
    }

    /// `parse_entry` rejects a non-array root before any sink method runs,
    /// so by the time `open_dir`/`leaf` reach here the stack always has at
    /// least the root directory pushed.
    fn current_dir(&self) -> EntryId {
        *self.dir_stack.last().expect("no open directory")
    }

    fn finalize(mut self) -> Tree {
        let buckets: Vec<_> = self.link_table.drain().map(|(_, b)| b).collect();
        for bucket in buckets {
            let n = bucket.nlink.max(1) as u64;
            let (share_size, share_blocks) = (bucket.size / n, bucket.blocks / n);
            for id in bucket.occurrences {
                if let Some(parent) = self.tree.get(id).parent {
                    self.tree.add_stats(parent, share_size, share_blocks, 0);
                }
            }
        }
        self.tree
    }
}

impl ImportSink for TreeSink {
    fn open_dir(&mut self, parent_dev: u64, obj: &ParsedObj) -> Result<u64> {
        let name = obj.name.clone().unwrap();
        let dev_raw = obj.dev.unwrap_or(parent_dev);
        let dev_id = self.tree.devices.intern(dev_raw);
        let ext = ext_from_obj(obj);

        if self.dir_stack.is_empty() {
            // Root: rename the tree's single pre-allocated root entry
            // rather than inserting a fresh child.
            let root = self.tree.root;
            self.tree.get_mut(root).name = name;
            self.tree.get_mut(root).dev_id = dev_id;
            self.tree.get_mut(root).ext = ext;
            self.dir_stack.push(root);
        } else {
            let parent = self.current_dir();
            let entry = Entry {
                name,
                size: 0,
                blocks: 0,
                dev_id,
                next: None,
                parent: None,
                ext,
                is_root: false,
                kind: EntryKind::Dir(crate::model::DirInfo::new()),
            };
            let id = self.tree.insert_child(parent, entry);
            self.dir_stack.push(id);
        }
        Ok(dev_raw)
    }

    fn close_dir(&mut self) -> Result<()> {
        self.dir_stack.pop();
        Ok(())
    }

    fn leaf(&mut self, parent_dev: u64, obj: &ParsedObj) -> Result<()> {
        let parent = self.current_dir();
        let name = obj.name.clone().unwrap();
        let dev_raw = obj.dev.unwrap_or(parent_dev);
        let dev_id = self.tree.devices.intern(dev_raw);
        let ext = ext_from_obj(obj);
        let blocks = obj.dsize / crate::model::BLOCK_SIZE;

        if obj.hlnkc || (obj.nlink.unwrap_or(1) > 1 && obj.ino.is_some()) {
            let ino = obj.ino.ok_or_else(|| RsduError::ImportError("link entry missing 'ino'".into()))?;
            let nlink = obj.nlink.unwrap_or(2).max(1);
            let entry = Entry {
                name,
                size: obj.asize,
                blocks,
                dev_id,
                next: None,
                parent: None,
                ext,
                is_root: false,
                kind: EntryKind::Link(LinkInfo { ino, nlink }),
            };
            let id = self.tree.insert_link(parent, entry);
            let bucket = self.link_table.entry((dev_raw, ino)).or_insert_with(|| LinkBucket {
                nlink,
                size: obj.asize,
                blocks,
                occurrences: Vec::new(),
            });
            bucket.occurrences.push(id);
        } else {
            let flags = file_flags_from_obj(obj);
            let entry = Entry {
                name,
                size: obj.asize,
                blocks,
                dev_id,
                next: None,
                parent: None,
                ext,
                is_root: false,
                kind: EntryKind::File(flags),
            };
            self.tree.insert_child(parent, entry);
        }
        Ok(())
    }
}

struct WriterSink<W: Write> {
    out: JsonExporter<W>,
    depth: usize,
}

impl<W: Write> ImportSink for WriterSink<W> {
    fn open_dir(&mut self, parent_dev: u64, obj: &ParsedObj) -> Result<u64> {
        let name = obj.name.clone().unwrap();
        let dev = obj.dev.unwrap_or(parent_dev);
        let ext = ext_from_obj(obj);
        if self.depth == 0 {
            self.out.open_root(&name, ext)?;
        } else {
            self.out.open_dir(&name, parent_dev, dev, ext)?;
        }
        self.depth += 1;
        Ok(dev)
    }

    fn close_dir(&mut self) -> Result<()> {
        self.depth -= 1;
        if self.depth == 0 {
            self.out.close_root()
        } else {
            self.out.close_dir()
        }
    }

    fn leaf(&mut self, parent_dev: u64, obj: &ParsedObj) -> Result<()> {
        let name = obj.name.clone().unwrap();
        let dev = obj.dev.unwrap_or(parent_dev);
        let ext = ext_from_obj(obj);
        if obj.hlnkc {
            let ino = obj.ino.unwrap_or(0);
            let nlink = obj.nlink.unwrap_or(2).max(1);
            self.out
                .write_link(&name, parent_dev, dev, obj.asize, obj.dsize / crate::model::BLOCK_SIZE, ino, nlink, ext)
        } else {
            self.out
                .write_leaf_fields(&name, parent_dev, dev, obj.asize, obj.dsize, file_flags_from_obj(obj), ext)
        }
    }
}

/// Parse one array-valued entry: either a nested directory (`[` header
/// `,` children... `]`) or a flat leaf/special object. `is_root` is only
/// set for the document's top-level entry, which must be a directory
/// array — a flat object there would call `sink.leaf` before any
/// `open_dir`, which `TreeSink` has no parent directory to attach to.
fn parse_entry<R: Read, S: ImportSink>(
    r: &mut ByteReader<R>,
    sink: &mut S,
    parent_dev: u64,
    items_seen: &mut u64,
    observer: &mut dyn ScanObserver,
    is_root: bool,
) -> Result<()> {
    *items_seen += 1;
    if *items_seen % TICK_EVERY == 0 && observer.tick("(import)", *items_seen) {
        return Err(r.err("import cancelled"));
    }
    match r.peek_nonws()?.ok_or_else(|| r.err("expected an entry"))? {
        b'[' => {
            r.bump()?;
            r.skip_ws()?;
            let header = parse_object(r)?;
            let dev = sink.open_dir(parent_dev, &header)?;
            r.skip_ws()?;
            loop {
                match r.peek()? {
                    Some(b']') => {
                        r.bump()?;
                        break;
                    }
                    Some(b',') => {
                        r.bump()?;
                        r.skip_ws()?;
                        parse_entry(r, sink, dev, items_seen, observer, false)?;
                        r.skip_ws()?;
                    }
                    _ => return Err(r.err("expected ',' or ']' in directory array")),
                }
            }
            sink.close_dir()
        }
        b'{' if is_root => Err(r.err("root entry must be a directory array, found an object")),
        b'{' => {
            let obj = parse_object(r)?;
            sink.leaf(parent_dev, &obj)
        }
        _ if is_root => Err(r.err("root entry must be a directory array")),
        _ => Err(r.err("expected '[' or '{' for a directory entry")),
    }
}

/// Drive the whole document — `[MAJOR, MINOR, METADATA_OBJ, ROOT_ARRAY]` —
/// into `sink`, checking `MAJOR` for compatibility (§4.7: "stable across
/// versions sharing the same MAJOR").
fn run<R: Read, S: ImportSink>(
    mut r: ByteReader<R>,
    sink: &mut S,
    observer: &mut dyn ScanObserver,
) -> Result<()> {
    r.skip_ws()?;
    r.expect(b'[')?;
    r.skip_ws()?;
    let major = match parse(&mut r)? {
        Number::UInt(v) => v,
        Number::Int(v) => v.max(0) as u64,
    };
    if major != crate::export::DUMP_MAJOR as u64 {
        return Err(r.err(format!("unsupported dump major version {}", major)));
    }
    r.skip_ws()?;
    r.expect(b',')?;
    r.skip_ws()?;
    let _minor = parse(&mut r)?;
    r.skip_ws()?;
    r.expect(b',')?;
    r.skip_ws()?;
    skip_value(&mut r)?; // METADATA_OBJ: progname/progver/timestamp, not needed to rebuild the tree
    r.skip_ws()?;
    r.expect(b',')?;
    r.skip_ws()?;

    let mut items_seen = 0u64;
    parse_entry(&mut r, sink, 0, &mut items_seen, observer, true)?;

    r.skip_ws()?;
    r.expect(b']')?;
    Ok(())
}

/// Parse a dump into a fresh in-memory `Tree` (§6 `import_dump`, memory
/// form).
pub fn import_to_tree<R: Read>(reader: R, observer: &mut dyn ScanObserver) -> Result<Tree> {
    let mut sink = TreeSink::new();
    run(ByteReader::new(reader), &mut sink, observer)?;
    Ok(sink.finalize())
}

/// Parse a dump and immediately re-emit it through a writer (§6
/// `import_dump`, dump-to-dump conversion form).
pub fn import_to_writer<R: Read, W: Write>(
    reader: R,
    writer: W,
    metadata: DumpMetadata,
    observer: &mut dyn ScanObserver,
) -> Result<()> {
    let out = JsonExporter::new(writer, metadata)?;
    let mut sink = WriterSink { out, depth: 0 };
    run(ByteReader::new(reader), &mut sink, observer)?;
    sink.out.finish()
}

const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

/// Open a dump's input stream, transparently decompressing it if it opens
/// with the zstd frame magic (the counterpart of `export::create_dump_writer`'s
/// `compress` option — a `--output-binary` dump is a zstd-compressed JSON
/// dump, not a distinct format).
pub fn open_dump_reader(path: &Path) -> Result<Box<dyn Read>> {
    let raw: Box<dyn Read> = if path.as_os_str() == "-" {
        Box::new(std::io::stdin())
    } else {
        let file = std::fs::File::open(path)
            .map_err(|e| RsduError::ImportError(format!("cannot open '{}': {}", path.display(), e)))?;
        Box::new(file)
    };
    let mut buffered = std::io::BufReader::with_capacity(BUF_SIZE, raw);
    let looks_compressed = {
        use std::io::BufRead;
        let peek = buffered
            .fill_buf()
            .map_err(|e| RsduError::ImportError(format!("read failed: {}", e)))?;
        peek.starts_with(&ZSTD_MAGIC)
    };
    if looks_compressed {
        let decoder = zstd::stream::read::Decoder::new(buffered)
            .map_err(|e| RsduError::CompressionError(e.to_string()))?;
        Ok(Box::new(decoder))
    } else {
        Ok(Box::new(buffered))
    }
}

/// Read a dump from a file path, or from stdin when `path == "-"` (§6).
/// Transparently decompresses a zstd-wrapped dump.
pub fn import_dump(path: &Path, observer: &mut dyn ScanObserver) -> Result<Tree> {
    let reader = open_dump_reader(path)?;
    import_to_tree(reader, observer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::NullObserver;

    fn import_str(s: &str) -> Result<Tree> {
        import_to_tree(s.as_bytes(), &mut NullObserver)
    }

    #[test]
    fn imports_minimal_document() {
        let tree = import_str(r#"[1,2,{},[{"name":"r"},{"name":"f","asize":10,"dsize":512}]]"#).unwrap();
        let root = tree.get(tree.root);
        assert_eq!(root.name, b"r");
        let child = tree.children(tree.root).next().unwrap();
        assert_eq!(tree.get(child).name, b"f");
        assert_eq!(tree.get(child).size, 10);
        assert_eq!(root.size, 10);
    }

    #[test]
    fn rejects_missing_name() {
        let err = import_str(r#"[1,2,{},[{}]]"#);
        assert!(err.is_err());
    }

    #[test]
    fn rejects_duplicate_name() {
        let err = import_str(r#"[1,2,{},[{"name":"a","name":"b"}]]"#);
        assert!(err.is_err());
    }

    #[test]
    fn unknown_keys_are_skipped() {
        let tree = import_str(r#"[1,2,{},[{"name":"r","totally_unknown":{"a":[1,2,"x"]}}]]"#).unwrap();
        assert_eq!(tree.get(tree.root).name, b"r");
    }

    #[test]
    fn nested_directories_aggregate() {
        let tree = import_str(
            r#"[1,2,{},[{"name":"r"},[{"name":"sub"},{"name":"a","asize":1000,"dsize":4096}],{"name":"b","asize":500,"dsize":4096}]]"#,
        )
        .unwrap();
        let root = tree.get(tree.root);
        assert_eq!(root.size, 1500);
    }

    #[test]
    fn unknown_excluded_value_defaults_to_pattern() {
        let tree = import_str(r#"[1,2,{},[{"name":"r"},{"name":"x","excluded":"frmlnk"}]]"#).unwrap();
        let child = tree.children(tree.root).next().unwrap();
        assert_eq!(tree.get(child).excluded(), Some(ExcludeReason::Pattern));
    }

    #[test]
    fn flat_root_object_is_a_clean_error_not_a_panic() {
        let err = import_str(r#"[1,2,{},{"name":"r"}]"#);
        assert!(err.is_err());
        assert!(err.unwrap_err().to_string().contains("root entry must be a directory array"));
    }

    #[test]
    fn import_then_export_preserves_sibling_order() {
        let dump = r#"[1,2,{},[{"name":"r"},{"name":"a"},{"name":"b"},{"name":"c"}]]"#;
        let tree = import_str(dump).unwrap();
        let mut buf = Vec::new();
        let meta = DumpMetadata { progname: "rsdu".into(), progver: "0.1.0".into(), timestamp: 0 };
        crate::export::export_tree(&tree, &mut buf, meta).unwrap();
        let out = String::from_utf8(buf).unwrap();
        let pos_a = out.find("\"name\":\"a\"").unwrap();
        let pos_b = out.find("\"name\":\"b\"").unwrap();
        let pos_c = out.find("\"name\":\"c\"").unwrap();
        assert!(pos_a < pos_b && pos_b < pos_c, "export must preserve document order: {}", out);
    }
}
