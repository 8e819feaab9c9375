//! JSON dump export (§4.7, §4.9).
//!
//! Streams the `[MAJOR, MINOR, METADATA_OBJ, ROOT_ENTRY]` dump format
//! directly from either a live directory walk (`scanner::scan_root_to_writer`)
//! or an already-scanned `Tree`, without building an intermediate
//! serializable representation. Directory objects never carry their own
//! `asize`/`dsize` — they are arrays whose children are summed by the
//! importer on the way back in, which is what keeps a round trip stable
//! across hardlink rounding.

use crate::error::{Result, RsduError};
use crate::model::{EntryId, EntryKind, ExcludeReason, Ext, FileFlags, Tree};
use nix::sys::stat::FileStat;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

pub const DUMP_MAJOR: u32 = 1;
pub const DUMP_MINOR: u32 = 2;

/// The dump's one free-form object, `METADATA_OBJ` in §4.7.
pub struct DumpMetadata {
    pub progname: String,
    pub progver: String,
    pub timestamp: i64,
}

impl DumpMetadata {
    pub fn now(progname: impl Into<String>, progver: impl Into<String>) -> Self {
        Self {
            progname: progname.into(),
            progver: progver.into(),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

fn io_err(e: std::io::Error) -> RsduError {
    RsduError::ExportError(format!("write failed: {}", e))
}

/// Open the dump's output stream. `path == "-"` writes to stdout. When
/// `compress` is set the stream is wrapped in a zstd encoder, so a
/// `--output-binary` dump is just a zstd-compressed JSON dump rather than
/// a distinct wire format (`import::open_dump_reader` autodetects the
/// zstd frame magic on the way back in).
pub fn create_dump_writer(path: &str, compress: bool, level: i32) -> Result<Box<dyn Write>> {
    let raw: Box<dyn Write> = if path == "-" {
        Box::new(std::io::stdout())
    } else {
        let file = File::create(Path::new(path))
            .map_err(|e| RsduError::ExportError(format!("cannot create '{}': {}", path, e)))?;
        Box::new(BufWriter::new(file))
    };
    if compress {
        let encoder = zstd::stream::write::Encoder::new(raw, level)
            .map_err(|e| RsduError::CompressionError(e.to_string()))?;
        Ok(Box::new(encoder.auto_finish()))
    } else {
        Ok(raw)
    }
}

/// Write a dump-format string literal for a raw (possibly non-UTF-8)
/// byte string: standard escapes for `"`, `\`, and control bytes below
/// 0x20; every other byte, including the 0x80-0xFF range, verbatim.
fn write_json_bytes<W: Write>(w: &mut W, bytes: &[u8]) -> Result<()> {
    w.write_all(b"\"").map_err(io_err)?;
    for &b in bytes {
        match b {
            b'"' => w.write_all(b"\\\"").map_err(io_err)?,
            b'\\' => w.write_all(b"\\\\").map_err(io_err)?,
            b'\n' => w.write_all(b"\\n").map_err(io_err)?,
            b'\r' => w.write_all(b"\\r").map_err(io_err)?,
            b'\t' => w.write_all(b"\\t").map_err(io_err)?,
            0x08 => w.write_all(b"\\b").map_err(io_err)?,
            0x0c => w.write_all(b"\\f").map_err(io_err)?,
            b if b < 0x20 => write!(w, "\\u{:04x}", b).map_err(io_err)?,
            b => w.write_all(&[b]).map_err(io_err)?,
        }
    }
    w.write_all(b"\"").map_err(io_err)
}

fn excluded_tag(reason: ExcludeReason) -> &'static str {
    match reason {
        ExcludeReason::Pattern => "pattern",
        ExcludeReason::OtherFs => "othfs",
        ExcludeReason::KernFs => "kernfs",
    }
}

/// Streaming writer for the dump format. Each open array (root, or a
/// nested subdirectory) pushes a "have I written an element yet" flag
/// so commas land in the right places; `finish` closes the top-level
/// 4-element array.
pub struct JsonExporter<W: Write> {
    writer: W,
    need_comma: Vec<bool>,
}

impl<W: Write> JsonExporter<W> {
    pub fn new(mut writer: W, metadata: DumpMetadata) -> Result<Self> {
        write!(writer, "[{},{},", DUMP_MAJOR, DUMP_MINOR).map_err(io_err)?;
        write!(writer, "{{\"progname\":").map_err(io_err)?;
        write_json_bytes(&mut writer, metadata.progname.as_bytes())?;
        write!(writer, ",\"progver\":").map_err(io_err)?;
        write_json_bytes(&mut writer, metadata.progver.as_bytes())?;
        write!(writer, ",\"timestamp\":{}}},", metadata.timestamp).map_err(io_err)?;
        Ok(Self {
            writer,
            need_comma: Vec::new(),
        })
    }

    fn comma(&mut self) -> Result<()> {
        if let Some(last) = self.need_comma.last_mut() {
            if *last {
                self.writer.write_all(b",").map_err(io_err)?;
            } else {
                *last = true;
            }
        }
        Ok(())
    }

    fn write_ext(&mut self, ext: &Ext) -> Result<()> {
        write!(
            self.writer,
            ",\"uid\":{},\"gid\":{},\"mode\":{},\"mtime\":{}",
            ext.uid,
            ext.gid,
            ext.mode,
            ext.mtime.timestamp()
        )
        .map_err(io_err)
    }

    /// Open the root directory's own array and write its leading object.
    pub fn open_root(&mut self, name: &[u8], ext: Option<Ext>) -> Result<()> {
        self.writer.write_all(b"[").map_err(io_err)?;
        self.need_comma.push(false);
        self.write_dir_obj(name, None, ext)
    }

    pub fn close_root(&mut self) -> Result<()> {
        self.writer.write_all(b"]").map_err(io_err)?;
        self.need_comma.pop();
        Ok(())
    }

    /// Open a subdirectory as a nested array-valued element of the
    /// current array.
    pub fn open_dir(&mut self, name: &[u8], parent_dev: u64, dev: u64, ext: Option<Ext>) -> Result<()> {
        self.comma()?;
        self.writer.write_all(b"[").map_err(io_err)?;
        self.need_comma.push(false);
        let dev_field = if dev != parent_dev { Some(dev) } else { None };
        self.write_dir_obj(name, dev_field, ext)
    }

    pub fn close_dir(&mut self) -> Result<()> {
        self.writer.write_all(b"]").map_err(io_err)?;
        self.need_comma.pop();
        Ok(())
    }

    fn write_dir_obj(&mut self, name: &[u8], dev: Option<u64>, ext: Option<Ext>) -> Result<()> {
        self.writer.write_all(b"{\"name\":").map_err(io_err)?;
        write_json_bytes(&mut self.writer, name)?;
        if let Some(dev) = dev {
            write!(self.writer, ",\"dev\":{}", dev).map_err(io_err)?;
        }
        if let Some(ext) = ext {
            self.write_ext(&ext)?;
        }
        self.writer.write_all(b"}").map_err(io_err)
    }

    /// Write a flat placeholder object for an excluded/err/other_fs/kernfs
    /// entry — it never recurses, so it is never an array, even if the
    /// underlying filesystem object is a directory.
    pub fn write_special(&mut self, name: &[u8], parent_dev: u64, dev: u64, flags: FileFlags) -> Result<()> {
        self.comma()?;
        self.writer.write_all(b"{\"name\":").map_err(io_err)?;
        write_json_bytes(&mut self.writer, name)?;
        if dev != parent_dev {
            write!(self.writer, ",\"dev\":{}", dev).map_err(io_err)?;
        }
        if flags.notreg {
            self.writer.write_all(b",\"notreg\":true").map_err(io_err)?;
        }
        if flags.err {
            self.writer.write_all(b",\"read_error\":true").map_err(io_err)?;
        }
        let tag = if flags.other_fs {
            Some("othfs")
        } else if flags.kernfs {
            Some("kernfs")
        } else {
            flags.excluded.map(excluded_tag)
        };
        if let Some(tag) = tag {
            write!(self.writer, ",\"excluded\":\"{}\"", tag).map_err(io_err)?;
        }
        self.writer.write_all(b"}").map_err(io_err)
    }

    /// Write a plain-file or hardlink leaf directly from a live `stat`.
    pub fn write_leaf(
        &mut self,
        name: &[u8],
        parent_dev: u64,
        stat: &FileStat,
        hardlink_ok: bool,
        ext: Option<Ext>,
    ) -> Result<()> {
        self.comma()?;
        let dev = stat.st_dev as u64;
        let is_link = hardlink_ok && stat.st_nlink > 1;
        let is_dir_mode = (stat.st_mode & libc::S_IFMT as u32) == libc::S_IFDIR as u32;
        let is_reg = (stat.st_mode & libc::S_IFMT as u32) == libc::S_IFREG as u32;
        let notreg = !is_reg && !is_dir_mode;
        let asize = stat.st_size.max(0) as u64;
        let dsize = (stat.st_blocks.max(0) as u64) * crate::model::BLOCK_SIZE;

        self.writer.write_all(b"{\"name\":").map_err(io_err)?;
        write_json_bytes(&mut self.writer, name)?;
        if asize != 0 {
            write!(self.writer, ",\"asize\":{}", asize).map_err(io_err)?;
        }
        if dsize != 0 {
            write!(self.writer, ",\"dsize\":{}", dsize).map_err(io_err)?;
        }
        if dev != parent_dev {
            write!(self.writer, ",\"dev\":{}", dev).map_err(io_err)?;
        }
        if is_link {
            write!(
                self.writer,
                ",\"ino\":{},\"hlnkc\":true,\"nlink\":{}",
                stat.st_ino, stat.st_nlink
            )
            .map_err(io_err)?;
        }
        if notreg {
            self.writer.write_all(b",\"notreg\":true").map_err(io_err)?;
        }
        if let Some(ext) = ext {
            self.write_ext(&ext)?;
        }
        self.writer.write_all(b"}").map_err(io_err)
    }

    /// Write a hardlink leaf from an already-built `Tree` entry (no live
    /// `stat` available here — unlike `write_leaf`, used while streaming
    /// straight off a walk). `size`/`blocks` are the link's full,
    /// un-divided values; only the *ancestor* contribution is divided by
    /// `nlink`, and that division never shows up in the dump itself.
    #[allow(clippy::too_many_arguments)]
    pub fn write_link(
        &mut self,
        name: &[u8],
        parent_dev: u64,
        dev: u64,
        size: u64,
        blocks: u64,
        ino: u64,
        nlink: u32,
        ext: Option<Ext>,
    ) -> Result<()> {
        self.comma()?;
        let dsize = blocks * crate::model::BLOCK_SIZE;
        self.writer.write_all(b"{\"name\":").map_err(io_err)?;
        write_json_bytes(&mut self.writer, name)?;
        if size != 0 {
            write!(self.writer, ",\"asize\":{}", size).map_err(io_err)?;
        }
        if dsize != 0 {
            write!(self.writer, ",\"dsize\":{}", dsize).map_err(io_err)?;
        }
        if dev != parent_dev {
            write!(self.writer, ",\"dev\":{}", dev).map_err(io_err)?;
        }
        write!(self.writer, ",\"ino\":{},\"hlnkc\":true,\"nlink\":{}", ino, nlink).map_err(io_err)?;
        if let Some(ext) = ext {
            self.write_ext(&ext)?;
        }
        self.writer.write_all(b"}").map_err(io_err)
    }

    /// Write a leaf object from already-parsed fields rather than a live
    /// `stat` — the shape `write_leaf`/`write_special` would produce, but
    /// driven by whatever a dump-to-dump import pass-through already
    /// parsed out of the source entry.
    #[allow(clippy::too_many_arguments)]
    pub fn write_leaf_fields(
        &mut self,
        name: &[u8],
        parent_dev: u64,
        dev: u64,
        asize: u64,
        dsize: u64,
        flags: FileFlags,
        ext: Option<Ext>,
    ) -> Result<()> {
        self.comma()?;
        self.writer.write_all(b"{\"name\":").map_err(io_err)?;
        write_json_bytes(&mut self.writer, name)?;
        if asize != 0 {
            write!(self.writer, ",\"asize\":{}", asize).map_err(io_err)?;
        }
        if dsize != 0 {
            write!(self.writer, ",\"dsize\":{}", dsize).map_err(io_err)?;
        }
        if dev != parent_dev {
            write!(self.writer, ",\"dev\":{}", dev).map_err(io_err)?;
        }
        if flags.notreg {
            self.writer.write_all(b",\"notreg\":true").map_err(io_err)?;
        }
        if flags.err {
            self.writer.write_all(b",\"read_error\":true").map_err(io_err)?;
        }
        let tag = if flags.other_fs {
            Some("othfs")
        } else if flags.kernfs {
            Some("kernfs")
        } else {
            flags.excluded.map(excluded_tag)
        };
        if let Some(tag) = tag {
            write!(self.writer, ",\"excluded\":\"{}\"", tag).map_err(io_err)?;
        }
        if let Some(ext) = ext {
            self.write_ext(&ext)?;
        }
        self.writer.write_all(b"}").map_err(io_err)
    }

    /// Close the top-level 4-element array and flush.
    pub fn finish(mut self) -> Result<()> {
        self.writer.write_all(b"]").map_err(io_err)?;
        self.writer.flush().map_err(io_err)
    }
}

/// Export an already in-memory `Tree` (§6: "export is implicit ... when
/// writer_or_null is non-null" — this is the form used when the tree
/// came from a scan-to-memory or an import rather than a direct
/// scan-to-writer).
pub fn export_tree<W: Write>(tree: &Tree, writer: W, metadata: DumpMetadata) -> Result<()> {
    let mut out = JsonExporter::new(writer, metadata)?;
    let root = tree.get(tree.root);
    out.open_root(&root.name, root.ext)?;
    write_children(tree, &mut out, tree.root, tree.devices.raw(root.dev_id))?;
    out.close_root()?;
    out.finish()
}

/// `Tree::children` walks the singly-linked child list head-first, which is
/// the reverse of insertion order (`link_child` pushes onto the head). Both
/// the scanner and the importer build lists that way, so emitting in
/// insertion order here (list order reversed) is what makes
/// `export(import(dump)) == dump`: the importer inserts entries in document
/// order, and reversing the head-first walk recovers that same order.
fn write_children<W: Write>(
    tree: &Tree,
    out: &mut JsonExporter<W>,
    dir_id: EntryId,
    dir_dev: u64,
) -> Result<()> {
    let mut children: Vec<EntryId> = tree.children(dir_id).collect();
    children.reverse();
    for child_id in children {
        write_entry(tree, out, child_id, dir_dev)?;
    }
    Ok(())
}

fn write_entry<W: Write>(tree: &Tree, out: &mut JsonExporter<W>, id: EntryId, parent_dev: u64) -> Result<()> {
    let entry = tree.get(id);
    let dev = tree.devices.raw(entry.dev_id);
    match &entry.kind {
        EntryKind::Dir(_) => {
            out.open_dir(&entry.name, parent_dev, dev, entry.ext)?;
            write_children(tree, out, id, dev)?;
            out.close_dir()
        }
        EntryKind::File(flags) => out.write_leaf_fields(
            &entry.name,
            parent_dev,
            dev,
            entry.size,
            entry.blocks * crate::model::BLOCK_SIZE,
            *flags,
            entry.ext,
        ),
        EntryKind::Link(link) => {
            out.write_link(&entry.name, parent_dev, dev, entry.size, entry.blocks, link.ino, link.nlink, entry.ext)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_header_has_major_minor_and_metadata() {
        let mut buf = Vec::new();
        let meta = DumpMetadata {
            progname: "rsdu".into(),
            progver: "0.1.0".into(),
            timestamp: 1000,
        };
        let mut out = JsonExporter::new(&mut buf, meta).unwrap();
        out.open_root(b"/tmp", None).unwrap();
        out.close_root().unwrap();
        out.finish().unwrap();
        let s = String::from_utf8(buf).unwrap();
        assert!(s.starts_with("[1,2,{\"progname\":\"rsdu\""));
        assert!(s.contains("\"timestamp\":1000"));
        assert!(s.ends_with("]]"));
    }

    #[test]
    fn export_tree_preserves_plain_file_size() {
        let mut tree = Tree::new(b"/".to_vec(), 0);
        let root = tree.root;
        let file = tree.insert_child(
            root,
            crate::model::Entry {
                name: b"data.bin".to_vec(),
                size: 4096,
                blocks: 8,
                dev_id: 0,
                next: None,
                parent: None,
                ext: None,
                kind: EntryKind::File(FileFlags::default()),
                is_root: false,
            },
        );
        assert_eq!(tree.get(file).size, 4096);

        let mut buf = Vec::new();
        let meta = DumpMetadata { progname: "rsdu".into(), progver: "0.1.0".into(), timestamp: 0 };
        export_tree(&tree, &mut buf, meta).unwrap();
        let s = String::from_utf8(buf).unwrap();
        assert!(s.contains("\"asize\":4096"));
        assert!(s.contains(&format!("\"dsize\":{}", 8 * crate::model::BLOCK_SIZE)));
    }

    #[test]
    fn export_emits_children_in_insertion_order() {
        let mut tree = Tree::new(b"/".to_vec(), 0);
        let root = tree.root;
        for name in ["a", "b", "c"] {
            tree.insert_child(
                root,
                crate::model::Entry {
                    name: name.as_bytes().to_vec(),
                    size: 0,
                    blocks: 0,
                    dev_id: 0,
                    next: None,
                    parent: None,
                    ext: None,
                    kind: EntryKind::File(FileFlags::default()),
                    is_root: false,
                },
            );
        }
        // `insert_child` pushes onto the head of the child list, so
        // `Tree::children` walks it back-to-front (c, b, a) — `write_children`
        // must reverse that to recover insertion order on the wire.
        let mut buf = Vec::new();
        let meta = DumpMetadata { progname: "rsdu".into(), progver: "0.1.0".into(), timestamp: 0 };
        export_tree(&tree, &mut buf, meta).unwrap();
        let s = String::from_utf8(buf).unwrap();
        let pos_a = s.find("\"name\":\"a\"").unwrap();
        let pos_b = s.find("\"name\":\"b\"").unwrap();
        let pos_c = s.find("\"name\":\"c\"").unwrap();
        assert!(pos_a < pos_b && pos_b < pos_c, "expected a, b, c order: {}", s);
    }

    #[test]
    fn non_utf8_name_byte_survives_verbatim() {
        let mut buf = Vec::new();
        let meta = DumpMetadata {
            progname: "rsdu".into(),
            progver: "0.1.0".into(),
            timestamp: 0,
        };
        let mut out = JsonExporter::new(&mut buf, meta).unwrap();
        out.open_root(&[0x2f, 0xe9, 0x80], None).unwrap();
        out.close_root().unwrap();
        out.finish().unwrap();
        assert!(buf.contains(&0xe9));
    }
}
