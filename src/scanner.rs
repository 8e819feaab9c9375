//! Core scanning engine.
//!
//! Implements the live-filesystem side of the scanning/indexing core: the
//! path buffer (§4.1), the scan context and its two sinks — an in-memory
//! `Tree` or a streaming dump writer (§4.2) — the exclusion engine (§4.4),
//! the per-directory-file-descriptor walker (§4.5), and the `ScanDir`
//! refresh merger (§4.6). Hardlink accounting (§4.3) lives here too,
//! since only the memory sink needs it: the dump format stores a link's
//! own (un-divided) `asize`/`dsize`, so a scan that streams straight to a
//! writer never needs the two-phase table at all (see `export.rs`).
//!
//! `scan_root` and `refresh_subtree` share one walker. A fresh scan is
//! just a refresh against a brand-new, childless directory: `ScanDir`'s
//! "existing children" table is empty, so every fresh entry takes the
//! "not found, insert" branch and the merge logic degenerates to plain
//! insertion for free.

use crate::config::Config;
use crate::error::{Result, RsduError};
use crate::model::{DeviceId, Entry, EntryId, EntryKind, Ext, FileFlags, LinkInfo, Tree};
use chrono::{DateTime, Utc};
use nix::dir::Dir;
use nix::fcntl::{openat, OFlag};
use nix::sys::stat::{fstatat, FileStat, Mode};
use nix::sys::statfs::fstatfs;
use nix::unistd::{close, read};
use std::collections::HashMap;
use std::io::Write;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;

/// `statfs` magic numbers for the pseudo-filesystems the exclusion
/// engine is allowed to recognize (§4.4.5). Kept as raw constants
/// rather than relying on every one of these existing as a named
/// constant in whichever `nix` version is in the lockfile.
const KERNFS_MAGICS: &[i64] = &[
    0x9fa0,      // PROC_SUPER_MAGIC
    0x6265_6572, // SYSFS_MAGIC
    0x0027_e0eb, // CGROUP_SUPER_MAGIC
    0x6367_7270, // CGROUP2_SUPER_MAGIC
    0x6462_6720, // DEBUGFS_MAGIC
    0x1cd1,      // DEVPTS_SUPER_MAGIC
    0x4249_4e4d, // BINFMTFS_MAGIC
    (0xcafe_4a11u32 as i32) as i64, // BPF_FS_MAGIC
    0x6165_676c, // PSTOREFS_MAGIC
    0x7363_6673, // SECURITYFS_MAGIC
    (0xf97c_ff8cu32 as i32) as i64, // SELINUX_MAGIC
    0x7472_6163, // TRACEFS_MAGIC
];

const CACHEDIR_TAG_NAME: &str = "CACHEDIR.TAG";
const CACHEDIR_TAG_SIGNATURE: &[u8; 43] =
    b"Signature: 8a477f597d28d172789f06886806bc55";

/// Core-internal, validated projection of `Config` (§6 "Configuration
/// inputs"): compiled glob patterns and the handful of scan-behavior
/// flags the walker actually consults.
pub struct ScanOptions {
    pub same_fs: bool,
    pub follow_symlinks: bool,
    pub exclude_kernfs: bool,
    pub exclude_caches: bool,
    pub exclude_patterns: Vec<glob::Pattern>,
    pub extended: bool,
}

impl ScanOptions {
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut exclude_patterns = Vec::with_capacity(config.exclude_patterns.len());
        for pattern in &config.exclude_patterns {
            let compiled = glob::Pattern::new(pattern).map_err(|e| {
                RsduError::ConfigError(format!("invalid exclude pattern '{}': {}", pattern, e))
            })?;
            exclude_patterns.push(compiled);
        }
        Ok(Self {
            same_fs: config.same_fs,
            follow_symlinks: config.follow_symlinks,
            exclude_kernfs: config.exclude_kernfs,
            exclude_caches: config.exclude_caches,
            exclude_patterns,
            extended: config.extended,
        })
    }
}

/// Stack of slash-joined name segments with O(1) push/pop (§4.1). Also
/// the scan's "current path", used for error reporting and progress
/// display.
pub struct ScanPath {
    buf: Vec<u8>,
    offsets: Vec<usize>,
}

impl ScanPath {
    pub fn new(root: &[u8]) -> Self {
        Self {
            buf: root.to_vec(),
            offsets: Vec::new(),
        }
    }

    pub fn push(&mut self, name: &[u8]) {
        self.offsets.push(self.buf.len());
        if !self.buf.is_empty() {
            self.buf.push(b'/');
        }
        self.buf.extend_from_slice(name);
    }

    pub fn pop(&mut self) {
        if let Some(offset) = self.offsets.pop() {
            self.buf.truncate(offset);
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn display(&self) -> String {
        String::from_utf8_lossy(&self.buf).into_owned()
    }
}

/// Called once per entry by the walker, and once per 1024 entries by
/// the importer (§5). The implementation drains terminal input, redraws
/// the scan-progress screen, and may ask the scan to stop. Cancellation
/// only takes effect between entries — in-flight syscalls are not
/// interrupted.
pub trait ScanObserver {
    fn tick(&mut self, current_path: &str, items_seen: u64) -> bool;
}

pub struct NullObserver;

impl ScanObserver for NullObserver {
    fn tick(&mut self, _current_path: &str, _items_seen: u64) -> bool {
        false
    }
}

/// Transient `(dev, ino) -> observed count / occurrences` table (§3
/// "Link-count table"), drained once at the end of a scan or refresh.
struct LinkBucket {
    nlink: u32,
    size: u64,
    blocks: u64,
    occurrences: Vec<(EntryId, EntryId)>, // (parent, link entry)
}

/// Bookkeeping shared by every recursive call of the walker within one
/// `scan_root`/`refresh_subtree` invocation.
struct WalkState<'a> {
    opts: &'a ScanOptions,
    link_table: HashMap<(u64, u64), LinkBucket>,
    kernfs_cache: HashMap<u64, bool>,
    items_seen: u64,
    last_error: Option<String>,
}

/// Per-directory merge table used during refresh to reconcile fresh
/// observations against existing children (§4.6). A fresh scan builds
/// one against an empty directory, so it always starts out empty and
/// every entry takes the "not found" branch.
struct ScanDir {
    remaining: HashMap<Vec<u8>, EntryId>,
}

impl ScanDir {
    fn new(tree: &Tree, dir: EntryId) -> Self {
        let mut remaining = HashMap::new();
        for child in tree.children(dir) {
            remaining.insert(tree.get(child).name.clone(), child);
        }
        Self { remaining }
    }

    fn take(&mut self, name: &[u8]) -> Option<EntryId> {
        self.remaining.remove(name)
    }

    /// Whatever is left was not re-observed this pass: gone from disk.
    fn finalize(self, tree: &mut Tree, parent: EntryId) {
        for (_, id) in self.remaining {
            tree.del_stats_rec(parent, id);
        }
    }
}

/// What the exclusion engine (§4.4) decided about one directory entry,
/// before the walker commits it to the tree.
enum Classified {
    /// Excluded/err/other_fs/kernfs — never recurses, contributes zero.
    /// `dev` is the entry's own device where known from a completed
    /// stat (other_fs), else the containing directory's (pattern
    /// exclusion and stat failure never learn the real device).
    Special(FileFlags, u64),
    /// Passed every check; here is the stat to build a real node from,
    /// plus whether hardlink classification is disabled for it (cross-
    /// device symlink target, §4.3 caveat).
    Stat { stat: FileStat, hardlink_ok: bool },
}

/// Run the exclusion engine (§4.4) and, if the entry survives, stat it.
fn classify(
    dir_fd: RawFd,
    name: &[u8],
    path: &ScanPath,
    dir_dev: u64,
    opts: &ScanOptions,
    state: &mut WalkState,
) -> Classified {
    // 1. Pattern exclusion, against the path and each trailing-suffix
    // rotation after a '/' (so `exclude=*.tmp` also matches a `.tmp`
    // directory several levels deep without an anchored pattern).
    let path_str = path.display();
    if matches_any_pattern(&path_str, &opts.exclude_patterns) {
        return Classified::Special(
            FileFlags {
                excluded: Some(crate::model::ExcludeReason::Pattern),
                ..Default::default()
            },
            dir_dev,
        );
    }

    // 2. Stat failure.
    let stat = match fstatat(dir_fd, name, nix::fcntl::AtFlags::AT_SYMLINK_NOFOLLOW) {
        Ok(st) => st,
        Err(e) => {
            state.last_error = Some(format!("{}: {}", path_str, e));
            return Classified::Special(
                FileFlags {
                    err: true,
                    ..Default::default()
                },
                dir_dev,
            );
        }
    };

    // 3. Same-filesystem.
    if opts.same_fs && stat.st_dev != dir_dev {
        return Classified::Special(
            FileFlags {
                other_fs: true,
                ..Default::default()
            },
            stat.st_dev as u64,
        );
    }

    // 4. Follow-symlinks.
    let is_symlink = (stat.st_mode & libc::S_IFMT as u32) == libc::S_IFLNK as u32;
    if opts.follow_symlinks && is_symlink {
        match fstatat(dir_fd, name, nix::fcntl::AtFlags::empty()) {
            Ok(target_stat) => {
                let target_is_dir = (target_stat.st_mode & libc::S_IFMT as u32) == libc::S_IFDIR as u32;
                if !target_is_dir {
                    let hardlink_ok = target_stat.st_dev == dir_dev;
                    return Classified::Stat {
                        stat: target_stat,
                        hardlink_ok,
                    };
                }
                // A symlink to a directory keeps its own lstat (so it
                // stays a `notreg` leaf, never recursed into) — only a
                // non-directory target's stat is adopted.
            }
            Err(_) => {
                // Dangling symlink target: fall back to the lstat result.
            }
        }
    }

    Classified::Stat {
        stat,
        hardlink_ok: true,
    }
}

fn matches_any_pattern(path: &str, patterns: &[glob::Pattern]) -> bool {
    if patterns.iter().any(|p| p.matches(path)) {
        return true;
    }
    // Trailing-suffix rotations after each '/'.
    let mut rest = path;
    while let Some(idx) = rest.find('/') {
        rest = &rest[idx + 1..];
        if patterns.iter().any(|p| p.matches(rest)) {
            return true;
        }
    }
    false
}

fn is_dir_mode(mode: u32) -> bool {
    (mode & libc::S_IFMT as u32) == libc::S_IFDIR as u32
}

fn is_regular_mode(mode: u32) -> bool {
    (mode & libc::S_IFMT as u32) == libc::S_IFREG as u32
}

fn ext_from_stat(stat: &FileStat) -> Ext {
    let mtime = DateTime::<Utc>::from_timestamp(stat.st_mtime, stat.st_mtime_nsec as u32)
        .unwrap_or_else(|| DateTime::<Utc>::from_timestamp(0, 0).unwrap());
    Ext {
        uid: stat.st_uid,
        gid: stat.st_gid,
        mode: stat.st_mode,
        mtime,
    }
}

/// Read the first 43 bytes of `CACHEDIR.TAG` relative to an open
/// directory fd and compare against the fixed signature (§4.4.6). A
/// short read (file missing or shorter than the signature) never
/// matches.
fn has_cachedir_tag(dir_fd: RawFd) -> bool {
    match openat(dir_fd, CACHEDIR_TAG_NAME, OFlag::O_RDONLY, Mode::empty()) {
        Ok(fd) => {
            let mut buf = [0u8; 43];
            let mut total = 0usize;
            loop {
                match read(fd, &mut buf[total..]) {
                    Ok(0) => break,
                    Ok(n) => {
                        total += n;
                        if total == buf.len() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
            let _ = close(fd);
            total == buf.len() && buf.as_slice() == CACHEDIR_TAG_SIGNATURE.as_slice()
        }
        Err(_) => false,
    }
}

/// `statfs` magic classification, cached per raw device id (§4.4.5).
fn is_kernfs(dir: &Dir, dev: u64, cache: &mut HashMap<u64, bool>) -> bool {
    if let Some(&cached) = cache.get(&dev) {
        return cached;
    }
    let result = fstatfs(dir)
        .map(|sfs| KERNFS_MAGICS.contains(&sfs.filesystem_type().0))
        .unwrap_or(false);
    cache.insert(dev, result);
    result
}

/// Open a subdirectory relative to `parent_fd` with `O_NOFOLLOW` so a
/// symlink swapped in for a directory between `lstat` and `open` cannot
/// be followed (§4.5).
fn open_subdir(parent_fd: RawFd, name: &[u8]) -> std::result::Result<Dir, nix::Error> {
    Dir::openat(
        parent_fd,
        name,
        OFlag::O_RDONLY | OFlag::O_DIRECTORY | OFlag::O_NOFOLLOW | OFlag::O_NONBLOCK,
        Mode::empty(),
    )
}

/// Recursively walk one already-open directory into `tree` under
/// `dir_id`, reconciling against its existing children (§4.5, §4.6).
fn walk_dir_memory(
    tree: &mut Tree,
    dir_id: EntryId,
    handle: Dir,
    dir_dev: u64,
    path: &mut ScanPath,
    state: &mut WalkState,
    observer: &mut dyn ScanObserver,
) {
    let raw_fd = handle.as_raw_fd();
    let mut merger = ScanDir::new(tree, dir_id);
    let mut aborted = false;

    for entry in handle {
        if aborted {
            break;
        }
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tree.set_dir_err(dir_id, true);
                state.last_error = Some(format!("{}: {}", path.display(), e));
                continue;
            }
        };
        let raw_name = entry.file_name().to_bytes();
        if raw_name == b"." || raw_name == b".." {
            continue;
        }
        let name = raw_name.to_vec();

        path.push(&name);
        state.items_seen += 1;
        if observer.tick(&path.display(), state.items_seen) {
            aborted = true;
            path.pop();
            break;
        }

        match classify(raw_fd, &name, path, dir_dev, state.opts, state) {
            Classified::Special(flags, dev) => {
                upsert_special(tree, &mut merger, dir_id, name, dev, flags, None);
            }
            Classified::Stat { stat, hardlink_ok } => {
                if is_dir_mode(stat.st_mode) {
                    handle_subdir(tree, &mut merger, dir_id, name, raw_fd, stat, path, state, observer);
                } else {
                    upsert_leaf(tree, &mut merger, dir_id, name, stat, hardlink_ok, state);
                }
            }
        }

        path.pop();
    }

    merger.finalize(tree, dir_id);
}

/// Handle a child that stat'd as a directory: open it, run the kernfs
/// and cache-tag checks that require an open fd, reconcile against any
/// existing dir of the same name, and recurse.
#[allow(clippy::too_many_arguments)]
fn handle_subdir(
    tree: &mut Tree,
    merger: &mut ScanDir,
    parent: EntryId,
    name: Vec<u8>,
    parent_fd: RawFd,
    stat: FileStat,
    path: &mut ScanPath,
    state: &mut WalkState,
    observer: &mut dyn ScanObserver,
) {
    let child_dev = stat.st_dev as u64;
    let handle = match open_subdir(parent_fd, &name) {
        Ok(h) => h,
        Err(e) => {
            state.last_error = Some(format!("{}: {}", path.display(), e));
            upsert_special(
                tree,
                merger,
                parent,
                name,
                child_dev,
                FileFlags {
                    err: true,
                    ..Default::default()
                },
                None,
            );
            return;
        }
    };

    if state.opts.exclude_kernfs && is_kernfs(&handle, child_dev, &mut state.kernfs_cache) {
        upsert_special(
            tree,
            merger,
            parent,
            name,
            child_dev,
            FileFlags {
                kernfs: true,
                ..Default::default()
            },
            None,
        );
        return;
    }

    if state.opts.exclude_caches && has_cachedir_tag(handle.as_raw_fd()) {
        upsert_special(
            tree,
            merger,
            parent,
            name,
            child_dev,
            FileFlags {
                excluded: Some(crate::model::ExcludeReason::Pattern),
                ..Default::default()
            },
            None,
        );
        return;
    }

    let ext = state.opts.extended.then(|| ext_from_stat(&stat));
    let dev_id = tree.devices.intern(child_dev);

    let dir_id = match merger.take(&name) {
        Some(old) if matches!(tree.get(old).kind, EntryKind::Dir(_)) && tree.get(old).dev_id == dev_id => {
            if let Some(ext) = ext {
                merge_ext(tree, old, ext);
            }
            old
        }
        Some(old) => {
            tree.del_stats_rec(parent, old);
            new_dir_entry(tree, parent, name, dev_id, ext)
        }
        None => new_dir_entry(tree, parent, name, dev_id, ext),
    };

    walk_dir_memory(tree, dir_id, handle, child_dev, path, state, observer);
}

fn new_dir_entry(tree: &mut Tree, parent: EntryId, name: Vec<u8>, dev_id: DeviceId, ext: Option<Ext>) -> EntryId {
    let entry = Entry {
        name,
        size: 0,
        blocks: 0,
        dev_id,
        next: None,
        parent: None,
        ext,
        is_root: false,
        kind: EntryKind::Dir(crate::model::DirInfo::default()),
    };
    tree.insert_child(parent, entry)
}

fn merge_ext(tree: &mut Tree, id: EntryId, new_ext: Ext) {
    let entry = tree.get_mut(id);
    entry.ext = merge_ext_values(entry.ext, Some(new_ext));
}

/// Reconcile a refreshed entry's extended metadata with what was already
/// recorded, keeping the later of the two `mtime`s as a monotone-clock
/// guard against a filesystem whose clock stepped backward (§4.6).
fn merge_ext_values(old: Option<Ext>, new: Option<Ext>) -> Option<Ext> {
    match (old, new) {
        (Some(o), Some(n)) if o.mtime > n.mtime => Some(Ext { mtime: o.mtime, ..n }),
        (_, Some(n)) => Some(n),
        (old, None) => old,
    }
}

/// Insert or reconcile a special (excluded/err/other_fs/kernfs)
/// placeholder. §4.6's optimization: if the name previously held a
/// plain `File` special, the node is reused in place instead of
/// unlinked and reallocated.
fn upsert_special(
    tree: &mut Tree,
    merger: &mut ScanDir,
    parent: EntryId,
    name: Vec<u8>,
    dev: u64,
    flags: FileFlags,
    ext: Option<Ext>,
) -> EntryId {
    let dev_id = tree.devices.intern(dev);
    if let Some(old) = merger.take(&name) {
        if matches!(tree.get(old).kind, EntryKind::File(_)) {
            let was_err = matches!(tree.get(old).kind, EntryKind::File(f) if f.err);
            tree.update_leaf_stats(parent, old, 0, 0);
            let e = tree.get_mut(old);
            e.dev_id = dev_id;
            e.ext = ext.or(e.ext);
            e.kind = EntryKind::File(flags);
            tree.fixup_err_delta(parent, was_err, flags.err);
            return old;
        }
        tree.del_stats_rec(parent, old);
    }
    let entry = Entry {
        name,
        size: 0,
        blocks: 0,
        dev_id,
        next: None,
        parent: None,
        ext,
        is_root: false,
        kind: EntryKind::File(flags),
    };
    tree.insert_child(parent, entry)
}

/// Insert or reconcile a non-directory leaf: a plain file, or a file
/// whose `nlink > 1` classifies it as a hardlink (§4.3), unless the
/// follow-symlinks cross-device caveat disabled that classification.
fn upsert_leaf(
    tree: &mut Tree,
    merger: &mut ScanDir,
    parent: EntryId,
    name: Vec<u8>,
    stat: FileStat,
    hardlink_ok: bool,
    state: &mut WalkState,
) {
    let dev = stat.st_dev as u64;
    let ino = stat.st_ino as u64;
    let nlink = stat.st_nlink as u32;
    let size = stat.st_size as u64;
    let blocks = stat.st_blocks.max(0) as u64;
    let dev_id = tree.devices.intern(dev);
    let ext = state.opts.extended.then(|| ext_from_stat(&stat));
    let is_link = hardlink_ok && nlink > 1 && !is_dir_mode(stat.st_mode);
    let notreg = !is_regular_mode(stat.st_mode) && !is_dir_mode(stat.st_mode);

    let existing = merger.take(&name);

    if is_link {
        // Discard any prior node under this name unconditionally: link
        // reconciliation is handled by the hardlink table rather than
        // by an in-place match, since the table needs to see every
        // occurrence exactly once per scan regardless of refresh state.
        if let Some(old) = existing {
            tree.del_stats_rec(parent, old);
        }
        let entry = Entry {
            name,
            size,
            blocks,
            dev_id,
            next: None,
            parent: None,
            ext,
            is_root: false,
            kind: EntryKind::Link(LinkInfo { ino, nlink }),
        };
        let id = tree.insert_link(parent, entry);
        let bucket = state
            .link_table
            .entry((dev, ino))
            .or_insert_with(|| LinkBucket {
                nlink,
                size,
                blocks,
                occurrences: Vec::new(),
            });
        bucket.occurrences.push((parent, id));
        return;
    }

    let flags = FileFlags {
        notreg,
        ..Default::default()
    };

    if let Some(old) = existing {
        let same = {
            let e = tree.get(old);
            matches!(&e.kind, EntryKind::File(f) if f.excluded.is_none() && !f.err) && e.dev_id == dev_id
        };
        if same {
            tree.update_leaf_stats(parent, old, size, blocks);
            let was_err = matches!(tree.get(old).kind, EntryKind::File(f) if f.err);
            let e = tree.get_mut(old);
            e.ext = merge_ext_values(e.ext, ext);
            e.kind = EntryKind::File(flags);
            tree.fixup_err_delta(parent, was_err, false);
            return;
        }
        tree.del_stats_rec(parent, old);
    }

    let entry = Entry {
        name,
        size,
        blocks,
        dev_id,
        next: None,
        parent: None,
        ext,
        is_root: false,
        kind: EntryKind::File(flags),
    };
    tree.insert_child(parent, entry);
}

/// Drain the link table (§4.3 "Finalize"): add each occurrence's
/// `size/nlink`, `blocks/nlink` share to every ancestor of its parent.
fn finalize_hardlinks(tree: &mut Tree, link_table: HashMap<(u64, u64), LinkBucket>) {
    for (_, bucket) in link_table {
        let n = bucket.nlink.max(1) as u64;
        let (share_size, share_blocks) = (bucket.size / n, bucket.blocks / n);
        for (parent, _id) in bucket.occurrences {
            tree.add_stats(parent, share_size, share_blocks, 0);
        }
    }
}

/// Resolve `path` to an absolute form on a best-effort basis (§6
/// `scan_root`): if canonicalization fails (e.g. a dangling final
/// component that's about to be created isn't our concern here, since
/// the root itself must already exist) the original path is kept.
fn best_effort_absolute(path: &Path) -> std::path::PathBuf {
    path.canonicalize().unwrap_or_else(|_| {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(path))
                .unwrap_or_else(|_| path.to_path_buf())
        }
    })
}

/// Entry point §6 `scan_root(path, writer_or_null)`, memory-sink form:
/// resolves `path`, stats it, rejects non-directories, and walks it
/// into a freshly created `Tree`.
pub fn scan_root(
    path: &Path,
    opts: &ScanOptions,
    observer: &mut dyn ScanObserver,
) -> Result<Tree> {
    use std::os::unix::ffi::OsStrExt;

    let abs_path = best_effort_absolute(path);
    let root_stat = fstatat(
        libc::AT_FDCWD,
        abs_path.as_path(),
        nix::fcntl::AtFlags::AT_SYMLINK_NOFOLLOW,
    )
    .map_err(|e| RsduError::scan_error(abs_path.clone(), format!("cannot stat root: {}", e)))?;

    if !is_dir_mode(root_stat.st_mode) {
        return Err(RsduError::invalid_path(abs_path, "not a directory"));
    }

    let root_dev = root_stat.st_dev as u64;
    let root_name = abs_path.as_os_str().as_bytes().to_vec();
    let root_name = if root_name.is_empty() { b"/".to_vec() } else { root_name };

    let mut tree = Tree::new(root_name.clone(), 0);
    let root_dev_id = tree.devices.intern(root_dev);
    tree.get_mut(tree.root).dev_id = root_dev_id;
    if opts.extended {
        tree.get_mut(tree.root).ext = Some(ext_from_stat(&root_stat));
    }

    let handle = Dir::open(
        &abs_path,
        OFlag::O_RDONLY | OFlag::O_DIRECTORY,
        Mode::empty(),
    )
    .map_err(|e| RsduError::scan_error(abs_path.clone(), format!("cannot open root: {}", e)))?;

    let mut state = WalkState {
        opts,
        link_table: HashMap::new(),
        kernfs_cache: HashMap::new(),
        items_seen: 0,
        last_error: None,
    };
    let mut path_buf = ScanPath::new(&root_name);
    let root_id = tree.root;

    walk_dir_memory(&mut tree, root_id, handle, root_dev, &mut path_buf, &mut state, observer);
    finalize_hardlinks(&mut tree, state.link_table);

    Ok(tree)
}

/// Entry point §6 `refresh_subtree(parents)`: re-walks an already
/// in-memory directory (identified by its ancestor chain) against the
/// live filesystem, reconciling via `ScanDir` (§4.6). `parents` must
/// name an existing directory entry; its own aggregates are left
/// untouched if the directory can no longer be opened (conservative
/// preservation of prior totals, per §3's invariant note on refresh).
pub fn refresh_subtree(
    tree: &mut Tree,
    dir_id: EntryId,
    opts: &ScanOptions,
    observer: &mut dyn ScanObserver,
) -> Result<()> {
    let full_path = tree.full_path(dir_id);
    let dir_dev = tree.get(dir_id).dev_id;
    let dir_dev_raw = tree.devices.raw(dir_dev);

    let handle = match Dir::open(&full_path, OFlag::O_RDONLY | OFlag::O_DIRECTORY, Mode::empty()) {
        Ok(h) => h,
        Err(e) => {
            return Err(RsduError::scan_error(
                full_path,
                format!("cannot reopen directory for refresh: {}", e),
            ));
        }
    };

    let mut state = WalkState {
        opts,
        link_table: HashMap::new(),
        kernfs_cache: HashMap::new(),
        items_seen: 0,
        last_error: None,
    };
    let root_name = full_path.as_os_str();
    use std::os::unix::ffi::OsStrExt;
    let mut path_buf = ScanPath::new(root_name.as_bytes());

    walk_dir_memory(tree, dir_id, handle, dir_dev_raw, &mut path_buf, &mut state, observer);
    finalize_hardlinks(tree, state.link_table);

    Ok(())
}

/// Streaming scan-to-dump: walks the filesystem and writes the dump
/// format directly (§4.2 "File sink", §4.9), never materializing a
/// `Tree`. No hardlink bookkeeping is needed here — see module docs.
pub fn scan_root_to_writer<W: Write>(
    path: &Path,
    opts: &ScanOptions,
    writer: W,
    metadata: crate::export::DumpMetadata,
    observer: &mut dyn ScanObserver,
) -> Result<()> {
    use std::os::unix::ffi::OsStrExt;

    let abs_path = best_effort_absolute(path);
    let root_stat = fstatat(
        libc::AT_FDCWD,
        abs_path.as_path(),
        nix::fcntl::AtFlags::AT_SYMLINK_NOFOLLOW,
    )
    .map_err(|e| RsduError::scan_error(abs_path.clone(), format!("cannot stat root: {}", e)))?;
    if !is_dir_mode(root_stat.st_mode) {
        return Err(RsduError::invalid_path(abs_path, "not a directory"));
    }
    let root_dev = root_stat.st_dev as u64;

    let handle = Dir::open(&abs_path, OFlag::O_RDONLY | OFlag::O_DIRECTORY, Mode::empty())
        .map_err(|e| RsduError::scan_error(abs_path.clone(), format!("cannot open root: {}", e)))?;

    let mut out = crate::export::JsonExporter::new(writer, metadata)?;
    out.open_root(&abs_path.as_os_str().as_bytes().to_vec(), opts.extended.then(|| ext_from_stat(&root_stat)))?;

    let mut state = WalkState {
        opts,
        link_table: HashMap::new(),
        kernfs_cache: HashMap::new(),
        items_seen: 0,
        last_error: None,
    };
    let mut path_buf = ScanPath::new(abs_path.as_os_str().as_bytes());
    walk_dir_writer(&mut out, handle, root_dev, &mut path_buf, &mut state, observer)?;
    out.close_root()?;
    out.finish()
}

fn walk_dir_writer(
    out: &mut crate::export::JsonExporter<impl Write>,
    handle: Dir,
    dir_dev: u64,
    path: &mut ScanPath,
    state: &mut WalkState,
    observer: &mut dyn ScanObserver,
) -> Result<()> {
    let raw_fd = handle.as_raw_fd();
    for entry in handle {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                state.last_error = Some(format!("{}: {}", path.display(), e));
                continue;
            }
        };
        let raw_name = entry.file_name().to_bytes();
        if raw_name == b"." || raw_name == b".." {
            continue;
        }
        let name = raw_name.to_vec();
        path.push(&name);
        state.items_seen += 1;
        if observer.tick(&path.display(), state.items_seen) {
            path.pop();
            break;
        }

        match classify(raw_fd, &name, path, dir_dev, state.opts, state) {
            Classified::Special(flags, dev) => {
                out.write_special(&name, dir_dev, dev, flags)?;
            }
            Classified::Stat { stat, hardlink_ok } => {
                if is_dir_mode(stat.st_mode) {
                    match open_subdir(raw_fd, &name) {
                        Ok(child_handle) => {
                            let child_dev = stat.st_dev as u64;
                            if state.opts.exclude_kernfs
                                && is_kernfs(&child_handle, child_dev, &mut state.kernfs_cache)
                            {
                                out.write_special(
                                    &name,
                                    dir_dev,
                                    child_dev,
                                    FileFlags {
                                        kernfs: true,
                                        ..Default::default()
                                    },
                                )?;
                            } else if state.opts.exclude_caches
                                && has_cachedir_tag(child_handle.as_raw_fd())
                            {
                                out.write_special(
                                    &name,
                                    dir_dev,
                                    child_dev,
                                    FileFlags {
                                        excluded: Some(crate::model::ExcludeReason::Pattern),
                                        ..Default::default()
                                    },
                                )?;
                            } else {
                                let ext = state.opts.extended.then(|| ext_from_stat(&stat));
                                out.open_dir(&name, dir_dev, child_dev, ext)?;
                                walk_dir_writer(out, child_handle, child_dev, path, state, observer)?;
                                out.close_dir()?;
                            }
                        }
                        Err(e) => {
                            state.last_error = Some(format!("{}: {}", path.display(), e));
                            out.write_special(
                                &name,
                                dir_dev,
                                dir_dev,
                                FileFlags {
                                    err: true,
                                    ..Default::default()
                                },
                            )?;
                        }
                    }
                } else {
                    let ext = state.opts.extended.then(|| ext_from_stat(&stat));
                    out.write_leaf(&name, dir_dev, &stat, hardlink_ok, ext)?;
                }
            }
        }
        path.pop();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_buffer_push_pop_round_trips() {
        let mut p = ScanPath::new(b"/tmp");
        p.push(b"a");
        assert_eq!(p.as_bytes(), b"/tmp/a");
        p.push(b"b");
        assert_eq!(p.as_bytes(), b"/tmp/a/b");
        p.pop();
        assert_eq!(p.as_bytes(), b"/tmp/a");
        p.pop();
        assert_eq!(p.as_bytes(), b"/tmp");
    }

    #[test]
    fn pattern_matching_checks_trailing_rotations() {
        let patterns = vec![glob::Pattern::new("*.tmp").unwrap()];
        assert!(matches_any_pattern("/a/b/drop.tmp", &patterns));
        assert!(!matches_any_pattern("/a/b/keep.txt", &patterns));
    }

    #[test]
    fn scan_options_rejects_invalid_glob() {
        let mut config = Config::default();
        config.exclude_patterns.push("[".to_string());
        assert!(ScanOptions::from_config(&config).is_err());
    }

    #[test]
    fn scan_root_walks_an_empty_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let opts = ScanOptions::from_config(&Config::default()).unwrap();
        let tree = scan_root(dir.path(), &opts, &mut NullObserver).unwrap();
        let root = tree.get(tree.root);
        assert!(root.is_dir());
        assert_eq!(dir_items(root), 0);
    }

    #[test]
    fn scan_root_counts_files_and_subdirectories() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"world!").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("c.txt"), b"nested").unwrap();

        let opts = ScanOptions::from_config(&Config::default()).unwrap();
        let tree = scan_root(dir.path(), &opts, &mut NullObserver).unwrap();
        let root = tree.get(tree.root);
        assert_eq!(dir_items(root), 3);
        assert!(root.size >= (5 + 6 + 6));
    }

    #[test]
    fn refresh_subtree_picks_up_files_added_after_the_initial_scan() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();

        let opts = ScanOptions::from_config(&Config::default()).unwrap();
        let mut tree = scan_root(dir.path(), &opts, &mut NullObserver).unwrap();
        assert_eq!(dir_items(tree.get(tree.root)), 1);

        std::fs::write(dir.path().join("b.txt"), b"world").unwrap();
        refresh_subtree(&mut tree, tree.root, &opts, &mut NullObserver).unwrap();
        assert_eq!(dir_items(tree.get(tree.root)), 2);
    }

    #[test]
    fn refresh_subtree_drops_files_removed_after_the_initial_scan() {
        let dir = tempfile::TempDir::new().unwrap();
        let victim = dir.path().join("gone.txt");
        std::fs::write(&victim, b"temporary").unwrap();

        let opts = ScanOptions::from_config(&Config::default()).unwrap();
        let mut tree = scan_root(dir.path(), &opts, &mut NullObserver).unwrap();
        assert_eq!(dir_items(tree.get(tree.root)), 1);

        std::fs::remove_file(&victim).unwrap();
        refresh_subtree(&mut tree, tree.root, &opts, &mut NullObserver).unwrap();
        assert_eq!(dir_items(tree.get(tree.root)), 0);
    }

    fn dir_items(entry: &Entry) -> u64 {
        match &entry.kind {
            EntryKind::Dir(d) => d.items,
            _ => panic!("expected a directory entry"),
        }
    }
}
