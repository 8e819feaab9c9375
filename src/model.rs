//! In-memory tree model
//!
//! An arena of entries addressed by small integer ids (`EntryId`) rather
//! than a graph of `Arc`/`Weak` pointers. Children of a directory form a
//! singly linked list through `Entry::next`, with the parent's `sub`
//! pointing at the head; insertion pushes new children onto the head
//! (O(1), and the list's order carries no meaning beyond that the UI
//! re-sorts for display). Nodes are never freed individually: removing a
//! subtree (refresh discovering a deleted child) unlinks it from its
//! parent and subtracts its cached totals from ancestors, but the nodes
//! stay allocated in the arena as garbage until the whole `Tree` drops.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Index into `Tree::entries`. Never recycled.
pub type EntryId = u32;

/// Interned `dev_t` value, small enough to put on every entry without
/// inflating it to store a full 64-bit device number each time.
pub type DeviceId = u32;

/// Block size used to turn `st_blocks` (always 512-byte units on Linux)
/// into the `dsize` our dump format persists.
pub const BLOCK_SIZE: u64 = 512;

/// Reason an entry was excluded from recursion (and, for files, from
/// contributing to any total).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExcludeReason {
    /// Matched a user-supplied glob/exclude pattern.
    Pattern,
    /// Pruned by `--one-file-system` (crosses a device boundary).
    OtherFs,
    /// A known pseudo/virtual filesystem (procfs, sysfs, cgroup, ...).
    KernFs,
}

/// uid/gid/mode/mtime, collected only when extended info was requested.
#[derive(Debug, Clone, Copy)]
pub struct Ext {
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    pub mtime: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DirInfo {
    /// Head of this directory's child list, most-recently-inserted first.
    pub sub: Option<EntryId>,
    /// Count of all entries contained anywhere under this directory
    /// (not counting itself), maintained incrementally.
    pub items: u64,
    /// This directory's own listing (opendir/readdir) failed.
    own_listing_failed: bool,
    /// Count of direct children that are `err`-special files (a child
    /// that individually failed to stat). `err(d)` is true iff this is
    /// nonzero or `own_listing_failed` is set — it never looks past
    /// direct children.
    err_child_count: u32,
    /// Count of strict descendants, at any depth, with their own `err`
    /// set. Kept as a count (not a bool) so unrelated siblings can come
    /// and go during a refresh without a false clear.
    suberr_count: u32,
}

impl DirInfo {
    /// A freshly discovered, empty directory: no children, no faults.
    pub fn new() -> Self {
        DirInfo {
            sub: None,
            items: 0,
            own_listing_failed: false,
            err_child_count: 0,
            suberr_count: 0,
        }
    }

    /// "At least one direct child of this dir failed to be listed or
    /// stat'd, or this dir's own listing failed."
    pub fn err(&self) -> bool {
        self.own_listing_failed || self.err_child_count > 0
    }

    /// "Some strict descendant, at any depth, has `err`."
    pub fn suberr(&self) -> bool {
        self.suberr_count > 0
    }
}

impl Default for DirInfo {
    fn default() -> Self {
        Self::new()
    }
}

/// Flags for a non-directory, non-hardlinked entry: ordinary files,
/// excluded placeholders, and the `notreg`/`err` specials that never
/// recurse and never contribute size.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileFlags {
    /// Not a regular file (device node, fifo, socket, ...); size forced
    /// to zero regardless of what `stat` reported.
    pub notreg: bool,
    /// Pruned because it lives on a different filesystem.
    pub other_fs: bool,
    /// Pruned because its containing directory turned out to be a
    /// pseudo/virtual filesystem.
    pub kernfs: bool,
    /// Set when this entry was excluded from recursion.
    pub excluded: Option<ExcludeReason>,
    /// `stat`/`lstat` on this entry failed; size/blocks are zero.
    pub err: bool,
}

/// A file with `nlink > 1` that isn't a directory. Its own `size`/`blocks`
/// hold the full (un-divided) `stat` values; aggregation into ancestor
/// totals divides by `nlink`, applied once per observed occurrence.
#[derive(Debug, Clone, Copy)]
pub struct LinkInfo {
    pub ino: u64,
    pub nlink: u32,
}

#[derive(Debug, Clone)]
pub enum EntryKind {
    Dir(DirInfo),
    File(FileFlags),
    Link(LinkInfo),
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub name: Vec<u8>,
    /// Own apparent size for File/Link; recomputed aggregate for Dir.
    pub size: u64,
    /// Own block count (512-byte units) for File/Link; aggregate for Dir.
    pub blocks: u64,
    pub dev_id: DeviceId,
    pub next: Option<EntryId>,
    pub parent: Option<EntryId>,
    pub ext: Option<Ext>,
    pub kind: EntryKind,
    pub is_root: bool,
}

impl Entry {
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, EntryKind::Dir(_))
    }

    pub fn is_link(&self) -> bool {
        matches!(self.kind, EntryKind::Link(_))
    }

    pub fn excluded(&self) -> Option<ExcludeReason> {
        match &self.kind {
            EntryKind::File(f) => f.excluded,
            _ => None,
        }
    }

    /// Lossy UTF-8 view of `name`, for display only — never used on a
    /// path that round-trips back to the filesystem or a dump.
    pub fn name_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.name)
    }
}

/// Interns raw device numbers to small ids so every entry can carry one
/// cheaply; only needed for export (`dev` key) and same-filesystem
/// checks, so the reverse table is the only place the real `dev_t` lives.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    forward: HashMap<u64, DeviceId>,
    reverse: Vec<u64>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, dev: u64) -> DeviceId {
        if let Some(&id) = self.forward.get(&dev) {
            return id;
        }
        let id = self.reverse.len() as DeviceId;
        self.reverse.push(dev);
        self.forward.insert(dev, id);
        id
    }

    pub fn raw(&self, id: DeviceId) -> u64 {
        self.reverse[id as usize]
    }
}

/// The whole scanned/imported tree: an arena of entries plus the device
/// interning table. Contains no `Rc`/`Arc`/interior mutability, so a
/// complete `Tree` can be moved across a channel to a UI thread as a
/// plain value.
#[derive(Debug)]
pub struct Tree {
    entries: Vec<Entry>,
    pub devices: DeviceRegistry,
    pub root: EntryId,
}

impl Tree {
    /// Create a tree containing only the root directory entry.
    pub fn new(root_name: Vec<u8>, root_dev: DeviceId) -> Self {
        let root = Entry {
            name: root_name,
            size: 0,
            blocks: 0,
            dev_id: root_dev,
            next: None,
            parent: None,
            ext: None,
            is_root: true,
            kind: EntryKind::Dir(DirInfo {
                sub: None,
                items: 0,
                own_listing_failed: false,
                err_child_count: 0,
                suberr_count: 0,
            }),
        };
        Tree {
            entries: vec![root],
            devices: DeviceRegistry::new(),
            root: 0,
        }
    }

    pub fn get(&self, id: EntryId) -> &Entry {
        &self.entries[id as usize]
    }

    pub fn get_mut(&mut self, id: EntryId) -> &mut Entry {
        &mut self.entries[id as usize]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Allocate a new entry, returning its id. Does not link it into any
    /// parent's child list; call `link_child` for that.
    pub fn alloc(&mut self, entry: Entry) -> EntryId {
        let id = self.entries.len() as EntryId;
        self.entries.push(entry);
        id
    }

    /// Push `child` onto the head of `parent`'s child list.
    pub fn link_child(&mut self, parent: EntryId, child: EntryId) {
        let old_head = match &self.entries[parent as usize].kind {
            EntryKind::Dir(d) => d.sub,
            _ => panic!("link_child: parent is not a directory"),
        };
        self.entries[child as usize].next = old_head;
        self.entries[child as usize].parent = Some(parent);
        if let EntryKind::Dir(d) = &mut self.entries[parent as usize].kind {
            d.sub = Some(child);
        }
    }

    /// Remove `child` from `parent`'s child list without touching totals.
    fn unlink_child(&mut self, parent: EntryId, child: EntryId) {
        let mut cur = match &self.entries[parent as usize].kind {
            EntryKind::Dir(d) => d.sub,
            _ => None,
        };
        let mut prev: Option<EntryId> = None;
        while let Some(id) = cur {
            let next = self.entries[id as usize].next;
            if id == child {
                match prev {
                    Some(p) => self.entries[p as usize].next = next,
                    None => {
                        if let EntryKind::Dir(d) = &mut self.entries[parent as usize].kind {
                            d.sub = next;
                        }
                    }
                }
                self.entries[child as usize].next = None;
                return;
            }
            prev = Some(id);
            cur = next;
        }
    }

    /// Iterate over the ids of `id`'s direct children (dirs only).
    pub fn children(&self, id: EntryId) -> Children<'_> {
        let head = match &self.entries[id as usize].kind {
            EntryKind::Dir(d) => d.sub,
            _ => None,
        };
        Children {
            tree: self,
            next: head,
        }
    }

    /// Does this entry itself carry `err` (dir: own listing failed or a
    /// direct child failed; file: individual stat failure)? This is
    /// what a *strict descendant* needs to have set for `suberr` to fire
    /// on an ancestor — a dir whose fault is only `suberr` (inherited
    /// from deeper down) does not re-trigger by itself, but the
    /// descendant that originally set `err` still does, transitively.
    pub fn has_fault(&self, id: EntryId) -> bool {
        match &self.entries[id as usize].kind {
            EntryKind::Dir(d) => d.err() || d.suberr(),
            EntryKind::File(f) => f.err,
            EntryKind::Link(_) => false,
        }
    }

    fn is_err_special(&self, id: EntryId) -> bool {
        matches!(&self.entries[id as usize].kind, EntryKind::File(f) if f.err)
    }

    /// Add `dsize`/`dblocks`/`ditems` to `start` and every dir ancestor
    /// above it (inclusive). `start` must be a directory.
    pub fn add_stats(&mut self, start: EntryId, dsize: u64, dblocks: u64, ditems: u64) {
        let mut cur = Some(start);
        while let Some(id) = cur {
            let e = &mut self.entries[id as usize];
            debug_assert!(matches!(e.kind, EntryKind::Dir(_)));
            e.size = e.size.saturating_add(dsize);
            e.blocks = e.blocks.saturating_add(dblocks);
            if let EntryKind::Dir(d) = &mut e.kind {
                d.items = d.items.saturating_add(ditems);
            }
            cur = e.parent;
        }
    }

    /// Inverse of `add_stats`.
    pub fn del_stats(&mut self, start: EntryId, dsize: u64, dblocks: u64, ditems: u64) {
        let mut cur = Some(start);
        while let Some(id) = cur {
            let e = &mut self.entries[id as usize];
            debug_assert!(matches!(e.kind, EntryKind::Dir(_)));
            e.size = e.size.saturating_sub(dsize);
            e.blocks = e.blocks.saturating_sub(dblocks);
            if let EntryKind::Dir(d) = &mut e.kind {
                d.items = d.items.saturating_sub(ditems);
            }
            cur = e.parent;
        }
    }

    /// Propagate a `suberr` count delta (+1/-1) up through every dir
    /// ancestor starting at `start` (inclusive). `suberr` is "some
    /// strict descendant, at any depth, has `err`" — so it climbs all
    /// the way to the root, unlike `err` which only ever looks at
    /// direct children.
    fn propagate_suberr(&mut self, start: Option<EntryId>, delta: i32) {
        let mut cur = start;
        while let Some(id) = cur {
            let e = &mut self.entries[id as usize];
            if let EntryKind::Dir(d) = &mut e.kind {
                if delta > 0 {
                    d.suberr_count = d.suberr_count.saturating_add(delta as u32);
                } else {
                    d.suberr_count = d.suberr_count.saturating_sub((-delta) as u32);
                }
            }
            cur = e.parent;
        }
    }

    /// Set (or clear) a directory's own listing-failed flag, adjusting
    /// ancestor `suberr` counts if this flips the dir's fault status.
    /// Note this only ever affects the dir's *parent and up* — `err` on
    /// the dir itself is a direct, local flag with no further upward
    /// effect beyond feeding into ancestors' `suberr`.
    pub fn set_dir_err(&mut self, id: EntryId, value: bool) {
        let was = self.has_fault(id);
        if let EntryKind::Dir(d) = &mut self.entries[id as usize].kind {
            d.own_listing_failed = value;
        }
        let now = self.has_fault(id);
        if was != now {
            let parent = self.entries[id as usize].parent;
            self.propagate_suberr(parent, if now { 1 } else { -1 });
        }
    }

    /// Register a brand-new child under `parent`: link it in, account
    /// its own size/blocks/one item, and update `err`/`suberr` if it
    /// already carries a fault (a stat-failure placeholder, or — on
    /// import — a dir that already has descendants with `read_error`).
    ///
    /// Not for `Link` entries: their contribution to ancestor totals is
    /// `size/nlink`, deferred until the hardlink table is drained at the
    /// end of the scan. Use `insert_link` for those.
    pub fn insert_child(&mut self, parent: EntryId, child: Entry) -> EntryId {
        debug_assert!(!matches!(child.kind, EntryKind::Link(_)));
        let (size, blocks) = (child.size, child.blocks);
        let is_err_special = matches!(&child.kind, EntryKind::File(f) if f.err);
        let id = self.alloc(child);
        self.link_child(parent, id);
        self.add_stats(parent, size, blocks, 1);
        if is_err_special {
            if let EntryKind::Dir(d) = &mut self.entries[parent as usize].kind {
                d.err_child_count += 1;
            }
        }
        if self.has_fault(id) {
            self.propagate_suberr(Some(parent), 1);
        }
        id
    }

    /// Register a brand-new hardlinked-file child: link it in and count
    /// one item, but contribute nothing to ancestor size/blocks yet. The
    /// link's own `size`/`blocks` fields keep the full, un-divided
    /// `stat` values (for display); `finalize_hardlinks` adds the
    /// `size/nlink` share to every ancestor once the scan has observed
    /// all of this inode's occurrences.
    pub fn insert_link(&mut self, parent: EntryId, child: Entry) -> EntryId {
        debug_assert!(matches!(child.kind, EntryKind::Link(_)));
        let id = self.alloc(child);
        self.link_child(parent, id);
        self.add_stats(parent, 0, 0, 1);
        id
    }

    /// A link's current contribution to ancestor totals: `size/nlink`
    /// and `blocks/nlink`, truncated. Links never carry `err`, so this
    /// is also exactly what `del_stats_rec` must subtract to undo a
    /// prior `add_stats` call with the same divisor.
    fn link_share(&self, id: EntryId) -> (u64, u64) {
        match &self.entries[id as usize].kind {
            EntryKind::Link(l) => {
                let n = l.nlink.max(1) as u64;
                let e = &self.entries[id as usize];
                (e.size / n, e.blocks / n)
            }
            _ => unreachable!("link_share called on non-link entry"),
        }
    }

    /// Remove `id` (a direct child of `parent`) and everything under it
    /// from the tree's accounting in one shot, using its own cached
    /// totals rather than walking its subtree.
    pub fn del_stats_rec(&mut self, parent: EntryId, id: EntryId) {
        let (size, blocks, items_total, faulted, was_err_special) = {
            let e = &self.entries[id as usize];
            let items_total = match &e.kind {
                EntryKind::Dir(d) => d.items + 1,
                _ => 1,
            };
            let (size, blocks) = match &e.kind {
                EntryKind::Link(_) => self.link_share(id),
                _ => (e.size, e.blocks),
            };
            (
                size,
                blocks,
                items_total,
                self.has_fault(id),
                self.is_err_special(id),
            )
        };
        self.unlink_child(parent, id);
        self.del_stats(parent, size, blocks, items_total);
        if was_err_special {
            if let EntryKind::Dir(d) = &mut self.entries[parent as usize].kind {
                d.err_child_count = d.err_child_count.saturating_sub(1);
            }
        }
        if faulted {
            self.propagate_suberr(Some(parent), -1);
        }
    }

    /// After directly overwriting an existing child's flags in place
    /// (refresh's node-reuse path for specials, §4.6), fix up the
    /// parent's `err_child_count` and ancestor `suberr` counts if the
    /// child's fault status flipped between `was_err` and `is_err`.
    pub fn fixup_err_delta(&mut self, parent: EntryId, was_err: bool, is_err: bool) {
        if was_err == is_err {
            return;
        }
        if let EntryKind::Dir(d) = &mut self.entries[parent as usize].kind {
            if is_err {
                d.err_child_count += 1;
            } else {
                d.err_child_count = d.err_child_count.saturating_sub(1);
            }
        }
        self.propagate_suberr(Some(parent), if is_err { 1 } else { -1 });
    }

    /// Replace a non-directory child's own size/blocks in place,
    /// applying the delta to every dir ancestor so aggregates stay
    /// consistent. Used when refresh matches an existing plain file by
    /// name+kind+device and keeps the same node rather than replacing
    /// it. Not for `Link` entries — their ancestor contribution is
    /// `size/nlink`, not the raw value; refresh handles those directly
    /// with `add_stats`/`del_stats`.
    pub fn update_leaf_stats(&mut self, parent: EntryId, child: EntryId, new_size: u64, new_blocks: u64) {
        let (old_size, old_blocks) = {
            let e = &self.entries[child as usize];
            debug_assert!(!matches!(e.kind, EntryKind::Dir(_) | EntryKind::Link(_)));
            (e.size, e.blocks)
        };
        {
            let e = &mut self.entries[child as usize];
            e.size = new_size;
            e.blocks = new_blocks;
        }
        if old_size != new_size || old_blocks != new_blocks {
            self.del_stats(parent, old_size, old_blocks, 0);
            self.add_stats(parent, new_size, new_blocks, 0);
        }
    }

    /// `err(d)`: at least one direct child failed to list/stat, or this
    /// dir's own listing failed.
    pub fn err(&self, id: EntryId) -> bool {
        match &self.entries[id as usize].kind {
            EntryKind::Dir(d) => d.err(),
            EntryKind::File(f) => f.err,
            EntryKind::Link(_) => false,
        }
    }

    /// `suberr(d)`: some strict descendant, at any depth, has `err`.
    pub fn suberr(&self, id: EntryId) -> bool {
        matches!(&self.entries[id as usize].kind, EntryKind::Dir(d) if d.suberr())
    }

    /// Reconstruct the absolute path of `id` by walking parent pointers.
    /// Only used to locate a subtree on disk for `refresh`/diagnostics,
    /// never on the hot path of the walker itself.
    pub fn full_path(&self, id: EntryId) -> std::path::PathBuf {
        let mut parts = Vec::new();
        let mut cur = Some(id);
        while let Some(i) = cur {
            let e = &self.entries[i as usize];
            parts.push(e.name.clone());
            cur = e.parent;
        }
        parts.reverse();
        let mut buf = std::path::PathBuf::new();
        for part in &parts {
            buf.push(bytes_to_path_component(part));
        }
        buf
    }
}

#[cfg(unix)]
fn bytes_to_path_component(bytes: &[u8]) -> std::ffi::OsString {
    use std::os::unix::ffi::OsStringExt;
    std::ffi::OsString::from_vec(bytes.to_vec())
}

#[cfg(not(unix))]
fn bytes_to_path_component(bytes: &[u8]) -> std::ffi::OsString {
    std::ffi::OsString::from(String::from_utf8_lossy(bytes).into_owned())
}

pub struct Children<'a> {
    tree: &'a Tree,
    next: Option<EntryId>,
}

impl<'a> Iterator for Children<'a> {
    type Item = EntryId;

    fn next(&mut self) -> Option<EntryId> {
        let cur = self.next?;
        self.next = self.tree.get(cur).next;
        Some(cur)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, size: u64) -> Entry {
        Entry {
            name: name.as_bytes().to_vec(),
            size,
            blocks: size / BLOCK_SIZE + 1,
            dev_id: 0,
            next: None,
            parent: None,
            ext: None,
            is_root: false,
            kind: EntryKind::File(FileFlags::default()),
        }
    }

    fn dir(name: &str) -> Entry {
        Entry {
            name: name.as_bytes().to_vec(),
            size: 0,
            blocks: 0,
            dev_id: 0,
            next: None,
            parent: None,
            ext: None,
            is_root: false,
            kind: EntryKind::Dir(DirInfo {
                sub: None,
                items: 0,
                own_listing_failed: false,
                err_child_count: 0,
                suberr_count: 0,
            }),
        }
    }

    #[test]
    fn aggregates_propagate_to_root() {
        let mut tree = Tree::new(b"/".to_vec(), 0);
        let root = tree.root;
        let sub = tree.insert_child(root, dir("sub"));
        tree.insert_child(sub, file("a", 1000));
        tree.insert_child(sub, file("b", 2000));

        assert_eq!(tree.get(sub).size, 3000);
        assert_eq!(tree.get(root).size, 3000);
        if let EntryKind::Dir(d) = &tree.get(root).kind {
            assert_eq!(d.items, 3); // sub, a, b
        } else {
            panic!("root should be a dir");
        }
    }

    #[test]
    fn removing_a_subtree_subtracts_totals_without_walking_it() {
        let mut tree = Tree::new(b"/".to_vec(), 0);
        let root = tree.root;
        let sub = tree.insert_child(root, dir("sub"));
        tree.insert_child(sub, file("a", 1000));
        tree.del_stats_rec(root, sub);

        assert_eq!(tree.get(root).size, 0);
        if let EntryKind::Dir(d) = &tree.get(root).kind {
            assert_eq!(d.items, 0);
        }
    }

    #[test]
    fn err_flag_on_child_marks_ancestor_suberr() {
        let mut tree = Tree::new(b"/".to_vec(), 0);
        let root = tree.root;
        let sub = tree.insert_child(root, dir("sub"));
        let mut bad = file("bad", 0);
        bad.kind = EntryKind::File(FileFlags {
            err: true,
            ..Default::default()
        });
        tree.insert_child(sub, bad);

        if let EntryKind::Dir(d) = &tree.get(sub).kind {
            assert!(d.suberr());
        }
        if let EntryKind::Dir(d) = &tree.get(root).kind {
            assert!(d.suberr());
        }
    }

    #[test]
    fn dir_listing_failure_propagates_and_clears() {
        let mut tree = Tree::new(b"/".to_vec(), 0);
        let root = tree.root;
        let sub = tree.insert_child(root, dir("sub"));
        tree.set_dir_err(sub, true);
        if let EntryKind::Dir(d) = &tree.get(root).kind {
            assert!(d.suberr());
        }
        tree.set_dir_err(sub, false);
        if let EntryKind::Dir(d) = &tree.get(root).kind {
            assert!(!d.suberr());
        }
    }

    #[test]
    fn device_registry_interns_and_recovers() {
        let mut reg = DeviceRegistry::new();
        let a = reg.intern(42);
        let b = reg.intern(7);
        let a2 = reg.intern(42);
        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_eq!(reg.raw(a), 42);
        assert_eq!(reg.raw(b), 7);
    }
}
