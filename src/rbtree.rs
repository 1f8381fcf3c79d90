//! Per-storage red-black tree threaded through directory entries.
//!
//! Every storage (the root included) indexes its immediate children in a
//! red-black tree whose node identities are directory ids and whose
//! pointers live in the entries' `left`, `right` and `color` fields; the
//! tree root for storage `S` is `entries[S].child`. Parent pointers are
//! not persisted: they are rebuilt into side tables when a document is
//! loaded, and maintained alongside the entry fields during inserts.

use crate::consts::END;
use crate::entry::{Color, DirectoryEntry, EntryType};
use crate::error::{Error, Result};
use crate::DirectoryId;
use std::cmp::Ordering;

/// Compare two entry names, folding ASCII letters to lowercase.
///
/// Comparison runs over the UTF-16 encoding of the names; code units
/// outside `A`..`Z` compare by raw value.
pub(crate) fn compare_names(left: &str, right: &str) -> Ordering {
    #[inline]
    fn fold(unit: u16) -> u16 {
        if (u16::from(b'A')..=u16::from(b'Z')).contains(&unit) {
            unit + 32
        } else {
            unit
        }
    }

    left.encode_utf16().map(fold).cmp(right.encode_utf16().map(fold))
}

/// Mutable view over the directory used for tree operations.
pub(crate) struct DirectoryTree<'a> {
    entries: &'a mut Vec<DirectoryEntry>,
    parent: &'a mut Vec<DirectoryId>,
    parent_storage: &'a mut Vec<DirectoryId>,
}

impl<'a> DirectoryTree<'a> {
    pub fn new(
        entries: &'a mut Vec<DirectoryEntry>,
        parent: &'a mut Vec<DirectoryId>,
        parent_storage: &'a mut Vec<DirectoryId>,
    ) -> Self {
        Self {
            entries,
            parent,
            parent_storage,
        }
    }

    #[inline]
    fn left(&self, id: DirectoryId) -> DirectoryId {
        self.entries[id as usize].left
    }

    #[inline]
    fn right(&self, id: DirectoryId) -> DirectoryId {
        self.entries[id as usize].right
    }

    #[inline]
    fn set_left(&mut self, id: DirectoryId, value: DirectoryId) {
        self.entries[id as usize].left = value;
    }

    #[inline]
    fn set_right(&mut self, id: DirectoryId, value: DirectoryId) {
        self.entries[id as usize].right = value;
    }

    #[inline]
    fn color(&self, id: DirectoryId) -> Color {
        self.entries[id as usize].color
    }

    #[inline]
    fn set_color(&mut self, id: DirectoryId, color: Color) {
        self.entries[id as usize].color = color;
    }

    #[inline]
    fn parent_of(&self, id: DirectoryId) -> DirectoryId {
        self.parent[id as usize]
    }

    #[inline]
    fn set_parent(&mut self, id: DirectoryId, value: DirectoryId) {
        self.parent[id as usize] = value;
    }

    /// Root of the tree the given entry belongs to
    #[inline]
    fn root_of(&self, id: DirectoryId) -> DirectoryId {
        self.entries[self.parent_storage[id as usize] as usize].child
    }

    fn set_root_of(&mut self, id: DirectoryId, value: DirectoryId) {
        let storage = self.parent_storage[id as usize];
        self.entries[storage as usize].child = value;
    }

    fn key(&self, id: DirectoryId) -> &str {
        &self.entries[id as usize].name
    }

    /// Splice a freshly written entry into its parent storage's tree.
    ///
    /// The caller guarantees no sibling shares the case-folded name.
    pub fn insert(&mut self, new_id: DirectoryId, storage_id: DirectoryId) {
        self.parent_storage[new_id as usize] = storage_id;
        self.set_left(new_id, END);
        self.set_right(new_id, END);

        if self.entries[storage_id as usize].child == END {
            // first child of this storage; the root entry itself never
            // becomes its own tree node
            if new_id != 0 {
                self.entries[storage_id as usize].child = new_id;
            }
            self.set_color(new_id, Color::Black);
            self.set_parent(new_id, END);
            return;
        }

        let mut x = self.entries[storage_id as usize].child;
        let mut y = END;

        while x >= 0 {
            y = x;
            if compare_names(self.key(new_id), self.key(x)) == Ordering::Greater {
                x = self.right(x);
            } else {
                x = self.left(x);
            }
        }

        self.set_parent(new_id, y);

        if compare_names(self.key(new_id), self.key(y)) == Ordering::Greater {
            self.set_right(y, new_id);
        } else {
            self.set_left(y, new_id);
        }

        self.insert_fixup(new_id);
    }

    fn rotate_left(&mut self, x: DirectoryId) {
        let y = self.right(x);

        // turn y's left subtree into x's right subtree
        self.set_right(x, self.left(y));
        if self.left(y) != END {
            let l = self.left(y);
            self.set_parent(l, x);
        }

        // link x's parent to y
        self.set_parent(y, self.parent_of(x));
        if self.parent_of(x) == END {
            self.set_root_of(x, y);
        } else if x == self.left(self.parent_of(x)) {
            let p = self.parent_of(x);
            self.set_left(p, y);
        } else {
            let p = self.parent_of(x);
            self.set_right(p, y);
        }

        // put x on y's left
        self.set_left(y, x);
        self.set_parent(x, y);
    }

    fn rotate_right(&mut self, y: DirectoryId) {
        let x = self.left(y);

        // turn x's right subtree into y's left subtree
        self.set_left(y, self.right(x));
        if self.right(x) != END {
            let r = self.right(x);
            self.set_parent(r, y);
        }

        // link y's parent to x
        self.set_parent(x, self.parent_of(y));
        if self.parent_of(y) == END {
            self.set_root_of(y, x);
        } else if y == self.left(self.parent_of(y)) {
            let p = self.parent_of(y);
            self.set_left(p, x);
        } else {
            let p = self.parent_of(y);
            self.set_right(p, x);
        }

        // put y on x's right
        self.set_right(x, y);
        self.set_parent(y, x);
    }

    fn insert_fixup(&mut self, start: DirectoryId) {
        let mut x = start;
        self.set_color(x, Color::Red);

        while x != self.root_of(x) && self.color(self.parent_of(x)) == Color::Red {
            let p = self.parent_of(x);
            let g = self.parent_of(p);

            if p == self.left(g) {
                let u = self.right(g);

                if u >= 0 && self.color(u) == Color::Red {
                    // case 1: red uncle, push blackness down from g
                    self.set_color(p, Color::Black);
                    self.set_color(u, Color::Black);
                    self.set_color(g, Color::Red);
                    x = g;
                } else {
                    if x == self.right(p) {
                        // case 2
                        x = p;
                        self.rotate_left(x);
                    }

                    // case 3
                    let p = self.parent_of(x);
                    let g = self.parent_of(p);
                    self.set_color(p, Color::Black);
                    self.set_color(g, Color::Red);
                    self.rotate_right(g);
                }
            } else {
                // same as above with left and right switched
                let u = self.left(g);

                if u >= 0 && self.color(u) == Color::Red {
                    self.set_color(p, Color::Black);
                    self.set_color(u, Color::Black);
                    self.set_color(g, Color::Red);
                    x = g;
                } else {
                    if x == self.left(p) {
                        x = p;
                        self.rotate_right(x);
                    }

                    let p = self.parent_of(x);
                    let g = self.parent_of(p);
                    self.set_color(p, Color::Black);
                    self.set_color(g, Color::Red);
                    self.rotate_left(g);
                }
            }
        }

        let root = self.root_of(x);
        self.set_color(root, Color::Black);
    }
}

/// Binary search for a child of `storage_id` by case-folded name.
pub(crate) fn find_child(
    entries: &[DirectoryEntry],
    storage_id: DirectoryId,
    name: &str,
) -> DirectoryId {
    let mut x = entries[storage_id as usize].child;

    while x >= 0 && (x as usize) < entries.len() {
        match compare_names(name, &entries[x as usize].name) {
            Ordering::Equal => return x,
            Ordering::Greater => x = entries[x as usize].right,
            Ordering::Less => x = entries[x as usize].left,
        }
    }

    END
}

/// In-order walk of a storage's children, ascending by case-folded name.
pub(crate) fn walk_in_order(entries: &[DirectoryEntry], storage_id: DirectoryId) -> Vec<DirectoryId> {
    let mut order = Vec::new();
    let mut stack = Vec::new();
    let mut x = entries[storage_id as usize].child;

    while x >= 0 || !stack.is_empty() {
        while x >= 0 && (x as usize) < entries.len() {
            stack.push(x);
            x = entries[x as usize].left;
        }
        let Some(top) = stack.pop() else { break };
        order.push(top);
        x = entries[top as usize].right;
    }

    order
}

/// Rebuild the `parent` and `parent_storage` side tables from the
/// persisted `left`/`right`/`child` fields.
///
/// Walks every storage's tree once; a revisited or out-of-range id means
/// the persisted tree is not a tree and the file is rejected.
pub(crate) fn rebuild_parents(
    entries: &[DirectoryEntry],
    parent: &mut Vec<DirectoryId>,
    parent_storage: &mut Vec<DirectoryId>,
) -> Result<()> {
    parent.clear();
    parent.resize(entries.len(), END);
    parent_storage.clear();
    parent_storage.resize(entries.len(), END);

    if entries.is_empty() {
        return Ok(());
    }

    parent_storage[0] = 0;

    let mut visited = vec![false; entries.len()];
    let mut directory_stack = vec![0 as DirectoryId];

    while let Some(storage_id) = directory_stack.pop() {
        let root = entries[storage_id as usize].child;
        if root < 0 {
            continue;
        }
        if root as usize >= entries.len() {
            return Err(Error::Corrupted(format!(
                "directory entry {} references child {}",
                storage_id, root
            )));
        }

        let mut storage_stack = vec![root];
        parent[root as usize] = END;

        while let Some(id) = storage_stack.pop() {
            let idx = id as usize;
            if idx >= entries.len() || id == storage_id {
                return Err(Error::Corrupted(format!(
                    "directory entry {} references child {}",
                    storage_id, id
                )));
            }
            if visited[idx] {
                return Err(Error::Corrupted(format!(
                    "directory entry {} appears in two sibling trees",
                    id
                )));
            }
            visited[idx] = true;

            parent_storage[idx] = storage_id;

            let entry = &entries[idx];
            if entry.entry_type == EntryType::UserStorage {
                directory_stack.push(id);
            }
            if entry.left >= 0 {
                storage_stack.push(entry.left);
                parent[entry.left as usize] = id;
            }
            if entry.right >= 0 {
                storage_stack.push(entry.right);
                parent[entry.right as usize] = id;
            }
        }
    }

    Ok(())
}
