//! The table: a B+ tree of pages rooted at page 0, plus the engine surface
//! the REPL drives (`open`, `close`, insert, full scan, tree printing).
//!
//! Everything structural lives here — leaf insertion, leaf and internal
//! splits, root creation, separator-key maintenance — expressed over page
//! numbers so the pager stays the single owner of every page buffer.

use super::btree::{
    self, NodeType, INTERNAL_NODE_CELL_SIZE, INTERNAL_NODE_MAX_CELLS, INVALID_PAGE_NUM,
    LEAF_NODE_CELL_SIZE, LEAF_NODE_LEFT_SPLIT_COUNT, LEAF_NODE_MAX_CELLS,
    LEAF_NODE_RIGHT_SPLIT_COUNT,
};
use super::cursor::Cursor;
use super::pager::Pager;
use super::row::Row;
use crate::errors::Error;
use std::path::Path;
use tracing::{debug, info, warn};

pub struct Table {
    /// Stable for the lifetime of the table: the root never moves off page 0.
    pub root_page_num: u32,
    pub pager: Pager,
}

impl Table {
    /// Opens a database file, initializing page 0 as an empty leaf root if
    /// the file is new.
    pub fn open(path: &Path) -> Result<Table, Error> {
        let mut pager = Pager::open(path)?;
        if pager.num_pages() == 0 {
            let page = pager.get_page(0)?;
            btree::initialize_leaf_node(&mut page.data);
            btree::set_node_root(&mut page.data, true);
        }
        Ok(Table {
            root_page_num: 0,
            pager,
        })
    }

    /// Flushes every resident page and closes the file.
    pub fn close(&mut self) -> Result<(), Error> {
        info!("Closing table...");
        self.pager.close()
    }

    /// Renders the tree in the debug format used by `.btree`.
    pub fn tree_to_string(&mut self) -> Result<String, Error> {
        let root_page_num = self.root_page_num;
        let mut out = String::new();
        print_node(self, root_page_num, 0, &mut out)?;
        Ok(out)
    }
}

fn indent(out: &mut String, level: usize) {
    for _ in 0..level {
        out.push(' ');
    }
}

fn print_node(
    table: &mut Table,
    page_num: u32,
    indentation_level: usize,
    out: &mut String,
) -> Result<(), Error> {
    let node_type = {
        let page = table.pager.get_page(page_num)?;
        btree::get_node_type(&page.data)?
    };
    match node_type {
        NodeType::NodeLeaf => {
            let keys = {
                let page = table.pager.get_page(page_num)?;
                let num_cells = btree::leaf_node_num_cells(&page.data);
                (0..num_cells)
                    .map(|i| btree::leaf_node_key(&page.data, i as usize))
                    .collect::<Vec<_>>()
            };
            indent(out, indentation_level);
            out.push_str(&format!("- leaf (size {})\n", keys.len()));
            for key in keys {
                indent(out, indentation_level + 1);
                out.push_str(&format!("- {}\n", key));
            }
        }
        NodeType::NodeInternal => {
            let (num_keys, cells, right_child) = {
                let page = table.pager.get_page(page_num)?;
                let num_keys = btree::internal_node_num_keys(&page.data);
                let cells = (0..num_keys)
                    .map(|i| {
                        Ok((
                            btree::internal_node_child(&page.data, i)?,
                            btree::internal_node_key(&page.data, i as usize),
                        ))
                    })
                    .collect::<Result<Vec<_>, Error>>()?;
                let right_child = if num_keys > 0 {
                    btree::internal_node_child(&page.data, num_keys)?
                } else {
                    INVALID_PAGE_NUM
                };
                (num_keys, cells, right_child)
            };
            indent(out, indentation_level);
            out.push_str(&format!("- internal (size {})\n", num_keys));
            if num_keys > 0 {
                for (child, key) in cells {
                    print_node(table, child, indentation_level + 1, out)?;
                    indent(out, indentation_level + 1);
                    out.push_str(&format!("- key {}\n", key));
                }
                print_node(table, right_child, indentation_level + 1, out)?;
            }
        }
    }
    Ok(())
}

/// The maximum key stored under `page_num`: the last cell of a leaf, or the
/// max key of the rightmost spine of an internal node.
pub fn get_node_max_key(pager: &mut Pager, page_num: u32) -> Result<u32, Error> {
    let mut page_num = page_num;
    loop {
        let page = pager.get_page(page_num)?;
        match btree::get_node_type(&page.data)? {
            NodeType::NodeLeaf => {
                let num_cells = btree::leaf_node_num_cells(&page.data);
                let last = num_cells.checked_sub(1).ok_or_else(|| {
                    err!(Corrupt, "Leaf page {} has no cells to take a max key from", page_num)
                })?;
                return Ok(btree::leaf_node_key(&page.data, last as usize));
            }
            NodeType::NodeInternal => {
                let right_child = btree::internal_node_right_child(&page.data);
                if right_child == INVALID_PAGE_NUM {
                    return Err(err!(
                        Corrupt,
                        "Internal page {} has no right child to descend",
                        page_num
                    ));
                }
                page_num = right_child;
            }
        }
    }
}

/// Inserts a row at its key position.
///
/// # Errors
/// `Error::DuplicateKey` if the key is already present; the tree is left
/// unchanged.
pub fn insert_row(table: &mut Table, row: &Row) -> Result<(), Error> {
    let key = row.id;
    debug!(key, "Inserting a row...");

    let (page_num, cell_num) = {
        let cursor = Cursor::find(table, key)?;
        (cursor.page_num, cursor.cell_num)
    };

    {
        let page = table.pager.get_page(page_num)?;
        let num_cells = btree::leaf_node_num_cells(&page.data);
        if cell_num < num_cells && btree::leaf_node_key(&page.data, cell_num as usize) == key {
            return Err(Error::DuplicateKey(key));
        }
    }

    leaf_node_insert(table, page_num, cell_num, key, row)
}

/// Reads every row in ascending key order.
pub fn select_rows(table: &mut Table) -> Result<Vec<Row>, Error> {
    let mut rows = Vec::new();
    let mut cursor = Cursor::start(table)?;
    while !cursor.end_of_table {
        rows.push(cursor.value()?);
        cursor.advance()?;
    }
    Ok(rows)
}

pub fn leaf_node_insert(
    table: &mut Table,
    page_num: u32,
    cell_num: u32,
    key: u32,
    row: &Row,
) -> Result<(), Error> {
    let num_cells = {
        let page = table.pager.get_page(page_num)?;
        btree::leaf_node_num_cells(&page.data)
    };
    if num_cells as usize >= LEAF_NODE_MAX_CELLS {
        return leaf_node_split_and_insert(table, page_num, cell_num, key, row);
    }

    let page = table.pager.get_page(page_num)?;
    if cell_num < num_cells {
        // Make room for the new cell.
        let start = btree::leaf_node_cell_offset(cell_num as usize);
        let end = btree::leaf_node_cell_offset(num_cells as usize);
        page.data.copy_within(start..end, start + LEAF_NODE_CELL_SIZE);
    }
    btree::set_leaf_node_num_cells(&mut page.data, num_cells + 1);
    btree::set_leaf_node_key(&mut page.data, cell_num as usize, key);
    row.serialize(btree::leaf_node_value_mut(&mut page.data, cell_num as usize));
    Ok(())
}

/// Creates a new leaf and moves half the cells over, inserting the new cell
/// in whichever side it falls. Updates the parent, or creates a new root if
/// the split leaf was the root.
pub fn leaf_node_split_and_insert(
    table: &mut Table,
    page_num: u32,
    cell_num: u32,
    key: u32,
    row: &Row,
) -> Result<(), Error> {
    let old_max = get_node_max_key(&mut table.pager, page_num)?;
    let new_page_num = table.pager.get_unused_page_num();
    warn!(page_num, new_page_num, key, "Leaf node full. Splitting...");

    let (old_snapshot, was_root) = {
        let old = table.pager.get_page(page_num)?;
        (old.clone(), btree::is_node_root(&old.data))
    };

    // All existing cells plus the new one are divided evenly between the old
    // (left) and new (right) nodes; `write_cell` maps a position in that
    // combined sequence to its source.
    let write_cell = |dest: &mut [u8; btree::PAGE_SIZE], dest_index: usize, i: usize| {
        if i == cell_num as usize {
            btree::set_leaf_node_key(dest, dest_index, key);
            row.serialize(btree::leaf_node_value_mut(dest, dest_index));
        } else if i > cell_num as usize {
            btree::leaf_node_cell_mut(dest, dest_index)
                .copy_from_slice(btree::leaf_node_cell(&old_snapshot.data, i - 1));
        } else {
            btree::leaf_node_cell_mut(dest, dest_index)
                .copy_from_slice(btree::leaf_node_cell(&old_snapshot.data, i));
        }
    };

    {
        let new = table.pager.get_page(new_page_num)?;
        btree::initialize_leaf_node(&mut new.data);
        btree::set_node_parent(&mut new.data, btree::node_parent(&old_snapshot.data));
        // Splice into the sibling chain: the old leaf's sibling becomes the
        // new leaf, the new leaf takes over the old sibling.
        btree::set_leaf_node_next_leaf(&mut new.data, btree::leaf_node_next_leaf(&old_snapshot.data));
        for i in LEAF_NODE_LEFT_SPLIT_COUNT..=LEAF_NODE_MAX_CELLS {
            write_cell(&mut new.data, i % LEAF_NODE_LEFT_SPLIT_COUNT, i);
        }
        btree::set_leaf_node_num_cells(&mut new.data, LEAF_NODE_RIGHT_SPLIT_COUNT as u32);
    }
    {
        let old = table.pager.get_page(page_num)?;
        btree::set_leaf_node_next_leaf(&mut old.data, new_page_num);
        for i in 0..LEAF_NODE_LEFT_SPLIT_COUNT {
            write_cell(&mut old.data, i, i);
        }
        btree::set_leaf_node_num_cells(&mut old.data, LEAF_NODE_LEFT_SPLIT_COUNT as u32);
    }

    if was_root {
        create_new_root(table, new_page_num)
    } else {
        let parent_page_num = btree::node_parent(&old_snapshot.data);
        let new_max = get_node_max_key(&mut table.pager, page_num)?;
        update_internal_node_key(table, parent_page_num, old_max, new_max)?;
        internal_node_insert(table, parent_page_num, new_page_num)
    }
}

/// Handles splitting the root: the old root is copied to a fresh page and
/// becomes the left child, the passed-in page becomes the right child, and
/// page 0 is re-initialized as an internal node over the two.
pub fn create_new_root(table: &mut Table, right_child_page_num: u32) -> Result<(), Error> {
    debug!(right_child_page_num, "Creating a new root");
    let root_page_num = table.root_page_num;

    let root_snapshot = table.pager.get_page(root_page_num)?.clone();
    let root_was_internal =
        btree::get_node_type(&root_snapshot.data)? == NodeType::NodeInternal;

    // Touch the right child before picking the left child's page number: an
    // internal root splits before its new sibling is allocated, and the left
    // child must land on a fresh page.
    {
        let right = table.pager.get_page(right_child_page_num)?;
        if root_was_internal {
            btree::initialize_internal_node(&mut right.data);
        }
    }
    let left_child_page_num = table.pager.get_unused_page_num();

    {
        // Old root data is copied to the left child so the root page number
        // can stay 0.
        let left = table.pager.get_page(left_child_page_num)?;
        left.data.copy_from_slice(&root_snapshot.data);
        btree::set_node_root(&mut left.data, false);
        btree::set_node_parent(&mut left.data, root_page_num);
    }

    if root_was_internal {
        // The copied node's children still name the root as their parent.
        let child_pages = {
            let left = table.pager.get_page(left_child_page_num)?;
            let num_keys = btree::internal_node_num_keys(&left.data);
            (0..=num_keys)
                .map(|i| btree::internal_node_child(&left.data, i))
                .collect::<Result<Vec<_>, Error>>()?
        };
        for child_page in child_pages {
            let child = table.pager.get_page(child_page)?;
            btree::set_node_parent(&mut child.data, left_child_page_num);
        }
    }

    let left_child_max_key = get_node_max_key(&mut table.pager, left_child_page_num)?;
    {
        let root = table.pager.get_page(root_page_num)?;
        btree::initialize_internal_node(&mut root.data);
        btree::set_node_root(&mut root.data, true);
        btree::set_internal_node_num_keys(&mut root.data, 1);
        btree::set_internal_node_child(&mut root.data, 0, left_child_page_num);
        btree::set_internal_node_key(&mut root.data, 0, left_child_max_key);
        btree::set_internal_node_right_child(&mut root.data, right_child_page_num);
    }
    {
        let right = table.pager.get_page(right_child_page_num)?;
        btree::set_node_parent(&mut right.data, root_page_num);
    }
    Ok(())
}

/// Renames the separator that read `old_key` to `new_key` after a child's
/// maximum moved.
pub fn update_internal_node_key(
    table: &mut Table,
    page_num: u32,
    old_key: u32,
    new_key: u32,
) -> Result<(), Error> {
    let page = table.pager.get_page(page_num)?;
    let old_child_index = btree::internal_node_find_child(&page.data, old_key);
    btree::set_internal_node_key(&mut page.data, old_child_index as usize, new_key);
    Ok(())
}

/// Adds a child/key pair to `parent_page_num` corresponding to the child's
/// maximum key. The rightmost child pointer is stored apart from the cell
/// array, so a child that lands past the current right child swaps places
/// with it instead of shifting cells.
pub fn internal_node_insert(
    table: &mut Table,
    parent_page_num: u32,
    child_page_num: u32,
) -> Result<(), Error> {
    debug!(parent_page_num, child_page_num, "Inserting child into internal node");

    let child_max_key = get_node_max_key(&mut table.pager, child_page_num)?;
    let (index, original_num_keys, right_child_page_num) = {
        let parent = table.pager.get_page(parent_page_num)?;
        (
            btree::internal_node_find_child(&parent.data, child_max_key),
            btree::internal_node_num_keys(&parent.data),
            btree::internal_node_right_child(&parent.data),
        )
    };

    if original_num_keys >= INTERNAL_NODE_MAX_CELLS as u32 {
        return internal_node_split_and_insert(table, parent_page_num, child_page_num);
    }

    // An internal node with a right child of INVALID_PAGE_NUM is empty.
    if right_child_page_num == INVALID_PAGE_NUM {
        let parent = table.pager.get_page(parent_page_num)?;
        btree::set_internal_node_right_child(&mut parent.data, child_page_num);
        return Ok(());
    }

    let right_child_max_key = get_node_max_key(&mut table.pager, right_child_page_num)?;
    let parent = table.pager.get_page(parent_page_num)?;
    btree::set_internal_node_num_keys(&mut parent.data, original_num_keys + 1);

    if child_max_key > right_child_max_key {
        // Replace the right child.
        btree::set_internal_node_child(
            &mut parent.data,
            original_num_keys as usize,
            right_child_page_num,
        );
        btree::set_internal_node_key(
            &mut parent.data,
            original_num_keys as usize,
            right_child_max_key,
        );
        btree::set_internal_node_right_child(&mut parent.data, child_page_num);
    } else {
        // Make room for the new cell.
        let start = btree::internal_node_cell_offset(index as usize);
        let end = btree::internal_node_cell_offset(original_num_keys as usize);
        parent
            .data
            .copy_within(start..end, start + INTERNAL_NODE_CELL_SIZE);
        btree::set_internal_node_child(&mut parent.data, index as usize, child_page_num);
        btree::set_internal_node_key(&mut parent.data, index as usize, child_max_key);
    }
    Ok(())
}

/// Splits a full internal node while inserting `child_page_num` into it.
///
/// The right child moves to the new sibling first and the old node is marked
/// empty-for-append (`INVALID_PAGE_NUM`), which lets every transfer below go
/// through the ordinary `internal_node_insert` path. Cells are moved in
/// descending key order, so ordering inside both halves is maintained.
pub fn internal_node_split_and_insert(
    table: &mut Table,
    parent_page_num: u32,
    child_page_num: u32,
) -> Result<(), Error> {
    let mut old_page_num = parent_page_num;
    let old_max = get_node_max_key(&mut table.pager, old_page_num)?;
    let child_max = get_node_max_key(&mut table.pager, child_page_num)?;
    let new_page_num = table.pager.get_unused_page_num();
    warn!(
        parent_page_num,
        child_page_num, new_page_num, "Internal node full. Splitting..."
    );

    let splitting_root = {
        let old = table.pager.get_page(old_page_num)?;
        btree::is_node_root(&old.data)
    };

    // The page holding the separator for the node being split: the new root
    // when the root itself splits, otherwise the existing parent.
    let separator_parent_page_num;
    if splitting_root {
        create_new_root(table, new_page_num)?;
        let root_page_num = table.root_page_num;
        separator_parent_page_num = root_page_num;
        // The node being split is now the new root's left child.
        old_page_num = {
            let root = table.pager.get_page(root_page_num)?;
            btree::internal_node_child(&root.data, 0)?
        };
    } else {
        separator_parent_page_num = {
            let old = table.pager.get_page(old_page_num)?;
            btree::node_parent(&old.data)
        };
        let new = table.pager.get_page(new_page_num)?;
        btree::initialize_internal_node(&mut new.data);
    }

    // First move the right child over and mark the old node empty-for-append.
    let moved_right_child = {
        let old = table.pager.get_page(old_page_num)?;
        let right_child = btree::internal_node_right_child(&old.data);
        if right_child == INVALID_PAGE_NUM {
            return Err(err!(
                Corrupt,
                "Splitting internal page {} with no right child",
                old_page_num
            ));
        }
        right_child
    };
    internal_node_insert(table, new_page_num, moved_right_child)?;
    {
        let moved = table.pager.get_page(moved_right_child)?;
        btree::set_node_parent(&mut moved.data, new_page_num);
    }
    {
        let old = table.pager.get_page(old_page_num)?;
        btree::set_internal_node_right_child(&mut old.data, INVALID_PAGE_NUM);
    }

    // Move cells above the middle key over, highest first.
    for i in ((INTERNAL_NODE_MAX_CELLS / 2 + 1)..INTERNAL_NODE_MAX_CELLS).rev() {
        let moved_child = {
            let old = table.pager.get_page(old_page_num)?;
            btree::internal_node_child(&old.data, i as u32)?
        };
        internal_node_insert(table, new_page_num, moved_child)?;
        {
            let moved = table.pager.get_page(moved_child)?;
            btree::set_node_parent(&mut moved.data, new_page_num);
        }
        let old = table.pager.get_page(old_page_num)?;
        let num_keys = btree::internal_node_num_keys(&old.data);
        btree::set_internal_node_num_keys(&mut old.data, num_keys - 1);
    }

    // Promote the child below the middle key, now the highest, to be the old
    // node's right child.
    {
        let old = table.pager.get_page(old_page_num)?;
        let num_keys = btree::internal_node_num_keys(&old.data);
        let promoted = btree::internal_node_child(&old.data, num_keys - 1)?;
        btree::set_internal_node_right_child(&mut old.data, promoted);
        btree::set_internal_node_num_keys(&mut old.data, num_keys - 1);
    }

    // Route the triggering child into whichever half covers its key range.
    let max_after_split = get_node_max_key(&mut table.pager, old_page_num)?;
    let destination_page_num = if child_max < max_after_split {
        old_page_num
    } else {
        new_page_num
    };
    internal_node_insert(table, destination_page_num, child_page_num)?;
    {
        let child = table.pager.get_page(child_page_num)?;
        btree::set_node_parent(&mut child.data, destination_page_num);
    }

    // The old node's key range halved; rename its separator upstairs.
    let old_max_after_split = get_node_max_key(&mut table.pager, old_page_num)?;
    update_internal_node_key(table, separator_parent_page_num, old_max, old_max_after_split)?;

    if !splitting_root {
        let grandparent_page_num = {
            let old = table.pager.get_page(old_page_num)?;
            btree::node_parent(&old.data)
        };
        internal_node_insert(table, grandparent_page_num, new_page_num)?;
        let new = table.pager.get_page(new_page_num)?;
        btree::set_node_parent(&mut new.data, grandparent_page_num);
    }
    Ok(())
}
