//! # Database Cursor Module
//!
//! A cursor is a position in the tree: a leaf page, a cell index within it,
//! and the knowledge of whether it is past the last cell in the whole table.
//! Cursors are created per operation and discarded; they must not outlive a
//! structural mutation of the tree.

use super::btree;
use super::row::Row;
use super::table;
use crate::errors::Error;
use tracing::trace;

pub struct Cursor<'a> {
    pub table: &'a mut table::Table,

    /// Leaf page the cursor points into.
    pub page_num: u32,

    /// Cell index within that leaf.
    pub cell_num: u32,

    /// Indicates a position one past the last element.
    pub end_of_table: bool,
}

impl<'a> Cursor<'a> {
    /// Positions a cursor at `key`, or at the slot where `key` would be
    /// inserted, descending from the root.
    pub fn find(table: &'a mut table::Table, key: u32) -> Result<Self, Error> {
        let mut page_num = table.root_page_num;
        loop {
            let page = table.pager.get_page(page_num)?;
            match btree::get_node_type(&page.data)? {
                btree::NodeType::NodeLeaf => {
                    let cell_num = btree::leaf_node_find_slot(&page.data, key);
                    trace!(key, page_num, cell_num, "Located leaf slot");
                    return Ok(Cursor {
                        table,
                        page_num,
                        cell_num,
                        end_of_table: false,
                    });
                }
                btree::NodeType::NodeInternal => {
                    let child_index = btree::internal_node_find_child(&page.data, key);
                    page_num = btree::internal_node_child(&page.data, child_index)?;
                }
            }
        }
    }

    /// Positions a cursor at the first cell of the leftmost leaf.
    pub fn start(table: &'a mut table::Table) -> Result<Self, Error> {
        let mut cursor = Cursor::find(table, 0)?;
        let empty = {
            let page = cursor.table.pager.get_page(cursor.page_num)?;
            btree::leaf_node_num_cells(&page.data) == 0
        };
        cursor.end_of_table = empty;
        Ok(cursor)
    }

    /// Reads the row at the current position.
    pub fn value(&mut self) -> Result<Row, Error> {
        let page = self.table.pager.get_page(self.page_num)?;
        Row::deserialize(btree::leaf_node_value(&page.data, self.cell_num as usize))
    }

    /// Advances to the next cell, hopping to the next leaf sibling when the
    /// current one is exhausted. The cursor never rests between leaves.
    pub fn advance(&mut self) -> Result<(), Error> {
        let (num_cells, next_leaf) = {
            let page = self.table.pager.get_page(self.page_num)?;
            (
                btree::leaf_node_num_cells(&page.data),
                btree::leaf_node_next_leaf(&page.data),
            )
        };

        self.cell_num += 1;
        if self.cell_num >= num_cells {
            if next_leaf == 0 {
                // Rightmost leaf.
                self.end_of_table = true;
            } else {
                self.page_num = next_leaf;
                self.cell_num = 0;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::btree::LEAF_NODE_MAX_CELLS;
    use crate::storage::table::{insert_row, Table};
    use tempfile::NamedTempFile;

    fn open_table() -> (Table, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let table = Table::open(file.path()).unwrap();
        (table, file)
    }

    fn sample_row(id: u32) -> Row {
        Row::new(id, &format!("user{}", id), &format!("person{}@example.com", id)).unwrap()
    }

    #[test]
    fn start_on_empty_table_is_end_of_table() {
        let (mut table, _file) = open_table();
        let cursor = Cursor::start(&mut table).unwrap();
        assert!(cursor.end_of_table);
    }

    #[test]
    fn cursor_walks_across_leaf_boundaries() {
        let (mut table, _file) = open_table();
        let count = LEAF_NODE_MAX_CELLS as u32 + 1; // forces a leaf split
        for id in 1..=count {
            insert_row(&mut table, &sample_row(id)).unwrap();
        }

        let mut cursor = Cursor::start(&mut table).unwrap();
        let mut seen = Vec::new();
        while !cursor.end_of_table {
            seen.push(cursor.value().unwrap().id);
            cursor.advance().unwrap();
        }
        assert_eq!(seen, (1..=count).collect::<Vec<_>>());
    }

    #[test]
    fn find_returns_slot_of_existing_and_missing_keys() {
        let (mut table, _file) = open_table();
        for id in [1, 3, 5] {
            insert_row(&mut table, &sample_row(id)).unwrap();
        }

        let cursor = Cursor::find(&mut table, 3).unwrap();
        assert_eq!(cursor.cell_num, 1);

        let cursor = Cursor::find(&mut table, 4).unwrap();
        assert_eq!(cursor.cell_num, 2);

        // Past every resident key: the insertion point is one past the end.
        let cursor = Cursor::find(&mut table, 99).unwrap();
        assert_eq!(cursor.cell_num, 3);
    }
}
