//! The B-Tree is the data structure used to represent the table.
//!
//! Unlike a binary tree, each node in a B-Tree can have more than 2
//! children. Nodes with children are called "internal" nodes. Internal nodes
//! and leaf nodes are structured differently:
//!
//! | **Property**            | **Internal Node**                  | **Leaf Node**              |
//! |-------------------------|------------------------------------|----------------------------|
//! | **Stores**              | Keys and pointers to children      | Keys and values            |
//! | **Number of keys**      | Up to `m-1`                        | As many as will fit        |
//! | **Number of pointers**  | Number of keys + 1                 | None                       |
//! | **Key purpose**         | Used for routing                   | Paired with value          |
//!
//! Both kinds of node occupy one page. This module is the codec: the layout
//! constants and the pure accessors that read and write typed fields inside
//! a raw page buffer. Everything that needs more than one page at a time
//! (searching, splitting, rebalancing) lives in [`super::table`].
//!
//! ## Page layout
//!
//! | Offset | Length | Field                                           |
//! |--------|--------|-------------------------------------------------|
//! | 0      | 1      | node type (0 = internal, 1 = leaf)              |
//! | 1      | 1      | is_root (0 = false, 1 = true)                   |
//! | 2      | 4      | parent page number (undefined for the root)     |
//!
//! Leaf nodes continue with `num_cells` (4), `next_leaf` (4), then
//! `(key, row)` cells. Internal nodes continue with `num_keys` (4),
//! `right_child` (4), then `(child, key)` cells. Multi-byte fields are
//! little-endian.

use super::row::ROW_SIZE;
use crate::errors::Error;

/// Page size 4 kilobytes because it's the same size as a page used in
/// the virtual memory systems of most computer architectures.
pub const PAGE_SIZE: usize = 4096;

/// Marks an internal node as having no right child yet. Never a valid page
/// number; the pager caps files far below `u32::MAX` pages.
pub const INVALID_PAGE_NUM: u32 = u32::MAX;

/// Represents the type of a B-tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    NodeInternal,
    NodeLeaf,
}

// Common node header layout.
const NODE_TYPE_SIZE: usize = std::mem::size_of::<u8>();
const NODE_TYPE_OFFSET: usize = 0;
const IS_ROOT_SIZE: usize = std::mem::size_of::<u8>();
const IS_ROOT_OFFSET: usize = NODE_TYPE_OFFSET + NODE_TYPE_SIZE;
const PARENT_POINTER_SIZE: usize = std::mem::size_of::<u32>();
const PARENT_POINTER_OFFSET: usize = IS_ROOT_OFFSET + IS_ROOT_SIZE;
pub const COMMON_NODE_HEADER_SIZE: usize = NODE_TYPE_SIZE + IS_ROOT_SIZE + PARENT_POINTER_SIZE;

// Leaf node header layout.
const LEAF_NODE_NUM_CELLS_SIZE: usize = std::mem::size_of::<u32>();
const LEAF_NODE_NUM_CELLS_OFFSET: usize = COMMON_NODE_HEADER_SIZE;
const LEAF_NODE_NEXT_LEAF_SIZE: usize = std::mem::size_of::<u32>();
const LEAF_NODE_NEXT_LEAF_OFFSET: usize = LEAF_NODE_NUM_CELLS_OFFSET + LEAF_NODE_NUM_CELLS_SIZE;
pub const LEAF_NODE_HEADER_SIZE: usize =
    COMMON_NODE_HEADER_SIZE + LEAF_NODE_NUM_CELLS_SIZE + LEAF_NODE_NEXT_LEAF_SIZE;

// Leaf node body layout.
pub const LEAF_NODE_KEY_SIZE: usize = std::mem::size_of::<u32>();
pub const LEAF_NODE_VALUE_SIZE: usize = ROW_SIZE;
pub const LEAF_NODE_CELL_SIZE: usize = LEAF_NODE_KEY_SIZE + LEAF_NODE_VALUE_SIZE;
pub const LEAF_NODE_SPACE_FOR_CELLS: usize = PAGE_SIZE - LEAF_NODE_HEADER_SIZE;
pub const LEAF_NODE_MAX_CELLS: usize = LEAF_NODE_SPACE_FOR_CELLS / LEAF_NODE_CELL_SIZE;

/// Number of cells assigned to the right sibling when splitting a leaf node.
pub const LEAF_NODE_RIGHT_SPLIT_COUNT: usize = (LEAF_NODE_MAX_CELLS + 1) / 2;

/// Number of cells kept by the left sibling when splitting a leaf node.
pub const LEAF_NODE_LEFT_SPLIT_COUNT: usize =
    (LEAF_NODE_MAX_CELLS + 1) - LEAF_NODE_RIGHT_SPLIT_COUNT;

// Internal node header layout.
const INTERNAL_NODE_NUM_KEYS_SIZE: usize = std::mem::size_of::<u32>();
const INTERNAL_NODE_NUM_KEYS_OFFSET: usize = COMMON_NODE_HEADER_SIZE;
const INTERNAL_NODE_RIGHT_CHILD_SIZE: usize = std::mem::size_of::<u32>();
const INTERNAL_NODE_RIGHT_CHILD_OFFSET: usize =
    INTERNAL_NODE_NUM_KEYS_OFFSET + INTERNAL_NODE_NUM_KEYS_SIZE;
pub const INTERNAL_NODE_HEADER_SIZE: usize =
    COMMON_NODE_HEADER_SIZE + INTERNAL_NODE_NUM_KEYS_SIZE + INTERNAL_NODE_RIGHT_CHILD_SIZE;

// Internal node body layout.
const INTERNAL_NODE_CHILD_SIZE: usize = std::mem::size_of::<u32>();
const INTERNAL_NODE_KEY_SIZE: usize = std::mem::size_of::<u32>();
pub const INTERNAL_NODE_CELL_SIZE: usize = INTERNAL_NODE_CHILD_SIZE + INTERNAL_NODE_KEY_SIZE;

/// Kept small to keep rebalancing exercised; raising it only changes fanout.
pub const INTERNAL_NODE_MAX_CELLS: usize = 3;

fn read_u32(page: &[u8; PAGE_SIZE], offset: usize) -> u32 {
    let bytes: [u8; 4] = page[offset..offset + 4].try_into().unwrap();
    u32::from_le_bytes(bytes)
}

fn write_u32(page: &mut [u8; PAGE_SIZE], offset: usize, value: u32) {
    page[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Reads the node type byte.
///
/// # Errors
/// Returns `Error::Corrupt` if the byte is neither 0 nor 1.
pub fn get_node_type(page: &[u8; PAGE_SIZE]) -> Result<NodeType, Error> {
    match page[NODE_TYPE_OFFSET] {
        0 => Ok(NodeType::NodeInternal),
        1 => Ok(NodeType::NodeLeaf),
        invalid => Err(err!(Corrupt, "Invalid node type value: {}", invalid)),
    }
}

pub fn set_node_type(page: &mut [u8; PAGE_SIZE], node_type: NodeType) {
    page[NODE_TYPE_OFFSET] = match node_type {
        NodeType::NodeInternal => 0,
        NodeType::NodeLeaf => 1,
    };
}

pub fn is_node_root(page: &[u8; PAGE_SIZE]) -> bool {
    page[IS_ROOT_OFFSET] == 1
}

pub fn set_node_root(page: &mut [u8; PAGE_SIZE], is_root: bool) {
    page[IS_ROOT_OFFSET] = is_root as u8;
}

pub fn node_parent(page: &[u8; PAGE_SIZE]) -> u32 {
    read_u32(page, PARENT_POINTER_OFFSET)
}

pub fn set_node_parent(page: &mut [u8; PAGE_SIZE], parent: u32) {
    write_u32(page, PARENT_POINTER_OFFSET, parent);
}

pub fn leaf_node_num_cells(page: &[u8; PAGE_SIZE]) -> u32 {
    read_u32(page, LEAF_NODE_NUM_CELLS_OFFSET)
}

pub fn set_leaf_node_num_cells(page: &mut [u8; PAGE_SIZE], num: u32) {
    write_u32(page, LEAF_NODE_NUM_CELLS_OFFSET, num);
}

/// Page of the next leaf in key order; 0 means this is the rightmost leaf.
pub fn leaf_node_next_leaf(page: &[u8; PAGE_SIZE]) -> u32 {
    read_u32(page, LEAF_NODE_NEXT_LEAF_OFFSET)
}

pub fn set_leaf_node_next_leaf(page: &mut [u8; PAGE_SIZE], next: u32) {
    write_u32(page, LEAF_NODE_NEXT_LEAF_OFFSET, next);
}

pub fn leaf_node_cell_offset(cell_num: usize) -> usize {
    LEAF_NODE_HEADER_SIZE + cell_num * LEAF_NODE_CELL_SIZE
}

pub fn leaf_node_cell(page: &[u8; PAGE_SIZE], cell_num: usize) -> &[u8] {
    let offset = leaf_node_cell_offset(cell_num);
    &page[offset..offset + LEAF_NODE_CELL_SIZE]
}

pub fn leaf_node_cell_mut(page: &mut [u8; PAGE_SIZE], cell_num: usize) -> &mut [u8] {
    let offset = leaf_node_cell_offset(cell_num);
    &mut page[offset..offset + LEAF_NODE_CELL_SIZE]
}

pub fn leaf_node_key(page: &[u8; PAGE_SIZE], cell_num: usize) -> u32 {
    read_u32(page, leaf_node_cell_offset(cell_num))
}

pub fn set_leaf_node_key(page: &mut [u8; PAGE_SIZE], cell_num: usize, key: u32) {
    write_u32(page, leaf_node_cell_offset(cell_num), key);
}

pub fn leaf_node_value(page: &[u8; PAGE_SIZE], cell_num: usize) -> &[u8] {
    let offset = leaf_node_cell_offset(cell_num) + LEAF_NODE_KEY_SIZE;
    &page[offset..offset + LEAF_NODE_VALUE_SIZE]
}

pub fn leaf_node_value_mut(page: &mut [u8; PAGE_SIZE], cell_num: usize) -> &mut [u8] {
    let offset = leaf_node_cell_offset(cell_num) + LEAF_NODE_KEY_SIZE;
    &mut page[offset..offset + LEAF_NODE_VALUE_SIZE]
}

pub fn internal_node_num_keys(page: &[u8; PAGE_SIZE]) -> u32 {
    read_u32(page, INTERNAL_NODE_NUM_KEYS_OFFSET)
}

pub fn set_internal_node_num_keys(page: &mut [u8; PAGE_SIZE], num_keys: u32) {
    write_u32(page, INTERNAL_NODE_NUM_KEYS_OFFSET, num_keys);
}

pub fn internal_node_right_child(page: &[u8; PAGE_SIZE]) -> u32 {
    read_u32(page, INTERNAL_NODE_RIGHT_CHILD_OFFSET)
}

pub fn set_internal_node_right_child(page: &mut [u8; PAGE_SIZE], right_child: u32) {
    write_u32(page, INTERNAL_NODE_RIGHT_CHILD_OFFSET, right_child);
}

pub fn internal_node_cell_offset(cell_num: usize) -> usize {
    INTERNAL_NODE_HEADER_SIZE + cell_num * INTERNAL_NODE_CELL_SIZE
}

pub fn internal_node_cell(page: &[u8; PAGE_SIZE], cell_num: usize) -> &[u8] {
    let offset = internal_node_cell_offset(cell_num);
    &page[offset..offset + INTERNAL_NODE_CELL_SIZE]
}

pub fn internal_node_cell_mut(page: &mut [u8; PAGE_SIZE], cell_num: usize) -> &mut [u8] {
    let offset = internal_node_cell_offset(cell_num);
    &mut page[offset..offset + INTERNAL_NODE_CELL_SIZE]
}

/// Reads the child pointer at `child_num`. Index `num_keys` resolves to the
/// right child.
///
/// # Errors
/// Returns `Error::Corrupt` if the index is beyond `num_keys` or the slot
/// holds `INVALID_PAGE_NUM` where a child is expected.
pub fn internal_node_child(page: &[u8; PAGE_SIZE], child_num: u32) -> Result<u32, Error> {
    let num_keys = internal_node_num_keys(page);
    if child_num > num_keys {
        return Err(err!(
            Corrupt,
            "Tried to access child_num {} > num_keys {}",
            child_num,
            num_keys
        ));
    }
    if child_num == num_keys {
        let right_child = internal_node_right_child(page);
        if right_child == INVALID_PAGE_NUM {
            return Err(err!(
                Corrupt,
                "Tried to access right child of node, but was invalid"
            ));
        }
        return Ok(right_child);
    }
    let child = read_u32(page, internal_node_cell_offset(child_num as usize));
    if child == INVALID_PAGE_NUM {
        return Err(err!(
            Corrupt,
            "Tried to access child {} of node, but was invalid page",
            child_num
        ));
    }
    Ok(child)
}

pub fn set_internal_node_child(page: &mut [u8; PAGE_SIZE], cell_num: usize, child: u32) {
    write_u32(page, internal_node_cell_offset(cell_num), child);
}

pub fn internal_node_key(page: &[u8; PAGE_SIZE], key_num: usize) -> u32 {
    read_u32(
        page,
        internal_node_cell_offset(key_num) + INTERNAL_NODE_CHILD_SIZE,
    )
}

pub fn set_internal_node_key(page: &mut [u8; PAGE_SIZE], key_num: usize, key: u32) {
    write_u32(
        page,
        internal_node_cell_offset(key_num) + INTERNAL_NODE_CHILD_SIZE,
        key,
    );
}

/// Returns the index of the child which should contain `key`, in
/// `[0, num_keys]`; `num_keys` means the right child.
pub fn internal_node_find_child(page: &[u8; PAGE_SIZE], key: u32) -> u32 {
    let num_keys = internal_node_num_keys(page);

    let mut min_index = 0;
    let mut one_past_max_index = num_keys;
    while one_past_max_index != min_index {
        let index = (min_index + one_past_max_index) / 2;
        let key_to_right = internal_node_key(page, index as usize);
        if key_to_right >= key {
            one_past_max_index = index;
        } else {
            min_index = index + 1;
        }
    }
    min_index
}

/// Returns the position of `key` in a leaf if present, else the index of the
/// first cell with a key greater than it (`num_cells` when past the end).
pub fn leaf_node_find_slot(page: &[u8; PAGE_SIZE], key: u32) -> u32 {
    let mut min_index = 0;
    let mut one_past_max_index = leaf_node_num_cells(page);
    while one_past_max_index != min_index {
        let index = (min_index + one_past_max_index) / 2;
        let key_at_index = leaf_node_key(page, index as usize);
        if key == key_at_index {
            return index;
        }
        if key < key_at_index {
            one_past_max_index = index;
        } else {
            min_index = index + 1;
        }
    }
    min_index
}

pub fn initialize_leaf_node(page: &mut [u8; PAGE_SIZE]) {
    set_node_type(page, NodeType::NodeLeaf);
    set_node_root(page, false);
    set_leaf_node_num_cells(page, 0);
    set_leaf_node_next_leaf(page, 0); // 0 represents no sibling
}

pub fn initialize_internal_node(page: &mut [u8; PAGE_SIZE]) {
    set_node_type(page, NodeType::NodeInternal);
    set_node_root(page, false);
    set_internal_node_num_keys(page, 0);
    // Necessary because the root page number is 0; a zeroed right child
    // would make this node a parent of the root.
    set_internal_node_right_child(page, INVALID_PAGE_NUM);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf_with_keys(keys: &[u32]) -> Box<[u8; PAGE_SIZE]> {
        let mut page = Box::new([0u8; PAGE_SIZE]);
        initialize_leaf_node(&mut page);
        set_leaf_node_num_cells(&mut page, keys.len() as u32);
        for (i, &key) in keys.iter().enumerate() {
            set_leaf_node_key(&mut page, i, key);
        }
        page
    }

    #[test]
    fn layout_constants() {
        assert_eq!(COMMON_NODE_HEADER_SIZE, 6);
        assert_eq!(LEAF_NODE_HEADER_SIZE, 14);
        assert_eq!(LEAF_NODE_CELL_SIZE, 297);
        assert_eq!(LEAF_NODE_SPACE_FOR_CELLS, 4082);
        assert_eq!(LEAF_NODE_MAX_CELLS, 13);
        assert_eq!(INTERNAL_NODE_HEADER_SIZE, 14);
    }

    #[test]
    fn split_counts_cover_one_overflow_cell() {
        assert_eq!(
            LEAF_NODE_LEFT_SPLIT_COUNT + LEAF_NODE_RIGHT_SPLIT_COUNT,
            LEAF_NODE_MAX_CELLS + 1
        );
        let diff = LEAF_NODE_LEFT_SPLIT_COUNT.abs_diff(LEAF_NODE_RIGHT_SPLIT_COUNT);
        assert!(diff <= 1);
    }

    #[test]
    fn fresh_leaf_header() {
        let mut page = Box::new([0xffu8; PAGE_SIZE]);
        initialize_leaf_node(&mut page);
        assert_eq!(get_node_type(&page).unwrap(), NodeType::NodeLeaf);
        assert!(!is_node_root(&page));
        assert_eq!(leaf_node_num_cells(&page), 0);
        assert_eq!(leaf_node_next_leaf(&page), 0);
    }

    #[test]
    fn fresh_internal_header() {
        let mut page = Box::new([0u8; PAGE_SIZE]);
        initialize_internal_node(&mut page);
        assert_eq!(get_node_type(&page).unwrap(), NodeType::NodeInternal);
        assert_eq!(internal_node_num_keys(&page), 0);
        assert_eq!(internal_node_right_child(&page), INVALID_PAGE_NUM);
    }

    #[test]
    fn invalid_node_type_is_corrupt() {
        let page = Box::new([0x7fu8; PAGE_SIZE]);
        assert!(get_node_type(&page).is_err());
    }

    #[test]
    fn leaf_find_slot_is_a_lower_bound() {
        let page = leaf_with_keys(&[2, 4, 6]);
        assert_eq!(leaf_node_find_slot(&page, 1), 0);
        assert_eq!(leaf_node_find_slot(&page, 2), 0);
        assert_eq!(leaf_node_find_slot(&page, 3), 1);
        assert_eq!(leaf_node_find_slot(&page, 6), 2);
        assert_eq!(leaf_node_find_slot(&page, 7), 3);

        let empty = leaf_with_keys(&[]);
        assert_eq!(leaf_node_find_slot(&empty, 42), 0);
    }

    #[test]
    fn internal_find_child_routes_by_separator() {
        let mut page = Box::new([0u8; PAGE_SIZE]);
        initialize_internal_node(&mut page);
        set_internal_node_num_keys(&mut page, 2);
        set_internal_node_child(&mut page, 0, 10);
        set_internal_node_key(&mut page, 0, 5);
        set_internal_node_child(&mut page, 1, 11);
        set_internal_node_key(&mut page, 1, 9);
        set_internal_node_right_child(&mut page, 12);

        assert_eq!(internal_node_find_child(&page, 1), 0);
        assert_eq!(internal_node_find_child(&page, 5), 0);
        assert_eq!(internal_node_find_child(&page, 6), 1);
        assert_eq!(internal_node_find_child(&page, 9), 1);
        assert_eq!(internal_node_find_child(&page, 10), 2);

        assert_eq!(internal_node_child(&page, 0).unwrap(), 10);
        assert_eq!(internal_node_child(&page, 2).unwrap(), 12);
        assert!(internal_node_child(&page, 3).is_err());
    }

    #[test]
    fn internal_cell_slices_carry_child_then_key() {
        let mut page = Box::new([0u8; PAGE_SIZE]);
        initialize_internal_node(&mut page);
        set_internal_node_num_keys(&mut page, 1);
        set_internal_node_child(&mut page, 0, 21);
        set_internal_node_key(&mut page, 0, 37);

        let cell = internal_node_cell(&page, 0);
        assert_eq!(cell.len(), INTERNAL_NODE_CELL_SIZE);
        assert_eq!(u32::from_le_bytes(cell[..4].try_into().unwrap()), 21);
        assert_eq!(u32::from_le_bytes(cell[4..].try_into().unwrap()), 37);

        internal_node_cell_mut(&mut page, 0)[..4].copy_from_slice(&99u32.to_le_bytes());
        assert_eq!(internal_node_child(&page, 0).unwrap(), 99);
    }

    #[test]
    fn child_access_on_empty_internal_is_corrupt() {
        let mut page = Box::new([0u8; PAGE_SIZE]);
        initialize_internal_node(&mut page);
        assert!(internal_node_child(&page, 0).is_err());
    }
}
