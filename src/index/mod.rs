pub mod btree_index;
pub mod btree_iterator;
pub mod btree_page;
pub mod header_page;

pub use btree_index::BPlusTree;
pub use btree_iterator::BTreeIterator;
pub use btree_page::{BTreeNode, BTreeNodeRef, IndexKey};
pub use header_page::{HeaderPage, HeaderPageRef};
