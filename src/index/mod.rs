pub mod btree;
pub mod btree_iterator;
pub mod btree_page;
pub mod header_page;
pub mod internal_page;
pub mod key_comparator;
pub mod leaf_page;

pub use btree::BPlusTree;
pub use btree_iterator::BTreeIterator;
pub use btree_page::{BTreePageRef, IndexKey, IndexPageType, INTERNAL_CAPACITY, LEAF_CAPACITY};
pub use header_page::{HeaderPage, HeaderPageRef, MAX_HEADER_RECORDS};
pub use internal_page::{InternalNode, InternalNodeRef};
pub use key_comparator::{BytewiseComparator, IntegerComparator, KeyComparator};
pub use leaf_page::{LeafNode, LeafNodeRef};
