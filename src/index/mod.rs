pub mod btree;
pub mod index_iterator;
pub mod key_comparator;

pub use btree::BPlusTree;
pub use index_iterator::IndexIterator;
pub use key_comparator::{KeyComparator, SignedComparator, UnsignedComparator};
