mod btree_page;
mod header_page;
mod internal_page;
mod leaf_page;

pub use btree_page::{BTreePage, BTreePageRef, IndexPageType, COMMON_HEADER_SIZE};
pub use header_page::{HeaderPage, HeaderPageRef, HEADER_PAGE_CAPACITY, INDEX_NAME_SIZE};
pub use internal_page::{
    InternalPage, InternalPageRef, INTERNAL_ENTRY_SIZE, INTERNAL_HEADER_SIZE,
    INTERNAL_PAGE_CAPACITY,
};
pub use leaf_page::{LeafPage, LeafPageRef, LEAF_ENTRY_SIZE, LEAF_HEADER_SIZE, LEAF_PAGE_CAPACITY};
