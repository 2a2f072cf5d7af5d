pub mod extendible_hash_table;

pub use extendible_hash_table::ExtendibleHashTable;
