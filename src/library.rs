//! Library books: creation, import and querying.

pub mod book;
pub mod query;

pub use book::{BookUpdate, CreateBookRequest, NewBook, UpdateBookRequest, from_candidate};
pub use query::{
    CompiledQuery, LibraryFilter, LibraryPage, LibraryQuery, LibrarySort, PageRequest, SortField,
    SortOrder,
};
