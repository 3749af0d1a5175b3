use std::fmt;

use crate::resources::{BookSpec, BookStatus};

/// Attributes of a book mirrored between spec and status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BookField {
    Name,
    Author,
    Isbn,
    Genre,
}

impl BookField {
    pub const ALL: [BookField; 4] = [
        BookField::Name,
        BookField::Author,
        BookField::Isbn,
        BookField::Genre,
    ];

    fn desired(self, spec: &BookSpec) -> &str {
        match self {
            BookField::Name => &spec.name,
            BookField::Author => &spec.author,
            BookField::Isbn => &spec.isbn,
            BookField::Genre => &spec.genre,
        }
    }

    fn observed(self, status: &BookStatus) -> &str {
        match self {
            BookField::Name => &status.name,
            BookField::Author => &status.author,
            BookField::Isbn => &status.isbn,
            BookField::Genre => &status.genre,
        }
    }
}

impl fmt::Display for BookField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BookField::Name => "name",
            BookField::Author => "author",
            BookField::Isbn => "isbn",
            BookField::Genre => "genre",
        })
    }
}

/// Fields whose desired value differs from the last observed one
pub fn drifted_fields(spec: &BookSpec, status: &BookStatus) -> Vec<BookField> {
    BookField::ALL
        .into_iter()
        .filter(|field| field.desired(spec) != field.observed(status))
        .collect()
}

pub fn has_drifted(spec: &BookSpec, status: &BookStatus) -> bool {
    BookField::ALL
        .iter()
        .any(|field| field.desired(spec) != field.observed(status))
}
