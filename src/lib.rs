//! Repository-style access to DynamoDB tables.
//!
//! Domain types describe their key schema once through [`Entity::describe`]. Query methods are
//! declared by name, such as `findByLastNameAndAgeGreaterThan`, and optionally annotated with a
//! filter expression. Each
//! invocation builds a fresh [`criteria::QueryCriteria`], which decides between a key lookup, a
//! table or index query, and a scan, and hands the finished request to an
//! [`operations::Operations`] implementation.

#[macro_use]
extern crate async_trait;
extern crate simple_error;

pub mod batch;
pub mod config;
pub mod criteria;
pub mod expression;
pub mod filter;
pub mod marshalling;
pub mod memorystore;
pub mod metadata;
pub mod operations;
pub mod operationstest;
pub mod paging;
pub mod parser;
pub mod query;
pub mod repository;
pub mod request;
pub mod value;

#[cfg(feature = "aws-sdk")]
pub mod aws_sdk_dynamodbstore;

pub use batch::{BatchWriteError, BatchWriteRetryConfig};
pub use config::{DynamoConfig, TableNameResolver, TableSynchronization};
pub use marshalling::MarshallingMode;
pub use metadata::{EntityDescriptor, EntityKeySchema, IndexKind, PropertyDescriptor, ScalarType, SecondaryIndex};
pub use operations::Operations;
pub use paging::{Direction, Order, Page, Pageable, Slice, Sort};
pub use parser::{ConsistentReadMode, ExpressionAttribute, QueryAnnotation, QUERY_LIMIT_UNLIMITED};
pub use repository::{DerivedQuery, EntityListener, QueryArgs, QueryMethod, QueryResult, Repository};
pub use value::{FromValue, Item, Value};

use simple_error::SimpleError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A domain type, repository or query method is declared in a way that can never execute.
    /// These are raised while a repository or query method is being registered.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The query would need a full table or index scan, which was not explicitly allowed.
    #[error("{0}")]
    ScanNotEnabled(String),

    #[error("incorrect result size: expected {expected}, actual {actual}")]
    IncorrectResultSize { expected: usize, actual: usize },

    /// The bound criteria cannot be turned into a request.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// An item could not be converted into an entity or back.
    #[error("mapping error: {0}")]
    Mapping(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error(transparent)]
    BatchWrite(#[from] BatchWriteError),

    /// Errors reported by the underlying store, passed through untouched.
    #[error(transparent)]
    Store(Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl From<SimpleError> for Error {
    fn from(e: SimpleError) -> Self {
        Self::Store(Box::new(e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A domain type that can be stored in a DynamoDB table.
///
/// Items produced by [`Entity::to_item`] and consumed by [`Entity::from_item`] are keyed by
/// property name. Operations implementations translate property names into attribute names using
/// the overrides declared in [`Entity::describe`].
pub trait Entity: Clone + Send + Sync + 'static {
    fn describe() -> EntityDescriptor;

    fn to_item(&self) -> Item;

    fn from_item(item: &Item) -> Result<Self>;
}
